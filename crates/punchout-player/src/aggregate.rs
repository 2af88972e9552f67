//! Composite source element that fans two feeders into one pipeline source.
//!
//! Each registered feeder gets a proxy output port `src_<n>`. Child end-of-stream messages
//! are swallowed until every registered port has seen one; then a single end-of-stream is
//! sent downstream.

use std::sync::{Arc, Mutex, PoisonError};

use anyhow::{Context, Result};

use crate::engine::{BusMessage, Endpoint, Origin, SourceBin, SourceElement, SourceFactory};
use crate::feeder::Feeder;

struct Port {
    index: u32,
    name: String,
    endpoint: Arc<dyn Endpoint>,
    eos: bool,
}

#[derive(Default)]
struct AggregateState {
    ports: Vec<Port>,
    next_index: u32,
    live: u32,
    configured: bool,
    eos_emitted: bool,
}

pub struct AggregateSource {
    bin: Arc<dyn SourceBin>,
    state: Mutex<AggregateState>,
}

impl AggregateSource {
    pub fn new(bin: Arc<dyn SourceBin>) -> Self {
        Self {
            bin,
            state: Mutex::new(AggregateState::default()),
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, AggregateState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Attach each feeder's endpoint behind a new port, in the given order.
    ///
    /// All or nothing: on failure every port added by this call is removed again.
    pub fn register_players(&self, feeders: &[&Feeder]) -> Result<()> {
        let mut state = self.lock();
        let mut added = Vec::with_capacity(feeders.len());
        for feeder in feeders {
            let endpoint = feeder.endpoint().clone();
            let index = state.next_index;
            state.next_index += 1;
            let name = format!("src_{index}");
            tracing::info!(
                stream = feeder.stream_type().as_str(),
                endpoint = endpoint.name(),
                port = %name,
                "registering feeder"
            );
            let port = Port {
                index,
                name,
                endpoint,
                eos: false,
            };
            if let Err(err) = self.attach(&port) {
                tracing::warn!(port = %port.name, "feeder registration failed, rolling back");
                for port in added.iter().rev() {
                    self.detach(port);
                }
                return Err(err);
            }
            added.push(port);
        }
        self.bin.no_more_ports();
        state.live += added.len() as u32;
        state.ports.extend(added);
        for port in state.ports.iter_mut() {
            port.eos = false;
        }
        state.eos_emitted = false;
        state.configured = true;
        Ok(())
    }

    /// Add the child, then its proxy port, then start it. Undoes the partial steps on error.
    fn attach(&self, port: &Port) -> Result<()> {
        let endpoint = &port.endpoint;
        self.bin
            .add_child(endpoint)
            .with_context(|| format!("add {} to source", endpoint.name()))?;
        if let Err(err) = self
            .bin
            .add_proxy_port(&port.name, endpoint)
            .with_context(|| format!("add port {}", port.name))
        {
            self.remove_child(endpoint);
            return Err(err);
        }
        if let Err(err) = self
            .bin
            .sync_child_state(endpoint)
            .with_context(|| format!("start {}", endpoint.name()))
        {
            self.detach(port);
            return Err(err);
        }
        Ok(())
    }

    fn detach(&self, port: &Port) {
        if let Err(err) = self.bin.remove_proxy_port(&port.name) {
            tracing::warn!(port = %port.name, error = %err, "remove port failed");
        }
        self.remove_child(&port.endpoint);
    }

    fn remove_child(&self, endpoint: &Arc<dyn Endpoint>) {
        if let Err(err) = self.bin.remove_child(endpoint) {
            tracing::warn!(endpoint = endpoint.name(), error = %err, "remove child failed");
        }
    }

    /// Detach the given feeders. Once the bin is empty the source can be registered again.
    pub fn unregister_players(&self, feeders: &[Option<&Feeder>]) {
        let mut state = self.lock();
        for feeder in feeders.iter().flatten() {
            let endpoint = feeder.endpoint();
            let Some(pos) = state
                .ports
                .iter()
                .position(|p| p.endpoint.name() == endpoint.name())
            else {
                tracing::debug!(endpoint = endpoint.name(), "feeder has no port");
                continue;
            };
            let port = state.ports.remove(pos);
            tracing::info!(endpoint = endpoint.name(), port = %port.name, "unregistering feeder");
            self.detach(&port);
            state.live = state.live.saturating_sub(1);
        }
        if self.bin.child_count() == 0 {
            tracing::debug!("no feeder left, unconfiguring");
            state.configured = false;
        }
    }

    pub fn is_configured(&self) -> bool {
        self.lock().configured
    }

    /// Start a new end-of-stream session after a flushing seek.
    pub fn flush(&self) {
        let mut state = self.lock();
        for port in state.ports.iter_mut() {
            port.eos = false;
        }
        state.eos_emitted = false;
    }

    /// Port names with their end-of-stream flags, by index.
    pub fn ports(&self) -> Vec<(String, bool)> {
        let state = self.lock();
        let mut ports: Vec<_> = state.ports.iter().map(|p| (p.index, p.name.clone(), p.eos)).collect();
        ports.sort_by_key(|(index, _, _)| *index);
        ports.into_iter().map(|(_, name, eos)| (name, eos)).collect()
    }

    pub fn live_ports(&self) -> u32 {
        self.lock().live
    }

    fn child_eos(&self, child: &str) -> bool {
        let mut state = self.lock();
        let Some(port) = state.ports.iter_mut().find(|p| p.endpoint.name() == child) else {
            tracing::warn!(child, "end of stream from unknown child");
            return false;
        };
        port.eos = true;
        tracing::debug!(child, port = %port.name, "child end of stream");
        let mut ports: Vec<&Port> = state.ports.iter().collect();
        ports.sort_by_key(|p| p.index);
        let all_eos = ports.iter().all(|p| p.eos);
        if all_eos && !state.eos_emitted {
            state.eos_emitted = true;
            return true;
        }
        false
    }
}

impl SourceElement for AggregateSource {
    fn handle_message(&self, message: BusMessage) {
        match message {
            BusMessage::Eos {
                origin: Origin::Child(child),
            } => {
                if self.child_eos(&child) {
                    tracing::info!("all feeders reached end of stream");
                    self.bin.send_eos();
                }
            }
            other => self.bin.forward(other),
        }
    }
}

/// Creates [`AggregateSource`]s for the pipeline and keeps the latest one for the player.
pub struct AggregateSourceFactory {
    scheme: String,
    latest: Mutex<Option<Arc<AggregateSource>>>,
}

impl AggregateSourceFactory {
    pub fn new(scheme: &str) -> Self {
        Self {
            scheme: scheme.to_string(),
            latest: Mutex::new(None),
        }
    }

    pub fn latest(&self) -> Option<Arc<AggregateSource>> {
        self.latest
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

impl SourceFactory for AggregateSourceFactory {
    fn scheme(&self) -> &str {
        &self.scheme
    }

    fn create(&self, bin: Arc<dyn SourceBin>) -> Arc<dyn SourceElement> {
        let source = Arc::new(AggregateSource::new(bin));
        *self.latest.lock().unwrap_or_else(PoisonError::into_inner) = Some(source.clone());
        source
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::PlayerConfig;
    use crate::engine::sim::SimEngine;
    use crate::feeder::VideoProfile;
    use crate::status::{PlayerCallbacks, StatusReporter};
    use punchout_types::VideoCodec;

    /// Records bin calls instead of touching an engine.
    #[derive(Default)]
    struct RecordingBin {
        children: Mutex<Vec<String>>,
        ports: Mutex<Vec<String>>,
        eos_sent: Mutex<usize>,
        forwarded: Mutex<Vec<BusMessage>>,
        refused_port: Mutex<Option<String>>,
    }

    impl SourceBin for RecordingBin {
        fn add_child(&self, endpoint: &Arc<dyn Endpoint>) -> Result<()> {
            self.children.lock().unwrap().push(endpoint.name().to_string());
            Ok(())
        }

        fn add_proxy_port(&self, port: &str, _endpoint: &Arc<dyn Endpoint>) -> Result<()> {
            if self.refused_port.lock().unwrap().as_deref() == Some(port) {
                anyhow::bail!("port {port} refused");
            }
            self.ports.lock().unwrap().push(port.to_string());
            Ok(())
        }

        fn sync_child_state(&self, _endpoint: &Arc<dyn Endpoint>) -> Result<()> {
            Ok(())
        }

        fn no_more_ports(&self) {}

        fn remove_proxy_port(&self, port: &str) -> Result<()> {
            self.ports.lock().unwrap().retain(|p| p != port);
            Ok(())
        }

        fn remove_child(&self, endpoint: &Arc<dyn Endpoint>) -> Result<()> {
            self.children
                .lock()
                .unwrap()
                .retain(|c| c != endpoint.name());
            Ok(())
        }

        fn child_count(&self) -> usize {
            self.children.lock().unwrap().len()
        }

        fn send_eos(&self) {
            *self.eos_sent.lock().unwrap() += 1;
        }

        fn forward(&self, message: BusMessage) {
            self.forwarded.lock().unwrap().push(message);
        }
    }

    struct Fixture {
        bin: Arc<RecordingBin>,
        source: AggregateSource,
        feeders: Vec<Feeder>,
    }

    fn fixture(count: usize) -> Fixture {
        let engine = SimEngine::new();
        let reporter = Arc::new(StatusReporter::new(PlayerCallbacks::default()));
        let cfg = PlayerConfig::default();
        let feeders = (0..count)
            .map(|_| {
                Feeder::new(
                    &engine,
                    Box::new(VideoProfile::new(VideoCodec::H264, &cfg)),
                    reporter.clone(),
                )
                .unwrap()
            })
            .collect();
        let bin = Arc::new(RecordingBin::default());
        let source = AggregateSource::new(bin.clone());
        Fixture {
            bin,
            source,
            feeders,
        }
    }

    fn eos_from(source: &AggregateSource, feeder: &Feeder) {
        source.handle_message(BusMessage::Eos {
            origin: Origin::Child(feeder.endpoint().name().to_string()),
        });
    }

    #[test]
    fn register_names_ports_in_order() {
        let f = fixture(2);
        assert!(!f.source.is_configured());
        f.source
            .register_players(&[&f.feeders[0], &f.feeders[1]])
            .unwrap();
        assert!(f.source.is_configured());
        assert_eq!(*f.bin.ports.lock().unwrap(), vec!["src_0", "src_1"]);
        assert_eq!(f.source.live_ports(), 2);
    }

    #[test]
    fn eos_fires_once_after_every_port() {
        for n in 1..=3 {
            let f = fixture(n);
            let refs: Vec<&Feeder> = f.feeders.iter().collect();
            f.source.register_players(&refs).unwrap();
            for feeder in &f.feeders[..n - 1] {
                eos_from(&f.source, feeder);
            }
            assert_eq!(*f.bin.eos_sent.lock().unwrap(), 0, "n={n}");
            eos_from(&f.source, &f.feeders[n - 1]);
            assert_eq!(*f.bin.eos_sent.lock().unwrap(), 1, "n={n}");
            eos_from(&f.source, &f.feeders[0]);
            assert_eq!(*f.bin.eos_sent.lock().unwrap(), 1, "n={n}");
        }
    }

    #[test]
    fn flush_opens_a_new_eos_session() {
        let f = fixture(2);
        f.source
            .register_players(&[&f.feeders[0], &f.feeders[1]])
            .unwrap();
        eos_from(&f.source, &f.feeders[0]);
        eos_from(&f.source, &f.feeders[1]);
        f.source.flush();
        assert!(f.source.ports().iter().all(|(_, eos)| !eos));
        eos_from(&f.source, &f.feeders[1]);
        assert_eq!(*f.bin.eos_sent.lock().unwrap(), 1);
        eos_from(&f.source, &f.feeders[0]);
        assert_eq!(*f.bin.eos_sent.lock().unwrap(), 2);
    }

    #[test]
    fn reregistering_starts_clean() {
        let f = fixture(2);
        let all = [&f.feeders[0], &f.feeders[1]];
        f.source.register_players(&all).unwrap();
        eos_from(&f.source, &f.feeders[0]);
        f.source
            .unregister_players(&[Some(&f.feeders[0]), Some(&f.feeders[1])]);
        assert!(!f.source.is_configured());
        assert_eq!(f.source.live_ports(), 0);

        f.source.register_players(&all).unwrap();
        assert!(f.source.is_configured());
        assert_eq!(
            f.source.ports(),
            vec![("src_2".to_string(), false), ("src_3".to_string(), false)]
        );
        eos_from(&f.source, &f.feeders[1]);
        assert_eq!(*f.bin.eos_sent.lock().unwrap(), 0);
    }

    #[test]
    fn partial_unregister_keeps_configuration() {
        let f = fixture(2);
        f.source
            .register_players(&[&f.feeders[0], &f.feeders[1]])
            .unwrap();
        f.source.unregister_players(&[None, Some(&f.feeders[1])]);
        assert!(f.source.is_configured());
        assert_eq!(f.source.ports(), vec![("src_0".to_string(), false)]);
        // Unknown feeder is skipped.
        f.source.unregister_players(&[Some(&f.feeders[1])]);
        assert_eq!(f.source.live_ports(), 1);
        // Remaining port alone completes the session.
        eos_from(&f.source, &f.feeders[0]);
        assert_eq!(*f.bin.eos_sent.lock().unwrap(), 1);
    }

    #[test]
    fn failed_registration_leaves_the_bin_empty() {
        let f = fixture(2);
        *f.bin.refused_port.lock().unwrap() = Some("src_1".to_string());
        let err = f
            .source
            .register_players(&[&f.feeders[0], &f.feeders[1]])
            .unwrap_err();
        assert!(format!("{err:#}").contains("src_1"));
        assert!(f.bin.children.lock().unwrap().is_empty());
        assert!(f.bin.ports.lock().unwrap().is_empty());
        assert!(!f.source.is_configured());
        assert_eq!(f.source.live_ports(), 0);

        *f.bin.refused_port.lock().unwrap() = None;
        f.source
            .register_players(&[&f.feeders[0], &f.feeders[1]])
            .unwrap();
        assert!(f.source.is_configured());
        assert_eq!(*f.bin.ports.lock().unwrap(), vec!["src_2", "src_3"]);
        assert_eq!(f.bin.children.lock().unwrap().len(), 2);
    }

    #[test]
    fn unknown_child_eos_is_swallowed_and_other_messages_forwarded() {
        let f = fixture(1);
        f.source.register_players(&[&f.feeders[0]]).unwrap();
        f.source.handle_message(BusMessage::Eos {
            origin: Origin::Child("stranger".to_string()),
        });
        let warning = BusMessage::Warning {
            origin: Origin::Child("x".to_string()),
            message: "late".to_string(),
            debug: None,
        };
        f.source.handle_message(warning.clone());
        assert_eq!(*f.bin.eos_sent.lock().unwrap(), 0);
        assert_eq!(*f.bin.forwarded.lock().unwrap(), vec![warning]);
    }

    #[test]
    fn factory_keeps_latest_source() {
        let factory = AggregateSourceFactory::new("punchout");
        assert!(factory.latest().is_none());
        let _first = factory.create(Arc::new(RecordingBin::default()));
        let _second = factory.create(Arc::new(RecordingBin::default()));
        assert_eq!(factory.scheme(), "punchout");
        assert!(factory.latest().is_some());
    }
}
