//! Caller notifications and the shared playback snapshot.

use std::sync::atomic::{AtomicBool, AtomicI32, Ordering};
use std::sync::{Mutex, PoisonError};

use bytes::Bytes;
use punchout_types::{DecoderState, INITIAL_TICKET, PlayerInfo, PlayerState, StreamType, Ticket};

/// Invoked once the engine no longer references a sample's primary buffer.
pub type SampleReleaseFn = Box<dyn Fn(StreamType, &Bytes) + Send + Sync>;
/// Per-stream decoder notifications, tagged with the current ticket.
pub type DecoderStatusFn = Box<dyn Fn(StreamType, DecoderState, Ticket) + Send + Sync>;
/// Player lifecycle notifications, tagged with the current ticket.
pub type PlayerStatusFn = Box<dyn Fn(PlayerState, Ticket) + Send + Sync>;
/// Runtime engine errors.
pub type ErrorFn = Box<dyn Fn(&str) + Send + Sync>;

/// Caller hooks. Any of them may be left out.
#[derive(Default)]
pub struct PlayerCallbacks {
    pub sample_release: Option<SampleReleaseFn>,
    pub decoder_status: Option<DecoderStatusFn>,
    pub player_status: Option<PlayerStatusFn>,
    pub error: Option<ErrorFn>,
}

/// Routes notifications to the caller and owns the current ticket.
///
/// Shared between the worker, the feeders' engine listeners and the sample release guards.
/// After [`StatusReporter::close`] nothing reaches the caller anymore.
pub struct StatusReporter {
    callbacks: PlayerCallbacks,
    ticket: AtomicI32,
    state: Mutex<PlayerState>,
    closed: AtomicBool,
}

impl StatusReporter {
    pub fn new(callbacks: PlayerCallbacks) -> Self {
        if callbacks.sample_release.is_none() {
            tracing::info!("no sample release callback provided");
        }
        if callbacks.decoder_status.is_none() {
            tracing::info!("no decoder status callback provided");
        }
        if callbacks.player_status.is_none() {
            tracing::info!("no player status callback provided");
        }
        Self {
            callbacks,
            ticket: AtomicI32::new(INITIAL_TICKET),
            state: Mutex::new(PlayerState::Initialized),
            closed: AtomicBool::new(false),
        }
    }

    pub fn ticket(&self) -> Ticket {
        self.ticket.load(Ordering::Acquire)
    }

    pub fn set_ticket(&self, ticket: Ticket) {
        self.ticket.store(ticket, Ordering::Release);
    }

    pub fn player_state(&self) -> PlayerState {
        *self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Report a lifecycle transition. Every trigger is reported, repeats included.
    pub fn report_player_state(&self, state: PlayerState) {
        *self.state.lock().unwrap_or_else(PoisonError::into_inner) = state;
        self.emit_player_state(state);
    }

    fn emit_player_state(&self, state: PlayerState) {
        if self.is_closed() {
            return;
        }
        let ticket = self.ticket();
        tracing::info!(state = ?state, ticket, "player state");
        if let Some(cb) = self.callbacks.player_status.as_ref() {
            cb(state, ticket);
        }
    }

    /// Report a decoder state. `NeedsData` is withheld until the first seek sets a ticket.
    pub fn report_decoder_state(&self, stream: StreamType, state: DecoderState) {
        if self.is_closed() {
            return;
        }
        let ticket = self.ticket();
        if state == DecoderState::NeedsData && ticket == INITIAL_TICKET {
            tracing::trace!(stream = stream.as_str(), "needs data before first seek");
            return;
        }
        tracing::debug!(stream = stream.as_str(), state = ?state, ticket, "decoder state");
        if let Some(cb) = self.callbacks.decoder_status.as_ref() {
            cb(stream, state, ticket);
        }
    }

    pub fn report_error(&self, message: &str) {
        if self.is_closed() {
            return;
        }
        if let Some(cb) = self.callbacks.error.as_ref() {
            cb(message);
        }
    }

    /// Hand a sample's primary buffer back to the caller.
    pub fn release_sample(&self, stream: StreamType, head: &Bytes) {
        if self.is_closed() {
            return;
        }
        if let Some(cb) = self.callbacks.sample_release.as_ref() {
            cb(stream, head);
        }
    }

    pub fn has_sample_release(&self) -> bool {
        self.callbacks.sample_release.is_some()
    }

    pub fn close(&self) {
        self.closed.store(true, Ordering::Release);
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }
}

/// Whole-value cell for the playback snapshot.
#[derive(Debug, Default)]
pub struct InfoCell {
    inner: Mutex<PlayerInfo>,
}

impl InfoCell {
    pub fn load(&self) -> PlayerInfo {
        *self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn store(&self, info: PlayerInfo) {
        *self.inner.lock().unwrap_or_else(PoisonError::into_inner) = info;
    }

    /// Read-modify-write under one lock.
    pub fn update(&self, f: impl FnOnce(&mut PlayerInfo)) -> PlayerInfo {
        let mut guard = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
        f(&mut guard);
        *guard
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    fn recording() -> (StatusReporter, Arc<Mutex<Vec<String>>>) {
        let log = Arc::new(Mutex::new(Vec::new()));
        let player_log = log.clone();
        let decoder_log = log.clone();
        let reporter = StatusReporter::new(PlayerCallbacks {
            player_status: Some(Box::new(move |state, ticket| {
                player_log.lock().unwrap().push(format!("{state:?}@{ticket}"));
            })),
            decoder_status: Some(Box::new(move |stream, state, ticket| {
                decoder_log
                    .lock()
                    .unwrap()
                    .push(format!("{}:{state:?}@{ticket}", stream.as_str()));
            })),
            ..PlayerCallbacks::default()
        });
        (reporter, log)
    }

    #[test]
    fn every_player_state_trigger_is_reported() {
        let (reporter, log) = recording();
        reporter.report_player_state(PlayerState::Initialized);
        reporter.set_ticket(3);
        reporter.report_player_state(PlayerState::Presenting);
        reporter.report_player_state(PlayerState::Presenting);
        reporter.report_player_state(PlayerState::Destroyed);
        assert_eq!(
            *log.lock().unwrap(),
            vec!["Initialized@0", "Presenting@3", "Presenting@3", "Destroyed@3"]
        );
        assert_eq!(reporter.player_state(), PlayerState::Destroyed);
    }

    #[test]
    fn needs_data_waits_for_first_ticket() {
        let (reporter, log) = recording();
        reporter.report_decoder_state(StreamType::Audio, DecoderState::NeedsData);
        reporter.report_decoder_state(StreamType::Video, DecoderState::Destroyed);
        reporter.set_ticket(1);
        reporter.report_decoder_state(StreamType::Audio, DecoderState::NeedsData);
        assert_eq!(
            *log.lock().unwrap(),
            vec!["video:Destroyed@0", "audio:NeedsData@1"]
        );
    }

    #[test]
    fn closed_reporter_is_silent() {
        let (reporter, log) = recording();
        reporter.set_ticket(2);
        reporter.close();
        reporter.report_player_state(PlayerState::Presenting);
        reporter.report_player_state(PlayerState::Destroyed);
        reporter.report_decoder_state(StreamType::Audio, DecoderState::NeedsData);
        assert!(log.lock().unwrap().is_empty());
    }

    #[test]
    fn info_cell_updates_whole_value() {
        let cell = InfoCell::default();
        let next = cell.update(|info| {
            info.playback_rate = 2.0;
            info.is_paused = false;
        });
        assert_eq!(cell.load(), next);
        assert!(!cell.load().is_paused);
        assert_eq!(cell.load().volume, 1.0);
    }
}
