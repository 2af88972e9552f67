//! Player worker thread.
//!
//! Owns the pipeline and everything derived from it. Control commands, bus messages and the
//! position ticker are all handled here, one at a time.

use std::f32::consts::PI;
use std::path::Path;
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

use anyhow::{Context, Result, anyhow};
use crossbeam_channel::{Receiver, Sender, never, select, tick};
use punchout_types::{Bounds, PlayerInfo, PlayerState, Ticket};

use crate::aggregate::{AggregateSource, AggregateSourceFactory};
use crate::config::PlayerConfig;
use crate::engine::{
    BusMessage, Element, ElementState, Engine, Origin, Pipeline, PropertyValue, SeekRequest,
};
use crate::feeder::Feeder;
use crate::flags::FlagCache;
use crate::status::{InfoCell, StatusReporter};
use crate::time::{to_caller_time, to_engine_time};

/// Rates closer than this are considered equal; rates below it mean paused.
const RATE_EPSILON: f64 = 1e-6;

/// Commands accepted by the worker thread.
#[derive(Debug, Clone, Copy, PartialEq)]
pub(crate) enum WorkerCommand {
    Seek { time_ns: i64, ticket: Ticket },
    SetRate(f64),
    SetBounds(Bounds),
    SetVolume(f64),
    Quit,
}

/// Outcome of the seek-and-resume policy.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum SeekPlan {
    /// Start of playback at an unchanged rate; the pipeline is already there.
    SkipAtStart,
    /// Neither a position nor a rate change was requested.
    SkipUnchanged,
    /// Seek at the new rate. A jump flushes to `target` (or the current position).
    Seek { jump: bool, target: Option<i64> },
}

/// Decide how to resume at `speed`, given an optional target in engine ticks.
///
/// Negative targets count as no target.
pub fn plan_seek(target: Option<i64>, speed: f64, info: &PlayerInfo) -> SeekPlan {
    let target = target.filter(|t| *t >= 0);
    let same_rate = (speed - info.playback_rate).abs() < RATE_EPSILON;
    match target {
        Some(0) if same_rate && info.current_media_timestamp == 0 => SeekPlan::SkipAtStart,
        None if same_rate => SeekPlan::SkipUnchanged,
        _ => {
            let jump = match target {
                Some(t) => t > 0 || info.current_media_timestamp != 0,
                None => false,
            };
            SeekPlan::Seek { jump, target }
        }
    }
}

/// Map an unbounded z index onto the sink's [0, 1) layer order.
pub fn zorder(z_index: i32) -> f32 {
    (z_index.max(0) as f32 * PI / 133.0).atan() * 2.0 / PI
}

/// Everything the worker takes ownership of at start.
pub(crate) struct WorkerParts {
    pub engine: Arc<dyn Engine>,
    pub pipeline: Box<dyn Pipeline>,
    pub video_sink: Arc<dyn Element>,
    pub factory: Arc<AggregateSourceFactory>,
    pub audio: Arc<Feeder>,
    pub video: Arc<Feeder>,
    pub reporter: Arc<StatusReporter>,
    pub info: Arc<InfoCell>,
    pub flags: FlagCache,
}

pub(crate) struct PlayerWorker {
    engine: Arc<dyn Engine>,
    pipeline: Box<dyn Pipeline>,
    video_sink: Arc<dyn Element>,
    factory: Arc<AggregateSourceFactory>,
    source: Option<Arc<AggregateSource>>,
    audio: Arc<Feeder>,
    video: Arc<Feeder>,
    reporter: Arc<StatusReporter>,
    info: Arc<InfoCell>,
    flags: FlagCache,
    config: PlayerConfig,
    last_seek: Option<i64>,
    last_z: Option<i32>,
    last_rect: Option<(i32, i32, i32, i32)>,
    tracking: bool,
    ticker: Receiver<Instant>,
}

/// Start the worker and wait until its loop is running.
pub(crate) fn spawn_worker(
    worker: PlayerWorker,
    cmd_rx: Receiver<WorkerCommand>,
) -> Result<JoinHandle<()>> {
    let (ready_tx, ready_rx) = crossbeam_channel::bounded::<()>(1);
    let join = std::thread::Builder::new()
        .name("punchout-worker".to_string())
        .spawn(move || worker.run(cmd_rx, ready_tx))
        .context("spawn worker thread")?;
    ready_rx
        .recv()
        .map_err(|_| anyhow!("worker exited before start"))?;
    Ok(join)
}

impl PlayerWorker {
    pub(crate) fn new(parts: WorkerParts, config: PlayerConfig) -> Self {
        Self {
            engine: parts.engine,
            pipeline: parts.pipeline,
            video_sink: parts.video_sink,
            factory: parts.factory,
            source: None,
            audio: parts.audio,
            video: parts.video,
            reporter: parts.reporter,
            info: parts.info,
            flags: parts.flags,
            config,
            last_seek: Some(0),
            last_z: None,
            last_rect: None,
            tracking: false,
            ticker: never(),
        }
    }

    fn run(mut self, cmd_rx: Receiver<WorkerCommand>, ready: Sender<()>) {
        tracing::info!("worker loop started");
        let mut bus = self.pipeline.bus();
        let _ = ready.send(());
        self.reporter.report_player_state(PlayerState::Initialized);
        loop {
            let ticker = self.ticker.clone();
            select! {
                recv(cmd_rx) -> cmd => match cmd {
                    Ok(WorkerCommand::Quit) | Err(_) => break,
                    Ok(cmd) => self.handle_command(cmd),
                },
                recv(bus) -> msg => match msg {
                    Ok(msg) => self.handle_bus(msg),
                    Err(_) => {
                        tracing::warn!("pipeline bus closed");
                        bus = never();
                    }
                },
                recv(ticker) -> _ => self.update_position(),
            }
        }
        self.teardown();
        tracing::info!("worker loop finished");
    }

    fn handle_command(&mut self, cmd: WorkerCommand) {
        match cmd {
            WorkerCommand::Seek { time_ns, ticket } => self.do_seek(time_ns, ticket),
            WorkerCommand::SetRate(rate) => self.do_playback_rate(rate),
            WorkerCommand::SetBounds(bounds) => self.do_bounds(bounds),
            WorkerCommand::SetVolume(volume) => self.do_volume(volume),
            WorkerCommand::Quit => {}
        }
    }

    fn do_seek(&mut self, time_ns: i64, ticket: Ticket) {
        self.reporter.set_ticket(ticket);
        let info = self.info.load();
        tracing::info!(ticket, time_ns, tracking = self.tracking, "seek");
        // A pause keeps the last positive rate, so seeking while paused resumes playback.
        if self.tracking && info.playback_rate >= RATE_EPSILON {
            self.seek_and_speed(Some(time_ns), info.playback_rate);
            return;
        }
        // Position unknown yet: apply on the next rate change that resumes playback.
        self.last_seek = Some(time_ns);
    }

    fn do_playback_rate(&mut self, rate: f64) {
        tracing::debug!(rate, tracking = self.tracking, "playback rate");
        if self.tracking {
            if rate >= RATE_EPSILON {
                self.seek_and_speed(self.last_seek, rate);
                return;
            }
            if let Err(err) = self.pipeline.set_state(ElementState::Paused) {
                tracing::warn!(error = %err, "pause failed");
            }
        }
        self.info.update(|info| {
            if rate >= RATE_EPSILON {
                info.playback_rate = rate;
                info.is_paused = false;
            } else {
                info.is_paused = true;
            }
        });
    }

    fn seek_and_speed(&mut self, target: Option<i64>, speed: f64) {
        let info = self.info.load();
        if let Err(err) = self.pipeline.set_state(ElementState::Playing) {
            tracing::warn!(error = %err, "play failed");
        }
        match plan_seek(target, speed, &info) {
            SeekPlan::SkipAtStart => tracing::info!("skipped seek at the start of playback"),
            SeekPlan::SkipUnchanged => {
                tracing::info!("skipped seek without position or rate change")
            }
            SeekPlan::Seek { jump, target } => {
                let position = match target {
                    Some(position) => position,
                    None => match self.pipeline.query_position() {
                        Some(position) => position,
                        None => {
                            let last = to_engine_time(info.current_media_timestamp);
                            tracing::debug!(position = last, "position query failed, using last known");
                            last
                        }
                    },
                };
                tracing::info!(jump, position, rate = speed, "seek and speed");
                if jump {
                    self.reporter.report_player_state(PlayerState::Prerolling);
                    if let Some(source) = self.source.as_ref() {
                        source.flush();
                    }
                    self.audio.reset_end_of_stream();
                    self.video.reset_end_of_stream();
                }
                let request = SeekRequest {
                    rate: speed,
                    flush: jump,
                    position: jump.then_some(position),
                };
                if let Err(err) = self.pipeline.seek(request) {
                    tracing::warn!(error = %err, "pipeline seek failed");
                }
            }
        }
        self.last_seek = None;
        self.info.update(|info| {
            info.playback_rate = speed;
            info.is_paused = false;
        });
    }

    fn do_bounds(&mut self, bounds: Bounds) {
        if self.last_z != Some(bounds.z_index) {
            let z = zorder(bounds.z_index);
            if let Err(err) = self
                .video_sink
                .set_property("zorder", PropertyValue::Float(f64::from(z)))
            {
                tracing::warn!(error = %err, "set zorder failed");
            }
            self.last_z = Some(bounds.z_index);
        }
        let rect = (bounds.x, bounds.y, bounds.width, bounds.height);
        if self.last_rect == Some(rect) {
            return;
        }
        let window = format!("{},{},{},{}", rect.0, rect.1, rect.2, rect.3);
        tracing::debug!(window = %window, "video window");
        if let Err(err) = self
            .video_sink
            .set_property("window_set", PropertyValue::Str(window))
        {
            tracing::warn!(error = %err, "set window failed");
        }
        self.last_rect = Some(rect);
    }

    fn do_volume(&mut self, volume: f64) {
        // Tracked only; the hardware sink keeps its own gain.
        self.info.update(|info| info.volume = volume);
    }

    fn handle_bus(&mut self, msg: BusMessage) {
        match msg {
            BusMessage::AsyncDone { origin } => tracing::debug!(origin = %origin, "async done"),
            BusMessage::Error {
                origin,
                message,
                debug: details,
            } => {
                tracing::error!(origin = %origin, error = %message, details = ?details, "pipeline error");
                self.write_diagnostics("error-pipeline");
                self.reporter.report_error(&format!("{origin}: {message}"));
            }
            BusMessage::Warning {
                origin,
                message,
                debug: details,
            } => {
                tracing::warn!(origin = %origin, warning = %message, details = ?details, "pipeline warning");
            }
            BusMessage::Eos {
                origin: Origin::Pipeline,
            } => {
                tracing::info!("end of stream reached pipeline");
                self.reporter.report_player_state(PlayerState::EndOfStream);
            }
            BusMessage::Eos { origin } => tracing::debug!(origin = %origin, "stray end of stream"),
            BusMessage::StateChanged {
                origin,
                old,
                new,
                pending,
            } => {
                tracing::debug!(
                    origin = %origin,
                    old = old.as_str(),
                    new = new.as_str(),
                    pending = pending.map(|s| s.as_str()),
                    "state changed"
                );
                match origin {
                    Origin::Pipeline => self.on_pipeline_state(new),
                    Origin::SourceBin if new == ElementState::Ready => self.on_source_ready(),
                    _ => {}
                }
            }
            BusMessage::SourceSetup => {
                self.source = self.factory.latest();
                tracing::info!(found = self.source.is_some(), "source setup");
            }
        }
    }

    fn on_pipeline_state(&mut self, new: ElementState) {
        match new {
            ElementState::Paused if !self.tracking => {
                self.tracking = true;
                self.ticker = tick(Duration::from_millis(self.config.position_update_ms));
                self.reporter.report_player_state(PlayerState::Presenting);
                let info = self.info.load();
                if !info.is_paused {
                    self.seek_and_speed(self.last_seek, info.playback_rate);
                }
                self.do_volume(info.volume);
            }
            ElementState::Playing => self.reporter.report_player_state(PlayerState::Presenting),
            _ => {}
        }
    }

    fn on_source_ready(&mut self) {
        let Some(source) = self.source.clone() else {
            tracing::warn!("source ready before source setup");
            return;
        };
        if source.is_configured() {
            return;
        }
        match source.register_players(&[self.audio.as_ref(), self.video.as_ref()]) {
            Ok(()) => self.reporter.report_player_state(PlayerState::Prerolling),
            Err(err) => {
                tracing::error!(error = %format!("{err:#}"), "register feeders failed");
                self.reporter.report_error(&format!("{err:#}"));
            }
        }
    }

    fn update_position(&mut self) {
        // A failed query keeps the last known position.
        if let Some(position) = self.pipeline.query_position() {
            self.info
                .update(|info| info.current_media_timestamp = to_caller_time(position));
        }
    }

    fn write_diagnostics(&mut self, label: &str) {
        let Some(mut snapshot) = self.pipeline.debug_snapshot(label) else {
            return;
        };
        for nick in &self.config.pipeline_flags {
            let value = self.flags.value(self.engine.as_ref(), nick);
            snapshot.push_str(&format!("  flag {nick}={value:#x}\n"));
        }
        tracing::debug!(snapshot = %snapshot, "pipeline snapshot");
        let Some(dir) = self.config.diagnostics_dir.as_deref() else {
            return;
        };
        let millis = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_millis())
            .unwrap_or(0);
        let path = dir.join(format!("{label}-{millis}.txt"));
        match write_snapshot(dir, &path, &snapshot) {
            Ok(()) => tracing::info!(path = %path.display(), "wrote pipeline snapshot"),
            Err(err) => tracing::warn!(error = %format!("{err:#}"), "pipeline snapshot not written"),
        }
    }

    fn teardown(&mut self) {
        if let Err(err) = self.pipeline.set_state(ElementState::Null) {
            tracing::warn!(error = %err, "stop pipeline failed");
        }
        self.tracking = false;
        self.ticker = never();
        if let Some(source) = self.source.as_ref() {
            source.unregister_players(&[Some(self.audio.as_ref()), Some(self.video.as_ref())]);
        }
    }
}

fn write_snapshot(dir: &Path, path: &Path, snapshot: &str) -> Result<()> {
    std::fs::create_dir_all(dir).with_context(|| format!("create {:?}", dir))?;
    std::fs::write(path, snapshot).with_context(|| format!("write {:?}", path))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn info(rate: f64, timestamp: i64) -> PlayerInfo {
        PlayerInfo {
            is_paused: false,
            playback_rate: rate,
            volume: 1.0,
            current_media_timestamp: timestamp,
        }
    }

    #[test]
    fn start_of_playback_skips_seek() {
        assert_eq!(plan_seek(Some(0), 1.0, &info(1.0, 0)), SeekPlan::SkipAtStart);
        assert_eq!(
            plan_seek(Some(0), 1.0 + 1e-7, &info(1.0, 0)),
            SeekPlan::SkipAtStart
        );
    }

    #[test]
    fn no_target_and_same_rate_skips_seek() {
        for ts in [0, 5, 1_000_000] {
            assert_eq!(plan_seek(None, 2.0, &info(2.0, ts)), SeekPlan::SkipUnchanged);
            assert_eq!(plan_seek(Some(-1), 2.0, &info(2.0, ts)), SeekPlan::SkipUnchanged);
        }
    }

    #[test]
    fn rate_change_without_target_is_not_a_jump() {
        assert_eq!(
            plan_seek(None, 2.0, &info(1.0, 40)),
            SeekPlan::Seek {
                jump: false,
                target: None
            }
        );
    }

    #[test]
    fn zero_target_jumps_only_away_from_start() {
        assert_eq!(
            plan_seek(Some(0), 1.0, &info(1.0, 40)),
            SeekPlan::Seek {
                jump: true,
                target: Some(0)
            }
        );
        assert_eq!(
            plan_seek(Some(0), 2.0, &info(1.0, 0)),
            SeekPlan::Seek {
                jump: false,
                target: Some(0)
            }
        );
    }

    #[test]
    fn positive_target_always_jumps() {
        for (speed, rate, ts) in [(1.0, 1.0, 0), (1.0, 1.0, 7), (0.5, 1.0, 0), (2.0, 1.0, 9)] {
            assert_eq!(
                plan_seek(Some(5_000), speed, &info(rate, ts)),
                SeekPlan::Seek {
                    jump: true,
                    target: Some(5_000)
                }
            );
        }
    }

    #[test]
    fn plan_rules_hold_across_inputs() {
        let targets = [None, Some(-5), Some(0), Some(1), Some(3_000_000_000)];
        let rates = [0.25, 1.0, 2.0];
        let stamps = [0, 1, 90_000_000];
        for target in targets {
            for speed in rates {
                for rate in rates {
                    for ts in stamps {
                        let plan = plan_seek(target, speed, &info(rate, ts));
                        let same = speed == rate;
                        let t = target.filter(|t| *t >= 0);
                        match plan {
                            SeekPlan::SkipAtStart => assert!(same && t == Some(0) && ts == 0),
                            SeekPlan::SkipUnchanged => assert!(same && t.is_none()),
                            SeekPlan::Seek { jump, target: got } => {
                                assert_eq!(got, t);
                                assert!(!same || t.is_some());
                                assert_eq!(jump, t.is_some_and(|t| t > 0 || ts != 0));
                            }
                        }
                    }
                }
            }
        }
    }

    #[test]
    fn zorder_is_monotonic_and_bounded() {
        assert_eq!(zorder(0), 0.0);
        assert_eq!(zorder(-10), 0.0);
        let mut prev = 0.0;
        for z in [1, 2, 10, 133, 1_000] {
            let v = zorder(z);
            assert!(v > prev && v < 1.0, "z={z} v={v}");
            prev = v;
        }
        assert!((zorder(133) - 0.8).abs() < 0.01);
    }
}
