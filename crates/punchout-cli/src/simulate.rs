//! Scripted playback session against the simulated engine.

use std::io::Write;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::{Duration, Instant};

use anyhow::{Context, Result, bail};
use bytes::Bytes;
use crossbeam_channel::RecvTimeoutError;
use punchout_player::engine::sim::SimEngine;
use punchout_player::{Player, PlayerCallbacks, PlayerConfig, PlayerParams};
use punchout_types::{
    AudioCodec, AudioHeader, DecoderState, OutputMode, PlayerState, StreamType, Ticket,
    VideoSampleInfo, WindowHandle,
};
use serde::Serialize;

use crate::cli::SimulateArgs;

/// 1024 samples at 48 kHz.
const AUDIO_FRAME_US: i64 = 21_333;
const VIDEO_FRAME_US: i64 = 33_333;
const AUDIO_SAMPLE_BYTES: usize = 512;
const VIDEO_SAMPLE_BYTES: usize = 4096;
/// Samples written per needs-data notification.
const BATCH: u64 = 4;
/// How far ahead of the playback position samples are written.
const LEAD_US: i64 = 500_000;

#[derive(Debug, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
enum Notification {
    Player {
        state: PlayerState,
        ticket: Ticket,
    },
    Decoder {
        stream: StreamType,
        state: DecoderState,
        ticket: Ticket,
    },
    Error {
        message: String,
    },
}

#[derive(Debug, Serialize)]
#[serde(tag = "event", rename = "summary")]
pub struct Summary {
    pub reached_end: bool,
    pub interrupted: bool,
    pub written: u64,
    pub released: usize,
    pub seeks: u32,
    pub position_us: i64,
}

/// Synthetic sample source for one stream.
struct Cursor {
    stream: StreamType,
    enabled: bool,
    frame_us: i64,
    size: usize,
    next: u64,
    total: u64,
    ended: bool,
}

impl Cursor {
    fn new(stream: StreamType, enabled: bool, total: u64) -> Self {
        let (frame_us, size) = match stream {
            StreamType::Audio => (AUDIO_FRAME_US, AUDIO_SAMPLE_BYTES),
            StreamType::Video => (VIDEO_FRAME_US, VIDEO_SAMPLE_BYTES),
        };
        Self {
            stream,
            enabled,
            frame_us,
            size,
            next: 0,
            total,
            ended: false,
        }
    }

    fn duration_us(&self) -> i64 {
        self.total as i64 * self.frame_us
    }

    /// Write up to one batch of samples due before `horizon_us`; end the stream once exhausted.
    fn feed(&mut self, player: &Player, horizon_us: i64) -> u64 {
        if self.ended {
            return 0;
        }
        let mut written = 0;
        if self.enabled {
            let end = (self.next + BATCH).min(self.total);
            while self.next < end && self.next as i64 * self.frame_us <= horizon_us {
                let index = self.next;
                let payload = Bytes::from(vec![(index % 251) as u8; self.size]);
                let video_info = VideoSampleInfo {
                    is_key_frame: index % 30 == 0,
                    frame_width: 1920,
                    frame_height: 1080,
                };
                player.write_sample(
                    self.stream,
                    &[payload],
                    index as i64 * self.frame_us,
                    (self.stream == StreamType::Video).then_some(&video_info),
                    None,
                );
                self.next += 1;
                written += 1;
            }
        }
        if !self.enabled || self.next >= self.total {
            player.write_end_of_stream(self.stream);
            self.ended = true;
            tracing::info!(stream = self.stream.as_str(), samples = self.next, "stream ended");
        }
        written
    }

    /// Restart from the first sample at or after `target_us`. The flush re-opens ended streams.
    fn rewind(&mut self, target_us: i64) {
        self.next = ((target_us + self.frame_us - 1) / self.frame_us) as u64;
        self.ended = false;
    }
}

fn enabled_streams(names: &[String]) -> (bool, bool) {
    let (mut audio, mut video) = (false, false);
    for name in names {
        match name.parse::<StreamType>() {
            Ok(StreamType::Audio) => audio = true,
            Ok(StreamType::Video) => video = true,
            Err(err) => tracing::warn!(error = %err, "stream dropped"),
        }
    }
    (audio, video)
}

fn params(args: &SimulateArgs) -> PlayerParams {
    PlayerParams {
        window: Some(WindowHandle(1)),
        video_codec: args.video,
        audio_codec: AudioCodec::Aac,
        duration_hint_us: args.samples as i64 * VIDEO_FRAME_US,
        drm: None,
        audio_header: Some(AudioHeader {
            format_tag: 0xff,
            number_of_channels: 2,
            samples_per_second: 48_000,
            average_bytes_per_second: 16_000,
            block_alignment: 4,
            bits_per_sample: 16,
            audio_specific_config: vec![0x11, 0x90],
        }),
        output_mode: OutputMode::PunchOut,
        graphics_provider: None,
    }
}

/// Play one session and write every notification to `out` as a JSON line.
pub fn run_session(
    args: &SimulateArgs,
    config: PlayerConfig,
    stop: &AtomicBool,
    out: &mut impl Write,
) -> Result<Summary> {
    let (audio_on, video_on) = enabled_streams(&args.streams);
    let mut cursors = [
        Cursor::new(StreamType::Audio, audio_on, args.samples),
        Cursor::new(StreamType::Video, video_on, args.samples),
    ];
    let shortest_us = cursors
        .iter()
        .filter(|c| c.enabled)
        .map(Cursor::duration_us)
        .min()
        .unwrap_or(0);
    let mut seek_target = args.seek_to_ms.map(|ms| ms as i64 * 1000);
    if let Some(target) = seek_target {
        if target >= shortest_us {
            bail!("seek target {target}us is past the end of the shortest stream ({shortest_us}us)");
        }
    }

    let (tx, rx) = crossbeam_channel::unbounded();
    let released = Arc::new(AtomicUsize::new(0));
    let release_count = released.clone();
    let (player_tx, decoder_tx, error_tx) = (tx.clone(), tx.clone(), tx);
    let callbacks = PlayerCallbacks {
        sample_release: Some(Box::new(move |_, _| {
            release_count.fetch_add(1, Ordering::Relaxed);
        })),
        decoder_status: Some(Box::new(move |stream, state, ticket| {
            let _ = decoder_tx.send(Notification::Decoder {
                stream,
                state,
                ticket,
            });
        })),
        player_status: Some(Box::new(move |state, ticket| {
            let _ = player_tx.send(Notification::Player { state, ticket });
        })),
        error: Some(Box::new(move |message| {
            let _ = error_tx.send(Notification::Error {
                message: message.to_string(),
            });
        })),
    };

    let engine = SimEngine::new();
    let player = Player::create(Arc::new(engine.clone()), params(args), callbacks, config)
        .context("create player")?;
    let pipeline = engine
        .pipeline()
        .context("simulated engine created no pipeline")?;

    let mut ticket: Ticket = 1;
    player.seek(0, ticket);
    if !player.set_playback_rate(args.rate) {
        bail!("playback rate {} rejected", args.rate);
    }

    let tick_ns = i64::try_from(args.tick_ms)
        .unwrap_or(i64::MAX)
        .saturating_mul(1_000_000);
    let deadline = Instant::now() + Duration::from_secs(args.timeout_secs);
    let mut written = 0;
    let mut seeks = 0;
    let mut flushed_after: Option<usize> = None;
    let mut reached_end = false;
    let mut interrupted = false;
    loop {
        if stop.load(Ordering::Acquire) {
            tracing::warn!("interrupted");
            interrupted = true;
            break;
        }
        if Instant::now() > deadline {
            bail!("no end of stream within {}s", args.timeout_secs);
        }
        match rx.recv_timeout(Duration::from_millis(2)) {
            Ok(notification) => {
                writeln!(out, "{}", serde_json::to_string(&notification)?)?;
                match notification {
                    Notification::Decoder {
                        stream,
                        state: DecoderState::NeedsData,
                        ticket: t,
                    } if t == ticket => {
                        let horizon = player.info().current_media_timestamp + LEAD_US;
                        let cursor = match stream {
                            StreamType::Audio => &mut cursors[0],
                            StreamType::Video => &mut cursors[1],
                        };
                        written += cursor.feed(&player, horizon);
                    }
                    Notification::Player {
                        state: PlayerState::EndOfStream,
                        ticket: t,
                    } if t == ticket => {
                        reached_end = true;
                        break;
                    }
                    _ => {}
                }
            }
            Err(RecvTimeoutError::Timeout) => {
                // Hold the clock until the pipeline has flushed for the latest seek.
                match flushed_after {
                    Some(before) if pipeline.seeks().len() <= before => {}
                    _ => {
                        flushed_after = None;
                        pipeline.advance(tick_ns);
                    }
                }
            }
            Err(RecvTimeoutError::Disconnected) => bail!("player callbacks dropped"),
        }

        let Some(target) = seek_target else {
            continue;
        };
        if player.info().current_media_timestamp < shortest_us / 2 {
            continue;
        }
        seek_target = None;
        ticket += 1;
        tracing::info!(target_us = target, ticket, "seeking");
        flushed_after = Some(pipeline.seeks().len());
        player.seek(target, ticket);
        for cursor in &mut cursors {
            cursor.rewind(target);
        }
        seeks += 1;
    }

    let position_us = player.info().current_media_timestamp;
    drop(player);
    for notification in rx.try_iter() {
        writeln!(out, "{}", serde_json::to_string(&notification)?)?;
    }
    let summary = Summary {
        reached_end,
        interrupted,
        written,
        released: released.load(Ordering::Relaxed),
        seeks,
        position_us,
    };
    writeln!(out, "{}", serde_json::to_string(&summary)?)?;
    Ok(summary)
}

pub fn run(args: &SimulateArgs, config: PlayerConfig) -> Result<()> {
    let stop = Arc::new(AtomicBool::new(false));
    let flag = stop.clone();
    ctrlc::set_handler(move || flag.store(true, Ordering::Release))
        .context("install ctrl-c handler")?;
    let stdout = std::io::stdout();
    let mut out = stdout.lock();
    let summary = run_session(args, config, &stop, &mut out)?;
    tracing::info!(
        reached_end = summary.reached_end,
        written = summary.written,
        released = summary.released,
        "session finished"
    );
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cli::{Args, Command};
    use clap::Parser;
    use serde_json::Value;

    fn sim_args(extra: &[&str]) -> SimulateArgs {
        let mut argv = vec!["punchout", "simulate", "--timeout-secs", "20"];
        argv.extend_from_slice(extra);
        let Command::Simulate(args) = Args::try_parse_from(argv).unwrap().cmd else {
            panic!("expected simulate");
        };
        args
    }

    fn session(extra: &[&str]) -> (Summary, Vec<Value>) {
        let stop = AtomicBool::new(false);
        let mut out = Vec::new();
        let summary =
            run_session(&sim_args(extra), PlayerConfig::default(), &stop, &mut out).unwrap();
        let lines = String::from_utf8(out)
            .unwrap()
            .lines()
            .map(|l| serde_json::from_str(l).unwrap())
            .collect();
        (summary, lines)
    }

    fn has_player_event(lines: &[Value], state: &str, ticket: i64) -> bool {
        lines.iter().any(|l| {
            l["event"] == "player" && l["state"] == state && l["ticket"] == ticket
        })
    }

    #[test]
    fn plays_both_streams_to_the_end() {
        let (summary, lines) = session(&["--samples", "20"]);
        assert!(summary.reached_end);
        assert_eq!(summary.written, 40);
        assert_eq!(summary.released, 40);
        assert!(has_player_event(&lines, "initialized", 0));
        assert!(has_player_event(&lines, "presenting", 1));
        assert!(has_player_event(&lines, "end_of_stream", 1));
        assert!(has_player_event(&lines, "destroyed", 1));
        assert_eq!(lines.last().unwrap()["event"], "summary");
    }

    #[test]
    fn mid_stream_seek_moves_to_a_new_ticket() {
        let (summary, lines) = session(&["--samples", "60", "--seek-to-ms", "100"]);
        assert!(summary.reached_end);
        assert_eq!(summary.seeks, 1);
        assert!(has_player_event(&lines, "prerolling", 2));
        assert!(has_player_event(&lines, "end_of_stream", 2));
        assert!(!has_player_event(&lines, "end_of_stream", 1));
    }

    #[test]
    fn seek_after_a_stream_ended_reaches_the_new_end() {
        let (summary, lines) =
            session(&["--samples", "40", "--streams", "audio", "--seek-to-ms", "200"]);
        assert!(summary.reached_end);
        assert_eq!(summary.seeks, 1);
        assert!(has_player_event(&lines, "prerolling", 2));
        assert!(has_player_event(&lines, "end_of_stream", 2));
        assert!(!has_player_event(&lines, "end_of_stream", 1));
    }

    #[test]
    fn unknown_streams_are_dropped() {
        let (summary, lines) = session(&["--samples", "10", "--streams", "audio,subtitle"]);
        assert!(summary.reached_end);
        assert_eq!(summary.written, 10);
        assert!(has_player_event(&lines, "end_of_stream", 1));
    }

    #[test]
    fn seek_past_the_end_is_refused() {
        let stop = AtomicBool::new(false);
        let mut out = Vec::new();
        let args = sim_args(&["--samples", "10", "--seek-to-ms", "5000"]);
        assert!(run_session(&args, PlayerConfig::default(), &stop, &mut out).is_err());
        assert!(out.is_empty());
    }

    #[test]
    fn stop_flag_ends_the_session() {
        let stop = AtomicBool::new(true);
        let mut out = Vec::new();
        let summary =
            run_session(&sim_args(&[]), PlayerConfig::default(), &stop, &mut out).unwrap();
        assert!(summary.interrupted && !summary.reached_end);
    }
}
