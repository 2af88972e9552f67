//! Caller-facing player.
//!
//! Control calls are posted to the worker thread and return immediately. Samples and
//! end-of-stream markers go straight to the feeders on the caller's thread.

use std::sync::Arc;
use std::thread::JoinHandle;

use anyhow::{Context, Result, bail};
use bytes::Bytes;
use crossbeam_channel::Sender;
use punchout_types::{
    AudioCodec, AudioHeader, Bounds, DecodeTarget, DrmSampleInfo, DrmSystem, GraphicsProvider,
    OutputMode, PlayerInfo, PlayerState, StreamType, Ticket, VideoCodec, VideoSampleInfo,
    WindowHandle,
};

use crate::aggregate::AggregateSourceFactory;
use crate::capability::output_mode_supported;
use crate::config::PlayerConfig;
use crate::engine::{Buffer, ElementState, Engine, PipelineSpec, PropertyValue, ReleaseGuard};
use crate::event_loop::LoopThread;
use crate::feeder::{AudioProfile, Feeder, VideoProfile};
use crate::flags::FlagCache;
use crate::status::{InfoCell, PlayerCallbacks, StatusReporter};
use crate::time::to_engine_time;
use crate::worker::{PlayerWorker, WorkerCommand, WorkerParts, spawn_worker};

/// Stream and output description for a new player.
#[derive(Clone, Debug)]
pub struct PlayerParams {
    pub window: Option<WindowHandle>,
    pub video_codec: VideoCodec,
    pub audio_codec: AudioCodec,
    /// Expected media duration in microseconds. Informational.
    pub duration_hint_us: i64,
    pub drm: Option<DrmSystem>,
    pub audio_header: Option<AudioHeader>,
    pub output_mode: OutputMode,
    pub graphics_provider: Option<GraphicsProvider>,
}

pub struct Player {
    video_codec: VideoCodec,
    audio_codec: AudioCodec,
    cmd_tx: Sender<WorkerCommand>,
    worker: Option<JoinHandle<()>>,
    default_loop: LoopThread,
    reporter: Arc<StatusReporter>,
    info: Arc<InfoCell>,
    audio: Option<Arc<Feeder>>,
    video: Option<Arc<Feeder>>,
}

impl Player {
    /// Build the pipeline, start both loops and return once the worker is running.
    ///
    /// On error no callback has fired and no thread is left running.
    pub fn create(
        engine: Arc<dyn Engine>,
        params: PlayerParams,
        callbacks: PlayerCallbacks,
        config: PlayerConfig,
    ) -> Result<Self> {
        config.validate()?;
        if params.window.is_none() {
            bail!("player requires a window");
        }
        if !output_mode_supported(params.output_mode, params.video_codec, params.drm) {
            bail!(
                "output mode {:?} not supported for {}",
                params.output_mode,
                params.video_codec.as_str()
            );
        }
        tracing::info!(
            video = params.video_codec.as_str(),
            audio = params.audio_codec.as_str(),
            duration_hint_us = params.duration_hint_us,
            drm = params.drm.is_some(),
            graphics = params.graphics_provider.is_some(),
            "creating player"
        );

        let factory = Arc::new(AggregateSourceFactory::new(&config.uri_scheme));
        let pipeline = engine
            .make_pipeline(PipelineSpec {
                source_factory: factory.clone(),
            })
            .context("create pipeline")?;
        pipeline.set_uri(&config.source_uri())?;
        let mut flags = FlagCache::new();
        pipeline.set_flags(flags.combine(engine.as_ref(), &config.pipeline_flags))?;

        let video_sink = engine
            .make_element(&config.video_sink)
            .with_context(|| format!("create video sink {}", config.video_sink))?;
        pipeline.set_video_sink(video_sink.clone())?;
        video_sink.set_property("zorder", PropertyValue::Float(0.0))?;
        let audio_sink = engine
            .make_element(&config.audio_sink)
            .with_context(|| format!("create audio sink {}", config.audio_sink))?;
        pipeline.set_audio_sink(audio_sink.clone())?;
        audio_sink.set_property("async", PropertyValue::Bool(true))?;

        pipeline
            .set_state(ElementState::Paused)
            .context("start pipeline")?;

        // From here on a failure must silence the reporter before the feeders drop.
        let reporter = Arc::new(StatusReporter::new(callbacks));
        let info = Arc::new(InfoCell::default());
        let video = Arc::new(
            Feeder::new(
                engine.as_ref(),
                Box::new(VideoProfile::new(params.video_codec, &config)),
                reporter.clone(),
            )
            .inspect_err(|_| reporter.close())?,
        );
        let audio = Arc::new(
            Feeder::new(
                engine.as_ref(),
                Box::new(AudioProfile::new(
                    params.audio_codec,
                    params.audio_header.clone(),
                    &config,
                )),
                reporter.clone(),
            )
            .inspect_err(|_| reporter.close())?,
        );
        video.initialize().inspect_err(|_| reporter.close())?;
        audio.initialize().inspect_err(|_| reporter.close())?;

        let default_loop =
            LoopThread::spawn("punchout-default").inspect_err(|_| reporter.close())?;
        engine.attach_default_context(default_loop.handle());

        let (cmd_tx, cmd_rx) = crossbeam_channel::unbounded();
        let worker = PlayerWorker::new(
            WorkerParts {
                engine: engine.clone(),
                pipeline,
                video_sink,
                factory,
                audio: audio.clone(),
                video: video.clone(),
                reporter: reporter.clone(),
                info: info.clone(),
                flags,
            },
            config,
        );
        let worker = spawn_worker(worker, cmd_rx).inspect_err(|_| reporter.close())?;

        Ok(Self {
            video_codec: params.video_codec,
            audio_codec: params.audio_codec,
            cmd_tx,
            worker: Some(worker),
            default_loop,
            reporter,
            info,
            audio: Some(audio),
            video: Some(video),
        })
    }

    fn post(&self, cmd: WorkerCommand) {
        if self.cmd_tx.send(cmd).is_err() {
            tracing::warn!(command = ?cmd, "worker gone, command dropped");
        }
    }

    fn feeder(&self, stream: StreamType) -> Option<&Feeder> {
        match stream {
            StreamType::Audio => self.audio.as_deref(),
            StreamType::Video => self.video.as_deref(),
        }
    }

    /// Start a new seek session at `target_us`. Later notifications carry `ticket`.
    pub fn seek(&self, target_us: i64, ticket: Ticket) {
        tracing::debug!(target_us, ticket, "seek requested");
        self.post(WorkerCommand::Seek {
            time_ns: to_engine_time(target_us),
            ticket,
        });
    }

    /// Queue one sample. The first span is the primary buffer handed back through the
    /// sample-release callback once the engine is done with it.
    pub fn write_sample(
        &self,
        stream: StreamType,
        buffers: &[Bytes],
        pts_us: i64,
        video_info: Option<&VideoSampleInfo>,
        drm_info: Option<&DrmSampleInfo>,
    ) {
        let Some((head, rest)) = buffers.split_first() else {
            tracing::debug!(stream = stream.as_str(), "sample without buffers dropped");
            return;
        };
        if let Some(info) = video_info {
            tracing::trace!(
                key_frame = info.is_key_frame,
                width = info.frame_width,
                height = info.frame_height,
                pts_us,
                "video sample"
            );
        }
        if drm_info.is_some() {
            tracing::trace!(stream = stream.as_str(), "sample encryption info not used");
        }
        let mut buffer = Buffer::new(head.clone(), to_engine_time(pts_us));
        if self.reporter.has_sample_release() {
            let reporter = self.reporter.clone();
            let head = head.clone();
            buffer = buffer.with_release(ReleaseGuard::new(move || {
                reporter.release_sample(stream, &head);
            }));
        }
        for span in rest {
            buffer.append_memory(span.clone());
        }
        if let Some(feeder) = self.feeder(stream) {
            feeder.push(buffer);
        }
    }

    pub fn write_end_of_stream(&self, stream: StreamType) {
        if let Some(feeder) = self.feeder(stream) {
            feeder.end_of_stream();
        }
    }

    pub fn set_bounds(&self, bounds: Bounds) {
        self.post(WorkerCommand::SetBounds(bounds));
    }

    /// Returns false for negative or NaN rates, which leave the player untouched.
    pub fn set_playback_rate(&self, rate: f64) -> bool {
        if rate.is_nan() || rate < 0.0 {
            tracing::debug!(rate, "playback rate rejected");
            return false;
        }
        self.post(WorkerCommand::SetRate(rate));
        true
    }

    /// Volumes outside 0..=1 are ignored.
    pub fn set_volume(&self, volume: f64) {
        if !(0.0..=1.0).contains(&volume) {
            tracing::debug!(volume, "volume out of range");
            return;
        }
        self.post(WorkerCommand::SetVolume(volume));
    }

    pub fn info(&self) -> PlayerInfo {
        self.info.load()
    }

    /// Punch-out output never hands frames back.
    pub fn current_frame(&self) -> Option<DecodeTarget> {
        None
    }

    pub fn video_codec(&self) -> VideoCodec {
        self.video_codec
    }

    pub fn audio_codec(&self) -> AudioCodec {
        self.audio_codec
    }
}

impl Drop for Player {
    fn drop(&mut self) {
        tracing::info!("destroying player");
        self.post(WorkerCommand::Quit);
        if let Some(worker) = self.worker.take() {
            if worker.join().is_err() {
                tracing::error!("worker thread panicked");
            }
        }
        self.default_loop.quit_and_join();
        self.reporter.report_player_state(PlayerState::Destroyed);
        drop(self.audio.take());
        drop(self.video.take());
        self.reporter.close();
        tracing::info!("player destroyed");
    }
}
