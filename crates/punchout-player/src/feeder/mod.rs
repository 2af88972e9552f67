//! Per-stream injection into the pipeline.
//!
//! A [`Feeder`] owns one engine endpoint. Caller samples are pushed into it directly on the
//! caller's thread; the endpoint's backpressure callbacks come back as decoder notifications.

mod audio;
mod video;

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, OnceLock};

use anyhow::{Context, Result, bail};
use punchout_types::{DecoderState, StreamType};

use crate::engine::{Buffer, Caps, Endpoint, EndpointListener, EndpointSettings, Engine, FlowStatus};
use crate::status::StatusReporter;

pub use audio::AudioProfile;
pub use video::VideoProfile;

/// Codec-specific part of a feeder.
pub trait StreamProfile: Send + Sync {
    fn stream_type(&self) -> StreamType;
    /// Refill threshold (percent) and queue limit (bytes) for the endpoint.
    fn queue_limits(&self) -> (u32, u64);
    /// Capability descriptor announced on the endpoint.
    fn build_caps(&self) -> Result<Caps>;
}

/// Relays endpoint backpressure to the caller until detached.
struct FeederListener {
    stream_type: StreamType,
    reporter: Arc<StatusReporter>,
    detached: AtomicBool,
}

impl FeederListener {
    fn report_needs_data(&self) {
        if self.detached.load(Ordering::Acquire) {
            return;
        }
        self.reporter
            .report_decoder_state(self.stream_type, DecoderState::NeedsData);
    }
}

impl EndpointListener for FeederListener {
    fn need_data(&self, _length: u32) {
        self.report_needs_data();
    }

    fn enough_data(&self) {
        tracing::trace!(stream = self.stream_type.as_str(), "enough data");
    }

    fn seek_data(&self, offset: u64) -> bool {
        tracing::debug!(stream = self.stream_type.as_str(), offset, "seek data");
        self.report_needs_data();
        true
    }
}

/// One elementary stream's endpoint plus its fixed capability descriptor.
pub struct Feeder {
    stream_type: StreamType,
    profile: Box<dyn StreamProfile>,
    endpoint: Arc<dyn Endpoint>,
    reporter: Arc<StatusReporter>,
    listener: Arc<FeederListener>,
    caps: OnceLock<Caps>,
    ended: AtomicBool,
}

impl Feeder {
    pub fn new(
        engine: &dyn Engine,
        profile: Box<dyn StreamProfile>,
        reporter: Arc<StatusReporter>,
    ) -> Result<Self> {
        let stream_type = profile.stream_type();
        let endpoint = engine
            .make_endpoint(&format!("{}-src", stream_type.as_str()))
            .with_context(|| format!("create {} endpoint", stream_type.as_str()))?;
        let listener = Arc::new(FeederListener {
            stream_type,
            reporter: reporter.clone(),
            detached: AtomicBool::new(false),
        });
        Ok(Self {
            stream_type,
            profile,
            endpoint,
            reporter,
            listener,
            caps: OnceLock::new(),
            ended: AtomicBool::new(false),
        })
    }

    /// Configure the endpoint and fix the capability descriptor. Only valid once.
    pub fn initialize(&self) -> Result<()> {
        if self.caps.get().is_some() {
            bail!("{} feeder already initialized", self.stream_type.as_str());
        }
        let (min_percent, max_bytes) = self.profile.queue_limits();
        self.endpoint
            .configure(EndpointSettings {
                time_format: true,
                seekable: true,
                min_percent,
                max_bytes,
            })
            .with_context(|| format!("configure {}", self.endpoint.name()))?;
        self.endpoint
            .set_listener(Some(self.listener.clone() as Arc<dyn EndpointListener>));
        let caps = self
            .profile
            .build_caps()
            .with_context(|| format!("build {} caps", self.stream_type.as_str()))?;
        tracing::info!(stream = self.stream_type.as_str(), caps = %caps, "stream caps");
        self.endpoint.set_caps(caps.clone())?;
        if self.caps.set(caps).is_err() {
            bail!("{} feeder initialized concurrently", self.stream_type.as_str());
        }
        Ok(())
    }

    /// Hand a buffer to the engine. Rejected buffers are dropped, which releases them.
    pub fn push(&self, buffer: Buffer) {
        if buffer.size() == 0 {
            return;
        }
        if self.ended.load(Ordering::Acquire) {
            tracing::debug!(stream = self.stream_type.as_str(), "sample after end of stream dropped");
            return;
        }
        let pts_ns = buffer.pts_ns();
        match self.endpoint.push_buffer(buffer) {
            FlowStatus::Ok => {}
            status => tracing::debug!(
                stream = self.stream_type.as_str(),
                pts_ns,
                status = ?status,
                "push rejected"
            ),
        }
    }

    /// Mark the stream finished. Later pushes are dropped until the next flushing seek.
    pub fn end_of_stream(&self) {
        if self.ended.swap(true, Ordering::AcqRel) {
            return;
        }
        let status = self.endpoint.end_of_stream();
        tracing::info!(stream = self.stream_type.as_str(), status = ?status, "end of stream");
    }

    /// Accept samples again. Called when a flushing seek clears the endpoint.
    pub fn reset_end_of_stream(&self) {
        if self.ended.swap(false, Ordering::AcqRel) {
            tracing::debug!(stream = self.stream_type.as_str(), "end of stream cleared by flush");
        }
    }

    pub fn endpoint(&self) -> &Arc<dyn Endpoint> {
        &self.endpoint
    }

    pub fn stream_type(&self) -> StreamType {
        self.stream_type
    }

    pub fn caps(&self) -> Option<&Caps> {
        self.caps.get()
    }

    pub fn is_ended(&self) -> bool {
        self.ended.load(Ordering::Acquire)
    }
}

impl Drop for Feeder {
    fn drop(&mut self) {
        let _ = self.endpoint.end_of_stream();
        self.reporter
            .report_decoder_state(self.stream_type, DecoderState::Destroyed);
        self.listener.detached.store(true, Ordering::Release);
        self.endpoint.set_listener(None);
        tracing::debug!(stream = self.stream_type.as_str(), "feeder destroyed");
    }
}
