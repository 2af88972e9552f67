//! Interface to the external multimedia pipeline engine.
//!
//! The player only talks to the engine through these traits: element creation, property
//! writes, state changes, seeks, bus messages and buffer injection. [`sim::SimEngine`] is an
//! in-process implementation used by tests and the CLI.

pub mod buffer;
pub mod caps;
pub mod sim;

use std::fmt;
use std::sync::Arc;

use anyhow::Result;
use crossbeam_channel::Receiver;

use crate::event_loop::ContextHandle;

pub use buffer::{Buffer, ReleaseGuard};
pub use caps::{Caps, CapsValue};

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum ElementState {
    #[default]
    Null,
    Ready,
    Paused,
    Playing,
}

impl ElementState {
    pub fn as_str(&self) -> &'static str {
        match self {
            ElementState::Null => "null",
            ElementState::Ready => "ready",
            ElementState::Paused => "paused",
            ElementState::Playing => "playing",
        }
    }
}

/// Result of injecting a buffer or an end-of-stream marker.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FlowStatus {
    Ok,
    Flushing,
    NotLinked,
    Eos,
    Error,
}

#[derive(Clone, Debug, PartialEq)]
pub enum PropertyValue {
    Bool(bool),
    Int(i64),
    UInt(u64),
    Float(f64),
    Str(String),
}

impl fmt::Display for PropertyValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PropertyValue::Bool(v) => write!(f, "{v}"),
            PropertyValue::Int(v) => write!(f, "{v}"),
            PropertyValue::UInt(v) => write!(f, "{v}"),
            PropertyValue::Float(v) => write!(f, "{v}"),
            PropertyValue::Str(v) => f.write_str(v),
        }
    }
}

/// Which object posted a bus message.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Origin {
    Pipeline,
    SourceBin,
    /// A child of the source bin, by endpoint name.
    Child(String),
    Element(String),
}

impl fmt::Display for Origin {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Origin::Pipeline => f.write_str("pipeline"),
            Origin::SourceBin => f.write_str("source"),
            Origin::Child(name) | Origin::Element(name) => f.write_str(name),
        }
    }
}

#[derive(Clone, Debug, PartialEq)]
pub enum BusMessage {
    AsyncDone {
        origin: Origin,
    },
    Error {
        origin: Origin,
        message: String,
        debug: Option<String>,
    },
    Warning {
        origin: Origin,
        message: String,
        debug: Option<String>,
    },
    Eos {
        origin: Origin,
    },
    StateChanged {
        origin: Origin,
        old: ElementState,
        new: ElementState,
        pending: Option<ElementState>,
    },
    /// The pipeline created its source element through the registered factory.
    SourceSetup,
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct SeekRequest {
    pub rate: f64,
    /// Drop queued data and re-preroll at `position`.
    pub flush: bool,
    /// New position in engine ticks; `None` keeps the current one.
    pub position: Option<i64>,
}

/// Queue and negotiation settings for an injectable endpoint.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct EndpointSettings {
    /// Timestamps are in engine time units.
    pub time_format: bool,
    /// The endpoint accepts repositioning through `seek_data`.
    pub seekable: bool,
    /// Refill threshold in percent of `max_bytes`.
    pub min_percent: u32,
    pub max_bytes: u64,
}

/// Backpressure hooks an endpoint calls from engine threads.
pub trait EndpointListener: Send + Sync {
    fn need_data(&self, length: u32);
    fn enough_data(&self);
    /// Return false to refuse the reposition.
    fn seek_data(&self, offset: u64) -> bool;
}

/// Generic engine element with named properties.
pub trait Element: Send + Sync {
    fn name(&self) -> &str;
    fn factory(&self) -> &str;
    fn set_property(&self, name: &str, value: PropertyValue) -> Result<()>;
    fn property(&self, name: &str) -> Option<PropertyValue>;
}

/// Injectable source endpoint. Pushing is safe from any thread.
pub trait Endpoint: Send + Sync {
    fn name(&self) -> &str;
    fn configure(&self, settings: EndpointSettings) -> Result<()>;
    fn set_listener(&self, listener: Option<Arc<dyn EndpointListener>>);
    fn set_caps(&self, caps: Caps) -> Result<()>;
    fn caps(&self) -> Option<Caps>;
    /// Takes ownership; a rejected buffer is dropped by the endpoint.
    fn push_buffer(&self, buffer: Buffer) -> FlowStatus;
    fn end_of_stream(&self) -> FlowStatus;
}

/// Top-level playback pipeline. Owned and driven by a single thread.
pub trait Pipeline: Send {
    fn set_uri(&self, uri: &str) -> Result<()>;
    fn set_flags(&self, flags: u32) -> Result<()>;
    fn set_video_sink(&self, sink: Arc<dyn Element>) -> Result<()>;
    fn set_audio_sink(&self, sink: Arc<dyn Element>) -> Result<()>;
    fn set_state(&self, state: ElementState) -> Result<()>;
    fn current_state(&self) -> ElementState;
    /// Current position in engine ticks, when known.
    fn query_position(&self) -> Option<i64>;
    fn seek(&self, request: SeekRequest) -> Result<()>;
    fn bus(&self) -> Receiver<BusMessage>;
    /// Human-readable dump of the graph for postmortem analysis.
    fn debug_snapshot(&self, label: &str) -> Option<String>;
}

/// Engine-side handle to the composite source element, given to a [`SourceFactory`].
pub trait SourceBin: Send + Sync {
    fn add_child(&self, endpoint: &Arc<dyn Endpoint>) -> Result<()>;
    /// Create an output port named `port` that proxies the child's output.
    fn add_proxy_port(&self, port: &str, endpoint: &Arc<dyn Endpoint>) -> Result<()>;
    fn sync_child_state(&self, endpoint: &Arc<dyn Endpoint>) -> Result<()>;
    fn no_more_ports(&self);
    fn remove_proxy_port(&self, port: &str) -> Result<()>;
    /// Stop the child and take it out of the bin.
    fn remove_child(&self, endpoint: &Arc<dyn Endpoint>) -> Result<()>;
    fn child_count(&self) -> usize;
    /// Push one end-of-stream downstream of the bin.
    fn send_eos(&self);
    /// Pass a child message on unchanged.
    fn forward(&self, message: BusMessage);
}

/// Custom source element logic. Receives every message posted by the bin's children.
pub trait SourceElement: Send + Sync {
    fn handle_message(&self, message: BusMessage);
}

/// Creates the source element when the pipeline resolves a URI with this scheme.
pub trait SourceFactory: Send + Sync {
    fn scheme(&self) -> &str;
    fn create(&self, bin: Arc<dyn SourceBin>) -> Arc<dyn SourceElement>;
}

pub struct PipelineSpec {
    pub source_factory: Arc<dyn SourceFactory>,
}

/// Entry point to an engine implementation.
pub trait Engine: Send + Sync {
    fn make_pipeline(&self, spec: PipelineSpec) -> Result<Box<dyn Pipeline>>;
    fn make_element(&self, factory: &str) -> Result<Arc<dyn Element>>;
    /// Create an endpoint; the engine makes `prefix` unique.
    fn make_endpoint(&self, prefix: &str) -> Result<Arc<dyn Endpoint>>;
    /// Numeric value of a pipeline flag nickname.
    fn flag_value(&self, nick: &str) -> Option<u32>;
    /// Offer a loop the engine may use for internal scheduling.
    fn attach_default_context(&self, _context: ContextHandle) {}
}
