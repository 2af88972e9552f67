//! In-process engine with a manual clock.
//!
//! Elements record property writes, endpoints queue buffers and raise backpressure, and the
//! pipeline posts state changes on its bus. Nothing moves until [`SimPipeline::advance`] is
//! called, which consumes queued buffers up to the new position and drives prerolling.

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};

use anyhow::{Result, anyhow, bail};
use crossbeam_channel::{Receiver, Sender};

use super::{
    Buffer, BusMessage, Caps, Element, ElementState, Endpoint, EndpointListener,
    EndpointSettings, Engine, FlowStatus, Origin, Pipeline, PipelineSpec, PropertyValue,
    SeekRequest, SourceBin, SourceElement, SourceFactory,
};
use crate::event_loop::ContextHandle;

const FLAGS: &[(&str, u32)] = &[
    ("video", 1 << 0),
    ("audio", 1 << 1),
    ("text", 1 << 2),
    ("vis", 1 << 3),
    ("soft-volume", 1 << 4),
    ("native-audio", 1 << 5),
    ("native-video", 1 << 6),
    ("download", 1 << 7),
    ("buffering", 1 << 8),
];

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(PoisonError::into_inner)
}

#[derive(Default)]
struct SimShared {
    context: Mutex<Option<ContextHandle>>,
    elements: Mutex<Vec<Arc<SimElement>>>,
    endpoints: Mutex<Vec<Arc<SimEndpoint>>>,
    pipelines: Mutex<Vec<SimPipeline>>,
    rejected_factories: Mutex<HashSet<String>>,
    flag_lookups: AtomicUsize,
    next_id: AtomicUsize,
}

impl SimShared {
    /// Run an engine callback on the default context when one is attached, inline otherwise.
    fn dispatch(&self, task: Box<dyn FnOnce() + Send>) {
        let context = lock(&self.context).clone();
        match context {
            Some(context) => {
                if !context.invoke(task) {
                    tracing::trace!(context = context.name(), "context stopped, callback dropped");
                }
            }
            None => task(),
        }
    }

    fn find_endpoint(&self, name: &str) -> Option<Arc<SimEndpoint>> {
        lock(&self.endpoints)
            .iter()
            .rev()
            .find(|e| e.name == name)
            .cloned()
    }

    fn next_id(&self) -> usize {
        self.next_id.fetch_add(1, Ordering::Relaxed)
    }
}

/// Simulated engine. Cheap to clone; clones share all state.
#[derive(Clone, Default)]
pub struct SimEngine {
    shared: Arc<SimShared>,
}

impl SimEngine {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make `make_element(factory)` fail from now on.
    pub fn reject_factory(&self, factory: &str) {
        lock(&self.shared.rejected_factories).insert(factory.to_string());
    }

    /// Most recently created pipeline.
    pub fn pipeline(&self) -> Option<SimPipeline> {
        lock(&self.shared.pipelines).last().cloned()
    }

    /// Most recently created element from `factory`.
    pub fn element(&self, factory: &str) -> Option<Arc<SimElement>> {
        lock(&self.shared.elements)
            .iter()
            .rev()
            .find(|e| e.factory == factory)
            .cloned()
    }

    pub fn endpoint(&self, name: &str) -> Option<Arc<SimEndpoint>> {
        self.shared.find_endpoint(name)
    }

    pub fn flag_lookups(&self) -> usize {
        self.shared.flag_lookups.load(Ordering::Relaxed)
    }

    pub fn has_default_context(&self) -> bool {
        lock(&self.shared.context).is_some()
    }
}

impl Engine for SimEngine {
    fn make_pipeline(&self, spec: PipelineSpec) -> Result<Box<dyn Pipeline>> {
        let (bus_tx, bus_rx) = crossbeam_channel::unbounded();
        let pipeline = SimPipeline {
            core: Arc::new(PipelineCore {
                name: format!("pipeline{}", self.shared.next_id()),
                shared: Arc::downgrade(&self.shared),
                factory: spec.source_factory,
                bus_tx,
                bus_rx,
                inner: Mutex::new(PipelineInner {
                    rate: 1.0,
                    ..PipelineInner::default()
                }),
            }),
        };
        lock(&self.shared.pipelines).push(pipeline.clone());
        Ok(Box::new(pipeline))
    }

    fn make_element(&self, factory: &str) -> Result<Arc<dyn Element>> {
        if lock(&self.shared.rejected_factories).contains(factory) {
            bail!("no element factory named {factory}");
        }
        let element = Arc::new(SimElement {
            name: format!("{factory}{}", self.shared.next_id()),
            factory: factory.to_string(),
            props: Mutex::new(ElementProps::default()),
        });
        lock(&self.shared.elements).push(element.clone());
        Ok(element)
    }

    fn make_endpoint(&self, prefix: &str) -> Result<Arc<dyn Endpoint>> {
        let endpoint = Arc::new(SimEndpoint {
            name: format!("{prefix}{}", self.shared.next_id()),
            shared: Arc::downgrade(&self.shared),
            inner: Mutex::new(EndpointInner::default()),
        });
        lock(&self.shared.endpoints).push(endpoint.clone());
        Ok(endpoint)
    }

    fn flag_value(&self, nick: &str) -> Option<u32> {
        self.shared.flag_lookups.fetch_add(1, Ordering::Relaxed);
        FLAGS.iter().find(|(n, _)| *n == nick).map(|(_, v)| *v)
    }

    fn attach_default_context(&self, context: ContextHandle) {
        *lock(&self.shared.context) = Some(context);
    }
}

#[derive(Default)]
struct ElementProps {
    values: HashMap<String, PropertyValue>,
    writes: HashMap<String, usize>,
}

/// Element that remembers every property write.
pub struct SimElement {
    name: String,
    factory: String,
    props: Mutex<ElementProps>,
}

impl SimElement {
    /// Number of writes to `property` so far.
    pub fn write_count(&self, property: &str) -> usize {
        lock(&self.props).writes.get(property).copied().unwrap_or(0)
    }
}

impl Element for SimElement {
    fn name(&self) -> &str {
        &self.name
    }

    fn factory(&self) -> &str {
        &self.factory
    }

    fn set_property(&self, name: &str, value: PropertyValue) -> Result<()> {
        let mut props = lock(&self.props);
        *props.writes.entry(name.to_string()).or_default() += 1;
        props.values.insert(name.to_string(), value);
        Ok(())
    }

    fn property(&self, name: &str) -> Option<PropertyValue> {
        lock(&self.props).values.get(name).cloned()
    }
}

#[derive(Default)]
struct EndpointInner {
    settings: Option<EndpointSettings>,
    caps: Option<Caps>,
    listener: Option<Arc<dyn EndpointListener>>,
    queue: VecDeque<Buffer>,
    queued_bytes: u64,
    active: bool,
    eos: bool,
    eos_delivered: bool,
    enough_signalled: bool,
    accepted: u64,
    consumed: u64,
}

impl EndpointInner {
    fn starving(&self) -> bool {
        if !self.active || self.eos {
            return false;
        }
        match self.settings {
            Some(s) if s.max_bytes > 0 => {
                self.queued_bytes < s.max_bytes * u64::from(s.min_percent) / 100
                    || self.queue.is_empty()
            }
            _ => self.queue.is_empty(),
        }
    }

    fn drain(&mut self) -> Vec<Buffer> {
        self.queued_bytes = 0;
        self.enough_signalled = false;
        self.queue.drain(..).collect()
    }
}

struct Pulled {
    released: Vec<Buffer>,
    eos_now: bool,
    starving: bool,
}

/// Queueing endpoint. Accepts buffers once its bin has started it.
pub struct SimEndpoint {
    name: String,
    shared: Weak<SimShared>,
    inner: Mutex<EndpointInner>,
}

impl SimEndpoint {
    fn notify<F>(&self, f: F)
    where
        F: FnOnce(&dyn EndpointListener) + Send + 'static,
    {
        let Some(listener) = lock(&self.inner).listener.clone() else {
            return;
        };
        let task = move || f(listener.as_ref());
        match self.shared.upgrade() {
            Some(shared) => shared.dispatch(Box::new(task)),
            None => task(),
        }
    }

    fn activate(&self) -> bool {
        let mut inner = lock(&self.inner);
        inner.active = true;
        inner.starving()
    }

    fn deactivate(&self) -> Vec<Buffer> {
        let mut inner = lock(&self.inner);
        inner.active = false;
        inner.drain()
    }

    fn flush(&self) -> Vec<Buffer> {
        let mut inner = lock(&self.inner);
        inner.eos = false;
        inner.eos_delivered = false;
        inner.drain()
    }

    fn prerolled(&self) -> bool {
        let inner = lock(&self.inner);
        !inner.queue.is_empty() || inner.eos
    }

    /// Consume buffers due at `position` (none when paused) and report what changed.
    fn pull(&self, position: Option<i64>) -> Pulled {
        let mut inner = lock(&self.inner);
        let mut released = Vec::new();
        if let Some(position) = position {
            while inner.queue.front().is_some_and(|b| b.pts_ns() <= position) {
                if let Some(buffer) = inner.queue.pop_front() {
                    inner.queued_bytes -= buffer.size() as u64;
                    inner.consumed += 1;
                    released.push(buffer);
                }
            }
            let limit = inner.settings.map(|s| s.max_bytes).unwrap_or(0);
            if inner.queued_bytes < limit {
                inner.enough_signalled = false;
            }
        }
        let eos_now = inner.active && inner.eos && inner.queue.is_empty() && !inner.eos_delivered;
        if eos_now {
            inner.eos_delivered = true;
        }
        Pulled {
            released,
            eos_now,
            starving: inner.starving(),
        }
    }

    pub fn queued_buffers(&self) -> usize {
        lock(&self.inner).queue.len()
    }

    pub fn queued_bytes(&self) -> u64 {
        lock(&self.inner).queued_bytes
    }

    /// Buffers accepted since creation.
    pub fn accepted(&self) -> u64 {
        lock(&self.inner).accepted
    }

    /// Buffers consumed by the clock since creation.
    pub fn consumed(&self) -> u64 {
        lock(&self.inner).consumed
    }

    pub fn is_active(&self) -> bool {
        lock(&self.inner).active
    }

    pub fn is_eos(&self) -> bool {
        lock(&self.inner).eos
    }

    pub fn settings(&self) -> Option<EndpointSettings> {
        lock(&self.inner).settings
    }

    pub fn has_listener(&self) -> bool {
        lock(&self.inner).listener.is_some()
    }

    /// Timestamps of the queued buffers, oldest first.
    pub fn queued_pts(&self) -> Vec<i64> {
        lock(&self.inner).queue.iter().map(Buffer::pts_ns).collect()
    }
}

impl Endpoint for SimEndpoint {
    fn name(&self) -> &str {
        &self.name
    }

    fn configure(&self, settings: EndpointSettings) -> Result<()> {
        if settings.min_percent > 100 {
            bail!("min-percent {} out of range", settings.min_percent);
        }
        lock(&self.inner).settings = Some(settings);
        Ok(())
    }

    fn set_listener(&self, listener: Option<Arc<dyn EndpointListener>>) {
        lock(&self.inner).listener = listener;
    }

    fn set_caps(&self, caps: Caps) -> Result<()> {
        lock(&self.inner).caps = Some(caps);
        Ok(())
    }

    fn caps(&self) -> Option<Caps> {
        lock(&self.inner).caps.clone()
    }

    fn push_buffer(&self, buffer: Buffer) -> FlowStatus {
        let size = buffer.size() as u64;
        let (status, enough, rejected) = {
            let mut inner = lock(&self.inner);
            if !inner.active {
                (FlowStatus::Flushing, false, Some(buffer))
            } else if inner.eos {
                (FlowStatus::Eos, false, Some(buffer))
            } else {
                inner.queue.push_back(buffer);
                inner.queued_bytes += size;
                inner.accepted += 1;
                let limit = inner.settings.map(|s| s.max_bytes).unwrap_or(0);
                let enough = limit > 0 && inner.queued_bytes >= limit && !inner.enough_signalled;
                if enough {
                    inner.enough_signalled = true;
                }
                (FlowStatus::Ok, enough, None)
            }
        };
        drop(rejected);
        if enough {
            self.notify(|listener| listener.enough_data());
        }
        status
    }

    fn end_of_stream(&self) -> FlowStatus {
        let mut inner = lock(&self.inner);
        if !inner.active {
            return FlowStatus::Flushing;
        }
        if inner.eos {
            return FlowStatus::Eos;
        }
        inner.eos = true;
        FlowStatus::Ok
    }
}

#[derive(Default)]
struct BinInner {
    children: Vec<Arc<SimEndpoint>>,
    ports: Vec<(String, String)>,
    no_more_ports: bool,
}

struct SimBin {
    shared: Weak<SimShared>,
    bus: Sender<BusMessage>,
    inner: Mutex<BinInner>,
}

impl SimBin {
    fn children(&self) -> Vec<Arc<SimEndpoint>> {
        lock(&self.inner).children.clone()
    }

    fn ready_to_preroll(&self) -> bool {
        let inner = lock(&self.inner);
        inner.no_more_ports
            && !inner.children.is_empty()
            && inner.children.iter().all(|c| c.prerolled())
    }

    fn describe(&self) -> String {
        let inner = lock(&self.inner);
        let mut out = String::new();
        for (port, child) in &inner.ports {
            out.push_str(&format!("  port {port} -> {child}\n"));
        }
        for child in &inner.children {
            let c = lock(&child.inner);
            out.push_str(&format!(
                "  child {}: active={} queued={} bytes={} eos={} caps={}\n",
                child.name,
                c.active,
                c.queue.len(),
                c.queued_bytes,
                c.eos,
                c.caps.as_ref().map(|c| c.to_string()).unwrap_or_default()
            ));
        }
        out
    }

    fn lookup(&self, endpoint: &Arc<dyn Endpoint>) -> Result<Arc<SimEndpoint>> {
        let shared = self
            .shared
            .upgrade()
            .ok_or_else(|| anyhow!("engine dropped"))?;
        shared
            .find_endpoint(endpoint.name())
            .ok_or_else(|| anyhow!("endpoint {} was not made by this engine", endpoint.name()))
    }
}

impl SourceBin for SimBin {
    fn add_child(&self, endpoint: &Arc<dyn Endpoint>) -> Result<()> {
        let sim = self.lookup(endpoint)?;
        let mut inner = lock(&self.inner);
        if inner.children.iter().any(|c| c.name == sim.name) {
            bail!("{} is already a child", sim.name);
        }
        inner.children.push(sim);
        Ok(())
    }

    fn add_proxy_port(&self, port: &str, endpoint: &Arc<dyn Endpoint>) -> Result<()> {
        let mut inner = lock(&self.inner);
        if !inner.children.iter().any(|c| c.name == endpoint.name()) {
            bail!("{} is not a child", endpoint.name());
        }
        if inner.ports.iter().any(|(p, _)| p == port) {
            bail!("port {port} already exists");
        }
        inner
            .ports
            .push((port.to_string(), endpoint.name().to_string()));
        Ok(())
    }

    fn sync_child_state(&self, endpoint: &Arc<dyn Endpoint>) -> Result<()> {
        let child = lock(&self.inner)
            .children
            .iter()
            .find(|c| c.name == endpoint.name())
            .cloned()
            .ok_or_else(|| anyhow!("{} is not a child", endpoint.name()))?;
        if child.activate() {
            child.notify(|listener| listener.need_data(0));
        }
        Ok(())
    }

    fn no_more_ports(&self) {
        lock(&self.inner).no_more_ports = true;
    }

    fn remove_proxy_port(&self, port: &str) -> Result<()> {
        let mut inner = lock(&self.inner);
        let before = inner.ports.len();
        inner.ports.retain(|(p, _)| p != port);
        if inner.ports.len() == before {
            bail!("no port named {port}");
        }
        Ok(())
    }

    fn remove_child(&self, endpoint: &Arc<dyn Endpoint>) -> Result<()> {
        let child = {
            let mut inner = lock(&self.inner);
            let idx = inner
                .children
                .iter()
                .position(|c| c.name == endpoint.name())
                .ok_or_else(|| anyhow!("{} is not a child", endpoint.name()))?;
            let child = inner.children.remove(idx);
            if inner.children.is_empty() {
                inner.no_more_ports = false;
            }
            child
        };
        drop(child.deactivate());
        Ok(())
    }

    fn child_count(&self) -> usize {
        lock(&self.inner).children.len()
    }

    fn send_eos(&self) {
        let _ = self.bus.send(BusMessage::Eos {
            origin: Origin::Pipeline,
        });
    }

    fn forward(&self, message: BusMessage) {
        let _ = self.bus.send(message);
    }
}

#[derive(Default)]
struct PipelineInner {
    uri: Option<String>,
    flags: u32,
    video_sink: Option<Arc<dyn Element>>,
    audio_sink: Option<Arc<dyn Element>>,
    current: ElementState,
    target: ElementState,
    prerolled: bool,
    position: i64,
    rate: f64,
    source: Option<Arc<dyn SourceElement>>,
    bin: Option<Arc<SimBin>>,
    seeks: Vec<SeekRequest>,
    query_fails: bool,
}

struct PipelineCore {
    name: String,
    shared: Weak<SimShared>,
    factory: Arc<dyn SourceFactory>,
    bus_tx: Sender<BusMessage>,
    bus_rx: Receiver<BusMessage>,
    inner: Mutex<PipelineInner>,
}

enum Deferred {
    NeedData(Arc<SimEndpoint>),
    SeekData(Arc<SimEndpoint>, u64),
    ChildEos(Arc<dyn SourceElement>, String),
    Release(Vec<Buffer>),
}

fn run_deferred(actions: Vec<Deferred>) {
    for action in actions {
        match action {
            Deferred::NeedData(child) => child.notify(|listener| listener.need_data(0)),
            Deferred::SeekData(child, offset) => child.notify(move |listener| {
                if !listener.seek_data(offset) {
                    tracing::debug!(offset, "listener refused seek");
                }
            }),
            Deferred::ChildEos(source, name) => source.handle_message(BusMessage::Eos {
                origin: Origin::Child(name),
            }),
            Deferred::Release(buffers) => drop(buffers),
        }
    }
}

/// Handle to a simulated pipeline. Clones share state.
#[derive(Clone)]
pub struct SimPipeline {
    core: Arc<PipelineCore>,
}

impl SimPipeline {
    fn post(&self, message: BusMessage) {
        let _ = self.core.bus_tx.send(message);
    }

    fn state_changed(&self, old: ElementState, new: ElementState, pending: Option<ElementState>) {
        self.post(BusMessage::StateChanged {
            origin: Origin::Pipeline,
            old,
            new,
            pending,
        });
    }

    /// Move the clock forward by `ns` engine ticks and let the pipeline make progress.
    pub fn advance(&self, ns: i64) {
        let mut actions = Vec::new();
        {
            let mut inner = lock(&self.core.inner);
            let playing = inner.current == ElementState::Playing && inner.prerolled;
            if playing {
                inner.position = inner
                    .position
                    .saturating_add((ns as f64 * inner.rate) as i64);
            }
            if let Some(bin) = inner.bin.clone() {
                let position = playing.then_some(inner.position);
                for child in bin.children() {
                    let pulled = child.pull(position);
                    actions.push(Deferred::Release(pulled.released));
                    if pulled.eos_now {
                        if let Some(source) = inner.source.clone() {
                            actions.push(Deferred::ChildEos(source, child.name.clone()));
                        }
                    }
                    if pulled.starving {
                        actions.push(Deferred::NeedData(child));
                    }
                }
            }
        }
        run_deferred(actions);
        self.step();
    }

    /// Apply pending asynchronous state transitions.
    fn step(&self) {
        let mut inner = lock(&self.core.inner);
        let Some(bin) = inner.bin.clone() else {
            return;
        };
        let ready = bin.ready_to_preroll();
        if inner.current == ElementState::Ready && inner.target >= ElementState::Paused && ready {
            inner.current = ElementState::Paused;
            inner.prerolled = true;
            let pending = (inner.target == ElementState::Playing).then_some(ElementState::Playing);
            self.state_changed(ElementState::Ready, ElementState::Paused, pending);
            self.post(BusMessage::AsyncDone {
                origin: Origin::Pipeline,
            });
        } else if inner.current == ElementState::Paused && !inner.prerolled && ready {
            inner.prerolled = true;
            self.post(BusMessage::AsyncDone {
                origin: Origin::Pipeline,
            });
        }
        if inner.current == ElementState::Paused
            && inner.prerolled
            && inner.target == ElementState::Playing
        {
            inner.current = ElementState::Playing;
            self.state_changed(ElementState::Paused, ElementState::Playing, None);
        }
    }

    pub fn state(&self) -> ElementState {
        lock(&self.core.inner).current
    }

    pub fn target_state(&self) -> ElementState {
        lock(&self.core.inner).target
    }

    pub fn position(&self) -> i64 {
        lock(&self.core.inner).position
    }

    pub fn rate(&self) -> f64 {
        lock(&self.core.inner).rate
    }

    pub fn flags(&self) -> u32 {
        lock(&self.core.inner).flags
    }

    pub fn uri(&self) -> Option<String> {
        lock(&self.core.inner).uri.clone()
    }

    /// Every seek the pipeline accepted, oldest first.
    pub fn seeks(&self) -> Vec<SeekRequest> {
        lock(&self.core.inner).seeks.clone()
    }

    pub fn video_sink(&self) -> Option<Arc<dyn Element>> {
        lock(&self.core.inner).video_sink.clone()
    }

    pub fn audio_sink(&self) -> Option<Arc<dyn Element>> {
        lock(&self.core.inner).audio_sink.clone()
    }

    /// Number of children in the source bin.
    pub fn source_children(&self) -> usize {
        lock(&self.core.inner)
            .bin
            .as_ref()
            .map(|b| b.child_count())
            .unwrap_or(0)
    }

    /// Make position queries fail, as engines do while the clock is not running.
    pub fn set_query_fails(&self, fails: bool) {
        lock(&self.core.inner).query_fails = fails;
    }

    pub fn post_error(&self, message: &str) {
        self.post(BusMessage::Error {
            origin: Origin::Element("decoder0".to_string()),
            message: message.to_string(),
            debug: Some("simulated failure".to_string()),
        });
    }

    pub fn post_warning(&self, message: &str) {
        self.post(BusMessage::Warning {
            origin: Origin::Element("decoder0".to_string()),
            message: message.to_string(),
            debug: None,
        });
    }
}

impl Pipeline for SimPipeline {
    fn set_uri(&self, uri: &str) -> Result<()> {
        lock(&self.core.inner).uri = Some(uri.to_string());
        Ok(())
    }

    fn set_flags(&self, flags: u32) -> Result<()> {
        lock(&self.core.inner).flags = flags;
        Ok(())
    }

    fn set_video_sink(&self, sink: Arc<dyn Element>) -> Result<()> {
        lock(&self.core.inner).video_sink = Some(sink);
        Ok(())
    }

    fn set_audio_sink(&self, sink: Arc<dyn Element>) -> Result<()> {
        lock(&self.core.inner).audio_sink = Some(sink);
        Ok(())
    }

    fn set_state(&self, target: ElementState) -> Result<()> {
        let mut new_bin = None;
        let mut released = Vec::new();
        {
            let mut inner = lock(&self.core.inner);
            if target == ElementState::Null {
                let old = inner.current;
                inner.current = ElementState::Null;
                inner.target = ElementState::Null;
                inner.prerolled = false;
                if let Some(bin) = inner.bin.as_ref() {
                    for child in bin.children() {
                        released.extend(child.deactivate());
                    }
                }
                if old != ElementState::Null {
                    self.state_changed(old, ElementState::Null, None);
                }
            } else {
                if inner.current == ElementState::Null && inner.bin.is_none() {
                    let uri = inner
                        .uri
                        .clone()
                        .ok_or_else(|| anyhow!("{} has no uri", self.core.name))?;
                    let scheme = uri.split("://").next().unwrap_or_default();
                    if scheme != self.core.factory.scheme() {
                        self.post(BusMessage::Error {
                            origin: Origin::Pipeline,
                            message: format!("no source handles {uri}"),
                            debug: None,
                        });
                        bail!("no source handles {uri}");
                    }
                    let bin = Arc::new(SimBin {
                        shared: self.core.shared.clone(),
                        bus: self.core.bus_tx.clone(),
                        inner: Mutex::new(BinInner::default()),
                    });
                    inner.bin = Some(bin.clone());
                    new_bin = Some(bin);
                }
                if inner.current == ElementState::Null {
                    inner.current = ElementState::Ready;
                    self.state_changed(ElementState::Null, ElementState::Ready, Some(target));
                    if let Some(bin) = inner.bin.as_ref() {
                        for child in bin.children() {
                            child.activate();
                        }
                    }
                }
                if inner.current == ElementState::Playing && target < ElementState::Playing {
                    inner.current = ElementState::Paused;
                    self.state_changed(ElementState::Playing, ElementState::Paused, None);
                }
                inner.target = target;
            }
        }
        drop(released);
        if let Some(bin) = new_bin {
            let source = self.core.factory.create(bin);
            lock(&self.core.inner).source = Some(source);
            self.post(BusMessage::SourceSetup);
            self.post(BusMessage::StateChanged {
                origin: Origin::SourceBin,
                old: ElementState::Null,
                new: ElementState::Ready,
                pending: None,
            });
        }
        Ok(())
    }

    fn current_state(&self) -> ElementState {
        self.state()
    }

    fn query_position(&self) -> Option<i64> {
        let inner = lock(&self.core.inner);
        if inner.query_fails || inner.current < ElementState::Paused {
            return None;
        }
        Some(inner.position)
    }

    fn seek(&self, request: SeekRequest) -> Result<()> {
        if request.rate.is_nan() || request.rate <= 0.0 {
            bail!("unsupported seek rate {}", request.rate);
        }
        let mut actions = Vec::new();
        {
            let mut inner = lock(&self.core.inner);
            if inner.current < ElementState::Paused {
                bail!("{} cannot seek in state {}", self.core.name, inner.current.as_str());
            }
            inner.seeks.push(request);
            inner.rate = request.rate;
            if request.flush {
                if let Some(position) = request.position {
                    inner.position = position;
                }
                inner.prerolled = false;
                if inner.current == ElementState::Playing {
                    inner.current = ElementState::Paused;
                    self.state_changed(
                        ElementState::Playing,
                        ElementState::Paused,
                        Some(ElementState::Playing),
                    );
                }
                let offset = u64::try_from(inner.position).unwrap_or(0);
                if let Some(bin) = inner.bin.as_ref() {
                    for child in bin.children() {
                        actions.push(Deferred::Release(child.flush()));
                        if child.is_active() {
                            actions.push(Deferred::SeekData(child.clone(), offset));
                            actions.push(Deferred::NeedData(child));
                        }
                    }
                }
            }
        }
        run_deferred(actions);
        Ok(())
    }

    fn bus(&self) -> Receiver<BusMessage> {
        self.core.bus_rx.clone()
    }

    fn debug_snapshot(&self, label: &str) -> Option<String> {
        let inner = lock(&self.core.inner);
        let mut out = format!(
            "[{label}] {} state={} target={} position={} rate={} flags={:#x} uri={}\n",
            self.core.name,
            inner.current.as_str(),
            inner.target.as_str(),
            inner.position,
            inner.rate,
            inner.flags,
            inner.uri.as_deref().unwrap_or("-"),
        );
        for (role, sink) in [("video", &inner.video_sink), ("audio", &inner.audio_sink)] {
            if let Some(sink) = sink {
                out.push_str(&format!("  {role}-sink {}\n", sink.name()));
            }
        }
        if let Some(bin) = inner.bin.as_ref() {
            out.push_str(&bin.describe());
        }
        Some(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;
    use std::sync::atomic::AtomicUsize;

    struct NullSource;

    impl SourceElement for NullSource {
        fn handle_message(&self, _message: BusMessage) {}
    }

    struct NullFactory;

    impl SourceFactory for NullFactory {
        fn scheme(&self) -> &str {
            "punchout"
        }

        fn create(&self, _bin: Arc<dyn SourceBin>) -> Arc<dyn SourceElement> {
            Arc::new(NullSource)
        }
    }

    #[derive(Default)]
    struct Counting {
        need: AtomicUsize,
        enough: AtomicUsize,
    }

    impl EndpointListener for Counting {
        fn need_data(&self, _length: u32) {
            self.need.fetch_add(1, Ordering::SeqCst);
        }

        fn enough_data(&self) {
            self.enough.fetch_add(1, Ordering::SeqCst);
        }

        fn seek_data(&self, _offset: u64) -> bool {
            true
        }
    }

    fn settings(max_bytes: u64) -> EndpointSettings {
        EndpointSettings {
            time_format: true,
            seekable: true,
            min_percent: 60,
            max_bytes,
        }
    }

    #[test]
    fn endpoint_rejects_until_started() {
        let engine = SimEngine::new();
        let endpoint = engine.make_endpoint("src").unwrap();
        let status = endpoint.push_buffer(Buffer::new(Bytes::from_static(b"x"), 0));
        assert_eq!(status, FlowStatus::Flushing);
        let sim = engine.endpoint(endpoint.name()).unwrap();
        assert_eq!(sim.accepted(), 0);
    }

    #[test]
    fn enough_data_fires_once_per_fill() {
        let engine = SimEngine::new();
        let endpoint = engine.make_endpoint("src").unwrap();
        endpoint.configure(settings(4)).unwrap();
        let listener = Arc::new(Counting::default());
        endpoint.set_listener(Some(listener.clone() as Arc<dyn EndpointListener>));
        let sim = engine.endpoint(endpoint.name()).unwrap();
        sim.activate();
        for pts in 0..3 {
            assert_eq!(
                endpoint.push_buffer(Buffer::new(Bytes::from_static(b"abcd"), pts)),
                FlowStatus::Ok
            );
        }
        assert_eq!(listener.enough.load(Ordering::SeqCst), 1);
        assert_eq!(sim.queued_bytes(), 12);
    }

    #[test]
    fn pipeline_creates_source_on_first_state_change() {
        let engine = SimEngine::new();
        let pipeline = engine
            .make_pipeline(PipelineSpec {
                source_factory: Arc::new(NullFactory),
            })
            .unwrap();
        pipeline.set_uri("punchout://").unwrap();
        pipeline.set_state(ElementState::Paused).unwrap();
        let bus = pipeline.bus();
        let messages: Vec<_> = bus.try_iter().collect();
        assert!(matches!(
            messages[0],
            BusMessage::StateChanged {
                origin: Origin::Pipeline,
                new: ElementState::Ready,
                ..
            }
        ));
        assert_eq!(messages[1], BusMessage::SourceSetup);
        assert!(matches!(
            messages[2],
            BusMessage::StateChanged {
                origin: Origin::SourceBin,
                new: ElementState::Ready,
                ..
            }
        ));
        assert_eq!(pipeline.current_state(), ElementState::Ready);
        assert_eq!(pipeline.query_position(), None);
    }

    #[test]
    fn unknown_scheme_is_an_error() {
        let engine = SimEngine::new();
        let pipeline = engine
            .make_pipeline(PipelineSpec {
                source_factory: Arc::new(NullFactory),
            })
            .unwrap();
        pipeline.set_uri("file:///tmp/a.mp4").unwrap();
        assert!(pipeline.set_state(ElementState::Paused).is_err());
        assert!(matches!(
            pipeline.bus().try_recv(),
            Ok(BusMessage::Error { .. })
        ));
    }

    #[test]
    fn rejected_factory_fails_element_creation() {
        let engine = SimEngine::new();
        engine.reject_factory("westerossink");
        assert!(engine.make_element("westerossink").is_err());
        let sink = engine.make_element("omxhdmiaudiosink").unwrap();
        sink.set_property("async", PropertyValue::Bool(true)).unwrap();
        sink.set_property("async", PropertyValue::Bool(true)).unwrap();
        let sim = engine.element("omxhdmiaudiosink").unwrap();
        assert_eq!(sim.write_count("async"), 2);
        assert_eq!(sink.property("async"), Some(PropertyValue::Bool(true)));
    }
}
