//! Audio-graph host interface.
//!
//! The scheduler talks to an audio host through [`AudioGraph`]: it creates
//! play-once nodes, wires them together and queues start/stop/automation
//! commands against the host's own clock. Hosts turn every call into a
//! [`GraphCommand`] after validating it with a [`NodeRegistry`], so the
//! offline renderer and the real-time engine share one set of rules.

use std::collections::HashMap;

use crate::AudioArc;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeId(pub u64);

impl NodeId {
    /// The host's output; always present, accepts inputs, never retired.
    pub const DESTINATION: NodeId = NodeId(0);
}

impl std::fmt::Display for NodeId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "node#{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Waveform {
    #[default]
    Sine,
    Triangle,
    Sawtooth,
    Square,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FilterKind {
    #[default]
    Lowpass,
    Highpass,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SourceOptions {
    pub playback_rate: f64,
    /// Keep the original pitch when `playback_rate != 1.0`.
    pub preserve_pitch: bool,
}

impl Default for SourceOptions {
    fn default() -> Self {
        Self {
            playback_rate: 1.0,
            preserve_pitch: false,
        }
    }
}

/// Node description. `B` is how buffer data travels to the host.
#[derive(Debug, Clone)]
pub enum NodeKind<B = AudioArc> {
    Gain {
        gain: f32,
    },
    Oscillator {
        waveform: Waveform,
        frequency: f32,
    },
    Filter {
        kind: FilterKind,
        frequency: f32,
        q: f32,
    },
    BufferSource {
        buffer: B,
        options: SourceOptions,
    },
}

impl<B> NodeKind<B> {
    pub fn class(&self) -> NodeClass {
        match self {
            NodeKind::Gain { .. } => NodeClass::Gain,
            NodeKind::Oscillator { .. } => NodeClass::Oscillator,
            NodeKind::Filter { .. } => NodeClass::Filter,
            NodeKind::BufferSource { .. } => NodeClass::BufferSource,
        }
    }

    pub fn map_buffer<C>(self, f: impl FnOnce(B) -> C) -> NodeKind<C> {
        match self {
            NodeKind::Gain { gain } => NodeKind::Gain { gain },
            NodeKind::Oscillator {
                waveform,
                frequency,
            } => NodeKind::Oscillator {
                waveform,
                frequency,
            },
            NodeKind::Filter { kind, frequency, q } => NodeKind::Filter { kind, frequency, q },
            NodeKind::BufferSource { buffer, options } => NodeKind::BufferSource {
                buffer: f(buffer),
                options,
            },
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeClass {
    Destination,
    Gain,
    Oscillator,
    Filter,
    BufferSource,
}

impl NodeClass {
    pub fn is_source(&self) -> bool {
        matches!(self, NodeClass::Oscillator | NodeClass::BufferSource)
    }

    pub fn accepts_input(&self) -> bool {
        matches!(
            self,
            NodeClass::Destination | NodeClass::Gain | NodeClass::Filter
        )
    }
}

/// A scheduled change to a gain parameter, in host clock seconds.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ParamEvent {
    SetValue { value: f32, at: f64 },
    LinearRamp { value: f32, end: f64 },
    ExponentialRamp { value: f32, end: f64 },
}

impl ParamEvent {
    pub fn time(&self) -> f64 {
        match *self {
            ParamEvent::SetValue { at, .. } => at,
            ParamEvent::LinearRamp { end, .. } | ParamEvent::ExponentialRamp { end, .. } => end,
        }
    }

    pub fn value(&self) -> f32 {
        match *self {
            ParamEvent::SetValue { value, .. }
            | ParamEvent::LinearRamp { value, .. }
            | ParamEvent::ExponentialRamp { value, .. } => value,
        }
    }
}

/// Automation lane of one parameter.
///
/// Ramps run from the previous event (time and value) to their end point;
/// the value holds after the last event. An exponential ramp between values
/// of different sign, or touching zero, holds the previous value until its
/// end and then jumps.
#[derive(Debug, Clone, PartialEq)]
pub struct ParamTimeline {
    initial: f32,
    events: Vec<ParamEvent>,
}

impl ParamTimeline {
    pub fn new(initial: f32) -> Self {
        Self {
            initial,
            events: Vec::new(),
        }
    }

    /// Insert keeping time order; equal times keep insertion order.
    pub fn push(&mut self, event: ParamEvent) {
        let at = event.time();
        let index = self.events.partition_point(|e| e.time() <= at);
        self.events.insert(index, event);
    }

    pub fn events(&self) -> &[ParamEvent] {
        &self.events
    }

    pub fn value_at(&self, time: f64) -> f32 {
        let mut value = self.initial;
        let mut from_time = f64::NEG_INFINITY;

        for event in &self.events {
            match *event {
                ParamEvent::SetValue { value: target, at } => {
                    if at > time {
                        break;
                    }
                    value = target;
                    from_time = at;
                }
                ParamEvent::LinearRamp { value: target, end } => {
                    if end <= time {
                        value = target;
                        from_time = end;
                        continue;
                    }
                    if from_time.is_finite() && end > from_time && time >= from_time {
                        let progress = ((time - from_time) / (end - from_time)) as f32;
                        value += (target - value) * progress;
                    }
                    break;
                }
                ParamEvent::ExponentialRamp { value: target, end } => {
                    if end <= time {
                        value = target;
                        from_time = end;
                        continue;
                    }
                    let same_sign = value * target > 0.0;
                    if same_sign && from_time.is_finite() && end > from_time && time >= from_time {
                        let progress = (time - from_time) / (end - from_time);
                        value *= (target / value).powf(progress as f32);
                    }
                    break;
                }
            }
        }

        value
    }
}

/// Validated, host-independent graph operation.
#[derive(Debug, Clone)]
pub enum GraphCommand<B = AudioArc> {
    Create { id: NodeId, kind: NodeKind<B> },
    Connect { from: NodeId, to: NodeId },
    Start { id: NodeId, at: f64 },
    Stop { id: NodeId, at: f64 },
    Automate { id: NodeId, event: ParamEvent },
}

impl<B> GraphCommand<B> {
    pub fn map_buffer<C>(self, f: impl FnOnce(B) -> C) -> GraphCommand<C> {
        match self {
            GraphCommand::Create { id, kind } => GraphCommand::Create {
                id,
                kind: kind.map_buffer(f),
            },
            GraphCommand::Connect { from, to } => GraphCommand::Connect { from, to },
            GraphCommand::Start { id, at } => GraphCommand::Start { id, at },
            GraphCommand::Stop { id, at } => GraphCommand::Stop { id, at },
            GraphCommand::Automate { id, event } => GraphCommand::Automate { id, event },
        }
    }
}

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum GraphError {
    #[error("unknown audio node {0}")]
    UnknownNode(NodeId),

    #[error("{0} is not a source node and cannot be started or stopped")]
    NotASource(NodeId),

    #[error("{0} has no gain parameter")]
    NotAGain(NodeId),

    #[error("{0} does not accept inputs")]
    NotAnInput(NodeId),

    #[error("{0} was already started")]
    AlreadyStarted(NodeId),

    #[error("invalid node parameter: {0}")]
    InvalidParameter(String),

    #[error("audio host command queue is full")]
    QueueFull,

    #[error("audio host error: {0}")]
    Host(String),
}

#[derive(Debug, Clone, Copy)]
struct NodeEntry {
    class: NodeClass,
    started: bool,
}

/// Allocates node ids and checks commands before they reach a host.
#[derive(Debug)]
pub struct NodeRegistry {
    next_id: u64,
    nodes: HashMap<NodeId, NodeEntry>,
}

impl NodeRegistry {
    pub fn new() -> Self {
        let mut nodes = HashMap::new();
        nodes.insert(
            NodeId::DESTINATION,
            NodeEntry {
                class: NodeClass::Destination,
                started: false,
            },
        );
        Self { next_id: 1, nodes }
    }

    /// Live nodes, the destination included.
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn class_of(&self, id: NodeId) -> Result<NodeClass, GraphError> {
        self.nodes
            .get(&id)
            .map(|entry| entry.class)
            .ok_or(GraphError::UnknownNode(id))
    }

    pub fn create<B>(&mut self, kind: NodeKind<B>) -> Result<(NodeId, GraphCommand<B>), GraphError> {
        validate_kind(&kind)?;
        let id = NodeId(self.next_id);
        self.next_id += 1;
        self.nodes.insert(
            id,
            NodeEntry {
                class: kind.class(),
                started: false,
            },
        );
        Ok((id, GraphCommand::Create { id, kind }))
    }

    pub fn connect<B>(&self, from: NodeId, to: NodeId) -> Result<GraphCommand<B>, GraphError> {
        let from_class = self.class_of(from)?;
        if from_class == NodeClass::Destination {
            return Err(GraphError::NotASource(from));
        }
        if !self.class_of(to)?.accepts_input() {
            return Err(GraphError::NotAnInput(to));
        }
        Ok(GraphCommand::Connect { from, to })
    }

    pub fn start<B>(&mut self, id: NodeId, at: f64) -> Result<GraphCommand<B>, GraphError> {
        check_time(at)?;
        let entry = self.nodes.get_mut(&id).ok_or(GraphError::UnknownNode(id))?;
        if !entry.class.is_source() {
            return Err(GraphError::NotASource(id));
        }
        if entry.started {
            return Err(GraphError::AlreadyStarted(id));
        }
        entry.started = true;
        Ok(GraphCommand::Start { id, at })
    }

    pub fn stop<B>(&self, id: NodeId, at: f64) -> Result<GraphCommand<B>, GraphError> {
        check_time(at)?;
        if !self.class_of(id)?.is_source() {
            return Err(GraphError::NotASource(id));
        }
        Ok(GraphCommand::Stop { id, at })
    }

    pub fn automate<B>(&self, id: NodeId, event: ParamEvent) -> Result<GraphCommand<B>, GraphError> {
        check_time(event.time())?;
        if !event.value().is_finite() {
            return Err(GraphError::InvalidParameter(format!(
                "automation value {} is not finite",
                event.value()
            )));
        }
        if self.class_of(id)? != NodeClass::Gain {
            return Err(GraphError::NotAGain(id));
        }
        Ok(GraphCommand::Automate { id, event })
    }

    /// Forget a node the host has retired.
    pub fn release(&mut self, id: NodeId) {
        if id != NodeId::DESTINATION {
            self.nodes.remove(&id);
        }
    }
}

impl Default for NodeRegistry {
    fn default() -> Self {
        Self::new()
    }
}

fn check_time(at: f64) -> Result<(), GraphError> {
    if at.is_finite() && at >= 0.0 {
        Ok(())
    } else {
        Err(GraphError::InvalidParameter(format!(
            "clock time {at} must be finite and non-negative"
        )))
    }
}

fn validate_kind<B>(kind: &NodeKind<B>) -> Result<(), GraphError> {
    let positive = |name: &str, value: f64| {
        if value.is_finite() && value > 0.0 {
            Ok(())
        } else {
            Err(GraphError::InvalidParameter(format!(
                "{name} must be positive, got {value}"
            )))
        }
    };

    match kind {
        NodeKind::Gain { gain } if !gain.is_finite() => Err(GraphError::InvalidParameter(
            format!("gain {gain} is not finite"),
        )),
        NodeKind::Gain { .. } => Ok(()),
        NodeKind::Oscillator { frequency, .. } => positive("frequency", *frequency as f64),
        NodeKind::Filter { frequency, q, .. } => {
            positive("filter frequency", *frequency as f64)?;
            positive("filter q", *q as f64)
        }
        NodeKind::BufferSource { options, .. } => positive("playback rate", options.playback_rate),
    }
}

/// Host clock, in seconds. Assumed monotonic.
pub trait AudioClock {
    fn current_time(&self) -> f64;
}

/// Node factory and command sink of an audio host.
pub trait AudioGraph: AudioClock {
    fn sample_rate(&self) -> u32;

    fn create_node(&mut self, kind: NodeKind) -> Result<NodeId, GraphError>;

    fn connect(&mut self, from: NodeId, to: NodeId) -> Result<(), GraphError>;

    fn start(&mut self, node: NodeId, at: f64) -> Result<(), GraphError>;

    fn stop(&mut self, node: NodeId, at: f64) -> Result<(), GraphError>;

    fn automate(&mut self, node: NodeId, event: ParamEvent) -> Result<(), GraphError>;

    fn destination(&self) -> NodeId {
        NodeId::DESTINATION
    }

    fn create_gain(&mut self, gain: f32) -> Result<NodeId, GraphError> {
        self.create_node(NodeKind::Gain { gain })
    }

    fn create_oscillator(&mut self, waveform: Waveform, frequency: f32) -> Result<NodeId, GraphError> {
        self.create_node(NodeKind::Oscillator {
            waveform,
            frequency,
        })
    }

    fn create_filter(
        &mut self,
        kind: FilterKind,
        frequency: f32,
        q: f32,
    ) -> Result<NodeId, GraphError> {
        self.create_node(NodeKind::Filter { kind, frequency, q })
    }

    fn create_buffer_source(
        &mut self,
        buffer: AudioArc,
        options: SourceOptions,
    ) -> Result<NodeId, GraphError> {
        self.create_node(NodeKind::BufferSource { buffer, options })
    }
}
