use std::collections::{HashMap, VecDeque};
use std::f32::consts::TAU;

use biquad::{Biquad, Coefficients, DirectForm2Transposed, ToHertz, Type};
use meloskia_transport::{
    AudioArc, FilterKind, GraphCommand, GraphError, NodeId, NodeKind, ParamTimeline,
    SourceOptions, Waveform,
};

/// Grain length of the pitch-preserving stretch, in output frames.
const GRAIN_FRAMES: u64 = 2048;

/// Anything that can hand the mixer decoded audio.
pub trait SampleStore {
    fn audio(&self) -> &AudioArc;
}

impl SampleStore for AudioArc {
    fn audio(&self) -> &AudioArc {
        self
    }
}

enum Processor<B> {
    Gain {
        timeline: ParamTimeline,
    },
    Oscillator {
        waveform: Waveform,
        frequency: f32,
        phase: f32,
    },
    Filter {
        filter: DirectForm2Transposed<f32>,
    },
    Buffer {
        buffer: B,
        options: SourceOptions,
    },
}

struct MixNode<B> {
    id: NodeId,
    processor: Processor<B>,
    inputs: Vec<NodeId>,
    had_inputs: bool,
    start: Option<u64>,
    stop: Option<u64>,
    out: f32,
}

impl<B: SampleStore> MixNode<B> {
    fn is_source(&self) -> bool {
        matches!(
            self.processor,
            Processor::Oscillator { .. } | Processor::Buffer { .. }
        )
    }

    /// Frame past which a source produces nothing more, if known.
    fn end_frame(&self, sample_rate: u32) -> Option<u64> {
        let start = self.start?;
        let natural_end = match &self.processor {
            Processor::Buffer { buffer, options } => {
                let audio = buffer.audio();
                let step = options.playback_rate * audio.sample_rate() as f64 / sample_rate as f64;
                Some(start + (audio.frames() as f64 / step).ceil() as u64)
            }
            _ => None,
        };
        match (self.stop, natural_end) {
            (Some(stop), Some(end)) => Some(stop.min(end)),
            (stop, end) => stop.or(end),
        }
    }

    fn process(&mut self, input: f32, frame: u64, sample_rate: u32) -> f32 {
        let active = self.start.is_some_and(|start| frame >= start)
            && self.stop.is_none_or(|stop| frame < stop);

        match &mut self.processor {
            Processor::Gain { timeline } => input * timeline.value_at(frame as f64 / sample_rate as f64),
            Processor::Filter { filter } => filter.run(input),
            Processor::Oscillator {
                waveform,
                frequency,
                phase,
            } => {
                if !active {
                    return 0.0;
                }
                let value = match waveform {
                    Waveform::Sine => (*phase * TAU).sin(),
                    Waveform::Triangle => 1.0 - 4.0 * (*phase - 0.5).abs(),
                    Waveform::Sawtooth => 2.0 * *phase - 1.0,
                    Waveform::Square => {
                        if *phase < 0.5 {
                            1.0
                        } else {
                            -1.0
                        }
                    }
                };
                *phase = (*phase + *frequency / sample_rate as f32).fract();
                value
            }
            Processor::Buffer { buffer, options } => {
                let Some(start) = self.start.filter(|_| active) else {
                    return 0.0;
                };
                let elapsed = frame - start;
                let audio = buffer.audio();
                // Source frames per output frame at unit rate.
                let ratio = audio.sample_rate() as f64 / sample_rate as f64;

                if options.preserve_pitch && options.playback_rate != 1.0 {
                    stretched_sample(audio, elapsed, ratio, options.playback_rate)
                } else {
                    audio.mono_at(elapsed as f64 * ratio * options.playback_rate)
                }
            }
        }
    }
}

/// Two overlapping grains with triangular windows; each grain reads the
/// source at its natural speed from where the stretched timeline has reached.
fn stretched_sample(audio: &AudioArc, elapsed: u64, ratio: f64, rate: f64) -> f32 {
    let hop = GRAIN_FRAMES / 2;
    let current = elapsed / hop;

    let mut value = 0.0;
    for grain in [current.checked_sub(1), Some(current)].into_iter().flatten() {
        let grain_start = grain * hop;
        let offset = elapsed - grain_start;
        if offset >= GRAIN_FRAMES {
            continue;
        }
        let weight = 1.0 - (offset as f32 - hop as f32).abs() / hop as f32;
        let position = (grain_start as f64 * rate + offset as f64) * ratio;
        value += weight * audio.mono_at(position);
    }
    value
}

fn make_filter(kind: FilterKind, frequency: f32, q: f32, sample_rate: u32) -> Result<DirectForm2Transposed<f32>, GraphError> {
    let filter_type = match kind {
        FilterKind::Lowpass => Type::LowPass,
        FilterKind::Highpass => Type::HighPass,
    };
    // Clamp below Nyquist; biquad rejects anything at or above it.
    let nyquist = sample_rate as f32 / 2.0;
    let frequency = frequency.min(nyquist * 0.99);
    let coeffs = Coefficients::<f32>::from_params(filter_type, (sample_rate as f32).hz(), frequency.hz(), q)
        .map_err(|e| GraphError::InvalidParameter(format!("filter coefficients: {e:?}")))?;
    Ok(DirectForm2Transposed::<f32>::new(coeffs))
}

struct PlanStep {
    node: usize,
    inputs: Vec<usize>,
}

/// Sample-accurate renderer of a node graph.
///
/// Sources sound in `[start, stop)`. Output is the mono sum of every node
/// connected to the destination, copied to each output channel. Finished
/// sources are retired after each block, and so are the intermediate nodes
/// they leave without inputs; nodes feeding the destination directly are
/// buses and stay.
pub struct Mixer<B = AudioArc> {
    sample_rate: u32,
    channels: u16,
    frame: u64,
    nodes: Vec<MixNode<B>>,
    index: HashMap<NodeId, usize>,
    outputs: Vec<NodeId>,
    plan: Vec<PlanStep>,
    output_plan: Vec<usize>,
    dirty: bool,
    retired: Vec<NodeId>,
}

impl<B: SampleStore> Mixer<B> {
    pub fn new(sample_rate: u32, channels: u16) -> Self {
        Self {
            sample_rate,
            channels: channels.max(1),
            frame: 0,
            nodes: Vec::with_capacity(256),
            index: HashMap::with_capacity(256),
            outputs: Vec::new(),
            plan: Vec::new(),
            output_plan: Vec::new(),
            dirty: false,
            retired: Vec::with_capacity(256),
        }
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    pub fn channels(&self) -> u16 {
        self.channels
    }

    /// Frames rendered so far.
    pub fn frame(&self) -> u64 {
        self.frame
    }

    /// Clock time in seconds at the next frame to render.
    pub fn time(&self) -> f64 {
        self.frame as f64 / self.sample_rate as f64
    }

    /// Live nodes, the destination excluded.
    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    fn frame_at(&self, at: f64) -> u64 {
        (at * self.sample_rate as f64).round().max(0.0) as u64
    }

    fn node_mut(&mut self, id: NodeId) -> Result<&mut MixNode<B>, GraphError> {
        let idx = *self.index.get(&id).ok_or(GraphError::UnknownNode(id))?;
        Ok(&mut self.nodes[idx])
    }

    pub fn apply(&mut self, command: GraphCommand<B>) -> Result<(), GraphError> {
        match command {
            GraphCommand::Create { id, kind } => {
                let processor = match kind {
                    NodeKind::Gain { gain } => Processor::Gain {
                        timeline: ParamTimeline::new(gain),
                    },
                    NodeKind::Oscillator {
                        waveform,
                        frequency,
                    } => Processor::Oscillator {
                        waveform,
                        frequency,
                        phase: 0.0,
                    },
                    NodeKind::Filter { kind, frequency, q } => Processor::Filter {
                        filter: make_filter(kind, frequency, q, self.sample_rate)?,
                    },
                    NodeKind::BufferSource { buffer, options } => {
                        Processor::Buffer { buffer, options }
                    }
                };
                self.index.insert(id, self.nodes.len());
                self.nodes.push(MixNode {
                    id,
                    processor,
                    inputs: Vec::new(),
                    had_inputs: false,
                    start: None,
                    stop: None,
                    out: 0.0,
                });
            }
            GraphCommand::Connect { from, to } => {
                if !self.index.contains_key(&from) {
                    return Err(GraphError::UnknownNode(from));
                }
                if to == NodeId::DESTINATION {
                    if !self.outputs.contains(&from) {
                        self.outputs.push(from);
                    }
                } else {
                    let node = self.node_mut(to)?;
                    if !node.inputs.contains(&from) {
                        node.inputs.push(from);
                    }
                    node.had_inputs = true;
                }
                self.dirty = true;
            }
            GraphCommand::Start { id, at } => {
                let frame = self.frame_at(at);
                self.node_mut(id)?.start = Some(frame);
            }
            GraphCommand::Stop { id, at } => {
                let frame = self.frame_at(at);
                self.node_mut(id)?.stop = Some(frame);
            }
            GraphCommand::Automate { id, event } => match &mut self.node_mut(id)?.processor {
                Processor::Gain { timeline } => timeline.push(event),
                _ => return Err(GraphError::NotAGain(id)),
            },
        }
        Ok(())
    }

    /// Kahn ordering of every node reachable through connections.
    fn rebuild_plan(&mut self) {
        let count = self.nodes.len();
        let mut pending = vec![0usize; count];
        let mut consumers: Vec<Vec<usize>> = vec![Vec::new(); count];

        for (idx, node) in self.nodes.iter().enumerate() {
            for input in &node.inputs {
                if let Some(&src) = self.index.get(input) {
                    pending[idx] += 1;
                    consumers[src].push(idx);
                }
            }
        }

        let mut queue: VecDeque<usize> = (0..count).filter(|&idx| pending[idx] == 0).collect();
        self.plan.clear();
        while let Some(idx) = queue.pop_front() {
            let inputs = self.nodes[idx]
                .inputs
                .iter()
                .filter_map(|input| self.index.get(input).copied())
                .collect();
            self.plan.push(PlanStep { node: idx, inputs });
            for &consumer in &consumers[idx] {
                pending[consumer] -= 1;
                if pending[consumer] == 0 {
                    queue.push_back(consumer);
                }
            }
        }

        if self.plan.len() < count {
            tracing::warn!(
                skipped = count - self.plan.len(),
                "audio graph contains a cycle; nodes on it are muted"
            );
        }

        self.output_plan = self
            .outputs
            .iter()
            .filter_map(|id| self.index.get(id).copied())
            .collect();
        self.dirty = false;
    }

    /// Render interleaved frames into `out` and advance the clock.
    pub fn render(&mut self, out: &mut [f32]) {
        if self.dirty {
            self.rebuild_plan();
        }

        let channels = self.channels as usize;
        for frame in out.chunks_mut(channels) {
            for step in &self.plan {
                let input: f32 = step.inputs.iter().map(|&i| self.nodes[i].out).sum();
                let node = &mut self.nodes[step.node];
                node.out = node.process(input, self.frame, self.sample_rate);
            }

            let mixed: f32 = self.output_plan.iter().map(|&i| self.nodes[i].out).sum();
            frame.fill(mixed);
            self.frame += 1;
        }

        self.prune();
    }

    fn prune(&mut self) {
        let now = self.frame;
        let sample_rate = self.sample_rate;
        let mut removed = false;

        loop {
            let live_inputs = |node: &MixNode<B>, index: &HashMap<NodeId, usize>| {
                node.inputs.iter().any(|input| index.contains_key(input))
            };
            let finished: Vec<usize> = self
                .nodes
                .iter()
                .enumerate()
                .filter(|(_, node)| {
                    if node.is_source() {
                        node.end_frame(sample_rate).is_some_and(|end| now >= end)
                    } else {
                        node.had_inputs
                            && !live_inputs(node, &self.index)
                            && !self.outputs.contains(&node.id)
                    }
                })
                .map(|(idx, _)| idx)
                .collect();

            if finished.is_empty() {
                break;
            }

            for &idx in finished.iter().rev() {
                let node = self.nodes.swap_remove(idx);
                self.index.remove(&node.id);
                self.retired.push(node.id);
                if let Some(moved) = self.nodes.get(idx) {
                    self.index.insert(moved.id, idx);
                }
            }
            removed = true;
        }

        if removed {
            let index = &self.index;
            self.outputs.retain(|id| index.contains_key(id));
            for node in &mut self.nodes {
                node.inputs.retain(|id| index.contains_key(id));
            }
            self.dirty = true;
        }
    }

    /// Hand over the ids of nodes retired since the last call.
    pub fn drain_retired(&mut self, mut f: impl FnMut(NodeId)) {
        for id in self.retired.drain(..) {
            f(id);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use meloskia_transport::ParamEvent;

    const RATE: u32 = 1000;

    fn create(mixer: &mut Mixer, id: u64, kind: NodeKind) -> NodeId {
        let id = NodeId(id);
        mixer.apply(GraphCommand::Create { id, kind }).unwrap();
        id
    }

    fn connect(mixer: &mut Mixer, from: NodeId, to: NodeId) {
        mixer.apply(GraphCommand::Connect { from, to }).unwrap();
    }

    fn render(mixer: &mut Mixer, frames: usize) -> Vec<f32> {
        let mut out = vec![0.0; frames * mixer.channels() as usize];
        mixer.render(&mut out);
        out
    }

    fn constant(len: usize) -> AudioArc {
        AudioArc::new(vec![1.0; len], RATE, 1)
    }

    #[test]
    fn test_buffer_plays_between_start_and_stop() {
        let mut mixer = Mixer::new(RATE, 2);
        let src = create(
            &mut mixer,
            1,
            NodeKind::BufferSource {
                buffer: constant(1000),
                options: SourceOptions::default(),
            },
        );
        connect(&mut mixer, src, NodeId::DESTINATION);
        mixer.apply(GraphCommand::Start { id: src, at: 0.01 }).unwrap();
        mixer.apply(GraphCommand::Stop { id: src, at: 0.02 }).unwrap();

        let out = render(&mut mixer, 30);
        assert_eq!(out.len(), 60);
        assert_eq!(out[9 * 2], 0.0);
        assert_eq!(out[10 * 2], 1.0);
        assert_eq!(out[10 * 2 + 1], 1.0);
        assert_eq!(out[19 * 2], 1.0);
        assert_eq!(out[20 * 2], 0.0);

        let mut retired = Vec::new();
        mixer.drain_retired(|id| retired.push(id));
        assert_eq!(retired, vec![src]);
        assert_eq!(mixer.node_count(), 0);
    }

    #[test]
    fn test_stop_before_start_is_silent() {
        let mut mixer = Mixer::new(RATE, 1);
        let src = create(
            &mut mixer,
            1,
            NodeKind::BufferSource {
                buffer: constant(100),
                options: SourceOptions::default(),
            },
        );
        connect(&mut mixer, src, NodeId::DESTINATION);
        mixer.apply(GraphCommand::Start { id: src, at: 0.05 }).unwrap();
        mixer.apply(GraphCommand::Stop { id: src, at: 0.0 }).unwrap();

        let out = render(&mut mixer, 100);
        assert!(out.iter().all(|&s| s == 0.0));
    }

    #[test]
    fn test_gain_automation_shapes_oscillator() {
        let mut mixer = Mixer::new(RATE, 1);
        let osc = create(
            &mut mixer,
            1,
            NodeKind::Oscillator {
                waveform: Waveform::Square,
                frequency: 1.0,
            },
        );
        let gain = create(&mut mixer, 2, NodeKind::Gain { gain: 1.0 });
        connect(&mut mixer, osc, gain);
        connect(&mut mixer, gain, NodeId::DESTINATION);
        mixer
            .apply(GraphCommand::Automate {
                id: gain,
                event: ParamEvent::SetValue { value: 0.0, at: 0.0 },
            })
            .unwrap();
        mixer
            .apply(GraphCommand::Automate {
                id: gain,
                event: ParamEvent::LinearRamp { value: 1.0, end: 0.1 },
            })
            .unwrap();
        mixer.apply(GraphCommand::Start { id: osc, at: 0.0 }).unwrap();

        let out = render(&mut mixer, 200);
        assert_eq!(out[0], 0.0);
        assert!((out[50] - 0.5).abs() < 1e-3);
        assert!((out[150] - 1.0).abs() < 1e-6);
    }

    #[test]
    fn test_retires_chain_but_keeps_bus() {
        let mut mixer = Mixer::new(RATE, 1);
        let bus = create(&mut mixer, 1, NodeKind::Gain { gain: 0.5 });
        connect(&mut mixer, bus, NodeId::DESTINATION);

        let osc = create(
            &mut mixer,
            2,
            NodeKind::Oscillator {
                waveform: Waveform::Sawtooth,
                frequency: 100.0,
            },
        );
        let filter = create(
            &mut mixer,
            3,
            NodeKind::Filter {
                kind: FilterKind::Lowpass,
                frequency: 90.0,
                q: 0.707,
            },
        );
        let env = create(&mut mixer, 4, NodeKind::Gain { gain: 1.0 });
        connect(&mut mixer, osc, filter);
        connect(&mut mixer, filter, env);
        connect(&mut mixer, env, bus);
        mixer.apply(GraphCommand::Start { id: osc, at: 0.0 }).unwrap();
        mixer.apply(GraphCommand::Stop { id: osc, at: 0.05 }).unwrap();

        let out = render(&mut mixer, 40);
        assert!(out.iter().any(|&s| s != 0.0));
        assert_eq!(mixer.node_count(), 4);

        render(&mut mixer, 20);
        let mut retired = Vec::new();
        mixer.drain_retired(|id| retired.push(id));
        retired.sort();
        assert_eq!(retired, vec![osc, filter, env]);
        assert_eq!(mixer.node_count(), 1);
    }

    #[test]
    fn test_playback_rate_shortens_buffer() {
        let mut mixer = Mixer::new(RATE, 1);
        let src = create(
            &mut mixer,
            1,
            NodeKind::BufferSource {
                buffer: constant(100),
                options: SourceOptions {
                    playback_rate: 2.0,
                    preserve_pitch: false,
                },
            },
        );
        connect(&mut mixer, src, NodeId::DESTINATION);
        mixer.apply(GraphCommand::Start { id: src, at: 0.0 }).unwrap();

        let out = render(&mut mixer, 100);
        assert_eq!(out[49], 1.0);
        assert_eq!(out[50], 0.0);
        assert_eq!(mixer.node_count(), 0);
    }

    #[test]
    fn test_preserve_pitch_keeps_level() {
        let mut mixer = Mixer::new(RATE, 1);
        let src = create(
            &mut mixer,
            1,
            NodeKind::BufferSource {
                buffer: constant(20_000),
                options: SourceOptions {
                    playback_rate: 0.5,
                    preserve_pitch: true,
                },
            },
        );
        connect(&mut mixer, src, NodeId::DESTINATION);
        mixer.apply(GraphCommand::Start { id: src, at: 0.0 }).unwrap();

        let out = render(&mut mixer, 8000);
        // Past the first half-grain fade-in the overlapping windows sum to one.
        assert!(out[2000..8000].iter().all(|&s| (s - 1.0).abs() < 1e-3));
    }

    #[test]
    fn test_unknown_nodes_are_errors() {
        let mut mixer: Mixer = Mixer::new(RATE, 1);
        assert_eq!(
            mixer.apply(GraphCommand::Start { id: NodeId(9), at: 0.0 }),
            Err(GraphError::UnknownNode(NodeId(9)))
        );
        let osc = create(
            &mut mixer,
            1,
            NodeKind::Oscillator {
                waveform: Waveform::Sine,
                frequency: 10.0,
            },
        );
        assert_eq!(
            mixer.apply(GraphCommand::Automate {
                id: osc,
                event: ParamEvent::SetValue { value: 1.0, at: 0.0 }
            }),
            Err(GraphError::NotAGain(osc))
        );
    }

    #[test]
    fn test_clock_advances_with_rendering() {
        let mut mixer: Mixer = Mixer::new(RATE, 2);
        assert_eq!(mixer.time(), 0.0);
        render(&mut mixer, 250);
        assert_eq!(mixer.frame(), 250);
        assert!((mixer.time() - 0.25).abs() < 1e-12);
    }
}
