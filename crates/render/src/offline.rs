use meloskia_transport::{
    AudioArc, AudioBuffer, AudioClock, AudioGraph, GraphCommand, GraphError, NodeId, NodeKind,
    NodeRegistry, ParamEvent,
};

use crate::Mixer;

/// Audio graph whose clock only moves when frames are rendered.
pub struct OfflineGraph {
    mixer: Mixer<AudioArc>,
    registry: NodeRegistry,
}

impl OfflineGraph {
    pub fn new(sample_rate: u32, channels: u16) -> Self {
        Self {
            mixer: Mixer::new(sample_rate, channels),
            registry: NodeRegistry::new(),
        }
    }

    pub fn channels(&self) -> u16 {
        self.mixer.channels()
    }

    /// Live nodes, the destination excluded.
    pub fn node_count(&self) -> usize {
        self.mixer.node_count()
    }

    /// Render `frames` frames, appending interleaved samples to `out`.
    pub fn render_into(&mut self, frames: usize, out: &mut Vec<f32>) {
        let start = out.len();
        out.resize(start + frames * self.mixer.channels() as usize, 0.0);
        self.mixer.render(&mut out[start..]);

        let registry = &mut self.registry;
        self.mixer.drain_retired(|id| registry.release(id));
    }

    pub fn render(&mut self, frames: usize) -> AudioBuffer {
        let mut samples = Vec::new();
        self.render_into(frames, &mut samples);
        AudioBuffer {
            samples,
            sample_rate: self.mixer.sample_rate(),
            channels: self.mixer.channels(),
        }
    }

    fn submit(&mut self, command: GraphCommand) -> Result<(), GraphError> {
        self.mixer.apply(command)
    }
}

impl AudioClock for OfflineGraph {
    fn current_time(&self) -> f64 {
        self.mixer.time()
    }
}

impl AudioGraph for OfflineGraph {
    fn sample_rate(&self) -> u32 {
        self.mixer.sample_rate()
    }

    fn create_node(&mut self, kind: NodeKind) -> Result<NodeId, GraphError> {
        let (id, command) = self.registry.create(kind)?;
        if let Err(err) = self.submit(command) {
            self.registry.release(id);
            return Err(err);
        }
        Ok(id)
    }

    fn connect(&mut self, from: NodeId, to: NodeId) -> Result<(), GraphError> {
        let command = self.registry.connect(from, to)?;
        self.submit(command)
    }

    fn start(&mut self, node: NodeId, at: f64) -> Result<(), GraphError> {
        let command = self.registry.start(node, at)?;
        self.submit(command)
    }

    fn stop(&mut self, node: NodeId, at: f64) -> Result<(), GraphError> {
        let command = self.registry.stop(node, at)?;
        self.submit(command)
    }

    fn automate(&mut self, node: NodeId, event: ParamEvent) -> Result<(), GraphError> {
        let command = self.registry.automate(node, event)?;
        self.submit(command)
    }
}
