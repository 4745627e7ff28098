use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use basedrop::{Collector, Handle, Shared};
use cpal::{
    FromSample, SizedSample,
    traits::{DeviceTrait, HostTrait, StreamTrait},
};
use meloskia_render::{Mixer, SampleStore};
use meloskia_transport::{
    AudioArc, AudioClock, AudioGraph, GraphCommand, GraphError, NodeId, NodeKind, NodeRegistry,
    ParamEvent,
};

/// Buffer handed to the audio thread; freed by the collector, never there.
pub struct SharedAudio(Shared<AudioArc>);

impl SampleStore for SharedAudio {
    fn audio(&self) -> &AudioArc {
        &self.0
    }
}

/// Reported by the audio thread.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Status {
    Retired(NodeId),
    Rejected(NodeId),
}

#[derive(Debug, Clone)]
pub struct EngineOptions {
    /// Capacity of the command ring; a full ring rejects further commands.
    pub command_capacity: usize,
    /// Output device name; the host default when `None`.
    pub device: Option<String>,
}

impl Default for EngineOptions {
    fn default() -> Self {
        Self {
            command_capacity: 4096,
            device: None,
        }
    }
}

/// Control side of the real-time host.
///
/// Commands go to the audio thread over a lock-free ring without waiting
/// for it; the clock is the count of frames the stream has rendered.
pub struct RealtimeGraph {
    commands: rtrb::Producer<GraphCommand<SharedAudio>>,
    status: rtrb::Consumer<Status>,
    registry: NodeRegistry,
    frames: Arc<AtomicU64>,
    sample_rate: u32,
    handle: Handle,
}

impl RealtimeGraph {
    /// Forget nodes the audio thread has retired.
    pub fn poll(&mut self) {
        while let Ok(status) = self.status.pop() {
            match status {
                Status::Retired(id) => self.registry.release(id),
                Status::Rejected(id) => {
                    tracing::warn!(node = %id, "audio thread rejected a command");
                    self.registry.release(id);
                }
            }
        }
    }

    /// Nodes the control side still considers live, destination included.
    pub fn live_nodes(&self) -> usize {
        self.registry.len()
    }

    fn send(&mut self, command: GraphCommand) -> Result<(), GraphError> {
        let handle = &self.handle;
        let command = command.map_buffer(|audio| SharedAudio(Shared::new(handle, audio)));
        self.commands
            .push(command)
            .map_err(|_| GraphError::QueueFull)
    }
}

impl AudioClock for RealtimeGraph {
    fn current_time(&self) -> f64 {
        self.frames.load(Ordering::Acquire) as f64 / self.sample_rate as f64
    }
}

impl AudioGraph for RealtimeGraph {
    fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    fn create_node(&mut self, kind: NodeKind) -> Result<NodeId, GraphError> {
        self.poll();
        let (id, command) = self.registry.create(kind)?;
        if let Err(err) = self.send(command) {
            self.registry.release(id);
            return Err(err);
        }
        Ok(id)
    }

    fn connect(&mut self, from: NodeId, to: NodeId) -> Result<(), GraphError> {
        let command = self.registry.connect(from, to)?;
        self.send(command)
    }

    fn start(&mut self, node: NodeId, at: f64) -> Result<(), GraphError> {
        let command = self.registry.start(node, at)?;
        self.send(command)
    }

    fn stop(&mut self, node: NodeId, at: f64) -> Result<(), GraphError> {
        let command = self.registry.stop(node, at)?;
        self.send(command)
    }

    fn automate(&mut self, node: NodeId, event: ParamEvent) -> Result<(), GraphError> {
        let command = self.registry.automate(node, event)?;
        self.send(command)
    }
}

/// Audio-thread side: drains commands, renders, publishes the clock.
pub struct AudioProcessor {
    mixer: Mixer<SharedAudio>,
    commands: rtrb::Consumer<GraphCommand<SharedAudio>>,
    status: rtrb::Producer<Status>,
    frames: Arc<AtomicU64>,
}

impl AudioProcessor {
    pub fn process(&mut self, out: &mut [f32]) {
        while let Ok(command) = self.commands.pop() {
            let target = command_target(&command);
            if self.mixer.apply(command).is_err() {
                let _ = self.status.push(Status::Rejected(target));
            }
        }

        self.mixer.render(out);

        self.frames.store(self.mixer.frame(), Ordering::Release);

        let status = &mut self.status;
        self.mixer.drain_retired(|id| {
            let _ = status.push(Status::Retired(id));
        });
    }
}

fn command_target<B>(command: &GraphCommand<B>) -> NodeId {
    match command {
        GraphCommand::Create { id, .. }
        | GraphCommand::Start { id, .. }
        | GraphCommand::Stop { id, .. }
        | GraphCommand::Automate { id, .. } => *id,
        GraphCommand::Connect { from, .. } => *from,
    }
}

/// Build both ends of a host without opening a device.
pub fn graph_pair(
    sample_rate: u32,
    channels: u16,
    command_capacity: usize,
    handle: Handle,
) -> (RealtimeGraph, AudioProcessor) {
    let (command_tx, command_rx) = rtrb::RingBuffer::new(command_capacity);
    let (status_tx, status_rx) = rtrb::RingBuffer::new(command_capacity);
    let frames = Arc::new(AtomicU64::new(0));

    let graph = RealtimeGraph {
        commands: command_tx,
        status: status_rx,
        registry: NodeRegistry::new(),
        frames: frames.clone(),
        sample_rate,
        handle,
    };
    let processor = AudioProcessor {
        mixer: Mixer::new(sample_rate, channels),
        commands: command_rx,
        status: status_tx,
        frames,
    };
    (graph, processor)
}

pub struct AudioEngineHandle {
    pub collector: Collector,
    pub sample_rate: u32,
    pub channels: u16,
    _stream: cpal::Stream,
}

impl AudioEngineHandle {
    /// Free buffers the audio thread has let go of.
    pub fn collect(&mut self) {
        self.collector.collect();
    }
}

pub fn start(options: EngineOptions) -> anyhow::Result<(AudioEngineHandle, RealtimeGraph)> {
    let collector = Collector::new();
    let handle = collector.handle();

    let host = cpal::default_host();
    let device = match &options.device {
        Some(name) => host
            .output_devices()?
            .find(|device| device.name().is_ok_and(|n| &n == name))
            .ok_or_else(|| anyhow::anyhow!("output device '{name}' not found"))?,
        None => host
            .default_output_device()
            .ok_or_else(|| anyhow::anyhow!("no output device found"))?,
    };

    let config = device.default_output_config()?;
    let sample_format = config.sample_format();
    let stream_config: cpal::StreamConfig = config.into();
    let sample_rate = stream_config.sample_rate.0;
    let channels = stream_config.channels;

    let (graph, processor) = graph_pair(sample_rate, channels, options.command_capacity, handle);

    let stream = match sample_format {
        cpal::SampleFormat::F32 => build_stream::<f32>(&device, &stream_config, processor)?,
        cpal::SampleFormat::I16 => build_stream::<i16>(&device, &stream_config, processor)?,
        sample_format => anyhow::bail!("unsupported sample format '{sample_format}'"),
    };

    stream.play()?;
    tracing::info!(
        device = %device.name().unwrap_or_default(),
        sample_rate,
        channels,
        "audio output started"
    );

    Ok((
        AudioEngineHandle {
            collector,
            sample_rate,
            channels,
            _stream: stream,
        },
        graph,
    ))
}

fn build_stream<T>(
    device: &cpal::Device,
    config: &cpal::StreamConfig,
    mut processor: AudioProcessor,
) -> anyhow::Result<cpal::Stream>
where
    T: SizedSample + FromSample<f32>,
{
    let mut mixed = vec![0.0f32; 4096];

    let stream = device.build_output_stream(
        config,
        move |data: &mut [T], _: &cpal::OutputCallbackInfo| {
            if mixed.len() < data.len() {
                mixed.resize(data.len(), 0.0);
            }
            let block = &mut mixed[..data.len()];
            processor.process(block);
            for (sample, value) in data.iter_mut().zip(block.iter()) {
                *sample = T::from_sample(*value);
            }
        },
        |err| tracing::error!("stream error: {err}"),
        None,
    )?;

    Ok(stream)
}
