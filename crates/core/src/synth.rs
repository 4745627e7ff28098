//! Subtractive piano voice: oscillator, low-pass filter, enveloped gain.

use meloskia_transport::{AudioGraph, FilterKind, GraphError, NodeId, ParamEvent, Waveform};

/// Attack/decay/sustain/release shape of a voice's gain, times in seconds.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Envelope {
    pub attack: f64,
    pub decay: f64,
    pub sustain: f32,
    pub release: f64,
}

impl Default for Envelope {
    fn default() -> Self {
        Self {
            attack: 0.005,
            decay: 0.1,
            sustain: 0.8,
            release: 0.07,
        }
    }
}

impl Envelope {
    /// Full level on start, silence on stop.
    pub const IMMEDIATE: Envelope = Envelope {
        attack: 0.0,
        decay: 0.0,
        sustain: 1.0,
        release: 0.0,
    };

    pub fn attack_events(&self, at: f64) -> [ParamEvent; 3] {
        let peak = at + self.attack;
        [
            ParamEvent::SetValue { value: 0.0, at },
            ParamEvent::LinearRamp {
                value: 1.0,
                end: peak,
            },
            ParamEvent::ExponentialRamp {
                value: self.sustain,
                end: peak + self.decay,
            },
        ]
    }

    pub fn release_events(&self, at: f64) -> [ParamEvent; 2] {
        [
            ParamEvent::SetValue {
                value: self.sustain,
                at,
            },
            ParamEvent::LinearRamp {
                value: 0.0,
                end: at + self.release,
            },
        ]
    }
}

/// How live-played notes are shaped.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LiveEnvelope {
    /// Same envelope as automated notes.
    #[default]
    Shaped,
    /// Plain on/off.
    Immediate,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SynthSettings {
    pub waveform: Waveform,
    /// Filter cutoff as a multiple of the note frequency.
    pub filter_ratio: f32,
    pub filter_q: f32,
    pub envelope: Envelope,
}

impl Default for SynthSettings {
    fn default() -> Self {
        Self {
            waveform: Waveform::Sawtooth,
            filter_ratio: 0.9,
            filter_q: 1.0,
            envelope: Envelope::default(),
        }
    }
}

/// Nodes of one synthesised note. Only the oscillator is a source; the
/// filter and gain go away with it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SynthVoice {
    pub oscillator: NodeId,
    pub filter: NodeId,
    pub gain: NodeId,
}

impl SynthVoice {
    /// Create and wire a voice into `bus`. Nothing sounds until [`start`].
    ///
    /// [`start`]: SynthVoice::start
    pub fn build<G: AudioGraph + ?Sized>(
        graph: &mut G,
        bus: NodeId,
        frequency: f32,
        settings: &SynthSettings,
    ) -> Result<Self, GraphError> {
        let oscillator = graph.create_oscillator(settings.waveform, frequency)?;
        let filter = graph.create_filter(
            FilterKind::Lowpass,
            frequency * settings.filter_ratio,
            settings.filter_q,
        )?;
        let gain = graph.create_gain(0.0)?;

        graph.connect(oscillator, filter)?;
        graph.connect(filter, gain)?;
        graph.connect(gain, bus)?;

        Ok(Self {
            oscillator,
            filter,
            gain,
        })
    }

    pub fn start<G: AudioGraph + ?Sized>(
        &self,
        graph: &mut G,
        at: f64,
        envelope: &Envelope,
    ) -> Result<(), GraphError> {
        for event in envelope.attack_events(at) {
            graph.automate(self.gain, event)?;
        }
        graph.start(self.oscillator, at)
    }

    /// Release at `at`; returns the time the oscillator stops.
    pub fn release<G: AudioGraph + ?Sized>(
        &self,
        graph: &mut G,
        at: f64,
        envelope: &Envelope,
    ) -> Result<f64, GraphError> {
        for event in envelope.release_events(at) {
            graph.automate(self.gain, event)?;
        }
        let end = at + envelope.release;
        graph.stop(self.oscillator, end)?;
        Ok(end)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use meloskia_transport::ParamTimeline;

    fn timeline(events: impl IntoIterator<Item = ParamEvent>) -> ParamTimeline {
        let mut timeline = ParamTimeline::new(0.0);
        for event in events {
            timeline.push(event);
        }
        timeline
    }

    #[test]
    fn test_envelope_shape() {
        let envelope = Envelope::default();
        let mut lane = timeline(envelope.attack_events(1.0));
        for event in envelope.release_events(2.0) {
            lane.push(event);
        }

        assert_eq!(lane.value_at(0.5), 0.0);
        assert_eq!(lane.value_at(1.0), 0.0);
        assert!((lane.value_at(1.005) - 1.0).abs() < 1e-6);
        assert!((lane.value_at(1.5) - 0.8).abs() < 1e-6);
        assert!((lane.value_at(2.0) - 0.8).abs() < 1e-6);
        assert!((lane.value_at(2.035) - 0.4).abs() < 1e-4);
        assert_eq!(lane.value_at(2.1), 0.0);
    }

    #[test]
    fn test_immediate_envelope() {
        let envelope = Envelope::IMMEDIATE;
        let mut lane = timeline(envelope.attack_events(1.0));
        for event in envelope.release_events(3.0) {
            lane.push(event);
        }
        assert_eq!(lane.value_at(0.9), 0.0);
        assert_eq!(lane.value_at(1.0), 1.0);
        assert_eq!(lane.value_at(2.9), 1.0);
        assert_eq!(lane.value_at(3.0), 0.0);
    }

    #[test]
    fn test_default_settings() {
        let settings = SynthSettings::default();
        assert_eq!(settings.waveform, Waveform::Sawtooth);
        assert_eq!(settings.filter_ratio, 0.9);
        assert_eq!(settings.envelope.release, 0.07);
    }
}
