use std::sync::Arc;

use rubato::{
    Resampler, SincFixedIn, SincInterpolationParameters, SincInterpolationType, WindowFunction,
};

pub mod graph;

pub use graph::{
    AudioClock, AudioGraph, FilterKind, GraphCommand, GraphError, NodeClass, NodeId, NodeKind,
    NodeRegistry, ParamEvent, ParamTimeline, SourceOptions, Waveform,
};

/// Beats grouped into one bar for metronome accents and position display.
pub const BEATS_PER_BAR: u32 = 4;

/// Owned interleaved audio, as produced by decoders and offline renders.
#[derive(Debug, Clone)]
pub struct AudioBuffer {
    pub samples: Vec<f32>,
    pub sample_rate: u32,
    pub channels: u16,
}

impl AudioBuffer {
    pub fn frames(&self) -> usize {
        self.samples.len() / self.channels.max(1) as usize
    }

    pub fn duration_secs(&self) -> f64 {
        self.frames() as f64 / self.sample_rate as f64
    }

    /// Largest absolute sample value.
    pub fn peak(&self) -> f32 {
        self.samples.iter().fold(0.0f32, |peak, s| peak.max(s.abs()))
    }
}

/// Shared, immutable decoded audio.
///
/// Cloning only bumps a reference count, so a decoded asset can back any
/// number of buffer-source nodes at once.
///
/// ```
/// use meloskia_transport::AudioArc;
///
/// let audio = AudioArc::new(vec![0.0, 0.5, 1.0, 0.5], 44100, 2);
/// let shared = audio.clone();
/// assert_eq!(shared.frames(), 2);
/// ```
#[derive(Clone)]
pub struct AudioArc {
    /// Interleaved samples, [L, R, L, R, ...] for stereo.
    samples: Arc<[f32]>,
    sample_rate: u32,
    channels: u16,
}

impl AudioArc {
    /// # Panics
    ///
    /// Panics if `channels` is 0 or if `samples.len()` is not divisible by `channels`.
    pub fn new(samples: Vec<f32>, sample_rate: u32, channels: u16) -> Self {
        Self::from_arc(Arc::from(samples), sample_rate, channels)
    }

    /// # Panics
    ///
    /// Same conditions as [`AudioArc::new`].
    pub fn from_arc(samples: Arc<[f32]>, sample_rate: u32, channels: u16) -> Self {
        assert!(channels > 0, "channels must be greater than 0");
        assert_eq!(
            samples.len() % channels as usize,
            0,
            "samples.len() must be divisible by channels"
        );
        Self {
            samples,
            sample_rate,
            channels,
        }
    }

    pub fn from_audio_buffer(buffer: AudioBuffer) -> Self {
        Self::new(buffer.samples, buffer.sample_rate, buffer.channels)
    }

    #[inline]
    pub fn samples(&self) -> &[f32] {
        &self.samples
    }

    pub fn samples_arc(&self) -> &Arc<[f32]> {
        &self.samples
    }

    #[inline]
    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    #[inline]
    pub fn channels(&self) -> u16 {
        self.channels
    }

    /// Number of frames (samples per channel).
    #[inline]
    pub fn frames(&self) -> usize {
        self.samples.len() / self.channels as usize
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.samples.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    pub fn duration_secs(&self) -> f64 {
        self.frames() as f64 / self.sample_rate as f64
    }

    /// Mono mix-down of a single frame; 0.0 past the end.
    #[inline]
    pub fn mono_frame(&self, frame: usize) -> f32 {
        let channels = self.channels as usize;
        let base = frame * channels;
        if base + channels > self.samples.len() {
            return 0.0;
        }
        self.samples[base..base + channels].iter().sum::<f32>() / channels as f32
    }

    /// Linearly interpolated mono value at a fractional frame position.
    pub fn mono_at(&self, position: f64) -> f32 {
        if position < 0.0 {
            return 0.0;
        }
        let index = position.floor() as usize;
        let fraction = (position - position.floor()) as f32;
        let current = self.mono_frame(index);
        if index + 1 >= self.frames() {
            return current;
        }
        let next = self.mono_frame(index + 1);
        current + (next - current) * fraction
    }

    /// # Panics
    ///
    /// Panics if `channel` is >= `self.channels()`.
    pub fn channel(&self, channel: usize) -> impl Iterator<Item = f32> + '_ {
        assert!(
            channel < self.channels as usize,
            "channel index out of bounds"
        );
        let channels = self.channels as usize;
        (0..self.frames()).map(move |frame| self.samples[frame * channels + channel])
    }

    /// Resample to `target_sample_rate`; a cheap clone when the rate already matches.
    pub fn resample(&self, target_sample_rate: u32) -> anyhow::Result<Self> {
        if self.sample_rate == target_sample_rate {
            return Ok(self.clone());
        }

        resample_audio_arc(self, target_sample_rate)
    }
}

impl std::fmt::Debug for AudioArc {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AudioArc")
            .field("frames", &self.frames())
            .field("sample_rate", &self.sample_rate)
            .field("channels", &self.channels)
            .field("duration_secs", &self.duration_secs())
            .finish()
    }
}

/// Sinc resampling of an `AudioArc` with rubato.
pub fn resample_audio_arc(audio: &AudioArc, target_sample_rate: u32) -> anyhow::Result<AudioArc> {
    if audio.sample_rate == target_sample_rate {
        return Ok(audio.clone());
    }
    if audio.is_empty() {
        return Ok(AudioArc::new(Vec::new(), target_sample_rate, audio.channels));
    }

    let channels = audio.channels as usize;
    let input_frames = audio.frames();
    let resample_ratio = target_sample_rate as f64 / audio.sample_rate as f64;

    // rubato wants one Vec per channel
    let mut input_channels = vec![Vec::with_capacity(input_frames); channels];
    for frame in audio.samples().chunks_exact(channels) {
        for (ch, sample) in frame.iter().enumerate() {
            input_channels[ch].push(*sample);
        }
    }

    let params = SincInterpolationParameters {
        sinc_len: 256,
        f_cutoff: 0.95,
        interpolation: SincInterpolationType::Linear,
        oversampling_factor: 256,
        window: WindowFunction::BlackmanHarris2,
    };

    let mut resampler =
        SincFixedIn::<f32>::new(resample_ratio, 2.0, params, input_frames, channels)?;
    let output_channels = resampler.process(&input_channels, None)?;

    let output_frames = output_channels[0].len();
    let mut output_samples = Vec::with_capacity(output_frames * channels);
    for frame_idx in 0..output_frames {
        for channel in &output_channels {
            output_samples.push(channel[frame_idx]);
        }
    }

    Ok(AudioArc::new(output_samples, target_sample_rate, audio.channels))
}

/// What the scheduler is doing with the score.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PlayMode {
    #[default]
    Idle,
    /// The user performs live; only backing assets and the metronome auto-play.
    Playing,
    /// Fully automated performance.
    Playback,
}

impl PlayMode {
    pub fn is_active(&self) -> bool {
        !matches!(self, PlayMode::Idle)
    }
}

impl std::fmt::Display for PlayMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            PlayMode::Idle => "idle",
            PlayMode::Playing => "playing",
            PlayMode::Playback => "playback",
        };
        f.write_str(name)
    }
}

impl std::str::FromStr for PlayMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "idle" => Ok(PlayMode::Idle),
            "playing" | "live" => Ok(PlayMode::Playing),
            "playback" | "auto" => Ok(PlayMode::Playback),
            other => Err(format!("unknown play mode '{other}'")),
        }
    }
}

/// Metronome subdivision, encoded as clicks per bar `{0, 1, 2, 4}`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum MetronomeDivision {
    #[default]
    Off,
    Whole,
    Half,
    Quarter,
}

impl MetronomeDivision {
    pub fn clicks_per_bar(&self) -> u32 {
        match self {
            MetronomeDivision::Off => 0,
            MetronomeDivision::Whole => 1,
            MetronomeDivision::Half => 2,
            MetronomeDivision::Quarter => 4,
        }
    }

    /// Beats between two clicks, `None` when off.
    pub fn beat_interval(&self) -> Option<u32> {
        match self.clicks_per_bar() {
            0 => None,
            clicks => Some(BEATS_PER_BAR / clicks),
        }
    }

    /// Whether an integer beat index carries a click.
    pub fn clicks_on(&self, beat: i64) -> bool {
        self.beat_interval()
            .is_some_and(|interval| beat.rem_euclid(interval as i64) == 0)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("metronome division must be one of 0, 1, 2 or 4 clicks per bar, got {0}")]
pub struct InvalidDivision(pub u8);

impl TryFrom<u8> for MetronomeDivision {
    type Error = InvalidDivision;

    fn try_from(clicks: u8) -> Result<Self, Self::Error> {
        match clicks {
            0 => Ok(MetronomeDivision::Off),
            1 => Ok(MetronomeDivision::Whole),
            2 => Ok(MetronomeDivision::Half),
            4 => Ok(MetronomeDivision::Quarter),
            other => Err(InvalidDivision(other)),
        }
    }
}

impl From<MetronomeDivision> for u8 {
    fn from(division: MetronomeDivision) -> Self {
        division.clicks_per_bar() as u8
    }
}


#[cfg(test)]
mod transport_tests {
    use super::*;

    #[test]
    fn test_division_encoding() {
        for clicks in [0u8, 1, 2, 4] {
            let division = MetronomeDivision::try_from(clicks).unwrap();
            assert_eq!(u8::from(division), clicks);
        }
        assert_eq!(MetronomeDivision::try_from(3), Err(InvalidDivision(3)));
    }

    #[test]
    fn test_division_clicks_on() {
        let quarter = MetronomeDivision::Quarter;
        assert!((0..4).all(|beat| quarter.clicks_on(beat)));

        let half = MetronomeDivision::Half;
        assert!(half.clicks_on(0) && !half.clicks_on(1) && half.clicks_on(2));

        let whole = MetronomeDivision::Whole;
        assert_eq!((0..16).filter(|b| whole.clicks_on(*b)).count(), 4);

        assert!((0..16).all(|beat| !MetronomeDivision::Off.clicks_on(beat)));
    }

    #[test]
    fn test_play_mode_parse() {
        assert_eq!("playback".parse::<PlayMode>(), Ok(PlayMode::Playback));
        assert_eq!("Playing".parse::<PlayMode>(), Ok(PlayMode::Playing));
        assert!("paused".parse::<PlayMode>().is_err());
        assert!(!PlayMode::Idle.is_active());
        assert!(PlayMode::Playback.is_active());
    }
}
