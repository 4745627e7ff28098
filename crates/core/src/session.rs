use std::path::{Path, PathBuf};

use meloskia_engine::{AudioEngineHandle, EngineOptions, RealtimeGraph};
use meloskia_project::{Score, SongAsset, load_score, songs};
use meloskia_render::{OfflineGraph, write_wav};
use meloskia_transport::{AudioBuffer, MetronomeDivision, PlayMode};

use crate::assets::{AssetLibrary, AssetProvider};
use crate::scheduler::{Scheduler, SchedulerConfig, SchedulerError, TickReport, TransportUpdate};
use crate::score_ops::playable_window_in_bars;
use crate::time::bars_to_milliseconds;

/// The score's assets followed by the metronome clicks it does not override.
pub fn assets_for(score: &Score) -> Vec<SongAsset> {
    let mut assets = score.assets.clone();
    for click in songs::common_assets() {
        if score.asset(&click.id).is_none() {
            assets.push(click);
        }
    }
    assets
}

#[derive(Debug, Clone, Default)]
pub struct SessionOptions {
    pub engine: EngineOptions,
    pub scheduler: SchedulerConfig,
    /// Directory asset paths are resolved against.
    pub asset_root: Option<PathBuf>,
}

/// One score playing on the default output device.
pub struct Session {
    engine: AudioEngineHandle,
    scheduler: Scheduler<RealtimeGraph, AssetLibrary>,
}

impl Session {
    /// Open the output and start decoding the score's assets in the
    /// background; [`Session::start`] fails until they are ready.
    pub fn new(score: Score, options: SessionOptions) -> anyhow::Result<Self> {
        let (engine, graph) = meloskia_engine::start(options.engine)?;
        let assets = AssetLibrary::load_in_background(
            assets_for(&score),
            options.asset_root,
            engine.sample_rate,
        );
        let scheduler = Scheduler::new(score, graph, assets, options.scheduler)?;

        Ok(Self { engine, scheduler })
    }

    pub fn from_file(path: &Path, mut options: SessionOptions) -> anyhow::Result<Self> {
        let score = load_score(path)?;
        if options.asset_root.is_none() {
            options.asset_root = path.parent().map(Path::to_path_buf);
        }
        Self::new(score, options)
    }

    pub fn is_loading(&mut self) -> bool {
        self.scheduler.assets_mut().poll();
        self.scheduler.assets().is_loading()
    }

    pub fn wait_for_assets(&mut self) {
        self.scheduler.assets_mut().wait();
    }

    pub fn start(&mut self, mode: PlayMode) -> Result<(), SchedulerError> {
        self.scheduler.assets_mut().poll();
        self.scheduler.start(mode)
    }

    pub fn stop(&mut self) {
        self.scheduler.stop();
    }

    pub fn apply(&mut self, update: TransportUpdate) -> Result<(), SchedulerError> {
        self.scheduler.apply(update)
    }

    /// Called from the host loop, about once per frame.
    pub fn tick(&mut self) -> Option<TickReport> {
        self.scheduler.assets_mut().poll();
        self.scheduler.graph_mut().poll();
        self.scheduler.tick()
    }

    /// Free buffers the audio thread has released.
    pub fn collect(&mut self) {
        self.engine.collect();
    }

    pub fn scheduler(&self) -> &Scheduler<RealtimeGraph, AssetLibrary> {
        &self.scheduler
    }

    pub fn scheduler_mut(&mut self) -> &mut Scheduler<RealtimeGraph, AssetLibrary> {
        &mut self.scheduler
    }

    pub fn sample_rate(&self) -> u32 {
        self.engine.sample_rate
    }
}

#[derive(Debug, Clone)]
pub struct RenderOptions {
    pub sample_rate: u32,
    pub channels: u16,
    pub mode: PlayMode,
    /// Score tempo when `None`.
    pub tempo: Option<f64>,
    pub metronome: MetronomeDivision,
    /// Seconds of audio rendered between two ticks.
    pub tick_interval: f64,
    pub scheduler: SchedulerConfig,
}

impl Default for RenderOptions {
    fn default() -> Self {
        Self {
            sample_rate: 44100,
            channels: 2,
            mode: PlayMode::Playback,
            tempo: None,
            metronome: MetronomeDivision::Off,
            tick_interval: 0.016,
            scheduler: SchedulerConfig::default(),
        }
    }
}

/// Play a score through the scheduler into a buffer covering its playable
/// window, ticking every `tick_interval` of rendered audio.
pub fn render_offline<A: AssetProvider>(
    score: Score,
    assets: A,
    options: RenderOptions,
) -> Result<AudioBuffer, SchedulerError> {
    let sample_rate = options.sample_rate;
    let channels = options.channels.max(1);
    let window = playable_window_in_bars(&score, options.scheduler.countdown_bars);

    let graph = OfflineGraph::new(sample_rate, channels);
    let mut scheduler = Scheduler::new(score, graph, assets, options.scheduler)?;
    scheduler.apply(TransportUpdate {
        tempo: options.tempo,
        metronome: Some(options.metronome),
    })?;
    scheduler.start(options.mode)?;

    let seconds = bars_to_milliseconds(window, scheduler.tempo())? / 1000.0;
    let total_frames = (seconds * sample_rate as f64).ceil() as usize;
    let frames_per_tick = ((options.tick_interval * sample_rate as f64).round() as usize).max(1);

    let mut samples = Vec::with_capacity(total_frames * channels as usize);
    let mut rendered = 0;
    while rendered < total_frames {
        scheduler.tick();
        let frames = frames_per_tick.min(total_frames - rendered);
        scheduler.graph_mut().render_into(frames, &mut samples);
        rendered += frames;
    }
    scheduler.stop();

    tracing::info!(
        score = %scheduler.score().id,
        seconds,
        notes = scheduler.stats().notes,
        skipped = scheduler.stats().skipped_assets,
        "offline render finished"
    );

    Ok(AudioBuffer {
        samples,
        sample_rate,
        channels,
    })
}

pub fn render_to_file<A: AssetProvider>(
    score: Score,
    assets: A,
    options: RenderOptions,
    path: &Path,
) -> anyhow::Result<AudioBuffer> {
    let buffer = render_offline(score, assets, options)?;
    write_wav(&buffer, path)?;
    Ok(buffer)
}

#[cfg(test)]
mod tests {
    use super::*;
    use meloskia_project::{AssetKind, Note, Voice};
    use meloskia_transport::AudioArc;

    fn options() -> RenderOptions {
        RenderOptions {
            sample_rate: 8000,
            channels: 1,
            ..RenderOptions::default()
        }
    }

    fn one_note(tempo: f64) -> Score {
        let note = Note::instrument("C4".parse().unwrap(), 0.0, 1.0);
        Score::new("one", "One", tempo, vec![], vec![Voice::new("p", "P", vec![note])]).unwrap()
    }

    #[test]
    fn test_assets_for_adds_clicks_once() {
        let mut score = one_note(120.0);
        score.assets.push(SongAsset::new(
            songs::METRONOME_HIGH,
            "Custom",
            "custom.wav",
            AssetKind::Note,
        ));
        let assets = assets_for(&score);
        assert_eq!(assets.len(), 2);
        assert_eq!(assets[0].path, PathBuf::from("custom.wav"));
        assert_eq!(assets[1].id, songs::METRONOME_LOW);
    }

    #[test]
    fn test_render_synth_note() {
        // 240 bpm: the note sounds from 1.0 s to 1.25 s in a 3.25 s window.
        let buffer = render_offline(one_note(240.0), AssetLibrary::new(), options()).unwrap();
        assert_eq!(buffer.frames(), 26000);
        assert_eq!(buffer.channels, 1);

        let samples = &buffer.samples;
        assert!(samples[..8000].iter().all(|&s| s == 0.0));
        assert!(samples[8000..10000].iter().any(|&s| s.abs() > 0.01));
        assert!(samples[11000..].iter().all(|&s| s == 0.0));
    }

    #[test]
    fn test_render_playing_mode_skips_instrument_notes() {
        let options = RenderOptions {
            mode: PlayMode::Playing,
            ..options()
        };
        let buffer = render_offline(one_note(240.0), AssetLibrary::new(), options).unwrap();
        assert_eq!(buffer.peak(), 0.0);
    }

    #[test]
    fn test_render_metronome_clicks() {
        let mut assets = AssetLibrary::new();
        assets.insert(songs::METRONOME_HIGH, AudioArc::new(vec![0.5; 80], 8000, 1));
        assets.insert(songs::METRONOME_LOW, AudioArc::new(vec![0.25; 80], 8000, 1));
        let options = RenderOptions {
            mode: PlayMode::Playing,
            metronome: MetronomeDivision::Quarter,
            tempo: Some(60.0),
            ..options()
        };

        let buffer = render_offline(one_note(240.0), &assets, options).unwrap();
        // 13 beats at 60 bpm.
        assert_eq!(buffer.frames(), 13 * 8000);
        assert_eq!(buffer.samples[0], 0.5);
        assert_eq!(buffer.samples[79], 0.5);
        assert_eq!(buffer.samples[80], 0.0);
        assert_eq!(buffer.samples[8000], 0.25);
        assert_eq!(buffer.samples[4 * 8000], 0.5);
    }

    #[test]
    fn test_render_to_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("one.wav");
        let buffer = render_to_file(one_note(240.0), AssetLibrary::new(), options(), &path).unwrap();
        let written = std::fs::metadata(&path).unwrap().len();
        assert!(written as usize >= buffer.samples.len() * 4);
    }

    #[test]
    fn test_render_rejects_bad_tempo() {
        let options = RenderOptions {
            tempo: Some(0.0),
            ..options()
        };
        assert!(render_offline(one_note(120.0), AssetLibrary::new(), options).is_err());
    }
}
