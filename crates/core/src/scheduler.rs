//! Look-ahead note scheduler.
//!
//! Every [`Scheduler::tick`] opens the beat window between the end of what
//! was scheduled so far and `now + lookahead`, and queues each click and
//! note starting inside it against the audio clock. Windows of consecutive
//! ticks share their edge, so every note is dispatched exactly once however
//! irregular the ticks are.

use meloskia_project::{AssetKind, KeysState, Note, Pitch, Score, ScoreError, songs};
use meloskia_transport::{
    AudioArc, AudioGraph, GraphError, MetronomeDivision, NodeId, PlayMode, SourceOptions,
};

use crate::assets::AssetProvider;
use crate::metronome::{Click, clicks_in_window};
use crate::score_ops::{COUNTDOWN_BARS, effective_end, effective_start, playable_window_in_bars};
use crate::synth::{Envelope, LiveEnvelope, SynthSettings, SynthVoice};
use crate::tempo::TempoMap;
use crate::time::{MusicalPosition, TimeError, check_tempo};

#[derive(Debug, Clone, PartialEq)]
pub struct SchedulerConfig {
    /// Seconds scheduled ahead of the clock on every tick.
    pub lookahead: f64,
    /// Lead-in before instrument notes, in bars.
    pub countdown_bars: f64,
    pub main_gain: f32,
    /// Applied on top of `main_gain` for synthesised notes.
    pub synth_gain: f32,
    pub synth: SynthSettings,
    pub live_envelope: LiveEnvelope,
    pub click_high: String,
    pub click_low: String,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            lookahead: 0.15,
            countdown_bars: COUNTDOWN_BARS,
            main_gain: 1.0,
            synth_gain: 0.8,
            synth: SynthSettings::default(),
            live_envelope: LiveEnvelope::default(),
            click_high: songs::METRONOME_HIGH.to_string(),
            click_low: songs::METRONOME_LOW.to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum SchedulerError {
    #[error(transparent)]
    Time(#[from] TimeError),

    #[error(transparent)]
    Score(#[from] ScoreError),

    #[error(transparent)]
    Graph(#[from] GraphError),

    #[error("cannot start while assets are loading")]
    AssetsLoading,

    #[error("cannot start in {0} mode")]
    InvalidMode(PlayMode),

    #[error("invalid scheduler configuration: {0}")]
    InvalidConfig(String),
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TransportState {
    pub mode: PlayMode,
    pub tempo: f64,
    pub metronome: MetronomeDivision,
    /// Clock time of beat 0.
    pub start_clock_time: f64,
    /// Clock time up to which everything has been scheduled.
    pub last_scheduled_clock_time: f64,
}

/// Tempo and metronome changes applied together by [`Scheduler::apply`].
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct TransportUpdate {
    pub tempo: Option<f64>,
    pub metronome: Option<MetronomeDivision>,
}

impl TransportUpdate {
    pub fn with_tempo(mut self, tempo: f64) -> Self {
        self.tempo = Some(tempo);
        self
    }

    pub fn with_metronome(mut self, division: MetronomeDivision) -> Self {
        self.metronome = Some(division);
        self
    }
}

/// Simulated key press or release during playback.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct KeyEvent {
    pub pitch: Pitch,
    pub pressed: bool,
    /// Clock time the key changes.
    pub at: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct DispatchStats {
    pub notes: usize,
    pub clicks: usize,
    pub key_events: usize,
    pub skipped_assets: usize,
    pub failures: usize,
}

impl std::ops::AddAssign for DispatchStats {
    fn add_assign(&mut self, other: Self) {
        self.notes += other.notes;
        self.clicks += other.clicks;
        self.key_events += other.key_events;
        self.skipped_assets += other.skipped_assets;
        self.failures += other.failures;
    }
}

/// What one tick scheduled.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TickReport {
    pub from_beat: f64,
    pub to_beat: f64,
    pub dispatched: DispatchStats,
}

/// A note started by [`Scheduler::trigger_note`].
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LiveNote {
    pub pitch: Pitch,
    pub started_at: f64,
    voice: SynthVoice,
}

#[derive(Debug, Clone, Copy)]
struct Buses {
    main: NodeId,
    synth: NodeId,
}

/// A source created this session; `ends_at` is when it goes quiet on its
/// own, `None` while it is held.
#[derive(Debug, Clone, Copy)]
struct ActiveNode {
    id: NodeId,
    ends_at: Option<f64>,
}

enum Dispatch {
    Click(Click),
    Note {
        note: Note,
        start: f64,
        stop: Option<f64>,
    },
    KeyOff {
        pitch: Pitch,
        at: f64,
    },
}

type KeyCallback = Box<dyn FnMut(KeyEvent) + Send>;

pub struct Scheduler<G, A> {
    score: Score,
    graph: G,
    assets: A,
    config: SchedulerConfig,
    state: TransportState,
    tempo_map: Option<TempoMap>,
    buses: Buses,
    active: Vec<ActiveNode>,
    keys: KeysState,
    stats: DispatchStats,
    on_key_event: Option<KeyCallback>,
}

impl<G: AudioGraph, A: AssetProvider> Scheduler<G, A> {
    /// Validate the score and config and create the output buses.
    pub fn new(
        score: Score,
        mut graph: G,
        assets: A,
        config: SchedulerConfig,
    ) -> Result<Self, SchedulerError> {
        score.validate()?;
        if !(config.lookahead.is_finite() && config.lookahead > 0.0) {
            return Err(SchedulerError::InvalidConfig(format!(
                "lookahead must be positive, got {}",
                config.lookahead
            )));
        }
        if !(config.countdown_bars.is_finite() && config.countdown_bars >= 0.0) {
            return Err(SchedulerError::InvalidConfig(format!(
                "countdown must be >= 0 bars, got {}",
                config.countdown_bars
            )));
        }

        // Both buses feed the destination so the host keeps them alive.
        let destination = graph.destination();
        let main = graph.create_gain(config.main_gain)?;
        graph.connect(main, destination)?;
        let synth = graph.create_gain(config.main_gain * config.synth_gain)?;
        graph.connect(synth, destination)?;

        let state = TransportState {
            mode: PlayMode::Idle,
            tempo: score.base_tempo,
            metronome: MetronomeDivision::Off,
            start_clock_time: 0.0,
            last_scheduled_clock_time: 0.0,
        };

        Ok(Self {
            score,
            graph,
            assets,
            config,
            state,
            tempo_map: None,
            buses: Buses { main, synth },
            active: Vec::new(),
            keys: KeysState::initial(),
            stats: DispatchStats::default(),
            on_key_event: None,
        })
    }

    /// Install the key highlight callback used during playback.
    pub fn on_key_event(&mut self, callback: impl FnMut(KeyEvent) + Send + 'static) {
        self.on_key_event = Some(Box::new(callback));
    }

    pub fn score(&self) -> &Score {
        &self.score
    }

    pub fn graph(&self) -> &G {
        &self.graph
    }

    pub fn graph_mut(&mut self) -> &mut G {
        &mut self.graph
    }

    pub fn assets(&self) -> &A {
        &self.assets
    }

    pub fn assets_mut(&mut self) -> &mut A {
        &mut self.assets
    }

    pub fn config(&self) -> &SchedulerConfig {
        &self.config
    }

    pub fn state(&self) -> &TransportState {
        &self.state
    }

    pub fn mode(&self) -> PlayMode {
        self.state.mode
    }

    pub fn tempo(&self) -> f64 {
        self.state.tempo
    }

    pub fn metronome(&self) -> MetronomeDivision {
        self.state.metronome
    }

    pub fn keys(&self) -> &KeysState {
        &self.keys
    }

    /// Totals since the last start.
    pub fn stats(&self) -> DispatchStats {
        self.stats
    }

    /// Sources of this session that may still sound.
    pub fn active_nodes(&self) -> usize {
        self.active.len()
    }

    /// Apply tempo and metronome changes as one update.
    ///
    /// A new tempo holds from the end of what is already scheduled; queued
    /// nodes keep their times.
    pub fn apply(&mut self, update: TransportUpdate) -> Result<(), SchedulerError> {
        let tempo = update.tempo.map(check_tempo).transpose()?;

        if let Some(tempo) = tempo.filter(|&tempo| tempo != self.state.tempo) {
            if let Some(map) = self.tempo_map.as_mut() {
                map.change_tempo(self.state.last_scheduled_clock_time, tempo)?;
            }
            tracing::info!(from = self.state.tempo, to = tempo, "tempo changed");
            self.state.tempo = tempo;
        }

        if let Some(division) = update
            .metronome
            .filter(|&division| division != self.state.metronome)
        {
            tracing::info!(clicks_per_bar = division.clicks_per_bar(), "metronome changed");
            self.state.metronome = division;
        }

        Ok(())
    }

    pub fn set_tempo(&mut self, tempo: f64) -> Result<(), SchedulerError> {
        self.apply(TransportUpdate::default().with_tempo(tempo))
    }

    pub fn set_metronome_division(&mut self, division: MetronomeDivision) {
        // Without a tempo the update cannot fail.
        let _ = self.apply(TransportUpdate::default().with_metronome(division));
    }

    /// Start, or restart, from beat 0 at the current clock time.
    pub fn start(&mut self, mode: PlayMode) -> Result<(), SchedulerError> {
        if !mode.is_active() {
            return Err(SchedulerError::InvalidMode(mode));
        }
        if self.assets.is_loading() {
            return Err(SchedulerError::AssetsLoading);
        }

        let now = self.graph.current_time();
        let tempo_map = TempoMap::new(now, self.state.tempo)?;

        if self.state.mode.is_active() {
            self.silence(now);
            self.release_keys(now);
        }

        self.tempo_map = Some(tempo_map);
        self.state.mode = mode;
        self.state.start_clock_time = now;
        self.state.last_scheduled_clock_time = now;
        self.stats = DispatchStats::default();

        tracing::info!(
            score = %self.score.id,
            %mode,
            tempo = self.state.tempo,
            at = now,
            "transport started"
        );
        Ok(())
    }

    /// Silence everything this session scheduled. Idempotent.
    pub fn stop(&mut self) {
        if !self.state.mode.is_active() {
            return;
        }
        let now = self.graph.current_time();
        self.silence(now);
        self.release_keys(now);
        self.tempo_map = None;
        self.state.mode = PlayMode::Idle;
        tracing::info!(score = %self.score.id, at = now, "transport stopped");
    }

    /// Beats since start, `None` while idle.
    pub fn current_beat(&self) -> Option<f64> {
        if !self.state.mode.is_active() {
            return None;
        }
        self.tempo_map
            .as_ref()
            .map(|map| map.beat_at(self.graph.current_time()))
    }

    pub fn position(&self) -> Option<MusicalPosition> {
        self.current_beat().map(MusicalPosition::from_beats)
    }

    /// Whether the clock has passed the end of the playable window.
    pub fn is_finished(&self) -> bool {
        self.current_beat().is_some_and(|beat| {
            beat >= playable_window_in_bars(&self.score, self.config.countdown_bars)
        })
    }

    /// Schedule everything starting in the newly opened window.
    ///
    /// `None` while idle or when the clock has not moved; failures are
    /// logged and counted, never returned.
    pub fn tick(&mut self) -> Option<TickReport> {
        if !self.state.mode.is_active() {
            return None;
        }
        let map = self.tempo_map.as_ref()?;

        let now = self.graph.current_time();
        let ahead = now + self.config.lookahead;
        if ahead <= self.state.last_scheduled_clock_time {
            return None;
        }

        let from_beat = map.beat_at(self.state.last_scheduled_clock_time);
        let to_beat = map.beat_at(ahead);
        let plan = self.plan(map, from_beat, to_beat);

        self.active
            .retain(|node| node.ends_at.is_none_or(|end| end > now));

        let mut dispatched = DispatchStats::default();
        for item in plan {
            match item {
                Dispatch::Click(click) => self.dispatch_click(click, &mut dispatched),
                Dispatch::Note { note, start, stop } => {
                    self.dispatch_note(&note, start, stop, &mut dispatched)
                }
                Dispatch::KeyOff { pitch, at } => {
                    self.emit_key(KeyEvent {
                        pitch,
                        pressed: false,
                        at,
                    });
                    dispatched.key_events += 1;
                }
            }
        }

        self.state.last_scheduled_clock_time = ahead;
        self.stats += dispatched;

        Some(TickReport {
            from_beat,
            to_beat,
            dispatched,
        })
    }

    fn plan(&self, map: &TempoMap, from_beat: f64, to_beat: f64) -> Vec<Dispatch> {
        let in_window = |beat: f64| beat >= from_beat && beat < to_beat;
        let countdown = self.config.countdown_bars;
        let playback = self.state.mode == PlayMode::Playback;

        let mut plan: Vec<Dispatch> =
            clicks_in_window(self.state.metronome, from_beat, to_beat)
                .map(Dispatch::Click)
                .collect();

        let mut key_offs = Vec::new();
        for (_, note) in self.score.notes() {
            if note.is_instrument() && !playback {
                continue;
            }

            let start_beat = effective_start(note, countdown);
            let end_beat = effective_end(note, countdown);
            if in_window(start_beat) {
                plan.push(Dispatch::Note {
                    note: note.clone(),
                    start: map.clock_at(start_beat),
                    stop: end_beat.map(|beat| map.clock_at(beat)),
                });
            }

            if let (Some(pitch), Some(end_beat)) = (note.pitch(), end_beat) {
                if in_window(end_beat) {
                    key_offs.push(Dispatch::KeyOff {
                        pitch,
                        at: map.clock_at(end_beat),
                    });
                }
            }
        }

        plan.extend(key_offs);
        plan
    }

    fn dispatch_click(&mut self, click: Click, dispatched: &mut DispatchStats) {
        let Some(map) = self.tempo_map.as_ref() else {
            return;
        };
        let at = map.clock_at(click.beat as f64);
        let id = if click.downbeat {
            self.config.click_high.clone()
        } else {
            self.config.click_low.clone()
        };

        let Some(audio) = self.assets.get_asset(&id) else {
            tracing::debug!(asset = %id, beat = click.beat, "click asset not ready, skipped");
            dispatched.skipped_assets += 1;
            return;
        };

        let volume = self.asset_volume(&id);
        match self.play_buffer(audio, SourceOptions::default(), volume, at, None) {
            Ok(_) => dispatched.clicks += 1,
            Err(err) => {
                tracing::warn!(beat = click.beat, "failed to schedule click: {err}");
                dispatched.failures += 1;
            }
        }
    }

    fn dispatch_note(
        &mut self,
        note: &Note,
        start: f64,
        stop: Option<f64>,
        dispatched: &mut DispatchStats,
    ) {
        let result = match note {
            Note::Asset { asset_id, .. } => self.play_asset_note(asset_id, start, stop),
            Note::Instrument {
                asset_id: Some(asset_id),
                ..
            } => self.play_sampled_note(asset_id, start, stop),
            Note::Instrument { pitch, .. } => self.play_synth_note(*pitch, start, stop),
        };

        match result {
            Ok(true) => {
                dispatched.notes += 1;
                tracing::debug!(start, ?stop, "note scheduled");
            }
            Ok(false) => {
                tracing::debug!(
                    asset = note.asset_id().unwrap_or_default(),
                    start,
                    "asset not ready, note skipped"
                );
                dispatched.skipped_assets += 1;
            }
            Err(err) => {
                tracing::warn!(start, "failed to schedule note: {err}");
                dispatched.failures += 1;
            }
        }

        if let Some(pitch) = note.pitch() {
            self.emit_key(KeyEvent {
                pitch,
                pressed: true,
                at: start,
            });
            dispatched.key_events += 1;
        }
    }

    /// `Ok(false)` when the asset is not ready.
    fn play_asset_note(
        &mut self,
        asset_id: &str,
        start: f64,
        stop: Option<f64>,
    ) -> Result<bool, GraphError> {
        let Some(audio) = self.assets.get_asset(asset_id) else {
            return Ok(false);
        };

        let kind = self
            .score
            .asset(asset_id)
            .map(|asset| asset.kind)
            .unwrap_or_default();
        let options = match kind {
            AssetKind::BackingTrack => SourceOptions {
                playback_rate: self.state.tempo / self.score.base_tempo,
                preserve_pitch: true,
            },
            AssetKind::Note => SourceOptions::default(),
        };

        let volume = self.asset_volume(asset_id);
        self.play_buffer(audio, options, volume, start, stop)?;
        Ok(true)
    }

    fn play_sampled_note(&mut self, asset_id: &str, start: f64, stop: Option<f64>) -> Result<bool, GraphError> {
        let Some(audio) = self.assets.get_asset(asset_id) else {
            return Ok(false);
        };
        let volume = self.asset_volume(asset_id);
        self.play_buffer(audio, SourceOptions::default(), volume, start, stop)?;
        Ok(true)
    }

    fn play_synth_note(&mut self, pitch: Pitch, start: f64, stop: Option<f64>) -> Result<bool, GraphError> {
        let settings = self.config.synth;
        let voice = SynthVoice::build(
            &mut self.graph,
            self.buses.synth,
            pitch.frequency() as f32,
            &settings,
        )?;
        let tracked = self.track(voice.oscillator);
        voice.start(&mut self.graph, start, &settings.envelope)?;

        if let Some(stop) = stop {
            let end = voice.release(&mut self.graph, stop, &settings.envelope)?;
            self.active[tracked].ends_at = Some(end);
        }
        Ok(true)
    }

    fn play_buffer(
        &mut self,
        audio: AudioArc,
        options: SourceOptions,
        volume: f32,
        start: f64,
        stop: Option<f64>,
    ) -> Result<NodeId, GraphError> {
        let natural_end = start + audio.duration_secs() / options.playback_rate;
        let source = self.graph.create_buffer_source(audio, options)?;
        let tracked = self.track(source);

        if volume != 1.0 {
            let gain = self.graph.create_gain(volume)?;
            self.graph.connect(source, gain)?;
            self.graph.connect(gain, self.buses.main)?;
        } else {
            self.graph.connect(source, self.buses.main)?;
        }

        self.graph.start(source, start)?;
        if let Some(stop) = stop {
            self.graph.stop(source, stop)?;
        }

        self.active[tracked].ends_at = Some(stop.map_or(natural_end, |stop| stop.min(natural_end)));
        Ok(source)
    }

    /// Track a source from creation, held until its stop is known, so a
    /// failed stop still leaves it for [`Scheduler::stop`] to silence.
    fn track(&mut self, id: NodeId) -> usize {
        self.active.push(ActiveNode { id, ends_at: None });
        self.active.len() - 1
    }

    fn asset_volume(&self, id: &str) -> f32 {
        self.score.asset(id).map_or(1.0, |asset| asset.volume)
    }

    fn live_envelope(&self) -> Envelope {
        match self.config.live_envelope {
            LiveEnvelope::Shaped => self.config.synth.envelope,
            LiveEnvelope::Immediate => Envelope::IMMEDIATE,
        }
    }

    /// Start a synthesised note now, for live play.
    pub fn trigger_note(&mut self, pitch: Pitch) -> Result<LiveNote, SchedulerError> {
        let now = self.graph.current_time();
        let envelope = self.live_envelope();
        let voice = SynthVoice::build(
            &mut self.graph,
            self.buses.synth,
            pitch.frequency() as f32,
            &self.config.synth,
        )?;
        self.track(voice.oscillator);
        voice.start(&mut self.graph, now, &envelope)?;
        tracing::debug!(%pitch, at = now, "live note on");

        Ok(LiveNote {
            pitch,
            started_at: now,
            voice,
        })
    }

    /// Release a live note now; returns when it stops sounding.
    pub fn release_note(&mut self, note: LiveNote) -> Result<f64, SchedulerError> {
        let now = self.graph.current_time().max(note.started_at);
        let envelope = self.live_envelope();
        let end = note.voice.release(&mut self.graph, now, &envelope)?;

        if let Some(active) = self
            .active
            .iter_mut()
            .find(|active| active.id == note.voice.oscillator)
        {
            active.ends_at = Some(end);
        }
        tracing::debug!(pitch = %note.pitch, at = now, "live note off");
        Ok(end)
    }

    fn silence(&mut self, now: f64) {
        for node in std::mem::take(&mut self.active) {
            if node.ends_at.is_some_and(|end| end <= now) {
                continue;
            }
            match self.graph.stop(node.id, now) {
                Ok(()) => {}
                Err(GraphError::UnknownNode(id)) => {
                    tracing::debug!(node = %id, "node already retired");
                }
                Err(err) => {
                    tracing::warn!(node = %node.id, "failed to stop node: {err}");
                    self.stats.failures += 1;
                }
            }
        }
    }

    fn release_keys(&mut self, now: f64) {
        let pressed: Vec<Pitch> = self.keys.pressed().collect();
        for pitch in pressed {
            self.emit_key(KeyEvent {
                pitch,
                pressed: false,
                at: now,
            });
        }
    }

    fn emit_key(&mut self, event: KeyEvent) {
        self.keys.set(event.pitch, event.pressed);
        if let Some(callback) = self.on_key_event.as_mut() {
            callback(event);
        }
    }
}
