mod load;
mod pitch;
mod save;
pub mod songs;

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

pub use load::load_score;
pub use pitch::{InvalidPitch, KeysState, Pitch};
pub use save::save_score;

/// A song: base tempo, the audio assets it references and its voices.
///
/// Field names follow the song data of the game (`baseBpm`, `startAt`, ...)
/// so existing song files load unchanged.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Score {
    pub id: String,
    pub name: String,
    #[serde(rename = "baseBpm")]
    pub base_tempo: f64,
    #[serde(default)]
    pub assets: Vec<SongAsset>,
    pub voices: Vec<Voice>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Voice {
    pub id: String,
    pub name: String,
    pub notes: Vec<Note>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum Note {
    /// Synthesised tone, or a sampled instrument when `asset_id` is set.
    #[serde(rename = "i")]
    Instrument {
        #[serde(rename = "noteName")]
        pitch: Pitch,
        #[serde(rename = "startAt")]
        start_at_bar: f64,
        #[serde(rename = "duration")]
        duration_in_bars: f64,
        #[serde(rename = "assetId", default, skip_serializing_if = "Option::is_none")]
        asset_id: Option<String>,
    },
    /// Pre-rendered clip; plays to its natural end unless capped.
    #[serde(rename = "a")]
    Asset {
        #[serde(rename = "assetId")]
        asset_id: String,
        #[serde(rename = "startAt")]
        start_at_bar: f64,
        #[serde(rename = "duration", default, skip_serializing_if = "Option::is_none")]
        duration_in_bars: Option<f64>,
    },
}

impl Note {
    pub fn instrument(pitch: Pitch, start_at_bar: f64, duration_in_bars: f64) -> Self {
        Note::Instrument {
            pitch,
            start_at_bar,
            duration_in_bars,
            asset_id: None,
        }
    }

    pub fn asset(asset_id: impl Into<String>, start_at_bar: f64, duration_in_bars: Option<f64>) -> Self {
        Note::Asset {
            asset_id: asset_id.into(),
            start_at_bar,
            duration_in_bars,
        }
    }

    pub fn start_at_bar(&self) -> f64 {
        match self {
            Note::Instrument { start_at_bar, .. } | Note::Asset { start_at_bar, .. } => {
                *start_at_bar
            }
        }
    }

    pub fn duration_in_bars(&self) -> Option<f64> {
        match self {
            Note::Instrument {
                duration_in_bars, ..
            } => Some(*duration_in_bars),
            Note::Asset {
                duration_in_bars, ..
            } => *duration_in_bars,
        }
    }

    pub fn end_at_bar(&self) -> Option<f64> {
        self.duration_in_bars()
            .map(|duration| self.start_at_bar() + duration)
    }

    pub fn is_instrument(&self) -> bool {
        matches!(self, Note::Instrument { .. })
    }

    pub fn pitch(&self) -> Option<Pitch> {
        match self {
            Note::Instrument { pitch, .. } => Some(*pitch),
            Note::Asset { .. } => None,
        }
    }

    pub fn asset_id(&self) -> Option<&str> {
        match self {
            Note::Instrument { asset_id, .. } => asset_id.as_deref(),
            Note::Asset { asset_id, .. } => Some(asset_id),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum AssetKind {
    /// Long pre-rendered track; stretched to the live tempo keeping its pitch.
    BackingTrack,
    /// Short one-shot sample (clicks, instrument samples), played verbatim.
    #[default]
    Note,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SongAsset {
    pub id: String,
    pub name: String,
    #[serde(alias = "url")]
    pub path: PathBuf,
    #[serde(rename = "type", default)]
    pub kind: AssetKind,
    #[serde(default = "default_volume")]
    pub volume: f32,
    #[serde(rename = "noteName", default, skip_serializing_if = "Option::is_none")]
    pub pitch: Option<Pitch>,
}

fn default_volume() -> f32 {
    1.0
}

impl SongAsset {
    pub fn new(id: impl Into<String>, name: impl Into<String>, path: impl Into<PathBuf>, kind: AssetKind) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            path: path.into(),
            kind,
            volume: 1.0,
            pitch: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ScoreError {
    #[error("base tempo must be a positive number of beats per minute, got {0}")]
    InvalidTempo(f64),

    #[error("voice '{voice}' note {index} starts at bar {start}; starts must be finite and >= 0")]
    InvalidStart {
        voice: String,
        index: usize,
        start: f64,
    },

    #[error("voice '{voice}' note {index} has duration {duration}; durations must be finite and > 0")]
    InvalidDuration {
        voice: String,
        index: usize,
        duration: f64,
    },

    #[error("asset '{id}' has volume {volume}; volumes must be finite and >= 0")]
    InvalidVolume { id: String, volume: f32 },
}

impl Score {
    /// Build a validated score.
    pub fn new(
        id: impl Into<String>,
        name: impl Into<String>,
        base_tempo: f64,
        assets: Vec<SongAsset>,
        voices: Vec<Voice>,
    ) -> Result<Self, ScoreError> {
        let score = Self {
            id: id.into(),
            name: name.into(),
            base_tempo,
            assets,
            voices,
        };
        score.validate()?;
        Ok(score)
    }

    pub fn validate(&self) -> Result<(), ScoreError> {
        if !(self.base_tempo.is_finite() && self.base_tempo > 0.0) {
            return Err(ScoreError::InvalidTempo(self.base_tempo));
        }

        for asset in &self.assets {
            if !(asset.volume.is_finite() && asset.volume >= 0.0) {
                return Err(ScoreError::InvalidVolume {
                    id: asset.id.clone(),
                    volume: asset.volume,
                });
            }
        }

        for voice in &self.voices {
            for (index, note) in voice.notes.iter().enumerate() {
                let start = note.start_at_bar();
                if !(start.is_finite() && start >= 0.0) {
                    return Err(ScoreError::InvalidStart {
                        voice: voice.id.clone(),
                        index,
                        start,
                    });
                }
                match note.duration_in_bars() {
                    Some(duration) if !(duration.is_finite() && duration > 0.0) => {
                        return Err(ScoreError::InvalidDuration {
                            voice: voice.id.clone(),
                            index,
                            duration,
                        });
                    }
                    _ => {}
                }
            }
        }

        Ok(())
    }

    pub fn asset(&self, id: &str) -> Option<&SongAsset> {
        self.assets.iter().find(|asset| asset.id == id)
    }

    pub fn notes(&self) -> impl Iterator<Item = (&Voice, &Note)> {
        self.voices
            .iter()
            .flat_map(|voice| voice.notes.iter().map(move |note| (voice, note)))
    }

    pub fn note_count(&self) -> usize {
        self.voices.iter().map(|voice| voice.notes.len()).sum()
    }
}

impl Voice {
    pub fn new(id: impl Into<String>, name: impl Into<String>, notes: Vec<Note>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            notes,
        }
    }

    pub fn has_instrument_notes(&self) -> bool {
        self.notes.iter().any(Note::is_instrument)
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ProjectError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Serialization error: {0}")]
    Serialize(#[from] rmp_serde::encode::Error),

    #[error("Deserialization error: {0}")]
    Deserialize(#[from] rmp_serde::decode::Error),

    #[error("Invalid score: {0}")]
    Invalid(#[from] ScoreError),
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pitch(name: &str) -> Pitch {
        name.parse().unwrap()
    }

    fn sample_score() -> Score {
        Score::new(
            "test",
            "Test Song",
            120.0,
            vec![SongAsset::new(
                "backing",
                "Backing",
                "audio/backing.mp3",
                AssetKind::BackingTrack,
            )],
            vec![
                Voice::new(
                    "piano",
                    "Piano",
                    vec![
                        Note::instrument(pitch("C3"), 0.0, 1.0),
                        Note::instrument(pitch("D3"), 1.0, 0.5),
                    ],
                ),
                Voice::new("backing", "Backing", vec![Note::asset("backing", 0.0, None)]),
            ],
        )
        .unwrap()
    }

    #[test]
    fn test_score_json_roundtrip() {
        let score = sample_score();
        let json = serde_json::to_string(&score).unwrap();
        let decoded: Score = serde_json::from_str(&json).unwrap();
        assert_eq!(decoded, score);
    }

    #[test]
    fn test_score_msgpack_roundtrip() {
        let score = sample_score();
        let bytes = rmp_serde::encode::to_vec_named(&score).unwrap();
        let decoded: Score = rmp_serde::decode::from_slice(&bytes).unwrap();
        assert_eq!(decoded, score);
    }

    #[test]
    fn test_reads_game_song_format() {
        let json = r#"{
            "id": "final",
            "name": "The Final Tech Stack",
            "baseBpm": 120,
            "assets": [
                { "id": "inst", "url": "/audio/inst.mp3", "name": "Instrumental", "type": "backingTrack", "volume": 1 }
            ],
            "voices": [
                { "id": "piano", "name": "Piano", "notes": [
                    { "type": "i", "noteName": "C#4", "startAt": 0, "duration": 0.25 }
                ]},
                { "id": "backing-track", "name": "Backing Track", "notes": [
                    { "type": "a", "assetId": "inst", "startAt": 0 }
                ]}
            ]
        }"#;

        let score: Score = serde_json::from_str(json).unwrap();
        score.validate().unwrap();
        assert_eq!(score.base_tempo, 120.0);
        assert_eq!(score.assets[0].kind, AssetKind::BackingTrack);
        assert_eq!(score.assets[0].path, PathBuf::from("/audio/inst.mp3"));
        assert_eq!(score.voices[0].notes[0].pitch(), Some(pitch("C#4")));
        assert_eq!(score.voices[1].notes[0].duration_in_bars(), None);
        assert_eq!(score.voices[1].notes[0].asset_id(), Some("inst"));
    }

    #[test]
    fn test_rejects_bad_tempo() {
        for tempo in [0.0, -60.0, f64::NAN, f64::INFINITY] {
            let err = Score::new("x", "x", tempo, vec![], vec![]).unwrap_err();
            assert!(matches!(err, ScoreError::InvalidTempo(_)));
        }
    }

    #[test]
    fn test_rejects_bad_notes() {
        let voice = Voice::new("piano", "Piano", vec![Note::instrument(pitch("C3"), 0.0, 0.0)]);
        let err = Score::new("x", "x", 60.0, vec![], vec![voice]).unwrap_err();
        assert_eq!(
            err,
            ScoreError::InvalidDuration {
                voice: "piano".into(),
                index: 0,
                duration: 0.0
            }
        );

        let voice = Voice::new("piano", "Piano", vec![Note::instrument(pitch("C3"), -1.0, 1.0)]);
        assert!(matches!(
            Score::new("x", "x", 60.0, vec![], vec![voice]),
            Err(ScoreError::InvalidStart { .. })
        ));

        let voice = Voice::new("bt", "Backing", vec![Note::asset("a", 0.0, Some(-2.0))]);
        assert!(matches!(
            Score::new("x", "x", 60.0, vec![], vec![voice]),
            Err(ScoreError::InvalidDuration { .. })
        ));
    }

    #[test]
    fn test_note_accessors() {
        let note = Note::instrument(pitch("E3"), 2.0, 1.5);
        assert_eq!(note.end_at_bar(), Some(3.5));
        assert!(note.is_instrument());
        assert_eq!(note.asset_id(), None);

        let clip = Note::asset("click", 4.0, None);
        assert_eq!(clip.end_at_bar(), None);
        assert_eq!(clip.pitch(), None);
    }

    #[test]
    fn test_score_lookups() {
        let score = sample_score();
        assert_eq!(score.note_count(), 3);
        assert!(score.asset("backing").is_some());
        assert!(score.asset("missing").is_none());
        assert!(score.voices[0].has_instrument_notes());
        assert!(!score.voices[1].has_instrument_notes());
        assert_eq!(score.notes().filter(|(_, n)| n.is_instrument()).count(), 2);
    }
}
