//! Songs and assets bundled with the game.

use crate::{AssetKind, Note, Pitch, Score, SongAsset, Voice};

pub const METRONOME_HIGH: &str = "metronome-01";
pub const METRONOME_LOW: &str = "metronome-02";

fn piano(notes: &[(&str, f64, f64)]) -> Voice {
    let notes = notes
        .iter()
        .filter_map(|&(name, start, duration)| {
            name.parse::<Pitch>()
                .ok()
                .map(|pitch| Note::instrument(pitch, start, duration))
        })
        .collect();
    Voice::new("piano", "Piano", notes)
}

/// Metronome clicks shared by every song.
pub fn common_assets() -> Vec<SongAsset> {
    let click = |id: &str, name: &str, path: &str, pitch: &str| SongAsset {
        pitch: pitch.parse().ok(),
        ..SongAsset::new(id, name, path, AssetKind::Note)
    };
    vec![
        click(
            METRONOME_HIGH,
            "Metronome High",
            "audio/metronome/click_high.wav",
            "G5",
        ),
        click(
            METRONOME_LOW,
            "Metronome Low",
            "audio/metronome/click_low.wav",
            "G4",
        ),
    ]
}

pub fn all_notes_demo() -> Score {
    Score {
        id: "all-notes-demo-1".into(),
        name: "All-notes Demo".into(),
        base_tempo: 160.0,
        assets: Vec::new(),
        voices: vec![piano(&[
            ("C3", 0.0, 1.0),
            ("D3", 1.0, 1.0),
            ("E3", 2.0, 1.0),
            ("F3", 3.0, 1.0),
            ("G3", 4.0, 1.0),
            ("A3", 5.0, 1.0),
            ("B3", 6.0, 1.0),
            ("C4", 7.0, 1.0),
            ("D4", 8.0, 1.0),
            ("E4", 9.0, 1.0),
            ("D#4", 10.0, 1.0),
            ("C#4", 11.0, 1.0),
            ("A#3", 12.0, 1.0),
            ("G#3", 13.0, 1.0),
            ("F#3", 14.0, 1.0),
            ("D#3", 15.0, 1.0),
            ("C#3", 16.0, 1.0),
        ])],
    }
}

pub fn all_notes_demo_reversed() -> Score {
    Score {
        id: "all-notes-demo-reversed-1".into(),
        name: "All-notes Demo (reversed)".into(),
        base_tempo: 160.0,
        assets: Vec::new(),
        voices: vec![piano(&[
            ("C#3", 0.0, 1.0),
            ("D#3", 1.0, 1.0),
            ("F#3", 2.0, 1.0),
            ("G#3", 3.0, 1.0),
            ("A#3", 4.0, 1.0),
            ("C#4", 5.0, 1.0),
            ("D#4", 6.0, 1.0),
            ("E4", 7.0, 1.0),
            ("D4", 8.0, 1.0),
            ("C4", 9.0, 1.0),
            ("B3", 10.0, 1.0),
            ("A3", 11.0, 1.0),
            ("G3", 12.0, 1.0),
            ("F3", 13.0, 1.0),
            ("E3", 14.0, 1.0),
            ("D3", 15.0, 1.0),
            ("C3", 16.0, 1.0),
        ])],
    }
}

pub fn ez_song() -> Score {
    Score {
        id: "ez-song-1".into(),
        name: "E-Z Song".into(),
        base_tempo: 60.0,
        assets: Vec::new(),
        voices: vec![piano(&[
            ("C3", 0.0, 1.0),
            ("C3", 1.5, 1.0),
            ("D3", 3.0, 1.0),
            ("D3", 4.5, 1.0),
            ("E3", 6.0, 1.0),
            ("E3", 7.5, 1.0),
            ("F3", 9.0, 1.0),
            ("F3", 10.5, 1.0),
            ("G3", 12.0, 1.0),
            ("G3", 13.5, 1.0),
            ("A3", 15.0, 1.0),
            ("A3", 16.5, 1.0),
            ("B3", 18.0, 1.0),
            ("B3", 19.5, 1.0),
            ("C4", 21.0, 1.0),
            ("C4", 22.5, 1.0),
            ("D4", 24.0, 1.0),
            ("D4", 25.5, 1.0),
            ("E4", 27.0, 1.0),
            ("E4", 28.5, 1.0),
        ])],
    }
}

pub fn the_final_tech_stack() -> Score {
    const INSTRUMENTAL: &str = "the-final-tech-stack_instrumental";

    Score {
        id: "the-final-tech-stack-1".into(),
        name: "The Final Tech Stack".into(),
        base_tempo: 120.0,
        assets: vec![
            SongAsset::new(
                INSTRUMENTAL,
                "Instrumental",
                "audio/final-tech-stack/the-final-tech-stack_instrumental.mp3",
                AssetKind::BackingTrack,
            ),
            SongAsset::new(
                "the-final-tech-stack_clicks",
                "Clicks",
                "audio/final-tech-stack/the-final-tech-stack_clicks.mp3",
                AssetKind::BackingTrack,
            ),
        ],
        voices: vec![
            piano(&[
                ("C#4", 0.0, 0.25),
                ("B3", 0.25, 0.25),
                ("C#4", 0.5, 1.0),
                ("F#3", 1.5, 1.5),
                ("D4", 4.0, 0.25),
                ("C#4", 4.25, 0.25),
                ("D4", 4.5, 0.25),
                ("C#4", 5.0, 0.25),
                ("B3", 5.5, 1.25),
                ("D4", 8.0, 0.25),
                ("C#4", 8.25, 0.25),
                ("D4", 8.5, 1.0),
                ("F#3", 9.5, 1.5),
                ("B3", 12.0, 0.25),
                ("A3", 12.25, 0.25),
                ("B3", 12.5, 0.25),
                ("A3", 13.0, 0.25),
                ("G#3", 13.5, 0.25),
                ("B3", 14.0, 0.25),
                ("A3", 14.5, 1.25),
                ("G#3", 16.0, 0.25),
                ("A3", 16.25, 0.25),
                ("B3", 16.5, 1.25),
                ("A3", 18.0, 0.25),
                ("B3", 18.25, 0.25),
                ("C#4", 18.5, 0.5),
                ("B3", 19.0, 0.5),
                ("A3", 19.5, 0.5),
                ("G#3", 20.0, 0.5),
                ("F#3", 20.5, 1.0),
                ("D4", 21.5, 1.0),
                ("C#4", 22.5, 2.0),
                ("C#4", 24.75, 0.5),
                ("D4", 25.25, 0.5),
                ("C#4", 25.75, 0.5),
                ("B3", 26.25, 0.5),
                ("C#4", 26.75, 3.0),
            ]),
            Voice::new(
                "backingTrack",
                "Backing Track",
                vec![Note::asset(INSTRUMENTAL, 0.0, None)],
            ),
        ],
    }
}

/// Every bundled song, in menu order.
pub fn builtin() -> Vec<Score> {
    vec![
        all_notes_demo(),
        all_notes_demo_reversed(),
        ez_song(),
        the_final_tech_stack(),
    ]
}

/// Look a bundled song up by id or (case-insensitive) name.
pub fn find(key: &str) -> Option<Score> {
    builtin()
        .into_iter()
        .find(|song| song.id == key || song.name.eq_ignore_ascii_case(key))
}
