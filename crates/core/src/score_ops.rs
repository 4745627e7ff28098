//! Pure traversal helpers over a [`Score`].

use meloskia_project::{Note, Score, Voice};

/// Lead-in before the first instrument note, in bars.
pub const COUNTDOWN_BARS: f64 = 4.0;

/// The voice the song's length is measured on: the first voice holding
/// instrument notes, else the first voice.
pub fn primary_voice(score: &Score) -> Option<&Voice> {
    score
        .voices
        .iter()
        .find(|voice| voice.has_instrument_notes())
        .or_else(|| score.voices.first())
}

/// End of the primary voice's last note; 0 when it has none.
pub fn total_duration_in_bars(score: &Score) -> f64 {
    primary_voice(score)
        .map(|voice| {
            voice
                .notes
                .iter()
                .map(|note| note.end_at_bar().unwrap_or_else(|| note.start_at_bar()))
                .fold(0.0, f64::max)
        })
        .unwrap_or(0.0)
}

/// Song length plus the lead-in and a trailing pad of twice the lead-in.
pub fn playable_window_in_bars(score: &Score, countdown_bars: f64) -> f64 {
    total_duration_in_bars(score) + countdown_bars * 3.0
}

/// Beat at which a note sounds. Only instrument notes are shifted by the
/// lead-in; asset notes carry their own.
pub fn effective_start(note: &Note, countdown_bars: f64) -> f64 {
    match note {
        Note::Instrument { start_at_bar, .. } => start_at_bar + countdown_bars,
        Note::Asset { start_at_bar, .. } => *start_at_bar,
    }
}

/// Beat at which a note ends, when it has a duration.
pub fn effective_end(note: &Note, countdown_bars: f64) -> Option<f64> {
    note.duration_in_bars()
        .map(|duration| effective_start(note, countdown_bars) + duration)
}
