use meloskia_transport::{BEATS_PER_BAR, MetronomeDivision};

/// A metronome click on an integer beat.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Click {
    pub beat: i64,
    /// First beat of a bar.
    pub downbeat: bool,
}

impl Click {
    pub fn new(beat: i64) -> Self {
        Self {
            beat,
            downbeat: beat.rem_euclid(BEATS_PER_BAR as i64) == 0,
        }
    }
}

/// Clicks on the beats in `[from_beat, to_beat)` that `division` keeps.
pub fn clicks_in_window(
    division: MetronomeDivision,
    from_beat: f64,
    to_beat: f64,
) -> impl Iterator<Item = Click> {
    let (first, end) = if division == MetronomeDivision::Off || !(to_beat > from_beat) {
        (0, 0)
    } else {
        (from_beat.ceil() as i64, to_beat.ceil() as i64)
    };

    (first..end)
        .filter(move |&beat| division.clicks_on(beat))
        .map(Click::new)
}
