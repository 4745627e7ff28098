use crate::time::{TimeError, check_tempo};

#[derive(Debug, Clone, Copy, PartialEq)]
struct Segment {
    clock: f64,
    beat: f64,
    tempo: f64,
}

/// Piecewise-linear mapping between audio-clock seconds and beats.
///
/// Each tempo change opens a segment anchored at a clock time, carrying the
/// beat reached there, so positions before the anchor never move. With a
/// single segment this is `(t - start) * tempo / 60`.
#[derive(Debug, Clone, PartialEq)]
pub struct TempoMap {
    segments: Vec<Segment>,
}

impl TempoMap {
    pub fn new(start_clock: f64, tempo: f64) -> Result<Self, TimeError> {
        let tempo = check_tempo(tempo)?;
        Ok(Self {
            segments: vec![Segment {
                clock: start_clock,
                beat: 0.0,
                tempo,
            }],
        })
    }

    fn first(&self) -> &Segment {
        &self.segments[0]
    }

    fn last(&self) -> &Segment {
        &self.segments[self.segments.len() - 1]
    }

    /// Clock time of beat 0.
    pub fn start_clock(&self) -> f64 {
        self.first().clock
    }

    /// Tempo of the latest segment.
    pub fn tempo(&self) -> f64 {
        self.last().tempo
    }

    pub fn segment_count(&self) -> usize {
        self.segments.len()
    }

    /// Switch to `tempo` from `clock` on. Anchors earlier than the latest
    /// segment are moved up to it.
    pub fn change_tempo(&mut self, clock: f64, tempo: f64) -> Result<(), TimeError> {
        let tempo = check_tempo(tempo)?;
        let last = *self.last();
        if tempo == last.tempo {
            return Ok(());
        }

        if clock <= last.clock {
            if let Some(segment) = self.segments.last_mut() {
                segment.tempo = tempo;
            }
            return Ok(());
        }

        let beat = self.beat_at(clock);
        self.segments.push(Segment { clock, beat, tempo });
        Ok(())
    }

    pub fn beat_at(&self, clock: f64) -> f64 {
        let index = self
            .segments
            .partition_point(|segment| segment.clock <= clock)
            .saturating_sub(1);
        let segment = &self.segments[index];
        segment.beat + (clock - segment.clock) * segment.tempo / 60.0
    }

    pub fn clock_at(&self, beat: f64) -> f64 {
        let index = self
            .segments
            .partition_point(|segment| segment.beat <= beat)
            .saturating_sub(1);
        let segment = &self.segments[index];
        segment.clock + (beat - segment.beat) * 60.0 / segment.tempo
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::time::{bars_to_milliseconds, milliseconds_to_bars};
    use proptest::prelude::*;

    #[test]
    fn test_single_segment_matches_time_conversion() {
        let map = TempoMap::new(2.0, 60.0).unwrap();
        assert_eq!(map.beat_at(2.0), 0.0);
        assert_eq!(map.beat_at(6.0), milliseconds_to_bars(4000.0, 60.0).unwrap());
        assert_eq!(
            map.clock_at(4.0),
            2.0 + bars_to_milliseconds(4.0, 60.0).unwrap() / 1000.0
        );
    }

    #[test]
    fn test_tempo_change_keeps_past_positions() {
        let mut map = TempoMap::new(0.0, 120.0).unwrap();
        map.change_tempo(2.0, 60.0).unwrap();

        assert_eq!(map.segment_count(), 2);
        assert_eq!(map.tempo(), 60.0);
        assert_eq!(map.beat_at(1.0), 2.0);
        assert_eq!(map.beat_at(2.0), 4.0);
        assert_eq!(map.beat_at(4.0), 6.0);
        assert_eq!(map.clock_at(3.0), 1.5);
        assert_eq!(map.clock_at(5.0), 3.0);
    }

    #[test]
    fn test_change_at_anchor_replaces_tempo() {
        let mut map = TempoMap::new(1.0, 120.0).unwrap();
        map.change_tempo(1.0, 90.0).unwrap();
        assert_eq!(map.segment_count(), 1);
        assert_eq!(map.tempo(), 90.0);
        assert_eq!(map.beat_at(3.0), 3.0);
    }

    #[test]
    fn test_rejects_invalid_tempo() {
        assert!(TempoMap::new(0.0, 0.0).is_err());
        let mut map = TempoMap::new(0.0, 100.0).unwrap();
        assert!(map.change_tempo(1.0, f64::NAN).is_err());
        assert_eq!(map.tempo(), 100.0);
    }

    proptest! {
        #[test]
        fn prop_clock_beat_roundtrip(
            changes in proptest::collection::vec((0.01f64..5.0, 20.0f64..300.0), 0..6),
            probe in 0.0f64..30.0,
        ) {
            let mut map = TempoMap::new(0.0, 120.0).unwrap();
            let mut clock = 0.0;
            for (delta, tempo) in changes {
                clock += delta;
                map.change_tempo(clock, tempo).unwrap();
            }
            let beat = map.beat_at(probe);
            prop_assert!((map.clock_at(beat) - probe).abs() < 1e-9);
        }

        #[test]
        fn prop_beats_increase_with_clock(
            changes in proptest::collection::vec((0.01f64..5.0, 20.0f64..300.0), 0..6),
            a in 0.0f64..30.0,
            b in 0.0f64..30.0,
        ) {
            let mut map = TempoMap::new(0.0, 120.0).unwrap();
            let mut clock = 0.0;
            for (delta, tempo) in changes {
                clock += delta;
                map.change_tempo(clock, tempo).unwrap();
            }
            let (lo, hi) = if a <= b { (a, b) } else { (b, a) };
            prop_assert!(map.beat_at(lo) <= map.beat_at(hi));
        }
    }
}
