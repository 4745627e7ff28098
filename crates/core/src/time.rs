use meloskia_transport::BEATS_PER_BAR;

#[derive(Debug, Clone, Copy, PartialEq, thiserror::Error)]
pub enum TimeError {
    #[error("tempo must be a positive number of beats per minute, got {0}")]
    InvalidTempo(f64),

    #[error("{what} must be a finite number, got {value}")]
    NotFinite { what: &'static str, value: f64 },
}

pub(crate) fn check_tempo(tempo: f64) -> Result<f64, TimeError> {
    if tempo.is_finite() && tempo > 0.0 {
        Ok(tempo)
    } else {
        Err(TimeError::InvalidTempo(tempo))
    }
}

fn check_finite(what: &'static str, value: f64) -> Result<f64, TimeError> {
    if value.is_finite() {
        Ok(value)
    } else {
        Err(TimeError::NotFinite { what, value })
    }
}

/// `bars * (60 / tempo) * 1000`
pub fn bars_to_milliseconds(bars: f64, tempo: f64) -> Result<f64, TimeError> {
    let bars = check_finite("bars", bars)?;
    let tempo = check_tempo(tempo)?;
    Ok(bars * (60.0 / tempo) * 1000.0)
}

/// `ms / (60 / tempo) / 1000`
pub fn milliseconds_to_bars(ms: f64, tempo: f64) -> Result<f64, TimeError> {
    let ms = check_finite("milliseconds", ms)?;
    let tempo = check_tempo(tempo)?;
    Ok(ms / (60.0 / tempo) / 1000.0)
}

pub fn bars_to_pixel_distance(bars: f64, tempo: f64) -> Result<f64, TimeError> {
    PixelScale::default().bars_to_pixels(bars, tempo)
}

pub fn pixel_distance_to_bars(pixels: f64, tempo: f64) -> Result<f64, TimeError> {
    PixelScale::default().pixels_to_bars(pixels, tempo)
}

/// Tempo-compensated horizontal scale of the note roll.
///
/// A fixed share `1 - dynamic_ratio` of `base_distance` per bar, plus a
/// share that grows as the tempo drops below `reference_tempo`, so fast
/// songs stay readable.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PixelScale {
    pub base_distance: f64,
    pub dynamic_ratio: f64,
    pub reference_tempo: f64,
}

impl Default for PixelScale {
    fn default() -> Self {
        Self {
            base_distance: 100.0,
            dynamic_ratio: 0.2,
            reference_tempo: 80.0,
        }
    }
}

impl PixelScale {
    pub fn pixels_per_bar(&self, tempo: f64) -> Result<f64, TimeError> {
        let tempo = check_tempo(tempo)?;
        let k = self.dynamic_ratio;
        Ok(self.base_distance * (1.0 - k + k * (self.reference_tempo / tempo)))
    }

    pub fn bars_to_pixels(&self, bars: f64, tempo: f64) -> Result<f64, TimeError> {
        let bars = check_finite("bars", bars)?;
        Ok(bars * self.pixels_per_bar(tempo)?)
    }

    pub fn pixels_to_bars(&self, pixels: f64, tempo: f64) -> Result<f64, TimeError> {
        let pixels = check_finite("pixels", pixels)?;
        Ok(pixels / self.pixels_per_bar(tempo)?)
    }
}

/// 1-based bar and beat, thousandths of a beat.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MusicalPosition {
    pub bar: u32,
    pub beat: u32,
    pub tick: u32,
}

impl MusicalPosition {
    /// Position of a beat count; negative counts clamp to the start.
    pub fn from_beats(beats: f64) -> Self {
        let beats = if beats.is_finite() { beats.max(0.0) } else { 0.0 };
        let beats_per_bar = BEATS_PER_BAR as f64;

        let bar = (beats / beats_per_bar).floor() as u32 + 1;
        let beat = (beats % beats_per_bar).floor() as u32 + 1;
        let tick = ((beats.fract() * 1000.0).floor() as u32).min(999);

        Self { bar, beat, tick }
    }
}

impl std::fmt::Display for MusicalPosition {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}.{}.{:03}", self.bar, self.beat, self.tick)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_bars_to_milliseconds() {
        assert_eq!(bars_to_milliseconds(4.0, 60.0), Ok(4000.0));
        assert_eq!(bars_to_milliseconds(1.0, 120.0), Ok(500.0));
        assert_eq!(milliseconds_to_bars(1500.0, 120.0), Ok(3.0));
    }

    #[test]
    fn test_rejects_invalid_input() {
        assert_eq!(
            bars_to_milliseconds(1.0, 0.0),
            Err(TimeError::InvalidTempo(0.0))
        );
        assert!(milliseconds_to_bars(1.0, -10.0).is_err());
        assert!(bars_to_milliseconds(f64::NAN, 120.0).is_err());
        assert!(bars_to_pixel_distance(1.0, f64::INFINITY).is_err());
        assert!(pixel_distance_to_bars(f64::NAN, 120.0).is_err());
    }

    #[test]
    fn test_pixel_scale_is_tempo_compensated() {
        // At the reference tempo the scale is the base distance.
        assert!((bars_to_pixel_distance(1.0, 80.0).unwrap() - 100.0).abs() < 1e-9);
        // 160 bpm: 100 * (0.8 + 0.2 * 0.5) = 90, not the linear 50.
        assert!((bars_to_pixel_distance(1.0, 160.0).unwrap() - 90.0).abs() < 1e-9);
        assert!((bars_to_pixel_distance(2.0, 40.0).unwrap() - 240.0).abs() < 1e-9);
    }

    #[test]
    fn test_musical_position() {
        assert_eq!(MusicalPosition::from_beats(0.0).to_string(), "1.1.000");
        assert_eq!(MusicalPosition::from_beats(5.5).to_string(), "2.2.500");
        assert_eq!(MusicalPosition::from_beats(-3.0).to_string(), "1.1.000");
    }

    proptest! {
        #[test]
        fn prop_milliseconds_roundtrip(bars in 0.0f64..10_000.0, tempo in 1.0f64..400.0) {
            let ms = bars_to_milliseconds(bars, tempo).unwrap();
            let back = milliseconds_to_bars(ms, tempo).unwrap();
            prop_assert!((back - bars).abs() <= 1e-9 * bars.max(1.0));
        }

        #[test]
        fn prop_pixel_roundtrip(bars in 0.0f64..10_000.0, tempo in 1.0f64..400.0) {
            let px = bars_to_pixel_distance(bars, tempo).unwrap();
            let back = pixel_distance_to_bars(px, tempo).unwrap();
            prop_assert!((back - bars).abs() <= 1e-9 * bars.max(1.0));
        }

        #[test]
        fn prop_milliseconds_monotonic(a in 0.0f64..1000.0, b in 0.0f64..1000.0, tempo in 1.0f64..400.0) {
            let (lo, hi) = if a <= b { (a, b) } else { (b, a) };
            prop_assert!(bars_to_milliseconds(lo, tempo).unwrap() <= bars_to_milliseconds(hi, tempo).unwrap());
        }
    }
}
