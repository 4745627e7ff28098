use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

const NAMES: [&str; 12] = [
    "C", "C#", "D", "D#", "E", "F", "F#", "G", "G#", "A", "A#", "B",
];

/// A note of the equal-tempered scale, e.g. `C3` or `F#4`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Pitch {
    class: u8,
    octave: i8,
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("invalid note name '{0}'")]
pub struct InvalidPitch(pub String);

impl Pitch {
    pub const A4: Pitch = Pitch { class: 9, octave: 4 };

    pub fn new(class: u8, octave: i8) -> Option<Self> {
        (class < 12).then_some(Self { class, octave })
    }

    pub fn from_midi(note: u8) -> Self {
        Self {
            class: note % 12,
            octave: (note / 12) as i8 - 1,
        }
    }

    pub fn midi(&self) -> i32 {
        (self.octave as i32 + 1) * 12 + self.class as i32
    }

    pub fn octave(&self) -> i8 {
        self.octave
    }

    pub fn is_sharp(&self) -> bool {
        NAMES[self.class as usize].len() == 2
    }

    /// Frequency in Hz, A4 = 440.
    pub fn frequency(&self) -> f64 {
        440.0 * 2f64.powf((self.midi() - 69) as f64 / 12.0)
    }

    /// Semitone offset, `None` when it leaves the octave range.
    pub fn transpose(&self, semitones: i32) -> Option<Self> {
        let midi = self.midi() + semitones;
        let octave = i8::try_from(midi.div_euclid(12) - 1).ok()?;
        Some(Self {
            class: midi.rem_euclid(12) as u8,
            octave,
        })
    }
}

impl Ord for Pitch {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        self.midi().cmp(&other.midi())
    }
}

impl PartialOrd for Pitch {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl fmt::Display for Pitch {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}", NAMES[self.class as usize], self.octave)
    }
}

impl FromStr for Pitch {
    type Err = InvalidPitch;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = || InvalidPitch(s.to_string());
        let mut chars = s.trim().chars();

        let letter = chars.next().ok_or_else(invalid)?;
        let natural: i32 = match letter.to_ascii_uppercase() {
            'C' => 0,
            'D' => 2,
            'E' => 4,
            'F' => 5,
            'G' => 7,
            'A' => 9,
            'B' => 11,
            _ => return Err(invalid()),
        };

        let rest = chars.as_str();
        let (accidental, octave) = if let Some(octave) = rest.strip_prefix('#') {
            (1, octave)
        } else if let Some(octave) = rest.strip_prefix('b') {
            (-1, octave)
        } else {
            (0, rest)
        };

        let octave: i32 = octave.parse().map_err(|_| invalid())?;
        let midi = (octave + 1) * 12 + natural + accidental;
        let octave = i8::try_from(midi.div_euclid(12) - 1).map_err(|_| invalid())?;

        Ok(Self {
            class: midi.rem_euclid(12) as u8,
            octave,
        })
    }
}

impl TryFrom<String> for Pitch {
    type Error = InvalidPitch;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<Pitch> for String {
    fn from(pitch: Pitch) -> Self {
        pitch.to_string()
    }
}

/// Pressed flag per playable key.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct KeysState {
    keys: BTreeMap<Pitch, bool>,
}

impl KeysState {
    pub const LOWEST: Pitch = Pitch { class: 0, octave: 3 };
    pub const HIGHEST: Pitch = Pitch { class: 4, octave: 4 };

    /// The 17 keys of the on-screen keyboard, C3 to E4, all released.
    pub fn initial() -> Self {
        let keys = (Self::LOWEST.midi()..=Self::HIGHEST.midi())
            .map(|midi| (Pitch::from_midi(midi as u8), false))
            .collect();
        Self { keys }
    }

    pub fn len(&self) -> usize {
        self.keys.len()
    }

    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }

    pub fn contains(&self, pitch: Pitch) -> bool {
        self.keys.contains_key(&pitch)
    }

    pub fn is_pressed(&self, pitch: Pitch) -> bool {
        self.keys.get(&pitch).copied().unwrap_or(false)
    }

    /// Returns whether the flag changed. Unknown keys are added.
    pub fn set(&mut self, pitch: Pitch, pressed: bool) -> bool {
        self.keys.insert(pitch, pressed) != Some(pressed)
    }

    pub fn release_all(&mut self) {
        self.keys.values_mut().for_each(|pressed| *pressed = false);
    }

    pub fn pressed(&self) -> impl Iterator<Item = Pitch> + '_ {
        self.keys
            .iter()
            .filter_map(|(pitch, pressed)| pressed.then_some(*pitch))
    }

    pub fn iter(&self) -> impl Iterator<Item = (Pitch, bool)> + '_ {
        self.keys.iter().map(|(pitch, pressed)| (*pitch, *pressed))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pitch(name: &str) -> Pitch {
        name.parse().unwrap()
    }

    #[test]
    fn test_parse_and_display() {
        assert_eq!(pitch("C3").to_string(), "C3");
        assert_eq!(pitch("F#4").to_string(), "F#4");
        assert_eq!(pitch("Db4"), pitch("C#4"));
        assert_eq!(pitch("Cb4"), pitch("B3"));
        assert_eq!(pitch("B#3"), pitch("C4"));
        assert_eq!(pitch("a4"), Pitch::A4);
    }

    #[test]
    fn test_parse_rejects_garbage() {
        for name in ["", "H3", "C", "C#", "C##4", "4C"] {
            assert!(name.parse::<Pitch>().is_err(), "{name} should not parse");
        }
    }

    #[test]
    fn test_frequency() {
        assert!((Pitch::A4.frequency() - 440.0).abs() < 1e-9);
        assert!((pitch("A3").frequency() - 220.0).abs() < 1e-9);
        assert!((pitch("C4").frequency() - 261.6256).abs() < 1e-3);
        assert!((pitch("C3").frequency() - 130.8128).abs() < 1e-3);
    }

    #[test]
    fn test_ordering_follows_midi() {
        assert!(pitch("B3") < pitch("C4"));
        assert!(pitch("C#3") < pitch("D3"));
        assert_eq!(pitch("C4").midi(), 60);
        assert_eq!(Pitch::from_midi(61), pitch("C#4"));
        assert_eq!(pitch("B3").transpose(1), Some(pitch("C4")));
    }

    #[test]
    fn test_serde_as_note_name() {
        let json = serde_json::to_string(&pitch("G#3")).unwrap();
        assert_eq!(json, "\"G#3\"");
        let back: Pitch = serde_json::from_str(&json).unwrap();
        assert_eq!(back, pitch("G#3"));
        assert!(serde_json::from_str::<Pitch>("\"X9\"").is_err());
    }

    #[test]
    fn test_initial_keys() {
        let keys = KeysState::initial();
        assert_eq!(keys.len(), 17);
        assert!(keys.contains(pitch("C3")));
        assert!(keys.contains(pitch("E4")));
        assert!(!keys.contains(pitch("F4")));
        assert_eq!(keys.pressed().count(), 0);
        assert_eq!(keys.iter().filter(|(p, _)| p.is_sharp()).count(), 7);
    }

    #[test]
    fn test_press_and_release() {
        let mut keys = KeysState::initial();
        assert!(keys.set(pitch("D3"), true));
        assert!(!keys.set(pitch("D3"), true));
        assert!(keys.is_pressed(pitch("D3")));
        assert_eq!(keys.pressed().collect::<Vec<_>>(), vec![pitch("D3")]);

        keys.release_all();
        assert!(!keys.is_pressed(pitch("D3")));
    }
}
