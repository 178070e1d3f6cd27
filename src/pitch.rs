//! Pitch math: note names, equal-tempered frequencies and chord expansion.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Deserializer, Serialize, Serializer};

/// Reference pitch for A4 (MIDI 69).
pub const A4_FREQUENCY: f64 = 440.0;

/// Lowest and highest octave a step may use.
pub const MIN_OCTAVE: i32 = 1;
pub const MAX_OCTAVE: i32 = 9;

/// One of the twelve pitch classes, spelled with sharps.
///
/// Flat spellings are accepted when parsing and fold onto the sharp
/// variant with the same pitch class.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum NoteName {
    C,
    CSharp,
    D,
    DSharp,
    E,
    F,
    FSharp,
    G,
    GSharp,
    A,
    ASharp,
    B,
}

impl NoteName {
    /// All pitch classes in chromatic order starting at C.
    pub const ALL: [NoteName; 12] = [
        NoteName::C,
        NoteName::CSharp,
        NoteName::D,
        NoteName::DSharp,
        NoteName::E,
        NoteName::F,
        NoteName::FSharp,
        NoteName::G,
        NoteName::GSharp,
        NoteName::A,
        NoteName::ASharp,
        NoteName::B,
    ];

    /// Semitone offset from C (0..12).
    pub fn offset(self) -> i32 {
        self as i32
    }

    /// Pitch class for a semitone offset; wraps outside 0..12.
    pub fn from_offset(offset: i32) -> NoteName {
        Self::ALL[offset.rem_euclid(12) as usize]
    }

    /// Canonical spelling, using the `♯` sign.
    pub fn as_str(self) -> &'static str {
        match self {
            NoteName::C => "C",
            NoteName::CSharp => "C♯",
            NoteName::D => "D",
            NoteName::DSharp => "D♯",
            NoteName::E => "E",
            NoteName::F => "F",
            NoteName::FSharp => "F♯",
            NoteName::G => "G",
            NoteName::GSharp => "G♯",
            NoteName::A => "A",
            NoteName::ASharp => "A♯",
            NoteName::B => "B",
        }
    }

    /// Spelling with an ASCII `#`, as shown on step buttons.
    pub fn display_ascii(self) -> String {
        self.as_str().replace('♯', "#")
    }

    /// MIDI note number of this pitch class in `octave` (C4 = 60).
    pub fn midi(self, octave: i32) -> i32 {
        (octave + 1) * 12 + self.offset()
    }

    /// Frequency in Hz at `octave`, A4 = 440 Hz.
    pub fn frequency(self, octave: i32) -> f64 {
        midi_to_frequency(self.midi(octave))
    }
}

impl fmt::Display for NoteName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Error returned when a string is not a recognised note name.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnknownNote(pub String);

impl fmt::Display for UnknownNote {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "unknown note name '{}'", self.0)
    }
}

impl std::error::Error for UnknownNote {}

impl FromStr for NoteName {
    type Err = UnknownNote;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut chars = s.chars();
        let base = match chars.next() {
            Some('C') => 0,
            Some('D') => 2,
            Some('E') => 4,
            Some('F') => 5,
            Some('G') => 7,
            Some('A') => 9,
            Some('B') => 11,
            _ => return Err(UnknownNote(s.to_string())),
        };
        let accidental = match chars.next() {
            None => 0,
            Some('#') | Some('♯') => 1,
            Some('b') | Some('♭') => -1,
            Some(_) => return Err(UnknownNote(s.to_string())),
        };
        if chars.next().is_some() {
            return Err(UnknownNote(s.to_string()));
        }
        Ok(NoteName::from_offset(base + accidental))
    }
}

impl Serialize for NoteName {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

impl<'de> Deserialize<'de> for NoteName {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

/// Convert a MIDI note number to Hz against A4 = 440.
pub fn midi_to_frequency(midi: i32) -> f64 {
    A4_FREQUENCY * 2.0_f64.powf((midi as f64 - 69.0) / 12.0)
}

/// Frequency of a note name at `octave`.
///
/// Returns `0.0` when the name is not recognised. Callers treat zero as
/// "do not sound", never as a pitch.
pub fn frequency_of(note: &str, octave: i32) -> f64 {
    match note.parse::<NoteName>() {
        Ok(name) => name.frequency(octave),
        Err(e) => {
            log::warn!("{e}");
            0.0
        }
    }
}

// ── Chords ──────────────────────────────────────────────────

/// Chord shapes offered by the random generator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ChordType {
    Major,
    Minor,
    Dominant7th,
    Major7th,
    Minor7th,
    Diminished,
    Augmented,
    Sus4,
    MajorPentatonic,
    MinorPentatonic,
}

impl ChordType {
    pub const ALL: [ChordType; 10] = [
        ChordType::Major,
        ChordType::Minor,
        ChordType::Dominant7th,
        ChordType::Major7th,
        ChordType::Minor7th,
        ChordType::Diminished,
        ChordType::Augmented,
        ChordType::Sus4,
        ChordType::MajorPentatonic,
        ChordType::MinorPentatonic,
    ];

    /// Semitone intervals above the root.
    pub fn intervals(self) -> &'static [i32] {
        match self {
            ChordType::Major => &[0, 4, 7],
            ChordType::Minor => &[0, 3, 7],
            ChordType::Dominant7th => &[0, 4, 7, 10],
            ChordType::Major7th => &[0, 4, 7, 11],
            ChordType::Minor7th => &[0, 3, 7, 10],
            ChordType::Diminished => &[0, 3, 6],
            ChordType::Augmented => &[0, 4, 8],
            ChordType::Sus4 => &[0, 5, 7],
            ChordType::MajorPentatonic => &[0, 2, 4, 7, 9],
            ChordType::MinorPentatonic => &[0, 3, 5, 7, 10],
        }
    }

    /// Key used in presets and the WASM surface.
    pub fn key(self) -> &'static str {
        match self {
            ChordType::Major => "major",
            ChordType::Minor => "minor",
            ChordType::Dominant7th => "dominant7th",
            ChordType::Major7th => "major7th",
            ChordType::Minor7th => "minor7th",
            ChordType::Diminished => "diminished",
            ChordType::Augmented => "augmented",
            ChordType::Sus4 => "sus4",
            ChordType::MajorPentatonic => "majorPentatonic",
            ChordType::MinorPentatonic => "minorPentatonic",
        }
    }
}

impl FromStr for ChordType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        ChordType::ALL
            .into_iter()
            .find(|c| c.key() == s)
            .ok_or_else(|| format!("unknown chord type '{s}'"))
    }
}

/// Every chord tone of `intervals` over `root`, for each octave in
/// `octave_min..=octave_max`.
///
/// Tones are respelled canonically (sharps) and dropped when their
/// resulting octave leaves 1..=9.
pub fn expand_chord(
    root: NoteName,
    intervals: &[i32],
    octave_min: i32,
    octave_max: i32,
) -> Vec<(NoteName, i32)> {
    let mut tones = Vec::new();
    for octave in octave_min..=octave_max {
        for &interval in intervals {
            let midi = root.midi(octave) + interval;
            let note = NoteName::from_offset(midi);
            let actual_octave = midi.div_euclid(12) - 1;
            if (MIN_OCTAVE..=MAX_OCTAVE).contains(&actual_octave) {
                tones.push((note, actual_octave));
            }
        }
    }
    tones
}
