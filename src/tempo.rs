//! Tempo clock: the single conversion from musical time to seconds.

use serde::{Deserialize, Deserializer, Serialize, Serializer};

pub const MIN_BPM: u32 = 20;
pub const MAX_BPM: u32 = 300;
pub const DEFAULT_BPM: u32 = 120;

/// Tolerance used when matching a beat multiplier against the duration set.
const BEATS_EPSILON: f64 = 1e-6;

/// Clamp a BPM value into `MIN_BPM..=MAX_BPM`. Non-finite input falls
/// back to the default tempo.
pub fn clamp_bpm(bpm: f64) -> u32 {
    if !bpm.is_finite() {
        log::warn!("non-finite BPM {bpm}, using {DEFAULT_BPM}");
        return DEFAULT_BPM;
    }
    bpm.round().clamp(MIN_BPM as f64, MAX_BPM as f64) as u32
}

/// Seconds between two step onsets.
///
/// Recomputed on every scheduling iteration since BPM may change while
/// playing.
pub fn step_duration_seconds(bpm: f64, note_duration_beats: f64) -> f64 {
    (60.0 / bpm) * note_duration_beats
}

/// Period in seconds of one musical division at `bpm`.
///
/// `division` is the number of divisions per beat (4 = sixteenths).
pub fn synced_rate(bpm: f64, division: f64) -> f64 {
    60.0 / (bpm * division)
}

/// Frequency in Hz of an LFO locked to `division` pulses per beat.
pub fn lfo_frequency(bpm: f64, division: f64) -> f64 {
    (bpm / 60.0) * division
}

/// Length of one step, as a fraction or multiple of a beat.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum NoteDuration {
    Sixteenth,
    QuarterTriplet,
    Eighth,
    HalfTriplet,
    #[default]
    Quarter,
    Half,
    Whole,
}

impl NoteDuration {
    pub const ALL: [NoteDuration; 7] = [
        NoteDuration::Sixteenth,
        NoteDuration::QuarterTriplet,
        NoteDuration::Eighth,
        NoteDuration::HalfTriplet,
        NoteDuration::Quarter,
        NoteDuration::Half,
        NoteDuration::Whole,
    ];

    /// Beat multiplier.
    pub fn beats(self) -> f64 {
        match self {
            NoteDuration::Sixteenth => 0.25,
            NoteDuration::QuarterTriplet => 1.0 / 3.0,
            NoteDuration::Eighth => 0.5,
            NoteDuration::HalfTriplet => 2.0 / 3.0,
            NoteDuration::Quarter => 1.0,
            NoteDuration::Half => 2.0,
            NoteDuration::Whole => 4.0,
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            NoteDuration::Sixteenth => "1/16",
            NoteDuration::QuarterTriplet => "1/4T",
            NoteDuration::Eighth => "1/8",
            NoteDuration::HalfTriplet => "1/2T",
            NoteDuration::Quarter => "1/4",
            NoteDuration::Half => "1/2",
            NoteDuration::Whole => "1/1",
        }
    }

    /// Look up the duration whose multiplier equals `beats`.
    pub fn from_beats(beats: f64) -> Option<NoteDuration> {
        Self::ALL
            .into_iter()
            .find(|d| (d.beats() - beats).abs() < BEATS_EPSILON)
    }
}

// Presets store the bare multiplier.
impl Serialize for NoteDuration {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_f64(self.beats())
    }
}

impl<'de> Deserialize<'de> for NoteDuration {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let beats = f64::deserialize(deserializer)?;
        NoteDuration::from_beats(beats).ok_or_else(|| {
            serde::de::Error::custom(format!("{beats} is not a supported note duration"))
        })
    }
}

/// Current tempo settings, read by the scheduler and the effect chain.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Tempo {
    bpm: u32,
    pub note_duration: NoteDuration,
}

impl Tempo {
    pub fn new(bpm: f64, note_duration: NoteDuration) -> Self {
        Tempo {
            bpm: clamp_bpm(bpm),
            note_duration,
        }
    }

    pub fn bpm(&self) -> u32 {
        self.bpm
    }

    /// Set the BPM, clamped to the supported range. Returns the stored value.
    pub fn set_bpm(&mut self, bpm: f64) -> u32 {
        self.bpm = clamp_bpm(bpm);
        self.bpm
    }

    /// Shift the BPM by `delta`, clamped.
    pub fn nudge_bpm(&mut self, delta: i32) -> u32 {
        self.set_bpm(self.bpm as f64 + delta as f64)
    }

    pub fn step_duration(&self) -> f64 {
        step_duration_seconds(self.bpm as f64, self.note_duration.beats())
    }
}

impl Default for Tempo {
    fn default() -> Self {
        Tempo {
            bpm: DEFAULT_BPM,
            note_duration: NoteDuration::Quarter,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn quarter_at_120_is_half_second() {
        assert_eq!(step_duration_seconds(120.0, 1.0), 0.5);
        assert_eq!(step_duration_seconds(120.0, 0.25), 0.125);
    }

    #[test]
    fn step_duration_positive_and_decreasing_in_bpm() {
        for d in NoteDuration::ALL {
            let mut previous = f64::INFINITY;
            for bpm in MIN_BPM..=MAX_BPM {
                let s = step_duration_seconds(bpm as f64, d.beats());
                assert_eq!(s, (60.0 / bpm as f64) * d.beats());
                assert!(s > 0.0, "step duration must be positive, got {s}");
                assert!(s < previous, "step duration must fall as bpm rises ({bpm})");
                previous = s;
            }
        }
    }

    #[test]
    fn synced_rate_sixteenths() {
        assert_eq!(synced_rate(120.0, 4.0), 0.125);
        assert_eq!(synced_rate(240.0, 4.0), 0.0625);
    }

    #[test]
    fn lfo_frequency_tracks_tempo() {
        assert_eq!(lfo_frequency(120.0, 4.0), 8.0);
        assert_eq!(lfo_frequency(60.0, 1.0), 1.0);
    }

    #[test]
    fn bpm_is_clamped() {
        assert_eq!(clamp_bpm(5.0), MIN_BPM);
        assert_eq!(clamp_bpm(999.0), MAX_BPM);
        assert_eq!(clamp_bpm(f64::NAN), DEFAULT_BPM);
        let mut tempo = Tempo::default();
        assert_eq!(tempo.nudge_bpm(-200), MIN_BPM);
        assert_eq!(tempo.nudge_bpm(10), 30);
    }

    #[test]
    fn durations_match_by_multiplier() {
        assert_eq!(NoteDuration::from_beats(1.0 / 3.0), Some(NoteDuration::QuarterTriplet));
        assert_eq!(NoteDuration::from_beats(0.666_666_666_7), Some(NoteDuration::HalfTriplet));
        assert_eq!(NoteDuration::from_beats(3.0), None);
    }

    #[test]
    fn duration_serializes_as_multiplier() {
        let json = serde_json::to_string(&NoteDuration::Eighth).unwrap();
        assert_eq!(json, "0.5");
        assert!(serde_json::from_str::<NoteDuration>("0.3").is_err());
    }
}
