//! Step data: the sixteen fixed slots of a pattern.

use rand::Rng;
use serde::{Deserialize, Serialize};

use crate::error::CoreError;
use crate::pitch::{self, ChordType, NoteName, MAX_OCTAVE, MIN_OCTAVE};

/// Number of steps in every sequence.
pub const NUM_STEPS: usize = 16;

/// Oscillator shapes a step can play.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Waveform {
    Sine,
    Square,
    #[default]
    Sawtooth,
    Triangle,
}

impl Waveform {
    pub const ALL: [Waveform; 4] = [
        Waveform::Sine,
        Waveform::Square,
        Waveform::Sawtooth,
        Waveform::Triangle,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Waveform::Sine => "sine",
            Waveform::Square => "square",
            Waveform::Sawtooth => "sawtooth",
            Waveform::Triangle => "triangle",
        }
    }
}

/// One step of the sequence.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Step {
    pub note: NoteName,
    pub octave: i32,
    pub waveform: Waveform,
    /// Level in [0, 1]; zero means the step is skipped.
    pub volume: f64,
}

impl Step {
    /// Pitch of the step in Hz.
    pub fn frequency(&self) -> f64 {
        self.note.frequency(self.octave)
    }

    /// Whether playing this step produces a voice at all.
    pub fn is_audible(&self) -> bool {
        self.volume > 0.0 && self.frequency() > 0.0
    }

    /// Overwrite the fields present in `patch`, clamping them into range.
    pub fn apply(&mut self, patch: &StepPatch) {
        if let Some(note) = patch.note {
            self.note = note;
        }
        if let Some(octave) = patch.octave {
            self.octave = clamp_octave(octave);
        }
        if let Some(waveform) = patch.waveform {
            self.waveform = waveform;
        }
        if let Some(volume) = patch.volume {
            self.volume = clamp_volume(volume);
        }
    }
}

impl Default for Step {
    fn default() -> Self {
        Step {
            note: NoteName::A,
            octave: 4,
            waveform: Waveform::Sawtooth,
            volume: 0.5,
        }
    }
}

/// A partial step edit; absent fields leave the step unchanged.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct StepPatch {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub note: Option<NoteName>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub octave: Option<i32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub waveform: Option<Waveform>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub volume: Option<f64>,
}

impl StepPatch {
    pub fn is_empty(&self) -> bool {
        self.note.is_none() && self.octave.is_none() && self.waveform.is_none() && self.volume.is_none()
    }
}

impl From<Step> for StepPatch {
    fn from(step: Step) -> Self {
        StepPatch {
            note: Some(step.note),
            octave: Some(step.octave),
            waveform: Some(step.waveform),
            volume: Some(step.volume),
        }
    }
}

fn clamp_octave(octave: i32) -> i32 {
    let clamped = octave.clamp(MIN_OCTAVE, MAX_OCTAVE);
    if clamped != octave {
        log::warn!("octave {octave} clamped to {clamped}");
    }
    clamped
}

fn clamp_volume(volume: f64) -> f64 {
    if !volume.is_finite() {
        log::warn!("non-finite volume, muting step");
        return 0.0;
    }
    volume.clamp(0.0, 1.0)
}

/// The sixteen steps plus the number that actually play.
#[derive(Debug, Clone, PartialEq)]
pub struct Sequence {
    steps: [Step; NUM_STEPS],
    sequence_max: usize,
}

impl Sequence {
    pub fn new() -> Self {
        Sequence {
            steps: [Step::default(); NUM_STEPS],
            sequence_max: NUM_STEPS,
        }
    }

    pub fn steps(&self) -> &[Step; NUM_STEPS] {
        &self.steps
    }

    pub fn step(&self, index: usize) -> Option<&Step> {
        self.steps.get(index)
    }

    /// Number of steps played before the sequence wraps or ends.
    pub fn sequence_max(&self) -> usize {
        self.sequence_max
    }

    pub fn set_sequence_max(&mut self, n: usize) -> Result<(), CoreError> {
        if !(1..=NUM_STEPS).contains(&n) {
            return Err(CoreError::InvalidSequenceMax(n));
        }
        self.sequence_max = n;
        Ok(())
    }

    pub fn edit_step(&mut self, index: usize, patch: &StepPatch) -> Result<(), CoreError> {
        let step = self
            .steps
            .get_mut(index)
            .ok_or(CoreError::StepOutOfRange { index })?;
        step.apply(patch);
        Ok(())
    }

    /// Apply one patch to every step. An empty patch changes nothing.
    pub fn bulk_edit(&mut self, patch: &StepPatch) {
        if patch.is_empty() {
            return;
        }
        for step in &mut self.steps {
            step.apply(patch);
        }
    }

    /// Fill the first `steps` slots with random tones of a chord.
    ///
    /// Only note and octave change; waveform and volume are kept. The
    /// sequence length becomes `steps`.
    pub fn generate_random<R: Rng + ?Sized>(
        &mut self,
        root: NoteName,
        chord: ChordType,
        octave_min: i32,
        octave_max: i32,
        steps: usize,
        rng: &mut R,
    ) -> Result<(), CoreError> {
        if octave_min > octave_max {
            return Err(CoreError::InvalidOctaveRange {
                min: octave_min,
                max: octave_max,
            });
        }
        if !(1..=NUM_STEPS).contains(&steps) {
            return Err(CoreError::InvalidSequenceMax(steps));
        }
        let tones = pitch::expand_chord(root, chord.intervals(), octave_min, octave_max);
        if tones.is_empty() {
            return Err(CoreError::EmptyChord);
        }
        for step in &mut self.steps[..steps] {
            let (note, octave) = tones[rng.gen_range(0..tones.len())];
            step.note = note;
            step.octave = octave;
        }
        self.sequence_max = steps;
        Ok(())
    }
}

impl Default for Sequence {
    fn default() -> Self {
        Self::new()
    }
}
