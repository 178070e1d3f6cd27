//! The sequencer facade: every operation a UI performs goes through here.
//!
//! [`Sequencer`] owns the audio context, the step data, the tempo, the
//! effect chain and the scheduler. Hosts call [`Sequencer::tick`] from a
//! repeating timer while [`Listener::on_ticking`] says so.

use rand::Rng;

use crate::audio::AudioContext;
use crate::config::EngineConfig;
use crate::effects::{EffectChain, EffectType, ParamPatch, SlotId};
use crate::error::CoreError;
use crate::pitch::{ChordType, NoteName};
use crate::playback::{PlaybackState, VoiceHandle};
use crate::scheduler::{Listener, Scheduler};
use crate::sequence::{Sequence, Step, StepPatch};
use crate::snapshot::{PresetSnapshot, SlotSnapshot, SnapshotPatch};
use crate::tempo::{NoteDuration, Tempo};

pub struct Sequencer<C: AudioContext, L: Listener = ()> {
    ctx: C,
    listener: L,
    config: EngineConfig,
    sequence: Sequence,
    tempo: Tempo,
    chain: EffectChain,
    scheduler: Scheduler,
    revision: u64,
}

impl<C: AudioContext> Sequencer<C> {
    pub fn new(ctx: C, config: EngineConfig) -> Result<Self, CoreError> {
        Self::with_listener(ctx, config, ())
    }
}

impl<C: AudioContext, L: Listener> Sequencer<C, L> {
    /// Build the effect chain on `ctx` with default steps and tempo.
    pub fn with_listener(mut ctx: C, config: EngineConfig, listener: L) -> Result<Self, CoreError> {
        let tempo = Tempo::default();
        let chain = EffectChain::new(&mut ctx, &config, tempo.bpm() as f64)?;
        let scheduler = Scheduler::new(&config);
        Ok(Sequencer {
            ctx,
            listener,
            config,
            sequence: Sequence::new(),
            tempo,
            chain,
            scheduler,
            revision: 0,
        })
    }

    pub fn context(&self) -> &C {
        &self.ctx
    }

    pub fn context_mut(&mut self) -> &mut C {
        &mut self.ctx
    }

    pub fn listener(&self) -> &L {
        &self.listener
    }

    pub fn listener_mut(&mut self) -> &mut L {
        &mut self.listener
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn sequence(&self) -> &Sequence {
        &self.sequence
    }

    pub fn tempo(&self) -> &Tempo {
        &self.tempo
    }

    pub fn effects(&self) -> &EffectChain {
        &self.chain
    }

    pub fn playback(&self) -> &PlaybackState {
        self.scheduler.state()
    }

    pub fn is_playing(&self) -> bool {
        self.playback().is_playing()
    }

    pub fn is_looping(&self) -> bool {
        self.playback().is_looping()
    }

    /// Bumped by every edit of sequence, tempo or effect state. Autosave
    /// keys on it.
    pub fn revision(&self) -> u64 {
        self.revision
    }

    fn touch(&mut self) {
        self.revision += 1;
    }

    fn bpm(&self) -> f64 {
        self.tempo.bpm() as f64
    }

    // --- transport ---

    pub fn play(&mut self, looping: bool) -> Result<(), CoreError> {
        self.scheduler.start(&mut self.ctx, looping, &mut self.listener)?;
        Ok(())
    }

    pub fn stop(&mut self) {
        self.scheduler.stop(&mut self.ctx, &mut self.listener);
    }

    /// Host timer callback.
    pub fn tick(&mut self) -> Result<(), CoreError> {
        let output = self.chain.input();
        self.scheduler
            .tick(&mut self.ctx, &self.sequence, &self.tempo, output, &mut self.listener)?;
        Ok(())
    }

    /// Play `step` once, immediately. `duration` defaults to the
    /// configured preview length.
    pub fn preview_step(
        &mut self,
        step: &Step,
        duration: Option<f64>,
    ) -> Result<Option<VoiceHandle>, CoreError> {
        let duration = duration.unwrap_or(self.config.preview_duration);
        let output = self.chain.input();
        Ok(self
            .scheduler
            .preview(&mut self.ctx, step, duration, output, &mut self.listener)?)
    }

    // --- tempo ---

    /// Set and clamp the BPM, then re-push every tempo-synced effect.
    pub fn set_bpm(&mut self, bpm: f64) -> Result<u32, CoreError> {
        let bpm = self.tempo.set_bpm(bpm);
        self.touch();
        self.chain.apply_all_tempo_synced(&mut self.ctx, bpm as f64)?;
        Ok(bpm)
    }

    pub fn nudge_bpm(&mut self, delta: i32) -> Result<u32, CoreError> {
        let bpm = self.tempo.bpm() as f64 + delta as f64;
        self.set_bpm(bpm)
    }

    /// Set the step length from a beat multiplier in the supported set.
    pub fn set_note_duration(&mut self, beats: f64) -> Result<(), CoreError> {
        let duration = NoteDuration::from_beats(beats).ok_or(CoreError::InvalidNoteDuration(beats))?;
        self.tempo.note_duration = duration;
        self.touch();
        let bpm = self.bpm();
        self.chain.apply_all_tempo_synced(&mut self.ctx, bpm)?;
        Ok(())
    }

    // --- steps ---

    pub fn set_sequence_max(&mut self, n: usize) -> Result<(), CoreError> {
        self.sequence.set_sequence_max(n)?;
        self.touch();
        Ok(())
    }

    pub fn edit_step(&mut self, index: usize, patch: &StepPatch) -> Result<(), CoreError> {
        self.sequence.edit_step(index, patch)?;
        self.touch();
        Ok(())
    }

    pub fn bulk_edit(&mut self, patch: &StepPatch) {
        if !patch.is_empty() {
            self.sequence.bulk_edit(patch);
            self.touch();
        }
    }

    pub fn generate_random<R: Rng + ?Sized>(
        &mut self,
        root: NoteName,
        chord: ChordType,
        octave_min: i32,
        octave_max: i32,
        steps: usize,
        rng: &mut R,
    ) -> Result<(), CoreError> {
        self.sequence
            .generate_random(root, chord, octave_min, octave_max, steps, rng)?;
        self.touch();
        Ok(())
    }

    // --- effects ---

    pub fn set_slot_active(&mut self, id: SlotId, active: bool) -> Result<(), CoreError> {
        self.touch();
        let bpm = self.bpm();
        self.chain.set_active(&mut self.ctx, id, active, bpm)?;
        Ok(())
    }

    /// Swap the effect in slot `id`. The slot comes back inactive with
    /// default params.
    pub fn set_slot_type(&mut self, id: SlotId, effect_type: EffectType) -> Result<(), CoreError> {
        self.touch();
        let bpm = self.bpm();
        self.chain.retype(&mut self.ctx, id, effect_type, bpm)?;
        Ok(())
    }

    pub fn set_slot_params(&mut self, id: SlotId, patch: &ParamPatch) -> Result<(), CoreError> {
        self.touch();
        let bpm = self.bpm();
        self.chain.set_params(&mut self.ctx, id, patch, bpm)?;
        Ok(())
    }

    // --- presets ---

    pub fn get_current_state(&self) -> PresetSnapshot {
        let states = self.chain.states();
        PresetSnapshot {
            sequence_data: self.sequence.steps().iter().copied().enumerate().collect(),
            bpm: self.tempo.bpm(),
            note_duration: self.tempo.note_duration,
            sequence_max: self.sequence.sequence_max(),
            fx_slots: SlotId::ALL
                .into_iter()
                .zip(&states)
                .map(|(id, state)| SlotSnapshot::new(id, state))
                .collect(),
        }
    }

    /// Overlay `patch` on the current state and load the result.
    pub fn apply_state(&mut self, patch: &SnapshotPatch) -> Result<(), CoreError> {
        let target = patch.apply_to(&self.get_current_state());
        self.load_snapshot(&target)
    }

    /// Replace the whole session with `snapshot`.
    ///
    /// The snapshot is validated before anything changes; an invalid one
    /// leaves the session as it was. All three effect slots are rebuilt and
    /// the chain rewired before the steps and tempo are committed. Playback
    /// keeps running; the next emitted step uses the new data.
    pub fn load_snapshot(&mut self, snapshot: &PresetSnapshot) -> Result<(), CoreError> {
        let mut sequence = self.sequence.clone();
        sequence.set_sequence_max(snapshot.sequence_max)?;
        for (index, step) in snapshot.steps().into_iter().enumerate() {
            sequence.edit_step(index, &StepPatch::from(step))?;
        }
        let mut tempo = self.tempo;
        tempo.set_bpm(snapshot.bpm as f64);
        tempo.note_duration = snapshot.note_duration;

        self.touch();
        self.chain
            .configure(&mut self.ctx, &snapshot.slot_states(), tempo.bpm() as f64)?;
        self.sequence = sequence;
        self.tempo = tempo;
        log::info!(
            "preset loaded: {} bpm, {} steps of {}",
            self.tempo.bpm(),
            self.sequence.sequence_max(),
            self.tempo.note_duration.label()
        );
        Ok(())
    }
}
