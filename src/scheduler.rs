//! Look-ahead voice scheduler.
//!
//! A coarse host timer calls [`Scheduler::tick`]. Each tick schedules
//! every step whose onset falls inside the look-ahead window onto the
//! audio clock, so timing precision comes from the audio device rather
//! than from the timer.
//!
//! ```text
//!   Idle ──start──▶ Running ──stop──▶ Idle
//!    │               │  ▲
//!    │  (suspended)  │  └── tick: schedule, wrap when looping
//!    └──▶ Resuming ──┘
//!                    └── one-shot pass reaches its end ──▶ Idle
//! ```

use crate::audio::{AudioContext, ContextState, NodeId};
use crate::config::EngineConfig;
use crate::error::AudioError;
use crate::playback::{PendingPreview, PlaybackState, Transport, VoiceHandle};
use crate::sequence::{Sequence, Step};
use crate::tempo::Tempo;
use crate::voice::{release_voice, silence_voice, spawn_voice};

/// Callbacks from the scheduler to whoever draws the UI.
///
/// Every method has an empty default so hosts implement only what they
/// display.
pub trait Listener {
    /// Step `index` will sound at audio time `at` for `duration` seconds.
    fn on_step_highlight(&mut self, _index: usize, _duration: f64, _at: f64) {}
    /// The audio clock passed a voice's start. `step` is `None` for
    /// previews.
    fn on_voice_start(&mut self, _voice: VoiceHandle, _step: Option<usize>, _at: f64) {}
    fn on_voice_end(&mut self, _voice: VoiceHandle, _step: Option<usize>, _at: f64) {}
    fn on_clear_highlights(&mut self) {}
    /// Arm (`true`) or cancel (`false`) the host's repeating tick timer.
    fn on_ticking(&mut self, _active: bool) {}
}

impl Listener for () {}

#[derive(Debug)]
pub struct Scheduler {
    state: PlaybackState,
    config: EngineConfig,
}

impl Scheduler {
    pub fn new(config: &EngineConfig) -> Self {
        Scheduler {
            state: PlaybackState::new(),
            config: config.clone(),
        }
    }

    pub fn state(&self) -> &PlaybackState {
        &self.state
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Idle → Running. A start while already running restarts from step 0.
    ///
    /// When the context is suspended a resume is requested first; if it
    /// does not complete immediately the transport waits in
    /// [`Transport::Resuming`] for a later tick.
    pub fn start<C, L>(&mut self, ctx: &mut C, looping: bool, listener: &mut L) -> Result<(), AudioError>
    where
        C: AudioContext + ?Sized,
        L: Listener + ?Sized,
    {
        if self.state.transport.is_active() {
            self.stop(ctx, listener);
        }
        let running = ensure_running(ctx)?;
        if self.state.arm_tick() {
            listener.on_ticking(true);
        }
        if running {
            self.begin(ctx, looping, listener);
        } else {
            log::info!("waiting for the audio device to resume");
            self.state.transport = Transport::Resuming { looping };
        }
        Ok(())
    }

    fn begin<C, L>(&mut self, ctx: &C, looping: bool, listener: &mut L)
    where
        C: AudioContext + ?Sized,
        L: Listener + ?Sized,
    {
        let state = &mut self.state;
        state.current_step = 0;
        state.next_step_time = ctx.current_time() + self.config.start_offset;
        state.end_time = None;
        state.transport = Transport::Playing { looping };
        listener.on_clear_highlights();
        log::info!(
            "playback started at {:.3}s (looping: {looping})",
            state.next_step_time
        );
    }

    /// Running → Idle. Every tracked voice is faded out over the stop
    /// ramp and released. Calling this while idle changes nothing.
    pub fn stop<C, L>(&mut self, ctx: &mut C, listener: &mut L)
    where
        C: AudioContext + ?Sized,
        L: Listener + ?Sized,
    {
        let was_active = self.state.transport.is_active();
        for tracked in self.state.voices.drain() {
            if let Err(e) = silence_voice(ctx, &tracked.voice, &self.config) {
                log::debug!("could not silence voice: {e}");
            }
            release_voice(ctx, &tracked.voice);
        }
        self.state.pending_previews.clear();
        self.state.transport = Transport::Stopped;
        self.state.current_step = 0;
        self.state.end_time = None;
        if self.state.cancel_tick() {
            listener.on_ticking(false);
        }
        listener.on_clear_highlights();
        if was_active {
            log::info!("playback stopped");
        }
    }

    /// One timer tick.
    ///
    /// Completes a pending resume, reports voice start/end crossings and
    /// schedules the steps inside the look-ahead window. Without a tick
    /// handle this does nothing. An allocation failure stops playback and
    /// is returned.
    pub fn tick<C, L>(
        &mut self,
        ctx: &mut C,
        sequence: &Sequence,
        tempo: &Tempo,
        output: NodeId,
        listener: &mut L,
    ) -> Result<(), AudioError>
    where
        C: AudioContext + ?Sized,
        L: Listener + ?Sized,
    {
        if self.state.tick.is_none() {
            return Ok(());
        }
        if ctx.state() == ContextState::Running {
            if let Transport::Resuming { looping } = self.state.transport {
                self.begin(ctx, looping, listener);
            }
            if let Err(e) = self.flush_previews(ctx, output) {
                self.stop(ctx, listener);
                return Err(e);
            }
        }
        self.poll_voices(ctx, listener);

        if let Transport::Playing { looping } = self.state.transport {
            if let Err(e) = self.schedule_ahead(ctx, sequence, tempo, output, looping, listener) {
                log::warn!("playback failed: {e}");
                self.stop(ctx, listener);
                return Err(e);
            }
        }

        let idle = !self.state.transport.is_active()
            && self.state.voices.is_empty()
            && self.state.pending_previews.is_empty();
        if idle && self.state.cancel_tick() {
            listener.on_ticking(false);
        }
        Ok(())
    }

    fn schedule_ahead<C, L>(
        &mut self,
        ctx: &mut C,
        sequence: &Sequence,
        tempo: &Tempo,
        output: NodeId,
        looping: bool,
        listener: &mut L,
    ) -> Result<(), AudioError>
    where
        C: AudioContext + ?Sized,
        L: Listener + ?Sized,
    {
        let now = ctx.current_time();
        if let Some(end) = self.state.end_time {
            if now >= end {
                self.finish(listener);
            }
            return Ok(());
        }

        while self.state.next_step_time < now + self.config.lookahead {
            if self.state.current_step >= sequence.sequence_max() {
                if looping {
                    self.state.current_step = 0;
                } else {
                    self.state.end_time = Some(self.state.next_step_time);
                    if now >= self.state.next_step_time {
                        self.finish(listener);
                    }
                    return Ok(());
                }
            }

            let index = self.state.current_step;
            // Re-read every iteration: the tempo may change mid-play.
            let duration = tempo.step_duration();
            let at = self.state.next_step_time + self.config.highlight_offset;
            listener.on_step_highlight(index, duration, at);
            if let Some(step) = sequence.step(index) {
                match spawn_voice(ctx, output, step, at, duration, &self.config)? {
                    Some(voice) => {
                        self.state.voices.insert(voice, Some(index));
                        log::trace!("step {index} at {at:.3}s");
                    }
                    None => log::trace!("step {index} is silent"),
                }
            }
            self.state.next_step_time += duration;
            self.state.current_step += 1;
        }
        Ok(())
    }

    /// Natural end of a one-shot pass.
    fn finish<L: Listener + ?Sized>(&mut self, listener: &mut L) {
        self.state.transport = Transport::Stopped;
        self.state.current_step = 0;
        self.state.end_time = None;
        listener.on_clear_highlights();
        log::info!("sequence finished");
    }

    fn poll_voices<C, L>(&mut self, ctx: &mut C, listener: &mut L)
    where
        C: AudioContext + ?Sized,
        L: Listener + ?Sized,
    {
        let poll = self.state.voices.poll(ctx.current_time(), self.config.voice_grace);
        for (handle, step, at) in poll.started {
            listener.on_voice_start(handle, step, at);
        }
        for (handle, step, at) in poll.ended {
            listener.on_voice_end(handle, step, at);
        }
        for voice in &poll.expired {
            release_voice(ctx, voice);
        }
    }

    /// Sound `step` once, right now, outside the sequence.
    ///
    /// While the context is still resuming the preview is parked and
    /// played by the first tick that sees it running; `Ok(None)` is
    /// returned in that case and for silent steps.
    pub fn preview<C, L>(
        &mut self,
        ctx: &mut C,
        step: &Step,
        duration: f64,
        output: NodeId,
        listener: &mut L,
    ) -> Result<Option<VoiceHandle>, AudioError>
    where
        C: AudioContext + ?Sized,
        L: Listener + ?Sized,
    {
        if !step.is_audible() {
            return Ok(None);
        }
        let running = ensure_running(ctx)?;
        if self.state.arm_tick() {
            listener.on_ticking(true);
        }
        if !running {
            self.state.pending_previews.push(PendingPreview {
                step: *step,
                duration,
            });
            return Ok(None);
        }
        self.spawn_preview(ctx, step, duration, output)
    }

    fn spawn_preview<C: AudioContext + ?Sized>(
        &mut self,
        ctx: &mut C,
        step: &Step,
        duration: f64,
        output: NodeId,
    ) -> Result<Option<VoiceHandle>, AudioError> {
        let now = ctx.current_time();
        let voice = spawn_voice(ctx, output, step, now, duration, &self.config)?;
        Ok(voice.map(|voice| self.state.voices.insert(voice, None)))
    }

    fn flush_previews<C: AudioContext + ?Sized>(
        &mut self,
        ctx: &mut C,
        output: NodeId,
    ) -> Result<(), AudioError> {
        for pending in std::mem::take(&mut self.state.pending_previews) {
            self.spawn_preview(ctx, &pending.step, pending.duration, output)?;
        }
        Ok(())
    }
}

/// Request a resume if needed. Returns whether the context is running
/// now.
fn ensure_running<C: AudioContext + ?Sized>(ctx: &mut C) -> Result<bool, AudioError> {
    match ctx.state() {
        ContextState::Running => Ok(true),
        ContextState::Suspended => {
            if let Err(e) = ctx.resume() {
                log::warn!("audio device refused to resume: {e}");
                return Err(e);
            }
            Ok(ctx.state() == ContextState::Running)
        }
        ContextState::Closed => Err(AudioError::InvalidState("audio context is closed".into())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::OfflineContext;

    #[derive(Default)]
    struct Recorder {
        highlights: Vec<(usize, f64)>,
        starts: Vec<f64>,
        ends: usize,
        clears: usize,
        ticking: Option<bool>,
    }

    impl Listener for Recorder {
        fn on_step_highlight(&mut self, index: usize, _duration: f64, at: f64) {
            self.highlights.push((index, at));
        }
        fn on_voice_start(&mut self, _voice: VoiceHandle, _step: Option<usize>, at: f64) {
            self.starts.push(at);
        }
        fn on_voice_end(&mut self, _voice: VoiceHandle, _step: Option<usize>, _at: f64) {
            self.ends += 1;
        }
        fn on_clear_highlights(&mut self) {
            self.clears += 1;
        }
        fn on_ticking(&mut self, active: bool) {
            self.ticking = Some(active);
        }
    }

    struct Rig {
        ctx: OfflineContext,
        sequence: Sequence,
        tempo: Tempo,
        scheduler: Scheduler,
        listener: Recorder,
    }

    impl Rig {
        fn new(ctx: OfflineContext) -> Self {
            Rig {
                ctx,
                sequence: Sequence::new(),
                tempo: Tempo::default(),
                scheduler: Scheduler::new(&EngineConfig::default()),
                listener: Recorder::default(),
            }
        }

        fn tick(&mut self) {
            let out = self.ctx.destination();
            self.scheduler
                .tick(&mut self.ctx, &self.sequence, &self.tempo, out, &mut self.listener)
                .unwrap();
        }

        /// Tick every 25 ms up to and including `until` seconds.
        fn run_until(&mut self, until: f64) {
            while self.ctx.current_time() <= until + 1e-9 {
                self.tick();
                self.ctx.advance(0.025);
            }
        }
    }

    #[test]
    fn first_step_waits_for_start_offset() {
        let mut rig = Rig::new(OfflineContext::new(8000.0));
        rig.scheduler.start(&mut rig.ctx, true, &mut rig.listener).unwrap();
        assert_eq!(rig.listener.ticking, Some(true));
        rig.tick();
        assert_eq!(rig.listener.highlights, vec![(0, 0.05)]);
        assert_eq!(rig.scheduler.state().current_step(), 1);
        assert_eq!(rig.scheduler.state().voices().len(), 1);
    }

    #[test]
    fn looping_wraps_to_the_first_step() {
        let mut rig = Rig::new(OfflineContext::new(8000.0));
        rig.sequence.set_sequence_max(2).unwrap();
        rig.scheduler.start(&mut rig.ctx, true, &mut rig.listener).unwrap();
        rig.run_until(1.6);
        let indices: Vec<usize> = rig.listener.highlights.iter().map(|h| h.0).collect();
        assert_eq!(&indices[..4], &[0, 1, 0, 1]);
        assert!(rig.scheduler.state().is_playing());
    }

    #[test]
    fn one_shot_stops_after_the_last_step() {
        let mut rig = Rig::new(OfflineContext::new(8000.0));
        rig.sequence.set_sequence_max(4).unwrap();
        rig.scheduler.start(&mut rig.ctx, false, &mut rig.listener).unwrap();
        rig.run_until(3.0);
        assert_eq!(rig.listener.highlights.len(), 4, "{:?}", rig.listener.highlights);
        assert_eq!(rig.listener.starts.len(), 4);
        assert!(!rig.scheduler.state().is_playing());
        assert_eq!(rig.scheduler.state().current_step(), 0);
        assert!(rig.scheduler.state().voices().is_empty());
        assert_eq!(rig.listener.ticking, Some(false));
    }

    #[test]
    fn two_seconds_at_120_bpm_start_four_voices() {
        let mut rig = Rig::new(OfflineContext::new(8000.0));
        rig.scheduler.start(&mut rig.ctx, true, &mut rig.listener).unwrap();
        rig.run_until(2.0);
        let starts = &rig.listener.starts;
        assert_eq!(starts.len(), 4, "{starts:?}");
        for pair in starts.windows(2) {
            assert!((pair[1] - pair[0] - 0.5).abs() < 1e-9, "{starts:?}");
        }
    }

    #[test]
    fn stop_is_idempotent() {
        let mut rig = Rig::new(OfflineContext::new(8000.0));
        rig.scheduler.start(&mut rig.ctx, true, &mut rig.listener).unwrap();
        rig.run_until(0.3);
        rig.scheduler.stop(&mut rig.ctx, &mut rig.listener);
        let state = rig.scheduler.state();
        assert_eq!(state.transport(), Transport::Stopped);
        assert_eq!(state.current_step(), 0);
        assert!(state.voices().is_empty());
        assert!(state.tick_handle().is_none());

        rig.scheduler.stop(&mut rig.ctx, &mut rig.listener);
        let state = rig.scheduler.state();
        assert_eq!(state.transport(), Transport::Stopped);
        assert_eq!(state.current_step(), 0);
        assert!(state.voices().is_empty());
    }

    #[test]
    fn tick_without_handle_does_nothing() {
        let mut rig = Rig::new(OfflineContext::new(8000.0));
        rig.tick();
        assert!(rig.listener.highlights.is_empty());
        assert_eq!(rig.ctx.live_nodes(), 1);
    }

    #[test]
    fn zero_volume_steps_highlight_without_voices() {
        let mut rig = Rig::new(OfflineContext::new(8000.0));
        rig.sequence.set_sequence_max(1).unwrap();
        rig.sequence.edit_step(0, &crate::sequence::StepPatch {
            volume: Some(0.0),
            ..Default::default()
        })
        .unwrap();
        rig.scheduler.start(&mut rig.ctx, false, &mut rig.listener).unwrap();
        rig.run_until(1.0);
        assert_eq!(rig.listener.highlights.len(), 1);
        assert!(rig.listener.starts.is_empty());
    }

    #[test]
    fn suspended_context_starts_on_a_later_tick() {
        let mut rig = Rig::new(OfflineContext::suspended(8000.0));
        rig.scheduler.start(&mut rig.ctx, true, &mut rig.listener).unwrap();
        assert_eq!(rig.scheduler.state().transport(), Transport::Resuming { looping: true });
        rig.tick();
        assert!(rig.listener.highlights.is_empty());

        rig.ctx.advance(0.025);
        rig.tick();
        assert_eq!(rig.scheduler.state().transport(), Transport::Playing { looping: true });
        let (index, at) = rig.listener.highlights[0];
        assert_eq!(index, 0);
        assert!((at - (rig.ctx.current_time() + 0.05)).abs() < 1e-9);
    }

    #[test]
    fn preview_waits_for_resume() {
        let mut rig = Rig::new(OfflineContext::suspended(8000.0));
        let out = rig.ctx.destination();
        let handle = rig
            .scheduler
            .preview(&mut rig.ctx, &Step::default(), 0.5, out, &mut rig.listener)
            .unwrap();
        assert!(handle.is_none());
        assert_eq!(rig.scheduler.state().pending_previews().len(), 1);

        rig.ctx.advance(0.025);
        rig.tick();
        assert!(rig.scheduler.state().pending_previews().is_empty());
        assert_eq!(rig.scheduler.state().voices().len(), 1);
        assert!(!rig.scheduler.state().is_playing());
    }

    #[test]
    fn preview_ticking_ends_when_voice_expires() {
        let mut rig = Rig::new(OfflineContext::new(8000.0));
        let out = rig.ctx.destination();
        rig.scheduler
            .preview(&mut rig.ctx, &Step::default(), 0.2, out, &mut rig.listener)
            .unwrap()
            .unwrap();
        assert_eq!(rig.listener.ticking, Some(true));
        rig.run_until(0.5);
        assert_eq!(rig.listener.starts.len(), 1);
        assert_eq!(rig.listener.ends, 1);
        assert_eq!(rig.listener.ticking, Some(false));
        assert!(rig.scheduler.state().voices().is_empty());
    }
}
