//! Voices: one scheduled oscillator and envelope per step trigger.

use crate::audio::{AudioContext, NodeId, ParamName, Port};
use crate::config::EngineConfig;
use crate::error::AudioError;
use crate::sequence::Step;

/// Breakpoints of a voice's amplitude envelope, in context seconds.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Envelope {
    pub start: f64,
    /// Target volume is reached here.
    pub attack_end: f64,
    /// Sustain ends and the release ramp begins. `None` when the note is
    /// too short to hold at all.
    pub release_start: Option<f64>,
    /// Gain is back at zero.
    pub end: f64,
    /// Oscillator stop time.
    pub stop_at: f64,
}

impl Envelope {
    /// Attack, hold and release for a note of `duration` seconds.
    ///
    /// The release takes a fraction of the note capped at
    /// `config.release_max`. Very short notes split their length between
    /// attack and release.
    pub fn new(config: &EngineConfig, start: f64, duration: f64) -> Self {
        let duration = duration.max(0.0);
        let attack = config.attack.min(duration / 2.0);
        let release = config.release_max.min(duration * config.release_fraction);
        let attack_end = start + attack;
        let hold_until = start + duration - release;
        let end = start + duration;
        Envelope {
            start,
            attack_end,
            release_start: (hold_until > attack_end).then_some(hold_until),
            end,
            stop_at: end + config.stop_tail,
        }
    }
}

/// A voice in flight. Both nodes belong to the registry that tracks it.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Voice {
    pub oscillator: NodeId,
    pub gain: NodeId,
    pub envelope: Envelope,
}

impl Voice {
    pub fn start(&self) -> f64 {
        self.envelope.start
    }

    pub fn end(&self) -> f64 {
        self.envelope.end
    }
}

/// Schedule `step` to sound from `start` for `duration` seconds into
/// `output`.
///
/// Returns `Ok(None)` without touching the context when the step is
/// silent (zero volume or unknown pitch).
pub fn spawn_voice<C: AudioContext + ?Sized>(
    ctx: &mut C,
    output: NodeId,
    step: &Step,
    start: f64,
    duration: f64,
    config: &EngineConfig,
) -> Result<Option<Voice>, AudioError> {
    if !step.is_audible() {
        return Ok(None);
    }
    let oscillator = ctx.create_oscillator(step.waveform)?;
    let gain = match ctx.create_gain() {
        Ok(gain) => gain,
        Err(e) => {
            ctx.release(oscillator);
            return Err(e);
        }
    };
    let voice = Voice {
        oscillator,
        gain,
        envelope: Envelope::new(config, start, duration),
    };
    if let Err(e) = schedule(ctx, &voice, step, output) {
        ctx.release(oscillator);
        ctx.release(gain);
        return Err(e);
    }
    Ok(Some(voice))
}

fn schedule<C: AudioContext + ?Sized>(
    ctx: &mut C,
    voice: &Voice,
    step: &Step,
    output: NodeId,
) -> Result<(), AudioError> {
    let env = voice.envelope;
    let volume = step.volume as f32;
    ctx.set_value_at_time(voice.oscillator, ParamName::Frequency, step.frequency() as f32, env.start)?;
    ctx.set_value_at_time(voice.gain, ParamName::Gain, 0.0, env.start)?;
    ctx.linear_ramp_to_value_at_time(voice.gain, ParamName::Gain, volume, env.attack_end)?;
    if let Some(release_start) = env.release_start {
        ctx.set_value_at_time(voice.gain, ParamName::Gain, volume, release_start)?;
    }
    ctx.linear_ramp_to_value_at_time(voice.gain, ParamName::Gain, 0.0, env.end)?;
    ctx.connect(voice.oscillator, Port::Input(voice.gain))?;
    ctx.connect(voice.gain, Port::Input(output))?;
    ctx.start(voice.oscillator, env.start)?;
    ctx.stop(voice.oscillator, env.stop_at)?;
    Ok(())
}

/// Fade a voice out from now over `config.stop_ramp` instead of cutting it.
///
/// A voice that has not started yet is held at zero so it never sounds.
pub fn silence_voice<C: AudioContext + ?Sized>(
    ctx: &mut C,
    voice: &Voice,
    config: &EngineConfig,
) -> Result<(), AudioError> {
    let now = ctx.current_time();
    let current = if voice.start() > now {
        0.0
    } else {
        ctx.param_value(voice.gain, ParamName::Gain)?
    };
    ctx.cancel_scheduled_values(voice.gain, ParamName::Gain, now)?;
    ctx.set_value_at_time(voice.gain, ParamName::Gain, current, now)?;
    let silent_at = now + config.stop_ramp;
    ctx.linear_ramp_to_value_at_time(voice.gain, ParamName::Gain, 0.0, silent_at)?;
    if silent_at + config.stop_tail < voice.envelope.stop_at {
        ctx.stop(voice.oscillator, silent_at + config.stop_tail)?;
    }
    Ok(())
}

/// Hand a finished or silenced voice's nodes back to the context.
pub fn release_voice<C: AudioContext + ?Sized>(ctx: &mut C, voice: &Voice) {
    ctx.release(voice.oscillator);
    ctx.release(voice.gain);
}
