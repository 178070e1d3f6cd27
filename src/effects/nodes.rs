//! Live audio nodes behind one effect slot.

use rand::Rng;

use crate::audio::{AudioContext, Edge, NodeId, ParamName, Port};
use crate::config::EngineConfig;
use crate::error::AudioError;
use crate::sequence::Waveform;
use crate::tempo;

use super::impulse::reverb_impulse;
use super::params::{DelayParams, EffectParams, EffectType, SyncMode};

/// Shortest and longest delay pushed to a delay line, in seconds. The
/// upper bound also never exceeds the line's allocated length.
pub const DELAY_TIME_RANGE: (f64, f64) = (0.001, 5.0);

/// Node handles for one effect instance. The slot owns them exclusively.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EffectNodes {
    Reverb {
        convolver: NodeId,
        wet: NodeId,
        dry: NodeId,
    },
    Delay {
        delay: NodeId,
        feedback: NodeId,
        wet: NodeId,
        dry: NodeId,
    },
    Slicer {
        gain: NodeId,
        lfo: NodeId,
        lfo_gain: NodeId,
        offset: NodeId,
    },
}

/// Effective delay time for `params` at `bpm`, clamped to a line holding
/// `max_delay` seconds.
pub fn delay_seconds(params: &DelayParams, bpm: f64, max_delay: f64) -> f64 {
    let (min, max) = DELAY_TIME_RANGE;
    let max = max.min(max_delay).max(min);
    let seconds = match params.sync_mode {
        SyncMode::Bpm => tempo::synced_rate(bpm, params.rate),
        SyncMode::Time => params.time,
    };
    if !seconds.is_finite() {
        return max;
    }
    seconds.clamp(min, max)
}

/// Remembers what was allocated so a failed build can be undone.
struct Allocations<'a, C: AudioContext + ?Sized> {
    ctx: &'a mut C,
    made: Vec<NodeId>,
}

impl<'a, C: AudioContext + ?Sized> Allocations<'a, C> {
    fn make(
        &mut self,
        create: impl FnOnce(&mut C) -> Result<NodeId, AudioError>,
    ) -> Result<NodeId, AudioError> {
        let node = create(&mut *self.ctx)?;
        self.made.push(node);
        Ok(node)
    }

    fn undo(self) {
        for node in self.made {
            self.ctx.release(node);
        }
    }
}

impl EffectNodes {
    /// Allocate the primitives for `effect_type`. `None` allocates nothing.
    ///
    /// Sources inside the effect (the slicer's LFO and bias) are started
    /// immediately. On failure every node created so far is released.
    pub fn build<C, R>(
        ctx: &mut C,
        effect_type: EffectType,
        config: &EngineConfig,
        rng: &mut R,
    ) -> Result<Option<EffectNodes>, AudioError>
    where
        C: AudioContext + ?Sized,
        R: Rng + ?Sized,
    {
        let mut alloc = Allocations {
            ctx,
            made: Vec::new(),
        };
        let built = match effect_type {
            EffectType::None => return Ok(None),
            EffectType::Reverb => Self::build_reverb(&mut alloc, config, rng),
            EffectType::Delay => Self::build_delay(&mut alloc, config),
            EffectType::Slicer => Self::build_slicer(&mut alloc),
        };
        match built {
            Ok(nodes) => {
                log::debug!("built {} nodes {:?}", effect_type.key(), nodes.nodes());
                Ok(Some(nodes))
            }
            Err(e) => {
                alloc.undo();
                Err(e)
            }
        }
    }

    fn build_reverb<C, R>(
        alloc: &mut Allocations<'_, C>,
        config: &EngineConfig,
        rng: &mut R,
    ) -> Result<EffectNodes, AudioError>
    where
        C: AudioContext + ?Sized,
        R: Rng + ?Sized,
    {
        let impulse = reverb_impulse(
            alloc.ctx.sample_rate(),
            config.reverb_seconds,
            config.reverb_decay,
            rng,
        );
        let convolver = alloc.make(|ctx| ctx.create_convolver(&impulse))?;
        let wet = alloc.make(|ctx| ctx.create_gain())?;
        let dry = alloc.make(|ctx| ctx.create_gain())?;
        Ok(EffectNodes::Reverb { convolver, wet, dry })
    }

    fn build_delay<C>(
        alloc: &mut Allocations<'_, C>,
        config: &EngineConfig,
    ) -> Result<EffectNodes, AudioError>
    where
        C: AudioContext + ?Sized,
    {
        let delay = alloc.make(|ctx| ctx.create_delay(config.max_delay_seconds))?;
        let feedback = alloc.make(|ctx| ctx.create_gain())?;
        let wet = alloc.make(|ctx| ctx.create_gain())?;
        let dry = alloc.make(|ctx| ctx.create_gain())?;
        Ok(EffectNodes::Delay {
            delay,
            feedback,
            wet,
            dry,
        })
    }

    fn build_slicer<C>(alloc: &mut Allocations<'_, C>) -> Result<EffectNodes, AudioError>
    where
        C: AudioContext + ?Sized,
    {
        let gain = alloc.make(|ctx| ctx.create_gain())?;
        let lfo = alloc.make(|ctx| ctx.create_oscillator(Waveform::Square))?;
        let lfo_gain = alloc.make(|ctx| ctx.create_gain())?;
        let offset = alloc.make(|ctx| ctx.create_constant_source())?;
        let now = alloc.ctx.current_time();
        // the LFO and bias drive the gain; its own base value stays at zero
        alloc.ctx.set_value_at_time(gain, ParamName::Gain, 0.0, now)?;
        alloc.ctx.start(lfo, now)?;
        alloc.ctx.start(offset, now)?;
        Ok(EffectNodes::Slicer {
            gain,
            lfo,
            lfo_gain,
            offset,
        })
    }

    pub fn effect_type(&self) -> EffectType {
        match self {
            EffectNodes::Reverb { .. } => EffectType::Reverb,
            EffectNodes::Delay { .. } => EffectType::Delay,
            EffectNodes::Slicer { .. } => EffectType::Slicer,
        }
    }

    pub fn nodes(&self) -> Vec<NodeId> {
        match *self {
            EffectNodes::Reverb { convolver, wet, dry } => vec![convolver, wet, dry],
            EffectNodes::Delay {
                delay,
                feedback,
                wet,
                dry,
            } => vec![delay, feedback, wet, dry],
            EffectNodes::Slicer {
                gain,
                lfo,
                lfo_gain,
                offset,
            } => vec![gain, lfo, lfo_gain, offset],
        }
    }

    /// Connections inside the effect, independent of where it sits.
    pub fn internal_edges(&self) -> Vec<Edge> {
        match *self {
            EffectNodes::Reverb { convolver, wet, .. } => vec![Edge::input(convolver, wet)],
            EffectNodes::Delay {
                delay,
                feedback,
                wet,
                ..
            } => vec![
                Edge::input(delay, wet),
                Edge::input(delay, feedback),
                Edge::input(feedback, delay),
            ],
            EffectNodes::Slicer {
                gain,
                lfo,
                lfo_gain,
                offset,
            } => vec![
                Edge::input(lfo, lfo_gain),
                Edge::new(lfo_gain, Port::Param(gain, ParamName::Gain)),
                Edge::new(offset, Port::Param(gain, ParamName::Gain)),
            ],
        }
    }

    /// Connections that splice the effect between `input` and `output`.
    pub fn routing_edges(&self, input: NodeId, output: NodeId) -> Vec<Edge> {
        match *self {
            EffectNodes::Reverb {
                convolver,
                wet,
                dry,
            } => vec![
                Edge::input(input, dry),
                Edge::input(dry, output),
                Edge::input(input, convolver),
                Edge::input(wet, output),
            ],
            EffectNodes::Delay { delay, wet, dry, .. } => vec![
                Edge::input(input, dry),
                Edge::input(dry, output),
                Edge::input(input, delay),
                Edge::input(wet, output),
            ],
            EffectNodes::Slicer { gain, .. } => {
                vec![Edge::input(input, gain), Edge::input(gain, output)]
            }
        }
    }

    /// Push `params` onto the nodes at the current audio time. `config`
    /// must be the one the nodes were built with.
    pub fn apply<C: AudioContext + ?Sized>(
        &self,
        ctx: &mut C,
        params: &EffectParams,
        bpm: f64,
        config: &EngineConfig,
    ) -> Result<(), AudioError> {
        let now = ctx.current_time();
        match (self, params) {
            (EffectNodes::Reverb { wet, dry, .. }, EffectParams::Reverb(p)) => {
                ctx.set_value_at_time(*wet, ParamName::Gain, p.mix as f32, now)?;
                ctx.set_value_at_time(*dry, ParamName::Gain, (1.0 - p.mix) as f32, now)?;
            }
            (
                EffectNodes::Delay {
                    delay,
                    feedback,
                    wet,
                    dry,
                },
                EffectParams::Delay(p),
            ) => {
                ctx.set_value_at_time(*wet, ParamName::Gain, p.mix as f32, now)?;
                ctx.set_value_at_time(*dry, ParamName::Gain, (1.0 - p.mix) as f32, now)?;
                ctx.set_value_at_time(*feedback, ParamName::Gain, p.feedback as f32, now)?;
                let seconds = delay_seconds(p, bpm, config.max_delay_seconds);
                ctx.set_value_at_time(*delay, ParamName::DelayTime, seconds as f32, now)?;
                log::debug!("delay time {seconds:.4}s at {bpm} bpm");
            }
            (
                EffectNodes::Slicer {
                    lfo,
                    lfo_gain,
                    offset,
                    ..
                },
                EffectParams::Slicer(p),
            ) => {
                let frequency = tempo::lfo_frequency(bpm, p.rate);
                let half_depth = (p.depth / 2.0) as f32;
                ctx.set_value_at_time(*lfo, ParamName::Frequency, frequency as f32, now)?;
                ctx.set_value_at_time(*lfo_gain, ParamName::Gain, half_depth, now)?;
                ctx.set_value_at_time(*offset, ParamName::Offset, half_depth, now)?;
                log::debug!("slicer lfo {frequency:.3}Hz depth {}", p.depth);
            }
            (nodes, params) => {
                return Err(AudioError::InvalidState(format!(
                    "{} params pushed to {} nodes",
                    params.effect_type().key(),
                    nodes.effect_type().key()
                )));
            }
        }
        Ok(())
    }

    /// Stop internal sources and hand every node back to the context.
    /// The caller must have disconnected the nodes first.
    pub fn teardown<C: AudioContext + ?Sized>(self, ctx: &mut C) {
        if let EffectNodes::Slicer { lfo, offset, .. } = self {
            let now = ctx.current_time();
            for source in [lfo, offset] {
                if let Err(e) = ctx.stop(source, now) {
                    log::debug!("stopping slicer source {source}: {e}");
                }
            }
        }
        for node in self.nodes() {
            ctx.release(node);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::OfflineContext;
    use crate::effects::params::{ParamPatch, SlicerParams};
    use rand::SeedableRng;
    use rand::rngs::StdRng;

    fn small_config() -> EngineConfig {
        EngineConfig {
            reverb_seconds: 0.05,
            ..EngineConfig::default()
        }
    }

    #[test]
    fn none_allocates_nothing() {
        let mut ctx = OfflineContext::new(8000.0);
        let mut rng = StdRng::seed_from_u64(0);
        let nodes = EffectNodes::build(&mut ctx, EffectType::None, &small_config(), &mut rng).unwrap();
        assert!(nodes.is_none());
        assert_eq!(ctx.live_nodes(), 1);
    }

    #[test]
    fn delay_time_follows_tempo() {
        let params = DelayParams::default();
        assert_eq!(delay_seconds(&params, 120.0, 5.0), 0.125);
        assert_eq!(delay_seconds(&params, 240.0, 5.0), 0.0625);
        let fixed = DelayParams {
            sync_mode: SyncMode::Time,
            time: 9.0,
            ..DelayParams::default()
        };
        assert_eq!(delay_seconds(&fixed, 120.0, 5.0), 5.0);
    }

    #[test]
    fn delay_time_fits_a_short_line() {
        let fixed = DelayParams {
            sync_mode: SyncMode::Time,
            time: 1.5,
            ..DelayParams::default()
        };
        assert_eq!(delay_seconds(&fixed, 120.0, 0.5), 0.5);
        assert_eq!(delay_seconds(&fixed, 120.0, 8.0), 1.5);

        let config = EngineConfig {
            max_delay_seconds: 0.5,
            ..small_config()
        };
        let mut ctx = OfflineContext::new(8000.0);
        let mut rng = StdRng::seed_from_u64(0);
        let nodes = EffectNodes::build(&mut ctx, EffectType::Delay, &config, &mut rng)
            .unwrap()
            .unwrap();
        nodes.apply(&mut ctx, &EffectParams::Delay(fixed), 120.0, &config).unwrap();
        let EffectNodes::Delay { delay, .. } = nodes else {
            panic!("wrong node set");
        };
        assert_eq!(ctx.param_value(delay, ParamName::DelayTime).unwrap(), 0.5);
    }

    #[test]
    fn slicer_gain_spans_zero_to_depth() {
        let mut ctx = OfflineContext::new(8000.0);
        let mut rng = StdRng::seed_from_u64(0);
        let nodes = EffectNodes::build(&mut ctx, EffectType::Slicer, &small_config(), &mut rng)
            .unwrap()
            .unwrap();
        let params = EffectParams::Slicer(SlicerParams { depth: 0.6, rate: 4.0 });
        nodes.apply(&mut ctx, &params, 120.0, &small_config()).unwrap();
        let EffectNodes::Slicer {
            gain,
            lfo,
            lfo_gain,
            offset,
        } = nodes
        else {
            panic!("wrong node set");
        };
        assert_eq!(ctx.param_value(gain, ParamName::Gain).unwrap(), 0.0);
        assert_eq!(ctx.param_value(lfo, ParamName::Frequency).unwrap(), 8.0);
        assert!((ctx.param_value(lfo_gain, ParamName::Gain).unwrap() - 0.3).abs() < 1e-6);
        assert!((ctx.param_value(offset, ParamName::Offset).unwrap() - 0.3).abs() < 1e-6);
    }

    #[test]
    fn mismatched_params_are_rejected() {
        let mut ctx = OfflineContext::new(8000.0);
        let mut rng = StdRng::seed_from_u64(0);
        let nodes = EffectNodes::build(&mut ctx, EffectType::Delay, &small_config(), &mut rng)
            .unwrap()
            .unwrap();
        let reverb = EffectParams::from_patch(EffectType::Reverb, &ParamPatch::default());
        assert!(nodes.apply(&mut ctx, &reverb, 120.0, &small_config()).is_err());
    }

    #[test]
    fn failed_build_releases_partial_nodes() {
        // destination + two gains fit, the third allocation fails
        let mut ctx = OfflineContext::new(8000.0).with_node_limit(3);
        let mut rng = StdRng::seed_from_u64(0);
        let err = EffectNodes::build(&mut ctx, EffectType::Delay, &small_config(), &mut rng).unwrap_err();
        assert!(matches!(err, AudioError::Allocation { .. }));
        ctx.advance(0.01);
        assert_eq!(ctx.live_nodes(), 1);
    }

    #[test]
    fn teardown_frees_everything() {
        let mut ctx = OfflineContext::new(8000.0);
        let mut rng = StdRng::seed_from_u64(0);
        let nodes = EffectNodes::build(&mut ctx, EffectType::Slicer, &small_config(), &mut rng)
            .unwrap()
            .unwrap();
        assert_eq!(ctx.live_nodes(), 5);
        nodes.teardown(&mut ctx);
        ctx.advance(0.01);
        assert_eq!(ctx.live_nodes(), 1);
    }
}
