//! The fixed three-slot effect chain.
//!
//! master → B → C → D → destination. Every slot owns a permanent output
//! bus; an inactive or empty slot is a plain wire from the previous bus
//! to its own. All routing goes through one [`Wiring`] so the whole graph
//! is described declaratively and reconciled in one pass.

use rand::SeedableRng;
use rand::rngs::StdRng;

use crate::audio::{AudioContext, Edge, NodeId, ParamName, Wiring};
use crate::config::EngineConfig;
use crate::error::AudioError;

use super::nodes::EffectNodes;
use super::params::{EffectParams, EffectType, ParamPatch, SlotId};

/// Pure configuration of one slot, without node handles.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SlotState {
    pub is_active: bool,
    pub params: EffectParams,
}

impl SlotState {
    pub fn effect_type(&self) -> EffectType {
        self.params.effect_type()
    }

    /// Inactive slot of `effect_type` with schema defaults.
    pub fn inactive(effect_type: EffectType) -> Self {
        SlotState {
            is_active: false,
            params: EffectParams::defaults(effect_type),
        }
    }
}

/// Slot layout of a fresh chain: delay, reverb, empty.
pub const INITIAL_SLOTS: [EffectType; 3] = [EffectType::Delay, EffectType::Reverb, EffectType::None];

#[derive(Debug)]
pub struct EffectSlot {
    id: SlotId,
    active: bool,
    params: EffectParams,
    nodes: Option<EffectNodes>,
    output: NodeId,
}

impl EffectSlot {
    pub fn id(&self) -> SlotId {
        self.id
    }

    pub fn is_active(&self) -> bool {
        self.active
    }

    pub fn effect_type(&self) -> EffectType {
        self.params.effect_type()
    }

    pub fn params(&self) -> &EffectParams {
        &self.params
    }

    pub fn nodes(&self) -> Option<&EffectNodes> {
        self.nodes.as_ref()
    }

    /// The slot's output bus.
    pub fn output(&self) -> NodeId {
        self.output
    }

    pub fn state(&self) -> SlotState {
        SlotState {
            is_active: self.active,
            params: self.params,
        }
    }
}

#[derive(Debug)]
pub struct EffectChain {
    master: NodeId,
    destination: NodeId,
    slots: [EffectSlot; 3],
    wiring: Wiring,
    rng: StdRng,
    config: EngineConfig,
}

impl EffectChain {
    /// Allocate the master bus and slot buses, build the initial effects
    /// and connect everything as pass-through.
    pub fn new<C: AudioContext + ?Sized>(
        ctx: &mut C,
        config: &EngineConfig,
        bpm: f64,
    ) -> Result<Self, AudioError> {
        let master = ctx.create_gain()?;
        let now = ctx.current_time();
        ctx.set_value_at_time(master, ParamName::Gain, config.master_gain as f32, now)?;

        let mut rng = StdRng::seed_from_u64(config.reverb_seed);
        let mut slots = Vec::with_capacity(3);
        for (id, effect_type) in SlotId::ALL.into_iter().zip(INITIAL_SLOTS) {
            let output = ctx.create_gain()?;
            let nodes = EffectNodes::build(ctx, effect_type, config, &mut rng)?;
            let params = EffectParams::defaults(effect_type);
            if let Some(nodes) = &nodes {
                nodes.apply(ctx, &params, bpm, config)?;
            }
            slots.push(EffectSlot {
                id,
                active: false,
                params,
                nodes,
                output,
            });
        }
        let slots: [EffectSlot; 3] = slots
            .try_into()
            .map_err(|_| AudioError::InvalidState("effect chain needs three slots".into()))?;

        let mut chain = EffectChain {
            master,
            destination: ctx.destination(),
            slots,
            wiring: Wiring::new(),
            rng,
            config: config.clone(),
        };
        chain.connect_chain(ctx)?;
        Ok(chain)
    }

    /// The node every voice connects into.
    pub fn input(&self) -> NodeId {
        self.master
    }

    pub fn slot(&self, id: SlotId) -> &EffectSlot {
        &self.slots[id.index()]
    }

    pub fn slots(&self) -> &[EffectSlot; 3] {
        &self.slots
    }

    pub fn wiring(&self) -> &Wiring {
        &self.wiring
    }

    pub fn states(&self) -> [SlotState; 3] {
        [
            self.slots[0].state(),
            self.slots[1].state(),
            self.slots[2].state(),
        ]
    }

    /// The complete edge list for the current slot configuration.
    pub fn desired_edges(&self) -> Vec<Edge> {
        let mut edges = Vec::new();
        let mut previous = self.master;
        for slot in &self.slots {
            match (&slot.nodes, slot.active) {
                (Some(nodes), true) => {
                    edges.extend(nodes.internal_edges());
                    edges.extend(nodes.routing_edges(previous, slot.output));
                }
                (Some(nodes), false) => {
                    edges.extend(nodes.internal_edges());
                    edges.push(Edge::input(previous, slot.output));
                }
                (None, _) => edges.push(Edge::input(previous, slot.output)),
            }
            previous = slot.output;
        }
        edges.push(Edge::input(previous, self.destination));
        edges
    }

    /// Rewire master → B → C → D → destination to match the slots.
    pub fn connect_chain<C: AudioContext + ?Sized>(&mut self, ctx: &mut C) -> Result<(), AudioError> {
        let desired = self.desired_edges();
        self.wiring.reconcile(ctx, &desired)
    }

    /// Push a slot's params onto its nodes at the current audio time.
    pub fn apply_params<C: AudioContext + ?Sized>(
        &self,
        ctx: &mut C,
        id: SlotId,
        bpm: f64,
    ) -> Result<(), AudioError> {
        let slot = &self.slots[id.index()];
        match &slot.nodes {
            Some(nodes) => nodes.apply(ctx, &slot.params, bpm, &self.config),
            None => Ok(()),
        }
    }

    /// Re-push every slot whose values derive from the tempo.
    pub fn apply_all_tempo_synced<C: AudioContext + ?Sized>(
        &self,
        ctx: &mut C,
        bpm: f64,
    ) -> Result<(), AudioError> {
        for slot in &self.slots {
            if slot.params.is_tempo_synced() {
                self.apply_params(ctx, slot.id, bpm)?;
            }
        }
        Ok(())
    }

    /// Replace a slot's effect.
    ///
    /// The old nodes are disconnected and released before the new ones
    /// are built. Params reset to the new type's defaults and the slot is
    /// left inactive. If allocation fails the slot becomes empty and the
    /// chain stays connected.
    pub fn retype<C: AudioContext + ?Sized>(
        &mut self,
        ctx: &mut C,
        id: SlotId,
        effect_type: EffectType,
        bpm: f64,
    ) -> Result<(), AudioError> {
        let index = id.index();
        let old = self.slots[index].nodes.take();
        self.slots[index].active = false;
        self.slots[index].params = EffectParams::None;
        self.connect_chain(ctx)?;
        if let Some(old) = old {
            old.teardown(ctx);
        }

        let nodes = EffectNodes::build(ctx, effect_type, &self.config, &mut self.rng)?;
        let params = EffectParams::defaults(effect_type);
        if let Some(nodes) = &nodes {
            nodes.apply(ctx, &params, bpm, &self.config)?;
        }
        let slot = &mut self.slots[index];
        slot.params = params;
        slot.nodes = nodes;
        log::info!("{id} is now {}", effect_type.key());
        self.connect_chain(ctx)
    }

    pub fn set_active<C: AudioContext + ?Sized>(
        &mut self,
        ctx: &mut C,
        id: SlotId,
        active: bool,
        bpm: f64,
    ) -> Result<(), AudioError> {
        self.slots[id.index()].active = active;
        if active {
            self.apply_params(ctx, id, bpm)?;
        }
        self.connect_chain(ctx)
    }

    /// Merge `patch` onto the slot's params and push the result.
    pub fn set_params<C: AudioContext + ?Sized>(
        &mut self,
        ctx: &mut C,
        id: SlotId,
        patch: &ParamPatch,
        bpm: f64,
    ) -> Result<(), AudioError> {
        self.slots[id.index()].params.merge(patch);
        self.apply_params(ctx, id, bpm)
    }

    /// Rebuild all three slots from `states`.
    ///
    /// Every slot is retyped even when its type is unchanged, so no node
    /// state from the previous configuration survives.
    pub fn configure<C: AudioContext + ?Sized>(
        &mut self,
        ctx: &mut C,
        states: &[SlotState; 3],
        bpm: f64,
    ) -> Result<(), AudioError> {
        for (id, state) in SlotId::ALL.into_iter().zip(states) {
            self.retype(ctx, id, state.effect_type(), bpm)?;
            let slot = &mut self.slots[id.index()];
            slot.params = state.params;
            slot.active = state.is_active;
        }
        self.connect_chain(ctx)?;
        for id in SlotId::ALL {
            self.apply_params(ctx, id, bpm)?;
        }
        Ok(())
    }
}
