//! Effect graph: the three post-master slots and what can live in them.

pub mod chain;
pub mod impulse;
pub mod nodes;
pub mod params;
pub mod schema;

pub use chain::{EffectChain, EffectSlot, SlotState, INITIAL_SLOTS};
pub use nodes::{delay_seconds, EffectNodes};
pub use params::{
    DelayParams, EffectParams, EffectType, ParamPatch, ReverbParams, SlicerParams, SlotId, SyncMode,
};
pub use schema::{ParamKind, ParamSpec, RateOption};
