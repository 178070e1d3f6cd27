//! Audio engine seam.
//!
//! The sequencer never talks to an audio device directly. It drives an
//! [`AudioContext`]: a node graph with a running clock, modelled on the
//! Web Audio API. Handles are plain [`NodeId`]s; the backend owns the
//! actual primitives.

use std::fmt;

use crate::error::AudioError;
use crate::sequence::Waveform;

pub mod graph;
pub mod offline;
#[cfg(feature = "web")]
pub mod web;

pub use graph::{Edge, Wiring};
pub use offline::OfflineContext;

/// Handle to a node owned by an [`AudioContext`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeId(pub u32);

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Primitive node types the engine allocates.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum NodeKind {
    Destination,
    Gain,
    Oscillator,
    Delay,
    Convolver,
    ConstantSource,
}

/// Automatable parameters, one per node kind that has any.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum ParamName {
    Gain,
    Frequency,
    DelayTime,
    Offset,
}

/// Where a connection lands: a node's signal input, or one of its params.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Port {
    Input(NodeId),
    Param(NodeId, ParamName),
}

impl Port {
    pub fn node(&self) -> NodeId {
        match self {
            Port::Input(id) | Port::Param(id, _) => *id,
        }
    }
}

impl fmt::Display for Port {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Port::Input(id) => write!(f, "{id}"),
            Port::Param(id, param) => write!(f, "{id}.{param:?}"),
        }
    }
}

/// Device state as reported by the backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContextState {
    /// Not rendering; the clock is frozen until resumed.
    Suspended,
    Running,
    Closed,
}

/// Multi-channel sample data handed to a convolver.
#[derive(Debug, Clone, PartialEq)]
pub struct ImpulseResponse {
    pub sample_rate: f32,
    pub channels: Vec<Vec<f32>>,
}

impl ImpulseResponse {
    pub fn len(&self) -> usize {
        self.channels.first().map_or(0, Vec::len)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// A node graph with a clock, in the shape of a Web Audio context.
///
/// Automation calls are timestamped on the context's own clock
/// (`current_time`). Nothing here blocks: starts, stops and ramps are
/// queued for the render side to honour.
pub trait AudioContext {
    /// Seconds of audio rendered since the context was created.
    fn current_time(&self) -> f64;
    fn sample_rate(&self) -> f32;
    fn state(&self) -> ContextState;
    /// Ask a suspended device to run. Completion may be observed later
    /// through [`AudioContext::state`].
    fn resume(&mut self) -> Result<(), AudioError>;
    /// Final output node.
    fn destination(&self) -> NodeId;

    fn create_gain(&mut self) -> Result<NodeId, AudioError>;
    fn create_oscillator(&mut self, waveform: Waveform) -> Result<NodeId, AudioError>;
    /// A delay line able to hold `max_delay` seconds.
    fn create_delay(&mut self, max_delay: f64) -> Result<NodeId, AudioError>;
    fn create_convolver(&mut self, impulse: &ImpulseResponse) -> Result<NodeId, AudioError>;
    fn create_constant_source(&mut self) -> Result<NodeId, AudioError>;
    /// Give up the handle. The backend frees the node once it can no
    /// longer produce sound; the id must not be used afterwards.
    fn release(&mut self, node: NodeId);

    fn connect(&mut self, from: NodeId, to: Port) -> Result<(), AudioError>;
    /// Remove one `from → to` connection.
    fn disconnect(&mut self, from: NodeId, to: Port) -> Result<(), AudioError>;

    fn set_value_at_time(
        &mut self,
        node: NodeId,
        param: ParamName,
        value: f32,
        time: f64,
    ) -> Result<(), AudioError>;
    fn linear_ramp_to_value_at_time(
        &mut self,
        node: NodeId,
        param: ParamName,
        value: f32,
        time: f64,
    ) -> Result<(), AudioError>;
    /// Drop every automation event at or after `time`.
    fn cancel_scheduled_values(
        &mut self,
        node: NodeId,
        param: ParamName,
        time: f64,
    ) -> Result<(), AudioError>;
    /// Automation value of `param` at the current time.
    fn param_value(&self, node: NodeId, param: ParamName) -> Result<f32, AudioError>;

    /// Start a source node at `when`. Sources start at most once.
    fn start(&mut self, node: NodeId, when: f64) -> Result<(), AudioError>;
    /// Stop a started source node at `when`. A later call replaces a
    /// pending stop time; once the source has stopped the call fails.
    fn stop(&mut self, node: NodeId, when: f64) -> Result<(), AudioError>;
}
