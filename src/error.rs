use crate::audio::{NodeId, NodeKind};
use std::fmt;

#[derive(Debug)]
pub enum CoreError {
    Audio(AudioError),
    Snapshot(SnapshotError),
    Store(StoreError),
    StepOutOfRange { index: usize },
    InvalidSequenceMax(usize),
    InvalidNoteDuration(f64),
    InvalidOctaveRange { min: i32, max: i32 },
    EmptyChord,
}

/// Failures reported by an audio backend.
#[derive(Debug)]
pub enum AudioError {
    /// The device could not allocate a node of the requested kind.
    Allocation { kind: NodeKind, reason: String },
    UnknownNode(NodeId),
    /// The call is not valid for the node's current state
    /// (e.g. starting a source twice).
    InvalidState(String),
    /// Error text surfaced by the host audio API.
    Backend(String),
}

#[derive(Debug)]
pub enum SnapshotError {
    Json(serde_json::Error),
    /// Well-formed JSON of the wrong shape, e.g. not an object.
    Invalid(String),
}

#[derive(Debug)]
pub enum StoreError {
    NotFound(String),
    Io(std::io::Error),
    Snapshot(SnapshotError),
}

impl fmt::Display for CoreError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CoreError::Audio(e) => write!(f, "Audio error: {e}"),
            CoreError::Snapshot(e) => write!(f, "Snapshot error: {e}"),
            CoreError::Store(e) => write!(f, "Store error: {e}"),
            CoreError::StepOutOfRange { index } => write!(f, "Step index {index} is out of range"),
            CoreError::InvalidSequenceMax(n) => write!(f, "Sequence length {n} is outside 1..=16"),
            CoreError::InvalidNoteDuration(beats) => {
                write!(f, "{beats} beats is not a supported note duration")
            }
            CoreError::InvalidOctaveRange { min, max } => {
                write!(f, "Minimum octave {min} is above maximum octave {max}")
            }
            CoreError::EmptyChord => write!(f, "No chord tones fall inside the octave range"),
        }
    }
}

impl std::error::Error for CoreError {}

impl fmt::Display for AudioError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AudioError::Allocation { kind, reason } => {
                write!(f, "Could not allocate {kind:?} node: {reason}")
            }
            AudioError::UnknownNode(id) => write!(f, "Unknown audio node {id}"),
            AudioError::InvalidState(msg) => write!(f, "Invalid node state: {msg}"),
            AudioError::Backend(msg) => write!(f, "Audio backend failure: {msg}"),
        }
    }
}

impl std::error::Error for AudioError {}

impl fmt::Display for SnapshotError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SnapshotError::Json(e) => write!(f, "Malformed snapshot JSON: {e}"),
            SnapshotError::Invalid(msg) => write!(f, "Invalid snapshot: {msg}"),
        }
    }
}

impl std::error::Error for SnapshotError {}

impl fmt::Display for StoreError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StoreError::NotFound(id) => write!(f, "No preset stored under '{id}'"),
            StoreError::Io(e) => write!(f, "I/O failure: {e}"),
            StoreError::Snapshot(e) => write!(f, "{e}"),
        }
    }
}

impl std::error::Error for StoreError {}

impl From<AudioError> for CoreError {
    fn from(e: AudioError) -> Self {
        CoreError::Audio(e)
    }
}

impl From<SnapshotError> for CoreError {
    fn from(e: SnapshotError) -> Self {
        CoreError::Snapshot(e)
    }
}

impl From<StoreError> for CoreError {
    fn from(e: StoreError) -> Self {
        CoreError::Store(e)
    }
}

impl From<serde_json::Error> for SnapshotError {
    fn from(e: serde_json::Error) -> Self {
        SnapshotError::Json(e)
    }
}

impl From<std::io::Error> for StoreError {
    fn from(e: std::io::Error) -> Self {
        StoreError::Io(e)
    }
}

impl From<SnapshotError> for StoreError {
    fn from(e: SnapshotError) -> Self {
        StoreError::Snapshot(e)
    }
}
