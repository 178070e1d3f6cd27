pub mod audio;
pub mod config;
pub mod effects;
pub mod error;
pub mod pitch;
pub mod playback;
pub mod renderer;
pub mod scheduler;
pub mod sequence;
pub mod sequencer;
pub mod snapshot;
pub mod storage;
pub mod tempo;
pub mod voice;

pub use audio::{AudioContext, OfflineContext};
pub use config::EngineConfig;
pub use error::{AudioError, CoreError, SnapshotError, StoreError};
pub use scheduler::Listener;
pub use sequencer::Sequencer;
pub use snapshot::{PresetSnapshot, SnapshotPatch};

use serde::Serialize;
use wasm_bindgen::prelude::*;

use crate::effects::{EffectType, ParamSpec};
use crate::pitch::{ChordType, NoteName};

/// The crate version, read from Cargo.toml at compile time.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// WASM-exposed: return the oscbot-core version string.
#[wasm_bindgen]
pub fn core_version() -> String {
    VERSION.to_string()
}

fn js_error(e: impl std::fmt::Display) -> JsValue {
    JsValue::from_str(&format!("{e}"))
}

/// WASM-exposed: frequency in Hz of `note` at `octave`, or 0 for an
/// unknown note name.
#[wasm_bindgen]
pub fn frequency_of(note: &str, octave: i32) -> f64 {
    pitch::frequency_of(note, octave)
}

/// WASM-exposed: seconds per step.
#[wasm_bindgen]
pub fn step_duration_seconds(bpm: f64, note_duration_beats: f64) -> f64 {
    tempo::step_duration_seconds(bpm, note_duration_beats)
}

#[derive(Serialize)]
struct ChordTone {
    note: NoteName,
    octave: i32,
}

/// WASM-exposed: every tone of a chord across an octave range, as
/// `[{note, octave}]`.
#[wasm_bindgen]
pub fn expand_chord(root: &str, chord: &str, octave_min: i32, octave_max: i32) -> Result<JsValue, JsValue> {
    let root: NoteName = root.parse().map_err(js_error)?;
    let chord: ChordType = chord.parse().map_err(js_error)?;
    let tones: Vec<ChordTone> = pitch::expand_chord(root, chord.intervals(), octave_min, octave_max)
        .into_iter()
        .map(|(note, octave)| ChordTone { note, octave })
        .collect();
    serde_wasm_bindgen::to_value(&tones).map_err(js_error)
}

/// WASM-exposed: the state of a fresh session.
#[wasm_bindgen]
pub fn default_snapshot() -> Result<JsValue, JsValue> {
    serde_wasm_bindgen::to_value(&PresetSnapshot::default()).map_err(js_error)
}

/// WASM-exposed: fill a partial snapshot (JSON) from the defaults and
/// return the complete one.
#[wasm_bindgen]
pub fn normalize_snapshot(json: &str) -> Result<JsValue, JsValue> {
    let snapshot = PresetSnapshot::from_json(json).map_err(js_error)?;
    serde_wasm_bindgen::to_value(&snapshot).map_err(js_error)
}

/// WASM-exposed: render a snapshot (JSON) to a WAV byte array.
#[wasm_bindgen]
pub fn render_snapshot_wav(json: &str, sample_rate: u32, passes: u32) -> Result<Vec<u8>, JsValue> {
    let snapshot = PresetSnapshot::from_json(json).map_err(js_error)?;
    renderer::render_wav(&snapshot, sample_rate, passes).map_err(js_error)
}

#[derive(Serialize)]
struct EffectDescription {
    #[serde(rename = "type")]
    effect_type: EffectType,
    name: &'static str,
    params: &'static [ParamSpec],
}

/// WASM-exposed: every effect type with its editable parameters.
#[wasm_bindgen]
pub fn effect_schema() -> Result<JsValue, JsValue> {
    let effects: Vec<EffectDescription> = EffectType::ALL
        .into_iter()
        .map(|t| EffectDescription {
            effect_type: t,
            name: t.display_name(),
            params: t.schema(),
        })
        .collect();
    serde_wasm_bindgen::to_value(&effects).map_err(js_error)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn version_matches_manifest() {
        assert_eq!(core_version(), env!("CARGO_PKG_VERSION"));
    }

    #[test]
    fn exported_math_matches_modules() {
        assert_eq!(frequency_of("A", 4), 440.0);
        assert_eq!(step_duration_seconds(120.0, 1.0), 0.5);
    }
}
