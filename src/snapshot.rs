//! Preset snapshots: the only data that leaves the core.
//!
//! [`PresetSnapshot`] is the complete, strongly-typed shape written out by
//! `get_current_state`. [`SnapshotPatch`] is what comes back in: any subset
//! of the fields, parsed field by field so that one bad value never fails
//! the whole load.

use std::collections::BTreeMap;
use std::str::FromStr;

use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{Map, Value};

use crate::effects::{EffectParams, EffectType, INITIAL_SLOTS, ParamPatch, SlotId, SlotState, SyncMode};
use crate::error::SnapshotError;
use crate::pitch::NoteName;
use crate::sequence::{NUM_STEPS, Step, StepPatch, Waveform};
use crate::tempo::{DEFAULT_BPM, NoteDuration};

/// One entry of `fxSlots`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SlotSnapshot {
    pub id: SlotId,
    pub is_active: bool,
    pub effect_type: EffectType,
    pub params: ParamPatch,
}

impl SlotSnapshot {
    pub fn new(id: SlotId, state: &SlotState) -> Self {
        SlotSnapshot {
            id,
            is_active: state.is_active,
            effect_type: state.effect_type(),
            params: state.params.to_patch(),
        }
    }

    /// Typed slot state; params merge onto the type's defaults.
    pub fn state(&self) -> SlotState {
        SlotState {
            is_active: self.is_active,
            params: EffectParams::from_patch(self.effect_type, &self.params),
        }
    }
}

/// Everything needed to restore a session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PresetSnapshot {
    /// Keyed by step index; serialised with string keys.
    pub sequence_data: BTreeMap<usize, Step>,
    pub bpm: u32,
    pub note_duration: NoteDuration,
    pub sequence_max: usize,
    pub fx_slots: Vec<SlotSnapshot>,
}

impl Default for PresetSnapshot {
    fn default() -> Self {
        PresetSnapshot {
            sequence_data: (0..NUM_STEPS).map(|i| (i, Step::default())).collect(),
            bpm: DEFAULT_BPM,
            note_duration: NoteDuration::default(),
            sequence_max: NUM_STEPS,
            fx_slots: SlotId::ALL
                .into_iter()
                .zip(INITIAL_SLOTS)
                .map(|(id, t)| SlotSnapshot::new(id, &SlotState::inactive(t)))
                .collect(),
        }
    }
}

impl PresetSnapshot {
    /// Leniently parse `json` and fill the gaps from the defaults.
    pub fn from_json(json: &str) -> Result<Self, SnapshotError> {
        Ok(SnapshotPatch::from_json(json)?.apply_to(&PresetSnapshot::default()))
    }

    pub fn to_json(&self) -> Result<String, SnapshotError> {
        Ok(serde_json::to_string(self)?)
    }

    /// All sixteen steps; indices missing from the map use step defaults.
    pub fn steps(&self) -> [Step; NUM_STEPS] {
        let mut steps = [Step::default(); NUM_STEPS];
        for (index, step) in &self.sequence_data {
            if let Some(slot) = steps.get_mut(*index) {
                *slot = *step;
            }
        }
        steps
    }

    /// Slot states in chain order. A missing entry is an inactive slot of
    /// the initial type for that position.
    pub fn slot_states(&self) -> [SlotState; 3] {
        let mut states = INITIAL_SLOTS.map(SlotState::inactive);
        for slot in &self.fx_slots {
            states[slot.id.index()] = slot.state();
        }
        states
    }
}

/// Partial edit of one effect slot.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct SlotPatch {
    pub is_active: Option<bool>,
    pub effect_type: Option<EffectType>,
    pub params: ParamPatch,
}

/// A partial snapshot as loaded from storage or sent by a host.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SnapshotPatch {
    pub steps: BTreeMap<usize, StepPatch>,
    pub bpm: Option<f64>,
    pub note_duration: Option<NoteDuration>,
    pub sequence_max: Option<usize>,
    /// Indexed by slot position.
    pub fx_slots: [Option<SlotPatch>; 3],
}

impl SnapshotPatch {
    pub fn from_json(json: &str) -> Result<Self, SnapshotError> {
        let value: Value = serde_json::from_str(json)?;
        Self::from_value(&value)
    }

    /// Read every recognised field of a JSON object. Values that cannot be
    /// used are logged and dropped or replaced by a safe default.
    pub fn from_value(value: &Value) -> Result<Self, SnapshotError> {
        let object = value
            .as_object()
            .ok_or_else(|| SnapshotError::Invalid("expected a JSON object".into()))?;
        let mut patch = SnapshotPatch::default();

        if let Some(data) = object.get("sequenceData") {
            patch.steps = parse_steps(data);
        }
        if let Some(bpm) = object.get("bpm") {
            patch.bpm = number(bpm);
            if patch.bpm.is_none() {
                log::warn!("ignoring bpm {bpm}");
            }
        }
        if let Some(value) = object.get("noteDuration") {
            patch.note_duration = number(value).and_then(NoteDuration::from_beats);
            if patch.note_duration.is_none() {
                log::warn!("ignoring unsupported note duration {value}");
            }
        }
        if let Some(value) = object.get("sequenceMax") {
            patch.sequence_max = number(value)
                .filter(|n| n.is_finite())
                .map(|n| (n.round().max(1.0) as usize).min(NUM_STEPS));
            if patch.sequence_max.is_none() {
                log::warn!("ignoring sequenceMax {value}");
            }
        }
        if let Some(slots) = object.get("fxSlots") {
            patch.fx_slots = parse_slots(slots);
        }
        Ok(patch)
    }

    /// Overlay this patch on `base`.
    ///
    /// Step fields left out keep their `base` values. A slot entry keeps
    /// its `base` type and active flag unless given, and its params merge
    /// onto the schema defaults of the resulting type. Slots with no entry
    /// are left exactly as in `base`.
    pub fn apply_to(&self, base: &PresetSnapshot) -> PresetSnapshot {
        let mut steps = base.steps();
        for (index, step_patch) in &self.steps {
            if let Some(step) = steps.get_mut(*index) {
                step.apply(step_patch);
            }
        }

        let mut states = base.slot_states();
        for (state, slot_patch) in states.iter_mut().zip(&self.fx_slots) {
            let Some(slot_patch) = slot_patch else { continue };
            let effect_type = slot_patch.effect_type.unwrap_or(state.effect_type());
            *state = SlotState {
                is_active: slot_patch.is_active.unwrap_or(state.is_active),
                params: EffectParams::from_patch(effect_type, &slot_patch.params),
            };
        }

        PresetSnapshot {
            sequence_data: steps.into_iter().enumerate().collect(),
            bpm: self.bpm.map_or(base.bpm, crate::tempo::clamp_bpm),
            note_duration: self.note_duration.unwrap_or(base.note_duration),
            sequence_max: self.sequence_max.unwrap_or(base.sequence_max),
            fx_slots: SlotId::ALL
                .into_iter()
                .zip(&states)
                .map(|(id, state)| SlotSnapshot::new(id, state))
                .collect(),
        }
    }
}

impl From<&PresetSnapshot> for SnapshotPatch {
    fn from(snapshot: &PresetSnapshot) -> Self {
        let mut fx_slots = [None; 3];
        for slot in &snapshot.fx_slots {
            fx_slots[slot.id.index()] = Some(SlotPatch {
                is_active: Some(slot.is_active),
                effect_type: Some(slot.effect_type),
                params: slot.params,
            });
        }
        SnapshotPatch {
            steps: snapshot
                .sequence_data
                .iter()
                .map(|(i, step)| (*i, StepPatch::from(*step)))
                .collect(),
            bpm: Some(snapshot.bpm as f64),
            note_duration: Some(snapshot.note_duration),
            sequence_max: Some(snapshot.sequence_max),
            fx_slots,
        }
    }
}

impl<'de> Deserialize<'de> for SnapshotPatch {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let value = Value::deserialize(deserializer)?;
        SnapshotPatch::from_value(&value).map_err(serde::de::Error::custom)
    }
}

/// A number, or a string holding one. Select inputs hand values over as
/// strings.
fn number(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

fn boolean(value: &Value) -> Option<bool> {
    match value {
        Value::Bool(b) => Some(*b),
        Value::String(s) => s.parse().ok(),
        _ => None,
    }
}

fn parse_steps(data: &Value) -> BTreeMap<usize, StepPatch> {
    let mut steps = BTreeMap::new();
    let entries: Vec<(usize, &Value)> = match data {
        Value::Object(map) => map
            .iter()
            .filter_map(|(key, value)| match key.parse::<usize>() {
                Ok(index) => Some((index, value)),
                Err(_) => {
                    log::warn!("ignoring step key '{key}'");
                    None
                }
            })
            .collect(),
        Value::Array(items) => items.iter().enumerate().collect(),
        other => {
            log::warn!("sequenceData must be an object or array, got {other}");
            return steps;
        }
    };
    for (index, value) in entries {
        if index >= NUM_STEPS {
            log::warn!("ignoring step {index}: only {NUM_STEPS} steps exist");
            continue;
        }
        match value {
            Value::Object(fields) => {
                steps.insert(index, parse_step(index, fields));
            }
            Value::Null => {}
            other => log::warn!("ignoring step {index}: {other}"),
        }
    }
    steps
}

fn parse_step(index: usize, fields: &Map<String, Value>) -> StepPatch {
    let mut patch = StepPatch::default();
    if let Some(note) = fields.get("note") {
        patch.note = Some(
            note.as_str()
                .and_then(|s| NoteName::from_str(s).ok())
                .unwrap_or_else(|| {
                    log::warn!("step {index}: unknown note {note}, using A");
                    NoteName::A
                }),
        );
    }
    if let Some(octave) = fields.get("octave") {
        patch.octave = number(octave).filter(|o| o.is_finite()).map(|o| o.round() as i32);
        if patch.octave.is_none() {
            log::warn!("step {index}: ignoring octave {octave}");
        }
    }
    if let Some(waveform) = fields.get("waveform") {
        patch.waveform = Some(
            waveform
                .as_str()
                .and_then(|s| Waveform::ALL.into_iter().find(|w| w.as_str() == s))
                .unwrap_or_else(|| {
                    log::warn!("step {index}: unknown waveform {waveform}, using sawtooth");
                    Waveform::Sawtooth
                }),
        );
    }
    if let Some(volume) = fields.get("volume") {
        patch.volume = number(volume);
        if patch.volume.is_none() {
            log::warn!("step {index}: ignoring volume {volume}");
        }
    }
    patch
}

fn parse_slots(slots: &Value) -> [Option<SlotPatch>; 3] {
    let mut parsed = [None; 3];
    let Some(items) = slots.as_array() else {
        log::warn!("fxSlots must be an array, got {slots}");
        return parsed;
    };
    for (position, item) in items.iter().enumerate() {
        let Some(fields) = item.as_object() else {
            log::warn!("ignoring fxSlots[{position}]: {item}");
            continue;
        };
        // An explicit id wins over list position.
        let id = match fields.get("id").and_then(Value::as_str) {
            Some(id) => match SlotId::from_str(id) {
                Ok(id) => id,
                Err(e) => {
                    log::warn!("ignoring fxSlots[{position}]: {e}");
                    continue;
                }
            },
            None => match SlotId::ALL.get(position) {
                Some(id) => *id,
                None => {
                    log::warn!("ignoring fxSlots[{position}]: only three slots exist");
                    continue;
                }
            },
        };
        parsed[id.index()] = Some(parse_slot(id, fields));
    }
    parsed
}

fn parse_slot(id: SlotId, fields: &Map<String, Value>) -> SlotPatch {
    let mut patch = SlotPatch::default();
    if let Some(active) = fields.get("isActive") {
        patch.is_active = boolean(active);
        if patch.is_active.is_none() {
            log::warn!("{id}: ignoring isActive {active}");
        }
    }
    if let Some(effect_type) = fields.get("effectType") {
        patch.effect_type = Some(
            effect_type
                .as_str()
                .and_then(|s| EffectType::from_str(s).ok())
                .unwrap_or_else(|| {
                    log::warn!("{id}: unknown effect type {effect_type}, using none");
                    EffectType::None
                }),
        );
    }
    if let Some(params) = fields.get("params").and_then(Value::as_object) {
        patch.params = parse_params(id, params);
    }
    patch
}

fn parse_params(id: SlotId, params: &Map<String, Value>) -> ParamPatch {
    let read = |key: &str| -> Option<f64> {
        let value = params.get(key)?;
        let parsed = number(value);
        if parsed.is_none() {
            log::warn!("{id}: ignoring {key} {value}");
        }
        parsed
    };
    let sync_mode = params.get("syncMode").and_then(|value| match value.as_str() {
        Some("bpm") => Some(SyncMode::Bpm),
        Some("time") => Some(SyncMode::Time),
        _ => {
            log::warn!("{id}: ignoring syncMode {value}");
            None
        }
    });
    ParamPatch {
        mix: read("mix"),
        feedback: read("feedback"),
        time: read("time"),
        sync_mode,
        rate: read("rate"),
        depth: read("depth"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::effects::DelayParams;

    #[test]
    fn default_snapshot_shape() {
        let snapshot = PresetSnapshot::default();
        let json: Value = serde_json::to_value(&snapshot).unwrap();
        assert_eq!(json["bpm"], 120);
        assert_eq!(json["noteDuration"], 1.0);
        assert_eq!(json["sequenceMax"], 16);
        assert_eq!(json["sequenceData"]["0"]["note"], "A");
        assert_eq!(json["sequenceData"]["15"]["waveform"], "sawtooth");
        assert_eq!(json["fxSlots"][0]["effectType"], "delay");
        assert_eq!(json["fxSlots"][0]["params"]["syncMode"], "bpm");
        assert_eq!(json["fxSlots"][2]["effectType"], "none");
    }

    #[test]
    fn complete_snapshot_survives_json() {
        let mut snapshot = PresetSnapshot::default();
        snapshot.bpm = 96;
        snapshot.note_duration = NoteDuration::QuarterTriplet;
        snapshot.sequence_data.insert(
            3,
            Step {
                note: NoteName::CSharp,
                octave: 5,
                waveform: Waveform::Square,
                volume: 0.25,
            },
        );
        let json = snapshot.to_json().unwrap();
        assert_eq!(PresetSnapshot::from_json(&json).unwrap(), snapshot);
        let strict: PresetSnapshot = serde_json::from_str(&json).unwrap();
        assert_eq!(strict, snapshot);
    }

    #[test]
    fn missing_step_fields_keep_base_values() {
        let patch = SnapshotPatch::from_json(r#"{"sequenceData": {"2": {"octave": 6}}}"#).unwrap();
        let base = PresetSnapshot::default();
        let merged = patch.apply_to(&base);
        let step = merged.sequence_data[&2];
        assert_eq!(step.octave, 6);
        assert_eq!(step.note, NoteName::A);
        assert_eq!(step.volume, 0.5);
        assert_eq!(merged.bpm, base.bpm);
    }

    #[test]
    fn sequence_data_may_be_an_array() {
        let patch = SnapshotPatch::from_json(
            r#"{"sequenceData": [{"note": "C"}, null, {"note": "Eb", "octave": "3"}]}"#,
        )
        .unwrap();
        assert_eq!(patch.steps.len(), 2);
        assert_eq!(patch.steps[&0].note, Some(NoteName::C));
        assert_eq!(patch.steps[&2].note, Some(NoteName::DSharp));
        assert_eq!(patch.steps[&2].octave, Some(3));
    }

    #[test]
    fn bad_values_fall_back_per_field() {
        let patch = SnapshotPatch::from_json(
            r#"{
                "bpm": "fast",
                "noteDuration": 0.7,
                "sequenceData": {"0": {"note": "H", "volume": 0.3}, "99": {"note": "C"}},
                "fxSlots": [{"effectType": "chorus", "isActive": true}]
            }"#,
        )
        .unwrap();
        assert_eq!(patch.bpm, None);
        assert_eq!(patch.note_duration, None);
        assert_eq!(patch.steps.len(), 1);
        assert_eq!(patch.steps[&0].note, Some(NoteName::A));
        assert_eq!(patch.steps[&0].volume, Some(0.3));
        let slot = patch.fx_slots[0].unwrap();
        assert_eq!(slot.effect_type, Some(EffectType::None));
        assert_eq!(slot.is_active, Some(true));
    }

    #[test]
    fn slot_params_merge_onto_type_defaults() {
        let mut base = PresetSnapshot::default();
        base.fx_slots[0].params.feedback = Some(0.8);
        let patch = SnapshotPatch::from_json(
            r#"{"fxSlots": [{"id": "B", "params": {"mix": "0.2"}}]}"#,
        )
        .unwrap();
        let merged = patch.apply_to(&base);
        let slot = &merged.fx_slots[0];
        assert_eq!(slot.effect_type, EffectType::Delay);
        assert_eq!(slot.params.mix, Some(0.2));
        assert_eq!(slot.params.feedback, Some(DelayParams::default().feedback));
        assert_eq!(merged.fx_slots[1], base.fx_slots[1]);
    }

    #[test]
    fn slot_ids_override_position() {
        let patch = SnapshotPatch::from_json(
            r#"{"fxSlots": [{"id": "D", "effectType": "slicer"}]}"#,
        )
        .unwrap();
        assert!(patch.fx_slots[0].is_none());
        assert_eq!(patch.fx_slots[2].unwrap().effect_type, Some(EffectType::Slicer));
    }

    #[test]
    fn sequence_max_and_bpm_are_clamped() {
        let patch = SnapshotPatch::from_json(r#"{"sequenceMax": 40, "bpm": 999}"#).unwrap();
        assert_eq!(patch.sequence_max, Some(16));
        assert_eq!(patch.apply_to(&PresetSnapshot::default()).bpm, 300);
    }

    #[test]
    fn non_object_is_rejected() {
        assert!(SnapshotPatch::from_json("[1, 2]").is_err());
        assert!(SnapshotPatch::from_json("not json").is_err());
    }

    #[test]
    fn patch_from_snapshot_reproduces_it() {
        let mut snapshot = PresetSnapshot::default();
        snapshot.fx_slots[1].is_active = true;
        snapshot.sequence_max = 5;
        let patch = SnapshotPatch::from(&snapshot);
        let other_base = PresetSnapshot {
            bpm: 200,
            ..PresetSnapshot::default()
        };
        assert_eq!(patch.apply_to(&other_base), snapshot);
    }
}
