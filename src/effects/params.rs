//! Effect types and their parameter sets.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use super::schema::{self, ParamSpec, RateOption};

/// Identifies one of the three chain positions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum SlotId {
    B,
    C,
    D,
}

impl SlotId {
    /// Chain order: master → B → C → D → output.
    pub const ALL: [SlotId; 3] = [SlotId::B, SlotId::C, SlotId::D];

    pub fn index(self) -> usize {
        match self {
            SlotId::B => 0,
            SlotId::C => 1,
            SlotId::D => 2,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            SlotId::B => "B",
            SlotId::C => "C",
            SlotId::D => "D",
        }
    }
}

impl fmt::Display for SlotId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "FX {}", self.as_str())
    }
}

impl FromStr for SlotId {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            "B" | "b" => Ok(SlotId::B),
            "C" | "c" => Ok(SlotId::C),
            "D" | "d" => Ok(SlotId::D),
            other => Err(format!("unknown effect slot '{other}'")),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EffectType {
    #[default]
    None,
    Reverb,
    Delay,
    Slicer,
}

impl EffectType {
    pub const ALL: [EffectType; 4] = [
        EffectType::None,
        EffectType::Reverb,
        EffectType::Delay,
        EffectType::Slicer,
    ];

    pub fn key(self) -> &'static str {
        match self {
            EffectType::None => "none",
            EffectType::Reverb => "reverb",
            EffectType::Delay => "delay",
            EffectType::Slicer => "slicer",
        }
    }

    pub fn display_name(self) -> &'static str {
        match self {
            EffectType::None => "No effect",
            EffectType::Reverb => "Reverb",
            EffectType::Delay => "Delay",
            EffectType::Slicer => "Slicer",
        }
    }

    /// Parameters shown for this type, in display order.
    pub fn schema(self) -> &'static [ParamSpec] {
        match self {
            EffectType::None => &[],
            EffectType::Reverb => schema::REVERB,
            EffectType::Delay => schema::DELAY,
            EffectType::Slicer => schema::SLICER,
        }
    }

    /// Whether this type allocates audio nodes.
    pub fn needs_node(self) -> bool {
        self != EffectType::None
    }
}

impl FromStr for EffectType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        EffectType::ALL
            .into_iter()
            .find(|t| t.key() == s)
            .ok_or_else(|| format!("unknown effect type '{s}'"))
    }
}

/// Whether the delay time follows the tempo or a fixed value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SyncMode {
    #[default]
    Bpm,
    Time,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReverbParams {
    pub mix: f64,
}

impl Default for ReverbParams {
    fn default() -> Self {
        ReverbParams { mix: 0.5 }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct DelayParams {
    pub mix: f64,
    pub feedback: f64,
    /// Fixed delay in seconds, used when `sync_mode` is `Time`.
    pub time: f64,
    pub sync_mode: SyncMode,
    /// Repeats per beat when synced to the tempo.
    pub rate: f64,
}

impl Default for DelayParams {
    fn default() -> Self {
        DelayParams {
            mix: 0.5,
            feedback: 0.4,
            time: 0.25,
            sync_mode: SyncMode::Bpm,
            rate: 4.0,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SlicerParams {
    pub depth: f64,
    /// Pulses per beat.
    pub rate: f64,
}

impl Default for SlicerParams {
    fn default() -> Self {
        SlicerParams {
            depth: 1.0,
            rate: 4.0,
        }
    }
}

/// Parameters of the effect currently in a slot.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum EffectParams {
    None,
    Reverb(ReverbParams),
    Delay(DelayParams),
    Slicer(SlicerParams),
}

impl EffectParams {
    /// Schema defaults for `effect_type`.
    pub fn defaults(effect_type: EffectType) -> Self {
        match effect_type {
            EffectType::None => EffectParams::None,
            EffectType::Reverb => EffectParams::Reverb(ReverbParams::default()),
            EffectType::Delay => EffectParams::Delay(DelayParams::default()),
            EffectType::Slicer => EffectParams::Slicer(SlicerParams::default()),
        }
    }

    /// Defaults for `effect_type` with `patch` merged on top.
    pub fn from_patch(effect_type: EffectType, patch: &ParamPatch) -> Self {
        let mut params = Self::defaults(effect_type);
        params.merge(patch);
        params
    }

    pub fn effect_type(&self) -> EffectType {
        match self {
            EffectParams::None => EffectType::None,
            EffectParams::Reverb(_) => EffectType::Reverb,
            EffectParams::Delay(_) => EffectType::Delay,
            EffectParams::Slicer(_) => EffectType::Slicer,
        }
    }

    /// Whether any value derived from these params depends on the BPM.
    pub fn is_tempo_synced(&self) -> bool {
        match self {
            EffectParams::Delay(p) => p.sync_mode == SyncMode::Bpm,
            EffectParams::Slicer(_) => true,
            EffectParams::None | EffectParams::Reverb(_) => false,
        }
    }

    /// Overwrite the fields of `patch` that this effect type has. Values
    /// are clamped into their schema range and rates snap to the nearest
    /// offered division.
    pub fn merge(&mut self, patch: &ParamPatch) {
        match self {
            EffectParams::None => {}
            EffectParams::Reverb(p) => {
                if let Some(mix) = patch.mix {
                    p.mix = clamp_to(&schema::MIX, mix, p.mix);
                }
            }
            EffectParams::Delay(p) => {
                if let Some(mix) = patch.mix {
                    p.mix = clamp_to(&schema::MIX, mix, p.mix);
                }
                if let Some(feedback) = patch.feedback {
                    p.feedback = clamp_to(&schema::FEEDBACK, feedback, p.feedback);
                }
                if let Some(time) = patch.time {
                    p.time = clamp_to(&schema::TIME, time, p.time);
                }
                if let Some(mode) = patch.sync_mode {
                    p.sync_mode = mode;
                }
                if let Some(rate) = patch.rate {
                    p.rate = snap_rate(schema::DELAY_RATES, rate, p.rate);
                }
            }
            EffectParams::Slicer(p) => {
                if let Some(depth) = patch.depth {
                    p.depth = clamp_to(&schema::DEPTH, depth, p.depth);
                }
                if let Some(rate) = patch.rate {
                    p.rate = snap_rate(schema::SLICER_RATES, rate, p.rate);
                }
            }
        }
    }

    /// The params as a flat patch carrying exactly this type's fields.
    pub fn to_patch(&self) -> ParamPatch {
        match *self {
            EffectParams::None => ParamPatch::default(),
            EffectParams::Reverb(p) => ParamPatch {
                mix: Some(p.mix),
                ..Default::default()
            },
            EffectParams::Delay(p) => ParamPatch {
                mix: Some(p.mix),
                feedback: Some(p.feedback),
                time: Some(p.time),
                sync_mode: Some(p.sync_mode),
                rate: Some(p.rate),
                ..Default::default()
            },
            EffectParams::Slicer(p) => ParamPatch {
                depth: Some(p.depth),
                rate: Some(p.rate),
                ..Default::default()
            },
        }
    }
}

fn clamp_to(spec: &ParamSpec, value: f64, current: f64) -> f64 {
    if !value.is_finite() {
        log::warn!("ignoring non-finite {} value", spec.key);
        return current;
    }
    let (min, max) = spec.bounds();
    value.clamp(min, max)
}

fn snap_rate(options: &[RateOption], value: f64, current: f64) -> f64 {
    if !value.is_finite() {
        log::warn!("ignoring non-finite rate");
        return current;
    }
    options
        .iter()
        .map(|o| o.value)
        .min_by(|a, b| (a - value).abs().total_cmp(&(b - value).abs()))
        .unwrap_or(current)
}

/// A partial, untyped parameter edit as it arrives from a UI or a
/// stored preset. Fields that the slot's effect type lacks are ignored.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ParamPatch {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mix: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub feedback: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub time: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sync_mode: Option<SyncMode>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rate: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub depth: Option<f64>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_follow_schema() {
        let EffectParams::Delay(d) = EffectParams::defaults(EffectType::Delay) else {
            panic!("expected delay params");
        };
        assert_eq!(d.mix, 0.5);
        assert_eq!(d.feedback, 0.4);
        assert_eq!(d.time, 0.25);
        assert_eq!(d.sync_mode, SyncMode::Bpm);
        assert_eq!(d.rate, 4.0);
        for spec in EffectType::Delay.schema() {
            let (min, max) = spec.bounds();
            assert!(spec.default >= min && spec.default <= max, "{} default out of range", spec.key);
        }
    }

    #[test]
    fn merge_keeps_unspecified_fields() {
        let mut params = EffectParams::defaults(EffectType::Delay);
        params.merge(&ParamPatch {
            feedback: Some(0.7),
            depth: Some(0.1),
            ..Default::default()
        });
        let EffectParams::Delay(d) = params else {
            panic!("type changed");
        };
        assert_eq!(d.feedback, 0.7);
        assert_eq!(d.mix, 0.5);
    }

    #[test]
    fn merge_clamps_and_snaps() {
        let mut params = EffectParams::defaults(EffectType::Slicer);
        params.merge(&ParamPatch {
            depth: Some(3.0),
            rate: Some(5.1),
            ..Default::default()
        });
        assert_eq!(
            params,
            EffectParams::Slicer(SlicerParams {
                depth: 1.0,
                rate: 6.0
            })
        );

        let mut delay = EffectParams::defaults(EffectType::Delay);
        delay.merge(&ParamPatch {
            feedback: Some(1.5),
            time: Some(0.0),
            ..Default::default()
        });
        let EffectParams::Delay(d) = delay else { unreachable!() };
        assert_eq!(d.feedback, 0.9);
        assert_eq!(d.time, 0.01);
    }

    #[test]
    fn tempo_sync_depends_on_mode() {
        let mut delay = EffectParams::defaults(EffectType::Delay);
        assert!(delay.is_tempo_synced());
        delay.merge(&ParamPatch {
            sync_mode: Some(SyncMode::Time),
            ..Default::default()
        });
        assert!(!delay.is_tempo_synced());
        assert!(EffectParams::defaults(EffectType::Slicer).is_tempo_synced());
        assert!(!EffectParams::defaults(EffectType::Reverb).is_tempo_synced());
    }

    #[test]
    fn patch_round_trips_through_params() {
        let params = EffectParams::from_patch(
            EffectType::Delay,
            &ParamPatch {
                mix: Some(0.3),
                rate: Some(2.0),
                ..Default::default()
            },
        );
        assert_eq!(EffectParams::from_patch(EffectType::Delay, &params.to_patch()), params);
    }

    #[test]
    fn patch_json_uses_camel_case() {
        let patch: ParamPatch = serde_json::from_str(r#"{"syncMode":"time","time":0.5}"#).unwrap();
        assert_eq!(patch.sync_mode, Some(SyncMode::Time));
        assert_eq!(patch.time, Some(0.5));
        assert_eq!(serde_json::to_string(&ParamPatch::default()).unwrap(), "{}");
    }

    #[test]
    fn type_names_parse() {
        assert_eq!("slicer".parse::<EffectType>(), Ok(EffectType::Slicer));
        assert!("chorus".parse::<EffectType>().is_err());
        assert_eq!("C".parse::<SlotId>(), Ok(SlotId::C));
    }
}
