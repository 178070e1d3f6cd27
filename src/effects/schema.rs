//! Parameter descriptions for effect editors.

use serde::Serialize;

/// One selectable musical division.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct RateOption {
    pub value: f64,
    pub label: &'static str,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum ParamKind {
    Range { min: f64, max: f64, step: f64 },
    Buttons { options: &'static [RateOption] },
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct ParamSpec {
    pub key: &'static str,
    pub label: &'static str,
    #[serde(flatten)]
    pub kind: ParamKind,
    #[serde(rename = "value")]
    pub default: f64,
}

impl ParamSpec {
    /// Smallest and largest accepted value.
    pub fn bounds(&self) -> (f64, f64) {
        match self.kind {
            ParamKind::Range { min, max, .. } => (min, max),
            ParamKind::Buttons { options } => options.iter().fold(
                (f64::INFINITY, f64::NEG_INFINITY),
                |(lo, hi), o| (lo.min(o.value), hi.max(o.value)),
            ),
        }
    }
}

const fn rate(value: f64, label: &'static str) -> RateOption {
    RateOption { value, label }
}

pub const DELAY_RATES: &[RateOption] = &[
    rate(0.5, "1/2"),
    rate(0.75, "1/2 3"),
    rate(1.0, "1/4"),
    rate(1.0 / 1.5, "1/4."),
    rate(1.5, "1/4 3"),
    rate(2.0, "1/8"),
    rate(2.0 / 1.5, "1/8."),
    rate(3.0, "1/8 3"),
    rate(4.0, "1/16"),
];

pub const SLICER_RATES: &[RateOption] = &[
    rate(1.0, "1/4"),
    rate(1.5, "1/4 3"),
    rate(2.0, "1/8"),
    rate(2.0 / 1.5, "1/8."),
    rate(3.0, "1/8 3"),
    rate(4.0, "1/16"),
    rate(4.0 / 1.5, "1/16."),
    rate(6.0, "1/16 3"),
    rate(8.0, "1/32"),
];

pub const MIX: ParamSpec = ParamSpec {
    key: "mix",
    label: "Mix",
    kind: ParamKind::Range { min: 0.0, max: 1.0, step: 0.01 },
    default: 0.5,
};

pub const FEEDBACK: ParamSpec = ParamSpec {
    key: "feedback",
    label: "Feedback",
    kind: ParamKind::Range { min: 0.0, max: 0.9, step: 0.01 },
    default: 0.4,
};

pub const TIME: ParamSpec = ParamSpec {
    key: "time",
    label: "Time",
    kind: ParamKind::Range { min: 0.01, max: 2.0, step: 0.01 },
    default: 0.25,
};

pub const DEPTH: ParamSpec = ParamSpec {
    key: "depth",
    label: "Depth",
    kind: ParamKind::Range { min: 0.0, max: 1.0, step: 0.01 },
    default: 1.0,
};

const DELAY_RATE: ParamSpec = ParamSpec {
    key: "rate",
    label: "Rate",
    kind: ParamKind::Buttons { options: DELAY_RATES },
    default: 4.0,
};

const SLICER_RATE: ParamSpec = ParamSpec {
    key: "rate",
    label: "Rate",
    kind: ParamKind::Buttons { options: SLICER_RATES },
    default: 4.0,
};

pub const REVERB: &[ParamSpec] = &[MIX];
pub const DELAY: &[ParamSpec] = &[MIX, FEEDBACK, TIME, DELAY_RATE];
pub const SLICER: &[ParamSpec] = &[DEPTH, SLICER_RATE];

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rate_bounds_cover_options() {
        assert_eq!(DELAY_RATE.bounds(), (0.5, 4.0));
        assert_eq!(SLICER_RATE.bounds(), (1.0, 8.0));
    }

    #[test]
    fn schema_serializes_for_editors() {
        let json = serde_json::to_value(TIME).unwrap();
        assert_eq!(json["type"], "range");
        assert_eq!(json["max"], 2.0);
        assert_eq!(json["value"], 0.25);
        let rate = serde_json::to_value(DELAY_RATE).unwrap();
        assert_eq!(rate["options"][8]["label"], "1/16");
    }
}
