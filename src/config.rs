//! Engine timing and sizing constants.
//!
//! Everything the scheduler, voices and effect chain treat as a constant
//! lives here so that hosts can tune it from JSON. Missing keys keep
//! their defaults.

use serde::{Deserialize, Serialize};

use crate::error::SnapshotError;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct EngineConfig {
    /// Period of the host timer that calls `tick`, in seconds.
    pub tick_interval: f64,
    /// How far ahead of the audio clock steps are scheduled.
    pub lookahead: f64,
    /// Delay between a play request and the first step.
    pub start_offset: f64,
    /// Shared offset added to both voice start and step highlight.
    pub highlight_offset: f64,
    pub attack: f64,
    pub release_max: f64,
    pub release_fraction: f64,
    /// Oscillator keeps running this long after its envelope reaches zero.
    pub stop_tail: f64,
    /// Fade-out used when playback is stopped.
    pub stop_ramp: f64,
    /// Extra time a finished voice stays in the registry.
    pub voice_grace: f64,
    pub master_gain: f64,
    pub max_delay_seconds: f64,
    pub reverb_seconds: f64,
    pub reverb_decay: f64,
    /// Seed of the reverb impulse-response noise.
    pub reverb_seed: u64,
    pub preview_duration: f64,
}

impl Default for EngineConfig {
    fn default() -> Self {
        EngineConfig {
            tick_interval: 0.025,
            lookahead: 0.1,
            start_offset: 0.05,
            highlight_offset: 0.0,
            attack: 0.01,
            release_max: 0.04,
            release_fraction: 0.3,
            stop_tail: 0.01,
            stop_ramp: 0.02,
            voice_grace: 0.2,
            master_gain: 1.0,
            max_delay_seconds: 5.0,
            reverb_seconds: 2.0,
            reverb_decay: 2.5,
            reverb_seed: 0x05cb_07,
            preview_duration: 0.5,
        }
    }
}

impl EngineConfig {
    /// Parse a JSON object and sanitise the result.
    pub fn from_json(json: &str) -> Result<Self, SnapshotError> {
        let config: EngineConfig = serde_json::from_str(json)?;
        Ok(config.sanitized())
    }

    /// Replace non-finite or negative values with their defaults.
    pub fn sanitized(mut self) -> Self {
        let defaults = EngineConfig::default();
        let fields: [(&str, &mut f64, f64); 15] = [
            ("tickInterval", &mut self.tick_interval, defaults.tick_interval),
            ("lookahead", &mut self.lookahead, defaults.lookahead),
            ("startOffset", &mut self.start_offset, defaults.start_offset),
            ("highlightOffset", &mut self.highlight_offset, defaults.highlight_offset),
            ("attack", &mut self.attack, defaults.attack),
            ("releaseMax", &mut self.release_max, defaults.release_max),
            ("releaseFraction", &mut self.release_fraction, defaults.release_fraction),
            ("stopTail", &mut self.stop_tail, defaults.stop_tail),
            ("stopRamp", &mut self.stop_ramp, defaults.stop_ramp),
            ("voiceGrace", &mut self.voice_grace, defaults.voice_grace),
            ("masterGain", &mut self.master_gain, defaults.master_gain),
            ("maxDelaySeconds", &mut self.max_delay_seconds, defaults.max_delay_seconds),
            ("reverbSeconds", &mut self.reverb_seconds, defaults.reverb_seconds),
            ("reverbDecay", &mut self.reverb_decay, defaults.reverb_decay),
            ("previewDuration", &mut self.preview_duration, defaults.preview_duration),
        ];
        for (name, value, default) in fields {
            if !value.is_finite() || *value < 0.0 {
                log::warn!("config {name} = {value} is invalid, using {default}");
                *value = default;
            }
        }
        if self.lookahead <= 0.0 {
            log::warn!("config lookahead must be positive, using {}", defaults.lookahead);
            self.lookahead = defaults.lookahead;
        }
        if self.max_delay_seconds <= 0.0 {
            self.max_delay_seconds = defaults.max_delay_seconds;
        }
        self
    }
}
