// Configuration - Startup parameters for both contexts
//
// Loaded once from a RON file (every field optional, defaults below) and
// validated before anything is spawned.

use crate::messaging::ClockSource;
use crate::sequencer::pattern::DEFAULT_MAX_STEPS;
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Configuration errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("RON error: {0}")]
    Ron(#[from] ron::error::SpannedError),

    #[error("Invalid value for {field}: {reason}")]
    Invalid { field: &'static str, reason: String },
}

fn invalid(field: &'static str, reason: impl Into<String>) -> ConfigError {
    ConfigError::Invalid {
        field,
        reason: reason.into(),
    }
}

/// Clock engine parameters (timing context)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClockConfig {
    pub bpm_default: f32,
    pub min_bpm: f32,
    pub max_bpm: f32,
    /// Ticks per beat
    pub steps_per_beat: u32,
    /// Consistent edges needed before switching to the external clock
    pub external_lock_edges: u32,
    /// Allowed relative deviation between intervals while locking
    pub external_tolerance: f32,
    /// Fixed silence window before falling back; derived from the period when unset
    pub external_timeout_us: Option<u64>,
    /// Lower bound of the derived silence window
    pub external_timeout_floor_us: u64,
    pub preferred_source: ClockSource,
}

impl Default for ClockConfig {
    fn default() -> Self {
        Self {
            bpm_default: 120.0,
            min_bpm: 5.0,
            max_bpm: 240.0,
            steps_per_beat: 1,
            external_lock_edges: 2,
            external_tolerance: 0.1,
            external_timeout_us: None,
            external_timeout_floor_us: 2_000_000,
            preferred_source: ClockSource::External,
        }
    }
}

/// Analog sampler parameters (timing context)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SamplerConfig {
    pub sample_period_us: u64,
    pub decimation_factor: u32,
    pub window_size: usize,
    /// Consecutive read failures before the sensor is reported degraded
    pub sensor_failure_threshold: u32,
}

impl Default for SamplerConfig {
    fn default() -> Self {
        Self {
            sample_period_us: 50_000,
            decimation_factor: 8,
            window_size: 16,
            sensor_failure_threshold: 5,
        }
    }
}

/// Trigger scheduler parameters (control context)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SchedulerConfig {
    pub max_steps: usize,
    /// Number of physical trigger outputs
    pub lanes: u8,
    pub start_enabled: bool,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            max_steps: DEFAULT_MAX_STEPS,
            lanes: 7,
            start_enabled: true,
        }
    }
}

/// Controller parameters (control context)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ControllerConfig {
    pub max_messages_per_pass: usize,
    pub hysteresis_bpm: f32,
    /// Raw reading mapped to `pot_min_bpm`
    pub pot_raw_min: u16,
    /// Raw reading mapped to `pot_max_bpm`
    pub pot_raw_max: u16,
    pub pot_min_bpm: f32,
    pub pot_max_bpm: f32,
    /// Map potentiometer readings to tempo at all
    pub pot_controls_tempo: bool,
}

impl Default for ControllerConfig {
    fn default() -> Self {
        Self {
            max_messages_per_pass: 32,
            hysteresis_bpm: 1.0,
            pot_raw_min: 0,
            pot_raw_max: 3311,
            pot_min_bpm: 15.0,
            pot_max_bpm: 200.0,
            pot_controls_tempo: true,
        }
    }
}

/// Queue capacities, one per direction
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ChannelConfig {
    pub timing_to_control: usize,
    pub control_to_timing: usize,
}

impl Default for ChannelConfig {
    fn default() -> Self {
        Self {
            timing_to_control: 64,
            control_to_timing: 16,
        }
    }
}

/// Complete sequencer configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SequencerConfig {
    pub clock: ClockConfig,
    pub sampler: SamplerConfig,
    pub scheduler: SchedulerConfig,
    pub controller: ControllerConfig,
    pub channel: ChannelConfig,
}

impl SequencerConfig {
    /// Parse from RON text and validate
    pub fn from_ron_str(text: &str) -> Result<Self, ConfigError> {
        let config: Self = ron::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    /// Load from a RON file and validate
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path)?;
        Self::from_ron_str(&text)
    }

    /// Serialize to pretty RON (used to dump the effective configuration)
    pub fn to_ron_string(&self) -> Result<String, ron::Error> {
        ron::ser::to_string_pretty(self, ron::ser::PrettyConfig::default())
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let clock = &self.clock;
        if !(clock.min_bpm > 0.0 && clock.min_bpm < clock.max_bpm) {
            return Err(invalid("clock.min_bpm", "must be positive and below max_bpm"));
        }
        if !clock.max_bpm.is_finite() {
            return Err(invalid("clock.max_bpm", "must be finite"));
        }
        if !(clock.min_bpm..=clock.max_bpm).contains(&clock.bpm_default) {
            return Err(invalid(
                "clock.bpm_default",
                format!("must lie in [{}, {}]", clock.min_bpm, clock.max_bpm),
            ));
        }
        if clock.steps_per_beat == 0 {
            return Err(invalid("clock.steps_per_beat", "must be at least 1"));
        }
        if clock.external_lock_edges < 2 {
            return Err(invalid("clock.external_lock_edges", "at least 2 edges are needed to measure a period"));
        }
        if !(0.0..1.0).contains(&clock.external_tolerance) {
            return Err(invalid("clock.external_tolerance", "must lie in [0, 1)"));
        }
        if clock.external_timeout_us == Some(0) {
            return Err(invalid("clock.external_timeout_us", "must be non-zero when set"));
        }

        let sampler = &self.sampler;
        if sampler.sample_period_us == 0 {
            return Err(invalid("sampler.sample_period_us", "must be non-zero"));
        }
        if sampler.decimation_factor == 0 {
            return Err(invalid("sampler.decimation_factor", "must be at least 1"));
        }
        if sampler.window_size == 0 {
            return Err(invalid("sampler.window_size", "must be at least 1"));
        }
        if sampler.sensor_failure_threshold == 0 {
            return Err(invalid("sampler.sensor_failure_threshold", "must be at least 1"));
        }

        let scheduler = &self.scheduler;
        if scheduler.max_steps == 0 {
            return Err(invalid("scheduler.max_steps", "must be at least 1"));
        }
        if scheduler.lanes == 0 || scheduler.lanes as u32 > crate::sequencer::pattern::MAX_LANES {
            return Err(invalid(
                "scheduler.lanes",
                format!("must lie in [1, {}]", crate::sequencer::pattern::MAX_LANES),
            ));
        }

        let controller = &self.controller;
        if controller.max_messages_per_pass == 0 {
            return Err(invalid("controller.max_messages_per_pass", "must be at least 1"));
        }
        if controller.hysteresis_bpm < 0.0 {
            return Err(invalid("controller.hysteresis_bpm", "must not be negative"));
        }
        if controller.pot_raw_min >= controller.pot_raw_max {
            return Err(invalid("controller.pot_raw_min", "must be below pot_raw_max"));
        }
        if controller.pot_min_bpm >= controller.pot_max_bpm {
            return Err(invalid("controller.pot_min_bpm", "must be below pot_max_bpm"));
        }

        if self.channel.timing_to_control == 0 || self.channel.control_to_timing == 0 {
            return Err(invalid("channel", "capacities must be non-zero"));
        }

        Ok(())
    }
}
