use std::{fs, path::Path};

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

/// What a throttled tier's units receive as their update delta.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeltaMode {
    /// The elapsed time of the tick that fired the tier.
    #[default]
    Frame,
    /// The accumulated interval since the tier last ran.
    Accumulated,
}

/// Handling of a unit that is registered a second time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DuplicatePolicy {
    /// A unit may live in at most one tier, once. A second `register` fails.
    #[default]
    Reject,
    /// Every `register` appends an entry, even for a unit already present.
    Allow,
}

/// Handling of a unit callback that returns an error.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailurePolicy {
    /// Abort the tick and hand the error to the caller of `tick`.
    #[default]
    Propagate,
    /// Log the error and keep running the remaining units.
    LogAndContinue,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DispatcherConfig {
    #[serde(default = "default_medium_interval")]
    pub medium_interval_sec: f32,
    #[serde(default = "default_low_interval")]
    pub low_interval_sec: f32,
    #[serde(default)]
    pub delta_mode: DeltaMode,
    #[serde(default)]
    pub duplicates: DuplicatePolicy,
    #[serde(default)]
    pub on_unit_error: FailurePolicy,
    /// Fixed channel rate. 0 disables it.
    #[serde(default = "default_fixed_hz")]
    pub fixed_hz: u32,
    #[serde(default = "default_max_fixed_steps")]
    pub max_fixed_steps_per_tick: u32,
}

pub const DEFAULT_MEDIUM_INTERVAL_SEC: f32 = 0.15;
pub const DEFAULT_LOW_INTERVAL_SEC: f32 = 0.4;

fn default_medium_interval() -> f32 { DEFAULT_MEDIUM_INTERVAL_SEC }
fn default_low_interval() -> f32 { DEFAULT_LOW_INTERVAL_SEC }
fn default_fixed_hz() -> u32 { 50 }
fn default_max_fixed_steps() -> u32 { 8 }

impl Default for DispatcherConfig {
    fn default() -> Self {
        Self {
            medium_interval_sec: default_medium_interval(),
            low_interval_sec: default_low_interval(),
            delta_mode: DeltaMode::default(),
            duplicates: DuplicatePolicy::default(),
            on_unit_error: FailurePolicy::default(),
            fixed_hz: default_fixed_hz(),
            max_fixed_steps_per_tick: default_max_fixed_steps(),
        }
    }
}

impl DispatcherConfig {
    #[inline]
    pub fn with_intervals(mut self, medium_sec: f32, low_sec: f32) -> Self {
        self.medium_interval_sec = medium_sec;
        self.low_interval_sec = low_sec;
        self
    }

    #[inline]
    pub fn with_delta_mode(mut self, mode: DeltaMode) -> Self {
        self.delta_mode = mode;
        self
    }

    #[inline]
    pub fn with_duplicates(mut self, policy: DuplicatePolicy) -> Self {
        self.duplicates = policy;
        self
    }

    #[inline]
    pub fn with_failure_policy(mut self, policy: FailurePolicy) -> Self {
        self.on_unit_error = policy;
        self
    }

    #[inline]
    pub fn with_fixed_hz(mut self, hz: u32) -> Self {
        self.fixed_hz = hz;
        self
    }

    /// Fixed step in seconds, `None` when the fixed channel is disabled.
    #[inline]
    pub fn fixed_dt_sec(&self) -> Option<f32> {
        (self.fixed_hz > 0).then(|| 1.0 / self.fixed_hz as f32)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        for (name, v) in [
            ("medium_interval_sec", self.medium_interval_sec),
            ("low_interval_sec", self.low_interval_sec),
        ] {
            if !v.is_finite() || v <= 0.0 {
                return Err(ConfigError::Invalid(format!(
                    "{name} must be a positive number of seconds, got {v}"
                )));
            }
        }
        if self.max_fixed_steps_per_tick == 0 {
            return Err(ConfigError::Invalid(
                "max_fixed_steps_per_tick must be at least 1".to_string(),
            ));
        }
        Ok(())
    }

    pub fn from_toml_str(text: &str) -> Result<Self, ConfigError> {
        let cfg: DispatcherConfig = toml::from_str(text)?;
        cfg.validate()?;
        Ok(cfg)
    }

    pub fn load_toml(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let text = fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml_str(&text)
    }
}
