use std::{fs, path::Path};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use tierloop_core::DispatcherConfig;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub frame: FrameConfig,
    #[serde(default)]
    pub dispatcher: DispatcherConfig,
    #[serde(default)]
    pub units: UnitsConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FrameConfig {
    #[serde(default = "default_target_fps")]
    pub target_fps: u32,
    /// 0 runs until Ctrl-C.
    #[serde(default = "default_max_frames")]
    pub max_frames: u64,
    #[serde(default = "default_max_dt_ms")]
    pub max_dt_ms: u32,
    #[serde(default = "default_log_fps")]
    pub log_fps: bool,
    #[serde(default = "default_fps_period_ms")]
    pub fps_log_period_ms: u32,
}

fn default_target_fps() -> u32 { 60 }
fn default_max_frames() -> u64 { 600 }
fn default_max_dt_ms() -> u32 { 250 }
fn default_log_fps() -> bool { true }
fn default_fps_period_ms() -> u32 { 1000 }

impl Default for FrameConfig {
    fn default() -> Self {
        Self {
            target_fps: default_target_fps(),
            max_frames: default_max_frames(),
            max_dt_ms: default_max_dt_ms(),
            log_fps: default_log_fps(),
            fps_log_period_ms: default_fps_period_ms(),
        }
    }
}

/// Which demo units to spawn and where.
///
/// Tiers are plain strings so that a typo fails registration at startup.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UnitsConfig {
    #[serde(default = "default_movers")]
    pub movers: u32,
    #[serde(default = "default_mover_tier")]
    pub mover_tier: String,
    #[serde(default = "default_thinker_tier")]
    pub thinker_tier: String,
    /// The thinker unregisters itself after this many updates.
    #[serde(default = "default_thinker_budget")]
    pub thinker_budget: u32,
    #[serde(default = "default_reporter_tier")]
    pub reporter_tier: String,
    #[serde(default = "default_enabled")]
    pub physics: bool,
    #[serde(default = "default_enabled")]
    pub camera: bool,
}

fn default_movers() -> u32 { 3 }
fn default_mover_tier() -> String { "high".to_string() }
fn default_thinker_tier() -> String { "medium".to_string() }
fn default_thinker_budget() -> u32 { 20 }
fn default_reporter_tier() -> String { "low".to_string() }
fn default_enabled() -> bool { true }

impl Default for UnitsConfig {
    fn default() -> Self {
        Self {
            movers: default_movers(),
            mover_tier: default_mover_tier(),
            thinker_tier: default_thinker_tier(),
            thinker_budget: default_thinker_budget(),
            reporter_tier: default_reporter_tier(),
            physics: default_enabled(),
            camera: default_enabled(),
        }
    }
}

impl AppConfig {
    pub fn from_toml_str(text: &str) -> Result<Self> {
        let cfg: AppConfig = toml::from_str(text)?;
        cfg.dispatcher.validate()?;
        Ok(cfg)
    }

    pub fn load_toml(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let text = fs::read_to_string(path)
            .with_context(|| format!("failed to read config {}", path.display()))?;
        Self::from_toml_str(&text).with_context(|| format!("invalid config {}", path.display()))
    }
}
