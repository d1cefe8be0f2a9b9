//! Configuration for attnscope.
//!
//! Uses `figment` for layered configuration: defaults -> user config file ->
//! workspace config file -> environment -> explicit overrides. Only the
//! timeline reads the layout section; the ranker reads only `ranking`.

use figment::{
    Figment,
    providers::{Env, Format, Serialized, Toml},
};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::error::AttnError;

/// Top-level configuration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AttnConfig {
    /// Thresholds for choosing which attentions are drawn.
    #[serde(default)]
    pub ranking: RankingConfig,
    /// Time-axis scaling for the timelines.
    #[serde(default)]
    pub layout: LayoutConfig,
    /// Performance (event stream) parsing options.
    #[serde(default)]
    pub performance: PerformanceConfig,
    /// Playback tick settings.
    #[serde(default)]
    pub playback: PlaybackConfig,
}

/// Ranking thresholds.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RankingConfig {
    /// Scaled weight a source step must exceed in cutoff mode.
    #[serde(default = "default_cutoff")]
    pub cutoff: f32,
    /// Weights at or below this are treated as no attention.
    #[serde(default = "default_epsilon")]
    pub epsilon: f32,
    /// Show only the strongest `top_n` attentions across enabled heads.
    #[serde(default)]
    pub top_only: bool,
    #[serde(default = "default_top_n")]
    pub top_n: usize,
}

impl Default for RankingConfig {
    fn default() -> Self {
        Self {
            cutoff: default_cutoff(),
            epsilon: default_epsilon(),
            top_only: false,
            top_n: default_top_n(),
        }
    }
}

fn default_cutoff() -> f32 {
    0.5
}

fn default_epsilon() -> f32 {
    0.00001
}

fn default_top_n() -> usize {
    10
}

/// Layout of the time axis.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LayoutConfig {
    /// Time units per performance time-shift step.
    #[serde(default = "default_time_scale")]
    pub time_scale: f64,
    /// Width of one chorale step on the time axis.
    #[serde(default = "default_note_width")]
    pub note_width: f64,
    /// Half-width given to a performance note whose on and off coincide.
    #[serde(default = "default_zero_length_half_span")]
    pub zero_length_half_span: f64,
}

impl Default for LayoutConfig {
    fn default() -> Self {
        Self {
            time_scale: default_time_scale(),
            note_width: default_note_width(),
            zero_length_half_span: default_zero_length_half_span(),
        }
    }
}

fn default_time_scale() -> f64 {
    1.0
}

fn default_note_width() -> f64 {
    20.0
}

fn default_zero_length_half_span() -> f64 {
    20.0
}

/// Performance token handling.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PerformanceConfig {
    /// Leading time shifts are rewritten to this many steps. `None` keeps them.
    #[serde(default = "default_lead_in_steps")]
    pub lead_in_steps: Option<u32>,
    /// Number of velocity bins in the event vocabulary.
    #[serde(default = "default_velocity_bins")]
    pub velocity_bins: u32,
}

impl Default for PerformanceConfig {
    fn default() -> Self {
        Self {
            lead_in_steps: default_lead_in_steps(),
            velocity_bins: default_velocity_bins(),
        }
    }
}

fn default_lead_in_steps() -> Option<u32> {
    Some(10)
}

fn default_velocity_bins() -> u32 {
    32
}

/// Playback settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlaybackConfig {
    /// Delay between playback ticks in milliseconds.
    #[serde(default = "default_tick_interval_ms")]
    pub tick_interval_ms: u64,
}

impl Default for PlaybackConfig {
    fn default() -> Self {
        Self {
            tick_interval_ms: default_tick_interval_ms(),
        }
    }
}

fn default_tick_interval_ms() -> u64 {
    100
}

/// Directory holding the workspace-level config file.
pub const WORKSPACE_CONFIG_DIR: &str = ".attnscope";

/// Path of the user-level config file, if a home directory can be resolved.
pub fn user_config_path() -> Option<PathBuf> {
    directories::ProjectDirs::from("dev", "attnscope", "attnscope")
        .map(|d| d.config_dir().join("config.toml"))
}

/// Load configuration from layered sources.
///
/// Priority (highest to lowest):
/// 1. Explicit overrides (passed as argument)
/// 2. Environment variables (prefixed with `ATTNSCOPE_`)
/// 3. Workspace-local config (`.attnscope/config.toml`)
/// 4. User config (`~/.config/attnscope/config.toml`)
/// 5. Built-in defaults
pub fn load_config(
    workspace: Option<&Path>,
    overrides: Option<&AttnConfig>,
) -> Result<AttnConfig, Box<figment::Error>> {
    let mut figment = Figment::from(Serialized::defaults(AttnConfig::default()));

    if let Some(user_config) = user_config_path() {
        if user_config.exists() {
            figment = figment.merge(Toml::file(&user_config));
        }
    }

    if let Some(ws) = workspace {
        let ws_config = ws.join(WORKSPACE_CONFIG_DIR).join("config.toml");
        if ws_config.exists() {
            figment = figment.merge(Toml::file(&ws_config));
        }
    }

    // ATTNSCOPE_RANKING__TOP_N, ATTNSCOPE_LAYOUT__TIME_SCALE, etc.
    figment = figment.merge(Env::prefixed("ATTNSCOPE_").split("__"));

    if let Some(overrides) = overrides {
        figment = figment.merge(Serialized::defaults(overrides));
    }

    figment.extract().map_err(Box::new)
}

/// Write `config` to the workspace config file, refusing to overwrite one.
///
/// Returns the path written.
pub fn write_workspace_config(
    workspace: &Path,
    config: &AttnConfig,
) -> crate::error::Result<PathBuf> {
    let config_dir = workspace.join(WORKSPACE_CONFIG_DIR);
    std::fs::create_dir_all(&config_dir)?;
    let config_path = config_dir.join("config.toml");
    if config_path.exists() {
        return Err(AttnError::config(format!(
            "configuration already exists at {}",
            config_path.display()
        )));
    }
    let toml_str = toml::to_string_pretty(config)
        .map_err(|e| AttnError::config(format!("failed to serialize config: {}", e)))?;
    std::fs::write(&config_path, toml_str)?;
    Ok(config_path)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = AttnConfig::default();
        assert_eq!(config.ranking.cutoff, 0.5);
        assert_eq!(config.ranking.epsilon, 0.00001);
        assert!(!config.ranking.top_only);
        assert_eq!(config.ranking.top_n, 10);
        assert_eq!(config.layout.time_scale, 1.0);
        assert_eq!(config.performance.lead_in_steps, Some(10));
        assert_eq!(config.performance.velocity_bins, 32);
    }

    #[test]
    fn test_config_toml_roundtrip() {
        let config = AttnConfig::default();
        let toml_str = toml::to_string(&config).unwrap();
        let parsed: AttnConfig = toml::from_str(&toml_str).unwrap();
        assert_eq!(parsed, config);
    }

    #[test]
    fn test_partial_toml_uses_defaults() {
        let parsed: AttnConfig = toml::from_str("[ranking]\ntop_only = true\n").unwrap();
        assert!(parsed.ranking.top_only);
        assert_eq!(parsed.ranking.top_n, 10);
        assert_eq!(parsed.layout.note_width, 20.0);
    }

    #[test]
    fn test_load_config_from_workspace() {
        let dir = tempfile::tempdir().unwrap();
        let config_dir = dir.path().join(WORKSPACE_CONFIG_DIR);
        std::fs::create_dir_all(&config_dir).unwrap();
        std::fs::write(
            config_dir.join("config.toml"),
            "[ranking]\ncutoff = 0.8\ntop_n = 3\n\n[layout]\ntime_scale = 2.0\n",
        )
        .unwrap();

        let config = load_config(Some(dir.path()), None).unwrap();
        assert_eq!(config.ranking.cutoff, 0.8);
        assert_eq!(config.ranking.top_n, 3);
        assert_eq!(config.layout.time_scale, 2.0);
    }

    #[test]
    fn test_load_config_with_overrides() {
        let mut overrides = AttnConfig::default();
        overrides.ranking.top_only = true;
        overrides.playback.tick_interval_ms = 40;

        let config = load_config(None, Some(&overrides)).unwrap();
        assert!(config.ranking.top_only);
        assert_eq!(config.playback.tick_interval_ms, 40);
    }

    #[test]
    fn test_write_workspace_config_once() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_workspace_config(dir.path(), &AttnConfig::default()).unwrap();
        assert!(path.ends_with(".attnscope/config.toml"));
        let loaded = load_config(Some(dir.path()), None).unwrap();
        assert_eq!(loaded.ranking, RankingConfig::default());

        let err = write_workspace_config(dir.path(), &AttnConfig::default()).unwrap_err();
        assert!(matches!(err, AttnError::Config(_)));
    }
}
