use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::platform::common::atomic_write;

/// Main engine configuration
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct EngineConfig {
    /// Enforcement loop settings
    #[serde(default)]
    pub engine: LoopSettings,

    /// Pause escape valve settings
    #[serde(default)]
    pub pause: PauseSettings,

    /// Where durable records live
    #[serde(default)]
    pub storage: StorageSettings,

    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Enforcement loop settings
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct LoopSettings {
    /// Interval between ticks (milliseconds)
    #[serde(default = "default_tick_interval_ms")]
    pub tick_interval_ms: u64,

    /// How far back to look for the foreground app when the loop starts (seconds)
    #[serde(default = "default_foreground_lookback_secs")]
    pub foreground_lookback_secs: u64,

    /// Identifier of this app; its own transitions are ignored
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub self_app_id: Option<String>,
}

/// Pause escape valve settings
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct PauseSettings {
    /// Pause grants per app per day
    #[serde(default = "default_max_grants_per_day")]
    pub max_grants_per_day: u32,

    /// Length of one pause (minutes)
    #[serde(default = "default_pause_minutes")]
    pub pause_minutes: u32,

    /// Warn this long before a pause ends (seconds)
    #[serde(default = "default_warning_lead_secs")]
    pub warning_lead_secs: u64,
}

/// Storage settings
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct StorageSettings {
    /// Directory holding policies, pauses and the event log
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data_dir: Option<PathBuf>,
}

/// Logging configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,
}

// Default values
fn default_tick_interval_ms() -> u64 {
    // Debug builds tick fast so behaviour is observable; release bounds battery cost
    if cfg!(debug_assertions) { 500 } else { 5_000 }
}

fn default_foreground_lookback_secs() -> u64 {
    60
}

fn default_max_grants_per_day() -> u32 {
    2
}

fn default_pause_minutes() -> u32 {
    5
}

fn default_warning_lead_secs() -> u64 {
    60
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for LoopSettings {
    fn default() -> Self {
        Self {
            tick_interval_ms: default_tick_interval_ms(),
            foreground_lookback_secs: default_foreground_lookback_secs(),
            self_app_id: None,
        }
    }
}

impl Default for PauseSettings {
    fn default() -> Self {
        Self {
            max_grants_per_day: default_max_grants_per_day(),
            pause_minutes: default_pause_minutes(),
            warning_lead_secs: default_warning_lead_secs(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

impl LoopSettings {
    pub fn tick_interval(&self) -> Duration {
        Duration::from_millis(self.tick_interval_ms)
    }

    pub fn foreground_lookback(&self) -> Duration {
        Duration::from_secs(self.foreground_lookback_secs)
    }
}

impl EngineConfig {
    /// Load configuration from a TOML file; a missing file yields the defaults
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            tracing::debug!("No config at {}, using defaults", path.display());
            return Ok(Self::default());
        }

        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        let config: EngineConfig = toml::from_str(&content)
            .with_context(|| format!("Failed to parse config file: {}", path.display()))?;

        config.validate()?;

        Ok(config)
    }

    /// Save configuration to a TOML file
    pub fn save(&self, path: &Path) -> Result<()> {
        self.validate()?;

        let content = toml::to_string_pretty(self).context("Failed to serialize config")?;

        atomic_write(path, content.as_bytes())
            .with_context(|| format!("Failed to write config file: {}", path.display()))?;

        Ok(())
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<()> {
        if self.engine.tick_interval_ms == 0 {
            anyhow::bail!("engine.tick_interval_ms must be greater than zero");
        }

        if self.pause.pause_minutes == 0 {
            anyhow::bail!("pause.pause_minutes must be greater than zero");
        }

        if self.pause.max_grants_per_day == 0 {
            anyhow::bail!("pause.max_grants_per_day must be greater than zero");
        }

        let level = self.logging.level.to_lowercase();
        if !matches!(level.as_str(), "trace" | "debug" | "info" | "warn" | "error") {
            anyhow::bail!("Invalid logging.level: {}", self.logging.level);
        }

        Ok(())
    }

    /// Resolved data directory
    pub fn data_dir(&self) -> Result<PathBuf> {
        match &self.storage.data_dir {
            Some(dir) => Ok(dir.clone()),
            None => default_data_dir(),
        }
    }

    pub fn policies_path(&self) -> Result<PathBuf> {
        Ok(self.data_dir()?.join("policies.json"))
    }

    pub fn pauses_path(&self) -> Result<PathBuf> {
        Ok(self.data_dir()?.join("pauses.json"))
    }

    pub fn event_log_path(&self) -> Result<PathBuf> {
        Ok(self.data_dir()?.join("events.jsonl"))
    }
}

fn project_dirs() -> Result<directories::ProjectDirs> {
    directories::ProjectDirs::from("", "", "app-guard")
        .context("Could not determine a home directory for app-guard")
}

/// Get the per-user config file path
pub fn get_config_path() -> Result<PathBuf> {
    Ok(project_dirs()?.config_dir().join("app-guard.toml"))
}

/// Get the per-user data directory
pub fn default_data_dir() -> Result<PathBuf> {
    Ok(project_dirs()?.data_local_dir().to_path_buf())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_defaults() {
        let config = EngineConfig::default();
        assert_eq!(config.pause.max_grants_per_day, 2);
        assert_eq!(config.pause.pause_minutes, 5);
        assert_eq!(config.pause.warning_lead_secs, 60);
        assert_eq!(config.engine.foreground_lookback(), Duration::from_secs(60));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_partial_toml_fills_defaults() {
        let config: EngineConfig = toml::from_str(
            r#"
            [pause]
            pause_minutes = 10

            [storage]
            data_dir = "/tmp/app-guard"
            "#,
        )
        .unwrap();

        assert_eq!(config.pause.pause_minutes, 10);
        assert_eq!(config.pause.max_grants_per_day, 2);
        assert_eq!(config.logging.level, "info");
        assert_eq!(
            config.policies_path().unwrap(),
            PathBuf::from("/tmp/app-guard/policies.json")
        );
    }

    #[test]
    fn test_missing_file_uses_defaults() {
        let dir = tempdir().unwrap();
        let config = EngineConfig::load(&dir.path().join("absent.toml")).unwrap();
        assert_eq!(config.pause.max_grants_per_day, 2);
    }

    #[test]
    fn test_save_and_load() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("app-guard.toml");

        let mut config = EngineConfig::default();
        config.engine.tick_interval_ms = 2_000;
        config.engine.self_app_id = Some("dev.app-guard".to_string());
        config.save(&path).unwrap();

        let loaded = EngineConfig::load(&path).unwrap();
        assert_eq!(loaded.engine.tick_interval_ms, 2_000);
        assert_eq!(loaded.engine.self_app_id.as_deref(), Some("dev.app-guard"));
    }

    #[test]
    fn test_validate_rejects_zero_tick() {
        let mut config = EngineConfig::default();
        config.engine.tick_interval_ms = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_rejects_zero_grants() {
        let mut config = EngineConfig::default();
        config.pause.max_grants_per_day = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_rejects_unknown_log_level() {
        let mut config = EngineConfig::default();
        config.logging.level = "loud".to_string();
        assert!(config.validate().is_err());
    }
}
