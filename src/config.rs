//! Configuration types for the resilience core.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Top-level configuration for the core components.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct CoreConfig {
    /// Backend endpoint settings.
    pub remote: RemoteConfig,
    /// Emergency alert dispatch settings.
    pub alert: AlertConfig,
    /// Liveness classification thresholds.
    pub liveness: LivenessConfig,
    /// Periodic refresh settings.
    pub poll: PollConfig,
}

/// Backend endpoint configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RemoteConfig {
    /// Base URL of the backend API, without a trailing slash.
    pub base_url: String,
}

impl Default for RemoteConfig {
    fn default() -> Self {
        Self {
            base_url: "http://127.0.0.1:8080".to_owned(),
        }
    }
}

/// Emergency alert configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AlertConfig {
    /// Cooldown after a confirmed dispatch (sent or queued) during which
    /// repeat triggers are rejected, in seconds.
    pub cooldown_secs: u64,
}

impl Default for AlertConfig {
    fn default() -> Self {
        Self { cooldown_secs: 30 }
    }
}

/// Thresholds for classifying heartbeat snapshots.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LivenessConfig {
    /// Battery percentage below which the tier is caution.
    pub low_battery_percent: u8,
    /// Battery percentage below which the tier is critical.
    pub critical_battery_percent: u8,
    /// Seconds without a heartbeat before the device counts as stale.
    pub stale_heartbeat_secs: u64,
    /// Seconds before the snapshot itself counts as stale.
    pub stale_data_secs: u64,
}

impl Default for LivenessConfig {
    fn default() -> Self {
        Self {
            low_battery_percent: 30,
            critical_battery_percent: 10,
            stale_heartbeat_secs: 300,
            stale_data_secs: 120,
        }
    }
}

/// Periodic refresh configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PollConfig {
    /// Interval between heartbeat snapshot refreshes, in seconds.
    pub heartbeat_interval_secs: u64,
    /// Interval between guide reconciliations, in seconds.
    pub guide_resync_interval_secs: u64,
}

impl Default for PollConfig {
    fn default() -> Self {
        Self {
            heartbeat_interval_secs: 30,
            guide_resync_interval_secs: 60,
        }
    }
}

impl CoreConfig {
    /// Load configuration from a TOML file, falling back to defaults for missing fields.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed.
    pub fn from_file(path: &std::path::Path) -> crate::error::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        toml::from_str(&content).map_err(|e| crate::error::CoreError::Config(e.to_string()))
    }

    /// Save configuration to a TOML file, creating parent directories as needed.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be written or the config cannot be serialized.
    pub fn save_to_file(&self, path: &std::path::Path) -> crate::error::Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let content = toml::to_string_pretty(self)
            .map_err(|e| crate::error::CoreError::Config(e.to_string()))?;
        std::fs::write(path, content)?;
        Ok(())
    }

    /// Returns the default config file path: `~/.config/tether/config.toml`.
    pub fn default_config_path() -> PathBuf {
        if let Some(config) = std::env::var_os("XDG_CONFIG_HOME") {
            PathBuf::from(config).join("tether").join("config.toml")
        } else if let Some(home) = std::env::var_os("HOME") {
            PathBuf::from(home)
                .join(".config")
                .join("tether")
                .join("config.toml")
        } else {
            PathBuf::from("/tmp/tether-config/config.toml")
        }
    }
}
