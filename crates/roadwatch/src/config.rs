//! Configuration management for roadwatch.
//!
//! This module provides configuration loading and validation using figment,
//! supporting TOML config files, environment variables, and defaults.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

use figment::{
    providers::{Env, Format, Serialized, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Default configuration file name.
const CONFIG_FILE_NAME: &str = "config.toml";

/// Default data directory name.
const DATA_DIR_NAME: &str = "roadwatch";

/// Default database file name.
const DATABASE_FILE_NAME: &str = "roadwatch.db";

/// Application configuration.
///
/// Configuration is loaded from (in order of precedence, highest first):
/// 1. Environment variables (prefixed with `ROADWATCH_`, sections split on `__`)
/// 2. TOML config file at `~/.config/roadwatch/config.toml`
/// 3. Default values
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// HTTP server configuration.
    pub server: ServerConfig,
    /// Storage configuration.
    pub storage: StorageConfig,
    /// Drowsiness alert configuration.
    pub alerts: AlertConfig,
    /// SOS escalation configuration.
    pub escalation: EscalationConfig,
    /// Road hazard configuration.
    pub hazards: HazardConfig,
    /// Polling client configuration.
    pub watch: WatchConfig,
}

/// HTTP server configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Address the ingestion and read boundary listens on.
    pub bind: String,
}

/// Storage-related configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// Path to the database file.
    /// Defaults to `~/.local/share/roadwatch/roadwatch.db`
    pub database_path: Option<PathBuf>,
    /// Maximum age of sensor and drowsiness logs in days.
    /// Set to 0 for unlimited. Incident records are never pruned.
    pub max_age_days: u32,
    /// Prune interval in hours.
    pub prune_interval_hours: u32,
    /// Number of pending appends the persistence sidecar will queue before
    /// dropping new ones.
    pub queue_capacity: usize,
    /// Longest an escalation or a history read waits on the store, in
    /// milliseconds. Past this the caller carries on without it.
    pub reply_timeout_ms: u64,
}

/// Drowsiness alert configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AlertConfig {
    /// A voice alert fires every this many drowsiness events.
    pub voice_alert_interval: u64,
    /// Length of the trailing window used for the recent alert rate.
    pub window_secs: u64,
    /// Event count at which the assistant switches to its locale-specific
    /// critical message.
    pub assistant_threshold: u64,
    /// Event count at which a drowsiness escalation becomes eligible.
    pub escalation_threshold: u64,
    /// Escalate automatically once `escalation_threshold` is reached.
    pub auto_escalate: bool,
    /// Number of critical-alert messages retained in the alert log.
    pub log_capacity: usize,
    /// Number of drowsiness history rows returned with the current reading.
    pub history_limit: usize,
}

/// SOS escalation configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EscalationConfig {
    /// Program that transmits the emergency message (e.g. an SMS sender
    /// driving a cellular module). Escalations are recorded but reported as
    /// not accepted while this is unset.
    pub command: Option<String>,
    /// Leading arguments passed before the message.
    pub args: Vec<String>,
    /// Phone number passed after the message, if set.
    pub emergency_contact: Option<String>,
    /// Upper bound on a single notification attempt.
    pub timeout_secs: u64,
}

/// Road hazard configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct HazardConfig {
    /// Normalised vibration (0.0-1.0) at which a pothole incident is recorded.
    pub pothole_vibration_threshold: f64,
    /// Vibration readings are logged when either side is at least this value.
    pub vibration_log_threshold: f64,
}

/// Polling client configuration used by `roadwatch watch`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct WatchConfig {
    /// Base URL of a running roadwatch server.
    pub server_url: String,
    /// Radar poll cadence in milliseconds.
    pub radar_ms: u64,
    /// Vibration poll cadence in milliseconds.
    pub vibration_ms: u64,
    /// Alcohol poll cadence in milliseconds.
    pub alcohol_ms: u64,
    /// Location poll cadence in milliseconds.
    pub location_ms: u64,
    /// Drowsiness poll cadence in milliseconds.
    pub drowsiness_ms: u64,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: "0.0.0.0:5000".to_string(),
        }
    }
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            database_path: None, // Will be resolved to default at runtime
            max_age_days: 30,
            prune_interval_hours: 24,
            queue_capacity: 1024,
            reply_timeout_ms: 2000,
        }
    }
}

impl Default for AlertConfig {
    fn default() -> Self {
        Self {
            voice_alert_interval: 5,
            window_secs: 60,
            assistant_threshold: 4,
            escalation_threshold: 10,
            auto_escalate: true,
            log_capacity: 50,
            history_limit: 10,
        }
    }
}

impl Default for EscalationConfig {
    fn default() -> Self {
        Self {
            command: None,
            args: Vec::new(),
            emergency_contact: None,
            timeout_secs: 10,
        }
    }
}

impl Default for HazardConfig {
    fn default() -> Self {
        Self {
            pothole_vibration_threshold: 0.8,
            vibration_log_threshold: 0.0,
        }
    }
}

impl Default for WatchConfig {
    fn default() -> Self {
        Self {
            server_url: "http://127.0.0.1:5000".to_string(),
            radar_ms: 100,
            vibration_ms: 200,
            alcohol_ms: 1000,
            location_ms: 2000,
            drowsiness_ms: 1000,
        }
    }
}

impl Config {
    /// Load configuration from all sources.
    ///
    /// # Errors
    ///
    /// Returns an error if configuration loading or parsing fails.
    pub fn load() -> Result<Self> {
        Self::load_from(None)
    }

    /// Load configuration with an optional custom config path.
    ///
    /// # Errors
    ///
    /// Returns an error if configuration loading or parsing fails.
    pub fn load_from(config_path: Option<PathBuf>) -> Result<Self> {
        let config_file = config_path.unwrap_or_else(Self::default_config_path);

        let figment = Figment::new()
            .merge(Serialized::defaults(Config::default()))
            .merge(Toml::file(&config_file))
            .merge(Env::prefixed("ROADWATCH_").split("__"));

        let config: Config = figment.extract()?;
        config.validate()?;
        Ok(config)
    }

    /// Get the default configuration file path.
    #[must_use]
    pub fn default_config_path() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from(".config"))
            .join(DATA_DIR_NAME)
            .join(CONFIG_FILE_NAME)
    }

    /// Get the default data directory path.
    #[must_use]
    pub fn default_data_dir() -> PathBuf {
        dirs::data_local_dir()
            .unwrap_or_else(|| PathBuf::from(".local/share"))
            .join(DATA_DIR_NAME)
    }

    /// Validate the configuration.
    ///
    /// # Errors
    ///
    /// Returns an error if any configuration values are invalid.
    pub fn validate(&self) -> Result<()> {
        if self.server.bind.parse::<SocketAddr>().is_err() {
            return Err(invalid(format!(
                "server.bind is not a socket address: {}",
                self.server.bind
            )));
        }

        let nonzero = [
            ("alerts.voice_alert_interval", self.alerts.voice_alert_interval),
            ("alerts.window_secs", self.alerts.window_secs),
            ("alerts.escalation_threshold", self.alerts.escalation_threshold),
            ("escalation.timeout_secs", self.escalation.timeout_secs),
            ("storage.reply_timeout_ms", self.storage.reply_timeout_ms),
            ("watch.radar_ms", self.watch.radar_ms),
            ("watch.vibration_ms", self.watch.vibration_ms),
            ("watch.alcohol_ms", self.watch.alcohol_ms),
            ("watch.location_ms", self.watch.location_ms),
            ("watch.drowsiness_ms", self.watch.drowsiness_ms),
        ];
        for (name, value) in nonzero {
            if value == 0 {
                return Err(invalid(format!("{name} must be greater than 0")));
            }
        }

        if self.storage.queue_capacity == 0 {
            return Err(invalid("storage.queue_capacity must be greater than 0"));
        }

        if !self.hazards.pothole_vibration_threshold.is_finite()
            || self.hazards.pothole_vibration_threshold <= 0.0
        {
            return Err(invalid(
                "hazards.pothole_vibration_threshold must be a positive number",
            ));
        }

        if let Some(command) = &self.escalation.command {
            if command.trim().is_empty() {
                return Err(invalid("escalation.command must not be empty when set"));
            }
        }

        Ok(())
    }

    /// Get the database path, resolving defaults if not set.
    #[must_use]
    pub fn database_path(&self) -> PathBuf {
        self.storage
            .database_path
            .clone()
            .unwrap_or_else(|| Self::default_data_dir().join(DATABASE_FILE_NAME))
    }

    /// Get the max log age as a Duration.
    #[must_use]
    pub fn max_age(&self) -> Option<Duration> {
        if self.storage.max_age_days == 0 {
            None
        } else {
            Some(Duration::from_secs(
                u64::from(self.storage.max_age_days) * 24 * 60 * 60,
            ))
        }
    }

    /// Get the prune interval as a Duration.
    #[must_use]
    pub fn prune_interval(&self) -> Duration {
        Duration::from_secs(u64::from(self.storage.prune_interval_hours.max(1)) * 60 * 60)
    }

    /// Get the recent-alert window as a Duration.
    #[must_use]
    pub fn alert_window(&self) -> Duration {
        Duration::from_secs(self.alerts.window_secs)
    }

    /// Get the store reply timeout as a Duration.
    #[must_use]
    pub fn reply_timeout(&self) -> Duration {
        Duration::from_millis(self.storage.reply_timeout_ms)
    }

    /// Get the notification timeout as a Duration.
    #[must_use]
    pub fn notification_timeout(&self) -> Duration {
        Duration::from_secs(self.escalation.timeout_secs)
    }
}

fn invalid(message: impl Into<String>) -> Error {
    Error::ConfigValidation {
        message: message.into(),
    }
}
