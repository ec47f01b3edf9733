//! Supervisor configuration with validation and versioning.

use crate::server::{ServerError, ServerResult};

use std::panic::Location;
use std::path::Path;

use error_location::ErrorLocation;
use serde::{Deserialize, Serialize};

/// Configuration version for migration support.
/// Increment when adding new fields or changing structure.
pub const CONFIG_VERSION: u32 = 1;

const CONFIG_FILENAME: &str = "config.toml";

const DEFAULT_HOST: &str = "127.0.0.1";
const DEFAULT_READY_MARKER: &str = "Application startup complete";
const DEFAULT_LOG_LEVEL: &str = "info";
const DEFAULT_LOG_DIR: &str = "logs";
const DEFAULT_LOG_RETENTION_DAYS: u32 = 7;
const DEFAULT_MAX_RESTARTS: u32 = 3;
const DEFAULT_INITIAL_BACKOFF_MS: u64 = 1000;
const DEFAULT_BACKOFF_FACTOR: f64 = 1.0;
const DEFAULT_MAX_BACKOFF_MS: u64 = 30000;
const DEFAULT_STARTUP_TIMEOUT_SECS: u64 = 10;
const DEFAULT_SHUTDOWN_GRACE_SECS: u64 = 5;
const DEFAULT_HEALTH_INTERVAL_SECS: u64 = 30;
const DEFAULT_PROBE_TIMEOUT_SECS: u64 = 2;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SupervisorConfig {
    /// Config file format version
    #[serde(default = "default_version")]
    pub version: u32,

    /// Backend server settings
    #[serde(default)]
    pub server: ServerSettings,

    /// Resilience settings
    #[serde(default)]
    pub resilience: ResilienceSettings,

    /// Logging settings
    #[serde(default)]
    pub logging: LoggingSettings,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerSettings {
    /// Host the backend binds to (always loopback for security)
    #[serde(default = "default_host")]
    pub host: String,

    /// Substring of backend output that announces readiness.
    /// Kept configurable because the banner text drifts across
    /// backend versions; the probe fallback covers the rest.
    #[serde(default = "default_ready_marker")]
    pub ready_marker: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResilienceSettings {
    /// Maximum restart attempts before giving up
    #[serde(default = "default_max_restarts")]
    pub max_restarts: u32,

    /// Delay before the first restart attempt (milliseconds)
    #[serde(default = "default_initial_backoff")]
    pub initial_backoff_ms: u64,

    /// Backoff growth factor (1.0 = flat delay)
    #[serde(default = "default_backoff_factor")]
    pub backoff_factor: f64,

    /// Maximum backoff delay (milliseconds)
    #[serde(default = "default_max_backoff")]
    pub max_backoff_ms: u64,

    /// Startup timeout (seconds)
    #[serde(default = "default_startup_timeout")]
    pub startup_timeout_secs: u64,

    /// Graceful shutdown grace period (seconds)
    #[serde(default = "default_shutdown_grace")]
    pub shutdown_grace_secs: u64,

    /// Health check interval (seconds)
    #[serde(default = "default_health_interval")]
    pub health_interval_secs: u64,

    /// Per-probe timeout (seconds)
    #[serde(default = "default_probe_timeout")]
    pub probe_timeout_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingSettings {
    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Log directory (relative to data directory)
    #[serde(default = "default_log_dir")]
    pub directory: String,

    /// Number of rotated daily log files to keep
    #[serde(default = "default_log_retention")]
    pub retention_days: u32,
}

// === Default Value Functions ===

fn default_version() -> u32 {
    CONFIG_VERSION
}
fn default_host() -> String {
    DEFAULT_HOST.into()
}
fn default_ready_marker() -> String {
    DEFAULT_READY_MARKER.into()
}
fn default_log_level() -> String {
    DEFAULT_LOG_LEVEL.into()
}
fn default_log_dir() -> String {
    DEFAULT_LOG_DIR.into()
}
fn default_log_retention() -> u32 {
    DEFAULT_LOG_RETENTION_DAYS
}
fn default_max_restarts() -> u32 {
    DEFAULT_MAX_RESTARTS
}
fn default_initial_backoff() -> u64 {
    DEFAULT_INITIAL_BACKOFF_MS
}
fn default_backoff_factor() -> f64 {
    DEFAULT_BACKOFF_FACTOR
}
fn default_max_backoff() -> u64 {
    DEFAULT_MAX_BACKOFF_MS
}
fn default_startup_timeout() -> u64 {
    DEFAULT_STARTUP_TIMEOUT_SECS
}
fn default_shutdown_grace() -> u64 {
    DEFAULT_SHUTDOWN_GRACE_SECS
}
fn default_health_interval() -> u64 {
    DEFAULT_HEALTH_INTERVAL_SECS
}
fn default_probe_timeout() -> u64 {
    DEFAULT_PROBE_TIMEOUT_SECS
}

// === Default Implementations ===

impl Default for SupervisorConfig {
    fn default() -> Self {
        Self {
            version: CONFIG_VERSION,
            server: ServerSettings::default(),
            resilience: ResilienceSettings::default(),
            logging: LoggingSettings::default(),
        }
    }
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            host: default_host(),
            ready_marker: default_ready_marker(),
        }
    }
}

impl Default for ResilienceSettings {
    fn default() -> Self {
        Self {
            max_restarts: default_max_restarts(),
            initial_backoff_ms: default_initial_backoff(),
            backoff_factor: default_backoff_factor(),
            max_backoff_ms: default_max_backoff(),
            startup_timeout_secs: default_startup_timeout(),
            shutdown_grace_secs: default_shutdown_grace(),
            health_interval_secs: default_health_interval(),
            probe_timeout_secs: default_probe_timeout(),
        }
    }
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            directory: default_log_dir(),
            retention_days: default_log_retention(),
        }
    }
}

// === Configuration Operations ===

impl SupervisorConfig {
    /// Load config from file, creating default if not exists.
    pub fn load_or_create(data_dir: &Path) -> ServerResult<Self> {
        let config_path = data_dir.join(CONFIG_FILENAME);

        if config_path.exists() {
            let content = std::fs::read_to_string(&config_path)?;
            let mut config: Self =
                toml::from_str(&content).map_err(|e| ServerError::ConfigInvalid {
                    message: e.to_string(),
                    location: ErrorLocation::from(Location::caller()),
                })?;

            // Migrate if needed
            if config.version < CONFIG_VERSION {
                config = Self::migrate(config)?;
                config.save(data_dir)?;
            }

            config.validate()?;
            Ok(config)
        } else {
            let config = Self::default();
            config.save(data_dir)?;
            Ok(config)
        }
    }

    /// Save config to file atomically.
    ///
    /// Uses write-to-temp-then-rename pattern to prevent
    /// partial writes if the process is interrupted.
    pub fn save(&self, data_dir: &Path) -> ServerResult<()> {
        let config_path = data_dir.join(CONFIG_FILENAME);
        let content = toml::to_string_pretty(self).map_err(|e| ServerError::ConfigInvalid {
            message: e.to_string(),
            location: ErrorLocation::from(Location::caller()),
        })?;

        let temp_path = config_path.with_extension("toml.tmp");
        std::fs::write(&temp_path, &content)?;
        std::fs::rename(&temp_path, &config_path)?;

        Ok(())
    }

    /// Migrate config from older version.
    fn migrate(mut config: Self) -> ServerResult<Self> {
        // Version 0 -> 1: Add resilience settings
        if config.version == 0 {
            config.resilience = ResilienceSettings::default();
            config.version = 1;
        }

        Ok(config)
    }

    /// Validate configuration values.
    pub fn validate(&self) -> ServerResult<()> {
        // Host must be localhost for security
        if self.server.host != DEFAULT_HOST && self.server.host != "localhost" {
            return Err(ServerError::ConfigInvalid {
                message: format!("Host must be {DEFAULT_HOST} or localhost for security"),
                location: ErrorLocation::from(Location::caller()),
            });
        }

        if self.server.ready_marker.is_empty() {
            return Err(ServerError::ConfigInvalid {
                message: "Readiness marker must not be empty".into(),
                location: ErrorLocation::from(Location::caller()),
            });
        }

        if self.resilience.startup_timeout_secs == 0 {
            return Err(ServerError::ConfigInvalid {
                message: "Startup timeout must be > 0".into(),
                location: ErrorLocation::from(Location::caller()),
            });
        }

        if self.resilience.probe_timeout_secs == 0 {
            return Err(ServerError::ConfigInvalid {
                message: "Probe timeout must be > 0".into(),
                location: ErrorLocation::from(Location::caller()),
            });
        }

        if self.resilience.backoff_factor < 1.0 {
            return Err(ServerError::ConfigInvalid {
                message: "Backoff factor must be >= 1.0".into(),
                location: ErrorLocation::from(Location::caller()),
            });
        }

        Ok(())
    }
}
