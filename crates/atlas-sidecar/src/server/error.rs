use std::panic::Location;
use std::path::PathBuf;

use error_location::ErrorLocation;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ServerError {
    #[error("Failed to create data directory at {path}: {source} {location}")]
    DataDirCreation {
        path: PathBuf,
        #[source]
        source: std::io::Error,
        location: ErrorLocation,
    },

    #[error("Configuration invalid: {message} {location}")]
    ConfigInvalid {
        message: String,
        location: ErrorLocation,
    },

    #[error("Failed to allocate a local port: {source} {location}")]
    PortAllocation {
        #[source]
        source: std::io::Error,
        location: ErrorLocation,
    },

    #[error("Server binary not found at {path} (directory contains: {listing}) {location}")]
    BinaryNotFound {
        path: PathBuf,
        listing: String,
        location: ErrorLocation,
    },

    #[error("Failed to spawn server process: {source} {location}")]
    Spawn {
        #[source]
        source: std::io::Error,
        location: ErrorLocation,
    },

    #[error("Server exited with code {code:?} before becoming ready: {output} {location}")]
    ProcessExited {
        code: Option<i32>,
        output: String,
        location: ErrorLocation,
    },

    #[error("Server failed to become ready within {timeout_secs}s: {output} {location}")]
    StartupTimeout {
        timeout_secs: u64,
        output: String,
        location: ErrorLocation,
    },

    #[error("Health check failed: {message} {location}")]
    HealthCheck {
        message: String,
        location: ErrorLocation,
    },

    #[error("Maximum restart attempts ({max}) exhausted {location}")]
    RestartsExhausted { max: u32, location: ErrorLocation },

    #[error("Another instance is already running (lock file: {path}) {location}")]
    AlreadyRunning {
        path: PathBuf,
        location: ErrorLocation,
    },

    #[error("Failed to acquire lock at {path}: {source} {location}")]
    LockAcquisition {
        path: PathBuf,
        #[source]
        source: std::io::Error,
        location: ErrorLocation,
    },

    #[error("IO error: {source} {location}")]
    Io {
        #[source]
        source: std::io::Error,
        location: ErrorLocation,
    },

    #[error("HTTP error: {source} {location}")]
    Http {
        #[source]
        source: reqwest::Error,
        location: ErrorLocation,
    },
}

impl ServerError {
    /// Whether this error is recoverable via retry
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            Self::HealthCheck { .. } | Self::Http { .. } | Self::StartupTimeout { .. }
        )
    }

    pub fn recovery_hint(&self) -> &'static str {
        match self {
            Self::PortAllocation { .. } => {
                "No local port could be allocated. \
                   Check your network configuration or restart your computer."
            }
            Self::BinaryNotFound { .. } => {
                "The application installation appears incomplete. \
                   Please reinstall Atlas."
            }
            Self::AlreadyRunning { .. } => {
                "Atlas is already running. \
                   Check your system tray or task manager."
            }
            Self::StartupTimeout { .. } => {
                "The backend is taking too long to start. \
                   Try restarting the application or check the logs."
            }
            Self::ProcessExited { .. } => {
                "The backend exited during startup. \
                   The captured output may explain why; check the logs."
            }
            Self::RestartsExhausted { .. } => {
                "The backend keeps crashing. \
                   Please report this issue with the diagnostic logs."
            }
            Self::ConfigInvalid { .. } => {
                "Configuration file has invalid settings. \
                   Check the logs for details or delete the config file to use defaults."
            }
            Self::LockAcquisition { .. } => {
                "Unable to create lock file. \
                   Check file permissions in the application directory."
            }
            Self::DataDirCreation { .. } => {
                "Unable to create application data directory. \
                   Check file permissions or available disk space."
            }
            _ => "An unexpected error occurred. Please check the logs for details.",
        }
    }
}

impl From<std::io::Error> for ServerError {
    #[track_caller]
    fn from(source: std::io::Error) -> Self {
        Self::Io {
            source,
            location: ErrorLocation::from(Location::caller()),
        }
    }
}

impl From<reqwest::Error> for ServerError {
    #[track_caller]
    fn from(source: reqwest::Error) -> Self {
        Self::Http {
            source,
            location: ErrorLocation::from(Location::caller()),
        }
    }
}

pub type Result<T> = std::result::Result<T, ServerError>;
