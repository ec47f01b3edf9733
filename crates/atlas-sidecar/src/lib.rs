//! Sidecar supervisor for the Atlas desktop backend.
//!
//! The desktop shell owns one [`ServerSupervisor`], constructed at
//! startup and handed by reference to its IPC handlers and status
//! views. The supervisor allocates a loopback port, resolves which
//! backend artifact to launch for the current build mode, watches the
//! process output for the readiness banner, probes the health
//! endpoint for the process lifetime, restarts crashed or unhealthy
//! backends within a bounded budget, and tears everything down on
//! shutdown.
//!
//! ```no_run
//! use atlas_sidecar::{BuildMode, ServerPaths, ServerSupervisor, SupervisorConfig};
//!
//! # async fn run() -> Result<(), atlas_sidecar::ServerError> {
//! let paths = ServerPaths {
//!     service_dir: "/opt/atlas/backend".into(),
//!     resource_dir: "/opt/atlas/resources".into(),
//!     data_dir: "/home/user/.local/share/atlas".into(),
//! };
//! let config = SupervisorConfig::load_or_create(&paths.data_dir)?;
//! let supervisor = ServerSupervisor::new(paths, BuildMode::Packaged, config);
//!
//! supervisor.start().await?;
//! assert!(supervisor.status().running);
//! supervisor.stop().await?;
//! # Ok(())
//! # }
//! ```

mod logging;
mod server;

pub use logging::{current_log_path, setup_logging};
pub use server::{
    BackoffPolicy, BuildMode, CONFIG_VERSION, ExecutableResolver, HealthChecker, HealthInfo,
    HealthStatus, LaunchPlan, LockFile, LoggingSettings, PortAllocator, ResilienceSettings,
    ServerCommand, ServerError, ServerPaths, ServerResult, ServerSettings, ServerState,
    ServerSupervisor, SupervisorConfig, SupervisorStatus, build_status,
};

#[cfg(test)]
mod tests;
