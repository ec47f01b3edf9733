//! Snapshot projection of supervisor state for the owning application.

use crate::server::{HealthStatus, ServerState};

use serde::Serialize;

/// Point-in-time view of the supervised backend.
///
/// Built synchronously from cached state; safe to call from UI-facing
/// handlers at any frequency.
#[derive(Debug, Clone, Serialize)]
pub struct SupervisorStatus {
    pub state: String,
    pub running: bool,
    pub port: Option<u16>,
    pub pid: Option<u32>,
    pub base_url: Option<String>,
    pub socket_url: Option<String>,
    pub health: Option<HealthInfo>,
    pub restart_count: u32,
    pub error: Option<String>,
    pub recovery_hint: Option<String>,
    pub is_healthy: bool,
}

/// Health information flattened for display.
#[derive(Debug, Clone, Serialize)]
pub struct HealthInfo {
    pub status: String,
    pub latency_ms: Option<u64>,
}

impl From<&HealthStatus> for HealthInfo {
    fn from(status: &HealthStatus) -> Self {
        match status {
            HealthStatus::Healthy { latency_ms } => HealthInfo {
                status: "healthy".into(),
                latency_ms: Some(*latency_ms),
            },
            HealthStatus::Starting => HealthInfo {
                status: "starting".into(),
                latency_ms: None,
            },
            HealthStatus::Unhealthy { reason } => HealthInfo {
                status: format!("unhealthy: {reason}"),
                latency_ms: None,
            },
            HealthStatus::Crashed { exit_code } => HealthInfo {
                status: format!("crashed (code: {exit_code:?})"),
                latency_ms: None,
            },
            HealthStatus::ShuttingDown => HealthInfo {
                status: "shutting_down".into(),
                latency_ms: None,
            },
            HealthStatus::Stopped => HealthInfo {
                status: "stopped".into(),
                latency_ms: None,
            },
        }
    }
}

pub fn base_url_for(host: &str, port: u16) -> String {
    format!("http://{host}:{port}")
}

pub fn socket_url_for(host: &str, port: u16) -> String {
    format!("ws://{host}:{port}/ws")
}

/// Converts internal supervisor state to the outward-facing status.
///
/// Shared by the synchronous `status()` accessor and state change
/// events. Health is optional since no checker exists before the
/// first launch.
pub fn build_status(
    state: &ServerState,
    host: &str,
    port: Option<u16>,
    pid: Option<u32>,
    health: Option<&HealthStatus>,
    restart_count: u32,
) -> SupervisorStatus {
    let (state_str, error, recovery_hint) = match state {
        ServerState::Stopped => ("stopped".into(), None, None),
        ServerState::Starting => ("starting".into(), None, None),
        ServerState::Running { .. } => ("running".into(), None, None),
        ServerState::Restarting { attempt } => {
            (format!("restarting (attempt {attempt})"), None, None)
        }
        ServerState::ShuttingDown => ("shutting_down".into(), None, None),
        ServerState::Exhausted { restarts } => (
            "exhausted".into(),
            Some(format!("Backend crashed {restarts} times")),
            Some("Automatic recovery gave up. Restart the backend manually.".into()),
        ),
        ServerState::Failed { error } => (
            "failed".into(),
            Some(error.clone()),
            Some("Please check the logs or restart the application.".into()),
        ),
    };

    let running = matches!(state, ServerState::Running { .. });
    let is_healthy = running && health.is_some_and(HealthStatus::is_healthy);

    SupervisorStatus {
        state: state_str,
        running,
        base_url: port.map(|p| base_url_for(host, p)),
        socket_url: port.map(|p| socket_url_for(host, p)),
        port,
        pid,
        health: health.map(HealthInfo::from),
        restart_count,
        error,
        recovery_hint,
        is_healthy,
    }
}
