//! Liveness probing of the backend's health endpoint.

use std::sync::{PoisonError, RwLock};
use std::time::{Duration, Instant};

const HOST: &str = "127.0.0.1";
const HEALTH_ENDPOINT: &str = "health";

/// Current health of the backend process.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HealthStatus {
    /// Backend answered the probe with HTTP 200
    Healthy { latency_ms: u64 },
    /// Backend is starting up
    Starting,
    /// Probe failed: wrong status, timeout, or connection refused
    Unhealthy { reason: String },
    /// Backend process exited unexpectedly
    Crashed { exit_code: Option<i32> },
    /// Backend is shutting down gracefully
    ShuttingDown,
    /// Backend is stopped
    Stopped,
}

impl HealthStatus {
    pub fn is_healthy(&self) -> bool {
        matches!(self, HealthStatus::Healthy { .. })
    }
}

/// Probes `GET /health` on one backend generation's port.
///
/// Only HTTP 200 counts as healthy; any other status, a timeout, or
/// a refused connection is unhealthy. The last observed status is
/// cached for synchronous snapshots.
pub struct HealthChecker {
    client: reqwest::Client,
    port: u16,
    status: RwLock<HealthStatus>,
}

impl HealthChecker {
    /// Create a health checker for the given port with a per-probe
    /// request timeout.
    pub fn new(port: u16, probe_timeout: Duration) -> Self {
        let client = reqwest::Client::builder()
            .timeout(probe_timeout)
            .pool_max_idle_per_host(1)
            .build()
            .expect("Failed to create HTTP client");

        Self {
            client,
            port,
            status: RwLock::new(HealthStatus::Starting),
        }
    }

    /// Perform a single probe against the backend and record the result.
    pub async fn probe(&self) -> HealthStatus {
        let start = Instant::now();
        let url = format!("http://{HOST}:{}/{HEALTH_ENDPOINT}", self.port);

        let new_status = match self.client.get(&url).send().await {
            Ok(resp) if resp.status() == reqwest::StatusCode::OK => HealthStatus::Healthy {
                latency_ms: start.elapsed().as_millis() as u64,
            },
            Ok(resp) => HealthStatus::Unhealthy {
                reason: format!("HTTP {}", resp.status()),
            },
            Err(e) => HealthStatus::Unhealthy {
                reason: e.to_string(),
            },
        };

        self.set_status(new_status.clone());
        new_status
    }

    /// Last observed status, without issuing a probe.
    pub fn status(&self) -> HealthStatus {
        self.status
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Set status directly (for crash/shutdown notifications).
    pub fn set_status(&self, status: HealthStatus) {
        *self.status.write().unwrap_or_else(PoisonError::into_inner) = status;
    }

    pub fn port(&self) -> u16 {
        self.port
    }
}
