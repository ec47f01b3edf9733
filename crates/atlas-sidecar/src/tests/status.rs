use crate::{HealthInfo, HealthStatus, ServerState, build_status};

const HOST: &str = "127.0.0.1";

#[test]
fn test_build_status_running_with_pid() {
    let state = ServerState::Running { port: 8080 };
    let health = HealthStatus::Healthy { latency_ms: 5 };

    let status = build_status(&state, HOST, Some(8080), Some(12345), Some(&health), 0);

    assert_eq!(status.state, "running");
    assert!(status.running);
    assert_eq!(status.port, Some(8080));
    assert_eq!(status.pid, Some(12345));
    assert_eq!(status.base_url, Some("http://127.0.0.1:8080".into()));
    assert_eq!(status.socket_url, Some("ws://127.0.0.1:8080/ws".into()));
    assert!(status.is_healthy);
    assert!(status.error.is_none());
    assert!(status.health.is_some());
}

#[test]
fn test_build_status_starting_no_pid() {
    let state = ServerState::Starting;

    let status = build_status(&state, HOST, None, None, None, 0);

    assert_eq!(status.state, "starting");
    assert!(!status.running);
    assert_eq!(status.port, None);
    assert_eq!(status.pid, None);
    assert!(status.base_url.is_none());
    assert!(!status.is_healthy);
    assert!(status.error.is_none());
}

#[test]
fn test_build_status_stopped() {
    let status = build_status(&ServerState::Stopped, HOST, None, None, None, 0);

    assert_eq!(status.state, "stopped");
    assert!(!status.running);
    assert!(!status.is_healthy);
}

#[test]
fn test_build_status_restarting_with_attempt() {
    let state = ServerState::Restarting { attempt: 2 };

    let status = build_status(&state, HOST, Some(8080), Some(54321), None, 2);

    assert_eq!(status.state, "restarting (attempt 2)");
    assert_eq!(status.restart_count, 2);
    assert!(!status.running);
    assert!(!status.is_healthy);
}

#[test]
fn test_build_status_exhausted_carries_hint() {
    let state = ServerState::Exhausted { restarts: 3 };

    let status = build_status(&state, HOST, None, None, None, 3);

    assert_eq!(status.state, "exhausted");
    assert!(!status.running);
    assert_eq!(status.error, Some("Backend crashed 3 times".into()));
    assert!(status.recovery_hint.is_some());
}

#[test]
fn test_build_status_failed_with_error() {
    let state = ServerState::Failed {
        error: "Server binary not found".into(),
    };

    let status = build_status(&state, HOST, None, None, None, 0);

    assert_eq!(status.state, "failed");
    assert_eq!(status.error, Some("Server binary not found".into()));
    assert!(status.recovery_hint.is_some());
    assert!(!status.is_healthy);
}

#[test]
fn test_build_status_running_but_unhealthy() {
    let state = ServerState::Running { port: 8080 };
    let health = HealthStatus::Unhealthy {
        reason: "Connection refused".into(),
    };

    let status = build_status(&state, HOST, Some(8080), Some(12345), Some(&health), 1);

    assert_eq!(status.state, "running");
    assert!(status.running);
    assert!(!status.is_healthy); // Unhealthy despite running state
    assert!(status.health.is_some());
}

#[test]
fn test_health_info_conversion() {
    let healthy = HealthStatus::Healthy { latency_ms: 10 };
    let info: HealthInfo = (&healthy).into();
    assert_eq!(info.status, "healthy");
    assert_eq!(info.latency_ms, Some(10));

    let starting = HealthStatus::Starting;
    let info: HealthInfo = (&starting).into();
    assert_eq!(info.status, "starting");
    assert_eq!(info.latency_ms, None);

    let unhealthy = HealthStatus::Unhealthy {
        reason: "HTTP 503".into(),
    };
    let info: HealthInfo = (&unhealthy).into();
    assert_eq!(info.status, "unhealthy: HTTP 503");

    let crashed = HealthStatus::Crashed { exit_code: Some(1) };
    let info: HealthInfo = (&crashed).into();
    assert_eq!(info.status, "crashed (code: Some(1))");
}
