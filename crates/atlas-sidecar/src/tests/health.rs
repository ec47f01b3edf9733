use crate::{HealthChecker, HealthStatus, PortAllocator};

use std::time::Duration;

use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

const PROBE_TIMEOUT: Duration = Duration::from_secs(2);

#[tokio::test]
async fn test_probe_healthy_on_200() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/health"))
        .respond_with(ResponseTemplate::new(200))
        .mount(&server)
        .await;

    let checker = HealthChecker::new(server.address().port(), PROBE_TIMEOUT);

    assert!(checker.probe().await.is_healthy());
    // Result is cached for synchronous snapshots.
    assert!(checker.status().is_healthy());
}

#[tokio::test]
async fn test_probe_unhealthy_on_error_status() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/health"))
        .respond_with(ResponseTemplate::new(503))
        .mount(&server)
        .await;

    let checker = HealthChecker::new(server.address().port(), PROBE_TIMEOUT);

    match checker.probe().await {
        HealthStatus::Unhealthy { reason } => {
            assert!(reason.contains("503"), "reason was: {reason}");
        }
        other => panic!("expected Unhealthy, got: {other:?}"),
    }
}

#[tokio::test]
async fn test_probe_unhealthy_on_redirect_status() {
    // Anything but 200 is unhealthy, even other success-family codes.
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/health"))
        .respond_with(ResponseTemplate::new(204))
        .mount(&server)
        .await;

    let checker = HealthChecker::new(server.address().port(), PROBE_TIMEOUT);
    assert!(!checker.probe().await.is_healthy());
}

#[tokio::test]
async fn test_probe_unhealthy_on_connection_refused() {
    // An allocated-then-released port has no listener behind it.
    let port = PortAllocator::allocate().unwrap();
    let checker = HealthChecker::new(port, PROBE_TIMEOUT);

    assert!(matches!(
        checker.probe().await,
        HealthStatus::Unhealthy { .. }
    ));
    assert!(!checker.status().is_healthy());
}

#[tokio::test]
async fn test_initial_status_is_starting() {
    let checker = HealthChecker::new(1, PROBE_TIMEOUT);
    assert_eq!(checker.status(), HealthStatus::Starting);
}

#[tokio::test]
async fn test_set_status_overrides_cache() {
    let checker = HealthChecker::new(1, PROBE_TIMEOUT);
    checker.set_status(HealthStatus::ShuttingDown);
    assert_eq!(checker.status(), HealthStatus::ShuttingDown);
}
