//! Health check tests.

mod common;

use std::time::Duration;

use common::{config, desired, failing, registry, FakeEngine};
use gg_serving::health::{HealthChecker, HealthConfig, HealthState};
use gg_serving::shutdown::ShutdownState;

#[test]
fn test_alive_always_true() {
    let checker = HealthChecker::default();
    assert!(checker.is_alive());
}

#[test]
fn test_ready_when_running() {
    let checker = HealthChecker::default();
    assert!(checker.is_ready(ShutdownState::Running, &[]));
}

#[test]
fn test_not_ready_when_draining_or_stopped() {
    let checker = HealthChecker::default();
    assert!(!checker.is_ready(ShutdownState::Draining, &[]));
    assert!(!checker.is_ready(ShutdownState::Stopped, &[]));
}

#[tokio::test]
async fn test_ready_requires_available_version_when_configured() {
    let engine = FakeEngine::new();
    let registry = registry(&engine);
    let checker = HealthChecker::new(HealthConfig {
        require_available_version: true,
    });

    registry.reload("m", &desired(&[(1, failing("a"))])).await;
    let report = checker.report(ShutdownState::Running, &registry.snapshot());
    assert!(!report.ready);
    assert_eq!(report.state, HealthState::Degraded);
    assert_eq!(report.versions_failed, 1);

    registry.reload("m", &desired(&[(1, config("a"))])).await;
    let report = checker.report(ShutdownState::Running, &registry.snapshot());
    assert!(report.ready);
    assert_eq!(report.state, HealthState::Healthy);
    assert_eq!(report.versions_available, 1);
    assert_eq!(report.models, 1);
}

#[tokio::test]
async fn test_report_counts_in_flight() {
    let engine = FakeEngine::new();
    let registry = registry(&engine);
    registry.reload("m", &desired(&[(1, config("a"))])).await;
    let _g1 = registry
        .resolve("m", gg_serving::models::VersionRequest::Default, Duration::from_secs(1))
        .await
        .unwrap();
    let _g2 = registry
        .resolve("m", gg_serving::models::VersionRequest::Default, Duration::from_secs(1))
        .await
        .unwrap();

    let report = HealthChecker::default().report(ShutdownState::Running, &registry.snapshot());
    assert_eq!(report.in_flight, 2);
    assert!(report.accepting_requests);
}

#[test]
fn test_unhealthy_when_stopped() {
    let report = HealthChecker::default().report(ShutdownState::Stopped, &[]);
    assert_eq!(report.state, HealthState::Unhealthy);
    assert!(!report.accepting_requests);
    let json = serde_json::to_string(&report).unwrap();
    assert!(json.contains("\"state\":\"Unhealthy\""));
}
