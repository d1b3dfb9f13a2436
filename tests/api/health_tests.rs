//! Health Check Tests

use axum::http::StatusCode;
use pretty_assertions::assert_eq;

use crate::common::TestApp;

#[tokio::test]
async fn test_health_check() {
    let app = TestApp::new();

    let (status, body) = app.get("/health").await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "healthy");
    assert!(body["version"].is_string());
}

#[tokio::test]
async fn test_liveness() {
    let app = TestApp::new();

    let (status, _) = app.get("/health/live").await;

    assert_eq!(status, StatusCode::OK);
}

#[tokio::test]
async fn test_readiness_reports_broker_and_websocket() {
    let app = TestApp::new();

    let (status, body) = app.get("/health/ready").await;

    // No database in tests; only the shape and the broker check are fixed.
    assert!(status == StatusCode::OK || status == StatusCode::SERVICE_UNAVAILABLE);
    assert_eq!(body["checks"]["broker"]["status"], "healthy");
    assert_eq!(body["checks"]["broker"]["kind"], "memory");
    assert_eq!(body["checks"]["websocket"]["active_rooms"], 0);
}

#[tokio::test]
async fn test_readiness_fails_when_broker_is_down() {
    let app = TestApp::new();
    app.backend.broker.set_online(false);

    let (status, body) = app.get("/health/ready").await;

    assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
    assert_eq!(body["checks"]["broker"]["status"], "unhealthy");
}

#[tokio::test]
async fn test_metrics_endpoint() {
    let app = TestApp::new();

    let (status, _) = app.get("/metrics").await;

    assert_eq!(status, StatusCode::OK);
}
