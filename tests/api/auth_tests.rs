//! Authentication API Tests

use axum::http::StatusCode;
use pretty_assertions::assert_eq;
use serde_json::json;

use crate::common::TestApp;

#[tokio::test]
async fn test_signup_returns_user_and_token() {
    let app = TestApp::new();

    let (status, body) = app
        .post_json(
            "/v1/api/auth/signup",
            json!({ "username": "alice", "email": "alice@example.com", "password": "password123" }),
        )
        .await;

    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(body["user"]["username"], "alice");
    assert_eq!(body["token_type"], "Bearer");
    assert!(body["access_token"].is_string());
}

#[tokio::test]
async fn test_signup_validation_error() {
    let app = TestApp::new();

    let (status, body) = app
        .post_json(
            "/v1/api/auth/signup",
            json!({ "username": "a", "email": "not-an-email", "password": "short" }),
        )
        .await;

    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["code"], 10007);
}

#[tokio::test]
async fn test_duplicate_signup_conflicts() {
    let app = TestApp::new();
    app.signup("alice").await;

    let (status, _) = app
        .post_json(
            "/v1/api/auth/signup",
            json!({ "username": "alice", "email": "alice@example.com", "password": "password123" }),
        )
        .await;

    assert_eq!(status, StatusCode::CONFLICT);
}

#[tokio::test]
async fn test_login_issues_usable_token() {
    let app = TestApp::new();
    let (user_id, _) = app.signup("alice").await;

    let (status, body) = app
        .post_json(
            "/v1/api/auth/login",
            json!({ "email": "alice@example.com", "password": "password123" }),
        )
        .await;

    assert_eq!(status, StatusCode::OK);
    let token = body["access_token"].as_str().unwrap();
    tokio_test::assert_ok!(app.state.auth.validate_token(token));
    assert_eq!(app.state.auth.validate_token(token).unwrap(), user_id);
}

#[tokio::test]
async fn test_login_wrong_password() {
    let app = TestApp::new();
    app.signup("alice").await;

    let (status, _) = app
        .post_json(
            "/v1/api/auth/login",
            json!({ "email": "alice@example.com", "password": "wrong-password" }),
        )
        .await;

    assert_eq!(status, StatusCode::UNAUTHORIZED);
}
