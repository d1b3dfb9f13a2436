//! Request Logging Tests

use std::io;
use std::sync::Arc;

use axum::{body::Body, http::Request};
use parking_lot::Mutex;

use crate::common::TestApp;

/// Log sink shared with the subscriber under test.
#[derive(Clone, Default)]
struct Captured(Arc<Mutex<Vec<u8>>>);

impl Captured {
    fn text(&self) -> String {
        String::from_utf8_lossy(&self.0.lock()).into_owned()
    }
}

impl io::Write for Captured {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.0.lock().extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

#[tokio::test]
async fn test_upgrade_token_is_not_logged() {
    let app = TestApp::new();
    let (alice, token) = app.signup("alice").await;
    let room = app.create_room(alice, &[]).await;

    let logs = Captured::default();
    let writer = logs.clone();
    let subscriber = tracing_subscriber::fmt()
        .with_max_level(tracing::Level::TRACE)
        .with_ansi(false)
        .with_writer(move || writer.clone())
        .finish();
    let _guard = tracing::subscriber::set_default(subscriber);

    app.request(
        Request::get(format!("/v1/ws?token={}&rooms={}", token, room))
            .body(Body::empty())
            .unwrap(),
    )
    .await;

    let output = logs.text();
    assert!(output.contains("path=/v1/ws"), "request was not traced: {}", output);
    assert!(!output.contains(&token), "token leaked into logs: {}", output);
    assert!(!output.contains("token="), "query string leaked into logs: {}", output);
}
