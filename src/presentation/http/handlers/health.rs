//! Health Check Handlers
//!
//! - `GET /health` - process is up, no dependency checks
//! - `GET /health/live` - liveness probe
//! - `GET /health/ready` - readiness probe: database, broker, and the
//!   real-time layer. Answers 503 while the database or the broker is down.

use axum::{extract::State, http::StatusCode, response::IntoResponse, Json};
use chrono::{DateTime, Utc};
use once_cell::sync::Lazy;
use serde::Serialize;
use std::time::{Duration, Instant};

use crate::startup::AppState;

/// Database round trips slower than this report `degraded`.
const DB_DEGRADED_AFTER: Duration = Duration::from_millis(100);

static STARTED: Lazy<(Instant, DateTime<Utc>)> = Lazy::new(|| (Instant::now(), Utc::now()));

/// Pin the uptime origin to server start instead of the first probe.
pub fn init_server_start() {
    Lazy::force(&STARTED);
}

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub version: &'static str,
}

#[derive(Debug, Serialize)]
pub struct LivenessResponse {
    pub status: &'static str,
}

/// Readiness report
#[derive(Debug, Serialize)]
pub struct ReadinessResponse {
    pub status: HealthStatus,
    pub version: &'static str,
    pub uptime_seconds: u64,
    pub started_at: String,
    pub checks: HealthChecks,
}

#[derive(Debug, Serialize)]
pub struct HealthChecks {
    pub database: DatabaseHealth,
    pub broker: BrokerHealth,
    pub websocket: WebSocketHealth,
}

#[derive(Debug, Serialize)]
pub struct DatabaseHealth {
    pub status: HealthStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub latency_ms: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

/// Message broker connection state
#[derive(Debug, Serialize)]
pub struct BrokerHealth {
    pub status: HealthStatus,
    pub kind: &'static str,
}

/// Live connections and room sessions of this instance
#[derive(Debug, Serialize)]
pub struct WebSocketHealth {
    pub status: HealthStatus,
    pub active_connections: usize,
    pub active_rooms: usize,
}

#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq, PartialOrd, Ord)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    Healthy,
    Degraded,
    Unhealthy,
}

pub async fn health_check() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "healthy",
        version: env!("CARGO_PKG_VERSION"),
    })
}

pub async fn liveness() -> Json<LivenessResponse> {
    Json(LivenessResponse { status: "alive" })
}

pub async fn readiness(State(state): State<AppState>) -> impl IntoResponse {
    let (started, started_at) = &*STARTED;

    let database = check_database(&state).await;
    let broker = BrokerHealth {
        status: if state.broker.is_connected() {
            HealthStatus::Healthy
        } else {
            HealthStatus::Unhealthy
        },
        kind: state.broker.name(),
    };
    let websocket = WebSocketHealth {
        status: HealthStatus::Healthy,
        active_connections: state.sessions.registry().connection_count(),
        active_rooms: state.sessions.active_sessions(),
    };

    // Without the broker no chat is delivered, so it weighs like the database.
    let status = overall_status(&[database.status, broker.status]);
    let code = match status {
        HealthStatus::Unhealthy => StatusCode::SERVICE_UNAVAILABLE,
        HealthStatus::Healthy | HealthStatus::Degraded => StatusCode::OK,
    };

    let report = ReadinessResponse {
        status,
        version: env!("CARGO_PKG_VERSION"),
        uptime_seconds: started.elapsed().as_secs(),
        started_at: started_at.to_rfc3339(),
        checks: HealthChecks {
            database,
            broker,
            websocket,
        },
    };

    (code, Json(report))
}

async fn check_database(state: &AppState) -> DatabaseHealth {
    let start = Instant::now();
    match sqlx::query("SELECT 1").execute(&state.db).await {
        Ok(_) => {
            let latency = start.elapsed();
            DatabaseHealth {
                status: if latency < DB_DEGRADED_AFTER {
                    HealthStatus::Healthy
                } else {
                    HealthStatus::Degraded
                },
                latency_ms: Some(latency.as_millis() as u64),
                message: None,
            }
        }
        Err(e) => DatabaseHealth {
            status: HealthStatus::Unhealthy,
            latency_ms: None,
            message: Some(format!("Database connection failed: {}", e)),
        },
    }
}

/// The worst of the individual checks.
fn overall_status(checks: &[HealthStatus]) -> HealthStatus {
    checks.iter().copied().max().unwrap_or(HealthStatus::Healthy)
}
