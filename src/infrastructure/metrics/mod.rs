//! Prometheus Metrics Module
//!
//! # Metrics Collected
//! - Active WebSocket connections
//! - Active room sessions (rooms with a live broker subscription)
//! - Chat messages by publish outcome
//! - Slow-consumer evictions

use once_cell::sync::Lazy;
use prometheus::{Encoder, IntCounter, IntCounterVec, IntGauge, Opts, Registry, TextEncoder};

/// Global metrics registry
pub static REGISTRY: Lazy<Registry> = Lazy::new(|| {
    let registry = Registry::new();
    register_metrics(&registry);
    registry
});

/// Active WebSocket connections gauge
pub static WEBSOCKET_CONNECTIONS_ACTIVE: Lazy<IntGauge> = Lazy::new(|| {
    IntGauge::with_opts(
        Opts::new(
            "websocket_connections_active",
            "Number of active WebSocket connections",
        )
        .namespace("chat_relay"),
    )
    .expect("Failed to create WEBSOCKET_CONNECTIONS_ACTIVE metric")
});

/// Room sessions currently subscribed to their broker topic
pub static ROOM_SESSIONS_ACTIVE: Lazy<IntGauge> = Lazy::new(|| {
    IntGauge::with_opts(
        Opts::new("room_sessions_active", "Number of active room sessions")
            .namespace("chat_relay"),
    )
    .expect("Failed to create ROOM_SESSIONS_ACTIVE metric")
});

/// Chat publish attempts by outcome ("delivered", "unpersisted", "broker_unavailable")
pub static CHAT_MESSAGES_TOTAL: Lazy<IntCounterVec> = Lazy::new(|| {
    IntCounterVec::new(
        Opts::new("chat_messages_total", "Chat publish attempts by outcome")
            .namespace("chat_relay"),
        &["outcome"],
    )
    .expect("Failed to create CHAT_MESSAGES_TOTAL metric")
});

/// Connections disconnected because their outbound buffer was full
pub static SLOW_CONSUMER_EVICTIONS_TOTAL: Lazy<IntCounter> = Lazy::new(|| {
    IntCounter::with_opts(
        Opts::new(
            "slow_consumer_evictions_total",
            "Connections evicted for a full outbound buffer",
        )
        .namespace("chat_relay"),
    )
    .expect("Failed to create SLOW_CONSUMER_EVICTIONS_TOTAL metric")
});

fn register_metrics(registry: &Registry) {
    let collectors: Vec<Box<dyn prometheus::core::Collector>> = vec![
        Box::new(WEBSOCKET_CONNECTIONS_ACTIVE.clone()),
        Box::new(ROOM_SESSIONS_ACTIVE.clone()),
        Box::new(CHAT_MESSAGES_TOTAL.clone()),
        Box::new(SLOW_CONSUMER_EVICTIONS_TOTAL.clone()),
    ];
    for collector in collectors {
        if let Err(e) = registry.register(collector) {
            tracing::warn!(error = %e, "Failed to register metric");
        }
    }
}

/// Collect and encode all metrics as Prometheus text format
pub fn gather_metrics() -> String {
    let encoder = TextEncoder::new();
    let metric_families = REGISTRY.gather();
    let mut buffer = Vec::new();
    if let Err(e) = encoder.encode(&metric_families, &mut buffer) {
        tracing::error!(error = %e, "Failed to encode metrics");
        return String::new();
    }
    String::from_utf8(buffer).unwrap_or_default()
}

/// Record the outcome of one chat publish
pub fn record_chat(outcome: &str) {
    CHAT_MESSAGES_TOTAL.with_label_values(&[outcome]).inc();
}
