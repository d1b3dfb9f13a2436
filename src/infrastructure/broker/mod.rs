//! Broker Module
//!
//! Topic publish/subscribe used to fan chat messages out to every server
//! instance that serves a room.
//!
//! This module provides:
//! - A `Broker` trait abstracting topic publish and subscribe-with-callback
//! - A `RedisBroker` backed by Redis pub/sub with reconnect-on-failure
//! - A `MemoryBroker` for single-instance deployments and tests
//!
//! # Architecture
//!
//! ```text
//! +-------------------+
//! |   Room Session    |
//! +-------------------+
//!          |
//!          v
//! +-------------------+
//! |   Broker Trait    |  <-- Abstract interface
//! +-------------------+
//!       |        |
//!       v        v
//! +-----------+ +--------------+
//! |RedisBroker| | MemoryBroker |
//! +-----------+ +--------------+
//! ```
//!
//! Publishing is fire-and-forget. While the broker connection is down,
//! `publish` fails immediately with `BrokerError::Unavailable`; nothing is
//! queued, so there is no stale replay after a reconnect.

mod memory_broker;
mod redis_broker;

pub use memory_broker::MemoryBroker;
pub use redis_broker::RedisBroker;

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{info, instrument};

use crate::config::{BrokerKind, BrokerSettings, RedisSettings};
use crate::shared::error::ChatError;

/// Callback invoked once per delivered payload, in broker order.
pub type MessageCallback = Arc<dyn Fn(String) + Send + Sync>;

/// Broker errors
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum BrokerError {
    #[error("Broker unavailable")]
    Unavailable,

    #[error("Broker connection failed: {0}")]
    Connect(String),

    #[error("Subscribe to {topic} failed: {reason}")]
    Subscribe { topic: String, reason: String },
}

impl From<BrokerError> for ChatError {
    fn from(_: BrokerError) -> Self {
        ChatError::BrokerUnavailable
    }
}

/// Topic publish/subscribe contract.
#[async_trait]
pub trait Broker: Send + Sync {
    /// Publish a payload to a topic. Fire-and-forget.
    async fn publish(&self, topic: &str, payload: String) -> Result<(), BrokerError>;

    /// Register a callback for every payload delivered on `topic`.
    ///
    /// Callbacks of one subscription run sequentially on a single task.
    async fn subscribe(
        &self,
        topic: &str,
        on_message: MessageCallback,
    ) -> Result<Subscription, BrokerError>;

    /// Whether a broker connection is currently established.
    fn is_connected(&self) -> bool;

    /// Close the broker connection and stop every subscription.
    async fn close(&self);

    /// Short name for logs and health output.
    fn name(&self) -> &'static str;
}

/// Handle of an active topic subscription.
///
/// Dropping the handle cancels the subscription; `close` additionally waits
/// until the delivery task has stopped, after which no callback runs.
pub struct Subscription {
    topic: String,
    cancel: CancellationToken,
    task: Option<JoinHandle<()>>,
}

impl Subscription {
    pub(crate) fn new(topic: String, cancel: CancellationToken, task: JoinHandle<()>) -> Self {
        Self {
            topic,
            cancel,
            task: Some(task),
        }
    }

    pub fn topic(&self) -> &str {
        &self.topic
    }

    pub fn is_closed(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Cancel and wait for the delivery task to finish.
    pub async fn close(mut self) {
        self.cancel.cancel();
        if let Some(task) = self.task.take() {
            let _ = task.await;
        }
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

impl std::fmt::Debug for Subscription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Subscription")
            .field("topic", &self.topic)
            .field("closed", &self.is_closed())
            .finish()
    }
}

/// Bounded exponential backoff for reconnect attempts.
#[derive(Debug, Clone, Copy)]
pub struct Backoff {
    base: Duration,
    max: Duration,
}

impl Backoff {
    pub fn new(base: Duration, max: Duration) -> Self {
        Self {
            base,
            max: max.max(base),
        }
    }

    pub fn from_settings(settings: &BrokerSettings) -> Self {
        Self::new(
            Duration::from_millis(settings.reconnect_base_ms),
            Duration::from_millis(settings.reconnect_max_ms),
        )
    }

    /// Delay before the given (zero-based) attempt.
    pub fn delay(&self, attempt: u32) -> Duration {
        let factor = 1u32.checked_shl(attempt.min(16)).unwrap_or(u32::MAX);
        self.base.saturating_mul(factor).min(self.max)
    }
}

/// Create the configured broker. Fails fast: broker access is mandatory.
#[instrument(skip_all, fields(kind = ?settings.kind))]
pub async fn create_broker(
    settings: &BrokerSettings,
    redis: &RedisSettings,
) -> Result<Arc<dyn Broker>, BrokerError> {
    let broker: Arc<dyn Broker> = match settings.kind {
        BrokerKind::Redis => RedisBroker::connect(redis, settings).await?,
        BrokerKind::Memory => Arc::new(MemoryBroker::new(settings.memory_capacity)),
    };
    info!(broker = broker.name(), "Message broker ready");
    Ok(broker)
}
