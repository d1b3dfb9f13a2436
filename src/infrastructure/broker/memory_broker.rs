//! In-process broker for single-instance deployments.
//!
//! Every topic is a `tokio::sync::broadcast` channel, which gives a total
//! order per topic. The broker can be taken offline to exercise the
//! unavailable path.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::RwLock;
use tokio::sync::broadcast;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use super::{Broker, BrokerError, MessageCallback, Subscription};

type Topics = Arc<RwLock<HashMap<String, broadcast::Sender<String>>>>;

/// In-memory pub/sub broker.
pub struct MemoryBroker {
    /// Topic -> broadcast sender
    topics: Topics,
    /// Buffer size of each topic channel
    capacity: usize,
    online: AtomicBool,
    shutdown: CancellationToken,
}

impl MemoryBroker {
    pub fn new(capacity: usize) -> Self {
        Self {
            topics: Arc::new(RwLock::new(HashMap::new())),
            capacity: capacity.max(1),
            online: AtomicBool::new(true),
            shutdown: CancellationToken::new(),
        }
    }

    /// Simulate losing (`false`) or regaining (`true`) the broker connection.
    pub fn set_online(&self, online: bool) {
        self.online.store(online, Ordering::SeqCst);
    }

    /// Number of live subscriptions on a topic.
    pub fn subscriber_count(&self, topic: &str) -> usize {
        self.topics
            .read()
            .get(topic)
            .map(|tx| tx.receiver_count())
            .unwrap_or(0)
    }
}

impl Default for MemoryBroker {
    fn default() -> Self {
        Self::new(1024)
    }
}

#[async_trait]
impl Broker for MemoryBroker {
    async fn publish(&self, topic: &str, payload: String) -> Result<(), BrokerError> {
        if !self.is_connected() {
            return Err(BrokerError::Unavailable);
        }

        let topics = self.topics.read();
        if let Some(tx) = topics.get(topic) {
            // No receivers is not an error: nobody subscribed to this room.
            let _ = tx.send(payload);
        }
        Ok(())
    }

    async fn subscribe(
        &self,
        topic: &str,
        on_message: MessageCallback,
    ) -> Result<Subscription, BrokerError> {
        if !self.is_connected() {
            return Err(BrokerError::Unavailable);
        }

        let rx = self
            .topics
            .write()
            .entry(topic.to_string())
            .or_insert_with(|| broadcast::channel(self.capacity).0)
            .subscribe();

        let cancel = self.shutdown.child_token();
        let task = tokio::spawn(deliver(
            self.topics.clone(),
            topic.to_string(),
            rx,
            on_message,
            cancel.clone(),
        ));

        debug!(topic = %topic, "Subscribed to topic");
        Ok(Subscription::new(topic.to_string(), cancel, task))
    }

    fn is_connected(&self) -> bool {
        self.online.load(Ordering::SeqCst) && !self.shutdown.is_cancelled()
    }

    async fn close(&self) {
        self.shutdown.cancel();
        self.topics.write().clear();
    }

    fn name(&self) -> &'static str {
        "memory"
    }
}

async fn deliver(
    topics: Topics,
    topic: String,
    mut rx: broadcast::Receiver<String>,
    on_message: MessageCallback,
    cancel: CancellationToken,
) {
    loop {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => break,
            msg = rx.recv() => match msg {
                Ok(payload) => on_message(payload),
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    warn!(topic = %topic, skipped, "Subscriber lagged behind topic");
                }
                Err(broadcast::error::RecvError::Closed) => break,
            },
        }
    }

    drop(rx);
    let mut topics = topics.write();
    if topics
        .get(&topic)
        .map(|tx| tx.receiver_count() == 0)
        .unwrap_or(false)
    {
        topics.remove(&topic);
    }
    debug!(topic = %topic, "Topic subscription stopped");
}
