//! Redis pub/sub broker.
//!
//! Publishing goes through a `ConnectionManager`; each subscription owns a
//! dedicated pub/sub connection. A supervisor task pings Redis and tracks
//! whether the broker is reachable, retrying with bounded backoff.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures::StreamExt;
use parking_lot::Mutex;
use redis::aio::{ConnectionManager, PubSub};
use redis::{AsyncCommands, Client};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

use super::{Backoff, Broker, BrokerError, MessageCallback, Subscription};
use crate::config::{BrokerSettings, RedisSettings};

/// Broker backed by Redis pub/sub.
pub struct RedisBroker {
    client: Client,
    conn: ConnectionManager,
    connected: Arc<AtomicBool>,
    backoff: Backoff,
    shutdown: CancellationToken,
    supervisor: Mutex<Option<JoinHandle<()>>>,
}

impl RedisBroker {
    /// Connect to Redis. Fails if the first connection cannot be established.
    #[instrument(skip_all, fields(url = %redis.url))]
    pub async fn connect(
        redis: &RedisSettings,
        settings: &BrokerSettings,
    ) -> Result<Arc<Self>, BrokerError> {
        info!("Connecting to Redis broker...");
        let client =
            Client::open(redis.url.as_str()).map_err(|e| BrokerError::Connect(e.to_string()))?;
        let mut conn = ConnectionManager::new(client.clone())
            .await
            .map_err(|e| BrokerError::Connect(e.to_string()))?;
        ping(&mut conn)
            .await
            .map_err(|e| BrokerError::Connect(e.to_string()))?;

        let broker = Arc::new(Self {
            client,
            conn: conn.clone(),
            connected: Arc::new(AtomicBool::new(true)),
            backoff: Backoff::from_settings(settings),
            shutdown: CancellationToken::new(),
            supervisor: Mutex::new(None),
        });

        let handle = tokio::spawn(supervise(
            conn,
            broker.connected.clone(),
            broker.backoff,
            Duration::from_millis(settings.ping_interval_ms.max(1)),
            broker.shutdown.clone(),
        ));
        *broker.supervisor.lock() = Some(handle);

        info!("Redis broker connected");
        Ok(broker)
    }
}

#[async_trait]
impl Broker for RedisBroker {
    async fn publish(&self, topic: &str, payload: String) -> Result<(), BrokerError> {
        if !self.is_connected() {
            return Err(BrokerError::Unavailable);
        }

        let mut conn = self.conn.clone();
        match conn.publish::<_, _, i64>(topic, payload).await {
            Ok(receivers) => {
                debug!(topic = %topic, receivers, "Published to topic");
                Ok(())
            }
            Err(e) => {
                if self.connected.swap(false, Ordering::SeqCst) {
                    warn!(error = %e, "Redis broker connection lost");
                }
                Err(BrokerError::Unavailable)
            }
        }
    }

    async fn subscribe(
        &self,
        topic: &str,
        on_message: MessageCallback,
    ) -> Result<Subscription, BrokerError> {
        if self.shutdown.is_cancelled() {
            return Err(BrokerError::Unavailable);
        }

        let pubsub = open_pubsub(&self.client, topic)
            .await
            .map_err(|e| BrokerError::Subscribe {
                topic: topic.to_string(),
                reason: e.to_string(),
            })?;

        let cancel = self.shutdown.child_token();
        let task = tokio::spawn(run_subscription(
            self.client.clone(),
            topic.to_string(),
            pubsub,
            on_message,
            self.backoff,
            cancel.clone(),
        ));

        debug!(topic = %topic, "Subscribed to Redis channel");
        Ok(Subscription::new(topic.to_string(), cancel, task))
    }

    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst) && !self.shutdown.is_cancelled()
    }

    async fn close(&self) {
        self.shutdown.cancel();
        self.connected.store(false, Ordering::SeqCst);
        let handle = self.supervisor.lock().take();
        if let Some(handle) = handle {
            let _ = handle.await;
        }
        info!("Redis broker closed");
    }

    fn name(&self) -> &'static str {
        "redis"
    }
}

async fn ping(conn: &mut ConnectionManager) -> redis::RedisResult<()> {
    redis::cmd("PING").query_async::<String>(conn).await.map(|_| ())
}

async fn open_pubsub(client: &Client, topic: &str) -> redis::RedisResult<PubSub> {
    let mut pubsub = client.get_async_pubsub().await?;
    pubsub.subscribe(topic).await?;
    Ok(pubsub)
}

/// Track broker reachability. While connected, ping every `interval`;
/// while disconnected, retry with backoff.
async fn supervise(
    mut conn: ConnectionManager,
    connected: Arc<AtomicBool>,
    backoff: Backoff,
    interval: Duration,
    shutdown: CancellationToken,
) {
    let mut attempt = 0u32;
    loop {
        let wait = if connected.load(Ordering::SeqCst) {
            interval
        } else {
            backoff.delay(attempt)
        };

        tokio::select! {
            _ = shutdown.cancelled() => break,
            _ = tokio::time::sleep(wait) => {}
        }

        match ping(&mut conn).await {
            Ok(()) => {
                if !connected.swap(true, Ordering::SeqCst) {
                    info!(attempts = attempt, "Redis broker reconnected");
                }
                attempt = 0;
            }
            Err(e) => {
                if connected.swap(false, Ordering::SeqCst) {
                    warn!(error = %e, "Redis broker connection lost");
                } else {
                    debug!(error = %e, attempt, "Redis broker still unreachable");
                }
                attempt = attempt.saturating_add(1);
            }
        }
    }
    debug!("Redis broker supervisor stopped");
}

/// Deliver messages of one channel to `on_message`, resubscribing with
/// backoff when the pub/sub connection drops.
async fn run_subscription(
    client: Client,
    topic: String,
    initial: PubSub,
    on_message: MessageCallback,
    backoff: Backoff,
    cancel: CancellationToken,
) {
    let mut next = Some(initial);
    let mut attempt = 0u32;

    loop {
        let mut pubsub = match next.take() {
            Some(pubsub) => pubsub,
            None => {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = tokio::time::sleep(backoff.delay(attempt)) => {}
                }
                match open_pubsub(&client, &topic).await {
                    Ok(pubsub) => {
                        info!(topic = %topic, attempts = attempt, "Resubscribed to Redis channel");
                        attempt = 0;
                        pubsub
                    }
                    Err(e) => {
                        warn!(topic = %topic, error = %e, attempt, "Resubscribe failed");
                        attempt = attempt.saturating_add(1);
                        continue;
                    }
                }
            }
        };

        let stream = pubsub.on_message();
        tokio::pin!(stream);
        loop {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    debug!(topic = %topic, "Redis subscription cancelled");
                    return;
                }
                msg = stream.next() => match msg {
                    Some(msg) => match msg.get_payload::<String>() {
                        Ok(payload) => on_message(payload),
                        Err(e) => warn!(topic = %topic, error = %e, "Dropping undecodable payload"),
                    },
                    None => {
                        warn!(topic = %topic, "Redis subscription stream ended");
                        break;
                    }
                },
            }
        }
    }
}
