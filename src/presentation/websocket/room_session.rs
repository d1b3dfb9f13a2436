//! Room Sessions
//!
//! One session per room with at least one local connection. A session binds
//! the room's broker subscription to the connection registry:
//!
//! ```text
//! handler -> publish -> ChatRepository::append -> Broker::publish
//!                                                     |
//!            (every instance subscribed to the topic) v
//! handler <- ConnectionRegistry::broadcast_local <- callback
//! ```
//!
//! The sender's own instance receives its messages through the same broker
//! round trip as every other instance, so all members observe broker order.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::Mutex;
use tracing::{debug, error, info, instrument, trace, warn};
use uuid::Uuid;

use super::connection::ConnectionHandle;
use super::messages::ServerFrame;
use super::registry::ConnectionRegistry;
use crate::domain::{topic_for, Chat, ChatRepository, HistoryQuery};
use crate::infrastructure::broker::{Broker, MessageCallback, Subscription};
use crate::infrastructure::metrics;
use crate::shared::error::ChatError;

/// Result of a successful publish.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PublishOutcome {
    /// `false` when the chat was delivered but could not be stored
    pub persisted: bool,
}

/// Observable lifecycle of a room session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionStatus {
    Inactive,
    Active,
}

enum SessionState {
    /// Created, not yet subscribed
    Inactive,
    /// Subscribed to the room topic
    Active(Subscription),
    /// Torn down; a joiner must create a fresh session
    Retired,
}

struct RoomSession {
    room_id: i64,
    topic: String,
    members: AtomicUsize,
    state: Mutex<SessionState>,
}

impl RoomSession {
    fn new(room_id: i64) -> Self {
        Self {
            room_id,
            topic: topic_for(room_id),
            members: AtomicUsize::new(0),
            state: Mutex::new(SessionState::Inactive),
        }
    }
}

/// Owns every room session of this instance.
pub struct RoomSessionManager {
    broker: Arc<dyn Broker>,
    store: Arc<dyn ChatRepository>,
    registry: Arc<ConnectionRegistry>,
    sessions: DashMap<i64, Arc<RoomSession>>,
}

impl RoomSessionManager {
    pub fn new(
        broker: Arc<dyn Broker>,
        store: Arc<dyn ChatRepository>,
        registry: Arc<ConnectionRegistry>,
    ) -> Self {
        Self {
            broker,
            store,
            registry,
            sessions: DashMap::new(),
        }
    }

    pub fn registry(&self) -> &Arc<ConnectionRegistry> {
        &self.registry
    }

    /// Register a connection in a room, activating the room session on the
    /// first local join.
    ///
    /// Fails with `BrokerUnavailable` if the topic subscription cannot be
    /// opened; the connection is then not registered.
    #[instrument(skip(self, connection), fields(connection_id = %connection.id()))]
    pub async fn join(&self, room_id: i64, connection: &ConnectionHandle) -> Result<(), ChatError> {
        loop {
            // Never hold the map guard across an await.
            let session = self
                .sessions
                .entry(room_id)
                .or_insert_with(|| Arc::new(RoomSession::new(room_id)))
                .clone();

            let mut state = session.state.lock().await;
            match &*state {
                SessionState::Retired => {
                    drop(state);
                    tokio::task::yield_now().await;
                    continue;
                }
                SessionState::Inactive => {
                    let callback = self.delivery_callback(room_id);
                    match self.broker.subscribe(&session.topic, callback).await {
                        Ok(subscription) => {
                            *state = SessionState::Active(subscription);
                            metrics::ROOM_SESSIONS_ACTIVE.inc();
                            info!(room_id, topic = %session.topic, "Room session activated");
                        }
                        Err(e) => {
                            warn!(room_id, error = %e, "Failed to subscribe room topic");
                            if session.members.load(Ordering::SeqCst) == 0 {
                                *state = SessionState::Retired;
                                self.sessions
                                    .remove_if(&room_id, |_, s| Arc::ptr_eq(s, &session));
                            }
                            return Err(e.into());
                        }
                    }
                }
                SessionState::Active(_) => {}
            }

            if self.registry.join(room_id, connection) {
                session.members.fetch_add(1, Ordering::SeqCst);
            }
            return Ok(());
        }
    }

    /// Remove a connection from a room. The last local leave closes the
    /// subscription and retires the session. No-op if the connection is not
    /// a member.
    #[instrument(skip(self))]
    pub async fn leave(&self, room_id: i64, connection_id: Uuid) {
        loop {
            let Some(session) = self.sessions.get(&room_id).map(|s| s.value().clone()) else {
                // Sessions were shut down; only the registry entry remains.
                self.registry.leave(room_id, connection_id);
                return;
            };

            let mut state = session.state.lock().await;
            if matches!(*state, SessionState::Retired) {
                drop(state);
                tokio::task::yield_now().await;
                continue;
            }

            if !self.registry.leave(room_id, connection_id) {
                return;
            }
            let remaining = session.members.fetch_sub(1, Ordering::SeqCst).saturating_sub(1);
            if remaining > 0 {
                return;
            }

            if let SessionState::Active(subscription) =
                std::mem::replace(&mut *state, SessionState::Retired)
            {
                subscription.close().await;
                metrics::ROOM_SESSIONS_ACTIVE.dec();
            }
            self.sessions
                .remove_if(&room_id, |_, s| Arc::ptr_eq(s, &session));
            info!(room_id, "Room session deactivated");
            return;
        }
    }

    /// Persist a chat, then publish it to the room topic.
    ///
    /// A storage failure does not stop delivery; it is reported through
    /// `PublishOutcome::persisted`. A broker failure means nobody receives
    /// the chat, the sender included.
    #[instrument(skip(self, chat), fields(chat_id = chat.id, room_id = chat.room_id, sender_id = chat.sender_id))]
    pub async fn publish(&self, chat: &Chat) -> Result<PublishOutcome, ChatError> {
        let payload = serde_json::to_string(chat).map_err(|e| {
            error!(error = %e, "Failed to encode chat");
            ChatError::Persistence(e.to_string())
        })?;

        let persisted = match self.store.append(chat).await {
            Ok(()) => true,
            Err(e) => {
                error!(error = %e, "Failed to persist chat, publishing anyway");
                false
            }
        };

        if let Err(e) = self.broker.publish(&topic_for(chat.room_id), payload).await {
            warn!(error = %e, persisted, "Chat not delivered");
            metrics::record_chat("broker_unavailable");
            return Err(e.into());
        }

        metrics::record_chat(if persisted { "delivered" } else { "unpersisted" });
        debug!(persisted, "Chat published");
        Ok(PublishOutcome { persisted })
    }

    pub async fn load_history(&self, room_id: i64, query: HistoryQuery) -> Result<Vec<Chat>, ChatError> {
        self.store
            .load_history(room_id, query)
            .await
            .map_err(|e| ChatError::Persistence(e.to_string()))
    }

    pub fn status(&self, room_id: i64) -> SessionStatus {
        match self.sessions.get(&room_id) {
            Some(session) if session.members.load(Ordering::SeqCst) > 0 => SessionStatus::Active,
            _ => SessionStatus::Inactive,
        }
    }

    pub fn member_count(&self, room_id: i64) -> usize {
        self.sessions
            .get(&room_id)
            .map(|s| s.members.load(Ordering::SeqCst))
            .unwrap_or(0)
    }

    /// Number of rooms with a session on this instance.
    pub fn active_sessions(&self) -> usize {
        self.sessions.len()
    }

    /// Close every subscription. Connections are cancelled by the server
    /// shutdown token; their late leaves find no session and return.
    pub async fn shutdown(&self) {
        let sessions: Vec<Arc<RoomSession>> =
            self.sessions.iter().map(|s| s.value().clone()).collect();
        self.sessions.clear();

        for session in sessions {
            let mut state = session.state.lock().await;
            if let SessionState::Active(subscription) =
                std::mem::replace(&mut *state, SessionState::Retired)
            {
                subscription.close().await;
                metrics::ROOM_SESSIONS_ACTIVE.dec();
                debug!(room_id = session.room_id, "Room session closed on shutdown");
            }
        }
        info!("Room sessions shut down");
    }

    fn delivery_callback(&self, room_id: i64) -> MessageCallback {
        let registry = self.registry.clone();
        Arc::new(move |payload: String| match serde_json::from_str::<Chat>(&payload) {
            Ok(chat) if chat.room_id == room_id => {
                let chat_id = chat.id;
                let delivered = registry.broadcast_local(room_id, &ServerFrame::Message(chat));
                trace!(room_id, chat_id, delivered, "Chat fanned out");
            }
            Ok(chat) => {
                warn!(room_id, chat_room_id = chat.room_id, "Dropping chat for another room");
            }
            Err(e) => {
                warn!(room_id, error = %e, "Dropping undecodable broker payload");
            }
        })
    }
}
