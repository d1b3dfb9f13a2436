//! Chat message entity and the persistence gateway trait.
//!
//! Maps to the `chats` table in the database schema.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::shared::error::AppError;
use crate::shared::snowflake::id_string;

/// Default number of chats returned by a history read.
pub const DEFAULT_HISTORY_LIMIT: i64 = 50;

/// Upper bound of a single history read.
pub const MAX_HISTORY_LIMIT: i64 = 100;

/// A single chat message.
///
/// Created once per inbound client frame and immutable afterwards. The
/// snowflake `id` is also the delivery sequence marker. This is the payload
/// carried on the broker topic.
///
/// Maps to the `chats` table:
/// - id: BIGINT PRIMARY KEY (Snowflake ID)
/// - room_id: BIGINT NOT NULL REFERENCES chat_rooms(id)
/// - sender_id: BIGINT NOT NULL REFERENCES users(id)
/// - body: TEXT NOT NULL
/// - created_at: TIMESTAMPTZ NOT NULL
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Chat {
    #[serde(with = "id_string")]
    pub id: i64,
    #[serde(with = "id_string")]
    pub room_id: i64,
    #[serde(with = "id_string")]
    pub sender_id: i64,
    pub body: String,
    pub timestamp: DateTime<Utc>,
}

impl Chat {
    pub fn new(id: i64, room_id: i64, sender_id: i64, body: impl Into<String>) -> Self {
        Self {
            id,
            room_id,
            sender_id,
            body: body.into(),
            timestamp: Utc::now(),
        }
    }
}

/// Keyset pagination for history reads.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
pub struct HistoryQuery {
    /// Only chats with an id lower than this cursor
    pub before: Option<i64>,
    /// Maximum number of chats
    pub limit: Option<i64>,
}

impl HistoryQuery {
    pub fn latest(limit: i64) -> Self {
        Self {
            before: None,
            limit: Some(limit),
        }
    }

    /// Limit clamped to `1..=MAX_HISTORY_LIMIT`.
    pub fn effective_limit(&self) -> i64 {
        self.limit
            .unwrap_or(DEFAULT_HISTORY_LIMIT)
            .clamp(1, MAX_HISTORY_LIMIT)
    }
}

/// Persistence gateway for chats: append-only writes and history reads.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait ChatRepository: Send + Sync {
    /// Persist a chat exactly once.
    async fn append(&self, chat: &Chat) -> Result<(), AppError>;

    /// Chats of a room in ascending id order, honoring the query cursor.
    async fn load_history(&self, room_id: i64, query: HistoryQuery) -> Result<Vec<Chat>, AppError>;
}
