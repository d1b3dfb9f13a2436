//! Chat room entity and repository trait.
//!
//! Maps to the `chat_rooms` and `chat_room_members` tables.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::shared::error::AppError;
use crate::shared::snowflake::{id_string, id_string_vec};

/// Prefix of every room topic on the message broker.
pub const ROOM_TOPIC_PREFIX: &str = "chat.room.";

/// Broker topic of a room. Deterministic, so any instance derives it
/// without a lookup.
pub fn topic_for(room_id: i64) -> String {
    format!("{}{}", ROOM_TOPIC_PREFIX, room_id)
}

/// Represents a chat room.
///
/// Maps to the `chat_rooms` table:
/// - id: BIGINT PRIMARY KEY (Snowflake ID)
/// - name: VARCHAR(100) NOT NULL
/// - owner_id: BIGINT NOT NULL REFERENCES users(id)
/// - created_at: TIMESTAMPTZ NOT NULL DEFAULT NOW()
///
/// Members live in `chat_room_members (room_id, user_id)`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatRoom {
    /// Snowflake ID (primary key)
    #[serde(with = "id_string")]
    pub id: i64,

    /// Display name
    pub name: String,

    /// User who created the room
    #[serde(with = "id_string")]
    pub owner_id: i64,

    /// Member user ids
    #[serde(with = "id_string_vec")]
    pub member_ids: Vec<i64>,

    /// Creation timestamp
    pub created_at: DateTime<Utc>,
}

impl ChatRoom {
    /// Create a new room whose only member is its owner.
    pub fn new(id: i64, name: impl Into<String>, owner_id: i64) -> Self {
        Self {
            id,
            name: name.into(),
            owner_id,
            member_ids: vec![owner_id],
            created_at: Utc::now(),
        }
    }

    pub fn is_member(&self, user_id: i64) -> bool {
        self.member_ids.contains(&user_id)
    }

    pub fn topic(&self) -> String {
        topic_for(self.id)
    }
}

/// Repository trait for ChatRoom data access operations.
#[async_trait]
pub trait ChatRoomRepository: Send + Sync {
    /// Find a room (with its members) by id.
    async fn find_by_id(&self, id: i64) -> Result<Option<ChatRoom>, AppError>;

    /// Rooms the user is a member of.
    async fn find_by_member(&self, user_id: i64) -> Result<Vec<ChatRoom>, AppError>;

    /// Create a room and its initial memberships.
    async fn create(&self, room: &ChatRoom) -> Result<ChatRoom, AppError>;

    /// Add a member. Returns `false` if the user was already a member.
    async fn add_member(&self, room_id: i64, user_id: i64) -> Result<bool, AppError>;

    /// Membership lookup. `None` when the room does not exist.
    async fn membership(&self, room_id: i64, user_id: i64) -> Result<Option<bool>, AppError>;
}
