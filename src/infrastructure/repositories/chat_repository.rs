//! Chat Repository Implementation
//!
//! PostgreSQL persistence gateway for chats. Writes are append-only; history
//! reads use the snowflake id as a keyset cursor.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::PgPool;

use crate::domain::{Chat, ChatRepository, HistoryQuery};
use crate::shared::error::AppError;

#[derive(Debug, sqlx::FromRow)]
struct ChatRow {
    id: i64,
    room_id: i64,
    sender_id: i64,
    body: String,
    created_at: DateTime<Utc>,
}

impl From<ChatRow> for Chat {
    fn from(row: ChatRow) -> Self {
        Chat {
            id: row.id,
            room_id: row.room_id,
            sender_id: row.sender_id,
            body: row.body,
            timestamp: row.created_at,
        }
    }
}

/// PostgreSQL chat repository implementation.
#[derive(Clone)]
pub struct PgChatRepository {
    pool: PgPool,
}

impl PgChatRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl ChatRepository for PgChatRepository {
    async fn append(&self, chat: &Chat) -> Result<(), AppError> {
        // The id is unique per chat, so a retried append is a no-op.
        sqlx::query(
            r#"
            INSERT INTO chats (id, room_id, sender_id, body, created_at)
            VALUES ($1, $2, $3, $4, $5)
            ON CONFLICT (id) DO NOTHING
            "#,
        )
        .bind(chat.id)
        .bind(chat.room_id)
        .bind(chat.sender_id)
        .bind(&chat.body)
        .bind(chat.timestamp)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn load_history(&self, room_id: i64, query: HistoryQuery) -> Result<Vec<Chat>, AppError> {
        // Newest page first, then flipped to ascending order.
        let mut rows = sqlx::query_as::<_, ChatRow>(
            r#"
            SELECT id, room_id, sender_id, body, created_at
            FROM chats
            WHERE room_id = $1 AND ($2::BIGINT IS NULL OR id < $2)
            ORDER BY id DESC
            LIMIT $3
            "#,
        )
        .bind(room_id)
        .bind(query.before)
        .bind(query.effective_limit())
        .fetch_all(&self.pool)
        .await?;

        rows.reverse();
        Ok(rows.into_iter().map(Chat::from).collect())
    }
}
