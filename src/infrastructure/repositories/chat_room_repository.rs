//! Chat Room Repository Implementation
//!
//! PostgreSQL implementation of the ChatRoomRepository trait over the
//! `chat_rooms` and `chat_room_members` tables.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::PgPool;

use crate::domain::{ChatRoom, ChatRoomRepository};
use crate::shared::error::AppError;

#[derive(Debug, sqlx::FromRow)]
struct ChatRoomRow {
    id: i64,
    name: String,
    owner_id: i64,
    created_at: DateTime<Utc>,
    member_ids: Vec<i64>,
}

impl From<ChatRoomRow> for ChatRoom {
    fn from(row: ChatRoomRow) -> Self {
        ChatRoom {
            id: row.id,
            name: row.name,
            owner_id: row.owner_id,
            member_ids: row.member_ids,
            created_at: row.created_at,
        }
    }
}

/// Rooms with their member ids aggregated in join order.
const SELECT_ROOMS: &str = r#"
    SELECT r.id, r.name, r.owner_id, r.created_at,
           COALESCE(
               ARRAY_AGG(m.user_id ORDER BY m.joined_at, m.user_id)
                   FILTER (WHERE m.user_id IS NOT NULL),
               '{}'
           ) AS member_ids
    FROM chat_rooms r
    LEFT JOIN chat_room_members m ON m.room_id = r.id
"#;

/// PostgreSQL chat room repository implementation.
#[derive(Clone)]
pub struct PgChatRoomRepository {
    pool: PgPool,
}

impl PgChatRoomRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl ChatRoomRepository for PgChatRoomRepository {
    async fn find_by_id(&self, id: i64) -> Result<Option<ChatRoom>, AppError> {
        let query = format!("{} WHERE r.id = $1 GROUP BY r.id", SELECT_ROOMS);
        let row = sqlx::query_as::<_, ChatRoomRow>(&query)
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;

        Ok(row.map(ChatRoom::from))
    }

    async fn find_by_member(&self, user_id: i64) -> Result<Vec<ChatRoom>, AppError> {
        let query = format!(
            "{} WHERE r.id IN (SELECT room_id FROM chat_room_members WHERE user_id = $1) \
             GROUP BY r.id ORDER BY r.id",
            SELECT_ROOMS
        );
        let rows = sqlx::query_as::<_, ChatRoomRow>(&query)
            .bind(user_id)
            .fetch_all(&self.pool)
            .await?;

        Ok(rows.into_iter().map(ChatRoom::from).collect())
    }

    async fn create(&self, room: &ChatRoom) -> Result<ChatRoom, AppError> {
        let mut tx = self.pool.begin().await?;

        sqlx::query(
            r#"
            INSERT INTO chat_rooms (id, name, owner_id, created_at)
            VALUES ($1, $2, $3, $4)
            "#,
        )
        .bind(room.id)
        .bind(&room.name)
        .bind(room.owner_id)
        .bind(room.created_at)
        .execute(&mut *tx)
        .await?;

        for user_id in &room.member_ids {
            sqlx::query(
                r#"
                INSERT INTO chat_room_members (room_id, user_id)
                VALUES ($1, $2)
                ON CONFLICT DO NOTHING
                "#,
            )
            .bind(room.id)
            .bind(user_id)
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;
        Ok(room.clone())
    }

    async fn add_member(&self, room_id: i64, user_id: i64) -> Result<bool, AppError> {
        let result = sqlx::query(
            r#"
            INSERT INTO chat_room_members (room_id, user_id)
            VALUES ($1, $2)
            ON CONFLICT DO NOTHING
            "#,
        )
        .bind(room_id)
        .bind(user_id)
        .execute(&self.pool)
        .await
        .map_err(|e| match e {
            sqlx::Error::Database(ref db_err) if db_err.is_foreign_key_violation() => {
                AppError::NotFound("User or room not found".into())
            }
            _ => AppError::Database(e),
        })?;

        Ok(result.rows_affected() > 0)
    }

    async fn membership(&self, room_id: i64, user_id: i64) -> Result<Option<bool>, AppError> {
        let row: Option<(bool,)> = sqlx::query_as(
            r#"
            SELECT EXISTS(
                SELECT 1 FROM chat_room_members WHERE room_id = r.id AND user_id = $2
            )
            FROM chat_rooms r
            WHERE r.id = $1
            "#,
        )
        .bind(room_id)
        .bind(user_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(|(is_member,)| is_member))
    }
}
