//! Room Service
//!
//! Room creation, membership management, and history reads. Also the
//! membership collaborator of the real-time core: a room that does not list
//! the user is reported as not found.

use std::sync::Arc;

use async_trait::async_trait;
use serde::Serialize;

use crate::domain::{Chat, ChatRepository, ChatRoom, ChatRoomRepository, HistoryQuery};
use crate::shared::error::{AppError, ChatError};
use crate::shared::snowflake::{id_string, id_string_vec, SnowflakeGenerator};

/// Room service trait
#[async_trait]
pub trait RoomService: Send + Sync {
    /// Create a room owned by `owner_id`, who becomes its first member
    async fn create_room(&self, owner_id: i64, name: &str) -> Result<RoomDto, RoomError>;

    /// Rooms the user is a member of
    async fn list_rooms(&self, user_id: i64) -> Result<Vec<RoomDto>, RoomError>;

    /// Add `user_id` to a room; only members may add members
    async fn add_member(&self, room_id: i64, actor_id: i64, user_id: i64) -> Result<RoomDto, RoomError>;

    /// Ok if the user is a member, `NotFound` otherwise
    async fn check_membership(&self, user_id: i64, room_id: i64) -> Result<(), RoomError>;

    /// History of a room, members only
    async fn history(&self, room_id: i64, user_id: i64, query: HistoryQuery) -> Result<Vec<Chat>, RoomError>;
}

/// Room data transfer object
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RoomDto {
    #[serde(with = "id_string")]
    pub id: i64,
    pub name: String,
    #[serde(with = "id_string")]
    pub owner_id: i64,
    #[serde(with = "id_string_vec")]
    pub member_ids: Vec<i64>,
    pub created_at: String,
}

impl From<ChatRoom> for RoomDto {
    fn from(room: ChatRoom) -> Self {
        Self {
            id: room.id,
            name: room.name,
            owner_id: room.owner_id,
            member_ids: room.member_ids,
            created_at: room.created_at.to_rfc3339(),
        }
    }
}

/// Room service errors
#[derive(Debug, thiserror::Error)]
pub enum RoomError {
    #[error("Room {0} not found")]
    NotFound(i64),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl From<AppError> for RoomError {
    fn from(err: AppError) -> Self {
        RoomError::Internal(err.to_string())
    }
}

impl From<RoomError> for ChatError {
    fn from(err: RoomError) -> Self {
        match err {
            RoomError::NotFound(room_id) => ChatError::RoomNotFound(room_id),
            RoomError::Internal(msg) => ChatError::Persistence(msg),
        }
    }
}

impl From<RoomError> for AppError {
    fn from(err: RoomError) -> Self {
        match err {
            RoomError::NotFound(room_id) => AppError::NotFound(format!("Room {} not found", room_id)),
            RoomError::Internal(msg) => AppError::Internal(msg),
        }
    }
}

/// RoomService implementation
pub struct RoomServiceImpl<R, C>
where
    R: ChatRoomRepository,
    C: ChatRepository,
{
    room_repo: Arc<R>,
    chat_repo: Arc<C>,
    id_generator: Arc<SnowflakeGenerator>,
}

impl<R, C> RoomServiceImpl<R, C>
where
    R: ChatRoomRepository,
    C: ChatRepository,
{
    pub fn new(room_repo: Arc<R>, chat_repo: Arc<C>, id_generator: Arc<SnowflakeGenerator>) -> Self {
        Self {
            room_repo,
            chat_repo,
            id_generator,
        }
    }
}

#[async_trait]
impl<R, C> RoomService for RoomServiceImpl<R, C>
where
    R: ChatRoomRepository + 'static,
    C: ChatRepository + 'static,
{
    async fn create_room(&self, owner_id: i64, name: &str) -> Result<RoomDto, RoomError> {
        let room = ChatRoom::new(self.id_generator.generate(), name, owner_id);
        let created = self.room_repo.create(&room).await?;
        tracing::info!(room_id = created.id, owner_id, "Room created");
        Ok(created.into())
    }

    async fn list_rooms(&self, user_id: i64) -> Result<Vec<RoomDto>, RoomError> {
        let rooms = self.room_repo.find_by_member(user_id).await?;
        Ok(rooms.into_iter().map(RoomDto::from).collect())
    }

    async fn add_member(&self, room_id: i64, actor_id: i64, user_id: i64) -> Result<RoomDto, RoomError> {
        self.check_membership(actor_id, room_id).await?;

        if self.room_repo.add_member(room_id, user_id).await? {
            tracing::info!(room_id, user_id, actor_id, "Member added to room");
        }

        self.room_repo
            .find_by_id(room_id)
            .await?
            .map(RoomDto::from)
            .ok_or(RoomError::NotFound(room_id))
    }

    async fn check_membership(&self, user_id: i64, room_id: i64) -> Result<(), RoomError> {
        match self.room_repo.membership(room_id, user_id).await? {
            Some(true) => Ok(()),
            Some(false) | None => Err(RoomError::NotFound(room_id)),
        }
    }

    async fn history(&self, room_id: i64, user_id: i64, query: HistoryQuery) -> Result<Vec<Chat>, RoomError> {
        self.check_membership(user_id, room_id).await?;
        Ok(self.chat_repo.load_history(room_id, query).await?)
    }
}
