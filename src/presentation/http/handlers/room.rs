//! Room Handlers
//!
//! Room management and history. All routes require an authenticated user.

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    Extension, Json,
};
use validator::Validate;

use crate::application::dto::request::{AddMemberRequest, CreateRoomRequest};
use crate::application::services::RoomDto;
use crate::domain::{Chat, HistoryQuery};
use crate::presentation::middleware::AuthUser;
use crate::shared::error::AppError;
use crate::shared::validation::validation_error;
use crate::startup::AppState;

/// Create a room; the caller becomes its first member
pub async fn create_room(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthUser>,
    Json(body): Json<CreateRoomRequest>,
) -> Result<(StatusCode, Json<RoomDto>), AppError> {
    body.validate().map_err(validation_error)?;

    let room = state.rooms.create_room(auth.user_id, &body.name).await?;
    Ok((StatusCode::CREATED, Json(room)))
}

/// Rooms of the caller
pub async fn list_rooms(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthUser>,
) -> Result<Json<Vec<RoomDto>>, AppError> {
    Ok(Json(state.rooms.list_rooms(auth.user_id).await?))
}

/// Add a user to a room the caller belongs to
pub async fn add_member(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthUser>,
    Path(room_id): Path<i64>,
    Json(body): Json<AddMemberRequest>,
) -> Result<Json<RoomDto>, AppError> {
    let room = state
        .rooms
        .add_member(room_id, auth.user_id, body.user_id)
        .await?;
    Ok(Json(room))
}

/// Chat history, oldest first: `?before=<chat id>&limit=<n>`
pub async fn get_chats(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthUser>,
    Path(room_id): Path<i64>,
    Query(query): Query<HistoryQuery>,
) -> Result<Json<Vec<Chat>>, AppError> {
    let chats = state.rooms.history(room_id, auth.user_id, query).await?;
    Ok(Json(chats))
}
