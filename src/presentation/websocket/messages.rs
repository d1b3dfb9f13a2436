//! WebSocket Message Types
//!
//! JSON frames exchanged with chat clients.

use serde::{Deserialize, Serialize};

use crate::domain::Chat;
use crate::shared::error::ChatError;
use crate::shared::snowflake::{id_string, id_string_vec};

/// Error frame codes that are not part of `ChatError`.
pub mod codes {
    pub const ROOM_NOT_JOINED: &str = "ROOM_NOT_JOINED";
    pub const INVALID_MESSAGE: &str = "INVALID_MESSAGE";
    pub const PROTOCOL_VIOLATION: &str = "PROTOCOL_VIOLATION";
}

/// Inbound chat frame: `{"roomId": "1", "body": "hi"}`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClientFrame {
    #[serde(with = "id_string")]
    pub room_id: i64,
    pub body: String,
}

/// Outbound frames, tagged by `type`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum ServerFrame {
    /// Sent once after the connection is set up
    Ready(ReadyFrame),
    /// A chat delivered through the broker
    Message(Chat),
    /// Recent chats of a room, sent after joining it
    History(HistoryFrame),
    /// Delivery failure or rejected frame
    Error(ErrorFrame),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReadyFrame {
    #[serde(with = "id_string")]
    pub user_id: i64,
    #[serde(with = "id_string_vec")]
    pub rooms: Vec<i64>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HistoryFrame {
    #[serde(with = "id_string")]
    pub room_id: i64,
    pub messages: Vec<Chat>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorFrame {
    pub code: String,
    pub message: String,
}

impl ServerFrame {
    pub fn error(code: &str, message: impl Into<String>) -> Self {
        ServerFrame::Error(ErrorFrame {
            code: code.to_string(),
            message: message.into(),
        })
    }
}

impl From<&ChatError> for ServerFrame {
    fn from(err: &ChatError) -> Self {
        ServerFrame::error(err.code(), err.to_string())
    }
}
