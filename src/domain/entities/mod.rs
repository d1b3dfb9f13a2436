//! # Domain Entities
//!
//! Core domain entities of the chat backend. All entities map directly to
//! their corresponding database tables.
//!
//! - **User**: account with credentials, owned by the auth collaborator
//! - **ChatRoom**: a room and its members; one broker topic per room
//! - **Chat**: an immutable chat message
//!
//! Each entity has an associated repository trait defining data access
//! operations, implemented in the infrastructure layer.

mod chat;
mod chat_room;
mod user;

pub use chat::{Chat, ChatRepository, HistoryQuery, DEFAULT_HISTORY_LIMIT, MAX_HISTORY_LIMIT};
pub use chat_room::{topic_for, ChatRoom, ChatRoomRepository, ROOM_TOPIC_PREFIX};
pub use user::{User, UserRepository};

#[cfg(test)]
pub use chat::MockChatRepository;
