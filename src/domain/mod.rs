//! # Domain Layer
//!
//! Core business types of the chat backend, independent of any framework.
//!
//! - **entities**: User, ChatRoom, Chat and their repository traits
//!
//! Repository traits define the data access contracts; the real-time core
//! depends only on `ChatRepository` (the persistence gateway).

pub mod entities;

pub use entities::*;
