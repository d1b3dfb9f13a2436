//! Repository Implementations
//!
//! PostgreSQL implementations of domain repository traits.
//!
//! ## Available Repositories
//!
//! - **UserRepository** - User accounts
//! - **ChatRoomRepository** - Rooms and their members
//! - **ChatRepository** - Append-only chat log with keyset pagination
//!
//! ## Usage Example
//!
//! ```rust,ignore
//! use sqlx::PgPool;
//! use crate::infrastructure::repositories::{
//!     PgChatRepository, PgChatRoomRepository, PgUserRepository,
//! };
//!
//! async fn setup_repositories(pool: PgPool) {
//!     let user_repo = PgUserRepository::new(pool.clone());
//!     let room_repo = PgChatRoomRepository::new(pool.clone());
//!     let chat_repo = PgChatRepository::new(pool);
//! }
//! ```

pub mod chat_repository;
pub mod chat_room_repository;
pub mod user_repository;

pub use chat_repository::PgChatRepository;
pub use chat_room_repository::PgChatRoomRepository;
pub use user_repository::PgUserRepository;
