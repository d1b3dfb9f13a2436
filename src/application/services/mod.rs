//! Application Services
//!
//! Business logic services that coordinate domain operations.
//!
//! ## Available Services
//!
//! - **AuthService**: sign-up, login, JWT validation
//! - **RoomService**: rooms, membership checks, history

pub mod auth_service;
pub mod room_service;

pub use auth_service::{AuthError, AuthService, AuthServiceImpl, AuthToken, Claims};
pub use room_service::{RoomDto, RoomError, RoomService, RoomServiceImpl};
