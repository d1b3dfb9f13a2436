//! Data Transfer Objects
//!
//! DTOs for API request/response serialization.

pub mod request;
pub mod response;

pub use request::{AddMemberRequest, CreateRoomRequest, LoginRequest, SignupRequest};
pub use response::{SignupResponse, TokenResponse, UserResponse};
