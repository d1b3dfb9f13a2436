//! Response DTOs
//!
//! Data structures for API response bodies.

use serde::Serialize;

use crate::application::services::AuthToken;
use crate::domain::User;
use crate::shared::snowflake::id_string;

/// Access token response
#[derive(Debug, Serialize)]
pub struct TokenResponse {
    pub access_token: String,
    pub expires_in: i64,
    pub token_type: String,
}

impl From<AuthToken> for TokenResponse {
    fn from(token: AuthToken) -> Self {
        Self {
            access_token: token.access_token,
            expires_in: token.expires_in,
            token_type: token.token_type,
        }
    }
}

/// Sign-up response (user and token)
#[derive(Debug, Serialize)]
pub struct SignupResponse {
    pub user: UserResponse,
    #[serde(flatten)]
    pub token: TokenResponse,
}

/// User response
#[derive(Debug, Serialize)]
pub struct UserResponse {
    #[serde(with = "id_string")]
    pub id: i64,
    pub username: String,
    pub email: String,
    pub created_at: String,
}

impl From<User> for UserResponse {
    fn from(user: User) -> Self {
        Self {
            id: user.id,
            username: user.username,
            email: user.email,
            created_at: user.created_at.to_rfc3339(),
        }
    }
}
