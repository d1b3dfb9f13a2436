//! Authentication Handlers

use axum::{extract::State, http::StatusCode, Json};
use validator::Validate;

use crate::application::dto::request::{LoginRequest, SignupRequest};
use crate::application::dto::response::{SignupResponse, TokenResponse, UserResponse};
use crate::shared::error::AppError;
use crate::shared::validation::validation_error;
use crate::startup::AppState;

/// Register a new user
pub async fn signup(
    State(state): State<AppState>,
    Json(body): Json<SignupRequest>,
) -> Result<(StatusCode, Json<SignupResponse>), AppError> {
    body.validate().map_err(validation_error)?;

    let (user, token) = state
        .auth
        .signup(&body.username, &body.email, &body.password)
        .await?;

    let response = SignupResponse {
        user: UserResponse::from(user),
        token: TokenResponse::from(token),
    };

    Ok((StatusCode::CREATED, Json(response)))
}

/// Login with credentials
pub async fn login(
    State(state): State<AppState>,
    Json(body): Json<LoginRequest>,
) -> Result<Json<TokenResponse>, AppError> {
    body.validate().map_err(validation_error)?;

    let token = state.auth.login(&body.email, &body.password).await?;
    Ok(Json(token.into()))
}
