//! Authentication handlers: registration, login and refresh token rotation

use axum::{extract::State, http::StatusCode, Json};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::AppResult;
use crate::services::auth::{AuthTokens, RegisterInput};
use crate::services::AuthService;
use crate::AppState;

#[derive(Deserialize)]
pub struct LoginRequest {
    pub email: String,
    pub password: String,
}

#[derive(Deserialize)]
pub struct RefreshRequest {
    pub refresh_token: String,
}

/// A new account's id alongside its first token pair
#[derive(Serialize)]
pub struct RegisterResponse {
    pub user_id: Uuid,
    #[serde(flatten)]
    pub tokens: AuthTokens,
}

fn auth_service(state: &AppState) -> AuthService {
    AuthService::new(state.db.clone(), &state.config.jwt)
}

/// POST /auth/register
pub async fn register(
    State(state): State<AppState>,
    Json(input): Json<RegisterInput>,
) -> AppResult<(StatusCode, Json<RegisterResponse>)> {
    let (user_id, tokens) = auth_service(&state).register(input).await?;
    tracing::info!(%user_id, "Registered new account");

    Ok((
        StatusCode::CREATED,
        Json(RegisterResponse { user_id, tokens }),
    ))
}

/// POST /auth/login
pub async fn login(
    State(state): State<AppState>,
    Json(body): Json<LoginRequest>,
) -> AppResult<Json<AuthTokens>> {
    let tokens = auth_service(&state)
        .login(&body.email, &body.password)
        .await?;
    Ok(Json(tokens))
}

/// POST /auth/refresh; the presented token is revoked and replaced
pub async fn refresh(
    State(state): State<AppState>,
    Json(body): Json<RefreshRequest>,
) -> AppResult<Json<AuthTokens>> {
    let tokens = auth_service(&state)
        .refresh_token(&body.refresh_token)
        .await?;
    Ok(Json(tokens))
}
