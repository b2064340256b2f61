//! User profile handlers

use axum::{extract::State, Json};

use shared::models::User;

use crate::error::AppError;
use crate::middleware::CurrentUser;
use crate::services::user::UpdateProfileInput;
use crate::services::UserService;
use crate::AppState;

/// Get the caller's profile
pub async fn get_me(
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
) -> Result<Json<User>, AppError> {
    let service = UserService::new(state.db.clone());
    let profile = service.get(user.user_id).await?;
    Ok(Json(profile))
}

/// Update the caller's name and email
pub async fn update_me(
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
    Json(body): Json<UpdateProfileInput>,
) -> Result<Json<User>, AppError> {
    let service = UserService::new(state.db.clone());
    let profile = service.update_profile(user.user_id, body).await?;
    Ok(Json(profile))
}
