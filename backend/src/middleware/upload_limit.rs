//! Request body ceiling for uploads, larger for superusers

use axum::{
    extract::{Request, State},
    http::header::CONTENT_LENGTH,
    middleware::Next,
    response::{IntoResponse, Response},
};

use crate::config::StorageConfig;
use crate::error::AppError;
use crate::middleware::auth::AuthUser;
use crate::AppState;

pub const TOO_LARGE_MESSAGE: &str =
    "File too large. Please contact an administrator for assistance with large files.";

/// Body size allowed for this caller
pub fn body_limit_for(storage: &StorageConfig, is_superuser: bool) -> u64 {
    if is_superuser {
        storage.superuser_max_upload_bytes
    } else {
        storage.default_max_upload_bytes
    }
}

/// Reject requests whose declared length exceeds the caller's ceiling.
/// Runs after `auth_middleware`; bodies without a length are checked while reading.
pub async fn upload_limit_middleware(
    State(state): State<AppState>,
    request: Request,
    next: Next,
) -> Response {
    let is_superuser = request
        .extensions()
        .get::<AuthUser>()
        .map(|u| u.is_superuser)
        .unwrap_or(false);
    let limit = body_limit_for(&state.config.storage, is_superuser);

    let declared = request
        .headers()
        .get(CONTENT_LENGTH)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.parse::<u64>().ok());

    if let Some(length) = declared {
        if length > limit {
            tracing::warn!(length, limit, "Rejected oversized upload");
            return AppError::PayloadTooLarge(TOO_LARGE_MESSAGE.to_string()).into_response();
        }
    }

    next.run(request).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    #[test]
    fn test_superusers_get_the_larger_ceiling() {
        let storage = StorageConfig {
            media_root: PathBuf::from("media"),
            superuser_max_upload_bytes: 10 * 1024 * 1024 * 1024,
            default_max_upload_bytes: 30 * 1024 * 1024,
        };
        assert_eq!(body_limit_for(&storage, false), 30 * 1024 * 1024);
        assert_eq!(body_limit_for(&storage, true), 10 * 1024 * 1024 * 1024);
    }
}
