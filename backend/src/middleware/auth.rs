//! Authentication middleware
//!
//! Validates the bearer JWT with the secret from application state and makes
//! the caller available to handlers as `AuthUser` / `CurrentUser`.

use axum::{
    extract::{Request, State},
    http::{header::AUTHORIZATION, request::Parts},
    middleware::Next,
    response::{IntoResponse, Response},
};
use uuid::Uuid;

use crate::error::AppError;
use crate::services::auth::decode_claims;
use crate::AppState;

/// Authenticated user information extracted from JWT
#[derive(Clone, Debug)]
pub struct AuthUser {
    pub user_id: Uuid,
    pub username: String,
    pub is_superuser: bool,
}

/// Pull the token out of an `Authorization: Bearer <token>` header value
pub fn bearer_token(header: Option<&str>) -> Option<&str> {
    header
        .and_then(|h| h.strip_prefix("Bearer "))
        .map(str::trim)
        .filter(|t| !t.is_empty())
}

/// Authentication middleware that validates JWT tokens
pub async fn auth_middleware(
    State(state): State<AppState>,
    mut request: Request,
    next: Next,
) -> Response {
    let header = request
        .headers()
        .get(AUTHORIZATION)
        .and_then(|h| h.to_str().ok());

    let Some(token) = bearer_token(header) else {
        return AppError::Unauthorized("Missing or invalid Authorization header".to_string())
            .into_response();
    };

    let Some(secret) = state.config.jwt.signing_secret() else {
        tracing::error!("Rejecting request: no JWT secret configured");
        return AppError::Internal("Authentication is not configured".to_string()).into_response();
    };

    let claims = match decode_claims(token, secret) {
        Ok(claims) => claims,
        Err(e) => return e.into_response(),
    };

    let user_id = match Uuid::parse_str(&claims.sub) {
        Ok(id) => id,
        Err(_) => {
            return AppError::Unauthorized("Invalid user ID in token".to_string()).into_response()
        }
    };

    request.extensions_mut().insert(AuthUser {
        user_id,
        username: claims.username,
        is_superuser: claims.is_superuser,
    });

    next.run(request).await
}

/// Extractor for authenticated user
/// Use this in handlers to get the current user
#[derive(Clone, Debug)]
pub struct CurrentUser(pub AuthUser);

#[axum::async_trait]
impl<S> axum::extract::FromRequestParts<S> for CurrentUser
where
    S: Send + Sync,
{
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        parts
            .extensions
            .get::<AuthUser>()
            .cloned()
            .map(CurrentUser)
            .ok_or_else(|| AppError::Unauthorized("Authentication required".to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bearer_token() {
        assert_eq!(bearer_token(Some("Bearer abc.def")), Some("abc.def"));
        assert_eq!(bearer_token(Some("Basic abc")), None);
        assert_eq!(bearer_token(Some("Bearer ")), None);
        assert_eq!(bearer_token(None), None);
    }
}
