//! Error handling for the Speech2Text service
//!
//! Every handler error is rendered as `{"error": {"code", "message", "field"?}}`

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use thiserror::Error;

/// Application error types
#[derive(Error, Debug)]
pub enum AppError {
    // Authentication errors
    #[error("Invalid credentials")]
    InvalidCredentials,

    #[error("Token expired")]
    TokenExpired,

    #[error("Invalid token")]
    InvalidToken,

    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    #[error("Forbidden: {0}")]
    Forbidden(String),

    // Validation errors
    #[error("Validation error: {message}")]
    Validation { field: String, message: String },

    #[error("Validation error: {0}")]
    ValidationError(String),

    #[error("Conflict: {message}")]
    Conflict { resource: String, message: String },

    #[error("Resource not found: {0}")]
    NotFound(String),

    /// Not found, with the full message supplied by the caller
    #[error("{0}")]
    NotFoundMessage(String),

    // Plan and quota errors
    #[error("Plan restriction: {0}")]
    PlanRestriction(String),

    #[error("Quota exceeded: {0}")]
    QuotaExceeded(String),

    #[error("Payload too large: {0}")]
    PayloadTooLarge(String),

    #[error("Invalid state transition: {0}")]
    InvalidStateTransition(String),

    // External service errors
    #[error("Service unavailable: {0}")]
    ServiceUnavailable(String),

    #[error("Transcription engine error: {0}")]
    TranscriptionError(String),

    #[error("Storage error: {0}")]
    StorageError(String),

    // Database errors
    #[error("Database error: {0}")]
    DatabaseError(#[from] sqlx::Error),

    // Internal errors
    #[error("Internal server error: {0}")]
    Internal(String),

    #[error("Internal server error")]
    InternalError(#[from] anyhow::Error),
}

impl From<validator::ValidationErrors> for AppError {
    fn from(errors: validator::ValidationErrors) -> Self {
        let first = errors
            .field_errors()
            .into_iter()
            .min_by_key(|(field, _)| *field)
            .and_then(|(field, errs)| errs.first().map(|e| (field, e.clone())));

        match first {
            Some((field, err)) => AppError::validation(
                field,
                err.message
                    .map(|m| m.to_string())
                    .unwrap_or_else(|| err.code.to_string()),
            ),
            None => AppError::ValidationError(errors.to_string()),
        }
    }
}

impl AppError {
    pub fn validation(field: impl Into<String>, message: impl Into<String>) -> Self {
        AppError::Validation {
            field: field.into(),
            message: message.into(),
        }
    }

    pub fn conflict(resource: impl Into<String>, message: impl Into<String>) -> Self {
        AppError::Conflict {
            resource: resource.into(),
            message: message.into(),
        }
    }

    pub fn status_code(&self) -> StatusCode {
        match self {
            AppError::InvalidCredentials
            | AppError::TokenExpired
            | AppError::InvalidToken
            | AppError::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            AppError::Forbidden(_)
            | AppError::PlanRestriction(_)
            | AppError::QuotaExceeded(_)
            | AppError::PayloadTooLarge(_) => StatusCode::FORBIDDEN,
            AppError::Validation { .. } | AppError::ValidationError(_) => StatusCode::BAD_REQUEST,
            AppError::Conflict { .. } => StatusCode::CONFLICT,
            AppError::NotFound(_) | AppError::NotFoundMessage(_) => StatusCode::NOT_FOUND,
            AppError::InvalidStateTransition(_) => StatusCode::UNPROCESSABLE_ENTITY,
            AppError::ServiceUnavailable(_) | AppError::StorageError(_) => {
                StatusCode::SERVICE_UNAVAILABLE
            }
            AppError::TranscriptionError(_) => StatusCode::BAD_GATEWAY,
            AppError::DatabaseError(_) | AppError::Internal(_) | AppError::InternalError(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }

    pub(crate) fn detail(&self) -> ErrorDetail {
        let (code, message, field) = match self {
            AppError::InvalidCredentials => (
                "INVALID_CREDENTIALS",
                "Invalid email or password".to_string(),
                None,
            ),
            AppError::TokenExpired => ("TOKEN_EXPIRED", "Token has expired".to_string(), None),
            AppError::InvalidToken => ("INVALID_TOKEN", "Invalid token".to_string(), None),
            AppError::Unauthorized(msg) => ("UNAUTHORIZED", msg.clone(), None),
            AppError::Forbidden(msg) => ("FORBIDDEN", msg.clone(), None),
            AppError::Validation { field, message } => {
                ("VALIDATION_ERROR", message.clone(), Some(field.clone()))
            }
            AppError::ValidationError(msg) => ("VALIDATION_ERROR", msg.clone(), None),
            AppError::Conflict { resource, message } => {
                ("CONFLICT", message.clone(), Some(resource.clone()))
            }
            AppError::NotFound(resource) => ("NOT_FOUND", format!("{} not found", resource), None),
            AppError::NotFoundMessage(msg) => ("NOT_FOUND", msg.clone(), None),
            AppError::PlanRestriction(msg) => ("PLAN_RESTRICTION", msg.clone(), None),
            AppError::QuotaExceeded(msg) => ("QUOTA_EXCEEDED", msg.clone(), None),
            AppError::PayloadTooLarge(msg) => ("PAYLOAD_TOO_LARGE", msg.clone(), None),
            AppError::InvalidStateTransition(msg) => {
                ("INVALID_STATE_TRANSITION", msg.clone(), None)
            }
            AppError::ServiceUnavailable(msg) => ("SERVICE_UNAVAILABLE", msg.clone(), None),
            AppError::TranscriptionError(msg) => (
                "TRANSCRIPTION_ERROR",
                format!("Transcription engine error: {}", msg),
                None,
            ),
            AppError::StorageError(msg) => {
                ("STORAGE_ERROR", format!("Storage error: {}", msg), None)
            }
            AppError::DatabaseError(_) => (
                "DATABASE_ERROR",
                "A database error occurred".to_string(),
                None,
            ),
            AppError::Internal(msg) => ("INTERNAL_ERROR", msg.clone(), None),
            AppError::InternalError(_) => (
                "INTERNAL_ERROR",
                "An internal server error occurred".to_string(),
                None,
            ),
        };

        ErrorDetail {
            code: code.to_string(),
            message,
            field,
        }
    }
}

/// Error response structure
#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: ErrorDetail,
}

#[derive(Debug, Serialize)]
pub struct ErrorDetail {
    pub code: String,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub field: Option<String>,
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status_code();

        if status.is_server_error() {
            tracing::error!("Error: {:?}", self);
        } else {
            tracing::debug!("Request rejected: {}", self);
        }

        let body = ErrorResponse {
            error: self.detail(),
        };
        (status, Json(body)).into_response()
    }
}

/// Result type alias for handlers
pub type AppResult<T> = Result<T, AppError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_plan_errors_are_forbidden() {
        assert_eq!(
            AppError::PlanRestriction("x".into()).status_code(),
            StatusCode::FORBIDDEN
        );
        assert_eq!(
            AppError::PayloadTooLarge("x".into()).status_code(),
            StatusCode::FORBIDDEN
        );
    }

    #[test]
    fn test_validation_detail_carries_field() {
        let detail = AppError::validation("email", "Invalid email format").detail();
        assert_eq!(detail.code, "VALIDATION_ERROR");
        assert_eq!(detail.field.as_deref(), Some("email"));
    }

    #[test]
    fn test_database_error_message_is_generic() {
        let detail = AppError::DatabaseError(sqlx::Error::RowNotFound).detail();
        assert_eq!(detail.message, "A database error occurred");
    }
}
