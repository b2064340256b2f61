//! User profile service

use chrono::{DateTime, Utc};
use serde::Deserialize;
use sqlx::PgPool;
use uuid::Uuid;
use validator::Validate;

use shared::models::User;
use shared::validation::validate_email;

use crate::error::{AppError, AppResult};

/// User profile service
#[derive(Clone)]
pub struct UserService {
    db: PgPool,
}

#[derive(Debug, sqlx::FromRow)]
pub struct UserRow {
    pub id: Uuid,
    pub username: String,
    pub email: String,
    pub first_name: String,
    pub last_name: String,
    pub is_superuser: bool,
    pub is_active: bool,
    pub credits: i32,
    pub is_trial_used: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl From<UserRow> for User {
    fn from(row: UserRow) -> Self {
        User {
            id: row.id,
            username: row.username,
            email: row.email,
            first_name: row.first_name,
            last_name: row.last_name,
            is_superuser: row.is_superuser,
            is_active: row.is_active,
            credits: row.credits,
            is_trial_used: row.is_trial_used,
            created_at: row.created_at,
            updated_at: row.updated_at,
        }
    }
}

/// Input for updating the caller's profile
#[derive(Debug, Default, Deserialize, Validate)]
pub struct UpdateProfileInput {
    #[validate(length(max = 150, message = "Ensure this field has no more than 150 characters."))]
    pub first_name: Option<String>,
    #[validate(length(max = 150, message = "Ensure this field has no more than 150 characters."))]
    pub last_name: Option<String>,
    pub email: Option<String>,
}

const USER_COLUMNS: &str = r#"
    id, username, email, first_name, last_name, is_superuser, is_active,
    credits, is_trial_used, created_at, updated_at
"#;

pub const EMAIL_IN_USE: &str = "This email is already in use by another account.";

impl UserService {
    /// Create a new UserService instance
    pub fn new(db: PgPool) -> Self {
        Self { db }
    }

    pub async fn get(&self, user_id: Uuid) -> AppResult<User> {
        sqlx::query_as::<_, UserRow>(&format!("SELECT {} FROM users WHERE id = $1", USER_COLUMNS))
            .bind(user_id)
            .fetch_optional(&self.db)
            .await?
            .map(User::from)
            .ok_or_else(|| AppError::NotFound("User".to_string()))
    }

    /// Update name and email; the email must not belong to another account
    pub async fn update_profile(&self, user_id: Uuid, input: UpdateProfileInput) -> AppResult<User> {
        input.validate()?;

        let email = match input.email {
            Some(email) => {
                let email = email.trim().to_lowercase();
                validate_email(&email).map_err(|m| AppError::validation("email", m))?;

                let in_use = sqlx::query_scalar::<_, bool>(
                    "SELECT EXISTS(SELECT 1 FROM users WHERE lower(email) = $1 AND id <> $2)",
                )
                .bind(&email)
                .bind(user_id)
                .fetch_one(&self.db)
                .await?;
                if in_use {
                    return Err(AppError::conflict("email", EMAIL_IN_USE));
                }
                Some(email)
            }
            None => None,
        };

        let row = sqlx::query_as::<_, UserRow>(&format!(
            r#"
            UPDATE users SET
                first_name = COALESCE($2, first_name),
                last_name = COALESCE($3, last_name),
                email = COALESCE($4, email),
                updated_at = NOW()
            WHERE id = $1
            RETURNING {}
            "#,
            USER_COLUMNS
        ))
        .bind(user_id)
        .bind(input.first_name.map(|s| s.trim().to_string()))
        .bind(input.last_name.map(|s| s.trim().to_string()))
        .bind(email)
        .fetch_optional(&self.db)
        .await?
        .ok_or_else(|| AppError::NotFound("User".to_string()))?;

        Ok(row.into())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_overlong_name_is_rejected() {
        let input = UpdateProfileInput {
            first_name: Some("a".repeat(151)),
            ..Default::default()
        };
        let err = AppError::from(input.validate().unwrap_err());
        let detail = err.detail();
        assert_eq!(detail.field.as_deref(), Some("first_name"));
        assert_eq!(detail.message, "Ensure this field has no more than 150 characters.");
    }

    #[test]
    fn test_partial_update_is_valid() {
        let input = UpdateProfileInput {
            last_name: Some("Nguyen".into()),
            ..Default::default()
        };
        assert!(input.validate().is_ok());
    }
}
