//! Authentication service for user registration, login, and token management

use bcrypt::{hash, verify, DEFAULT_COST};
use chrono::{Duration, Utc};
use jsonwebtoken::{decode, encode, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use sqlx::PgPool;
use uuid::Uuid;

use shared::validation::{validate_email, validate_password, validate_username};

use crate::config::JwtConfig;
use crate::error::{AppError, AppResult};
use crate::services::subscription::create_free_subscription;

/// Authentication service
const EMAIL_TAKEN: &str = "An account with this email already exists.";
const USERNAME_TAKEN: &str = "A user with that username already exists.";

/// PostgreSQL SQLSTATE for unique_violation
const UNIQUE_VIOLATION: &str = "23505";

#[derive(Clone)]
pub struct AuthService {
    db: PgPool,
    jwt_secret: String,
    access_token_expiry: i64,
    refresh_token_expiry: i64,
}

/// Input for registering a new account
#[derive(Debug, Deserialize)]
pub struct RegisterInput {
    pub username: String,
    pub email: String,
    pub password: String,
    pub first_name: Option<String>,
    pub last_name: Option<String>,
}

/// JWT claims structure
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claims {
    pub sub: String, // User ID
    pub username: String,
    pub is_superuser: bool,
    pub exp: i64,
    pub iat: i64,
}

/// Authentication tokens
#[derive(Debug, Serialize)]
pub struct AuthTokens {
    pub access_token: String,
    pub refresh_token: String,
    pub token_type: String,
    pub expires_in: i64,
}

/// Credentials row used at login
#[derive(Debug, sqlx::FromRow)]
struct CredentialsRow {
    id: Uuid,
    username: String,
    password_hash: String,
    is_superuser: bool,
    is_active: bool,
}

impl AuthService {
    /// Create a new AuthService instance
    pub fn new(db: PgPool, jwt: &JwtConfig) -> Self {
        Self {
            db,
            jwt_secret: jwt.signing_secret().unwrap_or_default().to_string(),
            access_token_expiry: jwt.access_token_expiry,
            refresh_token_expiry: jwt.refresh_token_expiry,
        }
    }

    /// Register a new user with a free subscription
    pub async fn register(&self, input: RegisterInput) -> AppResult<(Uuid, AuthTokens)> {
        let username = input.username.trim().to_string();
        let email = input.email.trim().to_lowercase();

        validate_username(&username).map_err(|m| AppError::validation("username", m))?;
        validate_email(&email).map_err(|m| AppError::validation("email", m))?;
        validate_password(&input.password).map_err(|m| AppError::validation("password", m))?;

        let taken = sqlx::query_as::<_, (bool, bool)>(
            r#"
            SELECT
                EXISTS(SELECT 1 FROM users WHERE lower(email) = $1),
                EXISTS(SELECT 1 FROM users WHERE lower(username) = lower($2))
            "#,
        )
        .bind(&email)
        .bind(&username)
        .fetch_one(&self.db)
        .await?;

        if taken.0 {
            return Err(AppError::conflict("email", EMAIL_TAKEN));
        }
        if taken.1 {
            return Err(AppError::conflict("username", USERNAME_TAKEN));
        }

        // Hash password
        let password_hash = hash(&input.password, DEFAULT_COST)
            .map_err(|e| AppError::Internal(format!("Password hashing failed: {}", e)))?;

        // Start transaction
        let mut tx = self.db.begin().await?;

        let user_id = sqlx::query_scalar::<_, Uuid>(
            r#"
            INSERT INTO users (username, email, password_hash, first_name, last_name)
            VALUES ($1, $2, $3, $4, $5)
            RETURNING id
            "#,
        )
        .bind(&username)
        .bind(&email)
        .bind(&password_hash)
        .bind(input.first_name.unwrap_or_default())
        .bind(input.last_name.unwrap_or_default())
        .fetch_one(&mut *tx)
        .await
        .map_err(registration_error)?;

        create_free_subscription(&mut *tx, user_id, Utc::now()).await?;

        // Commit transaction
        tx.commit().await?;
        tracing::info!(%user_id, "Registered new user");

        let tokens = self.generate_tokens(user_id, &username, false)?;
        self.store_refresh_token(user_id, &tokens.refresh_token).await?;

        Ok((user_id, tokens))
    }

    /// Authenticate user with email and password
    pub async fn login(&self, email: &str, password: &str) -> AppResult<AuthTokens> {
        // Find user by email
        let user = sqlx::query_as::<_, CredentialsRow>(
            r#"
            SELECT id, username, password_hash, is_superuser, is_active
            FROM users
            WHERE lower(email) = lower($1)
            "#,
        )
        .bind(email.trim())
        .fetch_optional(&self.db)
        .await?
        .ok_or(AppError::InvalidCredentials)?;

        // Check if user is active
        if !user.is_active {
            return Err(AppError::Unauthorized("Account is disabled".to_string()));
        }

        // Verify password
        let valid = verify(password, &user.password_hash)
            .map_err(|e| AppError::Internal(format!("Password verification failed: {}", e)))?;

        if !valid {
            return Err(AppError::InvalidCredentials);
        }

        // Update last login
        sqlx::query("UPDATE users SET last_login_at = NOW() WHERE id = $1")
            .bind(user.id)
            .execute(&self.db)
            .await?;

        let tokens = self.generate_tokens(user.id, &user.username, user.is_superuser)?;
        self.store_refresh_token(user.id, &tokens.refresh_token).await?;

        Ok(tokens)
    }

    /// Rotate a refresh token into a new token pair
    pub async fn refresh_token(&self, refresh_token: &str) -> AppResult<AuthTokens> {
        let token_hash = hash_token(refresh_token);

        let mut tx = self.db.begin().await?;

        // Revoke and look up in one step so a token can only be used once
        let (user_id, username, is_superuser) = sqlx::query_as::<_, (Uuid, String, bool)>(
            r#"
            UPDATE refresh_tokens rt
            SET revoked_at = NOW()
            FROM users u
            WHERE rt.token_hash = $1
              AND u.id = rt.user_id
              AND rt.expires_at > NOW()
              AND rt.revoked_at IS NULL
              AND u.is_active = TRUE
            RETURNING u.id, u.username, u.is_superuser
            "#,
        )
        .bind(&token_hash)
        .fetch_optional(&mut *tx)
        .await?
        .ok_or_else(|| AppError::Unauthorized("Invalid or expired refresh token".to_string()))?;

        let tokens = self.generate_tokens(user_id, &username, is_superuser)?;
        self.insert_refresh_token(&mut *tx, user_id, &tokens.refresh_token)
            .await?;
        tx.commit().await?;

        Ok(tokens)
    }

    /// Generate access and refresh tokens
    fn generate_tokens(
        &self,
        user_id: Uuid,
        username: &str,
        is_superuser: bool,
    ) -> AppResult<AuthTokens> {
        if self.jwt_secret.is_empty() {
            return Err(AppError::Internal("JWT secret is not configured".to_string()));
        }
        let now = Utc::now();
        let access_exp = now + Duration::seconds(self.access_token_expiry);

        let access_claims = Claims {
            sub: user_id.to_string(),
            username: username.to_string(),
            is_superuser,
            exp: access_exp.timestamp(),
            iat: now.timestamp(),
        };

        let access_token = encode(
            &Header::default(),
            &access_claims,
            &EncodingKey::from_secret(self.jwt_secret.as_bytes()),
        )
        .map_err(|e| AppError::Internal(format!("Token generation failed: {}", e)))?;

        // Refresh token: two random UUIDs worth of entropy
        let refresh_token = format!("{}{}", Uuid::new_v4().simple(), Uuid::new_v4().simple());

        Ok(AuthTokens {
            access_token,
            refresh_token,
            token_type: "Bearer".to_string(),
            expires_in: self.access_token_expiry,
        })
    }

    /// Store refresh token in database
    async fn store_refresh_token(&self, user_id: Uuid, token: &str) -> AppResult<()> {
        let mut conn = self.db.acquire().await?;
        self.insert_refresh_token(&mut *conn, user_id, token).await
    }

    async fn insert_refresh_token(
        &self,
        conn: &mut sqlx::PgConnection,
        user_id: Uuid,
        token: &str,
    ) -> AppResult<()> {
        let expires_at = Utc::now() + Duration::seconds(self.refresh_token_expiry);

        sqlx::query(
            r#"
            INSERT INTO refresh_tokens (user_id, token_hash, expires_at)
            VALUES ($1, $2, $3)
            "#,
        )
        .bind(user_id)
        .bind(hash_token(token))
        .bind(expires_at)
        .execute(&mut *conn)
        .await?;

        Ok(())
    }
}

/// Decode and validate an HS256 access token
pub fn decode_claims(token: &str, secret: &str) -> AppResult<Claims> {
    decode::<Claims>(
        token,
        &DecodingKey::from_secret(secret.as_bytes()),
        &Validation::default(),
    )
    .map(|data| data.claims)
    .map_err(|e| match e.kind() {
        jsonwebtoken::errors::ErrorKind::ExpiredSignature => AppError::TokenExpired,
        _ => AppError::InvalidToken,
    })
}

/// The 409 for a concurrent registration that lost the race on a unique column
pub fn registration_conflict(constraint: Option<&str>) -> AppError {
    match constraint {
        Some(name) if name.contains("username") => AppError::conflict("username", USERNAME_TAKEN),
        _ => AppError::conflict("email", EMAIL_TAKEN),
    }
}

fn registration_error(err: sqlx::Error) -> AppError {
    let conflict = err
        .as_database_error()
        .filter(|db| db.code().as_deref() == Some(UNIQUE_VIOLATION))
        .map(|db| registration_conflict(db.constraint()));
    conflict.unwrap_or_else(|| AppError::from(err))
}

/// Hex SHA-256 of a refresh token, the form stored in the database
pub fn hash_token(token: &str) -> String {
    let digest = Sha256::digest(token.as_bytes());
    digest.iter().map(|b| format!("{:02x}", b)).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sign(claims: &Claims, secret: &str) -> String {
        encode(
            &Header::default(),
            claims,
            &EncodingKey::from_secret(secret.as_bytes()),
        )
        .unwrap()
    }

    #[test]
    fn test_hash_token_is_hex_sha256() {
        let h = hash_token("abc");
        assert_eq!(
            h,
            "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
        );
        assert_eq!(h.len(), 64);
    }

    #[test]
    fn test_decode_claims_round_trip() {
        let now = Utc::now().timestamp();
        let claims = Claims {
            sub: Uuid::new_v4().to_string(),
            username: "alice".into(),
            is_superuser: true,
            exp: now + 60,
            iat: now,
        };
        let token = sign(&claims, "secret");
        let decoded = decode_claims(&token, "secret").unwrap();
        assert_eq!(decoded.username, "alice");
        assert!(decoded.is_superuser);

        assert!(matches!(
            decode_claims(&token, "other"),
            Err(AppError::InvalidToken)
        ));
    }

    #[test]
    fn test_expired_token() {
        let now = Utc::now().timestamp();
        let claims = Claims {
            sub: Uuid::new_v4().to_string(),
            username: "bob".into(),
            is_superuser: false,
            exp: now - 3600,
            iat: now - 7200,
        };
        let token = sign(&claims, "secret");
        assert!(matches!(
            decode_claims(&token, "secret"),
            Err(AppError::TokenExpired)
        ));
    }
}
