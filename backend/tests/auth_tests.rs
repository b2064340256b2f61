//! Authentication and account validation tests
//!
//! Property-based and unit tests for:
//! - Account Field Validation
//! - Access Token Verification
//! - Refresh Token Hashing

use chrono::Utc;
use jsonwebtoken::{encode, EncodingKey, Header};
use proptest::prelude::*;
use uuid::Uuid;

use shared::validation::{validate_email, validate_password, validate_username};
use speech2text_backend::error::AppError;
use speech2text_backend::services::auth::{
    decode_claims, hash_token, registration_conflict, Claims,
};

fn sign(claims: &Claims, secret: &str) -> String {
    encode(
        &Header::default(),
        claims,
        &EncodingKey::from_secret(secret.as_bytes()),
    )
    .unwrap()
}

// ============================================================================
// Property Test Strategies
// ============================================================================

/// Generate valid usernames (3-150 chars from the allowed set)
fn username_strategy() -> impl Strategy<Value = String> {
    "[A-Za-z0-9@.+_-]{3,150}"
}

/// Generate valid email addresses
fn email_strategy() -> impl Strategy<Value = String> {
    "[a-z]{1,10}@[a-z]{3,8}\\.(com|org|net|io)"
}

/// Generate secrets for signing
fn secret_strategy() -> impl Strategy<Value = String> {
    "[a-zA-Z0-9]{16,48}"
}

// ============================================================================
// Property Tests
// ============================================================================

proptest! {
    #![proptest_config(ProptestConfig::with_cases(100))]

    /// Usernames from the allowed alphabet and length are accepted
    #[test]
    fn valid_usernames(username in username_strategy()) {
        prop_assert!(validate_username(&username).is_ok());
    }

    /// Any disallowed character rejects the username
    #[test]
    fn username_rejects_disallowed_character(
        prefix in "[a-z]{3,10}",
        bad in prop::sample::select(vec![' ', '!', '#', '/', 'é', '*']),
    ) {
        let username = format!("{}{}", prefix, bad);
        prop_assert!(validate_username(&username).is_err());
    }

    /// Generated addresses pass the email check
    #[test]
    fn valid_emails(email in email_strategy()) {
        prop_assert!(validate_email(&email).is_ok());
    }

    /// Passwords need at least 8 characters
    #[test]
    fn password_needs_eight_characters(password in "[a-zA-Z0-9!@#$%]{0,20}") {
        prop_assert_eq!(validate_password(&password).is_ok(), password.chars().count() >= 8);
    }

    /// A token only verifies with the secret that signed it
    #[test]
    fn token_requires_signing_secret(
        secret in secret_strategy(),
        other in secret_strategy(),
        is_superuser in any::<bool>(),
    ) {
        prop_assume!(secret != other);
        let now = Utc::now().timestamp();
        let claims = Claims {
            sub: Uuid::new_v4().to_string(),
            username: "listener".to_string(),
            is_superuser,
            exp: now + 300,
            iat: now,
        };
        let token = sign(&claims, &secret);

        let decoded = decode_claims(&token, &secret).unwrap();
        prop_assert_eq!(&decoded.sub, &claims.sub);
        prop_assert_eq!(decoded.is_superuser, is_superuser);
        prop_assert!(matches!(decode_claims(&token, &other), Err(AppError::InvalidToken)));
    }

    /// Stored refresh token hashes are 64 lowercase hex chars
    #[test]
    fn refresh_token_hash_is_lowercase_hex(token in "[A-Za-z0-9_-]{16,64}") {
        let hash = hash_token(&token);
        prop_assert_eq!(hash.len(), 64);
        prop_assert!(hash.chars().all(|c| c.is_ascii_hexdigit() && !c.is_ascii_uppercase()));
        prop_assert_eq!(hash_token(&token), hash);
    }
}

// ============================================================================
// Unit Tests
// ============================================================================

#[test]
fn test_username_length_bounds() {
    assert!(validate_username("ab").is_err());
    assert!(validate_username("abc").is_ok());
    assert!(validate_username(&"a".repeat(150)).is_ok());
    assert!(validate_username(&"a".repeat(151)).is_err());
}

#[test]
fn test_garbage_token_is_invalid() {
    assert!(matches!(
        decode_claims("not.a.token", "secret"),
        Err(AppError::InvalidToken)
    ));
}

#[test]
fn test_lost_registration_race_is_a_conflict() {
    let username = registration_conflict(Some("users_username_key"));
    assert!(matches!(
        &username,
        AppError::Conflict { resource, .. } if resource == "username"
    ));
    assert_eq!(username.status_code(), axum::http::StatusCode::CONFLICT);

    let email = registration_conflict(Some("users_email_key"));
    assert!(matches!(
        &email,
        AppError::Conflict { resource, .. } if resource == "email"
    ));
    assert!(matches!(registration_conflict(None), AppError::Conflict { .. }));
}
