//! Validation utilities for the Speech2Text platform
//!
//! Account field checks and the upload rules that can be decided from the
//! file name and size alone, shared by the server and the browser helpers.

use crate::models::{classify, max_upload_bytes_for_minutes};

const MIB: f64 = 1024.0 * 1024.0;

// ============================================================================
// Account Validations
// ============================================================================

/// Validate email format (basic check)
pub fn validate_email(email: &str) -> Result<(), &'static str> {
    let Some((local, domain)) = email.split_once('@') else {
        return Err("Invalid email format");
    };
    if local.is_empty() || !domain.contains('.') || domain.starts_with('.') || domain.ends_with('.')
    {
        return Err("Invalid email format");
    }
    Ok(())
}

/// Validate password strength
pub fn validate_password(password: &str) -> Result<(), &'static str> {
    if password.chars().count() < 8 {
        return Err("Password must be at least 8 characters");
    }
    Ok(())
}

/// Validate username: 3-150 characters of letters, digits and @ . + - _
pub fn validate_username(username: &str) -> Result<(), &'static str> {
    let len = username.chars().count();
    if len < 3 {
        return Err("Username must be at least 3 characters");
    }
    if len > 150 {
        return Err("Username must be at most 150 characters");
    }
    if !username
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || matches!(c, '@' | '.' | '+' | '-' | '_'))
    {
        return Err("Username may only contain letters, digits and @/./+/-/_");
    }
    Ok(())
}

// ============================================================================
// Upload Validations
// ============================================================================

/// Reject files that are neither audio nor video
pub fn validate_media_file_name(file_name: &str) -> Result<(), String> {
    if classify(file_name).is_supported() {
        Ok(())
    } else {
        Err(format!(
            "Unsupported file format: {}. Please upload a valid audio or video file.",
            file_name
        ))
    }
}

/// Reject uploads larger than the plan's size ceiling
pub fn validate_upload_size(size_bytes: u64, max_audio_minutes: i32) -> Result<(), String> {
    let max_bytes = max_upload_bytes_for_minutes(max_audio_minutes);
    if size_bytes > max_bytes {
        return Err(format!(
            "File is too large ({:.2}MB). Maximum allowed size is {}MB with your current plan.",
            size_bytes as f64 / MIB,
            max_upload_megabytes(max_audio_minutes)
        ));
    }
    Ok(())
}

/// Upload ceiling in whole megabytes
pub fn max_upload_megabytes(max_audio_minutes: i32) -> u64 {
    max_upload_bytes_for_minutes(max_audio_minutes) / (1024 * 1024)
}

/// Name and size checks in the order the server applies them
pub fn validate_upload(
    file_name: &str,
    size_bytes: u64,
    max_audio_minutes: i32,
) -> Result<(), String> {
    if file_name.trim().is_empty() {
        return Err("No file was uploaded.".to_string());
    }
    validate_media_file_name(file_name)?;
    validate_upload_size(size_bytes, max_audio_minutes)
}
