//! Uploaded media classification and storage layout

use std::path::Path;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

pub const AUDIO_EXTENSIONS: &[&str] = &["mp3", "wav", "m4a", "ogg", "flac", "aac", "wma", "aiff"];
pub const VIDEO_EXTENSIONS: &[&str] = &[
    "mp4", "mov", "avi", "mkv", "webm", "flv", "wmv", "m4v", "3gp",
];

/// Directory under the media root that holds user uploads
pub const UPLOAD_DIR: &str = "media_uploads";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MediaKind {
    Audio,
    Video,
    Unsupported,
}

impl MediaKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            MediaKind::Audio => "audio",
            MediaKind::Video => "video",
            MediaKind::Unsupported => "unsupported",
        }
    }

    pub fn is_supported(&self) -> bool {
        !matches!(self, MediaKind::Unsupported)
    }
}

/// Lowercased final extension of a file name, without the dot
pub fn extension_of(file_name: &str) -> Option<String> {
    Path::new(file_name)
        .extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| ext.to_ascii_lowercase())
}

pub fn classify(file_name: &str) -> MediaKind {
    match extension_of(file_name) {
        Some(ext) if AUDIO_EXTENSIONS.contains(&ext.as_str()) => MediaKind::Audio,
        Some(ext) if VIDEO_EXTENSIONS.contains(&ext.as_str()) => MediaKind::Video,
        _ => MediaKind::Unsupported,
    }
}

pub fn is_wav(file_name: &str) -> bool {
    extension_of(file_name).as_deref() == Some("wav")
}

/// Path of a new upload relative to the media root:
/// `media_uploads/<user_id>/<file_id><.ext>`
pub fn storage_relative_path(user_id: Uuid, file_id: Uuid, original_name: &str) -> String {
    let ext = extension_of(original_name)
        .map(|ext| format!(".{}", ext))
        .unwrap_or_default();
    format!("{}/{}/{}{}", UPLOAD_DIR, user_id, file_id, ext)
}

/// File name without directories or final extension, used as a default title
pub fn title_from_file_name(file_name: &str) -> String {
    Path::new(file_name)
        .file_stem()
        .and_then(|stem| stem.to_str())
        .unwrap_or_default()
        .to_string()
}

/// Stored media for a transcription
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MediaFile {
    pub id: Uuid,
    pub transcription_id: Uuid,
    pub file_path: String,
    pub original_filename: String,
    pub is_video: bool,
    /// Duration in seconds, 0 when unknown
    pub duration: f64,
    pub file_size: i64,
}
