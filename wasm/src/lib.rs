//! WebAssembly module for the Speech2Text upload page
//!
//! Lets the browser apply the same rules the server does before a file is sent:
//! - Media type detection
//! - Plan size ceilings and model access
//! - Duration display

use wasm_bindgen::prelude::*;

use shared::models::{classify, WhisperModel};

// Re-export shared types for use in JavaScript
pub use shared::models::*;
pub use shared::validation::*;

fn parse_model(model: &str) -> Option<WhisperModel> {
    WhisperModel::parse(model).ok()
}

/// "audio", "video" or "unsupported"
#[wasm_bindgen]
pub fn classify_media_file(name: &str) -> String {
    classify(name).as_str().to_string()
}

/// Audio length as `m:ss`
#[wasm_bindgen(js_name = formatDuration)]
pub fn format_duration(seconds: f64) -> String {
    shared::models::format_duration(seconds)
}

/// Whether a plan capped at `max_model` may use `model`; unknown names are never available
#[wasm_bindgen]
pub fn model_available(max_model: &str, model: &str) -> bool {
    match (parse_model(max_model), parse_model(model)) {
        (Some(max), Some(model)) => model <= max,
        _ => false,
    }
}

/// JSON array of model names up to `max_model`, smallest first
#[wasm_bindgen]
pub fn available_models(max_model: &str) -> Result<String, JsValue> {
    let max = parse_model(max_model)
        .ok_or_else(|| JsValue::from_str(&format!("Unknown whisper model: {}", max_model)))?;
    serde_json::to_string(&WhisperModel::up_to(max))
        .map_err(|e| JsValue::from_str(&format!("Serialization failed: {}", e)))
}

#[wasm_bindgen(js_name = maxUploadMegabytes)]
pub fn max_upload_megabytes(max_audio_minutes: i32) -> f64 {
    shared::validation::max_upload_megabytes(max_audio_minutes) as f64
}

/// Empty string when the file may be uploaded, otherwise the message to show
#[wasm_bindgen(js_name = validateUpload)]
pub fn validate_upload(name: &str, size_bytes: f64, max_audio_minutes: i32) -> String {
    let size = if size_bytes.is_finite() && size_bytes > 0.0 {
        size_bytes as u64
    } else {
        0
    };
    match shared::validation::validate_upload(name, size, max_audio_minutes) {
        Ok(()) => String::new(),
        Err(message) => message,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_classify_media_file() {
        assert_eq!(classify_media_file("meeting.MP3"), "audio");
        assert_eq!(classify_media_file("lecture.mkv"), "video");
        assert_eq!(classify_media_file("notes.pdf"), "unsupported");
        assert_eq!(classify_media_file("no_extension"), "unsupported");
    }

    #[test]
    fn test_model_access() {
        assert!(model_available("base", "tiny"));
        assert!(model_available("medium", "medium"));
        assert!(!model_available("small", "large"));
        assert!(!model_available("huge", "tiny"));
    }

    #[test]
    fn test_available_models_json() {
        assert_eq!(available_models("small").unwrap(), r#"["tiny","base","small"]"#);
    }

    #[test]
    fn test_upload_checks() {
        assert_eq!(max_upload_megabytes(10), 600.0);
        assert_eq!(validate_upload("talk.wav", 1024.0, 10), "");
        assert!(validate_upload("talk.wav", 601.0 * 1024.0 * 1024.0, 10).contains("600MB"));
        assert!(validate_upload("talk.txt", 1.0, 10).starts_with("Unsupported file format"));
    }

    #[test]
    fn test_format_duration() {
        assert_eq!(format_duration(125.0), "2:05");
        assert_eq!(format_duration(0.0), "-");
    }
}
