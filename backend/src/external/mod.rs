//! External engine integrations: Whisper inference, speaker diarization, ffmpeg

pub mod diarization;
pub mod ffmpeg;
pub mod whisper;

use thiserror::Error;

pub use diarization::{DiarizationEngine, HttpDiarizationEngine};
pub use ffmpeg::Ffmpeg;
pub use whisper::{
    prepare_cache_dir, EngineTranscript, HttpWhisperEngine, TranscribeRequest,
    TranscriptionEngine,
};

/// Failures reported by the transcription and diarization engines
#[derive(Debug, Error)]
pub enum EngineError {
    /// The requested model is not loaded on the inference server
    #[error("Model not available: {0}")]
    ModelNotAvailable(String),

    /// The engine could not be reached or answered with a server error
    #[error("Engine unavailable: {0}")]
    Unavailable(String),

    /// The engine accepted the request but inference failed
    #[error("Inference error: {0}")]
    Inference(String),

    /// The engine answered with a body we could not interpret
    #[error("Invalid engine response: {0}")]
    InvalidResponse(String),

    /// Audio could not be read or converted
    #[error("Invalid audio: {0}")]
    InvalidAudio(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<reqwest::Error> for EngineError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_decode() {
            EngineError::InvalidResponse(err.to_string())
        } else {
            EngineError::Unavailable(err.to_string())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_io_errors_convert() {
        let err: EngineError = std::io::Error::new(std::io::ErrorKind::NotFound, "gone").into();
        assert!(matches!(err, EngineError::Io(_)));
        assert_eq!(err.to_string(), "I/O error: gone");
    }
}
