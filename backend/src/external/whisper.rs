//! Whisper transcription engine client
//!
//! Talks to an OpenAI-compatible inference server (faster-whisper-server,
//! whisper.cpp server and friends) over multipart HTTP.

use std::path::{Path, PathBuf};
use std::time::Duration;

use async_trait::async_trait;
use reqwest::{multipart, Client, StatusCode};
use serde::Deserialize;

use shared::models::{Segment, WhisperModel, Word};

use super::EngineError;

/// Decoding options for one transcription
#[derive(Debug, Clone)]
pub struct TranscribeRequest {
    pub model: WhisperModel,
    /// `None` lets the engine detect the language
    pub language: Option<String>,
    pub temperature: f32,
    pub best_of: u32,
    pub beam_size: u32,
    pub word_timestamps: bool,
}

impl TranscribeRequest {
    pub fn new(model: WhisperModel, language: Option<String>) -> Self {
        Self {
            model,
            language,
            temperature: 0.2,
            best_of: 3,
            beam_size: 5,
            word_timestamps: true,
        }
    }
}

/// What the engine produced for one file
#[derive(Debug, Clone, PartialEq)]
pub struct EngineTranscript {
    pub text: String,
    pub language: Option<String>,
    pub language_probability: Option<f64>,
    pub duration: Option<f64>,
    pub segments: Vec<Segment>,
}

/// A speech-to-text backend
#[async_trait]
pub trait TranscriptionEngine: Send + Sync {
    async fn transcribe(
        &self,
        wav: &Path,
        request: &TranscribeRequest,
    ) -> Result<EngineTranscript, EngineError>;

    async fn health(&self) -> Result<(), EngineError>;
}

/// HTTP client for a Whisper inference server
#[derive(Clone)]
pub struct HttpWhisperEngine {
    client: Client,
    base_url: String,
}

#[derive(Debug, Deserialize)]
struct VerboseTranscription {
    #[serde(default)]
    text: String,
    language: Option<String>,
    language_probability: Option<f64>,
    duration: Option<f64>,
    #[serde(default)]
    segments: Vec<VerboseSegment>,
    #[serde(default)]
    words: Vec<VerboseWord>,
}

#[derive(Debug, Deserialize)]
struct VerboseSegment {
    start: f64,
    end: f64,
    #[serde(default)]
    text: String,
    #[serde(default)]
    words: Vec<VerboseWord>,
}

#[derive(Debug, Clone, Deserialize)]
struct VerboseWord {
    word: String,
    start: f64,
    end: f64,
    #[serde(default)]
    probability: f64,
}

impl From<VerboseWord> for Word {
    fn from(w: VerboseWord) -> Self {
        Word {
            word: w.word,
            start: w.start,
            end: w.end,
            probability: w.probability,
        }
    }
}

impl HttpWhisperEngine {
    pub fn new(base_url: impl Into<String>, timeout: Duration) -> Result<Self, EngineError> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| EngineError::Unavailable(format!("HTTP client setup failed: {}", e)))?;
        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
        })
    }

    fn build_form(
        bytes: Vec<u8>,
        file_name: String,
        request: &TranscribeRequest,
    ) -> Result<multipart::Form, EngineError> {
        let part = multipart::Part::bytes(bytes)
            .file_name(file_name)
            .mime_str("audio/wav")
            .map_err(|e| EngineError::InvalidAudio(e.to_string()))?;

        let mut form = multipart::Form::new()
            .part("file", part)
            .text("model", request.model.as_str().to_string())
            .text("response_format", "verbose_json")
            .text("timestamp_granularities[]", "segment")
            .text("temperature", request.temperature.to_string())
            .text("best_of", request.best_of.to_string())
            .text("beam_size", request.beam_size.to_string());
        if request.word_timestamps {
            form = form.text("timestamp_granularities[]", "word");
        }
        if let Some(language) = &request.language {
            form = form.text("language", language.clone());
        }
        Ok(form)
    }
}

/// Attach top-level words to the segment whose span contains their start
fn attach_words(segments: &mut [Segment], words: Vec<VerboseWord>) {
    for word in words {
        if let Some(segment) = segments
            .iter_mut()
            .find(|s| word.start >= s.start && word.start < s.end)
        {
            segment.words.push(word.into());
        }
    }
}

fn into_transcript(body: VerboseTranscription) -> EngineTranscript {
    let has_segment_words = body.segments.iter().any(|s| !s.words.is_empty());
    let mut segments: Vec<Segment> = body
        .segments
        .into_iter()
        .map(|s| Segment {
            start: s.start,
            end: s.end,
            text: s.text,
            words: s.words.into_iter().map(Word::from).collect(),
            speaker: None,
        })
        .collect();
    if !has_segment_words {
        attach_words(&mut segments, body.words);
    }

    EngineTranscript {
        text: body.text.trim().to_string(),
        language: body.language.map(|l| shared::normalize_language(&l)),
        language_probability: body.language_probability,
        duration: body.duration,
        segments,
    }
}

fn is_unknown_model_error(status: StatusCode, body: &str) -> bool {
    (status == StatusCode::NOT_FOUND || status == StatusCode::BAD_REQUEST)
        && body.to_lowercase().contains("model")
}

#[async_trait]
impl TranscriptionEngine for HttpWhisperEngine {
    #[tracing::instrument(skip(self, request), fields(model = %request.model))]
    async fn transcribe(
        &self,
        wav: &Path,
        request: &TranscribeRequest,
    ) -> Result<EngineTranscript, EngineError> {
        let bytes = tokio::fs::read(wav).await?;
        let file_name = wav
            .file_name()
            .and_then(|n| n.to_str())
            .unwrap_or("audio.wav")
            .to_string();
        let form = Self::build_form(bytes, file_name, request)?;

        let url = format!("{}/v1/audio/transcriptions", self.base_url);
        let response = self.client.post(&url).multipart(form).send().await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            if is_unknown_model_error(status, &body) {
                return Err(EngineError::ModelNotAvailable(request.model.to_string()));
            }
            if status.is_server_error() {
                return Err(EngineError::Unavailable(format!("{} - {}", status, body)));
            }
            return Err(EngineError::Inference(format!("{} - {}", status, body)));
        }

        let body: VerboseTranscription = response
            .json()
            .await
            .map_err(|e| EngineError::InvalidResponse(e.to_string()))?;

        Ok(into_transcript(body))
    }

    async fn health(&self) -> Result<(), EngineError> {
        let url = format!("{}/health", self.base_url);
        let response = self.client.get(&url).send().await?;
        if response.status().is_success() {
            Ok(())
        } else {
            Err(EngineError::Unavailable(format!(
                "health check returned {}",
                response.status()
            )))
        }
    }
}

/// Create the model cache directory, falling back to a fresh temp dir
pub fn prepare_cache_dir(configured: &Path) -> PathBuf {
    match create_shared_dir(configured) {
        Ok(()) => configured.to_path_buf(),
        Err(e) => {
            let fallback = match tempfile::Builder::new().prefix("whisper-cache-").tempdir() {
                // Kept for the life of the process
                Ok(dir) => dir.into_path(),
                Err(temp_err) => {
                    tracing::error!("Could not create a temp cache dir: {}", temp_err);
                    std::env::temp_dir()
                }
            };
            tracing::warn!(
                "Could not create Whisper cache dir {}: {}; using {}",
                configured.display(),
                e,
                fallback.display()
            );
            if let Err(e) = create_shared_dir(&fallback) {
                tracing::error!("Could not create fallback cache dir: {}", e);
            }
            fallback
        }
    }
}

fn create_shared_dir(path: &Path) -> std::io::Result<()> {
    std::fs::create_dir_all(path)?;
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o777))?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn wav_file() -> tempfile::NamedTempFile {
        let file = tempfile::Builder::new().suffix(".wav").tempfile().unwrap();
        std::fs::write(file.path(), b"RIFF....WAVE").unwrap();
        file
    }

    fn engine(server: &MockServer) -> HttpWhisperEngine {
        HttpWhisperEngine::new(server.uri(), Duration::from_secs(5)).unwrap()
    }

    #[tokio::test]
    async fn test_transcribe_parses_verbose_json() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1/audio/transcriptions"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "text": " Hello there. ",
                "language": "english",
                "duration": 3.5,
                "segments": [
                    {"start": 0.0, "end": 1.5, "text": " Hello"},
                    {"start": 1.5, "end": 3.5, "text": " there."}
                ],
                "words": [
                    {"word": "Hello", "start": 0.1, "end": 1.0},
                    {"word": "there.", "start": 1.6, "end": 3.4}
                ]
            })))
            .mount(&server)
            .await;

        let wav = wav_file();
        let request = TranscribeRequest::new(WhisperModel::Base, None);
        let transcript = engine(&server).transcribe(wav.path(), &request).await.unwrap();

        assert_eq!(transcript.text, "Hello there.");
        assert_eq!(transcript.language.as_deref(), Some("en"));
        assert_eq!(transcript.segments.len(), 2);
        assert_eq!(transcript.segments[1].words[0].word, "there.");
    }

    #[tokio::test]
    async fn test_unknown_model_maps_to_model_not_available() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1/audio/transcriptions"))
            .respond_with(ResponseTemplate::new(404).set_body_string("Model 'large' not found"))
            .mount(&server)
            .await;

        let wav = wav_file();
        let request = TranscribeRequest::new(WhisperModel::Large, Some("en".into()));
        let err = engine(&server).transcribe(wav.path(), &request).await.unwrap_err();
        assert!(matches!(err, EngineError::ModelNotAvailable(_)));
    }

    #[tokio::test]
    async fn test_server_error_is_unavailable() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(503))
            .mount(&server)
            .await;

        let wav = wav_file();
        let request = TranscribeRequest::new(WhisperModel::Base, None);
        let err = engine(&server).transcribe(wav.path(), &request).await.unwrap_err();
        assert!(matches!(err, EngineError::Unavailable(_)));
    }

    #[tokio::test]
    async fn test_health() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/health"))
            .respond_with(ResponseTemplate::new(200))
            .mount(&server)
            .await;
        assert!(engine(&server).health().await.is_ok());
    }

    #[test]
    fn test_prepare_cache_dir_creates_directory() {
        let root = tempfile::tempdir().unwrap();
        let target = root.path().join("cache/whisper");
        assert_eq!(prepare_cache_dir(&target), target);
        assert!(target.is_dir());
    }
}
