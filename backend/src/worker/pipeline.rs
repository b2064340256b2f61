//! The transcription pipeline run for each queued job

use std::path::Path;
use std::sync::Arc;
use std::time::Instant;

use thiserror::Error;
use uuid::Uuid;

use shared::models::{
    classify, clean_segments, duration_from_segments, is_wav, word_count, MediaKind,
    TranscriptionStatus, WhisperModel,
};
use shared::types::{normalize_language, LanguageChoice};

use crate::error::AppError;
use crate::external::ffmpeg::temp_wav;
use crate::external::{
    EngineError, EngineTranscript, Ffmpeg, TranscribeRequest, TranscriptionEngine,
};
use crate::services::transcription::{CompletedTranscript, TranscriptionService};
use crate::storage::MediaStorage;

/// Why a pipeline run stopped early
#[derive(Debug, Error)]
pub enum PipelineError {
    /// Retrying cannot help: missing media, bad format, failed conversion
    #[error("{0}")]
    Permanent(String),

    /// The engine or a dependency failed; another attempt may succeed up to the retry limit
    #[error("{0}")]
    Retryable(String),

    #[error(transparent)]
    App(#[from] AppError),
}

impl PipelineError {
    pub fn is_retryable(&self) -> bool {
        !matches!(self, PipelineError::Permanent(_))
    }
}

impl From<EngineError> for PipelineError {
    fn from(err: EngineError) -> Self {
        PipelineError::Retryable(err.to_string())
    }
}

/// Result of a run that did not fail
#[derive(Debug, Clone, PartialEq)]
pub enum ProcessOutcome {
    Completed {
        model_used: WhisperModel,
        word_count: i32,
        duration: f64,
    },
    /// The record was completed by an earlier run
    AlreadyCompleted,
    /// Nothing to do: the record is gone or has failed
    Skipped(String),
}

/// Everything one pipeline run needs
#[derive(Clone)]
pub struct Pipeline {
    transcriptions: TranscriptionService,
    engine: Arc<dyn TranscriptionEngine>,
    ffmpeg: Ffmpeg,
    storage: MediaStorage,
}

impl Pipeline {
    pub fn new(
        transcriptions: TranscriptionService,
        engine: Arc<dyn TranscriptionEngine>,
        ffmpeg: Ffmpeg,
    ) -> Self {
        let storage = transcriptions.storage().clone();
        Self {
            transcriptions,
            engine,
            ffmpeg,
            storage,
        }
    }

    pub fn transcriptions(&self) -> &TranscriptionService {
        &self.transcriptions
    }

    /// Transcribe one record end to end
    pub async fn process(&self, transcription_id: Uuid) -> Result<ProcessOutcome, PipelineError> {
        let Some(transcription) = self.transcriptions.get(transcription_id).await? else {
            return Ok(ProcessOutcome::Skipped(format!(
                "Transcription {} no longer exists",
                transcription_id
            )));
        };

        match transcription.status {
            TranscriptionStatus::Pending => {
                self.transcriptions
                    .transition(transcription_id, TranscriptionStatus::Processing)
                    .await?;
            }
            // A job reclaimed from a lost worker finds its record still processing
            TranscriptionStatus::Processing => {
                tracing::info!(%transcription_id, "Resuming transcription left in processing");
            }
            TranscriptionStatus::Completed => {
                tracing::info!(%transcription_id, "Transcription already completed");
                return Ok(ProcessOutcome::AlreadyCompleted);
            }
            other => {
                return Ok(ProcessOutcome::Skipped(format!(
                    "Transcription {} is {}",
                    transcription_id, other
                )));
            }
        }
        tracing::info!(%transcription_id, title = %transcription.title, "Processing transcription");

        let media = self
            .transcriptions
            .media_for(transcription_id)
            .await?
            .ok_or_else(|| {
                PipelineError::Permanent(format!(
                    "No media file found for transcription {}",
                    transcription_id
                ))
            })?;

        let media_path = self.storage.resolve(&media.file_path)?;
        if !tokio::fs::try_exists(&media_path).await.unwrap_or(false) {
            return Err(PipelineError::Permanent(format!(
                "Media file not found on disk: {}",
                media.file_path
            )));
        }

        let kind = classify(&media.file_path);
        if !kind.is_supported() {
            return Err(PipelineError::Permanent(format!(
                "Unsupported file format: {}",
                media.original_filename
            )));
        }

        // Dropped at the end of this function on every path
        let converted;
        let audio_path: &Path = if is_wav(&media.file_path) {
            &media_path
        } else {
            converted = temp_wav().map_err(|e| {
                PipelineError::Retryable(format!("Could not create a temporary WAV file: {}", e))
            })?;
            self.ffmpeg
                .convert_to_wav(&media_path, &converted, kind == MediaKind::Video)
                .await
                .map_err(|e| {
                    PipelineError::Permanent(format!("Failed to convert media file: {}", e))
                })?;
            &converted
        };

        let language = LanguageChoice::parse(&transcription.language).unwrap_or(LanguageChoice::Auto);
        let request = TranscribeRequest::new(
            transcription.model_used,
            language.engine_code().map(str::to_string),
        );

        let started = Instant::now();
        let (transcript, model_used) =
            transcribe_with_fallback(self.engine.as_ref(), audio_path, request).await?;
        let processing_time = started.elapsed().as_secs_f64();

        let text = transcript.text.trim().to_string();
        let segments = clean_segments(transcript.segments);
        let detected_language = transcript
            .language
            .as_deref()
            .map(normalize_language)
            .or_else(|| language.engine_code().map(str::to_string))
            .unwrap_or_else(|| "en".to_string());

        let completed = CompletedTranscript {
            word_count: word_count(&text),
            text,
            language: detected_language,
            language_probability: transcript.language_probability,
            processing_time,
            segments,
            model_used,
        };
        let duration = match duration_from_segments(&completed.segments) {
            Some(end) => end,
            None => self.ffmpeg.probe_duration(&media_path).await.unwrap_or(0.0),
        };
        self.transcriptions
            .complete(transcription_id, &completed, media.id, duration)
            .await?;

        tracing::info!(
            %transcription_id,
            model = %model_used,
            words = completed.word_count,
            duration,
            processing_time,
            "Transcription completed"
        );

        Ok(ProcessOutcome::Completed {
            model_used,
            word_count: completed.word_count,
            duration,
        })
    }
}

/// Run the engine, falling back to the base model when the requested one is not served
pub async fn transcribe_with_fallback(
    engine: &dyn TranscriptionEngine,
    audio: &Path,
    mut request: TranscribeRequest,
) -> Result<(EngineTranscript, WhisperModel), EngineError> {
    match engine.transcribe(audio, &request).await {
        Ok(transcript) => Ok((transcript, request.model)),
        Err(EngineError::ModelNotAvailable(reason)) if request.model != WhisperModel::Base => {
            tracing::warn!(
                model = %request.model,
                "Model not available ({}), falling back to base",
                reason
            );
            request.model = WhisperModel::Base;
            let transcript = engine.transcribe(audio, &request).await?;
            Ok((transcript, WhisperModel::Base))
        }
        Err(e) => Err(e),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::sync::Mutex;

    /// Serves only the models it was built with and records every request
    struct FakeEngine {
        served: Vec<WhisperModel>,
        calls: Mutex<Vec<WhisperModel>>,
    }

    impl FakeEngine {
        fn serving(served: &[WhisperModel]) -> Self {
            Self {
                served: served.to_vec(),
                calls: Mutex::new(Vec::new()),
            }
        }
    }

    #[async_trait]
    impl TranscriptionEngine for FakeEngine {
        async fn transcribe(
            &self,
            _wav: &Path,
            request: &TranscribeRequest,
        ) -> Result<EngineTranscript, EngineError> {
            self.calls.lock().unwrap().push(request.model);
            if !self.served.contains(&request.model) {
                return Err(EngineError::ModelNotAvailable(request.model.to_string()));
            }
            Ok(EngineTranscript {
                text: "hello there".into(),
                language: Some("en".into()),
                language_probability: Some(0.9),
                duration: Some(1.0),
                segments: Vec::new(),
            })
        }

        async fn health(&self) -> Result<(), EngineError> {
            Ok(())
        }
    }

    #[tokio::test]
    async fn test_requested_model_is_used_when_served() {
        let engine = FakeEngine::serving(&[WhisperModel::Base, WhisperModel::Medium]);
        let request = TranscribeRequest::new(WhisperModel::Medium, None);
        let (_, model) = transcribe_with_fallback(&engine, Path::new("a.wav"), request)
            .await
            .unwrap();
        assert_eq!(model, WhisperModel::Medium);
        assert_eq!(*engine.calls.lock().unwrap(), vec![WhisperModel::Medium]);
    }

    #[tokio::test]
    async fn test_unavailable_model_falls_back_to_base() {
        let engine = FakeEngine::serving(&[WhisperModel::Base]);
        let request = TranscribeRequest::new(WhisperModel::Large, Some("fr".into()));
        let (transcript, model) = transcribe_with_fallback(&engine, Path::new("a.wav"), request)
            .await
            .unwrap();
        assert_eq!(model, WhisperModel::Base);
        assert_eq!(transcript.text, "hello there");
        assert_eq!(
            *engine.calls.lock().unwrap(),
            vec![WhisperModel::Large, WhisperModel::Base]
        );
    }

    #[tokio::test]
    async fn test_missing_base_model_is_an_error() {
        let engine = FakeEngine::serving(&[]);
        let request = TranscribeRequest::new(WhisperModel::Base, None);
        let err = transcribe_with_fallback(&engine, Path::new("a.wav"), request)
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::ModelNotAvailable(_)));
        assert_eq!(engine.calls.lock().unwrap().len(), 1);
    }

    #[test]
    fn test_engine_errors_are_retried() {
        let errors = [
            EngineError::Unavailable("down".into()),
            EngineError::Inference("oom".into()),
            EngineError::InvalidResponse("not json".into()),
            EngineError::InvalidAudio("garbage".into()),
            EngineError::ModelNotAvailable("base".into()),
        ];
        for err in errors {
            let mapped: PipelineError = err.into();
            assert!(mapped.is_retryable(), "{} should be retried", mapped);
        }

        assert!(!PipelineError::Permanent("missing media".into()).is_retryable());
    }
}
