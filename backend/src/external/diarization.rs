//! Speaker diarization engine client

use std::path::Path;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::{multipart, Client};

use shared::models::SpeakerTurn;

use super::EngineError;

/// A backend that labels who spoke when
#[async_trait]
pub trait DiarizationEngine: Send + Sync {
    async fn diarize(
        &self,
        audio: &Path,
        min_speakers: Option<u32>,
        max_speakers: Option<u32>,
    ) -> Result<Vec<SpeakerTurn>, EngineError>;

    async fn is_available(&self) -> bool;
}

/// HTTP client for a pyannote-style diarization server
#[derive(Clone)]
pub struct HttpDiarizationEngine {
    client: Client,
    base_url: String,
    auth_token: Option<String>,
}

impl HttpDiarizationEngine {
    pub fn new(
        base_url: impl Into<String>,
        auth_token: Option<String>,
        timeout: Duration,
    ) -> Result<Self, EngineError> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| EngineError::Unavailable(format!("HTTP client setup failed: {}", e)))?;
        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            auth_token,
        })
    }
}

#[async_trait]
impl DiarizationEngine for HttpDiarizationEngine {
    #[tracing::instrument(skip(self))]
    async fn diarize(
        &self,
        audio: &Path,
        min_speakers: Option<u32>,
        max_speakers: Option<u32>,
    ) -> Result<Vec<SpeakerTurn>, EngineError> {
        let bytes = tokio::fs::read(audio).await?;
        let file_name = audio
            .file_name()
            .and_then(|n| n.to_str())
            .unwrap_or("audio")
            .to_string();

        let mut form = multipart::Form::new().part(
            "file",
            multipart::Part::bytes(bytes).file_name(file_name),
        );
        if let Some(min) = min_speakers {
            form = form.text("min_speakers", min.to_string());
        }
        if let Some(max) = max_speakers {
            form = form.text("max_speakers", max.to_string());
        }

        let mut request = self
            .client
            .post(format!("{}/diarize", self.base_url))
            .multipart(form);
        if let Some(token) = &self.auth_token {
            request = request.bearer_auth(token);
        }

        let response = request.send().await?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(if status.is_server_error() {
                EngineError::Unavailable(format!("{} - {}", status, body))
            } else {
                EngineError::Inference(format!("{} - {}", status, body))
            });
        }

        response
            .json::<Vec<SpeakerTurn>>()
            .await
            .map_err(|e| EngineError::InvalidResponse(e.to_string()))
    }

    async fn is_available(&self) -> bool {
        match self
            .client
            .get(format!("{}/health", self.base_url))
            .send()
            .await
        {
            Ok(response) => response.status().is_success(),
            Err(e) => {
                tracing::debug!("Diarization engine unreachable: {}", e);
                false
            }
        }
    }
}
