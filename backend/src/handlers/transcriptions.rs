//! Transcription handlers: upload, listing, detail, lifecycle and diarization

use axum::{
    extract::{multipart::MultipartError, Multipart, Path, Query, State},
    http::StatusCode,
    Json,
};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use shared::models::{build_diarization, merge_with_diarization, Transcription, WhisperModel};
use shared::types::{PaginatedResponse, Pagination, PaginationMeta};

use crate::error::AppError;
use crate::middleware::{body_limit_for, CurrentUser, TOO_LARGE_MESSAGE};
use crate::services::transcription::{
    ModelAvailability, StatusResponse, TranscriptionDetail, TranscriptionListItem, UploadInput,
    UploadedFile, Uploader,
};
use crate::services::SubscriptionService;
use crate::AppState;

fn multipart_error(err: MultipartError) -> AppError {
    if err.status() == StatusCode::PAYLOAD_TOO_LARGE {
        AppError::PayloadTooLarge(TOO_LARGE_MESSAGE.to_string())
    } else {
        AppError::ValidationError(err.body_text())
    }
}

/// Upload a media file for transcription
pub async fn upload(
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
    mut multipart: Multipart,
) -> Result<(StatusCode, Json<Transcription>), AppError> {
    let limit = body_limit_for(&state.config.storage, user.is_superuser);
    let mut input = UploadInput::default();

    while let Some(mut field) = multipart.next_field().await.map_err(multipart_error)? {
        let name = field.name().unwrap_or_default().to_string();
        match name.as_str() {
            "audio_file" => {
                let file_name = field.file_name().unwrap_or_default().to_string();
                let mut bytes = Vec::new();
                while let Some(chunk) = field.chunk().await.map_err(multipart_error)? {
                    if (bytes.len() + chunk.len()) as u64 > limit {
                        return Err(AppError::PayloadTooLarge(TOO_LARGE_MESSAGE.to_string()));
                    }
                    bytes.extend_from_slice(&chunk);
                }
                input.file = Some(UploadedFile { file_name, bytes });
            }
            "title" => input.title = Some(field.text().await.map_err(multipart_error)?),
            "language" => input.language = Some(field.text().await.map_err(multipart_error)?),
            "model" => input.model = Some(field.text().await.map_err(multipart_error)?),
            other => tracing::debug!("Ignoring upload field {}", other),
        }
    }

    let uploader = Uploader {
        user_id: user.user_id,
        is_superuser: user.is_superuser,
    };
    let transcription = state
        .transcriptions()
        .create_upload(uploader, input)
        .await?;

    Ok((StatusCode::CREATED, Json(transcription)))
}

/// List the caller's transcriptions
pub async fn list(
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
    Query(pagination): Query<Pagination>,
) -> Result<Json<PaginatedResponse<TranscriptionListItem>>, AppError> {
    let (data, total) = state
        .transcriptions()
        .list(user.user_id, &pagination)
        .await?;
    Ok(Json(PaginatedResponse {
        data,
        pagination: PaginationMeta::new(&pagination, total),
    }))
}

/// Get one transcription with its media
pub async fn get(
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
    Path(id): Path<Uuid>,
) -> Result<Json<TranscriptionDetail>, AppError> {
    let detail = state.transcriptions().detail(user.user_id, id).await?;
    Ok(Json(detail))
}

/// Delete a transcription and its stored file
pub async fn delete(
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
    Path(id): Path<Uuid>,
) -> Result<StatusCode, AppError> {
    state.transcriptions().delete(user.user_id, id).await?;
    Ok(StatusCode::NO_CONTENT)
}

/// Poll the processing status
pub async fn status(
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
    Path(id): Path<Uuid>,
) -> Result<Json<StatusResponse>, AppError> {
    let status = state.transcriptions().status(user.user_id, id).await?;
    Ok(Json(status))
}

/// Re-queue a failed transcription
pub async fn retry(
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
    Path(id): Path<Uuid>,
) -> Result<Json<Transcription>, AppError> {
    let transcription = state.transcriptions().retry(user.user_id, id).await?;
    Ok(Json(transcription))
}

#[derive(Deserialize)]
pub struct AvailabilityQuery {
    pub model: String,
}

/// Whether a model can be used with the caller's plan
pub async fn model_availability(
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
    Query(query): Query<AvailabilityQuery>,
) -> Result<Json<ModelAvailability>, AppError> {
    let model = WhisperModel::parse(&query.model.to_lowercase())
        .map_err(|e| AppError::validation("model", e.to_string()))?;

    let plan = SubscriptionService::new(state.db.clone())
        .effective_plan(user.user_id)
        .await?;

    Ok(Json(ModelAvailability::evaluate(model, plan.as_ref())))
}

#[derive(Debug, Default, Deserialize)]
pub struct DiarizeRequest {
    pub min_speakers: Option<u32>,
    pub max_speakers: Option<u32>,
}

#[derive(Debug, Serialize)]
pub struct DiarizeResponse {
    pub status: &'static str,
    pub message: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub speaker_count: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub segment_count: Option<usize>,
}

/// Attribute transcript segments to speakers
pub async fn diarize(
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
    Path(id): Path<Uuid>,
    body: Option<Json<DiarizeRequest>>,
) -> Result<Json<DiarizeResponse>, AppError> {
    let Some(diarizer) = state.diarizer.clone() else {
        return Err(AppError::ServiceUnavailable(
            "Speaker diarization is not available on this server".to_string(),
        ));
    };
    let request = body.map(|Json(b)| b).unwrap_or_default();

    let transcriptions = state.transcriptions();
    let transcription = transcriptions.get_owned(user.user_id, id).await?;

    let subscription = SubscriptionService::new(state.db.clone())
        .get_for_user(user.user_id)
        .await?;
    let plan = subscription
        .as_ref()
        .and_then(|s| s.effective_plan(Utc::now()))
        .ok_or_else(|| {
            AppError::Forbidden("This feature requires an active subscription".to_string())
        })?;
    if !plan.speaker_diarization_enabled {
        return Err(AppError::Forbidden(
            "Your current plan does not include speaker diarization".to_string(),
        ));
    }

    if transcription.has_speaker_diarization {
        return Ok(Json(DiarizeResponse {
            status: "already_processed",
            message: "Speaker diarization was already performed on this transcription",
            speaker_count: None,
            segment_count: None,
        }));
    }

    let audio_missing =
        || AppError::NotFoundMessage("Audio file not found for this transcription".to_string());
    let media = transcriptions.media_for(id).await?.ok_or_else(audio_missing)?;
    let audio_path = state.storage.resolve(&media.file_path)?;
    if !tokio::fs::try_exists(&audio_path).await.unwrap_or(false) {
        return Err(audio_missing());
    }

    let turns = diarizer
        .diarize(&audio_path, request.min_speakers, request.max_speakers)
        .await
        .map_err(|e| {
            tracing::error!(transcription_id = %id, error = %e, "Speaker diarization failed");
            AppError::Internal(format!(
                "An error occurred during speaker diarization: {}",
                e
            ))
        })?;

    let result = build_diarization(turns, media.duration);
    let merged = merge_with_diarization(transcription.segments, &result.segments);
    transcriptions.save_diarization(id, &result, &merged).await?;

    Ok(Json(DiarizeResponse {
        status: "success",
        message: "Speaker diarization completed successfully",
        speaker_count: Some(result.speakers.len()),
        segment_count: Some(result.segments.len()),
    }))
}
