//! Transcription service: uploads, listing, lifecycle updates and diarization storage

use chrono::{DateTime, Utc};
use serde::Serialize;
use sqlx::types::Json;
use sqlx::PgPool;
use uuid::Uuid;

use shared::models::{
    classify, format_duration, storage_relative_path, title_from_file_name, Allowance,
    DiarizationResult, MediaFile, MediaKind, QuotaDenial, Segment, Speaker, SpeakerTurn,
    SubscriptionPlan, Transcription, TranscriptionStatus, WhisperModel,
};
use shared::types::{language_name, LanguageChoice, Pagination};
use shared::validation::{validate_media_file_name, validate_upload_size};

use crate::error::{AppError, AppResult};
use crate::external::Ffmpeg;
use crate::services::queue::enqueue;
use crate::services::subscription::SubscriptionService;
use crate::services::usage::{self, UsageService};
use crate::storage::MediaStorage;

pub const NO_FILE_UPLOADED: &str = "No file was uploaded.";
pub const MODEL_NOT_IN_PLAN: &str =
    "The selected model is not available with your current subscription.";
pub const EMPTY_TEXT_WARNING: &str = "Transcription completed but no text was generated.";

const MAX_TITLE_CHARS: usize = 255;

/// Transcription service
#[derive(Clone)]
pub struct TranscriptionService {
    db: PgPool,
    storage: MediaStorage,
    ffmpeg: Ffmpeg,
}

/// A file received in an upload request
#[derive(Debug)]
pub struct UploadedFile {
    pub file_name: String,
    pub bytes: Vec<u8>,
}

/// Upload form fields
#[derive(Debug, Default)]
pub struct UploadInput {
    pub file: Option<UploadedFile>,
    pub title: Option<String>,
    pub language: Option<String>,
    pub model: Option<String>,
}

/// Who is uploading
#[derive(Debug, Clone, Copy)]
pub struct Uploader {
    pub user_id: Uuid,
    pub is_superuser: bool,
}

#[derive(Debug, Clone, sqlx::FromRow)]
pub struct TranscriptionRow {
    pub id: Uuid,
    pub user_id: Uuid,
    pub title: String,
    pub status: String,
    pub text: Option<String>,
    pub error_message: Option<String>,
    pub processing_time: Option<f64>,
    pub language: String,
    pub language_probability: Option<f64>,
    pub word_count: Option<i32>,
    pub segments: Json<Vec<Segment>>,
    pub model_used: String,
    pub has_speaker_diarization: bool,
    pub speakers: Option<Json<Vec<Speaker>>>,
    pub speaker_segments: Option<Json<Vec<SpeakerTurn>>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl From<TranscriptionRow> for Transcription {
    fn from(row: TranscriptionRow) -> Self {
        Transcription {
            id: row.id,
            user_id: row.user_id,
            title: row.title,
            status: TranscriptionStatus::parse(&row.status).unwrap_or_default(),
            text: row.text,
            error_message: row.error_message,
            processing_time: row.processing_time,
            language: row.language,
            language_probability: row.language_probability,
            word_count: row.word_count,
            segments: row.segments.0,
            model_used: WhisperModel::parse(&row.model_used).unwrap_or_default(),
            has_speaker_diarization: row.has_speaker_diarization,
            created_at: row.created_at,
            updated_at: row.updated_at,
        }
    }
}

const TRANSCRIPTION_COLUMNS: &str = r#"
    id, user_id, title, status, text, error_message, processing_time, language,
    language_probability, word_count, segments, model_used, has_speaker_diarization,
    speakers, speaker_segments, created_at, updated_at
"#;

#[derive(Debug, Clone, sqlx::FromRow)]
struct MediaRow {
    id: Uuid,
    transcription_id: Uuid,
    file_path: String,
    original_filename: String,
    is_video: bool,
    duration: f64,
    file_size: i64,
}

impl From<MediaRow> for MediaFile {
    fn from(row: MediaRow) -> Self {
        MediaFile {
            id: row.id,
            transcription_id: row.transcription_id,
            file_path: row.file_path,
            original_filename: row.original_filename,
            is_video: row.is_video,
            duration: row.duration,
            file_size: row.file_size,
        }
    }
}

/// Row of `GET /transcriptions`
#[derive(Debug, Serialize, sqlx::FromRow)]
pub struct TranscriptionListItem {
    pub id: Uuid,
    pub title: String,
    pub status: String,
    pub language: String,
    pub model_used: String,
    pub word_count: Option<i32>,
    pub has_speaker_diarization: bool,
    pub is_video: Option<bool>,
    pub duration: Option<f64>,
    #[sqlx(skip)]
    pub duration_display: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Serialize)]
pub struct MediaResponse {
    pub original_filename: String,
    pub is_video: bool,
    pub duration: f64,
    pub file_size: i64,
}

impl From<MediaFile> for MediaResponse {
    fn from(media: MediaFile) -> Self {
        Self {
            original_filename: media.original_filename,
            is_video: media.is_video,
            duration: media.duration,
            file_size: media.file_size,
        }
    }
}

/// Response of `GET /transcriptions/{id}`
#[derive(Debug, Serialize)]
pub struct TranscriptionDetail {
    #[serde(flatten)]
    pub transcription: Transcription,
    pub media: Option<MediaResponse>,
    pub language_name: String,
    pub duration_display: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub speakers: Option<Vec<Speaker>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub speaker_segments: Option<Vec<SpeakerTurn>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub warning: Option<String>,
}

/// Response of `GET /transcriptions/{id}/status`
#[derive(Debug, Serialize)]
pub struct StatusResponse {
    pub status: TranscriptionStatus,
    pub text: String,
    pub is_ready: bool,
}

/// Response of `GET /models/availability`
#[derive(Debug, Serialize, PartialEq)]
pub struct ModelAvailability {
    pub model: WhisperModel,
    pub available: bool,
    pub message: String,
}

impl ModelAvailability {
    /// Evaluate a model against the caller's plan; `None` means no active subscription
    pub fn evaluate(model: WhisperModel, plan: Option<&SubscriptionPlan>) -> Self {
        let (available, message) = match plan {
            None => (false, "No active subscription found".to_string()),
            Some(plan) if plan.can_use_model(model) => {
                (true, "Available with your plan".to_string())
            }
            Some(plan) => (
                false,
                format!("Not available with your {} plan. Please upgrade.", plan.name),
            ),
        };
        Self {
            model,
            available,
            message,
        }
    }
}

/// Engine output to persist on a completed transcription
#[derive(Debug, Clone)]
pub struct CompletedTranscript {
    pub text: String,
    pub language: String,
    pub language_probability: Option<f64>,
    pub processing_time: f64,
    pub word_count: i32,
    pub segments: Vec<Segment>,
    pub model_used: WhisperModel,
}

fn not_found() -> AppError {
    AppError::NotFound("Transcription".to_string())
}

fn parse_model(raw: Option<&str>) -> AppResult<WhisperModel> {
    match raw.map(str::trim).filter(|m| !m.is_empty()) {
        None => Ok(WhisperModel::default()),
        Some(m) => WhisperModel::parse(m).map_err(|e| AppError::validation("model", e.to_string())),
    }
}

fn parse_language(raw: Option<&str>) -> AppResult<LanguageChoice> {
    let raw = raw.unwrap_or("en");
    LanguageChoice::parse(raw).ok_or_else(|| {
        AppError::validation(
            "language",
            format!("Select a valid choice. {} is not one of the available choices.", raw),
        )
    })
}

fn upload_title(title: Option<&str>, file_name: &str) -> String {
    let title = title
        .map(str::trim)
        .filter(|t| !t.is_empty())
        .map(str::to_string)
        .unwrap_or_else(|| title_from_file_name(file_name));
    title.chars().take(MAX_TITLE_CHARS).collect()
}

/// What the uploader's plan allows, gathered before the file is stored
#[derive(Debug, Clone, Copy)]
pub struct UploadLimits<'a> {
    pub is_superuser: bool,
    pub plan: Option<&'a SubscriptionPlan>,
    pub allowance: Option<&'a Allowance>,
}

/// Upload rules that do not need the stored file, checked in the order they are reported
pub fn precheck_upload(
    input: &UploadInput,
    limits: UploadLimits<'_>,
) -> AppResult<(WhisperModel, LanguageChoice)> {
    let file = input
        .file
        .as_ref()
        .filter(|f| !f.file_name.trim().is_empty())
        .ok_or_else(|| AppError::validation("audio_file", NO_FILE_UPLOADED))?;

    validate_media_file_name(&file.file_name)
        .map_err(|m| AppError::validation("audio_file", m))?;

    let model = parse_model(input.model.as_deref())?;
    let language = parse_language(input.language.as_deref())?;

    if !limits.is_superuser {
        let plan = limits
            .plan
            .ok_or_else(|| AppError::PlanRestriction(QuotaDenial::NoPlan.to_string()))?;
        if !plan.can_use_model(model) {
            return Err(AppError::PlanRestriction(MODEL_NOT_IN_PLAN.to_string()));
        }
        validate_upload_size(file.bytes.len() as u64, plan.max_audio_minutes)
            .map_err(AppError::PayloadTooLarge)?;
    }

    if let (Some(plan), Some(allowance)) = (limits.plan, limits.allowance) {
        if allowance.has_reached_limit(Some(plan)) {
            return Err(AppError::QuotaExceeded(
                QuotaDenial::MonthlyLimit {
                    max_files: plan.max_files_per_month,
                }
                .to_string(),
            ));
        }
    }

    Ok((model, language))
}

/// Only failed transcriptions go back on the queue by hand
pub fn ensure_retryable(status: TranscriptionStatus) -> AppResult<()> {
    if status == TranscriptionStatus::Failed {
        return Ok(());
    }
    Err(AppError::InvalidStateTransition(format!(
        "Only failed transcriptions can be retried (current status: {})",
        status
    )))
}

impl TranscriptionService {
    /// Create a new TranscriptionService instance
    pub fn new(db: PgPool, storage: MediaStorage, ffmpeg: Ffmpeg) -> Self {
        Self {
            db,
            storage,
            ffmpeg,
        }
    }

    /// Validate an upload, store the file and queue it for transcription
    pub async fn create_upload(
        &self,
        uploader: Uploader,
        input: UploadInput,
    ) -> AppResult<Transcription> {
        let subscriptions = SubscriptionService::new(self.db.clone());
        let subscription = subscriptions.get_for_user(uploader.user_id).await?;
        let now = Utc::now();
        let plan = subscription
            .as_ref()
            .and_then(|s| s.effective_plan(now))
            .cloned();
        let priority = subscription
            .as_ref()
            .map(|s| s.queue_priority(now))
            .unwrap_or(0);

        let allowance = match plan {
            Some(_) => Some(
                UsageService::new(self.db.clone())
                    .allowance(uploader.user_id)
                    .await?,
            ),
            None => None,
        };

        let (model, language) = precheck_upload(
            &input,
            UploadLimits {
                is_superuser: uploader.is_superuser,
                plan: plan.as_ref(),
                allowance: allowance.as_ref(),
            },
        )?;
        let file = input
            .file
            .ok_or_else(|| AppError::validation("audio_file", NO_FILE_UPLOADED))?;

        let file_id = Uuid::new_v4();
        let relative = storage_relative_path(uploader.user_id, file_id, &file.file_name);
        let stored = self.storage.save(&relative, &file.bytes).await?;

        let result = self
            .finish_upload(
                uploader,
                &file,
                &relative,
                &stored,
                input.title.as_deref(),
                language,
                model,
                plan.as_ref(),
                priority,
            )
            .await;

        if result.is_err() {
            self.storage.delete_quietly(&relative).await;
        }
        result
    }

    #[allow(clippy::too_many_arguments)]
    async fn finish_upload(
        &self,
        uploader: Uploader,
        file: &UploadedFile,
        relative: &str,
        stored: &std::path::Path,
        title: Option<&str>,
        language: LanguageChoice,
        model: WhisperModel,
        plan: Option<&SubscriptionPlan>,
        priority: i32,
    ) -> AppResult<Transcription> {
        let duration = self.ffmpeg.probe_duration(stored).await.unwrap_or(0.0);
        let title = upload_title(title, &file.file_name);
        let is_video = classify(&file.file_name) == MediaKind::Video;

        let mut tx = self.db.begin().await?;

        // Re-checked under the usage row lock so parallel uploads cannot overshoot
        if plan.is_some() {
            usage::can_process_audio(&mut *tx, uploader.user_id, plan, duration)
                .await?
                .map_err(|denial| AppError::QuotaExceeded(denial.to_string()))?;
        }

        let row = sqlx::query_as::<_, TranscriptionRow>(&format!(
            r#"
            INSERT INTO transcriptions (user_id, title, language, model_used)
            VALUES ($1, $2, $3, $4)
            RETURNING {}
            "#,
            TRANSCRIPTION_COLUMNS
        ))
        .bind(uploader.user_id)
        .bind(&title)
        .bind(language.as_stored())
        .bind(model.as_str())
        .fetch_one(&mut *tx)
        .await?;

        sqlx::query(
            r#"
            INSERT INTO media_files (transcription_id, file_path, original_filename, is_video, duration, file_size)
            VALUES ($1, $2, $3, $4, $5, $6)
            "#,
        )
        .bind(row.id)
        .bind(relative)
        .bind(&file.file_name)
        .bind(is_video)
        .bind(duration)
        .bind(file.bytes.len() as i64)
        .execute(&mut *tx)
        .await?;

        enqueue(&mut *tx, row.id, priority).await?;

        tx.commit().await?;

        tracing::info!(
            transcription_id = %row.id,
            user_id = %uploader.user_id,
            model = %model,
            priority,
            "Queued upload {}",
            file.file_name
        );
        Ok(row.into())
    }

    /// One page of the caller's transcriptions, newest first, with the total count
    pub async fn list(
        &self,
        user_id: Uuid,
        pagination: &Pagination,
    ) -> AppResult<(Vec<TranscriptionListItem>, u64)> {
        let (limit, offset) = pagination.limit_offset();

        let total = sqlx::query_scalar::<_, i64>(
            "SELECT COUNT(*) FROM transcriptions WHERE user_id = $1",
        )
        .bind(user_id)
        .fetch_one(&self.db)
        .await?;

        let mut items = sqlx::query_as::<_, TranscriptionListItem>(
            r#"
            SELECT t.id, t.title, t.status, t.language, t.model_used, t.word_count,
                   t.has_speaker_diarization, m.is_video, m.duration, t.created_at
            FROM transcriptions t
            LEFT JOIN media_files m ON m.transcription_id = t.id
            WHERE t.user_id = $1
            ORDER BY t.created_at DESC
            LIMIT $2 OFFSET $3
            "#,
        )
        .bind(user_id)
        .bind(limit)
        .bind(offset)
        .fetch_all(&self.db)
        .await?;

        for item in &mut items {
            item.duration_display = format_duration(item.duration.unwrap_or(0.0));
        }
        Ok((items, u64::try_from(total).unwrap_or(0)))
    }

    pub async fn get(&self, id: Uuid) -> AppResult<Option<Transcription>> {
        Ok(self.fetch_row(id).await?.map(Transcription::from))
    }

    /// A transcription owned by `user_id`; someone else's record is not found
    pub async fn get_owned(&self, user_id: Uuid, id: Uuid) -> AppResult<Transcription> {
        self.fetch_owned_row(user_id, id).await.map(Transcription::from)
    }

    async fn fetch_row(&self, id: Uuid) -> AppResult<Option<TranscriptionRow>> {
        let row = sqlx::query_as::<_, TranscriptionRow>(&format!(
            "SELECT {} FROM transcriptions WHERE id = $1",
            TRANSCRIPTION_COLUMNS
        ))
        .bind(id)
        .fetch_optional(&self.db)
        .await?;
        Ok(row)
    }

    async fn fetch_owned_row(&self, user_id: Uuid, id: Uuid) -> AppResult<TranscriptionRow> {
        sqlx::query_as::<_, TranscriptionRow>(&format!(
            "SELECT {} FROM transcriptions WHERE id = $1 AND user_id = $2",
            TRANSCRIPTION_COLUMNS
        ))
        .bind(id)
        .bind(user_id)
        .fetch_optional(&self.db)
        .await?
        .ok_or_else(not_found)
    }

    pub async fn media_for(&self, transcription_id: Uuid) -> AppResult<Option<MediaFile>> {
        let row = sqlx::query_as::<_, MediaRow>(
            r#"
            SELECT id, transcription_id, file_path, original_filename, is_video, duration, file_size
            FROM media_files
            WHERE transcription_id = $1
            "#,
        )
        .bind(transcription_id)
        .fetch_optional(&self.db)
        .await?;
        Ok(row.map(MediaFile::from))
    }

    /// Detail view; a completed record without text is downgraded to failed
    pub async fn detail(&self, user_id: Uuid, id: Uuid) -> AppResult<TranscriptionDetail> {
        let row = self.fetch_owned_row(user_id, id).await?;
        let speakers = row.speakers.clone().map(|j| j.0);
        let speaker_segments = row.speaker_segments.clone().map(|j| j.0);
        let mut transcription = Transcription::from(row);

        let mut warning = None;
        if transcription.has_missing_text() {
            tracing::warn!(transcription_id = %id, "Completed transcription has no text");
            sqlx::query(
                "UPDATE transcriptions SET status = 'failed', updated_at = NOW() WHERE id = $1 AND status = 'completed'",
            )
            .bind(id)
            .execute(&self.db)
            .await?;
            transcription.status = TranscriptionStatus::Failed;
            warning = Some(EMPTY_TEXT_WARNING.to_string());
        }

        let media = self.media_for(id).await?;
        let duration_display = format_duration(media.as_ref().map(|m| m.duration).unwrap_or(0.0));

        Ok(TranscriptionDetail {
            language_name: language_name(&transcription.language).to_string(),
            transcription,
            media: media.map(MediaResponse::from),
            duration_display,
            speakers,
            speaker_segments,
            warning,
        })
    }

    pub async fn status(&self, user_id: Uuid, id: Uuid) -> AppResult<StatusResponse> {
        let transcription = self.get_owned(user_id, id).await?;
        Ok(StatusResponse {
            status: transcription.status,
            is_ready: transcription.is_ready(),
            text: transcription.text.unwrap_or_default(),
        })
    }

    /// Delete the record (media row and job cascade), then the stored file
    pub async fn delete(&self, user_id: Uuid, id: Uuid) -> AppResult<()> {
        let media = self.media_for(id).await?;

        let result = sqlx::query("DELETE FROM transcriptions WHERE id = $1 AND user_id = $2")
            .bind(id)
            .bind(user_id)
            .execute(&self.db)
            .await?;

        if result.rows_affected() == 0 {
            return Err(not_found());
        }

        if let Some(media) = media {
            self.storage.delete_quietly(&media.file_path).await;
        }
        tracing::info!(transcription_id = %id, "Deleted transcription");
        Ok(())
    }

    /// Put a failed transcription back on the queue
    pub async fn retry(&self, user_id: Uuid, id: Uuid) -> AppResult<Transcription> {
        let transcription = self.get_owned(user_id, id).await?;
        ensure_retryable(transcription.status)?;

        let priority = SubscriptionService::new(self.db.clone())
            .queue_priority(user_id)
            .await?;

        let mut tx = self.db.begin().await?;
        let row = sqlx::query_as::<_, TranscriptionRow>(&format!(
            r#"
            UPDATE transcriptions
            SET status = 'pending', error_message = NULL, updated_at = NOW()
            WHERE id = $1 AND status = 'failed'
            RETURNING {}
            "#,
            TRANSCRIPTION_COLUMNS
        ))
        .bind(id)
        .fetch_optional(&mut *tx)
        .await?
        .ok_or_else(|| {
            AppError::InvalidStateTransition("Transcription status changed".to_string())
        })?;
        enqueue(&mut *tx, id, priority).await?;
        tx.commit().await?;

        tracing::info!(transcription_id = %id, priority, "Re-queued transcription");
        Ok(row.into())
    }

    /// Move to a new status if the lifecycle allows it
    pub async fn transition(
        &self,
        id: Uuid,
        next: TranscriptionStatus,
    ) -> AppResult<TranscriptionStatus> {
        let current = self.get(id).await?.ok_or_else(not_found)?.status;
        if !current.can_transition_to(next) {
            return Err(AppError::InvalidStateTransition(format!(
                "Cannot move transcription from {} to {}",
                current, next
            )));
        }

        let result = sqlx::query(
            "UPDATE transcriptions SET status = $2, updated_at = NOW() WHERE id = $1 AND status = $3",
        )
        .bind(id)
        .bind(next.as_str())
        .bind(current.as_str())
        .execute(&self.db)
        .await?;

        if result.rows_affected() == 0 {
            return Err(AppError::InvalidStateTransition(
                "Transcription status changed".to_string(),
            ));
        }
        Ok(current)
    }

    /// Store engine output, the media duration and the month's usage together.
    ///
    /// Only a processing record can complete; anything else leaves every row untouched.
    pub async fn complete(
        &self,
        id: Uuid,
        result: &CompletedTranscript,
        media_id: Uuid,
        duration: f64,
    ) -> AppResult<()> {
        let mut tx = self.db.begin().await?;

        let user_id = sqlx::query_scalar::<_, Uuid>(
            r#"
            UPDATE transcriptions
            SET status = 'completed', text = $2, language = $3, language_probability = $4,
                processing_time = $5, word_count = $6, segments = $7, model_used = $8,
                error_message = NULL, updated_at = NOW()
            WHERE id = $1 AND status = ANY($9)
            RETURNING user_id
            "#,
        )
        .bind(id)
        .bind(&result.text)
        .bind(&result.language)
        .bind(result.language_probability)
        .bind(result.processing_time)
        .bind(result.word_count)
        .bind(Json(&result.segments))
        .bind(result.model_used.as_str())
        .bind(TranscriptionStatus::sources_of(TranscriptionStatus::Completed))
        .fetch_optional(&mut *tx)
        .await?
        .ok_or_else(|| {
            AppError::InvalidStateTransition("Transcription is no longer processing".to_string())
        })?;

        sqlx::query("UPDATE media_files SET duration = $2 WHERE id = $1")
            .bind(media_id)
            .bind(duration)
            .execute(&mut *tx)
            .await?;

        usage::record_usage(&mut *tx, user_id, duration).await?;

        tx.commit().await?;
        Ok(())
    }

    /// Ids of transcriptions still waiting, oldest first
    pub async fn pending_ids(&self) -> AppResult<Vec<Uuid>> {
        let ids = sqlx::query_scalar::<_, Uuid>(
            "SELECT id FROM transcriptions WHERE status = 'pending' ORDER BY created_at ASC",
        )
        .fetch_all(&self.db)
        .await?;
        Ok(ids)
    }

    /// Persist speakers, turns and speaker-labelled segments
    pub async fn save_diarization(
        &self,
        id: Uuid,
        result: &DiarizationResult,
        merged_segments: &[Segment],
    ) -> AppResult<()> {
        sqlx::query(
            r#"
            UPDATE transcriptions
            SET speakers = $2, speaker_segments = $3, segments = $4,
                has_speaker_diarization = TRUE, updated_at = NOW()
            WHERE id = $1
            "#,
        )
        .bind(id)
        .bind(Json(&result.speakers))
        .bind(Json(&result.segments))
        .bind(Json(merged_segments))
        .execute(&self.db)
        .await?;

        tracing::info!(
            transcription_id = %id,
            speakers = result.speakers.len(),
            "Stored speaker diarization"
        );
        Ok(())
    }

    pub fn storage(&self) -> &MediaStorage {
        &self.storage
    }
}
