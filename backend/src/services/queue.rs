//! Priority job queue for transcriptions, stored in PostgreSQL
//!
//! Jobs are claimed highest priority first, oldest first within a priority,
//! with `FOR UPDATE SKIP LOCKED` so several workers can share the table.

use std::cmp::Ordering;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;
use sqlx::{PgConnection, PgPool};
use uuid::Uuid;

use shared::models::{TranscriptionStatus, MAX_QUEUE_PRIORITY};

use crate::config::WorkerConfig;
use crate::error::AppResult;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum JobState {
    Queued,
    Claimed,
    Done,
    Dead,
}

impl JobState {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobState::Queued => "queued",
            JobState::Claimed => "claimed",
            JobState::Done => "done",
            JobState::Dead => "dead",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "queued" => Some(JobState::Queued),
            "claimed" => Some(JobState::Claimed),
            "done" => Some(JobState::Done),
            "dead" => Some(JobState::Dead),
            _ => None,
        }
    }
}

/// A queued unit of transcription work
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct TranscriptionJob {
    pub id: Uuid,
    pub transcription_id: Uuid,
    pub priority: i32,
    pub state: String,
    pub attempts: i32,
    pub not_before: DateTime<Utc>,
    pub claimed_at: Option<DateTime<Utc>>,
    pub worker_id: Option<String>,
    pub last_error: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Claim order: higher priority first, then oldest first
pub fn claim_order(a: &TranscriptionJob, b: &TranscriptionJob) -> Ordering {
    b.priority
        .cmp(&a.priority)
        .then(a.created_at.cmp(&b.created_at))
}

/// Claims made before this instant belong to a lost worker
pub fn stale_cutoff(now: DateTime<Utc>, visibility_timeout: Duration) -> DateTime<Utc> {
    chrono::Duration::from_std(visibility_timeout)
        .ok()
        .and_then(|timeout| now.checked_sub_signed(timeout))
        .unwrap_or(DateTime::<Utc>::MIN_UTC)
}

const JOB_COLUMNS: &str = r#"
    id, transcription_id, priority, state, attempts, not_before, claimed_at,
    worker_id, last_error, created_at, updated_at
"#;

/// Exponential backoff with a ceiling
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_retries: i32,
    pub backoff: Duration,
    pub max_backoff: Duration,
}

impl RetryPolicy {
    pub fn from_config(config: &WorkerConfig) -> Self {
        Self {
            max_retries: config.max_retries,
            backoff: Duration::from_secs(config.retry_backoff_secs),
            max_backoff: Duration::from_secs(config.retry_backoff_max_secs),
        }
    }

    /// Delay before the given attempt (1-based) runs again, `None` once retries are spent
    pub fn delay_for(&self, attempts: i32) -> Option<Duration> {
        if attempts < 1 || attempts > self.max_retries {
            return None;
        }
        let exponent = u32::try_from(attempts - 1).unwrap_or(u32::MAX).min(31);
        let delay = self.backoff.saturating_mul(1_u32 << exponent);
        Some(delay.min(self.max_backoff))
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            backoff: Duration::from_secs(60),
            max_backoff: Duration::from_secs(300),
        }
    }
}

/// What happened to a failed job
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RetryOutcome {
    Requeued { attempt: i32, delay: Duration },
    Dead { attempts: i32 },
}

impl RetryOutcome {
    /// Decide the fate of a job that has just failed after `previous_attempts` earlier failures
    pub fn decide(policy: &RetryPolicy, previous_attempts: i32) -> Self {
        let attempts = previous_attempts.saturating_add(1);
        match policy.delay_for(attempts) {
            Some(delay) => RetryOutcome::Requeued {
                attempt: attempts,
                delay,
            },
            None => RetryOutcome::Dead { attempts },
        }
    }

    pub fn attempts(&self) -> i32 {
        match self {
            RetryOutcome::Requeued { attempt, .. } => *attempt,
            RetryOutcome::Dead { attempts } => *attempts,
        }
    }

    pub fn delay(&self) -> Duration {
        match self {
            RetryOutcome::Requeued { delay, .. } => *delay,
            RetryOutcome::Dead { .. } => Duration::ZERO,
        }
    }

    pub fn job_state(&self) -> JobState {
        match self {
            RetryOutcome::Requeued { .. } => JobState::Queued,
            RetryOutcome::Dead { .. } => JobState::Dead,
        }
    }

    /// Waiting for another attempt shows as pending; a dead job leaves the record failed
    pub fn transcription_status(&self) -> TranscriptionStatus {
        match self {
            RetryOutcome::Requeued { .. } => TranscriptionStatus::Pending,
            RetryOutcome::Dead { .. } => TranscriptionStatus::Failed,
        }
    }
}

/// Record the failure on the transcription if its lifecycle allows the move
async fn settle_transcription(
    conn: &mut PgConnection,
    transcription_id: Uuid,
    status: TranscriptionStatus,
    error: &str,
) -> AppResult<()> {
    sqlx::query(
        r#"
        UPDATE transcriptions
        SET status = $2, error_message = $3, updated_at = NOW()
        WHERE id = $1 AND status = ANY($4)
        "#,
    )
    .bind(transcription_id)
    .bind(status.as_str())
    .bind(error)
    .bind(TranscriptionStatus::sources_of(status))
    .execute(&mut *conn)
    .await?;
    Ok(())
}

/// Queue service
#[derive(Clone)]
pub struct QueueService {
    db: PgPool,
}

/// Put a transcription on the queue, resetting any previous job for it
pub async fn enqueue(
    conn: &mut PgConnection,
    transcription_id: Uuid,
    priority: i32,
) -> AppResult<Uuid> {
    let priority = priority.clamp(0, MAX_QUEUE_PRIORITY);
    let id = sqlx::query_scalar::<_, Uuid>(
        r#"
        INSERT INTO transcription_jobs (transcription_id, priority)
        VALUES ($1, $2)
        ON CONFLICT (transcription_id) DO UPDATE SET
            priority = EXCLUDED.priority,
            state = 'queued',
            attempts = 0,
            not_before = NOW(),
            claimed_at = NULL,
            worker_id = NULL,
            last_error = NULL,
            created_at = NOW(),
            updated_at = NOW()
        RETURNING id
        "#,
    )
    .bind(transcription_id)
    .bind(priority)
    .fetch_one(&mut *conn)
    .await?;

    tracing::debug!(%transcription_id, job_id = %id, priority, "Enqueued transcription");
    Ok(id)
}

impl QueueService {
    /// Create a new QueueService instance
    pub fn new(db: PgPool) -> Self {
        Self { db }
    }

    /// Atomically claim up to `limit` due jobs for this worker
    pub async fn claim(&self, limit: usize, worker_id: &str) -> AppResult<Vec<TranscriptionJob>> {
        if limit == 0 {
            return Ok(Vec::new());
        }

        let jobs = sqlx::query_as::<_, TranscriptionJob>(&format!(
            r#"
            UPDATE transcription_jobs
            SET state = 'claimed', worker_id = $1, claimed_at = NOW(), updated_at = NOW()
            WHERE id IN (
                SELECT id
                FROM transcription_jobs
                WHERE state = 'queued' AND not_before <= NOW()
                ORDER BY priority DESC, created_at ASC
                LIMIT $2
                FOR UPDATE SKIP LOCKED
            )
            RETURNING {}
            "#,
            JOB_COLUMNS
        ))
        .bind(worker_id)
        .bind(limit as i64)
        .fetch_all(&self.db)
        .await?;

        // UPDATE ... RETURNING does not keep the subquery order
        let mut jobs = jobs;
        jobs.sort_by(claim_order);
        Ok(jobs)
    }

    /// Claim the queued job of one transcription right away, ignoring its backoff.
    /// `None` when there is no queued job or another worker holds it.
    pub async fn claim_transcription(
        &self,
        transcription_id: Uuid,
        worker_id: &str,
    ) -> AppResult<Option<TranscriptionJob>> {
        let job = sqlx::query_as::<_, TranscriptionJob>(&format!(
            r#"
            UPDATE transcription_jobs
            SET state = 'claimed', worker_id = $2, claimed_at = NOW(), updated_at = NOW()
            WHERE id = (
                SELECT id
                FROM transcription_jobs
                WHERE transcription_id = $1 AND state = 'queued'
                FOR UPDATE SKIP LOCKED
            )
            RETURNING {}
            "#,
            JOB_COLUMNS
        ))
        .bind(transcription_id)
        .bind(worker_id)
        .fetch_optional(&self.db)
        .await?;
        Ok(job)
    }

    /// Hand claimed jobs of lost workers back to the queue
    pub async fn requeue_stale(&self, visibility_timeout: Duration) -> AppResult<u64> {
        let result = sqlx::query(
            r#"
            UPDATE transcription_jobs
            SET state = 'queued', worker_id = NULL, claimed_at = NULL, updated_at = NOW()
            WHERE state = 'claimed' AND claimed_at < $1
            "#,
        )
        .bind(stale_cutoff(Utc::now(), visibility_timeout))
        .execute(&self.db)
        .await?;

        if result.rows_affected() > 0 {
            tracing::warn!(count = result.rows_affected(), "Requeued stale jobs");
        }
        Ok(result.rows_affected())
    }

    pub async fn complete(&self, job_id: Uuid) -> AppResult<()> {
        sqlx::query(
            "UPDATE transcription_jobs SET state = 'done', last_error = NULL, updated_at = NOW() WHERE id = $1",
        )
        .bind(job_id)
        .execute(&self.db)
        .await?;
        Ok(())
    }

    /// Record a failed attempt and either schedule another or give up.
    /// The transcription moves with the job: pending while it waits, failed once dead.
    pub async fn retry(
        &self,
        job: &TranscriptionJob,
        error: &str,
        policy: &RetryPolicy,
    ) -> AppResult<RetryOutcome> {
        let outcome = RetryOutcome::decide(policy, job.attempts);
        let mut tx = self.db.begin().await?;

        sqlx::query(
            r#"
            UPDATE transcription_jobs
            SET state = $2, attempts = $3, last_error = $4,
                not_before = NOW() + make_interval(secs => $5),
                worker_id = NULL, claimed_at = NULL, updated_at = NOW()
            WHERE id = $1
            "#,
        )
        .bind(job.id)
        .bind(outcome.job_state().as_str())
        .bind(outcome.attempts())
        .bind(error)
        .bind(outcome.delay().as_secs_f64())
        .execute(&mut *tx)
        .await?;

        settle_transcription(
            &mut *tx,
            job.transcription_id,
            outcome.transcription_status(),
            error,
        )
        .await?;

        tx.commit().await?;
        Ok(outcome)
    }

    /// Give up on a job without retrying; its transcription is marked failed
    pub async fn discard(&self, job: &TranscriptionJob, reason: &str) -> AppResult<()> {
        let mut tx = self.db.begin().await?;

        sqlx::query(
            "UPDATE transcription_jobs SET state = 'dead', last_error = $2, updated_at = NOW() WHERE id = $1",
        )
        .bind(job.id)
        .bind(reason)
        .execute(&mut *tx)
        .await?;

        settle_transcription(
            &mut *tx,
            job.transcription_id,
            TranscriptionStatus::Failed,
            reason,
        )
        .await?;

        tx.commit().await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_backoff_schedule() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.delay_for(1), Some(Duration::from_secs(60)));
        assert_eq!(policy.delay_for(2), Some(Duration::from_secs(120)));
        assert_eq!(policy.delay_for(3), Some(Duration::from_secs(240)));
        assert_eq!(policy.delay_for(4), None);
        assert_eq!(policy.delay_for(0), None);
    }

    #[test]
    fn test_backoff_is_capped() {
        let policy = RetryPolicy {
            max_retries: 10,
            ..RetryPolicy::default()
        };
        assert_eq!(policy.delay_for(4), Some(Duration::from_secs(300)));
        assert_eq!(policy.delay_for(10), Some(Duration::from_secs(300)));
    }

    #[test]
    fn test_job_state_strings() {
        for state in [JobState::Queued, JobState::Claimed, JobState::Done, JobState::Dead] {
            assert_eq!(JobState::parse(state.as_str()), Some(state));
        }
    }
}
