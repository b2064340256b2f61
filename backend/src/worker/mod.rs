//! Background transcription worker
//!
//! Claims jobs from the queue while it has free concurrency permits, runs each
//! one through the pipeline on a `JoinSet`, and settles the job afterwards:
//! done, retried with backoff, or dead.

pub mod pipeline;

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::config::WorkerConfig;
use crate::error::AppResult;
use crate::services::queue::{QueueService, RetryOutcome, RetryPolicy, TranscriptionJob};

pub use pipeline::{Pipeline, PipelineError, ProcessOutcome};

/// How a finished run leaves its job
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Settlement {
    /// Done; the record is completed
    Complete,
    /// Dead without retrying; the record is marked failed if it can be
    Discard(String),
    /// Requeued with backoff, or dead once retries are spent
    Retry(String),
}

impl Settlement {
    pub fn for_result(result: &Result<ProcessOutcome, PipelineError>) -> Self {
        match result {
            Ok(ProcessOutcome::Completed { .. } | ProcessOutcome::AlreadyCompleted) => {
                Settlement::Complete
            }
            Ok(ProcessOutcome::Skipped(reason)) => Settlement::Discard(reason.clone()),
            Err(err) if err.is_retryable() => Settlement::Retry(err.to_string()),
            Err(err) => Settlement::Discard(err.to_string()),
        }
    }
}

/// Per-item result of `process_pending`
#[derive(Debug)]
pub struct PendingReport {
    pub transcription_id: Uuid,
    pub result: Result<ProcessOutcome, String>,
}

pub struct Worker {
    id: String,
    config: WorkerConfig,
    queue: QueueService,
    pipeline: Pipeline,
    policy: RetryPolicy,
}

impl Worker {
    pub fn new(config: WorkerConfig, queue: QueueService, pipeline: Pipeline) -> Self {
        Self {
            id: format!("worker-{}", Uuid::new_v4().simple()),
            policy: RetryPolicy::from_config(&config),
            config,
            queue,
            pipeline,
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    fn time_limit(&self) -> Duration {
        Duration::from_secs(self.config.time_limit_secs)
    }

    /// Run until `shutdown` is cancelled, then wait for in-flight jobs
    pub async fn run(self: Arc<Self>, shutdown: CancellationToken) -> AppResult<()> {
        let concurrency = self.config.concurrency.max(1);
        let semaphore = Arc::new(Semaphore::new(concurrency));
        let poll_interval = Duration::from_millis(self.config.poll_interval_ms);
        let visibility_timeout = Duration::from_secs(self.config.visibility_timeout_secs);
        let mut join_set: JoinSet<()> = JoinSet::new();

        tracing::info!(worker_id = %self.id, concurrency, "Transcription worker started");

        while !shutdown.is_cancelled() {
            while let Some(result) = join_set.try_join_next() {
                if let Err(join_error) = result {
                    tracing::error!(error = %join_error, "Transcription task panicked");
                }
            }

            if let Err(e) = self.queue.requeue_stale(visibility_timeout).await {
                tracing::error!(error = %e, "Failed to requeue stale jobs");
            }

            let free = semaphore.available_permits();
            let claimed = if free == 0 {
                Vec::new()
            } else {
                match self.queue.claim(free, &self.id).await {
                    Ok(jobs) => jobs,
                    Err(e) => {
                        tracing::error!(error = %e, "Failed to claim jobs");
                        Vec::new()
                    }
                }
            };

            if claimed.is_empty() {
                tokio::select! {
                    _ = shutdown.cancelled() => break,
                    _ = tokio::time::sleep(poll_interval) => {}
                }
                continue;
            }

            tracing::debug!(claimed = claimed.len(), "Claimed transcription jobs");

            for job in claimed {
                // Never more jobs than free permits were claimed, so this does not wait
                let Ok(permit) = semaphore.clone().acquire_owned().await else {
                    break;
                };

                let worker = Arc::clone(&self);
                join_set.spawn(async move {
                    let _permit = permit;
                    let _ = worker.handle_job(job).await;
                });
            }
        }

        tracing::info!(
            worker_id = %self.id,
            in_flight = join_set.len(),
            "Shutting down, waiting for in-flight jobs"
        );
        while join_set.join_next().await.is_some() {}
        Ok(())
    }

    /// Run a claimed job through the pipeline, settle its queue entry and report what happened
    pub async fn handle_job(&self, job: TranscriptionJob) -> Result<ProcessOutcome, String> {
        let transcription_id = job.transcription_id;
        tracing::info!(
            job_id = %job.id,
            %transcription_id,
            attempt = job.attempts + 1,
            priority = job.priority,
            "Starting job"
        );

        let result = self.run_with_limit(transcription_id).await;

        let settled = match Settlement::for_result(&result) {
            Settlement::Complete => self.queue.complete(job.id).await,
            Settlement::Discard(reason) => {
                if result.is_err() {
                    tracing::error!(job_id = %job.id, %transcription_id, "Transcription failed: {}", reason);
                } else {
                    tracing::warn!(job_id = %job.id, %transcription_id, "Discarding job: {}", reason);
                }
                self.queue.discard(&job, &reason).await
            }
            Settlement::Retry(message) => self.retry_failed(&job, &message).await,
        };

        if let Err(e) = settled {
            tracing::error!(job_id = %job.id, error = %e, "Failed to settle job");
        }
        result.map_err(|e| e.to_string())
    }

    async fn run_with_limit(&self, transcription_id: Uuid) -> Result<ProcessOutcome, PipelineError> {
        let limit = self.time_limit();
        match tokio::time::timeout(limit, self.pipeline.process(transcription_id)).await {
            Ok(result) => result,
            Err(_) => Err(PipelineError::Retryable(format!(
                "Transcription exceeded the time limit of {} seconds",
                limit.as_secs()
            ))),
        }
    }

    async fn retry_failed(&self, job: &TranscriptionJob, message: &str) -> AppResult<()> {
        let transcription_id = job.transcription_id;
        match self.queue.retry(job, message, &self.policy).await? {
            RetryOutcome::Requeued { attempt, delay } => {
                tracing::warn!(
                    job_id = %job.id,
                    %transcription_id,
                    attempt,
                    delay_secs = delay.as_secs(),
                    "Transcription failed, retrying: {}",
                    message
                );
            }
            RetryOutcome::Dead { attempts } => {
                tracing::error!(
                    job_id = %job.id,
                    %transcription_id,
                    attempts,
                    "Transcription failed permanently: {}",
                    message
                );
            }
        }
        Ok(())
    }

    /// Process every pending transcription in order, now rather than when its backoff ends.
    /// Each job is claimed first, so a running worker never processes the same record.
    pub async fn process_pending(&self) -> AppResult<Vec<PendingReport>> {
        let ids = self.pipeline.transcriptions().pending_ids().await?;
        let mut reports = Vec::with_capacity(ids.len());

        for transcription_id in ids {
            let result = match self.queue.claim_transcription(transcription_id, &self.id).await? {
                Some(job) => self.handle_job(job).await,
                None => Ok(ProcessOutcome::Skipped(
                    "No queued job; another worker may be processing it".to_string(),
                )),
            };
            reports.push(PendingReport {
                transcription_id,
                result,
            });
        }
        Ok(reports)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::AppError;
    use crate::external::EngineError;
    use shared::models::WhisperModel;

    #[test]
    fn test_finished_runs_complete_their_job() {
        let completed = Ok(ProcessOutcome::Completed {
            model_used: WhisperModel::Base,
            word_count: 3,
            duration: 1.5,
        });
        assert_eq!(Settlement::for_result(&completed), Settlement::Complete);
        assert_eq!(
            Settlement::for_result(&Ok(ProcessOutcome::AlreadyCompleted)),
            Settlement::Complete
        );
    }

    #[test]
    fn test_skipped_and_permanent_runs_are_discarded() {
        let skipped = Ok(ProcessOutcome::Skipped("gone".into()));
        assert_eq!(
            Settlement::for_result(&skipped),
            Settlement::Discard("gone".into())
        );

        let permanent = Err(PipelineError::Permanent("No media file found".into()));
        assert_eq!(
            Settlement::for_result(&permanent),
            Settlement::Discard("No media file found".into())
        );
    }

    #[test]
    fn test_engine_and_database_failures_are_retried() {
        let engine: Result<ProcessOutcome, PipelineError> =
            Err(EngineError::InvalidAudio("garbage".into()).into());
        assert!(matches!(Settlement::for_result(&engine), Settlement::Retry(_)));

        let database: Result<ProcessOutcome, PipelineError> =
            Err(AppError::Internal("pool timed out".into()).into());
        assert!(matches!(Settlement::for_result(&database), Settlement::Retry(_)));
    }
}
