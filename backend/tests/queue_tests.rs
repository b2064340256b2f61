//! Job queue and backup retention tests
//!
//! Property-based and unit tests for:
//! - Retry Backoff Schedule
//! - Claim order and stale claim detection
//! - Retry exhaustion and the transcription status it leaves
//! - Backup Retention

use std::time::{Duration, SystemTime};

use chrono::{DateTime, TimeZone, Utc};
use proptest::prelude::*;
use uuid::Uuid;

use shared::models::TranscriptionStatus;
use speech2text_backend::ops::backup::{select_for_deletion, BackupEntry};
use speech2text_backend::services::queue::{
    claim_order, stale_cutoff, JobState, RetryOutcome, RetryPolicy, TranscriptionJob,
};

fn job(priority: i32, created_secs: i64) -> TranscriptionJob {
    let created_at = Utc.timestamp_opt(1_700_000_000 + created_secs, 0).unwrap();
    TranscriptionJob {
        id: Uuid::new_v4(),
        transcription_id: Uuid::new_v4(),
        priority,
        state: JobState::Queued.as_str().to_string(),
        attempts: 0,
        not_before: created_at,
        claimed_at: None,
        worker_id: None,
        last_error: None,
        created_at,
        updated_at: created_at,
    }
}

// ============================================================================
// Property Test Strategies
// ============================================================================

fn policy_strategy() -> impl Strategy<Value = RetryPolicy> {
    (0i32..6, 1u64..120, 1u64..1000).prop_map(|(max_retries, backoff, cap)| RetryPolicy {
        max_retries,
        backoff: Duration::from_secs(backoff),
        max_backoff: Duration::from_secs(backoff.max(cap)),
    })
}

fn jobs_strategy() -> impl Strategy<Value = Vec<TranscriptionJob>> {
    prop::collection::vec((0i32..=10, 0i64..10_000), 0..40)
        .prop_map(|specs| specs.into_iter().map(|(p, t)| job(p, t)).collect())
}

fn backups_strategy() -> impl Strategy<Value = Vec<BackupEntry>> {
    prop::collection::hash_set(0u64..100_000, 0..30).prop_map(|stamps| {
        stamps
            .into_iter()
            .map(|secs| BackupEntry {
                name: format!("backup_{:08}.sql", secs),
                modified: SystemTime::UNIX_EPOCH + Duration::from_secs(secs),
            })
            .collect()
    })
}

// ============================================================================
// Property Tests
// ============================================================================

proptest! {
    #![proptest_config(ProptestConfig::with_cases(200))]

    /// Delays never shrink and never exceed the cap
    #[test]
    fn backoff_is_monotonic_and_capped(policy in policy_strategy()) {
        let delays: Vec<Duration> = (1..=policy.max_retries)
            .map(|attempt| policy.delay_for(attempt).unwrap())
            .collect();

        prop_assert!(delays.windows(2).all(|w| w[0] <= w[1]));
        prop_assert!(delays.iter().all(|d| *d <= policy.max_backoff));
        prop_assert!(policy.delay_for(policy.max_retries + 1).is_none());
        prop_assert!(policy.delay_for(0).is_none());
    }

    /// Claimed jobs come out highest priority first, oldest first within a priority
    #[test]
    fn claim_order_is_priority_then_age(mut jobs in jobs_strategy()) {
        jobs.sort_by(claim_order);

        for pair in jobs.windows(2) {
            let (a, b) = (&pair[0], &pair[1]);
            prop_assert!(a.priority >= b.priority);
            if a.priority == b.priority {
                prop_assert!(a.created_at <= b.created_at);
            }
        }
    }

    /// A failed job is requeued while retries remain and dies on the attempt after the last
    #[test]
    fn retries_run_out_after_max_retries(policy in policy_strategy()) {
        let mut previous = 0;
        let mut statuses = Vec::new();
        loop {
            let outcome = RetryOutcome::decide(&policy, previous);
            statuses.push(outcome.transcription_status());
            match outcome {
                RetryOutcome::Requeued { attempt, delay } => {
                    prop_assert_eq!(outcome.job_state(), JobState::Queued);
                    prop_assert_eq!(Some(delay), policy.delay_for(attempt));
                    previous = attempt;
                }
                RetryOutcome::Dead { attempts } => {
                    prop_assert_eq!(attempts, policy.max_retries.max(0) + 1);
                    prop_assert_eq!(outcome.job_state(), JobState::Dead);
                    prop_assert_eq!(outcome.delay(), Duration::ZERO);
                    break;
                }
            }
        }

        prop_assert_eq!(statuses.len() as i32, policy.max_retries.max(0) + 1);
        prop_assert_eq!(statuses.last(), Some(&TranscriptionStatus::Failed));
        prop_assert!(statuses[..statuses.len() - 1]
            .iter()
            .all(|s| *s == TranscriptionStatus::Pending));
    }

    /// Retention keeps exactly the newest `keep` backups
    #[test]
    fn retention_keeps_newest(
        entries in backups_strategy(),
        keep in 0usize..15,
    ) {
        let doomed = select_for_deletion(entries.clone(), keep);
        prop_assert_eq!(doomed.len(), entries.len().saturating_sub(keep));

        let oldest_kept = entries
            .iter()
            .filter(|e| !doomed.contains(&e.name))
            .map(|e| e.modified)
            .min();
        if let Some(oldest_kept) = oldest_kept {
            for name in &doomed {
                let entry = entries.iter().find(|e| &e.name == name).unwrap();
                prop_assert!(entry.modified < oldest_kept);
            }
        }
    }
}

// ============================================================================
// Unit Tests
// ============================================================================

#[test]
fn test_retention_ignores_foreign_files() {
    let now = SystemTime::now();
    let entries = vec![
        BackupEntry { name: "notes.sql".into(), modified: now },
        BackupEntry { name: "backup_20240101_000000.sql.gz".into(), modified: now },
        BackupEntry { name: "backup_20240101_000000.sql".into(), modified: now },
    ];
    assert_eq!(
        select_for_deletion(entries, 0),
        vec!["backup_20240101_000000.sql".to_string()]
    );
}

#[test]
fn test_zero_retries_never_requeue() {
    let policy = RetryPolicy {
        max_retries: 0,
        ..RetryPolicy::default()
    };
    assert_eq!(policy.delay_for(1), None);
}

#[test]
fn test_default_policy_gives_up_on_fourth_failure() {
    let policy = RetryPolicy::default();
    assert_eq!(
        RetryOutcome::decide(&policy, 2),
        RetryOutcome::Requeued {
            attempt: 3,
            delay: Duration::from_secs(240)
        }
    );

    let dead = RetryOutcome::decide(&policy, 3);
    assert_eq!(dead, RetryOutcome::Dead { attempts: 4 });
    assert_eq!(dead.transcription_status(), TranscriptionStatus::Failed);
}

#[test]
fn test_stale_cutoff_tracks_visibility_timeout() {
    let now = Utc.timestamp_opt(1_700_000_000, 0).unwrap();
    let timeout = Duration::from_secs(43_200);
    let cutoff = stale_cutoff(now, timeout);
    assert_eq!(cutoff, now - chrono::Duration::hours(12));

    let lost = now - chrono::Duration::hours(13);
    let alive = now - chrono::Duration::hours(1);
    assert!(lost < cutoff);
    assert!(alive >= cutoff);

    assert_eq!(stale_cutoff(now, Duration::MAX), DateTime::<Utc>::MIN_UTC);
}

#[test]
fn test_only_processing_records_complete() {
    for status in TranscriptionStatus::ALL {
        assert_eq!(
            status.can_transition_to(TranscriptionStatus::Completed),
            status == TranscriptionStatus::Processing
        );
    }
    assert_eq!(
        TranscriptionStatus::sources_of(TranscriptionStatus::Completed),
        vec!["processing"]
    );
}
