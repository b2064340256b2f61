//! Monthly usage accounting service

use chrono::Utc;
use serde::Serialize;
use sqlx::{PgConnection, PgPool};
use uuid::Uuid;

use shared::models::{
    check_can_process, usage_period, Allowance, QuotaDenial, SubscriptionPlan, UsageRecord,
};

use crate::error::AppResult;

/// Usage service
#[derive(Clone)]
pub struct UsageService {
    db: PgPool,
}

#[derive(Debug, sqlx::FromRow)]
struct UsageRow {
    user_id: Uuid,
    year: i32,
    month: i32,
    files_processed: i32,
    total_audio_seconds: i64,
}

impl From<UsageRow> for UsageRecord {
    fn from(row: UsageRow) -> Self {
        UsageRecord {
            user_id: row.user_id,
            year: row.year,
            month: u32::try_from(row.month).unwrap_or(1),
            files_processed: row.files_processed,
            total_audio_seconds: row.total_audio_seconds,
        }
    }
}

/// Usage summary returned by `GET /usage`
#[derive(Debug, Serialize)]
pub struct UsageSummary {
    pub year: i32,
    pub month: u32,
    pub files_processed: i32,
    pub files_in_progress: i32,
    pub total_audio_seconds: i64,
    pub max_files_per_month: Option<i32>,
    pub max_audio_minutes: Option<i32>,
    pub remaining_files: Option<i32>,
    pub has_reached_limit: bool,
}

impl UsageSummary {
    pub fn new(allowance: &Allowance, plan: Option<&SubscriptionPlan>) -> Self {
        let record = &allowance.usage;
        Self {
            year: record.year,
            month: record.month,
            files_processed: record.files_processed,
            files_in_progress: allowance.in_flight,
            total_audio_seconds: record.total_audio_seconds,
            max_files_per_month: plan.map(|p| p.max_files_per_month),
            max_audio_minutes: plan.map(|p| p.max_audio_minutes),
            remaining_files: plan.map(|p| allowance.remaining_files(p)),
            has_reached_limit: allowance.has_reached_limit(plan),
        }
    }
}

/// This month's usage row for the user, locked until the surrounding transaction ends
async fn current_month_row(conn: &mut PgConnection, user_id: Uuid) -> AppResult<UsageRecord> {
    let (year, month) = usage_period(Utc::now());
    let row = sqlx::query_as::<_, UsageRow>(
        r#"
        INSERT INTO usage_records (user_id, year, month)
        VALUES ($1, $2, $3)
        ON CONFLICT (user_id, year, month) DO UPDATE SET user_id = EXCLUDED.user_id
        RETURNING user_id, year, month, files_processed, total_audio_seconds
        "#,
    )
    .bind(user_id)
    .bind(year)
    .bind(month as i32)
    .fetch_one(&mut *conn)
    .await?;

    Ok(row.into())
}

/// Usage plus the user's pending and processing transcriptions.
///
/// Inside a transaction the usage row stays locked, so concurrent uploads
/// for the same user are checked one after another.
pub async fn lock_allowance(conn: &mut PgConnection, user_id: Uuid) -> AppResult<Allowance> {
    let usage = current_month_row(conn, user_id).await?;
    let in_flight: i32 = sqlx::query_scalar(
        r#"
        SELECT COUNT(*)::int4 FROM transcriptions
        WHERE user_id = $1 AND status IN ('pending', 'processing')
        "#,
    )
    .bind(user_id)
    .fetch_one(&mut *conn)
    .await?;

    Ok(Allowance { usage, in_flight })
}

/// Whether a file of this length may be processed, checked against the locked allowance
pub async fn can_process_audio(
    conn: &mut PgConnection,
    user_id: Uuid,
    plan: Option<&SubscriptionPlan>,
    audio_seconds: f64,
) -> AppResult<Result<(), QuotaDenial>> {
    let allowance = lock_allowance(conn, user_id).await?;
    Ok(check_can_process(plan, &allowance, audio_seconds))
}

/// Count one processed file of the given length
pub async fn record_usage(
    conn: &mut PgConnection,
    user_id: Uuid,
    audio_seconds: f64,
) -> AppResult<UsageRecord> {
    let (year, month) = usage_period(Utc::now());
    let seconds = audio_seconds.max(0.0).round() as i64;

    let row = sqlx::query_as::<_, UsageRow>(
        r#"
        INSERT INTO usage_records (user_id, year, month, files_processed, total_audio_seconds)
        VALUES ($1, $2, $3, 1, $4)
        ON CONFLICT (user_id, year, month) DO UPDATE SET
            files_processed = usage_records.files_processed + 1,
            total_audio_seconds = usage_records.total_audio_seconds + EXCLUDED.total_audio_seconds,
            updated_at = NOW()
        RETURNING user_id, year, month, files_processed, total_audio_seconds
        "#,
    )
    .bind(user_id)
    .bind(year)
    .bind(month as i32)
    .bind(seconds)
    .fetch_one(&mut *conn)
    .await?;

    tracing::debug!(%user_id, seconds, "Recorded usage");
    Ok(row.into())
}

impl UsageService {
    /// Create a new UsageService instance
    pub fn new(db: PgPool) -> Self {
        Self { db }
    }

    /// This month's allowance, with the usage row created empty on first access
    pub async fn allowance(&self, user_id: Uuid) -> AppResult<Allowance> {
        let mut conn = self.db.acquire().await?;
        lock_allowance(&mut *conn, user_id).await
    }

    pub async fn summary(
        &self,
        user_id: Uuid,
        plan: Option<&SubscriptionPlan>,
    ) -> AppResult<UsageSummary> {
        let allowance = self.allowance(user_id).await?;
        Ok(UsageSummary::new(&allowance, plan))
    }
}
