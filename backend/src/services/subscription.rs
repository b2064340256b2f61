//! User subscription service

use chrono::{DateTime, Utc};
use serde::Serialize;
use sqlx::{PgConnection, PgPool};
use uuid::Uuid;

use shared::models::{
    queue_priority, FreeGrant, SubscriptionPlan, SubscriptionStatus, UserSubscription,
};

use crate::error::{AppError, AppResult};
use crate::services::plan::{ensure_free_plan, PlanResponse, PlanRow, PLAN_COLUMNS};

/// Subscription service
#[derive(Clone)]
pub struct SubscriptionService {
    db: PgPool,
}

#[derive(Debug, Clone, sqlx::FromRow)]
pub struct SubscriptionRow {
    pub id: Uuid,
    pub user_id: Uuid,
    pub plan_id: Option<Uuid>,
    pub status: String,
    pub stripe_customer_id: String,
    pub stripe_subscription_id: String,
    pub current_period_start: Option<DateTime<Utc>>,
    pub current_period_end: Option<DateTime<Utc>>,
    pub cancel_at_period_end: bool,
    pub trial_end: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl From<SubscriptionRow> for UserSubscription {
    fn from(row: SubscriptionRow) -> Self {
        UserSubscription {
            id: row.id,
            user_id: row.user_id,
            plan_id: row.plan_id,
            status: SubscriptionStatus::parse(&row.status).unwrap_or_default(),
            stripe_customer_id: row.stripe_customer_id,
            stripe_subscription_id: row.stripe_subscription_id,
            current_period_start: row.current_period_start,
            current_period_end: row.current_period_end,
            cancel_at_period_end: row.cancel_at_period_end,
            trial_end: row.trial_end,
            created_at: row.created_at,
            updated_at: row.updated_at,
        }
    }
}

/// A subscription together with its plan
#[derive(Debug, Clone)]
pub struct SubscriptionWithPlan {
    pub subscription: UserSubscription,
    pub plan: Option<SubscriptionPlan>,
}

impl SubscriptionWithPlan {
    /// The plan, but only while the subscription grants access
    pub fn effective_plan(&self, now: DateTime<Utc>) -> Option<&SubscriptionPlan> {
        if self.subscription.is_active(now) {
            self.plan.as_ref()
        } else {
            None
        }
    }

    pub fn queue_priority(&self, now: DateTime<Utc>) -> i32 {
        queue_priority(
            self.plan.as_ref().map(|p| p.priority),
            self.subscription.is_active(now),
        )
    }
}

/// Subscription summary returned by `GET /subscription`
#[derive(Debug, Serialize)]
pub struct SubscriptionSummary {
    pub plan: Option<PlanResponse>,
    pub status: SubscriptionStatus,
    pub is_active: bool,
    pub is_trialing: bool,
    pub remaining_trial_days: i64,
    pub current_period_end: Option<DateTime<Utc>>,
    pub cancel_at_period_end: bool,
}

impl SubscriptionSummary {
    pub fn new(record: SubscriptionWithPlan, now: DateTime<Utc>) -> Self {
        let sub = &record.subscription;
        Self {
            status: sub.status,
            is_active: sub.is_active(now),
            is_trialing: sub.is_trialing(now),
            remaining_trial_days: sub.remaining_trial_days(now),
            current_period_end: sub.current_period_end,
            cancel_at_period_end: sub.cancel_at_period_end,
            plan: record.plan.map(PlanResponse::from),
        }
    }
}

const SUBSCRIPTION_COLUMNS: &str = r#"
    id, user_id, plan_id, status, stripe_customer_id, stripe_subscription_id,
    current_period_start, current_period_end, cancel_at_period_end, trial_end,
    created_at, updated_at
"#;

impl SubscriptionService {
    /// Create a new SubscriptionService instance
    pub fn new(db: PgPool) -> Self {
        Self { db }
    }

    /// The user's subscription and plan, if any
    pub async fn get_for_user(&self, user_id: Uuid) -> AppResult<Option<SubscriptionWithPlan>> {
        let Some(row) = sqlx::query_as::<_, SubscriptionRow>(&format!(
            "SELECT {} FROM user_subscriptions WHERE user_id = $1",
            SUBSCRIPTION_COLUMNS
        ))
        .bind(user_id)
        .fetch_optional(&self.db)
        .await?
        else {
            return Ok(None);
        };

        let plan = match row.plan_id {
            Some(plan_id) => sqlx::query_as::<_, PlanRow>(&format!(
                "SELECT {} FROM subscription_plans WHERE id = $1",
                PLAN_COLUMNS
            ))
            .bind(plan_id)
            .fetch_optional(&self.db)
            .await?
            .map(SubscriptionPlan::from),
            None => None,
        };

        Ok(Some(SubscriptionWithPlan {
            subscription: row.into(),
            plan,
        }))
    }

    /// Plan the user may use right now
    pub async fn effective_plan(&self, user_id: Uuid) -> AppResult<Option<SubscriptionPlan>> {
        let now = Utc::now();
        Ok(self
            .get_for_user(user_id)
            .await?
            .and_then(|record| record.effective_plan(now).cloned()))
    }

    pub async fn queue_priority(&self, user_id: Uuid) -> AppResult<i32> {
        let now = Utc::now();
        Ok(self
            .get_for_user(user_id)
            .await?
            .map(|record| record.queue_priority(now))
            .unwrap_or(0))
    }

    pub async fn summary(&self, user_id: Uuid) -> AppResult<SubscriptionSummary> {
        let record = self
            .get_for_user(user_id)
            .await?
            .ok_or_else(|| AppError::NotFound("Subscription".to_string()))?;
        Ok(SubscriptionSummary::new(record, Utc::now()))
    }

    /// Give every user without a subscription the free plan
    pub async fn assign_free_to_all(&self) -> AppResult<u64> {
        let mut tx = self.db.begin().await?;
        let user_ids = sqlx::query_scalar::<_, Uuid>(
            r#"
            SELECT u.id FROM users u
            LEFT JOIN user_subscriptions s ON s.user_id = u.id
            WHERE s.id IS NULL
            ORDER BY u.created_at
            "#,
        )
        .fetch_all(&mut *tx)
        .await?;

        let now = Utc::now();
        for user_id in &user_ids {
            create_free_subscription(&mut *tx, *user_id, now).await?;
        }
        tx.commit().await?;

        tracing::info!(count = user_ids.len(), "Assigned free subscriptions");
        Ok(user_ids.len() as u64)
    }
}

/// Create the free subscription a new user starts with
pub async fn create_free_subscription(
    conn: &mut PgConnection,
    user_id: Uuid,
    now: DateTime<Utc>,
) -> AppResult<Uuid> {
    let plan_id = ensure_free_plan(&mut *conn).await?;
    let grant = FreeGrant::starting_at(now);

    let id = sqlx::query_scalar::<_, Uuid>(
        r#"
        INSERT INTO user_subscriptions
            (user_id, plan_id, status, current_period_start, current_period_end, trial_end)
        VALUES ($1, $2, $3, $4, $5, $6)
        RETURNING id
        "#,
    )
    .bind(user_id)
    .bind(plan_id)
    .bind(SubscriptionStatus::Active.as_str())
    .bind(grant.period_start)
    .bind(grant.period_end)
    .bind(grant.trial_end)
    .fetch_one(&mut *conn)
    .await?;

    Ok(id)
}
