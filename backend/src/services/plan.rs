//! Subscription plan catalog service

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::Serialize;
use sqlx::{PgConnection, PgPool};
use uuid::Uuid;

use shared::models::{
    default_plan_catalog, free_plan_template, PlanTemplate, SubscriptionPlan, WhisperModel,
};

use crate::error::{AppError, AppResult};

/// Plan catalog service
#[derive(Clone)]
pub struct PlanService {
    db: PgPool,
}

/// Row shape of `subscription_plans`
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct PlanRow {
    pub id: Uuid,
    pub name: String,
    pub slug: String,
    pub description: String,
    pub price_monthly: Decimal,
    pub price_yearly: Option<Decimal>,
    pub priority: i32,
    pub max_audio_minutes: i32,
    pub max_files_per_month: i32,
    pub supported_models: Vec<String>,
    pub max_model_size: String,
    pub supports_api: bool,
    pub has_ads: bool,
    pub can_download: bool,
    pub speaker_diarization_enabled: bool,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

pub const PLAN_COLUMNS: &str = r#"
    id, name, slug, description, price_monthly, price_yearly, priority,
    max_audio_minutes, max_files_per_month, supported_models, max_model_size,
    supports_api, has_ads, can_download, speaker_diarization_enabled, is_active,
    created_at, updated_at
"#;

impl From<PlanRow> for SubscriptionPlan {
    fn from(row: PlanRow) -> Self {
        let max_model_size = WhisperModel::parse(&row.max_model_size).unwrap_or_default();
        SubscriptionPlan {
            id: row.id,
            name: row.name,
            slug: row.slug,
            description: row.description,
            price_monthly: row.price_monthly,
            price_yearly: row.price_yearly,
            priority: row.priority,
            max_audio_minutes: row.max_audio_minutes,
            max_files_per_month: row.max_files_per_month,
            supported_models: row
                .supported_models
                .iter()
                .filter_map(|m| WhisperModel::parse(m).ok())
                .collect(),
            max_model_size,
            supports_api: row.supports_api,
            has_ads: row.has_ads,
            can_download: row.can_download,
            speaker_diarization_enabled: row.speaker_diarization_enabled,
            is_active: row.is_active,
            created_at: row.created_at,
            updated_at: row.updated_at,
        }
    }
}

/// Plan as shown on the pricing endpoint
#[derive(Debug, Serialize)]
pub struct PlanResponse {
    pub id: Uuid,
    pub name: String,
    pub slug: String,
    pub description: String,
    pub price_monthly: Decimal,
    pub price_yearly: Option<Decimal>,
    pub priority: i32,
    pub max_audio_minutes: i32,
    pub max_files_per_month: i32,
    pub max_model_size: WhisperModel,
    pub available_models: Vec<WhisperModel>,
    pub supports_api: bool,
    pub has_ads: bool,
    pub can_download: bool,
    pub speaker_diarization_enabled: bool,
    pub features: Vec<String>,
}

impl From<SubscriptionPlan> for PlanResponse {
    fn from(plan: SubscriptionPlan) -> Self {
        let features = plan.features();
        let available_models = plan.available_models();
        Self {
            id: plan.id,
            name: plan.name,
            slug: plan.slug,
            description: plan.description,
            price_monthly: plan.price_monthly,
            price_yearly: plan.price_yearly,
            priority: plan.priority,
            max_audio_minutes: plan.max_audio_minutes,
            max_files_per_month: plan.max_files_per_month,
            max_model_size: plan.max_model_size,
            available_models,
            supports_api: plan.supports_api,
            has_ads: plan.has_ads,
            can_download: plan.can_download,
            speaker_diarization_enabled: plan.speaker_diarization_enabled,
            features,
        }
    }
}

/// Outcome of seeding the catalog
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct SeedReport {
    pub created: Vec<String>,
    pub updated: Vec<String>,
}

fn model_strings(template: &PlanTemplate) -> Vec<String> {
    template
        .supported_models()
        .iter()
        .map(|m| m.as_str().to_string())
        .collect()
}

impl PlanService {
    /// Create a new PlanService instance
    pub fn new(db: PgPool) -> Self {
        Self { db }
    }

    /// Active plans, lowest priority first
    pub async fn list_active(&self) -> AppResult<Vec<SubscriptionPlan>> {
        let rows = sqlx::query_as::<_, PlanRow>(&format!(
            "SELECT {} FROM subscription_plans WHERE is_active = TRUE ORDER BY priority ASC",
            PLAN_COLUMNS
        ))
        .fetch_all(&self.db)
        .await?;

        Ok(rows.into_iter().map(SubscriptionPlan::from).collect())
    }

    pub async fn get_by_slug(&self, slug: &str) -> AppResult<SubscriptionPlan> {
        sqlx::query_as::<_, PlanRow>(&format!(
            "SELECT {} FROM subscription_plans WHERE slug = $1",
            PLAN_COLUMNS
        ))
        .bind(slug)
        .fetch_optional(&self.db)
        .await?
        .map(SubscriptionPlan::from)
        .ok_or_else(|| AppError::NotFound("Subscription plan".to_string()))
    }

    /// Insert or update every plan in the default catalog, keyed by slug
    pub async fn seed_default_catalog(&self) -> AppResult<SeedReport> {
        let mut report = SeedReport::default();
        let mut tx = self.db.begin().await?;

        for template in default_plan_catalog() {
            let inserted = sqlx::query_scalar::<_, bool>(
                r#"
                INSERT INTO subscription_plans
                    (name, slug, description, price_monthly, priority, max_audio_minutes,
                     max_files_per_month, supported_models, max_model_size, supports_api,
                     has_ads, can_download, speaker_diarization_enabled, is_active)
                VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, TRUE)
                ON CONFLICT (slug) DO UPDATE SET
                    name = EXCLUDED.name,
                    description = EXCLUDED.description,
                    price_monthly = EXCLUDED.price_monthly,
                    priority = EXCLUDED.priority,
                    max_audio_minutes = EXCLUDED.max_audio_minutes,
                    max_files_per_month = EXCLUDED.max_files_per_month,
                    supported_models = EXCLUDED.supported_models,
                    max_model_size = EXCLUDED.max_model_size,
                    supports_api = EXCLUDED.supports_api,
                    has_ads = EXCLUDED.has_ads,
                    can_download = EXCLUDED.can_download,
                    speaker_diarization_enabled = EXCLUDED.speaker_diarization_enabled,
                    is_active = TRUE,
                    updated_at = NOW()
                RETURNING (xmax = 0)
                "#,
            )
            .bind(template.name)
            .bind(template.slug)
            .bind(template.description)
            .bind(template.price_monthly())
            .bind(template.priority)
            .bind(template.max_audio_minutes)
            .bind(template.max_files_per_month)
            .bind(model_strings(&template))
            .bind(template.max_model_size.as_str())
            .bind(template.supports_api)
            .bind(template.has_ads)
            .bind(template.can_download)
            .bind(template.speaker_diarization_enabled)
            .fetch_one(&mut *tx)
            .await?;

            if inserted {
                report.created.push(template.name.to_string());
            } else {
                report.updated.push(template.name.to_string());
            }
        }

        tx.commit().await?;
        tracing::info!(
            created = report.created.len(),
            updated = report.updated.len(),
            "Seeded subscription plans"
        );
        Ok(report)
    }
}

/// Get or create the free plan row, returning its id
pub async fn ensure_free_plan(conn: &mut PgConnection) -> AppResult<Uuid> {
    let template = free_plan_template();

    sqlx::query(
        r#"
        INSERT INTO subscription_plans
            (name, slug, description, price_monthly, priority, max_audio_minutes,
             max_files_per_month, supported_models, max_model_size, supports_api,
             has_ads, can_download, speaker_diarization_enabled, is_active)
        VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, TRUE)
        ON CONFLICT (slug) DO NOTHING
        "#,
    )
    .bind(template.name)
    .bind(template.slug)
    .bind(template.description)
    .bind(template.price_monthly())
    .bind(template.priority)
    .bind(template.max_audio_minutes)
    .bind(template.max_files_per_month)
    .bind(model_strings(&template))
    .bind(template.max_model_size.as_str())
    .bind(template.supports_api)
    .bind(template.has_ads)
    .bind(template.can_download)
    .bind(template.speaker_diarization_enabled)
    .execute(&mut *conn)
    .await?;

    let id = sqlx::query_scalar::<_, Uuid>("SELECT id FROM subscription_plans WHERE slug = $1")
        .bind(template.slug)
        .fetch_one(&mut *conn)
        .await?;

    Ok(id)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn row(max_model_size: &str) -> PlanRow {
        let now = Utc::now();
        PlanRow {
            id: Uuid::new_v4(),
            name: "Pro".into(),
            slug: "pro".into(),
            description: String::new(),
            price_monthly: Decimal::new(2999, 2),
            price_yearly: None,
            priority: 2,
            max_audio_minutes: 120,
            max_files_per_month: 100,
            supported_models: vec!["tiny".into(), "base".into(), "bogus".into()],
            max_model_size: max_model_size.into(),
            supports_api: true,
            has_ads: false,
            can_download: true,
            speaker_diarization_enabled: true,
            is_active: true,
            created_at: now,
            updated_at: now,
        }
    }

    #[test]
    fn test_row_conversion_skips_unknown_models() {
        let plan = SubscriptionPlan::from(row("medium"));
        assert_eq!(plan.max_model_size, WhisperModel::Medium);
        assert_eq!(plan.supported_models.len(), 2);
    }

    #[test]
    fn test_response_lists_models_from_max_size() {
        let response = PlanResponse::from(SubscriptionPlan::from(row("small")));
        assert_eq!(
            response.available_models,
            vec![WhisperModel::Tiny, WhisperModel::Base, WhisperModel::Small]
        );
        assert_eq!(response.features[2], "API access");
    }
}
