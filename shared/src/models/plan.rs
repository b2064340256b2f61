//! Subscription plan models

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::whisper::WhisperModel;

/// A plan users can subscribe to
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SubscriptionPlan {
    pub id: Uuid,
    pub name: String,
    pub slug: String,
    pub description: String,
    pub price_monthly: Decimal,
    pub price_yearly: Option<Decimal>,
    /// Higher number means served earlier by the transcription queue
    pub priority: i32,
    /// Maximum audio length per file, in minutes
    pub max_audio_minutes: i32,
    pub max_files_per_month: i32,
    pub supported_models: Vec<WhisperModel>,
    pub max_model_size: WhisperModel,
    pub supports_api: bool,
    pub has_ads: bool,
    pub can_download: bool,
    pub speaker_diarization_enabled: bool,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl SubscriptionPlan {
    /// Models this plan may use, smallest first
    pub fn available_models(&self) -> Vec<WhisperModel> {
        WhisperModel::up_to(self.max_model_size)
    }

    pub fn can_use_model(&self, model: WhisperModel) -> bool {
        model <= self.max_model_size
    }

    /// Maximum audio length per file, in seconds
    pub fn max_audio_seconds(&self) -> f64 {
        f64::from(self.max_audio_minutes) * 60.0
    }

    /// Upload size ceiling: one MiB per second of allowed audio
    pub fn max_upload_bytes(&self) -> u64 {
        max_upload_bytes_for_minutes(self.max_audio_minutes)
    }

    /// Human readable feature list, in display order
    pub fn features(&self) -> Vec<String> {
        plan_features(
            self.max_audio_minutes,
            self.max_files_per_month,
            self.supports_api,
            self.has_ads,
            self.can_download,
        )
    }
}

/// Upload size ceiling for a given audio length allowance
pub fn max_upload_bytes_for_minutes(max_audio_minutes: i32) -> u64 {
    u64::try_from(max_audio_minutes.max(0)).unwrap_or(0) * 60 * 1024 * 1024
}

pub fn plan_features(
    max_audio_minutes: i32,
    max_files_per_month: i32,
    supports_api: bool,
    has_ads: bool,
    can_download: bool,
) -> Vec<String> {
    vec![
        format!("{} minutes max audio length", max_audio_minutes),
        format!("{} files per month", max_files_per_month),
        if supports_api { "API access" } else { "No API access" }.to_string(),
        if has_ads { "Includes ads" } else { "Ad-free" }.to_string(),
        if can_download {
            "Download transcripts"
        } else {
            "No downloads"
        }
        .to_string(),
    ]
}

/// Seed values for a plan in the default catalog
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlanTemplate {
    pub slug: &'static str,
    pub name: &'static str,
    pub description: &'static str,
    /// Monthly price in cents
    pub price_monthly_cents: i64,
    pub priority: i32,
    pub max_audio_minutes: i32,
    pub max_files_per_month: i32,
    pub max_model_size: WhisperModel,
    pub supports_api: bool,
    pub has_ads: bool,
    pub can_download: bool,
    pub speaker_diarization_enabled: bool,
}

impl PlanTemplate {
    pub fn price_monthly(&self) -> Decimal {
        Decimal::new(self.price_monthly_cents, 2)
    }

    pub fn supported_models(&self) -> Vec<WhisperModel> {
        WhisperModel::up_to(self.max_model_size)
    }
}

pub const FREE_PLAN_SLUG: &str = "free";

/// Plans seeded by `init-plans`, cheapest first
pub fn default_plan_catalog() -> Vec<PlanTemplate> {
    vec![
        free_plan_template(),
        PlanTemplate {
            slug: "basic",
            name: "Basic",
            description: "Ad-free transcription with the small model",
            price_monthly_cents: 999,
            priority: 1,
            max_audio_minutes: 30,
            max_files_per_month: 30,
            max_model_size: WhisperModel::Small,
            supports_api: false,
            has_ads: false,
            can_download: true,
            speaker_diarization_enabled: false,
        },
        PlanTemplate {
            slug: "pro",
            name: "Pro",
            description: "Higher limits, API access and speaker diarization",
            price_monthly_cents: 2999,
            priority: 2,
            max_audio_minutes: 120,
            max_files_per_month: 100,
            max_model_size: WhisperModel::Medium,
            supports_api: true,
            has_ads: false,
            can_download: true,
            speaker_diarization_enabled: true,
        },
        PlanTemplate {
            slug: "enterprise",
            name: "Enterprise",
            description: "Largest model, highest limits and top queue priority",
            price_monthly_cents: 9999,
            priority: 3,
            max_audio_minutes: 600,
            max_files_per_month: 1000,
            max_model_size: WhisperModel::Large,
            supports_api: true,
            has_ads: false,
            can_download: true,
            speaker_diarization_enabled: true,
        },
    ]
}

/// Catalog entry for the free plan, also used for new sign-ups
pub fn free_plan_template() -> PlanTemplate {
    PlanTemplate {
        slug: FREE_PLAN_SLUG,
        name: "Free",
        description: "Basic plan with limited features and ads",
        price_monthly_cents: 0,
        priority: 0,
        max_audio_minutes: 10,
        max_files_per_month: 5,
        max_model_size: WhisperModel::Base,
        supports_api: false,
        has_ads: true,
        can_download: false,
        speaker_diarization_enabled: false,
    }
}
