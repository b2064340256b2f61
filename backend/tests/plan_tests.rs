//! Subscription plan and model access tests
//!
//! Property-based and unit tests for:
//! - Model ladder access
//! - Queue priority bounds
//! - Monthly quota enforcement, including uploads still in flight

use chrono::Utc;
use proptest::prelude::*;
use uuid::Uuid;

use shared::models::{
    check_can_process, default_plan_catalog, queue_priority, Allowance, PlanTemplate,
    QuotaDenial, SubscriptionPlan, UsageRecord, WhisperModel, MAX_QUEUE_PRIORITY,
};
use speech2text_backend::services::transcription::ModelAvailability;

fn plan_from(template: &PlanTemplate) -> SubscriptionPlan {
    let now = Utc::now();
    SubscriptionPlan {
        id: Uuid::new_v4(),
        name: template.name.to_string(),
        slug: template.slug.to_string(),
        description: template.description.to_string(),
        price_monthly: template.price_monthly(),
        price_yearly: None,
        priority: template.priority,
        max_audio_minutes: template.max_audio_minutes,
        max_files_per_month: template.max_files_per_month,
        supported_models: template.supported_models(),
        max_model_size: template.max_model_size,
        supports_api: template.supports_api,
        has_ads: template.has_ads,
        can_download: template.can_download,
        speaker_diarization_enabled: template.speaker_diarization_enabled,
        is_active: true,
        created_at: now,
        updated_at: now,
    }
}

fn allowance(files_processed: i32, in_flight: i32) -> Allowance {
    let mut usage = UsageRecord::empty(Uuid::new_v4(), Utc::now());
    usage.files_processed = files_processed;
    Allowance { usage, in_flight }
}

fn catalog_plan(slug: &str) -> SubscriptionPlan {
    let template = default_plan_catalog()
        .into_iter()
        .find(|t| t.slug == slug)
        .expect("plan in catalog");
    plan_from(&template)
}

// ============================================================================
// Property Test Strategies
// ============================================================================

fn model_strategy() -> impl Strategy<Value = WhisperModel> {
    prop::sample::select(WhisperModel::ALL.to_vec())
}

fn catalog_strategy() -> impl Strategy<Value = PlanTemplate> {
    prop::sample::select(default_plan_catalog())
}

// ============================================================================
// Property Tests
// ============================================================================

proptest! {
    #![proptest_config(ProptestConfig::with_cases(200))]

    /// A plan may use exactly the models at or below its ceiling
    #[test]
    fn model_access_follows_ladder(
        template in catalog_strategy(),
        model in model_strategy(),
    ) {
        let plan = plan_from(&template);
        let availability = ModelAvailability::evaluate(model, Some(&plan));

        prop_assert_eq!(availability.available, model <= plan.max_model_size);
        prop_assert_eq!(plan.available_models().contains(&model), availability.available);
    }

    /// The tier a model requires always grants it
    #[test]
    fn required_tier_unlocks_model(model in model_strategy()) {
        let plan = catalog_plan(model.required_tier());
        prop_assert!(plan.can_use_model(model));
    }

    /// Queue priority stays within the broker range
    #[test]
    fn priority_is_clamped(
        plan_priority in proptest::option::of(-100i32..100),
        active in any::<bool>(),
    ) {
        let priority = queue_priority(plan_priority, active);

        prop_assert!((0..=MAX_QUEUE_PRIORITY).contains(&priority));
        if !active {
            prop_assert_eq!(priority, 0);
        }
    }

    /// Processing is refused once the monthly allowance is used
    #[test]
    fn monthly_limit_refuses_processing(
        template in catalog_strategy(),
        extra in 0i32..50,
    ) {
        let plan = plan_from(&template);
        let used = allowance(plan.max_files_per_month + extra, 0);

        prop_assert_eq!(
            check_can_process(Some(&plan), &used, 1.0),
            Err(QuotaDenial::MonthlyLimit { max_files: plan.max_files_per_month })
        );
    }

    /// Queued and running uploads count against the allowance before they finish
    #[test]
    fn in_flight_uploads_count_toward_limit(
        template in catalog_strategy(),
        processed_share in 0.0f64..=1.0,
    ) {
        let plan = plan_from(&template);
        let processed = (f64::from(plan.max_files_per_month) * processed_share) as i32;
        let in_flight = plan.max_files_per_month - processed;

        let full = allowance(processed, in_flight);
        prop_assert_eq!(full.committed_files(), plan.max_files_per_month);
        prop_assert!(full.has_reached_limit(Some(&plan)));
        prop_assert_eq!(full.remaining_files(&plan), 0);

        if in_flight > 0 {
            let one_free = allowance(processed, in_flight - 1);
            prop_assert!(check_can_process(Some(&plan), &one_free, 1.0).is_ok());
        }
    }

    /// Length is checked against the per-file ceiling
    #[test]
    fn audio_length_is_capped_per_file(
        template in catalog_strategy(),
        over in 1u32..3600,
    ) {
        let plan = plan_from(&template);
        let fresh = allowance(0, 0);

        prop_assert!(check_can_process(Some(&plan), &fresh, plan.max_audio_seconds()).is_ok());
        prop_assert_eq!(
            check_can_process(Some(&plan), &fresh, plan.max_audio_seconds() + f64::from(over)),
            Err(QuotaDenial::TooLong { max_minutes: plan.max_audio_minutes })
        );
    }
}

// ============================================================================
// Unit Tests
// ============================================================================

#[test]
fn test_catalog_is_ordered_by_priority() {
    let catalog = default_plan_catalog();
    let slugs: Vec<_> = catalog.iter().map(|t| t.slug).collect();
    assert_eq!(slugs, vec!["free", "basic", "pro", "enterprise"]);
    assert!(catalog.windows(2).all(|w| w[0].priority < w[1].priority));
}

#[test]
fn test_free_plan_limits() {
    let free = catalog_plan("free");
    assert_eq!(free.available_models(), vec![WhisperModel::Tiny, WhisperModel::Base]);
    assert_eq!(free.max_upload_bytes(), 10 * 60 * 1024 * 1024);
    assert!(!free.speaker_diarization_enabled);
}

#[test]
fn test_availability_messages() {
    let basic = catalog_plan("basic");

    let denied = ModelAvailability::evaluate(WhisperModel::Large, Some(&basic));
    assert_eq!(denied.message, "Not available with your Basic plan. Please upgrade.");

    let none = ModelAvailability::evaluate(WhisperModel::Tiny, None);
    assert!(!none.available);
    assert_eq!(none.message, "No active subscription found");
}

#[test]
fn test_no_plan_cannot_process() {
    assert_eq!(
        check_can_process(None, &allowance(0, 0), 1.0),
        Err(QuotaDenial::NoPlan)
    );
}
