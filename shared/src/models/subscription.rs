//! User subscription models

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Lifecycle status of a user subscription, mirroring the billing provider
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SubscriptionStatus {
    Active,
    Canceled,
    PastDue,
    Unpaid,
    Trialing,
    #[default]
    Incomplete,
    IncompleteExpired,
    Paused,
}

impl SubscriptionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            SubscriptionStatus::Active => "active",
            SubscriptionStatus::Canceled => "canceled",
            SubscriptionStatus::PastDue => "past_due",
            SubscriptionStatus::Unpaid => "unpaid",
            SubscriptionStatus::Trialing => "trialing",
            SubscriptionStatus::Incomplete => "incomplete",
            SubscriptionStatus::IncompleteExpired => "incomplete_expired",
            SubscriptionStatus::Paused => "paused",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "active" => Some(SubscriptionStatus::Active),
            "canceled" => Some(SubscriptionStatus::Canceled),
            "past_due" => Some(SubscriptionStatus::PastDue),
            "unpaid" => Some(SubscriptionStatus::Unpaid),
            "trialing" => Some(SubscriptionStatus::Trialing),
            "incomplete" => Some(SubscriptionStatus::Incomplete),
            "incomplete_expired" => Some(SubscriptionStatus::IncompleteExpired),
            "paused" => Some(SubscriptionStatus::Paused),
            _ => None,
        }
    }

    /// Statuses that grant access to plan features
    pub fn grants_access(&self) -> bool {
        matches!(self, SubscriptionStatus::Active | SubscriptionStatus::Trialing)
    }
}

/// A user's subscription to a plan
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UserSubscription {
    pub id: Uuid,
    pub user_id: Uuid,
    pub plan_id: Option<Uuid>,
    pub status: SubscriptionStatus,
    pub stripe_customer_id: String,
    pub stripe_subscription_id: String,
    pub current_period_start: Option<DateTime<Utc>>,
    pub current_period_end: Option<DateTime<Utc>>,
    pub cancel_at_period_end: bool,
    pub trial_end: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl UserSubscription {
    pub fn is_active(&self, now: DateTime<Utc>) -> bool {
        subscription_is_active(
            self.status,
            self.current_period_end,
            self.cancel_at_period_end,
            now,
        )
    }

    pub fn is_trialing(&self, now: DateTime<Utc>) -> bool {
        self.status == SubscriptionStatus::Trialing
            && self.trial_end.map(|end| end > now).unwrap_or(false)
    }

    /// Whole days left in the trial, 0 when not trialing
    pub fn remaining_trial_days(&self, now: DateTime<Utc>) -> i64 {
        if !self.is_trialing(now) {
            return 0;
        }
        self.trial_end
            .map(|end| (end - now).num_days())
            .unwrap_or(0)
    }
}

pub fn subscription_is_active(
    status: SubscriptionStatus,
    current_period_end: Option<DateTime<Utc>>,
    cancel_at_period_end: bool,
    now: DateTime<Utc>,
) -> bool {
    status.grants_access()
        && current_period_end.map(|end| end > now).unwrap_or(true)
        && !cancel_at_period_end
}

/// Period and trial bounds granted to a free sign-up
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FreeGrant {
    pub period_start: DateTime<Utc>,
    pub period_end: DateTime<Utc>,
    pub trial_end: DateTime<Utc>,
}

pub const FREE_PERIOD_DAYS: i64 = 3650;
pub const FREE_TRIAL_DAYS: i64 = 30;

impl FreeGrant {
    pub fn starting_at(now: DateTime<Utc>) -> Self {
        Self {
            period_start: now,
            period_end: now + Duration::days(FREE_PERIOD_DAYS),
            trial_end: now + Duration::days(FREE_TRIAL_DAYS),
        }
    }
}

/// Queue priorities are bounded like a broker's priority range
pub const MAX_QUEUE_PRIORITY: i32 = 10;

/// Queue priority for a user given their plan priority and subscription state
pub fn queue_priority(plan_priority: Option<i32>, subscription_active: bool) -> i32 {
    match plan_priority {
        Some(priority) if subscription_active => priority.clamp(0, MAX_QUEUE_PRIORITY),
        _ => 0,
    }
}
