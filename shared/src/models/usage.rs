//! Monthly usage accounting

use chrono::{DateTime, Datelike, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::plan::SubscriptionPlan;

/// A user's usage for one calendar month
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UsageRecord {
    pub user_id: Uuid,
    pub year: i32,
    pub month: u32,
    pub files_processed: i32,
    pub total_audio_seconds: i64,
}

impl UsageRecord {
    pub fn empty(user_id: Uuid, now: DateTime<Utc>) -> Self {
        let (year, month) = usage_period(now);
        Self {
            user_id,
            year,
            month,
            files_processed: 0,
            total_audio_seconds: 0,
        }
    }
}

/// This month's usage plus uploads that are still queued or running
#[derive(Debug, Clone)]
pub struct Allowance {
    pub usage: UsageRecord,
    pub in_flight: i32,
}

impl Allowance {
    /// Files that count against the monthly limit
    pub fn committed_files(&self) -> i32 {
        self.usage.files_processed + self.in_flight.max(0)
    }

    /// True when no plan applies or the monthly file allowance is used up
    pub fn has_reached_limit(&self, plan: Option<&SubscriptionPlan>) -> bool {
        match plan {
            None => true,
            Some(plan) => self.committed_files() >= plan.max_files_per_month,
        }
    }

    pub fn remaining_files(&self, plan: &SubscriptionPlan) -> i32 {
        (plan.max_files_per_month - self.committed_files()).max(0)
    }
}

/// (year, month) bucket for a point in time
pub fn usage_period(now: DateTime<Utc>) -> (i32, u32) {
    (now.year(), now.month())
}

/// Why an audio file cannot be processed
#[derive(Debug, Clone, PartialEq)]
pub enum QuotaDenial {
    NoPlan,
    TooLong { max_minutes: i32 },
    MonthlyLimit { max_files: i32 },
}

impl std::fmt::Display for QuotaDenial {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            QuotaDenial::NoPlan => write!(f, "You need an active subscription to upload files."),
            QuotaDenial::TooLong { max_minutes } => write!(
                f,
                "Your current plan allows audio files up to {} minutes.",
                max_minutes
            ),
            QuotaDenial::MonthlyLimit { max_files } => write!(
                f,
                "You have reached your monthly limit of {} files.",
                max_files
            ),
        }
    }
}

/// Check whether an audio file of the given length may be processed
pub fn check_can_process(
    plan: Option<&SubscriptionPlan>,
    allowance: &Allowance,
    audio_seconds: f64,
) -> Result<(), QuotaDenial> {
    let plan = plan.ok_or(QuotaDenial::NoPlan)?;
    if audio_seconds > plan.max_audio_seconds() {
        return Err(QuotaDenial::TooLong {
            max_minutes: plan.max_audio_minutes,
        });
    }
    if allowance.has_reached_limit(Some(plan)) {
        return Err(QuotaDenial::MonthlyLimit {
            max_files: plan.max_files_per_month,
        });
    }
    Ok(())
}
