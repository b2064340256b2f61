//! Plan catalog, subscription and usage handlers

use axum::{
    extract::{Path, State},
    Json,
};

use crate::error::AppError;
use crate::middleware::CurrentUser;
use crate::services::plan::PlanResponse;
use crate::services::subscription::SubscriptionSummary;
use crate::services::usage::UsageSummary;
use crate::services::{PlanService, SubscriptionService, UsageService};
use crate::AppState;

/// List active plans, lowest priority first
pub async fn list_plans(State(state): State<AppState>) -> Result<Json<Vec<PlanResponse>>, AppError> {
    let service = PlanService::new(state.db.clone());
    let plans = service.list_active().await?;
    Ok(Json(plans.into_iter().map(PlanResponse::from).collect()))
}

/// One plan by slug, inactive plans included
pub async fn get_plan(
    State(state): State<AppState>,
    Path(slug): Path<String>,
) -> Result<Json<PlanResponse>, AppError> {
    let plan = PlanService::new(state.db.clone()).get_by_slug(&slug).await?;
    Ok(Json(plan.into()))
}

/// The caller's subscription
pub async fn get_subscription(
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
) -> Result<Json<SubscriptionSummary>, AppError> {
    let service = SubscriptionService::new(state.db.clone());
    let summary = service.summary(user.user_id).await?;
    Ok(Json(summary))
}

/// The caller's usage for the current month
pub async fn get_usage(
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
) -> Result<Json<UsageSummary>, AppError> {
    let plan = SubscriptionService::new(state.db.clone())
        .effective_plan(user.user_id)
        .await?;
    let usage = UsageService::new(state.db.clone())
        .summary(user.user_id, plan.as_ref())
        .await?;
    Ok(Json(usage))
}
