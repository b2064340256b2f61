//! Health check handlers

use std::collections::BTreeMap;

use axum::{extract::State, http::StatusCode, Json};
use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::AppState;

#[derive(Serialize)]
pub struct LivenessResponse {
    pub status: &'static str,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Serialize)]
pub struct CheckResult {
    pub status: &'static str,
    #[serde(flatten)]
    pub details: BTreeMap<&'static str, String>,
}

impl CheckResult {
    fn healthy() -> Self {
        Self {
            status: "healthy",
            details: BTreeMap::new(),
        }
    }

    fn unhealthy(error: impl Into<String>) -> Self {
        let mut details = BTreeMap::new();
        details.insert("error", error.into());
        Self {
            status: "unhealthy",
            details,
        }
    }

    fn with(mut self, key: &'static str, value: impl Into<String>) -> Self {
        self.details.insert(key, value.into());
        self
    }

    pub fn is_healthy(&self) -> bool {
        self.status == "healthy"
    }
}

#[derive(Serialize)]
pub struct ReadinessResponse {
    pub status: &'static str,
    pub timestamp: DateTime<Utc>,
    pub checks: BTreeMap<&'static str, CheckResult>,
}

impl ReadinessResponse {
    pub fn from_checks(checks: BTreeMap<&'static str, CheckResult>) -> (StatusCode, Self) {
        let healthy = checks.values().all(CheckResult::is_healthy);
        let (code, status) = if healthy {
            (StatusCode::OK, "healthy")
        } else {
            (StatusCode::SERVICE_UNAVAILABLE, "unhealthy")
        };
        (
            code,
            Self {
                status,
                timestamp: Utc::now(),
                checks,
            },
        )
    }
}

/// Liveness probe
pub async fn health_check() -> Json<LivenessResponse> {
    Json(LivenessResponse {
        status: "ok",
        timestamp: Utc::now(),
    })
}

/// Readiness probe: database and media storage
pub async fn readiness_check(
    State(state): State<AppState>,
) -> (StatusCode, Json<ReadinessResponse>) {
    let mut checks = BTreeMap::new();

    let database = match sqlx::query("SELECT 1").execute(&state.db).await {
        Ok(_) => CheckResult::healthy(),
        Err(e) => {
            tracing::error!("Database health check failed: {}", e);
            CheckResult::unhealthy(e.to_string())
        }
    };
    checks.insert(
        "database",
        database
            .with("database", state.config.database.name())
            .with("backend", "postgresql"),
    );

    let storage = if state.storage.probe().await {
        CheckResult::healthy()
    } else {
        tracing::error!("Storage health check failed");
        CheckResult::unhealthy("Storage health check failed")
    };
    checks.insert("storage", storage);

    let (code, body) = ReadinessResponse::from_checks(checks);
    (code, Json(body))
}
