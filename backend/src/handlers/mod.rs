//! HTTP handlers

pub mod auth;
pub mod health;
pub mod plans;
pub mod transcriptions;
pub mod users;

pub use auth::{login, refresh, register};
pub use health::{health_check, readiness_check};
pub use plans::{get_plan, get_subscription, get_usage, list_plans};
pub use users::{get_me, update_me};
