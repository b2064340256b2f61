//! Business logic services for the Speech2Text service

pub mod auth;
pub mod plan;
pub mod queue;
pub mod subscription;
pub mod transcription;
pub mod usage;
pub mod user;

pub use auth::AuthService;
pub use plan::PlanService;
pub use queue::QueueService;
pub use subscription::SubscriptionService;
pub use transcription::TranscriptionService;
pub use usage::UsageService;
pub use user::UserService;
