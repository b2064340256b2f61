//! Request middleware

pub mod auth;
pub mod upload_limit;

pub use auth::{auth_middleware, AuthUser, CurrentUser};
pub use upload_limit::{body_limit_for, upload_limit_middleware, TOO_LARGE_MESSAGE};
