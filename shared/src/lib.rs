//! Shared types and models for the Speech2Text platform
//!
//! This crate contains the domain rules shared between the backend, the
//! browser helpers (via WASM), and the operator tooling. Nothing in here
//! touches the network, the filesystem, or the database.

pub mod models;
pub mod types;
pub mod validation;

pub use models::*;
pub use types::*;
pub use validation::*;
