//! Shared HTTP API functionality
//!
//! Pure authentication functions shared by service crates. Framework
//! wiring (axum middleware) lives in the service that uses it.

pub mod auth;

pub use auth::{
    calculate_hash, initialize_shared_secret, load_shared_secret, validate_hash,
    validate_timestamp, ApiAuthError,
};
