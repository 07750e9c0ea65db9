//! # Plenum Common Library
//!
//! Shared code for the Plenum deliberation service including:
//! - Database models and initialization
//! - Event types (PlenumEvent enum) and the EventBus
//! - Shared-secret API authentication
//! - Configuration loading
//! - SSE utilities

pub mod api;
pub mod config;
pub mod db;
pub mod error;
pub mod events;
pub mod sse;

pub use error::{Error, Result};
