//! Plenum deliberation service.
//!
//! Hosts create topics, participants submit ideas against them, a model
//! facilitator asks follow-up questions, and an analysis pass clusters the
//! ideas into themes before and after a live discussion. This crate is the
//! HTTP service: session runs, the topic directory, the AI relays and the
//! SSE fan-out.

pub mod ai;
pub mod api;
pub mod config;
pub mod db;
pub mod error;
pub mod session;

use crate::ai::analysis::AnalysisClient;
use crate::ai::facilitator::FacilitatorClient;
use crate::config::SessionSettings;
use crate::session::RunRegistry;
use axum::Router;
use plenum_common::events::EventBus;
use sqlx::SqlitePool;
use std::sync::Arc;

/// Shared application state.
#[derive(Clone)]
pub struct AppState {
    pub db: SqlitePool,
    pub event_bus: EventBus,
    pub runs: RunRegistry,
    pub facilitator: Option<Arc<FacilitatorClient>>,
    pub analyst: Option<Arc<AnalysisClient>>,
    pub session_settings: SessionSettings,
    /// Shared secret for mutating host endpoints; 0 disables checking.
    pub shared_secret: i64,
}

/// Assemble the full route table.
pub fn build_router(state: AppState) -> Router {
    Router::new()
        .merge(api::health::health_routes())
        .merge(api::topics::topic_routes())
        .merge(api::runs::run_routes())
        .merge(api::relay::relay_routes())
        .merge(api::sse::sse_routes())
        .with_state(state)
}
