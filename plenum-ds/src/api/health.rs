//! Health check.

use crate::AppState;
use axum::routing::get;
use axum::{Json, Router};
use serde_json::json;

pub fn health_routes() -> Router<AppState> {
    Router::new().route("/health", get(health))
}

async fn health() -> Json<serde_json::Value> {
    Json(json!({
        "status": "ok",
        "service": "plenum-ds",
        "version": env!("CARGO_PKG_VERSION"),
    }))
}
