//! Service configuration loaded from the settings table.
//!
//! Model names and token limits live in the database so they can be tuned
//! without a rebuild. The API key is taken from the `ANTHROPIC_API_KEY`
//! environment variable first, then the `anthropic_api_key` setting; when
//! neither is present the service runs with deterministic fallbacks.

use crate::ai::analysis::AnalysisClient;
use crate::ai::facilitator::{FacilitatorClient, ANTHROPIC_BASE_URL};
use plenum_common::db::init::{setting_or, DEFAULT_COLLECTION_SECONDS};
use sqlx::SqlitePool;
use std::sync::Arc;
use tracing::{info, warn};

/// Settings for the model-facing clients.
#[derive(Debug, Clone)]
pub struct AiConfig {
    pub api_key: Option<String>,
    pub base_url: String,
    pub facilitator_model: String,
    pub facilitator_max_tokens: u32,
    pub analysis_model: String,
    pub analysis_max_tokens: u32,
}

/// Settings that shape a participant session.
#[derive(Debug, Clone)]
pub struct SessionSettings {
    /// Length of the idea-collection countdown.
    pub collection_seconds: u32,
    /// Pause between the analysis resolving and the mapping being shown.
    pub analysis_delay_ms: u64,
}

pub async fn load_ai_config(pool: &SqlitePool) -> AiConfig {
    let api_key = match std::env::var("ANTHROPIC_API_KEY") {
        Ok(key) if !key.is_empty() => Some(key),
        _ => {
            let from_db: String = setting_or(pool, "anthropic_api_key", String::new()).await;
            if from_db.is_empty() {
                None
            } else {
                Some(from_db)
            }
        }
    };
    let base_url = setting_or(pool, "anthropic_base_url", ANTHROPIC_BASE_URL.to_string()).await;
    AiConfig {
        api_key,
        base_url,
        facilitator_model: setting_or(
            pool,
            "facilitator_model",
            "claude-sonnet-4-20250514".to_string(),
        )
        .await,
        facilitator_max_tokens: setting_or(pool, "facilitator_max_tokens", 1000).await,
        analysis_model: setting_or(pool, "analysis_model", "claude-sonnet-4-20250514".to_string())
            .await,
        analysis_max_tokens: setting_or(pool, "analysis_max_tokens", 4000).await,
    }
}

pub async fn load_session_settings(pool: &SqlitePool) -> SessionSettings {
    SessionSettings {
        collection_seconds: setting_or(pool, "collection_seconds", DEFAULT_COLLECTION_SECONDS).await,
        analysis_delay_ms: setting_or(pool, "analysis_delay_ms", 1000).await,
    }
}

/// Build the model clients, or `None` when no API key is configured.
pub fn build_clients(
    config: &AiConfig,
) -> (Option<Arc<FacilitatorClient>>, Option<Arc<AnalysisClient>>) {
    match &config.api_key {
        Some(key) => {
            info!(
                facilitator_model = %config.facilitator_model,
                analysis_model = %config.analysis_model,
                "AI clients configured"
            );
            let facilitator = FacilitatorClient::new(
                key.clone(),
                config.base_url.clone(),
                config.facilitator_model.clone(),
                config.facilitator_max_tokens,
            );
            let analyst = AnalysisClient::new(
                key.clone(),
                config.base_url.clone(),
                config.analysis_model.clone(),
                config.analysis_max_tokens,
            );
            (Some(Arc::new(facilitator)), Some(Arc::new(analyst)))
        }
        None => {
            warn!("no Anthropic API key configured, facilitator and analysis run in fallback mode");
            (None, None)
        }
    }
}
