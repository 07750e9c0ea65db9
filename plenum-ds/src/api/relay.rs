//! Raw facilitator relay.
//!
//! `POST /api/ai/question` mirrors the serverless relay the frontend was
//! built against: it accepts the topic fields and conversation history,
//! assembles the facilitator prompt server-side (the API key never reaches
//! the browser) and forwards to the messages API. CORS is fully open on
//! this route. Success passes the provider's response JSON through
//! unchanged; failures carry the upstream status plus the fixed fallback
//! question.

use crate::ai::facilitator::{build_messages, system_prompt_from_parts, FALLBACK_QUESTION};
use crate::AppState;
use axum::extract::State;
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::routing::post;
use axum::{Json, Router};
use serde::Deserialize;
use serde_json::json;
use tower_http::cors::CorsLayer;
use tracing::warn;

pub fn relay_routes() -> Router<AppState> {
    Router::new()
        .route("/api/ai/question", post(relay_question))
        .layer(CorsLayer::permissive())
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RelayRequest {
    #[serde(default)]
    topic: String,
    #[serde(default)]
    goal: String,
    #[serde(default)]
    question1: String,
    #[serde(default)]
    question2: String,
    #[serde(default)]
    idea: String,
    /// Which framing question the participant is currently answering.
    #[serde(default)]
    current_question: String,
    #[serde(default)]
    previous_messages: Vec<RelayTurn>,
}

#[derive(Debug, Deserialize)]
struct RelayTurn {
    /// `user` or `ai`; anything else is treated as `user`.
    #[serde(default)]
    role: String,
    #[serde(default)]
    content: String,
}

async fn relay_question(
    State(state): State<AppState>,
    Json(request): Json<RelayRequest>,
) -> impl IntoResponse {
    let Some(facilitator) = &state.facilitator else {
        return (
            StatusCode::SERVICE_UNAVAILABLE,
            Json(json!({
                "error": "no API key configured",
                "fallback": FALLBACK_QUESTION,
            })),
        );
    };

    let mut system = system_prompt_from_parts(
        &request.topic,
        &request.goal,
        &request.question1,
        &request.question2,
    );
    if !request.current_question.is_empty() {
        system.push_str(&format!(
            "\nThe participant is currently answering: {}",
            request.current_question
        ));
    }
    let history: Vec<_> = request
        .previous_messages
        .iter()
        .map(|turn| crate::ai::facilitator::HistoryTurn {
            role: if turn.role == "ai" || turn.role == "assistant" {
                "assistant".to_string()
            } else {
                "user".to_string()
            },
            content: turn.content.clone(),
        })
        .collect();
    let messages = build_messages(&request.idea, &history);

    match facilitator.messages_request(&system, &messages).await {
        // The provider's response body passes through untouched; the
        // frontend extracts `content[0].text` itself.
        Ok((200, body)) => (StatusCode::OK, Json(body)),
        // Upstream errors keep their status so the caller can tell rate
        // limiting from auth failure.
        Ok((status, body)) => {
            warn!(status, "facilitator relay upstream error");
            (
                StatusCode::from_u16(status).unwrap_or(StatusCode::BAD_GATEWAY),
                Json(json!({
                    "error": body,
                    "fallback": FALLBACK_QUESTION,
                })),
            )
        }
        Err(e) => {
            warn!(error = %e, "facilitator relay request failed");
            (
                StatusCode::BAD_GATEWAY,
                Json(json!({
                    "error": e.to_string(),
                    "fallback": FALLBACK_QUESTION,
                })),
            )
        }
    }
}
