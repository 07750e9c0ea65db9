//! Session run endpoints.
//!
//! Each browser session creates one run and drives it through the stages
//! with the POST endpoints below. The run snapshot returned by every call
//! is the full client-facing state, so the frontend can rerender from any
//! response.

use crate::api::authorize;
use crate::error::{ApiError, ApiResult};
use crate::session::engine::{SessionEngine, TopicDraft};
use crate::session::run::RunSnapshot;
use crate::session::stage::StageEvent;
use crate::AppState;
use axum::extract::{Path, State};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::Deserialize;
use std::sync::Arc;
use tracing::info;
use uuid::Uuid;

pub fn run_routes() -> Router<AppState> {
    Router::new()
        .route("/api/runs", post(create_run))
        .route("/api/runs/:id", get(get_run).delete(delete_run))
        .route("/api/runs/:id/choose-host", post(choose_host))
        .route("/api/runs/:id/choose-guest", post(choose_guest))
        .route("/api/runs/:id/cancel", post(cancel))
        .route("/api/runs/:id/topic", post(save_topic))
        .route("/api/runs/:id/join", post(join))
        .route("/api/runs/:id/ideas", post(submit_idea))
        .route("/api/runs/:id/complete", post(complete_collection))
        .route("/api/runs/:id/discussion", post(start_discussion))
        .route("/api/runs/:id/transcript", post(append_transcript))
        .route("/api/runs/:id/remap", post(request_remap))
}

async fn engine_for(state: &AppState, id: Uuid) -> ApiResult<Arc<SessionEngine>> {
    state
        .runs
        .get(id)
        .await
        .ok_or_else(|| ApiError::NotFound(format!("run {id} not found")))
}

async fn create_run(State(state): State<AppState>) -> ApiResult<Json<RunSnapshot>> {
    let run_id = Uuid::new_v4();
    let engine = SessionEngine::new(
        run_id,
        state.db.clone(),
        state.event_bus.clone(),
        state.facilitator.clone(),
        state.analyst.clone(),
        state.session_settings.clone(),
    );
    let snapshot = engine.snapshot().await;
    state.runs.insert(engine).await;
    info!(%run_id, "session run created");
    Ok(Json(snapshot))
}

async fn get_run(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> ApiResult<Json<RunSnapshot>> {
    let engine = engine_for(&state, id).await?;
    Ok(Json(engine.snapshot().await))
}

async fn delete_run(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> ApiResult<Json<serde_json::Value>> {
    state
        .runs
        .remove(id)
        .await
        .ok_or_else(|| ApiError::NotFound(format!("run {id} not found")))?;
    info!(run_id = %id, "session run removed");
    Ok(Json(serde_json::json!({ "removed": id })))
}

/// Host role selection. Requires the shared-secret hash on the body.
async fn choose_host(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Json(payload): Json<serde_json::Value>,
) -> ApiResult<Json<RunSnapshot>> {
    authorize(state.shared_secret, &payload)?;
    let engine = engine_for(&state, id).await?;
    Ok(Json(engine.apply_event(StageEvent::ChooseHost).await?))
}

async fn choose_guest(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> ApiResult<Json<RunSnapshot>> {
    let engine = engine_for(&state, id).await?;
    Ok(Json(engine.apply_event(StageEvent::ChooseGuest).await?))
}

async fn cancel(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> ApiResult<Json<RunSnapshot>> {
    let engine = engine_for(&state, id).await?;
    Ok(Json(engine.apply_event(StageEvent::Cancel).await?))
}

/// Save the topic draft composed in host setup.
async fn save_topic(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Json(payload): Json<serde_json::Value>,
) -> ApiResult<Json<RunSnapshot>> {
    authorize(state.shared_secret, &payload)?;
    let draft: TopicDraft = serde_json::from_value(payload)
        .map_err(|e| ApiError::BadRequest(format!("invalid topic draft: {e}")))?;
    let engine = engine_for(&state, id).await?;
    Ok(Json(engine.save_topic(draft).await?))
}

#[derive(Debug, Deserialize)]
struct JoinRequest {
    topic_id: String,
    name: String,
}

async fn join(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Json(request): Json<JoinRequest>,
) -> ApiResult<Json<RunSnapshot>> {
    let engine = engine_for(&state, id).await?;
    Ok(Json(engine.join(&request.topic_id, &request.name).await?))
}

#[derive(Debug, Deserialize)]
struct IdeaRequest {
    content: String,
    question_section: Option<String>,
}

async fn submit_idea(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Json(request): Json<IdeaRequest>,
) -> ApiResult<Json<RunSnapshot>> {
    let engine = engine_for(&state, id).await?;
    Ok(Json(
        engine
            .submit_idea(&request.content, request.question_section)
            .await?,
    ))
}

async fn complete_collection(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> ApiResult<Json<RunSnapshot>> {
    let engine = engine_for(&state, id).await?;
    Ok(Json(engine.complete_collection().await?))
}

async fn start_discussion(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> ApiResult<Json<RunSnapshot>> {
    let engine = engine_for(&state, id).await?;
    Ok(Json(engine.start_discussion().await?))
}

#[derive(Debug, Deserialize)]
struct TranscriptRequest {
    text: String,
}

async fn append_transcript(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Json(request): Json<TranscriptRequest>,
) -> ApiResult<Json<RunSnapshot>> {
    let engine = engine_for(&state, id).await?;
    Ok(Json(engine.append_transcript(&request.text).await?))
}

async fn request_remap(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> ApiResult<Json<RunSnapshot>> {
    let engine = engine_for(&state, id).await?;
    Ok(Json(engine.request_remap().await?))
}
