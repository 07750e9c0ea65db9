//! Topic directory endpoints.

use crate::api::authorize;
use crate::db;
use crate::error::{ApiError, ApiResult};
use crate::session::engine::{apply_draft, new_topic, validate_draft, TopicDraft};
use crate::AppState;
use axum::extract::{Path, Query, State};
use axum::routing::get;
use serde::Deserialize;
use axum::{Json, Router};
use chrono::Utc;
use plenum_common::db::models::Topic;
use plenum_common::events::PlenumEvent;
use tracing::error;

pub fn topic_routes() -> Router<AppState> {
    Router::new()
        .route("/api/topics", get(list_topics).post(create_topic))
        .route("/api/topics/:id", get(get_topic).put(update_topic))
}

#[derive(Debug, Deserialize)]
struct TopicListQuery {
    status: Option<String>,
}

/// List topics, filtered by status (default `upcoming`), ordered by start
/// date.
///
/// A directory read failure degrades to a fixed placeholder list instead
/// of an error, so the guest flow stays usable.
async fn list_topics(
    State(state): State<AppState>,
    Query(query): Query<TopicListQuery>,
) -> Json<Vec<Topic>> {
    let status = query.status.as_deref().unwrap_or("upcoming");
    match db::topics::list_by_status(&state.db, status).await {
        Ok(topics) => Json(topics),
        Err(e) => {
            error!(error = %e, "topic listing failed, serving placeholders");
            Json(db::topics::placeholder_topics())
        }
    }
}

async fn get_topic(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> ApiResult<Json<Topic>> {
    let topic = db::topics::get(&state.db, &id)
        .await?
        .ok_or_else(|| ApiError::NotFound(format!("topic {id} not found")))?;
    Ok(Json(topic))
}

async fn create_topic(
    State(state): State<AppState>,
    Json(payload): Json<serde_json::Value>,
) -> ApiResult<Json<Topic>> {
    authorize(state.shared_secret, &payload)?;
    let draft: TopicDraft = serde_json::from_value(payload)
        .map_err(|e| ApiError::BadRequest(format!("invalid topic: {e}")))?;
    validate_draft(&draft)?;
    let topic = apply_draft(new_topic(), &draft);
    db::topics::insert(&state.db, &topic).await?;
    state.event_bus.emit_lossy(PlenumEvent::TopicCreated {
        topic_id: crate::session::engine::guid_uuid(&topic.guid),
        title: topic.title.clone(),
        timestamp: Utc::now(),
    });
    Ok(Json(topic))
}

async fn update_topic(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(payload): Json<serde_json::Value>,
) -> ApiResult<Json<Topic>> {
    authorize(state.shared_secret, &payload)?;
    let draft: TopicDraft = serde_json::from_value(payload)
        .map_err(|e| ApiError::BadRequest(format!("invalid topic: {e}")))?;
    validate_draft(&draft)?;
    let existing = db::topics::get(&state.db, &id)
        .await?
        .ok_or_else(|| ApiError::NotFound(format!("topic {id} not found")))?;
    let topic = apply_draft(existing, &draft);
    db::topics::update(&state.db, &topic).await?;
    state.event_bus.emit_lossy(PlenumEvent::TopicUpdated {
        topic_id: crate::session::engine::guid_uuid(&topic.guid),
        title: topic.title.clone(),
        timestamp: Utc::now(),
    });
    Ok(Json(topic))
}
