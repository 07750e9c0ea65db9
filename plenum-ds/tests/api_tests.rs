//! Integration tests for the plenum-ds HTTP API.
//!
//! Tests run against the real router with an in-memory database. No API
//! key is configured, so the facilitator and analysis paths exercise
//! their deterministic fallbacks. Shared secret 0 disables auth except
//! where a test sets one explicitly.

use axum::body::Body;
use axum::http::{Request, StatusCode};
use axum::Router;
use http_body_util::BodyExt;
use plenum_common::api::auth::calculate_hash;
use plenum_common::db::init::init_memory_database;
use plenum_common::events::EventBus;
use plenum_ds::config::SessionSettings;
use plenum_ds::session::RunRegistry;
use plenum_ds::{build_router, AppState};
use serde_json::{json, Value};
use std::time::Duration;
use tower::ServiceExt;

async fn test_state() -> AppState {
    test_state_with(600, 0).await
}

async fn test_state_with(collection_seconds: u32, shared_secret: i64) -> AppState {
    let db = init_memory_database().await.expect("in-memory database");
    AppState {
        db,
        event_bus: EventBus::new(100),
        runs: RunRegistry::new(),
        facilitator: None,
        analyst: None,
        session_settings: SessionSettings {
            collection_seconds,
            analysis_delay_ms: 25,
        },
        shared_secret,
    }
}

async fn send(app: &Router, method: &str, uri: &str, body: Option<Value>) -> (StatusCode, Value) {
    let request = match body {
        Some(value) => Request::builder()
            .method(method)
            .uri(uri)
            .header("content-type", "application/json")
            .body(Body::from(value.to_string()))
            .unwrap(),
        None => Request::builder()
            .method(method)
            .uri(uri)
            .body(Body::empty())
            .unwrap(),
    };
    let response = app.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    let value = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes).unwrap_or(Value::Null)
    };
    (status, value)
}

fn topic_draft() -> Value {
    let today = chrono::Utc::now().date_naive();
    json!({
        "title": "Community energy",
        "description": "How should the district heat itself?",
        "goal": "Shared priorities",
        "question1": "What matters most?",
        "question2": "What would you trade away?",
        "host_name": "Ada",
        "start_date": (today - chrono::Days::new(1)).format("%Y-%m-%d").to_string(),
        "end_date": (today + chrono::Days::new(1)).format("%Y-%m-%d").to_string(),
    })
}

/// Create a run, walk it to the brainstorm stage, and return (run_id,
/// topic_id).
async fn join_fresh_run(app: &Router, name: &str) -> (String, String) {
    let (_, topic) = send(app, "POST", "/api/topics", Some(topic_draft())).await;
    let topic_id = topic["guid"].as_str().unwrap().to_string();
    join_run_for_topic(app, &topic_id, name).await
}

async fn join_run_for_topic(app: &Router, topic_id: &str, name: &str) -> (String, String) {
    let (status, run) = send(app, "POST", "/api/runs", None).await;
    assert_eq!(status, StatusCode::OK);
    let run_id = run["run_id"].as_str().unwrap().to_string();
    let (status, _) = send(app, "POST", &format!("/api/runs/{run_id}/choose-guest"), None).await;
    assert_eq!(status, StatusCode::OK);
    let (status, snapshot) = send(
        app,
        "POST",
        &format!("/api/runs/{run_id}/join"),
        Some(json!({ "topic_id": topic_id, "name": name })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(snapshot["stage"], "brainstorm");
    (run_id, topic_id.to_string())
}

/// Poll a run until it reaches the given stage.
async fn wait_for_stage(app: &Router, run_id: &str, stage: &str) -> Value {
    for _ in 0..100 {
        let (_, snapshot) = send(app, "GET", &format!("/api/runs/{run_id}"), None).await;
        if snapshot["stage"] == stage {
            return snapshot;
        }
        tokio::time::sleep(Duration::from_millis(25)).await;
    }
    panic!("run {run_id} never reached stage {stage}");
}

#[tokio::test]
async fn health_returns_ok() {
    let app = build_router(test_state().await);
    let (status, body) = send(&app, "GET", "/health", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "ok");
    assert_eq!(body["service"], "plenum-ds");
}

#[tokio::test]
async fn topic_create_and_fetch() {
    let app = build_router(test_state().await);
    let (status, topic) = send(&app, "POST", "/api/topics", Some(topic_draft())).await;
    assert_eq!(status, StatusCode::OK);
    let guid = topic["guid"].as_str().unwrap();
    assert_eq!(topic["title"], "Community energy");
    assert_eq!(topic["status"], "upcoming");

    let (status, fetched) = send(&app, "GET", &format!("/api/topics/{guid}"), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(fetched["guid"], guid);

    let (status, list) = send(&app, "GET", "/api/topics", None).await;
    assert_eq!(status, StatusCode::OK);
    let titles: Vec<&str> = list
        .as_array()
        .unwrap()
        .iter()
        .map(|t| t["title"].as_str().unwrap())
        .collect();
    assert!(titles.contains(&"Community energy"));
}

#[tokio::test]
async fn new_topics_appear_in_the_upcoming_directory() {
    let app = build_router(test_state().await);
    let (_, topic) = send(&app, "POST", "/api/topics", Some(topic_draft())).await;
    let guid = topic["guid"].as_str().unwrap();

    // The default listing and the explicit upcoming filter both show it.
    for path in ["/api/topics", "/api/topics?status=upcoming"] {
        let (status, list) = send(&app, "GET", path, None).await;
        assert_eq!(status, StatusCode::OK);
        assert!(
            list.as_array()
                .unwrap()
                .iter()
                .any(|t| t["guid"] == guid && t["status"] == "upcoming"),
            "{path} missing the new topic"
        );
    }

    let (_, other) = send(&app, "GET", "/api/topics?status=completed", None).await;
    assert!(other.as_array().unwrap().iter().all(|t| t["guid"] != guid));
}

#[tokio::test]
async fn topic_validation_names_missing_fields() {
    let app = build_router(test_state().await);
    let mut draft = topic_draft();
    draft["goal"] = json!("  ");
    draft.as_object_mut().unwrap().remove("title");
    let (status, body) = send(&app, "POST", "/api/topics", Some(draft)).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    let message = body["error"]["message"].as_str().unwrap();
    assert!(message.contains("goal"));
    assert!(message.contains("title"));
}

#[tokio::test]
async fn topic_update_changes_fields() {
    let app = build_router(test_state().await);
    let (_, topic) = send(&app, "POST", "/api/topics", Some(topic_draft())).await;
    let guid = topic["guid"].as_str().unwrap();
    let mut draft = topic_draft();
    draft["title"] = json!("District heating");
    let (status, updated) = send(&app, "PUT", &format!("/api/topics/{guid}"), Some(draft)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(updated["title"], "District heating");
    assert_eq!(updated["guid"], guid);
}

#[tokio::test]
async fn unknown_topic_is_404() {
    let app = build_router(test_state().await);
    let (status, _) = send(&app, "GET", "/api/topics/nope", None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn host_path_reaches_brainstorm() {
    let app = build_router(test_state().await);
    let (_, run) = send(&app, "POST", "/api/runs", None).await;
    let run_id = run["run_id"].as_str().unwrap().to_string();
    assert_eq!(run["stage"], "role_select");

    let (status, snapshot) = send(
        &app,
        "POST",
        &format!("/api/runs/{run_id}/choose-host"),
        Some(json!({})),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(snapshot["stage"], "host_setup");
    assert_eq!(snapshot["role"], "host");

    let (status, snapshot) = send(
        &app,
        "POST",
        &format!("/api/runs/{run_id}/topic"),
        Some(topic_draft()),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(snapshot["stage"], "role_select");
    let topic_id = snapshot["topic"]["guid"].as_str().unwrap().to_string();

    let (status, snapshot) = send(
        &app,
        "POST",
        &format!("/api/runs/{run_id}/join"),
        Some(json!({ "topic_id": topic_id, "name": "Ada" })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(snapshot["stage"], "brainstorm");
    assert_eq!(snapshot["remaining_seconds"], 600);
    assert_eq!(snapshot["countdown_active"], true);
    assert_eq!(snapshot["participant"]["name"], "Ada");
    assert_eq!(snapshot["participant"]["role"], "host");
}

#[tokio::test]
async fn guest_join_outside_window_is_forbidden() {
    let app = build_router(test_state().await);
    let today = chrono::Utc::now().date_naive();
    let mut draft = topic_draft();
    draft["start_date"] = json!((today - chrono::Days::new(10)).format("%Y-%m-%d").to_string());
    draft["end_date"] = json!((today - chrono::Days::new(5)).format("%Y-%m-%d").to_string());
    let (_, topic) = send(&app, "POST", "/api/topics", Some(draft)).await;
    let topic_id = topic["guid"].as_str().unwrap();

    let (_, run) = send(&app, "POST", "/api/runs", None).await;
    let run_id = run["run_id"].as_str().unwrap();
    send(&app, "POST", &format!("/api/runs/{run_id}/choose-guest"), None).await;
    let (status, body) = send(
        &app,
        "POST",
        &format!("/api/runs/{run_id}/join"),
        Some(json!({ "topic_id": topic_id, "name": "Ben" })),
    )
    .await;
    assert_eq!(status, StatusCode::FORBIDDEN);
    assert_eq!(body["error"]["code"], "FORBIDDEN");
}

#[tokio::test]
async fn join_requires_display_name() {
    let app = build_router(test_state().await);
    let (_, topic) = send(&app, "POST", "/api/topics", Some(topic_draft())).await;
    let topic_id = topic["guid"].as_str().unwrap();
    let (_, run) = send(&app, "POST", "/api/runs", None).await;
    let run_id = run["run_id"].as_str().unwrap();
    send(&app, "POST", &format!("/api/runs/{run_id}/choose-guest"), None).await;
    let (status, _) = send(
        &app,
        "POST",
        &format!("/api/runs/{run_id}/join"),
        Some(json!({ "topic_id": topic_id, "name": "   " })),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn join_survives_participant_write_failure() {
    let state = test_state().await;
    let app = build_router(state.clone());
    let (_, topic) = send(&app, "POST", "/api/topics", Some(topic_draft())).await;
    let topic_id = topic["guid"].as_str().unwrap();
    let (_, run) = send(&app, "POST", "/api/runs", None).await;
    let run_id = run["run_id"].as_str().unwrap();
    send(&app, "POST", &format!("/api/runs/{run_id}/choose-guest"), None).await;

    // Break participant persistence; the join keeps its in-memory state.
    sqlx::query("DROP TABLE participants")
        .execute(&state.db)
        .await
        .unwrap();

    let (status, snapshot) = send(
        &app,
        "POST",
        &format!("/api/runs/{run_id}/join"),
        Some(json!({ "topic_id": topic_id, "name": "Ana" })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(snapshot["stage"], "brainstorm");
    assert_eq!(snapshot["participant"]["name"], "Ana");

    let (status, snapshot) = send(
        &app,
        "POST",
        &format!("/api/runs/{run_id}/ideas"),
        Some(json!({ "content": "still collecting" })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(snapshot["ideas"].as_array().unwrap().len(), 1);
}

#[tokio::test]
async fn idea_submission_echoes_locally_with_fallback_question() {
    let app = build_router(test_state().await);
    let (run_id, _) = join_fresh_run(&app, "Ana").await;

    let (status, snapshot) = send(
        &app,
        "POST",
        &format!("/api/runs/{run_id}/ideas"),
        Some(json!({ "content": "rooftop solar on every school" })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    let ideas = snapshot["ideas"].as_array().unwrap();
    assert_eq!(ideas.len(), 1);
    assert_eq!(ideas[0]["content"], "rooftop solar on every school");
    assert_eq!(ideas[0]["participant_name"], "Ana");

    // No API key configured: the fixed fallback question arrives shortly.
    tokio::time::sleep(Duration::from_millis(100)).await;
    let (_, snapshot) = send(&app, "GET", &format!("/api/runs/{run_id}"), None).await;
    let conversation = snapshot["conversation"].as_array().unwrap();
    assert_eq!(conversation.len(), 2);
    assert_eq!(conversation[0]["author"], "participant");
    assert_eq!(conversation[1]["author"], "facilitator");
    assert!(conversation[1]["content"]
        .as_str()
        .unwrap()
        .contains("interesting idea"));
}

#[tokio::test]
async fn empty_idea_is_rejected() {
    let app = build_router(test_state().await);
    let (run_id, _) = join_fresh_run(&app, "Ana").await;
    let (status, _) = send(
        &app,
        "POST",
        &format!("/api/runs/{run_id}/ideas"),
        Some(json!({ "content": "   " })),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn idea_outside_brainstorm_is_conflict() {
    let app = build_router(test_state().await);
    let (_, run) = send(&app, "POST", "/api/runs", None).await;
    let run_id = run["run_id"].as_str().unwrap();
    let (status, body) = send(
        &app,
        "POST",
        &format!("/api/runs/{run_id}/ideas"),
        Some(json!({ "content": "too early" })),
    )
    .await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(body["error"]["code"], "INVALID_STAGE");
}

#[tokio::test]
async fn ideas_fan_out_to_other_runs_on_same_topic() {
    let app = build_router(test_state().await);
    let (run_a, topic_id) = join_fresh_run(&app, "Ana").await;
    let (run_b, _) = join_run_for_topic(&app, &topic_id, "Ben").await;

    send(
        &app,
        "POST",
        &format!("/api/runs/{run_a}/ideas"),
        Some(json!({ "content": "shared battery storage" })),
    )
    .await;
    tokio::time::sleep(Duration::from_millis(100)).await;

    let (_, snapshot) = send(&app, "GET", &format!("/api/runs/{run_b}"), None).await;
    let ideas = snapshot["ideas"].as_array().unwrap();
    assert_eq!(ideas.len(), 1);
    assert_eq!(ideas[0]["content"], "shared battery storage");
    assert_eq!(ideas[0]["participant_name"], "Ana");

    // The submitter's own run records the idea exactly once (local echo,
    // feed event suppressed).
    let (_, snapshot) = send(&app, "GET", &format!("/api/runs/{run_a}"), None).await;
    assert_eq!(snapshot["ideas"].as_array().unwrap().len(), 1);
}

#[tokio::test]
async fn completion_produces_fallback_mapping() {
    let app = build_router(test_state().await);
    let (run_id, _) = join_fresh_run(&app, "Ana").await;
    for content in ["solar", "wind", "insulation"] {
        send(
            &app,
            "POST",
            &format!("/api/runs/{run_id}/ideas"),
            Some(json!({ "content": content })),
        )
        .await;
    }

    let (status, snapshot) = send(
        &app,
        "POST",
        &format!("/api/runs/{run_id}/complete"),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(snapshot["stage"], "ai_analysis");
    assert_eq!(snapshot["countdown_active"], false);

    // Repeating the completion is a harmless no-op.
    let (status, _) = send(&app, "POST", &format!("/api/runs/{run_id}/complete"), None).await;
    assert_eq!(status, StatusCode::OK);

    let snapshot = wait_for_stage(&app, &run_id, "mapping").await;
    assert_eq!(snapshot["mapping_fallback"], true);
    let clusters = snapshot["mapping"]["clusters"].as_array().unwrap();
    assert_eq!(clusters.len(), 1);
    assert_eq!(clusters[0]["ideas"], json!([0, 1, 2]));
    assert_eq!(snapshot["mapping"]["key_points"].as_array().unwrap().len(), 3);
    assert_eq!(
        snapshot["resolved_clusters"][0]["ideas"],
        json!(["solar", "wind", "insulation"])
    );

    // Still idempotent after the mapping is shown.
    let (status, snapshot) = send(&app, "POST", &format!("/api/runs/{run_id}/complete"), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(snapshot["stage"], "mapping");
}

#[tokio::test]
async fn discussion_transcript_and_remap() {
    let app = build_router(test_state().await);
    let (run_id, _) = join_fresh_run(&app, "Ana").await;
    for content in ["solar", "wind"] {
        send(
            &app,
            "POST",
            &format!("/api/runs/{run_id}/ideas"),
            Some(json!({ "content": content })),
        )
        .await;
    }
    send(&app, "POST", &format!("/api/runs/{run_id}/complete"), None).await;
    wait_for_stage(&app, &run_id, "mapping").await;

    let (status, snapshot) = send(
        &app,
        "POST",
        &format!("/api/runs/{run_id}/discussion"),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(snapshot["stage"], "discussion");
    assert_eq!(snapshot["transcript"], "");

    for chunk in ["we should start with schools", "storage is the bottleneck"] {
        let (status, _) = send(
            &app,
            "POST",
            &format!("/api/runs/{run_id}/transcript"),
            Some(json!({ "text": chunk })),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
    }
    let (_, snapshot) = send(&app, "GET", &format!("/api/runs/{run_id}"), None).await;
    assert_eq!(
        snapshot["transcript"],
        "we should start with schools storage is the bottleneck"
    );

    let previous_clusters = snapshot["mapping"]["clusters"].clone();
    let (status, snapshot) = send(&app, "POST", &format!("/api/runs/{run_id}/remap"), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(snapshot["stage"], "ai_analysis");

    let snapshot = wait_for_stage(&app, &run_id, "remap").await;
    assert_eq!(snapshot["mapping"]["clusters"], previous_clusters);
    assert_eq!(
        snapshot["mapping"]["new_insights"].as_array().unwrap().len(),
        2
    );

    // Remap is terminal.
    let (status, _) = send(&app, "POST", &format!("/api/runs/{run_id}/remap"), None).await;
    assert_eq!(status, StatusCode::CONFLICT);
    let (status, _) = send(
        &app,
        "POST",
        &format!("/api/runs/{run_id}/transcript"),
        Some(json!({ "text": "late" })),
    )
    .await;
    assert_eq!(status, StatusCode::CONFLICT);
}

#[tokio::test]
async fn transcript_outside_discussion_is_conflict() {
    let app = build_router(test_state().await);
    let (run_id, _) = join_fresh_run(&app, "Ana").await;
    let (status, _) = send(
        &app,
        "POST",
        &format!("/api/runs/{run_id}/transcript"),
        Some(json!({ "text": "too early" })),
    )
    .await;
    assert_eq!(status, StatusCode::CONFLICT);
}

#[tokio::test]
async fn countdown_expiry_forces_analysis() {
    let app = build_router(test_state_with(1, 0).await);
    let (run_id, _) = join_fresh_run(&app, "Ana").await;
    send(
        &app,
        "POST",
        &format!("/api/runs/{run_id}/ideas"),
        Some(json!({ "content": "only idea" })),
    )
    .await;

    // One second of countdown plus the analysis hold.
    tokio::time::sleep(Duration::from_millis(1200)).await;
    let snapshot = wait_for_stage(&app, &run_id, "mapping").await;
    assert_eq!(snapshot["countdown_active"], false);
    assert_eq!(snapshot["mapping"]["clusters"][0]["ideas"], json!([0]));
}

#[tokio::test]
async fn relay_without_key_returns_fallback() {
    let app = build_router(test_state().await);
    let (status, body) = send(
        &app,
        "POST",
        "/api/ai/question",
        Some(json!({
            "topic": "Energy",
            "goal": "Priorities",
            "idea": "solar",
            "previousMessages": [{ "role": "ai", "content": "Why solar?" }],
        })),
    )
    .await;
    assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
    assert!(body["fallback"].as_str().unwrap().contains("interesting idea"));
}

#[tokio::test]
async fn deleted_run_is_gone() {
    let app = build_router(test_state().await);
    let (_, run) = send(&app, "POST", "/api/runs", None).await;
    let run_id = run["run_id"].as_str().unwrap();
    let (status, _) = send(&app, "DELETE", &format!("/api/runs/{run_id}"), None).await;
    assert_eq!(status, StatusCode::OK);
    let (status, _) = send(&app, "GET", &format!("/api/runs/{run_id}"), None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn shared_secret_guards_topic_creation() {
    let secret = 424242;
    let app = build_router(test_state_with(600, secret).await);

    let (status, _) = send(&app, "POST", "/api/topics", Some(topic_draft())).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);

    let mut payload = topic_draft();
    let now_ms = chrono::Utc::now().timestamp_millis();
    payload["timestamp"] = json!(now_ms);
    payload["hash"] = json!("0".repeat(64));
    let hash = calculate_hash(&payload, secret);
    payload["hash"] = json!(hash);
    let (status, topic) = send(&app, "POST", "/api/topics", Some(payload)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(topic["title"], "Community energy");
}
