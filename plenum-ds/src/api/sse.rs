//! Server-Sent Events streams.
//!
//! Two scopes: a topic stream carrying the shared idea feed, and a run
//! stream carrying one session's stage changes, countdown ticks and
//! facilitator questions. Comment heartbeats keep idle connections from
//! being reaped by proxies.

use crate::session::engine::guid_uuid;
use crate::AppState;
use axum::extract::{Path, State};
use axum::response::sse::{Event, KeepAlive, Sse};
use axum::routing::get;
use axum::Router;
use futures::stream::Stream;
use plenum_common::events::PlenumEvent;
use plenum_common::sse::HEARTBEAT_SECS;
use std::convert::Infallible;
use std::time::Duration;
use tokio::sync::broadcast;
use uuid::Uuid;

pub fn sse_routes() -> Router<AppState> {
    Router::new()
        .route("/api/events", get(general_events))
        .route("/api/topics/:id/events", get(topic_events))
        .route("/api/runs/:id/events", get(run_events))
}

/// Heartbeat-only stream for connection monitoring.
async fn general_events() -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    plenum_common::sse::create_heartbeat_sse_stream("plenum-ds")
}

async fn topic_events(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    let topic_id = guid_uuid(&id);
    event_stream(state, move |event| event.topic_id() == Some(topic_id))
}

async fn run_events(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    event_stream(state, move |event| event.run_id() == Some(id))
}

fn event_stream(
    state: AppState,
    filter: impl Fn(&PlenumEvent) -> bool + Send + 'static,
) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    let mut rx = state.event_bus.subscribe();
    let stream = async_stream::stream! {
        yield Ok(Event::default().event("connected").data("{}"));
        let mut heartbeat = tokio::time::interval(Duration::from_secs(HEARTBEAT_SECS));
        heartbeat.tick().await;
        loop {
            tokio::select! {
                result = rx.recv() => match result {
                    Ok(event) => {
                        if !filter(&event) {
                            continue;
                        }
                        if let Ok(json) = serde_json::to_string(&event) {
                            yield Ok(Event::default().event(event.event_type()).data(json));
                        }
                    }
                    Err(broadcast::error::RecvError::Lagged(_)) => continue,
                    Err(broadcast::error::RecvError::Closed) => break,
                },
                _ = heartbeat.tick() => {
                    yield Ok(Event::default().comment("heartbeat"));
                }
            }
        }
    };
    Sse::new(stream).keep_alive(KeepAlive::default())
}
