//! Event types for the Plenum event system
//!
//! Provides the shared event definitions and EventBus used for realtime
//! fan-out. Topic-scoped events replace the hosted store's change feed:
//! every idea insert is broadcast here and interested session runs (and SSE
//! clients) pick it up without polling.

use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use uuid::Uuid;

/// Plenum event types
///
/// Events are broadcast via EventBus and serialized for SSE transmission.
/// All events carry enough context for a subscriber to filter by topic or
/// run without further lookups.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum PlenumEvent {
    /// A topic was created by a host
    TopicCreated {
        topic_id: Uuid,
        title: String,
        timestamp: chrono::DateTime<chrono::Utc>,
    },

    /// A topic was updated by its host
    TopicUpdated {
        topic_id: Uuid,
        title: String,
        timestamp: chrono::DateTime<chrono::Utc>,
    },

    /// A participant registered into a topic's session
    ParticipantJoined {
        topic_id: Uuid,
        participant_id: Uuid,
        name: String,
        role: String,
        timestamp: chrono::DateTime<chrono::Utc>,
    },

    /// An idea was persisted for a topic
    ///
    /// Carries the author's display name so feed consumers need no
    /// participant lookup. Runs suppress events whose participant_id
    /// matches their own actor (the local echo already covers it).
    IdeaSubmitted {
        topic_id: Uuid,
        idea_id: Uuid,
        participant_id: Uuid,
        participant_name: String,
        content: String,
        question_section: Option<String>,
        timestamp: chrono::DateTime<chrono::Utc>,
    },

    /// A session run moved to a new stage
    StageChanged {
        run_id: Uuid,
        topic_id: Uuid,
        old_stage: String,
        new_stage: String,
        timestamp: chrono::DateTime<chrono::Utc>,
    },

    /// Collection countdown tick (1 Hz while the countdown is active)
    CountdownTick {
        run_id: Uuid,
        remaining_seconds: u32,
    },

    /// The facilitator produced a follow-up question for a run
    FacilitatorQuestion {
        run_id: Uuid,
        topic_id: Uuid,
        content: String,
        /// True when the fixed fallback question was substituted
        fallback: bool,
        timestamp: chrono::DateTime<chrono::Utc>,
    },

    /// An analysis pass resolved and the run's mapping is ready
    MappingReady {
        run_id: Uuid,
        topic_id: Uuid,
        /// True when the deterministic fallback mapping was substituted
        fallback: bool,
        timestamp: chrono::DateTime<chrono::Utc>,
    },
}

impl PlenumEvent {
    /// Event type name used for the SSE `event:` field
    pub fn event_type(&self) -> &'static str {
        match self {
            PlenumEvent::TopicCreated { .. } => "TopicCreated",
            PlenumEvent::TopicUpdated { .. } => "TopicUpdated",
            PlenumEvent::ParticipantJoined { .. } => "ParticipantJoined",
            PlenumEvent::IdeaSubmitted { .. } => "IdeaSubmitted",
            PlenumEvent::StageChanged { .. } => "StageChanged",
            PlenumEvent::CountdownTick { .. } => "CountdownTick",
            PlenumEvent::FacilitatorQuestion { .. } => "FacilitatorQuestion",
            PlenumEvent::MappingReady { .. } => "MappingReady",
        }
    }

    /// Topic this event belongs to, if topic-scoped
    pub fn topic_id(&self) -> Option<Uuid> {
        match self {
            PlenumEvent::TopicCreated { topic_id, .. }
            | PlenumEvent::TopicUpdated { topic_id, .. }
            | PlenumEvent::ParticipantJoined { topic_id, .. }
            | PlenumEvent::IdeaSubmitted { topic_id, .. }
            | PlenumEvent::StageChanged { topic_id, .. }
            | PlenumEvent::FacilitatorQuestion { topic_id, .. }
            | PlenumEvent::MappingReady { topic_id, .. } => Some(*topic_id),
            PlenumEvent::CountdownTick { .. } => None,
        }
    }

    /// Run this event belongs to, if run-scoped
    pub fn run_id(&self) -> Option<Uuid> {
        match self {
            PlenumEvent::StageChanged { run_id, .. }
            | PlenumEvent::CountdownTick { run_id, .. }
            | PlenumEvent::FacilitatorQuestion { run_id, .. }
            | PlenumEvent::MappingReady { run_id, .. } => Some(*run_id),
            _ => None,
        }
    }
}

/// Event bus for broadcasting events to all subscribers
///
/// Uses tokio::broadcast internally: multiple producers, multiple
/// consumers, lagging receivers drop the oldest events.
#[derive(Clone)]
pub struct EventBus {
    tx: broadcast::Sender<PlenumEvent>,
    capacity: usize,
}

impl EventBus {
    /// Create a new EventBus with the given channel capacity
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        Self { tx, capacity }
    }

    /// Subscribe to all future events
    pub fn subscribe(&self) -> broadcast::Receiver<PlenumEvent> {
        self.tx.subscribe()
    }

    /// Emit an event to all subscribers
    ///
    /// Returns `Ok(subscriber_count)`, or `Err` if no subscribers are
    /// listening.
    #[allow(clippy::result_large_err)]
    pub fn emit(
        &self,
        event: PlenumEvent,
    ) -> Result<usize, broadcast::error::SendError<PlenumEvent>> {
        self.tx.send(event)
    }

    /// Emit an event, ignoring whether any subscriber is listening
    pub fn emit_lossy(&self, event: PlenumEvent) {
        let _ = self.tx.send(event);
    }

    /// Number of active subscribers
    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }

    /// Configured channel capacity
    pub fn capacity(&self) -> usize {
        self.capacity
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn subscriber_receives_emitted_event() {
        let bus = EventBus::new(16);
        let mut rx = bus.subscribe();

        let topic_id = Uuid::new_v4();
        bus.emit_lossy(PlenumEvent::TopicCreated {
            topic_id,
            title: "Community energy".to_string(),
            timestamp: chrono::Utc::now(),
        });

        let event = rx.recv().await.unwrap();
        assert_eq!(event.event_type(), "TopicCreated");
        assert_eq!(event.topic_id(), Some(topic_id));
    }

    #[test]
    fn emit_without_subscribers_is_err_but_lossy_is_silent() {
        let bus = EventBus::new(16);
        let event = PlenumEvent::CountdownTick {
            run_id: Uuid::new_v4(),
            remaining_seconds: 599,
        };
        assert!(bus.emit(event.clone()).is_err());
        bus.emit_lossy(event);
    }
}
