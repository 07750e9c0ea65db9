//! Per-session state.
//!
//! A session run is the server-side aggregate for one participant's pass
//! through the stages. It owns the conversation log, the live idea list,
//! the frozen analysis snapshot and the mapping result. The run is
//! in-memory only; ideas and participants are persisted separately, the
//! rest of the session is as ephemeral as the browser tab it mirrors.

use crate::ai::analysis::{Mapping, ResolvedCluster};
use crate::session::stage::Stage;
use chrono::{DateTime, Utc};
use plenum_common::db::models::{Participant, Topic};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Host,
    Guest,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::Host => "host",
            Role::Guest => "guest",
        }
    }
}

/// Who authored a conversation turn.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TurnAuthor {
    Participant,
    Facilitator,
}

/// One entry in the brainstorm conversation log.
#[derive(Debug, Clone, Serialize)]
pub struct ChatTurn {
    pub author: TurnAuthor,
    pub author_name: String,
    pub content: String,
    pub timestamp: DateTime<Utc>,
}

/// One idea as the run sees it (own submissions plus the live feed).
#[derive(Debug, Clone, Serialize)]
pub struct IdeaEntry {
    pub participant_id: Uuid,
    pub participant_name: String,
    pub content: String,
    pub question_section: Option<String>,
}

/// Mutable state of one session run. Lives behind the engine's lock.
#[derive(Debug)]
pub struct SessionRun {
    pub run_id: Uuid,
    pub stage: Stage,
    pub role: Option<Role>,
    pub topic: Option<Topic>,
    pub participant: Option<Participant>,
    /// Ideas visible to this run, in arrival order.
    pub ideas: Vec<IdeaEntry>,
    pub conversation: Vec<ChatTurn>,
    pub remaining_seconds: u32,
    pub countdown_active: bool,
    /// Idea contents frozen at analysis dispatch; cluster indices refer
    /// to this list, never to `ideas`.
    pub analysis_ideas: Vec<String>,
    pub mapping: Option<Mapping>,
    /// True when the current mapping is the deterministic fallback.
    pub mapping_fallback: bool,
    pub transcript: String,
    pub(crate) analysis_inflight: bool,
}

impl SessionRun {
    pub fn new(run_id: Uuid) -> Self {
        Self {
            run_id,
            stage: Stage::RoleSelect,
            role: None,
            topic: None,
            participant: None,
            ideas: Vec::new(),
            conversation: Vec::new(),
            remaining_seconds: 0,
            countdown_active: false,
            analysis_ideas: Vec::new(),
            mapping: None,
            mapping_fallback: false,
            transcript: String::new(),
            analysis_inflight: false,
        }
    }

    pub fn snapshot(&self) -> RunSnapshot {
        let resolved_clusters = match &self.mapping {
            Some(mapping) => mapping.resolve(&self.analysis_ideas),
            None => Vec::new(),
        };
        RunSnapshot {
            run_id: self.run_id,
            stage: self.stage.as_str().to_string(),
            role: self.role,
            topic: self.topic.clone(),
            participant: self.participant.clone(),
            ideas: self.ideas.clone(),
            conversation: self.conversation.clone(),
            remaining_seconds: self.remaining_seconds,
            countdown_active: self.countdown_active,
            analysis_ideas: self.analysis_ideas.clone(),
            mapping: self.mapping.clone(),
            resolved_clusters,
            mapping_fallback: self.mapping_fallback,
            transcript: self.transcript.clone(),
        }
    }
}

/// Serializable view of a run, returned by the state endpoint.
#[derive(Debug, Clone, Serialize)]
pub struct RunSnapshot {
    pub run_id: Uuid,
    pub stage: String,
    pub role: Option<Role>,
    pub topic: Option<Topic>,
    pub participant: Option<Participant>,
    pub ideas: Vec<IdeaEntry>,
    pub conversation: Vec<ChatTurn>,
    pub remaining_seconds: u32,
    pub countdown_active: bool,
    pub analysis_ideas: Vec<String>,
    pub mapping: Option<Mapping>,
    /// Clusters with indices resolved against `analysis_ideas`.
    pub resolved_clusters: Vec<ResolvedCluster>,
    pub mapping_fallback: bool,
    pub transcript: String,
}
