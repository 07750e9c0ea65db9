//! Session stage machine.
//!
//! Every participant session moves through a fixed set of stages, from role
//! selection through idea collection to the mapped result and the optional
//! discussion/remap round. Transitions are driven exclusively by
//! [`StageEvent`]s through [`Stage::apply`]; handlers never assign stages
//! directly, so every legal path is visible in one place.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Which analysis round is running while a session sits in `AiAnalysis`.
///
/// The initial round lands in `Mapping`; the round triggered from the
/// discussion lands in `Remap`. Carrying the round inside the stage means a
/// remap result can never be produced without having passed through the
/// discussion first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AnalysisRound {
    Initial,
    Remap,
}

/// Stage of a single participant session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "stage")]
pub enum Stage {
    /// Entry stage: the participant picks host or guest.
    RoleSelect,
    /// Host is composing or editing a topic.
    HostSetup,
    /// Guest is browsing the topic directory.
    GuestSelect,
    /// Idea collection is running (countdown active).
    Brainstorm,
    /// An analysis request is in flight.
    AiAnalysis { round: AnalysisRound },
    /// Initial cluster mapping is on display.
    Mapping,
    /// Live discussion with transcript capture.
    Discussion,
    /// Final stage: re-clustered mapping with discussion insights.
    Remap,
}

impl Stage {
    pub fn as_str(&self) -> &'static str {
        match self {
            Stage::RoleSelect => "role_select",
            Stage::HostSetup => "host_setup",
            Stage::GuestSelect => "guest_select",
            Stage::Brainstorm => "brainstorm",
            Stage::AiAnalysis { .. } => "ai_analysis",
            Stage::Mapping => "mapping",
            Stage::Discussion => "discussion",
            Stage::Remap => "remap",
        }
    }

    /// Remap is the end of the line; no event leaves it.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Stage::Remap)
    }

    /// Apply a transition event, returning the next stage.
    ///
    /// Any pairing not listed here is rejected with
    /// [`StageError::IllegalTransition`].
    pub fn apply(self, event: StageEvent) -> Result<Stage, StageError> {
        use Stage::*;
        use StageEvent::*;
        let next = match (self, event) {
            (RoleSelect, ChooseHost) => HostSetup,
            (RoleSelect, ChooseGuest) => GuestSelect,
            // Saving a topic drops the host back to role selection, from
            // where they enter the brainstorm like any other participant.
            (HostSetup, TopicSaved) => RoleSelect,
            (HostSetup, Cancel) => RoleSelect,
            (GuestSelect, Cancel) => RoleSelect,
            (RoleSelect, Joined) | (GuestSelect, Joined) => Brainstorm,
            (Brainstorm, CollectionComplete) => AiAnalysis {
                round: AnalysisRound::Initial,
            },
            (AiAnalysis { round }, AnalysisResolved) => match round {
                AnalysisRound::Initial => Mapping,
                AnalysisRound::Remap => Remap,
            },
            (Mapping, StartDiscussion) => Discussion,
            (Discussion, RequestRemap) => AiAnalysis {
                round: AnalysisRound::Remap,
            },
            (from, event) => return Err(StageError::IllegalTransition { from, event }),
        };
        Ok(next)
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Events that drive the stage machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StageEvent {
    ChooseHost,
    ChooseGuest,
    /// Host saved a topic draft.
    TopicSaved,
    /// Back out of host setup or the guest directory.
    Cancel,
    /// Participant entered the brainstorm for a topic.
    Joined,
    /// Collection ended (timer expiry or explicit completion).
    CollectionComplete,
    /// The in-flight analysis produced a mapping (or fallback).
    AnalysisResolved,
    StartDiscussion,
    RequestRemap,
}

impl StageEvent {
    pub fn as_str(&self) -> &'static str {
        match self {
            StageEvent::ChooseHost => "choose_host",
            StageEvent::ChooseGuest => "choose_guest",
            StageEvent::TopicSaved => "topic_saved",
            StageEvent::Cancel => "cancel",
            StageEvent::Joined => "joined",
            StageEvent::CollectionComplete => "collection_complete",
            StageEvent::AnalysisResolved => "analysis_resolved",
            StageEvent::StartDiscussion => "start_discussion",
            StageEvent::RequestRemap => "request_remap",
        }
    }
}

#[derive(Debug, Clone, thiserror::Error, PartialEq, Eq)]
pub enum StageError {
    #[error("event {event:?} is not valid in stage {from}")]
    IllegalTransition { from: Stage, event: StageEvent },
    /// An action that does not move the machine was attempted outside the
    /// stage it belongs to (submitting ideas outside the brainstorm,
    /// appending transcript outside the discussion).
    #[error("{action} requires stage {required}, session is in {actual}")]
    WrongStage {
        action: &'static str,
        required: &'static str,
        actual: Stage,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn full_host_path() {
        let mut stage = Stage::RoleSelect;
        for event in [
            StageEvent::ChooseHost,
            StageEvent::TopicSaved,
            StageEvent::Joined,
            StageEvent::CollectionComplete,
            StageEvent::AnalysisResolved,
            StageEvent::StartDiscussion,
            StageEvent::RequestRemap,
            StageEvent::AnalysisResolved,
        ] {
            stage = stage.apply(event).unwrap();
        }
        assert_eq!(stage, Stage::Remap);
        assert!(stage.is_terminal());
    }

    #[test]
    fn guest_path_reaches_mapping() {
        let stage = Stage::RoleSelect
            .apply(StageEvent::ChooseGuest)
            .unwrap()
            .apply(StageEvent::Joined)
            .unwrap()
            .apply(StageEvent::CollectionComplete)
            .unwrap()
            .apply(StageEvent::AnalysisResolved)
            .unwrap();
        assert_eq!(stage, Stage::Mapping);
    }

    #[test]
    fn analysis_round_decides_destination() {
        let initial = Stage::AiAnalysis {
            round: AnalysisRound::Initial,
        };
        let remap = Stage::AiAnalysis {
            round: AnalysisRound::Remap,
        };
        assert_eq!(initial.apply(StageEvent::AnalysisResolved).unwrap(), Stage::Mapping);
        assert_eq!(remap.apply(StageEvent::AnalysisResolved).unwrap(), Stage::Remap);
    }

    #[test]
    fn remap_is_terminal() {
        for event in [
            StageEvent::Joined,
            StageEvent::CollectionComplete,
            StageEvent::RequestRemap,
            StageEvent::AnalysisResolved,
        ] {
            assert!(Stage::Remap.apply(event).is_err());
        }
    }

    #[test]
    fn cannot_skip_to_discussion() {
        let err = Stage::Brainstorm.apply(StageEvent::StartDiscussion).unwrap_err();
        assert_eq!(
            err,
            StageError::IllegalTransition {
                from: Stage::Brainstorm,
                event: StageEvent::StartDiscussion,
            }
        );
    }

    #[test]
    fn cancel_returns_to_role_select() {
        let stage = Stage::RoleSelect.apply(StageEvent::ChooseGuest).unwrap();
        assert_eq!(stage.apply(StageEvent::Cancel).unwrap(), Stage::RoleSelect);
    }

    #[test]
    fn stage_names_are_stable() {
        assert_eq!(Stage::RoleSelect.as_str(), "role_select");
        assert_eq!(
            Stage::AiAnalysis {
                round: AnalysisRound::Remap
            }
            .as_str(),
            "ai_analysis"
        );
        assert_eq!(Stage::Remap.as_str(), "remap");
    }
}
