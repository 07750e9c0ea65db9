//! Session engine: drives one run through the stage machine.
//!
//! The engine owns the run state behind a lock, plus the two background
//! tasks scoped to the brainstorm stage: the countdown ticker and the idea
//! feed intake. Both tasks check the stage on every step and stop
//! themselves once the run has moved on, so a stale tick or a late feed
//! event can never touch a post-brainstorm run.

use crate::ai::analysis::{fallback_mapping, fallback_remap, Mapping};
use crate::ai::facilitator::{HistoryTurn, FALLBACK_QUESTION};
use crate::config::SessionSettings;
use crate::db;
use crate::error::{ApiError, ApiResult};
use crate::session::run::{ChatTurn, IdeaEntry, Role, RunSnapshot, SessionRun, TurnAuthor};
use crate::session::stage::{AnalysisRound, Stage, StageError, StageEvent};
use chrono::Utc;
use plenum_common::db::models::{Idea, Participant, Topic};
use plenum_common::events::{EventBus, PlenumEvent};
use serde::Deserialize;
use sqlx::SqlitePool;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::ai::analysis::AnalysisClient;
use crate::ai::facilitator::FacilitatorClient;

/// Topic fields submitted from host setup.
///
/// Every field defaults so that an absent field and a blank field both
/// reach `validate_draft`, which reports all missing fields at once.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct TopicDraft {
    /// Present when editing an existing topic.
    pub topic_id: Option<String>,
    pub title: String,
    pub description: String,
    pub goal: String,
    pub question1: String,
    pub question2: String,
    pub host_name: String,
    pub start_date: Option<String>,
    pub end_date: Option<String>,
    pub reference_doc_name: Option<String>,
    pub reference_doc_url: Option<String>,
    pub meeting_url: Option<String>,
}

#[derive(Default)]
struct RunTasks {
    ticker: Option<JoinHandle<()>>,
    feed: Option<JoinHandle<()>>,
}

pub struct SessionEngine {
    pub run_id: Uuid,
    db: SqlitePool,
    bus: EventBus,
    facilitator: Option<Arc<FacilitatorClient>>,
    analyst: Option<Arc<AnalysisClient>>,
    settings: SessionSettings,
    state: Mutex<SessionRun>,
    tasks: Mutex<RunTasks>,
}

impl SessionEngine {
    pub fn new(
        run_id: Uuid,
        db: SqlitePool,
        bus: EventBus,
        facilitator: Option<Arc<FacilitatorClient>>,
        analyst: Option<Arc<AnalysisClient>>,
        settings: SessionSettings,
    ) -> Arc<Self> {
        Arc::new(Self {
            run_id,
            db,
            bus,
            facilitator,
            analyst,
            settings,
            state: Mutex::new(SessionRun::new(run_id)),
            tasks: Mutex::new(RunTasks::default()),
        })
    }

    pub async fn snapshot(&self) -> RunSnapshot {
        self.state.lock().await.snapshot()
    }

    /// Apply a plain navigation event (role choice, cancel).
    pub async fn apply_event(&self, event: StageEvent) -> ApiResult<RunSnapshot> {
        let mut run = self.state.lock().await;
        let old = run.stage;
        run.stage = old.apply(event)?;
        match event {
            StageEvent::ChooseHost => run.role = Some(Role::Host),
            StageEvent::ChooseGuest => run.role = Some(Role::Guest),
            _ => {}
        }
        self.emit_stage_changed(&run, old);
        Ok(run.snapshot())
    }

    /// Save the host's topic draft and return to role selection.
    pub async fn save_topic(&self, draft: TopicDraft) -> ApiResult<RunSnapshot> {
        validate_draft(&draft)?;
        // Reject before touching the database; the transition below must
        // not be able to fail once the topic row exists.
        {
            let run = self.state.lock().await;
            run.stage.apply(StageEvent::TopicSaved)?;
        }

        let topic = match &draft.topic_id {
            Some(guid) => {
                let existing = db::topics::get(&self.db, guid)
                    .await?
                    .ok_or_else(|| ApiError::NotFound(format!("topic {guid} not found")))?;
                let topic = apply_draft(existing, &draft);
                db::topics::update(&self.db, &topic).await?;
                self.bus.emit_lossy(PlenumEvent::TopicUpdated {
                    topic_id: guid_uuid(&topic.guid),
                    title: topic.title.clone(),
                    timestamp: Utc::now(),
                });
                topic
            }
            None => {
                let topic = apply_draft(new_topic(), &draft);
                db::topics::insert(&self.db, &topic).await?;
                self.bus.emit_lossy(PlenumEvent::TopicCreated {
                    topic_id: guid_uuid(&topic.guid),
                    title: topic.title.clone(),
                    timestamp: Utc::now(),
                });
                topic
            }
        };

        let mut run = self.state.lock().await;
        let old = run.stage;
        run.stage = old.apply(StageEvent::TopicSaved)?;
        run.topic = Some(topic);
        self.emit_stage_changed(&run, old);
        info!(run_id = %self.run_id, "topic draft saved");
        Ok(run.snapshot())
    }

    /// Enter the brainstorm for a topic.
    ///
    /// Guests may only join while the topic's scheduling window contains
    /// today. Starts the countdown ticker and the idea feed intake.
    pub async fn join(self: &Arc<Self>, topic_id: &str, name: &str) -> ApiResult<RunSnapshot> {
        let name = name.trim();
        if name.is_empty() {
            return Err(ApiError::BadRequest("display name must not be empty".to_string()));
        }
        let topic = db::topics::get(&self.db, topic_id)
            .await?
            .ok_or_else(|| ApiError::NotFound(format!("topic {topic_id} not found")))?;

        let participant_uuid = Uuid::new_v4();
        let snapshot = {
            let mut run = self.state.lock().await;
            let role = run.role.unwrap_or(Role::Guest);
            if role == Role::Guest && !topic.is_open_on(Utc::now().date_naive()) {
                return Err(ApiError::Forbidden(
                    "topic is not open for participation today".to_string(),
                ));
            }
            let old = run.stage;
            run.stage = old.apply(StageEvent::Joined)?;

            let participant = Participant {
                guid: participant_uuid.to_string(),
                topic_id: topic.guid.clone(),
                name: name.to_string(),
                role: role.as_str().to_string(),
                created_at: Utc::now().to_rfc3339(),
            };
            // The join stands even when the participant row cannot be
            // written; the run keeps its in-memory participant.
            match db::participants::insert(&self.db, &participant).await {
                Ok(()) => self.bus.emit_lossy(PlenumEvent::ParticipantJoined {
                    topic_id: guid_uuid(&topic.guid),
                    participant_id: participant_uuid,
                    name: participant.name.clone(),
                    role: participant.role.clone(),
                    timestamp: Utc::now(),
                }),
                Err(e) => {
                    warn!(run_id = %self.run_id, error = %e, "failed to persist participant")
                }
            }

            run.role = Some(role);
            run.topic = Some(topic.clone());
            run.participant = Some(participant);
            run.remaining_seconds = self.settings.collection_seconds;
            run.countdown_active = true;
            self.emit_stage_changed(&run, old);
            run.snapshot()
        };

        let mut tasks = self.tasks.lock().await;
        tasks.ticker = Some(self.spawn_ticker());
        tasks.feed = Some(self.spawn_feed_intake(guid_uuid(&topic.guid), participant_uuid));
        info!(run_id = %self.run_id, topic_id = %topic.guid, "joined brainstorm");
        Ok(snapshot)
    }

    /// Record an idea: local echo first, then persistence and broadcast,
    /// then the facilitator follow-up in the background.
    pub async fn submit_idea(
        self: &Arc<Self>,
        content: &str,
        question_section: Option<String>,
    ) -> ApiResult<RunSnapshot> {
        let content = content.trim().to_string();
        if content.is_empty() {
            return Err(ApiError::BadRequest("idea content must not be empty".to_string()));
        }

        let (topic, participant, history, snapshot) = {
            let mut run = self.state.lock().await;
            require_stage(&run, Stage::Brainstorm, "submitting an idea")?;
            let topic = run
                .topic
                .clone()
                .ok_or_else(|| ApiError::Internal("run has no topic".to_string()))?;
            let participant = run
                .participant
                .clone()
                .ok_or_else(|| ApiError::Internal("run has no participant".to_string()))?;
            let history: Vec<HistoryTurn> = run
                .conversation
                .iter()
                .map(|turn| HistoryTurn {
                    role: match turn.author {
                        TurnAuthor::Participant => "user".to_string(),
                        TurnAuthor::Facilitator => "assistant".to_string(),
                    },
                    content: turn.content.clone(),
                })
                .collect();

            // Local echo: the submitter sees their idea immediately,
            // independent of persistence or fan-out.
            run.ideas.push(IdeaEntry {
                participant_id: guid_uuid(&participant.guid),
                participant_name: participant.name.clone(),
                content: content.clone(),
                question_section: question_section.clone(),
            });
            run.conversation.push(ChatTurn {
                author: TurnAuthor::Participant,
                author_name: participant.name.clone(),
                content: content.clone(),
                timestamp: Utc::now(),
            });
            let snapshot = run.snapshot();
            (topic, participant, history, snapshot)
        };

        let idea_uuid = Uuid::new_v4();
        let idea = Idea {
            guid: idea_uuid.to_string(),
            topic_id: topic.guid.clone(),
            participant_id: participant.guid.clone(),
            content: content.clone(),
            question_section: question_section.clone(),
            seq: 0,
            created_at: Utc::now().to_rfc3339(),
        };
        match db::ideas::insert(&self.db, &idea).await {
            Ok(()) => self.bus.emit_lossy(PlenumEvent::IdeaSubmitted {
                topic_id: guid_uuid(&topic.guid),
                idea_id: idea_uuid,
                participant_id: guid_uuid(&participant.guid),
                participant_name: participant.name.clone(),
                content: content.clone(),
                question_section: question_section.clone(),
                timestamp: Utc::now(),
            }),
            // The local echo stands even when persistence fails; other
            // participants just will not see this idea.
            Err(e) => warn!(run_id = %self.run_id, error = %e, "failed to persist idea"),
        }

        let engine = Arc::clone(self);
        tokio::spawn(async move {
            engine.run_facilitator(topic, content, history).await;
        });

        Ok(snapshot)
    }

    async fn run_facilitator(&self, topic: Topic, idea: String, history: Vec<HistoryTurn>) {
        let (question, fallback) = match &self.facilitator {
            Some(client) => match client.ask_follow_up(&topic, &idea, &history).await {
                Ok(question) => (question, false),
                Err(e) => {
                    warn!(run_id = %self.run_id, error = %e, "facilitator request failed");
                    (FALLBACK_QUESTION.to_string(), true)
                }
            },
            None => (FALLBACK_QUESTION.to_string(), true),
        };

        let mut run = self.state.lock().await;
        // A question landing after the brainstorm ended is dropped.
        if run.stage != Stage::Brainstorm {
            debug!(run_id = %self.run_id, "discarding facilitator question, stage moved on");
            return;
        }
        run.conversation.push(ChatTurn {
            author: TurnAuthor::Facilitator,
            author_name: "Facilitator".to_string(),
            content: question.clone(),
            timestamp: Utc::now(),
        });
        drop(run);

        self.bus.emit_lossy(PlenumEvent::FacilitatorQuestion {
            run_id: self.run_id,
            topic_id: guid_uuid(&topic.guid),
            content: question,
            fallback,
            timestamp: Utc::now(),
        });
    }

    /// End idea collection and dispatch the initial analysis.
    ///
    /// Idempotent: calling again while the analysis runs, or once the
    /// mapping is shown, changes nothing and dispatches nothing.
    pub async fn complete_collection(self: &Arc<Self>) -> ApiResult<RunSnapshot> {
        let dispatch = {
            let mut run = self.state.lock().await;
            match run.stage {
                Stage::Brainstorm => {
                    let old = run.stage;
                    run.stage = old.apply(StageEvent::CollectionComplete)?;
                    run.countdown_active = false;
                    run.analysis_inflight = true;
                    run.analysis_ideas = run.ideas.iter().map(|i| i.content.clone()).collect();
                    self.emit_stage_changed(&run, old);
                    let topic = run.topic.clone();
                    Some((run.analysis_ideas.clone(), topic))
                }
                Stage::AiAnalysis { .. } | Stage::Mapping => None,
                other => {
                    return Err(StageError::IllegalTransition {
                        from: other,
                        event: StageEvent::CollectionComplete,
                    }
                    .into())
                }
            }
        };

        if let Some((ideas, topic)) = dispatch {
            // The snapshot is frozen; stop ingesting the live feed.
            if let Some(feed) = self.tasks.lock().await.feed.take() {
                feed.abort();
            }
            let engine = Arc::clone(self);
            tokio::spawn(async move {
                engine
                    .run_analysis(AnalysisRound::Initial, topic, ideas, None, String::new())
                    .await;
            });
        }
        Ok(self.snapshot().await)
    }

    /// Move from the mapping to the live discussion. The transcript starts
    /// empty on every entry.
    pub async fn start_discussion(&self) -> ApiResult<RunSnapshot> {
        let mut run = self.state.lock().await;
        let old = run.stage;
        run.stage = old.apply(StageEvent::StartDiscussion)?;
        run.transcript.clear();
        self.emit_stage_changed(&run, old);
        Ok(run.snapshot())
    }

    /// Append a chunk of speech-to-text transcript.
    pub async fn append_transcript(&self, text: &str) -> ApiResult<RunSnapshot> {
        let text = text.trim();
        if text.is_empty() {
            return Err(ApiError::BadRequest("transcript chunk must not be empty".to_string()));
        }
        let mut run = self.state.lock().await;
        require_stage(&run, Stage::Discussion, "appending transcript")?;
        if !run.transcript.is_empty() {
            run.transcript.push(' ');
        }
        run.transcript.push_str(text);
        Ok(run.snapshot())
    }

    /// Dispatch the re-clustering pass over the frozen ideas plus the
    /// discussion transcript.
    pub async fn request_remap(self: &Arc<Self>) -> ApiResult<RunSnapshot> {
        let (ideas, topic, previous, transcript) = {
            let mut run = self.state.lock().await;
            let old = run.stage;
            run.stage = old.apply(StageEvent::RequestRemap)?;
            run.analysis_inflight = true;
            self.emit_stage_changed(&run, old);
            (
                run.analysis_ideas.clone(),
                run.topic.clone(),
                run.mapping.clone(),
                run.transcript.clone(),
            )
        };

        let engine = Arc::clone(self);
        tokio::spawn(async move {
            engine
                .run_analysis(AnalysisRound::Remap, topic, ideas, previous, transcript)
                .await;
        });
        Ok(self.snapshot().await)
    }

    async fn run_analysis(
        &self,
        round: AnalysisRound,
        topic: Option<Topic>,
        ideas: Vec<String>,
        previous: Option<Mapping>,
        transcript: String,
    ) {
        let title = topic.as_ref().map(|t| t.title.clone()).unwrap_or_default();
        let outcome = match (&self.analyst, round) {
            (Some(client), AnalysisRound::Initial) => client.analyze(&title, &ideas).await,
            (Some(client), AnalysisRound::Remap) => {
                let base = previous
                    .clone()
                    .unwrap_or_else(|| fallback_mapping(ideas.len()));
                client.re_analyze(&title, &ideas, &transcript, &base).await
            }
            (None, _) => {
                debug!(run_id = %self.run_id, "no analysis client, using fallback mapping");
                Err(crate::ai::analysis::AnalysisError::EmptyResponse)
            }
        };

        let (mapping, fallback) = match outcome {
            Ok(mapping) => (mapping, false),
            Err(e) => {
                if self.analyst.is_some() {
                    warn!(run_id = %self.run_id, error = %e, "analysis failed, using fallback");
                }
                match round {
                    AnalysisRound::Initial => (fallback_mapping(ideas.len()), true),
                    AnalysisRound::Remap => (fallback_remap(previous, ideas.len()), true),
                }
            }
        };

        // Brief hold so the analysis stage is visible as its own step.
        tokio::time::sleep(Duration::from_millis(self.settings.analysis_delay_ms)).await;

        let mut run = self.state.lock().await;
        if !run.analysis_inflight {
            return;
        }
        let old = run.stage;
        run.stage = match old.apply(StageEvent::AnalysisResolved) {
            Ok(stage) => stage,
            Err(e) => {
                warn!(run_id = %self.run_id, error = %e, "discarding analysis result");
                return;
            }
        };
        run.mapping = Some(mapping);
        run.mapping_fallback = fallback;
        run.analysis_inflight = false;
        self.emit_stage_changed(&run, old);
        let topic_id = run
            .topic
            .as_ref()
            .map(|t| guid_uuid(&t.guid))
            .unwrap_or(Uuid::nil());
        drop(run);

        self.bus.emit_lossy(PlenumEvent::MappingReady {
            run_id: self.run_id,
            topic_id,
            fallback,
            timestamp: Utc::now(),
        });
    }

    /// Stop background tasks. Called when the run is removed.
    pub async fn shutdown(&self) {
        let mut tasks = self.tasks.lock().await;
        if let Some(ticker) = tasks.ticker.take() {
            ticker.abort();
        }
        if let Some(feed) = tasks.feed.take() {
            feed.abort();
        }
    }

    fn spawn_ticker(self: &Arc<Self>) -> JoinHandle<()> {
        let engine = Arc::clone(self);
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(Duration::from_secs(1));
            interval.tick().await;
            loop {
                interval.tick().await;
                let expired = {
                    let mut run = engine.state.lock().await;
                    if !run.countdown_active || run.stage != Stage::Brainstorm {
                        return;
                    }
                    run.remaining_seconds = run.remaining_seconds.saturating_sub(1);
                    engine.bus.emit_lossy(PlenumEvent::CountdownTick {
                        run_id: engine.run_id,
                        remaining_seconds: run.remaining_seconds,
                    });
                    if run.remaining_seconds == 0 {
                        run.countdown_active = false;
                        true
                    } else {
                        false
                    }
                };
                if expired {
                    info!(run_id = %engine.run_id, "countdown expired, completing collection");
                    if let Err(e) = engine.complete_collection().await {
                        warn!(run_id = %engine.run_id, error = %e, "expiry completion failed");
                    }
                    return;
                }
            }
        })
    }

    fn spawn_feed_intake(self: &Arc<Self>, topic_id: Uuid, own_participant: Uuid) -> JoinHandle<()> {
        let engine = Arc::clone(self);
        let mut rx = self.bus.subscribe();
        tokio::spawn(async move {
            loop {
                let event = match rx.recv().await {
                    Ok(event) => event,
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        warn!(run_id = %engine.run_id, skipped, "feed intake lagged");
                        continue;
                    }
                    Err(broadcast::error::RecvError::Closed) => return,
                };
                let PlenumEvent::IdeaSubmitted {
                    topic_id: event_topic,
                    participant_id,
                    participant_name,
                    content,
                    question_section,
                    ..
                } = event
                else {
                    continue;
                };
                // Own submissions are covered by the local echo.
                if event_topic != topic_id || participant_id == own_participant {
                    continue;
                }
                let mut run = engine.state.lock().await;
                if run.stage != Stage::Brainstorm {
                    return;
                }
                // Redelivery guard: the same idea from the same author is
                // recorded once.
                if run
                    .ideas
                    .iter()
                    .any(|i| i.participant_id == participant_id && i.content == content)
                {
                    continue;
                }
                run.ideas.push(IdeaEntry {
                    participant_id,
                    participant_name: participant_name.clone(),
                    content: content.clone(),
                    question_section,
                });
                run.conversation.push(ChatTurn {
                    author: TurnAuthor::Participant,
                    author_name: participant_name,
                    content,
                    timestamp: Utc::now(),
                });
            }
        })
    }

    fn emit_stage_changed(&self, run: &SessionRun, old: Stage) {
        self.bus.emit_lossy(PlenumEvent::StageChanged {
            run_id: self.run_id,
            topic_id: run
                .topic
                .as_ref()
                .map(|t| guid_uuid(&t.guid))
                .unwrap_or(Uuid::nil()),
            old_stage: old.as_str().to_string(),
            new_stage: run.stage.as_str().to_string(),
            timestamp: Utc::now(),
        });
    }
}

pub(crate) fn require_stage(
    run: &SessionRun,
    required: Stage,
    action: &'static str,
) -> Result<(), StageError> {
    if run.stage == required {
        Ok(())
    } else {
        Err(StageError::WrongStage {
            action,
            required: required.as_str(),
            actual: run.stage,
        })
    }
}

pub(crate) fn guid_uuid(guid: &str) -> Uuid {
    Uuid::parse_str(guid).unwrap_or(Uuid::nil())
}

pub(crate) fn new_topic() -> Topic {
    Topic {
        guid: Uuid::new_v4().to_string(),
        title: String::new(),
        description: String::new(),
        goal: String::new(),
        question1: String::new(),
        question2: String::new(),
        host_name: String::new(),
        start_date: None,
        end_date: None,
        reference_doc_name: None,
        reference_doc_url: None,
        meeting_url: None,
        status: "upcoming".to_string(),
        created_at: Utc::now().to_rfc3339(),
    }
}

pub(crate) fn apply_draft(mut topic: Topic, draft: &TopicDraft) -> Topic {
    topic.title = draft.title.trim().to_string();
    topic.description = draft.description.trim().to_string();
    topic.goal = draft.goal.trim().to_string();
    topic.question1 = draft.question1.trim().to_string();
    topic.question2 = draft.question2.trim().to_string();
    topic.host_name = draft.host_name.trim().to_string();
    topic.start_date = draft.start_date.clone();
    topic.end_date = draft.end_date.clone();
    topic.reference_doc_name = draft.reference_doc_name.clone();
    topic.reference_doc_url = draft.reference_doc_url.clone();
    topic.meeting_url = draft.meeting_url.clone();
    topic
}

pub(crate) fn validate_draft(draft: &TopicDraft) -> ApiResult<()> {
    let mut missing = Vec::new();
    for (field, value) in [
        ("title", &draft.title),
        ("description", &draft.description),
        ("goal", &draft.goal),
        ("question1", &draft.question1),
        ("question2", &draft.question2),
        ("host_name", &draft.host_name),
    ] {
        if value.trim().is_empty() {
            missing.push(field);
        }
    }
    for (field, value) in [("start_date", &draft.start_date), ("end_date", &draft.end_date)] {
        match value {
            None => missing.push(field),
            Some(value) if value.trim().is_empty() => missing.push(field),
            Some(value) => {
                if chrono::NaiveDate::parse_from_str(value, "%Y-%m-%d").is_err() {
                    return Err(ApiError::BadRequest(format!(
                        "{field} must be a YYYY-MM-DD date"
                    )));
                }
            }
        }
    }
    if !missing.is_empty() {
        return Err(ApiError::BadRequest(format!(
            "missing required fields: {}",
            missing.join(", ")
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn draft() -> TopicDraft {
        TopicDraft {
            topic_id: None,
            title: "Title".to_string(),
            description: "Desc".to_string(),
            goal: "Goal".to_string(),
            question1: "Q1".to_string(),
            question2: "Q2".to_string(),
            host_name: "Host".to_string(),
            start_date: Some("2026-08-01".to_string()),
            end_date: Some("2026-08-31".to_string()),
            reference_doc_name: None,
            reference_doc_url: None,
            meeting_url: None,
        }
    }

    #[test]
    fn draft_validation_lists_missing_fields() {
        let mut d = draft();
        d.title = "  ".to_string();
        d.goal = String::new();
        let err = validate_draft(&d).unwrap_err();
        let message = err.to_string();
        assert!(message.contains("title"));
        assert!(message.contains("goal"));
        assert!(!message.contains("question1"));
    }

    #[test]
    fn draft_validation_rejects_bad_dates() {
        let mut d = draft();
        d.start_date = Some("August 1".to_string());
        assert!(validate_draft(&d).is_err());
    }

    #[test]
    fn draft_requires_a_scheduling_window() {
        let mut d = draft();
        d.end_date = None;
        let err = validate_draft(&d).unwrap_err();
        assert!(err.to_string().contains("end_date"));
    }

    #[test]
    fn draft_application_trims_fields() {
        let mut d = draft();
        d.title = "  Spaced out  ".to_string();
        let topic = apply_draft(new_topic(), &d);
        assert_eq!(topic.title, "Spaced out");
        assert_eq!(topic.status, "upcoming");
    }
}
