//! Facilitator follow-up questions.
//!
//! After each submitted idea the facilitator asks one short question to
//! deepen the participant's thinking. Questions come from the Anthropic
//! messages API; when the API is unconfigured or fails, callers fall back
//! to [`FALLBACK_QUESTION`] so the conversation never stalls.

use plenum_common::db::models::Topic;
use serde::{Deserialize, Serialize};
use std::time::Duration;

pub const ANTHROPIC_BASE_URL: &str = "https://api.anthropic.com";
pub const ANTHROPIC_VERSION: &str = "2023-06-01";

/// Shown when the upstream call fails or no API key is configured.
pub const FALLBACK_QUESTION: &str =
    "That's an interesting idea. Could you tell me more about the thinking behind it?";

/// Only the most recent turns are forwarded upstream.
pub const HISTORY_WINDOW: usize = 6;

#[derive(Debug, thiserror::Error)]
pub enum FacilitatorError {
    #[error("request failed: {0}")]
    Request(#[from] reqwest::Error),
    #[error("API returned status {status}: {body}")]
    Upstream { status: u16, body: String },
    #[error("response contained no text content")]
    EmptyResponse,
}

/// One prior turn of the brainstorm conversation, as seen by the model.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HistoryTurn {
    /// `user` or `assistant`.
    pub role: String,
    pub content: String,
}

#[derive(Debug, Serialize)]
struct MessagesRequest<'a> {
    model: &'a str,
    max_tokens: u32,
    system: &'a str,
    messages: &'a [HistoryTurn],
}

#[derive(Debug, Deserialize)]
struct MessagesResponse {
    content: Vec<ContentBlock>,
}

#[derive(Debug, Deserialize)]
struct ContentBlock {
    #[serde(default)]
    text: String,
}

/// Client for the facilitator model.
pub struct FacilitatorClient {
    http: reqwest::Client,
    base_url: String,
    api_key: String,
    model: String,
    max_tokens: u32,
}

impl FacilitatorClient {
    pub fn new(api_key: String, base_url: String, model: String, max_tokens: u32) -> Self {
        Self {
            http: reqwest::Client::builder()
                .timeout(Duration::from_secs(30))
                .build()
                .unwrap_or_default(),
            base_url,
            api_key,
            model,
            max_tokens,
        }
    }

    /// Ask one follow-up question about `idea`.
    ///
    /// `history` is the conversation before the idea was submitted; only
    /// the last [`HISTORY_WINDOW`] turns are sent.
    pub async fn ask_follow_up(
        &self,
        topic: &Topic,
        idea: &str,
        history: &[HistoryTurn],
    ) -> Result<String, FacilitatorError> {
        let system = facilitator_system_prompt(topic);
        let messages = build_messages(idea, history);
        let (status, body) = self.messages_request(&system, &messages).await?;
        if status != 200 {
            return Err(FacilitatorError::Upstream {
                status,
                body: body.to_string(),
            });
        }
        let parsed: MessagesResponse =
            serde_json::from_value(body).map_err(|_| FacilitatorError::EmptyResponse)?;
        let text = parsed
            .content
            .first()
            .map(|block| block.text.trim().to_string())
            .unwrap_or_default();
        if text.is_empty() {
            return Err(FacilitatorError::EmptyResponse);
        }
        Ok(text)
    }

    /// Low-level messages call returning the upstream status and raw body.
    ///
    /// The relay endpoint uses this to forward upstream errors verbatim.
    pub async fn messages_request(
        &self,
        system: &str,
        messages: &[HistoryTurn],
    ) -> Result<(u16, serde_json::Value), FacilitatorError> {
        let request = MessagesRequest {
            model: &self.model,
            max_tokens: self.max_tokens,
            system,
            messages,
        };
        let response = self
            .http
            .post(format!("{}/v1/messages", self.base_url))
            .header("x-api-key", &self.api_key)
            .header("anthropic-version", ANTHROPIC_VERSION)
            .json(&request)
            .send()
            .await?;
        let status = response.status().as_u16();
        let body = response
            .json::<serde_json::Value>()
            .await
            .unwrap_or(serde_json::Value::Null);
        Ok((status, body))
    }
}

/// Persona and ground rules for the facilitator, parameterized by the topic.
pub fn facilitator_system_prompt(topic: &Topic) -> String {
    system_prompt_from_parts(&topic.title, &topic.goal, &topic.question1, &topic.question2)
}

/// Same prompt built from loose fields, for the raw relay endpoint.
pub fn system_prompt_from_parts(title: &str, goal: &str, q1: &str, q2: &str) -> String {
    format!(
        "You are an expert facilitator of group deliberation sessions.\n\
         Topic: {title}\n\
         Goal: {goal}\n\
         Discussion point 1: {q1}\n\
         Discussion point 2: {q2}\n\
         \n\
         A participant has just shared an idea. Ask exactly one follow-up \
         question that surfaces the assumptions, values or concerns behind \
         it. Never answer the question yourself and never ask a multi-part \
         question. Be warm and curious, never critical. Reply with the \
         question only, one or two sentences ending in a question mark.",
    )
}

/// Assemble the message list: recent history plus the new idea as the
/// final user turn. The first idea of a conversation gets its own
/// phrasing.
pub fn build_messages(idea: &str, history: &[HistoryTurn]) -> Vec<HistoryTurn> {
    let start = history.len().saturating_sub(HISTORY_WINDOW);
    let mut messages: Vec<HistoryTurn> = history[start..].to_vec();
    let content = if history.is_empty() {
        format!("Here is my first idea: {idea}")
    } else {
        format!("My next idea: {idea}")
    };
    messages.push(HistoryTurn {
        role: "user".to_string(),
        content,
    });
    messages
}

#[cfg(test)]
mod tests {
    use super::*;

    fn turn(role: &str, content: &str) -> HistoryTurn {
        HistoryTurn {
            role: role.to_string(),
            content: content.to_string(),
        }
    }

    #[test]
    fn history_window_keeps_last_six() {
        let history: Vec<HistoryTurn> = (0..10)
            .map(|i| turn(if i % 2 == 0 { "user" } else { "assistant" }, &format!("turn {i}")))
            .collect();
        let messages = build_messages("fresh idea", &history);
        assert_eq!(messages.len(), 7);
        assert_eq!(messages[0].content, "turn 4");
        assert_eq!(messages.last().unwrap().content, "My next idea: fresh idea");
        assert_eq!(messages.last().unwrap().role, "user");
    }

    #[test]
    fn short_history_is_sent_whole() {
        let history = vec![turn("user", "a"), turn("assistant", "b")];
        let messages = build_messages("c", &history);
        assert_eq!(messages.len(), 3);
        assert_eq!(messages[0].content, "a");
    }

    #[test]
    fn first_idea_gets_opening_phrasing() {
        let messages = build_messages("solar", &[]);
        assert_eq!(messages.len(), 1);
        assert_eq!(messages[0].content, "Here is my first idea: solar");
    }

    #[test]
    fn system_prompt_carries_topic_fields() {
        let topic = Topic {
            guid: uuid::Uuid::new_v4().to_string(),
            title: "Remote onboarding".to_string(),
            description: "d".to_string(),
            goal: "Make week one smoother".to_string(),
            question1: "What confused you most?".to_string(),
            question2: "What helped?".to_string(),
            host_name: "Ana".to_string(),
            start_date: None,
            end_date: None,
            reference_doc_name: None,
            reference_doc_url: None,
            meeting_url: None,
            status: "upcoming".to_string(),
            created_at: "2026-08-01T00:00:00Z".to_string(),
        };
        let prompt = facilitator_system_prompt(&topic);
        assert!(prompt.contains("Remote onboarding"));
        assert!(prompt.contains("Make week one smoother"));
        assert!(prompt.contains("What confused you most?"));
    }
}
