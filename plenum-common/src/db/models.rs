//! Database models

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Setting {
    pub key: String,
    pub value: String,
}

/// A deliberation prompt created by a host
///
/// `start_date`/`end_date` are calendar dates (YYYY-MM-DD). Guests may join
/// only while today falls inside the window, both ends inclusive (the full
/// end day counts).
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct Topic {
    pub guid: String,
    pub title: String,
    pub description: String,
    /// What the host wants the session to achieve
    pub goal: String,
    /// First framing question
    pub question1: String,
    /// Second framing question
    pub question2: String,
    pub host_name: String,
    pub start_date: Option<String>,
    pub end_date: Option<String>,
    /// Chosen reference document, if the host attached one
    pub reference_doc_name: Option<String>,
    pub reference_doc_url: Option<String>,
    pub meeting_url: Option<String>,
    pub status: String,
    pub created_at: String,
}

impl Topic {
    /// Whether guest participation is permitted on the given calendar date.
    ///
    /// A topic with no scheduling window is never joinable; once set, the
    /// window is inclusive at both ends.
    pub fn is_open_on(&self, today: NaiveDate) -> bool {
        let (Some(start), Some(end)) = (&self.start_date, &self.end_date) else {
            return false;
        };
        let (Ok(start), Ok(end)) = (
            NaiveDate::parse_from_str(start, "%Y-%m-%d"),
            NaiveDate::parse_from_str(end, "%Y-%m-%d"),
        ) else {
            return false;
        };
        start <= today && today <= end
    }
}

/// Registration of a person into one topic's session
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct Participant {
    pub guid: String,
    pub topic_id: String,
    pub name: String,
    /// `host` or `guest`
    pub role: String,
    pub created_at: String,
}

/// One submitted contribution
///
/// Ideas are append-only; `seq` gives a stable total order within a topic.
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct Idea {
    pub guid: String,
    pub topic_id: String,
    pub participant_id: String,
    pub content: String,
    /// `question1` or `question2` when the idea answers a specific
    /// framing question
    pub question_section: Option<String>,
    pub seq: i64,
    pub created_at: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn topic_with_window(start: Option<&str>, end: Option<&str>) -> Topic {
        Topic {
            guid: "t-1".to_string(),
            title: "Community energy".to_string(),
            description: "How should the district heat itself?".to_string(),
            goal: "Shared priorities".to_string(),
            question1: "What matters most?".to_string(),
            question2: "What would you trade away?".to_string(),
            host_name: "Ada".to_string(),
            start_date: start.map(String::from),
            end_date: end.map(String::from),
            reference_doc_name: None,
            reference_doc_url: None,
            meeting_url: None,
            status: "upcoming".to_string(),
            created_at: "2026-04-01T00:00:00Z".to_string(),
        }
    }

    fn date(s: &str) -> NaiveDate {
        NaiveDate::parse_from_str(s, "%Y-%m-%d").unwrap()
    }

    #[test]
    fn window_is_inclusive_at_both_ends() {
        let topic = topic_with_window(Some("2026-04-02"), Some("2026-04-09"));
        assert!(!topic.is_open_on(date("2026-04-01")));
        assert!(topic.is_open_on(date("2026-04-02")));
        assert!(topic.is_open_on(date("2026-04-05")));
        assert!(topic.is_open_on(date("2026-04-09")));
        assert!(!topic.is_open_on(date("2026-04-10")));
    }

    #[test]
    fn missing_window_is_never_open() {
        let topic = topic_with_window(None, None);
        assert!(!topic.is_open_on(date("2026-04-05")));
        let topic = topic_with_window(Some("2026-04-02"), None);
        assert!(!topic.is_open_on(date("2026-04-02")));
    }

    #[test]
    fn unparsable_window_is_never_open() {
        let topic = topic_with_window(Some("April 2nd"), Some("2026-04-09"));
        assert!(!topic.is_open_on(date("2026-04-05")));
    }
}
