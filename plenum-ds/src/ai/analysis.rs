//! Idea clustering and discussion re-clustering.
//!
//! The analysis round sends the collected ideas (and, on the second round,
//! the discussion transcript) to the model and expects a JSON mapping back.
//! Every path out of this module produces a usable [`Mapping`]: a parse or
//! upstream failure yields the deterministic fallback instead of an error
//! surfaced to participants.

use super::extract::{parse_embedded, ParseOutcome};
use super::facilitator::{HistoryTurn, ANTHROPIC_VERSION};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::warn;

/// Clustered view of the collected ideas.
///
/// `clusters` reference ideas by index into the idea snapshot that was
/// frozen when the analysis was dispatched. `new_insights` is only present
/// after the remap round.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Mapping {
    pub clusters: Vec<IdeaCluster>,
    pub key_points: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub new_insights: Option<Vec<String>>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct IdeaCluster {
    pub theme: String,
    /// Indices into the frozen idea snapshot.
    pub ideas: Vec<usize>,
    pub summary: String,
}

/// A cluster with its indices resolved against the idea snapshot.
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct ResolvedCluster {
    pub theme: String,
    pub ideas: Vec<String>,
    pub summary: String,
}

impl Mapping {
    /// Resolve cluster indices against the frozen idea snapshot.
    ///
    /// The model occasionally invents indices; out-of-range ones are
    /// dropped with a warning rather than failing the whole mapping.
    pub fn resolve(&self, ideas: &[String]) -> Vec<ResolvedCluster> {
        self.clusters
            .iter()
            .map(|cluster| {
                let mut resolved = Vec::with_capacity(cluster.ideas.len());
                for &index in &cluster.ideas {
                    match ideas.get(index) {
                        Some(idea) => resolved.push(idea.clone()),
                        None => warn!(
                            theme = %cluster.theme,
                            index,
                            idea_count = ideas.len(),
                            "dropping out-of-range idea index from cluster"
                        ),
                    }
                }
                ResolvedCluster {
                    theme: cluster.theme.clone(),
                    ideas: resolved,
                    summary: cluster.summary.clone(),
                }
            })
            .collect()
    }
}

const FALLBACK_THEME: &str = "Collected ideas";
const FALLBACK_SUMMARY: &str = "An overview of everything the group contributed.";
const FALLBACK_KEY_POINTS: [&str; 3] = [
    "Several distinct directions emerged from the submitted ideas.",
    "Concrete implementation steps are worth examining next.",
    "Agreeing on priorities would be a good use of the discussion.",
];
const FALLBACK_INSIGHTS: [&str; 2] = [
    "The discussion surfaced perspectives that were not in the written ideas.",
    "Concrete next steps became clearer through the conversation.",
];

/// Mapping shown when the initial analysis cannot be obtained: one cluster
/// holding every idea, plus three generic key points.
pub fn fallback_mapping(idea_count: usize) -> Mapping {
    Mapping {
        clusters: vec![IdeaCluster {
            theme: FALLBACK_THEME.to_string(),
            ideas: (0..idea_count).collect(),
            summary: FALLBACK_SUMMARY.to_string(),
        }],
        key_points: FALLBACK_KEY_POINTS.iter().map(|s| s.to_string()).collect(),
        new_insights: None,
    }
}

/// Remap fallback: keep the previous mapping and append two generic
/// insights. With no previous mapping the initial fallback is used as the
/// base.
pub fn fallback_remap(previous: Option<Mapping>, idea_count: usize) -> Mapping {
    let mut mapping = previous.unwrap_or_else(|| fallback_mapping(idea_count));
    mapping.new_insights = Some(FALLBACK_INSIGHTS.iter().map(|s| s.to_string()).collect());
    mapping
}

#[derive(Debug, thiserror::Error)]
pub enum AnalysisError {
    #[error("request failed: {0}")]
    Request(#[from] reqwest::Error),
    #[error("API returned status {status}: {body}")]
    Upstream { status: u16, body: String },
    #[error("response could not be parsed: {0}")]
    Unparsable(#[from] super::extract::ParseFailure),
    #[error("response contained no text content")]
    EmptyResponse,
}

#[derive(Debug, Serialize)]
struct MessagesRequest<'a> {
    model: &'a str,
    max_tokens: u32,
    messages: Vec<HistoryTurn>,
    #[serde(skip_serializing_if = "Option::is_none")]
    system: Option<&'a str>,
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

/// Client for the analysis model.
pub struct AnalysisClient {
    http: reqwest::Client,
    base_url: String,
    api_key: String,
    model: String,
    max_tokens: u32,
}

impl AnalysisClient {
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

    /// Cluster the collected ideas into themes.
    pub async fn analyze(
        &self,
        topic_title: &str,
        ideas: &[String],
    ) -> Result<Mapping, AnalysisError> {
        let prompt = initial_analysis_prompt(topic_title, ideas);
        self.request_mapping(prompt).await
    }

    /// Re-cluster in light of the discussion transcript.
    pub async fn re_analyze(
        &self,
        topic_title: &str,
        ideas: &[String],
        transcript: &str,
        previous: &Mapping,
    ) -> Result<Mapping, AnalysisError> {
        let prompt = remap_prompt(topic_title, ideas, transcript, previous);
        self.request_mapping(prompt).await
    }

    async fn request_mapping(&self, prompt: String) -> Result<Mapping, AnalysisError> {
        let request = MessagesRequest {
            model: &self.model,
            max_tokens: self.max_tokens,
            messages: vec![HistoryTurn {
                role: "user".to_string(),
                content: prompt,
            }],
            system: None,
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
        if status != 200 {
            let body = response.text().await.unwrap_or_default();
            return Err(AnalysisError::Upstream { status, body });
        }
        let parsed: MessagesResponse = response.json().await?;
        let text = parsed
            .content
            .first()
            .map(|block| block.text.clone())
            .unwrap_or_default();
        if text.is_empty() {
            return Err(AnalysisError::EmptyResponse);
        }
        match parse_embedded::<Mapping>(&text) {
            ParseOutcome::Parsed(mapping) => Ok(mapping),
            ParseOutcome::Fallback(reason) => Err(AnalysisError::Unparsable(reason)),
        }
    }
}

/// Build the first-round clustering prompt.
pub fn initial_analysis_prompt(topic_title: &str, ideas: &[String]) -> String {
    let listed = number_ideas(ideas);
    format!(
        "The following ideas were collected in a brainstorming session on \
         \"{topic_title}\".\n\n{listed}\n\n\
         Group the ideas into themed clusters and summarize each cluster. \
         Refer to ideas by their zero-based index. Answer with a JSON object \
         only, in exactly this shape:\n\
         {{\"clusters\": [{{\"theme\": \"...\", \"ideas\": [0, 1], \
         \"summary\": \"...\"}}], \"key_points\": [\"...\", \"...\", \"...\"]}}"
    )
}

/// Build the remap prompt from the ideas, the transcript, and the previous
/// mapping.
pub fn remap_prompt(
    topic_title: &str,
    ideas: &[String],
    transcript: &str,
    previous: &Mapping,
) -> String {
    let listed = number_ideas(ideas);
    let previous_json = serde_json::to_string(previous).unwrap_or_default();
    format!(
        "A brainstorming session on \"{topic_title}\" produced these ideas:\n\n\
         {listed}\n\n\
         They were previously clustered as:\n{previous_json}\n\n\
         The group then held a live discussion. Transcript:\n{transcript}\n\n\
         Re-cluster the ideas taking the discussion into account, and list \
         what the discussion newly revealed. Refer to ideas by their \
         zero-based index. Answer with a JSON object only, in exactly this \
         shape:\n\
         {{\"clusters\": [{{\"theme\": \"...\", \"ideas\": [0, 1], \
         \"summary\": \"...\"}}], \"key_points\": [\"...\"], \
         \"new_insights\": [\"...\", \"...\"]}}"
    )
}

fn number_ideas(ideas: &[String]) -> String {
    ideas
        .iter()
        .enumerate()
        .map(|(i, idea)| format!("{i}. {idea}"))
        .collect::<Vec<_>>()
        .join("\n")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fallback_mapping_covers_every_idea() {
        let mapping = fallback_mapping(4);
        assert_eq!(mapping.clusters.len(), 1);
        assert_eq!(mapping.clusters[0].ideas, vec![0, 1, 2, 3]);
        assert_eq!(mapping.key_points.len(), 3);
        assert!(mapping.new_insights.is_none());
    }

    #[test]
    fn fallback_remap_preserves_previous_clusters() {
        let previous = Mapping {
            clusters: vec![IdeaCluster {
                theme: "Costs".to_string(),
                ideas: vec![0, 2],
                summary: "Money concerns".to_string(),
            }],
            key_points: vec!["point".to_string()],
            new_insights: None,
        };
        let remapped = fallback_remap(Some(previous.clone()), 3);
        assert_eq!(remapped.clusters, previous.clusters);
        assert_eq!(remapped.key_points, previous.key_points);
        assert_eq!(remapped.new_insights.as_ref().map(Vec::len), Some(2));
    }

    #[test]
    fn fallback_remap_without_previous_uses_single_cluster() {
        let remapped = fallback_remap(None, 2);
        assert_eq!(remapped.clusters[0].ideas, vec![0, 1]);
        assert!(remapped.new_insights.is_some());
    }

    #[test]
    fn resolve_drops_out_of_range_indices() {
        let mapping = Mapping {
            clusters: vec![IdeaCluster {
                theme: "t".to_string(),
                ideas: vec![0, 7, 1],
                summary: "s".to_string(),
            }],
            key_points: vec![],
            new_insights: None,
        };
        let ideas = vec!["first".to_string(), "second".to_string()];
        let resolved = mapping.resolve(&ideas);
        assert_eq!(resolved[0].ideas, vec!["first", "second"]);
    }

    #[test]
    fn valid_model_json_parses_verbatim() {
        let text = r#"Sure, here is the clustering:
            {"clusters": [{"theme": "Access", "ideas": [1, 0], "summary": "Who gets in"}],
             "key_points": ["a", "b"]}"#;
        match parse_embedded::<Mapping>(text) {
            ParseOutcome::Parsed(mapping) => {
                assert_eq!(mapping.clusters[0].ideas, vec![1, 0]);
                assert_eq!(mapping.key_points, vec!["a", "b"]);
            }
            ParseOutcome::Fallback(f) => panic!("expected parse, got {f}"),
        }
    }

    #[test]
    fn prompts_number_ideas_from_zero() {
        let ideas = vec!["solar".to_string(), "wind".to_string()];
        let prompt = initial_analysis_prompt("Energy", &ideas);
        assert!(prompt.contains("0. solar"));
        assert!(prompt.contains("1. wind"));
        assert!(prompt.contains("\"Energy\""));
    }

    #[test]
    fn remap_prompt_embeds_transcript_and_previous_mapping() {
        let previous = fallback_mapping(1);
        let prompt = remap_prompt(
            "Energy",
            &["solar".to_string()],
            "we talked about storage",
            &previous,
        );
        assert!(prompt.contains("we talked about storage"));
        assert!(prompt.contains("Collected ideas"));
        assert!(prompt.contains("new_insights"));
    }
}
