//! JSON extraction from model output.
//!
//! The model is asked to answer with a bare JSON object, but in practice the
//! object often arrives wrapped in prose or a code fence. We take the span
//! from the first `{` to the last `}` and try to deserialize that. Callers
//! get a typed outcome so the fallback path is an explicit branch rather
//! than a swallowed error.

use serde::de::DeserializeOwned;

/// Why a response could not be turned into a typed value.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ParseFailure {
    #[error("response contains no JSON object")]
    NoJsonObject,
    #[error("embedded JSON does not match the expected shape: {0}")]
    WrongShape(String),
}

/// Result of trying to parse a model response.
#[derive(Debug)]
pub enum ParseOutcome<T> {
    Parsed(T),
    /// Caller should substitute its deterministic fallback value.
    Fallback(ParseFailure),
}

/// Return the span from the first `{` to the last `}`, if any.
pub fn extract_json_object(text: &str) -> Option<&str> {
    let start = text.find('{')?;
    let end = text.rfind('}')?;
    if end < start {
        return None;
    }
    Some(&text[start..=end])
}

/// Extract and deserialize the embedded JSON object in `text`.
pub fn parse_embedded<T: DeserializeOwned>(text: &str) -> ParseOutcome<T> {
    let Some(span) = extract_json_object(text) else {
        return ParseOutcome::Fallback(ParseFailure::NoJsonObject);
    };
    match serde_json::from_str(span) {
        Ok(value) => ParseOutcome::Parsed(value),
        Err(e) => ParseOutcome::Fallback(ParseFailure::WrongShape(e.to_string())),
    }
}
