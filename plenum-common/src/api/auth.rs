//! API authentication via timestamp and hash validation
//!
//! Host-only operations (topic create/update, host role selection) carry a
//! `timestamp` (Unix epoch ms) and `hash` (SHA-256 over canonical JSON +
//! shared secret). The secret lives in the settings table; the special
//! value 0 disables checking entirely, which tests rely on.
//!
//! This module contains only pure functions and database operations; the
//! axum middleware wrapping them lives in plenum-ds.

use serde_json::Value;
use sha2::{Digest, Sha256};
use sqlx::SqlitePool;
use std::time::{SystemTime, UNIX_EPOCH};

/// Authentication error types
#[derive(Debug, Clone)]
pub enum ApiAuthError {
    /// Timestamp outside acceptable window
    InvalidTimestamp {
        timestamp: i64,
        now: i64,
        reason: String,
    },

    /// Hash does not match calculated value
    InvalidHash { provided: String, calculated: String },

    /// Database error loading shared secret
    DatabaseError(String),
}

impl std::fmt::Display for ApiAuthError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ApiAuthError::InvalidTimestamp { reason, .. } => {
                write!(f, "Invalid timestamp: {}", reason)
            }
            ApiAuthError::InvalidHash { .. } => write!(f, "Invalid hash"),
            ApiAuthError::DatabaseError(err) => write!(f, "Database error: {}", err),
        }
    }
}

impl std::error::Error for ApiAuthError {}

/// Load the shared secret from the settings table
///
/// Key: `api_shared_secret`, value: i64. Value 0 disables auth checking.
/// Generates and stores a fresh secret when none exists.
pub async fn load_shared_secret(db: &SqlitePool) -> Result<i64, ApiAuthError> {
    let result: Option<(String,)> =
        sqlx::query_as("SELECT value FROM settings WHERE key = 'api_shared_secret'")
            .fetch_optional(db)
            .await
            .map_err(|e| ApiAuthError::DatabaseError(e.to_string()))?;

    match result {
        Some((value,)) => value
            .parse::<i64>()
            .map_err(|e| ApiAuthError::DatabaseError(format!("Invalid i64: {}", e))),
        None => initialize_shared_secret(db).await,
    }
}

/// Generate and store a random non-zero shared secret
pub async fn initialize_shared_secret(db: &SqlitePool) -> Result<i64, ApiAuthError> {
    use rand::Rng;

    let mut rng = rand::thread_rng();
    let secret: i64 = loop {
        let val = rng.gen::<i64>();
        if val != 0 {
            break val;
        }
    };

    sqlx::query("INSERT OR REPLACE INTO settings (key, value) VALUES ('api_shared_secret', ?)")
        .bind(secret.to_string())
        .execute(db)
        .await
        .map_err(|e| ApiAuthError::DatabaseError(e.to_string()))?;

    Ok(secret)
}

/// Validate a request timestamp
///
/// Must be at most 1000 ms in the past and at most 1 ms in the future.
/// The asymmetry is intentional: past tolerance covers processing delay,
/// future tolerance only clock drift.
pub fn validate_timestamp(timestamp: i64) -> Result<(), ApiAuthError> {
    let now = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as i64;

    let diff = now - timestamp;

    if diff > 1000 {
        return Err(ApiAuthError::InvalidTimestamp {
            timestamp,
            now,
            reason: format!("Timestamp {}ms too old (max 1000ms past)", diff),
        });
    }

    if diff < -1 {
        return Err(ApiAuthError::InvalidTimestamp {
            timestamp,
            now,
            reason: format!("Timestamp {}ms in future (max 1ms future)", diff.abs()),
        });
    }

    Ok(())
}

/// Calculate the request hash
///
/// 1. Replace the hash field with 64 zeros
/// 2. Render canonical JSON (sorted keys, no whitespace)
/// 3. Append the shared secret as a decimal string
/// 4. SHA-256, hex-encoded
pub fn calculate_hash(json_value: &Value, shared_secret: i64) -> String {
    let mut value = json_value.clone();
    if let Some(obj) = value.as_object_mut() {
        obj.insert(
            "hash".to_string(),
            Value::String(
                "0000000000000000000000000000000000000000000000000000000000000000".to_string(),
            ),
        );
    }

    let canonical = to_canonical_json(&value);
    let to_hash = format!("{}{}", canonical, shared_secret);

    let mut hasher = Sha256::new();
    hasher.update(to_hash.as_bytes());
    format!("{:x}", hasher.finalize())
}

/// Convert JSON to canonical form (sorted keys, no whitespace)
fn to_canonical_json(value: &Value) -> String {
    match value {
        Value::Object(map) => {
            let mut pairs: Vec<_> = map.iter().collect();
            pairs.sort_by_key(|(k, _)| *k);
            let items: Vec<String> = pairs
                .into_iter()
                .map(|(k, v)| format!("\"{}\":{}", k, to_canonical_json(v)))
                .collect();
            format!("{{{}}}", items.join(","))
        }
        Value::Array(arr) => {
            let items: Vec<String> = arr.iter().map(to_canonical_json).collect();
            format!("[{}]", items.join(","))
        }
        Value::String(s) => format!("\"{}\"", s.replace('\\', "\\\\").replace('"', "\\\"")),
        Value::Number(n) => n.to_string(),
        Value::Bool(b) => b.to_string(),
        Value::Null => "null".to_string(),
    }
}

/// Validate that the provided hash matches the calculated value
pub fn validate_hash(
    provided: &str,
    json_value: &Value,
    shared_secret: i64,
) -> Result<(), ApiAuthError> {
    let calculated = calculate_hash(json_value, shared_secret);
    if provided == calculated {
        Ok(())
    } else {
        Err(ApiAuthError::InvalidHash {
            provided: provided.to_string(),
            calculated,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn current_timestamp_is_valid() {
        let now = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap()
            .as_millis() as i64;
        assert!(validate_timestamp(now).is_ok());
        assert!(validate_timestamp(now - 500).is_ok());
    }

    #[test]
    fn stale_and_future_timestamps_are_rejected() {
        let now = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap()
            .as_millis() as i64;
        assert!(validate_timestamp(now - 2000).is_err());
        assert!(validate_timestamp(now + 100).is_err());
    }

    #[test]
    fn hash_round_trip() {
        let body = json!({
            "title": "Community energy",
            "timestamp": 1730000000000i64,
            "hash": "dummy"
        });
        let secret = 123456789i64;
        let hash = calculate_hash(&body, secret);
        assert_eq!(hash.len(), 64);
        assert!(validate_hash(&hash, &body, secret).is_ok());
        assert!(validate_hash(&hash, &body, secret + 1).is_err());
    }

    #[test]
    fn canonical_json_sorts_keys() {
        let body = json!({"z": 1, "a": {"d": 2, "b": 3}});
        assert_eq!(to_canonical_json(&body), r#"{"a":{"b":3,"d":2},"z":1}"#);
    }
}
