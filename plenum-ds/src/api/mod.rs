//! HTTP API.

pub mod health;
pub mod relay;
pub mod runs;
pub mod sse;
pub mod topics;

use crate::error::{ApiError, ApiResult};
use plenum_common::api::auth::{validate_hash, validate_timestamp};
use serde_json::Value;

/// Check the timestamp and hash fields on a mutating request body.
///
/// A shared secret of 0 disables authentication (integration tests rely
/// on this).
pub fn authorize(shared_secret: i64, payload: &Value) -> ApiResult<()> {
    if shared_secret == 0 {
        return Ok(());
    }
    let timestamp = payload
        .get("timestamp")
        .and_then(Value::as_i64)
        .ok_or_else(|| ApiError::Unauthorized("missing timestamp".to_string()))?;
    let hash = payload
        .get("hash")
        .and_then(Value::as_str)
        .ok_or_else(|| ApiError::Unauthorized("missing hash".to_string()))?;
    validate_timestamp(timestamp).map_err(|e| ApiError::Unauthorized(e.to_string()))?;
    validate_hash(hash, payload, shared_secret)
        .map_err(|e| ApiError::Unauthorized(e.to_string()))?;
    Ok(())
}
