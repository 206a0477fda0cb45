//! HTTP error classification shared by the REST-based backends.

use std::time::Duration;

use reqwest::header::{HeaderMap, RETRY_AFTER};
use reqwest::StatusCode;

use super::AdapterError;

/// Error codes that mean the provider refused the prompt or image.
const POLICY_CODES: &[&str] = &[
    "content_policy",
    "content_policy_violation",
    "nsfw",
    "safety_violation",
    "prompt_rejected",
];

pub(crate) fn is_policy_code(code: &str) -> bool {
    POLICY_CODES.contains(&code.to_ascii_lowercase().as_str())
}

/// Map a transport-level reqwest failure.
pub(crate) fn classify_request_error(e: reqwest::Error) -> AdapterError {
    if e.is_timeout() {
        AdapterError::timeout(e.to_string())
    } else if e.is_connect() || e.is_request() {
        AdapterError::network(e.to_string())
    } else if e.is_decode() {
        AdapterError::malformed(e.to_string())
    } else if e.is_builder() {
        AdapterError::misconfigured(e.to_string())
    } else {
        AdapterError::network(e.to_string())
    }
}

/// Parse a `Retry-After` header given in seconds.
pub(crate) fn retry_after(headers: &HeaderMap) -> Option<Duration> {
    headers
        .get(RETRY_AFTER)?
        .to_str()
        .ok()?
        .trim()
        .parse::<u64>()
        .ok()
        .map(Duration::from_secs)
}

/// Extract `(code, message)` from an error body.
///
/// Accepts `{"error": {"code", "message"}}`, `{"code", "message"}` or plain text.
pub(crate) fn error_detail(body: &str) -> (Option<String>, String) {
    let Ok(value) = serde_json::from_str::<serde_json::Value>(body) else {
        return (None, body.chars().take(200).collect());
    };
    let err = value.get("error").unwrap_or(&value);
    let code = err
        .get("code")
        .and_then(|c| c.as_str())
        .map(str::to_string);
    let message = err
        .get("message")
        .and_then(|m| m.as_str())
        .map(str::to_string)
        .unwrap_or_else(|| body.chars().take(200).collect());
    (code, message)
}

/// Map a non-success HTTP response.
pub(crate) fn classify_status(
    status: StatusCode,
    retry_after: Option<Duration>,
    body: &str,
) -> AdapterError {
    let (code, message) = error_detail(body);
    if code.as_deref().map(is_policy_code).unwrap_or(false) {
        return AdapterError::content_policy(message);
    }

    match status.as_u16() {
        429 => AdapterError::rate_limited(retry_after),
        401 | 403 => AdapterError::auth(format!("HTTP {}: {}", status, message)),
        408 | 504 => AdapterError::timeout(format!("HTTP {}", status)),
        500..=599 => AdapterError::network(format!("HTTP {}: {}", status, message)),
        _ => AdapterError::malformed(format!("HTTP {}: {}", status, message)),
    }
}
