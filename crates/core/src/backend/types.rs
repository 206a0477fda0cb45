//! Types shared by all generation backends.

use std::fmt;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::asset::{Artifact, Capability};
use crate::job::Job;

/// Coarse classification driving retry decisions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorClass {
    /// Worth retrying after a backoff.
    Transient,
    /// Retrying the same request cannot succeed.
    Permanent,
    /// The run itself is misconfigured; stop dispatching.
    Operational,
}

impl ErrorClass {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorClass::Transient => "transient",
            ErrorClass::Permanent => "permanent",
            ErrorClass::Operational => "operational",
        }
    }
}

impl fmt::Display for ErrorClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Errors a backend call can end with.
#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum AdapterError {
    #[error("rate limited by backend")]
    RateLimited {
        /// Backend hint for when to try again.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        retry_after_ms: Option<u64>,
    },

    #[error("backend call timed out: {message}")]
    Timeout { message: String },

    #[error("content policy rejected the request: {message}")]
    ContentPolicyRejected { message: String },

    #[error("transient network error: {message}")]
    TransientNetwork { message: String },

    #[error("malformed backend response: {message}")]
    MalformedResponse { message: String },

    #[error("authentication failed: {message}")]
    AuthenticationFailed { message: String },

    #[error("backend misconfigured: {message}")]
    Misconfigured { message: String },
}

impl AdapterError {
    pub fn rate_limited(retry_after: Option<Duration>) -> Self {
        AdapterError::RateLimited {
            retry_after_ms: retry_after.map(|d| d.as_millis() as u64),
        }
    }

    pub fn timeout(message: impl Into<String>) -> Self {
        AdapterError::Timeout {
            message: message.into(),
        }
    }

    pub fn content_policy(message: impl Into<String>) -> Self {
        AdapterError::ContentPolicyRejected {
            message: message.into(),
        }
    }

    pub fn network(message: impl Into<String>) -> Self {
        AdapterError::TransientNetwork {
            message: message.into(),
        }
    }

    pub fn malformed(message: impl Into<String>) -> Self {
        AdapterError::MalformedResponse {
            message: message.into(),
        }
    }

    pub fn auth(message: impl Into<String>) -> Self {
        AdapterError::AuthenticationFailed {
            message: message.into(),
        }
    }

    pub fn misconfigured(message: impl Into<String>) -> Self {
        AdapterError::Misconfigured {
            message: message.into(),
        }
    }

    pub fn class(&self) -> ErrorClass {
        match self {
            AdapterError::RateLimited { .. }
            | AdapterError::Timeout { .. }
            | AdapterError::TransientNetwork { .. } => ErrorClass::Transient,
            AdapterError::ContentPolicyRejected { .. }
            | AdapterError::MalformedResponse { .. }
            | AdapterError::AuthenticationFailed { .. } => ErrorClass::Permanent,
            AdapterError::Misconfigured { .. } => ErrorClass::Operational,
        }
    }

    /// Short machine-readable name (for metrics and audit).
    pub fn kind(&self) -> &'static str {
        match self {
            AdapterError::RateLimited { .. } => "rate_limited",
            AdapterError::Timeout { .. } => "timeout",
            AdapterError::ContentPolicyRejected { .. } => "content_policy_rejected",
            AdapterError::TransientNetwork { .. } => "transient_network",
            AdapterError::MalformedResponse { .. } => "malformed_response",
            AdapterError::AuthenticationFailed { .. } => "authentication_failed",
            AdapterError::Misconfigured { .. } => "misconfigured",
        }
    }

    pub fn is_rate_limited(&self) -> bool {
        matches!(self, AdapterError::RateLimited { .. })
    }

    pub fn retry_after(&self) -> Option<Duration> {
        match self {
            AdapterError::RateLimited {
                retry_after_ms: Some(ms),
            } => Some(Duration::from_millis(*ms)),
            _ => None,
        }
    }
}

/// What a backend knows about a previously submitted attempt.
#[derive(Debug, Clone, PartialEq)]
pub enum RemoteOutcome {
    Completed(Artifact),
    Failed(AdapterError),
    /// Still running on the backend.
    Pending,
    /// The backend has no record of the submission key.
    Unknown,
}

impl RemoteOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            RemoteOutcome::Completed(_) => "completed",
            RemoteOutcome::Failed(_) => "failed",
            RemoteOutcome::Pending => "pending",
            RemoteOutcome::Unknown => "unknown",
        }
    }
}

/// How a backend is driven.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BackendKind {
    /// Browser automation against a web UI.
    Browser,
    /// Third-party REST API.
    Api,
}

impl BackendKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            BackendKind::Browser => "browser",
            BackendKind::Api => "api",
        }
    }
}

/// A generative backend able to turn a job into an artifact.
///
/// Implementations perform exactly one remote submission per `invoke` call
/// and never retry internally; retries belong to the caller.
#[async_trait]
pub trait GenerationBackend: Send + Sync {
    /// Configured backend name.
    fn name(&self) -> &str;

    fn kind(&self) -> BackendKind;

    fn capabilities(&self) -> &[Capability];

    /// Upper bound on one invocation, enforced by the caller.
    fn timeout(&self) -> Duration;

    fn supports(&self, capability: Capability) -> bool {
        self.capabilities().contains(&capability)
    }

    /// Submit the job's current attempt and wait for its output.
    ///
    /// The job must be Dispatched; its submission key identifies the attempt.
    async fn invoke(&self, job: &Job) -> Result<Artifact, AdapterError>;

    /// Look up what happened to the job's last submission.
    async fn query_outcome(&self, job: &Job) -> Result<RemoteOutcome, AdapterError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_classes() {
        assert_eq!(
            AdapterError::rate_limited(None).class(),
            ErrorClass::Transient
        );
        assert_eq!(AdapterError::timeout("x").class(), ErrorClass::Transient);
        assert_eq!(AdapterError::network("x").class(), ErrorClass::Transient);
        assert_eq!(
            AdapterError::content_policy("x").class(),
            ErrorClass::Permanent
        );
        assert_eq!(AdapterError::malformed("x").class(), ErrorClass::Permanent);
        assert_eq!(AdapterError::auth("x").class(), ErrorClass::Permanent);
        assert_eq!(
            AdapterError::misconfigured("x").class(),
            ErrorClass::Operational
        );
    }

    #[test]
    fn test_retry_after_hint() {
        let err = AdapterError::rate_limited(Some(Duration::from_secs(30)));
        assert_eq!(err.retry_after(), Some(Duration::from_secs(30)));
        assert_eq!(AdapterError::timeout("x").retry_after(), None);
    }

    #[test]
    fn test_adapter_error_serialization() {
        let err = AdapterError::content_policy("nsfw");
        let json = serde_json::to_value(&err).unwrap();
        assert_eq!(json["kind"], "content_policy_rejected");
        assert_eq!(json["message"], "nsfw");

        let parsed: AdapterError = serde_json::from_value(json).unwrap();
        assert_eq!(parsed, err);
    }
}
