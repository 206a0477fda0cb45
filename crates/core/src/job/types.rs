//! Core job data types.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::asset::{Artifact, AssetRequest};
use crate::backend::ErrorClass;

/// Job lifecycle state.
///
/// ```text
/// queued -> dispatched -> succeeded
///             |  \-> retry_scheduled -> dispatched ...
///             |  \-> abandoned | failed
/// queued | retry_scheduled -> cancelled
/// ```
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum JobState {
    /// Waiting for its backend's dispatch loop.
    Queued,

    /// Claimed by a dispatch loop; the backend call may be in flight.
    ///
    /// Committed before the backend is contacted so a crash leaves a record
    /// of the submission key to look up on restart.
    Dispatched {
        dispatched_at: DateTime<Utc>,
        submission_key: String,
    },

    /// Failed transiently, will be eligible again at `retry_at`.
    RetryScheduled {
        error: String,
        error_class: ErrorClass,
        retry_at: DateTime<Utc>,
    },

    /// Artifact produced (and persisted, when storage is configured).
    Succeeded {
        artifact: Artifact,
        completed_at: DateTime<Utc>,
        /// The operator had requested cancellation while the call was in flight.
        #[serde(default)]
        salvaged: bool,
    },

    /// Aborted by an operational error or a storage failure.
    Failed {
        error: String,
        failed_at: DateTime<Utc>,
        /// Generated output that could not be persisted, kept for inspection.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        artifact: Option<Artifact>,
    },

    /// Automatic handling gave up (permanent error or retries exhausted).
    Abandoned {
        reason: String,
        error_class: ErrorClass,
        abandoned_at: DateTime<Utc>,
    },

    /// Cancelled by an operator.
    Cancelled {
        cancelled_by: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        reason: Option<String>,
        cancelled_at: DateTime<Utc>,
    },
}

impl JobState {
    pub const ALL_TYPES: [&'static str; 7] = [
        "queued",
        "dispatched",
        "retry_scheduled",
        "succeeded",
        "failed",
        "abandoned",
        "cancelled",
    ];

    /// Returns true if this is a terminal state (no further transitions possible).
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            JobState::Succeeded { .. }
                | JobState::Failed { .. }
                | JobState::Abandoned { .. }
                | JobState::Cancelled { .. }
        )
    }

    /// Active jobs hold their dedup key: at most one per key.
    pub fn is_active(&self) -> bool {
        !self.is_terminal()
    }

    /// Cancellation is immediate only for jobs not currently in flight.
    pub fn can_cancel(&self) -> bool {
        matches!(self, JobState::Queued | JobState::RetryScheduled { .. })
    }

    /// Operator force-retry is allowed for unsuccessful terminal jobs.
    pub fn can_resubmit(&self) -> bool {
        matches!(
            self,
            JobState::Failed { .. } | JobState::Abandoned { .. } | JobState::Cancelled { .. }
        )
    }

    pub fn can_transition_to(&self, next: &JobState) -> bool {
        use JobState::*;
        match (self, next) {
            (Queued, Dispatched { .. }) => true,
            (Queued, Cancelled { .. }) => true,
            (Queued, Failed { .. }) => true,
            (RetryScheduled { .. }, Dispatched { .. }) => true,
            (RetryScheduled { .. }, Cancelled { .. }) => true,
            (RetryScheduled { .. }, Abandoned { .. }) => true,
            (RetryScheduled { .. }, Failed { .. }) => true,
            // Recovery: the dispatch never reached the backend.
            (Dispatched { .. }, Queued) => true,
            (Dispatched { .. }, RetryScheduled { .. })
            | (Dispatched { .. }, Succeeded { .. })
            | (Dispatched { .. }, Failed { .. })
            | (Dispatched { .. }, Abandoned { .. })
            | (Dispatched { .. }, Cancelled { .. }) => true,
            _ => false,
        }
    }

    /// Returns the state type as a string (for filtering).
    pub fn state_type(&self) -> &'static str {
        match self {
            JobState::Queued => "queued",
            JobState::Dispatched { .. } => "dispatched",
            JobState::RetryScheduled { .. } => "retry_scheduled",
            JobState::Succeeded { .. } => "succeeded",
            JobState::Failed { .. } => "failed",
            JobState::Abandoned { .. } => "abandoned",
            JobState::Cancelled { .. } => "cancelled",
        }
    }

    pub fn submission_key(&self) -> Option<&str> {
        match self {
            JobState::Dispatched { submission_key, .. } => Some(submission_key),
            _ => None,
        }
    }

    pub fn retry_at(&self) -> Option<DateTime<Utc>> {
        match self {
            JobState::RetryScheduled { retry_at, .. } => Some(*retry_at),
            _ => None,
        }
    }

    pub fn artifact(&self) -> Option<&Artifact> {
        match self {
            JobState::Succeeded { artifact, .. } => Some(artifact),
            JobState::Failed { artifact, .. } => artifact.as_ref(),
            _ => None,
        }
    }
}

/// Result of one adapter invocation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AttemptOutcome {
    Succeeded,
    Failed,
    /// Outcome resolved by querying the backend after a restart.
    Recovered,
    /// The call was cut off by the invocation timeout.
    TimedOut,
}

/// One entry in a job's attempt history.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AttemptRecord {
    pub attempt: u32,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub outcome: AttemptOutcome,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_class: Option<ErrorClass>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default)]
    pub credits: u32,
}

/// A requested state change, optionally recording the attempt that caused it.
#[derive(Debug, Clone, PartialEq)]
pub struct StateTransition {
    pub to: JobState,
    pub attempt: Option<AttemptRecord>,
}

impl StateTransition {
    pub fn to(state: JobState) -> Self {
        Self {
            to: state,
            attempt: None,
        }
    }

    pub fn with_attempt(mut self, attempt: AttemptRecord) -> Self {
        self.attempt = Some(attempt);
        self
    }
}

/// A generation job: one AssetRequest and its lifecycle.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Job {
    /// Unique identifier (UUID).
    pub id: String,

    pub request: AssetRequest,

    pub dedup_key: String,

    pub state: JobState,

    /// Number of dispatches so far. Never decreases.
    pub attempts: u32,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_attempt_at: Option<DateTime<Utc>>,

    /// Enqueue order; ties within a priority class dispatch in this order.
    pub queue_seq: i64,

    /// Job this one was force-retried from.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub retry_of: Option<String>,

    /// Operator asked to cancel while the job was in flight.
    #[serde(default)]
    pub cancel_requested: bool,

    #[serde(default)]
    pub attempt_history: Vec<AttemptRecord>,

    pub created_at: DateTime<Utc>,

    pub updated_at: DateTime<Utc>,
}

impl Job {
    pub fn backend(&self) -> &str {
        &self.request.backend
    }

    pub fn episode(&self) -> &str {
        &self.request.episode
    }

    /// Key sent to the backend for the current attempt.
    pub fn submission_key(&self) -> String {
        format!("{}:{}", self.id, self.attempts)
    }

    /// Credits charged across all attempts.
    pub fn credits_spent(&self) -> u64 {
        self.attempt_history.iter().map(|a| a.credits as u64).sum()
    }
}
