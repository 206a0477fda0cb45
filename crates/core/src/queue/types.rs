//! Job queue types.

use serde::Serialize;
use thiserror::Error;

use crate::asset::{AssetError, PlanError};
use crate::backend::AdapterError;
use crate::job::{Job, JobError};

#[derive(Debug, Error)]
pub enum QueueError {
    #[error("invalid asset request: {0}")]
    InvalidRequest(#[from] AssetError),

    #[error("invalid episode plan: {0}")]
    InvalidPlan(#[from] PlanError),

    /// Unknown backend or unsupported capability.
    #[error("backend rejected request: {0}")]
    Backend(AdapterError),

    #[error("job not found: {0}")]
    NotFound(String),

    #[error("cannot {operation} job {job_id}: current state is {current_state}")]
    InvalidState {
        job_id: String,
        current_state: String,
        operation: String,
    },

    #[error("job store error: {0}")]
    Store(String),
}

impl From<JobError> for QueueError {
    fn from(e: JobError) -> Self {
        match e {
            JobError::NotFound(id) => QueueError::NotFound(id),
            JobError::InvalidState {
                job_id,
                current_state,
                operation,
            } => QueueError::InvalidState {
                job_id,
                current_state,
                operation,
            },
            other => QueueError::Store(other.to_string()),
        }
    }
}

impl QueueError {
    /// Misconfiguration or infrastructure failure rather than an operator mistake
    /// about a specific job.
    pub fn is_operational(&self) -> bool {
        matches!(
            self,
            QueueError::InvalidRequest(_)
                | QueueError::InvalidPlan(_)
                | QueueError::Backend(_)
                | QueueError::Store(_)
        )
    }
}

/// Result of admitting one request.
#[derive(Debug, Clone, Serialize)]
pub struct EnqueueOutcome {
    pub job_id: String,
    /// True when an active job already held the dedup key.
    pub deduplicated: bool,
    pub job: Job,
}

/// Result of admitting a whole episode plan.
#[derive(Debug, Clone, Serialize)]
pub struct PlanOutcome {
    pub episode: String,
    pub jobs: Vec<EnqueueOutcome>,
}

impl PlanOutcome {
    pub fn enqueued(&self) -> usize {
        self.jobs.iter().filter(|o| !o.deduplicated).count()
    }

    pub fn deduplicated(&self) -> usize {
        self.jobs.iter().filter(|o| o.deduplicated).count()
    }
}

/// Result of an operator cancellation.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "result", content = "job", rename_all = "snake_case")]
pub enum CancelOutcome {
    /// The job had not started and is now Cancelled.
    Cancelled(Job),
    /// The job is in flight; it is flagged and resolved when the call returns.
    Requested(Job),
}

impl CancelOutcome {
    pub fn job(&self) -> &Job {
        match self {
            CancelOutcome::Cancelled(job) | CancelOutcome::Requested(job) => job,
        }
    }
}
