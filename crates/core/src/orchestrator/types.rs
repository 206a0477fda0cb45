//! Types for the job orchestrator.

use std::time::Duration;

use serde::Serialize;
use thiserror::Error;

use crate::job::{Job, JobError, JobState};
use crate::queue::QueueError;
use crate::retry::{BreakerStatus, LedgerSnapshot};

/// Errors that can occur during orchestration.
#[derive(Debug, Error)]
pub enum OrchestratorError {
    /// No backend with this name is registered.
    #[error("unknown backend: {0}")]
    UnknownBackend(String),

    /// An operational failure stopped dispatching.
    #[error("dispatch halted on backend {backend}: {reason}")]
    Halted { backend: String, reason: String },

    #[error("queue error: {0}")]
    Queue(#[from] QueueError),

    #[error("job store error: {0}")]
    JobStore(#[from] JobError),
}

/// Result of one dispatch attempt on a backend.
#[derive(Debug, Clone, PartialEq)]
pub enum DispatchOutcome {
    /// Nothing eligible to dispatch.
    Idle,
    /// The backend's circuit is open; no job was claimed.
    Deferred { remaining: Duration },
    /// A job was invoked and moved to its next state.
    Processed(Box<Job>),
}

/// Current status of the orchestrator.
#[derive(Debug, Clone, Default, Serialize)]
pub struct OrchestratorStatus {
    pub running: bool,
    /// Reason of the last operational halt, cleared by the next start.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub halted: Option<String>,
    pub backends: Vec<String>,
    pub circuits: Vec<BreakerStatus>,
    pub credits: Option<LedgerSnapshot>,
    /// Job counts by state type.
    pub jobs: Vec<(String, i64)>,
}

/// What a drain of the queue did.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct RunSummary {
    /// Invocations performed, recovery resolutions included.
    pub processed: u32,
    pub succeeded: u32,
    /// Successes that arrived after a cancellation request.
    pub salvaged: u32,
    pub retried: u32,
    pub abandoned: u32,
    pub failed: u32,
    pub cancelled: u32,
    /// Jobs resolved by querying the backend after a restart.
    pub recovered: u32,
    /// Dispatches skipped because a circuit was open.
    pub deferred: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub halted: Option<String>,
}

impl RunSummary {
    /// Count a job's state after an invocation.
    pub fn record(&mut self, state: &JobState) {
        self.processed += 1;
        match state {
            JobState::Succeeded { salvaged, .. } => {
                self.succeeded += 1;
                if *salvaged {
                    self.salvaged += 1;
                }
            }
            JobState::RetryScheduled { .. } => self.retried += 1,
            JobState::Abandoned { .. } => self.abandoned += 1,
            JobState::Failed { .. } => self.failed += 1,
            JobState::Cancelled { .. } => self.cancelled += 1,
            JobState::Queued | JobState::Dispatched { .. } => {}
        }
    }

    pub fn merge(&mut self, other: RunSummary) {
        self.processed += other.processed;
        self.succeeded += other.succeeded;
        self.salvaged += other.salvaged;
        self.retried += other.retried;
        self.abandoned += other.abandoned;
        self.failed += other.failed;
        self.cancelled += other.cancelled;
        self.recovered += other.recovered;
        self.deferred += other.deferred;
        if self.halted.is_none() {
            self.halted = other.halted;
        }
    }

    /// Process exit code: 0 when everything processed succeeded, 1 when some
    /// jobs were abandoned or failed, 2 on an operational halt.
    pub fn exit_code(&self) -> i32 {
        if self.halted.is_some() {
            2
        } else if self.abandoned > 0 || self.failed > 0 {
            1
        } else {
            0
        }
    }
}
