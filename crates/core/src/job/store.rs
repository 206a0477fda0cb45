//! Job storage trait and types.

use chrono::{DateTime, Utc};
use thiserror::Error;

use crate::asset::AssetRequest;

use super::{Job, StateTransition};

/// Error type for job store operations.
#[derive(Debug, Error)]
pub enum JobError {
    #[error("job not found: {0}")]
    NotFound(String),

    /// An active job already holds this dedup key.
    #[error("duplicate of active job {existing_id}")]
    Duplicate { existing_id: String },

    #[error("cannot {operation} job {job_id}: current state is {current_state}")]
    InvalidState {
        job_id: String,
        current_state: String,
        operation: String,
    },

    #[error("invalid transition for job {job_id}: {from} -> {to}")]
    InvalidTransition {
        job_id: String,
        from: String,
        to: String,
    },

    #[error("database error: {0}")]
    Database(String),
}

/// Filter for querying jobs.
#[derive(Debug, Clone)]
pub struct JobFilter {
    /// Filter by state type (e.g. "queued").
    pub state: Option<String>,
    pub episode: Option<String>,
    pub backend: Option<String>,
    pub limit: i64,
    pub offset: i64,
}

impl Default for JobFilter {
    fn default() -> Self {
        Self::new()
    }
}

impl JobFilter {
    pub fn new() -> Self {
        Self {
            state: None,
            episode: None,
            backend: None,
            limit: 100,
            offset: 0,
        }
    }

    pub fn with_state(mut self, state: impl Into<String>) -> Self {
        self.state = Some(state.into());
        self
    }

    pub fn with_episode(mut self, episode: impl Into<String>) -> Self {
        self.episode = Some(episode.into());
        self
    }

    pub fn with_backend(mut self, backend: impl Into<String>) -> Self {
        self.backend = Some(backend.into());
        self
    }

    pub fn with_limit(mut self, limit: i64) -> Self {
        self.limit = limit;
        self
    }

    pub fn with_offset(mut self, offset: i64) -> Self {
        self.offset = offset;
        self
    }
}

/// Trait for job storage backends.
///
/// Every mutating operation is atomic: a crash leaves each job either in its
/// previous state or in the new one.
pub trait JobStore: Send + Sync {
    /// Insert a new queued job. Fails with `Duplicate` when an active job
    /// already holds the request's dedup key.
    fn insert(&self, request: &AssetRequest, retry_of: Option<&str>) -> Result<Job, JobError>;

    fn get(&self, id: &str) -> Result<Option<Job>, JobError>;

    fn list(&self, filter: &JobFilter) -> Result<Vec<Job>, JobError>;

    fn count(&self, filter: &JobFilter) -> Result<i64, JobError>;

    /// All jobs of an episode, in enqueue order.
    fn list_by_episode(&self, episode: &str) -> Result<Vec<Job>, JobError>;

    /// The active job for a dedup key, if any.
    fn find_active(&self, dedup_key: &str) -> Result<Option<Job>, JobError>;

    /// Apply a validated state transition.
    fn record(&self, id: &str, transition: StateTransition) -> Result<Job, JobError>;

    /// Atomically claim the next eligible job of a backend and mark it
    /// Dispatched with a fresh submission key.
    ///
    /// Eligible jobs are queued, or retry-scheduled with `retry_at <= now`,
    /// ordered by priority (blocking first) then enqueue order. With
    /// `preserve_order`, a retry that is not yet due at the head of the
    /// queue blocks everything behind it.
    fn claim_next(
        &self,
        backend: &str,
        now: DateTime<Utc>,
        preserve_order: bool,
    ) -> Result<Option<Job>, JobError>;

    /// Flag an in-flight job for best-effort cancellation.
    fn request_cancel(&self, id: &str) -> Result<Job, JobError>;

    /// Earliest scheduled retry, optionally for one backend.
    fn next_retry_at(&self, backend: Option<&str>) -> Result<Option<DateTime<Utc>>, JobError>;

    /// Record the full set of assets an episode requires.
    fn register_episode(&self, slug: &str, requests: &[AssetRequest]) -> Result<(), JobError>;

    fn episode_requirements(&self, slug: &str) -> Result<Option<Vec<AssetRequest>>, JobError>;

    fn list_episodes(&self) -> Result<Vec<String>, JobError>;

    /// Credits charged across every recorded attempt.
    fn total_credits(&self) -> Result<u64, JobError>;

    /// Job counts grouped by state type.
    fn count_by_state(&self) -> Result<Vec<(String, i64)>, JobError>;
}
