//! Generation jobs and their crash-consistent store.

mod sqlite_store;
mod store;
mod types;

pub use sqlite_store::SqliteJobStore;
pub use store::{JobError, JobFilter, JobStore};
pub use types::{AttemptOutcome, AttemptRecord, Job, JobState, StateTransition};
