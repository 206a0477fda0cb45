//! Job queue: deduplicating admission, priority/FIFO dispatch order,
//! operator cancellation and resubmission.

mod job_queue;
mod types;

pub use job_queue::JobQueue;
pub use types::{CancelOutcome, EnqueueOutcome, PlanOutcome, QueueError};
