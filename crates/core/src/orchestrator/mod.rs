//! Job orchestrator.
//!
//! Drives jobs from the queue through their backends:
//! - **Dispatch**: one loop per backend, a single job in flight per backend session
//! - **Retry**: failures are classified and handed to the retry controller
//! - **Recovery**: on start, in-flight jobs are resolved by querying the backend

mod config;
mod runner;
mod types;

pub use config::OrchestratorConfig;
pub use runner::JobOrchestrator;
pub use types::{DispatchOutcome, OrchestratorError, OrchestratorStatus, RunSummary};
