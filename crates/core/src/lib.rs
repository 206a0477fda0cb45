pub mod asset;
pub mod audit;
pub mod backend;
pub mod config;
pub mod gate;
pub mod job;
pub mod metrics;
pub mod orchestrator;
pub mod queue;
pub mod retry;
pub mod storage;
pub mod testing;

pub use asset::{Artifact, AssetRequest, AssetType, Capability, EpisodeManifest, EpisodePlan};
pub use audit::{
    create_audit_system, AuditEvent, AuditFilter, AuditHandle, AuditRecord, AuditStore,
    SqliteAuditStore,
};
pub use backend::{BackendRegistry, GenerationBackend};
pub use config::{
    load_config, load_config_from_str, validate_config, Config, ConfigError, SanitizedConfig,
};
pub use gate::{
    GateError, GateStore, HardFail, QualityGate, QualityGateResult, ScoreInputs, SqliteGateStore,
    Verdict,
};
pub use job::{Job, JobError, JobFilter, JobState, JobStore, SqliteJobStore};
pub use orchestrator::{
    JobOrchestrator, OrchestratorConfig, OrchestratorError, OrchestratorStatus, RunSummary,
};
pub use queue::{CancelOutcome, EnqueueOutcome, JobQueue, PlanOutcome, QueueError};
pub use retry::RetryController;
pub use storage::{ArtifactStore, FsArtifactStore};
