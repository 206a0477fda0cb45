//! Orchestrator configuration.

use serde::{Deserialize, Serialize};

/// Configuration for the job orchestrator.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrchestratorConfig {
    /// Start the dispatch loops together with the HTTP API.
    /// When disabled, jobs are only dispatched by `reelforge run` or via the API.
    #[serde(default)]
    pub enabled: bool,

    /// How long an idle dispatch loop sleeps before looking for work (milliseconds).
    #[serde(default = "default_idle_poll_interval")]
    pub idle_poll_interval_ms: u64,

    /// A retry that is not yet due blocks the jobs queued behind it.
    #[serde(default = "default_preserve_order")]
    pub preserve_order: bool,

    /// Interval between outcome queries for a submission still pending on
    /// the backend after a restart (milliseconds).
    #[serde(default = "default_recovery_poll_interval")]
    pub recovery_poll_interval_ms: u64,
}

fn default_idle_poll_interval() -> u64 {
    2000
}

fn default_preserve_order() -> bool {
    true
}

fn default_recovery_poll_interval() -> u64 {
    5000
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            idle_poll_interval_ms: default_idle_poll_interval(),
            preserve_order: default_preserve_order(),
            recovery_poll_interval_ms: default_recovery_poll_interval(),
        }
    }
}
