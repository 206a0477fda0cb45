use std::sync::Arc;

use anyhow::{Context, Result};
use tracing::info;

use reelforge_core::{
    AuditHandle, AuditStore, BackendRegistry, Config, FsArtifactStore, JobOrchestrator, JobQueue,
    JobStore, QualityGate, RetryController, SanitizedConfig, SqliteGateStore, SqliteJobStore,
};

/// Shared application state
pub struct AppState {
    config: Config,
    queue: Arc<JobQueue>,
    orchestrator: Arc<JobOrchestrator>,
    gate: Arc<QualityGate>,
    audit: AuditHandle,
    audit_store: Arc<dyn AuditStore>,
}

impl AppState {
    pub fn new(
        config: Config,
        queue: Arc<JobQueue>,
        orchestrator: Arc<JobOrchestrator>,
        gate: Arc<QualityGate>,
        audit: AuditHandle,
        audit_store: Arc<dyn AuditStore>,
    ) -> Self {
        Self {
            config,
            queue,
            orchestrator,
            gate,
            audit,
            audit_store,
        }
    }

    /// Wire stores, backends and the orchestrator from configuration.
    ///
    /// Everything shares the configured database file.
    pub fn from_config(
        config: Config,
        audit: AuditHandle,
        audit_store: Arc<dyn AuditStore>,
    ) -> Result<Self> {
        let db_path = &config.database.path;

        let job_store: Arc<dyn JobStore> = Arc::new(
            SqliteJobStore::new(db_path).context("Failed to create job store")?,
        );
        info!("Job store initialized");

        let registry =
            BackendRegistry::from_config(&config).context("Failed to initialize backends")?;
        info!(backends = ?registry.names(), "Backends initialized");

        let queue = Arc::new(
            JobQueue::new(Arc::clone(&job_store))
                .with_registry(registry.clone())
                .with_audit(audit.clone())
                .with_preserve_order(config.orchestrator.preserve_order),
        );

        let spent = job_store
            .total_credits()
            .context("Failed to read credit ledger")?;
        let controller = Arc::new(RetryController::new(
            &config.retry,
            &config.circuit_breaker,
            spent,
        ));
        info!(spent, budget = ?config.retry.budget_credits, "Credit ledger loaded");

        let artifacts = Arc::new(FsArtifactStore::new(&config.storage.root));

        let orchestrator = Arc::new(JobOrchestrator::new(
            config.orchestrator.clone(),
            Arc::clone(&queue),
            registry,
            controller,
            artifacts,
            Some(audit.clone()),
        ));

        let gate_store = Arc::new(
            SqliteGateStore::new(db_path).context("Failed to create gate store")?,
        );
        let gate = Arc::new(
            QualityGate::new(gate_store, config.quality_gate.clone()).with_audit(audit.clone()),
        );

        Ok(Self::new(
            config,
            queue,
            orchestrator,
            gate,
            audit,
            audit_store,
        ))
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn sanitized_config(&self) -> SanitizedConfig {
        SanitizedConfig::from(&self.config)
    }

    pub fn queue(&self) -> &Arc<JobQueue> {
        &self.queue
    }

    pub fn orchestrator(&self) -> &Arc<JobOrchestrator> {
        &self.orchestrator
    }

    pub fn gate(&self) -> &Arc<QualityGate> {
        &self.gate
    }

    pub fn audit(&self) -> &AuditHandle {
        &self.audit
    }

    pub fn audit_store(&self) -> &Arc<dyn AuditStore> {
        &self.audit_store
    }
}
