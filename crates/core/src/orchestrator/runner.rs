//! Job orchestrator implementation.
//!
//! One dispatch loop per backend, each with at most one job in flight:
//! - claim the next eligible job (Dispatched is committed before the call)
//! - invoke the backend under its timeout
//! - persist the artifact, or let the retry controller decide what happens next

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::sync::{broadcast, Mutex, RwLock};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::asset::Artifact;
use crate::audit::{emit_opt, AuditEvent, AuditHandle};
use crate::backend::{AdapterError, BackendRegistry, ErrorClass, GenerationBackend, RemoteOutcome};
use crate::job::{AttemptOutcome, AttemptRecord, Job, JobFilter, JobState, StateTransition};
use crate::metrics;
use crate::queue::JobQueue;
use crate::retry::{DispatchPermit, RetryController, RetryDecision};
use crate::storage::ArtifactStore;

use super::config::OrchestratorConfig;
use super::types::{DispatchOutcome, OrchestratorError, OrchestratorStatus, RunSummary};

/// Breaker clock. Follows the tokio clock so paused-time tests drive cooldowns.
fn now_instant() -> std::time::Instant {
    tokio::time::Instant::now().into_std()
}

/// Everything a dispatch loop needs, shared between the loops.
struct Dispatcher {
    config: OrchestratorConfig,
    queue: Arc<JobQueue>,
    registry: BackendRegistry,
    controller: Arc<RetryController>,
    artifacts: Arc<dyn ArtifactStore>,
    audit: Option<AuditHandle>,
}

/// The job orchestrator - drives queued jobs through their backends.
pub struct JobOrchestrator {
    inner: Arc<Dispatcher>,

    // Runtime state
    running: Arc<AtomicBool>,
    halted: Arc<RwLock<Option<String>>>,
    shutdown_tx: broadcast::Sender<()>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl JobOrchestrator {
    pub fn new(
        config: OrchestratorConfig,
        queue: Arc<JobQueue>,
        registry: BackendRegistry,
        controller: Arc<RetryController>,
        artifacts: Arc<dyn ArtifactStore>,
        audit: Option<AuditHandle>,
    ) -> Self {
        let (shutdown_tx, _) = broadcast::channel(1);

        Self {
            inner: Arc::new(Dispatcher {
                config,
                queue,
                registry,
                controller,
                artifacts,
                audit,
            }),
            running: Arc::new(AtomicBool::new(false)),
            halted: Arc::new(RwLock::new(None)),
            shutdown_tx,
            tasks: Mutex::new(Vec::new()),
        }
    }

    pub fn queue(&self) -> &Arc<JobQueue> {
        &self.inner.queue
    }

    pub fn controller(&self) -> &Arc<RetryController> {
        &self.inner.controller
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Recover in-flight jobs, then spawn one dispatch loop per backend.
    pub async fn start(&self) {
        if self.running.swap(true, Ordering::SeqCst) {
            warn!("Orchestrator already running");
            return;
        }

        info!("Starting job orchestrator");
        *self.halted.write().await = None;

        match self.inner.recover().await {
            Ok(summary) if summary.recovered > 0 => {
                info!(recovered = summary.recovered, "Recovered in-flight jobs");
            }
            Ok(_) => {}
            Err(OrchestratorError::Halted { reason, .. }) => {
                self.running.store(false, Ordering::SeqCst);
                *self.halted.write().await = Some(reason);
                return;
            }
            Err(e) => error!("Recovery failed: {}", e),
        }

        let mut tasks = self.tasks.lock().await;
        tasks.retain(|task| !task.is_finished());
        for backend in self.inner.registry.names() {
            tasks.push(self.spawn_dispatch_loop(backend));
        }

        info!(backends = self.inner.registry.len(), "Job orchestrator started");
    }

    /// Stop the orchestrator, waiting for in-flight invocations to settle.
    pub async fn stop(&self) {
        if !self.running.swap(false, Ordering::SeqCst) {
            warn!("Orchestrator not running");
            return;
        }

        info!("Stopping job orchestrator");
        let _ = self.shutdown_tx.send(());

        let tasks: Vec<JoinHandle<()>> = self.tasks.lock().await.drain(..).collect();
        for task in tasks {
            if let Err(e) = task.await {
                warn!("Dispatch loop ended abnormally: {}", e);
            }
        }

        info!("Job orchestrator stopped");
    }

    pub async fn status(&self) -> OrchestratorStatus {
        OrchestratorStatus {
            running: self.is_running(),
            halted: self.halted.read().await.clone(),
            backends: self.inner.registry.names(),
            circuits: self.inner.controller.breaker_states(now_instant()),
            credits: Some(self.inner.controller.ledger().snapshot()),
            jobs: self
                .inner
                .queue
                .store()
                .count_by_state()
                .unwrap_or_default(),
        }
    }

    /// Claim and process at most one job of `backend`.
    pub async fn dispatch_once(&self, backend: &str) -> Result<DispatchOutcome, OrchestratorError> {
        self.inner.dispatch_once(backend).await
    }

    /// Resolve every job left Dispatched by a previous process.
    ///
    /// The backend is asked what became of each submission; nothing is
    /// dispatched a second time.
    pub async fn recover(&self) -> Result<RunSummary, OrchestratorError> {
        self.inner.recover().await
    }

    /// Drain every backend's queue, waiting for scheduled retries.
    pub async fn run_until_idle(&self) -> Result<RunSummary, OrchestratorError> {
        let backends = self.inner.registry.names();
        self.run_backends_until_idle(&backends).await
    }

    /// Drain the named backends concurrently.
    ///
    /// An operational failure on one backend stops all of them and is
    /// reported in `RunSummary::halted`.
    pub async fn run_backends_until_idle(
        &self,
        backends: &[String],
    ) -> Result<RunSummary, OrchestratorError> {
        for backend in backends {
            if self.inner.registry.get(backend).is_none() {
                return Err(OrchestratorError::UnknownBackend(backend.clone()));
            }
        }

        let halted = AtomicBool::new(false);
        let drains = backends
            .iter()
            .map(|backend| self.inner.drain(backend, &halted));
        let results = futures::future::join_all(drains).await;

        let mut summary = RunSummary::default();
        for result in results {
            summary.merge(result?);
        }
        Ok(summary)
    }

    fn spawn_dispatch_loop(&self, backend: String) -> JoinHandle<()> {
        let inner = Arc::clone(&self.inner);
        let running = Arc::clone(&self.running);
        let halted = Arc::clone(&self.halted);
        let shutdown_tx = self.shutdown_tx.clone();
        let mut shutdown_rx = self.shutdown_tx.subscribe();
        let idle = Duration::from_millis(inner.config.idle_poll_interval_ms);

        tokio::spawn(async move {
            info!(backend = %backend, "Dispatch loop started");
            while running.load(Ordering::SeqCst) {
                let pause = match inner.dispatch_once(&backend).await {
                    Ok(DispatchOutcome::Processed(_)) => Duration::ZERO,
                    Ok(DispatchOutcome::Deferred { remaining }) => remaining.min(idle),
                    Ok(DispatchOutcome::Idle) => idle,
                    Err(OrchestratorError::Halted { reason, .. }) => {
                        running.store(false, Ordering::SeqCst);
                        *halted.write().await = Some(reason);
                        let _ = shutdown_tx.send(());
                        break;
                    }
                    Err(e) => {
                        warn!(backend = %backend, "Dispatch error: {}", e);
                        idle
                    }
                };

                if pause.is_zero() {
                    continue;
                }
                tokio::select! {
                    _ = shutdown_rx.recv() => {
                        debug!(backend = %backend, "Dispatch loop received shutdown signal");
                        break;
                    }
                    _ = tokio::time::sleep(pause) => {}
                }
            }
            info!(backend = %backend, "Dispatch loop stopped");
        })
    }
}

impl Dispatcher {
    async fn dispatch_once(&self, name: &str) -> Result<DispatchOutcome, OrchestratorError> {
        let backend = self
            .registry
            .get(name)
            .ok_or_else(|| OrchestratorError::UnknownBackend(name.to_string()))?;

        let trial = match self.controller.permit(name, now_instant()) {
            DispatchPermit::BudgetExhausted { spent, budget } => {
                let reason = format!(
                    "credit budget of {} reached ({} spent)",
                    budget, spent
                );
                return Err(self.halt(name, None, reason).await);
            }
            DispatchPermit::Deferred { remaining } => {
                metrics::DISPATCH_DEFERRED.with_label_values(&[name]).inc();
                debug!(backend = %name, remaining_ms = remaining.as_millis() as u64, "Circuit open, dispatch deferred");
                return Ok(DispatchOutcome::Deferred { remaining });
            }
            DispatchPermit::Proceed { trial } => trial,
        };

        let claimed = self.queue.dequeue_next(name, Utc::now()).await;
        let job = match claimed {
            Ok(Some(job)) => job,
            Ok(None) => {
                if trial {
                    self.controller.release(name);
                }
                return Ok(DispatchOutcome::Idle);
            }
            Err(e) => {
                if trial {
                    self.controller.release(name);
                }
                return Err(e.into());
            }
        };

        if trial {
            metrics::CIRCUIT_STATE.with_label_values(&[name]).set(2);
            info!(backend = %name, job_id = %job.id, "Sending half-open trial");
        }

        let job = self.invoke(backend.as_ref(), job).await?;
        Ok(DispatchOutcome::Processed(Box::new(job)))
    }

    async fn invoke(
        &self,
        backend: &dyn GenerationBackend,
        job: Job,
    ) -> Result<Job, OrchestratorError> {
        let started_at = Utc::now();
        let clock = tokio::time::Instant::now();
        let timeout = backend.timeout();

        info!(
            job_id = %job.id,
            backend = %backend.name(),
            attempt = job.attempts,
            submission_key = %job.submission_key(),
            "Invoking backend"
        );

        let (result, timed_out) = match tokio::time::timeout(timeout, backend.invoke(&job)).await {
            Ok(result) => (result, false),
            Err(_) => (
                Err(AdapterError::timeout(format!(
                    "no result within {}s",
                    timeout.as_secs()
                ))),
                true,
            ),
        };
        let elapsed = clock.elapsed();
        metrics::BACKEND_INVOCATION_DURATION
            .with_label_values(&[backend.name()])
            .observe(elapsed.as_secs_f64());

        match result {
            Ok(artifact) => {
                self.record_invocation(&job, None, artifact.credits, elapsed)
                    .await;
                self.complete(job, artifact, started_at, AttemptOutcome::Succeeded)
                    .await
            }
            Err(error) => {
                self.record_invocation(&job, Some(&error), 0, elapsed).await;
                let outcome = if timed_out {
                    AttemptOutcome::TimedOut
                } else {
                    AttemptOutcome::Failed
                };
                self.fail(job, error, started_at, outcome).await
            }
        }
    }

    async fn record_invocation(
        &self,
        job: &Job,
        error: Option<&AdapterError>,
        credits: u32,
        elapsed: Duration,
    ) {
        let outcome = error.map(|e| e.kind()).unwrap_or("succeeded");
        metrics::BACKEND_INVOCATIONS
            .with_label_values(&[job.backend(), outcome])
            .inc();

        match error {
            None => info!(
                job_id = %job.id,
                backend = %job.backend(),
                attempt = job.attempts,
                credits,
                duration_ms = elapsed.as_millis() as u64,
                "Backend invocation succeeded"
            ),
            Some(e) => warn!(
                job_id = %job.id,
                backend = %job.backend(),
                attempt = job.attempts,
                error_class = %e.class(),
                duration_ms = elapsed.as_millis() as u64,
                "Backend invocation failed: {}",
                e
            ),
        }

        emit_opt(
            &self.audit,
            AuditEvent::AdapterInvoked {
                job_id: job.id.clone(),
                episode: job.episode().to_string(),
                backend: job.backend().to_string(),
                attempt: job.attempts,
                submission_key: job.submission_key(),
                outcome: outcome.to_string(),
                error_class: error.map(|e| e.class().to_string()),
                error: error.map(|e| e.to_string()),
                credits,
                duration_ms: elapsed.as_millis() as u64,
            },
        )
        .await;
    }

    /// The flag may have been set while the call was in flight.
    fn cancel_requested(&self, job_id: &str) -> Result<bool, OrchestratorError> {
        Ok(self
            .queue
            .get(job_id)?
            .map(|job| job.cancel_requested)
            .unwrap_or(false))
    }

    async fn complete(
        &self,
        job: Job,
        artifact: Artifact,
        started_at: DateTime<Utc>,
        outcome: AttemptOutcome,
    ) -> Result<Job, OrchestratorError> {
        let backend = job.backend().to_string();
        let credits = artifact.credits;

        if self.controller.on_success(&backend, u64::from(credits)) {
            self.circuit_closed(&backend).await;
        }
        if credits > 0 {
            metrics::CREDITS_SPENT
                .with_label_values(&[backend.as_str()])
                .inc_by(u64::from(credits));
        }

        let attempt = AttemptRecord {
            attempt: job.attempts,
            started_at,
            finished_at: Utc::now(),
            outcome,
            error_class: None,
            error: None,
            credits,
        };
        let salvaged = self.cancel_requested(&job.id)?;

        let state = match self.artifacts.persist(&job.request, &artifact).await {
            Ok(stored) => {
                metrics::ARTIFACTS_PERSISTED.inc();
                emit_opt(
                    &self.audit,
                    AuditEvent::ArtifactPersisted {
                        job_id: job.id.clone(),
                        episode: job.episode().to_string(),
                        stored_path: stored.stored_path.clone().unwrap_or_default(),
                        content_hash: stored.content_hash.clone().unwrap_or_default(),
                    },
                )
                .await;
                if salvaged {
                    info!(job_id = %job.id, "Salvaged late success of a cancel-requested job");
                }
                JobState::Succeeded {
                    artifact: stored,
                    completed_at: Utc::now(),
                    salvaged,
                }
            }
            Err(e) => {
                error!(job_id = %job.id, location = %artifact.location, "Artifact could not be persisted: {}", e);
                JobState::Failed {
                    error: format!("artifact could not be persisted: {}", e),
                    failed_at: Utc::now(),
                    artifact: Some(artifact),
                }
            }
        };

        self.transition(&job, state, Some(attempt)).await
    }

    async fn fail(
        &self,
        job: Job,
        error: AdapterError,
        started_at: DateTime<Utc>,
        outcome: AttemptOutcome,
    ) -> Result<Job, OrchestratorError> {
        let backend = job.backend().to_string();
        let waited = (Utc::now() - job.created_at).to_std().unwrap_or_default();

        let resolution =
            self.controller
                .on_failure(&backend, &error, job.attempts, waited, now_instant());
        if resolution.circuit_opened {
            self.circuit_opened(&backend).await;
        }

        let now = Utc::now();
        let attempt = AttemptRecord {
            attempt: job.attempts,
            started_at,
            finished_at: now,
            outcome,
            error_class: Some(error.class()),
            error: Some(error.to_string()),
            credits: 0,
        };
        let cancel_requested = self.cancel_requested(&job.id)?;

        let mut halt_reason = None;
        let state = match resolution.decision {
            RetryDecision::Halt { reason } => {
                halt_reason = Some(reason.clone());
                JobState::Failed {
                    error: reason,
                    failed_at: now,
                    artifact: None,
                }
            }
            _ if cancel_requested => JobState::Cancelled {
                cancelled_by: "operator".to_string(),
                reason: Some(format!("cancelled while in flight; call failed: {}", error)),
                cancelled_at: now,
            },
            RetryDecision::Retry { delay } => {
                metrics::RETRIES_SCHEDULED
                    .with_label_values(&[backend.as_str()])
                    .inc();
                let delay = chrono::Duration::from_std(delay).unwrap_or_else(|_| chrono::Duration::zero());
                JobState::RetryScheduled {
                    error: error.to_string(),
                    error_class: error.class(),
                    retry_at: now + delay,
                }
            }
            RetryDecision::Abandon { reason } => JobState::Abandoned {
                reason,
                error_class: error.class(),
                abandoned_at: now,
            },
        };

        let job = self.transition(&job, state, Some(attempt)).await?;
        if let Some(reason) = halt_reason {
            return Err(self.halt(&backend, Some(&job.id), reason).await);
        }
        Ok(job)
    }

    async fn transition(
        &self,
        job: &Job,
        state: JobState,
        attempt: Option<AttemptRecord>,
    ) -> Result<Job, OrchestratorError> {
        let from_state = job.state.state_type();
        let to_state = state.state_type();
        let reason = state_reason(&state);

        let mut transition = StateTransition::to(state);
        if let Some(attempt) = attempt {
            transition = transition.with_attempt(attempt);
        }
        let updated = self.queue.store().record(&job.id, transition)?;

        metrics::JOB_TRANSITIONS.with_label_values(&[to_state]).inc();
        info!(
            job_id = %job.id,
            from = from_state,
            to = to_state,
            attempt = job.attempts,
            "Job state changed"
        );
        emit_opt(
            &self.audit,
            AuditEvent::JobStateChanged {
                job_id: job.id.clone(),
                episode: job.episode().to_string(),
                from_state: from_state.to_string(),
                to_state: to_state.to_string(),
                attempt: job.attempts,
                reason,
            },
        )
        .await;
        Ok(updated)
    }

    async fn circuit_opened(&self, backend: &str) {
        let config = self.controller.breaker_config();
        metrics::CIRCUIT_OPENS.with_label_values(&[backend]).inc();
        metrics::CIRCUIT_STATE.with_label_values(&[backend]).set(1);
        warn!(
            backend = %backend,
            cooldown_secs = config.cooldown_secs,
            "Circuit opened after repeated rate limits"
        );
        emit_opt(
            &self.audit,
            AuditEvent::CircuitOpened {
                backend: backend.to_string(),
                failures: config.failure_threshold,
                cooldown_secs: config.cooldown_secs,
            },
        )
        .await;
    }

    async fn circuit_closed(&self, backend: &str) {
        metrics::CIRCUIT_STATE.with_label_values(&[backend]).set(0);
        info!(backend = %backend, "Circuit closed");
        emit_opt(
            &self.audit,
            AuditEvent::CircuitClosed {
                backend: backend.to_string(),
            },
        )
        .await;
    }

    async fn halt(&self, backend: &str, job_id: Option<&str>, reason: String) -> OrchestratorError {
        metrics::RUN_HALTS.inc();
        error!(backend = %backend, job_id = ?job_id, "Dispatch halted: {}", reason);
        emit_opt(
            &self.audit,
            AuditEvent::RunHalted {
                job_id: job_id.map(String::from),
                backend: backend.to_string(),
                reason: reason.clone(),
            },
        )
        .await;
        OrchestratorError::Halted {
            backend: backend.to_string(),
            reason,
        }
    }

    async fn recover(&self) -> Result<RunSummary, OrchestratorError> {
        let jobs = self
            .queue
            .list(&JobFilter::new().with_state("dispatched").with_limit(i64::MAX))?;
        let mut summary = RunSummary::default();

        for job in jobs {
            let Some(backend) = self.registry.get(job.backend()) else {
                warn!(
                    job_id = %job.id,
                    backend = %job.backend(),
                    "In-flight job belongs to an unconfigured backend; leaving it dispatched"
                );
                continue;
            };

            let remote = match self.query_until_settled(backend.as_ref(), &job).await {
                Ok(remote) => remote,
                Err(e) if e.class() == ErrorClass::Operational => {
                    return Err(self.halt(job.backend(), Some(&job.id), e.to_string()).await);
                }
                Err(e) => {
                    warn!(
                        job_id = %job.id,
                        "Could not query backend for in-flight job, leaving it dispatched: {}",
                        e
                    );
                    continue;
                }
            };

            metrics::JOBS_RECOVERED
                .with_label_values(&[remote.as_str()])
                .inc();
            info!(
                job_id = %job.id,
                submission_key = %job.submission_key(),
                remote_outcome = remote.as_str(),
                "Resolved in-flight job"
            );
            emit_opt(
                &self.audit,
                AuditEvent::RecoveryResolved {
                    job_id: job.id.clone(),
                    episode: job.episode().to_string(),
                    backend: job.backend().to_string(),
                    submission_key: job.submission_key(),
                    remote_outcome: remote.as_str().to_string(),
                },
            )
            .await;
            summary.recovered += 1;

            let started_at = job.last_attempt_at.unwrap_or(job.updated_at);
            let resolved = match remote {
                RemoteOutcome::Completed(artifact) => {
                    self.complete(job, artifact, started_at, AttemptOutcome::Recovered)
                        .await?
                }
                RemoteOutcome::Failed(error) => {
                    self.fail(job, error, started_at, AttemptOutcome::Failed)
                        .await?
                }
                RemoteOutcome::Pending => {
                    let error = AdapterError::timeout(format!(
                        "submission still pending after {}s",
                        backend.timeout().as_secs()
                    ));
                    self.fail(job, error, started_at, AttemptOutcome::TimedOut)
                        .await?
                }
                RemoteOutcome::Unknown => {
                    self.transition(&job, JobState::Queued, None).await?;
                    continue;
                }
            };
            summary.record(&resolved.state);
        }

        Ok(summary)
    }

    /// Query a submission, polling while the backend reports it pending,
    /// for at most the backend's invocation timeout.
    async fn query_until_settled(
        &self,
        backend: &dyn GenerationBackend,
        job: &Job,
    ) -> Result<RemoteOutcome, AdapterError> {
        let deadline = tokio::time::Instant::now() + backend.timeout();
        let interval = Duration::from_millis(self.config.recovery_poll_interval_ms);

        loop {
            let outcome = backend.query_outcome(job).await?;
            if !matches!(outcome, RemoteOutcome::Pending)
                || tokio::time::Instant::now() + interval > deadline
            {
                return Ok(outcome);
            }
            debug!(job_id = %job.id, "Submission still pending on backend");
            tokio::time::sleep(interval).await;
        }
    }

    fn has_pending(&self, backend: &str) -> Result<bool, OrchestratorError> {
        let store = self.queue.store();
        for state in ["queued", "retry_scheduled"] {
            let filter = JobFilter::new().with_backend(backend).with_state(state);
            if store.count(&filter)? > 0 {
                return Ok(true);
            }
        }
        Ok(false)
    }

    async fn drain(
        &self,
        backend: &str,
        halted: &AtomicBool,
    ) -> Result<RunSummary, OrchestratorError> {
        let mut summary = RunSummary::default();

        while !halted.load(Ordering::SeqCst) {
            match self.dispatch_once(backend).await {
                Ok(DispatchOutcome::Processed(job)) => summary.record(&job.state),
                Ok(DispatchOutcome::Deferred { remaining }) => {
                    if !self.has_pending(backend)? {
                        break;
                    }
                    summary.deferred += 1;
                    tokio::time::sleep(remaining).await;
                }
                Ok(DispatchOutcome::Idle) => {
                    let Some(retry_at) = self.queue.store().next_retry_at(Some(backend))? else {
                        break;
                    };
                    let wait = (retry_at - Utc::now()).to_std().unwrap_or(Duration::ZERO);
                    debug!(backend = %backend, wait_ms = wait.as_millis() as u64, "Waiting for scheduled retry");
                    tokio::time::sleep(wait.max(Duration::from_millis(1))).await;
                }
                Err(OrchestratorError::Halted { reason, .. }) => {
                    halted.store(true, Ordering::SeqCst);
                    summary.halted = Some(reason);
                    break;
                }
                Err(e) => return Err(e),
            }
        }

        Ok(summary)
    }
}

fn state_reason(state: &JobState) -> Option<String> {
    match state {
        JobState::RetryScheduled { error, .. } | JobState::Failed { error, .. } => {
            Some(error.clone())
        }
        JobState::Abandoned { reason, .. } => Some(reason.clone()),
        JobState::Cancelled { reason, .. } => reason.clone(),
        JobState::Succeeded { salvaged: true, .. } => Some("salvaged after cancellation request".to_string()),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::asset::Capability;
    use crate::job::SqliteJobStore;
    use crate::retry::{CircuitBreakerConfig, RetryConfig};
    use crate::testing::{fixtures, MockArtifactStore, MockBackend};

    struct Harness {
        orchestrator: JobOrchestrator,
        backend: Arc<MockBackend>,
        artifacts: Arc<MockArtifactStore>,
    }

    fn harness(retry: RetryConfig) -> Harness {
        let store = Arc::new(SqliteJobStore::in_memory().unwrap());
        let backend = Arc::new(MockBackend::new("dzine"));
        let registry = BackendRegistry::new().with_backend(backend.clone());
        let queue = Arc::new(JobQueue::new(store).with_registry(registry.clone()));
        let controller = Arc::new(RetryController::new(
            &retry,
            &CircuitBreakerConfig::default(),
            0,
        ));
        let artifacts = Arc::new(MockArtifactStore::new());
        let orchestrator = JobOrchestrator::new(
            OrchestratorConfig::default(),
            queue,
            registry,
            controller,
            artifacts.clone(),
            None,
        );
        Harness {
            orchestrator,
            backend,
            artifacts,
        }
    }

    fn fast_retries() -> RetryConfig {
        RetryConfig {
            base_delay_ms: 0,
            max_delay_ms: 0,
            ..RetryConfig::default()
        }
    }

    #[tokio::test]
    async fn test_dispatch_once_idle() {
        let h = harness(fast_retries());
        let outcome = h.orchestrator.dispatch_once("dzine").await.unwrap();
        assert_eq!(outcome, DispatchOutcome::Idle);
        assert_eq!(h.backend.invocation_count().await, 0);
    }

    #[tokio::test]
    async fn test_dispatch_once_unknown_backend() {
        let h = harness(fast_retries());
        assert!(matches!(
            h.orchestrator.dispatch_once("kling").await,
            Err(OrchestratorError::UnknownBackend(_))
        ));
    }

    #[tokio::test]
    async fn test_dispatch_once_success_persists_artifact() {
        let h = harness(fast_retries());
        h.orchestrator
            .queue()
            .enqueue(fixtures::asset_request("ep", Some(1)))
            .await
            .unwrap();

        let DispatchOutcome::Processed(job) = h.orchestrator.dispatch_once("dzine").await.unwrap()
        else {
            panic!("expected a processed job");
        };
        match &job.state {
            JobState::Succeeded {
                artifact, salvaged, ..
            } => {
                assert!(artifact.is_persisted());
                assert!(!salvaged);
            }
            other => panic!("unexpected state {:?}", other),
        }
        assert_eq!(job.attempt_history.len(), 1);
        assert_eq!(h.artifacts.persisted().await.len(), 1);
        assert_eq!(h.orchestrator.controller().ledger().spent(), 1);
    }

    #[tokio::test]
    async fn test_transient_failure_schedules_retry() {
        let h = harness(fast_retries());
        h.backend.push_error(AdapterError::network("reset")).await;
        h.orchestrator
            .queue()
            .enqueue(fixtures::asset_request("ep", Some(1)))
            .await
            .unwrap();

        let DispatchOutcome::Processed(job) = h.orchestrator.dispatch_once("dzine").await.unwrap()
        else {
            panic!("expected a processed job");
        };
        assert!(matches!(
            job.state,
            JobState::RetryScheduled {
                error_class: ErrorClass::Transient,
                ..
            }
        ));
        assert_eq!(job.attempt_history[0].outcome, AttemptOutcome::Failed);
    }

    #[tokio::test]
    async fn test_storage_failure_marks_job_failed() {
        let h = harness(fast_retries());
        h.artifacts
            .set_next_error(crate::storage::StorageError::UnsupportedLocation(
                "ftp://x".to_string(),
            ))
            .await;
        h.orchestrator
            .queue()
            .enqueue(fixtures::asset_request("ep", Some(1)))
            .await
            .unwrap();

        let DispatchOutcome::Processed(job) = h.orchestrator.dispatch_once("dzine").await.unwrap()
        else {
            panic!("expected a processed job");
        };
        match job.state {
            JobState::Failed { artifact, .. } => assert!(artifact.is_some()),
            other => panic!("unexpected state {:?}", other),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_invocation_timeout() {
        let backend = Arc::new(
            MockBackend::new("slow")
                .with_timeout(Duration::from_secs(5))
                .with_capabilities(vec![Capability::TextToImage]),
        );
        backend.set_delay(Duration::from_secs(60)).await;
        let queue = Arc::new(JobQueue::new(Arc::new(SqliteJobStore::in_memory().unwrap())));
        let orchestrator = JobOrchestrator::new(
            OrchestratorConfig::default(),
            queue,
            BackendRegistry::new().with_backend(backend.clone()),
            Arc::new(RetryController::new(
                &fast_retries(),
                &CircuitBreakerConfig::default(),
                0,
            )),
            Arc::new(MockArtifactStore::new()),
            None,
        );

        let mut request = fixtures::asset_request("ep", Some(1));
        request.backend = "slow".to_string();
        orchestrator.queue().enqueue(request).await.unwrap();

        let DispatchOutcome::Processed(job) = orchestrator.dispatch_once("slow").await.unwrap()
        else {
            panic!("expected a processed job");
        };
        assert!(matches!(job.state, JobState::RetryScheduled { .. }));
        assert_eq!(job.attempt_history[0].outcome, AttemptOutcome::TimedOut);
    }

    #[tokio::test]
    async fn test_status_reports_backends_and_counts() {
        let h = harness(fast_retries());
        h.orchestrator
            .queue()
            .enqueue(fixtures::asset_request("ep", Some(1)))
            .await
            .unwrap();

        let status = h.orchestrator.status().await;
        assert!(!status.running);
        assert_eq!(status.backends, vec!["dzine".to_string()]);
        assert!(status.jobs.contains(&("queued".to_string(), 1)));
        assert_eq!(status.credits.unwrap().spent, 0);
    }

    #[tokio::test]
    async fn test_start_and_stop_loops() {
        let h = harness(fast_retries());
        h.orchestrator
            .queue()
            .enqueue(fixtures::asset_request("ep", Some(1)))
            .await
            .unwrap();

        h.orchestrator.start().await;
        assert!(h.orchestrator.is_running());

        for _ in 0..100 {
            if h.backend.invocation_count().await > 0 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        h.orchestrator.stop().await;
        assert!(!h.orchestrator.is_running());
        assert_eq!(h.backend.invocation_count().await, 1);
    }
}
