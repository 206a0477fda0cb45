//! Job admission, dispatch ordering and operator actions.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use tracing::{debug, info, warn};

use crate::asset::{AssetRequest, EpisodeManifest, EpisodePlan};
use crate::audit::{emit_opt, AuditEvent, AuditHandle};
use crate::backend::BackendRegistry;
use crate::job::{AttemptOutcome, Job, JobError, JobFilter, JobState, JobStore, StateTransition};
use crate::metrics;

use super::{CancelOutcome, EnqueueOutcome, PlanOutcome, QueueError};

/// Attempts at resolving a dedup race before giving up.
const ADMIT_ATTEMPTS: usize = 3;

/// Front door of the job store.
///
/// Admission rejects duplicates of an active job by returning the existing
/// job id, so one logical asset never has two concurrent paid generations.
pub struct JobQueue {
    store: Arc<dyn JobStore>,
    registry: Option<BackendRegistry>,
    audit: Option<AuditHandle>,
    preserve_order: bool,
}

impl JobQueue {
    pub fn new(store: Arc<dyn JobStore>) -> Self {
        Self {
            store,
            registry: None,
            audit: None,
            preserve_order: true,
        }
    }

    /// Validate backends and capabilities against this registry on admission.
    pub fn with_registry(mut self, registry: BackendRegistry) -> Self {
        self.registry = Some(registry);
        self
    }

    pub fn with_audit(mut self, audit: AuditHandle) -> Self {
        self.audit = Some(audit);
        self
    }

    /// When set (the default), a retry that is not yet due blocks the jobs
    /// queued behind it on the same backend.
    pub fn with_preserve_order(mut self, preserve_order: bool) -> Self {
        self.preserve_order = preserve_order;
        self
    }

    pub fn store(&self) -> &Arc<dyn JobStore> {
        &self.store
    }

    fn check(&self, request: &AssetRequest) -> Result<(), QueueError> {
        request.validate()?;
        if let Some(registry) = &self.registry {
            registry
                .check(&request.backend, request.required_capability())
                .map_err(QueueError::Backend)?;
        }
        Ok(())
    }

    /// Admit one request.
    pub async fn enqueue(&self, request: AssetRequest) -> Result<EnqueueOutcome, QueueError> {
        self.check(&request)?;
        self.admit(&request, None).await
    }

    async fn admit(
        &self,
        request: &AssetRequest,
        retry_of: Option<&str>,
    ) -> Result<EnqueueOutcome, QueueError> {
        for _ in 0..ADMIT_ATTEMPTS {
            match self.store.insert(request, retry_of) {
                Ok(job) => {
                    info!(
                        job_id = %job.id,
                        dedup_key = %job.dedup_key,
                        backend = %job.backend(),
                        "Job enqueued"
                    );
                    metrics::JOB_TRANSITIONS.with_label_values(&["queued"]).inc();
                    self.emit_enqueued(&job, false).await;
                    return Ok(EnqueueOutcome {
                        job_id: job.id.clone(),
                        deduplicated: false,
                        job,
                    });
                }
                Err(JobError::Duplicate { existing_id }) => {
                    // The holder may have gone terminal since the insert failed.
                    if let Some(existing) = self.store.get(&existing_id)? {
                        if existing.state.is_active() {
                            debug!(
                                job_id = %existing.id,
                                dedup_key = %existing.dedup_key,
                                "Request deduplicated onto active job"
                            );
                            self.emit_enqueued(&existing, true).await;
                            return Ok(EnqueueOutcome {
                                job_id: existing.id.clone(),
                                deduplicated: true,
                                job: existing,
                            });
                        }
                    }
                }
                Err(e) => return Err(e.into()),
            }
        }
        Err(QueueError::Store(format!(
            "could not admit request {}: dedup key kept changing hands",
            request.dedup_key()
        )))
    }

    async fn emit_enqueued(&self, job: &Job, deduplicated: bool) {
        emit_opt(
            &self.audit,
            AuditEvent::JobEnqueued {
                job_id: job.id.clone(),
                episode: job.episode().to_string(),
                backend: job.backend().to_string(),
                dedup_key: job.dedup_key.clone(),
                deduplicated,
            },
        )
        .await;
    }

    /// Register an episode's required assets and admit every one of them.
    ///
    /// The whole plan is validated before anything is written.
    pub async fn enqueue_plan(
        &self,
        plan: &EpisodePlan,
        registered_by: &str,
    ) -> Result<PlanOutcome, QueueError> {
        let requests = plan.requests()?;
        for request in &requests {
            self.check(request)?;
        }

        self.store.register_episode(&plan.slug, &requests)?;
        emit_opt(
            &self.audit,
            AuditEvent::EpisodeRegistered {
                episode: plan.slug.clone(),
                required_assets: requests.len() as u32,
                registered_by: registered_by.to_string(),
            },
        )
        .await;

        let mut jobs = Vec::with_capacity(requests.len());
        for request in &requests {
            jobs.push(self.admit(request, None).await?);
        }

        let outcome = PlanOutcome {
            episode: plan.slug.clone(),
            jobs,
        };
        info!(
            episode = %plan.slug,
            enqueued = outcome.enqueued(),
            deduplicated = outcome.deduplicated(),
            "Episode plan enqueued"
        );
        Ok(outcome)
    }

    /// Claim the next eligible job of `backend`, marking it Dispatched.
    ///
    /// Blocking-priority jobs come first; within a priority class jobs leave
    /// in enqueue order.
    pub async fn dequeue_next(
        &self,
        backend: &str,
        now: DateTime<Utc>,
    ) -> Result<Option<Job>, QueueError> {
        let Some(job) = self.store.claim_next(backend, now, self.preserve_order)? else {
            return Ok(None);
        };

        let from_state = match job.attempt_history.last().map(|a| a.outcome) {
            Some(AttemptOutcome::Failed) | Some(AttemptOutcome::TimedOut) => "retry_scheduled",
            _ => "queued",
        };
        metrics::JOB_TRANSITIONS
            .with_label_values(&["dispatched"])
            .inc();
        emit_opt(
            &self.audit,
            AuditEvent::JobStateChanged {
                job_id: job.id.clone(),
                episode: job.episode().to_string(),
                from_state: from_state.to_string(),
                to_state: "dispatched".to_string(),
                attempt: job.attempts,
                reason: None,
            },
        )
        .await;
        Ok(Some(job))
    }

    /// Cancel a job on behalf of an operator.
    ///
    /// Queued and retry-scheduled jobs are cancelled outright. A dispatched
    /// job cannot be stopped mid-flight: it is flagged, and the orchestrator
    /// salvages a late success or cancels it when the call fails.
    pub async fn cancel(
        &self,
        job_id: &str,
        cancelled_by: &str,
        reason: Option<String>,
    ) -> Result<CancelOutcome, QueueError> {
        let job = self
            .store
            .get(job_id)?
            .ok_or_else(|| QueueError::NotFound(job_id.to_string()))?;
        let previous_state = job.state.state_type().to_string();

        let outcome = if job.state.can_cancel() {
            let cancelled = JobState::Cancelled {
                cancelled_by: cancelled_by.to_string(),
                reason: reason.clone(),
                cancelled_at: Utc::now(),
            };
            match self.store.record(job_id, StateTransition::to(cancelled)) {
                Ok(job) => CancelOutcome::Cancelled(job),
                // Claimed between the read and the write.
                Err(JobError::InvalidTransition { .. }) => {
                    CancelOutcome::Requested(self.store.request_cancel(job_id)?)
                }
                Err(e) => return Err(e.into()),
            }
        } else if matches!(job.state, JobState::Dispatched { .. }) {
            CancelOutcome::Requested(self.store.request_cancel(job_id)?)
        } else {
            return Err(QueueError::InvalidState {
                job_id: job_id.to_string(),
                current_state: previous_state,
                operation: "cancel".to_string(),
            });
        };

        match &outcome {
            CancelOutcome::Cancelled(job) => {
                info!(job_id = %job.id, by = %cancelled_by, "Job cancelled");
                metrics::JOB_TRANSITIONS
                    .with_label_values(&["cancelled"])
                    .inc();
            }
            CancelOutcome::Requested(job) => {
                warn!(
                    job_id = %job.id,
                    by = %cancelled_by,
                    "Job is in flight; cancellation will apply when the call returns"
                );
            }
        }

        emit_opt(
            &self.audit,
            AuditEvent::CancelRequested {
                job_id: job_id.to_string(),
                episode: outcome.job().episode().to_string(),
                requested_by: cancelled_by.to_string(),
                reason,
                previous_state,
            },
        )
        .await;
        Ok(outcome)
    }

    /// Operator-triggered retry of a failed, abandoned or cancelled job.
    ///
    /// Creates a new job for the same request; the old job stays terminal.
    pub async fn resubmit(
        &self,
        job_id: &str,
        resubmitted_by: &str,
    ) -> Result<EnqueueOutcome, QueueError> {
        let job = self
            .store
            .get(job_id)?
            .ok_or_else(|| QueueError::NotFound(job_id.to_string()))?;
        if !job.state.can_resubmit() {
            return Err(QueueError::InvalidState {
                job_id: job_id.to_string(),
                current_state: job.state.state_type().to_string(),
                operation: "resubmit".to_string(),
            });
        }
        self.check(&job.request)?;

        let outcome = self.admit(&job.request, Some(job_id)).await?;
        if !outcome.deduplicated {
            info!(job_id = %outcome.job_id, retry_of = %job_id, "Job resubmitted");
            emit_opt(
                &self.audit,
                AuditEvent::JobResubmitted {
                    job_id: outcome.job_id.clone(),
                    episode: job.episode().to_string(),
                    retry_of: job_id.to_string(),
                    resubmitted_by: resubmitted_by.to_string(),
                },
            )
            .await;
        }
        Ok(outcome)
    }

    pub fn get(&self, job_id: &str) -> Result<Option<Job>, QueueError> {
        Ok(self.store.get(job_id)?)
    }

    pub fn list(&self, filter: &JobFilter) -> Result<Vec<Job>, QueueError> {
        Ok(self.store.list(filter)?)
    }

    /// Manifest of a registered episode, or None if it was never registered.
    pub fn manifest(&self, episode: &str) -> Result<Option<EpisodeManifest>, QueueError> {
        let Some(required) = self.store.episode_requirements(episode)? else {
            return Ok(None);
        };
        let jobs = self.store.list_by_episode(episode)?;
        Ok(Some(EpisodeManifest::build(episode, &required, &jobs)))
    }
}
