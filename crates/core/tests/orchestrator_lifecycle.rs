//! Orchestrator lifecycle integration tests.
//!
//! These tests drive jobs through the orchestrator with a mock backend:
//! queued -> dispatched -> succeeded | retry_scheduled | abandoned | failed | cancelled

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use tempfile::TempDir;

use reelforge_core::{
    asset::AssetType,
    audit::{spawn_audit_system, AuditFilter, AuditStore, SqliteAuditStore},
    backend::{AdapterError, BackendRegistry, RemoteOutcome},
    job::{AttemptOutcome, JobState, JobStore, SqliteJobStore},
    orchestrator::DispatchOutcome,
    queue::CancelOutcome,
    retry::{CircuitBreakerConfig, RetryConfig, RetryController},
    testing::{fixtures, MockArtifactStore, MockBackend},
    JobOrchestrator, JobQueue, OrchestratorConfig,
};

/// Test helper wiring an orchestrator to a mock backend over a file database.
struct TestHarness {
    orchestrator: Arc<JobOrchestrator>,
    queue: Arc<JobQueue>,
    store: Arc<SqliteJobStore>,
    backend: Arc<MockBackend>,
    artifacts: Arc<MockArtifactStore>,
}

impl TestHarness {
    fn new(db_path: &Path) -> Self {
        Self::build(
            db_path,
            Arc::new(MockBackend::new("dzine")),
            fast_retries(),
            CircuitBreakerConfig::default(),
            None,
        )
    }

    fn build(
        db_path: &Path,
        backend: Arc<MockBackend>,
        retry: RetryConfig,
        breaker: CircuitBreakerConfig,
        audit: Option<reelforge_core::audit::AuditHandle>,
    ) -> Self {
        let store = Arc::new(SqliteJobStore::new(db_path).expect("Failed to create job store"));
        let registry = BackendRegistry::new().with_backend(backend.clone());
        let mut queue = JobQueue::new(store.clone() as Arc<dyn JobStore>)
            .with_registry(registry.clone());
        if let Some(audit) = &audit {
            queue = queue.with_audit(audit.clone());
        }
        let queue = Arc::new(queue);

        let spent = store.total_credits().unwrap();
        let controller = Arc::new(RetryController::new(&retry, &breaker, spent));
        let artifacts = Arc::new(MockArtifactStore::new());

        let orchestrator = Arc::new(JobOrchestrator::new(
            OrchestratorConfig {
                idle_poll_interval_ms: 20,
                recovery_poll_interval_ms: 10,
                ..OrchestratorConfig::default()
            },
            queue.clone(),
            registry,
            controller,
            artifacts.clone(),
            audit,
        ));

        Self {
            orchestrator,
            queue,
            store,
            backend,
            artifacts,
        }
    }

    async fn enqueue(&self, rank: Option<u8>) -> String {
        self.queue
            .enqueue(fixtures::asset_request("best-air-fryers", rank))
            .await
            .expect("enqueue failed")
            .job_id
    }

    fn state(&self, job_id: &str) -> JobState {
        self.store.get(job_id).unwrap().expect("job exists").state
    }
}

fn fast_retries() -> RetryConfig {
    RetryConfig {
        max_attempts: 3,
        base_delay_ms: 0,
        max_delay_ms: 0,
        ..RetryConfig::default()
    }
}

async fn wait_for_dispatch(store: &SqliteJobStore, job_id: &str) {
    for _ in 0..200 {
        let job = store.get(job_id).unwrap().unwrap();
        if matches!(job.state, JobState::Dispatched { .. }) {
            return;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    panic!("job {} was never dispatched", job_id);
}

#[tokio::test]
async fn test_episode_plan_runs_to_asset_complete() {
    let temp_dir = TempDir::new().unwrap();
    let db_path = temp_dir.path().join("reelforge.db");
    let audit_store = Arc::new(SqliteAuditStore::new(&db_path).unwrap());
    let (audit, writer) = spawn_audit_system(audit_store.clone(), 256);

    let h = TestHarness::build(
        &db_path,
        Arc::new(MockBackend::new("dzine").with_credits(4)),
        fast_retries(),
        CircuitBreakerConfig::default(),
        Some(audit),
    );
    let plan = fixtures::episode_plan("best-air-fryers");
    h.queue.enqueue_plan(&plan, "operator").await.unwrap();

    let summary = h.orchestrator.run_until_idle().await.unwrap();
    assert_eq!(summary.succeeded, 3);
    assert_eq!(summary.exit_code(), 0);

    let manifest = h.queue.manifest("best-air-fryers").unwrap().unwrap();
    assert!(manifest.is_asset_complete());
    assert!(manifest.has_publishable_visual());
    assert_eq!(h.artifacts.persisted().await.len(), 3);
    assert_eq!(h.store.total_credits().unwrap(), 12);
    assert_eq!(h.orchestrator.controller().ledger().spent(), 12);

    drop(h);
    writer.await.unwrap();
    let invocations = audit_store
        .count(&AuditFilter::new().with_event_type("adapter_invoked"))
        .unwrap();
    assert_eq!(invocations, 3);
}

#[tokio::test]
async fn test_transient_errors_past_max_attempts_are_abandoned() {
    let temp_dir = TempDir::new().unwrap();
    let h = TestHarness::new(&temp_dir.path().join("reelforge.db"));
    h.backend
        .push_errors(AdapterError::network("connection reset"), 5)
        .await;
    let job_id = h.enqueue(Some(1)).await;

    let summary = h.orchestrator.run_until_idle().await.unwrap();
    assert_eq!(summary.retried, 2);
    assert_eq!(summary.abandoned, 1);
    assert_eq!(summary.exit_code(), 1);

    let job = h.store.get(&job_id).unwrap().unwrap();
    assert!(matches!(job.state, JobState::Abandoned { .. }));
    assert_eq!(job.attempts, 3);
    assert_eq!(job.attempt_history.len(), 3);
    assert_eq!(h.backend.invocation_count().await, 3);
}

#[tokio::test]
async fn test_permanent_error_is_never_retried() {
    let temp_dir = TempDir::new().unwrap();
    let h = TestHarness::new(&temp_dir.path().join("reelforge.db"));
    h.backend
        .push_error(AdapterError::content_policy("brand logo detected"))
        .await;
    let job_id = h.enqueue(Some(1)).await;

    let summary = h.orchestrator.run_until_idle().await.unwrap();
    assert_eq!(summary.abandoned, 1);
    assert_eq!(summary.retried, 0);
    assert_eq!(h.backend.invocation_count().await, 1);
    assert!(matches!(h.state(&job_id), JobState::Abandoned { .. }));
}

#[tokio::test]
async fn test_concurrent_duplicates_dispatch_once() {
    let temp_dir = TempDir::new().unwrap();
    let h = TestHarness::new(&temp_dir.path().join("reelforge.db"));

    let mut handles = Vec::new();
    for _ in 0..10 {
        let queue = h.queue.clone();
        handles.push(tokio::spawn(async move {
            queue
                .enqueue(fixtures::asset_request("best-air-fryers", Some(2)))
                .await
                .unwrap()
                .job_id
        }));
    }
    let mut ids = Vec::new();
    for handle in handles {
        ids.push(handle.await.unwrap());
    }
    ids.dedup();
    assert_eq!(ids.len(), 1);

    h.orchestrator.run_until_idle().await.unwrap();
    assert_eq!(h.backend.invocation_count().await, 1);
}

#[tokio::test]
async fn test_restart_queries_backend_instead_of_redispatching() {
    let temp_dir = TempDir::new().unwrap();
    let db_path = temp_dir.path().join("reelforge.db");

    // First process: the job is claimed, then the process dies mid-call.
    let first = TestHarness::new(&db_path);
    let job_id = first.enqueue(Some(1)).await;
    let claimed = first
        .queue
        .dequeue_next("dzine", chrono::Utc::now())
        .await
        .unwrap()
        .unwrap();
    drop(first);

    // Second process: the backend finished the submission meanwhile.
    let backend = Arc::new(MockBackend::new("dzine"));
    let key = claimed.submission_key();
    backend
        .set_remote_outcome(key.clone(), RemoteOutcome::Completed(backend.default_artifact(&key)))
        .await;
    let second = TestHarness::build(
        &db_path,
        backend,
        fast_retries(),
        CircuitBreakerConfig::default(),
        None,
    );

    let summary = second.orchestrator.recover().await.unwrap();
    assert_eq!(summary.recovered, 1);
    assert_eq!(summary.succeeded, 1);
    assert_eq!(second.backend.invocation_count().await, 0);
    assert_eq!(second.backend.queries().await, vec![key]);

    let job = second.store.get(&job_id).unwrap().unwrap();
    assert!(matches!(job.state, JobState::Succeeded { .. }));
    assert_eq!(job.attempts, 1);
    assert_eq!(job.attempt_history[0].outcome, AttemptOutcome::Recovered);
}

#[tokio::test]
async fn test_restart_requeues_submission_unknown_to_backend() {
    let temp_dir = TempDir::new().unwrap();
    let db_path = temp_dir.path().join("reelforge.db");

    let first = TestHarness::new(&db_path);
    let job_id = first.enqueue(Some(1)).await;
    first
        .queue
        .dequeue_next("dzine", chrono::Utc::now())
        .await
        .unwrap()
        .unwrap();
    drop(first);

    let second = TestHarness::new(&db_path);
    let summary = second.orchestrator.recover().await.unwrap();
    assert_eq!(summary.recovered, 1);
    assert!(matches!(second.state(&job_id), JobState::Queued));

    second.orchestrator.run_until_idle().await.unwrap();
    let invocations = second.backend.invocations().await;
    assert_eq!(invocations.len(), 1);
    assert_eq!(invocations[0].submission_key, format!("{}:2", job_id));
    assert!(matches!(second.state(&job_id), JobState::Succeeded { .. }));
}

#[tokio::test]
async fn test_restart_with_remote_failure_follows_retry_policy() {
    let temp_dir = TempDir::new().unwrap();
    let db_path = temp_dir.path().join("reelforge.db");

    let first = TestHarness::new(&db_path);
    let job_id = first.enqueue(Some(1)).await;
    let claimed = first
        .queue
        .dequeue_next("dzine", chrono::Utc::now())
        .await
        .unwrap()
        .unwrap();
    drop(first);

    let backend = Arc::new(MockBackend::new("dzine"));
    backend
        .set_remote_outcome(
            claimed.submission_key(),
            RemoteOutcome::Failed(AdapterError::auth("session expired")),
        )
        .await;
    let second = TestHarness::build(
        &db_path,
        backend,
        fast_retries(),
        CircuitBreakerConfig::default(),
        None,
    );

    let summary = second.orchestrator.recover().await.unwrap();
    assert_eq!(summary.abandoned, 1);
    assert!(matches!(second.state(&job_id), JobState::Abandoned { .. }));
}

#[tokio::test(start_paused = true)]
async fn test_open_circuit_defers_without_consuming_attempts() {
    let temp_dir = TempDir::new().unwrap();
    let h = TestHarness::build(
        &temp_dir.path().join("reelforge.db"),
        Arc::new(MockBackend::new("dzine")),
        RetryConfig {
            max_attempts: 5,
            ..fast_retries()
        },
        CircuitBreakerConfig {
            failure_threshold: 2,
            window_secs: 60,
            cooldown_secs: 30,
        },
        None,
    );
    h.backend
        .push_errors(AdapterError::rate_limited(None), 2)
        .await;
    let job_id = h.enqueue(Some(1)).await;

    for _ in 0..2 {
        let outcome = h.orchestrator.dispatch_once("dzine").await.unwrap();
        assert!(matches!(outcome, DispatchOutcome::Processed(_)));
    }
    assert!(matches!(h.state(&job_id), JobState::RetryScheduled { .. }));

    let outcome = h.orchestrator.dispatch_once("dzine").await.unwrap();
    assert!(matches!(outcome, DispatchOutcome::Deferred { .. }));
    assert_eq!(h.backend.invocation_count().await, 2);
    assert_eq!(h.store.get(&job_id).unwrap().unwrap().attempts, 2);

    tokio::time::advance(Duration::from_secs(31)).await;

    let DispatchOutcome::Processed(job) = h.orchestrator.dispatch_once("dzine").await.unwrap()
    else {
        panic!("expected the trial to dispatch");
    };
    assert!(matches!(job.state, JobState::Succeeded { .. }));
    assert_eq!(job.attempts, 3);
}

#[tokio::test]
async fn test_late_success_of_cancelled_job_is_salvaged() {
    let temp_dir = TempDir::new().unwrap();
    let h = TestHarness::new(&temp_dir.path().join("reelforge.db"));
    h.backend.set_delay(Duration::from_millis(200)).await;
    let job_id = h.enqueue(Some(1)).await;

    let orchestrator = h.orchestrator.clone();
    let dispatch = tokio::spawn(async move { orchestrator.dispatch_once("dzine").await });
    wait_for_dispatch(&h.store, &job_id).await;

    let outcome = h.queue.cancel(&job_id, "operator", None).await.unwrap();
    assert!(matches!(outcome, CancelOutcome::Requested(_)));

    let DispatchOutcome::Processed(job) = dispatch.await.unwrap().unwrap() else {
        panic!("expected a processed job");
    };
    match job.state {
        JobState::Succeeded { salvaged, .. } => assert!(salvaged),
        other => panic!("unexpected state {:?}", other),
    }
    assert!(!job.cancel_requested);
}

#[tokio::test]
async fn test_late_failure_of_cancelled_job_is_not_retried() {
    let temp_dir = TempDir::new().unwrap();
    let h = TestHarness::new(&temp_dir.path().join("reelforge.db"));
    h.backend.set_delay(Duration::from_millis(200)).await;
    h.backend.push_error(AdapterError::network("reset")).await;
    let job_id = h.enqueue(Some(1)).await;

    let orchestrator = h.orchestrator.clone();
    let dispatch = tokio::spawn(async move { orchestrator.dispatch_once("dzine").await });
    wait_for_dispatch(&h.store, &job_id).await;
    h.queue.cancel(&job_id, "operator", None).await.unwrap();
    dispatch.await.unwrap().unwrap();

    assert!(matches!(h.state(&job_id), JobState::Cancelled { .. }));
    let summary = h.orchestrator.run_until_idle().await.unwrap();
    assert_eq!(summary.processed, 0);
    assert_eq!(h.backend.invocation_count().await, 1);
}

#[tokio::test]
async fn test_blocking_assets_dispatch_first() {
    let temp_dir = TempDir::new().unwrap();
    let h = TestHarness::new(&temp_dir.path().join("reelforge.db"));
    let outcome = h
        .queue
        .enqueue_plan(&fixtures::episode_plan("best-air-fryers"), "operator")
        .await
        .unwrap();

    h.orchestrator.run_until_idle().await.unwrap();

    let thumbnail = outcome
        .jobs
        .iter()
        .find(|o| o.job.request.asset_type == AssetType::Thumbnail)
        .unwrap();
    let heroes: Vec<&str> = outcome
        .jobs
        .iter()
        .filter(|o| o.job.request.asset_type == AssetType::ProductHero)
        .map(|o| o.job_id.as_str())
        .collect();

    let order: Vec<String> = h
        .backend
        .invocations()
        .await
        .into_iter()
        .map(|i| i.job_id)
        .collect();
    assert_eq!(order[0], thumbnail.job_id);
    assert_eq!(&order[1..], &heroes[..]);
}

#[tokio::test]
async fn test_operational_error_halts_the_run() {
    let temp_dir = TempDir::new().unwrap();
    let h = TestHarness::new(&temp_dir.path().join("reelforge.db"));
    h.backend
        .push_error(AdapterError::misconfigured("workspace url missing"))
        .await;
    let first = h.enqueue(Some(1)).await;
    let second = h.enqueue(Some(2)).await;

    let summary = h.orchestrator.run_until_idle().await.unwrap();
    assert!(summary.halted.is_some());
    assert_eq!(summary.exit_code(), 2);
    assert!(matches!(h.state(&first), JobState::Failed { .. }));
    assert!(matches!(h.state(&second), JobState::Queued));
    assert_eq!(h.backend.invocation_count().await, 1);
}

#[tokio::test]
async fn test_credit_budget_halts_dispatch() {
    let temp_dir = TempDir::new().unwrap();
    let h = TestHarness::build(
        &temp_dir.path().join("reelforge.db"),
        Arc::new(MockBackend::new("dzine").with_credits(5)),
        RetryConfig {
            budget_credits: Some(5),
            ..fast_retries()
        },
        CircuitBreakerConfig::default(),
        None,
    );
    let first = h.enqueue(Some(1)).await;
    let second = h.enqueue(Some(2)).await;

    let summary = h.orchestrator.run_until_idle().await.unwrap();
    assert_eq!(summary.succeeded, 1);
    assert!(summary.halted.unwrap().contains("budget"));
    assert!(matches!(h.state(&first), JobState::Succeeded { .. }));
    assert!(matches!(h.state(&second), JobState::Queued));
}

#[tokio::test]
async fn test_orchestrator_loops_process_queue_and_stop() {
    let temp_dir = TempDir::new().unwrap();
    let h = TestHarness::new(&temp_dir.path().join("reelforge.db"));
    let job_id = h.enqueue(Some(1)).await;

    h.orchestrator.start().await;
    let status = h.orchestrator.status().await;
    assert!(status.running);

    for _ in 0..200 {
        if matches!(h.state(&job_id), JobState::Succeeded { .. }) {
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    assert!(matches!(h.state(&job_id), JobState::Succeeded { .. }));

    h.orchestrator.stop().await;
    assert!(!h.orchestrator.status().await.running);
}
