//! Common test utilities for API testing with a mock backend.
//!
//! The fixture builds the real router over temporary SQLite stores. Jobs are
//! dispatched to a `MockBackend` named "dzine" whose results the test scripts.

use std::sync::Arc;
use std::time::Duration;

use axum::body::Body;
use axum::http::{Request, StatusCode};
use axum::Router;
use http_body_util::BodyExt;
use serde_json::Value;
use tempfile::TempDir;
use tower::ServiceExt;

use reelforge_core::gate::GateConfig;
use reelforge_core::retry::{CircuitBreakerConfig, RetryConfig};
use reelforge_core::testing::{MockArtifactStore, MockBackend};
use reelforge_core::{
    create_audit_system, load_config_from_str, AuditStore, BackendRegistry, JobOrchestrator,
    JobQueue, JobStore, OrchestratorConfig, QualityGate, RetryController, SqliteAuditStore,
    SqliteGateStore, SqliteJobStore,
};
use reelforge_server::state::AppState;

/// Re-export fixtures for test convenience
pub use reelforge_core::testing::fixtures;

/// In-process API with a scripted backend.
pub struct TestFixture {
    pub router: Router,
    pub state: Arc<AppState>,
    /// Mock backend - script results and inspect invocations
    pub backend: Arc<MockBackend>,
    pub artifacts: Arc<MockArtifactStore>,
    /// Holds the database for the fixture's lifetime
    pub temp_dir: TempDir,
}

/// Response from a test request
#[derive(Debug)]
pub struct TestResponse {
    pub status: StatusCode,
    pub body: Value,
}

impl TestResponse {
    pub fn is_success(&self) -> bool {
        self.status.is_success()
    }
}

impl TestFixture {
    pub async fn new() -> Self {
        let temp_dir = TempDir::new().expect("Failed to create temp dir");
        let db_path = temp_dir.path().join("test.db");

        let config = load_config_from_str(&format!(
            "[database]\npath = {:?}\n[storage]\nroot = {:?}\n",
            db_path,
            temp_dir.path().join("artifacts")
        ))
        .expect("Failed to build test config");

        let audit_store: Arc<dyn AuditStore> =
            Arc::new(SqliteAuditStore::new(&db_path).expect("Failed to create audit store"));
        let (audit_handle, audit_writer) = create_audit_system(Arc::clone(&audit_store), 100);
        tokio::spawn(audit_writer.run());

        let job_store: Arc<dyn JobStore> =
            Arc::new(SqliteJobStore::new(&db_path).expect("Failed to create job store"));

        let backend = Arc::new(MockBackend::new("dzine"));
        let registry = BackendRegistry::new().with_backend(backend.clone());

        let queue = Arc::new(
            JobQueue::new(Arc::clone(&job_store))
                .with_registry(registry.clone())
                .with_audit(audit_handle.clone()),
        );

        let retry = RetryConfig {
            base_delay_ms: 0,
            max_delay_ms: 0,
            ..RetryConfig::default()
        };
        let controller = Arc::new(RetryController::new(
            &retry,
            &CircuitBreakerConfig::default(),
            0,
        ));

        let artifacts = Arc::new(MockArtifactStore::new());
        let orchestrator = Arc::new(JobOrchestrator::new(
            OrchestratorConfig {
                idle_poll_interval_ms: 20,
                recovery_poll_interval_ms: 10,
                ..OrchestratorConfig::default()
            },
            Arc::clone(&queue),
            registry,
            controller,
            artifacts.clone(),
            Some(audit_handle.clone()),
        ));

        let gate = Arc::new(
            QualityGate::new(
                Arc::new(SqliteGateStore::new(&db_path).expect("Failed to create gate store")),
                GateConfig::default(),
            )
            .with_audit(audit_handle.clone()),
        );

        let state = Arc::new(AppState::new(
            config,
            queue,
            orchestrator,
            gate,
            audit_handle,
            audit_store,
        ));

        let router = reelforge_server::api::create_router(Arc::clone(&state));

        Self {
            router,
            state,
            backend,
            artifacts,
            temp_dir,
        }
    }

    /// Send a GET request to the test server.
    pub async fn get(&self, path: &str) -> TestResponse {
        self.request("GET", path, None, None).await
    }

    /// Send a POST request with JSON body.
    pub async fn post(&self, path: &str, body: Value) -> TestResponse {
        self.request("POST", path, Some(body), None).await
    }

    /// Send a POST request without a body.
    pub async fn post_empty(&self, path: &str) -> TestResponse {
        self.request("POST", path, None, None).await
    }

    /// Send a POST request on behalf of a named operator.
    pub async fn post_as(&self, operator: &str, path: &str, body: Value) -> TestResponse {
        self.request("POST", path, Some(body), Some(operator)).await
    }

    /// Fetch the raw text body of a GET request.
    pub async fn get_text(&self, path: &str) -> (StatusCode, String) {
        let request = Request::builder()
            .method("GET")
            .uri(path)
            .body(Body::empty())
            .unwrap();

        let response = self
            .router
            .clone()
            .oneshot(request)
            .await
            .expect("Failed to send request");

        let status = response.status();
        let body_bytes = response
            .into_body()
            .collect()
            .await
            .expect("Failed to collect body")
            .to_bytes();

        (status, String::from_utf8_lossy(&body_bytes).to_string())
    }

    /// Drain the queue through the orchestrator.
    pub async fn run_until_idle(&self) -> reelforge_core::RunSummary {
        self.state
            .orchestrator()
            .run_until_idle()
            .await
            .expect("Failed to drain queue")
    }

    /// Wait for buffered audit events to reach the store.
    pub async fn flush_audit(&self) {
        tokio::time::sleep(Duration::from_millis(100)).await;
    }

    async fn request(
        &self,
        method: &str,
        path: &str,
        body: Option<Value>,
        operator: Option<&str>,
    ) -> TestResponse {
        let mut request_builder = Request::builder().method(method).uri(path);

        if let Some(operator) = operator {
            request_builder = request_builder.header("X-Operator", operator);
        }

        let body = if let Some(json_body) = body {
            request_builder = request_builder.header("Content-Type", "application/json");
            Body::from(serde_json::to_vec(&json_body).unwrap())
        } else {
            Body::empty()
        };

        let request = request_builder.body(body).unwrap();

        let response = self
            .router
            .clone()
            .oneshot(request)
            .await
            .expect("Failed to send request");

        let status = response.status();
        let body_bytes = response
            .into_body()
            .collect()
            .await
            .expect("Failed to collect body")
            .to_bytes();

        let body: Value = if body_bytes.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&body_bytes).unwrap_or(Value::Null)
        };

        TestResponse { status, body }
    }
}

/// Helper to assert a response has expected status.
#[macro_export]
macro_rules! assert_status {
    ($response:expr, $status:expr) => {
        assert_eq!(
            $response.status, $status,
            "Expected status {:?}, got {:?}. Body: {}",
            $status,
            $response.status,
            serde_json::to_string_pretty(&$response.body).unwrap_or_default()
        );
    };
}
