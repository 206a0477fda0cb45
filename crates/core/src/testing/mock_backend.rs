//! Mock generation backend for testing.

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::RwLock;

use crate::asset::{Artifact, Capability};
use crate::backend::{AdapterError, BackendKind, GenerationBackend, RemoteOutcome};
use crate::job::Job;

/// One recorded `invoke` call.
#[derive(Debug, Clone)]
pub struct RecordedInvocation {
    pub job_id: String,
    pub dedup_key: String,
    pub submission_key: String,
    pub attempt: u32,
}

/// Mock implementation of `GenerationBackend`.
///
/// Invocations consume scripted results in order; once the script is empty
/// every call succeeds with a synthetic https artifact. Successful and failed
/// invocations are remembered by submission key so `query_outcome` can
/// answer crash-recovery lookups.
///
/// ```rust,ignore
/// let backend = MockBackend::new("dzine");
/// backend.push_error(AdapterError::rate_limited(None)).await;
/// // first invoke fails, second succeeds
/// ```
#[derive(Debug)]
pub struct MockBackend {
    name: String,
    kind: BackendKind,
    capabilities: Vec<Capability>,
    timeout: Duration,
    credits: u32,
    script: Arc<RwLock<VecDeque<Result<Artifact, AdapterError>>>>,
    invocations: Arc<RwLock<Vec<RecordedInvocation>>>,
    outcomes: Arc<RwLock<HashMap<String, RemoteOutcome>>>,
    queries: Arc<RwLock<Vec<String>>>,
    delay: Arc<RwLock<Option<Duration>>>,
}

impl MockBackend {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            kind: BackendKind::Browser,
            capabilities: vec![
                Capability::TextToImage,
                Capability::ImageToImage,
                Capability::ImageToVideo,
                Capability::LipSync,
            ],
            timeout: Duration::from_secs(60),
            credits: 1,
            script: Arc::new(RwLock::new(VecDeque::new())),
            invocations: Arc::new(RwLock::new(Vec::new())),
            outcomes: Arc::new(RwLock::new(HashMap::new())),
            queries: Arc::new(RwLock::new(Vec::new())),
            delay: Arc::new(RwLock::new(None)),
        }
    }

    pub fn with_kind(mut self, kind: BackendKind) -> Self {
        self.kind = kind;
        self
    }

    pub fn with_capabilities(mut self, capabilities: Vec<Capability>) -> Self {
        self.capabilities = capabilities;
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Credits reported by default successes.
    pub fn with_credits(mut self, credits: u32) -> Self {
        self.credits = credits;
        self
    }

    /// Queue the result of the next unscripted invocation.
    pub async fn push_result(&self, result: Result<Artifact, AdapterError>) {
        self.script.write().await.push_back(result);
    }

    pub async fn push_error(&self, error: AdapterError) {
        self.push_result(Err(error)).await;
    }

    /// Queue `count` copies of the same error.
    pub async fn push_errors(&self, error: AdapterError, count: usize) {
        let mut script = self.script.write().await;
        for _ in 0..count {
            script.push_back(Err(error.clone()));
        }
    }

    /// Make every invocation take this long before answering.
    pub async fn set_delay(&self, delay: Duration) {
        *self.delay.write().await = Some(delay);
    }

    /// Preset what `query_outcome` reports for a submission key.
    pub async fn set_remote_outcome(&self, submission_key: impl Into<String>, outcome: RemoteOutcome) {
        self.outcomes.write().await.insert(submission_key.into(), outcome);
    }

    pub async fn invocations(&self) -> Vec<RecordedInvocation> {
        self.invocations.read().await.clone()
    }

    pub async fn invocation_count(&self) -> usize {
        self.invocations.read().await.len()
    }

    /// Submission keys passed to `query_outcome`.
    pub async fn queries(&self) -> Vec<String> {
        self.queries.read().await.clone()
    }

    pub fn default_artifact(&self, submission_key: &str) -> Artifact {
        Artifact::new(
            format!(
                "https://mock.invalid/{}/{}.png",
                self.name,
                submission_key.replace(':', "-")
            ),
            &self.name,
        )
        .with_credits(self.credits)
    }

    fn key_of(job: &Job) -> String {
        job.state
            .submission_key()
            .map(str::to_string)
            .unwrap_or_else(|| job.submission_key())
    }
}

#[async_trait]
impl GenerationBackend for MockBackend {
    fn name(&self) -> &str {
        &self.name
    }

    fn kind(&self) -> BackendKind {
        self.kind
    }

    fn capabilities(&self) -> &[Capability] {
        &self.capabilities
    }

    fn timeout(&self) -> Duration {
        self.timeout
    }

    async fn invoke(&self, job: &Job) -> Result<Artifact, AdapterError> {
        let submission_key = Self::key_of(job);
        self.invocations.write().await.push(RecordedInvocation {
            job_id: job.id.clone(),
            dedup_key: job.dedup_key.clone(),
            submission_key: submission_key.clone(),
            attempt: job.attempts,
        });

        let delay = *self.delay.read().await;
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }

        let result = self
            .script
            .write()
            .await
            .pop_front()
            .unwrap_or_else(|| Ok(self.default_artifact(&submission_key)));

        let outcome = match &result {
            Ok(artifact) => RemoteOutcome::Completed(artifact.clone()),
            Err(e) => RemoteOutcome::Failed(e.clone()),
        };
        self.outcomes.write().await.insert(submission_key, outcome);
        result
    }

    async fn query_outcome(&self, job: &Job) -> Result<RemoteOutcome, AdapterError> {
        let key = Self::key_of(job);
        self.queries.write().await.push(key.clone());
        Ok(self
            .outcomes
            .read()
            .await
            .get(&key)
            .cloned()
            .unwrap_or(RemoteOutcome::Unknown))
    }
}
