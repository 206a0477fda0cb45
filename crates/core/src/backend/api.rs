//! REST generation API backend.
//!
//! Protocol:
//! - `POST {base_url}/generations` submits a task and answers `{"task_id"}`
//! - `GET {base_url}/generations/{task_id}` reports the task status
//! - `GET {base_url}/generations?client_reference={key}` finds tasks by
//!   submission key (used after a restart)

use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tracing::{debug, warn};

use crate::asset::{Artifact, Capability};
use crate::config::{ApiBackendConfig, BackendConfig};
use crate::job::Job;

use super::http::{classify_request_error, classify_status, is_policy_code, retry_after};
use super::{AdapterError, BackendKind, ErrorClass, GenerationBackend, RemoteOutcome};

/// Consecutive transient poll failures tolerated before giving up.
const MAX_POLL_ERRORS: u32 = 3;

/// Per-request HTTP timeout. The whole invocation is bounded separately.
const REQUEST_TIMEOUT: Duration = Duration::from_secs(60);

#[derive(Debug, Serialize)]
struct GenerationSubmit<'a> {
    #[serde(skip_serializing_if = "Option::is_none")]
    style_code: Option<&'a str>,
    prompt: &'a str,
    structure_match: f32,
    seed: u64,
    model: &'a str,
    capability: Capability,
    #[serde(skip_serializing_if = "Option::is_none")]
    reference_image: Option<&'a str>,
    client_reference: &'a str,
}

#[derive(Debug, Deserialize)]
struct SubmitResponse {
    task_id: String,
}

#[derive(Debug, Clone, Deserialize)]
struct TaskStatus {
    #[serde(default)]
    task_id: String,
    status: String,
    #[serde(default)]
    output_url: Option<String>,
    #[serde(default)]
    credits: Option<u32>,
    #[serde(default)]
    error_code: Option<String>,
    #[serde(default)]
    error_message: Option<String>,
}

#[derive(Debug, Deserialize)]
struct TaskList {
    #[serde(default)]
    tasks: Vec<TaskStatus>,
}

enum TaskProgress {
    Done(Artifact),
    Running,
}

/// Deterministic seed for a dedup key, so a retried request renders the
/// same composition.
pub fn derive_seed(dedup_key: &str) -> u64 {
    let digest = Sha256::digest(dedup_key.as_bytes());
    u32::from_be_bytes([digest[0], digest[1], digest[2], digest[3]]) as u64
}

/// Generation backend speaking the REST task protocol.
pub struct ApiBackend {
    name: String,
    capabilities: Vec<Capability>,
    timeout: Duration,
    credits_per_call: u32,
    config: ApiBackendConfig,
    artifact_ttl: chrono::Duration,
    client: Client,
}

impl ApiBackend {
    pub fn new(config: &BackendConfig, artifact_ttl_hours: u64) -> Result<Self, AdapterError> {
        let api = config.api.clone().ok_or_else(|| {
            AdapterError::misconfigured(format!("backend '{}' has no [api] section", config.name))
        })?;
        if api.api_key.trim().is_empty() {
            return Err(AdapterError::misconfigured(format!(
                "backend '{}' has no api_key",
                config.name
            )));
        }

        let client = Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .map_err(|e| AdapterError::misconfigured(format!("http client: {}", e)))?;

        Ok(Self {
            name: config.name.clone(),
            capabilities: config.capabilities.clone(),
            timeout: Duration::from_secs(config.timeout_secs),
            credits_per_call: config.credits_per_call,
            config: api,
            artifact_ttl: chrono::Duration::hours(artifact_ttl_hours as i64),
            client,
        })
    }

    fn base_url(&self) -> &str {
        self.config.base_url.trim_end_matches('/')
    }

    async fn send(&self, request: reqwest::RequestBuilder) -> Result<String, AdapterError> {
        let response = request
            .bearer_auth(&self.config.api_key)
            .send()
            .await
            .map_err(classify_request_error)?;

        let status = response.status();
        let hint = retry_after(response.headers());
        let body = response.text().await.map_err(classify_request_error)?;
        if !status.is_success() {
            return Err(classify_status(status, hint, &body));
        }
        Ok(body)
    }

    fn decode<T: serde::de::DeserializeOwned>(body: &str, what: &str) -> Result<T, AdapterError> {
        serde_json::from_str(body).map_err(|e| AdapterError::malformed(format!("{}: {}", what, e)))
    }

    async fn submit(&self, job: &Job, submission_key: &str) -> Result<String, AdapterError> {
        let request = &job.request;
        let body = GenerationSubmit {
            style_code: self.config.style_code.as_deref(),
            prompt: &request.prompt,
            structure_match: self.config.structure_match,
            seed: self.config.seed.unwrap_or_else(|| derive_seed(&job.dedup_key)),
            model: &request.model,
            capability: request.required_capability(),
            reference_image: request.reference_image.as_deref(),
            client_reference: submission_key,
        };

        let url = format!("{}/generations", self.base_url());
        let raw = self.send(self.client.post(&url).json(&body)).await?;
        let submitted: SubmitResponse = Self::decode(&raw, "submit response")?;
        Ok(submitted.task_id)
    }

    async fn fetch_task(&self, task_id: &str) -> Result<TaskStatus, AdapterError> {
        let url = format!(
            "{}/generations/{}",
            self.base_url(),
            urlencoding::encode(task_id)
        );
        let raw = self.send(self.client.get(&url)).await?;
        Self::decode(&raw, "task status")
    }

    fn interpret(&self, task: &TaskStatus) -> Result<TaskProgress, AdapterError> {
        match task.status.as_str() {
            "succeeded" => match task.output_url.as_deref() {
                Some(url) if !url.trim().is_empty() => {
                    let artifact = Artifact::new(url, &self.name)
                        .with_credits(task.credits.unwrap_or(self.credits_per_call))
                        .with_expiry(Utc::now() + self.artifact_ttl);
                    Ok(TaskProgress::Done(artifact))
                }
                _ => Err(AdapterError::malformed(format!(
                    "task {} succeeded without output_url",
                    task.task_id
                ))),
            },
            "failed" => Err(Self::task_failure(task)),
            "queued" | "pending" | "running" | "processing" => Ok(TaskProgress::Running),
            other => Err(AdapterError::malformed(format!(
                "unknown task status '{}'",
                other
            ))),
        }
    }

    fn task_failure(task: &TaskStatus) -> AdapterError {
        let message = task
            .error_message
            .clone()
            .unwrap_or_else(|| "task failed".to_string());
        match task.error_code.as_deref() {
            Some(code) if is_policy_code(code) => AdapterError::content_policy(message),
            Some("rate_limited") => AdapterError::rate_limited(None),
            Some("timeout") => AdapterError::timeout(message),
            Some("internal_error") => AdapterError::network(message),
            _ => AdapterError::malformed(message),
        }
    }

    async fn poll_until_done(&self, task_id: &str) -> Result<Artifact, AdapterError> {
        let interval = Duration::from_millis(self.config.poll_interval_ms);
        let mut consecutive_errors = 0;

        loop {
            tokio::time::sleep(interval).await;

            let task = match self.fetch_task(task_id).await {
                Ok(task) => {
                    consecutive_errors = 0;
                    task
                }
                Err(e) if e.class() == ErrorClass::Transient => {
                    consecutive_errors += 1;
                    if consecutive_errors >= MAX_POLL_ERRORS {
                        return Err(e);
                    }
                    warn!(backend = %self.name, task_id, error = %e, "Task poll failed, retrying");
                    continue;
                }
                Err(e) => return Err(e),
            };

            if let TaskProgress::Done(artifact) = self.interpret(&task)? {
                return Ok(artifact);
            }
        }
    }
}

#[async_trait]
impl GenerationBackend for ApiBackend {
    fn name(&self) -> &str {
        &self.name
    }

    fn kind(&self) -> BackendKind {
        BackendKind::Api
    }

    fn capabilities(&self) -> &[Capability] {
        &self.capabilities
    }

    fn timeout(&self) -> Duration {
        self.timeout
    }

    async fn invoke(&self, job: &Job) -> Result<Artifact, AdapterError> {
        let submission_key = job
            .state
            .submission_key()
            .map(str::to_string)
            .unwrap_or_else(|| job.submission_key());

        let task_id = self.submit(job, &submission_key).await?;
        debug!(backend = %self.name, job_id = %job.id, task_id = %task_id, "Generation task submitted");

        self.poll_until_done(&task_id).await
    }

    async fn query_outcome(&self, job: &Job) -> Result<RemoteOutcome, AdapterError> {
        let submission_key = job
            .state
            .submission_key()
            .map(str::to_string)
            .unwrap_or_else(|| job.submission_key());

        let url = format!(
            "{}/generations?client_reference={}",
            self.base_url(),
            urlencoding::encode(&submission_key)
        );
        let raw = self.send(self.client.get(&url)).await?;
        let list: TaskList = Self::decode(&raw, "task list")?;

        let Some(task) = list.tasks.last() else {
            return Ok(RemoteOutcome::Unknown);
        };
        Ok(match self.interpret(task) {
            Ok(TaskProgress::Done(artifact)) => RemoteOutcome::Completed(artifact),
            Ok(TaskProgress::Running) => RemoteOutcome::Pending,
            Err(e) => RemoteOutcome::Failed(e),
        })
    }
}
