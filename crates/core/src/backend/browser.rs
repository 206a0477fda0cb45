//! Browser-automation backend.
//!
//! The backend does not know anything about the web UI it drives: the action
//! script comes from configuration and is executed by a driver sidecar that
//! owns the browser session.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::debug;

use crate::asset::{Artifact, Capability};
use crate::config::{BackendConfig, BrowserBackendConfig};
use crate::job::Job;

use super::http::{classify_request_error, classify_status, is_policy_code, retry_after};
use super::{AdapterError, BackendKind, GenerationBackend, RemoteOutcome};

/// Fully expanded script handed to the driver.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActionScript {
    pub submission_key: String,
    pub target_url: String,
    pub actions: Vec<Value>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DriverRunStatus {
    Running,
    Completed,
    Failed,
}

/// Failure reported by the driver.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DriverFailure {
    pub code: String,
    #[serde(default)]
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub retry_after_secs: Option<u64>,
}

/// State of one scripted run on the driver.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DriverRun {
    pub submission_key: String,
    pub status: DriverRunStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub artifact_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub credits: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<DriverFailure>,
}

impl DriverFailure {
    pub fn to_adapter_error(&self) -> AdapterError {
        let message = if self.message.is_empty() {
            self.code.clone()
        } else {
            self.message.clone()
        };
        match self.code.as_str() {
            "rate_limited" => {
                AdapterError::rate_limited(self.retry_after_secs.map(Duration::from_secs))
            }
            "timeout" => AdapterError::timeout(message),
            "network" | "navigation_failed" => AdapterError::network(message),
            "login_required" | "auth" => AdapterError::auth(message),
            "script_error" | "element_not_found" => AdapterError::misconfigured(message),
            code if is_policy_code(code) => AdapterError::content_policy(message),
            _ => AdapterError::malformed(message),
        }
    }
}

/// Executes action scripts in a real browser session.
#[async_trait]
pub trait BrowserDriver: Send + Sync {
    /// Run a script to completion.
    async fn perform(&self, script: &ActionScript) -> Result<DriverRun, AdapterError>;

    /// Look up a previous run by submission key.
    async fn lookup(&self, submission_key: &str) -> Result<Option<DriverRun>, AdapterError>;
}

/// Driver sidecar reached over HTTP.
///
/// - `POST {driver_url}/perform` with an `ActionScript`, answers a `DriverRun`
/// - `GET {driver_url}/runs/{submission_key}`, 404 when unknown
pub struct HttpBrowserDriver {
    client: Client,
    base_url: String,
    lookup_timeout: Duration,
}

impl HttpBrowserDriver {
    pub fn new(config: &BrowserBackendConfig) -> Result<Self, AdapterError> {
        let client = Client::builder()
            .build()
            .map_err(|e| AdapterError::misconfigured(format!("http client: {}", e)))?;
        Ok(Self {
            client,
            base_url: config.driver_url.trim_end_matches('/').to_string(),
            lookup_timeout: Duration::from_secs(config.request_timeout_secs),
        })
    }

    async fn decode_run(response: reqwest::Response) -> Result<DriverRun, AdapterError> {
        let body = response.text().await.map_err(classify_request_error)?;
        serde_json::from_str(&body)
            .map_err(|e| AdapterError::malformed(format!("driver run: {}", e)))
    }
}

#[async_trait]
impl BrowserDriver for HttpBrowserDriver {
    async fn perform(&self, script: &ActionScript) -> Result<DriverRun, AdapterError> {
        let url = format!("{}/perform", self.base_url);
        let response = self
            .client
            .post(&url)
            .json(script)
            .send()
            .await
            .map_err(classify_request_error)?;

        let status = response.status();
        if !status.is_success() {
            let hint = retry_after(response.headers());
            let body = response.text().await.unwrap_or_default();
            return Err(classify_status(status, hint, &body));
        }
        Self::decode_run(response).await
    }

    async fn lookup(&self, submission_key: &str) -> Result<Option<DriverRun>, AdapterError> {
        let url = format!(
            "{}/runs/{}",
            self.base_url,
            urlencoding::encode(submission_key)
        );
        let response = self
            .client
            .get(&url)
            .timeout(self.lookup_timeout)
            .send()
            .await
            .map_err(classify_request_error)?;

        let status = response.status();
        if status == StatusCode::NOT_FOUND {
            return Ok(None);
        }
        if !status.is_success() {
            let hint = retry_after(response.headers());
            let body = response.text().await.unwrap_or_default();
            return Err(classify_status(status, hint, &body));
        }
        Self::decode_run(response).await.map(Some)
    }
}

/// Generation backend driven through a `BrowserDriver`.
pub struct BrowserBackend {
    name: String,
    capabilities: Vec<Capability>,
    timeout: Duration,
    credits_per_call: u32,
    target_url: String,
    actions: Vec<Value>,
    driver: Arc<dyn BrowserDriver>,
}

impl BrowserBackend {
    pub fn new(config: &BackendConfig, driver: Arc<dyn BrowserDriver>) -> Result<Self, AdapterError> {
        let browser = config.browser.as_ref().ok_or_else(|| {
            AdapterError::misconfigured(format!("backend '{}' has no [browser] section", config.name))
        })?;
        Ok(Self {
            name: config.name.clone(),
            capabilities: config.capabilities.clone(),
            timeout: Duration::from_secs(config.timeout_secs),
            credits_per_call: config.credits_per_call,
            target_url: browser.target_url.clone(),
            actions: browser.actions.clone(),
            driver,
        })
    }

    /// Build the script for the job's current attempt.
    pub fn script_for(&self, job: &Job) -> ActionScript {
        let submission_key = current_submission_key(job);
        let request = &job.request;
        let vars = [
            ("{prompt}", request.prompt.as_str()),
            ("{model}", request.model.as_str()),
            (
                "{reference_image}",
                request.reference_image.as_deref().unwrap_or(""),
            ),
            ("{submission_key}", submission_key.as_str()),
        ];
        ActionScript {
            target_url: self.target_url.clone(),
            actions: self
                .actions
                .iter()
                .map(|action| expand_placeholders(action, &vars))
                .collect(),
            submission_key,
        }
    }

    fn completed_artifact(&self, run: &DriverRun) -> Result<Artifact, AdapterError> {
        match run.artifact_url.as_deref() {
            Some(url) if !url.trim().is_empty() => Ok(Artifact::new(url, &self.name)
                .with_credits(run.credits.unwrap_or(self.credits_per_call))),
            _ => Err(AdapterError::malformed(
                "driver reported completion without an artifact url",
            )),
        }
    }

    fn run_failure(run: &DriverRun) -> AdapterError {
        run.error
            .as_ref()
            .map(DriverFailure::to_adapter_error)
            .unwrap_or_else(|| AdapterError::malformed("driver reported failure without detail"))
    }
}

fn current_submission_key(job: &Job) -> String {
    job.state
        .submission_key()
        .map(str::to_string)
        .unwrap_or_else(|| job.submission_key())
}

/// Replace placeholders in every string inside `value`.
pub fn expand_placeholders(value: &Value, vars: &[(&str, &str)]) -> Value {
    match value {
        Value::String(s) => {
            let mut out = s.clone();
            for (placeholder, replacement) in vars {
                out = out.replace(placeholder, replacement);
            }
            Value::String(out)
        }
        Value::Array(items) => Value::Array(
            items
                .iter()
                .map(|item| expand_placeholders(item, vars))
                .collect(),
        ),
        Value::Object(map) => Value::Object(
            map.iter()
                .map(|(k, v)| (k.clone(), expand_placeholders(v, vars)))
                .collect(),
        ),
        other => other.clone(),
    }
}

#[async_trait]
impl GenerationBackend for BrowserBackend {
    fn name(&self) -> &str {
        &self.name
    }

    fn kind(&self) -> BackendKind {
        BackendKind::Browser
    }

    fn capabilities(&self) -> &[Capability] {
        &self.capabilities
    }

    fn timeout(&self) -> Duration {
        self.timeout
    }

    async fn invoke(&self, job: &Job) -> Result<Artifact, AdapterError> {
        let script = self.script_for(job);
        debug!(
            backend = %self.name,
            submission_key = %script.submission_key,
            actions = script.actions.len(),
            "Running browser action script"
        );

        let run = self.driver.perform(&script).await?;
        match run.status {
            DriverRunStatus::Completed => self.completed_artifact(&run),
            DriverRunStatus::Failed => Err(Self::run_failure(&run)),
            DriverRunStatus::Running => Err(AdapterError::timeout(
                "driver returned before the run finished",
            )),
        }
    }

    async fn query_outcome(&self, job: &Job) -> Result<RemoteOutcome, AdapterError> {
        let key = current_submission_key(job);
        let Some(run) = self.driver.lookup(&key).await? else {
            return Ok(RemoteOutcome::Unknown);
        };

        Ok(match run.status {
            DriverRunStatus::Running => RemoteOutcome::Pending,
            DriverRunStatus::Completed => match self.completed_artifact(&run) {
                Ok(artifact) => RemoteOutcome::Completed(artifact),
                Err(e) => RemoteOutcome::Failed(e),
            },
            DriverRunStatus::Failed => RemoteOutcome::Failed(Self::run_failure(&run)),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{fixtures, MockBrowserDriver};
    use serde_json::json;

    fn backend(driver: Arc<MockBrowserDriver>) -> BrowserBackend {
        let config = fixtures::browser_backend_config("dzine");
        BrowserBackend::new(&config, driver).unwrap()
    }

    #[test]
    fn test_expand_placeholders_recursively() {
        let action = json!({
            "op": "fill",
            "value": "{prompt}",
            "extra": ["{model}", 3, {"nested": "key={submission_key}"}]
        });
        let expanded = expand_placeholders(
            &action,
            &[
                ("{prompt}", "air fryer"),
                ("{model}", "flux"),
                ("{submission_key}", "abc:1"),
            ],
        );
        assert_eq!(expanded["value"], "air fryer");
        assert_eq!(expanded["extra"][0], "flux");
        assert_eq!(expanded["extra"][1], 3);
        assert_eq!(expanded["extra"][2]["nested"], "key=abc:1");
    }

    #[test]
    fn test_driver_failure_mapping() {
        let failure = |code: &str| DriverFailure {
            code: code.to_string(),
            message: String::new(),
            retry_after_secs: Some(5),
        };
        assert_eq!(
            failure("rate_limited").to_adapter_error(),
            AdapterError::rate_limited(Some(Duration::from_secs(5)))
        );
        assert!(matches!(
            failure("element_not_found").to_adapter_error(),
            AdapterError::Misconfigured { .. }
        ));
        assert!(matches!(
            failure("nsfw").to_adapter_error(),
            AdapterError::ContentPolicyRejected { .. }
        ));
        assert!(matches!(
            failure("weird").to_adapter_error(),
            AdapterError::MalformedResponse { .. }
        ));
    }

    #[tokio::test]
    async fn test_invoke_sends_expanded_script() {
        let driver = Arc::new(MockBrowserDriver::new());
        let backend = backend(driver.clone());
        let job = fixtures::dispatched_job(fixtures::asset_request("ep", Some(1)), 1);

        let artifact = backend.invoke(&job).await.unwrap();
        assert!(artifact.location.starts_with("https://"));
        assert_eq!(artifact.backend, "dzine");

        let scripts = driver.performed().await;
        assert_eq!(scripts.len(), 1);
        assert_eq!(scripts[0].submission_key, format!("{}:1", job.id));
        assert_eq!(scripts[0].actions[0]["value"], job.request.prompt.as_str());
    }

    #[tokio::test]
    async fn test_completed_without_url_is_malformed() {
        let driver = Arc::new(MockBrowserDriver::new());
        driver
            .push_run(DriverRun {
                submission_key: String::new(),
                status: DriverRunStatus::Completed,
                artifact_url: None,
                credits: None,
                error: None,
            })
            .await;
        let backend = backend(driver);
        let job = fixtures::dispatched_job(fixtures::asset_request("ep", Some(1)), 1);

        let err = backend.invoke(&job).await.unwrap_err();
        assert!(matches!(err, AdapterError::MalformedResponse { .. }));
    }

    #[tokio::test]
    async fn test_query_outcome_unknown_and_completed() {
        let driver = Arc::new(MockBrowserDriver::new());
        let backend = backend(driver.clone());
        let job = fixtures::dispatched_job(fixtures::asset_request("ep", Some(1)), 1);

        assert_eq!(
            backend.query_outcome(&job).await.unwrap(),
            RemoteOutcome::Unknown
        );

        backend.invoke(&job).await.unwrap();
        assert!(matches!(
            backend.query_outcome(&job).await.unwrap(),
            RemoteOutcome::Completed(_)
        ));
    }
}
