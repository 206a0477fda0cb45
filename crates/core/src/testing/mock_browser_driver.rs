//! Mock browser driver for testing.

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::RwLock;

use crate::backend::{ActionScript, AdapterError, BrowserDriver, DriverRun, DriverRunStatus};

/// Mock implementation of `BrowserDriver`.
///
/// Records every script it is asked to perform. Queued runs are returned in
/// order (with the script's submission key filled in); afterwards each run
/// completes with a synthetic artifact URL.
#[derive(Debug, Default)]
pub struct MockBrowserDriver {
    performed: Arc<RwLock<Vec<ActionScript>>>,
    queued: Arc<RwLock<VecDeque<DriverRun>>>,
    runs: Arc<RwLock<HashMap<String, DriverRun>>>,
}

impl MockBrowserDriver {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue the answer to the next `perform`.
    pub async fn push_run(&self, run: DriverRun) {
        self.queued.write().await.push_back(run);
    }

    /// Preset the run `lookup` reports for a submission key.
    pub async fn set_run(&self, run: DriverRun) {
        self.runs.write().await.insert(run.submission_key.clone(), run);
    }

    pub async fn performed(&self) -> Vec<ActionScript> {
        self.performed.read().await.clone()
    }
}

#[async_trait]
impl BrowserDriver for MockBrowserDriver {
    async fn perform(&self, script: &ActionScript) -> Result<DriverRun, AdapterError> {
        self.performed.write().await.push(script.clone());

        let mut run = self.queued.write().await.pop_front().unwrap_or_else(|| DriverRun {
            submission_key: String::new(),
            status: DriverRunStatus::Completed,
            artifact_url: Some(format!(
                "https://driver.invalid/outputs/{}.png",
                script.submission_key.replace(':', "-")
            )),
            credits: Some(1),
            error: None,
        });
        run.submission_key = script.submission_key.clone();

        self.runs
            .write()
            .await
            .insert(run.submission_key.clone(), run.clone());
        Ok(run)
    }

    async fn lookup(&self, submission_key: &str) -> Result<Option<DriverRun>, AdapterError> {
        Ok(self.runs.read().await.get(submission_key).cloned())
    }
}
