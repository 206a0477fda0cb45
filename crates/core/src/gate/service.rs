//! Gate evaluation with persistence, metrics and audit.

use std::sync::Arc;

use tracing::info;

use crate::asset::EpisodeManifest;
use crate::audit::{AuditEvent, AuditHandle};
use crate::metrics;

use super::evaluator::evaluate;
use super::store::GateStore;
use super::types::{GateConfig, GateError, QualityGateResult, ScoreInputs};

/// Evaluates episode revisions and records every verdict.
pub struct QualityGate {
    store: Arc<dyn GateStore>,
    config: GateConfig,
    audit: Option<AuditHandle>,
}

impl QualityGate {
    pub fn new(store: Arc<dyn GateStore>, config: GateConfig) -> Self {
        Self {
            store,
            config,
            audit: None,
        }
    }

    pub fn with_audit(mut self, audit: AuditHandle) -> Self {
        self.audit = Some(audit);
        self
    }

    pub fn config(&self) -> &GateConfig {
        &self.config
    }

    pub fn store(&self) -> &Arc<dyn GateStore> {
        &self.store
    }

    /// Evaluate and record a revision.
    ///
    /// Re-running with the same manifest and inputs returns the same result;
    /// a different result for an already recorded revision is rejected.
    pub async fn run(
        &self,
        manifest: &EpisodeManifest,
        inputs: &ScoreInputs,
    ) -> Result<QualityGateResult, GateError> {
        let result = evaluate(manifest, inputs, &self.config)?;
        self.store.record(&result)?;

        metrics::GATE_VERDICTS
            .with_label_values(&[result.verdict.as_str()])
            .inc();
        for hard_fail in &result.hard_fails {
            metrics::GATE_HARD_FAILS
                .with_label_values(&[hard_fail.as_str()])
                .inc();
        }

        info!(
            episode = %result.episode,
            revision = result.revision,
            verdict = %result.verdict,
            score = result.score,
            hard_fails = result.hard_fails.len(),
            "Quality gate evaluated"
        );

        if let Some(ref audit) = self.audit {
            audit
                .emit(AuditEvent::GateEvaluated {
                    episode: result.episode.clone(),
                    revision: result.revision,
                    verdict: result.verdict.as_str().to_string(),
                    score: result.score,
                    hard_fails: result
                        .hard_fails
                        .iter()
                        .map(|h| h.as_str().to_string())
                        .collect(),
                })
                .await;
        }

        Ok(result)
    }
}
