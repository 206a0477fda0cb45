//! Quality gate types.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Errors from gate evaluation and result storage.
#[derive(Debug, Error)]
pub enum GateError {
    #[error("invalid gate configuration: {0}")]
    InvalidConfig(String),

    #[error("score {field} out of range: {value} (expected 0-100)")]
    InvalidScore { field: &'static str, value: f64 },

    #[error("invalid score inputs: {0}")]
    InvalidInputs(String),

    #[error("gate result for {episode} revision {revision} already recorded with a different outcome")]
    AlreadyRecorded { episode: String, revision: u32 },

    #[error("database error: {0}")]
    Database(String),
}

impl From<rusqlite::Error> for GateError {
    fn from(e: rusqlite::Error) -> Self {
        GateError::Database(e.to_string())
    }
}

/// Weights applied to the sub-scores when aggregating.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GateWeights {
    #[serde(default = "default_content_weight")]
    pub content_accuracy: f64,
    #[serde(default = "default_compliance_weight")]
    pub compliance: f64,
    #[serde(default = "default_completeness_weight")]
    pub asset_completeness: f64,
}

fn default_content_weight() -> f64 {
    0.4
}

fn default_compliance_weight() -> f64 {
    0.4
}

fn default_completeness_weight() -> f64 {
    0.2
}

impl Default for GateWeights {
    fn default() -> Self {
        Self {
            content_accuracy: default_content_weight(),
            compliance: default_compliance_weight(),
            asset_completeness: default_completeness_weight(),
        }
    }
}

impl GateWeights {
    pub fn sum(&self) -> f64 {
        self.content_accuracy + self.compliance + self.asset_completeness
    }
}

/// Quality gate configuration (`[quality_gate]`).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GateConfig {
    /// Minimum aggregate score (0-100) for a PASS.
    #[serde(default = "default_threshold")]
    pub threshold: f64,

    #[serde(default)]
    pub weights: GateWeights,
}

fn default_threshold() -> f64 {
    85.0
}

impl Default for GateConfig {
    fn default() -> Self {
        Self {
            threshold: default_threshold(),
            weights: GateWeights::default(),
        }
    }
}

impl GateConfig {
    /// Threshold must lie in 0..=100; weights must be non-negative and sum to 1.
    pub fn validate(&self) -> Result<(), GateError> {
        if !self.threshold.is_finite() || !(0.0..=100.0).contains(&self.threshold) {
            return Err(GateError::InvalidConfig(format!(
                "threshold must be between 0 and 100, got {}",
                self.threshold
            )));
        }
        let w = &self.weights;
        for (name, value) in [
            ("content_accuracy", w.content_accuracy),
            ("compliance", w.compliance),
            ("asset_completeness", w.asset_completeness),
        ] {
            if !value.is_finite() || value < 0.0 {
                return Err(GateError::InvalidConfig(format!(
                    "weight {} must be non-negative, got {}",
                    name, value
                )));
            }
        }
        if (w.sum() - 1.0).abs() > 1e-6 {
            return Err(GateError::InvalidConfig(format!(
                "weights must sum to 1.0, got {}",
                w.sum()
            )));
        }
        Ok(())
    }
}

/// Externally computed scorecard for one episode revision.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScoreInputs {
    #[serde(default = "default_revision")]
    pub revision: u32,
    pub content_accuracy: f64,
    pub compliance: f64,
    pub asset_completeness: f64,
    pub disclosure_present: bool,
    pub affiliate_links_resolved: bool,
    /// Number of claims without a verifiable source.
    #[serde(default)]
    pub unsourced_claims: u32,
}

fn default_revision() -> u32 {
    1
}

impl ScoreInputs {
    pub fn from_toml_str(content: &str) -> Result<Self, GateError> {
        toml::from_str(content).map_err(|e| GateError::InvalidInputs(e.to_string()))
    }
}

/// Absolute vetoes, reported in this order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HardFail {
    MissingDisclosure,
    UnresolvedAffiliateLinks,
    UnsourcedClaims,
    NoPublishableVisual,
}

impl HardFail {
    pub fn as_str(&self) -> &'static str {
        match self {
            HardFail::MissingDisclosure => "missing_disclosure",
            HardFail::UnresolvedAffiliateLinks => "unresolved_affiliate_links",
            HardFail::UnsourcedClaims => "unsourced_claims",
            HardFail::NoPublishableVisual => "no_publishable_visual",
        }
    }

    pub fn description(&self) -> &'static str {
        match self {
            HardFail::MissingDisclosure => "affiliate disclosure is missing",
            HardFail::UnresolvedAffiliateLinks => "affiliate links do not resolve",
            HardFail::UnsourcedClaims => "a claim has no verifiable source",
            HardFail::NoPublishableVisual => "no publishable visual asset",
        }
    }
}

impl std::fmt::Display for HardFail {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Verdict {
    Pass,
    Fail,
}

impl Verdict {
    pub fn as_str(&self) -> &'static str {
        match self {
            Verdict::Pass => "PASS",
            Verdict::Fail => "FAIL",
        }
    }

    pub fn is_pass(&self) -> bool {
        matches!(self, Verdict::Pass)
    }
}

impl std::fmt::Display for Verdict {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Outcome of one gate evaluation. Contains no wall-clock data so that
/// equal inputs produce equal results.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QualityGateResult {
    pub episode: String,
    pub revision: u32,
    pub verdict: Verdict,
    /// Weighted aggregate, rounded to two decimals.
    pub score: f64,
    pub threshold: f64,
    pub hard_fails: Vec<HardFail>,
    pub inputs: ScoreInputs,
    pub asset_complete: bool,
    /// Dedup keys of required assets without a succeeded job.
    pub missing_assets: Vec<String>,
}

/// A stored gate result.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GateRecord {
    pub result: QualityGateResult,
    pub recorded_at: DateTime<Utc>,
}
