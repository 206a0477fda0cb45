//! Gate decision rule.

use crate::asset::EpisodeManifest;

use super::types::{GateConfig, GateError, HardFail, QualityGateResult, ScoreInputs, Verdict};

/// Slack for float error in the weighted sum when comparing to the threshold.
const THRESHOLD_EPSILON: f64 = 1e-9;

fn check_score(field: &'static str, value: f64) -> Result<(), GateError> {
    if value.is_finite() && (0.0..=100.0).contains(&value) {
        Ok(())
    } else {
        Err(GateError::InvalidScore { field, value })
    }
}

/// Evaluate an episode revision.
///
/// PASS requires the weighted score to reach the threshold and no hard-fail
/// to hold. A hard-fail forces FAIL whatever the score.
pub fn evaluate(
    manifest: &EpisodeManifest,
    inputs: &ScoreInputs,
    config: &GateConfig,
) -> Result<QualityGateResult, GateError> {
    config.validate()?;
    check_score("content_accuracy", inputs.content_accuracy)?;
    check_score("compliance", inputs.compliance)?;
    check_score("asset_completeness", inputs.asset_completeness)?;

    let w = &config.weights;
    let raw = (inputs.content_accuracy * w.content_accuracy
        + inputs.compliance * w.compliance
        + inputs.asset_completeness * w.asset_completeness)
        / w.sum();
    let score = (raw * 100.0).round() / 100.0;

    let mut hard_fails = Vec::new();
    if !inputs.disclosure_present {
        hard_fails.push(HardFail::MissingDisclosure);
    }
    if !inputs.affiliate_links_resolved {
        hard_fails.push(HardFail::UnresolvedAffiliateLinks);
    }
    if inputs.unsourced_claims > 0 {
        hard_fails.push(HardFail::UnsourcedClaims);
    }
    if !manifest.has_publishable_visual() {
        hard_fails.push(HardFail::NoPublishableVisual);
    }

    // The unrounded aggregate decides; `score` is for display only
    let verdict = if hard_fails.is_empty() && raw + THRESHOLD_EPSILON >= config.threshold {
        Verdict::Pass
    } else {
        Verdict::Fail
    };

    Ok(QualityGateResult {
        episode: manifest.episode.clone(),
        revision: inputs.revision,
        verdict,
        score,
        threshold: config.threshold,
        hard_fails,
        inputs: inputs.clone(),
        asset_complete: manifest.is_asset_complete(),
        missing_assets: manifest.missing().map(|e| e.dedup_key.clone()).collect(),
    })
}
