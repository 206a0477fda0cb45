//! Episode API handlers: plan admission, manifests and the quality gate.

use axum::{
    extract::{Path, State},
    http::StatusCode,
    Json,
};
use serde::Serialize;
use std::sync::Arc;
use reelforge_core::gate::GateRecord;
use reelforge_core::{
    EpisodeManifest, EpisodePlan, GateError, GateStore, JobStore, PlanOutcome, QualityGateResult,
    ScoreInputs,
};

use super::middleware::Operator;
use super::{not_found, queue_error, ApiError, ErrorResponse};
use crate::state::AppState;

/// Response for listing episodes
#[derive(Debug, Serialize)]
pub struct ListEpisodesResponse {
    pub episodes: Vec<String>,
}

/// Response for an episode's recorded gate results
#[derive(Debug, Serialize)]
pub struct GateHistoryResponse {
    pub episode: String,
    pub results: Vec<GateRecord>,
}

fn gate_error(e: GateError) -> ApiError {
    let status = match &e {
        GateError::InvalidConfig(_) | GateError::InvalidScore { .. } | GateError::InvalidInputs(_) => {
            StatusCode::UNPROCESSABLE_ENTITY
        }
        GateError::AlreadyRecorded { .. } => StatusCode::CONFLICT,
        GateError::Database(_) => StatusCode::INTERNAL_SERVER_ERROR,
    };
    (status, Json(ErrorResponse::new(e.to_string())))
}

/// Register an episode plan and enqueue its required assets
pub async fn create_episode(
    State(state): State<Arc<AppState>>,
    Operator(operator): Operator,
    Json(plan): Json<EpisodePlan>,
) -> Result<(StatusCode, Json<PlanOutcome>), ApiError> {
    let outcome = state
        .queue()
        .enqueue_plan(&plan, &operator)
        .await
        .map_err(queue_error)?;
    Ok((StatusCode::CREATED, Json(outcome)))
}

/// List registered episode slugs
pub async fn list_episodes(
    State(state): State<Arc<AppState>>,
) -> Result<Json<ListEpisodesResponse>, ApiError> {
    match state.queue().store().list_episodes() {
        Ok(episodes) => Ok(Json(ListEpisodesResponse { episodes })),
        Err(e) => Err((
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(ErrorResponse::new(e.to_string())),
        )),
    }
}

/// Required assets of an episode and the job holding each one
pub async fn get_manifest(
    State(state): State<Arc<AppState>>,
    Path(slug): Path<String>,
) -> Result<Json<EpisodeManifest>, ApiError> {
    match state.queue().manifest(&slug) {
        Ok(Some(manifest)) => Ok(Json(manifest)),
        Ok(None) => Err(not_found(format!("Episode not registered: {}", slug))),
        Err(e) => Err(queue_error(e)),
    }
}

/// Evaluate and record the quality gate for an episode revision.
///
/// A FAIL verdict is still a 200: the verdict and every hard-fail are in the
/// body.
pub async fn evaluate_gate(
    State(state): State<Arc<AppState>>,
    Path(slug): Path<String>,
    Json(inputs): Json<ScoreInputs>,
) -> Result<Json<QualityGateResult>, ApiError> {
    let manifest = match state.queue().manifest(&slug) {
        Ok(Some(manifest)) => manifest,
        Ok(None) => return Err(not_found(format!("Episode not registered: {}", slug))),
        Err(e) => return Err(queue_error(e)),
    };

    state
        .gate()
        .run(&manifest, &inputs)
        .await
        .map(Json)
        .map_err(gate_error)
}

/// Recorded gate results for an episode, oldest revision first
pub async fn gate_history(
    State(state): State<Arc<AppState>>,
    Path(slug): Path<String>,
) -> Result<Json<GateHistoryResponse>, ApiError> {
    let results = state.gate().store().list(&slug).map_err(gate_error)?;
    Ok(Json(GateHistoryResponse {
        episode: slug,
        results,
    }))
}
