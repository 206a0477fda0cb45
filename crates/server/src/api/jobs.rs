//! Job API handlers.

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    Json,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use reelforge_core::{CancelOutcome, EnqueueOutcome, Job, JobFilter, JobState, JobStore};

use super::middleware::Operator;
use super::{bad_request, not_found, queue_error, ApiError, ErrorResponse};
use crate::state::AppState;

/// Maximum allowed limit for job queries
const MAX_LIMIT: i64 = 1000;

/// Default limit for job queries
const DEFAULT_LIMIT: i64 = 100;

// ============================================================================
// Request/Response Types
// ============================================================================

/// Query parameters for listing jobs
#[derive(Debug, Deserialize)]
pub struct ListJobsParams {
    /// Filter by state type (e.g. "retry_scheduled")
    pub state: Option<String>,
    pub episode: Option<String>,
    pub backend: Option<String>,
    pub limit: Option<i64>,
    pub offset: Option<i64>,
}

/// Response for listing jobs
#[derive(Debug, Serialize)]
pub struct ListJobsResponse {
    pub jobs: Vec<Job>,
    pub total: i64,
    pub limit: i64,
    pub offset: i64,
}

/// Request body for cancelling a job
#[derive(Debug, Deserialize)]
pub struct CancelJobBody {
    pub reason: Option<String>,
}

// ============================================================================
// Handlers
// ============================================================================

/// List jobs with optional filters
pub async fn list_jobs(
    State(state): State<Arc<AppState>>,
    Query(params): Query<ListJobsParams>,
) -> Result<Json<ListJobsResponse>, ApiError> {
    let limit = params.limit.unwrap_or(DEFAULT_LIMIT).clamp(1, MAX_LIMIT);
    let offset = params.offset.unwrap_or(0).max(0);

    let mut filter = JobFilter::new().with_limit(limit).with_offset(offset);

    if let Some(ref state_filter) = params.state {
        if !JobState::ALL_TYPES.contains(&state_filter.as_str()) {
            return Err(bad_request(format!(
                "Unknown job state '{}', expected one of: {}",
                state_filter,
                JobState::ALL_TYPES.join(", ")
            )));
        }
        filter = filter.with_state(state_filter);
    }

    if let Some(ref episode) = params.episode {
        filter = filter.with_episode(episode);
    }

    if let Some(ref backend) = params.backend {
        filter = filter.with_backend(backend);
    }

    let jobs = state.queue().list(&filter).map_err(queue_error)?;

    let total = match state.queue().store().count(&filter) {
        Ok(count) => count,
        Err(e) => {
            return Err((
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(ErrorResponse::new(e.to_string())),
            ));
        }
    };

    Ok(Json(ListJobsResponse {
        jobs,
        total,
        limit,
        offset,
    }))
}

/// Get a job by ID
pub async fn get_job(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<Json<Job>, ApiError> {
    match state.queue().get(&id) {
        Ok(Some(job)) => Ok(Json(job)),
        Ok(None) => Err(not_found(format!("Job not found: {}", id))),
        Err(e) => Err(queue_error(e)),
    }
}

/// Cancel a job.
///
/// Responds 200 with `result: "cancelled"` when the job had not started and
/// 202 with `result: "requested"` when it is in flight.
pub async fn cancel_job(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    Operator(operator): Operator,
    body: Option<Json<CancelJobBody>>,
) -> Result<(StatusCode, Json<CancelOutcome>), ApiError> {
    let reason = body.and_then(|Json(b)| b.reason);

    let outcome = state
        .queue()
        .cancel(&id, &operator, reason)
        .await
        .map_err(queue_error)?;

    let status = match outcome {
        CancelOutcome::Cancelled(_) => StatusCode::OK,
        CancelOutcome::Requested(_) => StatusCode::ACCEPTED,
    };
    Ok((status, Json(outcome)))
}

/// Force-retry a failed, abandoned or cancelled job as a new job
pub async fn retry_job(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    Operator(operator): Operator,
) -> Result<(StatusCode, Json<EnqueueOutcome>), ApiError> {
    let outcome = state
        .queue()
        .resubmit(&id, &operator)
        .await
        .map_err(queue_error)?;

    let status = if outcome.deduplicated {
        StatusCode::OK
    } else {
        StatusCode::CREATED
    };
    Ok((status, Json(outcome)))
}
