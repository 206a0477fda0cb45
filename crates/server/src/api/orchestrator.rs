//! Orchestrator API handlers.

use axum::{extract::State, http::StatusCode, Json};
use serde::Serialize;
use std::sync::Arc;
use reelforge_core::OrchestratorStatus;

use super::{ApiError, ErrorResponse};
use crate::state::AppState;

/// Simple message response
#[derive(Debug, Serialize)]
pub struct MessageResponse {
    pub message: String,
}

/// Get orchestrator status: loops, circuits, credits and job counts
pub async fn get_status(State(state): State<Arc<AppState>>) -> Json<OrchestratorStatus> {
    Json(state.orchestrator().status().await)
}

/// Start the dispatch loops
pub async fn start(State(state): State<Arc<AppState>>) -> Result<Json<MessageResponse>, ApiError> {
    let orchestrator = state.orchestrator();
    if orchestrator.is_running() {
        return Err((
            StatusCode::CONFLICT,
            Json(ErrorResponse::new("Orchestrator already running")),
        ));
    }

    orchestrator.start().await;

    // Recovery can halt on an operational failure before any loop starts.
    if let Some(reason) = orchestrator.status().await.halted {
        return Err((
            StatusCode::SERVICE_UNAVAILABLE,
            Json(ErrorResponse::new(format!(
                "Orchestrator halted during recovery: {}",
                reason
            ))),
        ));
    }

    Ok(Json(MessageResponse {
        message: "Orchestrator started".to_string(),
    }))
}

/// Stop the dispatch loops, letting in-flight invocations settle
pub async fn stop(State(state): State<Arc<AppState>>) -> Result<Json<MessageResponse>, ApiError> {
    let orchestrator = state.orchestrator();
    if !orchestrator.is_running() {
        return Err((
            StatusCode::CONFLICT,
            Json(ErrorResponse::new("Orchestrator not running")),
        ));
    }

    orchestrator.stop().await;
    Ok(Json(MessageResponse {
        message: "Orchestrator stopped".to_string(),
    }))
}
