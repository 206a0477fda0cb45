pub mod audit;
pub mod episodes;
pub mod handlers;
pub mod jobs;
pub mod middleware;
pub mod orchestrator;
pub mod routes;

use axum::{http::StatusCode, Json};
use serde::Serialize;
use reelforge_core::QueueError;

pub use routes::create_router;

/// Error body shared by every endpoint
#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: String,
}

impl ErrorResponse {
    pub fn new(error: impl Into<String>) -> Self {
        Self {
            error: error.into(),
        }
    }
}

pub type ApiError = (StatusCode, Json<ErrorResponse>);

pub(crate) fn bad_request(error: impl Into<String>) -> ApiError {
    (StatusCode::BAD_REQUEST, Json(ErrorResponse::new(error)))
}

pub(crate) fn not_found(error: impl Into<String>) -> ApiError {
    (StatusCode::NOT_FOUND, Json(ErrorResponse::new(error)))
}

/// Map a queue error to a response.
pub(crate) fn queue_error(e: QueueError) -> ApiError {
    let status = match &e {
        QueueError::NotFound(_) => StatusCode::NOT_FOUND,
        QueueError::InvalidState { .. } => StatusCode::CONFLICT,
        QueueError::InvalidRequest(_) | QueueError::InvalidPlan(_) | QueueError::Backend(_) => {
            StatusCode::UNPROCESSABLE_ENTITY
        }
        QueueError::Store(_) => StatusCode::INTERNAL_SERVER_ERROR,
    };
    (status, Json(ErrorResponse::new(e.to_string())))
}
