//! `AppError`: maps engine errors onto HTTP statuses and the error envelope.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;

use skillflow_core::workflow::{RunnerError, WorkflowError};

use crate::http::response::ApiResponse;

/// Application-level error that maps to HTTP responses.
#[derive(Debug)]
pub enum AppError {
    /// Errors raised before or around a run.
    Runner(RunnerError),
    /// Validation error.
    Validation(String),
    /// Generic internal error.
    Internal(String),
}

impl From<RunnerError> for AppError {
    fn from(e: RunnerError) -> Self {
        AppError::Runner(e)
    }
}

impl From<WorkflowError> for AppError {
    fn from(e: WorkflowError) -> Self {
        AppError::Runner(RunnerError::Workflow(e))
    }
}

impl AppError {
    fn parts(&self) -> (StatusCode, &'static str, String) {
        match self {
            AppError::Runner(RunnerError::Workflow(WorkflowError::NotFound(msg))) => (
                StatusCode::NOT_FOUND,
                "WORKFLOW_NOT_FOUND",
                format!("Workflow not found: {msg}"),
            ),
            AppError::Runner(e) if e.is_validation() => {
                (StatusCode::BAD_REQUEST, "VALIDATION_ERROR", e.to_string())
            }
            AppError::Runner(RunnerError::RunNotFound(id)) => (
                StatusCode::NOT_FOUND,
                "RUN_NOT_FOUND",
                format!("No active run {id}"),
            ),
            AppError::Runner(RunnerError::RunAlreadyActive(id)) => (
                StatusCode::CONFLICT,
                "RUN_CONFLICT",
                format!("Run {id} is already active"),
            ),
            AppError::Runner(e) => {
                (StatusCode::INTERNAL_SERVER_ERROR, "WORKFLOW_ERROR", e.to_string())
            }
            AppError::Validation(msg) => {
                (StatusCode::BAD_REQUEST, "VALIDATION_ERROR", msg.clone())
            }
            AppError::Internal(msg) => {
                (StatusCode::INTERNAL_SERVER_ERROR, "INTERNAL_ERROR", msg.clone())
            }
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, code, message) = self.parts();
        if status.is_server_error() {
            tracing::error!(code, %message, "request failed");
        }

        (status, Json(ApiResponse::failure(code, message))).into_response()
    }
}
