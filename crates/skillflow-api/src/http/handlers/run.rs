//! Run handlers: start a workflow run, list active runs, cancel a run.

use std::time::Instant;

use axum::extract::{Path, Query, State};
use axum::Json;
use serde::Deserialize;
use serde_json::{json, Map, Value};
use uuid::Uuid;

use crate::http::error::AppError;
use crate::http::handlers::workflow::lookup;
use crate::http::response::{new_request_id, ApiMeta, ApiResponse};
use crate::state::AppState;

#[derive(Debug, Deserialize)]
pub struct StartRunQuery {
    /// Caller-chosen run id, so the run can be cancelled while in flight.
    pub run_id: Option<Uuid>,
}

/// POST /api/v1/workflows/{name}/runs
///
/// The body is the JSON object of workflow inputs. The request completes
/// when the run does; step failures are reported inside the run report.
pub async fn start_run(
    State(state): State<AppState>,
    Path(name): Path<String>,
    Query(query): Query<StartRunQuery>,
    Json(inputs): Json<Map<String, Value>>,
) -> Result<Json<ApiResponse<Value>>, AppError> {
    let started = Instant::now();
    let request_id = new_request_id();

    let def = lookup(&state, &name).await?;
    let run_id = query.run_id.unwrap_or_else(Uuid::now_v7);
    tracing::info!(workflow = %def.name, %run_id, %request_id, "run requested over http");

    let report = state.runner.run_with_id(run_id, &def, inputs).await?;
    let data = serde_json::to_value(&report).map_err(|e| AppError::Internal(e.to_string()))?;

    Ok(Json(
        ApiResponse::success(data, ApiMeta::since(request_id, started))
            .with_link("workflow", format!("/api/v1/workflows/{name}")),
    ))
}

/// GET /api/v1/runs
pub async fn list_runs(State(state): State<AppState>) -> Json<ApiResponse<Value>> {
    let started = Instant::now();
    let mut runs = state.runner.active_runs();
    runs.sort();
    Json(ApiResponse::success(
        json!({ "active": runs }),
        ApiMeta::since(new_request_id(), started),
    ))
}

/// POST /api/v1/runs/{run_id}/cancel
pub async fn cancel_run(
    State(state): State<AppState>,
    Path(run_id): Path<Uuid>,
) -> Result<Json<ApiResponse<Value>>, AppError> {
    let started = Instant::now();
    state.runner.cancel(run_id)?;
    Ok(Json(ApiResponse::success(
        json!({ "run_id": run_id, "cancelled": true }),
        ApiMeta::since(new_request_id(), started),
    )))
}
