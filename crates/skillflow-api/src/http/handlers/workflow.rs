//! Workflow discovery handlers.

use std::time::Instant;

use axum::extract::{Path, State};
use axum::Json;
use serde_json::{json, Value};

use skillflow_core::workflow::{discover_workflows, find_workflow};
use skillflow_types::workflow::WorkflowDefinition;

use crate::http::error::AppError;
use crate::http::response::{new_request_id, ApiMeta, ApiResponse};
use crate::state::AppState;

/// GET /api/v1/workflows
pub async fn list_workflows(
    State(state): State<AppState>,
) -> Result<Json<ApiResponse<Value>>, AppError> {
    let started = Instant::now();

    let dir = state.skills_dir.clone();
    let workflows = tokio::task::spawn_blocking(move || discover_workflows(&dir))
        .await
        .map_err(|e| AppError::Internal(e.to_string()))??;

    let items: Vec<Value> = workflows
        .iter()
        .map(|(path, def)| {
            json!({
                "name": def.name,
                "description": def.description,
                "inputs": def.inputs,
                "steps": def.steps.len(),
                "path": path.display().to_string(),
            })
        })
        .collect();

    Ok(Json(
        ApiResponse::success(json!(items), ApiMeta::since(new_request_id(), started))
            .with_link("self", "/api/v1/workflows"),
    ))
}

/// GET /api/v1/workflows/{name}
pub async fn get_workflow(
    State(state): State<AppState>,
    Path(name): Path<String>,
) -> Result<Json<ApiResponse<Value>>, AppError> {
    let started = Instant::now();

    let def = lookup(&state, &name).await?;
    let data = serde_json::to_value(&def).map_err(|e| AppError::Internal(e.to_string()))?;

    Ok(Json(
        ApiResponse::success(data, ApiMeta::since(new_request_id(), started))
            .with_link("self", format!("/api/v1/workflows/{name}"))
            .with_link("runs", format!("/api/v1/workflows/{name}/runs")),
    ))
}

/// Resolve a workflow by name in the skills directory.
///
/// Only names are accepted over HTTP; file paths are a CLI affordance.
pub(crate) async fn lookup(state: &AppState, name: &str) -> Result<WorkflowDefinition, AppError> {
    let looks_like_path = name.contains(['/', '\\']) || name.ends_with(".yaml") || name.ends_with(".yml");
    if looks_like_path {
        return Err(AppError::Validation(format!("'{name}' is not a workflow name")));
    }
    let dir = state.skills_dir.clone();
    let name = name.to_string();
    let (_, def) = tokio::task::spawn_blocking(move || find_workflow(&dir, &name))
        .await
        .map_err(|e| AppError::Internal(e.to_string()))??;
    Ok(def)
}
