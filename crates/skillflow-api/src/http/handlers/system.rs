//! Engine introspection handlers.

use std::time::Instant;

use axum::extract::State;
use axum::Json;
use serde_json::{json, Value};

use crate::http::response::{new_request_id, ApiMeta, ApiResponse};
use crate::state::AppState;

/// GET /api/v1/tools
pub async fn list_tools(State(state): State<AppState>) -> Json<ApiResponse<Value>> {
    let started = Instant::now();
    let tools: Vec<Value> = state
        .runner
        .tools()
        .describe()
        .into_iter()
        .map(|(name, description)| json!({ "name": name, "description": description }))
        .collect();
    Json(ApiResponse::success(json!(tools), ApiMeta::since(new_request_id(), started)))
}

/// GET /api/v1/engine: effective settings plus current activity.
pub async fn engine_info(State(state): State<AppState>) -> Json<ApiResponse<Value>> {
    let started = Instant::now();
    let config = &state.config;
    let data = json!({
        "version": env!("CARGO_PKG_VERSION"),
        "skills_dir": state.skills_dir.display().to_string(),
        "default_tool_timeout_secs": config.default_tool_timeout_secs,
        "transform_timeout_ms": config.transform_timeout_ms,
        "cancel_grace_secs": config.cancel_grace_secs,
        "max_step_output_bytes": config.max_step_output_bytes,
        "tools": state.runner.tools().len(),
        "auto_heal_rules": config.auto_heal.len(),
        "active_runs": state.runner.active_runs().len(),
    });
    Json(ApiResponse::success(data, ApiMeta::since(new_request_id(), started)))
}
