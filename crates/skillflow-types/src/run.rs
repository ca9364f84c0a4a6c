//! Execution results: per-step results and the aggregate run report.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use crate::tool::{ErrorKind, ToolError};

// ---------------------------------------------------------------------------
// Step results
// ---------------------------------------------------------------------------

/// Terminal status of a single step.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum StepStatus {
    Succeeded,
    Failed,
    Skipped,
    HealedSucceeded,
}

impl StepStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            StepStatus::Succeeded => "succeeded",
            StepStatus::Failed => "failed",
            StepStatus::Skipped => "skipped",
            StepStatus::HealedSucceeded => "healed-succeeded",
        }
    }

    /// Succeeded directly or after healing.
    pub fn is_success(&self) -> bool {
        matches!(self, StepStatus::Succeeded | StepStatus::HealedSucceeded)
    }
}

impl std::fmt::Display for StepStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Failure category of a step: a tool error kind or an engine-level kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum StepErrorKind {
    Auth,
    Network,
    NotFound,
    InvalidArgument,
    RateLimited,
    Unknown,
    ResolutionError,
    SandboxViolation,
    TransformTimeout,
    Cancelled,
}

impl StepErrorKind {
    /// The tool kind, if this failure came from a tool call.
    pub fn tool_kind(&self) -> Option<ErrorKind> {
        match self {
            StepErrorKind::Auth => Some(ErrorKind::Auth),
            StepErrorKind::Network => Some(ErrorKind::Network),
            StepErrorKind::NotFound => Some(ErrorKind::NotFound),
            StepErrorKind::InvalidArgument => Some(ErrorKind::InvalidArgument),
            StepErrorKind::RateLimited => Some(ErrorKind::RateLimited),
            StepErrorKind::Unknown => Some(ErrorKind::Unknown),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            StepErrorKind::Auth => "auth",
            StepErrorKind::Network => "network",
            StepErrorKind::NotFound => "not-found",
            StepErrorKind::InvalidArgument => "invalid-argument",
            StepErrorKind::RateLimited => "rate-limited",
            StepErrorKind::Unknown => "unknown",
            StepErrorKind::ResolutionError => "resolution-error",
            StepErrorKind::SandboxViolation => "sandbox-violation",
            StepErrorKind::TransformTimeout => "transform-timeout",
            StepErrorKind::Cancelled => "cancelled",
        }
    }
}

impl From<ErrorKind> for StepErrorKind {
    fn from(kind: ErrorKind) -> Self {
        match kind {
            ErrorKind::Auth => StepErrorKind::Auth,
            ErrorKind::Network => StepErrorKind::Network,
            ErrorKind::NotFound => StepErrorKind::NotFound,
            ErrorKind::InvalidArgument => StepErrorKind::InvalidArgument,
            ErrorKind::RateLimited => StepErrorKind::RateLimited,
            ErrorKind::Unknown => StepErrorKind::Unknown,
        }
    }
}

impl std::fmt::Display for StepErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Error detail recorded on a failed step.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StepError {
    pub kind: StepErrorKind,
    pub detail: String,
}

impl StepError {
    pub fn new(kind: StepErrorKind, detail: impl Into<String>) -> Self {
        Self {
            kind,
            detail: detail.into(),
        }
    }
}

impl From<ToolError> for StepError {
    fn from(err: ToolError) -> Self {
        Self {
            kind: err.kind.into(),
            detail: err.detail,
        }
    }
}

impl std::fmt::Display for StepError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.kind, self.detail)
    }
}

/// Result of one step, written to the execution context exactly once.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StepResult {
    pub status: StepStatus,
    /// Step output. `null` for skipped steps, absent for failed steps.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<StepError>,
    pub duration_ms: u64,
    /// Healing-attempt counter (0 or 1).
    pub healed: u8,
}

impl StepResult {
    pub fn succeeded(output: Value, duration_ms: u64) -> Self {
        Self {
            status: StepStatus::Succeeded,
            output: Some(output),
            error: None,
            duration_ms,
            healed: 0,
        }
    }

    pub fn healed(output: Value, duration_ms: u64) -> Self {
        Self {
            status: StepStatus::HealedSucceeded,
            output: Some(output),
            error: None,
            duration_ms,
            healed: 1,
        }
    }

    pub fn failed(error: StepError, duration_ms: u64, healed: u8) -> Self {
        Self {
            status: StepStatus::Failed,
            output: None,
            error: Some(error),
            duration_ms,
            healed,
        }
    }

    pub fn skipped() -> Self {
        Self {
            status: StepStatus::Skipped,
            output: Some(Value::Null),
            error: None,
            duration_ms: 0,
            healed: 0,
        }
    }
}

// ---------------------------------------------------------------------------
// Run report
// ---------------------------------------------------------------------------

/// Overall status of a workflow run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    Running,
    Succeeded,
    Partial,
    Failed,
}

impl std::fmt::Display for RunStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            RunStatus::Running => "running",
            RunStatus::Succeeded => "succeeded",
            RunStatus::Partial => "partial",
            RunStatus::Failed => "failed",
        };
        f.write_str(s)
    }
}

/// Rendered text of a description step, surfaced to the calling agent.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Guidance {
    pub step: String,
    pub text: String,
}

/// Aggregate result of one workflow run. Frozen once returned.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunReport {
    pub run_id: Uuid,
    pub workflow: String,
    pub status: RunStatus,
    pub steps: BTreeMap<String, StepResult>,
    /// Step names in the order they were recorded.
    pub step_order: Vec<String>,
    pub outputs: serde_json::Map<String, Value>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub output_errors: BTreeMap<String, String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub guidance: Vec<Guidance>,
    /// Run-level failure cause, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<StepError>,
    pub started_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub finished_at: Option<DateTime<Utc>>,
    pub duration_ms: u64,
}

impl RunReport {
    /// A fresh report in the `running` state.
    pub fn new(run_id: Uuid, workflow: impl Into<String>) -> Self {
        Self {
            run_id,
            workflow: workflow.into(),
            status: RunStatus::Running,
            steps: BTreeMap::new(),
            step_order: Vec::new(),
            outputs: serde_json::Map::new(),
            output_errors: BTreeMap::new(),
            guidance: Vec::new(),
            error: None,
            started_at: Utc::now(),
            finished_at: None,
            duration_ms: 0,
        }
    }

    /// Results in execution order.
    pub fn ordered_steps(&self) -> impl Iterator<Item = (&str, &StepResult)> {
        self.step_order
            .iter()
            .filter_map(|name| self.steps.get(name).map(|r| (name.as_str(), r)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_failed_result_omits_output() {
        let result = StepResult::failed(StepError::new(StepErrorKind::Auth, "expired"), 12, 0);
        let value = serde_json::to_value(&result).unwrap();
        assert_eq!(
            value,
            json!({
                "status": "failed",
                "error": { "kind": "auth", "detail": "expired" },
                "duration_ms": 12,
                "healed": 0
            })
        );
    }

    #[test]
    fn test_skipped_result_has_null_output() {
        let value = serde_json::to_value(StepResult::skipped()).unwrap();
        assert_eq!(value["status"], json!("skipped"));
        // `Some(Null)` serializes as an explicit null.
        assert!(value.as_object().unwrap().contains_key("output"));
        assert_eq!(value["output"], Value::Null);
    }

    #[test]
    fn test_healed_status_serializes_kebab_case() {
        let value = serde_json::to_value(StepStatus::HealedSucceeded).unwrap();
        assert_eq!(value, json!("healed-succeeded"));
        assert!(StepStatus::HealedSucceeded.is_success());
    }

    #[test]
    fn test_tool_error_converts_to_step_error() {
        let err: StepError = ToolError::not_found("no such repo").into();
        assert_eq!(err.kind, StepErrorKind::NotFound);
        assert_eq!(err.kind.tool_kind(), Some(ErrorKind::NotFound));
        assert_eq!(StepErrorKind::SandboxViolation.tool_kind(), None);
    }
}
