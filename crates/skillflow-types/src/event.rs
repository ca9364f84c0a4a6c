//! Lifecycle events emitted by the engine during a run.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

/// Kind of lifecycle event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    RunStarted,
    StepStarted,
    StepSkipped,
    StepSucceeded,
    StepFailed,
    StepHealed,
    RunCompleted,
}

impl EventKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            EventKind::RunStarted => "run_started",
            EventKind::StepStarted => "step_started",
            EventKind::StepSkipped => "step_skipped",
            EventKind::StepSucceeded => "step_succeeded",
            EventKind::StepFailed => "step_failed",
            EventKind::StepHealed => "step_healed",
            EventKind::RunCompleted => "run_completed",
        }
    }
}

impl std::fmt::Display for EventKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// An immutable lifecycle event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EventRecord {
    pub run_id: Uuid,
    /// `None` for run-level events.
    pub step_name: Option<String>,
    pub kind: EventKind,
    pub timestamp: DateTime<Utc>,
    /// Small JSON object with kind-specific detail.
    pub payload: Value,
}

impl EventRecord {
    /// A run-level event stamped with the current time.
    pub fn run(run_id: Uuid, kind: EventKind, payload: Value) -> Self {
        Self {
            run_id,
            step_name: None,
            kind,
            timestamp: Utc::now(),
            payload,
        }
    }

    /// A step-level event stamped with the current time.
    pub fn step(run_id: Uuid, step_name: impl Into<String>, kind: EventKind, payload: Value) -> Self {
        Self {
            run_id,
            step_name: Some(step_name.into()),
            kind,
            timestamp: Utc::now(),
            payload,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_record_serializes_with_snake_case_kind() {
        let record = EventRecord::step(Uuid::now_v7(), "fetch", EventKind::StepHealed, json!({}));
        let value = serde_json::to_value(&record).unwrap();
        assert_eq!(value["kind"], json!("step_healed"));
        assert_eq!(value["step_name"], json!("fetch"));
    }

    #[test]
    fn test_run_level_record_has_no_step() {
        let record = EventRecord::run(Uuid::now_v7(), EventKind::RunStarted, json!({}));
        assert!(record.step_name.is_none());
        assert_eq!(record.kind.to_string(), "run_started");
    }
}
