//! Per-run execution context.
//!
//! `ExecutionContext` holds the resolved inputs, the constants and an
//! append-only map of step results. It is the [`Scope`] every template,
//! condition and transform binding is resolved against. A fresh context is
//! built for every run.

use std::collections::BTreeMap;

use serde_json::{json, Map, Value};
use skillflow_types::run::StepResult;
use skillflow_types::workflow::WorkflowDefinition;
use uuid::Uuid;

use super::definition::WorkflowError;
use super::path::{walk, PathSegment, Scope, ValuePath};

/// Default cap on the serialized size of a single step output (1 MiB).
pub const MAX_STEP_OUTPUT_SIZE: usize = 1_048_576;

/// Mutable state that flows through one workflow run.
#[derive(Debug, Clone)]
pub struct ExecutionContext {
    pub run_id: Uuid,
    pub workflow_name: String,
    inputs: Map<String, Value>,
    constants: Map<String, Value>,
    results: BTreeMap<String, StepResult>,
    order: Vec<String>,
    max_output_bytes: usize,
}

impl ExecutionContext {
    pub fn new(run_id: Uuid, def: &WorkflowDefinition, inputs: Map<String, Value>) -> Self {
        Self {
            run_id,
            workflow_name: def.name.clone(),
            inputs,
            constants: def.constants.clone().into_iter().collect(),
            results: BTreeMap::new(),
            order: Vec::new(),
            max_output_bytes: MAX_STEP_OUTPUT_SIZE,
        }
    }

    /// Override the per-output size cap.
    pub fn with_max_output_bytes(mut self, max: usize) -> Self {
        self.max_output_bytes = max;
        self
    }

    pub fn inputs(&self) -> &Map<String, Value> {
        &self.inputs
    }

    pub fn constants(&self) -> &Map<String, Value> {
        &self.constants
    }

    /// Record the result of a step.
    ///
    /// A step name can be recorded once per run; a second attempt is an
    /// error and leaves the first result untouched. Oversized outputs are
    /// replaced by a truncation marker.
    pub fn record(&mut self, step: &str, mut result: StepResult) -> Result<(), WorkflowError> {
        if self.results.contains_key(step) {
            return Err(WorkflowError::DuplicateResult(step.to_string()));
        }

        if let Some(output) = &result.output {
            let size = serde_json::to_string(output).map(|s| s.len()).unwrap_or(0);
            if size > self.max_output_bytes {
                tracing::warn!(
                    step,
                    size,
                    max = self.max_output_bytes,
                    "step output exceeds size limit, truncating"
                );
                result.output = Some(json!({
                    "_truncated": true,
                    "_original_size": size,
                    "_message": format!(
                        "output exceeded {} byte limit and was truncated",
                        self.max_output_bytes
                    )
                }));
            }
        }

        self.order.push(step.to_string());
        self.results.insert(step.to_string(), result);
        Ok(())
    }

    pub fn result(&self, step: &str) -> Option<&StepResult> {
        self.results.get(step)
    }

    /// Names of recorded steps in execution order.
    pub fn order(&self) -> &[String] {
        &self.order
    }

    pub fn results(&self) -> &BTreeMap<String, StepResult> {
        &self.results
    }

    /// Consume the context, yielding results and their order.
    pub fn into_results(self) -> (BTreeMap<String, StepResult>, Vec<String>) {
        (self.results, self.order)
    }

    fn step_field(&self, step: &str, field: &str) -> Option<Value> {
        let result = self.results.get(step)?;
        match field {
            // Failed steps expose no output at all.
            "output" => result.output.clone(),
            "status" => Some(Value::String(result.status.as_str().to_string())),
            "error" => result.error.as_ref().and_then(|e| serde_json::to_value(e).ok()),
            "duration_ms" => Some(json!(result.duration_ms)),
            "healed" => Some(json!(result.healed)),
            _ => None,
        }
    }
}

impl Scope for ExecutionContext {
    fn lookup(&self, path: &ValuePath) -> Option<Value> {
        match path.root.as_str() {
            "inputs" => walk_map(&self.inputs, &path.segments),
            "constants" => walk_map(&self.constants, &path.segments),
            "steps" => {
                let (step, field) = match path.segments.as_slice() {
                    [PathSegment::Key(step), PathSegment::Key(field), ..] => (step, field),
                    _ => return None,
                };
                let value = self.step_field(step, field)?;
                walk(&value, &path.segments[2..]).cloned()
            }
            "workflow" => match path.segments.as_slice() {
                [PathSegment::Key(f)] if f == "name" => Some(Value::String(self.workflow_name.clone())),
                [PathSegment::Key(f)] if f == "run_id" => Some(Value::String(self.run_id.to_string())),
                _ => None,
            },
            _ => None,
        }
    }
}

fn walk_map(map: &Map<String, Value>, segments: &[PathSegment]) -> Option<Value> {
    match segments.split_first() {
        Some((PathSegment::Key(key), rest)) => walk(map.get(key)?, rest).cloned(),
        Some((PathSegment::Index(_), _)) => None,
        None => Some(Value::Object(map.clone())),
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use skillflow_types::run::{StepError, StepErrorKind};
    use skillflow_types::workflow::{StepKind, StepSpec};

    fn definition() -> WorkflowDefinition {
        WorkflowDefinition {
            name: "demo".to_string(),
            description: None,
            inputs: Vec::new(),
            constants: [("label".to_string(), json!("bug"))].into_iter().collect(),
            steps: vec![StepSpec {
                name: "a".to_string(),
                condition: None,
                on_error: Default::default(),
                fallback: Default::default(),
                timeout_secs: None,
                kind: StepKind::Description { text: "hi".into() },
            }],
            outputs: Vec::new(),
        }
    }

    fn context() -> ExecutionContext {
        let mut inputs = Map::new();
        inputs.insert("repo".into(), json!({ "name": "engine" }));
        ExecutionContext::new(Uuid::now_v7(), &definition(), inputs)
    }

    fn get(ctx: &ExecutionContext, path: &str) -> Option<Value> {
        ctx.lookup(&ValuePath::parse(path).unwrap())
    }

    #[test]
    fn test_inputs_constants_and_workflow() {
        let ctx = context();
        assert_eq!(get(&ctx, "inputs.repo.name"), Some(json!("engine")));
        assert_eq!(get(&ctx, "constants.label"), Some(json!("bug")));
        assert_eq!(get(&ctx, "workflow.name"), Some(json!("demo")));
        assert_eq!(get(&ctx, "workflow.run_id"), Some(json!(ctx.run_id.to_string())));
        assert_eq!(get(&ctx, "inputs.missing"), None);
    }

    #[test]
    fn test_step_fields() {
        let mut ctx = context();
        ctx.record("fetch", StepResult::succeeded(json!({ "id": 42 }), 12)).unwrap();
        ctx.record("skip", StepResult::skipped()).unwrap();
        ctx.record(
            "boom",
            StepResult::failed(StepError::new(StepErrorKind::Auth, "token expired"), 3, 0),
        )
        .unwrap();

        assert_eq!(get(&ctx, "steps.fetch.output.id"), Some(json!(42)));
        assert_eq!(get(&ctx, "steps.fetch.status"), Some(json!("succeeded")));
        assert_eq!(get(&ctx, "steps.fetch.duration_ms"), Some(json!(12)));
        assert_eq!(get(&ctx, "steps.skip.output"), Some(Value::Null));
        assert_eq!(get(&ctx, "steps.boom.output"), None);
        assert_eq!(get(&ctx, "steps.boom.error.kind"), Some(json!("auth")));
        assert_eq!(get(&ctx, "steps.never.output"), None);
        assert_eq!(ctx.order(), ["fetch", "skip", "boom"]);
    }

    #[test]
    fn test_results_are_write_once() {
        let mut ctx = context();
        ctx.record("a", StepResult::succeeded(json!(1), 1)).unwrap();
        let err = ctx.record("a", StepResult::succeeded(json!(2), 1)).unwrap_err();
        assert!(matches!(err, WorkflowError::DuplicateResult(ref s) if s == "a"));
        assert_eq!(ctx.result("a").unwrap().output, Some(json!(1)));
        assert_eq!(ctx.order().len(), 1);
    }

    #[test]
    fn test_oversized_output_is_truncated() {
        let mut ctx = context().with_max_output_bytes(16);
        ctx.record("big", StepResult::succeeded(json!("x".repeat(64)), 1)).unwrap();
        let output = ctx.result("big").unwrap().output.clone().unwrap();
        assert_eq!(output["_truncated"], json!(true));
        assert_eq!(output["_original_size"], json!(66));
    }
}
