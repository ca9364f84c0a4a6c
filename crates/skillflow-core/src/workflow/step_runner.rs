//! Step runner: one dispatch function per step kind.
//!
//! `StepRunner` resolves a step's templates against the execution context,
//! runs it, and returns its output or a typed `StepError`. It knows nothing
//! about policies, healing or events; that is the orchestrator's job.

use std::time::Duration;

use serde_json::{Map, Value};
use skillflow_types::run::{StepError, StepErrorKind};
use skillflow_types::workflow::{ReadSpec, StepKind, StepSpec};

use crate::tool::ToolInvoker;

use super::context::ExecutionContext;
use super::template::{resolve_map, resolve_str, value_to_string, TemplateError};
use super::transform::TransformExecutor;

impl From<TemplateError> for StepError {
    fn from(err: TemplateError) -> Self {
        StepError::new(StepErrorKind::ResolutionError, err.to_string())
    }
}

/// Dispatches steps to the resolver, the transform sandbox or the invoker.
#[derive(Debug, Clone)]
pub struct StepRunner {
    invoker: ToolInvoker,
    transforms: TransformExecutor,
    default_tool_timeout: Duration,
}

impl StepRunner {
    pub fn new(
        invoker: ToolInvoker,
        transforms: TransformExecutor,
        default_tool_timeout: Duration,
    ) -> Self {
        Self {
            invoker,
            transforms,
            default_tool_timeout,
        }
    }

    pub fn invoker(&self) -> &ToolInvoker {
        &self.invoker
    }

    /// Timeout for a tool call made on behalf of `step`.
    pub fn tool_timeout(&self, step: &StepSpec) -> Duration {
        step.timeout_secs
            .map(Duration::from_secs)
            .unwrap_or(self.default_tool_timeout)
    }

    /// Execute `step` once. `healing_attempt` is 1 on the post-heal retry.
    pub async fn run(
        &self,
        step: &StepSpec,
        ctx: &ExecutionContext,
        healing_attempt: u8,
    ) -> Result<Value, StepError> {
        match &step.kind {
            StepKind::Tool { tool, args } => {
                self.run_tool(step, tool, args, ctx, healing_attempt).await
            }
            StepKind::Transform { reads, code } => self.run_transform(step, code, reads, ctx).await,
            StepKind::Description { text } => run_description(text, ctx),
        }
    }

    async fn run_tool(
        &self,
        step: &StepSpec,
        tool: &str,
        args: &Map<String, Value>,
        ctx: &ExecutionContext,
        healing_attempt: u8,
    ) -> Result<Value, StepError> {
        let resolved = resolve_map(args, ctx)?;
        let timeout = self.tool_timeout(step);
        tracing::debug!(
            run_id = %ctx.run_id,
            step = %step.name,
            tool,
            healing_attempt,
            timeout_ms = timeout.as_millis() as u64,
            "invoking tool"
        );
        self.invoker
            .invoke(tool, &resolved, timeout)
            .await
            .map_err(StepError::from)
    }

    async fn run_transform(
        &self,
        step: &StepSpec,
        code: &str,
        reads: &[ReadSpec],
        ctx: &ExecutionContext,
    ) -> Result<Value, StepError> {
        tracing::debug!(
            run_id = %ctx.run_id,
            step = %step.name,
            reads = reads.len(),
            "running transform"
        );
        self.transforms
            .run(code, reads, ctx)
            .await
            .map_err(StepError::from)
    }
}

/// A description step's output is its rendered text.
fn run_description(text: &str, ctx: &ExecutionContext) -> Result<Value, StepError> {
    let rendered = resolve_str(text, ctx)?;
    Ok(Value::String(value_to_string(&rendered)))
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tool::{FnTool, ToolRegistry};
    use serde_json::json;
    use skillflow_types::run::StepResult;
    use skillflow_types::tool::ToolError;
    use skillflow_types::workflow::WorkflowDefinition;
    use std::sync::Arc;
    use uuid::Uuid;

    fn step(name: &str, kind: StepKind) -> StepSpec {
        StepSpec {
            name: name.into(),
            condition: None,
            on_error: Default::default(),
            fallback: Default::default(),
            timeout_secs: None,
            kind,
        }
    }

    fn runner() -> StepRunner {
        let mut registry = ToolRegistry::new();
        registry.register(FnTool::new("echo", |args| async move { Ok(Value::Object(args)) }));
        registry.register(FnTool::new("nap", |_| async {
            tokio::time::sleep(Duration::from_secs(30)).await;
            Ok(json!(null))
        }));
        registry.register(FnTool::new("deny", |_| async { Err(ToolError::auth("expired")) }));
        StepRunner::new(
            ToolInvoker::new(Arc::new(registry)),
            TransformExecutor::new(Duration::from_secs(2)),
            Duration::from_secs(5),
        )
    }

    fn context() -> ExecutionContext {
        let def = WorkflowDefinition {
            name: "wf".into(),
            description: None,
            inputs: Vec::new(),
            constants: Default::default(),
            steps: vec![step("first", StepKind::Description { text: String::new() })],
            outputs: Vec::new(),
        };
        let mut inputs = Map::new();
        inputs.insert("who".into(), json!("ops"));
        let mut ctx = ExecutionContext::new(Uuid::now_v7(), &def, inputs);
        ctx.record("first", StepResult::succeeded(json!({ "id": 42 }), 1))
            .unwrap();
        ctx
    }

    #[tokio::test]
    async fn test_tool_args_are_resolved_with_types() {
        let mut args = Map::new();
        args.insert("id".into(), json!("{{ steps.first.output.id }}"));
        args.insert("note".into(), json!("for {{ inputs.who }}"));
        let s = step("second", StepKind::Tool { tool: "echo".into(), args });
        let out = runner().run(&s, &context(), 0).await.unwrap();
        assert_eq!(out, json!({ "id": 42, "note": "for ops" }));
    }

    #[tokio::test]
    async fn test_unresolved_argument_is_resolution_error() {
        let mut args = Map::new();
        args.insert("id".into(), json!("{{ steps.first.output.missing }}"));
        let s = step("second", StepKind::Tool { tool: "echo".into(), args });
        let err = runner().run(&s, &context(), 0).await.unwrap_err();
        assert_eq!(err.kind, StepErrorKind::ResolutionError);
        assert!(err.detail.contains("steps.first.output.missing"));
    }

    #[tokio::test]
    async fn test_tool_error_kind_is_preserved() {
        let s = step("second", StepKind::Tool { tool: "deny".into(), args: Map::new() });
        let err = runner().run(&s, &context(), 0).await.unwrap_err();
        assert_eq!(err.kind, StepErrorKind::Auth);
    }

    #[tokio::test]
    async fn test_step_timeout_override() {
        let mut s = step("second", StepKind::Tool { tool: "nap".into(), args: Map::new() });
        s.timeout_secs = Some(1);
        let err = runner().run(&s, &context(), 0).await.unwrap_err();
        assert_eq!(err.kind, StepErrorKind::Network);
    }

    #[tokio::test]
    async fn test_description_renders_text() {
        let s = step(
            "advise",
            StepKind::Description {
                text: "Issue {{ steps.first.output.id }} needs {{ inputs.who }}".into(),
            },
        );
        let out = runner().run(&s, &context(), 0).await.unwrap();
        assert_eq!(out, json!("Issue 42 needs ops"));

        let single = step("n", StepKind::Description { text: "{{ steps.first.output.id }}".into() });
        assert_eq!(runner().run(&single, &context(), 0).await.unwrap(), json!("42"));
    }

    #[tokio::test]
    async fn test_transform_dispatch() {
        let s = step(
            "shape",
            StepKind::Transform {
                reads: vec![ReadSpec::Name("first".into())],
                code: "first.id + 1".into(),
            },
        );
        assert_eq!(runner().run(&s, &context(), 0).await.unwrap(), json!(43));
    }
}
