//! Workflow runner: the public entry point of the engine.
//!
//! `WorkflowRunner::run` validates a definition and its inputs, builds a
//! fresh [`ExecutionContext`], drives the [`Orchestrator`] and renders the
//! output templates into a frozen [`RunReport`].
//!
//! # Execution flow
//!
//! 1. Re-validate the definition and check every tool step's tool is registered.
//! 2. Apply input defaults; reject missing, mistyped or unknown inputs.
//! 3. Register a cancellation token for the run id.
//! 4. Emit `run_started`, drive the steps, render outputs.
//! 5. Emit `run_completed` and release the token.

use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::Utc;
use dashmap::DashMap;
use serde_json::{json, Map, Value};
use skillflow_types::config::EngineConfig;
use skillflow_types::event::{EventKind, EventRecord};
use skillflow_types::run::RunReport;
use skillflow_types::workflow::{StepKind, WorkflowDefinition};
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::event::EventBus;
use crate::tool::{ToolInvoker, ToolRegistry};

use super::context::ExecutionContext;
use super::definition::{validate_definition, WorkflowError};
use super::heal::AutoHealClassifier;
use super::orchestrator::Orchestrator;
use super::step_runner::StepRunner;
use super::template::resolve;
use super::transform::TransformExecutor;

// ---------------------------------------------------------------------------
// WorkflowExecutor trait
// ---------------------------------------------------------------------------

/// Trait for workflow execution engines.
pub trait WorkflowExecutor: Send + Sync {
    /// Run a workflow definition with the given inputs.
    fn execute(
        &self,
        definition: &WorkflowDefinition,
        inputs: Map<String, Value>,
    ) -> impl std::future::Future<Output = Result<RunReport, RunnerError>> + Send;

    /// Cancel an in-flight run.
    fn cancel(&self, run_id: Uuid) -> impl std::future::Future<Output = Result<(), RunnerError>> + Send;
}

// ---------------------------------------------------------------------------
// RunnerError
// ---------------------------------------------------------------------------

/// Errors that prevent a run from starting or a cancel from landing.
///
/// Step failures never surface here; they are values inside the report.
#[derive(Debug, thiserror::Error)]
pub enum RunnerError {
    #[error(transparent)]
    Workflow(#[from] WorkflowError),

    #[error("run not found: {0}")]
    RunNotFound(Uuid),

    #[error("run already active: {0}")]
    RunAlreadyActive(Uuid),
}

impl RunnerError {
    pub fn is_validation(&self) -> bool {
        matches!(
            self,
            RunnerError::Workflow(WorkflowError::ValidationError(_) | WorkflowError::ParseError(_))
        )
    }
}

fn validation(message: impl Into<String>) -> RunnerError {
    RunnerError::Workflow(WorkflowError::ValidationError(message.into()))
}

// ---------------------------------------------------------------------------
// WorkflowRunner
// ---------------------------------------------------------------------------

/// Runs workflow definitions. Holds everything a run needs explicitly;
/// multiple runs may execute concurrently on one runner.
pub struct WorkflowRunner {
    tools: Arc<ToolRegistry>,
    bus: EventBus,
    orchestrator: Orchestrator,
    max_step_output_bytes: usize,
    /// Cancellation tokens keyed by run_id.
    cancellation_tokens: DashMap<Uuid, CancellationToken>,
}

impl WorkflowRunner {
    pub fn new(tools: Arc<ToolRegistry>, bus: EventBus, config: &EngineConfig) -> Self {
        let step_runner = StepRunner::new(
            ToolInvoker::new(tools.clone()),
            TransformExecutor::new(Duration::from_millis(config.transform_timeout_ms)),
            Duration::from_secs(config.default_tool_timeout_secs),
        );
        let healer = Arc::new(AutoHealClassifier::new(config.auto_heal.clone()));
        let orchestrator = Orchestrator::new(
            step_runner,
            healer,
            bus.clone(),
            Duration::from_secs(config.cancel_grace_secs),
        );
        Self {
            tools,
            bus,
            orchestrator,
            max_step_output_bytes: config.max_step_output_bytes,
            cancellation_tokens: DashMap::new(),
        }
    }

    pub fn tools(&self) -> &ToolRegistry {
        &self.tools
    }

    pub fn bus(&self) -> &EventBus {
        &self.bus
    }

    /// Ids of runs currently in flight.
    pub fn active_runs(&self) -> Vec<Uuid> {
        self.cancellation_tokens.iter().map(|e| *e.key()).collect()
    }

    /// Run `definition` under a freshly generated run id.
    pub async fn run(
        &self,
        definition: &WorkflowDefinition,
        inputs: Map<String, Value>,
    ) -> Result<RunReport, RunnerError> {
        self.run_with_id(Uuid::now_v7(), definition, inputs).await
    }

    /// Run `definition` under a caller-chosen run id, so the caller can
    /// cancel it before the report comes back.
    pub async fn run_with_id(
        &self,
        run_id: Uuid,
        definition: &WorkflowDefinition,
        inputs: Map<String, Value>,
    ) -> Result<RunReport, RunnerError> {
        validate_definition(definition)?;
        self.check_tools(definition)?;
        let inputs = bind_inputs(definition, inputs)?;

        let token = CancellationToken::new();
        match self.cancellation_tokens.entry(run_id) {
            dashmap::mapref::entry::Entry::Occupied(_) => {
                return Err(RunnerError::RunAlreadyActive(run_id));
            }
            dashmap::mapref::entry::Entry::Vacant(slot) => {
                slot.insert(token.clone());
            }
        }
        let _guard = TokenGuard {
            tokens: &self.cancellation_tokens,
            run_id,
        };

        let mut report = RunReport::new(run_id, definition.name.clone());
        let mut ctx = ExecutionContext::new(run_id, definition, inputs)
            .with_max_output_bytes(self.max_step_output_bytes);

        self.bus.emit(EventRecord::run(
            run_id,
            EventKind::RunStarted,
            json!({ "workflow": definition.name, "steps": definition.steps.len() }),
        ));
        tracing::info!(
            run_id = %run_id,
            workflow = definition.name.as_str(),
            "starting workflow run"
        );

        let started = Instant::now();
        let outcome = self.orchestrator.drive(definition, &mut ctx, &token).await;

        for output in &definition.outputs {
            match resolve(&output.template, &ctx) {
                Ok(value) => {
                    report.outputs.insert(output.name.clone(), value);
                }
                Err(e) => {
                    tracing::warn!(
                        run_id = %run_id,
                        output = %output.name,
                        error = %e,
                        "output could not be rendered"
                    );
                    report.output_errors.insert(output.name.clone(), e.to_string());
                }
            }
        }

        let (steps, order) = ctx.into_results();
        report.status = outcome.status;
        report.error = outcome.error;
        report.guidance = outcome.guidance;
        report.steps = steps;
        report.step_order = order;
        report.finished_at = Some(Utc::now());
        report.duration_ms = started.elapsed().as_millis() as u64;

        self.bus.emit(EventRecord::run(
            run_id,
            EventKind::RunCompleted,
            json!({
                "status": report.status,
                "duration_ms": report.duration_ms,
                "error": report.error,
            }),
        ));
        tracing::info!(
            run_id = %run_id,
            workflow = definition.name.as_str(),
            status = %report.status,
            duration_ms = report.duration_ms,
            "workflow run finished"
        );

        Ok(report)
    }

    /// Signal cancellation to an in-flight run.
    ///
    /// The run itself records the `cancelled` outcome; the token is released
    /// when the run returns.
    pub fn cancel(&self, run_id: Uuid) -> Result<(), RunnerError> {
        let entry = self
            .cancellation_tokens
            .get(&run_id)
            .ok_or(RunnerError::RunNotFound(run_id))?;
        entry.value().cancel();
        tracing::info!(run_id = %run_id, "workflow run cancelled");
        Ok(())
    }

    fn check_tools(&self, definition: &WorkflowDefinition) -> Result<(), RunnerError> {
        for step in &definition.steps {
            if let StepKind::Tool { tool, .. } = &step.kind {
                if !self.tools.contains(tool) {
                    return Err(validation(format!(
                        "step '{}' uses unregistered tool '{tool}'",
                        step.name
                    )));
                }
            }
        }
        Ok(())
    }
}

impl WorkflowExecutor for WorkflowRunner {
    async fn execute(
        &self,
        definition: &WorkflowDefinition,
        inputs: Map<String, Value>,
    ) -> Result<RunReport, RunnerError> {
        self.run(definition, inputs).await
    }

    async fn cancel(&self, run_id: Uuid) -> Result<(), RunnerError> {
        WorkflowRunner::cancel(self, run_id)
    }
}

impl std::fmt::Debug for WorkflowRunner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WorkflowRunner")
            .field("tools", &self.tools.len())
            .field("active_runs", &self.cancellation_tokens.len())
            .finish()
    }
}

/// Releases a run's cancellation token however the run future ends.
struct TokenGuard<'a> {
    tokens: &'a DashMap<Uuid, CancellationToken>,
    run_id: Uuid,
}

impl Drop for TokenGuard<'_> {
    fn drop(&mut self) {
        self.tokens.remove(&self.run_id);
    }
}

// ---------------------------------------------------------------------------
// Input binding
// ---------------------------------------------------------------------------

/// Check caller inputs against the declarations and apply defaults.
///
/// An explicit `null` for an optional input counts as omitted.
pub fn bind_inputs(
    definition: &WorkflowDefinition,
    mut provided: Map<String, Value>,
) -> Result<Map<String, Value>, RunnerError> {
    let mut unknown: Vec<&String> = provided
        .keys()
        .filter(|k| definition.input(k).is_none())
        .collect();
    if !unknown.is_empty() {
        unknown.sort();
        let names: Vec<&str> = unknown.iter().map(|s| s.as_str()).collect();
        return Err(validation(format!("unknown input(s): {}", names.join(", "))));
    }

    let mut bound = Map::new();
    for input in &definition.inputs {
        let value = match provided.remove(&input.name) {
            Some(Value::Null) if !input.required => None,
            other => other,
        };
        let value = match (value, &input.default) {
            (Some(v), _) => v,
            (None, Some(default)) => default.clone(),
            (None, None) if input.required => {
                return Err(validation(format!("missing required input '{}'", input.name)));
            }
            (None, None) => continue,
        };
        if !input.input_type.accepts(&value) {
            return Err(validation(format!(
                "input '{}' expects {}, got {}",
                input.name,
                input.input_type,
                json_type(&value)
            )));
        }
        bound.insert(input.name.clone(), value);
    }
    Ok(bound)
}

fn json_type(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(n) if n.is_f64() => "number",
        Value::Number(_) => "integer",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
