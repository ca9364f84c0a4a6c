//! Step orchestrator: the sequential control loop of a run.
//!
//! Steps run strictly in declaration order. For each step the orchestrator
//! checks cancellation, evaluates the condition, dispatches through the
//! [`StepRunner`], applies the error policy (including at most one heal and
//! retry), records the result and emits lifecycle events.
//!
//! Per step: `Pending -> ConditionChecked -> {Skipped | Dispatching} ->
//! Executing -> {Succeeded | Failed}`, with `Failed -> Healing -> Executing`
//! allowed once.

use std::sync::Arc;
use std::time::{Duration, Instant};

use serde_json::{json, Map, Value};
use skillflow_types::event::{EventKind, EventRecord};
use skillflow_types::run::{Guidance, RunStatus, StepError, StepErrorKind, StepResult};
use skillflow_types::workflow::{
    ErrorPolicy, FallbackPolicy, StepKind, StepSpec, WorkflowDefinition,
};
use tokio_util::sync::CancellationToken;

use crate::event::EventBus;

use super::condition::Condition;
use super::context::ExecutionContext;
use super::heal::{AutoHealClassifier, HealLedger, HealOutcome};
use super::step_runner::StepRunner;

// ---------------------------------------------------------------------------
// Step phases
// ---------------------------------------------------------------------------

/// Lifecycle phase of a single step, logged at trace level.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StepPhase {
    Pending,
    ConditionChecked,
    Skipped,
    Dispatching,
    Executing,
    Healing,
    Succeeded,
    Failed,
}

impl StepPhase {
    pub fn as_str(&self) -> &'static str {
        match self {
            StepPhase::Pending => "pending",
            StepPhase::ConditionChecked => "condition_checked",
            StepPhase::Skipped => "skipped",
            StepPhase::Dispatching => "dispatching",
            StepPhase::Executing => "executing",
            StepPhase::Healing => "healing",
            StepPhase::Succeeded => "succeeded",
            StepPhase::Failed => "failed",
        }
    }
}

fn enter(ctx: &ExecutionContext, step: &str, phase: StepPhase) {
    tracing::trace!(run_id = %ctx.run_id, step, phase = phase.as_str(), "step phase");
}

// ---------------------------------------------------------------------------
// Outcome
// ---------------------------------------------------------------------------

/// How a run ended, as decided by the orchestrator.
#[derive(Debug, Clone, PartialEq)]
pub struct OrchestratorOutcome {
    pub status: RunStatus,
    /// Cause of a `failed` run: the failing step's error or `cancelled`.
    pub error: Option<StepError>,
    pub guidance: Vec<Guidance>,
}

// ---------------------------------------------------------------------------
// Orchestrator
// ---------------------------------------------------------------------------

/// Drives one run's steps to completion.
#[derive(Debug, Clone)]
pub struct Orchestrator {
    runner: StepRunner,
    healer: Arc<AutoHealClassifier>,
    bus: EventBus,
    cancel_grace: Duration,
}

impl Orchestrator {
    pub fn new(
        runner: StepRunner,
        healer: Arc<AutoHealClassifier>,
        bus: EventBus,
        cancel_grace: Duration,
    ) -> Self {
        Self {
            runner,
            healer,
            bus,
            cancel_grace,
        }
    }

    fn emit(&self, ctx: &ExecutionContext, step: &str, kind: EventKind, payload: Value) {
        self.bus.emit(EventRecord::step(ctx.run_id, step, kind, payload));
    }

    /// Run every step of `def` against `ctx`.
    pub async fn drive(
        &self,
        def: &WorkflowDefinition,
        ctx: &mut ExecutionContext,
        token: &CancellationToken,
    ) -> OrchestratorOutcome {
        let mut ledger = HealLedger::new();
        let mut guidance = Vec::new();
        let mut continued_failure = false;

        for step in &def.steps {
            enter(ctx, &step.name, StepPhase::Pending);
            if token.is_cancelled() {
                return cancelled(guidance);
            }

            if let Some(source) = &step.condition {
                // Validated at load; a parse failure here means an unvalidated definition.
                let should_run = match Condition::parse(source) {
                    Ok(condition) => condition.evaluate(ctx),
                    Err(e) => {
                        tracing::error!(step = %step.name, error = %e, "condition failed to parse");
                        false
                    }
                };
                enter(ctx, &step.name, StepPhase::ConditionChecked);
                if !should_run {
                    enter(ctx, &step.name, StepPhase::Skipped);
                    record(ctx, &step.name, StepResult::skipped());
                    self.emit(
                        ctx,
                        &step.name,
                        EventKind::StepSkipped,
                        json!({ "condition": source }),
                    );
                    continue;
                }
            }

            enter(ctx, &step.name, StepPhase::Dispatching);
            self.emit(
                ctx,
                &step.name,
                EventKind::StepStarted,
                json!({ "kind": step.kind.label(), "attempt": 0 }),
            );

            let started = Instant::now();
            let error = match self.attempt(step, ctx, 0, token).await {
                Ok(output) => {
                    self.succeed(ctx, step, output, started, false, &mut guidance);
                    continue;
                }
                Err(error) => error,
            };

            let mut extra = Map::new();
            let mut healed = 0;
            if step.on_error == ErrorPolicy::RetryWithHeal
                && error.kind != StepErrorKind::Cancelled
                && !token.is_cancelled()
            {
                enter(ctx, &step.name, StepPhase::Healing);
                let timeout = self.runner.tool_timeout(step);
                let outcome = self
                    .healer
                    .heal(&step.name, &error, &mut ledger, self.runner.invoker(), timeout)
                    .await;

                match outcome {
                    HealOutcome::Remediated { rule, tool } => {
                        self.emit(
                            ctx,
                            &step.name,
                            EventKind::StepFailed,
                            json!({ "error": error, "will_heal": true, "attempt": 0 }),
                        );
                        self.emit(
                            ctx,
                            &step.name,
                            EventKind::StepHealed,
                            json!({ "rule": rule, "tool": tool }),
                        );
                        healed = 1;
                        self.emit(
                            ctx,
                            &step.name,
                            EventKind::StepStarted,
                            json!({ "kind": step.kind.label(), "attempt": 1 }),
                        );
                        match self.attempt(step, ctx, 1, token).await {
                            Ok(output) => {
                                self.succeed(ctx, step, output, started, true, &mut guidance);
                                continue;
                            }
                            Err(retry_error) => {
                                tracing::warn!(
                                    run_id = %ctx.run_id,
                                    step = %step.name,
                                    error = %retry_error,
                                    "retry after remediation failed"
                                );
                                extra.insert("rule".into(), json!(rule));
                                extra.insert("retry_error".into(), json!(retry_error));
                            }
                        }
                    }
                    HealOutcome::RemediationFailed { rule, error: remediation_error, .. } => {
                        extra.insert("rule".into(), json!(rule));
                        extra.insert("remediation_error".into(), json!(remediation_error));
                    }
                    HealOutcome::NoMatch | HealOutcome::AlreadyHealed => {}
                }
            }

            // The original error is what the caller sees.
            enter(ctx, &step.name, StepPhase::Failed);
            let duration_ms = elapsed_ms(started);
            record(
                ctx,
                &step.name,
                StepResult::failed(error.clone(), duration_ms, healed),
            );
            let mut payload = Map::new();
            payload.insert("error".into(), json!(error));
            payload.insert("duration_ms".into(), json!(duration_ms));
            payload.insert("will_heal".into(), json!(false));
            payload.insert("healed".into(), json!(healed));
            payload.extend(extra);
            self.emit(ctx, &step.name, EventKind::StepFailed, Value::Object(payload));

            if error.kind == StepErrorKind::Cancelled || token.is_cancelled() {
                return cancelled(guidance);
            }

            match step.terminal_policy() {
                FallbackPolicy::Fail => {
                    tracing::info!(
                        run_id = %ctx.run_id,
                        step = %step.name,
                        error = %error,
                        "step failed, aborting run"
                    );
                    return OrchestratorOutcome {
                        status: RunStatus::Failed,
                        error: Some(error),
                        guidance,
                    };
                }
                FallbackPolicy::Continue => {
                    tracing::info!(
                        run_id = %ctx.run_id,
                        step = %step.name,
                        error = %error,
                        "step failed, continuing"
                    );
                    continued_failure = true;
                }
            }
        }

        OrchestratorOutcome {
            status: if continued_failure {
                RunStatus::Partial
            } else {
                RunStatus::Succeeded
            },
            error: None,
            guidance,
        }
    }

    fn succeed(
        &self,
        ctx: &mut ExecutionContext,
        step: &StepSpec,
        output: Value,
        started: Instant,
        healed: bool,
        guidance: &mut Vec<Guidance>,
    ) {
        enter(ctx, &step.name, StepPhase::Succeeded);
        if let (StepKind::Description { .. }, Value::String(text)) = (&step.kind, &output) {
            guidance.push(Guidance {
                step: step.name.clone(),
                text: text.clone(),
            });
        }
        let duration_ms = elapsed_ms(started);
        let result = if healed {
            StepResult::healed(output, duration_ms)
        } else {
            StepResult::succeeded(output, duration_ms)
        };
        record(ctx, &step.name, result);
        self.emit(
            ctx,
            &step.name,
            EventKind::StepSucceeded,
            json!({ "duration_ms": duration_ms, "healed": healed }),
        );
    }

    /// Execute one attempt, honouring cancellation.
    ///
    /// Once the run is cancelled an in-flight step gets `cancel_grace` to
    /// finish; after that it is abandoned with a `cancelled` error.
    async fn attempt(
        &self,
        step: &StepSpec,
        ctx: &ExecutionContext,
        healing_attempt: u8,
        token: &CancellationToken,
    ) -> Result<Value, StepError> {
        enter(ctx, &step.name, StepPhase::Executing);
        let work = self.runner.run(step, ctx, healing_attempt);
        tokio::pin!(work);

        tokio::select! {
            biased;
            result = &mut work => result,
            _ = token.cancelled() => {
                tracing::info!(
                    run_id = %ctx.run_id,
                    step = %step.name,
                    grace_ms = self.cancel_grace.as_millis() as u64,
                    "run cancelled, waiting for in-flight step"
                );
                match tokio::time::timeout(self.cancel_grace, &mut work).await {
                    Ok(result) => result,
                    Err(_) => Err(StepError::new(
                        StepErrorKind::Cancelled,
                        format!(
                            "run cancelled; step abandoned after {}ms grace period",
                            self.cancel_grace.as_millis()
                        ),
                    )),
                }
            }
        }
    }
}

fn record(ctx: &mut ExecutionContext, step: &str, result: StepResult) {
    if let Err(e) = ctx.record(step, result) {
        tracing::error!(run_id = %ctx.run_id, step, error = %e, "failed to record step result");
    }
}

fn elapsed_ms(started: Instant) -> u64 {
    started.elapsed().as_millis() as u64
}

fn cancelled(guidance: Vec<Guidance>) -> OrchestratorOutcome {
    OrchestratorOutcome {
        status: RunStatus::Failed,
        error: Some(StepError::new(StepErrorKind::Cancelled, "run cancelled")),
        guidance,
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
