//! Workflow engine core: definition parsing, expression resolution and
//! sequential step execution.
//!
//! - `definition` -- YAML parsing, validation, filesystem discovery
//! - `lexer` / `path` / `template` -- placeholder expressions and the resolver
//! - `condition` -- the step condition grammar
//! - `context` -- per-run execution context
//! - `transform` -- sandboxed JEXL transform executor
//! - `heal` -- auto-heal classifier and per-run ledger
//! - `step_runner` -- per-kind step dispatch
//! - `orchestrator` -- the step loop, error policies and cancellation
//! - `runner` -- input binding, run lifecycle and report assembly

pub mod condition;
pub mod context;
pub mod definition;
pub mod heal;
pub mod lexer;
pub mod orchestrator;
pub mod path;
pub mod runner;
pub mod step_runner;
pub mod template;
pub mod transform;

pub use context::ExecutionContext;
pub use definition::{
    discover_workflows, find_workflow, load_workflow_file, parse_workflow_yaml,
    validate_definition, WorkflowError,
};
pub use runner::{RunnerError, WorkflowExecutor, WorkflowRunner};
