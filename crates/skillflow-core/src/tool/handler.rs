//! Tool trait definition.
//!
//! A tool is an external collaborator the engine calls by a stable name with
//! a resolved argument mapping. How the tool reaches its backend is not the
//! engine's concern. Concrete adapters live in skillflow-infra.

use std::future::Future;
use std::time::Duration;

use serde_json::{Map, Value};
use skillflow_types::tool::ToolError;

/// Trait for tool backends.
///
/// Uses native async fn in traits (RPITIT). The `timeout` is advisory for
/// the implementation: the invoker enforces it regardless.
pub trait Tool: Send + Sync {
    /// Stable name the workflow refers to (e.g. `issues.get`).
    fn name(&self) -> &str;

    /// One-line description shown by `skillflow tools`.
    fn description(&self) -> &str {
        ""
    }

    /// Call the tool with resolved arguments.
    fn call(
        &self,
        args: &Map<String, Value>,
        timeout: Duration,
    ) -> impl Future<Output = Result<Value, ToolError>> + Send;
}

/// A tool backed by an async closure.
///
/// Handy for embedding the engine and for tests:
///
/// ```ignore
/// let echo = FnTool::new("echo", |args| async move { Ok(Value::Object(args)) });
/// ```
pub struct FnTool<F> {
    name: String,
    description: String,
    handler: F,
}

impl<F, Fut> FnTool<F>
where
    F: Fn(Map<String, Value>) -> Fut + Send + Sync,
    Fut: Future<Output = Result<Value, ToolError>> + Send,
{
    pub fn new(name: impl Into<String>, handler: F) -> Self {
        Self {
            name: name.into(),
            description: String::new(),
            handler,
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }
}

impl<F, Fut> Tool for FnTool<F>
where
    F: Fn(Map<String, Value>) -> Fut + Send + Sync,
    Fut: Future<Output = Result<Value, ToolError>> + Send,
{
    fn name(&self) -> &str {
        &self.name
    }

    fn description(&self) -> &str {
        &self.description
    }

    fn call(
        &self,
        args: &Map<String, Value>,
        _timeout: Duration,
    ) -> impl Future<Output = Result<Value, ToolError>> + Send {
        (self.handler)(args.clone())
    }
}
