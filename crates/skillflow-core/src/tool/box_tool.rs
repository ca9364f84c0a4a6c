//! BoxTool -- object-safe dynamic dispatch wrapper for `Tool`.
//!
//! 1. `ToolDyn` is an object-safe mirror of `Tool` with boxed futures
//! 2. Blanket-impl `ToolDyn` for all `T: Tool`
//! 3. `BoxTool` wraps `Box<dyn ToolDyn>` and delegates

use std::future::Future;
use std::pin::Pin;
use std::time::Duration;

use serde_json::{Map, Value};
use skillflow_types::tool::ToolError;

use super::handler::Tool;

/// Object-safe version of [`Tool`] with boxed futures.
pub trait ToolDyn: Send + Sync {
    fn name(&self) -> &str;

    fn description(&self) -> &str;

    fn call_boxed<'a>(
        &'a self,
        args: &'a Map<String, Value>,
        timeout: Duration,
    ) -> Pin<Box<dyn Future<Output = Result<Value, ToolError>> + Send + 'a>>;
}

impl<T: Tool> ToolDyn for T {
    fn name(&self) -> &str {
        Tool::name(self)
    }

    fn description(&self) -> &str {
        Tool::description(self)
    }

    fn call_boxed<'a>(
        &'a self,
        args: &'a Map<String, Value>,
        timeout: Duration,
    ) -> Pin<Box<dyn Future<Output = Result<Value, ToolError>> + Send + 'a>> {
        Box::pin(self.call(args, timeout))
    }
}

/// Type-erased tool for the registry.
pub struct BoxTool {
    inner: Box<dyn ToolDyn>,
}

impl BoxTool {
    pub fn new<T: Tool + 'static>(tool: T) -> Self {
        Self {
            inner: Box::new(tool),
        }
    }

    pub fn name(&self) -> &str {
        self.inner.name()
    }

    pub fn description(&self) -> &str {
        self.inner.description()
    }

    pub async fn call(
        &self,
        args: &Map<String, Value>,
        timeout: Duration,
    ) -> Result<Value, ToolError> {
        self.inner.call_boxed(args, timeout).await
    }
}

impl std::fmt::Debug for BoxTool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BoxTool").field("name", &self.name()).finish()
    }
}
