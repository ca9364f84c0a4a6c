//! Tool invoker: the single call path from the engine to a tool.
//!
//! Every call is bounded by a timeout whatever the tool does internally. A
//! timeout is reported as `network`; a panic inside the tool as `unknown`.
//! The invoker never retries.

use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::{Duration, Instant};

use futures_util::FutureExt;
use serde_json::{Map, Value};
use skillflow_types::tool::ToolError;

use super::classify::refine;
use super::registry::ToolRegistry;

/// Calls registered tools with a mandatory timeout.
#[derive(Debug, Clone)]
pub struct ToolInvoker {
    registry: Arc<ToolRegistry>,
}

impl ToolInvoker {
    pub fn new(registry: Arc<ToolRegistry>) -> Self {
        Self { registry }
    }

    pub fn registry(&self) -> &ToolRegistry {
        &self.registry
    }

    /// Call `name` with `args`, normalizing every outcome into
    /// `Ok(value)` or a typed `ToolError`.
    pub async fn invoke(
        &self,
        name: &str,
        args: &Map<String, Value>,
        timeout: Duration,
    ) -> Result<Value, ToolError> {
        let Some(tool) = self.registry.get(name) else {
            return Err(ToolError::not_found(format!("tool '{name}' is not registered")));
        };

        let started = Instant::now();
        let call = AssertUnwindSafe(tool.call(args, timeout)).catch_unwind();
        let result = match tokio::time::timeout(timeout, call).await {
            Ok(Ok(result)) => result.map_err(refine),
            Ok(Err(_panic)) => Err(ToolError::unknown(format!("tool '{name}' panicked"))),
            Err(_) => Err(ToolError::network(format!(
                "tool '{name}' timed out after {}ms",
                timeout.as_millis()
            ))),
        };

        let elapsed_ms = started.elapsed().as_millis() as u64;
        match &result {
            Ok(_) => tracing::debug!(tool = name, elapsed_ms, "tool call succeeded"),
            Err(e) => tracing::debug!(
                tool = name,
                elapsed_ms,
                kind = %e.kind,
                error = %e.detail,
                "tool call failed"
            ),
        }
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tool::FnTool;
    use serde_json::json;
    use skillflow_types::tool::ErrorKind;

    fn invoker() -> ToolInvoker {
        let mut registry = ToolRegistry::new();
        registry.register(FnTool::new("ok", |args| async move { Ok(json!({ "got": args })) }));
        registry.register(FnTool::new("slow", |_| async {
            tokio::time::sleep(Duration::from_secs(30)).await;
            Ok(json!("late"))
        }));
        registry.register(FnTool::new("denied", |_| async {
            Err(ToolError::unknown("HTTP 401: token expired"))
        }));
        registry.register(FnTool::new("typed", |_| async {
            Err(ToolError::invalid_argument("401 looks like auth but is not"))
        }));
        registry.register(FnTool::new("boom", |_| async {
            if true {
                panic!("adapter bug");
            }
            Ok(json!(null))
        }));
        ToolInvoker::new(Arc::new(registry))
    }

    #[tokio::test]
    async fn test_success() {
        let mut args = Map::new();
        args.insert("id".into(), json!(42));
        let out = invoker()
            .invoke("ok", &args, Duration::from_secs(1))
            .await
            .unwrap();
        assert_eq!(out, json!({ "got": { "id": 42 } }));
    }

    #[tokio::test]
    async fn test_unregistered_tool_is_not_found() {
        let err = invoker()
            .invoke("ghost", &Map::new(), Duration::from_secs(1))
            .await
            .unwrap_err();
        assert_eq!(err.kind, ErrorKind::NotFound);
    }

    #[tokio::test]
    async fn test_timeout_is_network() {
        let err = invoker()
            .invoke("slow", &Map::new(), Duration::from_millis(20))
            .await
            .unwrap_err();
        assert_eq!(err.kind, ErrorKind::Network);
        assert!(err.detail.contains("timed out"));
    }

    #[tokio::test]
    async fn test_unknown_errors_are_refined() {
        let err = invoker()
            .invoke("denied", &Map::new(), Duration::from_secs(1))
            .await
            .unwrap_err();
        assert_eq!(err.kind, ErrorKind::Auth);

        let err = invoker()
            .invoke("typed", &Map::new(), Duration::from_secs(1))
            .await
            .unwrap_err();
        assert_eq!(err.kind, ErrorKind::InvalidArgument);
    }

    #[tokio::test]
    async fn test_panic_is_unknown() {
        let err = invoker()
            .invoke("boom", &Map::new(), Duration::from_secs(1))
            .await
            .unwrap_err();
        assert_eq!(err.kind, ErrorKind::Unknown);
        assert!(err.detail.contains("panicked"));
    }
}
