//! Concrete tool adapters and registry construction from config.

pub mod command;
pub mod http;

use skillflow_core::tool::{BoxTool, ToolRegistry};
use skillflow_types::config::ToolAdapterConfig;

pub use command::CommandTool;
pub use http::HttpTool;

/// Errors raised while building tool adapters.
#[derive(Debug, thiserror::Error)]
pub enum AdapterError {
    #[error("invalid HTTP method: {0}")]
    InvalidMethod(String),

    #[error("tool registered twice: {0}")]
    DuplicateTool(String),

    #[error("HTTP client error: {0}")]
    Client(#[from] reqwest::Error),
}

/// Build one adapter from its config entry.
pub fn build_tool(config: &ToolAdapterConfig) -> Result<BoxTool, AdapterError> {
    let tool = match config {
        ToolAdapterConfig::Command {
            name,
            program,
            args,
            env,
        } => BoxTool::new(
            CommandTool::new(name.clone(), program.clone())
                .with_args(args.clone())
                .with_env(env.clone()),
        ),
        ToolAdapterConfig::Http {
            name,
            url,
            method,
            headers,
        } => BoxTool::new(HttpTool::new(name.clone(), url.clone(), method, headers.clone())?),
    };
    Ok(tool)
}

/// Register every configured adapter into `registry`.
///
/// Names already present (including ones registered earlier in the list)
/// are rejected.
pub fn register_tools(
    registry: &mut ToolRegistry,
    configs: &[ToolAdapterConfig],
) -> Result<(), AdapterError> {
    for config in configs {
        if registry.contains(config.name()) {
            return Err(AdapterError::DuplicateTool(config.name().to_string()));
        }
        registry.register_boxed(config.name(), build_tool(config)?);
        tracing::debug!(tool = config.name(), "registered tool adapter");
    }
    Ok(())
}

/// A fresh registry holding every configured adapter.
pub fn build_registry(configs: &[ToolAdapterConfig]) -> Result<ToolRegistry, AdapterError> {
    let mut registry = ToolRegistry::new();
    register_tools(&mut registry, configs)?;
    Ok(registry)
}
