//! Application state wiring the engine together.
//!
//! AppState holds the runner, its configuration and the resolved directories
//! used by both CLI commands and REST API handlers.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use skillflow_core::event::{EventBus, TracingSink};
use skillflow_core::tool::ToolRegistry;
use skillflow_core::workflow::WorkflowRunner;
use skillflow_infra::config::{load_engine_config, resolve_skills_dir};
use skillflow_infra::event::JsonlFileSink;
use skillflow_infra::filesystem::resolve_data_dir;
use skillflow_infra::tool::build_registry;
use skillflow_types::config::EngineConfig;

/// Shared application state.
#[derive(Clone)]
pub struct AppState {
    pub runner: Arc<WorkflowRunner>,
    pub config: Arc<EngineConfig>,
    pub data_dir: PathBuf,
    pub skills_dir: PathBuf,
}

impl AppState {
    /// Initialize the application state: load config, build tools and sinks.
    pub async fn init() -> anyhow::Result<Self> {
        let data_dir = resolve_data_dir();
        tokio::fs::create_dir_all(&data_dir)
            .await
            .with_context(|| format!("Failed to create data directory {}", data_dir.display()))?;

        let config = load_engine_config(&data_dir).await;
        let registry = build_registry(&config.tools).context("Failed to build tool adapters")?;
        let bus = EventBus::new(config.event_channel_capacity);
        bus.register(TracingSink);
        if let Some(path) = &config.event_log {
            let sink = JsonlFileSink::open(path)
                .with_context(|| format!("Failed to open event log {}", path.display()))?;
            bus.register(sink);
        }

        Ok(Self::from_parts(config, registry, bus, data_dir))
    }

    /// Assemble state from already-built parts.
    pub fn from_parts(
        config: EngineConfig,
        registry: ToolRegistry,
        bus: EventBus,
        data_dir: PathBuf,
    ) -> Self {
        let skills_dir = resolve_skills_dir(&config, &data_dir);
        let runner = WorkflowRunner::new(Arc::new(registry), bus, &config);
        tracing::debug!(
            data_dir = %data_dir.display(),
            skills_dir = %skills_dir.display(),
            tools = runner.tools().len(),
            "application state ready"
        );
        Self {
            runner: Arc::new(runner),
            config: Arc::new(config),
            data_dir,
            skills_dir,
        }
    }
}
