//! Engine configuration types.
//!
//! `EngineConfig` represents the top-level `config.toml` that controls
//! timeouts, size limits, tool adapters and auto-heal rules.

use std::collections::BTreeMap;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::heal::AutoHealRule;

/// Top-level configuration for the engine.
///
/// Loaded from `~/.skillflow/config.toml`. All fields have sensible defaults.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Timeout applied to every tool call unless a step overrides it.
    #[serde(default = "default_tool_timeout_secs")]
    pub default_tool_timeout_secs: u64,

    /// Time bound for a single transform evaluation.
    #[serde(default = "default_transform_timeout_ms")]
    pub transform_timeout_ms: u64,

    /// Grace period an in-flight step gets after its run is cancelled.
    #[serde(default = "default_cancel_grace_secs")]
    pub cancel_grace_secs: u64,

    /// Serialized size above which a step output is replaced by a marker.
    #[serde(default = "default_max_step_output_bytes")]
    pub max_step_output_bytes: usize,

    /// Capacity of the event bus broadcast channel.
    #[serde(default = "default_event_channel_capacity")]
    pub event_channel_capacity: usize,

    /// Directory scanned for workflow files (default `{data_dir}/skills`).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub skills_dir: Option<PathBuf>,

    /// Append every event as a JSON line to this file.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub event_log: Option<PathBuf>,

    /// Tool adapters to register.
    #[serde(default)]
    pub tools: Vec<ToolAdapterConfig>,

    /// Ordered auto-heal rules (first match wins).
    #[serde(default)]
    pub auto_heal: Vec<AutoHealRule>,
}

fn default_tool_timeout_secs() -> u64 {
    60
}

fn default_transform_timeout_ms() -> u64 {
    2_000
}

fn default_cancel_grace_secs() -> u64 {
    5
}

fn default_max_step_output_bytes() -> usize {
    1_048_576
}

fn default_event_channel_capacity() -> usize {
    1024
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            default_tool_timeout_secs: default_tool_timeout_secs(),
            transform_timeout_ms: default_transform_timeout_ms(),
            cancel_grace_secs: default_cancel_grace_secs(),
            max_step_output_bytes: default_max_step_output_bytes(),
            event_channel_capacity: default_event_channel_capacity(),
            skills_dir: None,
            event_log: None,
            tools: Vec::new(),
            auto_heal: Vec::new(),
        }
    }
}

/// A configured tool adapter.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ToolAdapterConfig {
    /// Spawn a process; arguments are written to stdin as JSON.
    Command {
        name: String,
        program: String,
        #[serde(default)]
        args: Vec<String>,
        #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
        env: BTreeMap<String, String>,
    },
    /// Send arguments as a JSON body to an HTTP endpoint.
    Http {
        name: String,
        url: String,
        #[serde(default = "default_http_method")]
        method: String,
        #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
        headers: BTreeMap<String, String>,
    },
}

fn default_http_method() -> String {
    "POST".to_string()
}

impl ToolAdapterConfig {
    pub fn name(&self) -> &str {
        match self {
            ToolAdapterConfig::Command { name, .. } => name,
            ToolAdapterConfig::Http { name, .. } => name,
        }
    }
}
