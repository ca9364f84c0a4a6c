//! Tool registry for runtime lookup by name.
//!
//! The registry is an explicit object owned by the runner; there is no
//! process-wide tool table.

use std::collections::HashMap;

use super::box_tool::BoxTool;
use super::handler::Tool;

/// Registry of available tools, indexed by name.
#[derive(Debug, Default)]
pub struct ToolRegistry {
    tools: HashMap<String, BoxTool>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a tool under its own name, replacing any previous entry.
    pub fn register<T: Tool + 'static>(&mut self, tool: T) {
        let name = tool.name().to_string();
        self.register_boxed(name, BoxTool::new(tool));
    }

    /// Register an already boxed tool under `name`.
    pub fn register_boxed(&mut self, name: impl Into<String>, tool: BoxTool) {
        let name = name.into();
        if self.tools.insert(name.clone(), tool).is_some() {
            tracing::debug!(tool = %name, "replaced existing tool registration");
        }
    }

    pub fn get(&self, name: &str) -> Option<&BoxTool> {
        self.tools.get(name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.tools.contains_key(name)
    }

    /// Registered names, sorted.
    pub fn names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.tools.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }

    /// `(name, description)` pairs, sorted by name.
    pub fn describe(&self) -> Vec<(&str, &str)> {
        self.names()
            .into_iter()
            .filter_map(|name| self.tools.get(name).map(|t| (name, t.description())))
            .collect()
    }

    pub fn len(&self) -> usize {
        self.tools.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }
}
