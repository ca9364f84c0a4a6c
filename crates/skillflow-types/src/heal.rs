//! Auto-heal rule definitions.
//!
//! Rules are data: they are loaded from `config.toml` (or built in code) and
//! interpreted by the classifier in `skillflow-core`.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::tool::ErrorKind;

/// A known failure signature paired with a remediation action.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AutoHealRule {
    /// Rule name, used in events and logs.
    pub name: String,
    /// Error kinds this rule applies to. Empty matches any kind.
    #[serde(default)]
    pub kinds: Vec<ErrorKind>,
    /// Case-insensitive substrings searched in the error detail. Empty matches any text.
    #[serde(default)]
    pub patterns: Vec<String>,
    /// Tool call that repairs the condition.
    pub remediation: Remediation,
    /// How many times this rule may remediate a single step invocation.
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
}

fn default_max_attempts() -> u32 {
    1
}

/// A remediation action: a tool invoked with fixed arguments.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Remediation {
    pub tool: String,
    #[serde(default)]
    pub args: serde_json::Map<String, Value>,
}

impl AutoHealRule {
    /// Create a rule with the default attempt bound.
    pub fn new(name: impl Into<String>, remediation_tool: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            kinds: Vec::new(),
            patterns: Vec::new(),
            remediation: Remediation {
                tool: remediation_tool.into(),
                args: serde_json::Map::new(),
            },
            max_attempts: default_max_attempts(),
        }
    }

    pub fn with_kinds(mut self, kinds: impl IntoIterator<Item = ErrorKind>) -> Self {
        self.kinds = kinds.into_iter().collect();
        self
    }

    pub fn with_patterns<S: Into<String>>(mut self, patterns: impl IntoIterator<Item = S>) -> Self {
        self.patterns = patterns.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_args(mut self, args: serde_json::Map<String, Value>) -> Self {
        self.remediation.args = args;
        self
    }

    pub fn with_max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = max_attempts;
        self
    }

    /// Whether this rule's signature matches a failure.
    pub fn matches(&self, kind: ErrorKind, detail: &str) -> bool {
        if !self.kinds.is_empty() && !self.kinds.contains(&kind) {
            return false;
        }
        if self.patterns.is_empty() {
            return true;
        }
        let detail = detail.to_lowercase();
        self.patterns
            .iter()
            .any(|p| detail.contains(&p.to_lowercase()))
    }
}
