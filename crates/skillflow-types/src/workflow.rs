//! Workflow definition types.
//!
//! A `WorkflowDefinition` is the immutable, declarative description of one
//! skill: its inputs, constants, an ordered list of steps, and output
//! templates. It is deserialized from YAML by `skillflow-core` and never
//! mutated during a run.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

// ---------------------------------------------------------------------------
// Workflow Definition
// ---------------------------------------------------------------------------

/// The canonical workflow definition.
///
/// Unknown top-level keys in the source document are ignored.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkflowDefinition {
    /// Workflow name (alphanumeric, `-` and `_`).
    pub name: String,
    /// Optional longer description.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    /// Declared input parameters.
    #[serde(default)]
    pub inputs: Vec<InputSpec>,
    /// Named constants visible as `constants.<name>`.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub constants: BTreeMap<String, Value>,
    /// Steps, executed strictly in declaration order.
    pub steps: Vec<StepSpec>,
    /// Output templates rendered against the final context.
    #[serde(default)]
    pub outputs: Vec<OutputSpec>,
}

impl WorkflowDefinition {
    /// Look up a step by name.
    pub fn step(&self, name: &str) -> Option<&StepSpec> {
        self.steps.iter().find(|s| s.name == name)
    }

    /// Look up an input declaration by name.
    pub fn input(&self, name: &str) -> Option<&InputSpec> {
        self.inputs.iter().find(|i| i.name == name)
    }
}

// ---------------------------------------------------------------------------
// Inputs and outputs
// ---------------------------------------------------------------------------

/// A declared workflow input parameter.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InputSpec {
    pub name: String,
    #[serde(rename = "type", default)]
    pub input_type: InputType,
    #[serde(default)]
    pub required: bool,
    /// Value used when the caller omits the input.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

/// Accepted JSON shape of an input value.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InputType {
    String,
    Integer,
    Number,
    Boolean,
    Array,
    Object,
    #[default]
    Any,
}

impl InputType {
    /// Whether `value` is compatible with this type. `null` only matches `any`.
    pub fn accepts(&self, value: &Value) -> bool {
        match self {
            InputType::String => value.is_string(),
            InputType::Integer => value.is_i64() || value.is_u64(),
            InputType::Number => value.is_number(),
            InputType::Boolean => value.is_boolean(),
            InputType::Array => value.is_array(),
            InputType::Object => value.is_object(),
            InputType::Any => true,
        }
    }
}

impl std::fmt::Display for InputType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            InputType::String => "string",
            InputType::Integer => "integer",
            InputType::Number => "number",
            InputType::Boolean => "boolean",
            InputType::Array => "array",
            InputType::Object => "object",
            InputType::Any => "any",
        };
        f.write_str(s)
    }
}

/// A named output rendered through the expression resolver after the run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OutputSpec {
    pub name: String,
    /// Any JSON shape; every string leaf may carry placeholders.
    pub template: Value,
}

// ---------------------------------------------------------------------------
// Step Definition
// ---------------------------------------------------------------------------

/// A single step of a workflow.
///
/// The kind-specific payload is flattened into the step so the YAML reads:
/// ```yaml
/// - name: fetch
///   kind: tool
///   tool: issues.get
///   args: { id: "{{ inputs.id }}" }
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StepSpec {
    /// Unique step name within the workflow.
    pub name: String,
    /// Optional condition; the step is skipped when it evaluates falsy.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub condition: Option<String>,
    /// What to do when the step fails.
    #[serde(default)]
    pub on_error: ErrorPolicy,
    /// Behaviour after `retry-with-heal` could not recover the step.
    #[serde(default)]
    pub fallback: FallbackPolicy,
    /// Per-step timeout override in seconds.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout_secs: Option<u64>,
    #[serde(flatten)]
    pub kind: StepKind,
}

impl StepSpec {
    /// The policy actually applied once healing is out of the picture.
    pub fn terminal_policy(&self) -> FallbackPolicy {
        match self.on_error {
            ErrorPolicy::Fail => FallbackPolicy::Fail,
            ErrorPolicy::Continue => FallbackPolicy::Continue,
            ErrorPolicy::RetryWithHeal => self.fallback,
        }
    }
}

/// Kind-specific step payload, internally tagged by `kind`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum StepKind {
    /// Call an external tool with an argument template.
    Tool {
        tool: String,
        #[serde(default)]
        args: serde_json::Map<String, Value>,
    },
    /// Run a sandboxed data-transform snippet over declared reads.
    Transform {
        #[serde(default)]
        reads: Vec<ReadSpec>,
        code: String,
    },
    /// Free-text guidance surfaced to the calling agent.
    Description { text: String },
}

impl StepKind {
    /// Short label used in logs and events.
    pub fn label(&self) -> &'static str {
        match self {
            StepKind::Tool { .. } => "tool",
            StepKind::Transform { .. } => "transform",
            StepKind::Description { .. } => "description",
        }
    }
}

/// One entry of a transform step's read set.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ReadSpec {
    /// Bare name: an earlier step's output, else an input, else a constant.
    Name(String),
    /// Bind `name` to the value at a context path.
    Bound { name: String, from: String },
}

impl ReadSpec {
    /// The identifier the snippet sees.
    pub fn name(&self) -> &str {
        match self {
            ReadSpec::Name(name) => name,
            ReadSpec::Bound { name, .. } => name,
        }
    }
}

/// Per-step error policy.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ErrorPolicy {
    #[default]
    Fail,
    Continue,
    #[serde(alias = "retry_with_heal")]
    RetryWithHeal,
}

/// Policy applied after healing fails or is not attempted.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FallbackPolicy {
    #[default]
    Fail,
    Continue,
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
