//! Workflow definition parsing, validation, and filesystem discovery.
//!
//! Converts YAML documents into the canonical `WorkflowDefinition`, checks
//! structural constraints (name format, unique names, at least one step) and
//! data-flow constraints (every context reference points backwards), and
//! discovers workflow files on disk.

use std::collections::HashSet;
use std::path::{Path, PathBuf};

use serde_json::Value;
use skillflow_types::workflow::{ReadSpec, StepKind, StepSpec, WorkflowDefinition};
use thiserror::Error;

use super::condition::Condition;
use super::lexer::{tokenize, LexMode};
use super::path::{PathSegment, ValuePath};
use super::template::{collect_paths, Template};

/// Longest transform snippet accepted, in bytes.
pub const MAX_TRANSFORM_SOURCE: usize = 8 * 1024;

/// Fields of `steps.<name>` exposed to templates and conditions.
pub const STEP_FIELDS: &[&str] = &["output", "status", "error", "duration_ms", "healed"];

/// Fields of `workflow` exposed to templates and conditions.
pub const WORKFLOW_FIELDS: &[&str] = &["name", "run_id"];

// ---------------------------------------------------------------------------
// Error type
// ---------------------------------------------------------------------------

/// Errors that can occur while loading a workflow or recording its results.
#[derive(Debug, Error)]
pub enum WorkflowError {
    /// YAML parse failure, including unknown step kinds.
    #[error("parse error: {0}")]
    ParseError(String),

    /// Structural or reference validation failure.
    #[error("validation error: {0}")]
    ValidationError(String),

    /// Filesystem I/O failure.
    #[error("I/O error: {0}")]
    IoError(#[from] std::io::Error),

    /// No workflow with the requested name exists.
    #[error("workflow not found: {0}")]
    NotFound(String),

    /// A step result was recorded twice within one run.
    #[error("result for step '{0}' already recorded")]
    DuplicateResult(String),
}

// ---------------------------------------------------------------------------
// Parsing
// ---------------------------------------------------------------------------

/// Parse a YAML string into a validated `WorkflowDefinition`.
pub fn parse_workflow_yaml(yaml: &str) -> Result<WorkflowDefinition, WorkflowError> {
    let def: WorkflowDefinition =
        serde_yaml_ng::from_str(yaml).map_err(|e| WorkflowError::ParseError(e.to_string()))?;
    validate_definition(&def)?;
    Ok(def)
}

/// Serialize a `WorkflowDefinition` to a YAML string.
pub fn serialize_workflow_yaml(def: &WorkflowDefinition) -> Result<String, WorkflowError> {
    serde_yaml_ng::to_string(def).map_err(|e| WorkflowError::ParseError(e.to_string()))
}

// ---------------------------------------------------------------------------
// Validation
// ---------------------------------------------------------------------------

fn invalid(message: impl Into<String>) -> WorkflowError {
    WorkflowError::ValidationError(message.into())
}

fn valid_name(name: &str) -> bool {
    !name.is_empty()
        && name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
}

fn valid_identifier(name: &str) -> bool {
    let mut chars = name.chars();
    chars
        .next()
        .is_some_and(|c| c.is_ascii_alphabetic() || c == '_')
        && chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}

/// Validate a `WorkflowDefinition`.
///
/// Checks:
/// - Workflow, step, input and output names are well formed and unique
/// - At least one step exists
/// - Templates, conditions and transform snippets are syntactically valid
/// - `steps.<name>` references only point at earlier steps
/// - `inputs.<name>` and `constants.<name>` references are declared
/// - Transform reads are identifiers bound to something that exists
pub fn validate_definition(def: &WorkflowDefinition) -> Result<(), WorkflowError> {
    if !valid_name(&def.name) {
        return Err(invalid(format!(
            "workflow name '{}' is empty or contains invalid characters (only alphanumeric, '-' and '_' allowed)",
            def.name
        )));
    }

    if def.steps.is_empty() {
        return Err(invalid("workflow must have at least one step"));
    }

    let mut input_names = HashSet::new();
    for input in &def.inputs {
        if !valid_name(&input.name) {
            return Err(invalid(format!("invalid input name '{}'", input.name)));
        }
        if !input_names.insert(input.name.as_str()) {
            return Err(invalid(format!("duplicate input: '{}'", input.name)));
        }
        if let Some(default) = &input.default {
            if !input.input_type.accepts(default) {
                return Err(invalid(format!(
                    "default for input '{}' is not of type {}",
                    input.name, input.input_type
                )));
            }
        }
    }

    let all_steps: HashSet<&str> = def.steps.iter().map(|s| s.name.as_str()).collect();
    let mut earlier: HashSet<&str> = HashSet::new();
    for step in &def.steps {
        if !valid_name(&step.name) {
            return Err(invalid(format!("invalid step name '{}'", step.name)));
        }
        if earlier.contains(step.name.as_str()) {
            return Err(invalid(format!("duplicate step name: '{}'", step.name)));
        }
        if step.timeout_secs == Some(0) {
            return Err(invalid(format!("step '{}': timeout must be > 0", step.name)));
        }

        let refs = References {
            def,
            earlier: &earlier,
            all_steps: &all_steps,
            current: Some(&step.name),
        };
        validate_step(step, &refs)
            .map_err(|message| invalid(format!("step '{}': {message}", step.name)))?;
        earlier.insert(step.name.as_str());
    }

    let mut output_names = HashSet::new();
    let refs = References {
        def,
        earlier: &all_steps,
        all_steps: &all_steps,
        current: None,
    };
    for output in &def.outputs {
        if !output_names.insert(output.name.as_str()) {
            return Err(invalid(format!("duplicate output: '{}'", output.name)));
        }
        let mut paths = Vec::new();
        collect_paths(&output.template, &mut paths)
            .map_err(|e| invalid(format!("output '{}': {e}", output.name)))?;
        for path in &paths {
            refs.check(path)
                .map_err(|message| invalid(format!("output '{}': {message}", output.name)))?;
        }
    }

    Ok(())
}

fn validate_step(step: &StepSpec, refs: &References<'_>) -> Result<(), String> {
    if let Some(source) = &step.condition {
        let condition = Condition::parse(source).map_err(|e| e.to_string())?;
        for path in condition.paths() {
            refs.check(&path)?;
        }
    }

    match &step.kind {
        StepKind::Tool { tool, args } => {
            if tool.trim().is_empty() {
                return Err("tool name must not be empty".to_string());
            }
            let mut paths = Vec::new();
            collect_paths(&Value::Object(args.clone()), &mut paths).map_err(|e| e.to_string())?;
            for path in &paths {
                refs.check(path)?;
            }
        }
        StepKind::Transform { reads, code } => {
            if code.trim().is_empty() {
                return Err("transform code must not be empty".to_string());
            }
            if code.len() > MAX_TRANSFORM_SOURCE {
                return Err(format!(
                    "transform code is {} bytes, limit is {MAX_TRANSFORM_SOURCE}",
                    code.len()
                ));
            }
            tokenize(code, LexMode::Jexl).map_err(|e| format!("transform code: {e}"))?;

            let mut names = HashSet::new();
            for read in reads {
                let name = read.name();
                if !valid_identifier(name) {
                    return Err(format!("read '{name}' is not a valid identifier"));
                }
                if !names.insert(name) {
                    return Err(format!("duplicate read '{name}'"));
                }
                match read {
                    ReadSpec::Name(name) => refs.check_bare(name)?,
                    ReadSpec::Bound { from, .. } => {
                        let path = ValuePath::parse(from).map_err(|e| e.to_string())?;
                        refs.check(&path)?;
                    }
                }
            }
        }
        StepKind::Description { text } => {
            let template = Template::parse(text).map_err(|e| e.to_string())?;
            for expr in template.placeholders() {
                refs.check(&expr.path)?;
            }
        }
    }
    Ok(())
}

/// What a given position in the definition is allowed to reference.
struct References<'a> {
    def: &'a WorkflowDefinition,
    earlier: &'a HashSet<&'a str>,
    all_steps: &'a HashSet<&'a str>,
    /// The step being validated, `None` for outputs.
    current: Option<&'a str>,
}

impl References<'_> {
    fn check(&self, path: &ValuePath) -> Result<(), String> {
        match path.root.as_str() {
            "inputs" => {
                let name = path
                    .first_key()
                    .ok_or_else(|| format!("'{path}' must name an input"))?;
                if self.def.input(name).is_none() {
                    return Err(format!("'{path}' references undeclared input '{name}'"));
                }
            }
            "constants" => {
                let name = path
                    .first_key()
                    .ok_or_else(|| format!("'{path}' must name a constant"))?;
                if !self.def.constants.contains_key(name) {
                    return Err(format!("'{path}' references undeclared constant '{name}'"));
                }
            }
            "steps" => {
                let name = path
                    .first_key()
                    .ok_or_else(|| format!("'{path}' must name a step"))?;
                self.check_step(path, name)?;
                match path.segments.get(1) {
                    Some(PathSegment::Key(field)) if STEP_FIELDS.contains(&field.as_str()) => {}
                    _ => {
                        return Err(format!(
                            "'{path}' must select one of: {}",
                            STEP_FIELDS.join(", ")
                        ));
                    }
                }
            }
            "workflow" => match path.first_key() {
                Some(field) if WORKFLOW_FIELDS.contains(&field) && path.segments.len() == 1 => {}
                _ => {
                    return Err(format!(
                        "'{path}' must be one of: {}",
                        WORKFLOW_FIELDS
                            .iter()
                            .map(|f| format!("workflow.{f}"))
                            .collect::<Vec<_>>()
                            .join(", ")
                    ));
                }
            },
            other => {
                return Err(format!(
                    "'{path}' has unknown root '{other}' (expected inputs, constants, steps or workflow)"
                ));
            }
        }
        Ok(())
    }

    fn check_step(&self, path: &ValuePath, name: &str) -> Result<(), String> {
        if self.earlier.contains(name) {
            return Ok(());
        }
        if self.current == Some(name) {
            return Err(format!("'{path}' references the step itself"));
        }
        if self.all_steps.contains(name) {
            return Err(format!("'{path}' is a forward reference to step '{name}'"));
        }
        Err(format!("'{path}' references unknown step '{name}'"))
    }

    /// A bare transform read: earlier step, then input, then constant.
    fn check_bare(&self, name: &str) -> Result<(), String> {
        if self.earlier.contains(name)
            || self.def.input(name).is_some()
            || self.def.constants.contains_key(name)
        {
            return Ok(());
        }
        if self.current == Some(name) {
            return Err(format!("read '{name}' references the step itself"));
        }
        if self.all_steps.contains(name) {
            return Err(format!("read '{name}' is a forward reference"));
        }
        Err(format!(
            "read '{name}' is not an earlier step, an input or a constant"
        ))
    }
}

// ---------------------------------------------------------------------------
// Filesystem operations
// ---------------------------------------------------------------------------

/// Load a workflow definition from a YAML file.
pub fn load_workflow_file(path: &Path) -> Result<WorkflowDefinition, WorkflowError> {
    let content = std::fs::read_to_string(path)?;
    parse_workflow_yaml(&content)
}

/// Discover all workflow YAML files under `base_dir`.
///
/// Scans for `.yaml` and `.yml` files recursively. Files that fail to parse
/// are logged and skipped.
pub fn discover_workflows(
    base_dir: &Path,
) -> Result<Vec<(PathBuf, WorkflowDefinition)>, WorkflowError> {
    let mut results = Vec::new();
    if !base_dir.exists() {
        return Ok(results);
    }
    discover_recursive(base_dir, &mut results)?;
    results.sort_by(|a, b| a.1.name.cmp(&b.1.name));
    Ok(results)
}

fn discover_recursive(
    dir: &Path,
    results: &mut Vec<(PathBuf, WorkflowDefinition)>,
) -> Result<(), WorkflowError> {
    for entry in std::fs::read_dir(dir)? {
        let path = entry?.path();
        if path.is_dir() {
            discover_recursive(&path, results)?;
        } else if path
            .extension()
            .is_some_and(|ext| ext == "yaml" || ext == "yml")
        {
            match load_workflow_file(&path) {
                Ok(def) => results.push((path, def)),
                Err(e) => tracing::warn!(?path, error = %e, "skipping invalid workflow file"),
            }
        }
    }
    Ok(())
}

/// Find a workflow by name under `base_dir`, or load it directly when
/// `name_or_path` points at a file.
pub fn find_workflow(
    base_dir: &Path,
    name_or_path: &str,
) -> Result<(PathBuf, WorkflowDefinition), WorkflowError> {
    let direct = Path::new(name_or_path);
    if direct.is_file() {
        return Ok((direct.to_path_buf(), load_workflow_file(direct)?));
    }
    discover_workflows(base_dir)?
        .into_iter()
        .find(|(_, def)| def.name == name_or_path)
        .ok_or_else(|| {
            WorkflowError::NotFound(format!("'{name_or_path}' in {}", base_dir.display()))
        })
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    fn expect_invalid(yaml: &str, needle: &str) {
        match parse_workflow_yaml(yaml) {
            Err(WorkflowError::ValidationError(msg)) => {
                assert!(msg.contains(needle), "message {msg:?} should contain {needle:?}")
            }
            other => panic!("expected validation error containing {needle:?}, got {other:?}"),
        }
    }

    const TRIAGE: &str = r#"
name: triage-issue
inputs:
  - name: repo
    type: string
    required: true
  - name: dry_run
    type: boolean
    default: false
constants:
  label: bug
steps:
  - name: fetch
    kind: tool
    tool: issues.get
    args: { repo: "{{ inputs.repo }}", label: "{{ constants.label }}" }
  - name: shape
    kind: transform
    reads: [fetch, { name: owner, from: "steps.fetch.output.user.login" }]
    code: "{ title: fetch.title|upper, owner: owner }"
  - name: label
    kind: tool
    tool: issues.label
    condition: "exists steps.shape.output && {{ inputs.dry_run }} == false"
    on_error: retry-with-heal
    fallback: continue
    args:
      id: "{{ steps.fetch.output.id }}"
  - name: advise
    kind: description
    text: "Check {{ steps.shape.output.title }} in {{ workflow.name }}"
outputs:
  - name: title
    template: "{{ steps.shape.output.title | default('') }}"
"#;

    #[test]
    fn test_parse_valid_workflow() {
        let def = parse_workflow_yaml(TRIAGE).unwrap();
        assert_eq!(def.name, "triage-issue");
        assert_eq!(def.steps.len(), 4);
        assert_eq!(def.steps[2].kind.label(), "tool");
        assert_eq!(def.outputs.len(), 1);
    }

    #[test]
    fn test_yaml_roundtrip() {
        let def = parse_workflow_yaml(TRIAGE).unwrap();
        let yaml = serialize_workflow_yaml(&def).unwrap();
        let again = parse_workflow_yaml(&yaml).unwrap();
        assert_eq!(again.steps.len(), def.steps.len());
        assert_eq!(again.steps[1].name, "shape");
    }

    #[test]
    fn test_unknown_top_level_keys_ignored() {
        let yaml = "name: x\nowner: someone\nsteps:\n  - name: a\n    kind: description\n    text: hi\n";
        assert!(parse_workflow_yaml(yaml).is_ok());
    }

    #[test]
    fn test_unknown_step_kind_is_parse_error() {
        let yaml = "name: x\nsteps:\n  - name: a\n    kind: teleport\n";
        assert!(matches!(parse_workflow_yaml(yaml), Err(WorkflowError::ParseError(_))));
    }

    #[test]
    fn test_invalid_names() {
        expect_invalid("name: 'bad name'\nsteps:\n  - {name: a, kind: description, text: x}\n", "invalid characters");
        expect_invalid("name: ok\nsteps: []\n", "at least one step");
    }

    #[test]
    fn test_duplicate_step_names() {
        expect_invalid(
            "name: x\nsteps:\n  - {name: a, kind: description, text: one}\n  - {name: a, kind: description, text: two}\n",
            "duplicate step name",
        );
    }

    #[test]
    fn test_forward_reference_rejected() {
        let yaml = r#"
name: x
steps:
  - name: first
    kind: tool
    tool: t
    args: { id: "{{ steps.second.output.id }}" }
  - name: second
    kind: tool
    tool: t
"#;
        expect_invalid(yaml, "forward reference");
    }

    #[test]
    fn test_self_reference_rejected() {
        let yaml = r#"
name: x
steps:
  - name: a
    kind: tool
    tool: t
    condition: "exists steps.a.output"
"#;
        expect_invalid(yaml, "step itself");
    }

    #[test]
    fn test_undeclared_input_and_constant() {
        expect_invalid(
            "name: x\nsteps:\n  - {name: a, kind: description, text: '{{ inputs.nope }}'}\n",
            "undeclared input",
        );
        expect_invalid(
            "name: x\nsteps:\n  - {name: a, kind: description, text: '{{ constants.nope }}'}\n",
            "undeclared constant",
        );
    }

    #[test]
    fn test_unknown_root_and_step_field() {
        expect_invalid(
            "name: x\nsteps:\n  - {name: a, kind: description, text: '{{ env.HOME }}'}\n",
            "unknown root",
        );
        let yaml = r#"
name: x
steps:
  - {name: a, kind: description, text: hi}
  - {name: b, kind: description, text: "{{ steps.a.result }}"}
"#;
        expect_invalid(yaml, "must select one of");
    }

    #[test]
    fn test_malformed_condition_rejected() {
        let yaml = "name: x\nsteps:\n  - {name: a, kind: description, text: hi, condition: 'inputs.x =='}\n";
        expect_invalid(yaml, "invalid condition");
    }

    #[test]
    fn test_malformed_template_rejected() {
        let yaml = "name: x\nsteps:\n  - {name: a, kind: description, text: 'hello {{ oops'}\n";
        expect_invalid(yaml, "unterminated");
    }

    #[test]
    fn test_transform_read_checks() {
        let forward = r#"
name: x
steps:
  - name: a
    kind: transform
    reads: [b]
    code: b
  - {name: b, kind: description, text: hi}
"#;
        expect_invalid(forward, "forward reference");

        let bad_ident = r#"
name: x
inputs: [{name: my-input}]
steps:
  - name: a
    kind: transform
    reads: [my-input]
    code: "1"
"#;
        expect_invalid(bad_ident, "not a valid identifier");

        let unknown = "name: x\nsteps:\n  - {name: a, kind: transform, reads: [ghost], code: ghost}\n";
        expect_invalid(unknown, "not an earlier step");
    }

    #[test]
    fn test_transform_source_limit() {
        let code = "1 + ".repeat(MAX_TRANSFORM_SOURCE / 4 + 1) + "1";
        let yaml = format!("name: x\nsteps:\n  - name: a\n    kind: transform\n    code: \"{code}\"\n");
        expect_invalid(&yaml, "limit");
    }

    #[test]
    fn test_outputs_may_reference_any_step() {
        let yaml = r#"
name: x
steps:
  - {name: a, kind: description, text: hi}
  - {name: b, kind: description, text: there}
outputs:
  - name: both
    template: ["{{ steps.a.output }}", "{{ steps.b.status }}"]
"#;
        assert!(parse_workflow_yaml(yaml).is_ok());
    }

    #[test]
    fn test_default_must_match_type() {
        let yaml = "name: x\ninputs: [{name: n, type: integer, default: 'ten'}]\nsteps:\n  - {name: a, kind: description, text: hi}\n";
        expect_invalid(yaml, "not of type integer");
    }

    // -----------------------------------------------------------------------
    // Filesystem
    // -----------------------------------------------------------------------

    #[test]
    fn test_discover_and_find() {
        let dir = tempfile::tempdir().unwrap();
        let nested = dir.path().join("team");
        std::fs::create_dir_all(&nested).unwrap();
        std::fs::write(dir.path().join("triage.yaml"), TRIAGE).unwrap();
        std::fs::write(
            nested.join("hello.yml"),
            "name: hello\nsteps:\n  - {name: a, kind: description, text: hi}\n",
        )
        .unwrap();
        std::fs::write(dir.path().join("broken.yaml"), "name: [").unwrap();
        std::fs::write(dir.path().join("notes.txt"), "ignored").unwrap();

        let found = discover_workflows(dir.path()).unwrap();
        let names: Vec<&str> = found.iter().map(|(_, d)| d.name.as_str()).collect();
        assert_eq!(names, vec!["hello", "triage-issue"]);

        let (path, def) = find_workflow(dir.path(), "hello").unwrap();
        assert_eq!(def.name, "hello");
        assert!(path.ends_with("team/hello.yml"));

        let direct = dir.path().join("triage.yaml");
        let (_, def) = find_workflow(dir.path(), direct.to_str().unwrap()).unwrap();
        assert_eq!(def.name, "triage-issue");

        assert!(matches!(find_workflow(dir.path(), "missing"), Err(WorkflowError::NotFound(_))));
    }

    #[test]
    fn test_discover_missing_dir_is_empty() {
        let dir = tempfile::tempdir().unwrap();
        let found = discover_workflows(&dir.path().join("nope")).unwrap();
        assert!(found.is_empty());
    }
}
