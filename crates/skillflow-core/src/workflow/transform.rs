//! Sandboxed transform executor.
//!
//! Transform steps run a short JEXL snippet over an explicit, per-step read
//! set. The evaluation context contains only the declared reads and the
//! evaluator only knows the pure data transforms registered here, so a
//! snippet has no way to touch files, the network or processes.
//!
//! Before evaluation the snippet is scanned: any root identifier outside the
//! read set, or any transform outside [`ALLOWED_TRANSFORMS`], is a
//! [`TransformError::Violation`] and nothing is evaluated.

use std::collections::HashSet;
use std::time::Duration;

use serde_json::{json, Map, Value};
use skillflow_types::run::{StepError, StepErrorKind};
use skillflow_types::workflow::ReadSpec;

use super::condition::is_truthy;
use super::context::ExecutionContext;
use super::lexer::{tokenize, LexMode, Token};
use super::path::{Scope, ValuePath};
use super::template::value_to_string;

/// Transforms a snippet may apply with `value|name(args)`.
pub const ALLOWED_TRANSFORMS: &[&str] = &[
    "lower",
    "upper",
    "trim",
    "split",
    "contains",
    "startsWith",
    "endsWith",
    "length",
    "not",
    "keys",
    "values",
    "join",
    "sum",
    "count",
    "toString",
    "toNumber",
    "json",
    "default",
    "pluck",
];

const KEYWORDS: &[&str] = &["true", "false", "null", "in"];

// ---------------------------------------------------------------------------
// Error type
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum TransformError {
    /// The snippet reaches outside its declared capability set.
    #[error("sandbox violation: {0}")]
    Violation(String),

    /// Evaluation exceeded the configured bound.
    #[error("transform exceeded {0:?}")]
    Timeout(Duration),

    /// A declared read could not be bound from the context.
    #[error("unresolved read: {0}")]
    Unresolved(String),

    /// The evaluator rejected the snippet.
    #[error("transform failed: {0}")]
    Eval(String),
}

impl From<TransformError> for StepError {
    fn from(err: TransformError) -> Self {
        let kind = match &err {
            TransformError::Violation(_) => StepErrorKind::SandboxViolation,
            TransformError::Timeout(_) => StepErrorKind::TransformTimeout,
            TransformError::Unresolved(_) => StepErrorKind::ResolutionError,
            TransformError::Eval(_) => StepErrorKind::Unknown,
        };
        StepError::new(kind, err.to_string())
    }
}

// ---------------------------------------------------------------------------
// Capability scan
// ---------------------------------------------------------------------------

/// Check that `code` only reads `allowed` names and applies allowed transforms.
pub fn scan(code: &str, allowed: &HashSet<&str>) -> Result<(), TransformError> {
    let tokens =
        tokenize(code, LexMode::Jexl).map_err(|e| TransformError::Eval(e.to_string()))?;

    for (i, spanned) in tokens.iter().enumerate() {
        let Token::Ident(name) = &spanned.token else {
            continue;
        };
        let prev = i.checked_sub(1).map(|p| &tokens[p].token);
        let next = tokens.get(i + 1).map(|s| &s.token);

        match prev {
            Some(Token::Dot) => continue,
            Some(Token::Pipe) => {
                if !ALLOWED_TRANSFORMS.contains(&name.as_str()) {
                    return Err(TransformError::Violation(format!(
                        "transform '{name}' is not available"
                    )));
                }
                continue;
            }
            _ => {}
        }
        if KEYWORDS.contains(&name.as_str()) {
            continue;
        }
        let object_key = matches!(prev, Some(Token::LBrace | Token::Comma))
            && matches!(next, Some(Token::Colon));
        if object_key {
            continue;
        }
        if !allowed.contains(name.as_str()) {
            return Err(TransformError::Violation(format!(
                "'{name}' is not in the declared read set"
            )));
        }
    }
    Ok(())
}

/// Bind every declared read from the context.
///
/// A bare name is an earlier step's output, else an input, else a constant.
pub fn bind_reads(
    reads: &[ReadSpec],
    ctx: &ExecutionContext,
) -> Result<Map<String, Value>, TransformError> {
    let mut bindings = Map::new();
    for read in reads {
        let value = match read {
            ReadSpec::Name(name) => {
                if let Some(result) = ctx.result(name) {
                    result.output.clone().ok_or_else(|| {
                        TransformError::Unresolved(format!("step '{name}' produced no output"))
                    })?
                } else if let Some(value) = ctx.inputs().get(name) {
                    value.clone()
                } else if let Some(value) = ctx.constants().get(name) {
                    value.clone()
                } else {
                    return Err(TransformError::Unresolved(format!("'{name}' is not bound")));
                }
            }
            ReadSpec::Bound { name, from } => {
                let path = ValuePath::parse(from)
                    .map_err(|e| TransformError::Unresolved(e.to_string()))?;
                ctx.lookup(&path).ok_or_else(|| {
                    TransformError::Unresolved(format!("'{name}' from '{from}' is missing"))
                })?
            }
        };
        bindings.insert(read.name().to_string(), value);
    }
    Ok(bindings)
}

// ---------------------------------------------------------------------------
// Executor
// ---------------------------------------------------------------------------

/// Runs transform snippets on the blocking pool under a time bound.
#[derive(Debug, Clone)]
pub struct TransformExecutor {
    timeout: Duration,
}

impl TransformExecutor {
    pub fn new(timeout: Duration) -> Self {
        Self { timeout }
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Scan, bind and evaluate a transform step.
    pub async fn run(
        &self,
        code: &str,
        reads: &[ReadSpec],
        ctx: &ExecutionContext,
    ) -> Result<Value, TransformError> {
        let allowed: HashSet<&str> = reads.iter().map(ReadSpec::name).collect();
        scan(code, &allowed)?;
        let bindings = bind_reads(reads, ctx)?;
        self.evaluate(code, bindings).await
    }

    /// Evaluate an already-scanned snippet against `bindings`.
    pub async fn evaluate(
        &self,
        code: &str,
        bindings: Map<String, Value>,
    ) -> Result<Value, TransformError> {
        let code = code.to_string();
        let context = Value::Object(bindings);
        let task = tokio::task::spawn_blocking(move || {
            sandbox_evaluator()
                .eval_in_context(&code, &context)
                .map_err(|e| TransformError::Eval(e.to_string()))
        });

        match tokio::time::timeout(self.timeout, task).await {
            Ok(Ok(result)) => result.map(normalize_numbers),
            Ok(Err(join_err)) => Err(TransformError::Eval(format!(
                "transform task failed: {join_err}"
            ))),
            Err(_) => {
                tracing::warn!(timeout_ms = self.timeout.as_millis() as u64, "transform timed out");
                Err(TransformError::Timeout(self.timeout))
            }
        }
    }
}

/// JEXL evaluates every number as a float; bring whole numbers back to integers.
fn normalize_numbers(value: Value) -> Value {
    match value {
        Value::Number(n) => match n.as_f64() {
            Some(f) if n.is_f64() && f.fract() == 0.0 && f.abs() < 9.0e15 => json!(f as i64),
            _ => Value::Number(n),
        },
        Value::Array(items) => Value::Array(items.into_iter().map(normalize_numbers).collect()),
        Value::Object(map) => Value::Object(
            map.into_iter()
                .map(|(k, v)| (k, normalize_numbers(v)))
                .collect(),
        ),
        other => other,
    }
}

fn str_arg(args: &[Value], index: usize) -> &str {
    args.get(index).and_then(Value::as_str).unwrap_or("")
}

fn number_of(value: &Value) -> f64 {
    match value {
        Value::Number(n) => n.as_f64().unwrap_or(0.0),
        Value::String(s) => s.trim().parse().unwrap_or(0.0),
        Value::Bool(true) => 1.0,
        _ => 0.0,
    }
}

/// An evaluator that knows only the pure transforms in [`ALLOWED_TRANSFORMS`].
fn sandbox_evaluator() -> jexl_eval::Evaluator<'static> {
    jexl_eval::Evaluator::new()
        // String transforms
        .with_transform("lower", |args: &[Value]| Ok(json!(str_arg(args, 0).to_lowercase())))
        .with_transform("upper", |args: &[Value]| Ok(json!(str_arg(args, 0).to_uppercase())))
        .with_transform("trim", |args: &[Value]| Ok(json!(str_arg(args, 0).trim())))
        .with_transform("split", |args: &[Value]| {
            let delimiter = args.get(1).and_then(Value::as_str).unwrap_or(",");
            let parts: Vec<&str> = str_arg(args, 0).split(delimiter).collect();
            Ok(json!(parts))
        })
        .with_transform("contains", |args: &[Value]| {
            let needle = args.get(1).cloned().unwrap_or(Value::Null);
            let found = match args.first() {
                Some(Value::String(s)) => s.contains(needle.as_str().unwrap_or("")),
                Some(Value::Array(items)) => items.contains(&needle),
                Some(Value::Object(map)) => needle.as_str().is_some_and(|k| map.contains_key(k)),
                _ => false,
            };
            Ok(json!(found))
        })
        .with_transform("startsWith", |args: &[Value]| {
            Ok(json!(str_arg(args, 0).starts_with(str_arg(args, 1))))
        })
        .with_transform("endsWith", |args: &[Value]| {
            Ok(json!(str_arg(args, 0).ends_with(str_arg(args, 1))))
        })
        .with_transform("length", |args: &[Value]| {
            let len = match args.first() {
                Some(Value::String(s)) => s.chars().count(),
                Some(Value::Array(a)) => a.len(),
                Some(Value::Object(o)) => o.len(),
                _ => 0,
            };
            Ok(json!(len as f64))
        })
        .with_transform("not", |args: &[Value]| {
            Ok(json!(!args.first().is_some_and(is_truthy)))
        })
        // Collection transforms
        .with_transform("keys", |args: &[Value]| {
            let keys: Vec<&String> = args
                .first()
                .and_then(Value::as_object)
                .map(|o| o.keys().collect())
                .unwrap_or_default();
            Ok(json!(keys))
        })
        .with_transform("values", |args: &[Value]| {
            let values: Vec<Value> = args
                .first()
                .and_then(Value::as_object)
                .map(|o| o.values().cloned().collect())
                .unwrap_or_default();
            Ok(Value::Array(values))
        })
        .with_transform("join", |args: &[Value]| {
            let separator = args.get(1).and_then(Value::as_str).unwrap_or(",");
            let joined = args
                .first()
                .and_then(Value::as_array)
                .map(|items| {
                    items
                        .iter()
                        .map(value_to_string)
                        .collect::<Vec<_>>()
                        .join(separator)
                })
                .unwrap_or_default();
            Ok(json!(joined))
        })
        .with_transform("sum", |args: &[Value]| {
            let total: f64 = args
                .first()
                .and_then(Value::as_array)
                .map(|items| items.iter().map(number_of).sum())
                .unwrap_or(0.0);
            Ok(json!(total))
        })
        .with_transform("count", |args: &[Value]| {
            let count = match args.first() {
                Some(Value::Array(items)) => match args.get(1) {
                    Some(expected) => items.iter().filter(|item| *item == expected).count(),
                    None => items.len(),
                },
                Some(Value::Null) | None => 0,
                Some(_) => 1,
            };
            Ok(json!(count as f64))
        })
        .with_transform("pluck", |args: &[Value]| {
            let key = str_arg(args, 1);
            let plucked: Vec<Value> = args
                .first()
                .and_then(Value::as_array)
                .map(|items| {
                    items
                        .iter()
                        .map(|item| item.get(key).cloned().unwrap_or(Value::Null))
                        .collect()
                })
                .unwrap_or_default();
            Ok(Value::Array(plucked))
        })
        // Conversions
        .with_transform("toString", |args: &[Value]| {
            Ok(json!(args.first().map(value_to_string).unwrap_or_default()))
        })
        .with_transform("toNumber", |args: &[Value]| {
            Ok(json!(args.first().map(number_of).unwrap_or(0.0)))
        })
        .with_transform("json", |args: &[Value]| {
            let value = args.first().cloned().unwrap_or(Value::Null);
            Ok(json!(serde_json::to_string(&value).unwrap_or_default()))
        })
        .with_transform("default", |args: &[Value]| {
            let value = args.first().cloned().unwrap_or(Value::Null);
            if value.is_null() {
                Ok(args.get(1).cloned().unwrap_or(Value::Null))
            } else {
                Ok(value)
            }
        })
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
