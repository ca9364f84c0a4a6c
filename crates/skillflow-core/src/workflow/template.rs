//! Expression resolver for `{{ path | filter }}` placeholders.
//!
//! Templates appear in tool arguments, description text and output
//! definitions. Resolution is a pure function of (template, scope): every
//! string leaf of an arbitrarily nested value is resolved independently.
//!
//! A string consisting of exactly one placeholder keeps the resolved JSON
//! type (`"{{ steps.fetch.output.id }}"` yields the number `42`); mixed text
//! interpolates each placeholder as text.

use serde_json::{Map, Value};

use super::lexer::{tokenize, LexMode, Spanned, Token};
use super::path::{parse_path, Scope, ValuePath};

// ---------------------------------------------------------------------------
// Error type
// ---------------------------------------------------------------------------

/// Errors raised while parsing or resolving a template.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum TemplateError {
    #[error("invalid template '{template}': {message}")]
    Syntax { template: String, message: String },

    #[error("unresolved path '{path}'")]
    Unresolved { path: String },

    #[error("filter '{filter}' failed on '{path}': {message}")]
    Filter {
        filter: &'static str,
        path: String,
        message: String,
    },
}

// ---------------------------------------------------------------------------
// Filters
// ---------------------------------------------------------------------------

/// A named filter applied left-to-right to a placeholder's value.
#[derive(Debug, Clone, PartialEq)]
pub enum Filter {
    Json,
    Default(Value),
    Upper,
    Lower,
    Trim,
    Length,
    First,
    Last,
    Join(String),
    Keys,
}

impl Filter {
    pub fn name(&self) -> &'static str {
        match self {
            Filter::Json => "json",
            Filter::Default(_) => "default",
            Filter::Upper => "upper",
            Filter::Lower => "lower",
            Filter::Trim => "trim",
            Filter::Length => "length",
            Filter::First => "first",
            Filter::Last => "last",
            Filter::Join(_) => "join",
            Filter::Keys => "keys",
        }
    }

    fn build(name: &str, mut args: Vec<Value>) -> Result<Self, String> {
        let arity = |expected: usize, args: &[Value]| {
            if args.len() == expected {
                Ok(())
            } else {
                Err(format!(
                    "filter '{name}' takes {expected} argument(s), got {}",
                    args.len()
                ))
            }
        };
        let filter = match name {
            "json" => Filter::Json,
            "upper" => Filter::Upper,
            "lower" => Filter::Lower,
            "trim" => Filter::Trim,
            "length" => Filter::Length,
            "first" => Filter::First,
            "last" => Filter::Last,
            "keys" => Filter::Keys,
            "default" => {
                arity(1, &args)?;
                return Ok(Filter::Default(args.remove(0)));
            }
            "join" => {
                if args.len() > 1 {
                    return Err("filter 'join' takes at most 1 argument".to_string());
                }
                let sep = match args.pop() {
                    None => ", ".to_string(),
                    Some(Value::String(s)) => s,
                    Some(other) => value_to_string(&other),
                };
                return Ok(Filter::Join(sep));
            }
            other => return Err(format!("unknown filter '{other}'")),
        };
        arity(0, &args)?;
        Ok(filter)
    }

    /// Apply to a possibly-missing value. `None` propagates except through `default`.
    fn apply(&self, value: Option<Value>) -> Result<Option<Value>, String> {
        if let Filter::Default(fallback) = self {
            return Ok(match value {
                None | Some(Value::Null) => Some(fallback.clone()),
                present => present,
            });
        }
        let Some(value) = value else {
            return Ok(None);
        };
        let out = match (self, value) {
            (Filter::Json, v) => Value::String(serde_json::to_string(&v).map_err(|e| e.to_string())?),
            (Filter::Upper, Value::String(s)) => Value::String(s.to_uppercase()),
            (Filter::Lower, Value::String(s)) => Value::String(s.to_lowercase()),
            (Filter::Trim, Value::String(s)) => Value::String(s.trim().to_string()),
            (Filter::Length, Value::String(s)) => Value::from(s.chars().count()),
            (Filter::Length, Value::Array(a)) => Value::from(a.len()),
            (Filter::Length, Value::Object(o)) => Value::from(o.len()),
            (Filter::First, Value::Array(a)) => a.into_iter().next().unwrap_or(Value::Null),
            (Filter::Last, Value::Array(a)) => a.into_iter().next_back().unwrap_or(Value::Null),
            (Filter::Join(sep), Value::Array(a)) => Value::String(
                a.iter().map(value_to_string).collect::<Vec<_>>().join(sep),
            ),
            (Filter::Keys, Value::Object(o)) => {
                Value::Array(o.keys().cloned().map(Value::String).collect())
            }
            (filter, v) => {
                return Err(format!(
                    "'{}' is not applicable to {}",
                    filter.name(),
                    type_name(&v)
                ));
            }
        };
        Ok(Some(out))
    }
}

fn type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

// ---------------------------------------------------------------------------
// Placeholder expression
// ---------------------------------------------------------------------------

/// The inside of one `{{ ... }}`: a path followed by filters.
#[derive(Debug, Clone, PartialEq)]
pub struct PlaceholderExpr {
    pub path: ValuePath,
    pub filters: Vec<Filter>,
}

impl PlaceholderExpr {
    /// Parse from tokens starting at `*pos`; stops before the first token
    /// that cannot continue the expression.
    pub(crate) fn parse_tokens(tokens: &[Spanned], pos: &mut usize) -> Result<Self, String> {
        let path = parse_path(tokens, pos)?;
        let mut filters = Vec::new();
        while matches!(tokens.get(*pos).map(|s| &s.token), Some(Token::Pipe)) {
            *pos += 1;
            let name = match tokens.get(*pos).map(|s| &s.token) {
                Some(Token::Ident(name)) => name.clone(),
                _ => return Err("expected filter name after '|'".to_string()),
            };
            *pos += 1;
            let mut args = Vec::new();
            if matches!(tokens.get(*pos).map(|s| &s.token), Some(Token::LParen)) {
                *pos += 1;
                if !matches!(tokens.get(*pos).map(|s| &s.token), Some(Token::RParen)) {
                    loop {
                        args.push(parse_literal(tokens, pos)?);
                        match tokens.get(*pos).map(|s| &s.token) {
                            Some(Token::Comma) => *pos += 1,
                            Some(Token::RParen) => break,
                            _ => return Err("expected ',' or ')' in filter arguments".to_string()),
                        }
                    }
                }
                *pos += 1;
            }
            filters.push(Filter::build(&name, args)?);
        }
        Ok(Self { path, filters })
    }

    /// Resolve against `scope`; `None` when the path is missing and no
    /// `default` filter supplied a value.
    pub fn evaluate(&self, scope: &dyn Scope) -> Result<Option<Value>, TemplateError> {
        let mut value = scope.lookup(&self.path);
        for filter in &self.filters {
            value = filter.apply(value).map_err(|message| TemplateError::Filter {
                filter: filter.name(),
                path: self.path.to_string(),
                message,
            })?;
        }
        Ok(value)
    }

    /// Resolve, treating a missing value as an error.
    pub fn resolve(&self, scope: &dyn Scope) -> Result<Value, TemplateError> {
        self.evaluate(scope)?.ok_or_else(|| TemplateError::Unresolved {
            path: self.path.to_string(),
        })
    }
}

/// Parse a literal filter argument.
pub(crate) fn parse_literal(tokens: &[Spanned], pos: &mut usize) -> Result<Value, String> {
    let value = match tokens.get(*pos).map(|s| &s.token) {
        Some(Token::Str(s)) => Value::String(s.clone()),
        Some(Token::Number(n)) => Value::Number(n.clone()),
        Some(Token::Ident(word)) => match word.as_str() {
            "true" => Value::Bool(true),
            "false" => Value::Bool(false),
            "null" => Value::Null,
            other => return Err(format!("expected literal, found '{other}'")),
        },
        Some(other) => return Err(format!("expected literal, found {other:?}")),
        None => return Err("expected literal".to_string()),
    };
    *pos += 1;
    Ok(value)
}

// ---------------------------------------------------------------------------
// Template
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq)]
enum Segment {
    Text(String),
    Placeholder(PlaceholderExpr),
}

/// A parsed template string.
#[derive(Debug, Clone, PartialEq)]
pub struct Template {
    segments: Vec<Segment>,
}

impl Template {
    /// Parse a template string. Text without placeholders is a valid template.
    pub fn parse(input: &str) -> Result<Self, TemplateError> {
        let syntax = |message: String| TemplateError::Syntax {
            template: input.to_string(),
            message,
        };

        let mut segments = Vec::new();
        let mut rest = input;
        while let Some(start) = rest.find("{{") {
            if start > 0 {
                segments.push(Segment::Text(rest[..start].to_string()));
            }
            let inner_start = start + 2;
            let inner_len = find_close(&rest[inner_start..])
                .ok_or_else(|| syntax("unterminated '{{'".to_string()))?;
            let inner = &rest[inner_start..inner_start + inner_len];

            let tokens = tokenize(inner, LexMode::Path).map_err(|e| syntax(e.to_string()))?;
            let mut pos = 0;
            let expr = PlaceholderExpr::parse_tokens(&tokens, &mut pos).map_err(syntax)?;
            if pos != tokens.len() {
                return Err(syntax("unexpected input after placeholder expression".to_string()));
            }
            segments.push(Segment::Placeholder(expr));
            rest = &rest[inner_start + inner_len + 2..];
        }
        if !rest.is_empty() {
            segments.push(Segment::Text(rest.to_string()));
        }
        Ok(Self { segments })
    }

    /// Whether the template contains any placeholder.
    pub fn has_placeholders(&self) -> bool {
        self.segments
            .iter()
            .any(|s| matches!(s, Segment::Placeholder(_)))
    }

    /// The single placeholder, if the template is exactly one.
    pub fn as_single(&self) -> Option<&PlaceholderExpr> {
        match self.segments.as_slice() {
            [Segment::Placeholder(expr)] => Some(expr),
            _ => None,
        }
    }

    /// Every placeholder expression in order.
    pub fn placeholders(&self) -> impl Iterator<Item = &PlaceholderExpr> {
        self.segments.iter().filter_map(|s| match s {
            Segment::Placeholder(expr) => Some(expr),
            Segment::Text(_) => None,
        })
    }

    /// Render against `scope`.
    pub fn render(&self, scope: &dyn Scope) -> Result<Value, TemplateError> {
        if let Some(expr) = self.as_single() {
            return expr.resolve(scope);
        }
        let mut out = String::new();
        for segment in &self.segments {
            match segment {
                Segment::Text(text) => out.push_str(text),
                Segment::Placeholder(expr) => out.push_str(&value_to_string(&expr.resolve(scope)?)),
            }
        }
        Ok(Value::String(out))
    }
}

/// Byte offset of the `}}` closing a placeholder, skipping quoted strings.
fn find_close(s: &str) -> Option<usize> {
    let bytes = s.as_bytes();
    let mut quote: Option<u8> = None;
    let mut i = 0;
    while i < bytes.len() {
        let b = bytes[i];
        match quote {
            Some(_) if b == b'\\' => i += 1,
            Some(q) if b == q => quote = None,
            Some(_) => {}
            None if b == b'\'' || b == b'"' => quote = Some(b),
            None if b == b'}' && bytes.get(i + 1) == Some(&b'}') => return Some(i),
            None => {}
        }
        i += 1;
    }
    None
}

// ---------------------------------------------------------------------------
// Resolution over values
// ---------------------------------------------------------------------------

/// Resolve every string leaf of `template` against `scope`.
pub fn resolve(template: &Value, scope: &dyn Scope) -> Result<Value, TemplateError> {
    match template {
        Value::String(s) => resolve_str(s, scope),
        Value::Array(items) => items
            .iter()
            .map(|item| resolve(item, scope))
            .collect::<Result<Vec<_>, _>>()
            .map(Value::Array),
        Value::Object(map) => resolve_map(map, scope).map(Value::Object),
        other => Ok(other.clone()),
    }
}

/// Resolve every value of a mapping; keys are left untouched.
pub fn resolve_map(map: &Map<String, Value>, scope: &dyn Scope) -> Result<Map<String, Value>, TemplateError> {
    map.iter()
        .map(|(k, v)| resolve(v, scope).map(|v| (k.clone(), v)))
        .collect()
}

/// Resolve a single template string.
pub fn resolve_str(input: &str, scope: &dyn Scope) -> Result<Value, TemplateError> {
    if !input.contains("{{") {
        return Ok(Value::String(input.to_string()));
    }
    Template::parse(input)?.render(scope)
}

/// Parse every template in `value` and collect the referenced paths.
pub fn collect_paths(value: &Value, out: &mut Vec<ValuePath>) -> Result<(), TemplateError> {
    match value {
        Value::String(s) if s.contains("{{") => {
            let template = Template::parse(s)?;
            out.extend(template.placeholders().map(|p| p.path.clone()));
        }
        Value::Array(items) => {
            for item in items {
                collect_paths(item, out)?;
            }
        }
        Value::Object(map) => {
            for v in map.values() {
                collect_paths(v, out)?;
            }
        }
        _ => {}
    }
    Ok(())
}

/// Convert a JSON value to text for interpolation.
pub fn value_to_string(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Null => "null".to_string(),
        Value::Bool(b) => b.to_string(),
        Value::Number(n) => n.to_string(),
        // For objects/arrays, return compact JSON
        _ => serde_json::to_string(value).unwrap_or_default(),
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn scope() -> Value {
        json!({
            "inputs": { "repo": "engine", "count": 3, "tags": ["a", "b"], "empty": null },
            "constants": { "label": "Bug" },
            "steps": { "fetch": { "output": { "id": 42, "title": "  Crash on start  ", "meta": { "x": 1 } } } }
        })
    }

    #[test]
    fn test_single_placeholder_keeps_type() {
        let value = resolve_str("{{ steps.fetch.output.id }}", &scope()).unwrap();
        assert_eq!(value, json!(42));
    }

    #[test]
    fn test_whitespace_inside_braces_is_optional() {
        let value = resolve_str("{{steps.fetch.output.id}}", &scope()).unwrap();
        assert_eq!(value, json!(42));
    }

    #[test]
    fn test_mixed_text_interpolates() {
        let value = resolve_str("repo={{ inputs.repo }} id={{ steps.fetch.output.id }}", &scope()).unwrap();
        assert_eq!(value, json!("repo=engine id=42"));
    }

    #[test]
    fn test_plain_text_passes_through() {
        assert_eq!(resolve_str("no placeholders", &scope()).unwrap(), json!("no placeholders"));
    }

    #[test]
    fn test_nested_structures_resolve_every_leaf() {
        let template = json!({
            "id": "{{ steps.fetch.output.id }}",
            "list": ["{{ inputs.repo }}", 7, { "deep": "{{ constants.label | lower }}" }],
            "flag": true
        });
        let value = resolve(&template, &scope()).unwrap();
        assert_eq!(
            value,
            json!({ "id": 42, "list": ["engine", 7, { "deep": "bug" }], "flag": true })
        );
    }

    #[test]
    fn test_unknown_path_is_resolution_error() {
        let err = resolve_str("{{ inputs.nope }}", &scope()).unwrap_err();
        assert_eq!(
            err,
            TemplateError::Unresolved {
                path: "inputs.nope".to_string()
            }
        );
    }

    #[test]
    fn test_default_filter_covers_missing_and_null() {
        assert_eq!(resolve_str("{{ inputs.nope | default('x') }}", &scope()).unwrap(), json!("x"));
        assert_eq!(resolve_str("{{ inputs.empty | default(5) }}", &scope()).unwrap(), json!(5));
        assert_eq!(resolve_str("{{ inputs.repo | default('x') }}", &scope()).unwrap(), json!("engine"));
    }

    #[test]
    fn test_filters_apply_left_to_right() {
        let value = resolve_str("{{ steps.fetch.output.title | trim | upper }}", &scope()).unwrap();
        assert_eq!(value, json!("CRASH ON START"));
        let value = resolve_str("{{ inputs.nope | default('Abc') | lower }}", &scope()).unwrap();
        assert_eq!(value, json!("abc"));
    }

    #[test]
    fn test_json_filter_serializes() {
        let value = resolve_str("meta={{ steps.fetch.output.meta | json }}", &scope()).unwrap();
        assert_eq!(value, json!("meta={\"x\":1}"));
    }

    #[test]
    fn test_collection_filters() {
        assert_eq!(resolve_str("{{ inputs.tags | length }}", &scope()).unwrap(), json!(2));
        assert_eq!(resolve_str("{{ inputs.tags | first }}", &scope()).unwrap(), json!("a"));
        assert_eq!(resolve_str("{{ inputs.tags | last }}", &scope()).unwrap(), json!("b"));
        assert_eq!(resolve_str("{{ inputs.tags | join('+') }}", &scope()).unwrap(), json!("a+b"));
        assert_eq!(
            resolve_str("{{ steps.fetch.output.meta | keys }}", &scope()).unwrap(),
            json!(["x"])
        );
    }

    #[test]
    fn test_filter_type_mismatch_errors() {
        let err = resolve_str("{{ inputs.count | upper }}", &scope()).unwrap_err();
        assert!(matches!(err, TemplateError::Filter { filter: "upper", .. }), "got {err:?}");
    }

    #[test]
    fn test_syntax_errors() {
        assert!(matches!(Template::parse("{{ inputs.repo"), Err(TemplateError::Syntax { .. })));
        assert!(matches!(Template::parse("{{ inputs.repo | shout }}"), Err(TemplateError::Syntax { .. })));
        assert!(matches!(Template::parse("{{ }}"), Err(TemplateError::Syntax { .. })));
        assert!(matches!(Template::parse("{{ inputs.repo | default }}"), Err(TemplateError::Syntax { .. })));
    }

    #[test]
    fn test_closing_braces_inside_filter_strings() {
        let value = resolve_str("{{ inputs.nope | default('}}') }}", &scope()).unwrap();
        assert_eq!(value, json!("}}"));
    }

    #[test]
    fn test_collect_paths_walks_structures() {
        let mut paths = Vec::new();
        collect_paths(&json!({ "a": ["{{ inputs.x }}", "t {{ steps.s.output }}"] }), &mut paths).unwrap();
        let names: Vec<String> = paths.iter().map(ToString::to_string).collect();
        assert_eq!(names, vec!["inputs.x", "steps.s.output"]);
    }

    #[test]
    fn test_resolution_is_pure() {
        let s = scope();
        let a = resolve_str("{{ inputs.tags | join }}", &s).unwrap();
        let b = resolve_str("{{ inputs.tags | join }}", &s).unwrap();
        assert_eq!(a, b);
        assert_eq!(a, json!("a, b"));
    }
}
