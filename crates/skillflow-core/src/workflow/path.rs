//! Dotted context paths such as `steps.fetch.output.items[0]['display-name']`.
//!
//! A `ValuePath` is the unit of lookup for templates, conditions and
//! transform bindings. The [`Scope`] trait abstracts over what a path is
//! resolved against.

use std::fmt;

use serde_json::Value;

use super::lexer::{tokenize, LexMode, Spanned, Token};

/// One segment after the root.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PathSegment {
    Key(String),
    Index(usize),
}

/// A parsed context path: a root identifier plus zero or more segments.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValuePath {
    pub root: String,
    pub segments: Vec<PathSegment>,
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("invalid path '{input}': {message}")]
pub struct PathError {
    pub input: String,
    pub message: String,
}

impl ValuePath {
    /// Parse a standalone path string.
    pub fn parse(input: &str) -> Result<Self, PathError> {
        let err = |message: String| PathError {
            input: input.to_string(),
            message,
        };
        let tokens = tokenize(input, LexMode::Path).map_err(|e| err(e.to_string()))?;
        let mut pos = 0;
        let path = parse_path(&tokens, &mut pos).map_err(err)?;
        if pos != tokens.len() {
            return Err(err("unexpected trailing input".to_string()));
        }
        Ok(path)
    }

    /// The first key segment, e.g. the step name in `steps.<name>.output`.
    pub fn first_key(&self) -> Option<&str> {
        match self.segments.first() {
            Some(PathSegment::Key(k)) => Some(k),
            _ => None,
        }
    }

    /// The second key segment, e.g. `output` in `steps.<name>.output`.
    pub fn second_key(&self) -> Option<&str> {
        match self.segments.get(1) {
            Some(PathSegment::Key(k)) => Some(k),
            _ => None,
        }
    }
}

impl fmt::Display for ValuePath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.root)?;
        for segment in &self.segments {
            match segment {
                PathSegment::Key(k) if is_plain_key(k) => write!(f, ".{k}")?,
                PathSegment::Key(k) => write!(f, "['{k}']")?,
                PathSegment::Index(i) => write!(f, "[{i}]")?,
            }
        }
        Ok(())
    }
}

fn is_plain_key(key: &str) -> bool {
    let mut chars = key.chars();
    chars
        .next()
        .is_some_and(|c| c.is_alphabetic() || c == '_')
        && chars.all(|c| c.is_alphanumeric() || c == '_' || c == '-')
}

/// Parse a path starting at `tokens[*pos]`, advancing `pos` past it.
pub(crate) fn parse_path(tokens: &[Spanned], pos: &mut usize) -> Result<ValuePath, String> {
    let root = match tokens.get(*pos).map(|s| &s.token) {
        Some(Token::Ident(name)) => name.clone(),
        Some(other) => return Err(format!("expected identifier, found {other:?}")),
        None => return Err("expected identifier".to_string()),
    };
    *pos += 1;

    let mut segments = Vec::new();
    loop {
        match tokens.get(*pos).map(|s| &s.token) {
            Some(Token::Dot) => {
                *pos += 1;
                match tokens.get(*pos).map(|s| &s.token) {
                    Some(Token::Ident(key)) => segments.push(PathSegment::Key(key.clone())),
                    Some(Token::Number(n)) => segments.push(PathSegment::Index(index_of(n)?)),
                    _ => return Err("expected key after '.'".to_string()),
                }
                *pos += 1;
            }
            Some(Token::LBracket) => {
                *pos += 1;
                let segment = match tokens.get(*pos).map(|s| &s.token) {
                    Some(Token::Str(key)) => PathSegment::Key(key.clone()),
                    Some(Token::Number(n)) => PathSegment::Index(index_of(n)?),
                    _ => return Err("expected string or index inside '[]'".to_string()),
                };
                *pos += 1;
                if !matches!(tokens.get(*pos).map(|s| &s.token), Some(Token::RBracket)) {
                    return Err("expected ']'".to_string());
                }
                *pos += 1;
                segments.push(segment);
            }
            _ => break,
        }
    }

    Ok(ValuePath { root, segments })
}

fn index_of(n: &serde_json::Number) -> Result<usize, String> {
    n.as_u64()
        .and_then(|u| usize::try_from(u).ok())
        .ok_or_else(|| format!("invalid index {n}"))
}

/// Walk `segments` into `value`.
pub fn walk<'a>(value: &'a Value, segments: &[PathSegment]) -> Option<&'a Value> {
    segments.iter().try_fold(value, |current, segment| match segment {
        PathSegment::Key(k) => current.as_object()?.get(k),
        PathSegment::Index(i) => current.as_array()?.get(*i),
    })
}

// ---------------------------------------------------------------------------
// Scope
// ---------------------------------------------------------------------------

/// Something a `ValuePath` can be resolved against.
pub trait Scope {
    /// The value at `path`, or `None` when the path does not exist.
    fn lookup(&self, path: &ValuePath) -> Option<Value>;
}

/// A JSON object is a scope whose top-level keys are path roots.
impl Scope for Value {
    fn lookup(&self, path: &ValuePath) -> Option<Value> {
        let root = self.as_object()?.get(&path.root)?;
        walk(root, &path.segments).cloned()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
