//! Condition evaluator for step `condition` clauses.
//!
//! A deliberately small boolean grammar: comparisons, `&&`/`||`/`!` (and
//! their word forms), `exists`, `in`, literals, dotted paths and `{{ }}`
//! placeholders. There are no function calls, loops or assignments.
//!
//! Conditions are parsed when a workflow is loaded, so a malformed condition
//! is a validation error. Evaluation never fails: absent paths and filter
//! mismatches evaluate to `null`, which is falsy.

use std::cmp::Ordering;

use serde_json::Value;

use super::lexer::{tokenize, LexMode, Spanned, Token};
use super::path::{parse_path, Scope, ValuePath};
use super::template::{PlaceholderExpr, Template};

// ---------------------------------------------------------------------------
// Error type
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
#[error("invalid condition '{condition}': {message}")]
pub struct ConditionError {
    pub condition: String,
    pub message: String,
}

// ---------------------------------------------------------------------------
// AST
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq)]
enum Expr {
    Or(Box<Expr>, Box<Expr>),
    And(Box<Expr>, Box<Expr>),
    Not(Box<Expr>),
    Compare(Box<Expr>, CompareOp, Box<Expr>),
    Exists(ValuePath),
    Literal(Value),
    Path(ValuePath),
    Placeholder(PlaceholderExpr),
    Interpolated(Template),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum CompareOp {
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
    In,
}

/// A parsed, reusable condition.
#[derive(Debug, Clone, PartialEq)]
pub struct Condition {
    source: String,
    expr: Expr,
}

impl Condition {
    /// Parse a condition string.
    pub fn parse(source: &str) -> Result<Self, ConditionError> {
        let err = |message: String| ConditionError {
            condition: source.to_string(),
            message,
        };
        let tokens = tokenize(source, LexMode::Path).map_err(|e| err(e.to_string()))?;
        if tokens.is_empty() {
            return Err(err("empty condition".to_string()));
        }
        let mut parser = Parser { tokens: &tokens, pos: 0 };
        let expr = parser.or().map_err(err)?;
        if parser.pos != tokens.len() {
            return Err(err(format!(
                "unexpected token at offset {}",
                tokens[parser.pos].pos
            )));
        }
        Ok(Self {
            source: source.to_string(),
            expr,
        })
    }

    pub fn source(&self) -> &str {
        &self.source
    }

    /// Evaluate to a boolean using truthiness of the result.
    pub fn evaluate(&self, scope: &dyn Scope) -> bool {
        is_truthy(&eval(&self.expr, scope))
    }

    /// Every context path the condition reads.
    pub fn paths(&self) -> Vec<ValuePath> {
        let mut out = Vec::new();
        collect(&self.expr, &mut out);
        out
    }
}

fn collect(expr: &Expr, out: &mut Vec<ValuePath>) {
    match expr {
        Expr::Or(a, b) | Expr::And(a, b) | Expr::Compare(a, _, b) => {
            collect(a, out);
            collect(b, out);
        }
        Expr::Not(inner) => collect(inner, out),
        Expr::Exists(path) | Expr::Path(path) => out.push(path.clone()),
        Expr::Placeholder(p) => out.push(p.path.clone()),
        Expr::Interpolated(t) => out.extend(t.placeholders().map(|p| p.path.clone())),
        Expr::Literal(_) => {}
    }
}

// ---------------------------------------------------------------------------
// Parser
// ---------------------------------------------------------------------------

struct Parser<'a> {
    tokens: &'a [Spanned],
    pos: usize,
}

impl Parser<'_> {
    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.pos).map(|s| &s.token)
    }

    fn peek_word(&self, word: &str) -> bool {
        matches!(self.peek(), Some(Token::Ident(w)) if w == word)
    }

    fn or(&mut self) -> Result<Expr, String> {
        let mut left = self.and()?;
        while matches!(self.peek(), Some(Token::OrOr)) || self.peek_word("or") {
            self.pos += 1;
            let right = self.and()?;
            left = Expr::Or(Box::new(left), Box::new(right));
        }
        Ok(left)
    }

    fn and(&mut self) -> Result<Expr, String> {
        let mut left = self.not()?;
        while matches!(self.peek(), Some(Token::AndAnd)) || self.peek_word("and") {
            self.pos += 1;
            let right = self.not()?;
            left = Expr::And(Box::new(left), Box::new(right));
        }
        Ok(left)
    }

    fn not(&mut self) -> Result<Expr, String> {
        if matches!(self.peek(), Some(Token::Bang)) || self.peek_word("not") {
            self.pos += 1;
            return Ok(Expr::Not(Box::new(self.not()?)));
        }
        self.compare()
    }

    fn compare(&mut self) -> Result<Expr, String> {
        let left = self.operand()?;
        let op = match self.peek() {
            Some(Token::EqEq) => CompareOp::Eq,
            Some(Token::NotEq) => CompareOp::Ne,
            Some(Token::Lt) => CompareOp::Lt,
            Some(Token::Le) => CompareOp::Le,
            Some(Token::Gt) => CompareOp::Gt,
            Some(Token::Ge) => CompareOp::Ge,
            Some(Token::Ident(w)) if w == "in" => CompareOp::In,
            _ => return Ok(left),
        };
        self.pos += 1;
        let right = self.operand()?;
        Ok(Expr::Compare(Box::new(left), op, Box::new(right)))
    }

    fn operand(&mut self) -> Result<Expr, String> {
        let token = self.peek().cloned().ok_or("unexpected end of condition")?;
        match token {
            Token::LParen => {
                self.pos += 1;
                let inner = self.or()?;
                if !matches!(self.peek(), Some(Token::RParen)) {
                    return Err("expected ')'".to_string());
                }
                self.pos += 1;
                Ok(inner)
            }
            Token::OpenTemplate => {
                self.pos += 1;
                let expr = PlaceholderExpr::parse_tokens(self.tokens, &mut self.pos)?;
                if !matches!(self.peek(), Some(Token::CloseTemplate)) {
                    return Err("expected '}}'".to_string());
                }
                self.pos += 1;
                Ok(Expr::Placeholder(expr))
            }
            Token::Str(s) => {
                self.pos += 1;
                if s.contains("{{") {
                    let template = Template::parse(&s).map_err(|e| e.to_string())?;
                    return Ok(Expr::Interpolated(template));
                }
                Ok(Expr::Literal(Value::String(s)))
            }
            Token::Number(n) => {
                self.pos += 1;
                Ok(Expr::Literal(Value::Number(n)))
            }
            Token::Ident(word) => match word.as_str() {
                "true" => {
                    self.pos += 1;
                    Ok(Expr::Literal(Value::Bool(true)))
                }
                "false" => {
                    self.pos += 1;
                    Ok(Expr::Literal(Value::Bool(false)))
                }
                "null" => {
                    self.pos += 1;
                    Ok(Expr::Literal(Value::Null))
                }
                "exists" => {
                    self.pos += 1;
                    Ok(Expr::Exists(parse_path(self.tokens, &mut self.pos)?))
                }
                "and" | "or" | "not" | "in" => Err(format!("unexpected keyword '{word}'")),
                _ => Ok(Expr::Path(parse_path(self.tokens, &mut self.pos)?)),
            },
            other => Err(format!("unexpected token {other:?}")),
        }
    }
}

// ---------------------------------------------------------------------------
// Evaluation
// ---------------------------------------------------------------------------

fn eval(expr: &Expr, scope: &dyn Scope) -> Value {
    match expr {
        Expr::Or(a, b) => Value::Bool(is_truthy(&eval(a, scope)) || is_truthy(&eval(b, scope))),
        Expr::And(a, b) => Value::Bool(is_truthy(&eval(a, scope)) && is_truthy(&eval(b, scope))),
        Expr::Not(inner) => Value::Bool(!is_truthy(&eval(inner, scope))),
        Expr::Compare(a, op, b) => {
            let left = eval(a, scope);
            let right = eval(b, scope);
            Value::Bool(compare(&left, *op, &right))
        }
        Expr::Exists(path) => Value::Bool(scope.lookup(path).is_some_and(|v| !v.is_null())),
        Expr::Literal(v) => v.clone(),
        Expr::Path(path) => scope.lookup(path).unwrap_or(Value::Null),
        Expr::Placeholder(p) => p.evaluate(scope).ok().flatten().unwrap_or(Value::Null),
        Expr::Interpolated(t) => t.render(scope).unwrap_or(Value::Null),
    }
}

fn compare(left: &Value, op: CompareOp, right: &Value) -> bool {
    match op {
        CompareOp::Eq => loose_eq(left, right),
        CompareOp::Ne => !loose_eq(left, right),
        CompareOp::Lt => order(left, right) == Some(Ordering::Less),
        CompareOp::Le => matches!(order(left, right), Some(Ordering::Less | Ordering::Equal)),
        CompareOp::Gt => order(left, right) == Some(Ordering::Greater),
        CompareOp::Ge => matches!(order(left, right), Some(Ordering::Greater | Ordering::Equal)),
        CompareOp::In => match (left, right) {
            (needle, Value::Array(items)) => items.iter().any(|item| loose_eq(needle, item)),
            (Value::String(needle), Value::String(hay)) => hay.contains(needle.as_str()),
            (Value::String(key), Value::Object(map)) => map.contains_key(key),
            _ => false,
        },
    }
}

/// Numbers compare numerically (`1 == 1.0`); everything else structurally.
fn loose_eq(left: &Value, right: &Value) -> bool {
    match (left, right) {
        (Value::Number(a), Value::Number(b)) => a.as_f64() == b.as_f64(),
        _ => left == right,
    }
}

fn order(left: &Value, right: &Value) -> Option<Ordering> {
    match (left, right) {
        (Value::Number(a), Value::Number(b)) => a.as_f64()?.partial_cmp(&b.as_f64()?),
        (Value::String(a), Value::String(b)) => Some(a.cmp(b)),
        _ => None,
    }
}

/// Truthiness: null, false, 0 and "" are falsy; everything else is truthy.
pub fn is_truthy(value: &Value) -> bool {
    match value {
        Value::Bool(b) => *b,
        Value::Null => false,
        Value::Number(n) => n.as_f64().unwrap_or(0.0) != 0.0,
        Value::String(s) => !s.is_empty(),
        Value::Array(_) | Value::Object(_) => true,
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
