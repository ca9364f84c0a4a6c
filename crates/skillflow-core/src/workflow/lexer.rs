//! Tokenizer shared by placeholder templates, conditions and the transform
//! sandbox scanner.
//!
//! Two modes differ only in identifier rules: in [`LexMode::Path`] an
//! identifier may contain `-` (step names such as `get-issue`), while in
//! [`LexMode::Jexl`] `-` is always an operator.

use serde_json::Number;

/// Identifier rules to apply.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LexMode {
    /// Context paths, templates and conditions.
    Path,
    /// JEXL transform snippets.
    Jexl,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Token {
    Ident(String),
    Str(String),
    Number(Number),
    LParen,
    RParen,
    LBracket,
    RBracket,
    LBrace,
    RBrace,
    Dot,
    Comma,
    Colon,
    Question,
    Pipe,
    Bang,
    AndAnd,
    OrOr,
    EqEq,
    NotEq,
    Lt,
    Le,
    Gt,
    Ge,
    Plus,
    Minus,
    Star,
    Slash,
    Percent,
    Caret,
    OpenTemplate,
    CloseTemplate,
}

/// A token and the byte offset where it starts.
#[derive(Debug, Clone, PartialEq)]
pub struct Spanned {
    pub token: Token,
    pub pos: usize,
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{message} at offset {pos}")]
pub struct LexError {
    pub pos: usize,
    pub message: String,
}

/// Tokenize `input`.
pub fn tokenize(input: &str, mode: LexMode) -> Result<Vec<Spanned>, LexError> {
    let chars: Vec<(usize, char)> = input.char_indices().collect();
    let mut tokens = Vec::new();
    let mut i = 0;

    while i < chars.len() {
        let (pos, c) = chars[i];
        if c.is_whitespace() {
            i += 1;
            continue;
        }

        let next = chars.get(i + 1).map(|(_, c)| *c);
        let push = |tokens: &mut Vec<Spanned>, token: Token| tokens.push(Spanned { token, pos });

        match c {
            '\'' | '"' => {
                let (value, consumed) = lex_string(&chars[i..], c, pos)?;
                push(&mut tokens, Token::Str(value));
                i += consumed;
                continue;
            }
            c if c.is_ascii_digit() => {
                let (number, consumed) = lex_number(&chars[i..], pos)?;
                push(&mut tokens, Token::Number(number));
                i += consumed;
                continue;
            }
            '-' if next.is_some_and(|n| n.is_ascii_digit()) && !ends_operand(tokens.last()) => {
                let (number, consumed) = lex_number(&chars[i + 1..], pos)?;
                let negated = negate(&number).ok_or_else(|| LexError {
                    pos,
                    message: "number out of range".to_string(),
                })?;
                push(&mut tokens, Token::Number(negated));
                i += consumed + 1;
                continue;
            }
            c if c.is_alphabetic() || c == '_' || c == '$' => {
                let start = i;
                i += 1;
                while i < chars.len() {
                    let ch = chars[i].1;
                    let hyphen = mode == LexMode::Path
                        && ch == '-'
                        && chars
                            .get(i + 1)
                            .is_some_and(|(_, n)| n.is_alphanumeric() || *n == '_');
                    if ch.is_alphanumeric() || ch == '_' || ch == '$' || hyphen {
                        i += 1;
                    } else {
                        break;
                    }
                }
                let ident: String = chars[start..i].iter().map(|(_, c)| *c).collect();
                push(&mut tokens, Token::Ident(ident));
                continue;
            }
            _ => {}
        }

        let (token, width) = match (c, next) {
            ('{', Some('{')) if mode == LexMode::Path => (Token::OpenTemplate, 2),
            ('}', Some('}')) if mode == LexMode::Path => (Token::CloseTemplate, 2),
            ('&', Some('&')) => (Token::AndAnd, 2),
            ('|', Some('|')) => (Token::OrOr, 2),
            ('=', Some('=')) => (Token::EqEq, 2),
            ('!', Some('=')) => (Token::NotEq, 2),
            ('<', Some('=')) => (Token::Le, 2),
            ('>', Some('=')) => (Token::Ge, 2),
            ('(', _) => (Token::LParen, 1),
            (')', _) => (Token::RParen, 1),
            ('[', _) => (Token::LBracket, 1),
            (']', _) => (Token::RBracket, 1),
            ('{', _) => (Token::LBrace, 1),
            ('}', _) => (Token::RBrace, 1),
            ('.', _) => (Token::Dot, 1),
            (',', _) => (Token::Comma, 1),
            (':', _) => (Token::Colon, 1),
            ('?', _) => (Token::Question, 1),
            ('|', _) => (Token::Pipe, 1),
            ('!', _) => (Token::Bang, 1),
            ('<', _) => (Token::Lt, 1),
            ('>', _) => (Token::Gt, 1),
            ('+', _) => (Token::Plus, 1),
            ('-', _) => (Token::Minus, 1),
            ('*', _) => (Token::Star, 1),
            ('/', _) => (Token::Slash, 1),
            ('%', _) => (Token::Percent, 1),
            ('^', _) => (Token::Caret, 1),
            _ => {
                return Err(LexError {
                    pos,
                    message: format!("unexpected character '{c}'"),
                });
            }
        };
        push(&mut tokens, token);
        i += width;
    }

    Ok(tokens)
}

/// Whether the previous token ends an operand, making a following `-` binary.
fn ends_operand(prev: Option<&Spanned>) -> bool {
    matches!(
        prev.map(|s| &s.token),
        Some(
            Token::Ident(_)
                | Token::Str(_)
                | Token::Number(_)
                | Token::RParen
                | Token::RBracket
                | Token::RBrace
        )
    )
}

fn lex_string(chars: &[(usize, char)], quote: char, pos: usize) -> Result<(String, usize), LexError> {
    let mut value = String::new();
    let mut i = 1;
    while i < chars.len() {
        let c = chars[i].1;
        if c == quote {
            return Ok((value, i + 1));
        }
        if c == '\\' {
            let escaped = chars.get(i + 1).map(|(_, c)| *c).ok_or_else(|| LexError {
                pos,
                message: "unterminated escape".to_string(),
            })?;
            value.push(match escaped {
                'n' => '\n',
                't' => '\t',
                'r' => '\r',
                other => other,
            });
            i += 2;
            continue;
        }
        value.push(c);
        i += 1;
    }
    Err(LexError {
        pos,
        message: "unterminated string".to_string(),
    })
}

fn lex_number(chars: &[(usize, char)], pos: usize) -> Result<(Number, usize), LexError> {
    let mut i = 0;
    while i < chars.len() && chars[i].1.is_ascii_digit() {
        i += 1;
    }
    let mut is_float = false;
    if i + 1 < chars.len() && chars[i].1 == '.' && chars[i + 1].1.is_ascii_digit() {
        is_float = true;
        i += 1;
        while i < chars.len() && chars[i].1.is_ascii_digit() {
            i += 1;
        }
    }
    let text: String = chars[..i].iter().map(|(_, c)| *c).collect();
    let number = if is_float {
        text.parse::<f64>().ok().and_then(Number::from_f64)
    } else {
        text.parse::<u64>().ok().map(Number::from)
    };
    number.map(|n| (n, i)).ok_or_else(|| LexError {
        pos,
        message: format!("invalid number '{text}'"),
    })
}

fn negate(number: &Number) -> Option<Number> {
    if let Some(u) = number.as_u64() {
        i64::try_from(u).ok().map(|i| Number::from(-i))
    } else {
        number.as_f64().and_then(|f| Number::from_f64(-f))
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
