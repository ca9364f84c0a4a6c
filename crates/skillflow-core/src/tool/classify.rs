//! Error-text classification for tool failures.
//!
//! Adapters that cannot tell why a call failed report `unknown` with the raw
//! message. The invoker refines those by looking for well-known signatures
//! in the text.

use skillflow_types::tool::{ErrorKind, ToolError};

const AUTH_PHRASES: &[&str] = &[
    "unauthorized",
    "forbidden",
    "token expired",
    "expired token",
    "not logged in",
    "authentication",
    "invalid credentials",
];
const RATE_LIMIT_PHRASES: &[&str] = &["rate limit", "ratelimit", "too many requests"];
const NOT_FOUND_PHRASES: &[&str] = &["not found", "no such", "does not exist"];
const NETWORK_PHRASES: &[&str] = &[
    "connection refused",
    "connection reset",
    "timed out",
    "timeout",
    "no route to host",
    "network is unreachable",
    "dns",
    "dial tcp",
    "broken pipe",
    "temporarily unavailable",
];
const INVALID_ARGUMENT_PHRASES: &[&str] = &[
    "invalid argument",
    "bad request",
    "unprocessable",
    "validation failed",
];

/// Classify free-form error text. Returns `Unknown` when nothing matches.
///
/// Checked in order: auth, rate limiting, not found, network, invalid
/// argument. HTTP status codes count only as whole words.
pub fn classify_text(text: &str) -> ErrorKind {
    let lower = text.to_lowercase();
    let has_code = |code: &str| {
        lower
            .split(|c: char| !c.is_ascii_alphanumeric())
            .any(|word| word == code)
    };
    let has_phrase = |phrases: &[&str]| phrases.iter().any(|p| lower.contains(p));

    if has_code("401") || has_code("403") || has_phrase(AUTH_PHRASES) {
        ErrorKind::Auth
    } else if has_code("429") || has_phrase(RATE_LIMIT_PHRASES) {
        ErrorKind::RateLimited
    } else if has_code("404") || has_phrase(NOT_FOUND_PHRASES) {
        ErrorKind::NotFound
    } else if has_code("502") || has_code("503") || has_code("504") || has_phrase(NETWORK_PHRASES)
    {
        ErrorKind::Network
    } else if has_code("400") || has_code("422") || has_phrase(INVALID_ARGUMENT_PHRASES) {
        ErrorKind::InvalidArgument
    } else {
        ErrorKind::Unknown
    }
}

/// Refine an `unknown` error by classifying its detail. Typed errors pass
/// through unchanged.
pub fn refine(error: ToolError) -> ToolError {
    if error.kind != ErrorKind::Unknown {
        return error;
    }
    let kind = classify_text(&error.detail);
    ToolError { kind, ..error }
}
