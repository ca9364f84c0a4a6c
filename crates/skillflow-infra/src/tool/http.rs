//! HTTP tool adapter.
//!
//! `HttpTool` sends the argument mapping as a JSON body (query string for
//! `GET`) and maps the response status onto the tool error taxonomy.

use std::collections::BTreeMap;
use std::time::Duration;

use reqwest::{Method, StatusCode};
use serde_json::{Map, Value};
use skillflow_core::tool::Tool;
use skillflow_core::workflow::template::value_to_string;
use skillflow_types::tool::{ErrorKind, ToolError};

use super::AdapterError;

const USER_AGENT: &str = concat!("skillflow/", env!("CARGO_PKG_VERSION"));

/// Longest response excerpt carried in an error detail.
const MAX_DETAIL_CHARS: usize = 2_000;

/// A tool backed by an HTTP endpoint.
#[derive(Debug, Clone)]
pub struct HttpTool {
    name: String,
    url: String,
    method: Method,
    headers: BTreeMap<String, String>,
    client: reqwest::Client,
}

impl HttpTool {
    pub fn new(
        name: impl Into<String>,
        url: impl Into<String>,
        method: &str,
        headers: BTreeMap<String, String>,
    ) -> Result<Self, AdapterError> {
        let method = Method::from_bytes(method.to_ascii_uppercase().as_bytes())
            .map_err(|_| AdapterError::InvalidMethod(method.to_string()))?;
        let client = reqwest::Client::builder().user_agent(USER_AGENT).build()?;
        Ok(Self {
            name: name.into(),
            url: url.into(),
            method,
            headers,
            client,
        })
    }

    async fn send(&self, args: &Map<String, Value>, timeout: Duration) -> Result<Value, ToolError> {
        let mut request = self
            .client
            .request(self.method.clone(), &self.url)
            .timeout(timeout);
        for (key, value) in &self.headers {
            request = request.header(key.as_str(), value.as_str());
        }
        request = if self.method == Method::GET {
            let query: Vec<(&str, String)> = args
                .iter()
                .map(|(k, v)| (k.as_str(), value_to_string(v)))
                .collect();
            request.query(&query)
        } else {
            request.json(args)
        };

        let response = request.send().await.map_err(|e| {
            ToolError::network(format!("{} {} failed: {e}", self.method, self.url))
        })?;

        let status = response.status();
        let body = response.text().await.map_err(|e| {
            ToolError::network(format!("failed to read response from {}: {e}", self.url))
        })?;

        tracing::debug!(
            tool = %self.name,
            status = status.as_u16(),
            body_len = body.len(),
            "http tool responded"
        );

        if let Some(kind) = status_kind(status) {
            let excerpt: String = body.trim().chars().take(MAX_DETAIL_CHARS).collect();
            return Err(ToolError::new(kind, format!("HTTP {status}: {excerpt}")));
        }

        if body.trim().is_empty() {
            return Ok(Value::Null);
        }
        Ok(serde_json::from_str(&body).unwrap_or(Value::String(body)))
    }
}

impl Tool for HttpTool {
    fn name(&self) -> &str {
        &self.name
    }

    fn description(&self) -> &str {
        &self.url
    }

    async fn call(&self, args: &Map<String, Value>, timeout: Duration) -> Result<Value, ToolError> {
        self.send(args, timeout).await
    }
}

/// Error kind for a response status; `None` for success.
fn status_kind(status: StatusCode) -> Option<ErrorKind> {
    if status.is_success() {
        return None;
    }
    Some(match status.as_u16() {
        401 | 403 => ErrorKind::Auth,
        404 => ErrorKind::NotFound,
        400 | 422 => ErrorKind::InvalidArgument,
        429 => ErrorKind::RateLimited,
        500..=599 => ErrorKind::Network,
        _ => ErrorKind::Unknown,
    })
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
