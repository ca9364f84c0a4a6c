//! Response envelope shared by every endpoint.
//!
//! Success: `{ "data": ..., "meta": {...}, "_links": {...} }`.
//! Failure: `{ "data": null, "meta": {...}, "errors": [{ "code", "message" }] }`.

use std::collections::BTreeMap;
use std::time::Instant;

use serde::Serialize;
use uuid::Uuid;

/// Envelope around an endpoint's payload.
#[derive(Debug, Serialize)]
pub struct ApiResponse<T: Serialize> {
    pub data: Option<T>,
    pub meta: ApiMeta,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub errors: Vec<ApiErrorDetail>,
    #[serde(rename = "_links", skip_serializing_if = "BTreeMap::is_empty")]
    pub links: BTreeMap<String, String>,
}

#[derive(Debug, Serialize)]
pub struct ApiMeta {
    pub request_id: String,
    pub timestamp: String,
    pub response_time_ms: u64,
}

impl ApiMeta {
    /// Metadata for a request that began at `started`.
    pub fn since(request_id: impl Into<String>, started: Instant) -> Self {
        Self {
            request_id: request_id.into(),
            timestamp: chrono::Utc::now().to_rfc3339(),
            response_time_ms: started.elapsed().as_millis() as u64,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct ApiErrorDetail {
    /// Machine-readable code such as `RUN_NOT_FOUND`.
    pub code: String,
    pub message: String,
}

/// Fresh time-ordered id for one request.
pub fn new_request_id() -> String {
    Uuid::now_v7().to_string()
}

impl<T: Serialize> ApiResponse<T> {
    pub fn success(data: T, meta: ApiMeta) -> Self {
        Self {
            data: Some(data),
            meta,
            errors: Vec::new(),
            links: BTreeMap::new(),
        }
    }

    pub fn with_link(mut self, rel: &str, href: impl Into<String>) -> Self {
        self.links.insert(rel.to_string(), href.into());
        self
    }
}

impl ApiResponse<()> {
    /// Error envelope; the request id is unknown once a handler has bailed.
    pub fn failure(code: &str, message: impl Into<String>) -> Self {
        Self {
            data: None,
            meta: ApiMeta {
                request_id: String::new(),
                timestamp: chrono::Utc::now().to_rfc3339(),
                response_time_ms: 0,
            },
            errors: vec![ApiErrorDetail {
                code: code.to_string(),
                message: message.into(),
            }],
            links: BTreeMap::new(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_success_envelope_shape() {
        let body = ApiResponse::success(json!({ "ok": true }), ApiMeta::since("req-1", Instant::now()))
            .with_link("self", "/api/v1/tools");
        let value = serde_json::to_value(&body).unwrap();
        assert_eq!(value["data"]["ok"], true);
        assert_eq!(value["meta"]["request_id"], "req-1");
        assert_eq!(value["_links"]["self"], "/api/v1/tools");
        assert!(value.get("errors").is_none());
    }

    #[test]
    fn test_failure_envelope_shape() {
        let value = serde_json::to_value(ApiResponse::failure("RUN_NOT_FOUND", "gone")).unwrap();
        assert!(value["data"].is_null());
        assert_eq!(value["errors"][0]["code"], "RUN_NOT_FOUND");
        assert!(value.get("_links").is_none());
    }
}
