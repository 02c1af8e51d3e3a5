//! Request ID middleware.
//!
//! Assigns (or adopts) a request id, instruments the request span with it,
//! echoes it in the `x-request-id` response header, and stamps it into
//! Problem-Details error bodies so clients can correlate support reports.

use axum::{
    body::Body,
    extract::Request,
    http::{header::HeaderName, HeaderValue},
    middleware::Next,
    response::Response,
};
use std::sync::Arc;
use tracing::{info_span, Instrument};
use uuid::Uuid;

pub static REQUEST_ID_HEADER: HeaderName = HeaderName::from_static("x-request-id");

const PROBLEM_CONTENT_TYPE: &str = "application/problem+json";
const MAX_PROBLEM_BODY: usize = 64 * 1024;

#[derive(Debug, Clone)]
pub struct RequestId(pub Arc<str>);

impl RequestId {
    pub fn new() -> Self {
        Self(Arc::from(Uuid::new_v4().to_string()))
    }

    pub fn from_string(id: impl Into<String>) -> Self {
        Self(Arc::from(id.into()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for RequestId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for RequestId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

pub async fn request_id_middleware(mut request: Request, next: Next) -> Response {
    let request_id = extract_or_generate_request_id(&request);

    request.extensions_mut().insert(request_id.clone());

    let method = request.method().clone();
    let uri = request.uri().clone();
    let span = info_span!(
        "request",
        request_id = %request_id,
        method = %method,
        uri = %uri,
    );

    let response = next.run(request).instrument(span).await;
    let response = stamp_problem_body(response, &request_id).await;

    add_request_id_to_response(response, &request_id)
}

fn extract_or_generate_request_id(request: &Request) -> RequestId {
    if let Some(id) = request.headers().get(&REQUEST_ID_HEADER) {
        if let Ok(id_str) = id.to_str() {
            if is_valid_request_id(id_str) {
                return RequestId::from_string(id_str);
            }
        }
    }

    RequestId::new()
}

fn is_valid_request_id(id: &str) -> bool {
    !id.is_empty()
        && id.len() <= 128
        && id
            .chars()
            .all(|c| c.is_alphanumeric() || c == '-' || c == '_')
}

fn add_request_id_to_response(mut response: Response, request_id: &RequestId) -> Response {
    if let Ok(header_value) = HeaderValue::from_str(request_id.as_str()) {
        response
            .headers_mut()
            .insert(REQUEST_ID_HEADER.clone(), header_value);
    }
    response
}

/// Rewrites Problem-Details bodies to carry the request id. Success bodies
/// and oversized/streaming error bodies pass through untouched.
async fn stamp_problem_body(response: Response, request_id: &RequestId) -> Response {
    let is_problem = response
        .headers()
        .get(axum::http::header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .map(|v| v.starts_with(PROBLEM_CONTENT_TYPE))
        .unwrap_or(false);

    if !is_problem || !response.status().is_client_error() && !response.status().is_server_error() {
        return response;
    }

    let (parts, body) = response.into_parts();
    let bytes = match axum::body::to_bytes(body, MAX_PROBLEM_BODY).await {
        Ok(bytes) => bytes,
        Err(_) => return Response::from_parts(parts, Body::empty()),
    };

    let stamped = match serde_json::from_slice::<serde_json::Value>(&bytes) {
        Ok(mut value) => {
            if let Some(obj) = value.as_object_mut() {
                obj.insert(
                    "request_id".to_string(),
                    serde_json::Value::String(request_id.as_str().to_string()),
                );
            }
            serde_json::to_vec(&value).unwrap_or_else(|_| bytes.to_vec())
        }
        Err(_) => bytes.to_vec(),
    };

    let mut response = Response::from_parts(parts, Body::from(stamped));
    response.headers_mut().remove(axum::http::header::CONTENT_LENGTH);
    response
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::response::IntoResponse;

    #[test]
    fn test_request_id_generation() {
        let id1 = RequestId::new();
        let id2 = RequestId::new();
        assert_ne!(id1.as_str(), id2.as_str());
    }

    #[test]
    fn test_request_id_from_string() {
        let id = RequestId::from_string("test-request-id-123");
        assert_eq!(id.as_str(), "test-request-id-123");
    }

    #[test]
    fn test_valid_request_id() {
        assert!(is_valid_request_id("abc123"));
        assert!(is_valid_request_id("abc-123_xyz"));
        assert!(is_valid_request_id("a".repeat(128).as_str()));
    }

    #[test]
    fn test_invalid_request_id() {
        assert!(!is_valid_request_id(""));
        assert!(!is_valid_request_id("abc 123"));
        assert!(!is_valid_request_id("abc/123"));
        assert!(!is_valid_request_id("a".repeat(129).as_str()));
    }

    #[tokio::test]
    async fn test_problem_body_gets_request_id() {
        let response = crate::error::AppError::not_found("missing").into_response();
        let request_id = RequestId::from_string("req-42");

        let stamped = stamp_problem_body(response, &request_id).await;
        let bytes = axum::body::to_bytes(stamped.into_body(), MAX_PROBLEM_BODY)
            .await
            .unwrap();
        let value: serde_json::Value = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(value["request_id"], "req-42");
        assert_eq!(value["status"], 404);
    }

    #[tokio::test]
    async fn test_plain_json_untouched() {
        let response = axum::Json(serde_json::json!({"ok": true})).into_response();
        let request_id = RequestId::from_string("req-43");

        let stamped = stamp_problem_body(response, &request_id).await;
        let bytes = axum::body::to_bytes(stamped.into_body(), MAX_PROBLEM_BODY)
            .await
            .unwrap();
        let value: serde_json::Value = serde_json::from_slice(&bytes).unwrap();
        assert!(value.get("request_id").is_none());
    }
}
