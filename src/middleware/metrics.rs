//! Request metrics middleware.

use axum::{extract::MatchedPath, extract::Request, middleware::Next, response::Response};

use crate::telemetry::metrics::record_request_latency;

pub async fn metrics_middleware(request: Request, next: Next) -> Response {
    let method = request.method().to_string();
    // Route template, not the raw path: `/v1/admin/leads/{id}` stays one
    // label no matter how many leads exist.
    let path = request
        .extensions()
        .get::<MatchedPath>()
        .map(|p| p.as_str().to_string())
        .unwrap_or_else(|| "unmatched".to_string());
    let start = std::time::Instant::now();

    let response = next.run(request).await;

    record_request_latency(&method, &path, response.status().as_u16(), start.elapsed());

    response
}
