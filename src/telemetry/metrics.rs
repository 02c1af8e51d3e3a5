//! Application metrics using the metrics crate.
//!
//! Path labels are route templates, never raw paths, so cardinality stays
//! bounded. The scrape endpoint is token-gated when a token is configured.

use axum::{
    extract::State,
    http::{header, HeaderMap, StatusCode},
    response::IntoResponse,
};
use metrics::{counter, gauge, histogram};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use std::sync::OnceLock;

static PROMETHEUS_HANDLE: OnceLock<PrometheusHandle> = OnceLock::new();

#[derive(Clone)]
pub struct MetricsState {
    handle: Option<PrometheusHandle>,
    token: Option<String>,
}

impl MetricsState {
    pub fn new(enabled: bool, token: Option<String>) -> Self {
        if !enabled {
            return Self {
                handle: None,
                token,
            };
        }

        let handle = PROMETHEUS_HANDLE.get_or_init(|| {
            PrometheusBuilder::new()
                .install_recorder()
                .expect("Failed to install Prometheus recorder")
        });

        Self {
            handle: Some(handle.clone()),
            token,
        }
    }

    pub fn disabled() -> Self {
        Self {
            handle: None,
            token: None,
        }
    }

    pub fn render(&self) -> Option<String> {
        self.handle.as_ref().map(|h| h.render())
    }

    pub fn is_enabled(&self) -> bool {
        self.handle.is_some()
    }

    fn authorize(&self, headers: &HeaderMap) -> bool {
        let Some(expected) = &self.token else {
            return true;
        };

        headers
            .get(header::AUTHORIZATION)
            .and_then(|h| h.to_str().ok())
            .and_then(|h| h.strip_prefix("Bearer "))
            .map(|provided| provided == expected)
            .unwrap_or(false)
    }
}

pub async fn metrics_handler(
    State(state): State<MetricsState>,
    headers: HeaderMap,
) -> impl IntoResponse {
    if !state.authorize(&headers) {
        return (StatusCode::UNAUTHORIZED, "Unauthorized".to_string());
    }

    match state.render() {
        Some(metrics) => (StatusCode::OK, metrics),
        None => (
            StatusCode::SERVICE_UNAVAILABLE,
            "Metrics not enabled".to_string(),
        ),
    }
}

pub fn record_request_latency(
    method: &str,
    path: &str,
    status: u16,
    duration: std::time::Duration,
) {
    histogram!(
        "http_request_duration_seconds",
        "method" => method.to_string(),
        "path" => path.to_string(),
        "status" => status.to_string()
    )
    .record(duration.as_secs_f64());

    if status >= 500 {
        counter!(
            "http_server_errors_total",
            "method" => method.to_string(),
            "path" => path.to_string()
        )
        .increment(1);
    }
}

pub fn record_auth_attempt(action: &str, outcome: &str) {
    counter!(
        "auth_attempts_total",
        "action" => action.to_string(),
        "outcome" => outcome.to_string()
    )
    .increment(1);
}

pub fn record_outbox_outcome(kind: &str, result: &str) {
    counter!(
        "outbox_events_total",
        "kind" => kind.to_string(),
        "result" => result.to_string()
    )
    .increment(1);
}

pub fn record_booking_action(action: &str) {
    counter!(
        "booking_lifecycle_total",
        "action" => action.to_string()
    )
    .increment(1);
}

pub fn record_webhook_outcome(result: &str) {
    counter!(
        "payment_webhook_total",
        "result" => result.to_string()
    )
    .increment(1);
}

pub fn record_email_outcome(template: &str, status: &str) {
    counter!(
        "emails_total",
        "template" => template.to_string(),
        "status" => status.to_string()
    )
    .increment(1);
}

pub fn record_rate_limit_fail_open(group: &str) {
    counter!(
        "rate_limiter_fail_open_total",
        "group" => group.to_string()
    )
    .increment(1);
}

pub fn record_job_heartbeat_age(job: &str, age_secs: f64) {
    gauge!(
        "job_heartbeat_age_seconds",
        "job" => job.to_string()
    )
    .set(age_secs);
}

pub fn record_job_iteration(job: &str, outcome: &str) {
    counter!(
        "job_iterations_total",
        "job" => job.to_string(),
        "outcome" => outcome.to_string()
    )
    .increment(1);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_metrics_state_disabled() {
        let state = MetricsState::disabled();
        assert!(!state.is_enabled());
        assert!(state.render().is_none());
    }

    #[test]
    fn test_authorize_without_token_is_open() {
        let state = MetricsState::disabled();
        assert!(state.authorize(&HeaderMap::new()));
    }

    #[test]
    fn test_authorize_with_token() {
        let state = MetricsState {
            handle: None,
            token: Some("scrape-token".to_string()),
        };

        assert!(!state.authorize(&HeaderMap::new()));

        let mut headers = HeaderMap::new();
        headers.insert(
            header::AUTHORIZATION,
            "Bearer scrape-token".parse().unwrap(),
        );
        assert!(state.authorize(&headers));

        let mut wrong = HeaderMap::new();
        wrong.insert(header::AUTHORIZATION, "Bearer nope".parse().unwrap());
        assert!(!state.authorize(&wrong));
    }
}
