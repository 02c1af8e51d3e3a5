//! Outbox delivery: one handler per event kind.
//!
//! Handlers are idempotent — they receive the payload plus dedupe key and
//! must tolerate re-delivery. Export webhooks pass an SSRF guard (hostname
//! allowlist, scheme policy, private-range DNS check) before any bytes
//! leave the process.

use std::time::Duration;

use redis::AsyncCommands;
use tracing::{debug, instrument};

use crate::config::ExportConfig;
use crate::email::{EmailMessage, EmailSender};
use crate::models::OutboxEvent;
use crate::netutil::is_private_or_local;
use crate::storage::StorageGateway;
use crate::telemetry::metrics::record_email_outcome;
use crate::telemetry::redact::redact;

use super::{BackoffPolicy, KIND_EMAIL, KIND_EXPORT_WEBHOOK, KIND_INTEGRATION_EVENT, KIND_STORAGE_DELETE};

const INTEGRATION_STREAM: &str = "maidflow:events";

#[derive(Debug)]
pub enum DeliveryOutcome {
    Delivered,
    /// Transport-level trouble; retry with backoff.
    Transient(String),
    /// The destination rejected the payload (4xx); retrying cannot help.
    Poison(String),
    /// The destination failed the SSRF policy.
    Blocked(String),
}

#[derive(Clone)]
pub struct Dispatcher {
    pub email: EmailSender,
    pub storage: StorageGateway,
    pub redis_pool: Option<deadpool_redis::Pool>,
    pub export: ExportConfig,
    pub http: reqwest::Client,
    pub policy: BackoffPolicy,
}

impl Dispatcher {
    pub fn new(
        email: EmailSender,
        storage: StorageGateway,
        redis_pool: Option<deadpool_redis::Pool>,
        export: ExportConfig,
        policy: BackoffPolicy,
    ) -> Self {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(export.request_timeout_secs))
            .redirect(reqwest::redirect::Policy::none())
            .build()
            .expect("reqwest client build");

        Self {
            email,
            storage,
            redis_pool,
            export,
            http,
            policy,
        }
    }

    #[instrument(skip(self, event), fields(event_id = %event.id, kind = %event.kind))]
    pub async fn deliver(&self, event: &OutboxEvent) -> DeliveryOutcome {
        match event.kind.as_str() {
            KIND_EMAIL => self.deliver_email(event).await,
            KIND_EXPORT_WEBHOOK => self.deliver_export(event).await,
            KIND_INTEGRATION_EVENT => self.deliver_integration(event).await,
            KIND_STORAGE_DELETE => self.deliver_storage_delete(event).await,
            other => DeliveryOutcome::Poison(format!("unknown_kind:{}", other)),
        }
    }

    async fn deliver_email(&self, event: &OutboxEvent) -> DeliveryOutcome {
        let message: EmailMessage = match serde_json::from_value(event.payload.clone()) {
            Ok(m) => m,
            Err(e) => return DeliveryOutcome::Poison(format!("bad_payload:{}", e)),
        };

        match self.email.send(&message).await {
            Ok(()) => {
                record_email_outcome(&message.template, "sent");
                DeliveryOutcome::Delivered
            }
            Err(e) if e.kind == crate::error::ErrorKind::IntegrationRejected => {
                record_email_outcome(&message.template, "rejected");
                DeliveryOutcome::Poison(redact(&e.detail))
            }
            Err(e) => {
                record_email_outcome(&message.template, "error");
                DeliveryOutcome::Transient(redact(&e.detail))
            }
        }
    }

    async fn deliver_export(&self, event: &OutboxEvent) -> DeliveryOutcome {
        let url = event
            .payload
            .get("target_url")
            .and_then(|v| v.as_str())
            .map(|s| s.to_string())
            .or_else(|| self.export.webhook_url.clone());

        let Some(url) = url else {
            return DeliveryOutcome::Poison("missing_url".to_string());
        };

        if let Err(reason) = validate_export_url(&url, &self.export).await {
            return DeliveryOutcome::Blocked(reason);
        }

        let body = event
            .payload
            .get("payload")
            .cloned()
            .unwrap_or_else(|| serde_json::json!({}));

        match self.http.post(&url).json(&body).send().await {
            Ok(response) if response.status().is_success() => DeliveryOutcome::Delivered,
            Ok(response) if response.status().is_client_error() => {
                DeliveryOutcome::Poison(format!("status_{}", response.status().as_u16()))
            }
            Ok(response) => {
                DeliveryOutcome::Transient(format!("status_{}", response.status().as_u16()))
            }
            Err(e) => DeliveryOutcome::Transient(redact(&e.to_string())),
        }
    }

    /// Integration events go to a Redis stream for downstream consumers.
    /// With no Redis configured there is no consumer either, so the event
    /// completes immediately.
    async fn deliver_integration(&self, event: &OutboxEvent) -> DeliveryOutcome {
        let Some(pool) = &self.redis_pool else {
            debug!("No Redis configured, integration event completes without streaming");
            return DeliveryOutcome::Delivered;
        };

        let mut conn = match pool.get().await {
            Ok(conn) => conn,
            Err(e) => return DeliveryOutcome::Transient(format!("redis_pool:{}", e)),
        };

        let data = serde_json::json!({
            "id": event.id.to_string(),
            "org_id": event.org_id.to_string(),
            "dedupe_key": event.dedupe_key,
            "payload": event.payload,
            "created_at": event.created_at.to_string(),
        });

        let result: Result<String, _> = conn
            .xadd(
                INTEGRATION_STREAM,
                "*",
                &[("dedupe_key", event.dedupe_key.as_str()), ("data", &data.to_string())],
            )
            .await;

        match result {
            Ok(_) => DeliveryOutcome::Delivered,
            Err(e) => DeliveryOutcome::Transient(format!("redis:{}", e)),
        }
    }

    async fn deliver_storage_delete(&self, event: &OutboxEvent) -> DeliveryOutcome {
        let Some(key) = event.payload.get("key").and_then(|v| v.as_str()) else {
            return DeliveryOutcome::Poison("missing_key".to_string());
        };

        match self.storage.delete(key).await {
            Ok(()) => DeliveryOutcome::Delivered,
            Err(e) if e.kind == crate::error::ErrorKind::Validation => {
                DeliveryOutcome::Poison(e.detail)
            }
            Err(e) => DeliveryOutcome::Transient(redact(&e.detail)),
        }
    }
}

/// SSRF guard for export destinations. Checks scheme, hostname allowlist,
/// then resolves the host and refuses private and link-local ranges.
pub async fn validate_export_url(url: &str, config: &ExportConfig) -> Result<(), String> {
    let parsed = match reqwest::Url::parse(url) {
        Ok(u) => u,
        Err(_) => return Err("invalid_url".to_string()),
    };

    match parsed.scheme() {
        "https" => {}
        "http" if !config.https_only => {}
        "http" => return Err("https_required".to_string()),
        _ => return Err("unsupported_scheme".to_string()),
    }

    let Some(host) = parsed.host_str() else {
        return Err("missing_host".to_string());
    };

    if !config.allowed_hosts.is_empty()
        && !config
            .allowed_hosts
            .iter()
            .any(|allowed| allowed.eq_ignore_ascii_case(host))
    {
        return Err("host_not_allowed".to_string());
    }

    if config.block_private_ips {
        // Literal IPs short-circuit; names are resolved and every address
        // must be public.
        if let Ok(ip) = host.parse::<std::net::IpAddr>() {
            if is_private_or_local(ip) {
                return Err("private_address_blocked".to_string());
            }
        } else {
            let port = parsed.port_or_known_default().unwrap_or(443);
            let addrs = tokio::net::lookup_host((host, port))
                .await
                .map_err(|_| "dns_failure".to_string())?;

            let mut any = false;
            for addr in addrs {
                any = true;
                if is_private_or_local(addr.ip()) {
                    return Err("private_address_blocked".to_string());
                }
            }
            if !any {
                return Err("dns_failure".to_string());
            }
        }
    }

    Ok(())
}

/// Error detail safe to persist on the row: redacted and bounded.
pub fn bounded_error(detail: &str) -> String {
    let redacted = redact(detail);
    if redacted.len() > 500 {
        let mut end = 500;
        while end > 0 && !redacted.is_char_boundary(end) {
            end -= 1;
        }
        redacted[..end].to_string()
    } else {
        redacted
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn export_config() -> ExportConfig {
        ExportConfig {
            webhook_url: None,
            allowed_hosts: vec!["hooks.example.com".to_string()],
            https_only: true,
            block_private_ips: true,
            request_timeout_secs: 10,
        }
    }

    #[tokio::test]
    async fn test_https_required() {
        let err = validate_export_url("http://hooks.example.com/x", &export_config())
            .await
            .unwrap_err();
        assert_eq!(err, "https_required");
    }

    #[tokio::test]
    async fn test_http_allowed_when_policy_relaxed() {
        let mut config = export_config();
        config.https_only = false;
        config.block_private_ips = false;
        assert!(validate_export_url("http://hooks.example.com/x", &config)
            .await
            .is_ok());
    }

    #[tokio::test]
    async fn test_host_allowlist_enforced() {
        let err = validate_export_url("https://evil.example.net/x", &export_config())
            .await
            .unwrap_err();
        assert_eq!(err, "host_not_allowed");
    }

    #[tokio::test]
    async fn test_private_literal_blocked() {
        let mut config = export_config();
        config.allowed_hosts = vec!["127.0.0.1".to_string()];
        let err = validate_export_url("https://127.0.0.1/x", &config)
            .await
            .unwrap_err();
        assert_eq!(err, "private_address_blocked");
    }

    #[tokio::test]
    async fn test_link_local_literal_blocked() {
        let mut config = export_config();
        config.allowed_hosts = vec!["169.254.169.254".to_string()];
        let err = validate_export_url("https://169.254.169.254/latest/meta-data", &config)
            .await
            .unwrap_err();
        assert_eq!(err, "private_address_blocked");
    }

    #[tokio::test]
    async fn test_garbage_url_rejected() {
        let err = validate_export_url("not a url", &export_config())
            .await
            .unwrap_err();
        assert_eq!(err, "invalid_url");
    }

    #[test]
    fn test_bounded_error_truncates_and_redacts() {
        let long = format!("send to ops@example.com {}", "x".repeat(600));
        let bounded = bounded_error(&long);
        assert!(bounded.len() <= 500);
        assert!(!bounded.contains("ops@example.com"));
    }
}
