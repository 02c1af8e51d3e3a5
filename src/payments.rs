//! Payment provider client: checkout sessions and webhook signatures.
//!
//! The provider speaks a Stripe-shaped API. A `Disabled` variant returns
//! synthetic checkout sessions so development and tests run without keys.

use std::collections::HashMap;
use std::time::Duration;

use hmac::{Hmac, Mac};
use serde::Deserialize;
use sha2::Sha256;
use uuid::Uuid;

use crate::config::PaymentConfig;
use crate::error::{ApiResult, AppError};

type HmacSha256 = Hmac<Sha256>;

const SIGNATURE_TOLERANCE_SECS: i64 = 300;

#[derive(Debug, Clone)]
pub struct CheckoutSession {
    pub id: String,
    pub url: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct WebhookEvent {
    pub id: String,
    #[serde(rename = "type")]
    pub event_type: String,
    pub data: WebhookEventData,
}

#[derive(Debug, Clone, Deserialize)]
pub struct WebhookEventData {
    pub object: serde_json::Value,
}

impl WebhookEvent {
    pub fn checkout_session_id(&self) -> Option<&str> {
        self.data.object.get("id").and_then(|v| v.as_str())
    }
}

#[derive(Clone)]
pub enum PaymentClient {
    Disabled { public_base_url: String },
    Live {
        http: reqwest::Client,
        api_key: String,
        base_url: String,
    },
}

impl PaymentClient {
    pub fn from_config(config: &PaymentConfig, public_base_url: &str) -> Self {
        match &config.api_key {
            Some(api_key) => {
                let http = reqwest::Client::builder()
                    .timeout(Duration::from_secs(config.request_timeout_secs))
                    .build()
                    .expect("reqwest client build");
                PaymentClient::Live {
                    http,
                    api_key: api_key.clone(),
                    base_url: "https://api.stripe.com/v1".to_string(),
                }
            }
            None => PaymentClient::Disabled {
                public_base_url: public_base_url.trim_end_matches('/').to_string(),
            },
        }
    }

    /// Creates a deposit checkout session for a booking.
    pub async fn create_checkout_session(
        &self,
        booking_id: Uuid,
        amount_cents: i64,
        currency: &str,
        success_url: &str,
        cancel_url: &str,
    ) -> ApiResult<CheckoutSession> {
        match self {
            PaymentClient::Disabled { public_base_url } => {
                let id = format!("cs_test_{}", Uuid::new_v4().simple());
                Ok(CheckoutSession {
                    url: format!("{}/v1/checkout/{}", public_base_url, id),
                    id,
                })
            }
            PaymentClient::Live {
                http,
                api_key,
                base_url,
            } => {
                let params = [
                    ("mode", "payment".to_string()),
                    ("success_url", success_url.to_string()),
                    ("cancel_url", cancel_url.to_string()),
                    ("line_items[0][price_data][currency]", currency.to_string()),
                    (
                        "line_items[0][price_data][product_data][name]",
                        "Cleaning deposit".to_string(),
                    ),
                    (
                        "line_items[0][price_data][unit_amount]",
                        amount_cents.to_string(),
                    ),
                    ("line_items[0][quantity]", "1".to_string()),
                    ("metadata[booking_id]", booking_id.to_string()),
                ];

                let response = http
                    .post(format!("{}/checkout/sessions", base_url))
                    .basic_auth(api_key, None::<&str>)
                    .form(&params)
                    .send()
                    .await
                    .map_err(|e| AppError::dependency(format!("Payment provider unreachable: {}", e)))?;

                if !response.status().is_success() {
                    return Err(AppError::dependency(format!(
                        "Payment provider error: {}",
                        response.status()
                    )));
                }

                #[derive(Deserialize)]
                struct SessionResponse {
                    id: String,
                    url: String,
                }

                let session: SessionResponse = response
                    .json()
                    .await
                    .map_err(|e| AppError::dependency(format!("Payment provider response: {}", e)))?;

                Ok(CheckoutSession {
                    id: session.id,
                    url: session.url,
                })
            }
        }
    }
}

/// Verifies a `t=...,v1=...` signature header over `"{t}.{payload}"` and
/// enforces the timestamp tolerance. Returns the parsed event.
pub fn verify_webhook_signature(
    payload: &str,
    signature_header: &str,
    secret: &str,
) -> ApiResult<WebhookEvent> {
    let parts: HashMap<&str, &str> = signature_header
        .split(',')
        .filter_map(|part| {
            let mut split = part.trim().splitn(2, '=');
            Some((split.next()?, split.next()?))
        })
        .collect();

    let timestamp = parts
        .get("t")
        .ok_or_else(|| AppError::integration_rejected("Webhook signature missing timestamp"))?;
    let received_sig = parts
        .get("v1")
        .ok_or_else(|| AppError::integration_rejected("Webhook signature missing v1"))?;

    let signed_payload = format!("{}.{}", timestamp, payload);

    let mut mac =
        HmacSha256::new_from_slice(secret.as_bytes()).expect("HMAC accepts any key length");
    mac.update(signed_payload.as_bytes());
    let expected_sig = hex::encode(mac.finalize().into_bytes());

    let expected = expected_sig.as_bytes();
    let provided = received_sig.as_bytes();
    let mut diff = if expected.len() == provided.len() { 0u8 } else { 1u8 };
    for (a, b) in expected.iter().zip(provided.iter()) {
        diff |= a ^ b;
    }
    if diff != 0 {
        return Err(AppError::integration_rejected("Webhook signature mismatch"));
    }

    let timestamp_i64: i64 = timestamp
        .parse()
        .map_err(|_| AppError::integration_rejected("Webhook timestamp invalid"))?;
    let now = chrono::Utc::now().timestamp();
    if (now - timestamp_i64).abs() > SIGNATURE_TOLERANCE_SECS {
        return Err(AppError::integration_rejected("Webhook timestamp outside tolerance"));
    }

    serde_json::from_str(payload)
        .map_err(|e| AppError::integration_rejected(format!("Webhook payload invalid: {}", e)))
}

/// Builds a signature header for tests and the disabled-mode simulator.
pub fn sign_webhook_payload(payload: &str, secret: &str, timestamp: i64) -> String {
    let signed_payload = format!("{}.{}", timestamp, payload);
    let mut mac =
        HmacSha256::new_from_slice(secret.as_bytes()).expect("HMAC accepts any key length");
    mac.update(signed_payload.as_bytes());
    format!("t={},v1={}", timestamp, hex::encode(mac.finalize().into_bytes()))
}

#[cfg(test)]
mod tests {
    use super::*;

    const SECRET: &str = "whsec_unit";

    fn event_json(event_id: &str, session_id: &str) -> String {
        serde_json::json!({
            "id": event_id,
            "type": "checkout.session.completed",
            "data": { "object": { "id": session_id } }
        })
        .to_string()
    }

    #[test]
    fn test_valid_signature_round_trip() {
        let payload = event_json("evt_1", "cs_123");
        let header = sign_webhook_payload(&payload, SECRET, chrono::Utc::now().timestamp());

        let event = verify_webhook_signature(&payload, &header, SECRET).unwrap();
        assert_eq!(event.id, "evt_1");
        assert_eq!(event.checkout_session_id(), Some("cs_123"));
    }

    #[test]
    fn test_wrong_secret_rejected() {
        let payload = event_json("evt_1", "cs_123");
        let header = sign_webhook_payload(&payload, "whsec_other", chrono::Utc::now().timestamp());

        let err = verify_webhook_signature(&payload, &header, SECRET).unwrap_err();
        assert_eq!(err.kind, crate::error::ErrorKind::IntegrationRejected);
    }

    #[test]
    fn test_stale_timestamp_rejected() {
        let payload = event_json("evt_1", "cs_123");
        let stale = chrono::Utc::now().timestamp() - 3600;
        let header = sign_webhook_payload(&payload, SECRET, stale);

        let err = verify_webhook_signature(&payload, &header, SECRET).unwrap_err();
        assert!(err.detail.contains("tolerance"));
    }

    #[test]
    fn test_tampered_payload_rejected() {
        let payload = event_json("evt_1", "cs_123");
        let header = sign_webhook_payload(&payload, SECRET, chrono::Utc::now().timestamp());
        let tampered = event_json("evt_1", "cs_456");

        assert!(verify_webhook_signature(&tampered, &header, SECRET).is_err());
    }

    #[test]
    fn test_missing_header_parts_rejected() {
        let payload = event_json("evt_1", "cs_123");
        assert!(verify_webhook_signature(&payload, "v1=abc", SECRET).is_err());
        assert!(verify_webhook_signature(&payload, "t=123", SECRET).is_err());
    }

    #[tokio::test]
    async fn test_disabled_client_returns_synthetic_session() {
        let client = PaymentClient::Disabled {
            public_base_url: "http://localhost:8080".to_string(),
        };
        let session = client
            .create_checkout_session(Uuid::new_v4(), 5000, "usd", "http://x/s", "http://x/c")
            .await
            .unwrap();
        assert!(session.id.starts_with("cs_test_"));
        assert!(session.url.contains(&session.id));
    }
}
