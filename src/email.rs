//! Outgoing email.
//!
//! Three backends behind one adapter: log-only (development default), SMTP
//! via lettre, and an HTTP delivery API. Delivery always happens from the
//! outbox drain loop, never inline in a request handler.

use std::time::Duration;

use lettre::transport::smtp::authentication::Credentials;
use lettre::{Message, SmtpTransport, Transport};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::config::{EmailBackendKind, EmailConfig};
use crate::error::{ApiResult, AppError};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EmailMessage {
    pub recipient: String,
    pub subject: String,
    pub body: String,
    pub template: String,
}

#[derive(Clone)]
pub enum EmailSender {
    /// Logs instead of sending. Messages count as delivered.
    Log,
    Smtp {
        host: String,
        credentials: Option<(String, String)>,
        from: String,
    },
    HttpApi {
        client: reqwest::Client,
        endpoint: String,
        api_key: Option<String>,
        from: String,
    },
}

impl EmailSender {
    pub fn from_config(config: &EmailConfig) -> ApiResult<Self> {
        match config.backend {
            EmailBackendKind::Log => Ok(EmailSender::Log),
            EmailBackendKind::Smtp => {
                let host = config
                    .smtp_host
                    .clone()
                    .ok_or_else(|| AppError::internal("SMTP_HOST is required for the smtp backend"))?;
                let credentials = match (&config.smtp_user, &config.smtp_password) {
                    (Some(u), Some(p)) => Some((u.clone(), p.clone())),
                    _ => None,
                };
                Ok(EmailSender::Smtp {
                    host,
                    credentials,
                    from: config.from_address.clone(),
                })
            }
            EmailBackendKind::HttpApi => {
                let endpoint = config.http_endpoint.clone().ok_or_else(|| {
                    AppError::internal("EMAIL_HTTP_ENDPOINT is required for the http backend")
                })?;
                let client = reqwest::Client::builder()
                    .timeout(Duration::from_secs(config.send_timeout_secs))
                    .build()
                    .map_err(|e| AppError::internal(format!("HTTP client build failed: {}", e)))?;
                Ok(EmailSender::HttpApi {
                    client,
                    endpoint,
                    api_key: config.http_api_key.clone(),
                    from: config.from_address.clone(),
                })
            }
        }
    }

    pub async fn send(&self, message: &EmailMessage) -> ApiResult<()> {
        match self {
            EmailSender::Log => {
                info!(
                    template = %message.template,
                    subject = %message.subject,
                    "Email (log backend, not sent)"
                );
                Ok(())
            }
            EmailSender::Smtp {
                host,
                credentials,
                from,
            } => {
                let email = Message::builder()
                    .from(from.parse().map_err(|_| {
                        AppError::internal("Configured from address is invalid")
                    })?)
                    .to(message
                        .recipient
                        .parse()
                        .map_err(|_| AppError::validation("Invalid recipient address"))?)
                    .subject(&message.subject)
                    .body(message.body.clone())
                    .map_err(|e| AppError::internal(format!("Email build failed: {}", e)))?;

                let mut builder = SmtpTransport::relay(host)
                    .map_err(|e| AppError::dependency(format!("SMTP relay setup failed: {}", e)))?;
                if let Some((user, password)) = credentials {
                    builder = builder.credentials(Credentials::new(user.clone(), password.clone()));
                }
                let transport = builder.build();

                // lettre's SmtpTransport is blocking.
                let result =
                    tokio::task::spawn_blocking(move || transport.send(&email))
                        .await
                        .map_err(|e| AppError::internal(format!("Send task failed: {}", e)))?;

                result
                    .map(|_| ())
                    .map_err(|e| AppError::dependency(format!("SMTP send failed: {}", e)))
            }
            EmailSender::HttpApi {
                client,
                endpoint,
                api_key,
                from,
            } => {
                let mut request = client.post(endpoint).json(&serde_json::json!({
                    "from": from,
                    "to": message.recipient,
                    "subject": message.subject,
                    "text": message.body,
                }));
                if let Some(key) = api_key {
                    request = request.bearer_auth(key);
                }

                let response = request
                    .send()
                    .await
                    .map_err(|e| AppError::dependency(format!("Email API unreachable: {}", e)))?;

                if response.status().is_success() {
                    debug!(template = %message.template, "Email accepted by delivery API");
                    Ok(())
                } else if response.status().is_client_error() {
                    Err(AppError::integration_rejected(format!(
                        "Email API rejected the message: {}",
                        response.status()
                    )))
                } else {
                    Err(AppError::dependency(format!(
                        "Email API error: {}",
                        response.status()
                    )))
                }
            }
        }
    }
}
