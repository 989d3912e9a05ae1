use std::collections::HashMap;

use async_trait::async_trait;
use chrono::Utc;
use lettre::message::Message;
use lettre::transport::smtp::authentication::Credentials;
use lettre::{AsyncSmtpTransport, AsyncTransport, Tokio1Executor};
use reqwest::Client;
use serde_json::json;

use super::Provider;
use crate::types::{Channel, ErrorType, Notification, SendOutcome, User};

/// Either SendGrid (HTTP API) or SMTP (`lettre`), chosen at construction
/// time by which credentials are configured — the same pattern the pack's
/// email adapter uses.
pub enum EmailProvider {
    SendGrid { client: Client, api_key: String, from: String },
    Smtp { transport: AsyncSmtpTransport<Tokio1Executor>, from: String },
}

impl EmailProvider {
    pub fn sendgrid(api_key: impl Into<String>, from: impl Into<String>) -> Self {
        EmailProvider::SendGrid {
            client: Client::new(),
            api_key: api_key.into(),
            from: from.into(),
        }
    }

    pub fn smtp(host: &str, port: u16, user: &str, pass: &str, from: impl Into<String>) -> Result<Self, String> {
        let transport = AsyncSmtpTransport::<Tokio1Executor>::relay(host)
            .map_err(|e| e.to_string())?
            .port(port)
            .credentials(Credentials::new(user.to_string(), pass.to_string()))
            .build();
        Ok(EmailProvider::Smtp {
            transport,
            from: from.into(),
        })
    }
}

#[async_trait]
impl Provider for EmailProvider {
    async fn send(&self, notification: &Notification, _user: &User, destination: &str) -> SendOutcome {
        match self {
            EmailProvider::SendGrid { client, api_key, from } => {
                let payload = json!({
                    "personalizations": [{ "to": [{ "email": destination }] }],
                    "from": { "email": from },
                    "subject": notification.rendered.subject.clone().unwrap_or_default(),
                    "content": [{ "type": "text/plain", "value": notification.rendered.body }],
                });
                let response = client
                    .post("https://api.sendgrid.com/v3/mail/send")
                    .bearer_auth(api_key)
                    .json(&payload)
                    .send()
                    .await;
                match response {
                    Ok(r) if r.status().is_success() => SendOutcome::Success {
                        provider_message_id: notification.notification_id.clone(),
                        delivery_time: Utc::now(),
                        metadata: HashMap::new(),
                    },
                    Ok(r) if r.status() == reqwest::StatusCode::TOO_MANY_REQUESTS => SendOutcome::Failure {
                        error_type: ErrorType::RateLimit,
                        message: "sendgrid rate limited the request".to_string(),
                    },
                    Ok(r) if r.status().is_server_error() => SendOutcome::Failure {
                        error_type: ErrorType::ProviderApi,
                        message: format!("sendgrid returned {}", r.status()),
                    },
                    Ok(r) if r.status() == reqwest::StatusCode::UNAUTHORIZED => SendOutcome::Failure {
                        error_type: ErrorType::Authentication,
                        message: "sendgrid rejected credentials".to_string(),
                    },
                    Ok(r) => SendOutcome::Failure {
                        error_type: ErrorType::InvalidRequest,
                        message: format!("sendgrid rejected request: {}", r.status()),
                    },
                    Err(e) if e.is_timeout() => SendOutcome::Failure {
                        error_type: ErrorType::Timeout,
                        message: e.to_string(),
                    },
                    Err(e) => SendOutcome::Failure {
                        error_type: ErrorType::Network,
                        message: e.to_string(),
                    },
                }
            }
            EmailProvider::Smtp { transport, from } => {
                let built = Message::builder()
                    .from(from.parse().unwrap_or_else(|_| "noreply@freerangenotify.invalid".parse().unwrap()))
                    .to(match destination.parse() {
                        Ok(addr) => addr,
                        Err(_) => {
                            return SendOutcome::Failure {
                                error_type: ErrorType::InvalidRequest,
                                message: format!("invalid recipient address: {destination}"),
                            }
                        }
                    })
                    .subject(notification.rendered.subject.clone().unwrap_or_default())
                    .body(notification.rendered.body.clone());

                let message = match built {
                    Ok(m) => m,
                    Err(e) => {
                        return SendOutcome::Failure {
                            error_type: ErrorType::InvalidRequest,
                            message: e.to_string(),
                        }
                    }
                };

                match transport.send(message).await {
                    Ok(_) => SendOutcome::Success {
                        provider_message_id: notification.notification_id.clone(),
                        delivery_time: Utc::now(),
                        metadata: HashMap::new(),
                    },
                    Err(e) => SendOutcome::Failure {
                        error_type: ErrorType::Network,
                        message: e.to_string(),
                    },
                }
            }
        }
    }

    fn supported_channel(&self) -> Channel {
        Channel::Email
    }

    async fn is_healthy(&self) -> bool {
        true
    }

    async fn close(&self) {}
}
