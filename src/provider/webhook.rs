use std::collections::HashMap;

use async_trait::async_trait;
use chrono::Utc;
use hmac::{Hmac, Mac};
use reqwest::Client;
use serde_json::json;
use sha2::Sha256;

use super::Provider;
use crate::types::{Channel, ErrorType, Notification, SendOutcome, User};

type HmacSha256 = Hmac<Sha256>;

pub struct WebhookProvider {
    client: Client,
    secret: Option<String>,
}

impl WebhookProvider {
    pub fn new(secret: Option<String>) -> Self {
        Self {
            client: Client::new(),
            secret,
        }
    }

    fn sign(&self, body: &str) -> Option<String> {
        let secret = self.secret.as_ref()?;
        let mut mac = HmacSha256::new_from_slice(secret.as_bytes()).expect("hmac accepts any key length");
        mac.update(body.as_bytes());
        Some(hex::encode(mac.finalize().into_bytes()))
    }

    fn classify_status(status: reqwest::StatusCode) -> ErrorType {
        if status.as_u16() == 429 {
            ErrorType::RateLimit
        } else if status.is_server_error() {
            ErrorType::ProviderApi
        } else if status == reqwest::StatusCode::UNAUTHORIZED || status == reqwest::StatusCode::FORBIDDEN {
            ErrorType::Authentication
        } else {
            ErrorType::InvalidRequest
        }
    }
}

#[async_trait]
impl Provider for WebhookProvider {
    async fn send(&self, notification: &Notification, _user: &User, destination: &str) -> SendOutcome {
        let payload = json!({
            "notification_id": notification.notification_id,
            "app_id": notification.app_id,
            "subject": notification.rendered.subject,
            "body": notification.rendered.body,
            "data": notification.rendered.data,
        });
        let body = payload.to_string();

        let mut request = self.client.post(destination).header("Content-Type", "application/json");
        if let Some(signature) = self.sign(&body) {
            request = request.header("X-Signature-256", format!("sha256={signature}"));
        }

        match request.body(body).send().await {
            Ok(response) if response.status().is_success() => SendOutcome::Success {
                provider_message_id: notification.notification_id.clone(),
                delivery_time: Utc::now(),
                metadata: HashMap::new(),
            },
            Ok(response) => SendOutcome::Failure {
                error_type: Self::classify_status(response.status()),
                message: format!("webhook responded with {}", response.status()),
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

    fn supported_channel(&self) -> Channel {
        Channel::Webhook
    }

    async fn is_healthy(&self) -> bool {
        true
    }

    async fn close(&self) {}
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn signature_is_deterministic_for_same_secret_and_body() {
        let provider = WebhookProvider::new(Some("shh".to_string()));
        let a = provider.sign("body").unwrap();
        let b = provider.sign("body").unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn no_secret_means_no_signature() {
        let provider = WebhookProvider::new(None);
        assert!(provider.sign("body").is_none());
    }
}
