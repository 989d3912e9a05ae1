use std::collections::HashMap;

use async_trait::async_trait;
use chrono::Utc;
use reqwest::Client;
use serde_json::json;

use super::Provider;
use crate::types::{Channel, ErrorType, Notification, SendOutcome, User};

/// FCM HTTP v1-style push sender. Real token acquisition (service-account
/// JWT exchange) is intentionally not modeled here — the provider boundary
/// only needs a bearer token and an endpoint, not the internals of any one
/// provider's auth flow.
pub struct PushProvider {
    client: Client,
    endpoint: String,
    bearer_token: Option<String>,
}

impl PushProvider {
    pub fn new(endpoint: impl Into<String>, bearer_token: Option<String>) -> Self {
        Self {
            client: Client::new(),
            endpoint: endpoint.into(),
            bearer_token,
        }
    }
}

#[async_trait]
impl Provider for PushProvider {
    async fn send(&self, notification: &Notification, user: &User, destination: &str) -> SendOutcome {
        let active_device = user.devices.iter().find(|d| d.device_id == destination && d.active);
        let Some(device) = active_device else {
            return SendOutcome::Failure {
                error_type: ErrorType::InvalidRequest,
                message: format!("no active device {destination}"),
            };
        };

        let mut request = self.client.post(&self.endpoint).json(&json!({
            "token": device.token,
            "notification": {
                "title": notification.rendered.subject,
                "body": notification.rendered.body,
            },
            "data": notification.rendered.data,
        }));
        if let Some(token) = &self.bearer_token {
            request = request.bearer_auth(token);
        }

        match request.send().await {
            Ok(response) if response.status().is_success() => SendOutcome::Success {
                provider_message_id: notification.notification_id.clone(),
                delivery_time: Utc::now(),
                metadata: HashMap::new(),
            },
            Ok(response) if response.status() == reqwest::StatusCode::TOO_MANY_REQUESTS => SendOutcome::Failure {
                error_type: ErrorType::RateLimit,
                message: "push provider rate limited the request".to_string(),
            },
            Ok(response) if response.status().is_server_error() => SendOutcome::Failure {
                error_type: ErrorType::ProviderApi,
                message: format!("push provider returned {}", response.status()),
            },
            Ok(response) if response.status() == reqwest::StatusCode::UNAUTHORIZED => SendOutcome::Failure {
                error_type: ErrorType::Authentication,
                message: "push provider rejected credentials".to_string(),
            },
            Ok(response) => SendOutcome::Failure {
                error_type: ErrorType::InvalidRequest,
                message: format!("push provider rejected request: {}", response.status()),
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
        Channel::Push
    }

    async fn is_healthy(&self) -> bool {
        true
    }

    async fn close(&self) {}
}
