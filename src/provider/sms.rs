use std::collections::HashMap;

use async_trait::async_trait;
use chrono::Utc;
use reqwest::Client;

use super::Provider;
use crate::types::{Channel, ErrorType, Notification, SendOutcome, User};

/// Twilio-style SMS sender: form-encoded POST with HTTP basic auth.
pub struct SmsProvider {
    client: Client,
    account_sid: String,
    auth_token: String,
    from: String,
}

impl SmsProvider {
    pub fn new(account_sid: impl Into<String>, auth_token: impl Into<String>, from: impl Into<String>) -> Self {
        Self {
            client: Client::new(),
            account_sid: account_sid.into(),
            auth_token: auth_token.into(),
            from: from.into(),
        }
    }
}

#[async_trait]
impl Provider for SmsProvider {
    async fn send(&self, notification: &Notification, _user: &User, destination: &str) -> SendOutcome {
        let url = format!("https://api.twilio.com/2010-04-01/Accounts/{}/Messages.json", self.account_sid);
        let response = self
            .client
            .post(&url)
            .basic_auth(&self.account_sid, Some(&self.auth_token))
            .form(&[
                ("To", destination),
                ("From", self.from.as_str()),
                ("Body", notification.rendered.body.as_str()),
            ])
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
                message: "twilio rate limited the request".to_string(),
            },
            Ok(r) if r.status().is_server_error() => SendOutcome::Failure {
                error_type: ErrorType::ProviderApi,
                message: format!("twilio returned {}", r.status()),
            },
            Ok(r) if r.status() == reqwest::StatusCode::UNAUTHORIZED => SendOutcome::Failure {
                error_type: ErrorType::Authentication,
                message: "twilio rejected credentials".to_string(),
            },
            Ok(r) => SendOutcome::Failure {
                error_type: ErrorType::InvalidRequest,
                message: format!("twilio rejected request: {}", r.status()),
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
        Channel::Sms
    }

    async fn is_healthy(&self) -> bool {
        true
    }

    async fn close(&self) {}
}
