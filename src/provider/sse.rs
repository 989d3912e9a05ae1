use std::collections::HashMap;

use async_trait::async_trait;
use chrono::Utc;
use dashmap::DashMap;
use serde_json::json;
use tokio::sync::broadcast;

use super::Provider;
use crate::types::{Channel, ErrorType, Notification, SendOutcome, User};

/// Server-sent-events "provider". SSE transport itself is the out-of-scope
/// REST layer's concern; this adapter's responsibility ends at publishing
/// onto an in-process broadcast channel keyed by `(app_id, user_id)` that a
/// transport-side stream handler would subscribe to.
pub struct SseProvider {
    channels: DashMap<(String, String), broadcast::Sender<String>>,
}

impl SseProvider {
    pub fn new() -> Self {
        Self {
            channels: DashMap::new(),
        }
    }

    /// Registers interest for a given user; returns a receiver the REST
    /// transport would drain into an SSE stream.
    pub fn subscribe(&self, app_id: &str, user_id: &str) -> broadcast::Receiver<String> {
        self.channels
            .entry((app_id.to_string(), user_id.to_string()))
            .or_insert_with(|| broadcast::channel(64).0)
            .subscribe()
    }
}

impl Default for SseProvider {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Provider for SseProvider {
    async fn send(&self, notification: &Notification, _user: &User, destination: &str) -> SendOutcome {
        let key = (notification.app_id.clone(), destination.to_string());
        let Some(sender) = self.channels.get(&key) else {
            return SendOutcome::Failure {
                error_type: ErrorType::InvalidRequest,
                message: format!("no active SSE subscriber for user {destination}"),
            };
        };

        let payload = json!({
            "notification_id": notification.notification_id,
            "subject": notification.rendered.subject,
            "body": notification.rendered.body,
        })
        .to_string();

        match sender.send(payload) {
            Ok(_) => SendOutcome::Success {
                provider_message_id: notification.notification_id.clone(),
                delivery_time: Utc::now(),
                metadata: HashMap::new(),
            },
            Err(_) => SendOutcome::Failure {
                error_type: ErrorType::InvalidRequest,
                message: format!("no active SSE subscriber for user {destination}"),
            },
        }
    }

    fn supported_channel(&self) -> Channel {
        Channel::Sse
    }

    async fn is_healthy(&self) -> bool {
        true
    }

    async fn close(&self) {}
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{NotificationStatus, Priority, RenderedContent};

    fn notification() -> Notification {
        Notification {
            notification_id: "n1".into(),
            app_id: "app1".into(),
            user_id: "user1".into(),
            channel: Channel::Sse,
            template_id: "t1".into(),
            rendered: RenderedContent {
                subject: None,
                body: "hi".into(),
                data: HashMap::new(),
            },
            priority: Priority::Normal,
            status: NotificationStatus::Processing,
            attempts: 1,
            max_retries: 3,
            last_error: None,
            scheduled_at: Utc::now(),
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn delivers_to_subscriber() {
        let provider = SseProvider::new();
        let mut rx = provider.subscribe("app1", "user1");
        let user = User {
            app_id: "app1".into(),
            user_id: "user1".into(),
            external_user_id: "ext".into(),
            default_webhook_url: None,
            devices: vec![],
            preferences: Default::default(),
            deleted: false,
        };
        let outcome = provider.send(&notification(), &user, "user1").await;
        assert!(matches!(outcome, SendOutcome::Success { .. }));
        assert!(rx.try_recv().is_ok());
    }

    #[tokio::test]
    async fn no_subscriber_is_invalid_request() {
        let provider = SseProvider::new();
        let user = User {
            app_id: "app1".into(),
            user_id: "user1".into(),
            external_user_id: "ext".into(),
            default_webhook_url: None,
            devices: vec![],
            preferences: Default::default(),
            deleted: false,
        };
        let outcome = provider.send(&notification(), &user, "nobody").await;
        assert!(matches!(
            outcome,
            SendOutcome::Failure { error_type: ErrorType::InvalidRequest, .. }
        ));
    }
}
