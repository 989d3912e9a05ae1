use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use chrono::Utc;
use uuid::Uuid;

use crate::broker::Broker;
use crate::error::{AdmissionError, AdmissionResult};
use crate::limiter::RateLimiter;
use crate::metrics::Metrics;
use crate::store::Store;
use crate::template;
use crate::types::{Notification, NotificationStatus, Priority, QueueJob, RenderedContent, SendRequest};

/// Composes the template renderer, rate/frequency limiter, and persistence
/// store behind a nine-step ordered sequence: lookup, channel enablement,
/// user preference, DND, daily limit, rate limit, render, persist, enqueue.
/// Checks run in that exact order and stop at the first
/// failure — a request violating several rules is rejected for the first
/// one, which is what makes the behavior testable.
pub struct AdmissionEngine {
    store: Arc<dyn Store>,
    broker: Arc<dyn Broker>,
    limiter: Arc<dyn RateLimiter>,
    metrics: Arc<Metrics>,
    sequence: AtomicU64,
}

impl AdmissionEngine {
    pub fn new(store: Arc<dyn Store>, broker: Arc<dyn Broker>, limiter: Arc<dyn RateLimiter>, metrics: Arc<Metrics>) -> Self {
        Self {
            store,
            broker,
            limiter,
            metrics,
            sequence: AtomicU64::new(0),
        }
    }

    pub async fn admit(&self, request: SendRequest) -> AdmissionResult<Notification> {
        match self.admit_inner(request).await {
            Ok(notification) => Ok(notification),
            Err(e) => {
                self.metrics.record_admission_rejection(rejection_code(&e));
                Err(e)
            }
        }
    }

    async fn admit_inner(&self, request: SendRequest) -> AdmissionResult<Notification> {
        // 1. Lookup
        let application = self
            .store
            .get_application(&request.app_id)
            .await?
            .ok_or(AdmissionError::NotFound("application"))?;
        let user = self
            .store
            .get_user(&request.app_id, &request.user_id)
            .await?
            .ok_or(AdmissionError::NotFound("user"))?;
        let template = self
            .store
            .get_template(&request.template_id)
            .await?
            .ok_or(AdmissionError::NotFound("template"))?;

        // 2. Channel enablement
        if !application.settings.channel_enabled(request.channel) {
            return Err(AdmissionError::ChannelDisabled);
        }

        // 3. User preference
        if !user.preferences.is_channel_enabled(request.channel) {
            return Err(AdmissionError::UserOptedOut);
        }

        // 4. DND — Critical always bypasses; High/Normal/Low do not.
        if user.preferences.dnd && request.priority < Priority::Critical {
            return Err(AdmissionError::Dnd);
        }

        // 5. Daily limit
        let daily_key = format!("{}|{}", request.app_id, request.user_id);
        let within_daily_limit = self
            .limiter
            .increment_and_check_daily_limit(&daily_key, user.preferences.daily_limit)
            .await?;
        if !within_daily_limit {
            return Err(AdmissionError::DailyLimit);
        }

        // 6. Per-app rate limit
        let allowed = self
            .limiter
            .allow(&request.app_id, application.settings.rate_limit, chrono::Duration::seconds(1))
            .await?;
        if !allowed {
            return Err(AdmissionError::RateLimited);
        }

        // 7. Render
        let rendered: RenderedContent = template::render(&template, &request.vars)?;

        // 8. Persist
        let now = Utc::now();
        let scheduled_at = request.scheduled_at.unwrap_or(now);
        let status = if scheduled_at > now {
            NotificationStatus::Scheduled
        } else {
            NotificationStatus::Queued
        };
        let notification = Notification {
            notification_id: Uuid::new_v4().to_string(),
            app_id: request.app_id.clone(),
            user_id: request.user_id.clone(),
            channel: request.channel,
            template_id: request.template_id.clone(),
            rendered,
            priority: request.priority,
            status,
            attempts: 0,
            max_retries: application.settings.default_retries,
            last_error: None,
            scheduled_at,
            created_at: now,
            updated_at: now,
        };
        let notification = self.store.create_notification(notification).await?;

        // 9. Enqueue
        let sequence = self.sequence.fetch_add(1, Ordering::Relaxed);
        let job = QueueJob::new(
            notification.notification_id.clone(),
            notification.app_id.clone(),
            notification.user_id.clone(),
            notification.priority,
            scheduled_at,
            sequence,
        );
        self.broker.push(job).await.map_err(AdmissionError::Core)?;

        Ok(notification)
    }

    /// `Cancel` succeeds only when status is `Scheduled` or `Queued`;
    /// in-flight `Processing` is left untouched (see design notes' open
    /// question on aborting the provider call — it does not).
    pub async fn cancel(&self, notification_id: &str) -> AdmissionResult<Notification> {
        let mut notification = self
            .store
            .get_notification(notification_id)
            .await?
            .ok_or(AdmissionError::NotFound("notification"))?;

        if !matches!(notification.status, NotificationStatus::Scheduled | NotificationStatus::Queued) {
            return Err(AdmissionError::Validation("notification is not cancellable".to_string()));
        }

        notification.status = NotificationStatus::Cancelled;
        notification.updated_at = Utc::now();
        let notification = self.store.update_notification(notification).await?;
        Ok(notification)
    }

    /// `PromoteForUser` RPC triggered by a check-in: rewrites `visible_at`
    /// and promotes priority for all the user's outstanding jobs.
    pub async fn checkin(&self, app_id: &str, user_id: &str) -> AdmissionResult<()> {
        self.broker.promote_for_user(app_id, user_id).await.map_err(AdmissionError::Core)?;
        Ok(())
    }
}

fn rejection_code(e: &AdmissionError) -> &'static str {
    match e {
        AdmissionError::NotFound(_) => "NOT_FOUND",
        AdmissionError::ChannelDisabled => "CHANNEL_DISABLED",
        AdmissionError::UserOptedOut => "USER_OPTED_OUT",
        AdmissionError::Dnd => "DND",
        AdmissionError::DailyLimit => "DAILY_LIMIT",
        AdmissionError::RateLimited => "RATE_LIMITED",
        AdmissionError::TemplateRender(_) => "TEMPLATE_RENDER_ERROR",
        AdmissionError::Validation(_) => "VALIDATION_ERROR",
        AdmissionError::Core(_) => "INTERNAL_ERROR",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::broker::MemoryBroker;
    use crate::limiter::MemoryRateLimiter;
    use crate::store::MemoryStore;
    use crate::types::{Application, ApplicationSettings, Channel, Template, User, UserPreferences};
    use std::collections::HashMap;

    async fn engine_with_fixtures(
        enabled_channels: Vec<Channel>,
        dnd: bool,
        daily_limit: u32,
    ) -> (AdmissionEngine, Arc<dyn Store>) {
        let store: Arc<dyn Store> = Arc::new(MemoryStore::new());
        let broker: Arc<dyn Broker> = Arc::new(MemoryBroker::new());
        let limiter: Arc<dyn RateLimiter> = Arc::new(MemoryRateLimiter::new());
        let metrics = Arc::new(Metrics::new());

        store
            .create_application(Application {
                app_id: "app1".into(),
                name: "Test".into(),
                api_key_hash: "hash".into(),
                settings: ApplicationSettings {
                    default_retries: 3,
                    enabled_channels,
                    rate_limit: 1000,
                },
            })
            .await
            .unwrap();

        store
            .create_user(User {
                app_id: "app1".into(),
                user_id: "user1".into(),
                external_user_id: "ext1".into(),
                default_webhook_url: None,
                devices: vec![],
                preferences: UserPreferences {
                    channel_enabled: HashMap::new(),
                    dnd,
                    dnd_window: None,
                    daily_limit,
                },
                deleted: false,
            })
            .await
            .unwrap();

        store
            .create_template(Template {
                template_id: "t1".into(),
                app_id: "app1".into(),
                channel: Channel::Email,
                subject: None,
                body: "Hello {{n}}".into(),
                declared_variables: vec!["n".into()],
            })
            .await
            .unwrap();

        (AdmissionEngine::new(store.clone(), broker, limiter, metrics), store)
    }

    fn request(priority: Priority) -> SendRequest {
        SendRequest {
            app_id: "app1".into(),
            user_id: "user1".into(),
            channel: Channel::Email,
            template_id: "t1".into(),
            priority,
            vars: HashMap::from([("n".to_string(), serde_json::json!("x"))]),
            scheduled_at: None,
        }
    }

    #[tokio::test]
    async fn happy_path_admits_and_enqueues() {
        let (engine, _store) = engine_with_fixtures(vec![Channel::Email], false, 100).await;
        let notification = engine.admit(request(Priority::Normal)).await.unwrap();
        assert_eq!(notification.status, NotificationStatus::Queued);
        assert_eq!(notification.rendered.body, "Hello x");
    }

    #[tokio::test]
    async fn dnd_blocks_non_critical_but_not_critical() {
        let (engine, _store) = engine_with_fixtures(vec![Channel::Email], true, 100).await;
        let rejected = engine.admit(request(Priority::Normal)).await.unwrap_err();
        assert!(matches!(rejected, AdmissionError::Dnd));

        let admitted = engine.admit(request(Priority::Critical)).await.unwrap();
        assert_eq!(admitted.status, NotificationStatus::Queued);
    }

    #[tokio::test]
    async fn daily_limit_rejects_the_kth_plus_one() {
        let (engine, _store) = engine_with_fixtures(vec![Channel::Email], false, 1).await;
        engine.admit(request(Priority::Normal)).await.unwrap();
        let rejected = engine.admit(request(Priority::Normal)).await.unwrap_err();
        assert!(matches!(rejected, AdmissionError::DailyLimit));
    }

    #[tokio::test]
    async fn channel_disabled_at_app_level_is_rejected() {
        let (engine, _store) = engine_with_fixtures(vec![Channel::Sms], false, 100).await;
        let rejected = engine.admit(request(Priority::Normal)).await.unwrap_err();
        assert!(matches!(rejected, AdmissionError::ChannelDisabled));
    }

    #[tokio::test]
    async fn cancel_succeeds_only_before_processing() {
        let (engine, _store) = engine_with_fixtures(vec![Channel::Email], false, 100).await;
        let notification = engine.admit(request(Priority::Normal)).await.unwrap();
        let cancelled = engine.cancel(&notification.notification_id).await.unwrap();
        assert_eq!(cancelled.status, NotificationStatus::Cancelled);

        let err = engine.cancel(&cancelled.notification_id).await.unwrap_err();
        assert!(matches!(err, AdmissionError::Validation(_)));
    }
}
