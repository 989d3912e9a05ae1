//! Wiring-level scenarios: admission engine, broker, and orchestrator
//! against the in-memory backends and a configurable fake provider.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chrono::Utc;

use freerange_notify::admission::AdmissionEngine;
use freerange_notify::broker::{Broker, MemoryBroker};
use freerange_notify::limiter::MemoryRateLimiter;
use freerange_notify::metrics::Metrics;
use freerange_notify::orchestrator::{Orchestrator, OrchestratorConfig};
use freerange_notify::presence::{MemoryPresenceRegistry, PresenceRegistry};
use freerange_notify::provider::{Provider, ProviderManager};
use freerange_notify::store::{MemoryStore, Store};
use freerange_notify::types::{
    Application, ApplicationSettings, Channel, ErrorType, Notification, NotificationStatus, Priority, SendOutcome,
    Template, User, UserPreferences,
};

/// A provider whose behavior is set per test: always succeed, always fail
/// with a fixed error type, or record every destination it was asked to
/// deliver to (used by the check-in scenario to confirm routing).
struct FakeProvider {
    channel: Channel,
    fail_with: Option<ErrorType>,
    destinations: Mutex<Vec<String>>,
    calls: AtomicU32,
}

impl FakeProvider {
    fn succeeding(channel: Channel) -> Self {
        Self {
            channel,
            fail_with: None,
            destinations: Mutex::new(Vec::new()),
            calls: AtomicU32::new(0),
        }
    }

    fn failing(channel: Channel, error_type: ErrorType) -> Self {
        Self {
            channel,
            fail_with: Some(error_type),
            destinations: Mutex::new(Vec::new()),
            calls: AtomicU32::new(0),
        }
    }
}

#[async_trait]
impl Provider for FakeProvider {
    async fn send(&self, _notification: &Notification, _user: &User, destination: &str) -> SendOutcome {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.destinations.lock().unwrap().push(destination.to_string());
        match self.fail_with {
            Some(error_type) => SendOutcome::Failure {
                error_type,
                message: "fake provider failure".to_string(),
            },
            None => SendOutcome::Success {
                provider_message_id: "fake-message".to_string(),
                delivery_time: Utc::now(),
                metadata: HashMap::new(),
            },
        }
    }

    fn supported_channel(&self) -> Channel {
        self.channel
    }

    async fn is_healthy(&self) -> bool {
        true
    }

    async fn close(&self) {}
}

struct Harness {
    store: Arc<dyn Store>,
    broker: Arc<dyn Broker>,
    presence: Arc<dyn PresenceRegistry>,
    admission: AdmissionEngine,
    orchestrator: Orchestrator,
}

fn orchestrator_config() -> OrchestratorConfig {
    OrchestratorConfig {
        poll_interval: std::time::Duration::from_millis(10),
        provider_timeout: std::time::Duration::from_secs(5),
        backoff_base: chrono::Duration::seconds(1),
        backoff_max: chrono::Duration::seconds(60),
    }
}

async fn build_harness(provider: Arc<dyn Provider>, default_retries: u32) -> Harness {
    let store: Arc<dyn Store> = Arc::new(MemoryStore::new());
    let broker: Arc<dyn Broker> = Arc::new(MemoryBroker::new());
    let limiter = Arc::new(MemoryRateLimiter::new());
    let presence: Arc<dyn PresenceRegistry> = Arc::new(MemoryPresenceRegistry::new());
    let metrics = Arc::new(Metrics::new());

    store
        .create_application(Application {
            app_id: "app1".into(),
            name: "Test App".into(),
            api_key_hash: "unused-in-these-tests".into(),
            settings: ApplicationSettings {
                default_retries,
                enabled_channels: vec![Channel::Email, Channel::Webhook],
                rate_limit: 1000,
            },
        })
        .await
        .unwrap();

    store
        .create_user(User {
            app_id: "app1".into(),
            user_id: "user1".into(),
            external_user_id: "user1@example.test".into(),
            default_webhook_url: Some("https://default.example.test/hook".into()),
            devices: vec![],
            preferences: UserPreferences {
                channel_enabled: HashMap::new(),
                dnd: false,
                dnd_window: None,
                daily_limit: u32::MAX,
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

    let mut manager = ProviderManager::new();
    manager.register(provider).ok();
    let providers = Arc::new(manager);

    let admission = AdmissionEngine::new(store.clone(), broker.clone(), limiter, metrics.clone());
    let orchestrator = Orchestrator::new(
        store.clone(),
        broker.clone(),
        presence.clone(),
        providers,
        metrics,
        orchestrator_config(),
    );

    Harness {
        store,
        broker,
        presence,
        admission,
        orchestrator,
    }
}

fn request(priority: Priority) -> freerange_notify::types::SendRequest {
    freerange_notify::types::SendRequest {
        app_id: "app1".into(),
        user_id: "user1".into(),
        channel: Channel::Email,
        template_id: "t1".into(),
        priority,
        vars: HashMap::from([("n".to_string(), serde_json::json!("x"))]),
        scheduled_at: None,
    }
}

/// S1: a well-formed request is admitted, queued, and delivered on the
/// first worker tick.
#[tokio::test]
async fn s1_happy_path_delivers_on_first_tick() {
    let provider = Arc::new(FakeProvider::succeeding(Channel::Email));
    let harness = build_harness(provider.clone(), 3).await;

    let notification = harness.admission.admit(request(Priority::Normal)).await.unwrap();
    assert_eq!(notification.status, NotificationStatus::Queued);

    let processed = harness.orchestrator.run_once("worker-1").await;
    assert!(processed);

    let stored = harness.store.get_notification(&notification.notification_id).await.unwrap().unwrap();
    assert_eq!(stored.status, NotificationStatus::Delivered);
    assert_eq!(provider.calls.load(Ordering::SeqCst), 1);
}

/// S2: DND blocks Normal priority but Critical always bypasses it.
#[tokio::test]
async fn s2_dnd_blocks_normal_but_not_critical() {
    let provider = Arc::new(FakeProvider::succeeding(Channel::Email));
    let harness = build_harness(provider, 3).await;

    let mut user = harness.store.get_user("app1", "user1").await.unwrap().unwrap();
    user.preferences.dnd = true;
    harness.store.update_user(user).await.unwrap();

    let rejected = harness.admission.admit(request(Priority::Normal)).await.unwrap_err();
    assert!(matches!(rejected, freerange_notify::error::AdmissionError::Dnd));

    let admitted = harness.admission.admit(request(Priority::Critical)).await.unwrap();
    assert_eq!(admitted.status, NotificationStatus::Queued);
}

/// S3: the daily limit rejects the request immediately after the
/// configured count is reached, for the same app/user pair.
#[tokio::test]
async fn s3_daily_limit_rejects_the_second_request() {
    let provider = Arc::new(FakeProvider::succeeding(Channel::Email));
    let harness = build_harness(provider, 3).await;

    let mut user = harness.store.get_user("app1", "user1").await.unwrap().unwrap();
    user.preferences.daily_limit = 1;
    harness.store.update_user(user).await.unwrap();

    harness.admission.admit(request(Priority::Normal)).await.unwrap();
    let rejected = harness.admission.admit(request(Priority::Normal)).await.unwrap_err();
    assert!(matches!(rejected, freerange_notify::error::AdmissionError::DailyLimit));
}

/// S4: a provider that always fails with a retriable error exhausts
/// `max_retries` and lands in the DLQ with the last error recorded. With
/// `max_retries = 2`, a job gets `max_retries + 1` total attempts: attempts 1
/// and 2 are requeued with exponential backoff, and the failure on attempt 3
/// is the one that's terminal.
#[tokio::test]
async fn s4_retries_exhaust_then_dead_letter() {
    let provider = Arc::new(FakeProvider::failing(Channel::Email, ErrorType::Network));
    let harness = build_harness(provider.clone(), 2).await;

    let notification = harness.admission.admit(request(Priority::Normal)).await.unwrap();

    // attempt 1: fails, requeued with a short exponential backoff.
    assert!(harness.orchestrator.run_once("worker-1").await);
    let after_first = harness.store.get_notification(&notification.notification_id).await.unwrap().unwrap();
    assert_eq!(after_first.status, NotificationStatus::Queued);
    assert_eq!(after_first.attempts, 1);

    // the backoff config's base is 1 second; wait it out for real rather
    // than faking the clock, since `visible_at` is a wall-clock timestamp.
    tokio::time::sleep(std::time::Duration::from_millis(2_200)).await;

    // attempt 2: attempts (2) <= max_retries (2), so this failure is still
    // requeued rather than terminal.
    assert!(harness.orchestrator.run_once("worker-1").await);
    let after_second = harness.store.get_notification(&notification.notification_id).await.unwrap().unwrap();
    assert_eq!(after_second.status, NotificationStatus::Queued);
    assert_eq!(after_second.attempts, 2);

    // backoff doubles on each attempt; wait out the longer delay before attempt 3.
    tokio::time::sleep(std::time::Duration::from_millis(3_200)).await;

    // attempt 3: attempts (3) > max_retries (2), so this failure is terminal.
    assert!(harness.orchestrator.run_once("worker-1").await);

    let stored = harness.store.get_notification(&notification.notification_id).await.unwrap().unwrap();
    assert_eq!(stored.status, NotificationStatus::Failed);
    assert_eq!(stored.last_error.as_ref().unwrap().error_type, ErrorType::Network);

    let dlq = harness.broker.dlq_list(10).await.unwrap();
    assert_eq!(dlq.len(), 1);
    assert_eq!(dlq[0].job.notification_id, notification.notification_id);

    // no job remains in the live queue
    assert!(!harness.orchestrator.run_once("worker-1").await);
}

/// S5: a notification scheduled in the future is not leasable until its
/// `visible_at` has passed.
#[tokio::test]
async fn s5_scheduled_delivery_waits_for_visible_at() {
    let provider = Arc::new(FakeProvider::succeeding(Channel::Email));
    let harness = build_harness(provider, 3).await;

    let mut req = request(Priority::Normal);
    req.scheduled_at = Some(Utc::now() + chrono::Duration::milliseconds(300));
    let notification = harness.admission.admit(req).await.unwrap();
    assert_eq!(notification.status, NotificationStatus::Scheduled);

    // not yet visible: no job to lease
    assert!(!harness.orchestrator.run_once("worker-1").await);

    tokio::time::sleep(std::time::Duration::from_millis(400)).await;

    assert!(harness.orchestrator.run_once("worker-1").await);
    let stored = harness.store.get_notification(&notification.notification_id).await.unwrap().unwrap();
    assert_eq!(stored.status, NotificationStatus::Delivered);
}

/// S6: a check-in sets presence and promotes the user's queued jobs so they
/// dispatch ahead of unrelated lower-priority jobs, to the checked-in URL
/// rather than the account's default webhook URL.
#[tokio::test]
async fn s6_checkin_flushes_to_dynamic_url_ahead_of_unrelated_jobs() {
    let provider = Arc::new(FakeProvider::succeeding(Channel::Webhook));
    let harness = build_harness(provider.clone(), 3).await;

    harness
        .store
        .create_template(Template {
            template_id: "webhook-t".into(),
            app_id: "app1".into(),
            channel: Channel::Webhook,
            subject: None,
            body: "ping {{n}}".into(),
            declared_variables: vec!["n".into()],
        })
        .await
        .unwrap();

    harness
        .store
        .create_user(User {
            app_id: "app1".into(),
            user_id: "stranger".into(),
            external_user_id: "stranger@example.test".into(),
            default_webhook_url: Some("https://stranger.example.test/hook".into()),
            devices: vec![],
            preferences: UserPreferences::default(),
            deleted: false,
        })
        .await
        .unwrap();

    let mut webhook_request = request(Priority::Low);
    webhook_request.channel = Channel::Webhook;
    webhook_request.template_id = "webhook-t".into();

    // three queued webhook notifications for user1, at Low priority
    for _ in 0..3 {
        harness.admission.admit(webhook_request.clone()).await.unwrap();
    }

    // one unrelated job for a different user, left at Low priority
    let mut stranger_request = webhook_request.clone();
    stranger_request.user_id = "stranger".into();
    harness.admission.admit(stranger_request).await.unwrap();

    harness.presence.set("app1", "user1", "https://checked-in.example.test/hook", chrono::Duration::seconds(60)).await.unwrap();
    harness.admission.checkin("app1", "user1").await.unwrap();

    // after check-in, user1's jobs are promoted to High and dispatch before
    // the stranger's untouched Low-priority job.
    assert!(harness.orchestrator.run_once("worker-1").await);
    assert!(harness.orchestrator.run_once("worker-1").await);
    assert!(harness.orchestrator.run_once("worker-1").await);

    let destinations = provider.destinations.lock().unwrap();
    assert_eq!(destinations.len(), 3);
    assert!(destinations.iter().all(|d| d == "https://checked-in.example.test/hook"));
}
