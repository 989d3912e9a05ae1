use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration as StdDuration;

use chrono::{Duration, Utc};
use futures::FutureExt;
use rand::Rng;
use tokio_util::sync::CancellationToken;

use crate::broker::Broker;
use crate::metrics::{Metrics, WorkerStats};
use crate::presence::PresenceRegistry;
use crate::provider::ProviderManager;
use crate::store::Store;
use crate::types::{ErrorType, LastError, Notification, NotificationStatus};

#[derive(Clone)]
pub struct OrchestratorConfig {
    pub poll_interval: StdDuration,
    pub provider_timeout: StdDuration,
    pub backoff_base: Duration,
    pub backoff_max: Duration,
}

/// One worker loop's dependencies, composing the provider manager and
/// broker (leaf dependencies) with the persistence store and presence
/// registry. Each worker owns a `worker_id` used as the broker's
/// `consumer_id`.
pub struct Orchestrator {
    store: Arc<dyn Store>,
    broker: Arc<dyn Broker>,
    presence: Arc<dyn PresenceRegistry>,
    providers: Arc<ProviderManager>,
    metrics: Arc<Metrics>,
    worker_stats: Arc<WorkerStats>,
    config: OrchestratorConfig,
}

impl Orchestrator {
    pub fn new(
        store: Arc<dyn Store>,
        broker: Arc<dyn Broker>,
        presence: Arc<dyn PresenceRegistry>,
        providers: Arc<ProviderManager>,
        metrics: Arc<Metrics>,
        config: OrchestratorConfig,
    ) -> Self {
        Self {
            store,
            broker,
            presence,
            providers,
            metrics,
            worker_stats: Arc::new(WorkerStats::default()),
            config,
        }
    }

    /// Lease-acquire and provider-timeout counters for this worker process.
    /// Process-local — callers log or inspect the snapshot directly rather
    /// than reaching it over HTTP, since a worker process doesn't serve one.
    pub fn worker_stats(&self) -> Arc<WorkerStats> {
        self.worker_stats.clone()
    }

    /// Runs the worker loop until `cancel` is signalled. A panic inside a
    /// single iteration is caught so it cannot take down the worker task;
    /// the lease is released with a short `Nack` and the panic is logged.
    pub async fn run(&self, worker_id: &str, cancel: CancellationToken) {
        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    tracing::info!(worker_id, "worker received shutdown signal");
                    return;
                }
                result = AssertUnwindSafe(self.tick(worker_id)).catch_unwind() => {
                    match result {
                        Ok(Some(())) => {}
                        Ok(None) => {
                            tokio::select! {
                                _ = tokio::time::sleep(self.config.poll_interval) => {}
                                _ = cancel.cancelled() => return,
                            }
                        }
                        Err(panic) => {
                            tracing::error!(worker_id, ?panic, "worker iteration panicked, recovering");
                        }
                    }
                }
            }
        }
    }

    /// Runs a single lease→dispatch→outcome cycle and reports whether a job
    /// was processed. `run` drives this in a loop; integration tests drive
    /// it directly to advance the system one step at a time without racing
    /// a background task against assertions.
    pub async fn run_once(&self, worker_id: &str) -> bool {
        self.tick(worker_id).await.is_some()
    }

    /// One lease→render→route→dispatch→outcome cycle. Returns `Some(())`
    /// if a job was processed, `None` if the queue was empty (caller should
    /// sleep `poll_interval`).
    async fn tick(&self, worker_id: &str) -> Option<()> {
        let lease_ttl = Duration::from_std(self.config.provider_timeout * 2).unwrap_or(Duration::seconds(20));
        let job = match self.broker.lease_next(worker_id, lease_ttl).await {
            Ok(Some(job)) => {
                self.worker_stats.record_lease();
                job
            }
            Ok(None) => return None,
            Err(e) => {
                tracing::error!(worker_id, error = %e, "lease_next failed");
                return None;
            }
        };

        let Ok(Some(mut notification)) = self.store.get_notification(&job.notification_id).await else {
            tracing::warn!(worker_id, job_id = %job.job_id, "notification missing for leased job, acking");
            let _ = self.broker.ack(&job.job_id).await;
            return Some(());
        };

        // Idempotency safeguard: a terminal notification re-delivered after
        // crash recovery is simply acked, never reprocessed.
        if notification.status.is_terminal() {
            let _ = self.broker.ack(&job.job_id).await;
            return Some(());
        }

        notification.status = NotificationStatus::Processing;
        notification.attempts += 1;
        notification.updated_at = Utc::now();
        let Ok(notification) = self.store.update_notification(notification).await else {
            // Persistence failure: let the lease expire naturally; another
            // worker will re-lease and retry.
            return Some(());
        };

        let heartbeat_handle = {
            let broker = self.broker.clone();
            let job_id = job.job_id.clone();
            let worker_id = worker_id.to_string();
            tokio::spawn(async move {
                tokio::time::sleep(lease_ttl.to_std().unwrap_or(StdDuration::from_secs(10)) / 2).await;
                let _ = broker.heartbeat(&job_id, &worker_id, lease_ttl).await;
            })
        };

        let user = self.store.get_user(&notification.app_id, &notification.user_id).await;
        let outcome = self.dispatch(&notification, user).await;
        heartbeat_handle.abort();

        self.handle_outcome(notification, job, outcome).await;
        Some(())
    }

    async fn dispatch(
        &self,
        notification: &Notification,
        user: crate::error::CoreResult<Option<crate::types::User>>,
    ) -> crate::types::SendOutcome {
        use crate::types::SendOutcome;

        let user = match user {
            Ok(Some(user)) => user,
            Ok(None) => {
                return SendOutcome::Failure {
                    error_type: ErrorType::InvalidRequest,
                    message: "user no longer exists".to_string(),
                }
            }
            Err(e) => {
                return SendOutcome::Failure {
                    error_type: ErrorType::Unknown,
                    message: e.to_string(),
                }
            }
        };

        let provider = match self.providers.resolve(notification.channel) {
            Ok(p) => p,
            Err(_) => {
                return SendOutcome::Failure {
                    error_type: ErrorType::InvalidRequest,
                    message: format!("no provider registered for channel {:?}", notification.channel),
                }
            }
        };

        // Route: presence override applies to webhook only — the SSE
        // provider's registry is keyed by `user_id` (see `SseProvider::
        // subscribe`), not by the arbitrary URL a check-in supplies, so SSE
        // always dispatches to the user's own id regardless of presence.
        let destination = match notification.channel {
            crate::types::Channel::Webhook => {
                match self.presence.lookup(&notification.app_id, &notification.user_id).await {
                    Ok(Some(entry)) => entry.dynamic_url,
                    _ => user
                        .default_webhook_url
                        .clone()
                        .unwrap_or_else(|| notification.user_id.clone()),
                }
            }
            crate::types::Channel::Sse => notification.user_id.clone(),
            crate::types::Channel::Push => user
                .devices
                .iter()
                .find(|d| d.active)
                .map(|d| d.device_id.clone())
                .unwrap_or_default(),
            crate::types::Channel::Email | crate::types::Channel::Sms => user.external_user_id.clone(),
        };

        let send_future = provider.send(notification, &user, &destination);
        match tokio::time::timeout(self.config.provider_timeout, send_future).await {
            Ok(outcome) => outcome,
            Err(_) => {
                self.worker_stats.record_timeout();
                SendOutcome::Failure {
                    error_type: ErrorType::Timeout,
                    message: "provider send() exceeded provider_timeout".to_string(),
                }
            }
        }
    }

    async fn handle_outcome(&self, mut notification: Notification, job: crate::types::QueueJob, outcome: crate::types::SendOutcome) {
        use crate::types::SendOutcome;

        match outcome {
            SendOutcome::Success { .. } => {
                notification.status = NotificationStatus::Delivered;
                notification.updated_at = Utc::now();
                let _ = self.store.update_notification(notification.clone()).await;
                let _ = self.broker.ack(&job.job_id).await;
                self.metrics.record_delivery_success(notification.channel.as_str(), 0.0);
            }
            SendOutcome::Failure { error_type, message } => {
                let retriable = is_retriable(error_type, notification.attempts, notification.max_retries);
                if retriable {
                    notification.status = NotificationStatus::Queued;
                    notification.last_error = Some(LastError { error_type, message: message.clone() });
                    notification.updated_at = Utc::now();
                    let _ = self.store.update_notification(notification.clone()).await;

                    let delay = backoff_delay(notification.attempts, error_type, &self.config);
                    let _ = self.broker.nack(&job.job_id, delay).await;
                } else {
                    notification.status = NotificationStatus::Failed;
                    notification.last_error = Some(LastError { error_type, message: message.clone() });
                    notification.updated_at = Utc::now();
                    let _ = self.store.update_notification(notification.clone()).await;
                    let _ = self.broker.dead_letter(&job.job_id, &message).await;
                }
                self.metrics.record_delivery_failure(notification.channel.as_str(), error_type_str(error_type));
            }
        }
    }
}

/// Pure function of `(error_type, attempts, max_retries)`. `attempts` is the
/// count already made (post-increment), so a job gets `max_retries + 1`
/// total attempts before becoming terminal: retry is still allowed when
/// `attempts == max_retries` (that attempt is the last one), and only the
/// failure that follows it — `attempts > max_retries` — is terminal.
/// `Unknown` is capped to one extra attempt beyond what the error taxonomy
/// alone would grant.
fn is_retriable(error_type: ErrorType, attempts: u32, max_retries: u32) -> bool {
    if attempts > max_retries {
        return false;
    }
    match error_type {
        ErrorType::Unknown => attempts <= 1,
        other => other.is_retriable(),
    }
}

/// `delay = min(base * 2^(attempts-1) + jitter, max_delay)`, jitter in
/// `[0, base)`. `rate_limit` failures use a longer floor (>= 5s).
fn backoff_delay(attempts: u32, error_type: ErrorType, config: &OrchestratorConfig) -> Duration {
    let exp = 2u64.saturating_pow(attempts.saturating_sub(1));
    let base_secs = config.backoff_base.num_seconds().max(1) as u64;
    let jitter_secs = rand::thread_rng().gen_range(0..base_secs);
    let mut delay_secs = base_secs.saturating_mul(exp).saturating_add(jitter_secs);
    delay_secs = delay_secs.min(config.backoff_max.num_seconds().max(1) as u64);

    if error_type == ErrorType::RateLimit {
        delay_secs = delay_secs.max(5);
    }
    Duration::seconds(delay_secs as i64)
}

fn error_type_str(e: ErrorType) -> &'static str {
    match e {
        ErrorType::Network => "network",
        ErrorType::Timeout => "timeout",
        ErrorType::RateLimit => "rate_limit",
        ErrorType::ProviderApi => "provider_api",
        ErrorType::Authentication => "authentication",
        ErrorType::InvalidRequest => "invalid_request",
        ErrorType::Unknown => "unknown",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config() -> OrchestratorConfig {
        OrchestratorConfig {
            poll_interval: StdDuration::from_secs(5),
            provider_timeout: StdDuration::from_secs(10),
            backoff_base: Duration::seconds(5),
            backoff_max: Duration::seconds(300),
        }
    }

    #[test]
    fn backoff_grows_exponentially_and_caps() {
        let c = config();
        let first = backoff_delay(1, ErrorType::Network, &c);
        let second = backoff_delay(2, ErrorType::Network, &c);
        assert!(first.num_seconds() >= 5 && first.num_seconds() < 10);
        assert!(second.num_seconds() >= 10 && second.num_seconds() < 15);

        let capped = backoff_delay(20, ErrorType::Network, &c);
        assert_eq!(capped.num_seconds(), 300);
    }

    #[test]
    fn rate_limit_backoff_floors_at_five_seconds() {
        let c = config();
        let delay = backoff_delay(1, ErrorType::RateLimit, &c);
        assert!(delay.num_seconds() >= 5);
    }

    #[test]
    fn unknown_error_allows_only_one_extra_attempt() {
        assert!(is_retriable(ErrorType::Unknown, 1, 5));
        assert!(!is_retriable(ErrorType::Unknown, 2, 5));
    }

    #[test]
    fn authentication_is_never_retriable() {
        assert!(!is_retriable(ErrorType::Authentication, 0, 5));
    }

    #[test]
    fn retriable_error_allows_max_retries_plus_one_total_attempts() {
        // max_retries=2: attempts 1 and 2 are still retriable (2 total
        // retries after the first attempt), attempt 3's failure is terminal.
        assert!(is_retriable(ErrorType::Network, 1, 2));
        assert!(is_retriable(ErrorType::Network, 2, 2));
        assert!(!is_retriable(ErrorType::Network, 3, 2));
    }
}
