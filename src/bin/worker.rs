use std::sync::Arc;
use std::time::Duration;

use freerange_notify::broker::{Broker, MemoryBroker, RedisBroker};
use freerange_notify::config::Config;
use freerange_notify::metrics::Metrics;
use freerange_notify::orchestrator::{Orchestrator, OrchestratorConfig};
use freerange_notify::presence::{MemoryPresenceRegistry, PresenceRegistry, RedisPresenceRegistry};
use freerange_notify::provider::email::EmailProvider;
use freerange_notify::provider::push::PushProvider;
use freerange_notify::provider::sms::SmsProvider;
use freerange_notify::provider::sse::SseProvider;
use freerange_notify::provider::webhook::WebhookProvider;
use freerange_notify::provider::ProviderManager;
use freerange_notify::store::{MemoryStore, Store};
use tokio_util::sync::CancellationToken;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| "freerange_notify=info".into()))
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = match Config::from_env() {
        Ok(c) => c,
        Err(e) => {
            tracing::error!("configuration error: {e}");
            std::process::exit(1);
        }
    };

    tracing::info!(worker_count = config.worker.worker_count, "starting freerange-notify worker pool");

    let store: Arc<dyn Store> = if config.store.url == "memory" {
        Arc::new(MemoryStore::new())
    } else {
        #[cfg(feature = "postgres")]
        {
            let pool = freerange_notify::store::PostgresStore::connect(&config.store.url, config.store.max_connections).await?;
            Arc::new(pool)
        }
        #[cfg(not(feature = "postgres"))]
        {
            tracing::error!("FREERANGE_STORE_URL set to a database but the postgres feature is disabled");
            std::process::exit(1);
        }
    };

    let broker: Arc<dyn Broker> = if config.broker.url == "memory" {
        Arc::new(MemoryBroker::new())
    } else {
        let client = redis::Client::open(config.broker.url.clone())?;
        let conn = redis::aio::ConnectionManager::new(client).await?;
        Arc::new(RedisBroker::new(conn))
    };

    let presence: Arc<dyn PresenceRegistry> = if config.broker.url == "memory" {
        Arc::new(MemoryPresenceRegistry::new())
    } else {
        let client = redis::Client::open(config.broker.url.clone())?;
        let conn = redis::aio::ConnectionManager::new(client).await?;
        Arc::new(RedisPresenceRegistry::new(conn))
    };

    let metrics = Arc::new(Metrics::new());
    let providers = Arc::new(build_providers(&config));

    let orchestrator_config = OrchestratorConfig {
        poll_interval: Duration::from_secs(config.worker.poll_interval_seconds),
        provider_timeout: Duration::from_secs(config.worker.provider_timeout_seconds),
        backoff_base: chrono::Duration::seconds(config.worker.backoff_base_seconds as i64),
        backoff_max: chrono::Duration::seconds(config.worker.backoff_max_seconds as i64),
    };
    let orchestrator = Arc::new(Orchestrator::new(store, broker, presence, providers, metrics, orchestrator_config));

    let cancel = CancellationToken::new();
    let mut handles = Vec::new();
    for i in 0..config.worker.worker_count {
        let orchestrator = orchestrator.clone();
        let cancel = cancel.clone();
        let worker_id = format!("worker-{i}");
        handles.push(tokio::spawn(async move {
            orchestrator.run(&worker_id, cancel).await;
        }));
    }

    tokio::signal::ctrl_c().await?;
    tracing::info!("shutdown signal received, draining workers");
    cancel.cancel();

    let shutdown = tokio::time::timeout(Duration::from_secs(config.worker.shutdown_timeout_seconds), futures::future::join_all(handles));
    if shutdown.await.is_err() {
        tracing::warn!("worker pool did not drain within shutdown_timeout, exiting anyway");
    }

    let (leases_acquired, leases_timed_out) = orchestrator.worker_stats().snapshot();
    tracing::info!(leases_acquired, leases_timed_out, "worker pool stopped");

    Ok(())
}

fn build_providers(config: &Config) -> ProviderManager {
    let mut manager = ProviderManager::new();

    if let (Some(project_id), Some(_path)) = (&config.providers.fcm_project_id, &config.providers.fcm_credentials_path) {
        let endpoint = format!("https://fcm.googleapis.com/v1/projects/{project_id}/messages:send");
        manager.register(Arc::new(PushProvider::new(endpoint, Some(config.jwt_secret.clone())))).ok();
    }

    if let Some(api_key) = &config.providers.sendgrid_api_key {
        manager.register(Arc::new(EmailProvider::sendgrid(api_key.clone(), "notifications@freerangenotify.invalid"))).ok();
    } else if let (Some(host), Some(user), Some(pass)) = (&config.providers.smtp_host, &config.providers.smtp_user, &config.providers.smtp_pass) {
        let port = config.providers.smtp_port.unwrap_or(587);
        if let Ok(provider) = EmailProvider::smtp(host, port, user, pass, "notifications@freerangenotify.invalid") {
            manager.register(Arc::new(provider)).ok();
        }
    }

    if let (Some(sid), Some(token), Some(from)) = (&config.providers.twilio_account_sid, &config.providers.twilio_auth_token, &config.providers.twilio_from) {
        manager.register(Arc::new(SmsProvider::new(sid.clone(), token.clone(), from.clone()))).ok();
    }

    manager.register(Arc::new(WebhookProvider::new(config.providers.webhook_secret.clone()))).ok();
    manager.register(Arc::new(SseProvider::new())).ok();

    manager
}
