use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use axum::body::Body;
use axum::{routing::get, Router};
use dashmap::DashMap;
use freerange_notify::admission::AdmissionEngine;
use freerange_notify::broker::{Broker, MemoryBroker, RedisBroker};
use freerange_notify::config::Config;
use freerange_notify::limiter::{MemoryRateLimiter, RateLimiter, RedisRateLimiter};
use freerange_notify::metrics::Metrics;
use freerange_notify::presence::{MemoryPresenceRegistry, PresenceRegistry, RedisPresenceRegistry};
use freerange_notify::provider::email::EmailProvider;
use freerange_notify::provider::push::PushProvider;
use freerange_notify::provider::sms::SmsProvider;
use freerange_notify::provider::sse::SseProvider;
use freerange_notify::provider::webhook::WebhookProvider;
use freerange_notify::provider::ProviderManager;
use freerange_notify::routes;
use freerange_notify::state::AppState;
use freerange_notify::store::{MemoryStore, Store};
use http::{HeaderValue, StatusCode};
use tower_governor::governor::GovernorConfigBuilder;
use tower_governor::key_extractor::SmartIpKeyExtractor;
use tower_governor::{GovernorError, GovernorLayer};
use tower_http::catch_panic::CatchPanicLayer;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| "freerange_notify=info,tower_http=info".into()))
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = match Config::from_env() {
        Ok(c) => c,
        Err(e) => {
            tracing::error!("configuration error: {e}");
            std::process::exit(1);
        }
    };

    tracing::info!("starting freerange-notify ingest");

    let store: Arc<dyn Store> = if config.store.url == "memory" {
        Arc::new(MemoryStore::new())
    } else {
        #[cfg(feature = "postgres")]
        {
            let pool = freerange_notify::store::PostgresStore::connect(&config.store.url, config.store.max_connections).await?;
            pool.migrate().await?;
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

    let limiter: Arc<dyn RateLimiter> = if config.broker.url == "memory" {
        Arc::new(MemoryRateLimiter::new())
    } else {
        let client = redis::Client::open(config.broker.url.clone())?;
        let conn = redis::aio::ConnectionManager::new(client).await?;
        Arc::new(RedisRateLimiter::new(conn))
    };

    let presence: Arc<dyn PresenceRegistry> = if config.broker.url == "memory" {
        Arc::new(MemoryPresenceRegistry::new())
    } else {
        let client = redis::Client::open(config.broker.url.clone())?;
        let conn = redis::aio::ConnectionManager::new(client).await?;
        Arc::new(RedisPresenceRegistry::new(conn))
    };

    let metrics = Arc::new(Metrics::new());
    let admission = Arc::new(AdmissionEngine::new(store.clone(), broker.clone(), limiter.clone(), metrics.clone()));
    let providers = Arc::new(build_providers(&config));

    let app_state = Arc::new(AppState {
        store,
        broker,
        limiter,
        presence,
        providers,
        admission,
        metrics,
        config: config.clone(),
        api_key_index: DashMap::new(),
    });

    let mut apps_builder = GovernorConfigBuilder::default();
    apps_builder.per_second(5).burst_size(10).key_extractor(SmartIpKeyExtractor);
    apps_builder.error_handler(governor_error_handler);
    let apps_gov_conf = Arc::new(
        apps_builder
            .finish()
            .ok_or_else(|| anyhow::anyhow!("failed to build apps governor config"))?,
    );
    {
        let limiter = apps_gov_conf.limiter().clone();
        std::thread::spawn(move || loop {
            std::thread::sleep(Duration::from_secs(60));
            limiter.retain_recent();
        });
    }

    let app = Router::new()
        .route("/health", get(routes::health::health_check))
        .nest("/v1/apps", routes::apps::router().layer(GovernorLayer { config: apps_gov_conf }))
        .nest("/v1/users", routes::users::router())
        .nest("/v1/templates", routes::templates::router())
        .nest("/v1/notifications", routes::notifications::router())
        .nest("/v1/admin", routes::admin::router())
        .with_state(app_state)
        .layer(CatchPanicLayer::new())
        .layer(TraceLayer::new_for_http())
        .layer(
            CorsLayer::new()
                .allow_origin("*".parse::<HeaderValue>().expect("static CORS origin"))
                .allow_methods([http::Method::GET, http::Method::POST, http::Method::PUT, http::Method::DELETE])
                .allow_headers([http::header::CONTENT_TYPE, http::header::AUTHORIZATION]),
        );

    let addr = format!("{}:{}", config.server.host, config.server.port);
    tracing::info!("ingest listening on {addr}");
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    axum::serve(listener, app.into_make_service_with_connect_info::<SocketAddr>()).await?;

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

fn governor_error_handler(error: GovernorError) -> http::Response<Body> {
    match error {
        GovernorError::TooManyRequests { wait_time, headers } => {
            let body = serde_json::json!({
                "code": "RATE_LIMITED",
                "message": "rate limit exceeded",
                "retry_after_seconds": wait_time,
            })
            .to_string();
            let mut resp = http::Response::new(Body::from(body));
            *resp.status_mut() = StatusCode::TOO_MANY_REQUESTS;
            if let Some(hmap) = headers {
                for (name, value) in hmap.iter() {
                    resp.headers_mut().append(name.clone(), value.clone());
                }
            }
            resp
        }
        GovernorError::UnableToExtractKey => {
            let mut resp = http::Response::new(Body::from("unable to determine client IP for rate limiting"));
            *resp.status_mut() = StatusCode::BAD_REQUEST;
            resp
        }
        GovernorError::Other { code, msg, headers } => {
            let mut resp = http::Response::new(Body::from(msg.unwrap_or_else(|| "rate limiting error".to_string())));
            *resp.status_mut() = StatusCode::from_u16(code.as_u16()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
            if let Some(hmap) = headers {
                for (name, value) in hmap.iter() {
                    resp.headers_mut().append(name.clone(), value.clone());
                }
            }
            resp
        }
    }
}
