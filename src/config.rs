use std::env;

#[derive(Debug, Clone)]
pub struct Config {
    pub server: ServerConfig,
    pub broker: BrokerConfig,
    pub store: StoreConfig,
    pub jwt_secret: String,
    pub providers: ProviderConfig,
    pub worker: WorkerConfig,
}

#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

#[derive(Debug, Clone)]
pub struct BrokerConfig {
    /// `memory` or a `redis://` URL. `memory` is used by the default dev
    /// profile and by the in-process end-to-end tests.
    pub url: String,
}

#[derive(Debug, Clone)]
pub struct StoreConfig {
    /// `memory` or a `postgres://` URL.
    pub url: String,
    pub max_connections: u32,
}

#[derive(Debug, Clone, Default)]
pub struct ProviderConfig {
    pub fcm_project_id: Option<String>,
    pub fcm_credentials_path: Option<String>,
    pub apns_key_id: Option<String>,
    pub apns_team_id: Option<String>,
    pub apns_bundle_id: Option<String>,
    pub apns_p8_path: Option<String>,
    pub smtp_host: Option<String>,
    pub smtp_port: Option<u16>,
    pub smtp_user: Option<String>,
    pub smtp_pass: Option<String>,
    pub sendgrid_api_key: Option<String>,
    pub twilio_account_sid: Option<String>,
    pub twilio_auth_token: Option<String>,
    pub twilio_from: Option<String>,
    pub webhook_secret: Option<String>,
}

#[derive(Debug, Clone)]
pub struct WorkerConfig {
    pub worker_count: usize,
    pub poll_interval_seconds: u64,
    pub shutdown_timeout_seconds: u64,
    pub provider_timeout_seconds: u64,
    pub backoff_base_seconds: u64,
    pub backoff_max_seconds: u64,
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("missing required environment variable: {0}")]
    MissingEnv(String),
    #[error("invalid value for {0}")]
    InvalidValue(String),
}

fn env_or(key: &str, default: &str) -> String {
    env::var(key).unwrap_or_else(|_| default.to_string())
}

fn env_opt(key: &str) -> Option<String> {
    env::var(key).ok().filter(|v| !v.is_empty())
}

fn env_parse<T: std::str::FromStr>(key: &str, default: T) -> T {
    env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

impl Config {
    /// Loads configuration from `FREERANGE_*`-prefixed environment
    /// variables, falling back to a `.env` file if present. Required
    /// secrets (JWT signing key) must be set or startup fails with exit
    /// code 1.
    pub fn from_env() -> Result<Self, ConfigError> {
        dotenvy::dotenv().ok();

        let jwt_secret = env::var("FREERANGE_JWT_SECRET")
            .map_err(|_| ConfigError::MissingEnv("FREERANGE_JWT_SECRET".to_string()))?;

        Ok(Self {
            server: ServerConfig {
                host: env_or("FREERANGE_HOST", "0.0.0.0"),
                port: env_parse("FREERANGE_PORT", 8080),
            },
            broker: BrokerConfig {
                url: env_or("FREERANGE_BROKER_URL", "memory"),
            },
            store: StoreConfig {
                url: env_or("FREERANGE_STORE_URL", "memory"),
                max_connections: env_parse("FREERANGE_STORE_MAX_CONNECTIONS", 10),
            },
            jwt_secret,
            providers: ProviderConfig {
                fcm_project_id: env_opt("FREERANGE_FCM_PROJECT_ID"),
                fcm_credentials_path: env_opt("FREERANGE_FCM_CREDENTIALS_PATH"),
                apns_key_id: env_opt("FREERANGE_APNS_KEY_ID"),
                apns_team_id: env_opt("FREERANGE_APNS_TEAM_ID"),
                apns_bundle_id: env_opt("FREERANGE_APNS_BUNDLE_ID"),
                apns_p8_path: env_opt("FREERANGE_APNS_P8_PATH"),
                smtp_host: env_opt("FREERANGE_SMTP_HOST"),
                smtp_port: env_opt("FREERANGE_SMTP_PORT").and_then(|v| v.parse().ok()),
                smtp_user: env_opt("FREERANGE_SMTP_USER"),
                smtp_pass: env_opt("FREERANGE_SMTP_PASS"),
                sendgrid_api_key: env_opt("FREERANGE_SENDGRID_API_KEY"),
                twilio_account_sid: env_opt("FREERANGE_TWILIO_ACCOUNT_SID"),
                twilio_auth_token: env_opt("FREERANGE_TWILIO_AUTH_TOKEN"),
                twilio_from: env_opt("FREERANGE_TWILIO_FROM"),
                webhook_secret: env_opt("FREERANGE_WEBHOOK_SECRET"),
            },
            worker: WorkerConfig {
                worker_count: env_parse("FREERANGE_WORKER_COUNT", 5),
                poll_interval_seconds: env_parse("FREERANGE_POLL_INTERVAL_SECONDS", 5),
                shutdown_timeout_seconds: env_parse("FREERANGE_SHUTDOWN_TIMEOUT_SECONDS", 30),
                provider_timeout_seconds: env_parse("FREERANGE_PROVIDER_TIMEOUT_SECONDS", 10),
                backoff_base_seconds: env_parse("FREERANGE_BACKOFF_BASE_SECONDS", 5),
                backoff_max_seconds: env_parse("FREERANGE_BACKOFF_MAX_SECONDS", 300),
            },
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_jwt_secret_is_an_error() {
        env::remove_var("FREERANGE_JWT_SECRET");
        let result = Config::from_env();
        assert!(result.is_err());
    }
}
