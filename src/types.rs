use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

/// Delivery channel. Ordering here is declaration order only; priority
/// ordering lives on [`Priority`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Channel {
    Push,
    Email,
    Sms,
    Webhook,
    Sse,
}

impl Channel {
    pub fn as_str(&self) -> &'static str {
        match self {
            Channel::Push => "push",
            Channel::Email => "email",
            Channel::Sms => "sms",
            Channel::Webhook => "webhook",
            Channel::Sse => "sse",
        }
    }
}

/// Strictly ordered; `Critical` is the only priority that bypasses DND and
/// the only one `PromoteForUser` does not promote jobs to (it promotes to
/// `High`, never `Critical`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Priority {
    Low,
    Normal,
    High,
    Critical,
}

impl Priority {
    pub fn all_desc() -> [Priority; 4] {
        [Priority::Critical, Priority::High, Priority::Normal, Priority::Low]
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApplicationSettings {
    pub default_retries: u32,
    pub enabled_channels: Vec<Channel>,
    /// requests per second allowed for this application's admission rate limit.
    pub rate_limit: u32,
}

impl ApplicationSettings {
    pub fn channel_enabled(&self, channel: Channel) -> bool {
        self.enabled_channels.contains(&channel)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Application {
    pub app_id: String,
    pub name: String,
    pub api_key_hash: String,
    pub settings: ApplicationSettings,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Platform {
    Ios,
    Android,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Device {
    pub device_id: String,
    pub platform: Platform,
    pub token: String,
    pub active: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UserPreferences {
    pub channel_enabled: HashMap<Channel, bool>,
    pub dnd: bool,
    pub dnd_window: Option<(u8, u8)>,
    pub daily_limit: u32,
}

impl UserPreferences {
    pub fn is_channel_enabled(&self, channel: Channel) -> bool {
        self.channel_enabled.get(&channel).copied().unwrap_or(true)
    }
}

impl Default for UserPreferences {
    fn default() -> Self {
        Self {
            channel_enabled: HashMap::new(),
            dnd: false,
            dnd_window: None,
            daily_limit: u32::MAX,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct User {
    pub app_id: String,
    pub user_id: String,
    pub external_user_id: String,
    pub default_webhook_url: Option<String>,
    pub devices: Vec<Device>,
    pub preferences: UserPreferences,
    pub deleted: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Template {
    pub template_id: String,
    pub app_id: String,
    pub channel: Channel,
    pub subject: Option<String>,
    pub body: String,
    pub declared_variables: Vec<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NotificationStatus {
    Scheduled,
    Queued,
    Processing,
    Delivered,
    Failed,
    Cancelled,
}

impl NotificationStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            NotificationStatus::Delivered | NotificationStatus::Failed | NotificationStatus::Cancelled
        )
    }
}

/// Machine-readable classification of a delivery-time failure. Drives the
/// orchestrator's retry decision; never surfaced to the ingest caller.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorType {
    Network,
    Timeout,
    RateLimit,
    ProviderApi,
    Authentication,
    InvalidRequest,
    Unknown,
}

impl ErrorType {
    pub fn is_retriable(&self) -> bool {
        !matches!(self, ErrorType::Authentication | ErrorType::InvalidRequest)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LastError {
    pub error_type: ErrorType,
    pub message: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RenderedContent {
    pub subject: Option<String>,
    pub body: String,
    pub data: HashMap<String, Value>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Notification {
    pub notification_id: String,
    pub app_id: String,
    pub user_id: String,
    pub channel: Channel,
    pub template_id: String,
    pub rendered: RenderedContent,
    pub priority: Priority,
    pub status: NotificationStatus,
    pub attempts: u32,
    pub max_retries: u32,
    pub last_error: Option<LastError>,
    pub scheduled_at: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Inbound, already-authenticated request handed from the REST transport to
/// the admission engine.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SendRequest {
    pub app_id: String,
    pub user_id: String,
    pub channel: Channel,
    pub template_id: String,
    pub priority: Priority,
    pub vars: HashMap<String, Value>,
    pub scheduled_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PresenceEntry {
    pub app_id: String,
    pub user_id: String,
    pub dynamic_url: String,
    pub expires_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueueJob {
    pub job_id: String,
    pub notification_id: String,
    pub app_id: String,
    pub user_id: String,
    pub priority: Priority,
    pub visible_at: DateTime<Utc>,
    pub lease_owner: Option<String>,
    pub lease_expires_at: Option<DateTime<Utc>>,
    pub attempt: u32,
    /// Monotonic insertion counter, used to break `visible_at` ties in FIFO order.
    pub sequence: u64,
}

impl QueueJob {
    pub fn new(
        notification_id: impl Into<String>,
        app_id: impl Into<String>,
        user_id: impl Into<String>,
        priority: Priority,
        visible_at: DateTime<Utc>,
        sequence: u64,
    ) -> Self {
        Self {
            job_id: Uuid::new_v4().to_string(),
            notification_id: notification_id.into(),
            app_id: app_id.into(),
            user_id: user_id.into(),
            priority,
            visible_at,
            lease_owner: None,
            lease_expires_at: None,
            attempt: 0,
            sequence,
        }
    }

    pub fn is_leased(&self, now: DateTime<Utc>) -> bool {
        match self.lease_expires_at {
            Some(expiry) => expiry > now,
            None => false,
        }
    }
}

/// Outcome a provider reports for a single send attempt.
#[derive(Debug, Clone)]
pub enum SendOutcome {
    Success {
        provider_message_id: String,
        delivery_time: DateTime<Utc>,
        metadata: HashMap<String, Value>,
    },
    Failure {
        error_type: ErrorType,
        message: String,
    },
}
