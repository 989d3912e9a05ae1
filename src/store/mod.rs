mod memory;
#[cfg(feature = "postgres")]
mod postgres_store;

pub use memory::MemoryStore;
#[cfg(feature = "postgres")]
pub use postgres_store::PostgresStore;

use async_trait::async_trait;

use crate::error::CoreResult;
use crate::types::{Application, Notification, NotificationStatus, Template, User};

/// Four operations per entity plus a filtered list, the repository
/// boundary named in the design notes. An in-memory implementation is
/// expected to suffice for tests; `PostgresStore` is the one concrete
/// production implementation.
#[async_trait]
pub trait Store: Send + Sync {
    async fn create_application(&self, app: Application) -> CoreResult<Application>;
    async fn get_application(&self, app_id: &str) -> CoreResult<Option<Application>>;
    async fn update_application(&self, app: Application) -> CoreResult<Application>;
    async fn delete_application(&self, app_id: &str) -> CoreResult<()>;
    async fn list_applications(&self) -> CoreResult<Vec<Application>>;

    async fn create_user(&self, user: User) -> CoreResult<User>;
    async fn get_user(&self, app_id: &str, user_id: &str) -> CoreResult<Option<User>>;
    async fn update_user(&self, user: User) -> CoreResult<User>;
    async fn delete_user(&self, app_id: &str, user_id: &str) -> CoreResult<()>;
    async fn list_users(&self, app_id: &str) -> CoreResult<Vec<User>>;

    async fn create_template(&self, template: Template) -> CoreResult<Template>;
    async fn get_template(&self, template_id: &str) -> CoreResult<Option<Template>>;
    async fn update_template(&self, template: Template) -> CoreResult<Template>;
    async fn delete_template(&self, template_id: &str) -> CoreResult<()>;
    async fn list_templates(&self, app_id: &str) -> CoreResult<Vec<Template>>;

    async fn create_notification(&self, notification: Notification) -> CoreResult<Notification>;
    async fn get_notification(&self, notification_id: &str) -> CoreResult<Option<Notification>>;
    async fn update_notification(&self, notification: Notification) -> CoreResult<Notification>;
    async fn delete_notification(&self, notification_id: &str) -> CoreResult<()>;
    async fn list_notifications_by_status(
        &self,
        app_id: &str,
        user_id: &str,
        status: NotificationStatus,
    ) -> CoreResult<Vec<Notification>>;
}
