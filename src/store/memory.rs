use async_trait::async_trait;
use dashmap::DashMap;

use super::Store;
use crate::error::CoreResult;
use crate::types::{Application, Notification, NotificationStatus, Template, User};

/// In-memory reference `Store`. Backs the unit and end-to-end test suites;
/// narrow enough that swapping in `PostgresStore` changes nothing upstream.
#[derive(Default)]
pub struct MemoryStore {
    applications: DashMap<String, Application>,
    users: DashMap<(String, String), User>,
    templates: DashMap<String, Template>,
    notifications: DashMap<String, Notification>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl Store for MemoryStore {
    async fn create_application(&self, app: Application) -> CoreResult<Application> {
        self.applications.insert(app.app_id.clone(), app.clone());
        Ok(app)
    }

    async fn get_application(&self, app_id: &str) -> CoreResult<Option<Application>> {
        Ok(self.applications.get(app_id).map(|a| a.clone()))
    }

    async fn update_application(&self, app: Application) -> CoreResult<Application> {
        self.applications.insert(app.app_id.clone(), app.clone());
        Ok(app)
    }

    async fn delete_application(&self, app_id: &str) -> CoreResult<()> {
        self.applications.remove(app_id);
        Ok(())
    }

    async fn list_applications(&self) -> CoreResult<Vec<Application>> {
        Ok(self.applications.iter().map(|e| e.value().clone()).collect())
    }

    async fn create_user(&self, user: User) -> CoreResult<User> {
        self.users.insert((user.app_id.clone(), user.user_id.clone()), user.clone());
        Ok(user)
    }

    async fn get_user(&self, app_id: &str, user_id: &str) -> CoreResult<Option<User>> {
        Ok(self.users.get(&(app_id.to_string(), user_id.to_string())).map(|u| u.clone()))
    }

    async fn update_user(&self, user: User) -> CoreResult<User> {
        self.users.insert((user.app_id.clone(), user.user_id.clone()), user.clone());
        Ok(user)
    }

    async fn delete_user(&self, app_id: &str, user_id: &str) -> CoreResult<()> {
        self.users.remove(&(app_id.to_string(), user_id.to_string()));
        Ok(())
    }

    async fn list_users(&self, app_id: &str) -> CoreResult<Vec<User>> {
        Ok(self
            .users
            .iter()
            .filter(|e| e.key().0 == app_id)
            .map(|e| e.value().clone())
            .collect())
    }

    async fn create_template(&self, template: Template) -> CoreResult<Template> {
        self.templates.insert(template.template_id.clone(), template.clone());
        Ok(template)
    }

    async fn get_template(&self, template_id: &str) -> CoreResult<Option<Template>> {
        Ok(self.templates.get(template_id).map(|t| t.clone()))
    }

    async fn update_template(&self, template: Template) -> CoreResult<Template> {
        self.templates.insert(template.template_id.clone(), template.clone());
        Ok(template)
    }

    async fn delete_template(&self, template_id: &str) -> CoreResult<()> {
        self.templates.remove(template_id);
        Ok(())
    }

    async fn list_templates(&self, app_id: &str) -> CoreResult<Vec<Template>> {
        Ok(self
            .templates
            .iter()
            .filter(|e| e.value().app_id == app_id)
            .map(|e| e.value().clone())
            .collect())
    }

    async fn create_notification(&self, notification: Notification) -> CoreResult<Notification> {
        self.notifications
            .insert(notification.notification_id.clone(), notification.clone());
        Ok(notification)
    }

    async fn get_notification(&self, notification_id: &str) -> CoreResult<Option<Notification>> {
        Ok(self.notifications.get(notification_id).map(|n| n.clone()))
    }

    async fn update_notification(&self, notification: Notification) -> CoreResult<Notification> {
        self.notifications
            .insert(notification.notification_id.clone(), notification.clone());
        Ok(notification)
    }

    async fn delete_notification(&self, notification_id: &str) -> CoreResult<()> {
        self.notifications.remove(notification_id);
        Ok(())
    }

    async fn list_notifications_by_status(
        &self,
        app_id: &str,
        user_id: &str,
        status: NotificationStatus,
    ) -> CoreResult<Vec<Notification>> {
        Ok(self
            .notifications
            .iter()
            .filter(|e| {
                let n = e.value();
                n.app_id == app_id && n.user_id == user_id && n.status == status
            })
            .map(|e| e.value().clone())
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{ApplicationSettings, Channel};

    fn app() -> Application {
        Application {
            app_id: "app1".into(),
            name: "Test App".into(),
            api_key_hash: "hash".into(),
            settings: ApplicationSettings {
                default_retries: 3,
                enabled_channels: vec![Channel::Email],
                rate_limit: 10,
            },
        }
    }

    #[tokio::test]
    async fn round_trips_application() {
        let store = MemoryStore::new();
        store.create_application(app()).await.unwrap();
        let fetched = store.get_application("app1").await.unwrap().unwrap();
        assert_eq!(fetched.name, "Test App");
    }

    #[tokio::test]
    async fn delete_removes_application() {
        let store = MemoryStore::new();
        store.create_application(app()).await.unwrap();
        store.delete_application("app1").await.unwrap();
        assert!(store.get_application("app1").await.unwrap().is_none());
    }
}
