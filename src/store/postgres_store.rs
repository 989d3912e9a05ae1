use async_trait::async_trait;
use sqlx::types::Json;
use sqlx::{FromRow, PgPool};

use super::Store;
use crate::error::{CoreError, CoreResult};
use crate::types::{
    Application, ApplicationSettings, Notification, NotificationStatus, RenderedContent, Template, User,
};

/// The one concrete production `Store`, backed by Postgres via `sqlx`, in
/// the same repository-per-entity shape as the in-memory implementation.
/// Nested structures (`settings`, `preferences`, `rendered`) are stored as
/// `jsonb` columns rather than normalized tables — the store boundary only
/// promises Create/Get/Update/Delete/List, not a particular schema.
pub struct PostgresStore {
    pool: PgPool,
}

impl PostgresStore {
    pub async fn connect(database_url: &str, max_connections: u32) -> Result<Self, sqlx::Error> {
        let pool = sqlx::postgres::PgPoolOptions::new()
            .max_connections(max_connections)
            .connect(database_url)
            .await?;
        Ok(Self { pool })
    }

    pub async fn migrate(&self) -> Result<(), sqlx::Error> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS applications (
                app_id TEXT PRIMARY KEY,
                name TEXT NOT NULL,
                api_key_hash TEXT NOT NULL,
                settings JSONB NOT NULL
            );
            CREATE TABLE IF NOT EXISTS users (
                app_id TEXT NOT NULL,
                user_id TEXT NOT NULL,
                external_user_id TEXT NOT NULL,
                default_webhook_url TEXT,
                devices JSONB NOT NULL,
                preferences JSONB NOT NULL,
                deleted BOOLEAN NOT NULL DEFAULT FALSE,
                PRIMARY KEY (app_id, user_id)
            );
            CREATE TABLE IF NOT EXISTS templates (
                template_id TEXT PRIMARY KEY,
                app_id TEXT NOT NULL,
                channel TEXT NOT NULL,
                subject TEXT,
                body TEXT NOT NULL,
                declared_variables JSONB NOT NULL
            );
            CREATE TABLE IF NOT EXISTS notifications (
                notification_id TEXT PRIMARY KEY,
                app_id TEXT NOT NULL,
                user_id TEXT NOT NULL,
                channel TEXT NOT NULL,
                template_id TEXT NOT NULL,
                rendered JSONB NOT NULL,
                priority TEXT NOT NULL,
                status TEXT NOT NULL,
                attempts INTEGER NOT NULL,
                max_retries INTEGER NOT NULL,
                last_error JSONB,
                scheduled_at TIMESTAMPTZ NOT NULL,
                created_at TIMESTAMPTZ NOT NULL,
                updated_at TIMESTAMPTZ NOT NULL
            );
            "#,
        )
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}

fn db_err(e: sqlx::Error) -> CoreError {
    CoreError::Store(e.to_string())
}

#[derive(FromRow)]
struct ApplicationRow {
    app_id: String,
    name: String,
    api_key_hash: String,
    settings: Json<ApplicationSettings>,
}

impl From<ApplicationRow> for Application {
    fn from(row: ApplicationRow) -> Self {
        Application {
            app_id: row.app_id,
            name: row.name,
            api_key_hash: row.api_key_hash,
            settings: row.settings.0,
        }
    }
}

#[async_trait]
impl Store for PostgresStore {
    async fn create_application(&self, app: Application) -> CoreResult<Application> {
        let row: ApplicationRow = sqlx::query_as(
            r#"INSERT INTO applications (app_id, name, api_key_hash, settings)
               VALUES ($1, $2, $3, $4)
               RETURNING app_id, name, api_key_hash, settings"#,
        )
        .bind(&app.app_id)
        .bind(&app.name)
        .bind(&app.api_key_hash)
        .bind(Json(&app.settings))
        .fetch_one(&self.pool)
        .await
        .map_err(db_err)?;
        Ok(row.into())
    }

    async fn get_application(&self, app_id: &str) -> CoreResult<Option<Application>> {
        let row: Option<ApplicationRow> =
            sqlx::query_as("SELECT app_id, name, api_key_hash, settings FROM applications WHERE app_id = $1")
                .bind(app_id)
                .fetch_optional(&self.pool)
                .await
                .map_err(db_err)?;
        Ok(row.map(Into::into))
    }

    async fn update_application(&self, app: Application) -> CoreResult<Application> {
        let row: ApplicationRow = sqlx::query_as(
            r#"UPDATE applications SET name = $2, api_key_hash = $3, settings = $4
               WHERE app_id = $1
               RETURNING app_id, name, api_key_hash, settings"#,
        )
        .bind(&app.app_id)
        .bind(&app.name)
        .bind(&app.api_key_hash)
        .bind(Json(&app.settings))
        .fetch_one(&self.pool)
        .await
        .map_err(db_err)?;
        Ok(row.into())
    }

    async fn delete_application(&self, app_id: &str) -> CoreResult<()> {
        sqlx::query("DELETE FROM applications WHERE app_id = $1")
            .bind(app_id)
            .execute(&self.pool)
            .await
            .map_err(db_err)?;
        Ok(())
    }

    async fn list_applications(&self) -> CoreResult<Vec<Application>> {
        let rows: Vec<ApplicationRow> = sqlx::query_as("SELECT app_id, name, api_key_hash, settings FROM applications")
            .fetch_all(&self.pool)
            .await
            .map_err(db_err)?;
        Ok(rows.into_iter().map(Into::into).collect())
    }

    async fn create_user(&self, user: User) -> CoreResult<User> {
        sqlx::query(
            r#"INSERT INTO users (app_id, user_id, external_user_id, default_webhook_url, devices, preferences, deleted)
               VALUES ($1, $2, $3, $4, $5, $6, $7)"#,
        )
        .bind(&user.app_id)
        .bind(&user.user_id)
        .bind(&user.external_user_id)
        .bind(&user.default_webhook_url)
        .bind(Json(&user.devices))
        .bind(Json(&user.preferences))
        .bind(user.deleted)
        .execute(&self.pool)
        .await
        .map_err(db_err)?;
        Ok(user)
    }

    async fn get_user(&self, app_id: &str, user_id: &str) -> CoreResult<Option<User>> {
        #[derive(FromRow)]
        struct Row {
            app_id: String,
            user_id: String,
            external_user_id: String,
            default_webhook_url: Option<String>,
            devices: Json<Vec<crate::types::Device>>,
            preferences: Json<crate::types::UserPreferences>,
            deleted: bool,
        }
        let row: Option<Row> = sqlx::query_as(
            "SELECT app_id, user_id, external_user_id, default_webhook_url, devices, preferences, deleted
             FROM users WHERE app_id = $1 AND user_id = $2",
        )
        .bind(app_id)
        .bind(user_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(db_err)?;
        Ok(row.map(|r| User {
            app_id: r.app_id,
            user_id: r.user_id,
            external_user_id: r.external_user_id,
            default_webhook_url: r.default_webhook_url,
            devices: r.devices.0,
            preferences: r.preferences.0,
            deleted: r.deleted,
        }))
    }

    async fn update_user(&self, user: User) -> CoreResult<User> {
        sqlx::query(
            r#"UPDATE users SET external_user_id = $3, default_webhook_url = $4, devices = $5, preferences = $6, deleted = $7
               WHERE app_id = $1 AND user_id = $2"#,
        )
        .bind(&user.app_id)
        .bind(&user.user_id)
        .bind(&user.external_user_id)
        .bind(&user.default_webhook_url)
        .bind(Json(&user.devices))
        .bind(Json(&user.preferences))
        .bind(user.deleted)
        .execute(&self.pool)
        .await
        .map_err(db_err)?;
        Ok(user)
    }

    async fn delete_user(&self, app_id: &str, user_id: &str) -> CoreResult<()> {
        sqlx::query("DELETE FROM users WHERE app_id = $1 AND user_id = $2")
            .bind(app_id)
            .bind(user_id)
            .execute(&self.pool)
            .await
            .map_err(db_err)?;
        Ok(())
    }

    async fn list_users(&self, app_id: &str) -> CoreResult<Vec<User>> {
        #[derive(FromRow)]
        struct Row {
            app_id: String,
            user_id: String,
            external_user_id: String,
            default_webhook_url: Option<String>,
            devices: Json<Vec<crate::types::Device>>,
            preferences: Json<crate::types::UserPreferences>,
            deleted: bool,
        }
        let rows: Vec<Row> = sqlx::query_as(
            "SELECT app_id, user_id, external_user_id, default_webhook_url, devices, preferences, deleted
             FROM users WHERE app_id = $1",
        )
        .bind(app_id)
        .fetch_all(&self.pool)
        .await
        .map_err(db_err)?;
        Ok(rows
            .into_iter()
            .map(|r| User {
                app_id: r.app_id,
                user_id: r.user_id,
                external_user_id: r.external_user_id,
                default_webhook_url: r.default_webhook_url,
                devices: r.devices.0,
                preferences: r.preferences.0,
                deleted: r.deleted,
            })
            .collect())
    }

    async fn create_template(&self, template: Template) -> CoreResult<Template> {
        sqlx::query(
            r#"INSERT INTO templates (template_id, app_id, channel, subject, body, declared_variables)
               VALUES ($1, $2, $3, $4, $5, $6)"#,
        )
        .bind(&template.template_id)
        .bind(&template.app_id)
        .bind(template.channel.as_str())
        .bind(&template.subject)
        .bind(&template.body)
        .bind(Json(&template.declared_variables))
        .execute(&self.pool)
        .await
        .map_err(db_err)?;
        Ok(template)
    }

    async fn get_template(&self, template_id: &str) -> CoreResult<Option<Template>> {
        let row = fetch_template(&self.pool, template_id).await?;
        Ok(row)
    }

    async fn update_template(&self, template: Template) -> CoreResult<Template> {
        sqlx::query(
            r#"UPDATE templates SET app_id = $2, channel = $3, subject = $4, body = $5, declared_variables = $6
               WHERE template_id = $1"#,
        )
        .bind(&template.template_id)
        .bind(&template.app_id)
        .bind(template.channel.as_str())
        .bind(&template.subject)
        .bind(&template.body)
        .bind(Json(&template.declared_variables))
        .execute(&self.pool)
        .await
        .map_err(db_err)?;
        Ok(template)
    }

    async fn delete_template(&self, template_id: &str) -> CoreResult<()> {
        sqlx::query("DELETE FROM templates WHERE template_id = $1")
            .bind(template_id)
            .execute(&self.pool)
            .await
            .map_err(db_err)?;
        Ok(())
    }

    async fn list_templates(&self, app_id: &str) -> CoreResult<Vec<Template>> {
        #[derive(FromRow)]
        struct Row {
            template_id: String,
            app_id: String,
            channel: String,
            subject: Option<String>,
            body: String,
            declared_variables: Json<Vec<String>>,
        }
        let rows: Vec<Row> = sqlx::query_as(
            "SELECT template_id, app_id, channel, subject, body, declared_variables FROM templates WHERE app_id = $1",
        )
        .bind(app_id)
        .fetch_all(&self.pool)
        .await
        .map_err(db_err)?;
        rows.into_iter()
            .map(|r| {
                Ok(Template {
                    template_id: r.template_id,
                    app_id: r.app_id,
                    channel: parse_channel(&r.channel)?,
                    subject: r.subject,
                    body: r.body,
                    declared_variables: r.declared_variables.0,
                })
            })
            .collect()
    }

    async fn create_notification(&self, notification: Notification) -> CoreResult<Notification> {
        sqlx::query(
            r#"INSERT INTO notifications
               (notification_id, app_id, user_id, channel, template_id, rendered, priority, status,
                attempts, max_retries, last_error, scheduled_at, created_at, updated_at)
               VALUES ($1,$2,$3,$4,$5,$6,$7,$8,$9,$10,$11,$12,$13,$14)"#,
        )
        .bind(&notification.notification_id)
        .bind(&notification.app_id)
        .bind(&notification.user_id)
        .bind(notification.channel.as_str())
        .bind(&notification.template_id)
        .bind(Json(&notification.rendered))
        .bind(format!("{:?}", notification.priority))
        .bind(format!("{:?}", notification.status))
        .bind(notification.attempts as i32)
        .bind(notification.max_retries as i32)
        .bind(notification.last_error.as_ref().map(Json))
        .bind(notification.scheduled_at)
        .bind(notification.created_at)
        .bind(notification.updated_at)
        .execute(&self.pool)
        .await
        .map_err(db_err)?;
        Ok(notification)
    }

    async fn get_notification(&self, notification_id: &str) -> CoreResult<Option<Notification>> {
        fetch_notification(&self.pool, "WHERE notification_id = $1", notification_id)
            .await
            .map(|mut v| v.pop())
    }

    async fn update_notification(&self, notification: Notification) -> CoreResult<Notification> {
        sqlx::query(
            r#"UPDATE notifications SET rendered = $2, priority = $3, status = $4, attempts = $5,
               max_retries = $6, last_error = $7, scheduled_at = $8, updated_at = $9
               WHERE notification_id = $1"#,
        )
        .bind(&notification.notification_id)
        .bind(Json(&notification.rendered))
        .bind(format!("{:?}", notification.priority))
        .bind(format!("{:?}", notification.status))
        .bind(notification.attempts as i32)
        .bind(notification.max_retries as i32)
        .bind(notification.last_error.as_ref().map(Json))
        .bind(notification.scheduled_at)
        .bind(notification.updated_at)
        .execute(&self.pool)
        .await
        .map_err(db_err)?;
        Ok(notification)
    }

    async fn delete_notification(&self, notification_id: &str) -> CoreResult<()> {
        sqlx::query("DELETE FROM notifications WHERE notification_id = $1")
            .bind(notification_id)
            .execute(&self.pool)
            .await
            .map_err(db_err)?;
        Ok(())
    }

    async fn list_notifications_by_status(
        &self,
        app_id: &str,
        user_id: &str,
        status: NotificationStatus,
    ) -> CoreResult<Vec<Notification>> {
        let status_str = format!("{:?}", status);
        let rows: Vec<NotificationRow> = sqlx::query_as(
            r#"SELECT notification_id, app_id, user_id, channel, template_id, rendered, priority, status,
                      attempts, max_retries, last_error, scheduled_at, created_at, updated_at
               FROM notifications WHERE app_id = $1 AND user_id = $2 AND status = $3"#,
        )
        .bind(app_id)
        .bind(user_id)
        .bind(&status_str)
        .fetch_all(&self.pool)
        .await
        .map_err(db_err)?;
        rows.into_iter().map(TryInto::try_into).collect()
    }
}

#[derive(FromRow)]
struct NotificationRow {
    notification_id: String,
    app_id: String,
    user_id: String,
    channel: String,
    template_id: String,
    rendered: Json<RenderedContent>,
    priority: String,
    status: String,
    attempts: i32,
    max_retries: i32,
    last_error: Option<Json<crate::types::LastError>>,
    scheduled_at: chrono::DateTime<chrono::Utc>,
    created_at: chrono::DateTime<chrono::Utc>,
    updated_at: chrono::DateTime<chrono::Utc>,
}

impl TryFrom<NotificationRow> for Notification {
    type Error = CoreError;

    fn try_from(row: NotificationRow) -> Result<Self, Self::Error> {
        Ok(Notification {
            notification_id: row.notification_id,
            app_id: row.app_id,
            user_id: row.user_id,
            channel: parse_channel(&row.channel)?,
            template_id: row.template_id,
            rendered: row.rendered.0,
            priority: parse_priority(&row.priority)?,
            status: parse_status(&row.status)?,
            attempts: row.attempts as u32,
            max_retries: row.max_retries as u32,
            last_error: row.last_error.map(|j| j.0),
            scheduled_at: row.scheduled_at,
            created_at: row.created_at,
            updated_at: row.updated_at,
        })
    }
}

async fn fetch_notification(
    pool: &PgPool,
    clause: &str,
    param: &str,
) -> CoreResult<Vec<Notification>> {
    let sql = format!(
        "SELECT notification_id, app_id, user_id, channel, template_id, rendered, priority, status,
                attempts, max_retries, last_error, scheduled_at, created_at, updated_at
         FROM notifications {clause}"
    );
    let rows: Vec<NotificationRow> = sqlx::query_as(&sql).bind(param).fetch_all(pool).await.map_err(db_err)?;
    rows.into_iter().map(TryInto::try_into).collect()
}

async fn fetch_template(pool: &PgPool, template_id: &str) -> CoreResult<Option<Template>> {
    #[derive(FromRow)]
    struct Row {
        template_id: String,
        app_id: String,
        channel: String,
        subject: Option<String>,
        body: String,
        declared_variables: Json<Vec<String>>,
    }
    let row: Option<Row> = sqlx::query_as(
        "SELECT template_id, app_id, channel, subject, body, declared_variables FROM templates WHERE template_id = $1",
    )
    .bind(template_id)
    .fetch_optional(pool)
    .await
    .map_err(db_err)?;
    row.map(|r| {
        Ok(Template {
            template_id: r.template_id,
            app_id: r.app_id,
            channel: parse_channel(&r.channel)?,
            subject: r.subject,
            body: r.body,
            declared_variables: r.declared_variables.0,
        })
    })
    .transpose()
}

fn parse_channel(s: &str) -> CoreResult<crate::types::Channel> {
    use crate::types::Channel;
    Ok(match s {
        "push" => Channel::Push,
        "email" => Channel::Email,
        "sms" => Channel::Sms,
        "webhook" => Channel::Webhook,
        "sse" => Channel::Sse,
        other => return Err(CoreError::Store(format!("unknown channel in row: {other}"))),
    })
}

fn parse_priority(s: &str) -> CoreResult<crate::types::Priority> {
    use crate::types::Priority;
    Ok(match s {
        "Low" => Priority::Low,
        "Normal" => Priority::Normal,
        "High" => Priority::High,
        "Critical" => Priority::Critical,
        other => return Err(CoreError::Store(format!("unknown priority in row: {other}"))),
    })
}

fn parse_status(s: &str) -> CoreResult<NotificationStatus> {
    Ok(match s {
        "Scheduled" => NotificationStatus::Scheduled,
        "Queued" => NotificationStatus::Queued,
        "Processing" => NotificationStatus::Processing,
        "Delivered" => NotificationStatus::Delivered,
        "Failed" => NotificationStatus::Failed,
        "Cancelled" => NotificationStatus::Cancelled,
        other => return Err(CoreError::Store(format!("unknown status in row: {other}"))),
    })
}
