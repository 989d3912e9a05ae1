use async_trait::async_trait;
use chrono::Utc;
use dashmap::DashMap;

use crate::error::CoreResult;
use crate::types::PresenceEntry;

/// Short-TTL map from `(app_id, user_id)` to a dynamic delivery endpoint.
/// Write-rare, read-hot; the orchestrator consults it on every dispatch to
/// decide whether to override `default_webhook_url`. May be eventually
/// consistent across ingest nodes, which is why set/lookup round-trips
/// through a shared backend rather than per-process memory in production.
#[async_trait]
pub trait PresenceRegistry: Send + Sync {
    async fn set(&self, app_id: &str, user_id: &str, dynamic_url: &str, ttl: chrono::Duration) -> CoreResult<()>;
    async fn lookup(&self, app_id: &str, user_id: &str) -> CoreResult<Option<PresenceEntry>>;
}

fn key(app_id: &str, user_id: &str) -> String {
    format!("{app_id}:{user_id}")
}

pub struct MemoryPresenceRegistry {
    entries: DashMap<String, PresenceEntry>,
}

impl MemoryPresenceRegistry {
    pub fn new() -> Self {
        Self { entries: DashMap::new() }
    }
}

impl Default for MemoryPresenceRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl PresenceRegistry for MemoryPresenceRegistry {
    async fn set(&self, app_id: &str, user_id: &str, dynamic_url: &str, ttl: chrono::Duration) -> CoreResult<()> {
        let entry = PresenceEntry {
            app_id: app_id.to_string(),
            user_id: user_id.to_string(),
            dynamic_url: dynamic_url.to_string(),
            expires_at: Utc::now() + ttl,
        };
        self.entries.insert(key(app_id, user_id), entry);
        Ok(())
    }

    async fn lookup(&self, app_id: &str, user_id: &str) -> CoreResult<Option<PresenceEntry>> {
        match self.entries.get(&key(app_id, user_id)) {
            Some(entry) if entry.expires_at > Utc::now() => Ok(Some(entry.clone())),
            _ => Ok(None),
        }
    }
}

pub struct RedisPresenceRegistry {
    conn: redis::aio::ConnectionManager,
}

impl RedisPresenceRegistry {
    pub fn new(conn: redis::aio::ConnectionManager) -> Self {
        Self { conn }
    }
}

#[async_trait]
impl PresenceRegistry for RedisPresenceRegistry {
    async fn set(&self, app_id: &str, user_id: &str, dynamic_url: &str, ttl: chrono::Duration) -> CoreResult<()> {
        use redis::AsyncCommands;
        let mut conn = self.conn.clone();
        let redis_key = format!("frn:presence:{app_id}:{user_id}");
        let _: () = conn
            .set_ex(&redis_key, dynamic_url, ttl.num_seconds().max(1) as u64)
            .await
            .map_err(|e| crate::error::CoreError::Presence(e.to_string()))?;
        Ok(())
    }

    async fn lookup(&self, app_id: &str, user_id: &str) -> CoreResult<Option<PresenceEntry>> {
        use redis::AsyncCommands;
        let mut conn = self.conn.clone();
        let redis_key = format!("frn:presence:{app_id}:{user_id}");
        let value: Option<String> = conn
            .get(&redis_key)
            .await
            .map_err(|e| crate::error::CoreError::Presence(e.to_string()))?;
        let ttl: i64 = conn
            .ttl(&redis_key)
            .await
            .map_err(|e| crate::error::CoreError::Presence(e.to_string()))?;
        Ok(value.map(|dynamic_url| PresenceEntry {
            app_id: app_id.to_string(),
            user_id: user_id.to_string(),
            dynamic_url,
            expires_at: Utc::now() + chrono::Duration::seconds(ttl.max(0)),
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn unexpired_entry_is_returned() {
        let registry = MemoryPresenceRegistry::new();
        registry
            .set("app1", "user1", "https://example.test/hook", chrono::Duration::seconds(60))
            .await
            .unwrap();
        let entry = registry.lookup("app1", "user1").await.unwrap();
        assert_eq!(entry.unwrap().dynamic_url, "https://example.test/hook");
    }

    #[tokio::test]
    async fn missing_entry_is_none() {
        let registry = MemoryPresenceRegistry::new();
        assert!(registry.lookup("app1", "nobody").await.unwrap().is_none());
    }
}
