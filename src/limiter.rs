use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::DashMap;

use crate::error::CoreResult;

/// Sliding-window rate limiting plus a daily counter, keyed by caller-chosen
/// strings (`app_id`, or `app_id|user_id`). Counter mutations must be
/// atomic; the Redis implementation relies on single-threaded command
/// execution, the in-memory one on `DashMap`'s per-shard locking.
#[async_trait]
pub trait RateLimiter: Send + Sync {
    /// Accepts if fewer than `limit` events fall in `[now-window, now]`,
    /// then records `now`. Returns `true` when the event is allowed.
    async fn allow(&self, key: &str, limit: u32, window: chrono::Duration) -> CoreResult<bool>;

    /// Atomically increments the daily counter for `key|YYYY-MM-DD(UTC)`.
    /// The increment always happens, even on exceed, so a replayed request
    /// observes the same outcome. Returns `true` iff the post-increment
    /// value is `<= limit`.
    async fn increment_and_check_daily_limit(&self, key: &str, limit: u32) -> CoreResult<bool>;
}

#[derive(Default)]
struct DailyCounter {
    date: String,
    count: u32,
}

/// In-memory reference implementation. Sufficient for tests and a
/// single-node deployment; the sliding window is a pruned `Vec` of
/// timestamps per key.
pub struct MemoryRateLimiter {
    windows: DashMap<String, Vec<DateTime<Utc>>>,
    daily: DashMap<String, DailyCounter>,
}

impl MemoryRateLimiter {
    pub fn new() -> Self {
        Self {
            windows: DashMap::new(),
            daily: DashMap::new(),
        }
    }
}

impl Default for MemoryRateLimiter {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl RateLimiter for MemoryRateLimiter {
    async fn allow(&self, key: &str, limit: u32, window: chrono::Duration) -> CoreResult<bool> {
        let now = Utc::now();
        let mut entry = self.windows.entry(key.to_string()).or_default();
        let cutoff = now - window;
        entry.retain(|ts| *ts > cutoff);
        if entry.len() >= limit as usize {
            return Ok(false);
        }
        entry.push(now);
        Ok(true)
    }

    async fn increment_and_check_daily_limit(&self, key: &str, limit: u32) -> CoreResult<bool> {
        let today = Utc::now().format("%Y-%m-%d").to_string();
        let mut entry = self.daily.entry(key.to_string()).or_default();
        if entry.date != today {
            entry.date = today;
            entry.count = 0;
        }
        entry.count += 1;
        Ok(entry.count <= limit)
    }
}

/// Redis-backed implementation. The sliding window uses a sorted set
/// (`ZADD` + `ZREMRANGEBYSCORE`); the daily counter uses `INCR` + `EXPIRE`
/// with a Lua script so the increment-then-compare is atomic across the
/// two Redis commands atomic.
pub struct RedisRateLimiter {
    conn: redis::aio::ConnectionManager,
}

impl RedisRateLimiter {
    pub fn new(conn: redis::aio::ConnectionManager) -> Self {
        Self { conn }
    }
}

const DAILY_INCR_SCRIPT: &str = r#"
local count = redis.call('INCR', KEYS[1])
if count == 1 then
    redis.call('EXPIRE', KEYS[1], ARGV[1])
end
return count
"#;

#[async_trait]
impl RateLimiter for RedisRateLimiter {
    async fn allow(&self, key: &str, limit: u32, window: chrono::Duration) -> CoreResult<bool> {
        use redis::AsyncCommands;
        let mut conn = self.conn.clone();
        let redis_key = format!("frn:rate:{key}");
        let now = Utc::now().timestamp_millis();
        let cutoff = now - window.num_milliseconds();

        let _: i64 = conn
            .zrembyscore(&redis_key, 0, cutoff)
            .await
            .map_err(|e| crate::error::CoreError::Limiter(e.to_string()))?;
        let count: i64 = conn
            .zcard(&redis_key)
            .await
            .map_err(|e| crate::error::CoreError::Limiter(e.to_string()))?;
        if count >= limit as i64 {
            return Ok(false);
        }
        let _: i64 = conn
            .zadd(&redis_key, now, now)
            .await
            .map_err(|e| crate::error::CoreError::Limiter(e.to_string()))?;
        Ok(true)
    }

    async fn increment_and_check_daily_limit(&self, key: &str, limit: u32) -> CoreResult<bool> {
        let today = Utc::now().format("%Y-%m-%d").to_string();
        let redis_key = format!("frn:daily:{key}:{today}");
        let mut conn = self.conn.clone();
        let script = redis::Script::new(DAILY_INCR_SCRIPT);
        let ttl_seconds = 48 * 3600;
        let count: i64 = script
            .key(&redis_key)
            .arg(ttl_seconds)
            .invoke_async(&mut conn)
            .await
            .map_err(|e| crate::error::CoreError::Limiter(e.to_string()))?;
        Ok(count <= limit as i64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn allows_up_to_limit_then_rejects() {
        let limiter = MemoryRateLimiter::new();
        let window = chrono::Duration::seconds(1);
        assert!(limiter.allow("app", 2, window).await.unwrap());
        assert!(limiter.allow("app", 2, window).await.unwrap());
        assert!(!limiter.allow("app", 2, window).await.unwrap());
    }

    #[tokio::test]
    async fn daily_limit_rejects_after_k_but_keeps_incrementing() {
        let limiter = MemoryRateLimiter::new();
        assert!(limiter.increment_and_check_daily_limit("a|u", 1).await.unwrap());
        assert!(!limiter.increment_and_check_daily_limit("a|u", 1).await.unwrap());
        assert!(!limiter.increment_and_check_daily_limit("a|u", 1).await.unwrap());
    }
}
