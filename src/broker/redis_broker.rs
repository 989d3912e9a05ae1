use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{Duration, Utc};
use redis::AsyncCommands;
use serde::{Deserialize, Serialize};

use super::{Broker, DlqEntry, QueueStats};
use crate::error::{CoreError, CoreResult};
use crate::types::{Priority, QueueJob};

/// Redis-backed broker. One sorted set per priority (`frn:queue:{priority}`,
/// scored by `visible_at`), a `frn:lease:{job_id}` key whose TTL models the
/// visibility timeout, and a `frn:dlq` list. The job payload itself travels
/// as JSON in `frn:job:{job_id}` since Redis sorted sets only store scored
/// members, not arbitrary structs.
pub struct RedisBroker {
    conn: redis::aio::ConnectionManager,
}

impl RedisBroker {
    pub fn new(conn: redis::aio::ConnectionManager) -> Self {
        Self { conn }
    }

    fn queue_key(priority: Priority) -> String {
        format!("frn:queue:{}", priority_str(priority))
    }

    fn job_key(job_id: &str) -> String {
        format!("frn:job:{job_id}")
    }

    fn lease_key(job_id: &str) -> String {
        format!("frn:lease:{job_id}")
    }
}

fn priority_str(p: Priority) -> &'static str {
    match p {
        Priority::Critical => "critical",
        Priority::High => "high",
        Priority::Normal => "normal",
        Priority::Low => "low",
    }
}

#[derive(Serialize, Deserialize)]
struct StoredJob {
    job: QueueJob,
}

fn err(e: impl std::fmt::Display) -> CoreError {
    CoreError::Broker(e.to_string())
}

#[async_trait]
impl Broker for RedisBroker {
    async fn push(&self, job: QueueJob) -> CoreResult<()> {
        let mut conn = self.conn.clone();
        let payload = serde_json::to_string(&StoredJob { job: job.clone() }).map_err(err)?;
        let score = job.visible_at.timestamp_millis();
        let _: () = conn.set(Self::job_key(&job.job_id), payload).await.map_err(err)?;
        let _: () = conn
            .zadd(Self::queue_key(job.priority), &job.job_id, score)
            .await
            .map_err(err)?;
        Ok(())
    }

    async fn lease_next(&self, consumer_id: &str, lease_ttl: Duration) -> CoreResult<Option<QueueJob>> {
        let mut conn = self.conn.clone();
        let now = Utc::now().timestamp_millis();

        for priority in Priority::all_desc() {
            let candidates: Vec<String> = conn
                .zrangebyscore_limit(Self::queue_key(priority), 0, now, 0, 50)
                .await
                .map_err(err)?;

            for job_id in candidates {
                let lease_key = Self::lease_key(&job_id);
                let acquired: bool = conn
                    .set_nx(&lease_key, consumer_id)
                    .await
                    .map_err(err)?;
                if !acquired {
                    continue;
                }
                let _: () = conn
                    .expire(&lease_key, lease_ttl.num_seconds().max(1))
                    .await
                    .map_err(err)?;

                let raw: Option<String> = conn.get(Self::job_key(&job_id)).await.map_err(err)?;
                let Some(raw) = raw else {
                    continue;
                };
                let mut stored: StoredJob = serde_json::from_str(&raw).map_err(err)?;
                stored.job.lease_owner = Some(consumer_id.to_string());
                stored.job.lease_expires_at = Some(Utc::now() + lease_ttl);
                let _: () = conn
                    .set(Self::job_key(&job_id), serde_json::to_string(&stored).map_err(err)?)
                    .await
                    .map_err(err)?;
                return Ok(Some(stored.job));
            }
        }
        Ok(None)
    }

    async fn heartbeat(&self, job_id: &str, consumer_id: &str, lease_ttl: Duration) -> CoreResult<()> {
        let mut conn = self.conn.clone();
        let holder: Option<String> = conn.get(Self::lease_key(job_id)).await.map_err(err)?;
        if holder.as_deref() == Some(consumer_id) {
            let _: () = conn
                .expire(Self::lease_key(job_id), lease_ttl.num_seconds().max(1))
                .await
                .map_err(err)?;
        }
        Ok(())
    }

    async fn ack(&self, job_id: &str) -> CoreResult<()> {
        let mut conn = self.conn.clone();
        let raw: Option<String> = conn.get(Self::job_key(job_id)).await.map_err(err)?;
        if let Some(raw) = raw {
            let stored: StoredJob = serde_json::from_str(&raw).map_err(err)?;
            let _: () = conn.zrem(Self::queue_key(stored.job.priority), job_id).await.map_err(err)?;
        }
        let _: () = conn.del(Self::job_key(job_id)).await.map_err(err)?;
        let _: () = conn.del(Self::lease_key(job_id)).await.map_err(err)?;
        Ok(())
    }

    async fn nack(&self, job_id: &str, delay: Duration) -> CoreResult<()> {
        let mut conn = self.conn.clone();
        let raw: Option<String> = conn.get(Self::job_key(job_id)).await.map_err(err)?;
        let Some(raw) = raw else { return Ok(()) };
        let mut stored: StoredJob = serde_json::from_str(&raw).map_err(err)?;
        stored.job.lease_owner = None;
        stored.job.lease_expires_at = None;
        stored.job.attempt += 1;
        stored.job.visible_at = Utc::now() + delay;
        let new_score = stored.job.visible_at.timestamp_millis();

        let _: () = conn
            .set(Self::job_key(job_id), serde_json::to_string(&stored).map_err(err)?)
            .await
            .map_err(err)?;
        let _: () = conn.zadd(Self::queue_key(stored.job.priority), job_id, new_score).await.map_err(err)?;
        let _: () = conn.del(Self::lease_key(job_id)).await.map_err(err)?;
        Ok(())
    }

    async fn dead_letter(&self, job_id: &str, reason: &str) -> CoreResult<()> {
        let mut conn = self.conn.clone();
        let raw: Option<String> = conn.get(Self::job_key(job_id)).await.map_err(err)?;
        let Some(raw) = raw else { return Ok(()) };
        let stored: StoredJob = serde_json::from_str(&raw).map_err(err)?;
        let _: () = conn.zrem(Self::queue_key(stored.job.priority), job_id).await.map_err(err)?;
        let _: () = conn.del(Self::lease_key(job_id)).await.map_err(err)?;

        let dlq_entry = DlqEntry {
            job: stored.job,
            reason: reason.to_string(),
        };
        let payload = serde_json::to_string(&(dlq_entry.job, dlq_entry.reason)).map_err(err)?;
        let _: () = conn.rpush("frn:dlq", payload).await.map_err(err)?;
        Ok(())
    }

    async fn dlq_list(&self, limit: usize) -> CoreResult<Vec<DlqEntry>> {
        let mut conn = self.conn.clone();
        let raw: Vec<String> = conn.lrange("frn:dlq", 0, limit as isize - 1).await.map_err(err)?;
        raw.into_iter()
            .map(|s| {
                let (job, reason): (QueueJob, String) = serde_json::from_str(&s).map_err(err)?;
                Ok(DlqEntry { job, reason })
            })
            .collect()
    }

    async fn dlq_replay(&self, job_id: &str) -> CoreResult<()> {
        let mut conn = self.conn.clone();
        let all: Vec<String> = conn.lrange("frn:dlq", 0, -1).await.map_err(err)?;
        for raw in all {
            let (mut job, _reason): (QueueJob, String) = serde_json::from_str(&raw).map_err(err)?;
            if job.job_id == job_id {
                let _: () = conn.lrem("frn:dlq", 1, raw).await.map_err(err)?;
                job.attempt = 0;
                job.visible_at = Utc::now();
                job.lease_owner = None;
                job.lease_expires_at = None;
                self.push(job).await?;
                return Ok(());
            }
        }
        Ok(())
    }

    async fn promote_for_user(&self, app_id: &str, user_id: &str) -> CoreResult<()> {
        let mut conn = self.conn.clone();
        let now = Utc::now().timestamp_millis();
        for priority in Priority::all_desc() {
            if priority == Priority::Critical {
                continue;
            }
            let job_ids: Vec<String> = conn.zrange(Self::queue_key(priority), 0, -1).await.map_err(err)?;
            for job_id in job_ids {
                let raw: Option<String> = conn.get(Self::job_key(&job_id)).await.map_err(err)?;
                let Some(raw) = raw else { continue };
                let mut stored: StoredJob = serde_json::from_str(&raw).map_err(err)?;
                if stored.job.app_id != app_id || stored.job.user_id != user_id {
                    continue;
                }
                let _: () = conn.zrem(Self::queue_key(priority), &job_id).await.map_err(err)?;
                stored.job.priority = Priority::High;
                stored.job.visible_at = Utc::now();
                let _: () = conn
                    .set(Self::job_key(&job_id), serde_json::to_string(&stored).map_err(err)?)
                    .await
                    .map_err(err)?;
                let _: () = conn.zadd(Self::queue_key(Priority::High), &job_id, now).await.map_err(err)?;
            }
        }
        Ok(())
    }

    async fn stats(&self) -> CoreResult<QueueStats> {
        let mut conn = self.conn.clone();
        let mut depth_by_priority = HashMap::new();
        for priority in Priority::all_desc() {
            let count: usize = conn.zcard(Self::queue_key(priority)).await.map_err(err)?;
            depth_by_priority.insert(priority, count);
        }
        let dlq_size: usize = conn.llen("frn:dlq").await.map_err(err)?;
        Ok(QueueStats { depth_by_priority, dlq_size })
    }
}

