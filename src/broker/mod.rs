mod memory;
mod redis_broker;

pub use memory::MemoryBroker;
pub use redis_broker::RedisBroker;

use async_trait::async_trait;
use chrono::Duration;

use crate::error::CoreResult;
use crate::types::{Priority, QueueJob};

/// Ordered job broker with visibility-timeout leasing and a dead-letter
/// queue. Priorities are a fixed ordered set (`Critical > High > Normal >
/// Low`); within a priority, ordering is by `visible_at` ascending, ties
/// broken by insertion order.
#[async_trait]
pub trait Broker: Send + Sync {
    /// O(log n) insert.
    async fn push(&self, job: QueueJob) -> CoreResult<()>;

    /// Atomically selects the highest-priority job with `visible_at <= now`
    /// whose lease is absent or expired, leases it to `consumer_id`, and
    /// returns it. `None` if nothing is eligible.
    async fn lease_next(&self, consumer_id: &str, lease_ttl: Duration) -> CoreResult<Option<QueueJob>>;

    /// Extends an existing lease; used by the worker's heartbeat when
    /// processing runs past `lease_ttl / 2`.
    async fn heartbeat(&self, job_id: &str, consumer_id: &str, lease_ttl: Duration) -> CoreResult<()>;

    /// Removes the job. No-op if unknown.
    async fn ack(&self, job_id: &str) -> CoreResult<()>;

    /// Clears the lease, reschedules `visible_at = now + delay`, increments
    /// the attempt count.
    async fn nack(&self, job_id: &str, delay: Duration) -> CoreResult<()>;

    /// Moves the job to the DLQ with a reason, freezing its state.
    async fn dead_letter(&self, job_id: &str, reason: &str) -> CoreResult<()>;

    async fn dlq_list(&self, limit: usize) -> CoreResult<Vec<DlqEntry>>;

    /// Returns the job to the main queue with attempts reset to zero.
    async fn dlq_replay(&self, job_id: &str) -> CoreResult<()>;

    /// Rewrites `visible_at = now` and promotes priority to `High` (never
    /// `Critical`) for every Queued/Scheduled job belonging to this user.
    async fn promote_for_user(&self, app_id: &str, user_id: &str) -> CoreResult<()>;

    /// Depth of each priority tier, for `/v1/admin/queues/stats`.
    async fn stats(&self) -> CoreResult<QueueStats>;
}

#[derive(Debug, Clone)]
pub struct DlqEntry {
    pub job: QueueJob,
    pub reason: String,
}

#[derive(Debug, Clone, Default, serde::Serialize)]
pub struct QueueStats {
    pub depth_by_priority: std::collections::HashMap<Priority, usize>,
    pub dlq_size: usize,
}
