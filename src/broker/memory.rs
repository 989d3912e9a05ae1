use std::collections::HashMap;
use std::sync::Mutex;

use async_trait::async_trait;
use chrono::{Duration, Utc};

use super::{Broker, DlqEntry, QueueStats};
use crate::error::CoreResult;
use crate::types::{Priority, QueueJob};

struct State {
    jobs: HashMap<String, QueueJob>,
    dlq: Vec<DlqEntry>,
}

/// `Mutex`-guarded in-memory broker: a single map scanned in priority order
/// on lease. O(n) rather than the O(log n) a per-priority sorted-set backend
/// gives, which is an acceptable trade for the reference/test implementation
/// the design notes call for; the Redis implementation is the one meant to
/// carry production load.
pub struct MemoryBroker {
    state: Mutex<State>,
}

impl MemoryBroker {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(State {
                jobs: HashMap::new(),
                dlq: Vec::new(),
            }),
        }
    }
}

impl Default for MemoryBroker {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Broker for MemoryBroker {
    async fn push(&self, job: QueueJob) -> CoreResult<()> {
        let mut state = self.state.lock().unwrap();
        state.jobs.insert(job.job_id.clone(), job);
        Ok(())
    }

    async fn lease_next(&self, consumer_id: &str, lease_ttl: Duration) -> CoreResult<Option<QueueJob>> {
        let now = Utc::now();
        let mut state = self.state.lock().unwrap();

        for priority in Priority::all_desc() {
            let best = state
                .jobs
                .values()
                .filter(|j| j.priority == priority && j.visible_at <= now && !j.is_leased(now))
                .min_by_key(|j| (j.visible_at, j.sequence))
                .map(|j| j.job_id.clone());

            if let Some(job_id) = best {
                let job = state.jobs.get_mut(&job_id).unwrap();
                job.lease_owner = Some(consumer_id.to_string());
                job.lease_expires_at = Some(now + lease_ttl);
                return Ok(Some(job.clone()));
            }
        }
        Ok(None)
    }

    async fn heartbeat(&self, job_id: &str, consumer_id: &str, lease_ttl: Duration) -> CoreResult<()> {
        let mut state = self.state.lock().unwrap();
        if let Some(job) = state.jobs.get_mut(job_id) {
            if job.lease_owner.as_deref() == Some(consumer_id) {
                job.lease_expires_at = Some(Utc::now() + lease_ttl);
            }
        }
        Ok(())
    }

    async fn ack(&self, job_id: &str) -> CoreResult<()> {
        let mut state = self.state.lock().unwrap();
        state.jobs.remove(job_id);
        Ok(())
    }

    async fn nack(&self, job_id: &str, delay: Duration) -> CoreResult<()> {
        let mut state = self.state.lock().unwrap();
        if let Some(job) = state.jobs.get_mut(job_id) {
            job.lease_owner = None;
            job.lease_expires_at = None;
            job.visible_at = Utc::now() + delay;
            job.attempt += 1;
        }
        Ok(())
    }

    async fn dead_letter(&self, job_id: &str, reason: &str) -> CoreResult<()> {
        let mut state = self.state.lock().unwrap();
        if let Some(job) = state.jobs.remove(job_id) {
            state.dlq.push(DlqEntry {
                job,
                reason: reason.to_string(),
            });
        }
        Ok(())
    }

    async fn dlq_list(&self, limit: usize) -> CoreResult<Vec<DlqEntry>> {
        let state = self.state.lock().unwrap();
        Ok(state.dlq.iter().take(limit).cloned().collect())
    }

    async fn dlq_replay(&self, job_id: &str) -> CoreResult<()> {
        let mut state = self.state.lock().unwrap();
        if let Some(pos) = state.dlq.iter().position(|e| e.job.job_id == job_id) {
            let mut entry = state.dlq.remove(pos);
            entry.job.attempt = 0;
            entry.job.visible_at = Utc::now();
            entry.job.lease_owner = None;
            entry.job.lease_expires_at = None;
            state.jobs.insert(entry.job.job_id.clone(), entry.job);
        }
        Ok(())
    }

    async fn promote_for_user(&self, app_id: &str, user_id: &str) -> CoreResult<()> {
        let mut state = self.state.lock().unwrap();
        let now = Utc::now();
        for job in state.jobs.values_mut() {
            if job.app_id == app_id && job.user_id == user_id && job.lease_owner.is_none() {
                if job.priority != Priority::Critical {
                    job.priority = Priority::High;
                }
                job.visible_at = now;
            }
        }
        Ok(())
    }

    async fn stats(&self) -> CoreResult<QueueStats> {
        let state = self.state.lock().unwrap();
        let mut depth_by_priority = HashMap::new();
        for job in state.jobs.values() {
            *depth_by_priority.entry(job.priority).or_insert(0) += 1;
        }
        Ok(QueueStats {
            depth_by_priority,
            dlq_size: state.dlq.len(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn job(priority: Priority, seq: u64) -> QueueJob {
        QueueJob::new(
            format!("n{seq}"),
            "app1",
            "user1",
            priority,
            Utc::now() - Duration::seconds(1),
            seq,
        )
    }

    #[tokio::test]
    async fn leases_highest_priority_first() {
        let broker = MemoryBroker::new();
        broker.push(job(Priority::Low, 1)).await.unwrap();
        broker.push(job(Priority::Critical, 2)).await.unwrap();
        broker.push(job(Priority::Normal, 3)).await.unwrap();

        let leased = broker.lease_next("worker-1", Duration::seconds(30)).await.unwrap().unwrap();
        assert_eq!(leased.priority, Priority::Critical);
    }

    #[tokio::test]
    async fn leased_job_is_not_leased_again_until_expiry() {
        let broker = MemoryBroker::new();
        broker.push(job(Priority::Normal, 1)).await.unwrap();

        let first = broker.lease_next("worker-1", Duration::seconds(30)).await.unwrap();
        assert!(first.is_some());
        let second = broker.lease_next("worker-2", Duration::seconds(30)).await.unwrap();
        assert!(second.is_none());
    }

    #[tokio::test]
    async fn nack_reschedules_and_increments_attempt() {
        let broker = MemoryBroker::new();
        let j = job(Priority::Normal, 1);
        let id = j.job_id.clone();
        broker.push(j).await.unwrap();
        broker.lease_next("worker-1", Duration::seconds(30)).await.unwrap();
        broker.nack(&id, Duration::seconds(0)).await.unwrap();

        let relocated = broker.lease_next("worker-2", Duration::seconds(30)).await.unwrap().unwrap();
        assert_eq!(relocated.attempt, 1);
    }

    #[tokio::test]
    async fn dead_letter_moves_to_dlq() {
        let broker = MemoryBroker::new();
        let j = job(Priority::Normal, 1);
        let id = j.job_id.clone();
        broker.push(j).await.unwrap();
        broker.dead_letter(&id, "exhausted retries").await.unwrap();

        let dlq = broker.dlq_list(10).await.unwrap();
        assert_eq!(dlq.len(), 1);
        assert!(broker.lease_next("worker-1", Duration::seconds(30)).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn dlq_replay_resets_attempts() {
        let broker = MemoryBroker::new();
        let j = job(Priority::Normal, 1);
        let id = j.job_id.clone();
        broker.push(j).await.unwrap();
        broker.dead_letter(&id, "boom").await.unwrap();
        broker.dlq_replay(&id).await.unwrap();

        let leased = broker.lease_next("worker-1", Duration::seconds(30)).await.unwrap().unwrap();
        assert_eq!(leased.attempt, 0);
    }

    #[tokio::test]
    async fn promote_for_user_flushes_ahead_of_unrelated_jobs() {
        let broker = MemoryBroker::new();
        let mut others = job(Priority::Normal, 1);
        others.app_id = "app1".into();
        others.user_id = "stranger".into();
        others.visible_at = Utc::now() - Duration::seconds(1);
        broker.push(others).await.unwrap();

        let mut mine = job(Priority::Low, 2);
        mine.app_id = "app1".into();
        mine.user_id = "user1".into();
        mine.visible_at = Utc::now() + Duration::seconds(60);
        broker.push(mine).await.unwrap();

        broker.promote_for_user("app1", "user1").await.unwrap();

        let leased = broker.lease_next("worker-1", Duration::seconds(30)).await.unwrap().unwrap();
        assert_eq!(leased.user_id, "user1");
        assert_eq!(leased.priority, Priority::High);
    }
}
