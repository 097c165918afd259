//! Durable job queue (§4.H Job queue): FIFO backed by the KV store, with
//! an in-memory fallback when the store is unreachable.

use std::collections::VecDeque;
use std::sync::Arc;

use chrono::Utc;
use parking_lot::Mutex;
use vrp_domain::workflow::{retry_backoff_seconds, Job, MAX_RETRIES};
use vrp_kvstore::KvStore;

const QUEUE_KEY: &str = "workflow:queue";

pub struct JobQueue {
    kv: Arc<dyn KvStore>,
    fallback: Mutex<VecDeque<Job>>,
}

impl JobQueue {
    pub fn new(kv: Arc<dyn KvStore>) -> Self {
        Self {
            kv,
            fallback: Mutex::new(VecDeque::new()),
        }
    }

    pub async fn push(&self, job: Job) {
        let payload = match serde_json::to_string(&job) {
            Ok(p) => p,
            Err(e) => {
                tracing::error!(error = %e, "failed to serialise job, dropping");
                return;
            }
        };
        if let Err(e) = self.kv.list_push(QUEUE_KEY, &payload).await {
            tracing::warn!(error = %e, "queue store unavailable, using in-memory fallback");
            self.fallback.lock().push_back(job);
        }
    }

    /// Pop the next job whose `not_before` has elapsed, if any. Jobs not
    /// yet due are pushed back onto the tail rather than blocking the
    /// queue, bounded by `max_scan` to avoid an unbounded busy loop.
    pub async fn pop_ready(&self, max_scan: usize) -> Option<Job> {
        let now = Utc::now();

        for _ in 0..max_scan {
            let candidate = match self.kv.list_pop(QUEUE_KEY).await {
                Ok(Some(raw)) => serde_json::from_str::<Job>(&raw).ok(),
                Ok(None) => None,
                Err(e) => {
                    tracing::warn!(error = %e, "queue store unavailable, reading fallback");
                    self.fallback.lock().pop_front()
                }
            };

            let job = candidate?;
            match job.not_before {
                Some(t) if t > now => self.push(job).await,
                _ => return Some(job),
            }
        }
        None
    }

    /// Schedule a retry with exponential backoff, or drop the job beyond
    /// `MAX_RETRIES` (§8 property 7).
    pub async fn retry(&self, mut job: Job) {
        job.retries += 1;
        if job.retries > MAX_RETRIES {
            tracing::warn!(job_id = %job.id, workflow_id = %job.workflow_id, "job exceeded max retries, dropping");
            return;
        }
        let delay = retry_backoff_seconds(job.retries);
        job.not_before = Some(Utc::now() + chrono::Duration::seconds(delay));
        self.push(job).await;
    }

    /// Drain the in-memory fallback queue back into the KV store (§4.J
    /// step 4, flush on shutdown). A best-effort operation: jobs that
    /// still can't reach the store are left in the fallback queue rather
    /// than dropped.
    pub async fn flush_fallback(&self) {
        let pending: Vec<Job> = self.fallback.lock().drain(..).collect();
        for job in pending {
            self.push(job).await;
        }
    }
}

/// Tracks, per workflow, the last UTC minute a scheduled run fired, to
/// prevent double-firing within the same minute. Entries older than one
/// hour are pruned on each tick.
pub struct LastFiredGuard {
    fired: std::collections::HashMap<uuid::Uuid, chrono::DateTime<Utc>>,
}

impl LastFiredGuard {
    pub fn new() -> Self {
        Self {
            fired: std::collections::HashMap::new(),
        }
    }

    pub fn should_fire(&mut self, workflow_id: uuid::Uuid, now: chrono::DateTime<Utc>) -> bool {
        self.prune(now);
        match self.fired.get(&workflow_id) {
            Some(last) if last.format("%Y%m%d%H%M").to_string() == now.format("%Y%m%d%H%M").to_string() => false,
            _ => {
                self.fired.insert(workflow_id, now);
                true
            }
        }
    }

    fn prune(&mut self, now: chrono::DateTime<Utc>) {
        let cutoff = now - chrono::Duration::hours(1);
        self.fired.retain(|_, t| *t >= cutoff);
    }
}

impl Default for LastFiredGuard {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use vrp_kvstore::InMemoryStore;

    fn job() -> Job {
        Job {
            id: uuid::Uuid::new_v4(),
            workflow_id: uuid::Uuid::new_v4(),
            tenant_id: "acme".into(),
            event: serde_json::json!({}),
            retries: 0,
            enqueued_at: Utc::now(),
            not_before: None,
        }
    }

    #[tokio::test]
    async fn push_then_pop_round_trips() {
        let q = JobQueue::new(Arc::new(InMemoryStore::new()));
        let j = job();
        let id = j.id;
        q.push(j).await;
        let popped = q.pop_ready(10).await.unwrap();
        assert_eq!(popped.id, id);
    }

    #[tokio::test]
    async fn pop_empty_queue_is_none() {
        let q = JobQueue::new(Arc::new(InMemoryStore::new()));
        assert!(q.pop_ready(10).await.is_none());
    }

    #[tokio::test]
    async fn retry_beyond_max_drops_job() {
        let q = JobQueue::new(Arc::new(InMemoryStore::new()));
        let mut j = job();
        j.retries = MAX_RETRIES;
        q.retry(j).await;
        assert!(q.pop_ready(10).await.is_none());
    }

    #[tokio::test]
    async fn retry_sets_backoff_not_before() {
        let q = JobQueue::new(Arc::new(InMemoryStore::new()));
        let before = Utc::now();
        q.retry(job()).await;
        // not due yet: scanning once should push it back and find nothing ready.
        let ready = q.pop_ready(1).await;
        assert!(ready.is_none());
        let _ = before;
    }

    #[test]
    fn guard_blocks_double_fire_same_minute() {
        let mut guard = LastFiredGuard::new();
        let wf = uuid::Uuid::new_v4();
        let now = Utc::now();
        assert!(guard.should_fire(wf, now));
        assert!(!guard.should_fire(wf, now));
    }

    #[test]
    fn guard_allows_fire_in_next_minute() {
        let mut guard = LastFiredGuard::new();
        let wf = uuid::Uuid::new_v4();
        let now = Utc::now();
        assert!(guard.should_fire(wf, now));
        let next_minute = now + chrono::Duration::minutes(1);
        assert!(guard.should_fire(wf, next_minute));
    }
}
