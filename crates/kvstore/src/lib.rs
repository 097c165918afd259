//! Shared key-value store abstraction.
//!
//! `KvStore` is the one seam every store-dependent component (tenant
//! config, capacity counters, the workflow job queue, call history) is
//! built against. Production wiring uses [`RedisStore`]; tests and the
//! in-process fallback use [`InMemoryStore`].

mod memory;
mod redis_store;

pub use memory::InMemoryStore;
pub use redis_store::RedisStore;

use async_trait::async_trait;
use vrp_domain::error::Result;

#[async_trait]
pub trait KvStore: Send + Sync {
    /// Fetch the raw value for `key`, or `None` if absent.
    async fn get(&self, key: &str) -> Result<Option<String>>;

    /// Set `key` to `value`. If `ttl_secs` is `Some`, the key expires
    /// after that many seconds.
    async fn set(&self, key: &str, value: &str, ttl_secs: Option<u64>) -> Result<()>;

    /// Atomically increment `key` by 1, creating it at 0 first if absent,
    /// and refresh its TTL to `ttl_secs` on every call (so a crash can
    /// never leak capacity indefinitely). Returns the new value.
    async fn incr(&self, key: &str, ttl_secs: u64) -> Result<i64>;

    /// Atomically decrement `key` by 1. Used for the unconditional
    /// rollback on admission rejection.
    async fn decr(&self, key: &str) -> Result<i64>;

    /// Push `value` onto the tail of the list at `key` (FIFO enqueue).
    async fn list_push(&self, key: &str, value: &str) -> Result<()>;

    /// Pop a value from the head of the list at `key`, or `None` if empty.
    async fn list_pop(&self, key: &str) -> Result<Option<String>>;

    /// A cheap liveness probe used by `GET /health/ready`.
    async fn ping(&self) -> Result<()>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn in_memory_incr_decr_round_trip() {
        let store = InMemoryStore::new();
        assert_eq!(store.incr("k", 60).await.unwrap(), 1);
        assert_eq!(store.incr("k", 60).await.unwrap(), 2);
        assert_eq!(store.decr("k").await.unwrap(), 1);
    }

    #[tokio::test]
    async fn in_memory_list_is_fifo() {
        let store = InMemoryStore::new();
        store.list_push("q", "a").await.unwrap();
        store.list_push("q", "b").await.unwrap();
        assert_eq!(store.list_pop("q").await.unwrap(), Some("a".into()));
        assert_eq!(store.list_pop("q").await.unwrap(), Some("b".into()));
        assert_eq!(store.list_pop("q").await.unwrap(), None);
    }
}
