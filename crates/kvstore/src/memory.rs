//! In-memory `KvStore` fake. Used by unit tests and as the workflow job
//! queue's fallback when Redis is unreachable.

use std::collections::{HashMap, VecDeque};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use vrp_domain::error::Result;

struct Entry {
    value: String,
    expires_at: Option<DateTime<Utc>>,
}

#[derive(Default)]
pub struct InMemoryStore {
    values: Mutex<HashMap<String, Entry>>,
    lists: Mutex<HashMap<String, VecDeque<String>>>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn is_live(entry: &Entry) -> bool {
        entry.expires_at.map(|exp| exp > Utc::now()).unwrap_or(true)
    }
}

#[async_trait]
impl crate::KvStore for InMemoryStore {
    async fn get(&self, key: &str) -> Result<Option<String>> {
        let values = self.values.lock();
        Ok(values
            .get(key)
            .filter(|e| Self::is_live(e))
            .map(|e| e.value.clone()))
    }

    async fn set(&self, key: &str, value: &str, ttl_secs: Option<u64>) -> Result<()> {
        let expires_at = ttl_secs.map(|secs| Utc::now() + chrono::Duration::seconds(secs as i64));
        self.values.lock().insert(
            key.to_string(),
            Entry {
                value: value.to_string(),
                expires_at,
            },
        );
        Ok(())
    }

    async fn incr(&self, key: &str, ttl_secs: u64) -> Result<i64> {
        let mut values = self.values.lock();
        let expires_at = Some(Utc::now() + chrono::Duration::seconds(ttl_secs as i64));
        let entry = values.entry(key.to_string()).or_insert(Entry {
            value: "0".into(),
            expires_at,
        });
        if !Self::is_live(entry) {
            entry.value = "0".into();
        }
        let n: i64 = entry.value.parse().unwrap_or(0) + 1;
        entry.value = n.to_string();
        entry.expires_at = expires_at;
        Ok(n)
    }

    async fn decr(&self, key: &str) -> Result<i64> {
        let mut values = self.values.lock();
        let entry = values.entry(key.to_string()).or_insert(Entry {
            value: "0".into(),
            expires_at: None,
        });
        let n: i64 = entry.value.parse().unwrap_or(0) - 1;
        entry.value = n.to_string();
        Ok(n)
    }

    async fn list_push(&self, key: &str, value: &str) -> Result<()> {
        self.lists
            .lock()
            .entry(key.to_string())
            .or_default()
            .push_back(value.to_string());
        Ok(())
    }

    async fn list_pop(&self, key: &str) -> Result<Option<String>> {
        Ok(self
            .lists
            .lock()
            .get_mut(key)
            .and_then(|list| list.pop_front()))
    }

    async fn ping(&self) -> Result<()> {
        Ok(())
    }
}
