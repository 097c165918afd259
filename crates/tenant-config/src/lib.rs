//! Tenant Config Store Adapter (§4.A).
//!
//! Read-only from the runtime's perspective: the control plane publishes
//! DID maps and tenant config documents into the shared KV store; this
//! adapter resolves DIDs, loads/validates config, and caches both behind
//! a short positive TTL.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::Utc;
use parking_lot::Mutex;
use vrp_domain::e164::normalize_e164;
use vrp_domain::tenant::{did_map_key, tenant_config_key, RuntimeTenantConfig, TenantConfigError};
use vrp_kvstore::KvStore;

const DEFAULT_CACHE_TTL: Duration = Duration::from_secs(30);
const DEFAULT_CACHE_CAPACITY: usize = 10_000;

struct CacheEntry<T> {
    value: T,
    cached_at: Instant,
}

/// A bounded, TTL-expiring cache. Entries are immutable snapshots behind
/// an `Arc`: readers clone the pointer, never the data (§5 Shared-resource
/// policy).
struct TtlCache<T> {
    ttl: Duration,
    capacity: usize,
    entries: Mutex<HashMap<String, CacheEntry<Arc<T>>>>,
    order: Mutex<Vec<String>>,
}

impl<T> TtlCache<T> {
    fn new(ttl: Duration, capacity: usize) -> Self {
        Self {
            ttl,
            capacity,
            entries: Mutex::new(HashMap::new()),
            order: Mutex::new(Vec::new()),
        }
    }

    fn get(&self, key: &str) -> Option<Arc<T>> {
        let entries = self.entries.lock();
        let entry = entries.get(key)?;
        if entry.cached_at.elapsed() > self.ttl {
            return None;
        }
        Some(entry.value.clone())
    }

    fn insert(&self, key: String, value: Arc<T>) {
        let mut entries = self.entries.lock();
        let mut order = self.order.lock();
        if !entries.contains_key(&key) {
            order.push(key.clone());
            if order.len() > self.capacity {
                let evict = order.remove(0);
                entries.remove(&evict);
            }
        }
        entries.insert(
            key,
            CacheEntry {
                value,
                cached_at: Instant::now(),
            },
        );
    }

    fn invalidate(&self, key: &str) {
        self.entries.lock().remove(key);
        self.order.lock().retain(|k| k != key);
    }
}

pub struct TenantConfigStore {
    kv: Arc<dyn KvStore>,
    tenantmap_prefix: String,
    tenantcfg_prefix: String,
    did_cache: TtlCache<String>,
    config_cache: TtlCache<RuntimeTenantConfig>,
}

impl TenantConfigStore {
    pub fn new(kv: Arc<dyn KvStore>, tenantmap_prefix: &str, tenantcfg_prefix: &str) -> Self {
        Self {
            kv,
            tenantmap_prefix: tenantmap_prefix.to_string(),
            tenantcfg_prefix: tenantcfg_prefix.to_string(),
            did_cache: TtlCache::new(DEFAULT_CACHE_TTL, DEFAULT_CACHE_CAPACITY),
            config_cache: TtlCache::new(DEFAULT_CACHE_TTL, DEFAULT_CACHE_CAPACITY),
        }
    }

    /// Resolve a DID to its owning tenant. Normalises to E.164 before
    /// lookup so any whitespace variant of the same number resolves
    /// identically (§8 property 4).
    pub async fn lookup_did(&self, did: &str) -> Result<String, TenantConfigError> {
        let normalized = normalize_e164(did).map_err(|e| TenantConfigError::Invalid(e.to_string()))?;

        if let Some(tenant_id) = self.did_cache.get(&normalized) {
            return Ok((*tenant_id).clone());
        }

        let key = did_map_key(&self.tenantmap_prefix, &normalized);
        let value = self
            .kv
            .get(&key)
            .await
            .map_err(|e| TenantConfigError::Store(e.to_string()))?
            .ok_or_else(|| TenantConfigError::NotFound(normalized.clone()))?;

        self.did_cache.insert(normalized, Arc::new(value.clone()));
        Ok(value)
    }

    /// Load and validate a tenant's runtime config.
    pub async fn load_config(
        &self,
        tenant_id: &str,
    ) -> Result<Arc<RuntimeTenantConfig>, TenantConfigError> {
        if let Some(cfg) = self.config_cache.get(tenant_id) {
            return Ok(cfg);
        }

        let key = tenant_config_key(&self.tenantcfg_prefix, tenant_id);
        let raw = self
            .kv
            .get(&key)
            .await
            .map_err(|e| TenantConfigError::Store(e.to_string()))?
            .ok_or_else(|| TenantConfigError::NotFound(tenant_id.to_string()))?;

        let cfg: RuntimeTenantConfig = serde_json::from_str(&raw)
            .map_err(|e| TenantConfigError::Invalid(format!("malformed JSON: {e}")))?;
        cfg.validate()?;

        let cfg = Arc::new(cfg);
        self.config_cache.insert(tenant_id.to_string(), cfg.clone());
        Ok(cfg)
    }

    /// Drop cached entries for a tenant — called on an observed version
    /// mismatch or an explicit publish notification.
    pub fn invalidate(&self, tenant_id: &str) {
        self.config_cache.invalidate(tenant_id);
    }

    /// Resolve the effective webhook secret for a tenant, honoring the
    /// `env:VAR` indirection.
    pub async fn webhook_secret(&self, tenant_id: &str) -> Result<Option<String>, TenantConfigError> {
        let cfg = self.load_config(tenant_id).await?;
        Ok(cfg.resolve_webhook_secret())
    }
}

/// Current wall-clock minute bucket, used by capacity's sliding window
/// and re-exported here since both crates derive it from the same clock.
pub fn current_minute_bucket() -> String {
    Utc::now().format("%Y%m%d%H%M").to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use vrp_kvstore::InMemoryStore;

    fn sample_config_json() -> String {
        serde_json::json!({
            "contractVersion": "v1",
            "tenantId": "acme",
            "dids": ["+15551110002"],
            "caps": {"maxConcurrentCallsTenant": 5, "maxCallsPerMinuteTenant": 10},
            "stt": {"url": "http://stt.local"},
            "tts": {"engine": "kokoro_http", "url": "http://tts.local"},
            "audio": {},
            "webhookSecret": "s3cr3t"
        })
        .to_string()
    }

    #[tokio::test]
    async fn lookup_did_normalizes_whitespace_variants() {
        let kv: Arc<dyn KvStore> = Arc::new(InMemoryStore::new());
        kv.set("tenantmap:did:+15551110002", "acme", None)
            .await
            .unwrap();

        let store = TenantConfigStore::new(kv, "tenantmap", "tenantcfg");
        let a = store.lookup_did("+15551110002").await.unwrap();
        let b = store.lookup_did("+1 555 111 0002").await.unwrap();
        assert_eq!(a, "acme");
        assert_eq!(a, b);
    }

    #[tokio::test]
    async fn lookup_unknown_did_is_not_found() {
        let kv: Arc<dyn KvStore> = Arc::new(InMemoryStore::new());
        let store = TenantConfigStore::new(kv, "tenantmap", "tenantcfg");
        let err = store.lookup_did("+15550000000").await.unwrap_err();
        assert!(matches!(err, TenantConfigError::NotFound(_)));
    }

    #[tokio::test]
    async fn load_config_validates_and_caches() {
        let kv: Arc<dyn KvStore> = Arc::new(InMemoryStore::new());
        kv.set("tenantcfg:acme", &sample_config_json(), None)
            .await
            .unwrap();
        let store = TenantConfigStore::new(kv, "tenantmap", "tenantcfg");
        let cfg = store.load_config("acme").await.unwrap();
        assert_eq!(cfg.tenant_id, "acme");
        assert_eq!(cfg.resolve_webhook_secret().as_deref(), Some("s3cr3t"));

        // Second load hits the cache (same Arc pointer).
        let cfg2 = store.load_config("acme").await.unwrap();
        assert!(Arc::ptr_eq(&cfg, &cfg2));
    }

    #[tokio::test]
    async fn invalidate_forces_reload() {
        let kv: Arc<dyn KvStore> = Arc::new(InMemoryStore::new());
        kv.set("tenantcfg:acme", &sample_config_json(), None)
            .await
            .unwrap();
        let store = TenantConfigStore::new(kv, "tenantmap", "tenantcfg");
        let cfg1 = store.load_config("acme").await.unwrap();
        store.invalidate("acme");
        let cfg2 = store.load_config("acme").await.unwrap();
        assert!(!Arc::ptr_eq(&cfg1, &cfg2));
    }
}
