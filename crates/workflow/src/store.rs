//! Workflow definition store: read-only from the runtime's perspective,
//! mirroring [`vrp_tenant_config::TenantConfigStore`]'s cache shape. The
//! control plane publishes a tenant's `workflows[]` as one JSON array
//! under a single key; this adapter loads and caches it per tenant.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use vrp_domain::workflow::{Lead, Workflow};
use vrp_kvstore::KvStore;

const CACHE_TTL: Duration = Duration::from_secs(30);
const LEAD_TTL_SECS: u64 = 60 * 60 * 24 * 365;

fn workflows_key(prefix: &str, tenant_id: &str) -> String {
    format!("{prefix}:{tenant_id}")
}

struct CacheEntry {
    workflows: Arc<Vec<Workflow>>,
    cached_at: Instant,
}

pub struct WorkflowStore {
    kv: Arc<dyn KvStore>,
    prefix: String,
    cache: Mutex<HashMap<String, CacheEntry>>,
}

impl WorkflowStore {
    pub fn new(kv: Arc<dyn KvStore>, prefix: &str) -> Self {
        Self {
            kv,
            prefix: prefix.to_string(),
            cache: Mutex::new(HashMap::new()),
        }
    }

    /// Load a tenant's enabled and disabled workflows, from cache if fresh.
    pub async fn load(&self, tenant_id: &str) -> vrp_domain::error::Result<Arc<Vec<Workflow>>> {
        if let Some(entry) = self.cache.lock().get(tenant_id) {
            if entry.cached_at.elapsed() < CACHE_TTL {
                return Ok(entry.workflows.clone());
            }
        }

        let key = workflows_key(&self.prefix, tenant_id);
        let workflows = match self.kv.get(&key).await? {
            Some(raw) => serde_json::from_str(&raw)?,
            None => Vec::new(),
        };
        let workflows = Arc::new(workflows);
        self.cache.lock().insert(
            tenant_id.to_string(),
            CacheEntry {
                workflows: workflows.clone(),
                cached_at: Instant::now(),
            },
        );
        Ok(workflows)
    }

    pub fn invalidate(&self, tenant_id: &str) {
        self.cache.lock().remove(tenant_id);
    }
}

/// Persists leads produced by a `store_lead` workflow step. One JSON row
/// per lead, the same KV-centric shape the gateway's call history store
/// uses for its rows.
pub struct LeadStore {
    kv: Arc<dyn KvStore>,
}

impl LeadStore {
    pub fn new(kv: Arc<dyn KvStore>) -> Self {
        Self { kv }
    }

    fn lead_key(tenant_id: &str, lead_id: uuid::Uuid) -> String {
        format!("lead:{tenant_id}:{lead_id}")
    }

    pub async fn save(&self, lead: &Lead) -> vrp_domain::error::Result<()> {
        let payload = serde_json::to_string(lead)?;
        self.kv
            .set(&Self::lead_key(&lead.tenant_id, lead.id), &payload, Some(LEAD_TTL_SECS))
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use vrp_domain::workflow::TriggerType;
    use vrp_kvstore::InMemoryStore;

    fn sample() -> Vec<Workflow> {
        vec![Workflow {
            id: uuid::Uuid::new_v4(),
            tenant_id: "acme".into(),
            name: "w".into(),
            enabled: true,
            trigger_type: TriggerType::CallEnded,
            trigger_config: serde_json::json!({}),
            steps: vec![],
            admin_locked: false,
        }]
    }

    #[tokio::test]
    async fn load_parses_published_array() {
        let kv: Arc<dyn KvStore> = Arc::new(InMemoryStore::new());
        kv.set("workflows:acme", &serde_json::to_string(&sample()).unwrap(), None)
            .await
            .unwrap();
        let store = WorkflowStore::new(kv, "workflows");
        let loaded = store.load("acme").await.unwrap();
        assert_eq!(loaded.len(), 1);
    }

    #[tokio::test]
    async fn load_missing_tenant_is_empty() {
        let kv: Arc<dyn KvStore> = Arc::new(InMemoryStore::new());
        let store = WorkflowStore::new(kv, "workflows");
        let loaded = store.load("nobody").await.unwrap();
        assert!(loaded.is_empty());
    }

    #[tokio::test]
    async fn invalidate_forces_reload() {
        let kv: Arc<dyn KvStore> = Arc::new(InMemoryStore::new());
        kv.set("workflows:acme", &serde_json::to_string(&sample()).unwrap(), None)
            .await
            .unwrap();
        let store = WorkflowStore::new(kv, "workflows");
        let a = store.load("acme").await.unwrap();
        store.invalidate("acme");
        let b = store.load("acme").await.unwrap();
        assert!(!Arc::ptr_eq(&a, &b));
    }

    #[tokio::test]
    async fn lead_store_round_trips_via_kv() {
        let kv: Arc<dyn KvStore> = Arc::new(InMemoryStore::new());
        let store = LeadStore::new(kv.clone());
        let lead = Lead {
            id: uuid::Uuid::new_v4(),
            tenant_id: "acme".into(),
            source_workflow_id: Some(uuid::Uuid::new_v4()),
            priority: "high".into(),
            fields: serde_json::json!({"name": "Pat"}).as_object().unwrap().clone(),
        };
        store.save(&lead).await.unwrap();

        let raw = kv.get(&LeadStore::lead_key(&lead.tenant_id, lead.id)).await.unwrap().unwrap();
        let loaded: Lead = serde_json::from_str(&raw).unwrap();
        assert_eq!(loaded.id, lead.id);
        assert_eq!(loaded.priority, "high");
        assert_eq!(loaded.fields["name"], "Pat");
    }
}
