//! Shared application state handed to every axum handler via `with_state`.

use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use vrp_brain_client::BrainClient;
use vrp_capacity::CapacityController;
use vrp_domain::config::Config;
use vrp_kvstore::KvStore;
use vrp_tenant_config::TenantConfigStore;
use vrp_workflow::queue::JobQueue;
use vrp_workflow::store::{LeadStore, WorkflowStore};

use crate::call_registry::CallRegistry;
use crate::history::HistoryStore;

/// All long-lived, shared components the gateway's handlers and background
/// loops operate on. Cheap to clone: every field is an `Arc`.
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub kv: Arc<dyn KvStore>,
    pub tenant_config: Arc<TenantConfigStore>,
    pub capacity: Arc<CapacityController>,
    pub call_registry: Arc<CallRegistry>,
    pub brain: Arc<dyn BrainClient>,
    pub job_queue: Arc<JobQueue>,
    pub workflow_store: Arc<WorkflowStore>,
    pub lead_store: Arc<LeadStore>,
    pub history: Arc<HistoryStore>,
    pub http: reqwest::Client,
    /// Flipped to `true` once the shutdown sequence begins; webhook and
    /// media handlers check this to stop accepting new work (§4.J step 1).
    pub shutting_down: Arc<AtomicBool>,
    /// Tenants observed via `call.initiated` since boot. The KV store has
    /// no key-scan primitive, so the scheduler tick (§4.H) can only sweep
    /// workflows for tenants this process has actually seen traffic for
    /// rather than every tenant ever provisioned.
    pub known_tenants: Arc<Mutex<HashSet<String>>>,
}

impl AppState {
    pub fn is_shutting_down(&self) -> bool {
        self.shutting_down.load(Ordering::Relaxed)
    }

    pub fn begin_shutdown(&self) {
        self.shutting_down.store(true, Ordering::Relaxed);
    }

    pub fn note_tenant(&self, tenant_id: &str) {
        self.known_tenants.lock().insert(tenant_id.to_string());
    }

    pub fn known_tenant_ids(&self) -> Vec<String> {
        self.known_tenants.lock().iter().cloned().collect()
    }
}
