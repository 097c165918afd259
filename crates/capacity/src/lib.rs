//! Capacity Controller (§4.B): atomic reserve/release of global and
//! per-tenant concurrency slots plus a sliding per-minute rate window.

use std::sync::Arc;

use vrp_domain::error::RejectKind;
use vrp_kvstore::KvStore;
use vrp_tenant_config::current_minute_bucket;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Admission {
    Admitted,
    Rejected(RejectKind),
}

pub struct CapacityController {
    kv: Arc<dyn KvStore>,
    ttl_seconds: u64,
    global_cap: u32,
}

impl CapacityController {
    pub fn new(kv: Arc<dyn KvStore>, ttl_seconds: u64, global_cap: u32) -> Self {
        Self {
            kv,
            ttl_seconds,
            global_cap,
        }
    }

    fn global_key() -> String {
        "cap:global:calls".to_string()
    }

    fn tenant_calls_key(tenant_id: &str) -> String {
        format!("cap:tenant:{tenant_id}:calls")
    }

    fn tenant_rpm_key(tenant_id: &str) -> String {
        format!("cap:tenant:{tenant_id}:rpm:{}", current_minute_bucket())
    }

    /// Attempt to admit a call for `tenant_id`, honoring the algorithm in
    /// §4.B: rate window first, then tenant concurrency, then global
    /// concurrency, each step unconditionally rolling back on rejection.
    ///
    /// `tenant_global_cap` overrides the process-wide global cap for this
    /// call when set (a tenant's `maxConcurrentCallsGlobal`, §4.B step 3:
    /// "over the global cap, from env or tenant override").
    ///
    /// Fails closed: if the KV store is unreachable, the call is rejected
    /// as `RejectedGlobal` rather than admitted unchecked.
    pub async fn try_reserve(
        &self,
        tenant_id: &str,
        tenant_rpm_cap: u32,
        tenant_concurrency_cap: u32,
        tenant_global_cap: Option<u32>,
    ) -> Admission {
        // Fixed minute-bucket window: the TTL is 2 minutes so a bucket
        // outlives the minute it counts, covering clock skew between
        // increment and eventual eviction.
        let rpm_key = Self::tenant_rpm_key(tenant_id);
        let rpm = match self.kv.incr(&rpm_key, 120).await {
            Ok(n) => n,
            Err(e) => {
                tracing::warn!(error = %e, tenant_id, "capacity store unavailable, rejecting");
                return Admission::Rejected(RejectKind::Global);
            }
        };
        if rpm as u32 > tenant_rpm_cap {
            let _ = self.kv.decr(&rpm_key).await;
            return Admission::Rejected(RejectKind::TenantRate);
        }

        let tenant_key = Self::tenant_calls_key(tenant_id);
        let tenant_n = match self.kv.incr(&tenant_key, self.ttl_seconds).await {
            Ok(n) => n,
            Err(e) => {
                tracing::warn!(error = %e, tenant_id, "capacity store unavailable, rejecting");
                let _ = self.kv.decr(&rpm_key).await;
                return Admission::Rejected(RejectKind::Global);
            }
        };
        if tenant_n as u32 > tenant_concurrency_cap {
            let _ = self.kv.decr(&tenant_key).await;
            let _ = self.kv.decr(&rpm_key).await;
            return Admission::Rejected(RejectKind::TenantConcurrency);
        }

        let global_key = Self::global_key();
        let global_n = match self.kv.incr(&global_key, self.ttl_seconds).await {
            Ok(n) => n,
            Err(e) => {
                tracing::warn!(error = %e, tenant_id, "capacity store unavailable, rejecting");
                let _ = self.kv.decr(&tenant_key).await;
                let _ = self.kv.decr(&rpm_key).await;
                return Admission::Rejected(RejectKind::Global);
            }
        };
        let effective_global_cap = tenant_global_cap.unwrap_or(self.global_cap);
        if global_n as u32 > effective_global_cap {
            let _ = self.kv.decr(&global_key).await;
            let _ = self.kv.decr(&tenant_key).await;
            let _ = self.kv.decr(&rpm_key).await;
            return Admission::Rejected(RejectKind::Global);
        }

        Admission::Admitted
    }

    /// Release a previously admitted call's global and tenant-concurrency
    /// slots. Idempotent per session is the caller's responsibility (the
    /// session actor gates this behind its own `released` flag, §4.D).
    pub async fn release(&self, tenant_id: &str) {
        let tenant_key = Self::tenant_calls_key(tenant_id);
        if let Err(e) = self.kv.decr(&tenant_key).await {
            tracing::warn!(error = %e, tenant_id, "failed to release tenant capacity slot");
        }
        if let Err(e) = self.kv.decr(&Self::global_key()).await {
            tracing::warn!(error = %e, tenant_id, "failed to release global capacity slot");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use vrp_kvstore::InMemoryStore;

    fn controller(global_cap: u32) -> CapacityController {
        CapacityController::new(Arc::new(InMemoryStore::new()), 120, global_cap)
    }

    #[tokio::test]
    async fn admits_up_to_cap_then_rejects() {
        let c = controller(1);
        assert_eq!(c.try_reserve("a", 30, 10, None).await, Admission::Admitted);
        assert_eq!(
            c.try_reserve("b", 30, 10, None).await,
            Admission::Rejected(RejectKind::Global)
        );
    }

    #[tokio::test]
    async fn rejection_leaves_counters_net_zero() {
        let c = controller(1);
        assert_eq!(c.try_reserve("a", 30, 10, None).await, Admission::Admitted);
        let rejected = c.try_reserve("b", 30, 10, None).await;
        assert_eq!(rejected, Admission::Rejected(RejectKind::Global));
        // tenant "b" never held a slot; releasing "a" frees the one slot.
        c.release("a").await;
        assert_eq!(c.try_reserve("b", 30, 10, None).await, Admission::Admitted);
    }

    #[tokio::test]
    async fn tenant_concurrency_cap_enforced_independently_of_global() {
        let c = controller(100);
        assert_eq!(c.try_reserve("a", 30, 1, None).await, Admission::Admitted);
        assert_eq!(
            c.try_reserve("a", 30, 1, None).await,
            Admission::Rejected(RejectKind::TenantConcurrency)
        );
    }

    #[tokio::test]
    async fn tenant_rate_cap_enforced() {
        let c = controller(100);
        assert_eq!(c.try_reserve("a", 1, 10, None).await, Admission::Admitted);
        assert_eq!(
            c.try_reserve("a", 1, 10, None).await,
            Admission::Rejected(RejectKind::TenantRate)
        );
    }

    #[tokio::test]
    async fn release_then_reserve_admits_again() {
        let c = controller(1);
        assert_eq!(c.try_reserve("a", 30, 10, None).await, Admission::Admitted);
        c.release("a").await;
        assert_eq!(c.try_reserve("a", 30, 10, None).await, Admission::Admitted);
    }

    #[tokio::test]
    async fn tenant_global_override_allows_exceeding_process_cap() {
        let c = controller(1);
        assert_eq!(c.try_reserve("a", 30, 10, None).await, Admission::Admitted);
        // process-wide cap is 1, but this tenant carries its own override.
        assert_eq!(
            c.try_reserve("b", 30, 10, Some(5)).await,
            Admission::Admitted
        );
    }

    #[tokio::test]
    async fn tenant_global_override_can_be_stricter_than_process_cap() {
        let c = controller(100);
        assert_eq!(
            c.try_reserve("a", 30, 10, Some(1)).await,
            Admission::Admitted
        );
        assert_eq!(
            c.try_reserve("a", 30, 10, Some(1)).await,
            Admission::Rejected(RejectKind::Global)
        );
    }
}
