//! Call History & Analytics (§4.I).
//!
//! Best-effort persistence: writing history or bumping usage counters
//! never blocks or fails call termination. Mirrors the KV-centric
//! storage style used by [`vrp_capacity::CapacityController`] and
//! [`vrp_tenant_config::TenantConfigStore`] — a single JSON row per call
//! plus per-tenant monthly counters.

use std::sync::Arc;

use chrono::Utc;
use vrp_domain::call::{CallHistoryRecord, CallSession};
use vrp_kvstore::KvStore;

pub struct HistoryStore {
    kv: Arc<dyn KvStore>,
}

const HISTORY_TTL_SECS: u64 = 60 * 60 * 24 * 90;

impl HistoryStore {
    pub fn new(kv: Arc<dyn KvStore>) -> Self {
        Self { kv }
    }

    fn history_key(call_id: &str) -> String {
        format!("callhistory:{call_id}")
    }

    fn usage_key(tenant_id: &str, month: &str) -> String {
        format!("tenantusage:{tenant_id}:{month}")
    }

    /// Write the terminal-state history row and bump monthly usage
    /// counters. Failures are logged, never propagated.
    pub async fn record_terminated_call(&self, session: &CallSession) {
        let record = CallHistoryRecord {
            tenant_id: session.tenant_id.clone(),
            call_id: session.call_control_id.clone(),
            caller_id: session.caller_id.clone(),
            stage: session.state,
            lead: session.lead.clone(),
            history: session.history.clone(),
            transcript: session.transcript(),
            duration_ms: session.duration_ms(),
            started_at: session.created_at,
            ended_at: session.ended_at.unwrap_or_else(Utc::now),
            termination_cause: session.termination_cause.unwrap_or(vrp_domain::call::TerminationCause::Normal),
        };

        match serde_json::to_string(&record) {
            Ok(payload) => {
                if let Err(e) = self
                    .kv
                    .set(&Self::history_key(&record.call_id), &payload, Some(HISTORY_TTL_SECS))
                    .await
                {
                    tracing::warn!(error = %e, call_id = %record.call_id, "failed to persist call history");
                }
            }
            Err(e) => tracing::warn!(error = %e, "failed to serialise call history record"),
        }

        self.bump_usage(&record.tenant_id, record.duration_ms).await;
    }

    async fn bump_usage(&self, tenant_id: &str, duration_ms: i64) {
        let month = Utc::now().format("%Y%m").to_string();
        let key = Self::usage_key(tenant_id, &month);
        let minutes = duration_ms as f64 / 60_000.0;

        let current: UsageCounters = match self.kv.get(&key).await {
            Ok(Some(raw)) => serde_json::from_str(&raw).unwrap_or_default(),
            Ok(None) => UsageCounters::default(),
            Err(e) => {
                tracing::warn!(error = %e, tenant_id, "failed to read tenant usage, skipping bump");
                return;
            }
        };
        let updated = UsageCounters {
            call_count: current.call_count + 1,
            call_minutes: current.call_minutes + minutes,
            stt_minutes: current.stt_minutes,
            tts_characters: current.tts_characters,
        };
        if let Ok(payload) = serde_json::to_string(&updated) {
            // 400 days covers a full year of monthly buckets comfortably.
            if let Err(e) = self.kv.set(&key, &payload, Some(60 * 60 * 24 * 400)).await {
                tracing::warn!(error = %e, tenant_id, "failed to persist tenant usage");
            }
        }
    }

    /// Record STT/TTS usage incrementally during a call (best-effort,
    /// same semantics as [`Self::bump_usage`]).
    pub async fn bump_media_usage(&self, tenant_id: &str, stt_minutes: f64, tts_characters: u64) {
        let month = Utc::now().format("%Y%m").to_string();
        let key = Self::usage_key(tenant_id, &month);
        let current: UsageCounters = match self.kv.get(&key).await {
            Ok(Some(raw)) => serde_json::from_str(&raw).unwrap_or_default(),
            Ok(None) => UsageCounters::default(),
            Err(_) => return,
        };
        let updated = UsageCounters {
            call_count: current.call_count,
            call_minutes: current.call_minutes,
            stt_minutes: current.stt_minutes + stt_minutes,
            tts_characters: current.tts_characters + tts_characters,
        };
        if let Ok(payload) = serde_json::to_string(&updated) {
            let _ = self.kv.set(&key, &payload, Some(60 * 60 * 24 * 400)).await;
        }
    }
}

#[derive(Debug, Clone, Default, serde::Serialize, serde::Deserialize)]
struct UsageCounters {
    call_count: u64,
    call_minutes: f64,
    stt_minutes: f64,
    tts_characters: u64,
}

#[cfg(test)]
mod tests {
    use super::*;
    use vrp_domain::call::{CallState, VoiceMode};
    use vrp_kvstore::InMemoryStore;

    #[tokio::test]
    async fn record_terminated_call_writes_history_and_usage() {
        let kv: Arc<dyn KvStore> = Arc::new(InMemoryStore::new());
        let store = HistoryStore::new(kv.clone());

        let mut session = CallSession::new("cc1".into(), "acme".into(), "+1555".into(), "+1556".into(), 7);
        session.state = CallState::Ended;
        session.ended_at = Some(Utc::now());
        session.voice_mode = VoiceMode::Preset;

        store.record_terminated_call(&session).await;

        let stored = kv.get("callhistory:cc1").await.unwrap();
        assert!(stored.is_some());

        let month = Utc::now().format("%Y%m").to_string();
        let usage = kv.get(&format!("tenantusage:acme:{month}")).await.unwrap().unwrap();
        let counters: UsageCounters = serde_json::from_str(&usage).unwrap();
        assert_eq!(counters.call_count, 1);
    }
}
