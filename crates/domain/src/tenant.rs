//! Runtime tenant config data model (§3 Tenant, DID Mapping, Runtime Tenant Config).

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

pub const CONTRACT_VERSION: &str = "v1";

/// `{TENANTMAP_PREFIX}:did:{E164}` → `tenant_id`.
pub fn did_map_key(prefix: &str, e164_did: &str) -> String {
    format!("{prefix}:did:{e164_did}")
}

/// `{TENANTCFG_PREFIX}:{tenant_id}` → JSON `RuntimeTenantConfig`.
pub fn tenant_config_key(prefix: &str, tenant_id: &str) -> String {
    format!("{prefix}:{tenant_id}")
}

/// The published, read-only runtime configuration for a tenant.
///
/// Unknown top-level fields are preserved under `extra` for forward
/// compatibility (the source of truth may add fields this runtime does
/// not yet understand).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RuntimeTenantConfig {
    #[serde(rename = "contractVersion")]
    pub contract_version: String,
    #[serde(rename = "tenantId")]
    pub tenant_id: String,
    pub dids: Vec<String>,
    pub caps: TenantCaps,
    pub stt: SttConfig,
    pub tts: TtsConfig,
    pub audio: AudioConfig,

    #[serde(default, rename = "webhookSecret", skip_serializing_if = "Option::is_none")]
    pub webhook_secret: Option<String>,
    #[serde(default, rename = "webhookSecretRef", skip_serializing_if = "Option::is_none")]
    pub webhook_secret_ref: Option<String>,

    #[serde(default, rename = "transferProfiles")]
    pub transfer_profiles: Vec<TransferProfile>,
    #[serde(default, rename = "assistantContext")]
    pub assistant_context: HashMap<String, String>,
    #[serde(default, rename = "callForwarding", skip_serializing_if = "Option::is_none")]
    pub call_forwarding: Option<serde_json::Value>,
    #[serde(default, rename = "llmContext", skip_serializing_if = "Option::is_none")]
    pub llm_context: Option<serde_json::Value>,

    /// Unrecognised top-level fields, preserved verbatim on round-trip.
    #[serde(flatten)]
    pub extra: HashMap<String, serde_json::Value>,
}

/// A tenant's capacity overrides. The per-tenant fields are optional: a
/// tenant config that omits them falls back to the process-wide
/// `TENANT_CONCURRENCY_CAP_DEFAULT`/`TENANT_CALLS_PER_MIN_CAP_DEFAULT`
/// env defaults (§6) rather than requiring every tenant to repeat them.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TenantCaps {
    #[serde(
        default,
        rename = "maxConcurrentCallsTenant",
        skip_serializing_if = "Option::is_none"
    )]
    pub max_concurrent_calls_tenant: Option<u32>,
    #[serde(
        default,
        rename = "maxCallsPerMinuteTenant",
        skip_serializing_if = "Option::is_none"
    )]
    pub max_calls_per_minute_tenant: Option<u32>,
    /// Per-tenant override of the global concurrency cap (§4.B step 3).
    #[serde(
        default,
        rename = "maxConcurrentCallsGlobal",
        skip_serializing_if = "Option::is_none"
    )]
    pub max_concurrent_calls_global: Option<u32>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SttConfig {
    pub url: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub language: Option<String>,
}

/// TTS engine selection, tagged by `engine`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "engine", rename_all = "snake_case")]
pub enum TtsConfig {
    KokoroHttp {
        url: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        voice: Option<String>,
    },
    CoquiXtts {
        url: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        speaker_wav_url: Option<String>,
    },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AudioConfig {
    #[serde(default = "default_sample_rate_hz")]
    pub sample_rate_hz: u32,
    #[serde(default = "default_channels")]
    pub channels: u8,
}

fn default_sample_rate_hz() -> u32 {
    8000
}

fn default_channels() -> u8 {
    1
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransferProfile {
    pub name: String,
    pub destination: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

/// Validation errors against the Runtime Tenant Config schema (§3).
#[derive(Debug, Clone, thiserror::Error)]
pub enum TenantConfigError {
    #[error("tenant config not found for tenant {0}")]
    NotFound(String),
    #[error("invalid tenant config: {0}")]
    Invalid(String),
    #[error("store error: {0}")]
    Store(String),
}

impl RuntimeTenantConfig {
    /// Validate the structural invariants from §3: contract version, at
    /// least one DID, and exactly one of `webhookSecret`/`webhookSecretRef`.
    pub fn validate(&self) -> std::result::Result<(), TenantConfigError> {
        if self.contract_version != CONTRACT_VERSION {
            return Err(TenantConfigError::Invalid(format!(
                "unsupported contractVersion \"{}\"",
                self.contract_version
            )));
        }
        if self.dids.is_empty() {
            return Err(TenantConfigError::Invalid(
                "dids must contain at least one E.164 number".into(),
            ));
        }
        for did in &self.dids {
            if crate::e164::normalize_e164(did).is_err() {
                return Err(TenantConfigError::Invalid(format!(
                    "did \"{did}\" is not valid E.164"
                )));
            }
        }
        match (&self.webhook_secret, &self.webhook_secret_ref) {
            (Some(_), None) | (None, Some(_)) => {}
            (Some(_), Some(_)) => {
                return Err(TenantConfigError::Invalid(
                    "exactly one of webhookSecret or webhookSecretRef is required, got both"
                        .into(),
                ))
            }
            (None, None) => {
                return Err(TenantConfigError::Invalid(
                    "exactly one of webhookSecret or webhookSecretRef is required".into(),
                ))
            }
        }
        Ok(())
    }

    /// Resolve the effective webhook secret. `webhookSecretRef` of the
    /// form `env:VAR` is resolved against the process environment; a
    /// missing or empty variable yields `None`.
    pub fn resolve_webhook_secret(&self) -> Option<String> {
        if let Some(secret) = &self.webhook_secret {
            return Some(secret.clone());
        }
        let r#ref = self.webhook_secret_ref.as_ref()?;
        let var = r#ref.strip_prefix("env:")?;
        std::env::var(var).ok().filter(|v| !v.is_empty())
    }
}
