//! Process-level configuration: ports, default caps, upstream URLs, KV
//! store URL. Loaded from `config.toml` with environment variable
//! overrides for every field named in the Environment table, mirroring
//! this codebase's existing convention of `serde(default)` free functions
//! plus an explicit `validate()` pass that aggregates warnings/errors
//! before the server binds.

use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub capacity: CapacityConfig,
    #[serde(default)]
    pub webhook: WebhookConfig,
    #[serde(default)]
    pub media: MediaConfig,
    #[serde(default)]
    pub brain: BrainConfig,
    #[serde(default)]
    pub kv: KvConfig,
    #[serde(default)]
    pub tenant_prefixes: TenantPrefixConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            server: ServerConfig::default(),
            capacity: CapacityConfig::default(),
            webhook: WebhookConfig::default(),
            media: MediaConfig::default(),
            brain: BrainConfig::default(),
            kv: KvConfig::default(),
            tenant_prefixes: TenantPrefixConfig::default(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "d_host")]
    pub host: String,
    #[serde(default = "d_port")]
    pub port: u16,
    /// Grace deadline for in-flight calls during shutdown (§4.J).
    #[serde(default = "d_shutdown_grace_secs")]
    pub shutdown_grace_secs: u64,
    #[serde(default = "d_max_concurrent_requests")]
    pub max_concurrent_requests: usize,
    #[serde(default)]
    pub cors: CorsConfig,
    #[serde(default)]
    pub rate_limit: Option<RateLimitConfig>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: d_host(),
            port: d_port(),
            shutdown_grace_secs: d_shutdown_grace_secs(),
            max_concurrent_requests: d_max_concurrent_requests(),
            cors: CorsConfig::default(),
            rate_limit: None,
        }
    }
}

fn d_host() -> String {
    "0.0.0.0".into()
}
fn d_port() -> u16 {
    8080
}
fn d_shutdown_grace_secs() -> u64 {
    30
}
fn d_max_concurrent_requests() -> usize {
    256
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CorsConfig {
    #[serde(default = "d_cors_origins")]
    pub allowed_origins: Vec<String>,
}

impl Default for CorsConfig {
    fn default() -> Self {
        Self {
            allowed_origins: d_cors_origins(),
        }
    }
}

fn d_cors_origins() -> Vec<String> {
    vec!["*".into()]
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RateLimitConfig {
    pub requests_per_second: u64,
    pub burst_size: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CapacityConfig {
    /// `GLOBAL_CONCURRENCY_CAP`.
    #[serde(default = "d_global_cap")]
    pub global_concurrency_cap: u32,
    /// `TENANT_CONCURRENCY_CAP_DEFAULT`.
    #[serde(default = "d_tenant_concurrency_cap")]
    pub tenant_concurrency_cap_default: u32,
    /// `TENANT_CALLS_PER_MIN_CAP_DEFAULT`.
    #[serde(default = "d_tenant_rpm_cap")]
    pub tenant_calls_per_min_cap_default: u32,
    /// `CAPACITY_TTL_SECONDS`.
    #[serde(default = "d_capacity_ttl")]
    pub capacity_ttl_seconds: u64,
}

impl Default for CapacityConfig {
    fn default() -> Self {
        Self {
            global_concurrency_cap: d_global_cap(),
            tenant_concurrency_cap_default: d_tenant_concurrency_cap(),
            tenant_calls_per_min_cap_default: d_tenant_rpm_cap(),
            capacity_ttl_seconds: d_capacity_ttl(),
        }
    }
}

fn d_global_cap() -> u32 {
    100
}
fn d_tenant_concurrency_cap() -> u32 {
    10
}
fn d_tenant_rpm_cap() -> u32 {
    30
}
fn d_capacity_ttl() -> u64 {
    120
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WebhookConfig {
    /// `TELNYX_VERIFY_SIGNATURES`.
    #[serde(default = "d_true")]
    pub verify_signatures: bool,
    /// Signature timestamp skew tolerance, in seconds. Resolves the spec's
    /// open question at 5 minutes.
    #[serde(default = "d_skew_secs")]
    pub signature_skew_seconds: i64,
}

impl Default for WebhookConfig {
    fn default() -> Self {
        Self {
            verify_signatures: d_true(),
            signature_skew_seconds: d_skew_secs(),
        }
    }
}

fn d_true() -> bool {
    true
}
fn d_skew_secs() -> i64 {
    300
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MediaConfig {
    pub media_stream_token: Option<String>,
    #[serde(default = "d_stt_chunk_ms")]
    pub stt_chunk_ms: u64,
    #[serde(default = "d_stt_silence_ms")]
    pub stt_silence_ms: u64,
    #[serde(default = "d_dead_air_ms")]
    pub dead_air_ms: u64,
    #[serde(default = "d_answer_timeout_secs")]
    pub answer_timeout_secs: u64,
    #[serde(default = "d_barge_in_min_ms")]
    pub barge_in_min_ms: u64,
    #[serde(default = "d_inbound_channel_capacity")]
    pub inbound_channel_capacity: usize,
}

impl Default for MediaConfig {
    fn default() -> Self {
        Self {
            media_stream_token: None,
            stt_chunk_ms: d_stt_chunk_ms(),
            stt_silence_ms: d_stt_silence_ms(),
            dead_air_ms: d_dead_air_ms(),
            answer_timeout_secs: d_answer_timeout_secs(),
            barge_in_min_ms: d_barge_in_min_ms(),
            inbound_channel_capacity: d_inbound_channel_capacity(),
        }
    }
}

fn d_stt_chunk_ms() -> u64 {
    2000
}
fn d_stt_silence_ms() -> u64 {
    700
}
fn d_dead_air_ms() -> u64 {
    10_000
}
fn d_answer_timeout_secs() -> u64 {
    60
}
fn d_barge_in_min_ms() -> u64 {
    150
}
fn d_inbound_channel_capacity() -> usize {
    256
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BrainConfig {
    #[serde(default = "d_brain_url")]
    pub url: String,
    #[serde(default)]
    pub streaming_enabled: bool,
    #[serde(default = "d_brain_timeout_ms")]
    pub timeout_ms: u64,
}

impl Default for BrainConfig {
    fn default() -> Self {
        Self {
            url: d_brain_url(),
            streaming_enabled: false,
            timeout_ms: d_brain_timeout_ms(),
        }
    }
}

fn d_brain_url() -> String {
    String::new()
}
fn d_brain_timeout_ms() -> u64 {
    8000
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KvConfig {
    #[serde(default = "d_kv_url")]
    pub url: String,
}

impl Default for KvConfig {
    fn default() -> Self {
        Self { url: d_kv_url() }
    }
}

fn d_kv_url() -> String {
    "redis://127.0.0.1:6379".into()
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TenantPrefixConfig {
    #[serde(default = "d_tenantmap_prefix")]
    pub tenantmap_prefix: String,
    #[serde(default = "d_tenantcfg_prefix")]
    pub tenantcfg_prefix: String,
}

impl Default for TenantPrefixConfig {
    fn default() -> Self {
        Self {
            tenantmap_prefix: d_tenantmap_prefix(),
            tenantcfg_prefix: d_tenantcfg_prefix(),
        }
    }
}

fn d_tenantmap_prefix() -> String {
    "tenantmap".into()
}
fn d_tenantcfg_prefix() -> String {
    "tenantcfg".into()
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Config validation
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfigSeverity {
    Error,
    Warning,
}

#[derive(Debug, Clone)]
pub struct ConfigIssue {
    pub severity: ConfigSeverity,
    pub field: String,
    pub message: String,
}

impl fmt::Display for ConfigIssue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let tag = match self.severity {
            ConfigSeverity::Error => "ERROR",
            ConfigSeverity::Warning => "WARN",
        };
        write!(f, "[{tag}] {}: {}", self.field, self.message)
    }
}

impl Config {
    /// Validate the configuration and return a list of issues. An empty
    /// vec means everything looks good; an `Error`-severity issue should
    /// stop the process from binding.
    pub fn validate(&self) -> Vec<ConfigIssue> {
        let mut issues = Vec::new();

        if self.server.port == 0 {
            issues.push(ConfigIssue {
                severity: ConfigSeverity::Error,
                field: "server.port".into(),
                message: "port must be greater than 0".into(),
            });
        }

        if self.brain.url.is_empty() {
            issues.push(ConfigIssue {
                severity: ConfigSeverity::Error,
                field: "brain.url".into(),
                message: "BRAIN_URL must be set".into(),
            });
        } else if !self.brain.url.starts_with("http://") && !self.brain.url.starts_with("https://")
        {
            issues.push(ConfigIssue {
                severity: ConfigSeverity::Error,
                field: "brain.url".into(),
                message: format!(
                    "must start with http:// or https:// (got \"{}\")",
                    self.brain.url
                ),
            });
        }

        if self.media.media_stream_token.as_deref().unwrap_or("").is_empty() {
            issues.push(ConfigIssue {
                severity: ConfigSeverity::Warning,
                field: "media.media_stream_token".into(),
                message: "MEDIA_STREAM_TOKEN is unset — media WebSocket will reject all clients"
                    .into(),
            });
        }

        if !self.webhook.verify_signatures {
            issues.push(ConfigIssue {
                severity: ConfigSeverity::Warning,
                field: "webhook.verify_signatures".into(),
                message: "TELNYX_VERIFY_SIGNATURES=false — webhook signature checks are disabled"
                    .into(),
            });
        }

        if self.capacity.global_concurrency_cap == 0 {
            issues.push(ConfigIssue {
                severity: ConfigSeverity::Error,
                field: "capacity.global_concurrency_cap".into(),
                message: "must be greater than 0".into(),
            });
        }

        if self.capacity.capacity_ttl_seconds == 0 {
            issues.push(ConfigIssue {
                severity: ConfigSeverity::Error,
                field: "capacity.capacity_ttl_seconds".into(),
                message: "CAPACITY_TTL_SECONDS must be greater than 0 to self-heal after crashes"
                    .into(),
            });
        }

        if self.kv.url.is_empty() {
            issues.push(ConfigIssue {
                severity: ConfigSeverity::Error,
                field: "kv.url".into(),
                message: "KV store URL must not be empty".into(),
            });
        }

        issues
    }

    /// Load from a TOML file, then apply environment-variable overrides
    /// for every field named in the Environment table.
    pub fn from_toml_with_env(toml_str: &str) -> crate::error::Result<Self> {
        let mut cfg: Config = toml::from_str(toml_str)
            .map_err(|e| crate::error::Error::InvalidInput(format!("config.toml: {e}")))?;
        cfg.apply_env_overrides();
        Ok(cfg)
    }

    pub fn apply_env_overrides(&mut self) {
        if let Ok(v) = std::env::var("TELNYX_VERIFY_SIGNATURES") {
            self.webhook.verify_signatures = parse_bool(&v, self.webhook.verify_signatures);
        }
        if let Ok(v) = std::env::var("MEDIA_STREAM_TOKEN") {
            self.media.media_stream_token = Some(v);
        }
        if let Ok(v) = std::env::var("STT_CHUNK_MS") {
            if let Ok(n) = v.parse() {
                self.media.stt_chunk_ms = n;
            }
        }
        if let Ok(v) = std::env::var("STT_SILENCE_MS") {
            if let Ok(n) = v.parse() {
                self.media.stt_silence_ms = n;
            }
        }
        if let Ok(v) = std::env::var("DEAD_AIR_MS") {
            if let Ok(n) = v.parse() {
                self.media.dead_air_ms = n;
            }
        }
        if let Ok(v) = std::env::var("GLOBAL_CONCURRENCY_CAP") {
            if let Ok(n) = v.parse() {
                self.capacity.global_concurrency_cap = n;
            }
        }
        if let Ok(v) = std::env::var("TENANT_CONCURRENCY_CAP_DEFAULT") {
            if let Ok(n) = v.parse() {
                self.capacity.tenant_concurrency_cap_default = n;
            }
        }
        if let Ok(v) = std::env::var("TENANT_CALLS_PER_MIN_CAP_DEFAULT") {
            if let Ok(n) = v.parse() {
                self.capacity.tenant_calls_per_min_cap_default = n;
            }
        }
        if let Ok(v) = std::env::var("CAPACITY_TTL_SECONDS") {
            if let Ok(n) = v.parse() {
                self.capacity.capacity_ttl_seconds = n;
            }
        }
        if let Ok(v) = std::env::var("BRAIN_URL") {
            self.brain.url = v;
        }
        if let Ok(v) = std::env::var("BRAIN_STREAMING_ENABLED") {
            self.brain.streaming_enabled = parse_bool(&v, self.brain.streaming_enabled);
        }
        if let Ok(v) = std::env::var("BRAIN_TIMEOUT_MS") {
            if let Ok(n) = v.parse() {
                self.brain.timeout_ms = n;
            }
        }
        if let Ok(v) = std::env::var("TENANTMAP_PREFIX") {
            self.tenant_prefixes.tenantmap_prefix = v;
        }
        if let Ok(v) = std::env::var("TENANTCFG_PREFIX") {
            self.tenant_prefixes.tenantcfg_prefix = v;
        }
        if let Ok(v) = std::env::var("REDIS_URL") {
            self.kv.url = v;
        }
    }
}

fn parse_bool(s: &str, default: bool) -> bool {
    match s.to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => true,
        "0" | "false" | "no" | "off" => false,
        _ => default,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_round_trips_through_toml() {
        let cfg = Config::default();
        let s = toml::to_string(&cfg).unwrap();
        let reparsed: Config = toml::from_str(&s).unwrap();
        assert_eq!(reparsed.server.port, cfg.server.port);
    }

    #[test]
    fn missing_brain_url_is_an_error() {
        let cfg = Config::default();
        let issues = cfg.validate();
        assert!(issues
            .iter()
            .any(|i| i.field == "brain.url" && i.severity == ConfigSeverity::Error));
    }

    #[test]
    fn missing_media_token_is_a_warning_not_an_error() {
        let mut cfg = Config::default();
        cfg.brain.url = "http://brain.internal".into();
        let issues = cfg.validate();
        let token_issue = issues
            .iter()
            .find(|i| i.field == "media.media_stream_token")
            .unwrap();
        assert_eq!(token_issue.severity, ConfigSeverity::Warning);
    }

    #[test]
    fn env_override_wins_over_toml_default() {
        std::env::set_var("BRAIN_URL", "http://override.internal");
        let mut cfg = Config::default();
        cfg.apply_env_overrides();
        assert_eq!(cfg.brain.url, "http://override.internal");
        std::env::remove_var("BRAIN_URL");
    }
}
