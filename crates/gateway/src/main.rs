mod call_registry;
mod health;
mod history;
mod media;
mod metrics;
mod pipeline_sink;
mod resample;
mod shutdown;
mod state;
mod webhooks;
mod workflow_runner;

use std::collections::HashSet;
use std::sync::atomic::AtomicBool;
use std::sync::Arc;

use anyhow::Context;
use axum::http::{HeaderValue, Method};
use axum::routing::{get, post};
use axum::Router;
use parking_lot::Mutex;
use tower_http::cors::{AllowOrigin, CorsLayer};
use tracing_subscriber::EnvFilter;

use vrp_brain_client::{BrainClient, HttpBrainClient};
use vrp_capacity::CapacityController;
use vrp_domain::config::{Config, ConfigSeverity};
use vrp_kvstore::{KvStore, RedisStore};
use vrp_tenant_config::TenantConfigStore;
use vrp_workflow::{JobQueue, LeadStore, WorkflowStore};

use call_registry::CallRegistry;
use history::HistoryStore;
use state::AppState;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_tracing();
    tracing::info!("voice receptionist gateway starting");

    let config_toml = std::fs::read_to_string(config_path()).unwrap_or_default();
    let config = Arc::new(
        Config::from_toml_with_env(&config_toml).context("loading configuration")?,
    );

    let issues = config.validate();
    for issue in &issues {
        match issue.severity {
            ConfigSeverity::Warning => tracing::warn!("config: {issue}"),
            ConfigSeverity::Error => tracing::error!("config: {issue}"),
        }
    }
    if issues.iter().any(|i| i.severity == ConfigSeverity::Error) {
        anyhow::bail!(
            "config validation failed with {} error(s)",
            issues.iter().filter(|i| i.severity == ConfigSeverity::Error).count()
        );
    }

    // ── Key-value store ──────────────────────────────────────────────
    let kv: Arc<dyn KvStore> = Arc::new(
        RedisStore::connect(&config.kv.url)
            .await
            .context("connecting to the key-value store")?,
    );
    tracing::info!(url = %config.kv.url, "key-value store connected");

    // ── Tenant config store ──────────────────────────────────────────
    let tenant_config = Arc::new(TenantConfigStore::new(
        kv.clone(),
        &config.tenant_prefixes.tenantmap_prefix,
        &config.tenant_prefixes.tenantcfg_prefix,
    ));
    tracing::info!("tenant config store ready");

    // ── Capacity controller ──────────────────────────────────────────
    let capacity = Arc::new(CapacityController::new(
        kv.clone(),
        config.capacity.capacity_ttl_seconds,
        config.capacity.global_concurrency_cap,
    ));
    tracing::info!(
        global_cap = config.capacity.global_concurrency_cap,
        "capacity controller ready"
    );

    // ── Brain client ──────────────────────────────────────────────────
    let brain: Arc<dyn BrainClient> = Arc::new(HttpBrainClient::new(
        config.brain.url.clone(),
        std::time::Duration::from_millis(config.brain.timeout_ms),
        config.brain.streaming_enabled,
    ));
    tracing::info!(url = %config.brain.url, streaming = config.brain.streaming_enabled, "brain client ready");

    // ── Workflow engine plumbing ──────────────────────────────────────
    let job_queue = Arc::new(JobQueue::new(kv.clone()));
    let workflow_store = Arc::new(WorkflowStore::new(kv.clone(), "workflows"));
    let lead_store = Arc::new(LeadStore::new(kv.clone()));
    tracing::info!("workflow queue + store ready");

    // ── Call history ───────────────────────────────────────────────────
    let history = Arc::new(HistoryStore::new(kv.clone()));

    // ── Call registry ──────────────────────────────────────────────────
    let call_registry = Arc::new(CallRegistry::new(
        capacity.clone(),
        job_queue.clone(),
        workflow_store.clone(),
        history.clone(),
        config.media.answer_timeout_secs,
        config.capacity.tenant_concurrency_cap_default,
        config.capacity.tenant_calls_per_min_cap_default,
    ));
    tracing::info!("call registry ready");

    let http = reqwest::Client::builder()
        .timeout(std::time::Duration::from_secs(30))
        .build()
        .context("building shared HTTP client")?;

    let state = AppState {
        config: config.clone(),
        kv,
        tenant_config,
        capacity,
        call_registry,
        brain,
        job_queue,
        workflow_store,
        lead_store,
        history,
        http,
        shutting_down: Arc::new(AtomicBool::new(false)),
        known_tenants: Arc::new(Mutex::new(HashSet::new())),
    };

    // ── Background loops ────────────────────────────────────────────
    tokio::spawn(workflow_runner::run_job_consumer(state.clone()));
    tracing::info!("workflow job consumer started");
    tokio::spawn(workflow_runner::run_scheduler_tick(state.clone()));
    tracing::info!("workflow scheduler tick started (30s)");

    // ── CORS layer ───────────────────────────────────────────────────
    let cors_layer = build_cors_layer(&config.server.cors);

    // ── Rate limit (per-IP token bucket via governor) ────────────────
    let governor_layer = config.server.rate_limit.as_ref().map(|rl| {
        use tower_governor::governor::GovernorConfigBuilder;
        use tower_governor::GovernorLayer;

        let gov_config = GovernorConfigBuilder::default()
            .per_second(rl.requests_per_second)
            .burst_size(rl.burst_size)
            .finish()
            .expect("rate_limit: requests_per_second and burst_size must be > 0");

        tracing::info!(
            requests_per_second = rl.requests_per_second,
            burst_size = rl.burst_size,
            "per-IP rate limiting enabled"
        );

        GovernorLayer {
            config: std::sync::Arc::new(gov_config),
        }
    });
    if governor_layer.is_none() {
        tracing::info!("per-IP rate limiting disabled (no [server.rate_limit] in config)");
    }

    let router = Router::new()
        .route("/v1/telnyx/webhook", post(webhooks::telnyx_webhook))
        .route("/v1/telnyx/media/:call_control_id", get(media::media_ws))
        .route("/health/live", get(health::live))
        .route("/health/ready", get(health::ready))
        .route("/health", get(health::health))
        .route("/metrics", get(metrics::metrics_handler))
        .layer(cors_layer)
        .layer(tower::limit::ConcurrencyLimitLayer::new(config.server.max_concurrent_requests));

    let app = if let Some(gov) = governor_layer {
        router.layer(gov).with_state(state.clone())
    } else {
        router.with_state(state.clone())
    };

    let addr = format!("{}:{}", config.server.host, config.server.port);
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("binding to {addr}"))?;
    tracing::info!(addr = %addr, "voice gateway listening");

    let server = axum::serve(listener, app).with_graceful_shutdown(shutdown::wait_for_shutdown_signal());
    server.await.context("axum server error")?;

    shutdown::run_shutdown_sequence(state).await;
    tracing::info!("voice gateway shut down cleanly");
    Ok(())
}

fn init_tracing() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info,vrp_gateway=debug")),
        )
        .json()
        .init();
}

fn config_path() -> String {
    std::env::var("CONFIG_PATH").unwrap_or_else(|_| "config.toml".to_string())
}

/// Build a [`CorsLayer`] from the configured allowed origins. Origins may
/// end in `:*` to match any port on that host; a lone `"*"` allows all
/// origins.
fn build_cors_layer(cors: &vrp_domain::config::CorsConfig) -> CorsLayer {
    use axum::http::header;

    if cors.allowed_origins.len() == 1 && cors.allowed_origins[0] == "*" {
        tracing::warn!("CORS configured with wildcard \"*\" — all origins allowed");
        return CorsLayer::new()
            .allow_origin(tower_http::cors::Any)
            .allow_methods([Method::GET, Method::POST, Method::PUT, Method::DELETE, Method::OPTIONS])
            .allow_headers([header::CONTENT_TYPE, header::AUTHORIZATION]);
    }

    let mut exact: Vec<HeaderValue> = Vec::new();
    let mut wildcard_prefixes: Vec<String> = Vec::new();

    for origin in &cors.allowed_origins {
        if origin.ends_with(":*") {
            wildcard_prefixes.push(origin.trim_end_matches('*').to_owned());
        } else if let Ok(hv) = origin.parse::<HeaderValue>() {
            exact.push(hv);
        } else {
            tracing::warn!(origin = %origin, "invalid CORS origin, skipping");
        }
    }

    let allow_origin = if wildcard_prefixes.is_empty() {
        AllowOrigin::list(exact)
    } else {
        AllowOrigin::predicate(move |origin, _| {
            let origin_str = origin.to_str().unwrap_or("");
            if exact.iter().any(|e| e.as_bytes() == origin.as_bytes()) {
                return true;
            }
            wildcard_prefixes.iter().any(|prefix| {
                origin_str
                    .strip_prefix(prefix.as_str())
                    .map(|port| !port.is_empty() && port.chars().all(|c| c.is_ascii_digit()))
                    .unwrap_or(false)
            })
        })
    };

    CorsLayer::new()
        .allow_origin(allow_origin)
        .allow_methods([Method::GET, Method::POST, Method::PUT, Method::DELETE, Method::OPTIONS])
        .allow_headers([header::CONTENT_TYPE, header::AUTHORIZATION])
        .allow_credentials(true)
}
