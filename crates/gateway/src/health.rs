//! Liveness, readiness, and combined health endpoints.

use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::OnceLock;

use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Json};
use chrono::Utc;
use serde_json::json;

use crate::state::AppState;

fn boot_time() -> i64 {
    static BOOT: OnceLock<AtomicI64> = OnceLock::new();
    BOOT.get_or_init(|| AtomicI64::new(Utc::now().timestamp())).load(Ordering::Relaxed)
}

/// `GET /health/live` - always 200 once the process is serving requests.
pub async fn live() -> impl IntoResponse {
    Json(json!({ "status": "ok" }))
}

/// `GET /health/ready` - 200 only if the KV store answers.
pub async fn ready(State(state): State<AppState>) -> impl IntoResponse {
    match state.kv.ping().await {
        Ok(()) => (StatusCode::OK, Json(json!({ "status": "ok" }))),
        Err(e) => (
            StatusCode::SERVICE_UNAVAILABLE,
            Json(json!({ "status": "unavailable", "reason": e.to_string() })),
        ),
    }
}

/// `GET /health` - overall status plus per-dependency checks.
pub async fn health(State(state): State<AppState>) -> impl IntoResponse {
    let redis_ok = state.kv.ping().await.is_ok();

    let status = if redis_ok { "ok" } else { "unhealthy" };
    let code = if redis_ok {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };

    let body = json!({
        "status": status,
        "checks": {
            "redis": redis_ok,
        },
        "uptime_seconds": Utc::now().timestamp() - boot_time(),
    });

    (code, Json(body))
}
