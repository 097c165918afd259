//! Webhook Ingress (§4.C): HMAC verification of provider webhooks and
//! event routing into the Call Registry.

use axum::body::Bytes;
use axum::extract::State;
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Json, Response};
use chrono::Utc;
use hmac::{Hmac, Mac};
use serde::Deserialize;
use sha2::Sha256;
use subtle::ConstantTimeEq;

use vrp_domain::call::VoiceMode;
use vrp_domain::e164::normalize_e164;
use vrp_domain::tenant::TenantConfigError;

use crate::call_registry::SessionEvent;
use crate::metrics;
use crate::state::AppState;

type HmacSha256 = Hmac<Sha256>;

#[derive(Debug, Deserialize)]
struct WebhookEnvelope {
    data: WebhookData,
}

#[derive(Debug, Deserialize)]
struct WebhookData {
    event_type: String,
    payload: WebhookPayload,
}

#[derive(Debug, Deserialize)]
struct WebhookPayload {
    call_control_id: String,
    #[serde(default)]
    to: Option<String>,
    #[serde(default)]
    from: Option<String>,
}

fn api_error(status: StatusCode, message: impl Into<String>) -> Response {
    metrics::record_webhook_request(status);
    (status, Json(serde_json::json!({ "error": message.into() }))).into_response()
}

fn ok() -> Response {
    metrics::record_webhook_request(StatusCode::OK);
    StatusCode::OK.into_response()
}

/// `POST /v1/telnyx/webhook`
pub async fn telnyx_webhook(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> impl IntoResponse {
    if state.is_shutting_down() {
        return api_error(StatusCode::SERVICE_UNAVAILABLE, "gateway is shutting down");
    }

    let envelope: WebhookEnvelope = match serde_json::from_slice(&body) {
        Ok(e) => e,
        Err(e) => return api_error(StatusCode::BAD_REQUEST, format!("malformed webhook body: {e}")),
    };

    let call_control_id = envelope.data.payload.call_control_id.clone();
    let event_type = envelope.data.event_type.as_str();

    // Tenant resolution: bind at call.initiated, otherwise use the
    // session's recorded binding (already established by the registry).
    let tenant_id = if event_type == "call.initiated" {
        let did_raw = match envelope.data.payload.to.as_deref() {
            Some(d) => d,
            None => return api_error(StatusCode::BAD_REQUEST, "missing payload.to"),
        };
        let did = match normalize_e164(did_raw) {
            Ok(d) => d,
            Err(e) => return api_error(StatusCode::BAD_REQUEST, format!("invalid DID: {e}")),
        };
        match state.tenant_config.lookup_did(&did).await {
            Ok(tid) => Some(tid),
            Err(TenantConfigError::NotFound(_)) => {
                return api_error(StatusCode::NOT_FOUND, "no tenant bound to this DID")
            }
            Err(e) => {
                tracing::warn!(error = %e, %did, "tenant lookup failed");
                return api_error(StatusCode::NOT_FOUND, "tenant lookup failed");
            }
        }
    } else {
        None
    };

    if state.config.webhook.verify_signatures {
        let secret = match resolve_webhook_secret(&state, tenant_id.as_deref(), &call_control_id).await {
            Ok(Some(s)) => s,
            Ok(None) => {
                return api_error(StatusCode::UNAUTHORIZED, "no webhook secret configured for tenant")
            }
            Err(resp) => return resp,
        };

        if let Err(resp) = verify_signature(&headers, &body, &secret, state.config.webhook.signature_skew_seconds) {
            return resp;
        }
    }

    match event_type {
        "call.initiated" => {
            let tenant_id = tenant_id.expect("resolved above for call.initiated");
            if state.call_registry.is_known(&call_control_id).await {
                // Retried call.initiated within the dedup window: discard.
                return ok();
            }
            let caller_id = envelope
                .data
                .payload
                .from
                .clone()
                .unwrap_or_else(|| "unknown".to_string());
            let called_number = envelope.data.payload.to.clone().unwrap_or_default();
            state.note_tenant(&tenant_id);

            let tenant_cfg = match state.tenant_config.load_config(&tenant_id).await {
                Ok(cfg) => cfg,
                Err(e) => {
                    tracing::warn!(error = %e, %tenant_id, "failed to load tenant config");
                    return api_error(StatusCode::NOT_FOUND, "tenant config unavailable");
                }
            };

            state
                .call_registry
                .admit(
                    call_control_id,
                    tenant_id,
                    caller_id,
                    called_number,
                    tenant_cfg.caps.clone(),
                    VoiceMode::Preset,
                )
                .await;
            ok()
        }
        "call.answered" => {
            state.call_registry.send(&call_control_id, SessionEvent::Answered).await;
            ok()
        }
        "call.hangup" => {
            state.call_registry.send(&call_control_id, SessionEvent::Hangup).await;
            ok()
        }
        "call.playback.started" | "call.playback.ended" => {
            // Playback acknowledgments from the provider are informational;
            // the pipeline's own brain-directed playback state is
            // authoritative (§4.F), so these are logged and no-op.
            tracing::debug!(%call_control_id, event_type, "playback webhook event");
            ok()
        }
        "call.transfer.answered" => {
            state.call_registry.send(&call_control_id, SessionEvent::TransferAnswered).await;
            ok()
        }
        "call.transfer.failed" => {
            state.call_registry.send(&call_control_id, SessionEvent::TransferFailed).await;
            ok()
        }
        other if other.starts_with("call.transfer") => {
            tracing::debug!(%call_control_id, event_type = other, "unhandled transfer webhook event");
            ok()
        }
        other => {
            tracing::debug!(%call_control_id, event_type = other, "unhandled webhook event");
            ok()
        }
    }
}

/// Resolve the webhook secret to verify against: for `call.initiated`,
/// via the tenant just resolved from the DID; otherwise via the tenant
/// already bound to this call in the registry.
async fn resolve_webhook_secret(
    state: &AppState,
    tenant_id: Option<&str>,
    call_control_id: &str,
) -> Result<Option<String>, Response> {
    let tenant_id = match tenant_id {
        Some(t) => t.to_string(),
        None => match state.call_registry.snapshot(&call_control_id.to_string()).await {
            Some(session) => session.tenant_id,
            None => return Err(api_error(StatusCode::NOT_FOUND, "unknown call")),
        },
    };

    state
        .tenant_config
        .webhook_secret(&tenant_id)
        .await
        .map_err(|e| {
            tracing::warn!(error = %e, tenant_id, "failed to resolve webhook secret");
            api_error(StatusCode::NOT_FOUND, "tenant config unavailable")
        })
}

fn verify_signature(headers: &HeaderMap, body: &[u8], secret: &str, skew_seconds: i64) -> Result<(), Response> {
    let sig_hex = headers
        .get("telnyx-signature")
        .and_then(|v| v.to_str().ok())
        .unwrap_or("");
    if sig_hex.is_empty() {
        return Err(api_error(StatusCode::UNAUTHORIZED, "missing signature header"));
    }

    let timestamp = headers
        .get("telnyx-timestamp")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.parse::<i64>().ok());
    match timestamp {
        Some(ts) => {
            let skew = (Utc::now().timestamp() - ts).abs();
            if skew > skew_seconds {
                return Err(api_error(StatusCode::UNAUTHORIZED, "webhook timestamp outside allowed skew"));
            }
        }
        None => return Err(api_error(StatusCode::UNAUTHORIZED, "missing timestamp header")),
    }

    let mut mac = HmacSha256::new_from_slice(secret.as_bytes()).expect("HMAC accepts any key length");
    mac.update(body);
    let computed = hex::encode(mac.finalize().into_bytes());

    if computed.as_bytes().ct_eq(sig_hex.as_bytes()).unwrap_u8() != 1 {
        return Err(api_error(StatusCode::UNAUTHORIZED, "invalid webhook signature"));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn signature_mismatch_is_rejected() {
        let mut headers = HeaderMap::new();
        headers.insert("telnyx-signature", "deadbeef".parse().unwrap());
        headers.insert("telnyx-timestamp", Utc::now().timestamp().to_string().parse().unwrap());
        let result = verify_signature(&headers, b"{}", "secret", 300);
        assert!(result.is_err());
    }

    #[test]
    fn signature_match_is_accepted() {
        let body = b"{\"hello\":true}";
        let mut mac = HmacSha256::new_from_slice(b"secret").unwrap();
        mac.update(body);
        let sig = hex::encode(mac.finalize().into_bytes());

        let mut headers = HeaderMap::new();
        headers.insert("telnyx-signature", sig.parse().unwrap());
        headers.insert("telnyx-timestamp", Utc::now().timestamp().to_string().parse().unwrap());
        assert!(verify_signature(&headers, body, "secret", 300).is_ok());
    }

    #[test]
    fn stale_timestamp_is_rejected() {
        let body = b"{}";
        let mut mac = HmacSha256::new_from_slice(b"secret").unwrap();
        mac.update(body);
        let sig = hex::encode(mac.finalize().into_bytes());

        let mut headers = HeaderMap::new();
        headers.insert("telnyx-signature", sig.parse().unwrap());
        headers.insert("telnyx-timestamp", (Utc::now().timestamp() - 10_000).to_string().parse().unwrap());
        assert!(verify_signature(&headers, body, "secret", 300).is_err());
    }
}
