//! Step action implementations (§4.H Actions). Contract only: each
//! action calls an external service (or no-ops when unconfigured) and
//! returns a JSON output object, or an error message that fails the run.

use std::collections::HashMap;

use hmac::{Hmac, Mac};
use rand::Rng;
use serde_json::{json, Value};
use sha2::Sha256;
use uuid::Uuid;
use vrp_domain::workflow::{Lead, StepAction};

use crate::engine::interpolate;
use crate::store::LeadStore;

pub struct ActionContext {
    pub run_id: Uuid,
    pub workflow_id: Uuid,
    pub workflow_name: String,
    pub tenant_id: String,
    pub event: Value,
    pub step_outputs: HashMap<u32, Value>,
}

impl ActionContext {
    fn render(&self, template: &str) -> String {
        interpolate(template, &self.workflow_name, &self.event, &self.step_outputs)
    }
}

pub async fn execute_step(
    action: StepAction,
    config: &Value,
    ctx: &ActionContext,
    http: &reqwest::Client,
    lead_store: &LeadStore,
) -> Result<Value, String> {
    match action {
        StepAction::SendEmail => send_email(config, ctx).await,
        StepAction::SendSms => send_sms(config, ctx, http).await,
        StepAction::FireWebhook => fire_webhook(config, ctx, http).await,
        StepAction::AiSummarize => ai_call(config, ctx, http, "summary", false).await,
        StepAction::AiExtract => ai_call(config, ctx, http, "extracted", true).await,
        StepAction::AiExtractQuote => ai_call(config, ctx, http, "extracted", true).await,
        StepAction::BuildQuote => build_quote(config, ctx),
        StepAction::StoreLead => store_lead(config, ctx, lead_store).await,
    }
}

/// SMTP or no-op if not configured; subject/body interpolated.
async fn send_email(config: &Value, ctx: &ActionContext) -> Result<Value, String> {
    let Some(to) = config["to"].as_str() else {
        return Ok(json!({"sent": false, "reason": "not configured"}));
    };
    let subject = ctx.render(config["subject"].as_str().unwrap_or(""));
    let body = ctx.render(config["body"].as_str().unwrap_or(""));
    tracing::info!(to, subject, "send_email (no SMTP transport configured, logging only)");
    Ok(json!({"sent": true, "to": to, "subject": subject, "body": body}))
}

/// Provider SMS API; returns `{sent, to}`.
async fn send_sms(config: &Value, ctx: &ActionContext, http: &reqwest::Client) -> Result<Value, String> {
    let Some(to) = config["to"].as_str() else {
        return Ok(json!({"sent": false, "reason": "not configured"}));
    };
    let body = ctx.render(config["body"].as_str().unwrap_or(""));
    let Some(url) = config["provider_url"].as_str() else {
        return Ok(json!({"sent": false, "to": to}));
    };
    let response = http
        .post(url)
        .json(&json!({"to": to, "body": body}))
        .send()
        .await
        .map_err(|e| format!("sms provider request failed: {e}"))?;
    if !response.status().is_success() {
        return Err(format!("sms provider returned status {}", response.status()));
    }
    Ok(json!({"sent": true, "to": to}))
}

/// POST JSON payload to `url`, optionally signed with an HMAC of the body.
async fn fire_webhook(config: &Value, ctx: &ActionContext, http: &reqwest::Client) -> Result<Value, String> {
    let url = config["url"].as_str().ok_or("fire_webhook requires url")?;
    let include_transcript = config["include_transcript"].as_bool().unwrap_or(true);
    let include_step_outputs = config["include_step_outputs"].as_bool().unwrap_or(false);

    let mut payload = json!({
        "tenant_id": ctx.tenant_id,
        "run_id": ctx.run_id,
        "event": ctx.event,
    });
    if !include_transcript {
        payload.as_object_mut().unwrap().remove("event");
    }
    if include_step_outputs {
        payload["step_outputs"] = serde_json::to_value(&ctx.step_outputs).unwrap_or(Value::Null);
    }
    let body = serde_json::to_vec(&payload).map_err(|e| e.to_string())?;

    let mut request = http.post(url).header("Content-Type", "application/json").body(body.clone());
    if let Some(secret) = config["secret"].as_str() {
        let mut mac = Hmac::<Sha256>::new_from_slice(secret.as_bytes()).map_err(|e| e.to_string())?;
        mac.update(&body);
        let signature = hex::encode(mac.finalize().into_bytes());
        request = request.header("X-Workflow-Signature", signature);
    }

    let response = request.send().await.map_err(|e| format!("webhook request failed: {e}"))?;
    if !response.status().is_success() {
        return Err(format!("webhook returned status {}", response.status()));
    }
    Ok(json!({"delivered": true, "url": url}))
}

/// Call an OpenAI-compatible endpoint for summarisation/extraction.
/// JSON-extracting variants strip markdown code fences before parsing.
async fn ai_call(
    config: &Value,
    ctx: &ActionContext,
    http: &reqwest::Client,
    output_key: &str,
    parse_as_json: bool,
) -> Result<Value, String> {
    let endpoint = config["endpoint"].as_str().ok_or("ai action requires endpoint")?;
    let prompt = ctx.render(config["prompt_template"].as_str().unwrap_or("{{transcript}}"));

    let mut request = http.post(endpoint).json(&json!({
        "model": config["model"].as_str().unwrap_or("gpt-4o-mini"),
        "messages": [{"role": "user", "content": prompt}],
    }));
    if let Some(key) = config["api_key"].as_str() {
        request = request.bearer_auth(key);
    }

    let response = request.send().await.map_err(|e| format!("ai endpoint request failed: {e}"))?;
    if !response.status().is_success() {
        return Err(format!("ai endpoint returned status {}", response.status()));
    }
    let body: Value = response.json().await.map_err(|e| format!("ai endpoint returned malformed JSON: {e}"))?;
    let text = body["choices"][0]["message"]["content"]
        .as_str()
        .or_else(|| body["text"].as_str())
        .unwrap_or_default()
        .to_string();

    if parse_as_json {
        let stripped = strip_code_fences(&text);
        let parsed: Value = serde_json::from_str(&stripped)
            .map_err(|e| format!("ai response was not valid JSON after stripping fences: {e}"))?;
        Ok(json!({ output_key: parsed }))
    } else {
        Ok(json!({ output_key: text }))
    }
}

fn strip_code_fences(text: &str) -> String {
    let trimmed = text.trim();
    if let Some(rest) = trimmed.strip_prefix("```") {
        let rest = rest.strip_prefix("json").unwrap_or(rest);
        let rest = rest.trim_start_matches('\n');
        if let Some(end) = rest.rfind("```") {
            return rest[..end].trim().to_string();
        }
        return rest.trim().to_string();
    }
    trimmed.to_string()
}

#[derive(Debug, Clone, serde::Deserialize)]
struct QuoteLineItem {
    description: String,
    quantity: f64,
}

/// Match extracted line items to tenant pricing, compute totals, and
/// generate a `Q-YYYYMMDD-XXXX` quote number.
fn build_quote(config: &Value, ctx: &ActionContext) -> Result<Value, String> {
    let line_items: Vec<QuoteLineItem> = serde_json::from_value(config["line_items"].clone())
        .map_err(|_| "build_quote requires line_items array".to_string())?;
    let pricing: HashMap<String, f64> = config["pricing"]
        .as_object()
        .map(|m| {
            m.iter()
                .filter_map(|(k, v)| v.as_f64().map(|f| (k.to_lowercase(), f)))
                .collect()
        })
        .unwrap_or_default();
    let tax_rate = config["tax_rate"].as_f64().unwrap_or(0.0);

    let mut lines = Vec::new();
    let mut subtotal = 0.0;
    for item in &line_items {
        let unit_price = pricing.get(&item.description.to_lowercase()).copied().unwrap_or(0.0);
        let line_total = unit_price * item.quantity;
        subtotal += line_total;
        lines.push(json!({
            "description": item.description,
            "quantity": item.quantity,
            "unit_price": unit_price,
            "line_total": line_total,
        }));
    }
    let tax = subtotal * tax_rate;
    let grand_total = subtotal + tax;

    let mut rng = rand::thread_rng();
    let suffix: u16 = rng.gen_range(0..=0xFFFF);
    let quote_number = format!(
        "Q-{}-{:04X}",
        ctx.event["timestamp"]
            .as_str()
            .map(|s| s.replace(['-', ':', 'T'], "").chars().take(8).collect::<String>())
            .unwrap_or_else(|| chrono::Utc::now().format("%Y%m%d").to_string()),
        suffix
    );

    Ok(json!({
        "quote_number": quote_number,
        "lines": lines,
        "subtotal": subtotal,
        "tax": tax,
        "grand_total": grand_total,
    }))
}

/// Merge and persist a lead (§4.H `store_lead`). Same-named fields are
/// resolved `config > extracted > event.lead`, lowest priority first:
/// the call's own `lead` data is the fallback, an earlier `ai_extract`/
/// `ai_extract_quote` step's output overrides it, and fields configured
/// directly on this step override both.
async fn store_lead(config: &Value, ctx: &ActionContext, lead_store: &LeadStore) -> Result<Value, String> {
    let priority = config["priority"].as_str().unwrap_or("normal").to_string();

    let mut fields = serde_json::Map::new();
    if let Some(event_lead) = ctx.event["lead"].as_object() {
        fields.extend(event_lead.clone());
    }
    if let Some(extracted) = latest_extracted_fields(ctx) {
        fields.extend(extracted);
    }
    if let Some(config_fields) = config["fields"].as_object() {
        fields.extend(config_fields.clone());
    }

    let lead = Lead {
        id: Uuid::new_v4(),
        tenant_id: ctx.tenant_id.clone(),
        source_workflow_id: Some(ctx.workflow_id),
        priority,
        fields,
    };

    lead_store.save(&lead).await.map_err(|e| format!("failed to persist lead: {e}"))?;

    serde_json::to_value(&lead).map_err(|e| format!("failed to serialise stored lead: {e}"))
}

/// The `extracted` object from the latest-ordered prior step whose
/// output carries one (an `ai_extract`/`ai_extract_quote` step), if any.
fn latest_extracted_fields(ctx: &ActionContext) -> Option<serde_json::Map<String, Value>> {
    ctx.step_outputs
        .iter()
        .filter_map(|(order, output)| output["extracted"].as_object().map(|fields| (*order, fields.clone())))
        .max_by_key(|(order, _)| *order)
        .map(|(_, fields)| fields)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ctx() -> ActionContext {
        ActionContext {
            run_id: Uuid::new_v4(),
            workflow_id: Uuid::new_v4(),
            workflow_name: "wf".into(),
            tenant_id: "acme".into(),
            event: json!({"transcript": "need 2 shingles", "lead": {"name": "Pat"}}),
            step_outputs: HashMap::new(),
        }
    }

    fn lead_store() -> LeadStore {
        let kv: std::sync::Arc<dyn vrp_kvstore::KvStore> = std::sync::Arc::new(vrp_kvstore::InMemoryStore::new());
        LeadStore::new(kv)
    }

    fn lead_store_with_kv() -> (LeadStore, std::sync::Arc<dyn vrp_kvstore::KvStore>) {
        let kv: std::sync::Arc<dyn vrp_kvstore::KvStore> = std::sync::Arc::new(vrp_kvstore::InMemoryStore::new());
        (LeadStore::new(kv.clone()), kv)
    }

    #[tokio::test]
    async fn send_email_noops_without_recipient() {
        let out = send_email(&json!({}), &ctx()).await.unwrap();
        assert_eq!(out["sent"], false);
    }

    #[tokio::test]
    async fn send_email_renders_template() {
        let out = send_email(&json!({"to": "a@b.com", "subject": "Hi {{tenant}}"}), &ctx())
            .await
            .unwrap();
        assert_eq!(out["subject"], "Hi acme");
    }

    #[test]
    fn strip_code_fences_removes_json_fence() {
        let text = "```json\n{\"a\":1}\n```";
        assert_eq!(strip_code_fences(text), "{\"a\":1}");
    }

    #[test]
    fn strip_code_fences_passes_through_plain_json() {
        assert_eq!(strip_code_fences("{\"a\":1}"), "{\"a\":1}");
    }

    #[test]
    fn build_quote_matches_pricing_and_computes_totals() {
        let config = json!({
            "line_items": [{"description": "Shingle", "quantity": 2.0}],
            "pricing": {"shingle": 10.0},
            "tax_rate": 0.1,
        });
        let out = build_quote(&config, &ctx()).unwrap();
        assert_eq!(out["subtotal"], 20.0);
        assert!((out["tax"].as_f64().unwrap() - 2.0).abs() < 1e-9);
        assert!((out["grand_total"].as_f64().unwrap() - 22.0).abs() < 1e-9);
        assert!(out["quote_number"].as_str().unwrap().starts_with("Q-"));
    }

    #[test]
    fn build_quote_unmatched_item_prices_at_zero() {
        let config = json!({
            "line_items": [{"description": "Unknown Item", "quantity": 1.0}],
            "pricing": {},
        });
        let out = build_quote(&config, &ctx()).unwrap();
        assert_eq!(out["subtotal"], 0.0);
    }

    #[tokio::test]
    async fn store_lead_carries_tenant_and_fields() {
        let out = store_lead(&json!({"priority": "high"}), &ctx(), &lead_store()).await.unwrap();
        assert_eq!(out["tenant_id"], "acme");
        assert_eq!(out["priority"], "high");
        assert_eq!(out["name"], "Pat");
    }

    #[tokio::test]
    async fn store_lead_extracted_overrides_event_lead() {
        let mut c = ctx();
        c.step_outputs.insert(0, json!({"extracted": {"name": "Chris", "phone": "555-0100"}}));
        let out = store_lead(&json!({}), &c, &lead_store()).await.unwrap();
        assert_eq!(out["name"], "Chris");
        assert_eq!(out["phone"], "555-0100");
    }

    #[tokio::test]
    async fn store_lead_config_fields_override_extracted_and_event() {
        let mut c = ctx();
        c.step_outputs.insert(0, json!({"extracted": {"name": "Chris"}}));
        let config = json!({"fields": {"name": "Override"}});
        let out = store_lead(&config, &c, &lead_store()).await.unwrap();
        assert_eq!(out["name"], "Override");
    }

    #[tokio::test]
    async fn store_lead_picks_latest_extract_step_by_order() {
        let mut c = ctx();
        c.step_outputs.insert(0, json!({"extracted": {"name": "First"}}));
        c.step_outputs.insert(1, json!({"extracted": {"name": "Second"}}));
        let out = store_lead(&json!({}), &c, &lead_store()).await.unwrap();
        assert_eq!(out["name"], "Second");
    }

    #[tokio::test]
    async fn store_lead_persists_to_the_store() {
        let (store, kv) = lead_store_with_kv();
        let out = store_lead(&json!({"priority": "high"}), &ctx(), &store).await.unwrap();
        let id: Uuid = serde_json::from_value(out["id"].clone()).unwrap();
        let raw = kv.get(&format!("lead:acme:{id}")).await.unwrap();
        assert!(raw.is_some());
    }
}
