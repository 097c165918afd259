//! Trigger matching and step pipeline execution (§4.H).

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde_json::Value;
use uuid::Uuid;
use vrp_domain::call::CallEndedEvent;
use vrp_domain::workflow::{Job, RunStatus, Step, StepResult, TriggerType, Workflow, WorkflowRun};

use crate::actions::{self, ActionContext};
use crate::cron::cron_matches_tz;
use crate::store::LeadStore;

/// Turn a completed call into zero or more `(trigger_type, event_json)`
/// candidates for matching against enabled workflows.
pub fn derive_triggers(event: &CallEndedEvent) -> Vec<(TriggerType, Value)> {
    let event_json = serde_json::to_value(event).unwrap_or(Value::Null);
    let mut triggers = vec![(TriggerType::CallEnded, event_json.clone())];
    triggers.push((TriggerType::AfterHoursCall, event_json.clone()));
    if !event.transcript.trim().is_empty() {
        triggers.push((TriggerType::KeywordDetected, event_json.clone()));
    }
    if event.turns <= 1 || event.duration_ms < 15_000 {
        triggers.push((TriggerType::MissedCall, event_json));
    }
    triggers
}

/// Does `workflow` match `trigger_type` with this event, given its
/// `trigger_config`? `now` is needed for `after_hours_call`, evaluated
/// against the timezone named in `workflow.trigger_config["timezone"]`
/// (falling back to UTC), the same field the scheduler path reads.
pub fn workflow_matches(
    workflow: &Workflow,
    trigger_type: TriggerType,
    event_json: &Value,
    now: DateTime<Utc>,
) -> bool {
    if !workflow.enabled || workflow.trigger_type != trigger_type {
        return false;
    }
    match trigger_type {
        TriggerType::CallEnded | TriggerType::Scheduled => true,
        TriggerType::AfterHoursCall => {
            let tz = crate::cron::parse_tz(workflow.trigger_config["timezone"].as_str().unwrap_or("UTC"));
            let local = now.with_timezone(&tz);
            let start = workflow.trigger_config["start"].as_str().unwrap_or("00:00");
            let end = workflow.trigger_config["end"].as_str().unwrap_or("23:59");
            let minute_of_day = local.format("%H:%M").to_string();
            !(start..=end).contains(&minute_of_day.as_str())
        }
        TriggerType::KeywordDetected => {
            let transcript = event_json["transcript"].as_str().unwrap_or("").to_lowercase();
            workflow.trigger_config["keywords"]
                .as_array()
                .map(|kws| {
                    kws.iter()
                        .filter_map(|k| k.as_str())
                        .any(|kw| transcript.contains(&kw.to_lowercase()))
                })
                .unwrap_or(false)
        }
        TriggerType::MissedCall => {
            let max_duration_ms = workflow.trigger_config["maxDurationSeconds"]
                .as_i64()
                .map(|s| s * 1000)
                .unwrap_or(15_000);
            let min_turns = workflow.trigger_config["minTurns"].as_i64().unwrap_or(2);
            let duration_ms = event_json["duration_ms"].as_i64().unwrap_or(0);
            let turns = event_json["turns"].as_i64().unwrap_or(0);
            duration_ms < max_duration_ms || turns < min_turns
        }
    }
}

/// Substitute `{{caller}}`, `{{tenant}}`, `{{workflow}}`, `{{timestamp}}`,
/// `{{transcript}}`, `{{step.<order>.<field>}}`, `{{extracted.<field>}}`.
pub fn interpolate(
    template: &str,
    workflow_name: &str,
    event_json: &Value,
    step_outputs: &HashMap<u32, Value>,
) -> String {
    let mut out = String::with_capacity(template.len());
    let mut rest = template;

    while let Some(start) = rest.find("{{") {
        out.push_str(&rest[..start]);
        let Some(end) = rest[start..].find("}}") else {
            out.push_str(&rest[start..]);
            rest = "";
            break;
        };
        let token = rest[start + 2..start + end].trim();
        out.push_str(&resolve_token(token, workflow_name, event_json, step_outputs));
        rest = &rest[start + end + 2..];
    }
    out.push_str(rest);
    out
}

fn resolve_token(
    token: &str,
    workflow_name: &str,
    event_json: &Value,
    step_outputs: &HashMap<u32, Value>,
) -> String {
    match token {
        "caller" => event_json["caller_id"].as_str().unwrap_or_default().to_string(),
        "tenant" => event_json["tenant_id"].as_str().unwrap_or_default().to_string(),
        "workflow" => workflow_name.to_string(),
        "timestamp" => Utc::now().to_rfc3339(),
        "transcript" => event_json["transcript"].as_str().unwrap_or_default().to_string(),
        other => {
            if let Some(rest) = other.strip_prefix("step.") {
                let (order_str, field) = rest.split_once('.').unwrap_or((rest, ""));
                if let Ok(order) = order_str.parse::<u32>() {
                    if let Some(output) = step_outputs.get(&order) {
                        return json_field_as_string(output, field);
                    }
                }
            } else if let Some(field) = other.strip_prefix("extracted.") {
                return json_field_as_string(&event_json["lead"], field);
            }
            String::new()
        }
    }
}

fn json_field_as_string(value: &Value, field: &str) -> String {
    if field.is_empty() {
        return value.to_string();
    }
    match &value[field] {
        Value::String(s) => s.clone(),
        Value::Null => String::new(),
        other => other.to_string(),
    }
}

/// Run one workflow's step pipeline to completion, in `order`.
pub async fn run_steps(
    workflow: &Workflow,
    trigger_event: Value,
    http: &reqwest::Client,
    lead_store: &LeadStore,
) -> WorkflowRun {
    let mut run = WorkflowRun::new(workflow, trigger_event.clone());
    let mut sorted: Vec<&Step> = workflow.steps.iter().collect();
    sorted.sort_by_key(|s| s.order);

    let mut step_outputs: HashMap<u32, Value> = HashMap::new();
    let mut failed = false;

    for step in sorted {
        if failed {
            break;
        }
        let ctx = ActionContext {
            run_id: run.id,
            workflow_id: workflow.id,
            workflow_name: workflow.name.clone(),
            tenant_id: workflow.tenant_id.clone(),
            event: trigger_event.clone(),
            step_outputs: step_outputs.clone(),
        };
        let outcome = actions::execute_step(step.action, &step.config, &ctx, http, lead_store).await;
        let result = match outcome {
            Ok(output) => {
                step_outputs.insert(step.order, output.clone());
                StepResult {
                    order: step.order,
                    action: step.action,
                    output,
                    error: None,
                }
            }
            Err(message) => {
                failed = true;
                StepResult {
                    order: step.order,
                    action: step.action,
                    output: Value::Null,
                    error: Some(message),
                }
            }
        };
        run.record_step(result);
    }
    run.finish();
    run
}

/// Enqueue a job for every enabled workflow matching a derived trigger.
pub fn jobs_for_call_ended(
    event: &CallEndedEvent,
    workflows: &[Workflow],
    now: DateTime<Utc>,
) -> Vec<Job> {
    let mut jobs = Vec::new();
    for (trigger_type, event_json) in derive_triggers(event) {
        for workflow in workflows {
            if workflow.tenant_id != event.tenant_id {
                continue;
            }
            if workflow_matches(workflow, trigger_type, &event_json, now) {
                jobs.push(Job {
                    id: Uuid::new_v4(),
                    workflow_id: workflow.id,
                    tenant_id: workflow.tenant_id.clone(),
                    event: event_json.clone(),
                    retries: 0,
                    enqueued_at: now,
                    not_before: None,
                });
            }
        }
    }
    jobs
}

/// Scheduler tick (§4.H): fire any `scheduled` workflow whose cron
/// expression matches the current minute, guarded against double-firing.
pub fn jobs_for_scheduler_tick(
    workflows: &[Workflow],
    now: DateTime<Utc>,
    guard: &mut crate::queue::LastFiredGuard,
) -> Vec<Job> {
    let mut jobs = Vec::new();
    for workflow in workflows {
        if !workflow.enabled || workflow.trigger_type != TriggerType::Scheduled {
            continue;
        }
        let cron = workflow.trigger_config["cron"].as_str().unwrap_or("");
        let tz = crate::cron::parse_tz(workflow.trigger_config["timezone"].as_str().unwrap_or("UTC"));
        if cron_matches_tz(cron, &now, tz) && guard.should_fire(workflow.id, now) {
            jobs.push(Job {
                id: Uuid::new_v4(),
                workflow_id: workflow.id,
                tenant_id: workflow.tenant_id.clone(),
                event: serde_json::json!({ "scheduled_at": now }),
                retries: 0,
                enqueued_at: now,
                not_before: None,
            });
        }
    }
    jobs
}

#[cfg(test)]
mod tests {
    use super::*;
    use vrp_domain::call::ExtractedLead;

    fn event() -> CallEndedEvent {
        CallEndedEvent {
            tenant_id: "acme".into(),
            call_id: "cc1".into(),
            caller_id: "+15551234567".into(),
            duration_ms: 20_000,
            turns: 4,
            transcript: "I need a quote for roofing".into(),
            lead: ExtractedLead::default(),
        }
    }

    #[test]
    fn derive_triggers_includes_call_ended_and_after_hours_always() {
        let triggers = derive_triggers(&event());
        let types: Vec<_> = triggers.iter().map(|(t, _)| *t).collect();
        assert!(types.contains(&TriggerType::CallEnded));
        assert!(types.contains(&TriggerType::AfterHoursCall));
    }

    #[test]
    fn derive_triggers_missed_call_on_short_duration() {
        let mut e = event();
        e.duration_ms = 5_000;
        let triggers = derive_triggers(&e);
        assert!(triggers.iter().any(|(t, _)| *t == TriggerType::MissedCall));
    }

    #[test]
    fn interpolate_substitutes_known_tokens() {
        let event_json = serde_json::json!({
            "caller_id": "+15551234567",
            "tenant_id": "acme",
            "transcript": "hello there",
        });
        let rendered = interpolate(
            "Call from {{caller}} for {{tenant}}: {{transcript}}",
            "wf",
            &event_json,
            &HashMap::new(),
        );
        assert_eq!(rendered, "Call from +15551234567 for acme: hello there");
    }

    #[test]
    fn interpolate_reads_step_output_field() {
        let mut outputs = HashMap::new();
        outputs.insert(0, serde_json::json!({"summary": "roof leak"}));
        let rendered = interpolate("Summary: {{step.0.summary}}", "wf", &Value::Null, &outputs);
        assert_eq!(rendered, "Summary: roof leak");
    }

    #[test]
    fn interpolate_leaves_unknown_tokens_blank() {
        let rendered = interpolate("{{nonsense}}", "wf", &Value::Null, &HashMap::new());
        assert_eq!(rendered, "");
    }

    #[test]
    fn keyword_trigger_is_case_insensitive_substring() {
        let workflow = Workflow {
            id: Uuid::new_v4(),
            tenant_id: "acme".into(),
            name: "w".into(),
            enabled: true,
            trigger_type: TriggerType::KeywordDetected,
            trigger_config: serde_json::json!({"keywords": ["ROOFING"]}),
            steps: vec![],
            admin_locked: false,
        };
        let event_json = serde_json::json!({"transcript": "need a roofing quote"});
        assert!(workflow_matches(
            &workflow,
            TriggerType::KeywordDetected,
            &event_json,
            Utc::now(),
        ));
    }
}
