//! Workflow entity data model (§3 Workflow Entities).

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TriggerType {
    CallEnded,
    AfterHoursCall,
    KeywordDetected,
    MissedCall,
    Scheduled,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Workflow {
    pub id: Uuid,
    pub tenant_id: String,
    pub name: String,
    pub enabled: bool,
    pub trigger_type: TriggerType,
    /// Keywords, cron, business hours, timezone, thresholds — shape
    /// depends on `trigger_type`.
    pub trigger_config: serde_json::Value,
    pub steps: Vec<Step>,
    #[serde(default)]
    pub admin_locked: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Step {
    pub order: u32,
    pub action: StepAction,
    pub config: serde_json::Value,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepAction {
    SendEmail,
    SendSms,
    FireWebhook,
    AiSummarize,
    AiExtract,
    AiExtractQuote,
    BuildQuote,
    StoreLead,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    Pending,
    Running,
    Completed,
    Failed,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StepResult {
    pub order: u32,
    pub action: StepAction,
    pub output: serde_json::Value,
    #[serde(default)]
    pub error: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkflowRun {
    pub id: Uuid,
    pub workflow_id: Uuid,
    pub tenant_id: String,
    pub trigger_event: serde_json::Value,
    pub status: RunStatus,
    pub steps_completed: u32,
    pub steps_total: u32,
    #[serde(default)]
    pub result: Vec<StepResult>,
    #[serde(default)]
    pub error: Option<String>,
    pub started_at: DateTime<Utc>,
    #[serde(default)]
    pub completed_at: Option<DateTime<Utc>>,
}

impl WorkflowRun {
    pub fn new(workflow: &Workflow, trigger_event: serde_json::Value) -> Self {
        Self {
            id: Uuid::new_v4(),
            workflow_id: workflow.id,
            tenant_id: workflow.tenant_id.clone(),
            trigger_event,
            status: RunStatus::Pending,
            steps_completed: 0,
            steps_total: workflow.steps.len() as u32,
            result: Vec::new(),
            error: None,
            started_at: Utc::now(),
            completed_at: None,
        }
    }

    /// Record a step outcome, advancing `steps_completed`. The run remains
    /// `Running` until `finish` is called; on the first error the run's
    /// overall status is marked `Failed`.
    pub fn record_step(&mut self, result: StepResult) {
        if result.error.is_some() {
            self.status = RunStatus::Failed;
            self.error = result.error.clone();
        }
        self.steps_completed += 1;
        self.result.push(result);
    }

    pub fn finish(&mut self) {
        if self.status != RunStatus::Failed {
            self.status = RunStatus::Completed;
        }
        self.completed_at = Some(Utc::now());
    }
}

/// A job on the durable FIFO queue (§4.H Job queue).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Job {
    pub id: Uuid,
    pub workflow_id: Uuid,
    pub tenant_id: String,
    pub event: serde_json::Value,
    #[serde(default)]
    pub retries: u32,
    pub enqueued_at: DateTime<Utc>,
    #[serde(default)]
    pub not_before: Option<DateTime<Utc>>,
}

pub const MAX_RETRIES: u32 = 3;

/// Exponential backoff for job retries: `2^retries` seconds.
pub fn retry_backoff_seconds(retries: u32) -> i64 {
    1i64.checked_shl(retries).unwrap_or(i64::MAX)
}

/// A contact record extracted by the workflow engine.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Lead {
    pub id: Uuid,
    pub tenant_id: String,
    #[serde(default)]
    pub source_workflow_id: Option<Uuid>,
    #[serde(default = "default_priority")]
    pub priority: String,
    #[serde(flatten)]
    pub fields: serde_json::Map<String, serde_json::Value>,
}

fn default_priority() -> String {
    "normal".into()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backoff_doubles_each_retry() {
        assert_eq!(retry_backoff_seconds(0), 1);
        assert_eq!(retry_backoff_seconds(1), 2);
        assert_eq!(retry_backoff_seconds(2), 4);
        assert_eq!(retry_backoff_seconds(3), 8);
    }

    #[test]
    fn run_marks_failed_on_first_error() {
        let wf = Workflow {
            id: Uuid::new_v4(),
            tenant_id: "t1".into(),
            name: "w".into(),
            enabled: true,
            trigger_type: TriggerType::CallEnded,
            trigger_config: serde_json::json!({}),
            steps: vec![
                Step {
                    order: 0,
                    action: StepAction::SendEmail,
                    config: serde_json::json!({}),
                },
                Step {
                    order: 1,
                    action: StepAction::StoreLead,
                    config: serde_json::json!({}),
                },
            ],
            admin_locked: false,
        };
        let mut run = WorkflowRun::new(&wf, serde_json::json!({}));
        run.record_step(StepResult {
            order: 0,
            action: StepAction::SendEmail,
            output: serde_json::json!({}),
            error: Some("smtp down".into()),
        });
        assert_eq!(run.status, RunStatus::Failed);
        assert_eq!(run.steps_completed, 1);
        run.finish();
        assert_eq!(run.status, RunStatus::Failed);
    }
}
