//! Workflow Engine background loops (§4.H): the job-queue consumer and
//! the cron scheduler tick.

use std::time::Duration;

use chrono::Utc;
use vrp_workflow::engine;
use vrp_workflow::queue::LastFiredGuard;

use crate::metrics;
use crate::state::AppState;

const JOB_POLL_INTERVAL: Duration = Duration::from_millis(500);
const JOB_MAX_SCAN: usize = 50;
const SCHEDULER_TICK_INTERVAL: Duration = Duration::from_secs(30);

/// Drains `pop_ready` jobs, runs their steps, and retries or drops on
/// failure. Runs until the process shuts down.
pub async fn run_job_consumer(state: AppState) {
    let mut interval = tokio::time::interval(JOB_POLL_INTERVAL);
    loop {
        interval.tick().await;
        if state.is_shutting_down() {
            continue;
        }

        let Some(job) = state.job_queue.pop_ready(JOB_MAX_SCAN).await else {
            continue;
        };

        let workflows = match state.workflow_store.load(&job.tenant_id).await {
            Ok(w) => w,
            Err(e) => {
                tracing::warn!(error = %e, tenant_id = %job.tenant_id, "failed to load workflows for job");
                state.job_queue.retry(job).await;
                continue;
            }
        };

        let Some(workflow) = workflows.iter().find(|w| w.id == job.workflow_id) else {
            tracing::warn!(job_id = %job.id, workflow_id = %job.workflow_id, "workflow not found, dropping job");
            metrics::record_workflow_job("dropped_missing_workflow");
            continue;
        };

        let start = std::time::Instant::now();
        let run = engine::run_steps(workflow, job.event.clone(), &state.http, &state.lead_store).await;
        let elapsed = start.elapsed().as_secs_f64();
        let status = format!("{:?}", run.status).to_lowercase();
        metrics::record_workflow_run(&workflow.name, &status, elapsed);

        if run.error.is_some() {
            metrics::record_workflow_job("failed");
            state.job_queue.retry(job).await;
        } else {
            metrics::record_workflow_job("completed");
        }
    }
}

/// Every `SCHEDULER_TICK_INTERVAL`, sweeps scheduled workflows for every
/// tenant this process has observed traffic for and enqueues any whose
/// cron expression matches the current minute.
pub async fn run_scheduler_tick(state: AppState) {
    let mut interval = tokio::time::interval(SCHEDULER_TICK_INTERVAL);
    let mut guard = LastFiredGuard::new();
    loop {
        interval.tick().await;
        if state.is_shutting_down() {
            continue;
        }

        let now = Utc::now();
        let mut all_workflows = Vec::new();
        for tenant_id in state.known_tenant_ids() {
            match state.workflow_store.load(&tenant_id).await {
                Ok(workflows) => all_workflows.extend(workflows.iter().cloned()),
                Err(e) => tracing::warn!(error = %e, %tenant_id, "failed to load workflows for scheduler tick"),
            }
        }

        let jobs = engine::jobs_for_scheduler_tick(&all_workflows, now, &mut guard);
        for job in jobs {
            state.job_queue.push(job).await;
        }
    }
}
