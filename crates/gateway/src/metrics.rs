//! Prometheus metrics for the voice gateway.
//!
//! ## Metrics
//! - `calls_admitted_total` / `calls_rejected_total{reason}` - admission outcomes (§4.B)
//! - `calls_active` - gauge of calls currently in a non-terminal state
//! - `call_duration_seconds` - histogram of completed call durations
//! - `webhook_requests_total{status}` - inbound Telnyx webhook outcomes (§4.C)
//! - `brain_request_duration_seconds` / `brain_requests_total{outcome}` - brain client latency (§4.G)
//! - `stt_request_duration_seconds` / `tts_request_duration_seconds` - audio pipeline latency (§4.F)
//! - `workflow_jobs_total{outcome}` / `workflow_run_duration_seconds` - workflow engine throughput (§4.H)
//! - `media_frames_dropped_total{direction}` - media transport backpressure (§4.E)

use axum::http::StatusCode;
use axum::response::IntoResponse;
use lazy_static::lazy_static;
use prometheus::{
    register_counter_vec, register_gauge, register_histogram_vec, CounterVec, Encoder, Gauge,
    HistogramVec, TextEncoder,
};

lazy_static! {
    pub static ref CALLS_ADMITTED_TOTAL: CounterVec = register_counter_vec!(
        "calls_admitted_total",
        "Total calls admitted by the capacity controller",
        &["tenant_id"]
    )
    .unwrap();

    pub static ref CALLS_REJECTED_TOTAL: CounterVec = register_counter_vec!(
        "calls_rejected_total",
        "Total calls rejected by the capacity controller",
        &["tenant_id", "reason"]
    )
    .unwrap();

    pub static ref CALLS_ACTIVE: Gauge = register_gauge!(
        "calls_active",
        "Current number of calls in a non-terminal state"
    )
    .unwrap();

    pub static ref CALL_DURATION_SECONDS: HistogramVec = register_histogram_vec!(
        "call_duration_seconds",
        "Completed call duration in seconds",
        &["tenant_id", "end_reason"],
        vec![1.0, 5.0, 15.0, 30.0, 60.0, 120.0, 300.0, 600.0, 1800.0]
    )
    .unwrap();

    pub static ref WEBHOOK_REQUESTS_TOTAL: CounterVec = register_counter_vec!(
        "webhook_requests_total",
        "Inbound Telnyx webhook requests by response status",
        &["status"]
    )
    .unwrap();

    pub static ref BRAIN_REQUESTS_TOTAL: CounterVec = register_counter_vec!(
        "brain_requests_total",
        "Brain client requests by outcome",
        &["outcome"]
    )
    .unwrap();

    pub static ref BRAIN_REQUEST_DURATION_SECONDS: HistogramVec = register_histogram_vec!(
        "brain_request_duration_seconds",
        "Brain client request latency in seconds",
        &["streaming"],
        vec![0.05, 0.1, 0.25, 0.5, 1.0, 2.0, 4.0, 8.0, 16.0]
    )
    .unwrap();

    pub static ref STT_REQUEST_DURATION_SECONDS: HistogramVec = register_histogram_vec!(
        "stt_request_duration_seconds",
        "Speech-to-text request latency in seconds",
        &["outcome"],
        vec![0.05, 0.1, 0.25, 0.5, 1.0, 2.0, 4.0]
    )
    .unwrap();

    pub static ref TTS_REQUEST_DURATION_SECONDS: HistogramVec = register_histogram_vec!(
        "tts_request_duration_seconds",
        "Text-to-speech request latency in seconds",
        &["outcome"],
        vec![0.05, 0.1, 0.25, 0.5, 1.0, 2.0, 4.0]
    )
    .unwrap();

    pub static ref WORKFLOW_JOBS_TOTAL: CounterVec = register_counter_vec!(
        "workflow_jobs_total",
        "Workflow jobs processed by outcome",
        &["outcome"]
    )
    .unwrap();

    pub static ref WORKFLOW_RUN_DURATION_SECONDS: HistogramVec = register_histogram_vec!(
        "workflow_run_duration_seconds",
        "Workflow run wall-clock duration in seconds",
        &["workflow_name", "status"],
        vec![0.1, 0.5, 1.0, 2.5, 5.0, 10.0, 30.0]
    )
    .unwrap();

    pub static ref MEDIA_FRAMES_DROPPED_TOTAL: CounterVec = register_counter_vec!(
        "media_frames_dropped_total",
        "Media frames dropped due to backpressure",
        &["direction"]
    )
    .unwrap();
}

pub fn record_admission(tenant_id: &str, rejected_as: Option<&str>) {
    match rejected_as {
        None => CALLS_ADMITTED_TOTAL.with_label_values(&[tenant_id]).inc(),
        Some(reason) => CALLS_REJECTED_TOTAL
            .with_label_values(&[tenant_id, reason])
            .inc(),
    }
}

pub fn record_call_ended(tenant_id: &str, end_reason: &str, duration_secs: f64) {
    CALL_DURATION_SECONDS
        .with_label_values(&[tenant_id, end_reason])
        .observe(duration_secs);
}

pub fn record_webhook_request(status: StatusCode) {
    WEBHOOK_REQUESTS_TOTAL
        .with_label_values(&[status.as_str()])
        .inc();
}

pub fn record_brain_request(streaming: bool, outcome: &str, duration_secs: f64) {
    BRAIN_REQUESTS_TOTAL.with_label_values(&[outcome]).inc();
    BRAIN_REQUEST_DURATION_SECONDS
        .with_label_values(&[if streaming { "true" } else { "false" }])
        .observe(duration_secs);
}

pub fn record_stt_request(outcome: &str, duration_secs: f64) {
    STT_REQUEST_DURATION_SECONDS
        .with_label_values(&[outcome])
        .observe(duration_secs);
}

pub fn record_tts_request(outcome: &str, duration_secs: f64) {
    TTS_REQUEST_DURATION_SECONDS
        .with_label_values(&[outcome])
        .observe(duration_secs);
}

pub fn record_workflow_job(outcome: &str) {
    WORKFLOW_JOBS_TOTAL.with_label_values(&[outcome]).inc();
}

pub fn record_workflow_run(workflow_name: &str, status: &str, duration_secs: f64) {
    WORKFLOW_RUN_DURATION_SECONDS
        .with_label_values(&[workflow_name, status])
        .observe(duration_secs);
}

pub fn record_media_frame_dropped(direction: &str) {
    MEDIA_FRAMES_DROPPED_TOTAL
        .with_label_values(&[direction])
        .inc();
}

/// Handler for `GET /metrics`.
pub async fn metrics_handler() -> impl IntoResponse {
    let encoder = TextEncoder::new();
    let metric_families = prometheus::gather();
    let mut buffer = vec![];
    match encoder.encode(&metric_families, &mut buffer) {
        Ok(_) => (StatusCode::OK, [("content-type", encoder.format_type())], buffer).into_response(),
        Err(e) => (
            StatusCode::INTERNAL_SERVER_ERROR,
            format!("failed to encode metrics: {e}"),
        )
            .into_response(),
    }
}
