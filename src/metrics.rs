//! Prometheus metrics and the metrics-only HTTP surface. The HTTP API and
//! chat front-end live elsewhere; this endpoint is observability only.

#![allow(dead_code)]

use axum::{http::StatusCode, response::IntoResponse, routing::get, Router};
use lazy_static::lazy_static;
use prometheus::{
    Counter, CounterVec, Encoder, Gauge, GaugeVec, Histogram, HistogramOpts, HistogramVec, Opts,
    Registry, TextEncoder,
};
use std::time::Duration;

const PREFIX: &str = "mediahoard";

lazy_static! {
    pub static ref REGISTRY: Registry = Registry::new();

    // Catalog Store
    pub static ref CATALOG_TITLES_TOTAL: GaugeVec = GaugeVec::new(
        Opts::new(format!("{PREFIX}_catalog_titles_total"), "Titles tracked in the catalog store"),
        &["kind"]
    ).expect("failed to create catalog_titles_total metric");

    // Background Job Runtime
    pub static ref BACKGROUND_JOB_EXECUTIONS_TOTAL: CounterVec = CounterVec::new(
        Opts::new(format!("{PREFIX}_background_job_executions_total"), "Total background job executions"),
        &["job_id", "status"]
    ).expect("failed to create background_job_executions_total metric");

    pub static ref BACKGROUND_JOB_DURATION_SECONDS: HistogramVec = HistogramVec::new(
        HistogramOpts::new(
            format!("{PREFIX}_background_job_duration_seconds"),
            "Background job execution duration in seconds"
        )
        .buckets(vec![0.1, 0.5, 1.0, 5.0, 10.0, 30.0, 60.0, 300.0, 600.0]),
        &["job_id"]
    ).expect("failed to create background_job_duration_seconds metric");

    pub static ref BACKGROUND_JOB_RUNNING: GaugeVec = GaugeVec::new(
        Opts::new(format!("{PREFIX}_background_job_running"), "Whether a background job is currently running"),
        &["job_id"]
    ).expect("failed to create background_job_running metric");

    // Reconciliation Service
    pub static ref RECONCILE_TICK_DURATION_SECONDS: Histogram = Histogram::with_opts(
        HistogramOpts::new(
            format!("{PREFIX}_reconcile_tick_duration_seconds"),
            "Duration of a full reconciliation tick"
        )
        .buckets(vec![0.1, 0.5, 1.0, 5.0, 10.0, 30.0, 60.0, 300.0])
    ).expect("failed to create reconcile_tick_duration_seconds metric");

    pub static ref RECONCILE_JOBS_SUBMITTED_TOTAL: Counter = Counter::new(
        format!("{PREFIX}_reconcile_jobs_submitted_total"),
        "Download jobs submitted by the reconciliation service"
    ).expect("failed to create reconcile_jobs_submitted_total metric");

    // Download Scheduler
    pub static ref SCHEDULER_JOBS_PENDING: Gauge = Gauge::new(
        format!("{PREFIX}_scheduler_jobs_pending"),
        "Download jobs waiting in the scheduler queue"
    ).expect("failed to create scheduler_jobs_pending metric");

    pub static ref SCHEDULER_JOBS_RUNNING: Gauge = Gauge::new(
        format!("{PREFIX}_scheduler_jobs_running"),
        "Download jobs currently running"
    ).expect("failed to create scheduler_jobs_running metric");

    pub static ref SCHEDULER_JOBS_TOTAL: CounterVec = CounterVec::new(
        Opts::new(format!("{PREFIX}_scheduler_jobs_total"), "Download jobs that reached a terminal state"),
        &["result"]
    ).expect("failed to create scheduler_jobs_total metric");

    // HLS Fetcher
    pub static ref HLS_FETCH_DURATION_SECONDS: HistogramVec = HistogramVec::new(
        HistogramOpts::new(
            format!("{PREFIX}_hls_fetch_duration_seconds"),
            "Duration of a single HLS fetch, by backend"
        )
        .buckets(vec![1.0, 5.0, 10.0, 30.0, 60.0, 120.0, 300.0, 600.0, 1800.0]),
        &["backend"]
    ).expect("failed to create hls_fetch_duration_seconds metric");

    pub static ref HLS_FETCH_ERRORS_TOTAL: CounterVec = CounterVec::new(
        Opts::new(format!("{PREFIX}_hls_fetch_errors_total"), "HLS fetch failures by backend"),
        &["backend"]
    ).expect("failed to create hls_fetch_errors_total metric");

    // Process Metrics
    pub static ref PROCESS_MEMORY_BYTES: Gauge = Gauge::new(
        format!("{PREFIX}_process_memory_bytes"),
        "Process memory usage in bytes"
    ).expect("failed to create process_memory_bytes metric");
}

/// Register all metrics with the Prometheus registry. Errors are ignored so
/// repeated calls (e.g. from tests) stay idempotent.
pub fn init_metrics() {
    let _ = REGISTRY.register(Box::new(CATALOG_TITLES_TOTAL.clone()));
    let _ = REGISTRY.register(Box::new(BACKGROUND_JOB_EXECUTIONS_TOTAL.clone()));
    let _ = REGISTRY.register(Box::new(BACKGROUND_JOB_DURATION_SECONDS.clone()));
    let _ = REGISTRY.register(Box::new(BACKGROUND_JOB_RUNNING.clone()));
    let _ = REGISTRY.register(Box::new(RECONCILE_TICK_DURATION_SECONDS.clone()));
    let _ = REGISTRY.register(Box::new(RECONCILE_JOBS_SUBMITTED_TOTAL.clone()));
    let _ = REGISTRY.register(Box::new(SCHEDULER_JOBS_PENDING.clone()));
    let _ = REGISTRY.register(Box::new(SCHEDULER_JOBS_RUNNING.clone()));
    let _ = REGISTRY.register(Box::new(SCHEDULER_JOBS_TOTAL.clone()));
    let _ = REGISTRY.register(Box::new(HLS_FETCH_DURATION_SECONDS.clone()));
    let _ = REGISTRY.register(Box::new(HLS_FETCH_ERRORS_TOTAL.clone()));
    let _ = REGISTRY.register(Box::new(PROCESS_MEMORY_BYTES.clone()));

    tracing::info!("metrics registry initialized");
}

pub fn set_catalog_titles(kind: &str, count: usize) {
    CATALOG_TITLES_TOTAL.with_label_values(&[kind]).set(count as f64);
}

pub fn record_background_job_execution(job_id: &str, status: &str, duration: Duration) {
    BACKGROUND_JOB_EXECUTIONS_TOTAL
        .with_label_values(&[job_id, status])
        .inc();
    BACKGROUND_JOB_DURATION_SECONDS
        .with_label_values(&[job_id])
        .observe(duration.as_secs_f64());
}

pub fn set_background_job_running(job_id: &str, running: bool) {
    BACKGROUND_JOB_RUNNING
        .with_label_values(&[job_id])
        .set(if running { 1.0 } else { 0.0 });
}

pub fn record_reconcile_tick(duration: Duration, jobs_submitted: u64) {
    RECONCILE_TICK_DURATION_SECONDS.observe(duration.as_secs_f64());
    RECONCILE_JOBS_SUBMITTED_TOTAL.inc_by(jobs_submitted as f64);
}

pub fn set_scheduler_queue_depth(pending: usize, running: usize) {
    SCHEDULER_JOBS_PENDING.set(pending as f64);
    SCHEDULER_JOBS_RUNNING.set(running as f64);
}

pub fn record_scheduler_job_terminal(result: &str) {
    SCHEDULER_JOBS_TOTAL.with_label_values(&[result]).inc();
}

pub fn record_hls_fetch(backend: &str, duration: Duration, succeeded: bool) {
    HLS_FETCH_DURATION_SECONDS
        .with_label_values(&[backend])
        .observe(duration.as_secs_f64());
    if !succeeded {
        HLS_FETCH_ERRORS_TOTAL.with_label_values(&[backend]).inc();
    }
}

fn update_memory_usage() {
    #[cfg(target_os = "linux")]
    {
        if let Ok(status) = std::fs::read_to_string("/proc/self/status") {
            for line in status.lines() {
                if line.starts_with("VmRSS:") {
                    if let Some(kb_str) = line.split_whitespace().nth(1) {
                        if let Ok(kb) = kb_str.parse::<f64>() {
                            PROCESS_MEMORY_BYTES.set(kb * 1024.0);
                        }
                    }
                    return;
                }
            }
        }
    }
}

async fn metrics_handler() -> impl IntoResponse {
    update_memory_usage();

    let encoder = TextEncoder::new();
    let metric_families = REGISTRY.gather();

    let mut buffer = vec![];
    match encoder.encode(&metric_families, &mut buffer) {
        Ok(()) => {
            let body = String::from_utf8(buffer).unwrap_or_default();
            (StatusCode::OK, body)
        }
        Err(e) => {
            tracing::error!("failed to encode metrics: {}", e);
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                format!("failed to encode metrics: {}", e),
            )
        }
    }
}

/// The entire HTTP surface this crate exposes: a single `/metrics` endpoint.
pub fn metrics_router() -> Router {
    Router::new().route("/metrics", get(metrics_handler))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn set_catalog_titles_is_idempotent() {
        init_metrics();
        set_catalog_titles("anime", 3);
        set_catalog_titles("anime", 5);
        assert_eq!(CATALOG_TITLES_TOTAL.with_label_values(&["anime"]).get(), 5.0);
    }

    #[test]
    fn record_scheduler_job_terminal_increments_counter() {
        init_metrics();
        let before = SCHEDULER_JOBS_TOTAL.with_label_values(&["completed"]).get();
        record_scheduler_job_terminal("completed");
        assert_eq!(
            SCHEDULER_JOBS_TOTAL.with_label_values(&["completed"]).get(),
            before + 1.0
        );
    }
}
