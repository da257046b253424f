//! Prometheus metrics registry and instruments.
//!
//! This module is framework-agnostic and can be used from any layer.

use std::time::Duration;

use lazy_static::lazy_static;
use prometheus::{
    Encoder, HistogramOpts, HistogramVec, IntCounterVec, IntGaugeVec, Opts, Registry, TextEncoder,
};

lazy_static! {
    /// Global Prometheus registry
    pub static ref REGISTRY: Registry = Registry::new();

    // Provider Metrics
    pub static ref PROVIDER_REQUESTS_TOTAL: IntCounterVec = IntCounterVec::new(
        Opts::new("vakit_provider_requests_total", "Total number of provider requests"),
        &["endpoint", "status"]
    ).expect("metric can be created");
    pub static ref PROVIDER_REQUEST_DURATION_SECONDS: HistogramVec = HistogramVec::new(
        HistogramOpts::new(
            "vakit_provider_request_duration_seconds",
            "Provider request duration in seconds"
        ).buckets(vec![0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0, 30.0]),
        &["endpoint"]
    ).expect("metric can be created");

    // Store Metrics
    pub static ref DB_BATCHES_TOTAL: IntCounterVec = IntCounterVec::new(
        Opts::new("vakit_db_batches_total", "Total number of store batches"),
        &["entity", "operation", "status"]
    ).expect("metric can be created");
    pub static ref DB_BATCH_DURATION_SECONDS: HistogramVec = HistogramVec::new(
        HistogramOpts::new(
            "vakit_db_batch_duration_seconds",
            "Store batch duration in seconds"
        ).buckets(vec![0.0005, 0.001, 0.005, 0.01, 0.05, 0.1, 0.5, 1.0, 5.0]),
        &["entity", "operation"]
    ).expect("metric can be created");

    // Sync Metrics
    pub static ref SYNC_ROWS_TOTAL: IntCounterVec = IntCounterVec::new(
        Opts::new("vakit_sync_rows_total", "Total number of rows applied by reconciliation"),
        &["entity", "operation"]
    ).expect("metric can be created");
    pub static ref SYNC_CYCLES_TOTAL: IntCounterVec = IntCounterVec::new(
        Opts::new("vakit_sync_cycles_total", "Total number of reconciliation cycles"),
        &["status"]
    ).expect("metric can be created");

    // Job Metrics
    pub static ref JOB_RUNS_TOTAL: IntCounterVec = IntCounterVec::new(
        Opts::new("vakit_job_runs_total", "Total number of background job runs"),
        &["job", "outcome"]
    ).expect("metric can be created");
    pub static ref JOB_TICKS_SKIPPED_TOTAL: IntCounterVec = IntCounterVec::new(
        Opts::new("vakit_job_ticks_skipped_total", "Timer ticks dropped because the job was still running"),
        &["job"]
    ).expect("metric can be created");
    pub static ref SWEPT_ROWS_TOTAL: IntCounterVec = IntCounterVec::new(
        Opts::new("vakit_swept_rows_total", "Total number of rows removed by the sweep job"),
        &["entity"]
    ).expect("metric can be created");

    // Cache Metrics
    pub static ref CACHE_HITS_TOTAL: IntCounterVec = IntCounterVec::new(
        Opts::new("vakit_cache_hits_total", "Total number of cache hits"),
        &["cache_name"]
    ).expect("metric can be created");
    pub static ref CACHE_MISSES_TOTAL: IntCounterVec = IntCounterVec::new(
        Opts::new("vakit_cache_misses_total", "Total number of cache misses"),
        &["cache_name"]
    ).expect("metric can be created");
    pub static ref CACHE_SIZE: IntGaugeVec = IntGaugeVec::new(
        Opts::new("vakit_cache_size", "Current number of entries in cache"),
        &["cache_name"]
    ).expect("metric can be created");

    // Error Metrics
    pub static ref ERRORS_TOTAL: IntCounterVec = IntCounterVec::new(
        Opts::new("vakit_errors_total", "Total number of errors"),
        &["kind"]
    ).expect("metric can be created");
}

/// Initialize metrics registry.
pub fn init_metrics() {
    REGISTRY
        .register(Box::new(PROVIDER_REQUESTS_TOTAL.clone()))
        .expect("PROVIDER_REQUESTS_TOTAL can be registered");
    REGISTRY
        .register(Box::new(PROVIDER_REQUEST_DURATION_SECONDS.clone()))
        .expect("PROVIDER_REQUEST_DURATION_SECONDS can be registered");
    REGISTRY
        .register(Box::new(DB_BATCHES_TOTAL.clone()))
        .expect("DB_BATCHES_TOTAL can be registered");
    REGISTRY
        .register(Box::new(DB_BATCH_DURATION_SECONDS.clone()))
        .expect("DB_BATCH_DURATION_SECONDS can be registered");
    REGISTRY
        .register(Box::new(SYNC_ROWS_TOTAL.clone()))
        .expect("SYNC_ROWS_TOTAL can be registered");
    REGISTRY
        .register(Box::new(SYNC_CYCLES_TOTAL.clone()))
        .expect("SYNC_CYCLES_TOTAL can be registered");
    REGISTRY
        .register(Box::new(JOB_RUNS_TOTAL.clone()))
        .expect("JOB_RUNS_TOTAL can be registered");
    REGISTRY
        .register(Box::new(JOB_TICKS_SKIPPED_TOTAL.clone()))
        .expect("JOB_TICKS_SKIPPED_TOTAL can be registered");
    REGISTRY
        .register(Box::new(SWEPT_ROWS_TOTAL.clone()))
        .expect("SWEPT_ROWS_TOTAL can be registered");
    REGISTRY
        .register(Box::new(CACHE_HITS_TOTAL.clone()))
        .expect("CACHE_HITS_TOTAL can be registered");
    REGISTRY
        .register(Box::new(CACHE_MISSES_TOTAL.clone()))
        .expect("CACHE_MISSES_TOTAL can be registered");
    REGISTRY
        .register(Box::new(CACHE_SIZE.clone()))
        .expect("CACHE_SIZE can be registered");
    REGISTRY
        .register(Box::new(ERRORS_TOTAL.clone()))
        .expect("ERRORS_TOTAL can be registered");

    tracing::info!("Metrics registry initialized");
}

/// Record one provider round trip.
pub fn observe_provider_request(endpoint: &str, status: &str, elapsed: Duration) {
    PROVIDER_REQUESTS_TOTAL
        .with_label_values(&[endpoint, status])
        .inc();
    PROVIDER_REQUEST_DURATION_SECONDS
        .with_label_values(&[endpoint])
        .observe(elapsed.as_secs_f64());
}

/// Record one store batch.
pub fn observe_db_batch(entity: &str, operation: &str, status: &str, elapsed: Duration) {
    DB_BATCHES_TOTAL
        .with_label_values(&[entity, operation, status])
        .inc();
    DB_BATCH_DURATION_SECONDS
        .with_label_values(&[entity, operation])
        .observe(elapsed.as_secs_f64());
}

/// Render all registered metrics in the Prometheus text format.
pub fn gather() -> String {
    let encoder = TextEncoder::new();
    let metric_families = REGISTRY.gather();
    let mut buffer = Vec::new();
    if let Err(error) = encoder.encode(&metric_families, &mut buffer) {
        tracing::error!(%error, "Failed to encode metrics");
        return String::new();
    }
    String::from_utf8(buffer).unwrap_or_default()
}
