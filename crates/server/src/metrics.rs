//! Prometheus metrics for observability.
//!
//! This module provides metrics for monitoring the mediarelay server:
//! - HTTP request metrics (latency, counts)
//! - Items per pipeline stage and running workers (collected dynamically)
//! - Core worker metrics, registered from `mediarelay_core::metrics`

use once_cell::sync::Lazy;
use prometheus::{
    self, Encoder, HistogramOpts, HistogramVec, IntCounterVec, IntGauge, IntGaugeVec, Opts,
    Registry, TextEncoder,
};

use mediarelay_core::{worker::WorkerRole, Stage};

/// Global metrics registry.
pub static REGISTRY: Lazy<Registry> = Lazy::new(|| {
    let registry = Registry::new();
    register_metrics(&registry);
    registry
});

// =============================================================================
// HTTP Request Metrics
// =============================================================================

/// HTTP request duration in seconds.
pub static HTTP_REQUEST_DURATION: Lazy<HistogramVec> = Lazy::new(|| {
    HistogramVec::new(
        HistogramOpts::new(
            "mediarelay_http_request_duration_seconds",
            "HTTP request duration in seconds",
        )
        .buckets(vec![0.001, 0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0]),
        &["method", "path", "status"],
    )
    .unwrap()
});

/// HTTP requests total count.
pub static HTTP_REQUESTS_TOTAL: Lazy<IntCounterVec> = Lazy::new(|| {
    IntCounterVec::new(
        Opts::new("mediarelay_http_requests_total", "Total HTTP requests"),
        &["method", "path", "status"],
    )
    .unwrap()
});

/// HTTP requests currently in flight.
pub static HTTP_REQUESTS_IN_FLIGHT: Lazy<IntGauge> = Lazy::new(|| {
    IntGauge::new(
        "mediarelay_http_requests_in_flight",
        "Number of HTTP requests currently being processed",
    )
    .unwrap()
});

// =============================================================================
// Pipeline Metrics (collected dynamically)
// =============================================================================

/// Items by pipeline stage.
pub static ITEMS_BY_STAGE: Lazy<IntGaugeVec> = Lazy::new(|| {
    IntGaugeVec::new(
        Opts::new("mediarelay_items_by_stage", "Number of items in each stage"),
        &["stage"],
    )
    .unwrap()
});

/// Running workers by role.
pub static WORKERS_RUNNING: Lazy<IntGaugeVec> = Lazy::new(|| {
    IntGaugeVec::new(
        Opts::new("mediarelay_workers_running", "Number of running workers"),
        &["role"],
    )
    .unwrap()
});

/// Workers currently holding an item, by role.
pub static WORKERS_BUSY: Lazy<IntGaugeVec> = Lazy::new(|| {
    IntGaugeVec::new(
        Opts::new("mediarelay_workers_busy", "Number of workers holding an item"),
        &["role"],
    )
    .unwrap()
});

// =============================================================================
// Registration
// =============================================================================

fn register_metrics(registry: &Registry) {
    // HTTP
    registry
        .register(Box::new(HTTP_REQUEST_DURATION.clone()))
        .unwrap();
    registry
        .register(Box::new(HTTP_REQUESTS_TOTAL.clone()))
        .unwrap();
    registry
        .register(Box::new(HTTP_REQUESTS_IN_FLIGHT.clone()))
        .unwrap();

    // Pipeline
    registry
        .register(Box::new(ITEMS_BY_STAGE.clone()))
        .unwrap();
    registry
        .register(Box::new(WORKERS_RUNNING.clone()))
        .unwrap();
    registry.register(Box::new(WORKERS_BUSY.clone())).unwrap();

    // Core metrics (workers, variants, retries)
    for metric in mediarelay_core::metrics::all_metrics() {
        registry.register(metric).unwrap();
    }
}

/// Encode all metrics as Prometheus text format.
pub fn encode_metrics() -> String {
    let encoder = TextEncoder::new();
    let metric_families = REGISTRY.gather();
    let mut buffer = Vec::new();
    if let Err(e) = encoder.encode(&metric_families, &mut buffer) {
        tracing::error!("Failed to encode metrics: {}", e);
    }
    String::from_utf8_lossy(&buffer).into_owned()
}

/// Collect dynamic metrics from current application state.
///
/// Called before encoding so gauges reflect the store and worker pool.
pub fn collect_dynamic_metrics(state: &crate::state::AppState) {
    if let Ok(counts) = state.store().count_by_stage() {
        for stage in Stage::ALL {
            ITEMS_BY_STAGE
                .with_label_values(&[stage.as_str()])
                .set(counts.get(&stage).copied().unwrap_or(0));
        }
    }

    let statuses = state.worker_statuses();
    for role in WorkerRole::ALL {
        let of_role = statuses.iter().filter(|s| s.role == role);
        WORKERS_RUNNING
            .with_label_values(&[role.as_str()])
            .set(of_role.clone().filter(|s| s.running).count() as i64);
        WORKERS_BUSY
            .with_label_values(&[role.as_str()])
            .set(of_role.filter(|s| s.active_item.is_some()).count() as i64);
    }
}

/// Normalize a path for metric labels (replace IDs with placeholders).
pub fn normalize_path(path: &str) -> String {
    static UUID: Lazy<regex_lite::Regex> = Lazy::new(|| {
        regex_lite::Regex::new(
            r"[0-9a-fA-F]{8}-[0-9a-fA-F]{4}-[0-9a-fA-F]{4}-[0-9a-fA-F]{4}-[0-9a-fA-F]{12}",
        )
        .unwrap()
    });
    UUID.replace_all(path, "{id}").into_owned()
}
