//! Prometheus metrics for core components.
//!
//! This module provides metrics for:
//! - Workers (claims, stage passes, failures, self-heal resets)
//! - Variants (per-stage results, bytes transferred, stalls)
//! - Collaborator calls (retries, exhausted retries)

use once_cell::sync::Lazy;
use prometheus::{HistogramOpts, HistogramVec, IntCounter, IntCounterVec, Opts};

// =============================================================================
// Workers
// =============================================================================

/// Items claimed by worker role.
pub static ITEMS_CLAIMED: Lazy<IntCounterVec> = Lazy::new(|| {
    IntCounterVec::new(
        Opts::new("mediarelay_items_claimed_total", "Total items claimed"),
        &["role"], // "resolve", "transfer", "publish"
    )
    .unwrap()
});

/// Duration of one stage pass in seconds.
pub static STAGE_DURATION: Lazy<HistogramVec> = Lazy::new(|| {
    HistogramVec::new(
        HistogramOpts::new(
            "mediarelay_stage_duration_seconds",
            "Duration of one stage pass over an item",
        )
        .buckets(vec![
            0.1, 0.5, 1.0, 5.0, 10.0, 30.0, 60.0, 300.0, 900.0, 1800.0, 3600.0,
        ]),
        &["role", "result"], // result: "success", "failure"
    )
    .unwrap()
});

/// Failed stage passes by role.
pub static ITEM_FAILURES: Lazy<IntCounterVec> = Lazy::new(|| {
    IntCounterVec::new(
        Opts::new("mediarelay_item_failures_total", "Total failed stage passes"),
        &["role"],
    )
    .unwrap()
});

/// Items sent back to pending after reaching the error threshold.
pub static SELF_HEAL_RESETS: Lazy<IntCounter> = Lazy::new(|| {
    IntCounter::new(
        "mediarelay_self_heal_resets_total",
        "Total items reset to pending by self-healing",
    )
    .unwrap()
});

/// Items left in error after running out of self-healing resets.
pub static SELF_HEAL_EXHAUSTED: Lazy<IntCounter> = Lazy::new(|| {
    IntCounter::new(
        "mediarelay_self_heal_exhausted_total",
        "Total items left in error after exhausting resets",
    )
    .unwrap()
});

pub static ITEMS_COMPLETED: Lazy<IntCounter> = Lazy::new(|| {
    IntCounter::new("mediarelay_items_completed_total", "Total items completed").unwrap()
});

// =============================================================================
// Variants
// =============================================================================

/// Per-variant outcomes by stage.
pub static VARIANT_RESULTS: Lazy<IntCounterVec> = Lazy::new(|| {
    IntCounterVec::new(
        Opts::new("mediarelay_variant_results_total", "Per-variant stage results"),
        &["stage", "result"], // result: "success", "failure"
    )
    .unwrap()
});

pub static BYTES_TRANSFERRED: Lazy<IntCounter> = Lazy::new(|| {
    IntCounter::new(
        "mediarelay_bytes_transferred_total",
        "Total bytes of completed transfers",
    )
    .unwrap()
});

/// Transfers given up on for lack of progress.
pub static STALL_DETECTIONS: Lazy<IntCounter> = Lazy::new(|| {
    IntCounter::new(
        "mediarelay_stall_detections_total",
        "Total stalled transfers detected",
    )
    .unwrap()
});

// =============================================================================
// Retries
// =============================================================================

/// Retries by operation name.
pub static RETRY_ATTEMPTS: Lazy<IntCounterVec> = Lazy::new(|| {
    IntCounterVec::new(
        Opts::new("mediarelay_retry_attempts_total", "Total retry attempts"),
        &["operation"],
    )
    .unwrap()
});

/// Operations that failed after their last attempt.
pub static RETRIES_EXHAUSTED: Lazy<IntCounterVec> = Lazy::new(|| {
    IntCounterVec::new(
        Opts::new(
            "mediarelay_retries_exhausted_total",
            "Total operations that exhausted their retries",
        ),
        &["operation"],
    )
    .unwrap()
});

/// Get all core metrics for registration.
pub fn all_metrics() -> Vec<Box<dyn prometheus::core::Collector>> {
    vec![
        // Workers
        Box::new(ITEMS_CLAIMED.clone()),
        Box::new(STAGE_DURATION.clone()),
        Box::new(ITEM_FAILURES.clone()),
        Box::new(SELF_HEAL_RESETS.clone()),
        Box::new(SELF_HEAL_EXHAUSTED.clone()),
        Box::new(ITEMS_COMPLETED.clone()),
        // Variants
        Box::new(VARIANT_RESULTS.clone()),
        Box::new(BYTES_TRANSFERRED.clone()),
        Box::new(STALL_DETECTIONS.clone()),
        // Retries
        Box::new(RETRY_ATTEMPTS.clone()),
        Box::new(RETRIES_EXHAUSTED.clone()),
    ]
}
