//! Prometheus metrics for the state store.
//!
//! This module provides metrics for:
//! - Store operations (count and outcome per operation)
//! - Filtering (duration, delivered tickets, dangling references)
//! - Reconciliation sweeps

use once_cell::sync::Lazy;
use prometheus::{HistogramOpts, HistogramVec, IntCounter, IntCounterVec, Opts};

use crate::error::StoreError;

// =============================================================================
// Store Operations
// =============================================================================

/// Store operations total by operation and result.
pub static OPERATIONS: Lazy<IntCounterVec> = Lazy::new(|| {
    IntCounterVec::new(
        Opts::new(
            "ticketstore_operations_total",
            "Total state store operations",
        ),
        &["operation", "result"], // result: "ok" or an error kind
    )
    .unwrap()
});

// =============================================================================
// Filtering
// =============================================================================

/// Filter call duration in seconds.
pub static FILTER_DURATION: Lazy<HistogramVec> = Lazy::new(|| {
    HistogramVec::new(
        HistogramOpts::new(
            "ticketstore_filter_duration_seconds",
            "Duration of filter calls including page delivery",
        )
        .buckets(vec![0.001, 0.005, 0.01, 0.05, 0.1, 0.25, 0.5, 1.0, 5.0]),
        &["result"],
    )
    .unwrap()
});

/// Tickets delivered to filter callbacks.
pub static TICKETS_DELIVERED: Lazy<IntCounter> = Lazy::new(|| {
    IntCounter::new(
        "ticketstore_filter_tickets_delivered_total",
        "Total tickets delivered by filter calls",
    )
    .unwrap()
});

/// Index entries skipped because the ticket payload was gone.
pub static DANGLING_SKIPPED: Lazy<IntCounter> = Lazy::new(|| {
    IntCounter::new(
        "ticketstore_dangling_references_skipped_total",
        "Total dangling index references skipped during filtering",
    )
    .unwrap()
});

// =============================================================================
// Reconciliation
// =============================================================================

/// Dangling index entries removed by the reconciler.
pub static RECONCILED: Lazy<IntCounter> = Lazy::new(|| {
    IntCounter::new(
        "ticketstore_reconciled_tickets_total",
        "Total dangling tickets deindexed by reconciliation sweeps",
    )
    .unwrap()
});

/// Reconciliation sweeps total by result.
pub static SWEEPS: Lazy<IntCounterVec> = Lazy::new(|| {
    IntCounterVec::new(
        Opts::new("ticketstore_sweeps_total", "Total reconciliation sweeps"),
        &["result"], // "ok", "error"
    )
    .unwrap()
});

// =============================================================================
// Helper functions
// =============================================================================

/// Record the outcome of a store operation.
pub fn record_operation<T>(operation: &str, result: &Result<T, StoreError>) {
    let label = match result {
        Ok(_) => "ok",
        Err(e) => e.kind().as_str(),
    };
    OPERATIONS.with_label_values(&[operation, label]).inc();
}

/// Get all core metrics for registration in a registry.
pub fn all_metrics() -> Vec<Box<dyn prometheus::core::Collector>> {
    vec![
        Box::new(OPERATIONS.clone()),
        Box::new(FILTER_DURATION.clone()),
        Box::new(TICKETS_DELIVERED.clone()),
        Box::new(DANGLING_SKIPPED.clone()),
        Box::new(RECONCILED.clone()),
        Box::new(SWEEPS.clone()),
    ]
}
