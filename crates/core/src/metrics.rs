//! Prometheus metrics for core components.
//!
//! This module provides metrics for:
//! - Admission (tickets admitted or rejected)
//! - Work queues (items processed, discarded, emitted)
//! - Stream tee (bytes teed, sessions)
//! - Ingest (uploads, duration)

use once_cell::sync::Lazy;
use prometheus::{HistogramOpts, HistogramVec, IntCounter, IntCounterVec, Opts};

// =============================================================================
// Admission Metrics
// =============================================================================

/// Tickets resolved by outcome.
pub static TICKETS_RESOLVED: Lazy<IntCounterVec> = Lazy::new(|| {
    IntCounterVec::new(
        Opts::new(
            "intake_tickets_resolved_total",
            "Total admission tickets resolved",
        ),
        &["outcome"], // "admitted", "rejected"
    )
    .unwrap()
});

// =============================================================================
// Work Queue Metrics
// =============================================================================

/// Serial queue items by outcome.
pub static SERIAL_ITEMS: Lazy<IntCounterVec> = Lazy::new(|| {
    IntCounterVec::new(
        Opts::new(
            "intake_serial_items_total",
            "Total items handled by serial work queues",
        ),
        &["outcome"], // "processed", "stopped", "discarded"
    )
    .unwrap()
});

/// Ordered queue results by outcome.
pub static ORDERED_RESULTS: Lazy<IntCounterVec> = Lazy::new(|| {
    IntCounterVec::new(
        Opts::new(
            "intake_ordered_results_total",
            "Total results produced by ordered parallel queues",
        ),
        &["outcome"], // "ok", "failed", "panicked", "suppressed"
    )
    .unwrap()
});

// =============================================================================
// Stream Tee Metrics
// =============================================================================

/// Bytes read from tee sources.
pub static TEE_BYTES: Lazy<IntCounter> = Lazy::new(|| {
    IntCounter::new("intake_tee_bytes_total", "Total bytes read by stream tees").unwrap()
});

/// Tee sessions by result.
pub static TEE_SESSIONS: Lazy<IntCounterVec> = Lazy::new(|| {
    IntCounterVec::new(
        Opts::new("intake_tee_sessions_total", "Total stream tee sessions"),
        &["result"], // "completed", "failed", "cancelled"
    )
    .unwrap()
});

// =============================================================================
// Ingest Metrics
// =============================================================================

/// Ingest duration in seconds.
pub static INGEST_DURATION: Lazy<HistogramVec> = Lazy::new(|| {
    HistogramVec::new(
        HistogramOpts::new("intake_ingest_duration_seconds", "Duration of ingests")
            .buckets(vec![0.01, 0.05, 0.1, 0.5, 1.0, 5.0, 10.0, 30.0, 120.0]),
        &["result"], // "stored", "deduplicated", "failed"
    )
    .unwrap()
});

/// Ingested bytes total.
pub static INGEST_BYTES: Lazy<IntCounter> = Lazy::new(|| {
    IntCounter::new("intake_ingest_bytes_total", "Total bytes ingested").unwrap()
});

// =============================================================================
// Helper functions
// =============================================================================

/// Get all core metrics for registration in a registry.
pub fn all_metrics() -> Vec<Box<dyn prometheus::core::Collector>> {
    vec![
        // Admission
        Box::new(TICKETS_RESOLVED.clone()),
        // Work queues
        Box::new(SERIAL_ITEMS.clone()),
        Box::new(ORDERED_RESULTS.clone()),
        // Tee
        Box::new(TEE_BYTES.clone()),
        Box::new(TEE_SESSIONS.clone()),
        // Ingest
        Box::new(INGEST_DURATION.clone()),
        Box::new(INGEST_BYTES.clone()),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;
    use prometheus::Registry;

    #[test]
    fn test_all_metrics_register() {
        let registry = Registry::new();
        for metric in all_metrics() {
            registry.register(metric).unwrap();
        }

        TICKETS_RESOLVED.with_label_values(&["admitted"]).inc();
        TEE_BYTES.inc_by(3);

        let names: Vec<String> = registry
            .gather()
            .iter()
            .map(|family| family.get_name().to_string())
            .collect();
        assert!(names.contains(&"intake_tickets_resolved_total".to_string()));
        assert!(names.contains(&"intake_tee_bytes_total".to_string()));
    }
}
