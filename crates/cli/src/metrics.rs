//! Prometheus registry for the `intake` binary.
//!
//! Registers every core metric plus a gauge for the uploads the current run
//! was asked to ingest. Printed to stderr with `--metrics`.

use once_cell::sync::Lazy;
use prometheus::{Encoder, IntGauge, Registry, TextEncoder};

/// Global metrics registry.
pub static REGISTRY: Lazy<Registry> = Lazy::new(|| {
    let registry = Registry::new();
    register_metrics(&registry);
    registry
});

/// Uploads requested on the command line.
pub static UPLOADS_REQUESTED: Lazy<IntGauge> = Lazy::new(|| {
    IntGauge::new(
        "intake_uploads_requested",
        "Number of uploads requested in this run",
    )
    .unwrap()
});

fn register_metrics(registry: &Registry) {
    registry
        .register(Box::new(UPLOADS_REQUESTED.clone()))
        .unwrap();

    for metric in intake_core::metrics::all_metrics() {
        registry.register(metric).unwrap();
    }
}

/// Encode all metrics in Prometheus text format.
pub fn encode_metrics() -> String {
    let encoder = TextEncoder::new();
    let metric_families = REGISTRY.gather();
    let mut buffer = Vec::new();
    encoder.encode(&metric_families, &mut buffer).unwrap();
    String::from_utf8(buffer).unwrap()
}
