//! Prometheus metrics for report ingestion.

use metrics::{counter, histogram};

/// Initialize metrics exporter (Prometheus).
pub fn init_metrics() {
    let builder = metrics_exporter_prometheus::PrometheusBuilder::new();
    if let Err(e) = builder.install() {
        tracing::warn!("Failed to install Prometheus exporter: {}", e);
    }
}

/// Record the final outcome of an upload request.
pub fn upload_finished(outcome: &'static str) {
    counter!("reports_uploads_total", "outcome" => outcome).increment(1);
}

/// Record the size of a stored artifact.
pub fn upload_bytes(size: usize) {
    histogram!("reports_upload_bytes").record(size as f64);
}

/// Record an index delivery attempt.
pub fn index_delivery(result: &'static str) {
    counter!("reports_index_deliveries_total", "result" => result).increment(1);
}

/// Record a lost conditional write on a metadata record.
pub fn merge_conflict(record: &'static str) {
    counter!("reports_merge_conflicts_total", "record" => record).increment(1);
}
