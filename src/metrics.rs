//! Prometheus metrics for engine observability.

use metrics::{counter, histogram};

/// Initialize metrics exporter (Prometheus).
pub fn init_metrics() {
    let builder = metrics_exporter_prometheus::PrometheusBuilder::new();
    if let Err(e) = builder.install() {
        tracing::warn!("Failed to install Prometheus exporter: {}", e);
    }
}

/// Record a build creation.
pub fn build_created(pipeline_kind: &str) {
    counter!("engine_builds_created_total", "kind" => pipeline_kind.to_string()).increment(1);
}

/// Record a build state transition.
pub fn build_status_changed(status: &str) {
    counter!("engine_builds_total", "status" => status.to_string()).increment(1);
}

/// Record a lost build-number allocation race.
pub fn allocation_conflict() {
    counter!("engine_allocation_conflicts_total").increment(1);
}

/// Record build duration on terminal entry.
pub fn build_duration(duration_ms: u64) {
    histogram!("engine_build_duration_ms").record(duration_ms as f64);
}

/// Record a dropped event publication.
pub fn event_publish_failed(kind: &str) {
    counter!("engine_events_dropped_total", "kind" => kind.to_string()).increment(1);
}

/// Record a degraded VCS collaborator call.
pub fn vcs_degraded(op: &str) {
    counter!("engine_vcs_degraded_total", "op" => op.to_string()).increment(1);
}
