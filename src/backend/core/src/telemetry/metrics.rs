//! Metrics registry and Prometheus export.
//!
//! Core components record through the `metrics` facade; installing the
//! exporter is optional and owned by the embedding service.

use metrics::{describe_counter, describe_gauge, describe_histogram};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};

/// Prometheus exporter handle for serving metrics over HTTP.
pub struct PrometheusExporter {
    handle: PrometheusHandle,
}

impl PrometheusExporter {
    /// Install the Prometheus recorder as the global metrics sink.
    pub fn install() -> anyhow::Result<Self> {
        let handle = PrometheusBuilder::new()
            .install_recorder()
            .map_err(|e| anyhow::anyhow!("failed to install metrics recorder: {e}"))?;
        describe_core_metrics();
        Ok(Self { handle })
    }

    /// Render all metrics in Prometheus text format.
    pub fn render(&self) -> String {
        self.handle.render()
    }
}

/// Register descriptions for the metrics this crate emits.
pub fn describe_core_metrics() {
    describe_counter!("morph_jobs_enqueued_total", "Jobs admitted to the queue");
    describe_counter!("morph_jobs_completed_total", "Jobs that completed successfully");
    describe_counter!("morph_jobs_failed_total", "Jobs that failed");
    describe_counter!("morph_jobs_cancelled_total", "Jobs cancelled by operators");
    describe_counter!(
        "morph_jobs_unsatisfiable_total",
        "Pending jobs flagged as unsatisfiable under the resource budget"
    );
    describe_histogram!("morph_job_duration_seconds", "Job execution duration");
    describe_gauge!("morph_pool_capacity", "Worker pool concurrency target");
    describe_gauge!("morph_pool_active_workers", "Currently executing workers");
    describe_counter!("morph_errors_total", "Errors constructed by the core");
    describe_counter!(
        "morph_collected_errors_total",
        "Error records ingested by the collector"
    );
    describe_counter!("morph_alerts_raised_total", "Alerts raised by the monitor");
}
