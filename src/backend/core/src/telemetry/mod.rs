//! Telemetry infrastructure: structured logging and metrics export.

pub mod logging;
pub mod metrics;

pub use logging::init_logging;
pub use metrics::{describe_core_metrics, PrometheusExporter};
