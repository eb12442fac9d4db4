//! Error monitoring and alerting.
//!
//! Three cooperating pieces:
//!
//! - **EnhancedErrorCollector**: accumulates, classifies, and aggregates
//!   error records from pipeline stages; tracks per-component health and
//!   operator-invoked recovery
//! - **ErrorMonitoringService**: polls the collector, evaluates thresholds,
//!   trends, and anomalies, and manages the alert lifecycle
//! - **MonitoringService**: generic metrics façade with rule-based alerting
//!   and range summaries
//!
//! Alerts leave the process through an [`AlertTransport`]; delivery failure
//! is logged and never fatal to a monitoring tick.

pub mod alerts;
pub mod collector;
pub mod error_monitor;
pub mod service;

pub use alerts::{
    Alert, AlertId, AlertRule, AlertSeverity, AlertTransport, AlertType, RuleOperator,
    TracingAlertTransport, WebhookAlertTransport,
};
pub use collector::{
    AcknowledgeRecoveryRunner, DegradationLevel, EnhancedErrorCollector, ErrorAggregation,
    ErrorCategorization, ErrorKind, ErrorRateMetrics, ErrorRecord, RecordSeverity, RecoveryAction,
    RecoveryOutcome, RecoveryRunner, SystemHealthStatus, TrendDirection,
};
pub use error_monitor::{ErrorMonitoringService, MonitoringStatistics};
pub use service::{
    ConversionQualityMetric, MetricData, MetricEvent, MetricRecord, MetricsSummary,
    MonitoringService, OperationStats, PerformanceMetric, SecurityMetric, SystemHealthMetric,
};
