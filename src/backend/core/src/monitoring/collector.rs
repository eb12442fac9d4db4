//! Enhanced error collector.
//!
//! Accumulates error records surfaced by pipeline stages, classifies and
//! clusters them, tracks per-component health, and supports operator-invoked
//! recovery. Records are kept in a bounded append-only log; aggregations are
//! computed on read so cluster counts always equal the sum of
//! currently-retained matching records, including after eviction.

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use dashmap::DashMap;
use metrics::counter;
use parking_lot::RwLock;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, VecDeque};
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use uuid::Uuid;

use crate::config::CollectorConfig;
use crate::health::{ComponentHealth, HealthStatus};

// ═══════════════════════════════════════════════════════════════════════════════
// Error Records
// ═══════════════════════════════════════════════════════════════════════════════

/// Classification of an error's origin.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    Validation,
    Conversion,
    Resource,
    Io,
    Network,
    Internal,
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Validation => write!(f, "validation"),
            Self::Conversion => write!(f, "conversion"),
            Self::Resource => write!(f, "resource"),
            Self::Io => write!(f, "io"),
            Self::Network => write!(f, "network"),
            Self::Internal => write!(f, "internal"),
        }
    }
}

/// Severity of a collected error record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RecordSeverity {
    Info,
    Warning,
    Error,
    Critical,
}

impl fmt::Display for RecordSeverity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Info => write!(f, "info"),
            Self::Warning => write!(f, "warning"),
            Self::Error => write!(f, "error"),
            Self::Critical => write!(f, "critical"),
        }
    }
}

/// A declarative recovery step attached to an error record.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RecoveryAction {
    /// Short action name (e.g. "retry_stage", "clear_scratch")
    pub name: String,
    /// What the action does
    pub description: String,
}

impl RecoveryAction {
    pub fn new(name: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
        }
    }
}

/// An error surfaced by a pipeline stage or core component.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorRecord {
    /// Unique record identifier
    pub id: Uuid,
    /// Machine-readable error code (e.g. "CONV_MANIFEST_PARSE")
    pub code: String,
    /// Origin classification
    pub kind: ErrorKind,
    /// Severity
    pub severity: RecordSeverity,
    /// Error message
    pub message: String,
    /// Component/module that produced the error
    pub module_origin: String,
    /// When the error occurred
    pub timestamp: DateTime<Utc>,
    /// Recovery attempts made against this record
    pub recovery_attempts: u32,
    /// Whether a recovery attempt succeeded
    pub has_been_recovered: bool,
    /// Declarative recovery steps, tried in order
    pub recovery_actions: Vec<RecoveryAction>,
}

impl ErrorRecord {
    /// Create a record with the current timestamp.
    pub fn new(
        code: impl Into<String>,
        kind: ErrorKind,
        severity: RecordSeverity,
        message: impl Into<String>,
        module_origin: impl Into<String>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            code: code.into(),
            kind,
            severity,
            message: message.into(),
            module_origin: module_origin.into(),
            timestamp: Utc::now(),
            recovery_attempts: 0,
            has_been_recovered: false,
            recovery_actions: Vec::new(),
        }
    }

    /// Attach a recovery action.
    pub fn with_recovery_action(mut self, action: RecoveryAction) -> Self {
        self.recovery_actions.push(action);
        self
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Derived Views
// ═══════════════════════════════════════════════════════════════════════════════

/// Direction of change between adjacent observation windows.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TrendDirection {
    Rising,
    Falling,
    Stable,
}

/// A cluster of records sharing a signature.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorAggregation {
    /// Cluster signature (code prefix + module + normalized message)
    pub signature: String,
    /// Number of currently-retained records in the cluster
    pub count: usize,
    /// Oldest retained occurrence
    pub first_occurrence: DateTime<Utc>,
    /// Newest retained occurrence
    pub last_occurrence: DateTime<Utc>,
    /// Modules that produced records in this cluster
    pub affected_modules: Vec<String>,
    /// Shared cause, when the cluster is uniform enough to name one
    #[serde(skip_serializing_if = "Option::is_none")]
    pub common_cause: Option<String>,
    /// Suggested remediation, derived from the error kind
    #[serde(skip_serializing_if = "Option::is_none")]
    pub suggested_fix: Option<String>,
}

/// Category-level classification of retained records.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorCategorization {
    /// Error kind (category)
    pub category: ErrorKind,
    /// Code prefix (subcategory)
    pub subcategory: String,
    /// Retained record count
    pub frequency: usize,
    /// Worst severity observed
    pub impact: RecordSeverity,
    /// Direction across the two most recent windows
    pub trend: TrendDirection,
}

/// Error-rate metrics over the rolling window.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorRateMetrics {
    /// All retained records
    pub total_errors: usize,
    /// Records within the current window
    pub window_errors: usize,
    /// Events per minute over the rolling window
    pub error_rate: f64,
    /// Direction comparing the current window to the previous one
    pub trend: TrendDirection,
    /// Window record counts by kind
    pub by_kind: HashMap<String, usize>,
    /// Window record counts by severity
    pub by_severity: HashMap<String, usize>,
    /// Window record counts by module
    pub by_module: HashMap<String, usize>,
    /// Configured warning threshold (events/min)
    pub warning_threshold: f64,
    /// Configured critical threshold (events/min)
    pub critical_threshold: f64,
}

/// Outcome of a recovery attempt.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RecoveryOutcome {
    pub success: bool,
    pub message: String,
}

/// How far the system has degraded from fully healthy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DegradationLevel {
    None,
    Minor,
    Moderate,
    Severe,
}

/// System-wide health rollup.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SystemHealthStatus {
    /// Worst component status (`unknown` when nothing has reported)
    pub overall: HealthStatus,
    /// Per-component health
    pub components: Vec<ComponentHealth>,
    /// Degradation classification
    pub degradation_level: DegradationLevel,
    /// Operator-facing recommendations
    pub recommendations: Vec<String>,
}

// ═══════════════════════════════════════════════════════════════════════════════
// Recovery Runner
// ═══════════════════════════════════════════════════════════════════════════════

/// Executes recovery actions. Pluggable so the pipeline can wire real
/// remediations; the default runner only acknowledges the action.
pub trait RecoveryRunner: Send + Sync {
    /// Run one action against one record. Returns a human-readable outcome
    /// message on success, or a failure description.
    fn run(&self, record: &ErrorRecord, action: &RecoveryAction)
        -> std::result::Result<String, String>;
}

/// Default runner: marks the action as applied without side effects.
#[derive(Debug, Default)]
pub struct AcknowledgeRecoveryRunner;

impl RecoveryRunner for AcknowledgeRecoveryRunner {
    fn run(
        &self,
        record: &ErrorRecord,
        action: &RecoveryAction,
    ) -> std::result::Result<String, String> {
        tracing::info!(
            error_id = %record.id,
            action = %action.name,
            "Recovery action acknowledged"
        );
        Ok(format!("applied '{}'", action.name))
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Component Tracking
// ═══════════════════════════════════════════════════════════════════════════════

#[derive(Debug, Default)]
struct ComponentState {
    error_count: u64,
    last_error: Option<String>,
    recovery_attempts: u32,
    fallback_active: bool,
    last_seen: Option<DateTime<Utc>>,
}

// ═══════════════════════════════════════════════════════════════════════════════
// Enhanced Error Collector
// ═══════════════════════════════════════════════════════════════════════════════

/// Accumulates, classifies, and aggregates error records across running
/// jobs. Safe for concurrent `add_error` calls from multiple executing jobs.
pub struct EnhancedErrorCollector {
    config: CollectorConfig,
    records: RwLock<VecDeque<ErrorRecord>>,
    components: DashMap<String, ComponentState>,
    runner: Arc<dyn RecoveryRunner>,
    digit_run: Regex,
    recovery_attempts_total: AtomicU64,
    recovery_failures_total: AtomicU64,
}

impl EnhancedErrorCollector {
    /// Create a collector with the default recovery runner.
    pub fn new(config: CollectorConfig) -> Self {
        Self::with_runner(config, Arc::new(AcknowledgeRecoveryRunner))
    }

    /// Create a collector with a custom recovery runner.
    pub fn with_runner(config: CollectorConfig, runner: Arc<dyn RecoveryRunner>) -> Self {
        Self {
            config,
            records: RwLock::new(VecDeque::new()),
            components: DashMap::new(),
            runner,
            digit_run: Regex::new(r"\d+").expect("static regex"),
            recovery_attempts_total: AtomicU64::new(0),
            recovery_failures_total: AtomicU64::new(0),
        }
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Ingestion
    // ─────────────────────────────────────────────────────────────────────────

    /// Append an error record, updating component health bookkeeping.
    pub fn add_error(&self, record: ErrorRecord) {
        counter!(
            "morph_collected_errors_total",
            "kind" => record.kind.to_string(),
            "severity" => record.severity.to_string(),
        )
        .increment(1);

        {
            let mut state = self.components.entry(record.module_origin.clone()).or_default();
            state.error_count += 1;
            state.last_error = Some(record.message.clone());
            state.last_seen = Some(record.timestamp);
        }

        tracing::debug!(
            error_id = %record.id,
            code = %record.code,
            module = %record.module_origin,
            severity = %record.severity,
            "Error collected"
        );

        let mut records = self.records.write();
        records.push_back(record);
        while records.len() > self.config.max_records {
            records.pop_front();
        }
    }

    /// Mark a component as running on its fallback path.
    pub fn set_fallback_active(&self, component: impl Into<String>, active: bool) {
        let mut state = self.components.entry(component.into()).or_default();
        state.fallback_active = active;
    }

    /// Number of currently-retained records.
    pub fn record_count(&self) -> usize {
        self.records.read().len()
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Signatures
    // ─────────────────────────────────────────────────────────────────────────

    fn code_prefix(code: &str) -> &str {
        code.split('_').next().unwrap_or(code)
    }

    /// Cluster signature: code prefix + origin + digit-normalized message.
    fn signature(&self, record: &ErrorRecord) -> String {
        let normalized = self.digit_run.replace_all(&record.message, "N");
        format!(
            "{}:{}:{}",
            Self::code_prefix(&record.code),
            record.module_origin,
            normalized.trim()
        )
    }

    fn suggested_fix(kind: ErrorKind) -> Option<String> {
        let fix = match kind {
            ErrorKind::Validation => "inspect the source package manifest for schema violations",
            ErrorKind::Conversion => "re-run the stage with verbose diagnostics enabled",
            ErrorKind::Resource => "raise the pool resource budget or lower job requirements",
            ErrorKind::Io => "check scratch disk capacity and permissions",
            ErrorKind::Network => "verify registry/endpoint reachability and retry",
            ErrorKind::Internal => return None,
        };
        Some(fix.to_string())
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Rate Metrics
    // ─────────────────────────────────────────────────────────────────────────

    /// Error-rate metrics over the rolling window, with trend against the
    /// previous window.
    pub fn error_rate_metrics(&self) -> ErrorRateMetrics {
        let window = ChronoDuration::from_std(self.config.rate_window)
            .unwrap_or_else(|_| ChronoDuration::seconds(300));
        let now = Utc::now();
        let window_start = now - window;
        let previous_start = window_start - window;

        let records = self.records.read();
        let mut window_errors = 0usize;
        let mut previous_errors = 0usize;
        let mut by_kind: HashMap<String, usize> = HashMap::new();
        let mut by_severity: HashMap<String, usize> = HashMap::new();
        let mut by_module: HashMap<String, usize> = HashMap::new();

        for record in records.iter() {
            if record.timestamp >= window_start {
                window_errors += 1;
                *by_kind.entry(record.kind.to_string()).or_default() += 1;
                *by_severity.entry(record.severity.to_string()).or_default() += 1;
                *by_module.entry(record.module_origin.clone()).or_default() += 1;
            } else if record.timestamp >= previous_start {
                previous_errors += 1;
            }
        }

        let minutes = (window.num_seconds() as f64 / 60.0).max(f64::EPSILON);
        let error_rate = window_errors as f64 / minutes;

        // 10% hysteresis so jitter does not flip the trend
        let trend = if window_errors as f64 > previous_errors as f64 * 1.1 {
            TrendDirection::Rising
        } else if (window_errors as f64) < previous_errors as f64 * 0.9 {
            TrendDirection::Falling
        } else {
            TrendDirection::Stable
        };

        ErrorRateMetrics {
            total_errors: records.len(),
            window_errors,
            error_rate,
            trend,
            by_kind,
            by_severity,
            by_module,
            warning_threshold: self.config.warning_error_rate,
            critical_threshold: self.config.critical_error_rate,
        }
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Aggregation & Categorization
    // ─────────────────────────────────────────────────────────────────────────

    /// Cluster retained records by signature.
    pub fn aggregations(&self) -> Vec<ErrorAggregation> {
        let records = self.records.read();
        let mut clusters: HashMap<String, Vec<&ErrorRecord>> = HashMap::new();
        for record in records.iter() {
            clusters.entry(self.signature(record)).or_default().push(record);
        }

        let mut aggregations: Vec<ErrorAggregation> = clusters
            .into_iter()
            .map(|(signature, members)| {
                let first = members.iter().map(|r| r.timestamp).min().expect("non-empty");
                let last = members.iter().map(|r| r.timestamp).max().expect("non-empty");
                let mut modules: Vec<String> =
                    members.iter().map(|r| r.module_origin.clone()).collect();
                modules.sort();
                modules.dedup();

                let codes: std::collections::HashSet<&str> =
                    members.iter().map(|r| r.code.as_str()).collect();
                let common_cause = if codes.len() == 1 {
                    Some(format!("recurring {}", members[0].code))
                } else {
                    None
                };

                ErrorAggregation {
                    signature,
                    count: members.len(),
                    first_occurrence: first,
                    last_occurrence: last,
                    affected_modules: modules,
                    common_cause,
                    suggested_fix: Self::suggested_fix(members[0].kind),
                }
            })
            .collect();

        aggregations.sort_by(|a, b| b.count.cmp(&a.count));
        aggregations
    }

    /// Category/subcategory classification of retained records.
    pub fn categorizations(&self) -> Vec<ErrorCategorization> {
        let window = ChronoDuration::from_std(self.config.rate_window)
            .unwrap_or_else(|_| ChronoDuration::seconds(300));
        let now = Utc::now();
        let window_start = now - window;
        let previous_start = window_start - window;

        let records = self.records.read();
        let mut groups: HashMap<(ErrorKind, String), Vec<&ErrorRecord>> = HashMap::new();
        for record in records.iter() {
            groups
                .entry((record.kind, Self::code_prefix(&record.code).to_string()))
                .or_default()
                .push(record);
        }

        let mut categorizations: Vec<ErrorCategorization> = groups
            .into_iter()
            .map(|((category, subcategory), members)| {
                let impact = members
                    .iter()
                    .map(|r| r.severity)
                    .max()
                    .unwrap_or(RecordSeverity::Info);
                let recent = members
                    .iter()
                    .filter(|r| r.timestamp >= window_start)
                    .count();
                let previous = members
                    .iter()
                    .filter(|r| r.timestamp >= previous_start && r.timestamp < window_start)
                    .count();
                let trend = if recent as f64 > previous as f64 * 1.1 {
                    TrendDirection::Rising
                } else if (recent as f64) < previous as f64 * 0.9 {
                    TrendDirection::Falling
                } else {
                    TrendDirection::Stable
                };

                ErrorCategorization {
                    category,
                    subcategory,
                    frequency: members.len(),
                    impact,
                    trend,
                }
            })
            .collect();

        categorizations.sort_by(|a, b| b.frequency.cmp(&a.frequency));
        categorizations
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Recovery
    // ─────────────────────────────────────────────────────────────────────────

    /// Records with untried recovery actions that have not yet recovered.
    pub fn recoverable_errors(&self) -> Vec<ErrorRecord> {
        self.records
            .read()
            .iter()
            .filter(|r| !r.has_been_recovered && !r.recovery_actions.is_empty())
            .cloned()
            .collect()
    }

    /// Run the next untried recovery action for a record.
    ///
    /// Always increments the record's attempt counter; sets
    /// `has_been_recovered` on success. A failed attempt never self-retries.
    pub fn attempt_recovery(&self, id: Uuid) -> RecoveryOutcome {
        let mut records = self.records.write();
        let Some(record) = records.iter_mut().find(|r| r.id == id) else {
            return RecoveryOutcome {
                success: false,
                message: format!("no error record with id {}", id),
            };
        };

        self.recovery_attempts_total.fetch_add(1, Ordering::Relaxed);
        let attempt_index = record.recovery_attempts as usize;
        record.recovery_attempts += 1;

        {
            let mut state = self.components.entry(record.module_origin.clone()).or_default();
            state.recovery_attempts += 1;
        }

        if record.has_been_recovered {
            return RecoveryOutcome {
                success: false,
                message: "record already recovered".to_string(),
            };
        }

        let Some(action) = record.recovery_actions.get(attempt_index).cloned() else {
            self.recovery_failures_total.fetch_add(1, Ordering::Relaxed);
            return RecoveryOutcome {
                success: false,
                message: "no untried recovery actions remain".to_string(),
            };
        };

        match self.runner.run(record, &action) {
            Ok(message) => {
                record.has_been_recovered = true;
                tracing::info!(error_id = %id, action = %action.name, "Recovery succeeded");
                RecoveryOutcome {
                    success: true,
                    message,
                }
            }
            Err(message) => {
                self.recovery_failures_total.fetch_add(1, Ordering::Relaxed);
                tracing::warn!(error_id = %id, action = %action.name, reason = %message, "Recovery failed");
                RecoveryOutcome {
                    success: false,
                    message,
                }
            }
        }
    }

    /// Fraction of recovery attempts that failed (0.0 with no attempts).
    pub fn recovery_failure_rate(&self) -> f64 {
        let attempts = self.recovery_attempts_total.load(Ordering::Relaxed);
        if attempts == 0 {
            return 0.0;
        }
        self.recovery_failures_total.load(Ordering::Relaxed) as f64 / attempts as f64
    }

    // ─────────────────────────────────────────────────────────────────────────
    // System Health
    // ─────────────────────────────────────────────────────────────────────────

    /// Per-component health with window error rates.
    pub fn component_health(&self) -> Vec<ComponentHealth> {
        let metrics = self.error_rate_metrics();
        let minutes = (self.config.rate_window.as_secs() as f64 / 60.0).max(f64::EPSILON);

        self.components
            .iter()
            .map(|entry| {
                let name = entry.key().clone();
                let state = entry.value();
                let window_count = metrics.by_module.get(&name).copied().unwrap_or(0);

                let mut health = ComponentHealth {
                    name: name.clone(),
                    status: HealthStatus::Unknown,
                    error_count: state.error_count,
                    error_rate: window_count as f64 / minutes,
                    last_error: state.last_error.clone(),
                    fallback_active: state.fallback_active,
                    recovery_attempts: state.recovery_attempts,
                    last_seen: state.last_seen,
                };
                health.classify_rate(
                    self.config.warning_error_rate,
                    self.config.critical_error_rate,
                );
                health
            })
            .collect()
    }

    /// Roll component health into an overall status with degradation level
    /// and recommendations. Worst component wins; with no reporting
    /// components the overall status is `unknown`.
    pub fn system_health_status(&self) -> SystemHealthStatus {
        let components = self.component_health();

        let overall = components
            .iter()
            .map(|c| c.status)
            .max_by_key(|s| s.rank())
            .unwrap_or(HealthStatus::Unknown);

        let unhealthy = components
            .iter()
            .filter(|c| c.status == HealthStatus::Unhealthy)
            .count();
        let degraded = components
            .iter()
            .filter(|c| c.status == HealthStatus::Degraded)
            .count();

        let degradation_level = if unhealthy >= 2 {
            DegradationLevel::Severe
        } else if unhealthy == 1 {
            DegradationLevel::Moderate
        } else if degraded > 0 {
            DegradationLevel::Minor
        } else {
            DegradationLevel::None
        };

        let mut recommendations = Vec::new();
        for component in &components {
            match component.status {
                HealthStatus::Unhealthy => recommendations.push(format!(
                    "component '{}' is unhealthy ({:.1} errors/min); investigate its recent failures",
                    component.name, component.error_rate
                )),
                HealthStatus::Degraded => recommendations.push(format!(
                    "component '{}' is degraded; watch its error rate",
                    component.name
                )),
                _ => {}
            }
            if component.fallback_active {
                recommendations.push(format!(
                    "component '{}' is running on its fallback path",
                    component.name
                ));
            }
        }
        if self.recovery_failure_rate() > 0.5 {
            recommendations
                .push("more than half of recovery attempts are failing; review recovery actions".to_string());
        }

        SystemHealthStatus {
            overall,
            components,
            degradation_level,
            recommendations,
        }
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Tests
// ═══════════════════════════════════════════════════════════════════════════════

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn collector() -> EnhancedErrorCollector {
        EnhancedErrorCollector::new(CollectorConfig {
            max_records: 100,
            rate_window: Duration::from_secs(300),
            warning_error_rate: 5.0,
            critical_error_rate: 20.0,
        })
    }

    fn record(code: &str, module: &str, message: &str) -> ErrorRecord {
        ErrorRecord::new(code, ErrorKind::Conversion, RecordSeverity::Error, message, module)
    }

    #[test]
    fn test_bounded_store_evicts_oldest() {
        let collector = EnhancedErrorCollector::new(CollectorConfig {
            max_records: 3,
            ..CollectorConfig::default()
        });

        for i in 0..5 {
            collector.add_error(record("CONV_X", "converter", &format!("failure {}", i)));
        }
        assert_eq!(collector.record_count(), 3);
    }

    #[test]
    fn test_aggregation_counts_match_retained_records() {
        let collector = collector();
        collector.add_error(record("CONV_PARSE", "converter", "bad manifest at line 10"));
        collector.add_error(record("CONV_PARSE", "converter", "bad manifest at line 42"));
        collector.add_error(record("IO_READ", "extractor", "read failed"));

        let aggregations = collector.aggregations();
        let total: usize = aggregations.iter().map(|a| a.count).sum();
        assert_eq!(total, collector.record_count());

        // Digit normalization merges the two manifest failures
        let manifest = aggregations
            .iter()
            .find(|a| a.signature.contains("bad manifest"))
            .unwrap();
        assert_eq!(manifest.count, 2);
        assert_eq!(manifest.affected_modules, vec!["converter".to_string()]);
        assert!(manifest.common_cause.as_deref().unwrap().contains("CONV_PARSE"));
    }

    #[test]
    fn test_rate_metrics_and_breakdowns() {
        let collector = collector();
        for _ in 0..6 {
            collector.add_error(record("CONV_X", "converter", "boom"));
        }
        collector.add_error(ErrorRecord::new(
            "NET_TIMEOUT",
            ErrorKind::Network,
            RecordSeverity::Warning,
            "registry timeout",
            "publisher",
        ));

        let metrics = collector.error_rate_metrics();
        assert_eq!(metrics.total_errors, 7);
        assert_eq!(metrics.window_errors, 7);
        // 7 errors over a 5 minute window
        assert!((metrics.error_rate - 1.4).abs() < 0.01);
        assert_eq!(metrics.by_kind["conversion"], 6);
        assert_eq!(metrics.by_kind["network"], 1);
        assert_eq!(metrics.by_severity["warning"], 1);
        assert_eq!(metrics.by_module["converter"], 6);
        assert_eq!(metrics.trend, TrendDirection::Rising);
    }

    #[test]
    fn test_categorizations() {
        let collector = collector();
        collector.add_error(record("CONV_PARSE", "converter", "x"));
        collector.add_error(record("CONV_EMIT", "converter", "y"));
        collector.add_error(ErrorRecord::new(
            "IO_WRITE",
            ErrorKind::Io,
            RecordSeverity::Critical,
            "disk full",
            "repacker",
        ));

        let categorizations = collector.categorizations();
        assert_eq!(categorizations.len(), 2);
        let conv = categorizations
            .iter()
            .find(|c| c.category == ErrorKind::Conversion)
            .unwrap();
        assert_eq!(conv.frequency, 2);
        assert_eq!(conv.subcategory, "CONV");
        let io = categorizations
            .iter()
            .find(|c| c.category == ErrorKind::Io)
            .unwrap();
        assert_eq!(io.impact, RecordSeverity::Critical);
    }

    #[test]
    fn test_recovery_flow() {
        let collector = collector();
        let rec = record("CONV_X", "converter", "boom")
            .with_recovery_action(RecoveryAction::new("retry_stage", "re-run the stage"));
        let id = rec.id;
        collector.add_error(rec);
        collector.add_error(record("CONV_Y", "converter", "no actions"));

        let recoverable = collector.recoverable_errors();
        assert_eq!(recoverable.len(), 1);
        assert_eq!(recoverable[0].id, id);

        let outcome = collector.attempt_recovery(id);
        assert!(outcome.success);

        // Recovered records drop out of the recoverable view
        assert!(collector.recoverable_errors().is_empty());

        // A second attempt reports already-recovered but still counts
        let outcome = collector.attempt_recovery(id);
        assert!(!outcome.success);
        let records = collector.recoverable_errors();
        assert!(records.is_empty());
    }

    #[test]
    fn test_recovery_unknown_id() {
        let collector = collector();
        let outcome = collector.attempt_recovery(Uuid::new_v4());
        assert!(!outcome.success);
    }

    #[test]
    fn test_failing_runner_increments_without_recovering() {
        struct AlwaysFail;
        impl RecoveryRunner for AlwaysFail {
            fn run(
                &self,
                _record: &ErrorRecord,
                _action: &RecoveryAction,
            ) -> std::result::Result<String, String> {
                Err("remediation unavailable".to_string())
            }
        }

        let collector = EnhancedErrorCollector::with_runner(
            CollectorConfig::default(),
            Arc::new(AlwaysFail),
        );
        let rec = record("CONV_X", "converter", "boom")
            .with_recovery_action(RecoveryAction::new("retry_stage", "re-run"))
            .with_recovery_action(RecoveryAction::new("clear_scratch", "wipe temp"));
        let id = rec.id;
        collector.add_error(rec);

        assert!(!collector.attempt_recovery(id).success);
        assert!(!collector.attempt_recovery(id).success);

        let remaining = collector.recoverable_errors();
        assert_eq!(remaining[0].recovery_attempts, 2);
        assert!(!remaining[0].has_been_recovered);
        assert!(collector.recovery_failure_rate() > 0.99);

        // Actions exhausted: further attempts fail but never panic
        assert!(!collector.attempt_recovery(id).success);
    }

    #[test]
    fn test_system_health_rollup() {
        let collector = collector();

        // No reports at all: unknown
        let status = collector.system_health_status();
        assert_eq!(status.overall, HealthStatus::Unknown);
        assert_eq!(status.degradation_level, DegradationLevel::None);

        // Healthy-ish component (low rate) and a very noisy one
        collector.add_error(record("CONV_X", "quiet", "one-off"));
        for _ in 0..110 {
            collector.add_error(record("IO_WRITE", "noisy", "disk error"));
        }

        let status = collector.system_health_status();
        assert_eq!(status.overall, HealthStatus::Unhealthy);
        assert!(status.degradation_level >= DegradationLevel::Moderate);
        assert!(status
            .recommendations
            .iter()
            .any(|r| r.contains("noisy")));

        let noisy = status
            .components
            .iter()
            .find(|c| c.name == "noisy")
            .unwrap();
        assert_eq!(noisy.status, HealthStatus::Unhealthy);
        assert_eq!(noisy.error_count, 110);

        let quiet = status
            .components
            .iter()
            .find(|c| c.name == "quiet")
            .unwrap();
        assert_eq!(quiet.status, HealthStatus::Healthy);
    }

    #[test]
    fn test_concurrent_add_error() {
        let collector = Arc::new(collector());
        let mut handles = Vec::new();
        for t in 0..8 {
            let collector = collector.clone();
            handles.push(std::thread::spawn(move || {
                for i in 0..50 {
                    collector.add_error(record(
                        "CONV_X",
                        &format!("worker-{}", t),
                        &format!("failure {}", i),
                    ));
                }
            }));
        }
        for handle in handles {
            handle.join().unwrap();
        }

        assert_eq!(collector.record_count(), 100); // bounded at max_records
        let total: usize = collector.aggregations().iter().map(|a| a.count).sum();
        assert_eq!(total, 100);
    }
}
