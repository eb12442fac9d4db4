//! Generic monitoring façade.
//!
//! Independent of the conversion-specific error collector: records
//! security, performance, conversion-quality, and system-health metrics,
//! emits a matching event synchronously for real-time subscribers, evaluates
//! user-registered alert rules with per-rule cooldowns, and rolls up
//! range summaries.

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use dashmap::DashMap;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, VecDeque};
use tokio::sync::{broadcast, watch};

use crate::config::Config;
use crate::health::HealthStatus;

use super::alerts::{Alert, AlertRule, AlertSeverity, AlertType};

// ═══════════════════════════════════════════════════════════════════════════════
// Metric Records
// ═══════════════════════════════════════════════════════════════════════════════

/// A security-relevant observation from scanning/verification stages.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SecurityMetric {
    /// Threat classification (e.g. "embedded_secret", "known_cve")
    pub threat_type: String,
    /// Severity of the finding
    pub severity: AlertSeverity,
    /// Scan duration, when the metric closes a scan
    #[serde(skip_serializing_if = "Option::is_none")]
    pub scan_time_ms: Option<f64>,
}

/// Timing/outcome of one named operation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PerformanceMetric {
    /// Operation name (e.g. "manifest_parse", "layer_rewrite")
    pub operation: String,
    /// Wall-clock duration in milliseconds
    pub duration_ms: f64,
    /// Whether the operation succeeded
    pub success: bool,
}

/// Outcome quality of one conversion.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConversionQualityMetric {
    /// Conversion descriptor (e.g. "snap→oci")
    pub conversion: String,
    /// Whether the conversion succeeded
    pub success: bool,
    /// Quality score 0-100 from the validation stage
    pub quality_score: f64,
}

/// Health report for a named component.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SystemHealthMetric {
    /// Component name
    pub component: String,
    /// Reported status
    pub status: HealthStatus,
    /// Optional context
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

/// One recorded metric of any kind.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum MetricData {
    Security(SecurityMetric),
    Performance(PerformanceMetric),
    ConversionQuality(ConversionQualityMetric),
    SystemHealth(SystemHealthMetric),
}

/// A timestamped metric record.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetricRecord {
    pub timestamp: DateTime<Utc>,
    #[serde(flatten)]
    pub data: MetricData,
}

/// Event emitted synchronously when a metric is recorded.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "metric", rename_all = "snake_case")]
pub enum MetricEvent {
    Security(SecurityMetric),
    Performance(PerformanceMetric),
    ConversionQuality(ConversionQualityMetric),
    SystemHealth(SystemHealthMetric),
}

// ═══════════════════════════════════════════════════════════════════════════════
// Summaries
// ═══════════════════════════════════════════════════════════════════════════════

/// Per-operation rollup.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct OperationStats {
    pub count: usize,
    pub success_rate: f64,
    pub average_duration_ms: f64,
}

/// Rollup over a time range.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetricsSummary {
    pub from: DateTime<Utc>,
    pub to: DateTime<Utc>,
    /// Threat counts by type
    pub threats_by_type: HashMap<String, usize>,
    /// Average scan time over security metrics that carried one
    pub average_scan_time_ms: f64,
    /// Per-operation success rate and average duration
    pub operations: HashMap<String, OperationStats>,
    /// Conversion success rate over the range
    pub conversion_success_rate: f64,
    /// Average conversion quality score over the range
    pub average_quality_score: f64,
    /// Latest recently-reported status per component
    pub component_health: HashMap<String, HealthStatus>,
    /// Worst recently-reported component status (`unknown` if none recent)
    pub overall_health: HealthStatus,
}

// ═══════════════════════════════════════════════════════════════════════════════
// Monitoring Service
// ═══════════════════════════════════════════════════════════════════════════════

/// Generic metrics/alert-rule engine.
pub struct MonitoringService {
    config_rx: watch::Receiver<Config>,
    records: RwLock<VecDeque<MetricRecord>>,
    rules: DashMap<String, AlertRule>,
    rule_last_fired: DashMap<String, DateTime<Utc>>,
    fired: RwLock<Vec<Alert>>,
    events: broadcast::Sender<MetricEvent>,
}

impl MonitoringService {
    /// Create a monitoring service.
    pub fn new(config_rx: watch::Receiver<Config>) -> Self {
        let (events, _) = broadcast::channel(256);
        Self {
            config_rx,
            records: RwLock::new(VecDeque::new()),
            rules: DashMap::new(),
            rule_last_fired: DashMap::new(),
            fired: RwLock::new(Vec::new()),
            events,
        }
    }

    /// Subscribe to metric events.
    pub fn subscribe(&self) -> broadcast::Receiver<MetricEvent> {
        self.events.subscribe()
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Recording
    // ─────────────────────────────────────────────────────────────────────────

    /// Record a security metric.
    pub fn record_security_metric(&self, metric: SecurityMetric) {
        self.check_rules("security.threat_detected", 1.0);
        if let Some(scan_time) = metric.scan_time_ms {
            self.check_rules("security.scan_time_ms", scan_time);
        }
        self.push(MetricData::Security(metric.clone()));
        let _ = self.events.send(MetricEvent::Security(metric));
    }

    /// Record a performance metric.
    pub fn record_performance_metric(&self, metric: PerformanceMetric) {
        self.check_rules("performance.duration_ms", metric.duration_ms);
        self.push(MetricData::Performance(metric.clone()));
        let _ = self.events.send(MetricEvent::Performance(metric));
    }

    /// Record a conversion quality metric.
    pub fn record_conversion_quality_metric(&self, metric: ConversionQualityMetric) {
        self.check_rules("conversion.quality_score", metric.quality_score);
        self.push(MetricData::ConversionQuality(metric.clone()));
        let _ = self.events.send(MetricEvent::ConversionQuality(metric));
    }

    /// Record a system health metric.
    pub fn record_system_health_metric(&self, metric: SystemHealthMetric) {
        self.check_rules("health.status_rank", metric.status.rank() as f64);
        self.push(MetricData::SystemHealth(metric.clone()));
        let _ = self.events.send(MetricEvent::SystemHealth(metric));
    }

    fn push(&self, data: MetricData) {
        self.records.write().push_back(MetricRecord {
            timestamp: Utc::now(),
            data,
        });
    }

    /// Number of retained metric records.
    pub fn record_count(&self) -> usize {
        self.records.read().len()
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Alert Rules
    // ─────────────────────────────────────────────────────────────────────────

    /// Register or update an alert rule.
    pub fn set_alert_rule(&self, rule: AlertRule) {
        tracing::info!(rule_id = %rule.id, metric = %rule.metric, "Alert rule registered");
        self.rules.insert(rule.id.clone(), rule);
    }

    /// Remove an alert rule. Returns whether it existed.
    pub fn remove_alert_rule(&self, id: &str) -> bool {
        self.rules.remove(id).is_some()
    }

    /// Alerts fired by rules, newest last.
    pub fn fired_alerts(&self) -> Vec<Alert> {
        self.fired.read().clone()
    }

    /// Evaluate enabled rules matching `metric` against `value`, honoring
    /// per-rule cooldowns.
    fn check_rules(&self, metric: &str, value: f64) {
        for rule in self.rules.iter() {
            if rule.metric != metric || !rule.is_satisfied(value) {
                continue;
            }

            if let Some(last) = self.rule_last_fired.get(&rule.id) {
                let cooldown = ChronoDuration::from_std(rule.cooldown)
                    .unwrap_or_else(|_| ChronoDuration::seconds(300));
                if Utc::now() - *last < cooldown {
                    continue;
                }
            }

            let alert = Alert::new(
                AlertType::Rule,
                rule.severity,
                format!(
                    "rule '{}' fired: {} = {:.2} (threshold {:.2})",
                    rule.name, metric, value, rule.threshold
                ),
            )
            .with_source(rule.id.clone());

            tracing::warn!(
                rule_id = %rule.id,
                metric = metric,
                value = value,
                threshold = rule.threshold,
                "Alert rule fired"
            );
            self.rule_last_fired.insert(rule.id.clone(), alert.created_at);
            self.fired.write().push(alert);
        }
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Summary
    // ─────────────────────────────────────────────────────────────────────────

    /// Roll up all metrics recorded within `[from, to]`.
    ///
    /// Component health considers only reports within the configured recent
    /// window (relative to now): components silent for longer drop to
    /// `unknown`, and with no recent reports at all the overall health is
    /// `unknown`.
    pub fn metrics_summary(&self, from: DateTime<Utc>, to: DateTime<Utc>) -> MetricsSummary {
        let recent_window = ChronoDuration::from_std(self.config_rx.borrow().monitoring.recent_window)
            .unwrap_or_else(|_| ChronoDuration::seconds(300));
        let recent_cutoff = Utc::now() - recent_window;

        let records = self.records.read();

        let mut threats_by_type: HashMap<String, usize> = HashMap::new();
        let mut scan_time_total = 0.0f64;
        let mut scan_time_count = 0usize;

        struct OpAccum {
            count: usize,
            successes: usize,
            duration_total: f64,
        }
        let mut operations: HashMap<String, OpAccum> = HashMap::new();

        let mut conversions = 0usize;
        let mut conversion_successes = 0usize;
        let mut quality_total = 0.0f64;

        // (timestamp, status) of the latest recent report per component
        let mut component_latest: HashMap<String, (DateTime<Utc>, HealthStatus)> = HashMap::new();

        for record in records.iter() {
            if record.timestamp < from || record.timestamp > to {
                continue;
            }
            match &record.data {
                MetricData::Security(m) => {
                    *threats_by_type.entry(m.threat_type.clone()).or_default() += 1;
                    if let Some(scan_time) = m.scan_time_ms {
                        scan_time_total += scan_time;
                        scan_time_count += 1;
                    }
                }
                MetricData::Performance(m) => {
                    let accum = operations.entry(m.operation.clone()).or_insert(OpAccum {
                        count: 0,
                        successes: 0,
                        duration_total: 0.0,
                    });
                    accum.count += 1;
                    if m.success {
                        accum.successes += 1;
                    }
                    accum.duration_total += m.duration_ms;
                }
                MetricData::ConversionQuality(m) => {
                    conversions += 1;
                    if m.success {
                        conversion_successes += 1;
                    }
                    quality_total += m.quality_score;
                }
                MetricData::SystemHealth(m) => {
                    if record.timestamp >= recent_cutoff {
                        let entry = component_latest
                            .entry(m.component.clone())
                            .or_insert((record.timestamp, m.status));
                        if record.timestamp >= entry.0 {
                            *entry = (record.timestamp, m.status);
                        }
                    }
                }
            }
        }

        let component_health: HashMap<String, HealthStatus> = component_latest
            .iter()
            .map(|(name, (_, status))| (name.clone(), *status))
            .collect();

        let overall_health = component_health
            .values()
            .copied()
            .max_by_key(|s| s.rank())
            .unwrap_or(HealthStatus::Unknown);

        MetricsSummary {
            from,
            to,
            threats_by_type,
            average_scan_time_ms: if scan_time_count > 0 {
                scan_time_total / scan_time_count as f64
            } else {
                0.0
            },
            operations: operations
                .into_iter()
                .map(|(name, accum)| {
                    (
                        name,
                        OperationStats {
                            count: accum.count,
                            success_rate: accum.successes as f64 / accum.count as f64,
                            average_duration_ms: accum.duration_total / accum.count as f64,
                        },
                    )
                })
                .collect(),
            conversion_success_rate: if conversions > 0 {
                conversion_successes as f64 / conversions as f64
            } else {
                0.0
            },
            average_quality_score: if conversions > 0 {
                quality_total / conversions as f64
            } else {
                0.0
            },
            component_health,
            overall_health,
        }
    }

    /// Latest recently-reported health per component (convenience over
    /// `metrics_summary`).
    pub fn get_health_status(&self) -> HashMap<String, HealthStatus> {
        let now = Utc::now();
        self.metrics_summary(now - ChronoDuration::days(365), now)
            .component_health
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Retention
    // ─────────────────────────────────────────────────────────────────────────

    /// Drop metric records past the retention window. Returns the number
    /// removed.
    pub fn cleanup_old_metrics(&self) -> usize {
        let retention = ChronoDuration::from_std(self.config_rx.borrow().monitoring.retention_period)
            .unwrap_or_else(|_| ChronoDuration::days(1));
        let cutoff = Utc::now() - retention;

        let mut records = self.records.write();
        let before = records.len();
        while records.front().is_some_and(|r| r.timestamp < cutoff) {
            records.pop_front();
        }
        let removed = before - records.len();
        if removed > 0 {
            tracing::debug!(removed, "Old metric records pruned");
        }
        removed
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Tests
// ═══════════════════════════════════════════════════════════════════════════════
