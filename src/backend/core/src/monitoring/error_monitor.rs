//! Error monitoring service.
//!
//! Polls the error collector on a periodic tick, evaluates alert thresholds,
//! runs trend analysis and anomaly detection, and manages the alert
//! lifecycle. Every failure inside a tick is caught and logged; the loop
//! never dies to a bad tick, and alert-transport rejection never propagates.

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use dashmap::DashMap;
use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use tokio::sync::watch;

use crate::config::{Config, ErrorMonitorConfig, ThresholdPair};
use crate::health::HealthStatus;

use super::alerts::{Alert, AlertId, AlertSeverity, AlertTransport, AlertType, TracingAlertTransport};
use super::collector::EnhancedErrorCollector;

/// Aggregate statistics over all alerts seen by the monitor.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MonitoringStatistics {
    /// All alerts ever raised (within retention)
    pub total_alerts: usize,
    /// Currently unresolved alerts
    pub active_alerts: usize,
    /// Alert counts by type
    pub by_type: HashMap<String, usize>,
    /// Alert counts by severity
    pub by_severity: HashMap<String, usize>,
    /// Mean time from creation to resolution over resolved alerts (ms)
    pub average_resolution_time_ms: f64,
    /// Ticks that hit an internal failure
    pub tick_failures: u64,
}

/// Periodic evaluation of collector state against alert thresholds.
pub struct ErrorMonitoringService {
    collector: Arc<EnhancedErrorCollector>,
    transport: Arc<dyn AlertTransport>,
    config_rx: watch::Receiver<Config>,
    alerts: RwLock<Vec<Alert>>,
    /// Last firing time per alert type, for cooldown enforcement
    last_fired: DashMap<AlertType, DateTime<Utc>>,
    /// Error-rate samples for trend analysis, newest last
    rate_samples: Mutex<VecDeque<(DateTime<Utc>, f64)>>,
    /// Rolling baseline for anomaly detection
    baseline: Mutex<VecDeque<f64>>,
    running: AtomicBool,
    shutdown: Mutex<Option<watch::Sender<bool>>>,
    tick_failures: AtomicU64,
    /// Back-reference for the spawned monitoring loop
    self_ref: Weak<Self>,
}

impl ErrorMonitoringService {
    /// Create a monitor with the tracing transport.
    pub fn new(
        collector: Arc<EnhancedErrorCollector>,
        config_rx: watch::Receiver<Config>,
    ) -> Arc<Self> {
        Self::with_transport(collector, config_rx, Arc::new(TracingAlertTransport))
    }

    /// Create a monitor with a custom alert transport.
    pub fn with_transport(
        collector: Arc<EnhancedErrorCollector>,
        config_rx: watch::Receiver<Config>,
        transport: Arc<dyn AlertTransport>,
    ) -> Arc<Self> {
        Arc::new_cyclic(|self_ref| Self {
            collector,
            transport,
            config_rx,
            alerts: RwLock::new(Vec::new()),
            last_fired: DashMap::new(),
            rate_samples: Mutex::new(VecDeque::new()),
            baseline: Mutex::new(VecDeque::new()),
            running: AtomicBool::new(false),
            shutdown: Mutex::new(None),
            tick_failures: AtomicU64::new(0),
            self_ref: self_ref.clone(),
        })
    }

    /// Whether the monitoring loop is running.
    pub fn is_monitoring(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }

    /// Start the monitoring loop. Idempotent: a second start is a no-op.
    pub fn start_monitoring(&self) {
        let Some(monitor) = self.self_ref.upgrade() else {
            return;
        };
        if self.running.swap(true, Ordering::AcqRel) {
            tracing::debug!("Error monitor already running, start ignored");
            return;
        }

        let (shutdown_tx, mut shutdown_rx) = watch::channel(false);
        *self.shutdown.lock() = Some(shutdown_tx);

        tokio::spawn(async move {
            tracing::info!("Error monitoring started");
            loop {
                let interval = monitor.config_rx.borrow().error_monitor.check_interval;
                tokio::select! {
                    _ = shutdown_rx.changed() => {
                        if *shutdown_rx.borrow() {
                            break;
                        }
                    }
                    _ = tokio::time::sleep(interval) => {
                        monitor.tick().await;
                    }
                }
            }
            tracing::info!("Error monitoring stopped");
        });
    }

    /// Stop the monitoring loop. Idempotent: stopping a stopped monitor is a
    /// no-op.
    pub fn stop_monitoring(&self) {
        if !self.running.swap(false, Ordering::AcqRel) {
            return;
        }
        if let Some(shutdown) = self.shutdown.lock().take() {
            let _ = shutdown.send(true);
        }
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Tick
    // ─────────────────────────────────────────────────────────────────────────

    /// One evaluation pass. Public for direct invocation in embedded setups
    /// and tests; the loop calls it on every interval.
    pub async fn tick(&self) {
        let config = self.config_rx.borrow().error_monitor.clone();

        let metrics = self.collector.error_rate_metrics();
        let health = self.collector.system_health_status();

        // Threshold evaluation
        self.evaluate_threshold(
            AlertType::ErrorRate,
            metrics.error_rate,
            &config.thresholds.error_rate,
            &config,
            |value, level| format!("error rate {:.2}/min breached the {} threshold", value, level),
        )
        .await;

        self.evaluate_threshold(
            AlertType::ErrorRate,
            metrics.window_errors as f64,
            &config.thresholds.error_count,
            &config,
            |value, level| format!("{} errors in window breached the {} threshold", value, level),
        )
        .await;

        let unhealthy_components = health
            .components
            .iter()
            .filter(|c| c.status == HealthStatus::Unhealthy)
            .count();
        self.evaluate_threshold(
            AlertType::ComponentFailure,
            unhealthy_components as f64,
            &config.thresholds.component_failures,
            &config,
            |value, level| {
                format!("{} unhealthy components breached the {} threshold", value, level)
            },
        )
        .await;

        self.evaluate_threshold(
            AlertType::RecoveryFailure,
            self.collector.recovery_failure_rate(),
            &config.thresholds.recovery_failure_rate,
            &config,
            |value, level| {
                format!(
                    "recovery failure rate {:.0}% breached the {} threshold",
                    value * 100.0,
                    level
                )
            },
        )
        .await;

        // Trend analysis and anomaly detection feed off the same sample
        {
            let mut samples = self.rate_samples.lock();
            samples.push_back((Utc::now(), metrics.error_rate));
            while samples.len() > config.baseline_size.max(8) {
                samples.pop_front();
            }
        }

        if config.enable_trend_analysis {
            self.analyze_trend(&config).await;
        }
        if config.enable_anomaly_detection {
            self.detect_anomaly(metrics.error_rate, &config).await;
        }

        self.prune(&config);
    }

    /// Evaluate one quantity against its warning/critical pair and raise at
    /// the appropriate severity.
    async fn evaluate_threshold(
        &self,
        alert_type: AlertType,
        value: f64,
        thresholds: &ThresholdPair,
        config: &ErrorMonitorConfig,
        describe: impl Fn(f64, &str) -> String,
    ) {
        if value >= thresholds.critical {
            self.raise(alert_type, AlertSeverity::Critical, describe(value, "critical"), config)
                .await;
        } else if value >= thresholds.warning {
            self.raise(alert_type, AlertSeverity::Warning, describe(value, "warning"), config)
                .await;
        }
    }

    /// Trend analysis: compare older and newer halves of the sample window.
    /// Skips gracefully with insufficient points.
    async fn analyze_trend(&self, config: &ErrorMonitorConfig) {
        let (older_avg, newer_avg, len) = {
            let samples = self.rate_samples.lock();
            let len = samples.len();
            if len < 4 {
                (0.0, 0.0, len)
            } else {
                let mid = len / 2;
                let older: f64 = samples.iter().take(mid).map(|(_, r)| r).sum::<f64>() / mid as f64;
                let newer: f64 = samples.iter().skip(mid).map(|(_, r)| r).sum::<f64>()
                    / (len - mid) as f64;
                (older, newer, len)
            }
        };

        if len < 4 {
            tracing::debug!(samples = len, "Trend analysis skipped: insufficient points");
            return;
        }

        // Sustained doubling from a non-trivial base is worth a heads-up
        if newer_avg > older_avg * 2.0 && newer_avg >= config.thresholds.error_rate.warning / 2.0 {
            self.raise(
                AlertType::ErrorTrend,
                AlertSeverity::Warning,
                format!(
                    "error rate trending up: {:.2}/min vs {:.2}/min across the sample window",
                    newer_avg, older_avg
                ),
                config,
            )
            .await;
        }
    }

    /// Anomaly detection against a rolling mean/stddev baseline. Skips
    /// gracefully when no baseline has accumulated.
    async fn detect_anomaly(&self, current_rate: f64, config: &ErrorMonitorConfig) {
        let (baseline_len, verdict) = {
            let baseline = self.baseline.lock();
            if baseline.len() < 5 {
                (baseline.len(), None)
            } else {
                let n = baseline.len() as f64;
                let mean: f64 = baseline.iter().sum::<f64>() / n;
                let variance: f64 =
                    baseline.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / n;
                let stddev = variance.sqrt();
                let limit = mean + config.anomaly_sensitivity * stddev.max(0.1);
                let verdict = (current_rate > limit && current_rate > 1.0).then_some((mean, limit));
                (baseline.len(), verdict)
            }
        };

        if baseline_len < 5 {
            tracing::debug!("Anomaly detection skipped: no baseline yet");
        } else if let Some((mean, limit)) = verdict {
            self.raise(
                AlertType::Anomaly,
                AlertSeverity::Warning,
                format!(
                    "error rate {:.2}/min is anomalous (baseline mean {:.2}, limit {:.2})",
                    current_rate, mean, limit
                ),
                config,
            )
            .await;
        }

        let mut baseline = self.baseline.lock();
        baseline.push_back(current_rate);
        while baseline.len() > config.baseline_size {
            baseline.pop_front();
        }
    }

    /// Raise an alert unless deduplicated.
    ///
    /// Deduplication: no new alert of a type while an unresolved one of that
    /// type exists, and no re-fire before the cooldown (measured from the
    /// last firing) has elapsed.
    async fn raise(
        &self,
        alert_type: AlertType,
        severity: AlertSeverity,
        message: String,
        config: &ErrorMonitorConfig,
    ) {
        {
            let alerts = self.alerts.read();
            if alerts.iter().any(|a| a.alert_type == alert_type && a.is_active()) {
                return;
            }
        }
        if let Some(last) = self.last_fired.get(&alert_type) {
            let cooldown = ChronoDuration::from_std(config.alert_cooldown)
                .unwrap_or_else(|_| ChronoDuration::seconds(300));
            if Utc::now() - *last < cooldown {
                return;
            }
        }

        let alert = Alert::new(alert_type, severity, message);
        tracing::warn!(
            alert_id = %alert.id,
            alert_type = %alert_type,
            severity = %severity,
            message = %alert.message,
            "Alert raised"
        );
        metrics::counter!(
            "morph_alerts_raised_total",
            "type" => alert_type.to_string(),
            "severity" => severity.to_string(),
        )
        .increment(1);

        self.last_fired.insert(alert_type, alert.created_at);

        // Transport rejection is logged, never propagated out of the tick
        if let Err(e) = self.transport.deliver(&alert).await {
            self.tick_failures.fetch_add(1, Ordering::Relaxed);
            tracing::warn!(alert_id = %alert.id, error = %e, "Alert delivery failed");
        }

        self.alerts.write().push(alert);
    }

    /// Drop alerts and samples older than the retention period. Active
    /// alerts are never pruned.
    fn prune(&self, config: &ErrorMonitorConfig) {
        let retention = ChronoDuration::from_std(config.retention_period)
            .unwrap_or_else(|_| ChronoDuration::days(1));
        let cutoff = Utc::now() - retention;

        self.alerts
            .write()
            .retain(|a| a.is_active() || a.created_at >= cutoff);

        let mut samples = self.rate_samples.lock();
        while samples
            .front()
            .is_some_and(|(timestamp, _)| *timestamp < cutoff)
        {
            samples.pop_front();
        }
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Alert Lifecycle
    // ─────────────────────────────────────────────────────────────────────────

    /// Unresolved alerts.
    pub fn active_alerts(&self) -> Vec<Alert> {
        self.alerts
            .read()
            .iter()
            .filter(|a| a.is_active())
            .cloned()
            .collect()
    }

    /// All alerts within retention, including resolved ones.
    pub fn all_alerts(&self) -> Vec<Alert> {
        self.alerts.read().clone()
    }

    /// Acknowledge an alert. Unknown id → false.
    pub fn acknowledge_alert(&self, id: AlertId) -> bool {
        let mut alerts = self.alerts.write();
        match alerts.iter_mut().find(|a| a.id == id) {
            Some(alert) => {
                alert.acknowledge();
                true
            }
            None => false,
        }
    }

    /// Resolve an alert. Unknown id → false.
    pub fn resolve_alert(&self, id: AlertId) -> bool {
        let mut alerts = self.alerts.write();
        match alerts.iter_mut().find(|a| a.id == id && a.is_active()) {
            Some(alert) => {
                alert.resolve();
                true
            }
            None => false,
        }
    }

    /// Aggregate statistics over retained alerts.
    pub fn monitoring_statistics(&self) -> MonitoringStatistics {
        let alerts = self.alerts.read();
        let mut by_type: HashMap<String, usize> = HashMap::new();
        let mut by_severity: HashMap<String, usize> = HashMap::new();
        let mut resolution_total_ms = 0i64;
        let mut resolved = 0usize;

        for alert in alerts.iter() {
            *by_type.entry(alert.alert_type.to_string()).or_default() += 1;
            *by_severity.entry(alert.severity.to_string()).or_default() += 1;
            if let Some(resolution) = alert.resolution_time() {
                resolution_total_ms += resolution.num_milliseconds();
                resolved += 1;
            }
        }

        MonitoringStatistics {
            total_alerts: alerts.len(),
            active_alerts: alerts.iter().filter(|a| a.is_active()).count(),
            by_type,
            by_severity,
            average_resolution_time_ms: if resolved > 0 {
                resolution_total_ms as f64 / resolved as f64
            } else {
                0.0
            },
            tick_failures: self.tick_failures.load(Ordering::Relaxed),
        }
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Tests
// ═══════════════════════════════════════════════════════════════════════════════

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ConfigurationService;
    use crate::error::{ErrorCode, MorphError};
    use crate::monitoring::collector::{ErrorKind, ErrorRecord, RecordSeverity};
    use async_trait::async_trait;
    use std::time::Duration;

    fn flood(collector: &EnhancedErrorCollector, n: usize) {
        for i in 0..n {
            collector.add_error(ErrorRecord::new(
                "CONV_FAIL",
                ErrorKind::Conversion,
                RecordSeverity::Error,
                format!("failure {}", i),
                "converter",
            ));
        }
    }

    fn monitor_setup(
        mutate: impl FnOnce(&mut Config),
    ) -> (ConfigurationService, Arc<EnhancedErrorCollector>, Arc<ErrorMonitoringService>) {
        let configuration = ConfigurationService::with_defaults();
        configuration.update(mutate);
        let collector = Arc::new(EnhancedErrorCollector::new(
            configuration.current().collector,
        ));
        let monitor = ErrorMonitoringService::new(collector.clone(), configuration.subscribe());
        (configuration, collector, monitor)
    }

    #[tokio::test]
    async fn test_threshold_breach_raises_single_alert() {
        let (_cfg, collector, monitor) = monitor_setup(|c| {
            c.error_monitor.enable_trend_analysis = false;
            c.error_monitor.enable_anomaly_detection = false;
            c.error_monitor.thresholds.component_failures =
                ThresholdPair { warning: 1e9, critical: 1e9 };
        });

        // Default critical error rate is 20/min over 5 min => 100+ errors
        flood(&collector, 150);
        monitor.tick().await;

        let active = monitor.active_alerts();
        assert_eq!(active.len(), 1);
        assert_eq!(active[0].alert_type, AlertType::ErrorRate);
        assert_eq!(active[0].severity, AlertSeverity::Critical);

        // A second qualifying tick while the alert is unresolved: no dup
        monitor.tick().await;
        assert_eq!(monitor.active_alerts().len(), 1);
    }

    #[tokio::test]
    async fn test_cooldown_blocks_refire_until_elapsed() {
        let (_cfg, collector, monitor) = monitor_setup(|c| {
            c.error_monitor.enable_trend_analysis = false;
            c.error_monitor.enable_anomaly_detection = false;
            c.error_monitor.alert_cooldown = Duration::from_millis(100);
            c.error_monitor.thresholds.component_failures =
                ThresholdPair { warning: 1e9, critical: 1e9 };
        });

        flood(&collector, 150);
        monitor.tick().await;
        let first = monitor.active_alerts()[0].id;

        // Resolve, then re-breach inside the cooldown window: no new alert
        assert!(monitor.resolve_alert(first));
        monitor.tick().await;
        assert_eq!(monitor.active_alerts().len(), 0);

        // After the cooldown elapses, the breach fires again
        tokio::time::sleep(Duration::from_millis(120)).await;
        monitor.tick().await;
        assert_eq!(monitor.active_alerts().len(), 1);
        assert_ne!(monitor.active_alerts()[0].id, first);
    }

    #[tokio::test]
    async fn test_alert_lifecycle_and_statistics() {
        let (_cfg, collector, monitor) = monitor_setup(|c| {
            c.error_monitor.enable_trend_analysis = false;
            c.error_monitor.enable_anomaly_detection = false;
            c.error_monitor.thresholds.component_failures =
                ThresholdPair { warning: 1e9, critical: 1e9 };
        });

        flood(&collector, 150);
        monitor.tick().await;
        let id = monitor.active_alerts()[0].id;

        // Unknown ids
        assert!(!monitor.acknowledge_alert(AlertId::new()));
        assert!(!monitor.resolve_alert(AlertId::new()));

        assert!(monitor.acknowledge_alert(id));
        assert!(monitor.resolve_alert(id));

        // Resolved alerts leave the active list but stay in the full list
        assert!(monitor.active_alerts().is_empty());
        assert_eq!(monitor.all_alerts().len(), 1);
        assert!(monitor.all_alerts()[0].acknowledged);

        let stats = monitor.monitoring_statistics();
        assert_eq!(stats.total_alerts, 1);
        assert_eq!(stats.active_alerts, 0);
        assert_eq!(stats.by_type["error_rate"], 1);
        assert!(stats.average_resolution_time_ms >= 0.0);
    }

    #[tokio::test]
    async fn test_trend_and_anomaly_skip_gracefully_when_cold() {
        let (_cfg, _collector, monitor) = monitor_setup(|_| {});

        // No samples, no baseline: the tick must not raise or panic
        monitor.tick().await;
        assert!(monitor.active_alerts().is_empty());
    }

    #[tokio::test]
    async fn test_transport_failure_is_contained() {
        struct RejectingTransport;

        #[async_trait]
        impl AlertTransport for RejectingTransport {
            async fn deliver(&self, _alert: &Alert) -> crate::error::Result<()> {
                Err(MorphError::new(
                    ErrorCode::AlertTransportFailed,
                    "endpoint down",
                ))
            }
        }

        let configuration = ConfigurationService::with_defaults();
        configuration.update(|c| {
            c.error_monitor.enable_trend_analysis = false;
            c.error_monitor.enable_anomaly_detection = false;
            c.error_monitor.thresholds.component_failures =
                ThresholdPair { warning: 1e9, critical: 1e9 };
        });
        let collector = Arc::new(EnhancedErrorCollector::new(
            configuration.current().collector,
        ));
        let monitor = ErrorMonitoringService::with_transport(
            collector.clone(),
            configuration.subscribe(),
            Arc::new(RejectingTransport),
        );

        flood(&collector, 150);
        monitor.tick().await;

        // Alert recorded despite the transport failure
        assert_eq!(monitor.active_alerts().len(), 1);
        assert_eq!(monitor.monitoring_statistics().tick_failures, 1);
    }

    #[tokio::test]
    async fn test_start_stop_idempotent() {
        let (_cfg, _collector, monitor) = monitor_setup(|c| {
            c.error_monitor.check_interval = Duration::from_millis(10);
        });

        monitor.start_monitoring();
        monitor.start_monitoring(); // no-op
        assert!(monitor.is_monitoring());

        monitor.stop_monitoring();
        monitor.stop_monitoring(); // no-op
        assert!(!monitor.is_monitoring());
    }

    #[tokio::test]
    async fn test_component_failure_alert() {
        let (_cfg, collector, monitor) = monitor_setup(|c| {
            c.error_monitor.enable_trend_analysis = false;
            c.error_monitor.enable_anomaly_detection = false;
            // Keep the error-rate thresholds out of the way
            c.error_monitor.thresholds.error_rate.warning = 1e9;
            c.error_monitor.thresholds.error_rate.critical = 1e9;
            c.error_monitor.thresholds.error_count.warning = 1e9;
            c.error_monitor.thresholds.error_count.critical = 1e9;
        });

        // Push one component over the unhealthy rate (default 20/min * 5min)
        flood(&collector, 120);
        monitor.tick().await;

        let active = monitor.active_alerts();
        assert_eq!(active.len(), 1);
        assert_eq!(active[0].alert_type, AlertType::ComponentFailure);
    }
}
