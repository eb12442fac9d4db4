//! Integration tests for error collection, monitoring, and alerting.
//!
//! Tests cover:
//! - Collector aggregation invariants under concurrent ingestion
//! - Threshold evaluation and alert deduplication across ticks
//! - Cooldown-window re-firing behavior
//! - Alert lifecycle (acknowledge/resolve) and statistics
//! - Monitoring facade summaries and rule cooldowns

use morph_core::config::{ConfigurationService, ThresholdPair};
use morph_core::health::HealthStatus;
use morph_core::monitoring::{
    AlertId, AlertRule, AlertSeverity, AlertType, ConversionQualityMetric, EnhancedErrorCollector,
    ErrorKind, ErrorMonitoringService, ErrorRecord, MonitoringService, PerformanceMetric,
    RecordSeverity, RecoveryAction, RuleOperator, SystemHealthMetric,
};
use std::sync::Arc;
use std::time::Duration;

fn conversion_error(module: &str, message: &str) -> ErrorRecord {
    ErrorRecord::new(
        "CONV_STAGE",
        ErrorKind::Conversion,
        RecordSeverity::Error,
        message,
        module,
    )
}

fn quiet_component_thresholds(c: &mut morph_core::config::Config) {
    c.error_monitor.enable_trend_analysis = false;
    c.error_monitor.enable_anomaly_detection = false;
    c.error_monitor.thresholds.component_failures = ThresholdPair {
        warning: 1e9,
        critical: 1e9,
    };
}

// ============================================================================
// Collector
// ============================================================================

#[tokio::test]
async fn test_aggregation_counts_stay_consistent_under_concurrency() {
    let configuration = ConfigurationService::with_defaults();
    let collector = Arc::new(EnhancedErrorCollector::new(
        configuration.current().collector,
    ));

    let mut handles = Vec::new();
    for worker in 0..8 {
        let collector = collector.clone();
        handles.push(tokio::spawn(async move {
            for i in 0..25 {
                collector.add_error(conversion_error(
                    &format!("stage-{}", worker % 3),
                    &format!("layer {} checksum mismatch", i),
                ));
            }
        }));
    }
    for handle in handles {
        handle.await.unwrap();
    }

    assert_eq!(collector.record_count(), 200);
    let total: usize = collector.aggregations().iter().map(|a| a.count).sum();
    assert_eq!(total, 200);

    // Digit normalization folds the 25 distinct layer indices together
    let aggregations = collector.aggregations();
    assert!(aggregations.len() <= 3);
    for aggregation in &aggregations {
        assert!(!aggregation.affected_modules.is_empty());
        assert!(aggregation.first_occurrence <= aggregation.last_occurrence);
    }
}

#[tokio::test]
async fn test_recoverable_errors_and_operator_recovery() {
    let configuration = ConfigurationService::with_defaults();
    let collector = EnhancedErrorCollector::new(configuration.current().collector);

    let record = conversion_error("repacker", "emblem write failed")
        .with_recovery_action(RecoveryAction::new("retry_write", "retry the artifact write"));
    let id = record.id;
    collector.add_error(record);
    collector.add_error(conversion_error("repacker", "no recovery actions here"));

    assert_eq!(collector.recoverable_errors().len(), 1);

    let outcome = collector.attempt_recovery(id);
    assert!(outcome.success);
    assert!(collector.recoverable_errors().is_empty());

    // Recovery is operator-invoked and never implicit: the failed path
    // increments the counter without self-retrying
    let outcome = collector.attempt_recovery(id);
    assert!(!outcome.success);
}

// ============================================================================
// Error Monitor
// ============================================================================

#[tokio::test]
async fn test_two_bursts_within_cooldown_yield_one_alert() {
    let configuration = ConfigurationService::with_defaults();
    configuration.update(|c| {
        quiet_component_thresholds(c);
        c.error_monitor.alert_cooldown = Duration::from_secs(300);
    });
    let collector = Arc::new(EnhancedErrorCollector::new(
        configuration.current().collector,
    ));
    let monitor = ErrorMonitoringService::new(collector.clone(), configuration.subscribe());

    // First qualifying burst
    for i in 0..150 {
        collector.add_error(conversion_error("converter", &format!("burst one {}", i)));
    }
    monitor.tick().await;
    assert_eq!(monitor.active_alerts().len(), 1);
    let first = monitor.active_alerts()[0].id;

    // Resolve, second burst within the cooldown: still exactly one alert
    assert!(monitor.resolve_alert(first));
    for i in 0..150 {
        collector.add_error(conversion_error("converter", &format!("burst two {}", i)));
    }
    monitor.tick().await;
    assert!(monitor.active_alerts().is_empty());
    assert_eq!(monitor.all_alerts().len(), 1);
}

#[tokio::test]
async fn test_burst_after_cooldown_yields_second_alert() {
    let configuration = ConfigurationService::with_defaults();
    configuration.update(|c| {
        quiet_component_thresholds(c);
        c.error_monitor.alert_cooldown = Duration::from_millis(50);
    });
    let collector = Arc::new(EnhancedErrorCollector::new(
        configuration.current().collector,
    ));
    let monitor = ErrorMonitoringService::new(collector.clone(), configuration.subscribe());

    for i in 0..150 {
        collector.add_error(conversion_error("converter", &format!("failure {}", i)));
    }
    monitor.tick().await;
    let first = monitor.active_alerts()[0].id;
    assert!(monitor.resolve_alert(first));

    tokio::time::sleep(Duration::from_millis(80)).await;
    monitor.tick().await;

    let all = monitor.all_alerts();
    assert_eq!(all.len(), 2);
    assert_eq!(monitor.active_alerts().len(), 1);
    assert_ne!(monitor.active_alerts()[0].id, first);
}

#[tokio::test]
async fn test_alert_lifecycle_round_trip() {
    let configuration = ConfigurationService::with_defaults();
    configuration.update(quiet_component_thresholds);
    let collector = Arc::new(EnhancedErrorCollector::new(
        configuration.current().collector,
    ));
    let monitor = ErrorMonitoringService::new(collector.clone(), configuration.subscribe());

    for i in 0..150 {
        collector.add_error(conversion_error("converter", &format!("failure {}", i)));
    }
    monitor.tick().await;

    let alert = &monitor.active_alerts()[0];
    assert_eq!(alert.alert_type, AlertType::ErrorRate);
    let id = alert.id;

    // Unknown ids are refused
    assert!(!monitor.acknowledge_alert(AlertId::new()));
    assert!(!monitor.resolve_alert(AlertId::new()));

    assert!(monitor.acknowledge_alert(id));
    assert!(monitor.resolve_alert(id));
    // Double-resolve is refused
    assert!(!monitor.resolve_alert(id));

    assert!(monitor.active_alerts().is_empty());
    assert_eq!(monitor.all_alerts().len(), 1);

    let stats = monitor.monitoring_statistics();
    assert_eq!(stats.total_alerts, 1);
    assert_eq!(stats.active_alerts, 0);
    assert_eq!(stats.by_severity["critical"], 1);
}

#[tokio::test]
async fn test_monitor_start_stop_idempotence_under_loop() {
    let configuration = ConfigurationService::with_defaults();
    configuration.update(|c| {
        quiet_component_thresholds(c);
        c.error_monitor.check_interval = Duration::from_millis(10);
    });
    let collector = Arc::new(EnhancedErrorCollector::new(
        configuration.current().collector,
    ));
    let monitor = ErrorMonitoringService::new(collector.clone(), configuration.subscribe());

    monitor.start_monitoring();
    monitor.start_monitoring();
    assert!(monitor.is_monitoring());

    // Let the loop evaluate a calm collector a few times
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert!(monitor.active_alerts().is_empty());

    monitor.stop_monitoring();
    monitor.stop_monitoring();
    assert!(!monitor.is_monitoring());
}

// ============================================================================
// Monitoring Facade
// ============================================================================

#[tokio::test]
async fn test_health_unknown_without_recent_metrics() {
    let configuration = ConfigurationService::with_defaults();
    let service = MonitoringService::new(configuration.subscribe());

    assert!(service.get_health_status().is_empty());

    service.record_system_health_metric(SystemHealthMetric {
        component: "extractor".into(),
        status: HealthStatus::Unhealthy,
        message: None,
    });
    service.record_system_health_metric(SystemHealthMetric {
        component: "repacker".into(),
        status: HealthStatus::Healthy,
        message: None,
    });

    let health = service.get_health_status();
    assert_eq!(health["extractor"], HealthStatus::Unhealthy);
    assert_eq!(health["repacker"], HealthStatus::Healthy);
}

#[tokio::test]
async fn test_rule_cooldown_on_facade_metrics() {
    let configuration = ConfigurationService::with_defaults();
    let service = MonitoringService::new(configuration.subscribe());

    service.set_alert_rule(
        AlertRule::new(
            "bad-quality",
            "Low conversion quality",
            "conversion.quality_score",
            RuleOperator::LessThan,
            60.0,
            AlertSeverity::Critical,
        )
        .with_cooldown(Duration::from_secs(300)),
    );

    for score in [20.0, 30.0, 40.0] {
        service.record_conversion_quality_metric(ConversionQualityMetric {
            conversion: "appimage→oci".into(),
            success: false,
            quality_score: score,
        });
    }

    // Cooldown holds it to a single firing
    assert_eq!(service.fired_alerts().len(), 1);

    // Unrelated metrics never trip the rule
    service.record_performance_metric(PerformanceMetric {
        operation: "manifest_parse".into(),
        duration_ms: 1.0,
        success: true,
    });
    assert_eq!(service.fired_alerts().len(), 1);
}
