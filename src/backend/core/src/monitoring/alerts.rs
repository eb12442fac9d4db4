//! Alert model, rules, and delivery transports.
//!
//! Alerts follow the lifecycle active → (acknowledged) → resolved. A
//! cooldown per alert type/rule limits noise: the same condition cannot
//! re-fire while an unresolved alert of that type exists or before the
//! cooldown window has elapsed.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;
use uuid::Uuid;

use crate::error::{ErrorCode, MorphError, Result};

// ═══════════════════════════════════════════════════════════════════════════════
// Alert
// ═══════════════════════════════════════════════════════════════════════════════

/// Unique identifier for an alert.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct AlertId(pub Uuid);

impl AlertId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for AlertId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for AlertId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// What raised the alert.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AlertType {
    /// Error rate threshold breach
    ErrorRate,
    /// One or more components reported unhealthy
    ComponentFailure,
    /// Recovery attempts are failing too often
    RecoveryFailure,
    /// Error rate trending upward
    ErrorTrend,
    /// Error rate anomalous against the rolling baseline
    Anomaly,
    /// A user-registered metric rule fired
    Rule,
}

impl fmt::Display for AlertType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ErrorRate => write!(f, "error_rate"),
            Self::ComponentFailure => write!(f, "component_failure"),
            Self::RecoveryFailure => write!(f, "recovery_failure"),
            Self::ErrorTrend => write!(f, "error_trend"),
            Self::Anomaly => write!(f, "anomaly"),
            Self::Rule => write!(f, "rule"),
        }
    }
}

/// Alert severity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AlertSeverity {
    Info,
    Warning,
    Critical,
}

impl fmt::Display for AlertSeverity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Info => write!(f, "info"),
            Self::Warning => write!(f, "warning"),
            Self::Critical => write!(f, "critical"),
        }
    }
}

/// A raised rule/threshold breach.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Alert {
    /// Unique alert identifier
    pub id: AlertId,
    /// What raised the alert
    pub alert_type: AlertType,
    /// Severity of the breach
    pub severity: AlertSeverity,
    /// Human-readable description
    pub message: String,
    /// Origin detail: rule id, component name, or similar
    #[serde(skip_serializing_if = "Option::is_none")]
    pub source: Option<String>,
    /// When the alert was raised
    pub created_at: DateTime<Utc>,
    /// Whether an operator has acknowledged it
    pub acknowledged: bool,
    /// When the alert was resolved (None while active)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub resolved_at: Option<DateTime<Utc>>,
}

impl Alert {
    /// Create a new active alert.
    pub fn new(alert_type: AlertType, severity: AlertSeverity, message: impl Into<String>) -> Self {
        Self {
            id: AlertId::new(),
            alert_type,
            severity,
            message: message.into(),
            source: None,
            created_at: Utc::now(),
            acknowledged: false,
            resolved_at: None,
        }
    }

    /// Attach an origin detail.
    pub fn with_source(mut self, source: impl Into<String>) -> Self {
        self.source = Some(source.into());
        self
    }

    /// Whether the alert is still active (not resolved).
    pub fn is_active(&self) -> bool {
        self.resolved_at.is_none()
    }

    /// Mark acknowledged.
    pub fn acknowledge(&mut self) {
        self.acknowledged = true;
    }

    /// Mark resolved.
    pub fn resolve(&mut self) {
        self.resolved_at = Some(Utc::now());
    }

    /// Time from creation to resolution, if resolved.
    pub fn resolution_time(&self) -> Option<chrono::Duration> {
        self.resolved_at.map(|resolved| resolved - self.created_at)
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Alert Rules
// ═══════════════════════════════════════════════════════════════════════════════

/// Comparison operator for rule conditions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RuleOperator {
    GreaterThan,
    GreaterOrEqual,
    LessThan,
    LessOrEqual,
}

impl RuleOperator {
    /// Evaluate `value <op> threshold`.
    pub fn evaluate(&self, value: f64, threshold: f64) -> bool {
        match self {
            Self::GreaterThan => value > threshold,
            Self::GreaterOrEqual => value >= threshold,
            Self::LessThan => value < threshold,
            Self::LessOrEqual => value <= threshold,
        }
    }
}

/// A user-registered alert rule evaluated against recorded metrics.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AlertRule {
    /// Stable rule identifier
    pub id: String,
    /// Display name
    pub name: String,
    /// Metric name the rule applies to (e.g. `performance.duration_ms`)
    pub metric: String,
    /// Comparison operator
    pub operator: RuleOperator,
    /// Threshold value
    pub threshold: f64,
    /// Observation window the rule condition refers to
    #[serde(with = "humantime_serde")]
    pub time_window: Duration,
    /// Severity of alerts fired by this rule
    pub severity: AlertSeverity,
    /// Whether the rule is evaluated at all
    pub enabled: bool,
    /// Minimum interval between successive firings
    #[serde(with = "humantime_serde")]
    pub cooldown: Duration,
}

impl AlertRule {
    /// Create an enabled rule with a 5 minute window and cooldown.
    pub fn new(
        id: impl Into<String>,
        name: impl Into<String>,
        metric: impl Into<String>,
        operator: RuleOperator,
        threshold: f64,
        severity: AlertSeverity,
    ) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            metric: metric.into(),
            operator,
            threshold,
            time_window: Duration::from_secs(300),
            severity,
            enabled: true,
            cooldown: Duration::from_secs(300),
        }
    }

    /// Set the cooldown.
    pub fn with_cooldown(mut self, cooldown: Duration) -> Self {
        self.cooldown = cooldown;
        self
    }

    /// Disable the rule.
    pub fn disabled(mut self) -> Self {
        self.enabled = false;
        self
    }

    /// Whether a value for this rule's metric satisfies the condition.
    pub fn is_satisfied(&self, value: f64) -> bool {
        self.enabled && self.operator.evaluate(value, self.threshold)
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Alert Transport
// ═══════════════════════════════════════════════════════════════════════════════

/// Delivery channel for raised alerts.
///
/// Transport failure must never be fatal to a monitoring tick: callers catch
/// and log delivery errors.
#[async_trait]
pub trait AlertTransport: Send + Sync {
    /// Deliver an alert notification.
    async fn deliver(&self, alert: &Alert) -> Result<()>;
}

/// Transport that writes alerts to the log stream.
#[derive(Debug, Default)]
pub struct TracingAlertTransport;

#[async_trait]
impl AlertTransport for TracingAlertTransport {
    async fn deliver(&self, alert: &Alert) -> Result<()> {
        match alert.severity {
            AlertSeverity::Critical => tracing::error!(
                alert_id = %alert.id,
                alert_type = %alert.alert_type,
                message = %alert.message,
                "ALERT"
            ),
            AlertSeverity::Warning => tracing::warn!(
                alert_id = %alert.id,
                alert_type = %alert.alert_type,
                message = %alert.message,
                "ALERT"
            ),
            AlertSeverity::Info => tracing::info!(
                alert_id = %alert.id,
                alert_type = %alert.alert_type,
                message = %alert.message,
                "ALERT"
            ),
        }
        Ok(())
    }
}

/// Transport that POSTs alerts as JSON to a webhook endpoint.
pub struct WebhookAlertTransport {
    client: reqwest::Client,
    url: String,
}

impl WebhookAlertTransport {
    /// Create a webhook transport targeting the given URL.
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            url: url.into(),
        }
    }
}

#[async_trait]
impl AlertTransport for WebhookAlertTransport {
    async fn deliver(&self, alert: &Alert) -> Result<()> {
        let response = self
            .client
            .post(&self.url)
            .json(alert)
            .send()
            .await
            .map_err(|e| {
                MorphError::with_internal(
                    ErrorCode::AlertTransportFailed,
                    "Failed to deliver alert webhook",
                    e.to_string(),
                )
            })?;

        if !response.status().is_success() {
            return Err(MorphError::with_internal(
                ErrorCode::AlertTransportFailed,
                "Alert webhook rejected",
                format!("status {}", response.status()),
            ));
        }
        Ok(())
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Tests
// ═══════════════════════════════════════════════════════════════════════════════

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_alert_lifecycle() {
        let mut alert = Alert::new(AlertType::ErrorRate, AlertSeverity::Warning, "rate high");
        assert!(alert.is_active());
        assert!(!alert.acknowledged);

        alert.acknowledge();
        assert!(alert.acknowledged);
        assert!(alert.is_active());

        alert.resolve();
        assert!(!alert.is_active());
        assert!(alert.resolution_time().is_some());
    }

    #[test]
    fn test_rule_operators() {
        assert!(RuleOperator::GreaterThan.evaluate(2.0, 1.0));
        assert!(!RuleOperator::GreaterThan.evaluate(1.0, 1.0));
        assert!(RuleOperator::GreaterOrEqual.evaluate(1.0, 1.0));
        assert!(RuleOperator::LessThan.evaluate(0.5, 1.0));
        assert!(RuleOperator::LessOrEqual.evaluate(1.0, 1.0));
    }

    #[test]
    fn test_rule_satisfaction() {
        let rule = AlertRule::new(
            "slow-ops",
            "Slow operations",
            "performance.duration_ms",
            RuleOperator::GreaterThan,
            1000.0,
            AlertSeverity::Warning,
        );
        assert!(rule.is_satisfied(1500.0));
        assert!(!rule.is_satisfied(500.0));

        let disabled = rule.disabled();
        assert!(!disabled.is_satisfied(1500.0));
    }

    #[tokio::test]
    async fn test_tracing_transport_never_fails() {
        let transport = TracingAlertTransport;
        let alert = Alert::new(AlertType::Anomaly, AlertSeverity::Critical, "spike");
        assert!(transport.deliver(&alert).await.is_ok());
    }
}
