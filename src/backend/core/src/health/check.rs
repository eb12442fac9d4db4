//! Health status types and per-component health reports.
//!
//! # Health Status Semantics
//!
//! - **Healthy**: Component is fully operational
//! - **Degraded**: Component is operational but with elevated error volume
//! - **Unhealthy**: Component is failing
//! - **Unknown**: No recent reports for the component

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

// ═══════════════════════════════════════════════════════════════════════════════
// Health Status
// ═══════════════════════════════════════════════════════════════════════════════

/// Health status of a component or the entire system.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    /// Component is fully operational
    Healthy,
    /// Component is operational but with degraded behavior
    Degraded,
    /// Component is not operational
    Unhealthy,
    /// No recent reports for the component
    Unknown,
}

impl HealthStatus {
    /// Check if the status is healthy.
    pub fn is_healthy(&self) -> bool {
        matches!(self, Self::Healthy)
    }

    /// Check if the status is at least partially operational.
    pub fn is_operational(&self) -> bool {
        matches!(self, Self::Healthy | Self::Degraded)
    }

    /// Combine two statuses, returning the worse one.
    ///
    /// `Unknown` is treated as better than any reported problem but worse
    /// than `Healthy`: a system with only unknown components is unknown, not
    /// healthy.
    pub fn combine(self, other: Self) -> Self {
        match (self, other) {
            (Self::Unhealthy, _) | (_, Self::Unhealthy) => Self::Unhealthy,
            (Self::Degraded, _) | (_, Self::Degraded) => Self::Degraded,
            (Self::Unknown, _) | (_, Self::Unknown) => Self::Unknown,
            _ => Self::Healthy,
        }
    }

    /// Severity rank for comparisons (higher is worse).
    pub fn rank(&self) -> u8 {
        match self {
            Self::Healthy => 0,
            Self::Unknown => 1,
            Self::Degraded => 2,
            Self::Unhealthy => 3,
        }
    }
}

impl Default for HealthStatus {
    fn default() -> Self {
        Self::Unknown
    }
}

impl std::fmt::Display for HealthStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Healthy => write!(f, "healthy"),
            Self::Degraded => write!(f, "degraded"),
            Self::Unhealthy => write!(f, "unhealthy"),
            Self::Unknown => write!(f, "unknown"),
        }
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Component Health
// ═══════════════════════════════════════════════════════════════════════════════

/// Health information for a single named component, derived from its recent
/// error volume and recovery activity.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ComponentHealth {
    /// Component name
    pub name: String,

    /// Health status
    pub status: HealthStatus,

    /// Total errors recorded for this component
    pub error_count: u64,

    /// Errors per minute over the rolling window
    pub error_rate: f64,

    /// Most recent error message, if any
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_error: Option<String>,

    /// Whether the component is running on a fallback path
    pub fallback_active: bool,

    /// Recovery attempts made for this component's errors
    pub recovery_attempts: u32,

    /// When the component last reported
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_seen: Option<DateTime<Utc>>,
}

impl ComponentHealth {
    /// Create a healthy component report.
    pub fn healthy(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            status: HealthStatus::Healthy,
            error_count: 0,
            error_rate: 0.0,
            last_error: None,
            fallback_active: false,
            recovery_attempts: 0,
            last_seen: Some(Utc::now()),
        }
    }

    /// Create a report with unknown status (no recent data).
    pub fn unknown(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            status: HealthStatus::Unknown,
            error_count: 0,
            error_rate: 0.0,
            last_error: None,
            fallback_active: false,
            recovery_attempts: 0,
            last_seen: None,
        }
    }

    /// Create an unhealthy component report.
    pub fn unhealthy(name: impl Into<String>) -> Self {
        Self {
            status: HealthStatus::Unhealthy,
            ..Self::healthy(name)
        }
    }

    /// Set the last error message.
    pub fn with_error(mut self, error: impl Into<String>) -> Self {
        self.last_error = Some(error.into());
        self
    }

    /// Mark the fallback path active.
    pub fn with_fallback_active(mut self) -> Self {
        self.fallback_active = true;
        self
    }

    /// Reclassify status from the given error rate against thresholds.
    pub fn classify_rate(&mut self, warning_rate: f64, critical_rate: f64) {
        self.status = if self.error_rate >= critical_rate {
            HealthStatus::Unhealthy
        } else if self.error_rate >= warning_rate {
            HealthStatus::Degraded
        } else {
            HealthStatus::Healthy
        };
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Health Report
// ═══════════════════════════════════════════════════════════════════════════════

/// Aggregated health over all reporting components.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthReport {
    /// Overall status (worst component wins)
    pub status: HealthStatus,

    /// Per-component health
    pub components: HashMap<String, ComponentHealth>,

    /// When the report was generated
    pub generated_at: DateTime<Utc>,
}

impl HealthReport {
    /// Create an empty report (overall status `Unknown`).
    pub fn new() -> Self {
        Self {
            status: HealthStatus::Unknown,
            components: HashMap::new(),
            generated_at: Utc::now(),
        }
    }

    /// Add a component, recomputing the overall status.
    pub fn with_component(mut self, component: ComponentHealth) -> Self {
        self.components.insert(component.name.clone(), component);
        self.recompute();
        self
    }

    /// Recompute the overall status as the worst component status.
    pub fn recompute(&mut self) {
        self.status = self
            .components
            .values()
            .map(|c| c.status)
            .max_by_key(|s| s.rank())
            .unwrap_or(HealthStatus::Unknown);
        self.generated_at = Utc::now();
    }

    /// Count components with the given status.
    pub fn count_with_status(&self, status: HealthStatus) -> usize {
        self.components
            .values()
            .filter(|c| c.status == status)
            .count()
    }
}

impl Default for HealthReport {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_combine() {
        assert_eq!(
            HealthStatus::Healthy.combine(HealthStatus::Degraded),
            HealthStatus::Degraded
        );
        assert_eq!(
            HealthStatus::Degraded.combine(HealthStatus::Unhealthy),
            HealthStatus::Unhealthy
        );
        assert_eq!(
            HealthStatus::Healthy.combine(HealthStatus::Healthy),
            HealthStatus::Healthy
        );
        assert_eq!(
            HealthStatus::Healthy.combine(HealthStatus::Unknown),
            HealthStatus::Unknown
        );
    }

    #[test]
    fn test_classify_rate() {
        let mut health = ComponentHealth::healthy("extractor");
        health.error_rate = 7.5;
        health.classify_rate(5.0, 20.0);
        assert_eq!(health.status, HealthStatus::Degraded);

        health.error_rate = 25.0;
        health.classify_rate(5.0, 20.0);
        assert_eq!(health.status, HealthStatus::Unhealthy);

        health.error_rate = 0.5;
        health.classify_rate(5.0, 20.0);
        assert_eq!(health.status, HealthStatus::Healthy);
    }

    #[test]
    fn test_report_worst_wins() {
        let report = HealthReport::new()
            .with_component(ComponentHealth::healthy("repacker"))
            .with_component(ComponentHealth::unhealthy("extractor"));
        assert_eq!(report.status, HealthStatus::Unhealthy);
        assert_eq!(report.count_with_status(HealthStatus::Healthy), 1);
    }

    #[test]
    fn test_empty_report_is_unknown() {
        let report = HealthReport::new();
        assert_eq!(report.status, HealthStatus::Unknown);
    }
}
