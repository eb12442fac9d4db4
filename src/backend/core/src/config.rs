//! Configuration management.
//!
//! One explicit struct per component, with named, serde-defaulted fields.
//! `ConfigurationService` exposes live values over a watch channel so the
//! periodic loops (dispatch, allocation, monitoring) re-read current values
//! each tick instead of caching them at startup.

use serde::{Deserialize, Serialize};
use std::time::Duration;
use tokio::sync::watch;

/// Main application configuration.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct Config {
    /// Job queue configuration
    #[serde(default)]
    pub queue: QueueConfig,

    /// Status store configuration
    #[serde(default)]
    pub store: StoreConfig,

    /// Worker pool configuration
    #[serde(default)]
    pub pool: PoolConfig,

    /// Resource allocator configuration
    #[serde(default)]
    pub allocator: AllocatorConfig,

    /// Error collector configuration
    #[serde(default)]
    pub collector: CollectorConfig,

    /// Error monitoring configuration
    #[serde(default)]
    pub error_monitor: ErrorMonitorConfig,

    /// Generic monitoring facade configuration
    #[serde(default)]
    pub monitoring: MonitoringConfig,

    /// Observability configuration
    #[serde(default)]
    pub observability: ObservabilityConfig,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct QueueConfig {
    /// Maximum number of pending jobs (0 = unlimited)
    #[serde(default = "default_max_queue_size")]
    pub max_queue_size: usize,

    /// How often the dispatch loop scans for dispatchable jobs
    #[serde(with = "humantime_serde", default = "default_dispatch_interval")]
    pub dispatch_interval: Duration,

    /// Default maximum retries for a job that does not specify one
    #[serde(default = "default_max_retries")]
    pub default_max_retries: u32,

    /// Delay before a recoverable failure is re-queued
    #[serde(with = "humantime_serde", default = "default_retry_delay")]
    pub retry_delay: Duration,

    /// Default per-job execution timeout
    #[serde(with = "humantime_serde", default = "default_job_timeout")]
    pub default_job_timeout: Duration,

    /// Per-job history entry cap, oldest pruned first
    #[serde(default = "default_max_history_entries")]
    pub max_history_entries: usize,

    /// Grace period before a pending job whose resource requirements exceed
    /// the configured budget ceiling is flagged as unsatisfiable
    #[serde(with = "humantime_serde", default = "default_resource_warning_grace")]
    pub resource_warning_grace: Duration,

    /// Timeout for draining in-flight jobs at shutdown
    #[serde(with = "humantime_serde", default = "default_drain_timeout")]
    pub drain_timeout: Duration,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            max_queue_size: default_max_queue_size(),
            dispatch_interval: default_dispatch_interval(),
            default_max_retries: default_max_retries(),
            retry_delay: default_retry_delay(),
            default_job_timeout: default_job_timeout(),
            max_history_entries: default_max_history_entries(),
            resource_warning_grace: default_resource_warning_grace(),
            drain_timeout: default_drain_timeout(),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct StoreConfig {
    /// Redis connection URL (used by the Redis status backend)
    #[serde(default = "default_redis_url")]
    pub redis_url: String,

    /// Key prefix for store records in Redis
    #[serde(default = "default_store_prefix")]
    pub key_prefix: String,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            redis_url: default_redis_url(),
            key_prefix: default_store_prefix(),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct PoolConfig {
    /// Maximum concurrent job executions
    #[serde(default = "default_max_workers")]
    pub max_workers: usize,

    /// Pool name (for logging/metrics)
    #[serde(default = "default_pool_name")]
    pub name: String,

    /// Total memory budget for running jobs (megabytes)
    #[serde(default = "default_memory_budget_mb")]
    pub memory_budget_mb: u64,

    /// Total CPU budget for running jobs (cores)
    #[serde(default = "default_cpu_budget_cores")]
    pub cpu_budget_cores: f64,

    /// Total disk budget for running jobs (megabytes)
    #[serde(default = "default_disk_budget_mb")]
    pub disk_budget_mb: u64,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            max_workers: default_max_workers(),
            name: default_pool_name(),
            memory_budget_mb: default_memory_budget_mb(),
            cpu_budget_cores: default_cpu_budget_cores(),
            disk_budget_mb: default_disk_budget_mb(),
        }
    }
}

/// Strategy used by the allocator to compute the worker target.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ScalingStrategy {
    /// React to instantaneous queue pressure
    Adaptive,
    /// Require pressure to persist for `sustain_ticks` consecutive ticks
    Conservative,
    /// Pin the pool at `max_workers`
    Fixed,
}

impl Default for ScalingStrategy {
    fn default() -> Self {
        Self::Adaptive
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct AllocatorConfig {
    /// Interval between allocator ticks
    #[serde(with = "humantime_serde", default = "default_check_interval")]
    pub check_interval: Duration,

    /// Lower bound for the worker target
    #[serde(default = "default_min_workers")]
    pub min_workers: usize,

    /// Upper bound for the worker target
    #[serde(default = "default_max_workers")]
    pub max_workers: usize,

    /// Scaling strategy
    #[serde(default)]
    pub strategy: ScalingStrategy,

    /// Queue depth per worker above which the pool grows
    #[serde(default = "default_scale_up_pressure")]
    pub scale_up_pressure: f64,

    /// Utilization below which the pool shrinks
    #[serde(default = "default_scale_down_utilization")]
    pub scale_down_utilization: f64,

    /// Consecutive ticks of sustained pressure required by the
    /// conservative strategy
    #[serde(default = "default_sustain_ticks")]
    pub sustain_ticks: u32,
}

impl Default for AllocatorConfig {
    fn default() -> Self {
        Self {
            check_interval: default_check_interval(),
            min_workers: default_min_workers(),
            max_workers: default_max_workers(),
            strategy: ScalingStrategy::default(),
            scale_up_pressure: default_scale_up_pressure(),
            scale_down_utilization: default_scale_down_utilization(),
            sustain_ticks: default_sustain_ticks(),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct CollectorConfig {
    /// Maximum retained error records (oldest evicted first)
    #[serde(default = "default_max_error_records")]
    pub max_records: usize,

    /// Rolling window for error-rate calculation
    #[serde(with = "humantime_serde", default = "default_rate_window")]
    pub rate_window: Duration,

    /// Errors/minute that marks a component degraded
    #[serde(default = "default_warning_error_rate")]
    pub warning_error_rate: f64,

    /// Errors/minute that marks a component unhealthy
    #[serde(default = "default_critical_error_rate")]
    pub critical_error_rate: f64,
}

impl Default for CollectorConfig {
    fn default() -> Self {
        Self {
            max_records: default_max_error_records(),
            rate_window: default_rate_window(),
            warning_error_rate: default_warning_error_rate(),
            critical_error_rate: default_critical_error_rate(),
        }
    }
}

/// Warning/critical pair for one monitored quantity.
#[derive(Debug, Clone, Copy, Deserialize, Serialize)]
pub struct ThresholdPair {
    pub warning: f64,
    pub critical: f64,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct AlertThresholds {
    /// Errors per minute
    #[serde(default = "default_error_rate_thresholds")]
    pub error_rate: ThresholdPair,

    /// Total errors within the rolling window
    #[serde(default = "default_error_count_thresholds")]
    pub error_count: ThresholdPair,

    /// Number of unhealthy components
    #[serde(default = "default_component_failure_thresholds")]
    pub component_failures: ThresholdPair,

    /// Fraction of recovery attempts that failed
    #[serde(default = "default_recovery_failure_thresholds")]
    pub recovery_failure_rate: ThresholdPair,
}

impl Default for AlertThresholds {
    fn default() -> Self {
        Self {
            error_rate: default_error_rate_thresholds(),
            error_count: default_error_count_thresholds(),
            component_failures: default_component_failure_thresholds(),
            recovery_failure_rate: default_recovery_failure_thresholds(),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ErrorMonitorConfig {
    /// Interval between monitoring ticks
    #[serde(with = "humantime_serde", default = "default_monitor_interval")]
    pub check_interval: Duration,

    /// Alert thresholds
    #[serde(default)]
    pub thresholds: AlertThresholds,

    /// Enable trend analysis each tick
    #[serde(default = "default_true")]
    pub enable_trend_analysis: bool,

    /// Enable anomaly detection each tick
    #[serde(default = "default_true")]
    pub enable_anomaly_detection: bool,

    /// Standard deviations above the baseline mean that counts as an anomaly
    #[serde(default = "default_anomaly_sensitivity")]
    pub anomaly_sensitivity: f64,

    /// Samples kept in the anomaly baseline
    #[serde(default = "default_baseline_size")]
    pub baseline_size: usize,

    /// Minimum interval between successive alerts of the same type
    #[serde(with = "humantime_serde", default = "default_alert_cooldown")]
    pub alert_cooldown: Duration,

    /// Maximum age of retained alerts and samples
    #[serde(with = "humantime_serde", default = "default_retention_period")]
    pub retention_period: Duration,
}

impl Default for ErrorMonitorConfig {
    fn default() -> Self {
        Self {
            check_interval: default_monitor_interval(),
            thresholds: AlertThresholds::default(),
            enable_trend_analysis: default_true(),
            enable_anomaly_detection: default_true(),
            anomaly_sensitivity: default_anomaly_sensitivity(),
            baseline_size: default_baseline_size(),
            alert_cooldown: default_alert_cooldown(),
            retention_period: default_retention_period(),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct MonitoringConfig {
    /// Maximum age of retained metric records
    #[serde(with = "humantime_serde", default = "default_metric_retention")]
    pub retention_period: Duration,

    /// Window within which a component health report counts as recent
    #[serde(with = "humantime_serde", default = "default_recent_window")]
    pub recent_window: Duration,
}

impl Default for MonitoringConfig {
    fn default() -> Self {
        Self {
            retention_period: default_metric_retention(),
            recent_window: default_recent_window(),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ObservabilityConfig {
    /// Log level
    #[serde(default = "default_log_level")]
    pub log_level: String,

    /// Enable JSON logging
    #[serde(default = "default_json_logging")]
    pub json_logging: bool,

    /// Prometheus exporter endpoint (disabled when absent)
    pub prometheus_endpoint: Option<String>,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
            json_logging: default_json_logging(),
            prometheus_endpoint: None,
        }
    }
}

// Default value functions
fn default_max_queue_size() -> usize { 10_000 }
fn default_dispatch_interval() -> Duration { Duration::from_millis(100) }
fn default_max_retries() -> u32 { 3 }
fn default_retry_delay() -> Duration { Duration::from_secs(5) }
fn default_job_timeout() -> Duration { Duration::from_secs(1800) }
fn default_max_history_entries() -> usize { 50 }
fn default_resource_warning_grace() -> Duration { Duration::from_secs(60) }
fn default_drain_timeout() -> Duration { Duration::from_secs(30) }
fn default_redis_url() -> String { "redis://localhost:6379".to_string() }
fn default_store_prefix() -> String { "morph:jobs".to_string() }
fn default_max_workers() -> usize { 4 }
fn default_pool_name() -> String { "conversion".to_string() }
fn default_memory_budget_mb() -> u64 { 8192 }
fn default_cpu_budget_cores() -> f64 { 8.0 }
fn default_disk_budget_mb() -> u64 { 51_200 }
fn default_check_interval() -> Duration { Duration::from_secs(10) }
fn default_min_workers() -> usize { 1 }
fn default_scale_up_pressure() -> f64 { 2.0 }
fn default_scale_down_utilization() -> f64 { 0.25 }
fn default_sustain_ticks() -> u32 { 3 }
fn default_max_error_records() -> usize { 5_000 }
fn default_rate_window() -> Duration { Duration::from_secs(300) }
fn default_warning_error_rate() -> f64 { 5.0 }
fn default_critical_error_rate() -> f64 { 20.0 }
fn default_error_rate_thresholds() -> ThresholdPair {
    ThresholdPair { warning: 5.0, critical: 20.0 }
}
fn default_error_count_thresholds() -> ThresholdPair {
    ThresholdPair { warning: 50.0, critical: 200.0 }
}
fn default_component_failure_thresholds() -> ThresholdPair {
    ThresholdPair { warning: 1.0, critical: 3.0 }
}
fn default_recovery_failure_thresholds() -> ThresholdPair {
    ThresholdPair { warning: 0.25, critical: 0.5 }
}
fn default_monitor_interval() -> Duration { Duration::from_secs(30) }
fn default_true() -> bool { true }
fn default_anomaly_sensitivity() -> f64 { 3.0 }
fn default_baseline_size() -> usize { 20 }
fn default_alert_cooldown() -> Duration { Duration::from_secs(300) }
fn default_retention_period() -> Duration { Duration::from_secs(86_400) }
fn default_metric_retention() -> Duration { Duration::from_secs(86_400) }
fn default_recent_window() -> Duration { Duration::from_secs(300) }
fn default_log_level() -> String { "info".to_string() }
fn default_json_logging() -> bool { true }

impl Config {
    /// Load configuration from environment variables (and a `.env` file when
    /// present).
    pub fn load() -> anyhow::Result<Self> {
        dotenvy::dotenv().ok();
        let config = config::Config::builder()
            .add_source(config::Environment::with_prefix("MORPH").separator("__"))
            .build()?;

        let cfg: Config = config.try_deserialize()?;
        Ok(cfg)
    }

    /// Load from a specific file path, with environment overrides.
    pub fn from_file(path: &str) -> anyhow::Result<Self> {
        let config = config::Config::builder()
            .add_source(config::File::with_name(path))
            .add_source(config::Environment::with_prefix("MORPH").separator("__"))
            .build()?;

        let cfg: Config = config.try_deserialize()?;
        Ok(cfg)
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Configuration Service
// ═══════════════════════════════════════════════════════════════════════════════

/// Live, observable runtime parameters.
///
/// Components hold a [`watch::Receiver`] and read the current value at the
/// start of each tick, so reconfiguration takes effect without restart.
pub struct ConfigurationService {
    sender: watch::Sender<Config>,
}

impl ConfigurationService {
    /// Create a service seeded with the given configuration.
    pub fn new(config: Config) -> Self {
        let (sender, _) = watch::channel(config);
        Self { sender }
    }

    /// Create a service with default configuration.
    pub fn with_defaults() -> Self {
        Self::new(Config::default())
    }

    /// Get a snapshot of the current configuration.
    pub fn current(&self) -> Config {
        self.sender.borrow().clone()
    }

    /// Subscribe to configuration updates.
    pub fn subscribe(&self) -> watch::Receiver<Config> {
        self.sender.subscribe()
    }

    /// Apply a mutation and publish the updated configuration.
    pub fn update<F>(&self, mutate: F)
    where
        F: FnOnce(&mut Config),
    {
        self.sender.send_modify(|config| {
            mutate(config);
        });
        tracing::info!("Configuration updated");
    }

    /// Replace the entire configuration.
    pub fn replace(&self, config: Config) {
        let _ = self.sender.send(config);
        tracing::info!("Configuration replaced");
    }
}

impl Default for ConfigurationService {
    fn default() -> Self {
        Self::with_defaults()
    }
}
