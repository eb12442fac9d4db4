//! # Morph Core
//!
//! Job orchestration and health monitoring for the Morph conversion
//! platform. A single conversion is a slow, multi-stage, failure-prone
//! pipeline; this crate runs many of them concurrently, under bounded
//! resources, with retries, prioritization, and systemic failure detection.
//!
//! ## Architecture
//!
//! - **Jobs**: queue service, durable status store with history, priority
//!   dispatch, bounded retries, lifecycle events
//! - **Pool**: bounded rescalable worker slots with resource-budget
//!   admission, plus the allocator that rescales them from queue pressure
//! - **Monitoring**: error collection/aggregation, threshold/trend/anomaly
//!   alerting, and a generic metrics facade
//! - **Health**: per-component health classification with worst-wins rollup
//! - **Telemetry**: structured logging and metrics export
//!
//! The conversion pipeline itself is an external collaborator: payloads and
//! results are opaque, and stages plug in through the
//! [`jobs::JobExecutor`] trait.

pub mod config;
pub mod error;
pub mod health;
pub mod jobs;
pub mod monitoring;
pub mod pool;
pub mod telemetry;

pub use error::{ErrorCode, ErrorContext, ErrorDetails, ErrorSeverity, MorphError, Result};

/// Re-export commonly used types
pub mod prelude {
    pub use crate::config::{Config, ConfigurationService, ScalingStrategy};
    pub use crate::error::{ErrorCode, ErrorContext, MorphError, Result};
    pub use crate::health::{ComponentHealth, HealthReport, HealthStatus};
    pub use crate::jobs::{
        ExecutionContext, ExecutionResult, ExecutorRegistry, Job, JobExecutor, JobFailure, JobId,
        JobOptions, JobPriority, JobQueueService, JobRequest, JobStatus, JobStatusStore, JobType,
        QueueEvent, QueueStats, ResourceRequirements,
    };
    pub use crate::monitoring::{
        Alert, AlertId, AlertRule, AlertSeverity, AlertTransport, AlertType,
        EnhancedErrorCollector, ErrorKind, ErrorMonitoringService, ErrorRecord, MonitoringService,
        RecordSeverity, RecoveryAction,
    };
    pub use crate::pool::{ResourceAllocator, WorkerPool};
}
