//! Job definitions.
//!
//! This module provides the core data model for conversion jobs:
//!
//! - **Job**: A unit of asynchronous conversion work with declared type,
//!   priority, and resource needs
//! - **JobStatus**: State machine for job lifecycle
//! - **JobRequest**: Validated admission input
//! - **JobHistoryEntry**: Immutable transition snapshots

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::time::Duration;
use uuid::Uuid;

use crate::error::{ErrorCode, MorphError, Result};

// ═══════════════════════════════════════════════════════════════════════════════
// Job Identification
// ═══════════════════════════════════════════════════════════════════════════════

/// Unique identifier for a job instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct JobId(pub Uuid);

impl JobId {
    /// Create a new random job ID.
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Create from an existing UUID.
    pub fn from_uuid(uuid: Uuid) -> Self {
        Self(uuid)
    }
}

impl Default for JobId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for JobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<Uuid> for JobId {
    fn from(uuid: Uuid) -> Self {
        Self(uuid)
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Job Type
// ═══════════════════════════════════════════════════════════════════════════════

/// The enumerated set of work units the conversion pipeline can run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobType {
    /// Full package conversion between runtime formats
    Convert,
    /// Unpack and inventory a source package
    Extract,
    /// Reassemble converted artifacts into the target format
    Repack,
    /// Verify a converted package against its manifest
    Validate,
    /// Remove intermediate artifacts for finished conversions
    Cleanup,
}

impl JobType {
    /// All recognized job types.
    pub fn all() -> &'static [JobType] {
        &[
            Self::Convert,
            Self::Extract,
            Self::Repack,
            Self::Validate,
            Self::Cleanup,
        ]
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Convert => "convert",
            Self::Extract => "extract",
            Self::Repack => "repack",
            Self::Validate => "validate",
            Self::Cleanup => "cleanup",
        }
    }
}

impl fmt::Display for JobType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for JobType {
    type Err = MorphError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "convert" => Ok(Self::Convert),
            "extract" => Ok(Self::Extract),
            "repack" => Ok(Self::Repack),
            "validate" => Ok(Self::Validate),
            "cleanup" => Ok(Self::Cleanup),
            other => Err(MorphError::with_internal(
                ErrorCode::UnknownJobType,
                "Unknown job type",
                format!("job type '{}' is not recognized", other),
            )),
        }
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Job Status
// ═══════════════════════════════════════════════════════════════════════════════

/// Status of a job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    /// Job is waiting in the queue
    Pending,
    /// Job is currently being executed
    Running,
    /// Job completed successfully
    Completed,
    /// Job failed; may be retried while attempts remain
    Failed,
    /// Job was cancelled
    Cancelled,
}

impl JobStatus {
    /// Check if the job is in a terminal state.
    ///
    /// `Failed` is not terminal: a failed job may be re-armed via retry while
    /// attempts remain. Retry-exhausted jobs simply stay failed.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Cancelled)
    }

    /// Check whether a transition to `next` is allowed by the state machine.
    pub fn can_transition_to(&self, next: JobStatus) -> bool {
        matches!(
            (self, next),
            (Self::Pending, Self::Running)
                | (Self::Pending, Self::Cancelled)
                | (Self::Running, Self::Completed)
                | (Self::Running, Self::Failed)
                | (Self::Running, Self::Cancelled)
                | (Self::Failed, Self::Pending)
        )
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Pending => write!(f, "pending"),
            Self::Running => write!(f, "running"),
            Self::Completed => write!(f, "completed"),
            Self::Failed => write!(f, "failed"),
            Self::Cancelled => write!(f, "cancelled"),
        }
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Job Priority
// ═══════════════════════════════════════════════════════════════════════════════

/// Priority band for jobs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobPriority {
    /// Lowest priority - processed when higher bands are empty
    Low = 0,
    /// Normal priority - default for most jobs
    Normal = 1,
    /// High priority - processed before normal jobs
    High = 2,
    /// Urgent priority - next free slot
    Urgent = 3,
}

impl Default for JobPriority {
    fn default() -> Self {
        Self::Normal
    }
}

impl JobPriority {
    /// Get the numeric value for queue ordering.
    pub fn score(&self) -> i64 {
        match self {
            Self::Low => 0,
            Self::Normal => 100,
            Self::High => 200,
            Self::Urgent => 300,
        }
    }
}

impl fmt::Display for JobPriority {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Low => write!(f, "low"),
            Self::Normal => write!(f, "normal"),
            Self::High => write!(f, "high"),
            Self::Urgent => write!(f, "urgent"),
        }
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Job Failure
// ═══════════════════════════════════════════════════════════════════════════════

/// Error captured on a job when execution fails.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobFailure {
    /// Machine-readable failure code
    pub code: String,
    /// Failure message
    pub message: String,
    /// Whether the failure is eligible for bounded retry
    pub recoverable: bool,
}

impl JobFailure {
    /// Create a recoverable failure.
    pub fn recoverable(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            code: code.into(),
            message: message.into(),
            recoverable: true,
        }
    }

    /// Create a non-recoverable (fatal) failure.
    pub fn fatal(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            code: code.into(),
            message: message.into(),
            recoverable: false,
        }
    }
}

impl fmt::Display for JobFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.message, self.code)
    }
}

impl std::error::Error for JobFailure {}

// ═══════════════════════════════════════════════════════════════════════════════
// Resource Requirements
// ═══════════════════════════════════════════════════════════════════════════════

/// Resources a job declares it needs while running.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ResourceRequirements {
    /// Memory in megabytes
    #[serde(default = "default_memory_mb")]
    pub memory_mb: u64,
    /// CPU cores (fractional allowed)
    #[serde(default = "default_cpu_cores")]
    pub cpu_cores: f64,
    /// Scratch disk in megabytes
    #[serde(default = "default_disk_mb")]
    pub disk_mb: u64,
}

fn default_memory_mb() -> u64 {
    512
}
fn default_cpu_cores() -> f64 {
    1.0
}
fn default_disk_mb() -> u64 {
    1024
}

impl Default for ResourceRequirements {
    fn default() -> Self {
        Self {
            memory_mb: default_memory_mb(),
            cpu_cores: default_cpu_cores(),
            disk_mb: default_disk_mb(),
        }
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Job Options
// ═══════════════════════════════════════════════════════════════════════════════

/// Per-job execution options. All fields are optional; defaults come from
/// the queue configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct JobOptions {
    /// Execution timeout for this job
    #[serde(default, with = "humantime_serde")]
    pub timeout: Option<Duration>,

    /// Whether a timeout counts as recoverable (retried) instead of fatal
    #[serde(default)]
    pub timeout_recoverable: bool,

    /// Override of the queue-level retry delay
    #[serde(default, with = "humantime_serde")]
    pub retry_delay: Option<Duration>,

    /// Free-form tags for filtering
    #[serde(default)]
    pub tags: Vec<String>,
}

// ═══════════════════════════════════════════════════════════════════════════════
// Job Request
// ═══════════════════════════════════════════════════════════════════════════════

/// Admission input for `enqueue_job`. The `job_type` arrives as a string and
/// is validated against the enumerated set; malformed requests are rejected
/// synchronously and never persisted.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobRequest {
    /// Requested job type (validated against [`JobType`])
    pub job_type: String,

    /// Priority band
    #[serde(default)]
    pub priority: JobPriority,

    /// Opaque pipeline payload
    pub payload: serde_json::Value,

    /// Execution options
    #[serde(default)]
    pub options: JobOptions,

    /// Declared resource needs
    #[serde(default)]
    pub resources: ResourceRequirements,

    /// Maximum retry attempts (queue default when absent)
    #[serde(default)]
    pub max_retries: Option<u32>,
}

impl JobRequest {
    /// Create a request with defaults for everything but type and payload.
    pub fn new(job_type: impl Into<String>, payload: serde_json::Value) -> Self {
        Self {
            job_type: job_type.into(),
            priority: JobPriority::default(),
            payload,
            options: JobOptions::default(),
            resources: ResourceRequirements::default(),
            max_retries: None,
        }
    }

    /// Set the priority band.
    pub fn with_priority(mut self, priority: JobPriority) -> Self {
        self.priority = priority;
        self
    }

    /// Set the resource requirements.
    pub fn with_resources(mut self, resources: ResourceRequirements) -> Self {
        self.resources = resources;
        self
    }

    /// Set the maximum retry attempts.
    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = Some(max_retries);
        self
    }

    /// Set the execution options.
    pub fn with_options(mut self, options: JobOptions) -> Self {
        self.options = options;
        self
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Job
// ═══════════════════════════════════════════════════════════════════════════════

/// A unit of asynchronous conversion work.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Job {
    /// Unique job identifier (immutable)
    pub id: JobId,
    /// Monotonic admission sequence number (creation order)
    pub seq: u64,
    /// Job type
    pub job_type: JobType,
    /// Priority band
    pub priority: JobPriority,
    /// Current status
    pub status: JobStatus,
    /// Progress percentage (0-100)
    pub progress: u8,
    /// Opaque pipeline payload
    pub payload: serde_json::Value,
    /// Execution options
    pub options: JobOptions,
    /// Declared resource needs
    pub resources: ResourceRequirements,
    /// Number of retries consumed
    pub retry_count: u32,
    /// Maximum retry attempts
    pub max_retries: u32,
    /// When the job was admitted
    pub created_at: DateTime<Utc>,
    /// When the job last started executing
    pub started_at: Option<DateTime<Utc>>,
    /// When the job reached completion/failure/cancellation
    pub finished_at: Option<DateTime<Utc>>,
    /// Opaque pipeline result (set on completion)
    pub result: Option<serde_json::Value>,
    /// Captured failure (set on failure)
    pub error: Option<JobFailure>,
}

impl Job {
    /// Build a job from a validated request.
    pub fn from_request(
        request: JobRequest,
        job_type: JobType,
        seq: u64,
        default_max_retries: u32,
    ) -> Self {
        Self {
            id: JobId::new(),
            seq,
            job_type,
            priority: request.priority,
            status: JobStatus::Pending,
            progress: 0,
            payload: request.payload,
            options: request.options,
            resources: request.resources,
            retry_count: 0,
            max_retries: request.max_retries.unwrap_or(default_max_retries),
            created_at: Utc::now(),
            started_at: None,
            finished_at: None,
            result: None,
            error: None,
        }
    }

    /// Mark as running.
    pub fn mark_running(&mut self) {
        self.status = JobStatus::Running;
        self.started_at = Some(Utc::now());
    }

    /// Mark as completed with its result.
    pub fn mark_completed(&mut self, result: serde_json::Value) {
        self.status = JobStatus::Completed;
        self.progress = 100;
        self.finished_at = Some(Utc::now());
        self.result = Some(result);
    }

    /// Mark as failed with the captured failure.
    pub fn mark_failed(&mut self, failure: JobFailure) {
        self.status = JobStatus::Failed;
        self.finished_at = Some(Utc::now());
        self.error = Some(failure);
    }

    /// Mark as cancelled.
    pub fn mark_cancelled(&mut self) {
        self.status = JobStatus::Cancelled;
        self.finished_at = Some(Utc::now());
    }

    /// Re-arm a failed job for another attempt.
    pub fn rearm_for_retry(&mut self) {
        self.status = JobStatus::Pending;
        self.retry_count += 1;
        self.started_at = None;
        self.finished_at = None;
        self.progress = 0;
        self.error = None;
    }

    /// Check if the job can be retried.
    pub fn can_retry(&self) -> bool {
        self.status == JobStatus::Failed && self.retry_count < self.max_retries
    }

    /// Processing time, if the job has both start and finish timestamps.
    pub fn processing_time(&self) -> Option<chrono::Duration> {
        match (self.started_at, self.finished_at) {
            (Some(start), Some(end)) => Some(end - start),
            _ => None,
        }
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Job History
// ═══════════════════════════════════════════════════════════════════════════════

/// Immutable snapshot appended on every job transition.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobHistoryEntry {
    /// Job this entry belongs to
    pub job_id: JobId,
    /// Status at the time of the snapshot
    pub status: JobStatus,
    /// Progress at the time of the snapshot
    pub progress: u8,
    /// When the transition happened
    pub timestamp: DateTime<Utc>,
    /// Optional context note
    #[serde(skip_serializing_if = "Option::is_none")]
    pub note: Option<String>,
}

impl JobHistoryEntry {
    /// Snapshot the current state of a job.
    pub fn snapshot(job: &Job, note: Option<String>) -> Self {
        Self {
            job_id: job.id,
            status: job.status,
            progress: job.progress,
            timestamp: Utc::now(),
            note,
        }
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Tests
// ═══════════════════════════════════════════════════════════════════════════════

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_job_id_uniqueness() {
        let id1 = JobId::new();
        let id2 = JobId::new();
        assert_ne!(id1, id2);
    }

    #[test]
    fn test_job_type_parsing() {
        assert_eq!("convert".parse::<JobType>().unwrap(), JobType::Convert);
        assert_eq!("repack".parse::<JobType>().unwrap(), JobType::Repack);
        assert!("transmogrify".parse::<JobType>().is_err());
    }

    #[test]
    fn test_status_terminality() {
        assert!(JobStatus::Completed.is_terminal());
        assert!(JobStatus::Cancelled.is_terminal());
        assert!(!JobStatus::Pending.is_terminal());
        assert!(!JobStatus::Running.is_terminal());
        assert!(!JobStatus::Failed.is_terminal());
    }

    #[test]
    fn test_state_machine() {
        assert!(JobStatus::Pending.can_transition_to(JobStatus::Running));
        assert!(JobStatus::Pending.can_transition_to(JobStatus::Cancelled));
        assert!(JobStatus::Running.can_transition_to(JobStatus::Completed));
        assert!(JobStatus::Running.can_transition_to(JobStatus::Failed));
        assert!(JobStatus::Running.can_transition_to(JobStatus::Cancelled));
        assert!(JobStatus::Failed.can_transition_to(JobStatus::Pending));

        // Terminal states never leave
        assert!(!JobStatus::Completed.can_transition_to(JobStatus::Running));
        assert!(!JobStatus::Completed.can_transition_to(JobStatus::Cancelled));
        assert!(!JobStatus::Cancelled.can_transition_to(JobStatus::Pending));
        // No skipping admission
        assert!(!JobStatus::Pending.can_transition_to(JobStatus::Completed));
    }

    #[test]
    fn test_priority_ordering() {
        assert!(JobPriority::Urgent > JobPriority::High);
        assert!(JobPriority::High > JobPriority::Normal);
        assert!(JobPriority::Normal > JobPriority::Low);
    }

    #[test]
    fn test_job_lifecycle_marks() {
        let request = JobRequest::new("convert", serde_json::json!({"source": "a.pkg"}));
        let mut job = Job::from_request(request, JobType::Convert, 1, 3);

        assert_eq!(job.status, JobStatus::Pending);
        assert_eq!(job.progress, 0);

        job.mark_running();
        assert_eq!(job.status, JobStatus::Running);
        assert!(job.started_at.is_some());

        job.mark_completed(serde_json::json!({"target": "a.oci"}));
        assert_eq!(job.status, JobStatus::Completed);
        assert_eq!(job.progress, 100);
        assert!(job.processing_time().is_some());
    }

    #[test]
    fn test_retry_rearm() {
        let request = JobRequest::new("convert", serde_json::json!({})).with_max_retries(2);
        let mut job = Job::from_request(request, JobType::Convert, 1, 3);
        assert_eq!(job.max_retries, 2);

        job.mark_running();
        job.mark_failed(JobFailure::recoverable("IO", "transient"));
        assert!(job.can_retry());

        job.rearm_for_retry();
        assert_eq!(job.status, JobStatus::Pending);
        assert_eq!(job.retry_count, 1);
        assert!(job.error.is_none());

        job.mark_running();
        job.mark_failed(JobFailure::recoverable("IO", "transient"));
        job.rearm_for_retry();
        job.mark_running();
        job.mark_failed(JobFailure::recoverable("IO", "transient"));
        assert_eq!(job.retry_count, 2);
        assert!(!job.can_retry());
    }

    #[test]
    fn test_history_snapshot() {
        let request = JobRequest::new("extract", serde_json::json!({}));
        let job = Job::from_request(request, JobType::Extract, 7, 3);
        let entry = JobHistoryEntry::snapshot(&job, Some("admitted".into()));
        assert_eq!(entry.job_id, job.id);
        assert_eq!(entry.status, JobStatus::Pending);
        assert_eq!(entry.note.as_deref(), Some("admitted"));
    }
}
