//! Job orchestration for the Morph conversion platform.
//!
//! This module provides the job queue and its durable status store:
//!
//! - **Job model**: typed, prioritized work units with declared resource
//!   needs and a strict status state machine
//! - **Status store**: the sole durable record of jobs and capped
//!   transition history, over pluggable backends
//! - **Queue service**: validation, admission, priority dispatch, retries,
//!   and lifecycle events
//! - **Executors**: the seam where conversion pipeline stages plug in
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────────────┐
//! │                          Job Orchestration                           │
//! ├──────────────────────────────────────────────────────────────────────┤
//! │  ┌───────────┐    ┌──────────────┐    ┌────────────┐    ┌─────────┐  │
//! │  │ JobRequest│───▶│ JobQueue     │───▶│ WorkerPool │───▶│ Job     │  │
//! │  │ (validate)│    │ Service      │    │ (slots +   │    │ Executor│  │
//! │  │           │    │ (dispatch)   │    │  budget)   │    │         │  │
//! │  └───────────┘    └──────┬───────┘    └────────────┘    └─────────┘  │
//! │                          │ status transitions                        │
//! │                          ▼                                           │
//! │                  ┌──────────────┐       ┌───────────────┐            │
//! │                  │ JobStatus    │       │ QueueEvent    │            │
//! │                  │ Store        │       │ broadcast     │            │
//! │                  └──────────────┘       └───────────────┘            │
//! └──────────────────────────────────────────────────────────────────────┘
//! ```

pub mod events;
pub mod executor;
pub mod job;
pub mod queue;
pub mod store;

pub use events::{EventBus, QueueEvent};
pub use executor::{ExecutionContext, ExecutionResult, ExecutorRegistry, JobExecutor};
pub use job::{
    Job, JobFailure, JobHistoryEntry, JobId, JobOptions, JobPriority, JobRequest, JobStatus,
    JobType, ResourceRequirements,
};
pub use queue::JobQueueService;
pub use store::{
    InMemoryStatusBackend, JobStatusStore, QueueStats, RedisStatusBackend, StatusBackend,
};
