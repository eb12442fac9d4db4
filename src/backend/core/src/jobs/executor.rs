//! Pipeline integration seam.
//!
//! The conversion pipeline plugs into the queue through [`JobExecutor`]
//! implementations registered per [`JobType`]. The queue treats payload and
//! result as opaque JSON; executors own their interpretation.

use async_trait::async_trait;
use dashmap::DashMap;
use std::sync::Arc;
use tokio::sync::watch;

use super::job::{Job, JobFailure, JobId, JobType};

/// Outcome of executing a job's work unit.
pub type ExecutionResult = std::result::Result<serde_json::Value, JobFailure>;

/// Context passed to executors for one attempt.
pub struct ExecutionContext {
    /// Job being executed
    pub job_id: JobId,
    /// Attempt number (0 for the first run)
    pub attempt: u32,
    /// Cooperative cancellation signal
    cancellation: watch::Receiver<bool>,
}

impl ExecutionContext {
    pub fn new(job_id: JobId, attempt: u32, cancellation: watch::Receiver<bool>) -> Self {
        Self {
            job_id,
            attempt,
            cancellation,
        }
    }

    /// Check if cancellation has been requested.
    ///
    /// Cancellation is cooperative: a well-behaved executor checks this at
    /// stage boundaries and bails out early. Nothing forces it to.
    pub fn is_cancelled(&self) -> bool {
        *self.cancellation.borrow()
    }

    /// Wait until cancellation is requested.
    pub async fn cancelled(&mut self) {
        while !*self.cancellation.borrow() {
            if self.cancellation.changed().await.is_err() {
                return;
            }
        }
    }
}

/// A pipeline work unit bound to a job type.
#[async_trait]
pub trait JobExecutor: Send + Sync {
    /// The job type this executor handles.
    fn job_type(&self) -> JobType;

    /// Execute one attempt of the job.
    ///
    /// Return `Err(JobFailure::recoverable(..))` for transient failures that
    /// should be retried, and `Err(JobFailure::fatal(..))` for permanent
    /// ones.
    async fn execute(&self, job: &Job, ctx: &mut ExecutionContext) -> ExecutionResult;
}

/// Registry of executors keyed by job type.
#[derive(Default)]
pub struct ExecutorRegistry {
    executors: DashMap<JobType, Arc<dyn JobExecutor>>,
}

impl ExecutorRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an executor, replacing any previous one for the same type.
    pub fn register(&self, executor: Arc<dyn JobExecutor>) {
        let job_type = executor.job_type();
        self.executors.insert(job_type, executor);
        tracing::debug!(job_type = %job_type, "Executor registered");
    }

    /// Look up the executor for a job type.
    pub fn get(&self, job_type: JobType) -> Option<Arc<dyn JobExecutor>> {
        self.executors.get(&job_type).map(|e| e.value().clone())
    }

    /// Job types with a registered executor.
    pub fn registered_types(&self) -> Vec<JobType> {
        self.executors.iter().map(|e| *e.key()).collect()
    }
}
