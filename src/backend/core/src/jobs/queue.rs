//! Job queue service: admission, prioritization, dispatch, and lifecycle.
//!
//! Admission (`enqueue_job`) is non-blocking and decoupled from execution.
//! A periodic dispatch loop hands pending jobs to the worker pool — highest
//! priority band first, FIFO within a band — subject to a free slot and the
//! job's resource requirements being currently satisfiable. Execution runs
//! out-of-band and reports back through the service, which commits status
//! transitions to the store and emits events in transition order.

use std::cmp::Reverse;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::time::Instant;

use dashmap::DashMap;
use metrics::{counter, histogram};
use parking_lot::Mutex;
use tokio::sync::watch;

use crate::config::Config;
use crate::error::{ErrorCode, MorphError, Result};
use crate::pool::{WorkerPermit, WorkerPool};

use super::events::{EventBus, QueueEvent};
use super::executor::{ExecutionContext, ExecutionResult, ExecutorRegistry};
use super::job::{Job, JobFailure, JobHistoryEntry, JobId, JobRequest, JobStatus, JobType};
use super::store::{JobStatusStore, QueueStats};

/// Tracks a pending job whose requirements exceed the budget ceiling.
struct UnsatisfiableEntry {
    first_seen: Instant,
    warned: bool,
}

/// The job queue service.
///
/// Owns admission, dispatch, and all job status transitions. The status
/// store is only written through this service, keeping a single writer of
/// job records.
pub struct JobQueueService {
    store: Arc<JobStatusStore>,
    pool: Arc<WorkerPool>,
    executors: Arc<ExecutorRegistry>,
    config_rx: watch::Receiver<Config>,
    events: EventBus,
    paused: AtomicBool,
    running: AtomicBool,
    seq: AtomicU64,
    /// Cooperative cancellation senders for running jobs
    cancellations: DashMap<JobId, watch::Sender<bool>>,
    /// Pending jobs flagged as never satisfiable under the current budget
    unsatisfiable: DashMap<JobId, UnsatisfiableEntry>,
    shutdown: Mutex<Option<watch::Sender<bool>>>,
    /// Back-reference for spawning tasks that outlive the caller's borrow
    self_ref: Weak<Self>,
}

impl JobQueueService {
    /// Create a queue service over its collaborators.
    pub fn new(
        store: Arc<JobStatusStore>,
        pool: Arc<WorkerPool>,
        executors: Arc<ExecutorRegistry>,
        config_rx: watch::Receiver<Config>,
    ) -> Arc<Self> {
        Arc::new_cyclic(|self_ref| Self {
            store,
            pool,
            executors,
            config_rx,
            events: EventBus::default(),
            paused: AtomicBool::new(false),
            running: AtomicBool::new(false),
            seq: AtomicU64::new(1),
            cancellations: DashMap::new(),
            unsatisfiable: DashMap::new(),
            shutdown: Mutex::new(None),
            self_ref: self_ref.clone(),
        })
    }

    /// Subscribe to queue events.
    pub fn subscribe_events(&self) -> tokio::sync::broadcast::Receiver<QueueEvent> {
        self.events.subscribe()
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Admission
    // ─────────────────────────────────────────────────────────────────────────

    /// Validate and admit a job.
    ///
    /// Fails synchronously (and is never retried) on malformed input:
    /// unknown job type, non-object payload, or a zero timeout. On success
    /// the job is persisted as pending and its id returned without waiting
    /// for execution.
    pub async fn enqueue_job(&self, request: JobRequest) -> Result<JobId> {
        let job_type: JobType = request.job_type.parse()?;
        Self::validate_request(&request)?;

        let config = self.config_rx.borrow().queue.clone();
        if config.max_queue_size > 0 {
            let pending = self.store.get_jobs_by_status(JobStatus::Pending).await?;
            if pending.len() >= config.max_queue_size {
                return Err(MorphError::with_internal(
                    ErrorCode::QueueFull,
                    "Job queue is full",
                    format!("pending={} max={}", pending.len(), config.max_queue_size),
                ));
            }
        }

        let seq = self.seq.fetch_add(1, Ordering::Relaxed);
        let job = Job::from_request(request, job_type, seq, config.default_max_retries);
        let id = job.id;

        self.store.save(&job).await?;
        self.events.emit(QueueEvent::JobEnqueued {
            job_id: id,
            job_type,
            priority: job.priority,
        });

        counter!("morph_jobs_enqueued_total", "type" => job_type.as_str()).increment(1);
        tracing::info!(job_id = %id, job_type = %job_type, priority = %job.priority, "Job enqueued");

        Ok(id)
    }

    fn validate_request(request: &JobRequest) -> Result<()> {
        if !request.payload.is_object() {
            return Err(MorphError::new(
                ErrorCode::InvalidInput,
                "Job payload must be a JSON object",
            ));
        }
        if let Some(timeout) = request.options.timeout {
            if timeout.is_zero() {
                return Err(MorphError::new(
                    ErrorCode::InvalidInput,
                    "Job timeout must be greater than zero",
                ));
            }
        }
        Ok(())
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Lifecycle Operations
    // ─────────────────────────────────────────────────────────────────────────

    /// Fetch the current state of a job.
    pub async fn get_job_status(&self, id: JobId) -> Result<Option<Job>> {
        self.store.get(id).await
    }

    /// Cancel a job. Succeeds only from {pending, running}.
    ///
    /// Cancellation of a running job is cooperative: the status becomes
    /// `cancelled` immediately and the executor is signalled, but in-flight
    /// execution is never forcibly interrupted.
    pub async fn cancel_job(&self, id: JobId) -> Result<bool> {
        let Some(mut job) = self.store.get(id).await? else {
            return Ok(false);
        };

        match job.status {
            JobStatus::Pending | JobStatus::Running => {
                let was_running = job.status == JobStatus::Running;
                job.mark_cancelled();
                self.store.update(&job).await?;
                self.unsatisfiable.remove(&id);

                if was_running {
                    if let Some(cancel) = self.cancellations.get(&id) {
                        let _ = cancel.send(true);
                    }
                }

                self.events.emit(QueueEvent::JobCancelled { job_id: id });
                counter!("morph_jobs_cancelled_total").increment(1);
                tracing::info!(job_id = %id, was_running, "Job cancelled");
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    /// Manually re-arm a failed job. Valid only while retries remain.
    pub async fn retry_job(&self, id: JobId) -> Result<bool> {
        let Some(mut job) = self.store.get(id).await? else {
            return Ok(false);
        };

        if !job.can_retry() {
            return Ok(false);
        }

        job.rearm_for_retry();
        self.store.update(&job).await?;
        self.events.emit(QueueEvent::JobStatusUpdate {
            job_id: id,
            status: job.status,
            progress: job.progress,
        });
        tracing::info!(job_id = %id, retry_count = job.retry_count, "Job re-armed for retry");
        Ok(true)
    }

    /// Compute queue statistics.
    pub async fn get_queue_stats(&self) -> Result<QueueStats> {
        self.store.get_queue_stats().await
    }

    /// Transition history, most recent first. An omitted id aggregates all
    /// jobs.
    pub async fn get_job_history(
        &self,
        id: Option<JobId>,
        limit: Option<usize>,
    ) -> Result<Vec<JobHistoryEntry>> {
        self.store.get_job_history(id, limit).await
    }

    /// Stop dispatching new jobs. Running jobs are unaffected.
    pub fn pause_queue(&self) {
        if !self.paused.swap(true, Ordering::AcqRel) {
            self.events.emit(QueueEvent::QueuePaused);
            tracing::info!("Queue paused");
        }
    }

    /// Resume dispatching.
    pub fn resume_queue(&self) {
        if self.paused.swap(false, Ordering::AcqRel) {
            self.events.emit(QueueEvent::QueueResumed);
            tracing::info!("Queue resumed");
        }
    }

    /// Whether dispatch is paused.
    pub fn is_paused(&self) -> bool {
        self.paused.load(Ordering::Acquire)
    }

    /// Drop all pending jobs. Returns the number removed.
    pub async fn clear_queue(&self) -> Result<usize> {
        let pending = self.store.get_jobs_by_status(JobStatus::Pending).await?;
        let mut removed = 0;
        for job in pending {
            if self.store.delete(job.id).await? {
                self.unsatisfiable.remove(&job.id);
                removed += 1;
            }
        }
        self.events.emit(QueueEvent::QueueCleared { removed });
        tracing::info!(removed, "Queue cleared");
        Ok(removed)
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Dispatch Loop
    // ─────────────────────────────────────────────────────────────────────────

    /// Start the dispatch loop. Idempotent: a second start is a no-op.
    pub fn start(&self) {
        let Some(service) = self.self_ref.upgrade() else {
            return;
        };
        if self.running.swap(true, Ordering::AcqRel) {
            tracing::debug!("Dispatch loop already running, start ignored");
            return;
        }

        let (shutdown_tx, mut shutdown_rx) = watch::channel(false);
        *self.shutdown.lock() = Some(shutdown_tx);

        tokio::spawn(async move {
            tracing::info!("Dispatch loop started");
            service.restore_sequence().await;

            loop {
                let interval = service.config_rx.borrow().queue.dispatch_interval;
                tokio::select! {
                    _ = shutdown_rx.changed() => {
                        if *shutdown_rx.borrow() {
                            break;
                        }
                    }
                    _ = tokio::time::sleep(interval) => {
                        service.dispatch_tick().await;
                    }
                }
            }

            tracing::info!("Dispatch loop stopped");
        });
    }

    /// Stop the dispatch loop and wait for in-flight jobs to drain, up to
    /// the configured drain timeout.
    pub async fn shutdown(&self) {
        if !self.running.swap(false, Ordering::AcqRel) {
            return;
        }
        if let Some(shutdown) = self.shutdown.lock().take() {
            let _ = shutdown.send(true);
        }

        let drain_timeout = self.config_rx.borrow().queue.drain_timeout;
        let deadline = Instant::now() + drain_timeout;
        while self.pool.active_workers() > 0 && Instant::now() < deadline {
            tokio::time::sleep(std::time::Duration::from_millis(50)).await;
        }

        let remaining = self.pool.active_workers();
        if remaining > 0 {
            tracing::warn!(remaining, "Shutdown drain timeout with jobs still in flight");
        } else {
            tracing::info!("Queue drained and shut down");
        }
    }

    /// Continue the admission sequence after the store's highest seen value,
    /// so creation order survives a restart on a durable backend.
    async fn restore_sequence(&self) {
        match self.store.get_all_jobs().await {
            Ok(jobs) => {
                if let Some(max_seq) = jobs.iter().map(|j| j.seq).max() {
                    self.seq.fetch_max(max_seq + 1, Ordering::Relaxed);
                }
            }
            Err(e) => {
                tracing::warn!(error = %e, "Could not restore admission sequence");
            }
        }
    }

    /// One dispatch pass. Failures are logged, never propagated out of the
    /// loop.
    async fn dispatch_tick(&self) {
        if self.is_paused() {
            return;
        }

        let mut pending = match self.store.get_jobs_by_status(JobStatus::Pending).await {
            Ok(pending) => pending,
            Err(e) => {
                tracing::warn!(error = %e, "Dispatch tick skipped: pending jobs unavailable");
                return;
            }
        };

        // Highest priority band first, FIFO (admission order) within a band
        pending.sort_by_key(|job| (Reverse(job.priority.score()), job.seq));

        for job in pending {
            if !self.pool.budget().can_ever_admit(&job.resources) {
                self.note_unsatisfiable(&job);
                continue;
            }
            self.unsatisfiable.remove(&job.id);

            if self.pool.is_at_capacity() {
                // Next free slot goes to the highest band; nothing below
                // dispatches this tick
                break;
            }

            match self.pool.try_acquire(&job.resources) {
                Some(permit) => self.launch(job, permit).await,
                // Slot free but resources momentarily tight: skip this job,
                // a smaller one behind it may still fit
                None => continue,
            }
        }
    }

    /// Flag a pending job whose requirements can never fit the configured
    /// budget. The job is admitted and starves (pending without error); one
    /// warning is logged after the grace period.
    fn note_unsatisfiable(&self, job: &Job) {
        let grace = self.config_rx.borrow().queue.resource_warning_grace;
        let mut entry = self
            .unsatisfiable
            .entry(job.id)
            .or_insert_with(|| UnsatisfiableEntry {
                first_seen: Instant::now(),
                warned: false,
            });
        if !entry.warned && entry.first_seen.elapsed() >= grace {
            entry.warned = true;
            tracing::warn!(
                job_id = %job.id,
                job_type = %job.job_type,
                memory_mb = job.resources.memory_mb,
                cpu_cores = job.resources.cpu_cores,
                disk_mb = job.resources.disk_mb,
                reason = "resource_unsatisfiable",
                "Pending job cannot be satisfied by the configured resource budget"
            );
            counter!("morph_jobs_unsatisfiable_total").increment(1);
        }
    }

    /// Transition a job to running and spawn its execution task.
    async fn launch(&self, mut job: Job, permit: WorkerPermit) {
        let Some(service) = self.self_ref.upgrade() else {
            permit.mark_failure();
            return;
        };
        job.mark_running();
        if let Err(e) = self.store.update(&job).await {
            tracing::error!(job_id = %job.id, error = %e, "Failed to commit running status");
            permit.mark_failure();
            return;
        }
        self.events.emit(QueueEvent::JobStatusUpdate {
            job_id: job.id,
            status: JobStatus::Running,
            progress: job.progress,
        });

        let (cancel_tx, cancel_rx) = watch::channel(false);
        self.cancellations.insert(job.id, cancel_tx);

        tokio::spawn(async move {
            let outcome = service.execute(&job, cancel_rx).await;
            service.complete(job, outcome, permit).await;
        });
    }

    /// Run one attempt through the registered executor, under the job's
    /// timeout.
    async fn execute(&self, job: &Job, cancel_rx: watch::Receiver<bool>) -> ExecutionResult {
        let Some(executor) = self.executors.get(job.job_type) else {
            return Err(JobFailure::fatal(
                "EXECUTOR_MISSING",
                format!("no executor registered for job type '{}'", job.job_type),
            ));
        };

        let timeout = job
            .options
            .timeout
            .unwrap_or_else(|| self.config_rx.borrow().queue.default_job_timeout);
        let mut ctx = ExecutionContext::new(job.id, job.retry_count, cancel_rx);

        match tokio::time::timeout(timeout, executor.execute(job, &mut ctx)).await {
            Ok(result) => result,
            Err(_) => Err(JobFailure {
                code: "JOB_TIMEOUT".to_string(),
                message: format!("job exceeded its {:?} timeout", timeout),
                // A timeout is non-recoverable unless the job opts in
                recoverable: job.options.timeout_recoverable,
            }),
        }
    }

    /// Commit the outcome of a finished execution.
    async fn complete(&self, job: Job, outcome: ExecutionResult, permit: WorkerPermit) {
        self.cancellations.remove(&job.id);
        let duration = permit.elapsed();

        // Re-read last-committed state: the job may have been cancelled
        // while executing, and terminal states are never left
        let current = match self.store.get(job.id).await {
            Ok(Some(current)) => current,
            Ok(None) => {
                tracing::warn!(job_id = %job.id, "Job record vanished during execution");
                permit.mark_failure();
                return;
            }
            Err(e) => {
                tracing::error!(job_id = %job.id, error = %e, "Failed to read job after execution");
                permit.mark_failure();
                return;
            }
        };

        if current.status.is_terminal() {
            tracing::debug!(job_id = %job.id, status = %current.status, "Outcome dropped for terminal job");
            match outcome {
                Ok(_) => permit.mark_success(),
                Err(_) => permit.mark_failure(),
            }
            return;
        }

        let mut job = current;
        match outcome {
            Ok(result) => {
                job.mark_completed(result);
                if let Err(e) = self.store.update(&job).await {
                    tracing::error!(job_id = %job.id, error = %e, "Failed to commit completion");
                }
                self.events.emit(QueueEvent::JobStatusUpdate {
                    job_id: job.id,
                    status: JobStatus::Completed,
                    progress: job.progress,
                });
                counter!("morph_jobs_completed_total", "type" => job.job_type.as_str())
                    .increment(1);
                histogram!("morph_job_duration_seconds", "type" => job.job_type.as_str())
                    .record(duration.as_secs_f64());
                permit.mark_success();
            }
            Err(failure) => {
                let will_retry = failure.recoverable && job.retry_count < job.max_retries;
                tracing::warn!(
                    job_id = %job.id,
                    code = %failure.code,
                    recoverable = failure.recoverable,
                    retry_count = job.retry_count,
                    will_retry,
                    "Job failed"
                );

                job.mark_failed(failure);
                if let Err(e) = self.store.update(&job).await {
                    tracing::error!(job_id = %job.id, error = %e, "Failed to commit failure");
                }
                self.events.emit(QueueEvent::JobStatusUpdate {
                    job_id: job.id,
                    status: JobStatus::Failed,
                    progress: job.progress,
                });
                counter!("morph_jobs_failed_total", "type" => job.job_type.as_str()).increment(1);
                permit.mark_failure();

                if will_retry {
                    self.schedule_retry(job.id).await;
                }
            }
        }
    }

    /// Re-arm a recoverable failure after the configured delay. The delayed
    /// task re-reads state first: a manual retry or cancel in the meantime
    /// wins.
    async fn schedule_retry(&self, id: JobId) {
        let Some(service) = self.self_ref.upgrade() else {
            return;
        };
        let delay = {
            let config = self.config_rx.borrow().queue.clone();
            match self.store.get(id).await {
                Ok(Some(job)) => job.options.retry_delay.unwrap_or(config.retry_delay),
                _ => config.retry_delay,
            }
        };

        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            match service.store.get(id).await {
                Ok(Some(job)) if job.can_retry() => {
                    if let Err(e) = service.retry_job(id).await {
                        tracing::warn!(job_id = %id, error = %e, "Automatic retry failed");
                    }
                }
                _ => {}
            }
        });
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Tests
// ═══════════════════════════════════════════════════════════════════════════════
