//! Worker Pool - Manages concurrent job execution slots with tokio Semaphore.
//!
//! The `WorkerPool` provides:
//! - Configurable concurrency limits using tokio Semaphore
//! - Live rescaling that never interrupts in-flight work
//! - Resource budget admission (memory/cpu/disk)
//! - Pool statistics and health classification

use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use uuid::Uuid;

use crate::config::PoolConfig;
use crate::jobs::ResourceRequirements;

// ═══════════════════════════════════════════════════════════════════════════════
// Resource Budget
// ═══════════════════════════════════════════════════════════════════════════════

#[derive(Debug, Default, Clone, Copy)]
struct ResourceUsage {
    memory_mb: u64,
    cpu_milli: u64,
    disk_mb: u64,
}

/// Tracks resource headroom for running jobs against configured totals.
///
/// CPU is tracked in millicores to stay in integer arithmetic.
pub struct ResourceBudget {
    totals: Mutex<ResourceUsage>,
    used: Mutex<ResourceUsage>,
}

fn to_milli(cores: f64) -> u64 {
    (cores * 1000.0).round() as u64
}

impl ResourceBudget {
    fn new(memory_mb: u64, cpu_cores: f64, disk_mb: u64) -> Self {
        Self {
            totals: Mutex::new(ResourceUsage {
                memory_mb,
                cpu_milli: to_milli(cpu_cores),
                disk_mb,
            }),
            used: Mutex::new(ResourceUsage::default()),
        }
    }

    fn requirement_usage(requirements: &ResourceRequirements) -> ResourceUsage {
        ResourceUsage {
            memory_mb: requirements.memory_mb,
            cpu_milli: to_milli(requirements.cpu_cores),
            disk_mb: requirements.disk_mb,
        }
    }

    /// Whether the requirements fit the total budget at all, ignoring
    /// current usage. A job failing this check can never dispatch until the
    /// budget is reconfigured.
    pub fn can_ever_admit(&self, requirements: &ResourceRequirements) -> bool {
        let need = Self::requirement_usage(requirements);
        let totals = self.totals.lock();
        need.memory_mb <= totals.memory_mb
            && need.cpu_milli <= totals.cpu_milli
            && need.disk_mb <= totals.disk_mb
    }

    /// Whether the requirements fit the currently free headroom.
    pub fn can_admit(&self, requirements: &ResourceRequirements) -> bool {
        let need = Self::requirement_usage(requirements);
        let totals = self.totals.lock();
        let used = self.used.lock();
        used.memory_mb + need.memory_mb <= totals.memory_mb
            && used.cpu_milli + need.cpu_milli <= totals.cpu_milli
            && used.disk_mb + need.disk_mb <= totals.disk_mb
    }

    /// Reserve the requirements if they fit the current headroom.
    fn reserve(&self, requirements: &ResourceRequirements) -> bool {
        let need = Self::requirement_usage(requirements);
        let totals = self.totals.lock();
        let mut used = self.used.lock();
        let fits = used.memory_mb + need.memory_mb <= totals.memory_mb
            && used.cpu_milli + need.cpu_milli <= totals.cpu_milli
            && used.disk_mb + need.disk_mb <= totals.disk_mb;
        if fits {
            used.memory_mb += need.memory_mb;
            used.cpu_milli += need.cpu_milli;
            used.disk_mb += need.disk_mb;
        }
        fits
    }

    fn release(&self, amount: ResourceUsage) {
        let mut used = self.used.lock();
        used.memory_mb = used.memory_mb.saturating_sub(amount.memory_mb);
        used.cpu_milli = used.cpu_milli.saturating_sub(amount.cpu_milli);
        used.disk_mb = used.disk_mb.saturating_sub(amount.disk_mb);
    }

    /// Replace the total budget (live reconfiguration).
    pub fn set_totals(&self, memory_mb: u64, cpu_cores: f64, disk_mb: u64) {
        *self.totals.lock() = ResourceUsage {
            memory_mb,
            cpu_milli: to_milli(cpu_cores),
            disk_mb,
        };
    }

    /// Currently reserved memory in megabytes.
    pub fn used_memory_mb(&self) -> u64 {
        self.used.lock().memory_mb
    }
}

/// A held reservation against the pool's resource budget, released on drop.
pub struct ResourceReservation {
    budget: Arc<ResourceBudget>,
    amount: ResourceUsage,
}

impl Drop for ResourceReservation {
    fn drop(&mut self) {
        self.budget.release(self.amount);
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Worker Execution
// ═══════════════════════════════════════════════════════════════════════════════

/// Statistics for an individual worker execution.
#[derive(Debug, Clone)]
pub struct WorkerExecution {
    /// Unique ID for this execution
    pub id: Uuid,
    /// When the worker started
    pub started_at: Instant,
    /// When the worker finished (None if still running)
    pub finished_at: Option<Instant>,
    /// Whether the execution succeeded
    pub succeeded: Option<bool>,
}

impl WorkerExecution {
    fn new() -> Self {
        Self {
            id: Uuid::new_v4(),
            started_at: Instant::now(),
            finished_at: None,
            succeeded: None,
        }
    }

    fn complete(&mut self, success: bool) {
        self.finished_at = Some(Instant::now());
        self.succeeded = Some(success);
    }

    /// Get duration (if completed).
    pub fn duration(&self) -> Option<Duration> {
        self.finished_at.map(|f| f.duration_since(self.started_at))
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Pool Statistics (internal)
// ═══════════════════════════════════════════════════════════════════════════════

struct PoolStats {
    tasks_submitted: AtomicU64,
    tasks_succeeded: AtomicU64,
    tasks_failed: AtomicU64,
    tasks_unknown: AtomicU64,
    resource_rejections: AtomicU64,
    total_exec_time_us: AtomicU64,
    peak_concurrent: AtomicUsize,
    current_concurrent: AtomicUsize,
}

impl PoolStats {
    fn new() -> Self {
        Self {
            tasks_submitted: AtomicU64::new(0),
            tasks_succeeded: AtomicU64::new(0),
            tasks_failed: AtomicU64::new(0),
            tasks_unknown: AtomicU64::new(0),
            resource_rejections: AtomicU64::new(0),
            total_exec_time_us: AtomicU64::new(0),
            peak_concurrent: AtomicUsize::new(0),
            current_concurrent: AtomicUsize::new(0),
        }
    }

    fn record_submit(&self) {
        self.tasks_submitted.fetch_add(1, Ordering::Relaxed);
    }

    fn record_acquire(&self) {
        let current = self.current_concurrent.fetch_add(1, Ordering::Relaxed) + 1;
        self.peak_concurrent.fetch_max(current, Ordering::Relaxed);
    }

    fn record_release(&self) {
        self.current_concurrent.fetch_sub(1, Ordering::Relaxed);
    }

    fn record_success(&self) {
        self.tasks_succeeded.fetch_add(1, Ordering::Relaxed);
        self.record_release();
    }

    fn record_failure(&self) {
        self.tasks_failed.fetch_add(1, Ordering::Relaxed);
        self.record_release();
    }

    fn record_unknown(&self) {
        self.tasks_unknown.fetch_add(1, Ordering::Relaxed);
        self.record_release();
    }

    fn record_resource_rejection(&self) {
        self.resource_rejections.fetch_add(1, Ordering::Relaxed);
    }

    fn record_duration(&self, duration: Duration) {
        self.total_exec_time_us
            .fetch_add(duration.as_micros() as u64, Ordering::Relaxed);
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Worker Permit
// ═══════════════════════════════════════════════════════════════════════════════

struct PoolShared {
    name: String,
    semaphore: Arc<Semaphore>,
    /// Desired concurrency target
    capacity: AtomicUsize,
    /// Permits to forget as they come back from in-flight work after a shrink
    pending_shrink: AtomicUsize,
    stats: PoolStats,
    budget: Arc<ResourceBudget>,
    created_at: Instant,
}

impl PoolShared {
    // Consume one unit of pending shrink, if any.
    fn take_pending_shrink(&self) -> bool {
        let mut current = self.pending_shrink.load(Ordering::Acquire);
        while current > 0 {
            match self.pending_shrink.compare_exchange(
                current,
                current - 1,
                Ordering::AcqRel,
                Ordering::Acquire,
            ) {
                Ok(_) => return true,
                Err(actual) => current = actual,
            }
        }
        false
    }
}

/// A handle to an execution slot that releases when dropped.
///
/// The permit carries the job's resource reservation; both are released
/// together so admission headroom and concurrency stay in sync.
pub struct WorkerPermit {
    permit: Option<OwnedSemaphorePermit>,
    shared: Arc<PoolShared>,
    execution: WorkerExecution,
    _reservation: Option<ResourceReservation>,
}

impl WorkerPermit {
    /// Get the execution ID.
    pub fn id(&self) -> Uuid {
        self.execution.id
    }

    /// Elapsed time since the permit was acquired.
    pub fn elapsed(&self) -> Duration {
        self.execution.started_at.elapsed()
    }

    /// Mark this execution as successful.
    pub fn mark_success(mut self) {
        self.execution.complete(true);
        self.shared.stats.record_success();
        if let Some(duration) = self.execution.duration() {
            self.shared.stats.record_duration(duration);
        }
    }

    /// Mark this execution as failed.
    pub fn mark_failure(mut self) {
        self.execution.complete(false);
        self.shared.stats.record_failure();
        if let Some(duration) = self.execution.duration() {
            self.shared.stats.record_duration(duration);
        }
    }
}

impl Drop for WorkerPermit {
    fn drop(&mut self) {
        // If not explicitly completed, count as unknown
        if self.execution.finished_at.is_none() {
            self.shared.stats.record_unknown();
        }
        if let Some(permit) = self.permit.take() {
            if self.shared.take_pending_shrink() {
                // Absorb this permit instead of returning it: the pool was
                // shrunk while this slot was in flight
                permit.forget();
            }
        }
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Worker Pool
// ═══════════════════════════════════════════════════════════════════════════════

/// Manages bounded concurrent execution slots using tokio Semaphore.
pub struct WorkerPool {
    shared: Arc<PoolShared>,
    /// Guards capacity/semaphore invariants during rescaling
    scale_lock: Mutex<()>,
}

impl WorkerPool {
    /// Create a new worker pool.
    pub fn new(config: PoolConfig) -> Self {
        let semaphore = Arc::new(Semaphore::new(config.max_workers));

        tracing::info!(
            pool_name = %config.name,
            max_workers = config.max_workers,
            memory_budget_mb = config.memory_budget_mb,
            "Worker pool created"
        );

        Self {
            shared: Arc::new(PoolShared {
                name: config.name,
                semaphore,
                capacity: AtomicUsize::new(config.max_workers),
                pending_shrink: AtomicUsize::new(0),
                stats: PoolStats::new(),
                budget: Arc::new(ResourceBudget::new(
                    config.memory_budget_mb,
                    config.cpu_budget_cores,
                    config.disk_budget_mb,
                )),
                created_at: Instant::now(),
            }),
            scale_lock: Mutex::new(()),
        }
    }

    /// Create a worker pool with default configuration.
    pub fn with_defaults() -> Self {
        Self::new(PoolConfig::default())
    }

    /// Get the pool name.
    pub fn name(&self) -> &str {
        &self.shared.name
    }

    /// Current concurrency target.
    pub fn capacity(&self) -> usize {
        self.shared.capacity.load(Ordering::Acquire)
    }

    /// Get current available permits.
    pub fn available_permits(&self) -> usize {
        self.shared.semaphore.available_permits()
    }

    /// Get current number of active workers.
    pub fn active_workers(&self) -> usize {
        let total = self.shared.capacity.load(Ordering::Acquire)
            + self.shared.pending_shrink.load(Ordering::Acquire);
        total.saturating_sub(self.shared.semaphore.available_permits())
    }

    /// Check if the pool has no free slots.
    pub fn is_at_capacity(&self) -> bool {
        self.shared.semaphore.available_permits() == 0
    }

    /// The resource budget consulted for admission.
    pub fn budget(&self) -> &ResourceBudget {
        &self.shared.budget
    }

    /// Try to acquire an execution slot without waiting.
    ///
    /// Returns `None` when the pool is at capacity or the job's resource
    /// requirements do not currently fit the budget; the caller leaves the
    /// job pending and tries again on a later dispatch tick.
    pub fn try_acquire(&self, requirements: &ResourceRequirements) -> Option<WorkerPermit> {
        self.shared.stats.record_submit();

        if !self.shared.budget.reserve(requirements) {
            self.shared.stats.record_resource_rejection();
            return None;
        }
        let reservation = ResourceReservation {
            budget: self.shared.budget.clone(),
            amount: ResourceBudget::requirement_usage(requirements),
        };

        match self.shared.semaphore.clone().try_acquire_owned() {
            Ok(permit) => {
                self.shared.stats.record_acquire();
                metrics::gauge!("morph_pool_active_workers", "pool" => self.shared.name.clone())
                    .set(self.active_workers() as f64);
                Some(WorkerPermit {
                    permit: Some(permit),
                    shared: self.shared.clone(),
                    execution: WorkerExecution::new(),
                    _reservation: Some(reservation),
                })
            }
            Err(_) => {
                // Reservation drops here, releasing the budget
                None
            }
        }
    }

    /// Rescale the pool to `new_max` concurrent slots.
    ///
    /// Growing frees new slots immediately. Shrinking removes free slots
    /// now and absorbs the remainder lazily as in-flight permits release;
    /// running work is never interrupted.
    pub fn scale_pool(&self, new_max: usize) {
        let _guard = self.scale_lock.lock();
        let current = self.shared.capacity.load(Ordering::Acquire);
        if new_max == current {
            return;
        }

        if new_max > current {
            let mut grow = new_max - current;
            // Cancel outstanding shrink first: those permits still exist
            while grow > 0 && self.shared.take_pending_shrink() {
                grow -= 1;
            }
            if grow > 0 {
                self.shared.semaphore.add_permits(grow);
            }
        } else {
            let shrink = current - new_max;
            let forgotten = self.shared.semaphore.forget_permits(shrink);
            let remainder = shrink - forgotten;
            if remainder > 0 {
                self.shared
                    .pending_shrink
                    .fetch_add(remainder, Ordering::AcqRel);
            }
        }

        self.shared.capacity.store(new_max, Ordering::Release);

        tracing::info!(
            pool_name = %self.shared.name,
            old_max = current,
            new_max = new_max,
            "Worker pool rescaled"
        );
        metrics::gauge!("morph_pool_capacity", "pool" => self.shared.name.clone())
            .set(new_max as f64);
    }

    /// Get pool statistics.
    pub fn stats(&self) -> WorkerPoolStats {
        let stats = &self.shared.stats;
        let tasks_submitted = stats.tasks_submitted.load(Ordering::Relaxed);
        let tasks_succeeded = stats.tasks_succeeded.load(Ordering::Relaxed);
        let tasks_failed = stats.tasks_failed.load(Ordering::Relaxed);
        let total_completed = tasks_succeeded + tasks_failed;

        let avg_exec_time_us = if total_completed > 0 {
            stats.total_exec_time_us.load(Ordering::Relaxed) / total_completed
        } else {
            0
        };

        WorkerPoolStats {
            name: self.shared.name.clone(),
            capacity: self.capacity(),
            available_permits: self.available_permits(),
            active_workers: self.active_workers(),
            tasks_submitted,
            tasks_succeeded,
            tasks_failed,
            tasks_unknown: stats.tasks_unknown.load(Ordering::Relaxed),
            resource_rejections: stats.resource_rejections.load(Ordering::Relaxed),
            peak_concurrent: stats.peak_concurrent.load(Ordering::Relaxed),
            avg_exec_time_us,
            uptime_secs: self.shared.created_at.elapsed().as_secs(),
        }
    }

    /// Check if the pool is healthy.
    pub fn is_healthy(&self) -> bool {
        let stats = self.stats();

        let failure_rate = if stats.tasks_succeeded + stats.tasks_failed > 0 {
            stats.tasks_failed as f64 / (stats.tasks_succeeded + stats.tasks_failed) as f64
        } else {
            0.0
        };

        failure_rate < 0.5
    }
}

impl Default for WorkerPool {
    fn default() -> Self {
        Self::with_defaults()
    }
}

/// Statistics for the worker pool.
#[derive(Debug, Clone)]
pub struct WorkerPoolStats {
    /// Pool name
    pub name: String,
    /// Current concurrency target
    pub capacity: usize,
    /// Currently available permits
    pub available_permits: usize,
    /// Currently active workers
    pub active_workers: usize,
    /// Total slot requests
    pub tasks_submitted: u64,
    /// Successfully completed tasks
    pub tasks_succeeded: u64,
    /// Failed tasks
    pub tasks_failed: u64,
    /// Tasks with unknown outcome
    pub tasks_unknown: u64,
    /// Slot requests rejected on resource headroom
    pub resource_rejections: u64,
    /// Peak concurrent workers observed
    pub peak_concurrent: usize,
    /// Average execution time (microseconds)
    pub avg_exec_time_us: u64,
    /// Pool uptime in seconds
    pub uptime_secs: u64,
}

impl WorkerPoolStats {
    /// Calculate success rate as a percentage.
    pub fn success_rate(&self) -> f64 {
        let total = self.tasks_succeeded + self.tasks_failed;
        if total == 0 {
            100.0
        } else {
            (self.tasks_succeeded as f64 / total as f64) * 100.0
        }
    }

    /// Calculate utilization as a percentage.
    pub fn utilization(&self) -> f64 {
        if self.capacity == 0 {
            return 0.0;
        }
        (self.active_workers as f64 / self.capacity as f64) * 100.0
    }

    /// Calculate throughput (tasks per second).
    pub fn throughput(&self) -> f64 {
        if self.uptime_secs == 0 {
            0.0
        } else {
            (self.tasks_succeeded + self.tasks_failed) as f64 / self.uptime_secs as f64
        }
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Tests
// ═══════════════════════════════════════════════════════════════════════════════

#[cfg(test)]
mod tests {
    use super::*;

    fn small_pool(max_workers: usize) -> WorkerPool {
        WorkerPool::new(PoolConfig {
            max_workers,
            ..Default::default()
        })
    }

    fn no_resources() -> ResourceRequirements {
        ResourceRequirements {
            memory_mb: 0,
            cpu_cores: 0.0,
            disk_mb: 0,
        }
    }

    #[test]
    fn test_pool_creation() {
        let pool = WorkerPool::with_defaults();
        assert_eq!(pool.capacity(), 4);
        assert_eq!(pool.available_permits(), 4);
        assert_eq!(pool.active_workers(), 0);
        assert!(!pool.is_at_capacity());
    }

    #[tokio::test]
    async fn test_acquire_release() {
        let pool = small_pool(2);

        let permit1 = pool.try_acquire(&no_resources()).unwrap();
        assert_eq!(pool.available_permits(), 1);
        assert_eq!(pool.active_workers(), 1);

        let permit2 = pool.try_acquire(&no_resources()).unwrap();
        assert!(pool.is_at_capacity());
        assert!(pool.try_acquire(&no_resources()).is_none());

        permit1.mark_success();
        assert_eq!(pool.available_permits(), 1);

        permit2.mark_failure();
        assert_eq!(pool.available_permits(), 2);

        let stats = pool.stats();
        assert_eq!(stats.tasks_succeeded, 1);
        assert_eq!(stats.tasks_failed, 1);
    }

    #[tokio::test]
    async fn test_resource_admission() {
        let pool = WorkerPool::new(PoolConfig {
            max_workers: 8,
            memory_budget_mb: 1024,
            cpu_budget_cores: 4.0,
            disk_budget_mb: 4096,
            ..Default::default()
        });

        let big = ResourceRequirements {
            memory_mb: 800,
            cpu_cores: 1.0,
            disk_mb: 100,
        };

        let permit = pool.try_acquire(&big).unwrap();
        // Second big job exceeds memory headroom even with free slots
        assert!(pool.try_acquire(&big).is_none());
        let stats = pool.stats();
        assert_eq!(stats.resource_rejections, 1);

        permit.mark_success();
        // Headroom restored with the slot
        assert!(pool.try_acquire(&big).is_some());
    }

    #[test]
    fn test_can_ever_admit() {
        let pool = WorkerPool::new(PoolConfig {
            memory_budget_mb: 1024,
            ..Default::default()
        });
        let impossible = ResourceRequirements {
            memory_mb: 100_000,
            cpu_cores: 1.0,
            disk_mb: 10,
        };
        assert!(!pool.budget().can_ever_admit(&impossible));
        assert!(pool.budget().can_ever_admit(&ResourceRequirements::default()));
    }

    #[tokio::test]
    async fn test_scale_up() {
        let pool = small_pool(1);
        let _permit = pool.try_acquire(&no_resources()).unwrap();
        assert!(pool.try_acquire(&no_resources()).is_none());

        pool.scale_pool(3);
        assert_eq!(pool.capacity(), 3);
        assert!(pool.try_acquire(&no_resources()).is_some());
    }

    #[tokio::test]
    async fn test_scale_down_never_interrupts_in_flight() {
        let pool = small_pool(4);
        let p1 = pool.try_acquire(&no_resources()).unwrap();
        let p2 = pool.try_acquire(&no_resources()).unwrap();
        let p3 = pool.try_acquire(&no_resources()).unwrap();
        assert_eq!(pool.active_workers(), 3);

        // Shrink below the in-flight count: nothing is interrupted
        pool.scale_pool(1);
        assert_eq!(pool.capacity(), 1);
        assert_eq!(pool.active_workers(), 3);
        assert!(pool.try_acquire(&no_resources()).is_none());

        // As in-flight permits release, the shrink is absorbed first
        p1.mark_success();
        p2.mark_success();
        assert!(pool.try_acquire(&no_resources()).is_none());

        p3.mark_success();
        assert_eq!(pool.active_workers(), 0);
        // Exactly one slot remains
        let q1 = pool.try_acquire(&no_resources()).unwrap();
        assert!(pool.try_acquire(&no_resources()).is_none());
        q1.mark_success();
    }

    #[tokio::test]
    async fn test_scale_up_cancels_pending_shrink() {
        let pool = small_pool(3);
        let p1 = pool.try_acquire(&no_resources()).unwrap();
        let p2 = pool.try_acquire(&no_resources()).unwrap();
        let p3 = pool.try_acquire(&no_resources()).unwrap();

        pool.scale_pool(1);
        pool.scale_pool(3);
        assert_eq!(pool.capacity(), 3);

        p1.mark_success();
        p2.mark_success();
        p3.mark_success();
        assert_eq!(pool.available_permits(), 3);
    }

    #[tokio::test]
    async fn test_permit_drop_counts_unknown() {
        let pool = small_pool(1);
        {
            let _permit = pool.try_acquire(&no_resources()).unwrap();
        }
        let stats = pool.stats();
        assert_eq!(stats.tasks_unknown, 1);
        assert_eq!(pool.available_permits(), 1);
    }

    #[tokio::test]
    async fn test_concurrent_access() {
        let pool = Arc::new(small_pool(10));
        let mut handles = vec![];

        for _ in 0..20 {
            let pool_clone = pool.clone();
            handles.push(tokio::spawn(async move {
                loop {
                    if let Some(permit) = pool_clone.try_acquire(&no_resources()) {
                        tokio::time::sleep(Duration::from_millis(5)).await;
                        permit.mark_success();
                        break;
                    }
                    tokio::time::sleep(Duration::from_millis(1)).await;
                }
            }));
        }

        for handle in handles {
            handle.await.unwrap();
        }

        let stats = pool.stats();
        assert_eq!(stats.tasks_succeeded, 20);
        assert!(stats.peak_concurrent <= 10);
        assert_eq!(pool.active_workers(), 0);
    }

    #[test]
    fn test_stats_calculations() {
        let stats = WorkerPoolStats {
            name: "test".to_string(),
            capacity: 10,
            available_permits: 3,
            active_workers: 7,
            tasks_submitted: 100,
            tasks_succeeded: 80,
            tasks_failed: 20,
            tasks_unknown: 0,
            resource_rejections: 5,
            peak_concurrent: 10,
            avg_exec_time_us: 5000,
            uptime_secs: 60,
        };

        assert_eq!(stats.success_rate(), 80.0);
        assert_eq!(stats.utilization(), 70.0);
        assert!((stats.throughput() - 1.667).abs() < 0.01);
    }
}
