//! Resource allocator - periodically rescales the worker pool from queue
//! pressure.
//!
//! The allocator is the only caller of `scale_pool`; the queue never resizes
//! the pool directly, so there is a single source of scaling decisions.
//! Configuration (interval, bounds, strategy) is re-read from the watch
//! channel at the start of every tick and takes effect without restart.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};

use parking_lot::Mutex;
use tokio::sync::watch;

use crate::config::{AllocatorConfig, Config, ScalingStrategy};
use crate::jobs::JobStatusStore;

use super::worker_pool::WorkerPool;

/// Pressure observations for one allocator tick.
#[derive(Debug, Clone, Copy)]
struct TickObservation {
    pending: usize,
    active: usize,
    capacity: usize,
}

/// Internal counters for the conservative strategy.
#[derive(Debug, Default)]
struct SustainState {
    high_ticks: u32,
    low_ticks: u32,
}

/// Periodically rescales the worker pool within configured bounds.
pub struct ResourceAllocator {
    pool: Arc<WorkerPool>,
    store: Arc<JobStatusStore>,
    config_rx: watch::Receiver<Config>,
    running: AtomicBool,
    shutdown: Mutex<Option<watch::Sender<bool>>>,
    /// Back-reference for the spawned allocation loop
    self_ref: Weak<Self>,
}

impl ResourceAllocator {
    /// Create an allocator over the given pool and store.
    pub fn new(
        pool: Arc<WorkerPool>,
        store: Arc<JobStatusStore>,
        config_rx: watch::Receiver<Config>,
    ) -> Arc<Self> {
        Arc::new_cyclic(|self_ref| Self {
            pool,
            store,
            config_rx,
            running: AtomicBool::new(false),
            shutdown: Mutex::new(None),
            self_ref: self_ref.clone(),
        })
    }

    /// Whether the allocation loop is running.
    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }

    /// Start the allocation loop. Idempotent: a second start is a no-op.
    pub fn start(&self) {
        let Some(allocator) = self.self_ref.upgrade() else {
            return;
        };
        if self.running.swap(true, Ordering::AcqRel) {
            tracing::debug!("Allocator already running, start ignored");
            return;
        }

        let (shutdown_tx, mut shutdown_rx) = watch::channel(false);
        *self.shutdown.lock() = Some(shutdown_tx);

        tokio::spawn(async move {
            tracing::info!("Resource allocator started");
            let mut sustain = SustainState::default();

            loop {
                // Sleep-per-iteration rather than a fixed interval so a
                // reconfigured check_interval applies on the next tick
                let interval = allocator.config_rx.borrow().allocator.check_interval;
                tokio::select! {
                    _ = shutdown_rx.changed() => {
                        if *shutdown_rx.borrow() {
                            break;
                        }
                    }
                    _ = tokio::time::sleep(interval) => {
                        allocator.tick(&mut sustain).await;
                    }
                }
            }

            tracing::info!("Resource allocator stopped");
        });
    }

    /// Stop the allocation loop. Idempotent: stopping a stopped allocator is
    /// a no-op.
    pub fn stop(&self) {
        if !self.running.swap(false, Ordering::AcqRel) {
            return;
        }
        if let Some(shutdown) = self.shutdown.lock().take() {
            let _ = shutdown.send(true);
        }
    }

    /// One allocation pass. Failures are logged, never propagated: a broken
    /// tick must not take the loop down.
    async fn tick(&self, sustain: &mut SustainState) {
        let config = self.config_rx.borrow().allocator.clone();

        let stats = match self.store.get_queue_stats().await {
            Ok(stats) => stats,
            Err(e) => {
                tracing::warn!(error = %e, "Allocator tick skipped: queue stats unavailable");
                return;
            }
        };

        let observation = TickObservation {
            pending: stats.queue_length,
            active: self.pool.active_workers(),
            capacity: self.pool.capacity(),
        };

        let target = Self::compute_target(&config, observation, sustain);
        if target != observation.capacity {
            tracing::info!(
                pending = observation.pending,
                active = observation.active,
                capacity = observation.capacity,
                target = target,
                strategy = ?config.strategy,
                "Allocator rescaling pool"
            );
            self.pool.scale_pool(target);
        }
    }

    /// Compute the worker target for this tick, clamped to [min, max].
    fn compute_target(
        config: &AllocatorConfig,
        observation: TickObservation,
        sustain: &mut SustainState,
    ) -> usize {
        let capacity = observation.capacity.max(1);
        let pressure = observation.pending as f64 / capacity as f64;
        let utilization = observation.active as f64 / capacity as f64;

        let raw_target = match config.strategy {
            ScalingStrategy::Fixed => config.max_workers,
            ScalingStrategy::Adaptive => {
                if pressure >= config.scale_up_pressure {
                    capacity * 2
                } else if observation.pending == 0
                    && utilization < config.scale_down_utilization
                {
                    capacity / 2
                } else {
                    capacity
                }
            }
            ScalingStrategy::Conservative => {
                if pressure >= config.scale_up_pressure {
                    sustain.high_ticks += 1;
                    sustain.low_ticks = 0;
                } else if observation.pending == 0
                    && utilization < config.scale_down_utilization
                {
                    sustain.low_ticks += 1;
                    sustain.high_ticks = 0;
                } else {
                    sustain.high_ticks = 0;
                    sustain.low_ticks = 0;
                }

                if sustain.high_ticks >= config.sustain_ticks {
                    sustain.high_ticks = 0;
                    capacity * 2
                } else if sustain.low_ticks >= config.sustain_ticks {
                    sustain.low_ticks = 0;
                    capacity / 2
                } else {
                    capacity
                }
            }
        };

        // Never shrink below in-flight work; those slots drain on their own
        raw_target
            .max(observation.active.min(config.max_workers))
            .clamp(config.min_workers, config.max_workers)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ConfigurationService;
    use std::time::Duration;

    fn observation(pending: usize, active: usize, capacity: usize) -> TickObservation {
        TickObservation {
            pending,
            active,
            capacity,
        }
    }

    fn test_config(strategy: ScalingStrategy) -> AllocatorConfig {
        AllocatorConfig {
            min_workers: 1,
            max_workers: 16,
            strategy,
            scale_up_pressure: 2.0,
            scale_down_utilization: 0.25,
            sustain_ticks: 3,
            ..Default::default()
        }
    }

    #[test]
    fn test_adaptive_scales_up_under_pressure() {
        let config = test_config(ScalingStrategy::Adaptive);
        let mut sustain = SustainState::default();

        // 10 pending over 4 workers -> pressure 2.5 >= 2.0 -> double
        let target = ResourceAllocator::compute_target(&config, observation(10, 4, 4), &mut sustain);
        assert_eq!(target, 8);
    }

    #[test]
    fn test_adaptive_scales_down_when_idle() {
        let config = test_config(ScalingStrategy::Adaptive);
        let mut sustain = SustainState::default();

        let target = ResourceAllocator::compute_target(&config, observation(0, 0, 8), &mut sustain);
        assert_eq!(target, 4);
    }

    #[test]
    fn test_adaptive_holds_steady() {
        let config = test_config(ScalingStrategy::Adaptive);
        let mut sustain = SustainState::default();

        // Moderate pressure, busy workers: no change
        let target = ResourceAllocator::compute_target(&config, observation(3, 4, 4), &mut sustain);
        assert_eq!(target, 4);
    }

    #[test]
    fn test_target_clamped_to_bounds() {
        let config = test_config(ScalingStrategy::Adaptive);
        let mut sustain = SustainState::default();

        // Doubling 12 would exceed max_workers=16? 24 -> clamped
        let target =
            ResourceAllocator::compute_target(&config, observation(100, 12, 12), &mut sustain);
        assert_eq!(target, 16);

        // Halving 2 -> 1, not below min_workers
        let target = ResourceAllocator::compute_target(&config, observation(0, 0, 2), &mut sustain);
        assert_eq!(target, 1);
    }

    #[test]
    fn test_shrink_never_undercuts_active_workers() {
        let config = test_config(ScalingStrategy::Adaptive);
        let mut sustain = SustainState::default();

        // Idle queue but 6 jobs still in flight on 8 slots: 8/2=4 < 6
        let target = ResourceAllocator::compute_target(&config, observation(0, 1, 8), &mut sustain);
        assert_eq!(target, 4);

        let target = ResourceAllocator::compute_target(&config, observation(0, 6, 8), &mut sustain);
        // utilization 0.75 -> no shrink triggered anyway
        assert_eq!(target, 8);
    }

    #[test]
    fn test_conservative_requires_sustained_pressure() {
        let config = test_config(ScalingStrategy::Conservative);
        let mut sustain = SustainState::default();

        let pressured = observation(10, 4, 4);
        assert_eq!(
            ResourceAllocator::compute_target(&config, pressured, &mut sustain),
            4
        );
        assert_eq!(
            ResourceAllocator::compute_target(&config, pressured, &mut sustain),
            4
        );
        // Third consecutive pressured tick triggers the scale-up
        assert_eq!(
            ResourceAllocator::compute_target(&config, pressured, &mut sustain),
            8
        );
    }

    #[test]
    fn test_conservative_resets_on_calm_tick() {
        let config = test_config(ScalingStrategy::Conservative);
        let mut sustain = SustainState::default();

        let pressured = observation(10, 4, 4);
        let calm = observation(3, 4, 4);
        ResourceAllocator::compute_target(&config, pressured, &mut sustain);
        ResourceAllocator::compute_target(&config, calm, &mut sustain);
        ResourceAllocator::compute_target(&config, pressured, &mut sustain);
        assert_eq!(
            ResourceAllocator::compute_target(&config, pressured, &mut sustain),
            4
        );
    }

    #[test]
    fn test_fixed_pins_to_max() {
        let config = test_config(ScalingStrategy::Fixed);
        let mut sustain = SustainState::default();
        let target = ResourceAllocator::compute_target(&config, observation(0, 0, 4), &mut sustain);
        assert_eq!(target, 16);
    }

    #[tokio::test]
    async fn test_start_stop_idempotent() {
        let configuration = ConfigurationService::with_defaults();
        let pool = Arc::new(WorkerPool::with_defaults());
        let store = Arc::new(JobStatusStore::in_memory(10));
        let allocator = ResourceAllocator::new(pool, store, configuration.subscribe());

        allocator.start();
        allocator.start(); // no-op
        assert!(allocator.is_running());

        allocator.stop();
        allocator.stop(); // no-op
        assert!(!allocator.is_running());
    }

    #[tokio::test]
    async fn test_loop_rescales_pool() {
        let configuration = ConfigurationService::with_defaults();
        configuration.update(|c| {
            c.allocator.check_interval = Duration::from_millis(10);
            c.allocator.min_workers = 1;
            c.allocator.max_workers = 16;
            c.pool.max_workers = 2;
        });

        let pool = Arc::new(WorkerPool::new(configuration.current().pool));
        let store = Arc::new(JobStatusStore::in_memory(10));

        // Flood the queue with pending jobs
        use crate::jobs::{Job, JobRequest, JobType};
        for seq in 0..10 {
            let request = JobRequest::new("convert", serde_json::json!({}));
            let job = Job::from_request(request, JobType::Convert, seq, 3);
            store.save(&job).await.unwrap();
        }

        let allocator = ResourceAllocator::new(pool.clone(), store, configuration.subscribe());
        allocator.start();

        tokio::time::sleep(Duration::from_millis(100)).await;
        allocator.stop();

        assert!(pool.capacity() > 2, "pool should have grown under pressure");
    }
}
