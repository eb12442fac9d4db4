//! Queue lifecycle events for real-time subscribers.
//!
//! Events are fanned out over a `tokio::sync::broadcast` channel and are
//! emitted in actual transition order: the emit happens inside the same call
//! that commits the transition to the status store.

use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

use super::job::{JobId, JobPriority, JobStatus, JobType};

/// Event published by the job queue.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum QueueEvent {
    /// A job passed validation and was persisted as pending
    JobEnqueued {
        job_id: JobId,
        job_type: JobType,
        priority: JobPriority,
    },
    /// A job transitioned status
    JobStatusUpdate {
        job_id: JobId,
        status: JobStatus,
        progress: u8,
    },
    /// A job was cancelled
    JobCancelled { job_id: JobId },
    /// Dispatch of new jobs was paused
    QueuePaused,
    /// Dispatch of new jobs resumed
    QueueResumed,
    /// Pending jobs were dropped from the queue
    QueueCleared { removed: usize },
}

/// Broadcast fan-out for queue events.
///
/// Slow subscribers miss events rather than blocking the queue (broadcast
/// channel lag semantics).
#[derive(Debug, Clone)]
pub struct EventBus {
    sender: broadcast::Sender<QueueEvent>,
}

impl EventBus {
    /// Create a bus with the given channel capacity.
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    /// Subscribe to queue events.
    pub fn subscribe(&self) -> broadcast::Receiver<QueueEvent> {
        self.sender.subscribe()
    }

    /// Emit an event to all current subscribers.
    pub fn emit(&self, event: QueueEvent) {
        // send only fails when there are no receivers, which is fine
        let _ = self.sender.send(event);
    }

    /// Number of active subscribers.
    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(256)
    }
}
