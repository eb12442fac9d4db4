//! Concurrency management: bounded worker pool and resource allocation.
//!
//! - **WorkerPool**: bounded, rescalable execution slots with resource
//!   budget admission
//! - **ResourceAllocator**: periodic rescaling from queue pressure per a
//!   pluggable strategy

pub mod allocator;
pub mod worker_pool;

pub use allocator::ResourceAllocator;
pub use worker_pool::{ResourceBudget, ResourceReservation, WorkerPermit, WorkerPool, WorkerPoolStats};
