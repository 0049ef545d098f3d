//! Read-only observability models consumed by monitoring collaborators.

use serde::{Deserialize, Serialize};

use crate::core::health::WorkerRecord;
use crate::resources::monitor::ResourceTier;

/// Occupancy of one pool.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PoolOccupancy {
    /// Pool name.
    pub name: String,
    /// Jobs waiting for a claim.
    pub queued: usize,
    /// Jobs claimed or processing.
    pub in_flight: usize,
    /// Worker capacity at the current tier (with overrides applied).
    pub max_workers: u32,
    /// Whether the pool currently accepts work.
    pub enabled: bool,
}

/// Point-in-time view of the whole scheduler. Snapshots never mutate state.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchedulerSnapshot {
    /// Tier the scheduler is running at.
    pub tier: ResourceTier,
    /// Per-pool occupancy, in catalog order.
    pub pools: Vec<PoolOccupancy>,
    /// Jobs retained in the dead-letter store.
    pub dead_letter_count: usize,
    /// Liveness table of registered workers.
    pub workers: Vec<WorkerRecord>,
}
