//! Worker supervision: sizing pools to tier-derived targets and graceful
//! shutdown with orphan requeue.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::Mutex;

use crate::core::error::DispatchError;
use crate::core::handler::HandlerRegistry;
use crate::core::health::HealthRegistry;
use crate::core::queue::JobQueue;
use crate::core::worker::{spawn_worker, WorkerContext, WorkerHandle, WorkerRuntimeConfig};
use crate::resources::catalog::PoolCatalog;
use crate::resources::ledger::{Allocation, ResourceLedger};

/// Spawns and terminates worker processes per pool according to tier-derived
/// targets; owns graceful shutdown.
pub struct WorkerSupervisor {
    catalog: Arc<PoolCatalog>,
    queue: Arc<JobQueue>,
    health: Arc<HealthRegistry>,
    ledger: Arc<ResourceLedger>,
    handlers: Arc<HandlerRegistry>,
    worker_config: WorkerRuntimeConfig,
    workers: Mutex<HashMap<String, Vec<WorkerHandle>>>,
}

impl WorkerSupervisor {
    /// Assemble a supervisor over the shared control-plane services.
    #[must_use]
    pub fn new(
        catalog: Arc<PoolCatalog>,
        queue: Arc<JobQueue>,
        health: Arc<HealthRegistry>,
        ledger: Arc<ResourceLedger>,
        handlers: Arc<HandlerRegistry>,
        worker_config: WorkerRuntimeConfig,
    ) -> Self {
        Self {
            catalog,
            queue,
            health,
            ledger,
            handlers,
            worker_config,
            workers: Mutex::new(HashMap::new()),
        }
    }

    /// Spawn or retire workers for one pool until its live count matches
    /// `target`. A pool with no registered handler gets no workers regardless
    /// of target.
    pub fn ensure_pool_size(&self, pool: &str, target: u32) -> Result<(), DispatchError> {
        let definition = self
            .catalog
            .get(pool)
            .ok_or_else(|| DispatchError::UnknownPool(pool.to_string()))?
            .clone();

        let handler = self.handlers.get(pool);
        let target = if handler.is_some() {
            target as usize
        } else {
            if target > 0 {
                tracing::warn!(pool, "no handler registered; pool gets no workers");
            }
            0
        };

        let mut workers = self.workers.lock();
        let entry = workers.entry(pool.to_string()).or_default();
        // Drop handles whose threads already exited (failed allocation, etc.).
        entry.retain(|h| !h.is_finished());

        while entry.len() > target {
            // Retire the newest first; they finish their current job per the
            // shutdown grace and exit on their own.
            if let Some(handle) = entry.pop() {
                tracing::info!(pool, worker_id = %handle.worker_id, "retiring worker");
                handle.request_stop();
            }
        }

        while entry.len() < target {
            let handler = handler
                .clone()
                .ok_or_else(|| DispatchError::Backend("handler vanished".into()))?;
            let handle = spawn_worker(WorkerContext {
                queue: Arc::clone(&self.queue),
                health: Arc::clone(&self.health),
                ledger: Arc::clone(&self.ledger),
                handler,
                pool: definition.clone(),
                config: self.worker_config,
            })?;
            tracing::info!(pool, worker_id = %handle.worker_id, "worker spawned");
            entry.push(handle);
        }
        Ok(())
    }

    /// Size every catalog pool to its tier-derived target.
    pub fn spawn_all(&self) -> Result<(), DispatchError> {
        for pool in self.catalog.pools() {
            self.ensure_pool_size(&pool.name, self.catalog.target_workers(&pool.name))?;
        }
        Ok(())
    }

    /// Live (not yet exited) workers currently tracked for a pool.
    #[must_use]
    pub fn worker_count(&self, pool: &str) -> usize {
        self.workers
            .lock()
            .get(pool)
            .map_or(0, |v| v.iter().filter(|h| !h.is_finished()).count())
    }

    /// Signal stopping to every worker, wait up to `grace`, then
    /// force-detach stragglers and requeue any job each was still holding.
    /// With `grace` zero, in-flight jobs are requeued immediately; they are
    /// never lost.
    pub fn shutdown_all(&self, grace: Duration) {
        tracing::info!(grace_ms = grace.as_millis() as u64, "supervisor shutdown");
        let deadline = Instant::now() + grace;

        let mut workers = self.workers.lock();
        for handles in workers.values() {
            for handle in handles {
                handle.request_stop();
            }
        }
        // Wake parked claimers so idle workers observe the stop promptly.
        self.queue.close();

        for (pool, handles) in workers.iter_mut() {
            for handle in handles.iter_mut() {
                if handle.join_until(deadline) {
                    continue;
                }
                // Straggler: reclaim on its behalf. The worker's own late
                // complete/fail will be ignored by the claim guard, and the
                // ledger release below is idempotent with the worker's own.
                tracing::warn!(
                    pool = %pool,
                    worker_id = %handle.worker_id,
                    "worker did not stop within grace; detaching"
                );
                if let Some(job_id) = self.health.held_job(handle.worker_id) {
                    if self.queue.requeue_if_claimed_by(
                        job_id,
                        handle.worker_id,
                        "requeued: worker terminated at shutdown",
                    ) {
                        tracing::info!(job_id = %job_id, "in-flight job requeued at shutdown");
                    }
                }
                if let Some(definition) = self.catalog.get(pool) {
                    if let Some(kind) = definition.category.resource_kind() {
                        self.ledger.release(&Allocation {
                            owner: handle.worker_id.to_string(),
                            pool: pool.clone(),
                            kind,
                            units: definition.resource_cost,
                            exclusive_group: definition.exclusive_group.clone(),
                        });
                    }
                }
                self.health.deregister(handle.worker_id);
            }
        }
        workers.clear();
    }
}
