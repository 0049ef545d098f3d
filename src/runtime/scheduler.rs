//! The scheduler facade: one constructed instance owning the control plane's
//! startup/shutdown lifecycle, passed to collaborators instead of looked up
//! globally.

use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

use parking_lot::Mutex;

use crate::config::SchedulerConfig;
use crate::core::dispatcher::Dispatcher;
use crate::core::error::DispatchError;
use crate::core::handler::{HandlerRegistry, JobHandler};
use crate::core::health::{HealthRegistry, SweeperHandle};
use crate::core::job::{JobId, JobOutcome, Priority};
use crate::core::queue::JobQueue;
use crate::core::supervisor::WorkerSupervisor;
use crate::resources::catalog::PoolCatalog;
use crate::resources::ledger::ResourceLedger;
use crate::resources::monitor::{HostResources, ResourceTier};
use crate::runtime::api::{PoolOccupancy, SchedulerSnapshot};
use crate::util::clock::now_ms;

/// Background tasks started by [`Scheduler::start`].
struct Background {
    sweeper: SweeperHandle,
    janitor_stop: crossbeam_channel::Sender<()>,
    janitor: Option<JoinHandle<()>>,
}

/// The assembled scheduler. Construct via
/// [`SchedulerBuilder`](crate::builders::SchedulerBuilder), register handlers,
/// then [`start`](Self::start).
pub struct Scheduler {
    pub(crate) resources: HostResources,
    pub(crate) tier: ResourceTier,
    pub(crate) catalog: Arc<PoolCatalog>,
    pub(crate) ledger: Arc<ResourceLedger>,
    pub(crate) queue: Arc<JobQueue>,
    pub(crate) health: Arc<HealthRegistry>,
    pub(crate) handlers: Arc<HandlerRegistry>,
    pub(crate) dispatcher: Dispatcher,
    pub(crate) supervisor: Arc<WorkerSupervisor>,
    pub(crate) config: SchedulerConfig,
    background: Mutex<Option<Background>>,
}

impl Scheduler {
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn assemble(
        resources: HostResources,
        tier: ResourceTier,
        catalog: Arc<PoolCatalog>,
        ledger: Arc<ResourceLedger>,
        queue: Arc<JobQueue>,
        health: Arc<HealthRegistry>,
        handlers: Arc<HandlerRegistry>,
        dispatcher: Dispatcher,
        supervisor: Arc<WorkerSupervisor>,
        config: SchedulerConfig,
    ) -> Self {
        Self {
            resources,
            tier,
            catalog,
            ledger,
            queue,
            health,
            handlers,
            dispatcher,
            supervisor,
            config,
            background: Mutex::new(None),
        }
    }

    /// Register processing logic for a pool. Must happen before `start` for
    /// the pool to receive workers.
    pub fn register_handler(&self, pool: impl Into<String>, handler: Arc<dyn JobHandler>) {
        self.handlers.register(pool, handler);
    }

    /// Spawn workers for every pool and start the background sweep and
    /// retention pruning.
    pub fn start(&self) -> Result<(), DispatchError> {
        self.supervisor.spawn_all()?;

        let sweeper = self.health.spawn_sweeper(self.config.sweep_interval());

        let retention = self.config.completed_retention();
        let (janitor_stop, stop_rx) = crossbeam_channel::bounded::<()>(1);
        let queue = Arc::clone(&self.queue);
        let interval = self.config.sweep_interval().max(Duration::from_millis(100));
        let janitor = std::thread::Builder::new()
            .name("fd-janitor".into())
            .spawn(move || loop {
                match stop_rx.recv_timeout(interval) {
                    Err(crossbeam_channel::RecvTimeoutError::Timeout) => {
                        queue.prune_completed(retention, now_ms());
                    }
                    _ => break,
                }
            })
            .ok();

        *self.background.lock() = Some(Background {
            sweeper,
            janitor_stop,
            janitor,
        });
        tracing::info!(tier = %self.tier, "scheduler started");
        Ok(())
    }

    /// Stop background tasks and shut workers down within the configured
    /// grace period, requeueing any job still held by a terminated worker.
    pub fn shutdown(&self) {
        if let Some(background) = self.background.lock().take() {
            background.sweeper.stop();
            drop(background.janitor_stop);
            if let Some(handle) = background.janitor {
                let _ = handle.join();
            }
        }
        self.supervisor.shutdown_all(self.config.shutdown_grace());
        tracing::info!("scheduler stopped");
    }

    /// Enqueue with the configured defaults.
    pub fn enqueue(&self, pool: &str, payload: serde_json::Value) -> Result<JobId, DispatchError> {
        self.dispatcher.enqueue(pool, payload)
    }

    /// Enqueue with explicit priority and retry budget.
    pub fn enqueue_with(
        &self,
        pool: &str,
        payload: serde_json::Value,
        priority: Priority,
        max_retries: u32,
    ) -> Result<JobId, DispatchError> {
        self.dispatcher.enqueue_with(pool, payload, priority, max_retries)
    }

    /// Block until the job completes or the timeout elapses.
    pub fn wait_for_result(
        &self,
        job_id: JobId,
        timeout: Duration,
    ) -> Result<JobOutcome, DispatchError> {
        self.dispatcher.wait_for_result(job_id, timeout)
    }

    /// Enqueue and wait for the outcome.
    pub fn enqueue_and_wait(
        &self,
        pool: &str,
        payload: serde_json::Value,
        timeout: Duration,
    ) -> Result<JobOutcome, DispatchError> {
        self.dispatcher.enqueue_and_wait(pool, payload, timeout)
    }

    /// The tier this scheduler runs at.
    #[must_use]
    pub fn tier(&self) -> ResourceTier {
        self.tier
    }

    /// The host resources the tier was derived from.
    #[must_use]
    pub fn resources(&self) -> &HostResources {
        &self.resources
    }

    /// Read-only snapshot: pool occupancy, queue depths, dead-letter count,
    /// worker liveness.
    #[must_use]
    pub fn snapshot(&self) -> SchedulerSnapshot {
        let pools = self
            .catalog
            .pools()
            .map(|pool| PoolOccupancy {
                name: pool.name.clone(),
                queued: self.queue.depth(&pool.name),
                in_flight: self.queue.in_flight(&pool.name),
                max_workers: pool.max_workers,
                enabled: self.catalog.is_enabled(&pool.name),
            })
            .collect();
        SchedulerSnapshot {
            tier: self.tier,
            pools,
            dead_letter_count: self.queue.dead_letter_count(),
            workers: self.health.workers(),
        }
    }

    /// Dead-letter entries retained for operator inspection.
    #[must_use]
    pub fn dead_letters(&self) -> Vec<crate::core::job::DeadLetterEntry> {
        self.queue.dead_letters()
    }

    /// Snapshot of one job record, while retained.
    #[must_use]
    pub fn job(&self, job_id: JobId) -> Option<crate::core::job::Job> {
        self.queue.job(job_id)
    }

    /// Currently unallocated units for a resource kind.
    #[must_use]
    pub fn available_resources(&self, kind: crate::resources::ledger::ResourceKind) -> u32 {
        self.ledger.available(kind)
    }
}

impl Drop for Scheduler {
    fn drop(&mut self) {
        if self.background.lock().is_some() {
            self.shutdown();
        }
    }
}
