//! Long-lived worker processes bound to one pool.
//!
//! Each worker is a dedicated OS thread with its own single-threaded tokio
//! runtime, so handler work cannot corrupt or stall the control plane. The
//! worker claims jobs through the queue's atomic operations, heartbeats on a
//! fixed interval in every non-stopped state (including during processing, so
//! long jobs are not mistaken for stalls), and routes every handler error
//! through `JobQueue::fail`; a bad job never takes the worker down.

use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use uuid::Uuid;

use crate::core::error::{DispatchError, HandlerError};
use crate::core::handler::JobHandler;
use crate::core::health::{HealthRegistry, WorkerState};
use crate::core::job::WorkerId;
use crate::core::queue::JobQueue;
use crate::resources::catalog::PoolDefinition;
use crate::resources::ledger::{Allocation, ResourceLedger};

/// Per-worker timing knobs, all operator-supplied.
#[derive(Debug, Clone, Copy)]
pub struct WorkerRuntimeConfig {
    /// Heartbeat cadence in every non-stopped state.
    pub heartbeat_interval: Duration,
    /// Upper bound on one parked wait for a claimable job.
    pub claim_poll_interval: Duration,
    /// How long `starting` may wait for the ledger before giving up.
    pub allocation_timeout: Duration,
    /// After a stop signal, how long a running handler may keep going before
    /// its job is abandoned and requeued.
    pub shutdown_grace: Duration,
}

/// Everything a worker thread needs, bundled for spawning.
pub(crate) struct WorkerContext {
    pub queue: Arc<JobQueue>,
    pub health: Arc<HealthRegistry>,
    pub ledger: Arc<ResourceLedger>,
    pub handler: Arc<dyn JobHandler>,
    pub pool: PoolDefinition,
    pub config: WorkerRuntimeConfig,
}

/// Handle to a spawned worker: stop signaling and bounded joining.
pub struct WorkerHandle {
    /// The worker's id.
    pub worker_id: WorkerId,
    /// Pool the worker serves.
    pub pool: String,
    stop: Arc<AtomicBool>,
    handle: Option<JoinHandle<()>>,
}

impl WorkerHandle {
    /// Ask the worker to stop after its current job (or the grace deadline).
    pub fn request_stop(&self) {
        self.stop.store(true, Ordering::Release);
    }

    /// Whether the worker thread has exited.
    #[must_use]
    pub fn is_finished(&self) -> bool {
        self.handle.as_ref().map_or(true, JoinHandle::is_finished)
    }

    /// Join the worker until `deadline`. Returns true when joined; a false
    /// return leaves the thread detached for the caller to clean up after.
    pub fn join_until(&mut self, deadline: Instant) -> bool {
        loop {
            if self.is_finished() {
                if let Some(handle) = self.handle.take() {
                    let _ = handle.join();
                }
                return true;
            }
            if Instant::now() >= deadline {
                return false;
            }
            std::thread::sleep(Duration::from_millis(5));
        }
    }
}

/// Outcome of driving one handler invocation.
enum JobRun {
    Finished(Result<serde_json::Value, HandlerError>),
    Abandoned,
}

/// Spawn a worker thread for a pool. The worker registers with the health
/// registry before the thread starts so supervisor counts are immediate.
pub(crate) fn spawn_worker(ctx: WorkerContext) -> Result<WorkerHandle, DispatchError> {
    let worker_id = Uuid::new_v4();
    let stop = Arc::new(AtomicBool::new(false));
    let thread_stop = Arc::clone(&stop);
    let pool_name = ctx.pool.name.clone();
    let health = Arc::clone(&ctx.health);

    health.register(worker_id, &pool_name);

    let handle = std::thread::Builder::new()
        .name(format!("fd-{pool_name}"))
        .spawn(move || run_worker(worker_id, &ctx, &thread_stop))
        .map_err(|e| {
            health.deregister(worker_id);
            DispatchError::Backend(format!("failed to spawn worker thread: {e}"))
        })?;

    Ok(WorkerHandle {
        worker_id,
        pool: pool_name,
        stop,
        handle: Some(handle),
    })
}

fn run_worker(worker_id: WorkerId, ctx: &WorkerContext, stop: &AtomicBool) {
    tracing::debug!(worker_id = %worker_id, pool = %ctx.pool.name, "worker starting");

    let rt = match tokio::runtime::Builder::new_current_thread()
        .enable_time()
        .build()
    {
        Ok(rt) => rt,
        Err(e) => {
            tracing::error!(worker_id = %worker_id, error = %e, "failed to build worker runtime");
            ctx.health.deregister(worker_id);
            return;
        }
    };

    // Starting: acquire the pool's resource cost for this worker's lifetime.
    let allocation = ctx.pool.category.resource_kind().map(|kind| Allocation {
        owner: worker_id.to_string(),
        pool: ctx.pool.name.clone(),
        kind,
        units: ctx.pool.resource_cost,
        exclusive_group: ctx.pool.exclusive_group.clone(),
    });
    if let Some(alloc) = &allocation {
        if alloc.units > 0 || alloc.exclusive_group.is_some() {
            if let Err(e) = ctx.ledger.wait_allocate(alloc, ctx.config.allocation_timeout) {
                tracing::warn!(
                    worker_id = %worker_id,
                    pool = %ctx.pool.name,
                    error = %e,
                    "worker could not acquire resources; exiting"
                );
                ctx.health.deregister(worker_id);
                return;
            }
        }
    }

    ctx.health.set_state(worker_id, WorkerState::Idle, None);

    let wait = ctx
        .config
        .claim_poll_interval
        .min(ctx.config.heartbeat_interval);

    while !stop.load(Ordering::Acquire) {
        let Some(job) = ctx.queue.claim_wait(&ctx.pool.name, worker_id, wait) else {
            if ctx.queue.is_closed() {
                break;
            }
            // Idle: no claimable job this interval. Heartbeat and try again.
            ctx.health.record_heartbeat(worker_id);
            continue;
        };

        let job_id = job.id;
        ctx.health
            .set_state(worker_id, WorkerState::Processing, Some(job_id));
        ctx.queue.mark_processing(job_id, worker_id);
        tracing::debug!(worker_id = %worker_id, job_id = %job_id, "worker executing job");

        let run = std::panic::catch_unwind(AssertUnwindSafe(|| {
            drive_handler(&rt, ctx, worker_id, stop, job.payload)
        }));

        match run {
            Ok(JobRun::Finished(Ok(result))) => {
                ctx.queue.complete(job_id, worker_id, result);
            }
            Ok(JobRun::Finished(Err(err))) => {
                tracing::warn!(worker_id = %worker_id, job_id = %job_id, error = %err, "handler failed");
                ctx.queue.fail(job_id, worker_id, &err.message);
            }
            Ok(JobRun::Abandoned) => {
                tracing::warn!(worker_id = %worker_id, job_id = %job_id, "job abandoned at shutdown grace");
                ctx.queue
                    .requeue_if_claimed_by(job_id, worker_id, "requeued: abandoned at shutdown");
            }
            Err(_) => {
                tracing::error!(worker_id = %worker_id, job_id = %job_id, "handler panicked");
                ctx.queue.fail(job_id, worker_id, "handler panicked");
            }
        }

        ctx.health.set_state(worker_id, WorkerState::Idle, None);
    }

    // Stopping → stopped: release resources and deregister.
    ctx.health.set_state(worker_id, WorkerState::Stopping, None);
    if let Some(alloc) = &allocation {
        ctx.ledger.release(alloc);
    }
    ctx.health.set_state(worker_id, WorkerState::Stopped, None);
    ctx.health.deregister(worker_id);
    tracing::debug!(worker_id = %worker_id, pool = %ctx.pool.name, "worker stopped");
}

/// Drive a handler to completion, heartbeating on the configured interval.
/// After a stop signal, the handler is given the shutdown grace and then
/// abandoned. Heartbeats come from the same task as the handler, so a handler
/// that never yields stops heartbeating and is eventually seen as stuck.
fn drive_handler(
    rt: &tokio::runtime::Runtime,
    ctx: &WorkerContext,
    worker_id: WorkerId,
    stop: &AtomicBool,
    payload: serde_json::Value,
) -> JobRun {
    rt.block_on(async {
        let mut ticker = tokio::time::interval(ctx.config.heartbeat_interval);
        // First tick completes immediately; consume it.
        ticker.tick().await;

        let handler_fut = ctx.handler.process(payload);
        tokio::pin!(handler_fut);
        let mut grace_deadline: Option<Instant> = None;

        loop {
            tokio::select! {
                result = &mut handler_fut => return JobRun::Finished(result),
                _ = ticker.tick() => {
                    ctx.health.record_heartbeat(worker_id);
                    if stop.load(Ordering::Acquire) {
                        let deadline = *grace_deadline
                            .get_or_insert_with(|| Instant::now() + ctx.config.shutdown_grace);
                        if Instant::now() >= deadline {
                            return JobRun::Abandoned;
                        }
                    }
                }
            }
        }
    })
}
