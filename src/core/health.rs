//! Worker liveness: heartbeat records, sweep classification, and reclamation
//! of jobs held by dead workers.

use std::collections::HashMap;
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

use crate::core::job::{JobId, WorkerId};
use crate::core::queue::JobQueue;
use crate::util::clock::now_ms;

/// Worker lifecycle state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkerState {
    /// Registered, acquiring resources.
    Starting,
    /// Waiting for a claimable job.
    Idle,
    /// Running a handler.
    Processing,
    /// Shutdown requested; finishing or abandoning current work.
    Stopping,
    /// Fully stopped and deregistered.
    Stopped,
}

/// Liveness record for one worker. `current_job_id` is set iff the worker is
/// processing.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkerRecord {
    /// The worker's id.
    pub worker_id: WorkerId,
    /// Pool the worker serves.
    pub pool: String,
    /// Current lifecycle state.
    pub state: WorkerState,
    /// Last heartbeat, ms since epoch.
    pub last_heartbeat_ms: u128,
    /// Job held while processing.
    pub current_job_id: Option<JobId>,
}

/// Liveness classification produced by a sweep.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Liveness {
    /// Heartbeat within the stuck threshold.
    Alive,
    /// Heartbeat missed but within the dead threshold. Advisory only: the
    /// job is left with the worker, which may yet recover.
    Stuck,
    /// Heartbeat missed past the dead threshold; record reaped and job
    /// requeued.
    Dead,
}

/// Sweep thresholds. Configuration, not constants: the right values depend on
/// the job-duration distribution of each deployment's pools.
#[derive(Debug, Clone, Copy)]
pub struct HealthThresholds {
    /// No heartbeat for this long: worker is stuck.
    pub stuck_after: Duration,
    /// No heartbeat for this long: worker is dead.
    pub dead_after: Duration,
}

/// Outcome of one sweep, for logs and tests.
#[derive(Debug, Default, Clone)]
pub struct SweepReport {
    /// Workers with a recent heartbeat.
    pub alive: usize,
    /// Workers logged as stuck this sweep.
    pub stuck: Vec<WorkerId>,
    /// Workers reaped as dead this sweep.
    pub dead: Vec<WorkerId>,
    /// Jobs requeued from dead workers.
    pub requeued: Vec<JobId>,
}

/// Records worker heartbeats, classifies liveness, and reclaims jobs held by
/// dead workers.
///
/// All record access goes through one mutex, so a heartbeat can never land
/// between a sweep's classification and its reclamation: the sweep holds the
/// lock across both.
pub struct HealthRegistry {
    records: Mutex<HashMap<WorkerId, WorkerRecord>>,
    queue: Arc<JobQueue>,
    thresholds: HealthThresholds,
}

impl HealthRegistry {
    /// Create a registry reclaiming through the given queue.
    #[must_use]
    pub fn new(queue: Arc<JobQueue>, thresholds: HealthThresholds) -> Self {
        Self {
            records: Mutex::new(HashMap::new()),
            queue,
            thresholds,
        }
    }

    /// Register a worker in `Starting` state.
    pub fn register(&self, worker_id: WorkerId, pool: impl Into<String>) {
        let record = WorkerRecord {
            worker_id,
            pool: pool.into(),
            state: WorkerState::Starting,
            last_heartbeat_ms: now_ms(),
            current_job_id: None,
        };
        self.records.lock().insert(worker_id, record);
    }

    /// Record a heartbeat for a worker. Unknown workers are ignored (they
    /// were reaped or already deregistered).
    pub fn record_heartbeat(&self, worker_id: WorkerId) {
        if let Some(record) = self.records.lock().get_mut(&worker_id) {
            record.last_heartbeat_ms = now_ms();
        }
    }

    /// Update a worker's state, also counting as a heartbeat. The processing
    /// invariant is enforced here: `current_job_id` is kept iff the state is
    /// `Processing`.
    pub fn set_state(&self, worker_id: WorkerId, state: WorkerState, job: Option<JobId>) {
        if let Some(record) = self.records.lock().get_mut(&worker_id) {
            record.state = state;
            record.current_job_id = if state == WorkerState::Processing {
                job
            } else {
                None
            };
            record.last_heartbeat_ms = now_ms();
        }
    }

    /// Remove a worker's record on graceful stop.
    pub fn deregister(&self, worker_id: WorkerId) {
        self.records.lock().remove(&worker_id);
    }

    /// Workers currently registered for a pool in a runnable state.
    #[must_use]
    pub fn live_worker_count(&self, pool: &str) -> usize {
        self.records
            .lock()
            .values()
            .filter(|r| {
                r.pool == pool
                    && matches!(
                        r.state,
                        WorkerState::Starting | WorkerState::Idle | WorkerState::Processing
                    )
            })
            .count()
    }

    /// Snapshot of all worker records.
    #[must_use]
    pub fn workers(&self) -> Vec<WorkerRecord> {
        self.records.lock().values().cloned().collect()
    }

    /// The job a worker currently holds, per its record.
    #[must_use]
    pub fn held_job(&self, worker_id: WorkerId) -> Option<JobId> {
        self.records
            .lock()
            .get(&worker_id)
            .and_then(|r| r.current_job_id)
    }

    /// Classify one record's heartbeat age against the thresholds.
    #[must_use]
    pub fn classify(&self, record: &WorkerRecord, now: u128) -> Liveness {
        let silent_for = now.saturating_sub(record.last_heartbeat_ms);
        if silent_for >= self.thresholds.dead_after.as_millis() {
            Liveness::Dead
        } else if silent_for >= self.thresholds.stuck_after.as_millis() {
            Liveness::Stuck
        } else {
            Liveness::Alive
        }
    }

    /// Classify every worker against `now`: alive, stuck (logged, job left
    /// running), or dead (record reaped, held job requeued for another
    /// claim). Safe to run concurrently with claim/complete/fail and
    /// heartbeats; classification and reclamation happen under one lock so a
    /// late heartbeat is never trampled.
    pub fn sweep(&self, now: u128) -> SweepReport {
        let mut report = SweepReport::default();

        let mut records = self.records.lock();
        let mut reaped: Vec<WorkerRecord> = Vec::new();
        records.retain(|_, record| match self.classify(record, now) {
            Liveness::Dead => {
                reaped.push(record.clone());
                false
            }
            Liveness::Stuck => {
                tracing::warn!(
                    worker_id = %record.worker_id,
                    pool = %record.pool,
                    last_heartbeat_ms = record.last_heartbeat_ms as u64,
                    job = ?record.current_job_id,
                    "worker stuck: heartbeat overdue"
                );
                report.stuck.push(record.worker_id);
                true
            }
            Liveness::Alive => {
                report.alive += 1;
                true
            }
        });

        for record in reaped {
            tracing::warn!(
                worker_id = %record.worker_id,
                pool = %record.pool,
                "worker dead: reaping and reclaiming its job"
            );
            report.dead.push(record.worker_id);
            if let Some(job_id) = record.current_job_id {
                if self.queue.requeue_if_claimed_by(
                    job_id,
                    record.worker_id,
                    "reclaimed: worker heartbeat lost",
                ) {
                    report.requeued.push(job_id);
                }
            }
        }
        report
    }

    /// Run `sweep` on an interval in a background thread until the returned
    /// handle is stopped or dropped.
    #[must_use]
    pub fn spawn_sweeper(self: &Arc<Self>, interval: Duration) -> SweeperHandle {
        let (stop_tx, stop_rx) = crossbeam_channel::bounded::<()>(1);
        let registry = Arc::clone(self);
        let handle = std::thread::Builder::new()
            .name("fd-health-sweeper".into())
            .spawn(move || loop {
                match stop_rx.recv_timeout(interval) {
                    Err(crossbeam_channel::RecvTimeoutError::Timeout) => {
                        registry.sweep(now_ms());
                    }
                    _ => break,
                }
            })
            .ok();
        SweeperHandle {
            stop_tx: Some(stop_tx),
            handle,
        }
    }
}

/// Stops the background sweeper when dropped.
pub struct SweeperHandle {
    stop_tx: Option<crossbeam_channel::Sender<()>>,
    handle: Option<JoinHandle<()>>,
}

impl SweeperHandle {
    /// Stop the sweeper and join its thread.
    pub fn stop(mut self) {
        self.shutdown();
    }

    fn shutdown(&mut self) {
        self.stop_tx.take();
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

impl Drop for SweeperHandle {
    fn drop(&mut self) {
        self.shutdown();
    }
}
