//! The job queue: single source of truth for pending, in-flight, completed,
//! and dead-lettered work.
//!
//! One mutex guards all queue state, so `claim`, `complete`, `fail`, and the
//! health registry's requeue are serialized; a job is never handed to two
//! claimants. Ordering within a pool is by priority (lower value first) with
//! FIFO tie-break via a monotonic sequence. Result waiters park on a condvar
//! rather than polling.

use std::cmp::Ordering;
use std::collections::{BinaryHeap, HashMap};
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex};

use crate::core::error::DispatchError;
use crate::core::job::{DeadLetterEntry, Job, JobId, JobOutcome, JobStatus, WorkerId};
use crate::infra::journal::QueueJournal;
use crate::util::clock::now_ms;

/// Heap entry ordering claims: lowest priority value first, FIFO within a
/// priority level.
struct QueuedRef {
    priority: i32,
    seq: u64,
    job_id: JobId,
}

impl PartialEq for QueuedRef {
    fn eq(&self, other: &Self) -> bool {
        self.job_id == other.job_id
    }
}

impl Eq for QueuedRef {}

impl PartialOrd for QueuedRef {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for QueuedRef {
    fn cmp(&self, other: &Self) -> Ordering {
        // BinaryHeap is a max-heap; invert so the most urgent (lowest
        // priority value, then lowest sequence) surfaces first.
        other
            .priority
            .cmp(&self.priority)
            .then_with(|| other.seq.cmp(&self.seq))
    }
}

struct QueueInner {
    jobs: HashMap<JobId, Job>,
    ready: HashMap<String, BinaryHeap<QueuedRef>>,
    in_flight: HashMap<String, usize>,
    dead_letters: Vec<DeadLetterEntry>,
    journal: Option<QueueJournal>,
    seq: u64,
    closed: bool,
}

impl QueueInner {
    fn push_ready(&mut self, job_id: JobId, pool: &str, priority: i32) {
        self.seq += 1;
        self.ready.entry(pool.to_string()).or_default().push(QueuedRef {
            priority,
            seq: self.seq,
            job_id,
        });
    }

    fn pop_ready(&mut self, pool: &str) -> Option<JobId> {
        let heap = self.ready.get_mut(pool)?;
        loop {
            let entry = heap.pop()?;
            // Guard against refs whose job moved on since being queued.
            if self
                .jobs
                .get(&entry.job_id)
                .is_some_and(|j| j.status == JobStatus::Queued)
            {
                return Some(entry.job_id);
            }
        }
    }

    fn record_terminal(&self, job_id: JobId, status: JobStatus) {
        if let Some(journal) = &self.journal {
            if let Err(e) = journal.record_terminal(job_id, status) {
                tracing::error!(job_id = %job_id, error = %e, "journal write failed");
            }
        }
    }
}

/// Durable, priority-ordered, per-pool queue of job records.
///
/// The queue is the single mutator of job status; workers and the health
/// registry drive it only through the atomic operations below.
pub struct JobQueue {
    inner: Mutex<QueueInner>,
    /// Signaled on enqueue/requeue; claimers park here.
    work_available: Condvar,
    /// Signaled on terminal transitions; result waiters park here.
    job_terminal: Condvar,
}

impl Default for JobQueue {
    fn default() -> Self {
        Self::new()
    }
}

impl JobQueue {
    /// Create an in-memory queue.
    #[must_use]
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(QueueInner {
                jobs: HashMap::new(),
                ready: HashMap::new(),
                in_flight: HashMap::new(),
                dead_letters: Vec::new(),
                journal: None,
                seq: 0,
                closed: false,
            }),
            work_available: Condvar::new(),
            job_terminal: Condvar::new(),
        }
    }

    /// Create a queue backed by a journal, replaying any jobs that were
    /// enqueued but never finished.
    pub fn with_journal(journal: QueueJournal) -> Result<Self, DispatchError> {
        let replayed = journal.replay()?;
        let queue = Self::new();
        {
            let mut inner = queue.inner.lock();
            inner.journal = Some(journal);
            for job in replayed {
                tracing::info!(job_id = %job.id, pool = %job.pool, "requeued from journal");
                let pool = job.pool.clone();
                inner.push_ready(job.id, &pool, job.priority);
                inner.jobs.insert(job.id, job);
            }
        }
        Ok(queue)
    }

    /// Add a job to its pool's queue. Returns the job id.
    pub fn enqueue(&self, job: Job) -> Result<JobId, DispatchError> {
        let mut inner = self.inner.lock();
        if inner.closed {
            return Err(DispatchError::Shutdown);
        }
        let id = job.id;
        if let Some(journal) = &inner.journal {
            journal.record_enqueued(&job)?;
        }
        let pool = job.pool.clone();
        inner.push_ready(id, &pool, job.priority);
        inner.jobs.insert(id, job);
        drop(inner);
        // One condvar serves every pool's claimers; wake them all and let
        // each re-check its own pool.
        self.work_available.notify_all();
        Ok(id)
    }

    /// Atomically hand the most urgent queued job of a pool to one claimant.
    /// Concurrent claims on the same pool never observe the same job.
    pub fn claim(&self, pool: &str, worker_id: WorkerId) -> Option<Job> {
        let mut inner = self.inner.lock();
        Self::claim_locked(&mut inner, pool, worker_id)
    }

    /// Claim with a bounded wait: parks until work arrives, the queue closes,
    /// or the timeout elapses. Returns `None` on timeout or shutdown.
    pub fn claim_wait(&self, pool: &str, worker_id: WorkerId, timeout: Duration) -> Option<Job> {
        let deadline = Instant::now() + timeout;
        let mut inner = self.inner.lock();
        loop {
            if inner.closed {
                return None;
            }
            if let Some(job) = Self::claim_locked(&mut inner, pool, worker_id) {
                return Some(job);
            }
            if self.work_available.wait_until(&mut inner, deadline).timed_out() {
                if inner.closed {
                    return None;
                }
                return Self::claim_locked(&mut inner, pool, worker_id);
            }
        }
    }

    fn claim_locked(inner: &mut QueueInner, pool: &str, worker_id: WorkerId) -> Option<Job> {
        let job_id = inner.pop_ready(pool)?;
        *inner.in_flight.entry(pool.to_string()).or_insert(0) += 1;
        let job = inner.jobs.get_mut(&job_id)?;
        job.status = JobStatus::Claimed;
        job.claimed_by = Some(worker_id);
        Some(job.clone())
    }

    /// Mark a claimed job as actively processing. Ignored unless the caller
    /// still holds the claim.
    pub fn mark_processing(&self, job_id: JobId, worker_id: WorkerId) -> bool {
        let mut inner = self.inner.lock();
        match inner.jobs.get_mut(&job_id) {
            Some(job)
                if job.claimed_by == Some(worker_id) && job.status == JobStatus::Claimed =>
            {
                job.status = JobStatus::Processing;
                true
            }
            _ => false,
        }
    }

    /// Record a successful result. Ignored (returns false) when the caller no
    /// longer holds the claim, e.g. the job was reclaimed after the worker
    /// was declared dead.
    pub fn complete(&self, job_id: JobId, worker_id: WorkerId, result: serde_json::Value) -> bool {
        let mut inner = self.inner.lock();
        let Some(job) = inner.jobs.get_mut(&job_id) else {
            return false;
        };
        if job.claimed_by != Some(worker_id)
            || !matches!(job.status, JobStatus::Claimed | JobStatus::Processing)
        {
            tracing::warn!(job_id = %job_id, worker_id = %worker_id, "stale complete ignored");
            return false;
        }
        job.status = JobStatus::Succeeded;
        job.result = Some(result);
        job.terminal_at_ms = Some(now_ms());
        job.claimed_by = None;
        let pool = job.pool.clone();
        if let Some(n) = inner.in_flight.get_mut(&pool) {
            *n = n.saturating_sub(1);
        }
        inner.record_terminal(job_id, JobStatus::Succeeded);
        drop(inner);
        self.job_terminal.notify_all();
        true
    }

    /// Record a failed attempt. Retries until the budget is exhausted, then
    /// dead-letters: with `max_retries = k`, the k+1-th failure dead-letters.
    /// Ignored (returns false) when the caller no longer holds the claim.
    pub fn fail(&self, job_id: JobId, worker_id: WorkerId, error: &str) -> bool {
        let mut inner = self.inner.lock();
        let Some(job) = inner.jobs.get_mut(&job_id) else {
            return false;
        };
        if job.claimed_by != Some(worker_id)
            || !matches!(job.status, JobStatus::Claimed | JobStatus::Processing)
        {
            tracing::warn!(job_id = %job_id, worker_id = %worker_id, "stale fail ignored");
            return false;
        }

        job.attempt_count += 1;
        job.failure_history.push(error.to_string());
        job.claimed_by = None;
        let pool = job.pool.clone();

        if job.attempt_count > job.max_retries {
            job.status = JobStatus::DeadLettered;
            job.terminal_at_ms = Some(now_ms());
            let entry = DeadLetterEntry {
                job: job.clone(),
                failure_history: job.failure_history.clone(),
                dead_lettered_at_ms: now_ms(),
            };
            tracing::warn!(
                job_id = %job_id,
                pool = %pool,
                attempts = job.attempt_count,
                "job dead-lettered"
            );
            inner.dead_letters.push(entry);
            if let Some(n) = inner.in_flight.get_mut(&pool) {
                *n = n.saturating_sub(1);
            }
            inner.record_terminal(job_id, JobStatus::DeadLettered);
            drop(inner);
            self.job_terminal.notify_all();
        } else {
            job.status = JobStatus::Queued;
            let priority = job.priority;
            tracing::debug!(
                job_id = %job_id,
                pool = %pool,
                attempt = job.attempt_count,
                "job requeued for retry"
            );
            if let Some(n) = inner.in_flight.get_mut(&pool) {
                *n = n.saturating_sub(1);
            }
            inner.push_ready(job_id, &pool, priority);
            drop(inner);
            self.work_available.notify_all();
        }
        true
    }

    /// Return an orphaned job to the queue if (and only if) it is still
    /// claimed by the given worker. Does not charge an attempt: reclamation
    /// is a liveness event, not a handler failure. The note lands in the
    /// job's failure history for operators.
    pub fn requeue_if_claimed_by(&self, job_id: JobId, worker_id: WorkerId, note: &str) -> bool {
        let mut inner = self.inner.lock();
        let Some(job) = inner.jobs.get_mut(&job_id) else {
            return false;
        };
        if job.claimed_by != Some(worker_id)
            || !matches!(job.status, JobStatus::Claimed | JobStatus::Processing)
        {
            return false;
        }
        job.status = JobStatus::Queued;
        job.claimed_by = None;
        job.failure_history.push(note.to_string());
        let pool = job.pool.clone();
        let priority = job.priority;
        if let Some(n) = inner.in_flight.get_mut(&pool) {
            *n = n.saturating_sub(1);
        }
        inner.push_ready(job_id, &pool, priority);
        drop(inner);
        self.work_available.notify_all();
        true
    }

    /// Block until the job reaches a terminal status or the timeout elapses.
    ///
    /// A zero timeout performs a single non-mutating check. Timing out never
    /// cancels the job; waiting and execution are decoupled.
    pub fn wait_for_outcome(
        &self,
        job_id: JobId,
        timeout: Duration,
    ) -> Result<JobOutcome, DispatchError> {
        let deadline = Instant::now() + timeout;
        let mut inner = self.inner.lock();
        loop {
            match inner.jobs.get(&job_id) {
                None => return Err(DispatchError::UnknownJob(job_id.to_string())),
                Some(job) => match job.status {
                    JobStatus::Succeeded => {
                        return Ok(JobOutcome::Succeeded(
                            job.result.clone().unwrap_or(serde_json::Value::Null),
                        ));
                    }
                    JobStatus::DeadLettered => {
                        return Ok(JobOutcome::DeadLettered {
                            job_id,
                            failure_history: job.failure_history.clone(),
                        });
                    }
                    _ => {}
                },
            }
            if timeout.is_zero()
                || self.job_terminal.wait_until(&mut inner, deadline).timed_out()
            {
                // Re-check once: the terminal signal may have raced the wake.
                if let Some(job) = inner.jobs.get(&job_id) {
                    match job.status {
                        JobStatus::Succeeded => {
                            return Ok(JobOutcome::Succeeded(
                                job.result.clone().unwrap_or(serde_json::Value::Null),
                            ));
                        }
                        JobStatus::DeadLettered => {
                            return Ok(JobOutcome::DeadLettered {
                                job_id,
                                failure_history: job.failure_history.clone(),
                            });
                        }
                        _ => {}
                    }
                }
                return Err(DispatchError::Timeout);
            }
        }
    }

    /// Snapshot of a job record.
    #[must_use]
    pub fn job(&self, job_id: JobId) -> Option<Job> {
        self.inner.lock().jobs.get(&job_id).cloned()
    }

    /// Queued (not yet claimed) jobs in a pool.
    #[must_use]
    pub fn depth(&self, pool: &str) -> usize {
        let inner = self.inner.lock();
        inner
            .ready
            .get(pool)
            .map_or(0, |heap| {
                heap.iter()
                    .filter(|r| {
                        inner
                            .jobs
                            .get(&r.job_id)
                            .is_some_and(|j| j.status == JobStatus::Queued)
                    })
                    .count()
            })
    }

    /// Claimed or processing jobs in a pool.
    #[must_use]
    pub fn in_flight(&self, pool: &str) -> usize {
        *self.inner.lock().in_flight.get(pool).unwrap_or(&0)
    }

    /// Number of dead-lettered jobs retained.
    #[must_use]
    pub fn dead_letter_count(&self) -> usize {
        self.inner.lock().dead_letters.len()
    }

    /// Snapshot of the dead-letter store.
    #[must_use]
    pub fn dead_letters(&self) -> Vec<DeadLetterEntry> {
        self.inner.lock().dead_letters.clone()
    }

    /// Drop succeeded jobs older than the retention window. Dead-lettered
    /// jobs are retained for operator inspection regardless. Returns the
    /// number pruned.
    pub fn prune_completed(&self, retention: Duration, now: u128) -> usize {
        let cutoff = now.saturating_sub(retention.as_millis());
        let mut inner = self.inner.lock();
        let before = inner.jobs.len();
        inner.jobs.retain(|_, job| {
            !(job.status == JobStatus::Succeeded
                && job.terminal_at_ms.is_some_and(|t| t < cutoff))
        });
        let pruned = before - inner.jobs.len();
        if pruned > 0 {
            tracing::debug!(pruned, "completed jobs pruned");
            if let Some(journal) = &inner.journal {
                let live: Vec<Job> = inner
                    .jobs
                    .values()
                    .filter(|j| !j.status.is_terminal())
                    .cloned()
                    .collect();
                if let Err(e) = journal.compact(&live) {
                    tracing::error!(error = %e, "journal compaction failed");
                }
            }
        }
        pruned
    }

    /// Whether the queue has been closed for shutdown.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.inner.lock().closed
    }

    /// Stop accepting work and wake every parked claimer so workers can exit.
    pub fn close(&self) {
        let mut inner = self.inner.lock();
        inner.closed = true;
        drop(inner);
        self.work_available.notify_all();
        self.job_terminal.notify_all();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    fn enqueue(queue: &JobQueue, pool: &str, priority: i32) -> JobId {
        queue
            .enqueue(Job::new(pool, serde_json::json!({}), priority, 2, now_ms()))
            .unwrap()
    }

    #[test]
    fn priority_order_with_fifo_tiebreak() {
        let queue = JobQueue::new();
        let worker = Uuid::new_v4();
        let low = enqueue(&queue, "nlp", 200);
        let urgent = enqueue(&queue, "nlp", 1);
        let first_normal = enqueue(&queue, "nlp", 50);
        let second_normal = enqueue(&queue, "nlp", 50);

        assert_eq!(queue.claim("nlp", worker).unwrap().id, urgent);
        assert_eq!(queue.claim("nlp", worker).unwrap().id, first_normal);
        assert_eq!(queue.claim("nlp", worker).unwrap().id, second_normal);
        assert_eq!(queue.claim("nlp", worker).unwrap().id, low);
        assert!(queue.claim("nlp", worker).is_none());
    }

    #[test]
    fn pools_are_isolated() {
        let queue = JobQueue::new();
        let worker = Uuid::new_v4();
        enqueue(&queue, "nlp", 10);
        assert!(queue.claim("embed", worker).is_none());
        assert!(queue.claim("nlp", worker).is_some());
    }

    #[test]
    fn fail_requeues_until_budget_exhausted() {
        let queue = JobQueue::new();
        let worker = Uuid::new_v4();
        let id = queue
            .enqueue(Job::new("nlp", serde_json::json!({}), 10, 2, now_ms()))
            .unwrap();

        // max_retries = 2: attempts 1 and 2 requeue, attempt 3 dead-letters.
        for attempt in 1..=2 {
            let job = queue.claim("nlp", worker).unwrap();
            assert_eq!(job.id, id);
            assert!(queue.fail(id, worker, &format!("boom {attempt}")));
            assert_eq!(queue.job(id).unwrap().status, JobStatus::Queued);
        }
        queue.claim("nlp", worker).unwrap();
        assert!(queue.fail(id, worker, "boom 3"));

        let job = queue.job(id).unwrap();
        assert_eq!(job.status, JobStatus::DeadLettered);
        assert_eq!(job.attempt_count, 3);
        assert_eq!(job.failure_history.len(), 3);
        assert_eq!(queue.dead_letter_count(), 1);
        assert_eq!(queue.dead_letters()[0].failure_history.len(), 3);
    }

    #[test]
    fn stale_complete_after_requeue_is_ignored() {
        let queue = JobQueue::new();
        let dead_worker = Uuid::new_v4();
        let id = enqueue(&queue, "nlp", 10);
        queue.claim("nlp", dead_worker).unwrap();

        assert!(queue.requeue_if_claimed_by(id, dead_worker, "worker presumed dead"));
        assert_eq!(queue.job(id).unwrap().status, JobStatus::Queued);

        // The presumed-dead worker finishes late; its write must not land.
        assert!(!queue.complete(id, dead_worker, serde_json::json!("late")));
        assert_eq!(queue.job(id).unwrap().status, JobStatus::Queued);
        // And the reclaim did not charge an attempt.
        assert_eq!(queue.job(id).unwrap().attempt_count, 0);
    }

    #[test]
    fn requeue_only_applies_to_the_claiming_worker() {
        let queue = JobQueue::new();
        let owner = Uuid::new_v4();
        let other = Uuid::new_v4();
        let id = enqueue(&queue, "nlp", 10);
        queue.claim("nlp", owner).unwrap();
        assert!(!queue.requeue_if_claimed_by(id, other, "not mine"));
        assert_eq!(queue.job(id).unwrap().claimed_by, Some(owner));
    }

    #[test]
    fn wait_for_outcome_zero_timeout_does_not_mutate() {
        let queue = JobQueue::new();
        let id = enqueue(&queue, "nlp", 10);
        let before = queue.job(id).unwrap();

        let err = queue.wait_for_outcome(id, Duration::ZERO).unwrap_err();
        assert!(matches!(err, DispatchError::Timeout));

        let after = queue.job(id).unwrap();
        assert_eq!(after.status, before.status);
        assert_eq!(after.attempt_count, before.attempt_count);
    }

    #[test]
    fn wait_for_outcome_sees_completion_from_another_thread() {
        use std::sync::Arc;
        let queue = Arc::new(JobQueue::new());
        let worker = Uuid::new_v4();
        let id = enqueue(&queue, "nlp", 10);

        let waiter = {
            let queue = Arc::clone(&queue);
            std::thread::spawn(move || queue.wait_for_outcome(id, Duration::from_secs(5)))
        };
        let job = queue.claim("nlp", worker).unwrap();
        assert!(queue.complete(job.id, worker, serde_json::json!({"ok": true})));

        let outcome = waiter.join().unwrap().unwrap();
        assert!(outcome.is_success());
    }

    #[test]
    fn unknown_job_is_an_error() {
        let queue = JobQueue::new();
        let err = queue
            .wait_for_outcome(Uuid::new_v4(), Duration::ZERO)
            .unwrap_err();
        assert!(matches!(err, DispatchError::UnknownJob(_)));
    }

    #[test]
    fn depth_and_in_flight_track_lifecycle() {
        let queue = JobQueue::new();
        let worker = Uuid::new_v4();
        let id = enqueue(&queue, "ocr-slow", 10);
        assert_eq!(queue.depth("ocr-slow"), 1);
        assert_eq!(queue.in_flight("ocr-slow"), 0);

        queue.claim("ocr-slow", worker).unwrap();
        assert_eq!(queue.depth("ocr-slow"), 0);
        assert_eq!(queue.in_flight("ocr-slow"), 1);

        queue.complete(id, worker, serde_json::Value::Null);
        assert_eq!(queue.in_flight("ocr-slow"), 0);
    }

    #[test]
    fn prune_drops_old_succeeded_but_keeps_dead_letters() {
        let queue = JobQueue::new();
        let worker = Uuid::new_v4();

        let done = queue
            .enqueue(Job::new("nlp", serde_json::json!({}), 10, 0, now_ms()))
            .unwrap();
        queue.claim("nlp", worker).unwrap();
        queue.complete(done, worker, serde_json::Value::Null);

        let dead = queue
            .enqueue(Job::new("nlp", serde_json::json!({}), 10, 0, now_ms()))
            .unwrap();
        queue.claim("nlp", worker).unwrap();
        queue.fail(dead, worker, "always fails");

        let pruned = queue.prune_completed(Duration::ZERO, now_ms() + 1);
        assert_eq!(pruned, 1);
        assert!(queue.job(done).is_none());
        assert!(queue.job(dead).is_some());
        assert_eq!(queue.dead_letter_count(), 1);
    }

    #[test]
    fn closed_queue_rejects_enqueue_and_wakes_claimers() {
        use std::sync::Arc;
        let queue = Arc::new(JobQueue::new());
        let claimer = {
            let queue = Arc::clone(&queue);
            std::thread::spawn(move || queue.claim_wait("nlp", Uuid::new_v4(), Duration::from_secs(10)))
        };
        std::thread::sleep(Duration::from_millis(20));
        queue.close();
        assert!(claimer.join().unwrap().is_none());

        let err = queue
            .enqueue(Job::new("nlp", serde_json::json!({}), 10, 0, now_ms()))
            .unwrap_err();
        assert!(matches!(err, DispatchError::Shutdown));
    }
}
