//! Liveness tests: a worker whose heartbeat stops is classified dead after
//! the configured threshold and its claimed job is observably requeued.

use std::sync::Arc;
use std::time::{Duration, Instant};

use frame_dispatch::core::{
    HealthRegistry, HealthThresholds, Job, JobQueue, JobStatus, WorkerState,
};
use uuid::Uuid;

fn now_ms() -> u128 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap()
        .as_millis()
}

fn thresholds() -> HealthThresholds {
    HealthThresholds {
        stuck_after: Duration::from_millis(80),
        dead_after: Duration::from_millis(200),
    }
}

#[test]
fn silent_worker_is_reaped_and_job_requeued_within_one_sweep() {
    let queue = Arc::new(JobQueue::new());
    let registry = Arc::new(HealthRegistry::new(Arc::clone(&queue), thresholds()));

    // A worker claims a job, then goes silent (simulating a crashed process).
    let worker = Uuid::new_v4();
    registry.register(worker, "embed");
    let job_id = queue
        .enqueue(Job::new("embed", serde_json::json!({}), 10, 3, now_ms()))
        .unwrap();
    queue.claim("embed", worker).unwrap();
    registry.set_state(worker, WorkerState::Processing, Some(job_id));

    let sweep_interval = Duration::from_millis(50);
    let sweeper = registry.spawn_sweeper(sweep_interval);

    // Within dead_after + one sweep interval (plus slack), the job must be
    // queued again and the record gone.
    let deadline = Instant::now() + Duration::from_secs(3);
    let mut reclaimed = false;
    while Instant::now() < deadline {
        if queue.job(job_id).unwrap().status == JobStatus::Queued {
            reclaimed = true;
            break;
        }
        std::thread::sleep(Duration::from_millis(10));
    }
    sweeper.stop();

    assert!(reclaimed, "job held by a dead worker must be requeued");
    assert!(registry.workers().is_empty(), "dead worker record must be reaped");

    // Another worker can now claim the reclaimed job.
    let successor = Uuid::new_v4();
    let job = queue.claim("embed", successor).unwrap();
    assert_eq!(job.id, job_id);
    assert_eq!(job.claimed_by, Some(successor));
    // Reclamation left an operator-visible note without charging an attempt.
    assert_eq!(job.attempt_count, 0);
    assert!(job.failure_history.iter().any(|n| n.contains("reclaimed")));
}

#[test]
fn heartbeating_worker_survives_sweeps() {
    let queue = Arc::new(JobQueue::new());
    let registry = Arc::new(HealthRegistry::new(Arc::clone(&queue), thresholds()));

    let worker = Uuid::new_v4();
    registry.register(worker, "nlp");
    let sweeper = registry.spawn_sweeper(Duration::from_millis(30));

    // Keep heartbeating well past the dead threshold.
    let end = Instant::now() + Duration::from_millis(500);
    while Instant::now() < end {
        registry.record_heartbeat(worker);
        std::thread::sleep(Duration::from_millis(20));
    }
    sweeper.stop();

    assert_eq!(registry.workers().len(), 1, "live worker must not be reaped");
}

#[test]
fn sweep_does_not_reclaim_after_a_late_heartbeat() {
    let queue = Arc::new(JobQueue::new());
    let registry = HealthRegistry::new(Arc::clone(&queue), thresholds());

    let worker = Uuid::new_v4();
    registry.register(worker, "nlp");
    let job_id = queue
        .enqueue(Job::new("nlp", serde_json::json!({}), 10, 3, now_ms()))
        .unwrap();
    queue.claim("nlp", worker).unwrap();
    registry.set_state(worker, WorkerState::Processing, Some(job_id));

    // Heartbeat lands before the sweep runs; sweeping with a cutoff computed
    // from a stale "now" must still honor the fresh heartbeat.
    registry.record_heartbeat(worker);
    let report = registry.sweep(now_ms());
    assert!(report.dead.is_empty());
    assert!(report.requeued.is_empty());
    assert_eq!(
        queue.job(job_id).unwrap().status,
        JobStatus::Claimed,
        "job must stay with its live worker"
    );
}
