//! Job records and their status lifecycle.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Unique identifier for a job.
pub type JobId = Uuid;

/// Unique identifier for a worker.
pub type WorkerId = Uuid;

/// Priority used for queue ordering. Lower values are served first.
pub type Priority = i32;

/// Default priority for jobs that do not specify one.
pub const DEFAULT_PRIORITY: Priority = 100;

/// Status of a job in the scheduler lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    /// Waiting in a pool queue for a claim.
    Queued,
    /// Handed to exactly one worker, execution not yet started.
    Claimed,
    /// Handler is running.
    Processing,
    /// Handler returned a result.
    Succeeded,
    /// Handler failed this attempt; retry budget not yet exhausted.
    Failed,
    /// Retry budget exhausted; archived in the dead-letter store.
    DeadLettered,
}

impl JobStatus {
    /// Whether this status ends the job's lifecycle.
    #[must_use]
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Succeeded | Self::DeadLettered)
    }
}

/// A unit of work routed to a pool. Payload is opaque to the scheduler;
/// the handler registered for the pool interprets it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Job {
    /// Unique job identifier.
    pub id: JobId,
    /// Pool the job was routed to (after fallback selection).
    pub pool: String,
    /// Opaque payload, interpreted by the pool's handler.
    pub payload: serde_json::Value,
    /// Queue ordering priority; lower is more urgent.
    pub priority: Priority,
    /// Current lifecycle status.
    pub status: JobStatus,
    /// Handler failures so far.
    pub attempt_count: u32,
    /// Failed attempts allowed beyond the first before dead-lettering.
    pub max_retries: u32,
    /// Creation timestamp, ms since epoch.
    pub created_at_ms: u128,
    /// When the job reached a terminal status, ms since epoch.
    pub terminal_at_ms: Option<u128>,
    /// Worker currently holding the claim, if any.
    pub claimed_by: Option<WorkerId>,
    /// Result value once succeeded.
    pub result: Option<serde_json::Value>,
    /// One summary per failed attempt, plus reclaim notes.
    pub failure_history: Vec<String>,
}

impl Job {
    /// Create a freshly queued job.
    #[must_use]
    pub fn new(
        pool: impl Into<String>,
        payload: serde_json::Value,
        priority: Priority,
        max_retries: u32,
        created_at_ms: u128,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            pool: pool.into(),
            payload,
            priority,
            status: JobStatus::Queued,
            attempt_count: 0,
            max_retries,
            created_at_ms,
            terminal_at_ms: None,
            claimed_by: None,
            result: None,
            failure_history: Vec::new(),
        }
    }
}

/// Snapshot of a job that exhausted its retry budget, retained for operator
/// inspection.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeadLetterEntry {
    /// The job as it was when dead-lettered.
    pub job: Job,
    /// Ordered error summaries, one per attempt.
    pub failure_history: Vec<String>,
    /// When the job was dead-lettered, ms since epoch.
    pub dead_lettered_at_ms: u128,
}

/// Terminal outcome delivered to `wait_for_result` callers.
#[derive(Debug, Clone)]
pub enum JobOutcome {
    /// The handler produced a result.
    Succeeded(serde_json::Value),
    /// Retries exhausted; the dead-letter store holds the full history.
    DeadLettered {
        /// The dead-lettered job's id, for dead-letter store lookup.
        job_id: JobId,
        /// Ordered error summaries, one per attempt.
        failure_history: Vec<String>,
    },
}

impl JobOutcome {
    /// Whether the job completed successfully.
    #[must_use]
    pub fn is_success(&self) -> bool {
        matches!(self, Self::Succeeded(_))
    }
}
