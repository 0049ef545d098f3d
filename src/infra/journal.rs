//! File-backed queue journal.
//!
//! A simplified JSONL journal: every enqueue appends a record, every terminal
//! transition appends a tombstone. On startup, replay returns the jobs that
//! were enqueued but never reached a terminal status so they can be requeued.
//! Compaction rewrites the file to just the live set.

use std::collections::HashMap;
use std::fs::{create_dir_all, OpenOptions};
use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::core::error::DispatchError;
use crate::core::job::{Job, JobId, JobStatus};

/// One journal line.
#[derive(Debug, Serialize, Deserialize)]
#[serde(tag = "event", content = "data", rename_all = "snake_case")]
enum JournalEvent {
    /// A job entered the queue.
    Enqueued {
        /// The job as enqueued.
        job: Job,
    },
    /// A job reached a terminal status.
    Terminal {
        /// The job's id.
        job_id: JobId,
        /// The terminal status reached.
        status: JobStatus,
    },
}

/// Append-only JSONL journal backing the job queue.
pub struct QueueJournal {
    path: PathBuf,
}

impl QueueJournal {
    /// Open (or create) a journal at `dir/jobs.jsonl`.
    pub fn open(dir: impl AsRef<Path>) -> Result<Self, DispatchError> {
        let dir = dir.as_ref().to_path_buf();
        create_dir_all(&dir).map_err(|e| DispatchError::Backend(e.to_string()))?;
        Ok(Self {
            path: dir.join("jobs.jsonl"),
        })
    }

    fn append(&self, event: &JournalEvent) -> Result<(), DispatchError> {
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .map_err(|e| DispatchError::Backend(e.to_string()))?;
        let line = serde_json::to_string(event).map_err(|e| DispatchError::Backend(e.to_string()))?;
        writeln!(file, "{line}").map_err(|e| DispatchError::Backend(e.to_string()))
    }

    /// Record an enqueue.
    pub fn record_enqueued(&self, job: &Job) -> Result<(), DispatchError> {
        self.append(&JournalEvent::Enqueued { job: job.clone() })
    }

    /// Record a terminal transition.
    pub fn record_terminal(&self, job_id: JobId, status: JobStatus) -> Result<(), DispatchError> {
        self.append(&JournalEvent::Terminal { job_id, status })
    }

    /// Jobs enqueued but not yet terminal, reset to `Queued` for requeue.
    pub fn replay(&self) -> Result<Vec<Job>, DispatchError> {
        if !self.path.exists() {
            return Ok(Vec::new());
        }
        let file = OpenOptions::new()
            .read(true)
            .open(&self.path)
            .map_err(|e| DispatchError::Backend(e.to_string()))?;
        let reader = BufReader::new(file);

        let mut live: HashMap<JobId, Job> = HashMap::new();
        let mut order: Vec<JobId> = Vec::new();
        for line in reader.lines() {
            let line = line.map_err(|e| DispatchError::Backend(e.to_string()))?;
            if line.trim().is_empty() {
                continue;
            }
            let event: JournalEvent =
                serde_json::from_str(&line).map_err(|e| DispatchError::Backend(e.to_string()))?;
            match event {
                JournalEvent::Enqueued { job } => {
                    order.push(job.id);
                    live.insert(job.id, job);
                }
                JournalEvent::Terminal { job_id, .. } => {
                    live.remove(&job_id);
                }
            }
        }

        let jobs = order
            .into_iter()
            .filter_map(|id| live.remove(&id))
            .map(|mut job| {
                job.status = JobStatus::Queued;
                job.claimed_by = None;
                job
            })
            .collect();
        Ok(jobs)
    }

    /// Rewrite the journal to contain only the given live jobs.
    pub fn compact(&self, live: &[Job]) -> Result<(), DispatchError> {
        let mut file = OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(true)
            .open(&self.path)
            .map_err(|e| DispatchError::Backend(e.to_string()))?;
        for job in live {
            let line = serde_json::to_string(&JournalEvent::Enqueued { job: job.clone() })
                .map_err(|e| DispatchError::Backend(e.to_string()))?;
            writeln!(file, "{line}").map_err(|e| DispatchError::Backend(e.to_string()))?;
        }
        Ok(())
    }
}
