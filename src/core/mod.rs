//! Core scheduling state machines and the job lifecycle.

pub mod dispatcher;
pub mod error;
pub mod handler;
pub mod health;
pub mod job;
pub mod queue;
pub mod supervisor;
pub mod worker;

pub use dispatcher::{DispatchDefaults, Dispatcher};
pub use error::{AppResult, DispatchError, HandlerError};
pub use handler::{HandlerRegistry, JobHandler};
pub use health::{
    HealthRegistry, HealthThresholds, Liveness, SweepReport, SweeperHandle, WorkerRecord,
    WorkerState,
};
pub use job::{
    DeadLetterEntry, Job, JobId, JobOutcome, JobStatus, Priority, WorkerId, DEFAULT_PRIORITY,
};
pub use queue::JobQueue;
pub use supervisor::WorkerSupervisor;
pub use worker::{WorkerHandle, WorkerRuntimeConfig};
