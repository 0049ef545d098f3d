//! Scheduler runtime: the facade owning the control-plane lifecycle, and the
//! read-only observability surface.

pub mod api;
pub mod scheduler;

pub use api::{PoolOccupancy, SchedulerSnapshot};
pub use scheduler::Scheduler;
