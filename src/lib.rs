//! # Frame Dispatch
//!
//! Resource-aware job dispatch and worker pools for the Frame
//! document-analysis platform.
//!
//! Frame ingests large document collections through heterogeneous processing
//! stages: text extraction, OCR, embedding, NLP enrichment, LLM calls. This
//! crate is the scheduling layer underneath them: it routes each unit of work
//! to one of many typed execution pools under a hardware capacity budget,
//! supervises long-lived worker processes, retries transient failures,
//! quarantines permanent ones, and detects stalled workers via heartbeats.
//!
//! ## Key pieces
//!
//! - **Tier detection**: the host is probed once (CPU cores, RAM, accelerator
//!   memory) and classified into a capability tier that sizes every pool.
//! - **Resource ledger**: accelerator and CPU budgets are tracked centrally;
//!   workers hold their pool's cost for their lifetime. Mutually exclusive
//!   pool groups model accelerators that cannot host two models at once.
//! - **Job queue**: priority-ordered per-pool queues with atomic claims,
//!   retry/dead-letter bookkeeping, and optional JSONL durability.
//! - **Fallback chains**: a full pool routes work to its configured fallback
//!   (`ocr-fast` → `ocr-slow`) without touching priority or payload.
//! - **Health registry**: heartbeat records swept on an interval; jobs held
//!   by dead workers are requeued for another claim.
//!
//! ## Usage
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use std::time::Duration;
//! use frame_dispatch::builders::SchedulerBuilder;
//! use frame_dispatch::config::SchedulerConfig;
//!
//! let scheduler = SchedulerBuilder::new(SchedulerConfig::default()).build()?;
//! scheduler.register_handler("extract-text", Arc::new(MyExtractor));
//! scheduler.start()?;
//!
//! let outcome = scheduler.enqueue_and_wait(
//!     "extract-text",
//!     serde_json::json!({ "document": "report.pdf" }),
//!     Duration::from_secs(120),
//! )?;
//!
//! scheduler.shutdown();
//! ```
//!
//! Delivery is at-least-once: a job held by a worker that dies is requeued
//! and may run again. Idempotency belongs to the handler.

#![deny(warnings)]
#![deny(missing_docs)]
#![deny(unsafe_code)]
#![warn(clippy::all)]

/// Builders to construct scheduler components from configuration.
pub mod builders;
/// Configuration models for the operator surface.
pub mod config;
/// Core scheduling state machines and the job lifecycle.
pub mod core;
/// Infrastructure adapters for queue durability.
pub mod infra;
/// Host probing, tiers, resource accounting, and the pool catalog.
pub mod resources;
/// Scheduler runtime facade and observability surface.
pub mod runtime;
/// Shared utilities.
pub mod util;

pub use crate::builders::SchedulerBuilder;
pub use crate::config::SchedulerConfig;
pub use crate::core::{
    DispatchError, HandlerError, JobHandler, JobId, JobOutcome, JobStatus, Priority,
};
pub use crate::resources::{ResourceKind, ResourceTier};
pub use crate::runtime::{Scheduler, SchedulerSnapshot};
