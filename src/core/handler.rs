//! Job handler trait and the name-keyed handler registry.
//!
//! Domain modules register a handler per pool before the supervisor starts
//! workers. A handler receives a job's payload and returns a result or an
//! error; it carries no other scheduler responsibility.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::RwLock;

use crate::core::error::HandlerError;

/// Processing logic for one pool's jobs.
///
/// Handlers run on dedicated worker threads, each with its own
/// single-threaded tokio runtime. Long-running handlers should yield
/// (`.await`) periodically so heartbeats keep flowing; a handler that blocks
/// its thread without yielding will eventually be classified as stuck.
///
/// # Example
///
/// ```rust,ignore
/// use async_trait::async_trait;
/// use frame_dispatch::core::{HandlerError, JobHandler};
///
/// struct OcrHandler;
///
/// #[async_trait]
/// impl JobHandler for OcrHandler {
///     async fn process(&self, payload: serde_json::Value) -> Result<serde_json::Value, HandlerError> {
///         let page = payload["page"].as_u64().ok_or_else(|| HandlerError::new("missing page"))?;
///         Ok(serde_json::json!({ "text": format!("page {page} text") }))
///     }
/// }
/// ```
#[async_trait]
pub trait JobHandler: Send + Sync + 'static {
    /// Process one job payload. An `Err` counts as a transient failure and is
    /// retried up to the job's retry budget.
    async fn process(&self, payload: serde_json::Value) -> Result<serde_json::Value, HandlerError>;
}

/// Name-keyed registry mapping pools to their handlers.
///
/// Populated before workers start; the supervisor refuses to spawn workers
/// for a pool with no handler. Reads are lock-free-ish (`RwLock` read path)
/// since workers look up their handler once at spawn.
#[derive(Default)]
pub struct HandlerRegistry {
    handlers: RwLock<HashMap<String, Arc<dyn JobHandler>>>,
}

impl HandlerRegistry {
    /// Create an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a handler for a pool, replacing any previous registration.
    pub fn register(&self, pool: impl Into<String>, handler: Arc<dyn JobHandler>) {
        let pool = pool.into();
        tracing::debug!(pool = %pool, "handler registered");
        self.handlers.write().insert(pool, handler);
    }

    /// Look up the handler for a pool.
    #[must_use]
    pub fn get(&self, pool: &str) -> Option<Arc<dyn JobHandler>> {
        self.handlers.read().get(pool).cloned()
    }

    /// Whether a pool has a registered handler.
    #[must_use]
    pub fn contains(&self, pool: &str) -> bool {
        self.handlers.read().contains_key(pool)
    }
}
