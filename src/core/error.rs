//! Error types for dispatch operations.

use thiserror::Error;

/// Errors produced by scheduler components.
#[derive(Debug, Error)]
pub enum DispatchError {
    /// No pool in the fallback chain currently has capacity. Carries every
    /// pool that was attempted so an operator can diagnose the chain.
    #[error("capacity exhausted: no free pool among [{}]", attempted.join(", "))]
    CapacityExhausted {
        /// Pools tried, in chain order.
        attempted: Vec<String>,
    },
    /// The named pool does not exist in the catalog.
    #[error("unknown pool: {0}")]
    UnknownPool(String),
    /// A ledger allocation could not be granted before its deadline.
    #[error("resource exhausted: {0}")]
    ResourceExhausted(String),
    /// A wait deadline elapsed before the awaited event occurred.
    #[error("timed out")]
    Timeout,
    /// The referenced job does not exist (never enqueued or already pruned).
    #[error("unknown job: {0}")]
    UnknownJob(String),
    /// Malformed pool/fallback/threshold configuration. Fatal at startup.
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),
    /// The scheduler is shutting down and no longer accepts work.
    #[error("scheduler is shut down")]
    Shutdown,
    /// Backend-specific failure with context.
    #[error("backend error: {0}")]
    Backend(String),
}

/// Error type returned by job handlers. Treated as a transient job failure:
/// retried up to the job's retry budget, then dead-lettered.
#[derive(Debug, Error)]
#[error("{message}")]
pub struct HandlerError {
    /// Human-readable failure summary, recorded in the job's failure history.
    pub message: String,
}

impl HandlerError {
    /// Build a handler error from any displayable cause.
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

impl From<anyhow::Error> for HandlerError {
    fn from(err: anyhow::Error) -> Self {
        Self::new(format!("{err:#}"))
    }
}

/// Application-facing result using anyhow for higher-level contexts.
pub type AppResult<T> = Result<T, anyhow::Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn capacity_exhausted_lists_attempted_pools() {
        let err = DispatchError::CapacityExhausted {
            attempted: vec!["ocr-fast".into(), "ocr-slow".into()],
        };
        let msg = err.to_string();
        assert!(msg.contains("ocr-fast"));
        assert!(msg.contains("ocr-slow"));
    }

    #[test]
    fn handler_error_from_anyhow_keeps_context() {
        let err: HandlerError = anyhow::anyhow!("root cause")
            .context("while parsing page 3")
            .into();
        assert!(err.message.contains("root cause"));
        assert!(err.message.contains("page 3"));
    }
}
