//! Operator configuration surface.
//!
//! Everything timing- or capacity-related is supplied here rather than
//! hard-coded: tier override, per-pool enable/disable and capacity overrides,
//! heartbeat interval, stuck/dead thresholds, sweep interval, shutdown grace.

use std::collections::HashMap;
use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::core::health::HealthThresholds;
use crate::core::worker::WorkerRuntimeConfig;
use crate::resources::monitor::ResourceTier;

/// Root scheduler configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SchedulerConfig {
    /// Force a tier instead of deriving one from detection.
    pub tier_override: Option<ResourceTier>,
    /// Pools that must not accept work or run workers.
    pub disabled_pools: Vec<String>,
    /// Per-pool worker-capacity overrides.
    pub capacity_overrides: HashMap<String, u32>,
    /// Worker heartbeat cadence in milliseconds.
    pub heartbeat_interval_ms: u64,
    /// Silence after which a worker is logged as stuck.
    pub stuck_after_ms: u64,
    /// Silence after which a worker is reaped and its job requeued.
    pub dead_after_ms: u64,
    /// Health sweep cadence.
    pub sweep_interval_ms: u64,
    /// How long shutdown waits for in-flight work before force-terminating.
    pub shutdown_grace_ms: u64,
    /// Upper bound on one parked wait for a claimable job.
    pub claim_poll_interval_ms: u64,
    /// How long a starting worker may wait for ledger budget.
    pub allocation_timeout_ms: u64,
    /// Priority assigned when a caller does not specify one.
    pub default_priority: i32,
    /// Retry budget assigned when a caller does not specify one.
    pub default_max_retries: u32,
    /// How long succeeded jobs stay queryable before pruning.
    pub completed_retention_ms: u64,
    /// Directory for the queue journal; `None` disables durability.
    pub journal_dir: Option<PathBuf>,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            tier_override: None,
            disabled_pools: Vec::new(),
            capacity_overrides: HashMap::new(),
            heartbeat_interval_ms: 1_000,
            stuck_after_ms: 5_000,
            dead_after_ms: 30_000,
            sweep_interval_ms: 2_000,
            shutdown_grace_ms: 10_000,
            claim_poll_interval_ms: 250,
            allocation_timeout_ms: 10_000,
            default_priority: 100,
            default_max_retries: 3,
            completed_retention_ms: 3_600_000,
            journal_dir: None,
        }
    }
}

impl SchedulerConfig {
    /// Validate configuration values.
    pub fn validate(&self) -> Result<(), String> {
        if self.heartbeat_interval_ms == 0 {
            return Err("heartbeat_interval_ms must be greater than 0".into());
        }
        if self.stuck_after_ms <= self.heartbeat_interval_ms {
            return Err("stuck_after_ms must exceed heartbeat_interval_ms".into());
        }
        if self.dead_after_ms <= self.stuck_after_ms {
            return Err("dead_after_ms must exceed stuck_after_ms".into());
        }
        if self.sweep_interval_ms == 0 {
            return Err("sweep_interval_ms must be greater than 0".into());
        }
        if self.claim_poll_interval_ms == 0 {
            return Err("claim_poll_interval_ms must be greater than 0".into());
        }
        Ok(())
    }

    /// Parse scheduler configuration from a JSON string and validate.
    pub fn from_json_str(input: &str) -> Result<Self, String> {
        let cfg: SchedulerConfig =
            serde_json::from_str(input).map_err(|e| format!("parse error: {e}"))?;
        cfg.validate()?;
        Ok(cfg)
    }

    /// Worker timing knobs derived from this configuration.
    #[must_use]
    pub fn worker_runtime(&self) -> WorkerRuntimeConfig {
        WorkerRuntimeConfig {
            heartbeat_interval: Duration::from_millis(self.heartbeat_interval_ms),
            claim_poll_interval: Duration::from_millis(self.claim_poll_interval_ms),
            allocation_timeout: Duration::from_millis(self.allocation_timeout_ms),
            shutdown_grace: Duration::from_millis(self.shutdown_grace_ms),
        }
    }

    /// Liveness thresholds derived from this configuration.
    #[must_use]
    pub fn health_thresholds(&self) -> HealthThresholds {
        HealthThresholds {
            stuck_after: Duration::from_millis(self.stuck_after_ms),
            dead_after: Duration::from_millis(self.dead_after_ms),
        }
    }

    /// Sweep cadence as a duration.
    #[must_use]
    pub fn sweep_interval(&self) -> Duration {
        Duration::from_millis(self.sweep_interval_ms)
    }

    /// Shutdown grace as a duration.
    #[must_use]
    pub fn shutdown_grace(&self) -> Duration {
        Duration::from_millis(self.shutdown_grace_ms)
    }

    /// Completed-job retention as a duration.
    #[must_use]
    pub fn completed_retention(&self) -> Duration {
        Duration::from_millis(self.completed_retention_ms)
    }
}
