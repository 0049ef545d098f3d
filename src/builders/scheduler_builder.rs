//! Builder assembling a scheduler from configuration and probed resources.

use std::sync::Arc;

use crate::config::SchedulerConfig;
use crate::core::dispatcher::{DispatchDefaults, Dispatcher};
use crate::core::error::DispatchError;
use crate::core::handler::HandlerRegistry;
use crate::core::health::HealthRegistry;
use crate::core::queue::JobQueue;
use crate::core::supervisor::WorkerSupervisor;
use crate::infra::journal::QueueJournal;
use crate::resources::catalog::PoolCatalog;
use crate::resources::ledger::{ResourceLedger, ResourceTotals};
use crate::resources::monitor::{AcceleratorProbe, ResourceMonitor};
use crate::runtime::scheduler::Scheduler;

/// Builds a [`Scheduler`]: probe → tier → catalog → ledger → queue →
/// registries → supervisor → dispatcher. Configuration errors (bad fallback
/// chains, bad thresholds, unknown override targets) are fatal here: the
/// scheduler refuses to start rather than run misconfigured.
pub struct SchedulerBuilder {
    config: SchedulerConfig,
    monitor: ResourceMonitor,
    catalog: Option<PoolCatalog>,
    totals: Option<ResourceTotals>,
}

impl SchedulerBuilder {
    /// Start from an operator configuration.
    #[must_use]
    pub fn new(config: SchedulerConfig) -> Self {
        Self {
            config,
            monitor: ResourceMonitor::default(),
            catalog: None,
            totals: None,
        }
    }

    /// Use a custom accelerator probe instead of the env-based default.
    #[must_use]
    pub fn with_probe(mut self, probe: Box<dyn AcceleratorProbe>) -> Self {
        self.monitor = ResourceMonitor::new(probe);
        self
    }

    /// Use an explicit pool catalog instead of the built-in tier table.
    /// Operator overrides from the configuration still apply.
    #[must_use]
    pub fn with_catalog(mut self, catalog: PoolCatalog) -> Self {
        self.catalog = Some(catalog);
        self
    }

    /// Use explicit ledger totals instead of tier-derived ones.
    #[must_use]
    pub fn with_totals(mut self, totals: ResourceTotals) -> Self {
        self.totals = Some(totals);
        self
    }

    /// Assemble the scheduler. Does not spawn workers; call
    /// [`Scheduler::start`] after registering handlers.
    pub fn build(self) -> Result<Scheduler, DispatchError> {
        self.config
            .validate()
            .map_err(DispatchError::InvalidConfig)?;

        let resources = self.monitor.detect();
        let tier = ResourceMonitor::determine_tier(&resources, self.config.tier_override);

        let mut catalog = match self.catalog {
            Some(catalog) => catalog,
            None => PoolCatalog::for_tier(tier)?,
        };
        catalog.apply_overrides(&self.config.disabled_pools, &self.config.capacity_overrides)?;
        let catalog = Arc::new(catalog);

        let totals = self
            .totals
            .unwrap_or_else(|| ResourceTotals::for_tier(tier, &resources));
        let ledger = Arc::new(ResourceLedger::new(totals));

        let queue = match &self.config.journal_dir {
            Some(dir) => Arc::new(JobQueue::with_journal(QueueJournal::open(dir)?)?),
            None => Arc::new(JobQueue::new()),
        };

        let health = Arc::new(HealthRegistry::new(
            Arc::clone(&queue),
            self.config.health_thresholds(),
        ));
        let handlers = Arc::new(HandlerRegistry::new());

        let supervisor = Arc::new(WorkerSupervisor::new(
            Arc::clone(&catalog),
            Arc::clone(&queue),
            Arc::clone(&health),
            Arc::clone(&ledger),
            Arc::clone(&handlers),
            self.config.worker_runtime(),
        ));

        let dispatcher = Dispatcher::new(
            Arc::clone(&catalog),
            Arc::clone(&ledger),
            Arc::clone(&queue),
            Arc::clone(&health),
            DispatchDefaults {
                priority: self.config.default_priority,
                max_retries: self.config.default_max_retries,
            },
        );

        Ok(Scheduler::assemble(
            resources, tier, catalog, ledger, queue, health, handlers, dispatcher, supervisor,
            self.config,
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::resources::monitor::ResourceTier;

    #[test]
    fn builds_with_defaults() {
        let scheduler = SchedulerBuilder::new(SchedulerConfig::default())
            .build()
            .unwrap();
        // Whatever the host, some tier was assigned and pools exist.
        assert!(scheduler.snapshot().pools.iter().any(|p| p.name == "nlp"));
    }

    #[test]
    fn tier_override_flows_through() {
        let cfg = SchedulerConfig {
            tier_override: Some(ResourceTier::Power),
            ..SchedulerConfig::default()
        };
        let scheduler = SchedulerBuilder::new(cfg).build().unwrap();
        assert_eq!(scheduler.tier(), ResourceTier::Power);
    }

    #[test]
    fn invalid_config_refuses_to_build() {
        let cfg = SchedulerConfig {
            sweep_interval_ms: 0,
            ..SchedulerConfig::default()
        };
        assert!(matches!(
            SchedulerBuilder::new(cfg).build(),
            Err(DispatchError::InvalidConfig(_))
        ));
    }

    #[test]
    fn unknown_disabled_pool_refuses_to_build() {
        let cfg = SchedulerConfig {
            disabled_pools: vec!["ghost".into()],
            ..SchedulerConfig::default()
        };
        assert!(matches!(
            SchedulerBuilder::new(cfg).build(),
            Err(DispatchError::InvalidConfig(_))
        ));
    }
}
