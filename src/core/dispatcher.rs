//! Caller-facing entry point: pool selection with fallback, enqueue, and
//! result waiting.

use std::sync::Arc;
use std::time::Duration;

use crate::core::error::DispatchError;
use crate::core::health::HealthRegistry;
use crate::core::job::{Job, JobId, JobOutcome, Priority};
use crate::core::queue::JobQueue;
use crate::resources::catalog::{PoolCatalog, PoolDefinition};
use crate::resources::ledger::{Allocation, ResourceLedger};
use crate::util::clock::now_ms;

/// Defaults applied when a caller does not specify priority or retries.
#[derive(Debug, Clone, Copy)]
pub struct DispatchDefaults {
    /// Priority assigned when unspecified; lower is more urgent.
    pub priority: Priority,
    /// Retry budget assigned when unspecified.
    pub max_retries: u32,
}

impl Default for DispatchDefaults {
    fn default() -> Self {
        Self {
            priority: crate::core::job::DEFAULT_PRIORITY,
            max_retries: 3,
        }
    }
}

/// Routes jobs to pools under the capacity budget and exposes the
/// submission/result contract consumed by domain modules.
pub struct Dispatcher {
    catalog: Arc<PoolCatalog>,
    ledger: Arc<ResourceLedger>,
    queue: Arc<JobQueue>,
    health: Arc<HealthRegistry>,
    defaults: DispatchDefaults,
}

impl Dispatcher {
    /// Assemble a dispatcher over the shared control-plane services.
    #[must_use]
    pub fn new(
        catalog: Arc<PoolCatalog>,
        ledger: Arc<ResourceLedger>,
        queue: Arc<JobQueue>,
        health: Arc<HealthRegistry>,
        defaults: DispatchDefaults,
    ) -> Self {
        Self {
            catalog,
            ledger,
            queue,
            health,
            defaults,
        }
    }

    /// Whether a pool can take one more job right now: enabled, a free
    /// in-flight slot, and either a live worker or ledger headroom to start
    /// one.
    fn pool_available(&self, pool: &PoolDefinition) -> bool {
        if !self.catalog.is_enabled(&pool.name) {
            return false;
        }
        if self.queue.in_flight(&pool.name) >= pool.max_workers as usize {
            return false;
        }
        if self.health.live_worker_count(&pool.name) > 0 {
            return true;
        }
        // No worker yet; selection holds only if one could acquire budget.
        match pool.category.resource_kind() {
            None => true,
            Some(kind) => self.ledger.can_grant(&Allocation {
                owner: String::new(),
                pool: pool.name.clone(),
                kind,
                units: pool.resource_cost,
                exclusive_group: pool.exclusive_group.clone(),
            }),
        }
    }

    /// Resolve the pool a job should run in, walking the fallback chain when
    /// the requested pool lacks capacity. Fallback changes only the execution
    /// pool, never priority or payload.
    pub fn select_pool(&self, requested: &str) -> Result<String, DispatchError> {
        let chain = self.catalog.fallback_chain(requested);
        if chain.is_empty() {
            return Err(DispatchError::UnknownPool(requested.to_string()));
        }

        let mut attempted = Vec::with_capacity(chain.len());
        for pool in &chain {
            if self.pool_available(pool) {
                if pool.name != requested {
                    tracing::info!(
                        requested,
                        selected = %pool.name,
                        "fallback pool selected"
                    );
                }
                return Ok(pool.name.clone());
            }
            attempted.push(pool.name.clone());
        }
        Err(DispatchError::CapacityExhausted { attempted })
    }

    /// Enqueue with explicit priority and retry budget. Returns the job id.
    /// The scheduler does not deduplicate payloads; idempotency belongs to
    /// the caller.
    pub fn enqueue_with(
        &self,
        pool: &str,
        payload: serde_json::Value,
        priority: Priority,
        max_retries: u32,
    ) -> Result<JobId, DispatchError> {
        let selected = self.select_pool(pool)?;
        let job = Job::new(selected, payload, priority, max_retries, now_ms());
        let id = self.queue.enqueue(job)?;
        tracing::debug!(job_id = %id, pool, priority, "job enqueued");
        Ok(id)
    }

    /// Enqueue with the configured defaults.
    pub fn enqueue(&self, pool: &str, payload: serde_json::Value) -> Result<JobId, DispatchError> {
        self.enqueue_with(
            pool,
            payload,
            self.defaults.priority,
            self.defaults.max_retries,
        )
    }

    /// Block until the job completes or the timeout elapses. Timing out stops
    /// the wait, never the job; abandoning the wait leaks nothing.
    pub fn wait_for_result(
        &self,
        job_id: JobId,
        timeout: Duration,
    ) -> Result<JobOutcome, DispatchError> {
        self.queue.wait_for_outcome(job_id, timeout)
    }

    /// Enqueue and wait: sugar for the common synchronous call site.
    pub fn enqueue_and_wait(
        &self,
        pool: &str,
        payload: serde_json::Value,
        timeout: Duration,
    ) -> Result<JobOutcome, DispatchError> {
        let id = self.enqueue(pool, payload)?;
        self.wait_for_result(id, timeout)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::health::HealthThresholds;
    use crate::resources::catalog::{PoolCategory, PoolDefinition};
    use crate::resources::ledger::ResourceTotals;
    use uuid::Uuid;

    fn pool(name: &str, max_workers: u32, cost: u32, fallback: Option<&str>) -> PoolDefinition {
        PoolDefinition {
            name: name.into(),
            category: if cost > 0 {
                PoolCategory::Accelerator
            } else {
                PoolCategory::ExternalCall
            },
            max_workers,
            resource_cost: cost,
            fallback_pool: fallback.map(Into::into),
            exclusive_group: None,
        }
    }

    fn dispatcher(pools: Vec<PoolDefinition>, accelerator_units: u32) -> Dispatcher {
        let catalog = Arc::new(PoolCatalog::new(pools).unwrap());
        let ledger = Arc::new(ResourceLedger::new(ResourceTotals {
            accelerator_units,
            cpu_threads: 4,
        }));
        let queue = Arc::new(JobQueue::new());
        let health = Arc::new(HealthRegistry::new(
            Arc::clone(&queue),
            HealthThresholds {
                stuck_after: Duration::from_secs(1),
                dead_after: Duration::from_secs(2),
            },
        ));
        Dispatcher::new(catalog, ledger, queue, health, DispatchDefaults::default())
    }

    #[test]
    fn selects_requested_pool_when_free() {
        let d = dispatcher(vec![pool("llm", 2, 0, None)], 8);
        assert_eq!(d.select_pool("llm").unwrap(), "llm");
    }

    #[test]
    fn unknown_pool_is_an_error() {
        let d = dispatcher(vec![pool("llm", 2, 0, None)], 8);
        assert!(matches!(
            d.select_pool("ghost"),
            Err(DispatchError::UnknownPool(_))
        ));
    }

    #[test]
    fn falls_back_when_primary_full() {
        let d = dispatcher(
            vec![
                pool("ocr-fast", 1, 0, Some("ocr-slow")),
                pool("ocr-slow", 1, 0, None),
            ],
            8,
        );
        // Fill ocr-fast's single slot.
        let worker = Uuid::new_v4();
        d.enqueue("ocr-fast", serde_json::json!({"page": 1})).unwrap();
        d.queue.claim("ocr-fast", worker).unwrap();

        assert_eq!(d.select_pool("ocr-fast").unwrap(), "ocr-slow");
    }

    #[test]
    fn exhausted_chain_reports_every_attempted_pool() {
        let d = dispatcher(
            vec![
                pool("ocr-fast", 1, 0, Some("ocr-slow")),
                pool("ocr-slow", 1, 0, None),
            ],
            8,
        );
        for name in ["ocr-fast", "ocr-slow"] {
            d.enqueue(name, serde_json::json!({})).unwrap();
            d.queue.claim(name, Uuid::new_v4()).unwrap();
        }

        let err = d.select_pool("ocr-fast").unwrap_err();
        match err {
            DispatchError::CapacityExhausted { attempted } => {
                assert_eq!(attempted, vec!["ocr-fast", "ocr-slow"]);
            }
            other => panic!("expected CapacityExhausted, got {other:?}"),
        }
    }

    #[test]
    fn ledger_headroom_gates_selection_when_no_worker_lives() {
        // Accelerator pool costs 4 units but the tier only has 2.
        let d = dispatcher(vec![pool("embed", 2, 4, None)], 2);
        let err = d.select_pool("embed").unwrap_err();
        assert!(matches!(err, DispatchError::CapacityExhausted { .. }));
    }

    #[test]
    fn live_worker_overrides_ledger_check() {
        let d = dispatcher(vec![pool("embed", 2, 4, None)], 2);
        // A running worker (however it got its budget) makes the pool viable.
        let worker = Uuid::new_v4();
        d.health.register(worker, "embed");
        assert_eq!(d.select_pool("embed").unwrap(), "embed");
    }

    #[test]
    fn fallback_preserves_priority_and_payload() {
        let d = dispatcher(
            vec![
                pool("ocr-fast", 1, 0, Some("ocr-slow")),
                pool("ocr-slow", 1, 0, None),
            ],
            8,
        );
        let worker = Uuid::new_v4();
        d.enqueue("ocr-fast", serde_json::json!({})).unwrap();
        d.queue.claim("ocr-fast", worker).unwrap();

        let id = d
            .enqueue_with("ocr-fast", serde_json::json!({"page": 9}), 7, 5)
            .unwrap();
        let job = d.queue.job(id).unwrap();
        assert_eq!(job.pool, "ocr-slow");
        assert_eq!(job.priority, 7);
        assert_eq!(job.max_retries, 5);
        assert_eq!(job.payload["page"], 9);
    }

    #[test]
    fn wait_for_result_times_out_without_cancelling() {
        let d = dispatcher(vec![pool("llm", 2, 0, None)], 8);
        let id = d.enqueue("llm", serde_json::json!({})).unwrap();
        let err = d.wait_for_result(id, Duration::ZERO).unwrap_err();
        assert!(matches!(err, DispatchError::Timeout));
        assert!(d.queue.job(id).is_some());
    }

    #[test]
    fn disabled_pool_routes_to_fallback() {
        let catalog = {
            let mut c = PoolCatalog::new(vec![
                pool("ocr-fast", 1, 0, Some("ocr-slow")),
                pool("ocr-slow", 1, 0, None),
            ])
            .unwrap();
            c.apply_overrides(&["ocr-fast".into()], &std::collections::HashMap::new())
                .unwrap();
            Arc::new(c)
        };
        let ledger = Arc::new(ResourceLedger::new(ResourceTotals {
            accelerator_units: 8,
            cpu_threads: 4,
        }));
        let queue = Arc::new(JobQueue::new());
        let health = Arc::new(HealthRegistry::new(
            Arc::clone(&queue),
            HealthThresholds {
                stuck_after: Duration::from_secs(1),
                dead_after: Duration::from_secs(2),
            },
        ));
        let d = Dispatcher::new(catalog, ledger, queue, health, DispatchDefaults::default());
        assert_eq!(d.select_pool("ocr-fast").unwrap(), "ocr-slow");
    }
}
