//! Static-per-tier pool tables with operator overrides and fallback chains.
//!
//! Every pool exists at every tier; the tier sets its worker target (0 means
//! the pool cannot run there, though it may still appear in fallback chains).
//! Malformed definitions (unknown fallback targets, cycles) are fatal at
//! construction: the scheduler refuses to start rather than run with
//! undefined fallback behavior.

use std::collections::{HashMap, HashSet};

use serde::{Deserialize, Serialize};

use crate::core::error::DispatchError;
use crate::resources::ledger::ResourceKind;
use crate::resources::monitor::ResourceTier;

/// Execution category of a pool, determining which ledger budget its workers
/// draw from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PoolCategory {
    /// I/O-bound work (file reads, format parsing).
    Io,
    /// CPU-bound work.
    Cpu,
    /// Accelerator-resident work (model inference).
    Accelerator,
    /// Calls into an external service; no local resource cost.
    ExternalCall,
}

impl PoolCategory {
    /// Ledger budget this category draws from, if any.
    #[must_use]
    pub fn resource_kind(self) -> Option<ResourceKind> {
        match self {
            Self::Accelerator => Some(ResourceKind::AcceleratorMemory),
            Self::Cpu | Self::Io => Some(ResourceKind::CpuThreads),
            Self::ExternalCall => None,
        }
    }
}

/// A named class of execution capacity.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PoolDefinition {
    /// Pool name, unique within the catalog.
    pub name: String,
    /// Execution category.
    pub category: PoolCategory,
    /// Concurrent workers this pool may run at the current tier.
    pub max_workers: u32,
    /// Ledger units each active worker consumes.
    pub resource_cost: u32,
    /// Pool tried next when this one lacks capacity.
    pub fallback_pool: Option<String>,
    /// Mutual-exclusion group; at most one pool per group may hold
    /// accelerator memory at a time.
    pub exclusive_group: Option<String>,
}

/// Catalog of pool definitions for one tier, with operator overrides applied.
#[derive(Debug)]
pub struct PoolCatalog {
    pools: HashMap<String, PoolDefinition>,
    /// Insertion order, for stable iteration and snapshots.
    order: Vec<String>,
    disabled: HashSet<String>,
}

impl PoolCatalog {
    /// Build a catalog from explicit definitions, validating fallback chains.
    pub fn new(definitions: Vec<PoolDefinition>) -> Result<Self, DispatchError> {
        let mut pools = HashMap::new();
        let mut order = Vec::with_capacity(definitions.len());
        for def in definitions {
            if def.category == PoolCategory::ExternalCall && def.resource_cost != 0 {
                return Err(DispatchError::InvalidConfig(format!(
                    "pool `{}`: external-call pools must have zero resource cost",
                    def.name
                )));
            }
            order.push(def.name.clone());
            if pools.insert(def.name.clone(), def).is_some() {
                let name = order.last().cloned().unwrap_or_default();
                return Err(DispatchError::InvalidConfig(format!(
                    "duplicate pool definition: {name}"
                )));
            }
        }

        let catalog = Self {
            pools,
            order,
            disabled: HashSet::new(),
        };
        catalog.validate_fallbacks()?;
        Ok(catalog)
    }

    /// The built-in pool table for a tier.
    pub fn for_tier(tier: ResourceTier) -> Result<Self, DispatchError> {
        Self::new(builtin_pools(tier))
    }

    fn validate_fallbacks(&self) -> Result<(), DispatchError> {
        for name in &self.order {
            let mut seen = HashSet::new();
            let mut current = name.as_str();
            seen.insert(current);
            while let Some(next) = self
                .pools
                .get(current)
                .and_then(|p| p.fallback_pool.as_deref())
            {
                if !self.pools.contains_key(next) {
                    return Err(DispatchError::InvalidConfig(format!(
                        "pool `{current}` falls back to unknown pool `{next}`"
                    )));
                }
                if !seen.insert(next) {
                    return Err(DispatchError::InvalidConfig(format!(
                        "fallback cycle detected starting from pool `{name}`"
                    )));
                }
                current = next;
            }
        }
        Ok(())
    }

    /// Apply operator overrides: disable pools, override capacities.
    /// Unknown pool names are a configuration error.
    pub fn apply_overrides(
        &mut self,
        disabled: &[String],
        capacity_overrides: &HashMap<String, u32>,
    ) -> Result<(), DispatchError> {
        for name in disabled {
            if !self.pools.contains_key(name) {
                return Err(DispatchError::InvalidConfig(format!(
                    "cannot disable unknown pool `{name}`"
                )));
            }
            self.disabled.insert(name.clone());
        }
        for (name, max_workers) in capacity_overrides {
            let Some(pool) = self.pools.get_mut(name) else {
                return Err(DispatchError::InvalidConfig(format!(
                    "capacity override for unknown pool `{name}`"
                )));
            };
            pool.max_workers = *max_workers;
        }
        Ok(())
    }

    /// Look up a pool definition.
    #[must_use]
    pub fn get(&self, name: &str) -> Option<&PoolDefinition> {
        self.pools.get(name)
    }

    /// Whether a pool may accept work: not operator-disabled and sized above
    /// zero at this tier.
    #[must_use]
    pub fn is_enabled(&self, name: &str) -> bool {
        !self.disabled.contains(name)
            && self.pools.get(name).is_some_and(|p| p.max_workers > 0)
    }

    /// Worker target for the supervisor: the pool's capacity, or zero when
    /// disabled.
    #[must_use]
    pub fn target_workers(&self, name: &str) -> u32 {
        if self.disabled.contains(name) {
            return 0;
        }
        self.pools.get(name).map_or(0, |p| p.max_workers)
    }

    /// Pools in definition order.
    pub fn pools(&self) -> impl Iterator<Item = &PoolDefinition> {
        self.order.iter().filter_map(|name| self.pools.get(name))
    }

    /// The fallback chain starting at (and including) `name`. Validated
    /// acyclic at construction, so iteration terminates.
    #[must_use]
    pub fn fallback_chain(&self, name: &str) -> Vec<&PoolDefinition> {
        let mut chain = Vec::new();
        let mut current = self.pools.get(name);
        while let Some(pool) = current {
            chain.push(pool);
            current = pool.fallback_pool.as_deref().and_then(|n| self.pools.get(n));
        }
        chain
    }
}

/// Built-in Frame ingestion pools sized for a tier.
fn builtin_pools(tier: ResourceTier) -> Vec<PoolDefinition> {
    use ResourceTier::{Minimal, Power, Recommended, Standard};

    let workers = |minimal: u32, standard: u32, recommended: u32, power: u32| match tier {
        Minimal => minimal,
        Standard => standard,
        Recommended => recommended,
        Power => power,
    };
    // Small accelerators cannot hold the OCR and embedding models at once.
    let accel_group = (tier == Standard).then(|| "accel-resident".to_string());

    vec![
        PoolDefinition {
            name: "extract-text".into(),
            category: PoolCategory::Io,
            max_workers: workers(2, 2, 4, 8),
            resource_cost: 0,
            fallback_pool: None,
            exclusive_group: None,
        },
        PoolDefinition {
            name: "ocr-fast".into(),
            category: PoolCategory::Accelerator,
            max_workers: workers(0, 1, 2, 4),
            resource_cost: 2,
            fallback_pool: Some("ocr-slow".into()),
            exclusive_group: accel_group.clone(),
        },
        PoolDefinition {
            name: "ocr-slow".into(),
            category: PoolCategory::Cpu,
            max_workers: workers(1, 1, 2, 2),
            resource_cost: 1,
            fallback_pool: None,
            exclusive_group: None,
        },
        PoolDefinition {
            name: "embed".into(),
            category: PoolCategory::Accelerator,
            max_workers: workers(0, 1, 2, 4),
            resource_cost: 2,
            fallback_pool: Some("embed-cpu".into()),
            exclusive_group: accel_group,
        },
        PoolDefinition {
            name: "embed-cpu".into(),
            category: PoolCategory::Cpu,
            max_workers: workers(1, 1, 1, 2),
            resource_cost: 1,
            fallback_pool: None,
            exclusive_group: None,
        },
        PoolDefinition {
            name: "nlp".into(),
            category: PoolCategory::Cpu,
            max_workers: workers(1, 2, 4, 8),
            resource_cost: 1,
            fallback_pool: None,
            exclusive_group: None,
        },
        PoolDefinition {
            name: "llm".into(),
            category: PoolCategory::ExternalCall,
            max_workers: workers(1, 2, 2, 4),
            resource_cost: 0,
            fallback_pool: None,
            exclusive_group: None,
        },
    ]
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pool(name: &str, fallback: Option<&str>) -> PoolDefinition {
        PoolDefinition {
            name: name.into(),
            category: PoolCategory::Cpu,
            max_workers: 1,
            resource_cost: 1,
            fallback_pool: fallback.map(Into::into),
            exclusive_group: None,
        }
    }

    #[test]
    fn builtin_tiers_validate() {
        for tier in [
            ResourceTier::Minimal,
            ResourceTier::Standard,
            ResourceTier::Recommended,
            ResourceTier::Power,
        ] {
            PoolCatalog::for_tier(tier).expect("builtin catalog must validate");
        }
    }

    #[test]
    fn minimal_tier_disables_accelerator_pools() {
        let catalog = PoolCatalog::for_tier(ResourceTier::Minimal).unwrap();
        assert!(!catalog.is_enabled("ocr-fast"));
        assert!(!catalog.is_enabled("embed"));
        assert!(catalog.is_enabled("ocr-slow"));
        assert!(catalog.is_enabled("extract-text"));
    }

    #[test]
    fn standard_tier_pins_exclusive_group() {
        let catalog = PoolCatalog::for_tier(ResourceTier::Standard).unwrap();
        assert_eq!(
            catalog.get("ocr-fast").unwrap().exclusive_group.as_deref(),
            Some("accel-resident")
        );
        assert_eq!(
            catalog.get("embed").unwrap().exclusive_group.as_deref(),
            Some("accel-resident")
        );
        let rec = PoolCatalog::for_tier(ResourceTier::Recommended).unwrap();
        assert!(rec.get("ocr-fast").unwrap().exclusive_group.is_none());
    }

    #[test]
    fn fallback_cycle_is_fatal() {
        let err = PoolCatalog::new(vec![
            pool("a", Some("b")),
            pool("b", Some("c")),
            pool("c", Some("a")),
        ])
        .unwrap_err();
        assert!(matches!(err, DispatchError::InvalidConfig(_)));
        assert!(err.to_string().contains("cycle"));
    }

    #[test]
    fn unknown_fallback_target_is_fatal() {
        let err = PoolCatalog::new(vec![pool("a", Some("ghost"))]).unwrap_err();
        assert!(matches!(err, DispatchError::InvalidConfig(_)));
    }

    #[test]
    fn external_call_pools_must_be_free() {
        let err = PoolCatalog::new(vec![PoolDefinition {
            name: "llm".into(),
            category: PoolCategory::ExternalCall,
            max_workers: 1,
            resource_cost: 3,
            fallback_pool: None,
            exclusive_group: None,
        }])
        .unwrap_err();
        assert!(matches!(err, DispatchError::InvalidConfig(_)));
    }

    #[test]
    fn overrides_disable_and_resize() {
        let mut catalog = PoolCatalog::for_tier(ResourceTier::Recommended).unwrap();
        catalog
            .apply_overrides(
                &["nlp".into()],
                &HashMap::from([("extract-text".into(), 9)]),
            )
            .unwrap();
        assert!(!catalog.is_enabled("nlp"));
        assert_eq!(catalog.target_workers("nlp"), 0);
        assert_eq!(catalog.get("extract-text").unwrap().max_workers, 9);
    }

    #[test]
    fn override_of_unknown_pool_is_fatal() {
        let mut catalog = PoolCatalog::for_tier(ResourceTier::Minimal).unwrap();
        let err = catalog
            .apply_overrides(&["ghost".into()], &HashMap::new())
            .unwrap_err();
        assert!(matches!(err, DispatchError::InvalidConfig(_)));
    }

    #[test]
    fn fallback_chain_walks_in_order() {
        let catalog = PoolCatalog::for_tier(ResourceTier::Standard).unwrap();
        let chain: Vec<_> = catalog
            .fallback_chain("ocr-fast")
            .iter()
            .map(|p| p.name.clone())
            .collect();
        assert_eq!(chain, vec!["ocr-fast", "ocr-slow"]);
    }
}
