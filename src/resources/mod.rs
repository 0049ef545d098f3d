//! Host probing, capability tiers, resource accounting, and the pool catalog.

pub mod catalog;
pub mod ledger;
pub mod monitor;

pub use catalog::{PoolCatalog, PoolCategory, PoolDefinition};
pub use ledger::{ResourceKind, ResourceLedger, ResourceTotals};
pub use monitor::{AcceleratorProbe, EnvAcceleratorProbe, HostResources, ResourceMonitor, ResourceTier};
