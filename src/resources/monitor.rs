//! Host hardware probing and capability-tier classification.
//!
//! Probes once at startup and on demand. The tier drives pool capacities via
//! the catalog; an operator override always wins over detection.

use serde::{Deserialize, Serialize};

/// Environment variable consulted by [`EnvAcceleratorProbe`].
pub const ACCELERATOR_MB_ENV: &str = "FRAME_ACCELERATOR_MB";

/// Accelerator-memory floor (MiB) below which only small models fit.
const SMALL_MODEL_MB: u64 = 4_096;
/// Accelerator-memory floor (MiB) for large-model pools.
const LARGE_MODEL_MB: u64 = 12_288;

/// Snapshot of host hardware. Computed once; immutable until re-probed.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HostResources {
    /// Logical CPU core count.
    pub cpu_cores: usize,
    /// Total system RAM in MiB.
    pub ram_mb: u64,
    /// Accelerator memory in MiB, when an accelerator is present.
    pub accelerator_mb: Option<u64>,
    /// Whether an accelerator was detected at all.
    pub accelerator_present: bool,
}

impl HostResources {
    /// Accelerator memory, treating "absent" as zero.
    #[must_use]
    pub fn accelerator_mb_or_zero(&self) -> u64 {
        self.accelerator_mb.unwrap_or(0)
    }
}

/// Coarse hardware-capability classification used to size pool capacities.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResourceTier {
    /// No accelerator or very small host; CPU-only pools.
    Minimal,
    /// Small accelerator; one accelerator-resident model at a time.
    Standard,
    /// Moderate accelerator memory.
    Recommended,
    /// Large accelerator and high thread count.
    Power,
}

impl std::fmt::Display for ResourceTier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Minimal => write!(f, "minimal"),
            Self::Standard => write!(f, "standard"),
            Self::Recommended => write!(f, "recommended"),
            Self::Power => write!(f, "power"),
        }
    }
}

/// Source of accelerator-memory information.
///
/// The platform learns accelerator capacity from an external runtime (model
/// server, driver shim) rather than talking to drivers itself; deployments
/// plug their own probe in here. The default reads an environment override.
pub trait AcceleratorProbe: Send + Sync {
    /// Detected accelerator memory in MiB, or `None` when no accelerator is
    /// available.
    fn accelerator_mb(&self) -> Option<u64>;
}

/// Probe that reads [`ACCELERATOR_MB_ENV`]. Unset, empty, unparsable, or zero
/// values all mean "no accelerator", conservative like the rest of
/// detection.
#[derive(Debug, Default, Clone)]
pub struct EnvAcceleratorProbe;

impl AcceleratorProbe for EnvAcceleratorProbe {
    fn accelerator_mb(&self) -> Option<u64> {
        let raw = std::env::var(ACCELERATOR_MB_ENV).ok()?;
        match raw.trim().parse::<u64>() {
            Ok(0) | Err(_) => None,
            Ok(mb) => Some(mb),
        }
    }
}

/// Probes host hardware and classifies it into a [`ResourceTier`].
pub struct ResourceMonitor {
    probe: Box<dyn AcceleratorProbe>,
}

impl Default for ResourceMonitor {
    fn default() -> Self {
        Self::new(Box::new(EnvAcceleratorProbe))
    }
}

impl ResourceMonitor {
    /// Create a monitor with a custom accelerator probe.
    #[must_use]
    pub fn new(probe: Box<dyn AcceleratorProbe>) -> Self {
        Self { probe }
    }

    /// Probe the host: CPU cores, RAM, accelerator memory.
    #[must_use]
    pub fn detect(&self) -> HostResources {
        let cpu_cores = num_cpus::get();

        let mut system = sysinfo::System::new();
        system.refresh_memory();
        let ram_mb = system.total_memory() / (1024 * 1024);

        let accelerator_mb = self.probe.accelerator_mb();
        let resources = HostResources {
            cpu_cores,
            ram_mb,
            accelerator_present: accelerator_mb.is_some(),
            accelerator_mb,
        };

        tracing::info!(
            cpu_cores,
            ram_mb,
            accelerator_mb = resources.accelerator_mb_or_zero(),
            "host resources detected"
        );
        resources
    }

    /// Derive the capability tier. Pure function of the probe result plus an
    /// optional operator override; the override always wins.
    #[must_use]
    pub fn determine_tier(
        resources: &HostResources,
        operator_override: Option<ResourceTier>,
    ) -> ResourceTier {
        if let Some(tier) = operator_override {
            tracing::info!(tier = %tier, "tier set by operator override");
            return tier;
        }

        let accel_mb = resources.accelerator_mb_or_zero();
        let tier = if !resources.accelerator_present || accel_mb == 0 || resources.cpu_cores < 4 {
            ResourceTier::Minimal
        } else if accel_mb < SMALL_MODEL_MB || resources.ram_mb < 16_384 {
            ResourceTier::Standard
        } else if accel_mb < LARGE_MODEL_MB
            || resources.cpu_cores < 12
            || resources.ram_mb < 32_768
        {
            ResourceTier::Recommended
        } else {
            ResourceTier::Power
        };

        tracing::info!(tier = %tier, "tier derived from host resources");
        tier
    }
}
