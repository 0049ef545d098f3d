//! Live accounting of scarce resources against the tier's totals.
//!
//! The ledger is the single mutator of accelerator/CPU budget counters; every
//! allocation and release goes through it. Workers allocate their pool's
//! resource cost for their lifetime (in `starting`) and release it in
//! `stopped`.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex};
use serde::{Deserialize, Serialize};

use crate::core::error::DispatchError;
use crate::resources::monitor::{HostResources, ResourceTier};

/// Kind of scarce resource the ledger accounts for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResourceKind {
    /// Accelerator memory, in abstract units sized by the tier.
    AcceleratorMemory,
    /// CPU-thread budget.
    CpuThreads,
}

impl std::fmt::Display for ResourceKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::AcceleratorMemory => write!(f, "accelerator_memory"),
            Self::CpuThreads => write!(f, "cpu_threads"),
        }
    }
}

/// Per-kind totals the ledger enforces.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct ResourceTotals {
    /// Accelerator units available at this tier.
    pub accelerator_units: u32,
    /// CPU threads the scheduler may commit to workers.
    pub cpu_threads: u32,
}

impl ResourceTotals {
    /// Derive totals from the tier and the probed host.
    ///
    /// Accelerator units are tier-sized rather than raw MiB so pool costs stay
    /// stable across hosts within a tier. The CPU budget leaves two cores for
    /// the control plane and the platform around it.
    #[must_use]
    pub fn for_tier(tier: ResourceTier, resources: &HostResources) -> Self {
        let accelerator_units = match tier {
            ResourceTier::Minimal => 0,
            ResourceTier::Standard => 4,
            ResourceTier::Recommended => 8,
            ResourceTier::Power => 16,
        };
        let cpu_threads = resources.cpu_cores.saturating_sub(2).max(2) as u32;
        Self {
            accelerator_units,
            cpu_threads,
        }
    }

    fn total(&self, kind: ResourceKind) -> u32 {
        match kind {
            ResourceKind::AcceleratorMemory => self.accelerator_units,
            ResourceKind::CpuThreads => self.cpu_threads,
        }
    }
}

/// One allocation request/receipt. `owner` scopes release idempotency (a
/// worker id); `pool` scopes exclusive-group ownership.
#[derive(Debug, Clone)]
pub struct Allocation {
    /// Release scope: releasing twice for the same owner is a no-op.
    pub owner: String,
    /// Pool on whose behalf the units are held.
    pub pool: String,
    /// Resource kind drawn from.
    pub kind: ResourceKind,
    /// Units requested.
    pub units: u32,
    /// Optional mutual-exclusion group; only one pool may hold a group at a
    /// time even when raw units would fit.
    pub exclusive_group: Option<String>,
}

struct GroupHold {
    pool: String,
    /// Owners holding the group; membership is per-owner so release stays
    /// idempotent even when a supervisor releases on a worker's behalf.
    holders: std::collections::HashSet<String>,
}

struct LedgerState {
    allocated: HashMap<ResourceKind, u32>,
    /// Units held per (owner, kind); bounds idempotent release.
    by_owner: HashMap<(String, ResourceKind), u32>,
    groups: HashMap<String, GroupHold>,
}

/// Tracks live allocation of scarce resources against the tier's totals;
/// grants, denies, or waits for allocation.
pub struct ResourceLedger {
    totals: ResourceTotals,
    state: Mutex<LedgerState>,
    released: Condvar,
}

impl ResourceLedger {
    /// Create a ledger enforcing the given totals.
    #[must_use]
    pub fn new(totals: ResourceTotals) -> Self {
        Self {
            totals,
            state: Mutex::new(LedgerState {
                allocated: HashMap::new(),
                by_owner: HashMap::new(),
                groups: HashMap::new(),
            }),
            released: Condvar::new(),
        }
    }

    /// Total units for a kind.
    #[must_use]
    pub fn total(&self, kind: ResourceKind) -> u32 {
        self.totals.total(kind)
    }

    /// Currently unallocated units for a kind.
    #[must_use]
    pub fn available(&self, kind: ResourceKind) -> u32 {
        let state = self.state.lock();
        self.totals
            .total(kind)
            .saturating_sub(*state.allocated.get(&kind).unwrap_or(&0))
    }

    fn grantable(&self, state: &LedgerState, req: &Allocation) -> bool {
        if req.units > 0 {
            let used = *state.allocated.get(&req.kind).unwrap_or(&0);
            if used + req.units > self.totals.total(req.kind) {
                return false;
            }
        }
        if let Some(group) = &req.exclusive_group {
            if let Some(hold) = state.groups.get(group) {
                if hold.pool != req.pool {
                    return false;
                }
            }
        }
        true
    }

    fn apply(&self, state: &mut LedgerState, req: &Allocation) {
        if req.units > 0 {
            *state.allocated.entry(req.kind).or_insert(0) += req.units;
            *state
                .by_owner
                .entry((req.owner.clone(), req.kind))
                .or_insert(0) += req.units;
        }
        if let Some(group) = &req.exclusive_group {
            let hold = state.groups.entry(group.clone()).or_insert_with(|| GroupHold {
                pool: req.pool.clone(),
                holders: std::collections::HashSet::new(),
            });
            hold.holders.insert(req.owner.clone());
        }
    }

    /// Non-mutating check: would this allocation be granted right now?
    #[must_use]
    pub fn can_grant(&self, req: &Allocation) -> bool {
        let state = self.state.lock();
        self.grantable(&state, req)
    }

    /// Non-blocking allocation attempt.
    pub fn try_allocate(&self, req: &Allocation) -> bool {
        let mut state = self.state.lock();
        if !self.grantable(&state, req) {
            tracing::debug!(
                pool = %req.pool,
                kind = %req.kind,
                units = req.units,
                "allocation denied"
            );
            return false;
        }
        self.apply(&mut state, req);
        true
    }

    /// Blocking allocation with a deadline. Fails with
    /// [`DispatchError::ResourceExhausted`] when the deadline elapses first.
    pub fn wait_allocate(&self, req: &Allocation, timeout: Duration) -> Result<(), DispatchError> {
        let deadline = Instant::now() + timeout;
        let mut state = self.state.lock();
        loop {
            if self.grantable(&state, req) {
                self.apply(&mut state, req);
                return Ok(());
            }
            if self.released.wait_until(&mut state, deadline).timed_out() {
                // One last look: a release may have landed with the wakeup.
                if self.grantable(&state, req) {
                    self.apply(&mut state, req);
                    return Ok(());
                }
                return Err(DispatchError::ResourceExhausted(format!(
                    "{} units of {} for pool {}",
                    req.units, req.kind, req.pool
                )));
            }
        }
    }

    /// Release an allocation. Idempotent: releasing more than the owner holds
    /// is a no-op and never drives availability above the tier total.
    pub fn release(&self, req: &Allocation) {
        let mut state = self.state.lock();
        if req.units > 0 {
            let key = (req.owner.clone(), req.kind);
            let held = state.by_owner.get(&key).copied().unwrap_or(0);
            let releasable = held.min(req.units);
            if releasable > 0 {
                if held == releasable {
                    state.by_owner.remove(&key);
                } else if let Some(h) = state.by_owner.get_mut(&key) {
                    *h -= releasable;
                }
                if let Some(total) = state.allocated.get_mut(&req.kind) {
                    *total = total.saturating_sub(releasable);
                }
            }
        }
        if let Some(group) = &req.exclusive_group {
            let empty = if let Some(hold) = state.groups.get_mut(group) {
                if hold.pool == req.pool {
                    hold.holders.remove(&req.owner);
                }
                hold.holders.is_empty()
            } else {
                false
            };
            if empty {
                state.groups.remove(group);
            }
        }
        drop(state);
        self.released.notify_all();
    }
}
