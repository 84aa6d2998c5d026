//! Counters exposed for an external observability collaborator.
//!
//! EMO only maintains the numbers; rendering and export are someone
//! else's job. Counters are plain relaxed atomics since they are
//! advisory, not part of any correctness path.

use std::sync::atomic::{AtomicU64, Ordering};

use serde::{Deserialize, Serialize};

use emo_common::types::TierDescriptor;

/// Internal counter block owned by the orchestrator.
#[derive(Debug, Default)]
pub(crate) struct Counters {
    pub allocations: AtomicU64,
    pub releases: AtomicU64,
    /// Pressure-driven demotions.
    pub evictions: AtomicU64,
    /// Hotness-driven promotions.
    pub promotions: AtomicU64,
    pub migration_failures: AtomicU64,
    pub insufficient_evictable: AtomicU64,
}

impl Counters {
    pub(crate) fn bump(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }
}

/// Point-in-time view of the orchestrator's counters and tier usage.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetricsSnapshot {
    /// Successful allocations.
    pub allocations: u64,
    /// Successful releases.
    pub releases: u64,
    /// Buffers demoted to relieve tier pressure.
    pub evictions: u64,
    /// Buffers promoted toward the fast tier.
    pub promotions: u64,
    /// Migrations that rolled back.
    pub migration_failures: u64,
    /// Times the zero-OOM guarantee could not be honored.
    pub insufficient_evictable: u64,
    /// Per-tier used/available view, fastest first.
    pub tiers: Vec<TierDescriptor>,
}

impl Counters {
    pub(crate) fn snapshot(&self, tiers: Vec<TierDescriptor>) -> MetricsSnapshot {
        MetricsSnapshot {
            allocations: self.allocations.load(Ordering::Relaxed),
            releases: self.releases.load(Ordering::Relaxed),
            evictions: self.evictions.load(Ordering::Relaxed),
            promotions: self.promotions.load(Ordering::Relaxed),
            migration_failures: self.migration_failures.load(Ordering::Relaxed),
            insufficient_evictable: self.insufficient_evictable.load(Ordering::Relaxed),
            tiers,
        }
    }
}
