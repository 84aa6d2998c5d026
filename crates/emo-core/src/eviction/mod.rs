//! Victim selection under tier pressure.
//!
//! When a tier crosses its admission threshold, the planner picks which
//! resident buffers to demote. Ranking is least-recently-touched first,
//! with ties broken by larger size first: recency approximates reuse
//! probability for sequential training-style access, and the size
//! tie-break frees more bytes per migration, so fewer fixed-overhead
//! migrations relieve a given amount of pressure.
//!
//! Pinned buffers are invisible to the planner; a buffer another thread
//! is actively using is never demoted out from under it.

use std::sync::Arc;

use smallvec::SmallVec;
use tracing::debug;

use emo_common::types::{Handle, TierId};
use emo_common::utils::error::{Error, Result};

use crate::registry::BufferRegistry;

/// Chooses demotion victims from a tier's resident, unpinned buffers.
pub struct EvictionPlanner {
    registry: Arc<BufferRegistry>,
}

impl EvictionPlanner {
    /// Creates a planner reading candidates from `registry`.
    #[must_use]
    pub fn new(registry: Arc<BufferRegistry>) -> Self {
        Self { registry }
    }

    /// Selects an ordered set of victims whose cumulative size covers
    /// `bytes_needed`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InsufficientEvictable`] when the unpinned
    /// resident bytes in `tier` cannot cover the need. This is the one
    /// condition under which the zero-OOM guarantee cannot be honored;
    /// the orchestrator surfaces it rather than retrying indefinitely.
    pub fn select_victims(
        &self,
        tier: TierId,
        bytes_needed: u64,
    ) -> Result<SmallVec<[Handle; 8]>> {
        let mut candidates = self.registry.resident_unpinned_in(tier);
        candidates.sort_by(|a, b| {
            a.last_touch
                .cmp(&b.last_touch)
                .then_with(|| b.size.cmp(&a.size))
        });

        let mut victims = SmallVec::new();
        let mut freed = 0u64;
        for record in &candidates {
            if freed >= bytes_needed {
                break;
            }
            victims.push(record.handle);
            freed += record.size;
        }

        if freed < bytes_needed {
            let reclaimable: u64 = candidates.iter().map(|r| r.size).sum();
            return Err(Error::InsufficientEvictable {
                tier,
                needed: bytes_needed,
                reclaimable,
            });
        }

        debug!(
            %tier,
            bytes_needed,
            freed,
            victims = victims.len(),
            "eviction plan"
        );
        Ok(victims)
    }
}
