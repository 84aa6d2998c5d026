//! Storage tier abstraction and concrete backends.
//!
//! A tier is a homogeneous storage backend with a capacity and a speed
//! rank. All tiers share identical semantics behind the [`Tier`] trait:
//! addresses are opaque within a tier and meaningless across tiers, and
//! every operation presents a synchronous contract. The block tier is
//! internally asynchronous (tokio file I/O) but blocks at its boundary,
//! keeping tier implementations simple while concurrency stays
//! centralized in the migration engine.
//!
//! Backends:
//!
//! - [`MemoryTier`] - address-mapped in-memory pool (device and host tiers)
//! - [`BlockTier`] - one file per buffer under a spill directory, with
//!   crc32 payload verification

mod block;
mod memory;

use std::sync::Arc;

use bytes::Bytes;
use emo_common::types::TierId;
use emo_common::utils::error::{Error, Result};

pub use block::BlockTier;
pub use memory::MemoryTier;

/// A homogeneous storage backend.
///
/// `write` enforces the tier's hard capacity independently of the
/// capacity model's admission decisions; recorded usage never exceeds
/// capacity even when an admission decision was raced stale.
pub trait Tier: Send + Sync {
    /// This tier's identifier.
    fn id(&self) -> TierId;

    /// Speed rank; 0 is the fastest tier.
    fn rank(&self) -> u8;

    /// Total capacity in bytes.
    fn capacity(&self) -> u64;

    /// Bytes currently held by live allocations.
    fn used(&self) -> u64;

    /// Stores `data` and returns its tier-local address.
    ///
    /// # Errors
    ///
    /// Returns [`Error::TierFull`] if the write would exceed the tier's
    /// hard capacity, or an I/O error from the backend.
    fn write(&self, data: Bytes) -> Result<u64>;

    /// Reads `size` bytes back from `addr`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidAddress`] if `addr` was never issued (or
    /// already freed), [`Error::Corruption`] on checksum mismatch, or an
    /// I/O error from the backend.
    fn read(&self, addr: u64, size: u64) -> Result<Bytes>;

    /// Replaces the payload at `addr` in place. The new payload must have
    /// the same length as the original; buffer sizes are fixed.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidAddress`] for unknown addresses or
    /// [`Error::Internal`] on a size mismatch.
    fn overwrite(&self, addr: u64, data: Bytes) -> Result<()>;

    /// Releases the allocation at `addr`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidAddress`] if `addr` was never issued or
    /// was already freed.
    fn free(&self, addr: u64, size: u64) -> Result<()>;
}

/// The ordered set of tiers managed by one orchestrator.
///
/// Tiers are held sorted by rank so "next slower" lookups are cheap.
pub struct TierSet {
    tiers: Vec<Arc<dyn Tier>>,
}

impl TierSet {
    /// Builds a tier set from backends, sorting them by rank.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Internal`] if two tiers share a rank or an id.
    pub fn new(mut tiers: Vec<Arc<dyn Tier>>) -> Result<Self> {
        tiers.sort_by_key(|t| t.rank());
        for pair in tiers.windows(2) {
            if pair[0].rank() == pair[1].rank() {
                return Err(Error::Internal(format!(
                    "duplicate tier rank {}",
                    pair[0].rank()
                )));
            }
            if pair[0].id() == pair[1].id() {
                return Err(Error::Internal(format!("duplicate {}", pair[0].id())));
            }
        }
        Ok(Self { tiers })
    }

    /// Looks up a tier by id.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Internal`] for an unknown id; tier ids come from
    /// EMO's own records, so a miss is a bug.
    pub fn get(&self, id: TierId) -> Result<&Arc<dyn Tier>> {
        self.tiers
            .iter()
            .find(|t| t.id() == id)
            .ok_or_else(|| Error::Internal(format!("unknown {id}")))
    }

    /// The fastest tier (rank 0 after sorting).
    ///
    /// # Panics
    ///
    /// Panics if the set is empty; `TierSet::new` is never called with an
    /// empty list by the engine.
    #[must_use]
    pub fn fastest(&self) -> &Arc<dyn Tier> {
        &self.tiers[0]
    }

    /// The next slower tier after `id`, if any.
    #[must_use]
    pub fn next_slower(&self, id: TierId) -> Option<&Arc<dyn Tier>> {
        let pos = self.tiers.iter().position(|t| t.id() == id)?;
        self.tiers.get(pos + 1)
    }

    /// The next faster tier before `id`, if any.
    #[must_use]
    pub fn next_faster(&self, id: TierId) -> Option<&Arc<dyn Tier>> {
        let pos = self.tiers.iter().position(|t| t.id() == id)?;
        pos.checked_sub(1).map(|p| &self.tiers[p])
    }

    /// Iterates tiers from fastest to slowest.
    pub fn iter(&self) -> impl Iterator<Item = &Arc<dyn Tier>> {
        self.tiers.iter()
    }

    /// Number of tiers. Bounds the depth of cascading demotions.
    #[must_use]
    pub fn len(&self) -> usize {
        self.tiers.len()
    }

    /// Returns whether the set is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.tiers.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn set() -> TierSet {
        TierSet::new(vec![
            Arc::new(MemoryTier::new(TierId::new(1), 1, 1000)) as Arc<dyn Tier>,
            Arc::new(MemoryTier::new(TierId::new(0), 0, 100)) as Arc<dyn Tier>,
        ])
        .unwrap()
    }

    #[test]
    fn test_sorted_by_rank() {
        let set = set();
        assert_eq!(set.fastest().rank(), 0);
        assert_eq!(set.len(), 2);
    }

    #[test]
    fn test_neighbors() {
        let set = set();
        let fast = TierId::new(0);
        let slow = TierId::new(1);
        assert_eq!(set.next_slower(fast).unwrap().id(), slow);
        assert!(set.next_slower(slow).is_none());
        assert_eq!(set.next_faster(slow).unwrap().id(), fast);
        assert!(set.next_faster(fast).is_none());
    }

    #[test]
    fn test_duplicate_rank_rejected() {
        let result = TierSet::new(vec![
            Arc::new(MemoryTier::new(TierId::new(0), 0, 100)) as Arc<dyn Tier>,
            Arc::new(MemoryTier::new(TierId::new(1), 0, 100)) as Arc<dyn Tier>,
        ]);
        assert!(result.is_err());
    }
}
