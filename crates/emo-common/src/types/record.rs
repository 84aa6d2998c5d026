//! Buffer and tier bookkeeping records.

use serde::{Deserialize, Serialize};

use super::{Handle, TierId, Timestamp};

/// Lifecycle state of a buffer.
///
/// The only legal transitions are:
///
/// ```text
/// Migrating(initial) -> Resident -> {Migrating -> Resident}* -> Released
/// ```
///
/// A record never moves between two `Migrating` states without passing
/// through `Resident`, which is what makes migration all-or-nothing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum BufferState {
    /// Mid-transfer between tiers (or awaiting its first tier write).
    /// Accesses block or fail depending on the configured busy policy.
    Migrating,
    /// Readable and writable at its current tier-local address.
    Resident,
    /// The handle is invalid and the storage has been freed.
    Released,
}

/// Declared intent of a scoped buffer access.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AccessIntent {
    /// Read-only access; the guard will not write back.
    Read,
    /// Write-only access.
    Write,
    /// Combined read/write access.
    ReadWrite,
}

impl AccessIntent {
    /// Returns whether this intent permits mutation of the buffer.
    #[must_use]
    pub const fn writes(self) -> bool {
        matches!(self, Self::Write | Self::ReadWrite)
    }
}

/// Bookkeeping record for one logical buffer.
///
/// Owned exclusively by the registry; every other component refers to the
/// buffer only through its [`Handle`]. The `tier` and `addr` fields are
/// meaningful while the buffer is `Resident` (and, during a migration,
/// name the rollback point at the source tier).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BufferRecord {
    /// The buffer's stable handle.
    pub handle: Handle,
    /// Size in bytes. Fixed for the lifetime of the buffer.
    pub size: u64,
    /// Tier currently holding the bytes.
    pub tier: TierId,
    /// Tier-local address. Opaque outside the owning tier.
    pub addr: u64,
    /// Lifecycle state.
    pub state: BufferState,
    /// Logical timestamp of the most recent touch.
    pub last_touch: Timestamp,
    /// Number of outstanding scoped accesses. A pinned buffer is never
    /// selected for eviction and never begins a migration.
    pub pins: u32,
}

/// Capacity description of one storage tier.
///
/// Supplied by a hardware-probing collaborator at construction and on
/// rescan; the capacity model treats it as ground truth until the next
/// rescan.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TierDescriptor {
    /// Tier identifier.
    pub id: TierId,
    /// Speed rank, 0 = fastest.
    pub rank: u8,
    /// Total capacity in bytes.
    pub capacity: u64,
    /// Bytes currently recorded as used.
    pub used: u64,
    /// Fraction of capacity above which new admissions trigger eviction
    /// pressure. Kept below 1.0 so stale hardware snapshots between
    /// rescans cannot push the tier past its hard capacity.
    pub admission_threshold: f64,
}

impl TierDescriptor {
    /// Bytes admissible before the tier crosses its admission threshold.
    #[must_use]
    pub fn admissible(&self) -> u64 {
        let limit = (self.capacity as f64 * self.admission_threshold) as u64;
        limit.saturating_sub(self.used)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_intent_writes() {
        assert!(!AccessIntent::Read.writes());
        assert!(AccessIntent::Write.writes());
        assert!(AccessIntent::ReadWrite.writes());
    }

    #[test]
    fn test_descriptor_admissible() {
        let desc = TierDescriptor {
            id: TierId::new(0),
            rank: 0,
            capacity: 1000,
            used: 850,
            admission_threshold: 0.9,
        };
        assert_eq!(desc.admissible(), 50);

        let full = TierDescriptor { used: 950, ..desc };
        assert_eq!(full.admissible(), 0);
    }
}
