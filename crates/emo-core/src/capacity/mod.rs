//! Planning-level byte accounting per tier.
//!
//! The capacity model is the admission ledger: it answers "does this tier
//! have room" without consulting the hardware on every call. Hardware is
//! probed only at construction and on explicit [`CapacityModel::rescan`];
//! a stale snapshot between rescans is acceptable because the admission
//! threshold sits below 100% of capacity and absorbs the drift.
//!
//! Bytes are reserved atomically at decision time, before any migration
//! I/O runs. Two concurrent allocations can therefore never both believe
//! they hold the same freed capacity; the slower one sees the ledger
//! already debited and re-plans.

use parking_lot::Mutex;

use emo_common::types::{TierDescriptor, TierId};
use emo_common::utils::error::{Error, Result};
use emo_common::utils::hash::FxHashMap;

/// Per-tier ledger entry.
#[derive(Debug, Clone)]
struct TierAccount {
    rank: u8,
    capacity: u64,
    reserved: u64,
    admission_threshold: f64,
}

impl TierAccount {
    fn admission_limit(&self) -> u64 {
        (self.capacity as f64 * self.admission_threshold) as u64
    }
}

/// Admission ledger over all tiers of one orchestrator.
///
/// There is deliberately no process-wide singleton; the engine owns one
/// model and passes it to the components that need it.
pub struct CapacityModel {
    accounts: Mutex<FxHashMap<TierId, TierAccount>>,
}

impl CapacityModel {
    /// Builds a model from probed tier descriptors.
    #[must_use]
    pub fn new(descriptors: &[TierDescriptor]) -> Self {
        let mut accounts = FxHashMap::default();
        for desc in descriptors {
            accounts.insert(
                desc.id,
                TierAccount {
                    rank: desc.rank,
                    capacity: desc.capacity,
                    reserved: desc.used,
                    admission_threshold: desc.admission_threshold,
                },
            );
        }
        Self {
            accounts: Mutex::new(accounts),
        }
    }

    fn with_account<T>(&self, tier: TierId, f: impl FnOnce(&mut TierAccount) -> T) -> Result<T> {
        let mut accounts = self.accounts.lock();
        let account = accounts
            .get_mut(&tier)
            .ok_or_else(|| Error::Internal(format!("unknown {tier} in capacity model")))?;
        Ok(f(account))
    }

    /// Bytes available below the hard capacity limit.
    pub fn available(&self, tier: TierId) -> Result<u64> {
        self.with_account(tier, |a| a.capacity.saturating_sub(a.reserved))
    }

    /// Returns whether `additional` bytes fit below the admission
    /// threshold (used + additional <= threshold x capacity).
    pub fn admission_ok(&self, tier: TierId, additional: u64) -> Result<bool> {
        self.with_account(tier, |a| {
            a.reserved.saturating_add(additional) <= a.admission_limit()
        })
    }

    /// Bytes that must leave `tier` before `additional` more fit below
    /// the admission threshold. Zero when admission already succeeds.
    pub fn admission_deficit(&self, tier: TierId, additional: u64) -> Result<u64> {
        self.with_account(tier, |a| {
            a.reserved
                .saturating_add(additional)
                .saturating_sub(a.admission_limit())
        })
    }

    /// Reserves `bytes` against the hard capacity limit.
    ///
    /// This is the enforcement point for the invariant that recorded
    /// usage never exceeds capacity: the admission threshold only decides
    /// when eviction pressure starts.
    ///
    /// # Errors
    ///
    /// Returns [`Error::TierFull`] if the reservation would exceed the
    /// tier's capacity.
    pub fn try_reserve(&self, tier: TierId, bytes: u64) -> Result<()> {
        self.with_account(tier, |a| {
            if a.reserved.saturating_add(bytes) > a.capacity {
                return Err(Error::TierFull {
                    tier,
                    requested: bytes,
                    available: a.capacity - a.reserved,
                });
            }
            a.reserved += bytes;
            Ok(())
        })?
    }

    /// Reserves `bytes` while crediting `pending_free` bytes already
    /// claimed for demotion out of this tier.
    ///
    /// This is the decision-time reservation that closes the capacity
    /// TOCTOU race: victims are claimed and the new bytes reserved in one
    /// planning step, before any migration I/O runs. The ledger may
    /// transiently exceed the admission threshold until the demotions
    /// complete, but `reserved - pending_free` never exceeds capacity.
    ///
    /// # Errors
    ///
    /// Returns [`Error::TierFull`] if even the credited reservation would
    /// exceed capacity.
    pub fn reserve_with_credit(&self, tier: TierId, bytes: u64, pending_free: u64) -> Result<()> {
        self.with_account(tier, |a| {
            if a.reserved.saturating_add(bytes) > a.capacity.saturating_add(pending_free) {
                return Err(Error::TierFull {
                    tier,
                    requested: bytes,
                    available: a
                        .capacity
                        .saturating_add(pending_free)
                        .saturating_sub(a.reserved),
                });
            }
            a.reserved += bytes;
            Ok(())
        })?
    }

    /// Releases `bytes` previously reserved on `tier`.
    pub fn release(&self, tier: TierId, bytes: u64) -> Result<()> {
        self.with_account(tier, |a| {
            a.reserved = a.reserved.saturating_sub(bytes);
        })
    }

    /// Snapshot of one tier's ledger state.
    pub fn descriptor(&self, tier: TierId) -> Result<TierDescriptor> {
        self.with_account(tier, |a| TierDescriptor {
            id: tier,
            rank: a.rank,
            capacity: a.capacity,
            used: a.reserved,
            admission_threshold: a.admission_threshold,
        })
    }

    /// Snapshot of every tier, fastest first.
    #[must_use]
    pub fn snapshot(&self) -> Vec<TierDescriptor> {
        let accounts = self.accounts.lock();
        let mut out: Vec<TierDescriptor> = accounts
            .iter()
            .map(|(id, a)| TierDescriptor {
                id: *id,
                rank: a.rank,
                capacity: a.capacity,
                used: a.reserved,
                admission_threshold: a.admission_threshold,
            })
            .collect();
        out.sort_by_key(|d| d.rank);
        out
    }

    /// Refreshes capacities and thresholds from a fresh hardware probe.
    ///
    /// Reservations are kept: they track live buffers, which a hardware
    /// rescan does not invalidate. Unknown tiers in `descriptors` are
    /// ignored; tiers cannot be added after construction.
    pub fn rescan(&self, descriptors: &[TierDescriptor]) {
        let mut accounts = self.accounts.lock();
        for desc in descriptors {
            if let Some(account) = accounts.get_mut(&desc.id) {
                account.capacity = desc.capacity;
                account.admission_threshold = desc.admission_threshold;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn model() -> CapacityModel {
        CapacityModel::new(&[
            TierDescriptor {
                id: TierId::new(0),
                rank: 0,
                capacity: 100,
                used: 0,
                admission_threshold: 0.9,
            },
            TierDescriptor {
                id: TierId::new(1),
                rank: 1,
                capacity: 1000,
                used: 0,
                admission_threshold: 0.9,
            },
        ])
    }

    #[test]
    fn test_admission_threshold() {
        let model = model();
        let fast = TierId::new(0);

        assert!(model.admission_ok(fast, 90).unwrap());
        assert!(!model.admission_ok(fast, 91).unwrap());
    }

    #[test]
    fn test_reserve_and_release() {
        let model = model();
        let fast = TierId::new(0);

        model.try_reserve(fast, 60).unwrap();
        assert_eq!(model.available(fast).unwrap(), 40);
        assert!(!model.admission_ok(fast, 40).unwrap());

        model.release(fast, 60).unwrap();
        assert_eq!(model.available(fast).unwrap(), 100);
    }

    #[test]
    fn test_hard_cap() {
        let model = model();
        let fast = TierId::new(0);

        model.try_reserve(fast, 95).unwrap();
        assert!(matches!(
            model.try_reserve(fast, 10),
            Err(Error::TierFull { available: 5, .. })
        ));
    }

    #[test]
    fn test_admission_deficit() {
        let model = model();
        let fast = TierId::new(0);

        model.try_reserve(fast, 80).unwrap();
        // 80 reserved, limit 90: 60 more needs 50 bytes evicted.
        assert_eq!(model.admission_deficit(fast, 60).unwrap(), 50);
        assert_eq!(model.admission_deficit(fast, 10).unwrap(), 0);
    }

    #[test]
    fn test_rescan_keeps_reservations() {
        let model = model();
        let fast = TierId::new(0);
        model.try_reserve(fast, 50).unwrap();

        model.rescan(&[TierDescriptor {
            id: fast,
            rank: 0,
            capacity: 200,
            used: 0,
            admission_threshold: 0.5,
        }]);

        let desc = model.descriptor(fast).unwrap();
        assert_eq!(desc.capacity, 200);
        assert_eq!(desc.used, 50);
        assert!(model.admission_ok(fast, 50).unwrap());
        assert!(!model.admission_ok(fast, 51).unwrap());
    }
}
