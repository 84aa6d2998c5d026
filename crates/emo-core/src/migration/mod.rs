//! All-or-nothing buffer movement between tiers.
//!
//! A migration either lands the buffer `Resident` at the destination
//! tier with byte-identical content, or rolls back to `Resident` at the
//! original tier, unchanged. No record is ever left `Migrating`, and in
//! the window between claim and resolution other components observe the
//! buffer only as `Migrating` (blocking or failing fast per policy).
//!
//! # Ledger discipline
//!
//! The caller must hold a capacity reservation of the buffer's size on
//! the destination tier before calling [`MigrationEngine::migrate`]. On
//! success the engine releases the source tier's ledger bytes, completing
//! the transfer of accounting from source to destination. On failure the
//! ledger is untouched: the destination reservation stays with the caller
//! to release or reuse, and the source bytes never left.
//!
//! Transient tier I/O failures (timeouts, I/O errors) are retried locally
//! up to a small bounded count before the migration is rolled back.

use std::sync::Arc;

use bytes::Bytes;
use tracing::{debug, warn};

use emo_common::types::{BufferRecord, Handle, TierId};
use emo_common::utils::error::{Error, Result};

use crate::capacity::CapacityModel;
use crate::registry::BufferRegistry;
use crate::tier::{Tier, TierSet};

/// Moves buffers between tiers, updating the registry atomically.
pub struct MigrationEngine {
    registry: Arc<BufferRegistry>,
    tiers: Arc<TierSet>,
    capacity: Arc<CapacityModel>,
    /// Attempts per tier I/O operation (1 = no retry).
    retry_budget: u32,
}

impl MigrationEngine {
    /// Creates a migration engine over the given components.
    #[must_use]
    pub fn new(
        registry: Arc<BufferRegistry>,
        tiers: Arc<TierSet>,
        capacity: Arc<CapacityModel>,
        retry_budget: u32,
    ) -> Self {
        Self {
            registry,
            tiers,
            capacity,
            retry_budget: retry_budget.max(1),
        }
    }

    /// Runs a tier I/O closure, retrying transient failures.
    fn with_retries<T>(&self, mut op: impl FnMut() -> Result<T>) -> Result<T> {
        let mut attempt = 1;
        loop {
            match op() {
                Ok(value) => return Ok(value),
                Err(err) if err.is_transient_io() && attempt < self.retry_budget => {
                    warn!(%err, attempt, "transient tier I/O failure, retrying");
                    attempt += 1;
                }
                Err(err) => return Err(err),
            }
        }
    }

    /// Moves `handle` to `dest`.
    ///
    /// The caller must already hold a destination-ledger reservation of
    /// the buffer's size (see the module docs).
    ///
    /// # Errors
    ///
    /// - [`Error::BufferBusy`] if the buffer is pinned or already
    ///   migrating; nothing was changed.
    /// - [`Error::TierFull`] if the destination's physical write lost a
    ///   capacity race despite the reservation; rolled back.
    /// - [`Error::MigrationFailed`] for I/O failures after retries;
    ///   rolled back.
    /// - [`Error::NotFound`] / [`Error::UseAfterRelease`] for invalid
    ///   handles.
    pub fn migrate(&self, handle: Handle, dest: TierId) -> Result<()> {
        let rollback = self.registry.begin_migration(handle)?;
        self.migrate_claimed(rollback, dest)
    }

    /// Moves an already-claimed buffer to `dest`.
    ///
    /// `rollback` must be the record returned by
    /// [`BufferRegistry::begin_migration`]; the planner claims victims at
    /// decision time and hands them here for the I/O. Semantics are
    /// otherwise identical to [`MigrationEngine::migrate`], and the claim
    /// is always resolved: completed on success, aborted on failure.
    pub fn migrate_claimed(&self, rollback: BufferRecord, dest: TierId) -> Result<()> {
        let handle = rollback.handle;
        if rollback.tier == dest {
            self.registry.abort_migration(handle)?;
            return Ok(());
        }

        let source = Arc::clone(self.tiers.get(rollback.tier)?);
        let destination = Arc::clone(self.tiers.get(dest)?);

        match self.transfer(handle, &rollback, &source, &destination) {
            Ok(new_addr) => {
                // Free the source copy; the destination copy is durable.
                if let Err(err) = source.free(rollback.addr, rollback.size) {
                    warn!(%handle, %err, "failed to free source copy after migration");
                }
                self.capacity.release(rollback.tier, rollback.size)?;
                self.registry.complete_migration(handle, dest, new_addr)?;
                debug!(
                    %handle,
                    from = %rollback.tier,
                    to = %dest,
                    size = rollback.size,
                    "migration complete"
                );
                Ok(())
            }
            Err(err) => {
                self.registry.abort_migration(handle)?;
                warn!(%handle, to = %dest, %err, "migration rolled back");
                match err {
                    // Let the orchestrator re-run admission on a racy full
                    // destination; everything else is a migration failure.
                    full @ Error::TierFull { .. } => Err(full),
                    other => Err(Error::MigrationFailed {
                        handle,
                        dest,
                        reason: other.to_string(),
                    }),
                }
            }
        }
    }

    /// Copies the bytes source -> destination. Returns the destination
    /// address; on error any partial destination write has been cleaned
    /// up by the tier itself.
    fn transfer(
        &self,
        handle: Handle,
        rollback: &BufferRecord,
        source: &Arc<dyn Tier>,
        destination: &Arc<dyn Tier>,
    ) -> Result<u64> {
        let data: Bytes =
            self.with_retries(|| source.read(rollback.addr, rollback.size))?;
        debug_assert_eq!(data.len() as u64, rollback.size, "tier returned wrong size");
        debug!(%handle, size = rollback.size, "migration payload read");
        self.with_retries(|| destination.write(data.clone()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tier::MemoryTier;
    use emo_common::types::{BufferState, TierDescriptor};

    fn fixture(fast_cap: u64, slow_cap: u64) -> (
        Arc<BufferRegistry>,
        Arc<TierSet>,
        Arc<CapacityModel>,
        MigrationEngine,
    ) {
        let fast = TierId::new(0);
        let slow = TierId::new(1);
        let registry = Arc::new(BufferRegistry::new());
        let tiers = Arc::new(
            TierSet::new(vec![
                Arc::new(MemoryTier::new(fast, 0, fast_cap)) as Arc<dyn Tier>,
                Arc::new(MemoryTier::new(slow, 1, slow_cap)) as Arc<dyn Tier>,
            ])
            .unwrap(),
        );
        let capacity = Arc::new(CapacityModel::new(&[
            TierDescriptor {
                id: fast,
                rank: 0,
                capacity: fast_cap,
                used: 0,
                admission_threshold: 0.9,
            },
            TierDescriptor {
                id: slow,
                rank: 1,
                capacity: slow_cap,
                used: 0,
                admission_threshold: 0.9,
            },
        ]));
        let engine = MigrationEngine::new(
            Arc::clone(&registry),
            Arc::clone(&tiers),
            Arc::clone(&capacity),
            2,
        );
        (registry, tiers, capacity, engine)
    }

    /// Allocates a resident buffer in the fast tier, ledger included.
    fn resident(
        registry: &BufferRegistry,
        tiers: &TierSet,
        capacity: &CapacityModel,
        payload: &[u8],
    ) -> Handle {
        let fast = TierId::new(0);
        let size = payload.len() as u64;
        capacity.try_reserve(fast, size).unwrap();
        let handle = registry.create(size, fast);
        let addr = tiers
            .get(fast)
            .unwrap()
            .write(Bytes::copy_from_slice(payload))
            .unwrap();
        registry.commit_initial(handle, fast, addr).unwrap();
        handle
    }

    #[test]
    fn test_migration_roundtrip_is_byte_exact() {
        let (registry, tiers, capacity, engine) = fixture(100, 1000);
        let fast = TierId::new(0);
        let slow = TierId::new(1);
        let payload: Vec<u8> = (0..60u8).collect();

        let handle = resident(&registry, &tiers, &capacity, &payload);
        capacity.try_reserve(slow, 60).unwrap();
        engine.migrate(handle, slow).unwrap();

        let record = registry.snapshot(handle).unwrap();
        assert_eq!(record.tier, slow);
        assert_eq!(record.state, BufferState::Resident);

        let data = tiers.get(slow).unwrap().read(record.addr, 60).unwrap();
        assert_eq!(&data[..], &payload[..]);

        // Source bytes and ledger were released.
        assert_eq!(tiers.get(fast).unwrap().used(), 0);
        assert_eq!(capacity.available(fast).unwrap(), 100);
    }

    #[test]
    fn test_failed_migration_rolls_back() {
        // Destination too small: the physical write fails with TierFull.
        let (registry, tiers, capacity, engine) = fixture(100, 10);
        let slow = TierId::new(1);
        let payload = vec![9u8; 60];

        let handle = resident(&registry, &tiers, &capacity, &payload);
        let before = registry.snapshot(handle).unwrap();

        let err = engine.migrate(handle, slow).unwrap_err();
        assert!(matches!(err, Error::TierFull { .. }));

        let after = registry.snapshot(handle).unwrap();
        assert_eq!(after.state, BufferState::Resident);
        assert_eq!(after.tier, before.tier);
        assert_eq!(after.addr, before.addr);

        // Content untouched at the source.
        let data = tiers.get(before.tier).unwrap().read(after.addr, 60).unwrap();
        assert_eq!(&data[..], &payload[..]);
    }

    #[test]
    fn test_pinned_buffer_refuses_migration() {
        let (registry, tiers, capacity, engine) = fixture(100, 1000);
        let slow = TierId::new(1);

        let handle = resident(&registry, &tiers, &capacity, &[1, 2, 3]);
        registry.pin_resident(handle, false).unwrap();

        assert!(matches!(
            engine.migrate(handle, slow),
            Err(Error::BufferBusy(_))
        ));

        registry.unpin(handle).unwrap();
        capacity.try_reserve(slow, 3).unwrap();
        engine.migrate(handle, slow).unwrap();
    }

    #[test]
    fn test_same_tier_migration_is_noop() {
        let (registry, tiers, capacity, engine) = fixture(100, 1000);
        let fast = TierId::new(0);

        let handle = resident(&registry, &tiers, &capacity, &[5; 10]);
        engine.migrate(handle, fast).unwrap();

        let record = registry.snapshot(handle).unwrap();
        assert_eq!(record.state, BufferState::Resident);
        assert_eq!(record.tier, fast);
    }
}
