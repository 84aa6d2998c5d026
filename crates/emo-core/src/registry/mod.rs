//! Buffer registry: the handle-to-location indirection.
//!
//! The registry owns every [`BufferRecord`]. All other components refer
//! to buffers only through their [`Handle`]; migrations update the record
//! atomically, so a caller never observes a dangling or half-updated
//! location.
//!
//! # Locking discipline
//!
//! The handle map is behind an `RwLock`, but it is only held long enough
//! to clone an `Arc` to the entry. Each entry guards its record with its
//! own `Mutex` plus a `Condvar` for resident-state waits, so operations
//! on different handles proceed independently and a blocked access waits
//! on its own buffer, not on the registry. Map lock and record lock are
//! never held at the same time.
//!
//! # Handle lifecycle
//!
//! Handles come from a monotonic counter and are never reused. A missing
//! handle below the counter was released ([`Error::UseAfterRelease`]); a
//! handle at or above it was never issued ([`Error::NotFound`]).

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::{Condvar, Mutex, RwLock};

use emo_common::types::{BufferRecord, BufferState, Handle, TierId, Timestamp};
use emo_common::utils::error::{Error, Result};
use emo_common::utils::hash::FxHashMap;

/// One registry entry: the record plus its resident-state signal.
struct BufferEntry {
    record: Mutex<BufferRecord>,
    resident: Condvar,
}

/// Registry of all live buffers.
pub struct BufferRegistry {
    entries: RwLock<FxHashMap<Handle, Arc<BufferEntry>>>,
    next_id: AtomicU64,
    clock: AtomicU64,
}

impl BufferRegistry {
    /// Creates an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self {
            entries: RwLock::new(FxHashMap::default()),
            next_id: AtomicU64::new(1),
            clock: AtomicU64::new(1),
        }
    }

    fn now(&self) -> Timestamp {
        Timestamp::new(self.clock.fetch_add(1, Ordering::Relaxed))
    }

    fn entry(&self, handle: Handle) -> Result<Arc<BufferEntry>> {
        if let Some(entry) = self.entries.read().get(&handle) {
            return Ok(Arc::clone(entry));
        }
        if handle.raw() >= self.next_id.load(Ordering::Acquire) {
            Err(Error::NotFound(handle))
        } else {
            Err(Error::UseAfterRelease(handle))
        }
    }

    /// Creates a record for a new buffer destined for `tier`.
    ///
    /// The record starts `Migrating`: the bytes do not exist anywhere
    /// until the first tier write commits via
    /// [`BufferRegistry::commit_initial`].
    pub fn create(&self, size: u64, tier: TierId) -> Handle {
        let handle = Handle::new(self.next_id.fetch_add(1, Ordering::AcqRel));
        let entry = Arc::new(BufferEntry {
            record: Mutex::new(BufferRecord {
                handle,
                size,
                tier,
                addr: 0,
                state: BufferState::Migrating,
                last_touch: self.now(),
                pins: 0,
            }),
            resident: Condvar::new(),
        });
        self.entries.write().insert(handle, entry);
        handle
    }

    /// Commits the first tier write, making the buffer `Resident`.
    pub fn commit_initial(&self, handle: Handle, tier: TierId, addr: u64) -> Result<()> {
        let entry = self.entry(handle)?;
        let mut record = entry.record.lock();
        debug_assert_eq!(record.state, BufferState::Migrating);
        record.tier = tier;
        record.addr = addr;
        record.state = BufferState::Resident;
        drop(record);
        entry.resident.notify_all();
        Ok(())
    }

    /// Removes a record whose initial tier write failed. The handle is
    /// burned; it is never reissued.
    pub fn abort_create(&self, handle: Handle) {
        self.entries.write().remove(&handle);
    }

    /// Clones the current record for `handle`.
    pub fn snapshot(&self, handle: Handle) -> Result<BufferRecord> {
        let entry = self.entry(handle)?;
        let record = entry.record.lock();
        Ok(record.clone())
    }

    /// Stamps `handle` with a fresh recency timestamp.
    pub fn touch(&self, handle: Handle) -> Result<Timestamp> {
        let entry = self.entry(handle)?;
        let ts = self.now();
        entry.record.lock().last_touch = ts;
        Ok(ts)
    }

    /// Pins `handle` for a scoped access, waiting for residency.
    ///
    /// With `blocking` set, a `Migrating` buffer is waited on; otherwise
    /// the call fails fast with [`Error::BufferBusy`]. The pin and the
    /// recency stamp are applied under the record lock, so a concurrent
    /// eviction scan can never observe the buffer as unpinned once this
    /// returns.
    pub fn pin_resident(&self, handle: Handle, blocking: bool) -> Result<BufferRecord> {
        let entry = self.entry(handle)?;
        let mut record = entry.record.lock();
        loop {
            match record.state {
                BufferState::Resident => {
                    record.pins += 1;
                    record.last_touch = self.now();
                    return Ok(record.clone());
                }
                BufferState::Migrating => {
                    if !blocking {
                        return Err(Error::BufferBusy(handle));
                    }
                    entry.resident.wait(&mut record);
                }
                BufferState::Released => return Err(Error::UseAfterRelease(handle)),
            }
        }
    }

    /// Drops one pin on `handle`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Internal`] if the buffer is not pinned; pin
    /// counts can never go negative.
    pub fn unpin(&self, handle: Handle) -> Result<()> {
        let entry = self.entry(handle)?;
        let mut record = entry.record.lock();
        if record.pins == 0 {
            return Err(Error::Internal(format!("unpin of unpinned {handle}")));
        }
        record.pins -= 1;
        drop(record);
        entry.resident.notify_all();
        Ok(())
    }

    /// Claims `handle` for a migration, returning the rollback point.
    ///
    /// Fails with [`Error::BufferBusy`] if the buffer is pinned or a
    /// migration is already in flight. On success the record is
    /// `Migrating` and no other component will start a second migration
    /// or an access (under fail-fast) until it resolves.
    pub fn begin_migration(&self, handle: Handle) -> Result<BufferRecord> {
        let entry = self.entry(handle)?;
        let mut record = entry.record.lock();
        if record.state != BufferState::Resident || record.pins > 0 {
            return Err(Error::BufferBusy(handle));
        }
        record.state = BufferState::Migrating;
        Ok(record.clone())
    }

    /// Lands a migration at its destination, making the buffer resident.
    pub fn complete_migration(&self, handle: Handle, tier: TierId, addr: u64) -> Result<()> {
        let entry = self.entry(handle)?;
        let mut record = entry.record.lock();
        debug_assert_eq!(record.state, BufferState::Migrating);
        record.tier = tier;
        record.addr = addr;
        record.state = BufferState::Resident;
        drop(record);
        entry.resident.notify_all();
        Ok(())
    }

    /// Rolls a migration back: the buffer is resident at its original
    /// tier and address, unchanged.
    pub fn abort_migration(&self, handle: Handle) -> Result<()> {
        let entry = self.entry(handle)?;
        let mut record = entry.record.lock();
        debug_assert_eq!(record.state, BufferState::Migrating);
        record.state = BufferState::Resident;
        drop(record);
        entry.resident.notify_all();
        Ok(())
    }

    /// Releases `handle` forever, returning the final record so the
    /// caller can free the tier storage.
    ///
    /// Waits for an in-flight migration to resolve first (a migration is
    /// never cancelled mid-write). Fails with [`Error::BufferBusy`] if
    /// the buffer is still pinned by an active access.
    pub fn release(&self, handle: Handle) -> Result<BufferRecord> {
        let entry = self.entry(handle)?;
        let final_record = {
            let mut record = entry.record.lock();
            loop {
                match record.state {
                    BufferState::Resident => {
                        if record.pins > 0 {
                            return Err(Error::BufferBusy(handle));
                        }
                        record.state = BufferState::Released;
                        break record.clone();
                    }
                    BufferState::Migrating => entry.resident.wait(&mut record),
                    BufferState::Released => return Err(Error::UseAfterRelease(handle)),
                }
            }
        };
        entry.resident.notify_all();
        self.entries.write().remove(&handle);
        Ok(final_record)
    }

    /// Snapshots every unpinned resident buffer in `tier`, the eviction
    /// planner's candidate pool.
    #[must_use]
    pub fn resident_unpinned_in(&self, tier: TierId) -> Vec<BufferRecord> {
        let arcs: Vec<Arc<BufferEntry>> =
            self.entries.read().values().map(Arc::clone).collect();
        let mut out = Vec::new();
        for entry in arcs {
            let record = entry.record.lock();
            if record.tier == tier && record.state == BufferState::Resident && record.pins == 0 {
                out.push(record.clone());
            }
        }
        out
    }

    /// All live handles, in allocation order.
    #[must_use]
    pub fn live_handles(&self) -> Vec<Handle> {
        let mut handles: Vec<Handle> = self.entries.read().keys().copied().collect();
        handles.sort_unstable();
        handles
    }

    /// Number of live buffers.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    /// Returns whether no buffers are live.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }
}

impl Default for BufferRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn tier0() -> TierId {
        TierId::new(0)
    }

    #[test]
    fn test_create_commit_lifecycle() {
        let registry = BufferRegistry::new();
        let handle = registry.create(64, tier0());

        let record = registry.snapshot(handle).unwrap();
        assert_eq!(record.state, BufferState::Migrating);

        registry.commit_initial(handle, tier0(), 7).unwrap();
        let record = registry.snapshot(handle).unwrap();
        assert_eq!(record.state, BufferState::Resident);
        assert_eq!(record.addr, 7);
    }

    #[test]
    fn test_release_then_use_is_rejected() {
        let registry = BufferRegistry::new();
        let handle = registry.create(16, tier0());
        registry.commit_initial(handle, tier0(), 1).unwrap();
        registry.release(handle).unwrap();

        assert!(matches!(
            registry.snapshot(handle),
            Err(Error::UseAfterRelease(_))
        ));
        assert!(matches!(
            registry.pin_resident(handle, false),
            Err(Error::UseAfterRelease(_))
        ));
        assert!(matches!(
            registry.release(handle),
            Err(Error::UseAfterRelease(_))
        ));
    }

    #[test]
    fn test_unknown_handle_is_not_found() {
        let registry = BufferRegistry::new();
        assert!(matches!(
            registry.snapshot(Handle::new(999)),
            Err(Error::NotFound(_))
        ));
    }

    #[test]
    fn test_pinned_buffer_blocks_migration_and_release() {
        let registry = BufferRegistry::new();
        let handle = registry.create(16, tier0());
        registry.commit_initial(handle, tier0(), 1).unwrap();

        registry.pin_resident(handle, false).unwrap();
        assert!(matches!(
            registry.begin_migration(handle),
            Err(Error::BufferBusy(_))
        ));
        assert!(matches!(registry.release(handle), Err(Error::BufferBusy(_))));

        registry.unpin(handle).unwrap();
        registry.begin_migration(handle).unwrap();
    }

    #[test]
    fn test_unpin_never_goes_negative() {
        let registry = BufferRegistry::new();
        let handle = registry.create(16, tier0());
        registry.commit_initial(handle, tier0(), 1).unwrap();

        registry.pin_resident(handle, false).unwrap();
        registry.unpin(handle).unwrap();
        assert!(matches!(registry.unpin(handle), Err(Error::Internal(_))));
    }

    #[test]
    fn test_migrating_buffer_fails_fast() {
        let registry = BufferRegistry::new();
        let handle = registry.create(16, tier0());
        registry.commit_initial(handle, tier0(), 1).unwrap();

        registry.begin_migration(handle).unwrap();
        assert!(matches!(
            registry.pin_resident(handle, false),
            Err(Error::BufferBusy(_))
        ));

        registry.abort_migration(handle).unwrap();
        registry.pin_resident(handle, false).unwrap();
    }

    #[test]
    fn test_migration_rollback_restores_location() {
        let registry = BufferRegistry::new();
        let handle = registry.create(16, tier0());
        registry.commit_initial(handle, tier0(), 42).unwrap();

        let rollback = registry.begin_migration(handle).unwrap();
        registry.abort_migration(handle).unwrap();

        let record = registry.snapshot(handle).unwrap();
        assert_eq!(record.tier, rollback.tier);
        assert_eq!(record.addr, rollback.addr);
        assert_eq!(record.state, BufferState::Resident);
    }

    #[test]
    fn test_candidates_exclude_pinned_and_migrating() {
        let registry = BufferRegistry::new();
        let a = registry.create(10, tier0());
        let b = registry.create(20, tier0());
        let c = registry.create(30, tier0());
        for (h, addr) in [(a, 1), (b, 2), (c, 3)] {
            registry.commit_initial(h, tier0(), addr).unwrap();
        }

        registry.pin_resident(a, false).unwrap();
        registry.begin_migration(b).unwrap();

        let candidates = registry.resident_unpinned_in(tier0());
        assert_eq!(candidates.len(), 1);
        assert_eq!(candidates[0].handle, c);
    }

    #[test]
    fn test_blocking_pin_waits_for_migration() {
        let registry = Arc::new(BufferRegistry::new());
        let handle = registry.create(16, tier0());
        registry.commit_initial(handle, tier0(), 1).unwrap();
        registry.begin_migration(handle).unwrap();

        let waiter = {
            let registry = Arc::clone(&registry);
            std::thread::spawn(move || registry.pin_resident(handle, true))
        };

        std::thread::sleep(std::time::Duration::from_millis(20));
        registry.complete_migration(handle, tier0(), 9).unwrap();

        let record = waiter.join().unwrap().unwrap();
        assert_eq!(record.addr, 9);
        assert_eq!(record.pins, 1);
    }

    proptest! {
        /// Handles are strictly monotonic no matter how creates and
        /// releases interleave, so a released handle can never alias a
        /// later allocation.
        #[test]
        fn prop_handles_never_reused(ops in proptest::collection::vec(0u8..4, 1..64)) {
            let registry = BufferRegistry::new();
            let mut live: Vec<Handle> = Vec::new();
            let mut last_issued = 0u64;

            for op in ops {
                if op == 0 && !live.is_empty() {
                    let handle = live.remove(0);
                    registry.release(handle).unwrap();
                    prop_assert!(matches!(
                        registry.snapshot(handle),
                        Err(Error::UseAfterRelease(_))
                    ));
                } else {
                    let handle = registry.create(u64::from(op) + 1, tier0());
                    registry.commit_initial(handle, tier0(), 1).unwrap();
                    prop_assert!(handle.raw() > last_issued);
                    last_issued = handle.raw();
                    live.push(handle);
                }
            }
        }
    }
}
