//! In-memory tier backend.

use std::sync::atomic::{AtomicU64, Ordering};

use bytes::Bytes;
use parking_lot::Mutex;

use emo_common::types::TierId;
use emo_common::utils::error::{Error, Result};
use emo_common::utils::hash::FxHashMap;

use super::Tier;

/// An address-mapped in-memory storage pool.
///
/// Backs both the device tier (rank 0) and the host tier (rank 1); the
/// two differ only in capacity and rank, which come from the hardware
/// probe. Payloads are held as [`Bytes`], so reads are zero-copy clones.
pub struct MemoryTier {
    id: TierId,
    rank: u8,
    capacity: u64,
    used: AtomicU64,
    next_addr: AtomicU64,
    slots: Mutex<FxHashMap<u64, Bytes>>,
}

impl MemoryTier {
    /// Creates a memory tier with the given identity and capacity.
    #[must_use]
    pub fn new(id: TierId, rank: u8, capacity: u64) -> Self {
        Self {
            id,
            rank,
            capacity,
            used: AtomicU64::new(0),
            next_addr: AtomicU64::new(1),
            slots: Mutex::new(FxHashMap::default()),
        }
    }

    /// Reserves `len` bytes against the hard capacity, or fails.
    fn charge(&self, len: u64) -> Result<()> {
        let mut used = self.used.load(Ordering::Acquire);
        loop {
            let new_used = used + len;
            if new_used > self.capacity {
                return Err(Error::TierFull {
                    tier: self.id,
                    requested: len,
                    available: self.capacity - used,
                });
            }
            match self.used.compare_exchange_weak(
                used,
                new_used,
                Ordering::AcqRel,
                Ordering::Acquire,
            ) {
                Ok(_) => return Ok(()),
                Err(actual) => used = actual,
            }
        }
    }
}

impl Tier for MemoryTier {
    fn id(&self) -> TierId {
        self.id
    }

    fn rank(&self) -> u8 {
        self.rank
    }

    fn capacity(&self) -> u64 {
        self.capacity
    }

    fn used(&self) -> u64 {
        self.used.load(Ordering::Acquire)
    }

    fn write(&self, data: Bytes) -> Result<u64> {
        let len = data.len() as u64;
        self.charge(len)?;
        let addr = self.next_addr.fetch_add(1, Ordering::Relaxed);
        self.slots.lock().insert(addr, data);
        Ok(addr)
    }

    fn read(&self, addr: u64, size: u64) -> Result<Bytes> {
        let slots = self.slots.lock();
        let data = slots
            .get(&addr)
            .ok_or(Error::InvalidAddress { tier: self.id, addr })?;
        if data.len() as u64 != size {
            return Err(Error::Internal(format!(
                "{}: size mismatch at {addr}: recorded {size}, stored {}",
                self.id,
                data.len()
            )));
        }
        Ok(data.clone())
    }

    fn overwrite(&self, addr: u64, data: Bytes) -> Result<()> {
        let mut slots = self.slots.lock();
        let slot = slots
            .get_mut(&addr)
            .ok_or(Error::InvalidAddress { tier: self.id, addr })?;
        if slot.len() != data.len() {
            return Err(Error::Internal(format!(
                "{}: overwrite at {addr} changed size {} -> {}",
                self.id,
                slot.len(),
                data.len()
            )));
        }
        *slot = data;
        Ok(())
    }

    fn free(&self, addr: u64, size: u64) -> Result<()> {
        let removed = self.slots.lock().remove(&addr);
        if removed.is_none() {
            return Err(Error::InvalidAddress { tier: self.id, addr });
        }
        self.used.fetch_sub(size, Ordering::AcqRel);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tier() -> MemoryTier {
        MemoryTier::new(TierId::new(0), 0, 100)
    }

    #[test]
    fn test_write_read_roundtrip() {
        let tier = tier();
        let addr = tier.write(Bytes::from_static(b"hello")).unwrap();
        assert_eq!(tier.read(addr, 5).unwrap(), Bytes::from_static(b"hello"));
        assert_eq!(tier.used(), 5);
    }

    #[test]
    fn test_hard_capacity_enforced() {
        let tier = tier();
        tier.write(Bytes::from(vec![0u8; 80])).unwrap();
        let err = tier.write(Bytes::from(vec![0u8; 30])).unwrap_err();
        assert!(matches!(err, Error::TierFull { available: 20, .. }));
    }

    #[test]
    fn test_free_releases_capacity() {
        let tier = tier();
        let addr = tier.write(Bytes::from(vec![1u8; 60])).unwrap();
        tier.free(addr, 60).unwrap();
        assert_eq!(tier.used(), 0);
        assert!(matches!(
            tier.read(addr, 60),
            Err(Error::InvalidAddress { .. })
        ));
    }

    #[test]
    fn test_double_free_rejected() {
        let tier = tier();
        let addr = tier.write(Bytes::from(vec![1u8; 10])).unwrap();
        tier.free(addr, 10).unwrap();
        assert!(matches!(
            tier.free(addr, 10),
            Err(Error::InvalidAddress { .. })
        ));
    }

    #[test]
    fn test_overwrite_in_place() {
        let tier = tier();
        let addr = tier.write(Bytes::from_static(b"aaaa")).unwrap();
        tier.overwrite(addr, Bytes::from_static(b"bbbb")).unwrap();
        assert_eq!(tier.read(addr, 4).unwrap(), Bytes::from_static(b"bbbb"));
        // Size changes are rejected
        assert!(tier.overwrite(addr, Bytes::from_static(b"toolong")).is_err());
    }
}
