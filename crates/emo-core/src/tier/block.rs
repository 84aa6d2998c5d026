//! Block-storage tier backend.

use std::future::Future;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use bytes::Bytes;
use parking_lot::Mutex;
use tracing::debug;

use emo_common::types::TierId;
use emo_common::utils::error::{Error, Result};
use emo_common::utils::hash::FxHashMap;

use super::Tier;

/// File-backed storage tier, typically the slowest and largest rank.
///
/// Each buffer lives in its own file under the spill directory, named by
/// its tier-local address. Payloads carry a crc32 prefix so a successful
/// migration read-back is verifiably byte-identical to what was written.
///
/// File I/O runs on a small tokio runtime owned by the tier; the [`Tier`]
/// contract stays synchronous by blocking on each operation, with an
/// optional per-operation deadline. A deadline overrun surfaces as
/// [`Error::Timeout`], which the migration engine treats as a failed
/// (and rolled back) migration.
pub struct BlockTier {
    id: TierId,
    rank: u8,
    capacity: u64,
    dir: PathBuf,
    io_timeout: Option<Duration>,
    runtime: tokio::runtime::Runtime,
    used: AtomicU64,
    next_addr: AtomicU64,
    /// Live addresses and their payload sizes.
    live: Mutex<FxHashMap<u64, u64>>,
}

/// Length of the crc32 prefix on every payload file.
const CRC_PREFIX: usize = 4;

impl BlockTier {
    /// Creates a block tier storing payload files under `dir`.
    ///
    /// # Errors
    ///
    /// Returns an error if the directory cannot be created or the I/O
    /// runtime cannot be started.
    pub fn new(
        id: TierId,
        rank: u8,
        capacity: u64,
        dir: impl AsRef<Path>,
        io_timeout: Option<Duration>,
    ) -> Result<Self> {
        let dir = dir.as_ref().to_path_buf();
        std::fs::create_dir_all(&dir)?;
        let runtime = tokio::runtime::Builder::new_multi_thread()
            .worker_threads(2)
            .thread_name("emo-block-io")
            .enable_all()
            .build()?;
        Ok(Self {
            id,
            rank,
            capacity,
            dir,
            io_timeout,
            runtime,
            used: AtomicU64::new(0),
            next_addr: AtomicU64::new(1),
            live: Mutex::new(FxHashMap::default()),
        })
    }

    fn path_for(&self, addr: u64) -> PathBuf {
        self.dir.join(format!("buf-{addr:016x}.emo"))
    }

    /// Runs an async file operation to completion, applying the
    /// configured deadline.
    fn run_io<T>(&self, fut: impl Future<Output = std::io::Result<T>>) -> Result<T> {
        match self.io_timeout {
            Some(deadline) => self
                .runtime
                .block_on(async { tokio::time::timeout(deadline, fut).await })
                .map_err(|_| Error::Timeout(deadline))?
                .map_err(Error::Io),
            None => self.runtime.block_on(fut).map_err(Error::Io),
        }
    }

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

    fn write_file(&self, addr: u64, data: &Bytes) -> Result<()> {
        let mut framed = Vec::with_capacity(CRC_PREFIX + data.len());
        framed.extend_from_slice(&crc32fast::hash(data).to_le_bytes());
        framed.extend_from_slice(data);
        let path = self.path_for(addr);
        self.run_io(tokio::fs::write(path, framed))
    }
}

impl Tier for BlockTier {
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

        if let Err(err) = self.write_file(addr, &data) {
            // Undo the charge and drop any partial file.
            self.used.fetch_sub(len, Ordering::AcqRel);
            let _ = std::fs::remove_file(self.path_for(addr));
            return Err(err);
        }

        self.live.lock().insert(addr, len);
        debug!(tier = %self.id, addr, len, "block tier write");
        Ok(addr)
    }

    fn read(&self, addr: u64, size: u64) -> Result<Bytes> {
        {
            let live = self.live.lock();
            match live.get(&addr) {
                None => return Err(Error::InvalidAddress { tier: self.id, addr }),
                Some(&stored) if stored != size => {
                    return Err(Error::Internal(format!(
                        "{}: size mismatch at {addr}: recorded {size}, stored {stored}",
                        self.id
                    )));
                }
                Some(_) => {}
            }
        }

        let framed = self.run_io(tokio::fs::read(self.path_for(addr)))?;
        if framed.len() != CRC_PREFIX + size as usize {
            return Err(Error::Corruption { tier: self.id, addr });
        }
        let (prefix, payload) = framed.split_at(CRC_PREFIX);
        let expected = u32::from_le_bytes(prefix.try_into().map_err(|_| Error::Corruption {
            tier: self.id,
            addr,
        })?);
        if crc32fast::hash(payload) != expected {
            return Err(Error::Corruption { tier: self.id, addr });
        }
        Ok(Bytes::copy_from_slice(payload))
    }

    fn overwrite(&self, addr: u64, data: Bytes) -> Result<()> {
        {
            let live = self.live.lock();
            match live.get(&addr) {
                None => return Err(Error::InvalidAddress { tier: self.id, addr }),
                Some(&stored) if stored != data.len() as u64 => {
                    return Err(Error::Internal(format!(
                        "{}: overwrite at {addr} changed size {stored} -> {}",
                        self.id,
                        data.len()
                    )));
                }
                Some(_) => {}
            }
        }
        self.write_file(addr, &data)
    }

    fn free(&self, addr: u64, size: u64) -> Result<()> {
        if self.live.lock().remove(&addr).is_none() {
            return Err(Error::InvalidAddress { tier: self.id, addr });
        }
        self.used.fetch_sub(size, Ordering::AcqRel);
        self.run_io(tokio::fs::remove_file(self.path_for(addr)))?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn tier(dir: &Path) -> BlockTier {
        BlockTier::new(TierId::new(2), 2, 1000, dir, None).unwrap()
    }

    #[test]
    fn test_write_read_roundtrip() {
        let dir = tempdir().unwrap();
        let tier = tier(dir.path());

        let payload = Bytes::from(vec![0xAB; 64]);
        let addr = tier.write(payload.clone()).unwrap();
        assert_eq!(tier.read(addr, 64).unwrap(), payload);
        assert_eq!(tier.used(), 64);
    }

    #[test]
    fn test_corruption_detected() {
        let dir = tempdir().unwrap();
        let tier = tier(dir.path());

        let addr = tier.write(Bytes::from(vec![7u8; 32])).unwrap();

        // Flip a payload byte behind the tier's back.
        let path = tier.path_for(addr);
        let mut framed = std::fs::read(&path).unwrap();
        framed[CRC_PREFIX + 3] ^= 0xFF;
        std::fs::write(&path, framed).unwrap();

        assert!(matches!(
            tier.read(addr, 32),
            Err(Error::Corruption { .. })
        ));
    }

    #[test]
    fn test_free_removes_file() {
        let dir = tempdir().unwrap();
        let tier = tier(dir.path());

        let addr = tier.write(Bytes::from(vec![1u8; 16])).unwrap();
        let path = tier.path_for(addr);
        assert!(path.exists());

        tier.free(addr, 16).unwrap();
        assert!(!path.exists());
        assert_eq!(tier.used(), 0);
        assert!(matches!(
            tier.read(addr, 16),
            Err(Error::InvalidAddress { .. })
        ));
    }

    #[test]
    fn test_hard_capacity_enforced() {
        let dir = tempdir().unwrap();
        let tier = BlockTier::new(TierId::new(2), 2, 100, dir.path(), None).unwrap();

        tier.write(Bytes::from(vec![0u8; 90])).unwrap();
        assert!(matches!(
            tier.write(Bytes::from(vec![0u8; 20])),
            Err(Error::TierFull { .. })
        ));
    }

    #[test]
    fn test_overwrite_rewrites_checksum() {
        let dir = tempdir().unwrap();
        let tier = tier(dir.path());

        let addr = tier.write(Bytes::from(vec![1u8; 8])).unwrap();
        tier.overwrite(addr, Bytes::from(vec![2u8; 8])).unwrap();
        assert_eq!(tier.read(addr, 8).unwrap(), Bytes::from(vec![2u8; 8]));
    }
}
