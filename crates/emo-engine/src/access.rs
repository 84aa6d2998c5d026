//! Scoped, pinned buffer access.

use bytes::{Bytes, BytesMut};
use tracing::warn;

use emo_common::types::{AccessIntent, BufferRecord, Handle, TierId};
use emo_common::utils::error::{Error, Result};

use crate::orchestrator::MemoryOrchestrator;

/// RAII guard over one pinned buffer access.
///
/// While the guard lives, the buffer is pinned: it cannot be evicted or
/// migrated, so its bytes stay where they are. Dropping the guard (or
/// calling [`AccessGuard::commit`]) writes mutations back for write
/// intents and unpins on every exit path, including unwinding.
///
/// Buffer sizes are fixed; mutation happens in place through
/// [`AccessGuard::bytes_mut`].
pub struct AccessGuard<'a> {
    orchestrator: &'a MemoryOrchestrator,
    handle: Handle,
    intent: AccessIntent,
    tier: TierId,
    addr: u64,
    size: u64,
    /// Resident bytes as read (zero-copy for in-memory tiers).
    data: Bytes,
    /// Mutable copy, materialized on first `bytes_mut`.
    scratch: Option<BytesMut>,
    finished: bool,
}

impl<'a> AccessGuard<'a> {
    pub(crate) fn new(
        orchestrator: &'a MemoryOrchestrator,
        handle: Handle,
        intent: AccessIntent,
        record: &BufferRecord,
        data: Bytes,
    ) -> Self {
        Self {
            orchestrator,
            handle,
            intent,
            tier: record.tier,
            addr: record.addr,
            size: record.size,
            data,
            scratch: None,
            finished: false,
        }
    }

    /// The buffer's handle.
    #[must_use]
    pub fn handle(&self) -> Handle {
        self.handle
    }

    /// The buffer's size in bytes.
    #[must_use]
    pub fn size(&self) -> u64 {
        self.size
    }

    /// The tier currently holding the buffer.
    #[must_use]
    pub fn tier(&self) -> TierId {
        self.tier
    }

    /// The resident bytes (including any local mutations).
    #[must_use]
    pub fn bytes(&self) -> &[u8] {
        match &self.scratch {
            Some(scratch) => scratch,
            None => &self.data,
        }
    }

    /// Mutable view of the bytes, written back when the guard ends.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Internal`] if the access was opened read-only.
    pub fn bytes_mut(&mut self) -> Result<&mut [u8]> {
        if !self.intent.writes() {
            return Err(Error::Internal(format!(
                "write through read-only access to {}",
                self.handle
            )));
        }
        let scratch = self
            .scratch
            .get_or_insert_with(|| BytesMut::from(&self.data[..]));
        Ok(&mut scratch[..])
    }

    /// Ends the access, surfacing write-back errors instead of logging
    /// them from `Drop`.
    pub fn commit(mut self) -> Result<()> {
        self.finish()
    }

    fn finish(&mut self) -> Result<()> {
        if self.finished {
            return Ok(());
        }
        self.finished = true;

        let flush = match self.scratch.take() {
            Some(scratch) if self.intent.writes() => self
                .orchestrator
                .tier(self.tier)
                .and_then(|tier| tier.overwrite(self.addr, scratch.freeze())),
            _ => Ok(()),
        };
        let unpin = self.orchestrator.registry().unpin(self.handle);
        flush.and(unpin)
    }
}

impl Drop for AccessGuard<'_> {
    fn drop(&mut self) {
        if let Err(err) = self.finish() {
            warn!(handle = %self.handle, %err, "access guard teardown failed");
        }
    }
}
