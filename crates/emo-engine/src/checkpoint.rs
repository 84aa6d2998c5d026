//! Serialize/restore hooks for an external persistence collaborator.
//!
//! EMO owns no persistence format: it hands out the resident state as
//! structured records and accepts the same shape back. How the records
//! reach disk (or anywhere else) is the collaborator's business.

use bytes::Bytes;
use serde::{Deserialize, Serialize};
use tracing::debug;

use emo_common::types::{Handle, TierId};
use emo_common::utils::error::{Error, Result};

use crate::orchestrator::MemoryOrchestrator;

/// One live buffer's resident state.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResidentBuffer {
    /// The handle the buffer had when serialized. Informational only:
    /// restoration issues fresh handles, since handles are never reused
    /// within a process.
    pub handle: Handle,
    /// The tier the buffer lived in, used as the placement hint on
    /// restore.
    pub tier: TierId,
    /// Size in bytes.
    pub size: u64,
    /// Raw content. Opaque to EMO.
    pub bytes: Vec<u8>,
}

impl MemoryOrchestrator {
    /// Captures every live buffer's {tier, size, bytes}.
    ///
    /// Buffers mid-migration are waited on, so the capture is always of
    /// resident, settled state. Each buffer is pinned only for the
    /// duration of its own read; this is not a stop-the-world snapshot,
    /// and buffers released concurrently are simply skipped.
    pub fn serialize_resident_state(&self) -> Result<Vec<ResidentBuffer>> {
        let mut out = Vec::new();
        for handle in self.registry().live_handles() {
            let record = match self.registry().pin_resident(handle, true) {
                Ok(record) => record,
                Err(Error::UseAfterRelease(_) | Error::NotFound(_)) => continue,
                Err(err) => return Err(err),
            };

            let read = self
                .tier(record.tier)
                .and_then(|tier| tier.read(record.addr, record.size));
            self.registry().unpin(handle)?;
            let data = read?;

            out.push(ResidentBuffer {
                handle,
                tier: record.tier,
                size: record.size,
                bytes: data.to_vec(),
            });
        }
        debug!(buffers = out.len(), "serialized resident state");
        Ok(out)
    }

    /// Rehydrates buffers after a restart, re-running admission as if
    /// each were a fresh allocation (so the current hardware's capacity
    /// model decides placement, not the old one).
    ///
    /// Returns the mapping from each buffer's serialized handle to its
    /// new one.
    ///
    /// # Errors
    ///
    /// Fails on a size/content mismatch or when even the full tier
    /// hierarchy cannot admit a buffer ([`Error::InsufficientEvictable`]).
    /// Already-restored buffers stay live on failure.
    pub fn restore_resident_state(
        &self,
        buffers: Vec<ResidentBuffer>,
    ) -> Result<Vec<(Handle, Handle)>> {
        let mut mapping = Vec::with_capacity(buffers.len());
        for buffer in buffers {
            if buffer.bytes.len() as u64 != buffer.size {
                return Err(Error::Internal(format!(
                    "restore of {}: recorded size {} but {} bytes of content",
                    buffer.handle,
                    buffer.size,
                    buffer.bytes.len()
                )));
            }
            // The serialized tier may not exist on this hardware; fall
            // back to the default placement.
            let hint = self.tier(buffer.tier).ok().map(|t| t.id());
            let old = buffer.handle;
            let payload = Bytes::from(buffer.bytes);
            let handle = self.allocate_bytes(buffer.size, hint, &|| payload.clone())?;
            mapping.push((old, handle));
        }
        debug!(buffers = mapping.len(), "restored resident state");
        Ok(mapping)
    }
}
