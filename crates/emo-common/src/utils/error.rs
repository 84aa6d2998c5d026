//! Error taxonomy for the elastic memory orchestrator.
//!
//! The taxonomy separates three families of failures:
//!
//! - Transient pressure errors ([`Error::TierFull`], [`Error::MigrationFailed`],
//!   [`Error::BufferBusy`]): retried by the orchestrator or the caller.
//! - Caller programming errors ([`Error::NotFound`], [`Error::UseAfterRelease`]):
//!   surfaced immediately, never retried.
//! - [`Error::InsufficientEvictable`]: the single legitimate out-of-resources
//!   terminal error. It means even the slowest tier is full of pinned,
//!   irreclaimable data, and the zero-OOM guarantee cannot be honored.

use std::time::Duration;

use crate::types::{Handle, TierId};

/// Result alias used across all EMO crates.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors produced by the elastic memory orchestrator.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// A tier write was attempted past the tier's hard capacity. Tiers
    /// enforce this independently of the admission model; it can fire
    /// when a concurrent allocation races the admission decision.
    #[error("{tier} full: requested {requested} bytes, {available} available")]
    TierFull {
        /// The tier that rejected the write.
        tier: TierId,
        /// Bytes requested.
        requested: u64,
        /// Bytes still available at the hard capacity limit.
        available: u64,
    },

    /// A migration failed and was rolled back; the buffer is resident at
    /// its original tier, unchanged. Transient: the caller may retry.
    #[error("migration of {handle} to {dest} failed: {reason}")]
    MigrationFailed {
        /// The buffer that failed to move.
        handle: Handle,
        /// The intended destination tier.
        dest: TierId,
        /// Human-readable failure cause.
        reason: String,
    },

    /// The buffer is mid-migration and the busy policy is fail-fast.
    #[error("{0} is busy (migration in flight)")]
    BufferBusy(Handle),

    /// No buffer was ever allocated under this handle.
    #[error("{0} not found")]
    NotFound(Handle),

    /// The handle was valid once but has been released. Handles are never
    /// reused, so this is always a caller bug rather than an ABA race.
    #[error("{0} was released and must not be used again")]
    UseAfterRelease(Handle),

    /// Not enough unpinned resident bytes exist in the tier to relieve
    /// the requested pressure.
    #[error("{tier}: need {needed} bytes but only {reclaimable} are evictable")]
    InsufficientEvictable {
        /// The tier under pressure.
        tier: TierId,
        /// Bytes that had to be freed.
        needed: u64,
        /// Unpinned resident bytes actually reclaimable.
        reclaimable: u64,
    },

    /// A tier I/O operation exceeded its configured deadline. Treated as
    /// a migration failure and rolled back.
    #[error("tier I/O timed out after {0:?}")]
    Timeout(Duration),

    /// A block-tier payload failed checksum verification on read.
    #[error("checksum mismatch for {tier} address {addr}")]
    Corruption {
        /// The tier whose payload was corrupt.
        tier: TierId,
        /// The tier-local address of the payload.
        addr: u64,
    },

    /// An address was presented to a tier that never issued it (or has
    /// already freed it). Always a bug in the calling component.
    #[error("invalid address {addr} for {tier}")]
    InvalidAddress {
        /// The tier that rejected the address.
        tier: TierId,
        /// The offending address.
        addr: u64,
    },

    /// Underlying I/O failure from a storage backend.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Internal invariant violation. Always a bug in EMO itself.
    #[error("internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Returns whether this error is transient tier I/O that the
    /// migration engine may retry locally before surfacing.
    #[must_use]
    pub fn is_transient_io(&self) -> bool {
        matches!(self, Self::Timeout(_) | Self::Io(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transient_classification() {
        assert!(Error::Timeout(Duration::from_secs(1)).is_transient_io());
        assert!(!Error::NotFound(Handle::new(1)).is_transient_io());
        assert!(
            !Error::InsufficientEvictable {
                tier: TierId::new(0),
                needed: 10,
                reclaimable: 0,
            }
            .is_transient_io()
        );
    }

    #[test]
    fn test_error_display() {
        let err = Error::UseAfterRelease(Handle::new(3));
        assert!(err.to_string().contains("h3"));

        let err = Error::TierFull {
            tier: TierId::new(1),
            requested: 100,
            available: 40,
        };
        assert!(err.to_string().contains("tier1"));
    }
}
