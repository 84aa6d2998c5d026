//! Engine configuration.

use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use emo_common::types::TierId;

/// Policy for accesses that find their buffer mid-migration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum BusyPolicy {
    /// Block the access until the migration resolves.
    #[default]
    Blocking,
    /// Fail immediately with `BufferBusy`; the caller retries.
    FailFast,
}

/// Configuration for a [`MemoryOrchestrator`](crate::MemoryOrchestrator).
///
/// # Examples
///
/// ```
/// use emo_engine::{BusyPolicy, EngineConfig};
///
/// let config = EngineConfig::default()
///     .with_busy_policy(BusyPolicy::FailFast)
///     .with_admission_threshold(0.85);
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    /// What accesses do when a buffer is mid-migration.
    pub busy_policy: BusyPolicy,
    /// Deadline for a single block-tier I/O operation. A timeout is
    /// treated as a migration failure and rolled back. `None` waits
    /// indefinitely.
    pub io_timeout: Option<Duration>,
    /// Attempts per tier I/O operation inside the migration engine
    /// (1 = no retry).
    pub migration_retries: u32,
    /// Default admission threshold for tiers that do not specify one.
    pub admission_threshold: f64,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            busy_policy: BusyPolicy::Blocking,
            io_timeout: None,
            migration_retries: 2,
            admission_threshold: 0.9,
        }
    }
}

impl EngineConfig {
    /// Sets the busy policy.
    #[must_use]
    pub fn with_busy_policy(mut self, policy: BusyPolicy) -> Self {
        self.busy_policy = policy;
        self
    }

    /// Sets the block-tier I/O deadline.
    #[must_use]
    pub fn with_io_timeout(mut self, timeout: Duration) -> Self {
        self.io_timeout = Some(timeout);
        self
    }

    /// Sets the migration retry budget.
    #[must_use]
    pub fn with_migration_retries(mut self, retries: u32) -> Self {
        self.migration_retries = retries;
        self
    }

    /// Sets the default admission threshold.
    #[must_use]
    pub fn with_admission_threshold(mut self, threshold: f64) -> Self {
        self.admission_threshold = threshold;
        self
    }
}

/// Storage backend selection for one tier.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum TierBackend {
    /// Address-mapped in-memory pool (device or host memory).
    Memory,
    /// One file per buffer under the given directory.
    Block {
        /// Spill directory for payload files.
        dir: PathBuf,
    },
}

/// One tier as reported by the hardware-probing collaborator.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TierSpec {
    /// Tier identifier, stable for the orchestrator's lifetime.
    pub id: TierId,
    /// Speed rank, 0 = fastest.
    pub rank: u8,
    /// Total capacity in bytes.
    pub capacity: u64,
    /// Backend implementation.
    pub backend: TierBackend,
    /// Admission threshold override; falls back to
    /// [`EngineConfig::admission_threshold`].
    pub admission_threshold: Option<f64>,
}

impl TierSpec {
    /// An in-memory tier (device or host memory).
    #[must_use]
    pub fn memory(id: TierId, rank: u8, capacity: u64) -> Self {
        Self {
            id,
            rank,
            capacity,
            backend: TierBackend::Memory,
            admission_threshold: None,
        }
    }

    /// A file-backed block-storage tier.
    #[must_use]
    pub fn block(id: TierId, rank: u8, capacity: u64, dir: impl Into<PathBuf>) -> Self {
        Self {
            id,
            rank,
            capacity,
            backend: TierBackend::Block { dir: dir.into() },
            admission_threshold: None,
        }
    }

    /// Sets an admission threshold override.
    #[must_use]
    pub fn with_admission_threshold(mut self, threshold: f64) -> Self {
        self.admission_threshold = Some(threshold);
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = EngineConfig::default();
        assert_eq!(config.busy_policy, BusyPolicy::Blocking);
        assert_eq!(config.migration_retries, 2);
        assert!(config.io_timeout.is_none());
    }

    #[test]
    fn test_builder_chain() {
        let config = EngineConfig::default()
            .with_busy_policy(BusyPolicy::FailFast)
            .with_io_timeout(Duration::from_secs(5))
            .with_migration_retries(3);
        assert_eq!(config.busy_policy, BusyPolicy::FailFast);
        assert_eq!(config.io_timeout, Some(Duration::from_secs(5)));
        assert_eq!(config.migration_retries, 3);
    }
}
