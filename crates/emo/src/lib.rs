//! # EMO
//!
//! An elastic memory orchestrator for long-running computations over
//! large mutable buffers. EMO migrates buffers between storage tiers
//! (fast device memory, host memory, block storage) by access recency
//! and size, so the fastest tier never runs out as long as the working
//! set fits within total capacity across all tiers.
//!
//! If you're new here, start with [`MemoryOrchestrator`] - that's your
//! entry point for allocating, accessing, and releasing buffers.
//!
//! ## Quick Start
//!
//! ```rust
//! use emo::{AccessIntent, EngineConfig, MemoryOrchestrator, TierId, TierSpec};
//!
//! let orchestrator = MemoryOrchestrator::new(
//!     EngineConfig::default(),
//!     vec![
//!         TierSpec::memory(TierId::new(0), 0, 1024),      // device
//!         TierSpec::memory(TierId::new(1), 1, 16 * 1024), // host
//!     ],
//! )?;
//!
//! let handle = orchestrator.allocate(256, None)?;
//! {
//!     let mut guard = orchestrator.access(handle, AccessIntent::ReadWrite)?;
//!     guard.bytes_mut()?[0] = 42;
//!     guard.commit()?;
//! }
//! orchestrator.release(handle)?;
//! # Ok::<(), emo_common::utils::error::Error>(())
//! ```

// Re-export the main orchestrator API
pub use emo_engine::{
    AccessGuard, BusyPolicy, EngineConfig, MemoryOrchestrator, MetricsSnapshot, ResidentBuffer,
    TierBackend, TierSpec,
};

// Re-export core types - you'll need these for handles and intents
pub use emo_common::types::{AccessIntent, BufferState, Handle, TierDescriptor, TierId};
pub use emo_common::utils::error::{Error, Result};
