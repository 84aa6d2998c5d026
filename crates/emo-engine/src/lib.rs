//! # emo-engine
//!
//! The public-facing elastic memory orchestrator: allocation routing,
//! scoped accesses, hotness hints, metrics, and checkpoint hooks over
//! the tier/registry/migration machinery in `emo-core`.
//!
//! ## Modules
//!
//! - [`orchestrator`] - [`MemoryOrchestrator`], the main entry point
//! - [`access`] - RAII scoped access guards
//! - [`config`] - Engine and tier configuration
//! - [`metrics`] - Counters for an external observability collaborator
//! - [`checkpoint`] - Serialize/restore resident state hooks

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]

pub mod access;
pub mod checkpoint;
pub mod config;
pub mod metrics;
pub mod orchestrator;

pub use access::AccessGuard;
pub use checkpoint::ResidentBuffer;
pub use config::{BusyPolicy, EngineConfig, TierBackend, TierSpec};
pub use metrics::MetricsSnapshot;
pub use orchestrator::MemoryOrchestrator;
