//! # emo-core
//!
//! Core mechanisms of the elastic memory orchestrator: storage tiers, the
//! buffer registry, the capacity model, eviction planning, and the
//! migration engine.
//!
//! ## Modules
//!
//! - [`tier`] - The [`tier::Tier`] trait and concrete device/host/block backends
//! - [`capacity`] - Planning-level byte accounting per tier
//! - [`registry`] - Handle-to-location indirection and buffer lifecycle
//! - [`eviction`] - Victim selection under tier pressure
//! - [`migration`] - All-or-nothing buffer movement between tiers
//!
//! ## Layering
//!
//! ```text
//! migration ──▶ registry ──▶ (records)
//!     │             ▲
//!     ▼             │
//!   tier ◀── eviction (read-only snapshots)
//!     │
//!     ▼
//! capacity (admission ledger)
//! ```
//!
//! The public-facing orchestrator lives in `emo-engine`; this crate only
//! provides the pieces it composes.

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]

pub mod capacity;
pub mod eviction;
pub mod migration;
pub mod registry;
pub mod tier;

pub use capacity::CapacityModel;
pub use eviction::EvictionPlanner;
pub use migration::MigrationEngine;
pub use registry::BufferRegistry;
pub use tier::{BlockTier, MemoryTier, Tier, TierSet};
