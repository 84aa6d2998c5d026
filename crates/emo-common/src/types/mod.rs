//! Core type definitions for the elastic memory orchestrator.
//!
//! This module contains all fundamental types shared across the EMO crates:
//! - Identifier types ([`Handle`], [`TierId`])
//! - Temporal types ([`Timestamp`], a logical recency clock)
//! - Buffer bookkeeping ([`BufferRecord`], [`BufferState`], [`AccessIntent`])
//! - Tier bookkeeping ([`TierDescriptor`])

mod id;
mod record;
mod timestamp;

pub use id::{Handle, TierId};
pub use record::{AccessIntent, BufferRecord, BufferState, TierDescriptor};
pub use timestamp::Timestamp;
