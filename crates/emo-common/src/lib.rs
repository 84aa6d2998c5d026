//! # emo-common
//!
//! Foundation layer for the elastic memory orchestrator: identifier types,
//! buffer and tier descriptors, the error taxonomy, and small utilities.
//!
//! This crate provides the fundamental building blocks used by all other
//! EMO crates. It has no internal dependencies and should be kept minimal.
//!
//! ## Modules
//!
//! - [`types`] - Core type definitions (Handle, TierId, BufferRecord, etc.)
//! - [`utils`] - Utility functions and helpers (hashing, errors)

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]

pub mod types;
pub mod utils;

// Re-export commonly used types at crate root
pub use types::{
    AccessIntent, BufferRecord, BufferState, Handle, TierDescriptor, TierId, Timestamp,
};
pub use utils::error::{Error, Result};
