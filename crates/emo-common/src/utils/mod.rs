//! Utility functions and helpers.
//!
//! - [`error`] - The EMO error taxonomy and `Result` alias
//! - [`hash`] - Fast hash map/set aliases used throughout the crates

pub mod error;
pub mod hash;
