//! Identifier types.

use serde::{Deserialize, Serialize};

/// Stable logical identifier for a buffer.
///
/// A handle is opaque and process-unique. It stays valid across tier
/// migrations and carries no tier information itself; the registry owns
/// the indirection from handle to physical location. Handles are assigned
/// from a monotonically increasing counter and are never reused, so a
/// released handle can always be distinguished from a live one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Handle(u64);

impl Handle {
    /// Creates a handle from a raw value.
    #[must_use]
    pub const fn new(raw: u64) -> Self {
        Self(raw)
    }

    /// Returns the raw value of this handle.
    #[must_use]
    pub const fn raw(self) -> u64 {
        self.0
    }
}

impl std::fmt::Display for Handle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "h{}", self.0)
    }
}

/// Identifier for a storage tier.
///
/// Tier ids are stable for the lifetime of an orchestrator. The speed
/// ordering of tiers is expressed by their rank (0 = fastest), not by
/// the id value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct TierId(u16);

impl TierId {
    /// Creates a tier id from a raw value.
    #[must_use]
    pub const fn new(raw: u16) -> Self {
        Self(raw)
    }

    /// Returns the raw value of this tier id.
    #[must_use]
    pub const fn raw(self) -> u16 {
        self.0
    }
}

impl std::fmt::Display for TierId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "tier{}", self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_handle_ordering() {
        assert!(Handle::new(1) < Handle::new(2));
        assert_eq!(Handle::new(7).raw(), 7);
    }

    #[test]
    fn test_display() {
        assert_eq!(Handle::new(42).to_string(), "h42");
        assert_eq!(TierId::new(0).to_string(), "tier0");
    }
}
