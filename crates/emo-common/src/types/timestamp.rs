//! Logical timestamps for access recency.

use serde::{Deserialize, Serialize};

/// A logical timestamp drawn from a monotonic counter.
///
/// EMO tracks recency with a logical clock rather than wall time: every
/// touch of a buffer advances the clock and stamps the record. Eviction
/// ordering only needs a total order over touches, which a counter gives
/// without syscall overhead or clock-skew concerns.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default, Serialize, Deserialize,
)]
pub struct Timestamp(u64);

impl Timestamp {
    /// The zero timestamp, older than any touch.
    pub const ZERO: Self = Self(0);

    /// Creates a timestamp from a raw tick value.
    #[must_use]
    pub const fn new(tick: u64) -> Self {
        Self(tick)
    }

    /// Returns the raw tick value.
    #[must_use]
    pub const fn tick(self) -> u64 {
        self.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_timestamp_ordering() {
        assert!(Timestamp::ZERO < Timestamp::new(1));
        assert!(Timestamp::new(5) < Timestamp::new(9));
    }
}
