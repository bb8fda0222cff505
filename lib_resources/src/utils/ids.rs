//! # Id Sequences
//!
//! Every manager owns its own [`Sequence`], so independently constructed
//! managers never share counters. [`IdGenerator`] produces prefixed string ids,
//! handy for naming listeners (`"L1"`, `"L2"`, ...).

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

use serde::{Deserialize, Serialize};

/// Identifier of a resource record. Monotonically increasing, never reused
/// within one manager.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ResourceId(pub u64);

impl fmt::Display for ResourceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A monotonically increasing counter starting at 1.
#[derive(Debug)]
pub struct Sequence {
    last: AtomicU64,
}

impl Sequence {
    /// Creates a sequence whose first value is 1.
    pub const fn new() -> Self {
        Self {
            last: AtomicU64::new(0),
        }
    }

    /// Returns the next value.
    pub fn next(&self) -> u64 {
        self.last.fetch_add(1, Ordering::Relaxed) + 1
    }

    /// Returns the most recently issued value, or 0 if none was issued yet.
    pub fn current(&self) -> u64 {
        self.last.load(Ordering::Relaxed)
    }
}

impl Default for Sequence {
    fn default() -> Self {
        Self::new()
    }
}

/// Generates string ids of the form `{prefix}{n}`.
#[derive(Debug, Default)]
pub struct IdGenerator {
    prefix: String,
    sequence: Sequence,
}

impl IdGenerator {
    /// Creates a generator for the given prefix.
    pub fn new(prefix: impl Into<String>) -> Self {
        Self {
            prefix: prefix.into(),
            sequence: Sequence::new(),
        }
    }

    /// Returns the next id.
    pub fn next_id(&self) -> String {
        format!("{}{}", self.prefix, self.sequence.next())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sequence_starts_at_one() {
        let seq = Sequence::new();
        assert_eq!(seq.current(), 0);
        assert_eq!(seq.next(), 1);
        assert_eq!(seq.next(), 2);
        assert_eq!(seq.current(), 2);
    }

    #[test]
    fn generators_are_independent() {
        let listeners = IdGenerator::new("L");
        let other = IdGenerator::new("L");
        assert_eq!(listeners.next_id(), "L1");
        assert_eq!(listeners.next_id(), "L2");
        assert_eq!(other.next_id(), "L1");
    }
}
