//! Deletion markers.

use std::fmt;

/// Writer-supplied timestamp (microseconds by convention).
pub type Timestamp = i64;

/// The timestamp of "no deletion".
pub const MISSING_TIMESTAMP: Timestamp = i64::MIN;

/// A deletion operation: everything written at or before `timestamp` is
/// deleted, and the marker itself may be purged after `deletion_time`
/// (seconds since the epoch).
///
/// Tombstones form a join-semilattice under [`apply`](Tombstone::apply): the
/// larger timestamp wins, ties go to the later deletion time. The empty
/// tombstone ([`Tombstone::NONE`]) is the identity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Tombstone {
    pub timestamp: Timestamp,
    pub deletion_time: u32,
}

impl Tombstone {
    pub const NONE: Tombstone = Tombstone {
        timestamp: MISSING_TIMESTAMP,
        deletion_time: 0,
    };

    pub fn new(timestamp: Timestamp, deletion_time: u32) -> Self {
        Self {
            timestamp,
            deletion_time,
        }
    }

    /// `true` unless this is the empty tombstone.
    #[must_use]
    pub fn is_set(&self) -> bool {
        self.timestamp != MISSING_TIMESTAMP
    }

    /// Joins `other` into `self`, keeping whichever is greater.
    pub fn apply(&mut self, other: Tombstone) {
        if *self < other {
            *self = other;
        }
    }

    /// `true` if data written at `timestamp` is covered by this deletion.
    #[must_use]
    pub fn deletes(&self, timestamp: Timestamp) -> bool {
        self.is_set() && timestamp <= self.timestamp
    }
}

impl Default for Tombstone {
    fn default() -> Self {
        Self::NONE
    }
}

impl fmt::Display for Tombstone {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{{timestamp={}, deletion_time={}}}",
            self.timestamp, self.deletion_time
        )
    }
}
