//! Atomic cells and collection mutations.

use std::cmp::Ordering;
use std::collections::BTreeMap;

use crate::tombstone::{Timestamp, Tombstone};

/// A single column value with its write timestamp.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AtomicCell {
    Live {
        timestamp: Timestamp,
        value: Vec<u8>,
    },
    /// A live value that expires at `expiry` (seconds since the epoch).
    Expiring {
        timestamp: Timestamp,
        value: Vec<u8>,
        ttl: u32,
        expiry: u32,
    },
    Dead {
        timestamp: Timestamp,
        deletion_time: u32,
    },
}

impl AtomicCell {
    pub fn live(timestamp: Timestamp, value: impl Into<Vec<u8>>) -> Self {
        AtomicCell::Live {
            timestamp,
            value: value.into(),
        }
    }

    pub fn expiring(timestamp: Timestamp, value: impl Into<Vec<u8>>, ttl: u32, expiry: u32) -> Self {
        AtomicCell::Expiring {
            timestamp,
            value: value.into(),
            ttl,
            expiry,
        }
    }

    pub fn dead(timestamp: Timestamp, deletion_time: u32) -> Self {
        AtomicCell::Dead {
            timestamp,
            deletion_time,
        }
    }

    #[must_use]
    pub fn timestamp(&self) -> Timestamp {
        match self {
            AtomicCell::Live { timestamp, .. }
            | AtomicCell::Expiring { timestamp, .. }
            | AtomicCell::Dead { timestamp, .. } => *timestamp,
        }
    }

    #[must_use]
    pub fn is_live(&self) -> bool {
        !matches!(self, AtomicCell::Dead { .. })
    }

    #[must_use]
    pub fn is_live_and_has_ttl(&self) -> bool {
        matches!(self, AtomicCell::Expiring { .. })
    }

    #[must_use]
    pub fn value(&self) -> Option<&[u8]> {
        match self {
            AtomicCell::Live { value, .. } | AtomicCell::Expiring { value, .. } => Some(value),
            AtomicCell::Dead { .. } => None,
        }
    }

    #[must_use]
    pub fn expiry(&self) -> Option<u32> {
        match self {
            AtomicCell::Expiring { expiry, .. } => Some(*expiry),
            _ => None,
        }
    }

    #[must_use]
    pub fn ttl(&self) -> Option<u32> {
        match self {
            AtomicCell::Expiring { ttl, .. } => Some(*ttl),
            _ => None,
        }
    }

    #[must_use]
    pub fn deletion_time(&self) -> Option<u32> {
        match self {
            AtomicCell::Dead { deletion_time, .. } => Some(*deletion_time),
            _ => None,
        }
    }

    /// Orders two versions of the same cell; the greater one survives a merge.
    ///
    /// Greater timestamp wins. On a timestamp tie a dead cell beats a live
    /// one, two dead cells compare by deletion time, and two live cells by
    /// value, then expiry, then ttl. This is a total order over cells, so the
    /// merge is associative and commutative.
    pub fn compare_for_merge(&self, other: &AtomicCell) -> Ordering {
        self.timestamp()
            .cmp(&other.timestamp())
            .then_with(|| match (self.is_live(), other.is_live()) {
                (true, false) => Ordering::Less,
                (false, true) => Ordering::Greater,
                (false, false) => self.deletion_time().cmp(&other.deletion_time()),
                (true, true) => self
                    .value()
                    .cmp(&other.value())
                    .then_with(|| self.expiry().cmp(&other.expiry()))
                    .then_with(|| self.ttl().cmp(&other.ttl())),
            })
    }

    /// Returns whichever of `self` and `other` wins the merge.
    #[must_use]
    pub fn reconcile(self, other: AtomicCell) -> AtomicCell {
        if other.compare_for_merge(&self) == Ordering::Greater {
            other
        } else {
            self
        }
    }
}

/// A multi-valued column: a collection-wide tombstone plus per-element cells.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct CollectionMutation {
    pub tombstone: Tombstone,
    pub cells: BTreeMap<Vec<u8>, AtomicCell>,
}

impl CollectionMutation {
    pub fn new(tombstone: Tombstone) -> Self {
        Self {
            tombstone,
            cells: BTreeMap::new(),
        }
    }

    /// Adds one element, reconciling with any existing version.
    pub fn insert(&mut self, key: impl Into<Vec<u8>>, cell: AtomicCell) {
        let key = key.into();
        let merged = match self.cells.remove(&key) {
            Some(existing) => existing.reconcile(cell),
            None => cell,
        };
        if !self.tombstone.deletes(merged.timestamp()) {
            self.cells.insert(key, merged);
        }
    }

    pub fn apply(&mut self, other: CollectionMutation) {
        self.tombstone.apply(other.tombstone);
        for (key, cell) in other.cells {
            self.insert(key, cell);
        }
        self.purge(Tombstone::NONE);
    }

    /// Drops elements covered by the collection tombstone or by `outer`.
    pub fn purge(&mut self, outer: Tombstone) {
        let mut t = self.tombstone;
        t.apply(outer);
        self.cells.retain(|_, c| !t.deletes(c.timestamp()));
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        !self.tombstone.is_set() && self.cells.is_empty()
    }
}

/// What a column holds: decided by the schema, never by the bytes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ColumnValue {
    Atomic(AtomicCell),
    Collection(CollectionMutation),
}

impl ColumnValue {
    #[must_use]
    pub fn as_atomic_cell(&self) -> Option<&AtomicCell> {
        match self {
            ColumnValue::Atomic(c) => Some(c),
            ColumnValue::Collection(_) => None,
        }
    }

    #[must_use]
    pub fn as_collection_mutation(&self) -> Option<&CollectionMutation> {
        match self {
            ColumnValue::Collection(m) => Some(m),
            ColumnValue::Atomic(_) => None,
        }
    }

    /// Merges two versions of the same column.
    ///
    /// A schema never maps one column to both kinds; should it happen anyway
    /// the collection side is kept so the result stays order independent.
    #[must_use]
    pub fn merge(self, other: ColumnValue) -> ColumnValue {
        match (self, other) {
            (ColumnValue::Atomic(a), ColumnValue::Atomic(b)) => ColumnValue::Atomic(a.reconcile(b)),
            (ColumnValue::Collection(mut a), ColumnValue::Collection(b)) => {
                a.apply(b);
                ColumnValue::Collection(a)
            }
            (ColumnValue::Collection(m), ColumnValue::Atomic(_))
            | (ColumnValue::Atomic(_), ColumnValue::Collection(m)) => ColumnValue::Collection(m),
        }
    }

    /// Removes whatever `t` covers; returns `false` if nothing is left.
    pub(crate) fn retain_uncovered(&mut self, t: Tombstone) -> bool {
        match self {
            ColumnValue::Atomic(c) => !t.deletes(c.timestamp()),
            ColumnValue::Collection(m) => {
                m.purge(t);
                !m.is_empty()
            }
        }
    }

    /// Every write timestamp carried by this value.
    pub fn timestamps(&self) -> Vec<Timestamp> {
        match self {
            ColumnValue::Atomic(c) => vec![c.timestamp()],
            ColumnValue::Collection(m) => {
                let mut out: Vec<Timestamp> = m.cells.values().map(AtomicCell::timestamp).collect();
                if m.tombstone.is_set() {
                    out.push(m.tombstone.timestamp);
                }
                out
            }
        }
    }
}

impl From<AtomicCell> for ColumnValue {
    fn from(c: AtomicCell) -> Self {
        ColumnValue::Atomic(c)
    }
}

impl From<CollectionMutation> for ColumnValue {
    fn from(m: CollectionMutation) -> Self {
        ColumnValue::Collection(m)
    }
}
