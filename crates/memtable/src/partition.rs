//! Rows, partitions and mutations.

use std::collections::BTreeMap;

use crate::cell::ColumnValue;
use crate::key::{ClusteringKey, DecoratedKey};
use crate::schema::ColumnId;
use crate::tombstone::{Timestamp, Tombstone, MISSING_TIMESTAMP};

/// Column id → value for one row.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Row {
    cells: BTreeMap<ColumnId, ColumnValue>,
}

impl Row {
    pub fn new() -> Self {
        Self::default()
    }

    /// Merges `value` into column `id`.
    pub fn apply(&mut self, id: ColumnId, value: ColumnValue) {
        let merged = match self.cells.remove(&id) {
            Some(existing) => existing.merge(value),
            None => value,
        };
        self.cells.insert(id, merged);
    }

    pub fn merge(&mut self, other: Row) {
        for (id, value) in other.cells {
            self.apply(id, value);
        }
    }

    /// Removes everything `t` covers.
    pub fn purge(&mut self, t: Tombstone) {
        if t.is_set() {
            self.cells.retain(|_, v| v.retain_uncovered(t));
        }
    }

    #[must_use]
    pub fn cell_at(&self, id: ColumnId) -> Option<&ColumnValue> {
        self.cells.get(&id)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&ColumnId, &ColumnValue)> {
        self.cells.iter()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.cells.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.cells.is_empty()
    }
}

/// A row inside a partition, addressed by its clustering key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClusteringRow {
    /// Row marker timestamp; [`MISSING_TIMESTAMP`] when there is no marker.
    pub created_at: Timestamp,
    pub tombstone: Tombstone,
    pub cells: Row,
}

impl Default for ClusteringRow {
    fn default() -> Self {
        Self {
            created_at: MISSING_TIMESTAMP,
            tombstone: Tombstone::NONE,
            cells: Row::new(),
        }
    }
}

impl ClusteringRow {
    pub fn apply(&mut self, other: ClusteringRow) {
        self.created_at = self.created_at.max(other.created_at);
        self.tombstone.apply(other.tombstone);
        self.cells.merge(other.cells);
    }

    /// Purges the marker and cells covered by the row's own deletion or by
    /// `outer`.
    fn purge(&mut self, outer: Tombstone) {
        let mut t = self.tombstone;
        t.apply(outer);
        if t.deletes(self.created_at) {
            self.created_at = MISSING_TIMESTAMP;
        }
        // A row deletion no newer than the outer one carries no information.
        if self.tombstone.is_set() && self.tombstone <= outer {
            self.tombstone = Tombstone::NONE;
        }
        self.cells.purge(t);
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.created_at == MISSING_TIMESTAMP && !self.tombstone.is_set() && self.cells.is_empty()
    }
}

/// All the data stored under one partition key.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Partition {
    pub tombstone: Tombstone,
    pub static_row: Row,
    /// Deletions of every row whose clustering key starts with the prefix.
    pub row_tombstones: BTreeMap<ClusteringKey, Tombstone>,
    pub rows: BTreeMap<ClusteringKey, ClusteringRow>,
}

impl Partition {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn apply_tombstone(&mut self, t: Tombstone) {
        self.tombstone.apply(t);
        self.compact();
    }

    pub fn apply_static_cell(&mut self, id: ColumnId, value: impl Into<ColumnValue>) {
        self.static_row.apply(id, value.into());
        self.compact();
    }

    pub fn apply_row_tombstone(&mut self, prefix: ClusteringKey, t: Tombstone) {
        self.row_tombstones.entry(prefix).or_default().apply(t);
        self.compact();
    }

    pub fn apply_row(&mut self, key: ClusteringKey, row: ClusteringRow) {
        self.rows.entry(key).or_default().apply(row);
        self.compact();
    }

    /// Writes one cell into the row at `key`, creating the row if needed.
    pub fn apply_row_cell(&mut self, key: ClusteringKey, id: ColumnId, value: impl Into<ColumnValue>) {
        self.rows.entry(key).or_default().cells.apply(id, value.into());
        self.compact();
    }

    /// Merges another version of the same partition into this one.
    ///
    /// Equivalent to applying every piece of `other` in any order: tombstones
    /// join, cells reconcile per column, collections merge recursively, and
    /// anything covered by a deletion is purged.
    pub fn apply(&mut self, other: Partition) {
        self.tombstone.apply(other.tombstone);
        self.static_row.merge(other.static_row);
        for (prefix, t) in other.row_tombstones {
            self.row_tombstones.entry(prefix).or_default().apply(t);
        }
        for (key, row) in other.rows {
            self.rows.entry(key).or_default().apply(row);
        }
        self.compact();
    }

    /// Drops data shadowed by the partition, range and row deletions.
    pub fn compact(&mut self) {
        let pt = self.tombstone;
        self.static_row.purge(pt);
        self.row_tombstones.retain(|_, t| t.is_set() && !(pt.is_set() && *t <= pt));

        let ranges = &self.row_tombstones;
        for (key, row) in self.rows.iter_mut() {
            let mut covering = pt;
            for (prefix, t) in ranges.iter() {
                if prefix.is_prefix_of(key) {
                    covering.apply(*t);
                }
            }
            row.purge(covering);
        }
        self.rows.retain(|_, row| !row.is_empty());
    }

    #[must_use]
    pub fn row(&self, key: &ClusteringKey) -> Option<&ClusteringRow> {
        self.rows.get(key)
    }

    /// Total number of static cells and row cells.
    #[must_use]
    pub fn cell_count(&self) -> usize {
        self.static_row.len() + self.rows.values().map(|r| r.cells.len()).sum::<usize>()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        !self.tombstone.is_set()
            && self.static_row.is_empty()
            && self.row_tombstones.is_empty()
            && self.rows.is_empty()
    }
}

/// A partition together with its key: the unit every reader yields.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Mutation {
    pub key: DecoratedKey,
    pub partition: Partition,
}

impl Mutation {
    pub fn new(key: DecoratedKey, partition: Partition) -> Self {
        Self { key, partition }
    }

    /// Merges `other`, which must carry the same key.
    pub fn apply(&mut self, other: Mutation) {
        debug_assert_eq!(self.key, other.key, "merging mutations of different partitions");
        self.partition.apply(other.partition);
    }
}
