//! The table data model and the in-memory sorted table.
//!
//! A [`Memtable`] accumulates [`Mutation`]s keyed by [`DecoratedKey`]. Writes to
//! the same partition are merged on arrival with the same semantics the merge
//! reader applies across on-disk tables, so flushing a memtable and merging
//! tables always agree.

mod cell;
mod key;
mod partition;
mod schema;
mod tombstone;

use std::collections::BTreeMap;
use std::sync::Arc;

pub use cell::{AtomicCell, CollectionMutation, ColumnValue};
pub use key::{
    ByteOrderedPartitioner, ClusteringKey, DecoratedKey, Murmur3Partitioner, Partitioner,
    PartitionerKind, Token,
};
pub use partition::{ClusteringRow, Mutation, Partition, Row};
pub use schema::{ColumnDefinition, ColumnId, ColumnKind, CompressorKind, Schema, SchemaBuilder};
pub use tombstone::{Timestamp, Tombstone, MISSING_TIMESTAMP};

#[derive(Debug)]
pub struct Memtable {
    schema: Arc<Schema>,
    partitions: BTreeMap<DecoratedKey, Partition>,
    approx_size: usize,
}

impl Memtable {
    pub fn new(schema: Arc<Schema>) -> Self {
        Self {
            schema,
            partitions: BTreeMap::new(),
            approx_size: 0,
        }
    }

    pub fn schema(&self) -> &Arc<Schema> {
        &self.schema
    }

    /// Merges `m` into the partition it addresses.
    pub fn apply(&mut self, m: Mutation) {
        self.approx_size += estimate_size(&m);
        match self.partitions.get_mut(&m.key) {
            Some(existing) => existing.apply(m.partition),
            None => {
                let mut p = Partition::new();
                p.apply(m.partition);
                self.partitions.insert(m.key, p);
            }
        }
    }

    #[must_use]
    pub fn find_partition(&self, key: &DecoratedKey) -> Option<&Partition> {
        self.partitions.get(key)
    }

    /// Partitions in decorated-key order.
    pub fn all_partitions(&self) -> impl Iterator<Item = (&DecoratedKey, &Partition)> {
        self.partitions.iter()
    }

    /// Consumes the table, yielding its partitions in decorated-key order.
    pub fn into_mutations(self) -> impl Iterator<Item = Mutation> {
        self.partitions
            .into_iter()
            .map(|(key, partition)| Mutation::new(key, partition))
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.partitions.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.partitions.is_empty()
    }

    /// Bytes written so far; an upper bound on the live size since merged-away
    /// versions are not subtracted.
    #[must_use]
    pub fn approx_size(&self) -> usize {
        self.approx_size
    }
}

fn estimate_size(m: &Mutation) -> usize {
    let p = &m.partition;
    let value_len = |v: &ColumnValue| match v {
        ColumnValue::Atomic(c) => c.value().map_or(0, <[u8]>::len) + 16,
        ColumnValue::Collection(c) => c
            .cells
            .iter()
            .map(|(k, c)| k.len() + c.value().map_or(0, <[u8]>::len) + 16)
            .sum::<usize>(),
    };
    let statics: usize = p.static_row.iter().map(|(_, v)| value_len(v)).sum();
    let rows: usize = p
        .rows
        .iter()
        .map(|(k, r)| {
            k.components().iter().map(Vec::len).sum::<usize>()
                + r.cells.iter().map(|(_, v)| value_len(v)).sum::<usize>()
        })
        .sum();
    m.key.key().len() + statics + rows
}

#[cfg(test)]
mod tests;
