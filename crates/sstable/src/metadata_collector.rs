//! Per-table statistics gathered while a table is written.
//!
//! Every field folds with an associative and commutative operation (min, max,
//! histogram merge, per-component name bounds), so the resulting
//! Statistics.db does not depend on the order partitions were fed in.

use memtable::{AtomicCell, ColumnValue, Partition, Timestamp, Tombstone, MISSING_TIMESTAMP};

use crate::codec::{DiskArray, DiskString};
use crate::histogram::{
    EstimatedHistogram, StreamingHistogram, COLUMN_COUNT_BUCKETS, ROW_SIZE_BUCKETS,
};
use crate::types::{ReplayPosition, StatsMetadata};

/// Compression ratio recorded for uncompressed tables.
pub const NO_COMPRESSION_RATIO: f64 = -1.0;

/// Statistics of one partition.
#[derive(Debug, Clone, PartialEq)]
pub struct ColumnStats {
    pub column_count: u64,
    pub row_size: u64,
    pub min_timestamp: Timestamp,
    pub max_timestamp: Timestamp,
    pub max_local_deletion_time: i32,
    pub tombstone_histogram: StreamingHistogram,
    pub min_column_names: Vec<Vec<u8>>,
    pub max_column_names: Vec<Vec<u8>>,
    pub has_legacy_counter_shards: bool,
}

impl Default for ColumnStats {
    fn default() -> Self {
        Self {
            column_count: 0,
            row_size: 0,
            min_timestamp: i64::MAX,
            max_timestamp: i64::MIN,
            max_local_deletion_time: i32::MIN,
            tombstone_histogram: StreamingHistogram::default(),
            min_column_names: Vec::new(),
            max_column_names: Vec::new(),
            has_legacy_counter_shards: false,
        }
    }
}

fn local_deletion_time(t: u32) -> i32 {
    i32::try_from(t).unwrap_or(i32::MAX)
}

impl ColumnStats {
    pub fn reset(&mut self) {
        *self = ColumnStats::default();
    }

    pub fn update_timestamp(&mut self, ts: Timestamp) {
        if ts == MISSING_TIMESTAMP {
            return;
        }
        self.min_timestamp = self.min_timestamp.min(ts);
        self.max_timestamp = self.max_timestamp.max(ts);
    }

    pub fn update_max_local_deletion_time(&mut self, t: i32) {
        self.max_local_deletion_time = self.max_local_deletion_time.max(t);
    }

    fn update_tombstone(&mut self, t: Tombstone) {
        if !t.is_set() {
            return;
        }
        self.update_timestamp(t.timestamp);
        self.update_max_local_deletion_time(local_deletion_time(t.deletion_time));
        self.tombstone_histogram.update(f64::from(t.deletion_time));
    }

    fn update_cell(&mut self, cell: &AtomicCell) {
        self.column_count += 1;
        self.update_timestamp(cell.timestamp());
        match cell {
            AtomicCell::Live { .. } => self.update_max_local_deletion_time(i32::MAX),
            AtomicCell::Expiring { expiry, .. } => {
                self.update_max_local_deletion_time(local_deletion_time(*expiry))
            }
            AtomicCell::Dead { deletion_time, .. } => {
                self.update_max_local_deletion_time(local_deletion_time(*deletion_time));
                self.tombstone_histogram.update(f64::from(*deletion_time));
            }
        }
    }

    fn update_value(&mut self, value: &ColumnValue) {
        match value {
            ColumnValue::Atomic(c) => self.update_cell(c),
            ColumnValue::Collection(m) => {
                self.update_tombstone(m.tombstone);
                for c in m.cells.values() {
                    self.update_cell(c);
                }
            }
        }
    }

    /// Gathers the statistics of `partition`, whose serialized size is `row_size`.
    pub fn from_partition(partition: &Partition, row_size: u64) -> Self {
        let mut s = ColumnStats {
            row_size,
            ..ColumnStats::default()
        };
        s.update_tombstone(partition.tombstone);
        for (_, v) in partition.static_row.iter() {
            s.update_value(v);
        }
        for t in partition.row_tombstones.values() {
            s.update_tombstone(*t);
        }
        for (key, row) in &partition.rows {
            s.update_timestamp(row.created_at);
            s.update_tombstone(row.tombstone);
            for (_, v) in row.cells.iter() {
                s.update_value(v);
            }
            merge_min_components(&mut s.min_column_names, key.components());
            merge_max_components(&mut s.max_column_names, key.components());
        }
        s
    }
}

/// Per component position, keeps the smallest name seen. Lists of different
/// lengths contribute only to the positions they have.
pub fn merge_min_components(bounds: &mut Vec<Vec<u8>>, candidate: &[Vec<u8>]) {
    merge_components(bounds, candidate, |current, c| c < current);
}

pub fn merge_max_components(bounds: &mut Vec<Vec<u8>>, candidate: &[Vec<u8>]) {
    merge_components(bounds, candidate, |current, c| c > current);
}

fn merge_components(
    bounds: &mut Vec<Vec<u8>>,
    candidate: &[Vec<u8>],
    replace: impl Fn(&[u8], &[u8]) -> bool,
) {
    for (i, c) in candidate.iter().enumerate() {
        match bounds.get_mut(i) {
            Some(current) => {
                if replace(current, c) {
                    current.clone_from(c);
                }
            }
            None => bounds.push(c.clone()),
        }
    }
}

#[derive(Debug, Clone)]
pub struct MetadataCollector {
    estimated_row_size: EstimatedHistogram,
    estimated_column_count: EstimatedHistogram,
    replay_position: ReplayPosition,
    min_timestamp: Timestamp,
    max_timestamp: Timestamp,
    repaired_at: u64,
    max_local_deletion_time: i32,
    compression_ratio: f64,
    estimated_tombstone_drop_time: StreamingHistogram,
    sstable_level: u32,
    min_column_names: Vec<Vec<u8>>,
    max_column_names: Vec<Vec<u8>>,
    has_legacy_counter_shards: bool,
}

impl Default for MetadataCollector {
    fn default() -> Self {
        Self {
            estimated_row_size: EstimatedHistogram::new(ROW_SIZE_BUCKETS),
            estimated_column_count: EstimatedHistogram::new(COLUMN_COUNT_BUCKETS),
            replay_position: ReplayPosition::NONE,
            min_timestamp: i64::MAX,
            max_timestamp: i64::MIN,
            repaired_at: 0,
            max_local_deletion_time: i32::MIN,
            compression_ratio: NO_COMPRESSION_RATIO,
            estimated_tombstone_drop_time: StreamingHistogram::default(),
            sstable_level: 0,
            min_column_names: Vec::new(),
            max_column_names: Vec::new(),
            has_legacy_counter_shards: false,
        }
    }
}

impl MetadataCollector {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_row_size(&mut self, row_size: u64) {
        self.estimated_row_size.add(row_size);
    }

    pub fn add_column_count(&mut self, column_count: u64) {
        self.estimated_column_count.add(column_count);
    }

    /// Ratio of compressed to uncompressed bytes; above 1.0 compression does
    /// not pay off.
    pub fn add_compression_ratio(&mut self, compressed: u64, uncompressed: u64) {
        if uncompressed > 0 {
            self.compression_ratio = compressed as f64 / uncompressed as f64;
        }
    }

    pub fn set_replay_position(&mut self, rp: ReplayPosition) {
        self.replay_position = rp;
    }

    pub fn set_repaired_at(&mut self, repaired_at: u64) {
        self.repaired_at = repaired_at;
    }

    pub fn set_sstable_level(&mut self, level: u32) {
        self.sstable_level = level;
    }

    /// Folds in one partition's statistics.
    pub fn update(&mut self, stats: &ColumnStats) {
        self.min_timestamp = self.min_timestamp.min(stats.min_timestamp);
        self.max_timestamp = self.max_timestamp.max(stats.max_timestamp);
        self.max_local_deletion_time = self.max_local_deletion_time.max(stats.max_local_deletion_time);
        self.add_row_size(stats.row_size);
        self.add_column_count(stats.column_count);
        self.estimated_tombstone_drop_time.merge(&stats.tombstone_histogram);
        merge_min_components(&mut self.min_column_names, &stats.min_column_names);
        merge_max_components(&mut self.max_column_names, &stats.max_column_names);
        self.has_legacy_counter_shards |= stats.has_legacy_counter_shards;
    }

    /// Freezes the aggregates into the Stats record.
    pub fn construct_stats(&self) -> StatsMetadata {
        let names = |v: &[Vec<u8>]| DiskArray::new(v.iter().cloned().map(DiskString::new).collect());
        StatsMetadata {
            estimated_row_size: self.estimated_row_size.clone(),
            estimated_column_count: self.estimated_column_count.clone(),
            position: self.replay_position,
            min_timestamp: self.min_timestamp,
            max_timestamp: self.max_timestamp,
            max_local_deletion_time: self.max_local_deletion_time,
            compression_ratio: self.compression_ratio,
            estimated_tombstone_drop_time: self.estimated_tombstone_drop_time.clone(),
            sstable_level: self.sstable_level,
            repaired_at: self.repaired_at,
            min_column_names: names(&self.min_column_names),
            max_column_names: names(&self.max_column_names),
            has_legacy_counter_shards: self.has_legacy_counter_shards,
        }
    }
}
