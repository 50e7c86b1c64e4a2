//! Partition byte format.
//!
//! ```text
//! partition frame (Data.db):  key: u16 len + bytes | body_len: u32 | body
//!
//! body:
//!   DeletionTime                                       partition tombstone
//!   u32 count, count x (column_id u32, value)          static row
//!   u32 count, count x (prefix, DeletionTime)          row tombstones
//!   until the end of the body:                         clustered rows
//!     clustering, created_at i64, DeletionTime,
//!     u32 count, count x (column_id u32, value)
//!
//! value (atomic):     mask u8, then
//!   0x00 plain         timestamp i64, value u32 len + bytes
//!   0x01 deletion      timestamp i64, deletion_time u32
//!   0x02 expiring      ttl u32, expiry u32, timestamp i64, value u32 len + bytes
//! value (collection): DeletionTime, u32 count, count x (sub_key u32 len + bytes, atomic)
//! ```
//!
//! Whether a column holds an atomic cell or a collection is not in the
//! bytes: the decoder asks the schema for every column id it meets.

use std::io::{Cursor, Read, Write};

use memtable::{
    AtomicCell, ClusteringKey, CollectionMutation, ColumnId, ColumnKind, ColumnValue, Partition,
    Row, Schema, Timestamp, Tombstone,
};

use crate::codec::{read, DiskString, Encode};
use crate::error::{Error, Result};
use crate::key::{Composite, CompositeMarker};
use crate::types::DeletionTime;

const MASK_PLAIN: u8 = 0x00;
const MASK_DELETION: u8 = 0x01;
const MASK_EXPIRING: u8 = 0x02;

// ---------------------------------------------------------------------------
// Writing
// ---------------------------------------------------------------------------

/// Serializes `partition` into `out`.
///
/// # Errors
///
/// [`Error::UnknownColumn`] for a column id the schema does not define,
/// [`Error::InvalidRow`] for a value of the wrong kind or for a row carrying
/// cells its own deletion shadows.
pub fn write_partition_body(schema: &Schema, partition: &Partition, out: &mut Vec<u8>) -> Result<()> {
    DeletionTime::from(partition.tombstone).encode(out)?;

    write_count(out, partition.static_row.len())?;
    write_cells(schema, ColumnKind::Static, &partition.static_row, out)?;

    write_count(out, partition.row_tombstones.len())?;
    for (prefix, t) in &partition.row_tombstones {
        write_composite(out, Composite::from_clustering(prefix, CompositeMarker::StartRange)?)?;
        DeletionTime::from(*t).encode(out)?;
    }

    for (key, row) in &partition.rows {
        check_row(key, row.tombstone, &row.cells)?;
        write_composite(out, Composite::from_clustering(key, CompositeMarker::None)?)?;
        row.created_at.encode(out)?;
        DeletionTime::from(row.tombstone).encode(out)?;
        write_count(out, row.cells.len())?;
        write_cells(schema, ColumnKind::Regular, &row.cells, out)?;
    }
    Ok(())
}

fn check_row(key: &ClusteringKey, tombstone: Tombstone, cells: &Row) -> Result<()> {
    if !tombstone.is_set() {
        return Ok(());
    }
    for (id, value) in cells.iter() {
        let shadowed = match value {
            ColumnValue::Atomic(c) => tombstone.deletes(c.timestamp()),
            ColumnValue::Collection(m) => m.cells.values().any(|c| tombstone.deletes(c.timestamp())),
        };
        if shadowed {
            return Err(Error::InvalidRow(format!(
                "row {key:?} is deleted at {} but column {id} holds older data",
                tombstone.timestamp
            )));
        }
    }
    Ok(())
}

fn write_count(out: &mut Vec<u8>, n: usize) -> Result<()> {
    let n = u32::try_from(n).map_err(|_| Error::Overflow {
        len: n,
        max: u64::from(u32::MAX),
    })?;
    n.encode(out)
}

fn write_composite(out: &mut Vec<u8>, c: Composite) -> Result<()> {
    DiskString::<u16>::new(c.into_bytes()).encode(out)
}

fn write_cells(schema: &Schema, kind: ColumnKind, row: &Row, out: &mut Vec<u8>) -> Result<()> {
    for (id, value) in row.iter() {
        let def = schema.column_at(kind, *id).ok_or(Error::UnknownColumn {
            kind: kind.name(),
            id: *id,
        })?;
        id.encode(out)?;
        match (value, def.is_atomic()) {
            (ColumnValue::Atomic(c), true) => write_atomic_cell(c, out)?,
            (ColumnValue::Collection(m), false) => write_collection(m, out)?,
            _ => {
                return Err(Error::InvalidRow(format!(
                    "column {} holds a value of the wrong kind",
                    def.name
                )))
            }
        }
    }
    Ok(())
}

fn write_atomic_cell(cell: &AtomicCell, out: &mut Vec<u8>) -> Result<()> {
    match cell {
        AtomicCell::Live { timestamp, value } => {
            MASK_PLAIN.encode(out)?;
            timestamp.encode(out)?;
            write_value(value, out)
        }
        AtomicCell::Expiring {
            timestamp,
            value,
            ttl,
            expiry,
        } => {
            MASK_EXPIRING.encode(out)?;
            ttl.encode(out)?;
            expiry.encode(out)?;
            timestamp.encode(out)?;
            write_value(value, out)
        }
        AtomicCell::Dead {
            timestamp,
            deletion_time,
        } => {
            MASK_DELETION.encode(out)?;
            timestamp.encode(out)?;
            deletion_time.encode(out)
        }
    }
}

fn write_value(value: &[u8], out: &mut Vec<u8>) -> Result<()> {
    let len = u32::try_from(value.len()).map_err(|_| Error::Overflow {
        len: value.len(),
        max: u64::from(u32::MAX),
    })?;
    len.encode(out)?;
    out.write_all(value)?;
    Ok(())
}

fn write_collection(m: &CollectionMutation, out: &mut Vec<u8>) -> Result<()> {
    DeletionTime::from(m.tombstone).encode(out)?;
    write_count(out, m.cells.len())?;
    for (key, cell) in &m.cells {
        write_value(key, out)?;
        write_atomic_cell(cell, out)?;
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Decoding
// ---------------------------------------------------------------------------

/// Receives the pieces of a partition in on-disk order.
pub trait PartitionVisitor {
    fn accept_partition_tombstone(&mut self, t: Tombstone);

    fn accept_static_cell(&mut self, id: ColumnId, value: ColumnValue);

    fn accept_row_tombstone(&mut self, prefix: ClusteringKey, t: Tombstone);

    /// Starts a clustered row; its cells follow.
    fn accept_row(&mut self, key: ClusteringKey, created_at: Timestamp, t: Tombstone);

    fn accept_row_cell(&mut self, id: ColumnId, value: ColumnValue);
}

/// Decodes a partition body, feeding `visitor`.
pub fn accept(schema: &Schema, body: &[u8], visitor: &mut dyn PartitionVisitor) -> Result<()> {
    let mut r = Cursor::new(body);
    let end = body.len() as u64;

    visitor.accept_partition_tombstone(read::<DeletionTime>(&mut r)?.into());

    let statics = read::<u32>(&mut r)?;
    for _ in 0..statics {
        let (id, value) = read_column(schema, ColumnKind::Static, &mut r)?;
        visitor.accept_static_cell(id, value);
    }

    let ranges = read::<u32>(&mut r)?;
    for _ in 0..ranges {
        let prefix = read_composite(&mut r, CompositeMarker::StartRange)?;
        let t: DeletionTime = read(&mut r)?;
        visitor.accept_row_tombstone(prefix, t.into());
    }

    while r.position() < end {
        let key = read_composite(&mut r, CompositeMarker::None)?;
        let created_at = read::<i64>(&mut r)?;
        let t: DeletionTime = read(&mut r)?;
        visitor.accept_row(key, created_at, t.into());

        let cells = read::<u32>(&mut r)?;
        for _ in 0..cells {
            let (id, value) = read_column(schema, ColumnKind::Regular, &mut r)?;
            visitor.accept_row_cell(id, value);
        }
    }
    Ok(())
}

fn read_composite(r: &mut dyn Read, marker: CompositeMarker) -> Result<ClusteringKey> {
    let raw: DiskString<u16> = read(r)?;
    let composite = Composite::from_bytes(raw.value);
    composite.check_marker(marker)?;
    composite.to_clustering()
}

fn read_column(schema: &Schema, kind: ColumnKind, r: &mut dyn Read) -> Result<(ColumnId, ColumnValue)> {
    let id = read::<u32>(r)?;
    let def = schema.column_at(kind, id).ok_or(Error::UnknownColumn {
        kind: kind.name(),
        id,
    })?;
    let value = if def.is_atomic() {
        ColumnValue::Atomic(read_atomic_cell(r)?)
    } else {
        ColumnValue::Collection(read_collection(r)?)
    };
    Ok((id, value))
}

fn read_atomic_cell(r: &mut dyn Read) -> Result<AtomicCell> {
    match read::<u8>(r)? {
        MASK_PLAIN => {
            let timestamp = read::<i64>(r)?;
            let value: DiskString<u32> = read(r)?;
            Ok(AtomicCell::live(timestamp, value.value))
        }
        MASK_DELETION => {
            let timestamp = read::<i64>(r)?;
            let deletion_time = read::<u32>(r)?;
            Ok(AtomicCell::dead(timestamp, deletion_time))
        }
        MASK_EXPIRING => {
            let ttl = read::<u32>(r)?;
            let expiry = read::<u32>(r)?;
            let timestamp = read::<i64>(r)?;
            let value: DiskString<u32> = read(r)?;
            Ok(AtomicCell::expiring(timestamp, value.value, ttl, expiry))
        }
        mask => Err(Error::Corrupt(format!("unknown cell mask {mask:#04x}"))),
    }
}

fn read_collection(r: &mut dyn Read) -> Result<CollectionMutation> {
    let t: DeletionTime = read(r)?;
    let mut m = CollectionMutation::new(t.into());
    let n = read::<u32>(r)?;
    for _ in 0..n {
        let key: DiskString<u32> = read(r)?;
        let cell = read_atomic_cell(r)?;
        m.cells.insert(key.value, cell);
    }
    Ok(m)
}

/// Rebuilds a [`Partition`] from visitor callbacks.
#[derive(Debug, Default)]
pub struct PartitionBuilder {
    partition: Partition,
    current_row: Option<ClusteringKey>,
}

impl PartitionBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn build(mut self) -> Partition {
        self.partition.compact();
        self.partition
    }
}

impl PartitionVisitor for PartitionBuilder {
    fn accept_partition_tombstone(&mut self, t: Tombstone) {
        self.partition.tombstone.apply(t);
    }

    fn accept_static_cell(&mut self, id: ColumnId, value: ColumnValue) {
        self.partition.static_row.apply(id, value);
    }

    fn accept_row_tombstone(&mut self, prefix: ClusteringKey, t: Tombstone) {
        self.partition.row_tombstones.entry(prefix).or_default().apply(t);
    }

    fn accept_row(&mut self, key: ClusteringKey, created_at: Timestamp, t: Tombstone) {
        let row = self.partition.rows.entry(key.clone()).or_default();
        row.created_at = row.created_at.max(created_at);
        row.tombstone.apply(t);
        self.current_row = Some(key);
    }

    fn accept_row_cell(&mut self, id: ColumnId, value: ColumnValue) {
        if let Some(key) = &self.current_row {
            if let Some(row) = self.partition.rows.get_mut(key) {
                row.cells.apply(id, value);
            }
        }
    }
}

/// Decodes a whole partition body.
pub fn read_partition_body(schema: &Schema, body: &[u8]) -> Result<Partition> {
    let mut builder = PartitionBuilder::new();
    accept(schema, body, &mut builder)?;
    Ok(builder.build())
}
