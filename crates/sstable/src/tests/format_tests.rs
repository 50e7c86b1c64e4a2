use anyhow::Result;
use memtable::{
    AtomicCell, ClusteringKey, ClusteringRow, ColumnId, ColumnValue, CompressorKind, Partition,
    Timestamp, Tombstone,
};

use super::{rich_partition, test_schema};
use crate::error::Error;
use crate::format::{accept, read_partition_body, write_partition_body, PartitionVisitor};
use crate::key::{Composite, CompositeMarker};

#[derive(Default)]
struct Recorder {
    events: Vec<String>,
}

impl PartitionVisitor for Recorder {
    fn accept_partition_tombstone(&mut self, t: Tombstone) {
        self.events.push(format!("tombstone {}", t.timestamp));
    }

    fn accept_static_cell(&mut self, id: ColumnId, _value: ColumnValue) {
        self.events.push(format!("static {id}"));
    }

    fn accept_row_tombstone(&mut self, prefix: ClusteringKey, t: Tombstone) {
        self.events.push(format!("range {:?} {}", prefix, t.timestamp));
    }

    fn accept_row(&mut self, key: ClusteringKey, _created_at: Timestamp, _t: Tombstone) {
        self.events.push(format!("row {key:?}"));
    }

    fn accept_row_cell(&mut self, id: ColumnId, _value: ColumnValue) {
        self.events.push(format!("cell {id}"));
    }
}

#[test]
fn body_round_trips() -> Result<()> {
    let schema = test_schema(CompressorKind::None);
    let p = rich_partition();
    let mut body = Vec::new();
    write_partition_body(&schema, &p, &mut body)?;
    assert_eq!(read_partition_body(&schema, &body)?, p);
    Ok(())
}

#[test]
fn empty_partition_round_trips() -> Result<()> {
    let schema = test_schema(CompressorKind::None);
    let mut p = Partition::new();
    p.apply_tombstone(Tombstone::new(3, 9));
    let mut body = Vec::new();
    write_partition_body(&schema, &p, &mut body)?;
    // DeletionTime, two empty section counts, no rows.
    assert_eq!(body.len(), 12 + 4 + 4);
    assert_eq!(read_partition_body(&schema, &body)?, p);
    Ok(())
}

#[test]
fn visitor_sees_sections_in_disk_order() -> Result<()> {
    let schema = test_schema(CompressorKind::None);
    let mut body = Vec::new();
    write_partition_body(&schema, &rich_partition(), &mut body)?;

    let mut rec = Recorder::default();
    accept(&schema, &body, &mut rec)?;
    let kinds: Vec<&str> = rec.events.iter().filter_map(|e| e.split(' ').next()).collect();
    assert_eq!(
        kinds,
        ["tombstone", "static", "range", "row", "cell", "row", "cell", "cell", "row", "cell"]
    );
    assert_eq!(rec.events[0], "tombstone 5");
    assert_eq!(rec.events[2], format!("range {:?} 20", ClusteringKey::single("b")));
    assert_eq!(rec.events[7], "cell 1");
    Ok(())
}

#[test]
fn unknown_cell_mask_is_corrupt() -> Result<()> {
    let schema = test_schema(CompressorKind::None);
    let mut p = Partition::new();
    p.apply_static_cell(0, AtomicCell::live(1, "v"));
    let mut body = Vec::new();
    write_partition_body(&schema, &p, &mut body)?;

    // DeletionTime (12) + static count (4) + column id (4), then the mask.
    body[20] = 0x7f;
    let err = read_partition_body(&schema, &body).unwrap_err();
    assert!(matches!(err, Error::Corrupt(_)), "{err}");
    Ok(())
}

#[test]
fn unknown_column_fails_both_ways() -> Result<()> {
    let schema = test_schema(CompressorKind::None);
    let mut p = Partition::new();
    p.apply_row_cell(ClusteringKey::single("r"), 7, AtomicCell::live(1, "v"));
    let mut body = Vec::new();
    let err = write_partition_body(&schema, &p, &mut body).unwrap_err();
    assert!(matches!(err, Error::UnknownColumn { kind: "regular", id: 7 }), "{err}");

    let mut ok = Partition::new();
    ok.apply_static_cell(0, AtomicCell::live(1, "v"));
    body.clear();
    write_partition_body(&schema, &ok, &mut body)?;
    let narrow = memtable::Schema::builder("ks", "t").regular_column("v").build();
    let err = read_partition_body(&narrow, &body).unwrap_err();
    assert!(matches!(err, Error::UnknownColumn { kind: "static", id: 0 }), "{err}");
    Ok(())
}

#[test]
fn wrong_value_kind_is_invalid_row() {
    let schema = test_schema(CompressorKind::None);
    let mut p = Partition::new();
    p.apply_row_cell(ClusteringKey::single("r"), 1, AtomicCell::live(1, "not a collection"));
    let err = write_partition_body(&schema, &p, &mut Vec::new()).unwrap_err();
    assert!(matches!(err, Error::InvalidRow(_)), "{err}");
}

#[test]
fn row_with_shadowed_cells_is_invalid() {
    let schema = test_schema(CompressorKind::None);
    let mut p = Partition::new();
    let mut row = ClusteringRow::default();
    row.tombstone = Tombstone::new(10, 1);
    row.cells.apply(0, AtomicCell::live(5, "old").into());
    // Bypass the purge a memtable would perform.
    p.rows.insert(ClusteringKey::single("r"), row);

    let err = write_partition_body(&schema, &p, &mut Vec::new()).unwrap_err();
    assert!(matches!(err, Error::InvalidRow(_)), "{err}");
}

#[test]
fn row_marker_mismatch_is_rejected() -> Result<()> {
    let schema = test_schema(CompressorKind::None);
    let mut p = Partition::new();
    p.apply_row_cell(ClusteringKey::single("r"), 0, AtomicCell::live(1, "v"));
    let mut body = Vec::new();
    write_partition_body(&schema, &p, &mut body)?;

    // Row composite: u16 length, then one component "r" and its marker.
    let marker_at = 12 + 4 + 4 + 2 + 2 + 1;
    assert_eq!(body[marker_at], 0);
    body[marker_at] = CompositeMarker::EndRange as i8 as u8;
    let err = read_partition_body(&schema, &body).unwrap_err();
    assert!(matches!(err, Error::InvalidRow(_)), "{err}");
    Ok(())
}

#[test]
fn composite_round_trips() -> Result<()> {
    let parts = vec![b"ab".to_vec(), Vec::new(), b"c".to_vec()];
    let c = Composite::from_exploded(&parts, CompositeMarker::EndRange)?;
    assert_eq!(c.explode()?, parts);
    assert_eq!(c.marker(), Some(CompositeMarker::EndRange));
    assert!(!c.is_static());

    let empty = Composite::from_clustering(&ClusteringKey::default(), CompositeMarker::StartRange)?;
    assert_eq!(empty.to_clustering()?, ClusteringKey::default());
    assert_eq!(empty.marker(), Some(CompositeMarker::StartRange));

    let s = Composite::static_prefix(2);
    assert!(s.is_static());
    assert_eq!(s.explode()?, vec![Vec::<u8>::new(), Vec::new()]);
    Ok(())
}

#[test]
fn key_sentinels_bound_every_key() -> Result<()> {
    use crate::key::Key;
    use memtable::PartitionerKind;
    use std::cmp::Ordering;

    assert_eq!(Key::minimum().tri_compare(b""), Ordering::Less);
    assert_eq!(Key::maximum().tri_compare(&[0xff; 8]), Ordering::Greater);
    assert_eq!(Key::from_bytes("b").tri_compare(b"a"), Ordering::Greater);
    assert_eq!(Key::from_bytes(vec![0x80]).tri_compare(&[0x7f]), Ordering::Greater);

    let p = PartitionerKind::ByteOrdered;
    let dk = p.decorate_key("m");
    assert_eq!(Key::from_bytes("a").compare_decorated(p, &dk), Ordering::Less);
    assert_eq!(Key::from_bytes("m").compare_decorated(p, &dk), Ordering::Equal);
    assert_eq!(Key::from_bytes("m").decorate(p), dk);

    let parts = vec![b"x".to_vec(), b"yz".to_vec()];
    let k = Key::from_exploded(&parts)?;
    assert_eq!(k.explode(2)?, parts);
    assert!(matches!(k.explode(3), Err(Error::Corrupt(_))));
    Ok(())
}
