use super::*;
use quickcheck::{quickcheck, Arbitrary, Gen};

fn schema() -> Arc<Schema> {
    Arc::new(
        Schema::builder("ks", "t")
            .static_column("s")
            .regular_column("v")
            .regular_collection("tags")
            .build(),
    )
}

fn ck(s: &str) -> ClusteringKey {
    ClusteringKey::single(s.as_bytes())
}

fn row_with(id: ColumnId, cell: AtomicCell) -> Partition {
    let mut p = Partition::new();
    p.apply_row_cell(ck("r"), id, cell);
    p
}

// -------------------- Tombstones --------------------

#[test]
fn tombstone_apply_keeps_greater_timestamp() {
    let mut t = Tombstone::new(5, 100);
    t.apply(Tombstone::new(3, 200));
    assert_eq!(t, Tombstone::new(5, 100));
    t.apply(Tombstone::new(7, 1));
    assert_eq!(t, Tombstone::new(7, 1));
}

#[test]
fn tombstone_tie_goes_to_later_deletion_time() {
    let mut t = Tombstone::new(5, 100);
    t.apply(Tombstone::new(5, 200));
    assert_eq!(t.deletion_time, 200);
}

#[test]
fn empty_tombstone_deletes_nothing() {
    assert!(!Tombstone::NONE.is_set());
    assert!(!Tombstone::NONE.deletes(MISSING_TIMESTAMP));
    assert!(!Tombstone::NONE.deletes(0));
    assert!(Tombstone::new(10, 0).deletes(10));
    assert!(!Tombstone::new(10, 0).deletes(11));
}

#[derive(Debug, Clone, Copy)]
struct ArbTombstone(Tombstone);

impl Arbitrary for ArbTombstone {
    fn arbitrary(g: &mut Gen) -> Self {
        if bool::arbitrary(g) {
            ArbTombstone(Tombstone::NONE)
        } else {
            ArbTombstone(Tombstone::new(i64::from(i8::arbitrary(g)), u32::from(u8::arbitrary(g))))
        }
    }
}

fn join(a: Tombstone, b: Tombstone) -> Tombstone {
    let mut out = a;
    out.apply(b);
    out
}

quickcheck! {
    fn tombstone_apply_is_commutative(a: ArbTombstone, b: ArbTombstone) -> bool {
        join(a.0, b.0) == join(b.0, a.0)
    }

    fn tombstone_apply_is_associative(a: ArbTombstone, b: ArbTombstone, c: ArbTombstone) -> bool {
        join(join(a.0, b.0), c.0) == join(a.0, join(b.0, c.0))
    }

    fn tombstone_apply_is_idempotent(a: ArbTombstone) -> bool {
        join(a.0, a.0) == a.0 && join(a.0, Tombstone::NONE) == a.0
    }
}

// -------------------- Cells --------------------

#[test]
fn newer_cell_wins() {
    let a = AtomicCell::live(1, b"old".to_vec());
    let b = AtomicCell::live(2, b"new".to_vec());
    assert_eq!(a.clone().reconcile(b.clone()), b);
    assert_eq!(b.clone().reconcile(a), b);
}

#[test]
fn dead_cell_wins_timestamp_tie() {
    let live = AtomicCell::live(5, b"v".to_vec());
    let dead = AtomicCell::dead(5, 100);
    assert_eq!(live.clone().reconcile(dead.clone()), dead);
    assert_eq!(dead.clone().reconcile(live), dead);
}

#[test]
fn live_tie_is_broken_by_value() {
    let a = AtomicCell::live(5, b"a".to_vec());
    let b = AtomicCell::live(5, b"b".to_vec());
    assert_eq!(a.clone().reconcile(b.clone()), b);
    assert_eq!(b.clone().reconcile(a), b);
}

#[test]
fn expiring_cell_accessors() {
    let c = AtomicCell::expiring(3, b"x".to_vec(), 60, 1_000);
    assert!(c.is_live());
    assert!(c.is_live_and_has_ttl());
    assert_eq!(c.ttl(), Some(60));
    assert_eq!(c.expiry(), Some(1_000));
    assert_eq!(c.value(), Some(&b"x"[..]));
    assert_eq!(c.deletion_time(), None);
}

#[test]
fn collection_drops_cells_covered_by_its_tombstone() {
    let mut a = CollectionMutation::new(Tombstone::NONE);
    a.insert(b"k1".to_vec(), AtomicCell::live(1, b"a".to_vec()));
    a.insert(b"k2".to_vec(), AtomicCell::live(5, b"b".to_vec()));

    let b = CollectionMutation::new(Tombstone::new(3, 10));
    a.apply(b);

    assert_eq!(a.tombstone, Tombstone::new(3, 10));
    assert_eq!(a.cells.len(), 1);
    assert!(a.cells.contains_key(&b"k2"[..]));
}

#[test]
fn collection_merge_reconciles_per_sub_key() {
    let mut a = CollectionMutation::default();
    a.insert(b"k".to_vec(), AtomicCell::live(1, b"a".to_vec()));
    let mut b = CollectionMutation::default();
    b.insert(b"k".to_vec(), AtomicCell::live(2, b"b".to_vec()));
    a.apply(b);
    assert_eq!(a.cells[&b"k"[..]].value(), Some(&b"b"[..]));
}

// -------------------- Partitions --------------------

#[test]
fn partition_tombstone_purges_older_cells() {
    let mut p = Partition::new();
    p.apply_static_cell(0, AtomicCell::live(1, b"s".to_vec()));
    p.apply_row_cell(ck("a"), 0, AtomicCell::live(1, b"old".to_vec()));
    p.apply_row_cell(ck("b"), 0, AtomicCell::live(9, b"new".to_vec()));

    p.apply_tombstone(Tombstone::new(5, 100));

    assert!(p.static_row.is_empty());
    assert!(p.row(&ck("a")).is_none());
    assert!(p.row(&ck("b")).is_some());
}

#[test]
fn row_tombstone_purges_rows_under_prefix() {
    let mut p = Partition::new();
    let k1 = ClusteringKey::new(vec![b"a".to_vec(), b"1".to_vec()]);
    let k2 = ClusteringKey::new(vec![b"b".to_vec(), b"1".to_vec()]);
    p.apply_row_cell(k1.clone(), 0, AtomicCell::live(1, b"x".to_vec()));
    p.apply_row_cell(k2.clone(), 0, AtomicCell::live(1, b"y".to_vec()));

    p.apply_row_tombstone(ck("a"), Tombstone::new(2, 0));

    assert!(p.row(&k1).is_none());
    assert!(p.row(&k2).is_some());
    assert_eq!(p.row_tombstones.len(), 1);
}

#[test]
fn row_tombstone_older_than_partition_tombstone_is_dropped() {
    let mut p = Partition::new();
    p.apply_row_tombstone(ck("a"), Tombstone::new(2, 0));
    p.apply_tombstone(Tombstone::new(3, 0));
    assert!(p.row_tombstones.is_empty());
}

#[test]
fn row_deletion_keeps_newer_cells_only() {
    let mut p = Partition::new();
    p.apply_row_cell(ck("r"), 0, AtomicCell::live(1, b"a".to_vec()));
    p.apply_row_cell(ck("r"), 1, CollectionMutation::new(Tombstone::new(9, 0)));
    p.apply_row(
        ck("r"),
        ClusteringRow {
            created_at: MISSING_TIMESTAMP,
            tombstone: Tombstone::new(5, 0),
            cells: Row::new(),
        },
    );

    let row = p.row(&ck("r")).expect("row survives via its deletion");
    assert_eq!(row.tombstone, Tombstone::new(5, 0));
    assert!(row.cells.cell_at(0).is_none());
    assert!(row.cells.cell_at(1).is_some());
}

#[test]
fn partition_merge_is_order_independent() {
    let a = row_with(0, AtomicCell::live(1, b"a".to_vec()));
    let b = row_with(0, AtomicCell::live(2, b"b".to_vec()));
    let mut c = Partition::new();
    c.apply_tombstone(Tombstone::new(1, 7));

    let mut left = a.clone();
    left.apply(b.clone());
    left.apply(c.clone());

    let mut right = c;
    right.apply(b);
    right.apply(a);

    assert_eq!(left, right);
    let cell = left.row(&ck("r")).unwrap().cells.cell_at(0).unwrap();
    assert_eq!(cell.as_atomic_cell().unwrap().value(), Some(&b"b"[..]));
}

// -------------------- Keys --------------------

#[test]
fn murmur3_tokens_are_stable() {
    let p = PartitionerKind::Murmur3;
    assert_eq!(p.token(b"key"), p.token(b"key"));
    assert_ne!(p.token(b"key1"), p.token(b"key2"));
    assert_eq!(PartitionerKind::from_name(p.name()), Some(p));
}

#[test]
fn byte_ordered_keys_sort_by_bytes() {
    let p = PartitionerKind::ByteOrdered;
    let a = p.decorate_key(b"a".to_vec());
    let b = p.decorate_key(b"b".to_vec());
    assert!(a < b);
}

#[test]
fn clustering_prefix() {
    let full = ClusteringKey::new(vec![b"a".to_vec(), b"b".to_vec()]);
    assert!(ck("a").is_prefix_of(&full));
    assert!(!ck("b").is_prefix_of(&full));
    assert!(ClusteringKey::default().is_prefix_of(&full));
}

// -------------------- Memtable --------------------

#[test]
fn apply_merges_same_partition() {
    let schema = schema();
    let mut m = Memtable::new(schema.clone());
    let key = schema.decorate_key(b"pk".to_vec());

    m.apply(Mutation::new(key.clone(), row_with(0, AtomicCell::live(1, b"v1".to_vec()))));
    m.apply(Mutation::new(key.clone(), row_with(0, AtomicCell::live(2, b"v2".to_vec()))));

    assert_eq!(m.len(), 1);
    let p = m.find_partition(&key).unwrap();
    let cell = p.row(&ck("r")).unwrap().cells.cell_at(0).unwrap();
    assert_eq!(cell.as_atomic_cell().unwrap().value(), Some(&b"v2"[..]));
    assert!(m.approx_size() > 0);
}

#[test]
fn partitions_iterate_in_decorated_key_order() {
    let schema = schema();
    let mut m = Memtable::new(schema.clone());
    for i in 0..100u32 {
        let key = schema.decorate_key(format!("key{i}").into_bytes());
        m.apply(Mutation::new(key, row_with(0, AtomicCell::live(1, b"v".to_vec()))));
    }
    let keys: Vec<_> = m.all_partitions().map(|(k, _)| k.clone()).collect();
    assert_eq!(keys.len(), 100);
    assert!(keys.windows(2).all(|w| w[0] < w[1]));

    let drained: Vec<_> = m.into_mutations().map(|m| m.key).collect();
    assert_eq!(drained, keys);
}

#[test]
fn schema_lookups() {
    let schema = schema();
    assert_eq!(schema.static_column_at(0).unwrap().name, "s");
    assert!(schema.regular_column_at(0).unwrap().is_atomic());
    assert!(!schema.regular_column_at(1).unwrap().is_atomic());
    assert!(schema.regular_column_at(2).is_none());
    assert_eq!(schema.column_by_name("tags").unwrap().id, 1);
}

#[test]
fn empty_memtable() {
    let m = Memtable::new(schema());
    assert!(m.is_empty());
    assert_eq!(m.len(), 0);
}
