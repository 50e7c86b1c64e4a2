mod codec_tests;
mod component_tests;
mod format_tests;

use std::sync::Arc;

use memtable::{
    AtomicCell, ClusteringKey, CollectionMutation, CompressorKind, Memtable, Mutation, Partition,
    Schema, Tombstone,
};

/// Static `s`, regular `v` (id 0), regular collection `tags` (id 1).
pub(crate) fn test_schema(compressor: CompressorKind) -> Schema {
    Schema::builder("ks", "t")
        .static_column("s")
        .regular_column("v")
        .regular_collection("tags")
        .compressor(compressor)
        .build()
}

/// One clustered row `c1` holding `v = value` at `ts`.
pub(crate) fn simple_mutation(schema: &Schema, key: &str, value: &str, ts: i64) -> Mutation {
    let mut p = Partition::new();
    p.apply_row_cell(ClusteringKey::single("c1"), 0, AtomicCell::live(ts, value));
    Mutation::new(schema.decorate_key(key.as_bytes()), p)
}

/// A partition exercising every section of the body format.
pub(crate) fn rich_partition() -> Partition {
    let mut p = Partition::new();
    p.apply_tombstone(Tombstone::new(5, 100));
    p.apply_static_cell(0, AtomicCell::live(10, "static"));
    p.apply_row_tombstone(ClusteringKey::single("b"), Tombstone::new(20, 200));

    p.apply_row_cell(ClusteringKey::new(vec![b"a".to_vec(), b"1".to_vec()]), 0, AtomicCell::live(30, "x"));
    p.apply_row_cell(ClusteringKey::single("c"), 0, AtomicCell::expiring(40, "ttl", 60, 1_000));
    p.apply_row_cell(ClusteringKey::single("d"), 0, AtomicCell::dead(50, 300));

    let mut tags = CollectionMutation::new(Tombstone::new(15, 150));
    tags.insert("k1", AtomicCell::live(25, "v1"));
    tags.insert("k2", AtomicCell::dead(26, 260));
    p.apply_row_cell(ClusteringKey::single("c"), 1, tags);
    p
}

pub(crate) fn memtable_with(schema: &Arc<Schema>, count: usize) -> Memtable {
    let mut mem = Memtable::new(Arc::clone(schema));
    for i in 0..count {
        mem.apply(simple_mutation(schema, &format!("key{i:05}"), &format!("value{i}"), i as i64 + 1));
    }
    mem
}
