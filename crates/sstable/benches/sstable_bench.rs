use std::sync::Arc;

use config::SSTableConfig;
use criterion::{criterion_group, criterion_main, BatchSize, Criterion};
use memtable::{AtomicCell, ClusteringKey, CompressorKind, Memtable, Mutation, Partition, Schema};
use sstable::{Descriptor, MemtableSource, MergeReader, PartitionSource, SSTable, SSTableWriter};
use tempfile::tempdir;

const N_KEYS: usize = 10_000;
const VALUE_SIZE: usize = 100;

fn schema(compressor: CompressorKind) -> Arc<Schema> {
    Arc::new(
        Schema::builder("bench", "t")
            .regular_column("v")
            .compressor(compressor)
            .build(),
    )
}

fn build_memtable(schema: &Arc<Schema>, prefix: &str, ts: i64) -> Memtable {
    let mut mem = Memtable::new(Arc::clone(schema));
    for i in 0..N_KEYS {
        let mut p = Partition::new();
        p.apply_row_cell(ClusteringKey::single("r"), 0, AtomicCell::live(ts, vec![b'x'; VALUE_SIZE]));
        mem.apply(Mutation::new(schema.decorate_key(format!("{prefix}{i}")), p));
    }
    mem
}

fn sstable_write_benchmark(c: &mut Criterion) {
    for compressor in [CompressorKind::None, CompressorKind::Lz4] {
        let schema = schema(compressor);
        let config = SSTableConfig::default();
        c.bench_function(&format!("sstable_write_10k_{compressor:?}"), |b| {
            b.iter_batched(
                || (tempdir().unwrap(), build_memtable(&schema, "key", 1)),
                |(dir, mem)| {
                    let d = Descriptor::new(dir.path(), 1);
                    SSTableWriter::new(&d, &schema, &config)
                        .write_from_memtable(&mem)
                        .unwrap();
                },
                BatchSize::SmallInput,
            );
        });
    }
}

fn sstable_lookup_benchmark(c: &mut Criterion) {
    let schema = schema(CompressorKind::Lz4);
    let dir = tempdir().unwrap();
    let d = Descriptor::new(dir.path(), 1);
    SSTableWriter::new(&d, &schema, &SSTableConfig::default())
        .write_from_memtable(&build_memtable(&schema, "key", 1))
        .unwrap();
    let table = SSTable::load(d).unwrap();

    let hits: Vec<_> = (0..N_KEYS).map(|i| schema.decorate_key(format!("key{i}"))).collect();
    let misses: Vec<_> = (0..N_KEYS).map(|i| schema.decorate_key(format!("missing{i}"))).collect();

    c.bench_function("sstable_read_partition_hit_10k", |b| {
        b.iter(|| {
            for key in &hits {
                assert!(table.read_partition(&schema, key).unwrap().is_some());
            }
        });
    });
    c.bench_function("sstable_read_partition_miss_10k", |b| {
        b.iter(|| {
            for key in &misses {
                assert!(table.read_partition(&schema, key).unwrap().is_none());
            }
        });
    });
}

fn merge_benchmark(c: &mut Criterion) {
    let schema = schema(CompressorKind::None);
    c.bench_function("merge_three_memtables_10k", |b| {
        b.iter_batched(
            || {
                (
                    build_memtable(&schema, "key", 1),
                    build_memtable(&schema, "key", 2),
                    build_memtable(&schema, "other", 3),
                )
            },
            |(first, second, third)| {
                let sources: Vec<Box<dyn PartitionSource>> = vec![
                    Box::new(MemtableSource::owned(first)),
                    Box::new(MemtableSource::owned(second)),
                    Box::new(MemtableSource::owned(third)),
                ];
                let merged = MergeReader::new(sources).collect_all().unwrap();
                assert_eq!(merged.len(), 2 * N_KEYS);
            },
            BatchSize::LargeInput,
        );
    });
}

criterion_group!(
    benches,
    sstable_write_benchmark,
    sstable_lookup_benchmark,
    merge_benchmark
);
criterion_main!(benches);
