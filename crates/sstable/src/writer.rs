use std::collections::BTreeSet;
use std::fs::File;
use std::io::{BufWriter, Write};

use bloom::get_filter;
use config::SSTableConfig;
use memtable::{DecoratedKey, Memtable, Mutation, Schema};
use tracing::{debug, info};

use crate::codec::{DiskString, Encode};
use crate::component::{ComponentType, Descriptor};
use crate::compress::{ChecksummedWriter, CompressedWriter, Compression, Compressor};
use crate::error::{Error, Result};
use crate::format::write_partition_body;
use crate::merge::{MemtableSource, PartitionSource};
use crate::metadata_collector::{ColumnStats, MetadataCollector};
use crate::types::{
    IndexEntry, MetadataComponent, Statistics, Summary, SummaryEntry, ValidationMetadata,
};

/// Data.db sink, chosen once per table from the schema's compressor.
enum DataWriter {
    Compressed(CompressedWriter<BufWriter<File>>),
    Checksummed(ChecksummedWriter<BufWriter<File>>),
}

impl DataWriter {
    fn position(&self) -> u64 {
        match self {
            DataWriter::Compressed(w) => w.position(),
            DataWriter::Checksummed(w) => w.position(),
        }
    }

    fn write_all(&mut self, data: &[u8]) -> Result<()> {
        match self {
            DataWriter::Compressed(w) => w.write_all(data),
            DataWriter::Checksummed(w) => w.write_all(data),
        }
    }
}

/// Writes one table generation from a sorted partition source.
///
/// Component order: Index and Data are streamed together, then Statistics,
/// CompressionInfo or CRC, Digest, Filter and Summary, and TOC.txt last. A
/// table without a TOC is never loaded, so a failed write leaves nothing
/// that looks complete.
pub struct SSTableWriter<'a> {
    descriptor: &'a Descriptor,
    schema: &'a Schema,
    config: &'a SSTableConfig,
}

impl<'a> SSTableWriter<'a> {
    pub fn new(descriptor: &'a Descriptor, schema: &'a Schema, config: &'a SSTableConfig) -> Self {
        Self {
            descriptor,
            schema,
            config,
        }
    }

    /// Flushes `mem` to a new table.
    ///
    /// # Errors
    ///
    /// Fails on an invalid config, on an empty memtable, on an existing table
    /// of the same generation, and on any I/O or serialization failure.
    pub fn write_from_memtable(&self, mem: &Memtable) -> Result<()> {
        let mut source = MemtableSource::new(mem);
        self.write_from_source(&mut source, mem.len())
    }

    /// Streams `source` into a new table. `expected_count` sizes the bloom
    /// filter; over-estimating is safe.
    pub fn write_from_source(
        &self,
        source: &mut dyn PartitionSource,
        expected_count: usize,
    ) -> Result<()> {
        self.config.validate()?;
        let Some(first) = source.next_partition()? else {
            return Err(Error::malformed(
                self.descriptor.filename(ComponentType::Data),
                "refusing to write an empty sstable",
            ));
        };

        let mut components: BTreeSet<ComponentType> = [
            ComponentType::TOC,
            ComponentType::Statistics,
            ComponentType::Digest,
            ComponentType::Index,
            ComponentType::Summary,
            ComponentType::Data,
        ]
        .into_iter()
        .collect();

        let compression = match Compressor::for_kind(self.schema.compressor) {
            Some(c) => Some(Compression::for_writing(
                c.name(),
                self.config.chunk_length,
                self.config.crc_check_chance,
            )?),
            None => None,
        };
        let mut filter = get_filter(expected_count.max(1), self.schema.bloom_filter_fp_chance)?;
        if !filter.is_always_present() {
            components.insert(ComponentType::Filter);
        }

        let index_file = self.descriptor.create_new(ComponentType::Index)?;
        let data_file = self.descriptor.create_new(ComponentType::Data)?;
        let mut index = BufWriter::with_capacity(self.config.buffer_size, index_file);
        let data = BufWriter::with_capacity(self.config.buffer_size, data_file);
        let mut data = match compression {
            Some(c) => {
                components.insert(ComponentType::CompressionInfo);
                DataWriter::Compressed(CompressedWriter::new(data, c))
            }
            None => {
                components.insert(ComponentType::CRC);
                DataWriter::Checksummed(ChecksummedWriter::new(data, self.config.chunk_length)?)
            }
        };

        let mut summary = Summary::new(self.config.min_index_interval);
        let mut collector = MetadataCollector::new();
        let mut index_position = 0u64;
        let mut written = 0u64;
        let mut last_key: Option<DecoratedKey> = None;
        let mut frame = Vec::new();
        let mut body = Vec::new();
        let mut entry_buf = Vec::new();

        let mut next = Some(first);
        while let Some(Mutation { key, partition }) = next {
            if let Some(prev) = &last_key {
                if key <= *prev {
                    return Err(Error::InvalidRow(format!(
                        "partition {key:?} written after {prev:?}"
                    )));
                }
            }
            let raw_key = key.key();

            if written % u64::from(self.config.min_index_interval) == 0 {
                summary.entries.push(SummaryEntry {
                    key: raw_key.to_vec(),
                    position: index_position,
                });
            }
            filter.add(raw_key);

            entry_buf.clear();
            IndexEntry {
                key: DiskString::new(raw_key),
                position: data.position(),
                promoted_index: DiskString::default(),
            }
            .encode(&mut entry_buf)?;
            index.write_all(&entry_buf)?;
            index_position += entry_buf.len() as u64;

            body.clear();
            write_partition_body(self.schema, &partition, &mut body)?;
            frame.clear();
            DiskString::<u16>::new(raw_key).encode(&mut frame)?;
            let body_len = u32::try_from(body.len()).map_err(|_| Error::Overflow {
                len: body.len(),
                max: u64::from(u32::MAX),
            })?;
            body_len.encode(&mut frame)?;
            frame.extend_from_slice(&body);
            data.write_all(&frame)?;

            collector.update(&ColumnStats::from_partition(&partition, frame.len() as u64));

            if written == 0 {
                summary.first_key = DiskString::new(raw_key);
            }
            written += 1;
            last_key = Some(key);
            next = source.next_partition()?;
        }
        if let Some(k) = &last_key {
            summary.last_key = DiskString::new(k.key());
        }

        index.flush()?;
        index.into_inner().map_err(|e| e.into_error())?.sync_all()?;

        let (digest, compression) = match data {
            DataWriter::Compressed(w) => {
                let (compression, digest, inner) = w.finish()?;
                sync(inner)?;
                collector.add_compression_ratio(
                    compression.compressed_file_length(),
                    compression.data_length(),
                );
                (digest, Some(compression))
            }
            DataWriter::Checksummed(w) => {
                let (checksum, digest, inner) = w.finish()?;
                sync(inner)?;
                let mut buf = Vec::new();
                checksum.encode(&mut buf)?;
                self.descriptor.write_all(ComponentType::CRC, &buf)?;
                (digest, None)
            }
        };

        let mut statistics = Statistics::default();
        statistics.insert(MetadataComponent::Validation(ValidationMetadata {
            partitioner: DiskString::new(self.schema.partitioner.name()),
            filter_chance: self.schema.bloom_filter_fp_chance,
        }));
        statistics.insert(MetadataComponent::Stats(collector.construct_stats()));
        self.write_component(ComponentType::Statistics, &statistics)?;

        if let Some(c) = &compression {
            self.write_component(ComponentType::CompressionInfo, c.info())?;
        }
        self.descriptor
            .write_all(ComponentType::Digest, digest.to_string().as_bytes())?;

        if components.contains(&ComponentType::Filter) {
            let mut buf = Vec::new();
            filter.write_to(&mut buf)?;
            self.descriptor.write_all(ComponentType::Filter, &buf)?;
        }

        summary.finalize()?;
        self.write_component(ComponentType::Summary, &summary)?;

        self.descriptor.write_toc(&components)?;
        info!(
            generation = self.descriptor.generation,
            partitions = written,
            "sstable written"
        );
        Ok(())
    }

    fn write_component(&self, component: ComponentType, value: &dyn Encode) -> Result<()> {
        let mut buf = Vec::new();
        value.encode(&mut buf)?;
        debug!(component = %component, bytes = buf.len(), "encoded component");
        self.descriptor.write_all(component, &buf)
    }
}

fn sync(w: BufWriter<File>) -> Result<()> {
    w.into_inner().map_err(|e| e.into_error())?.sync_all()?;
    Ok(())
}
