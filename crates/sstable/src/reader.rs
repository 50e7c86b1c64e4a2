use std::cmp::Ordering;
use std::collections::BTreeSet;
use std::fs::File;
use std::io::{self, BufReader, Cursor, Seek, SeekFrom};
use std::sync::{Mutex, MutexGuard};

use bloom::{AlwaysPresentFilter, BloomFilter, Filter};
use memtable::{DecoratedKey, Mutation, PartitionerKind, Schema};
use tracing::{debug, info};

use crate::codec::{read, read_fully};
use crate::component::{ComponentType, Descriptor};
use crate::compress::{adler32, Compression};
use crate::error::{Error, Result};
use crate::format::read_partition_body;
use crate::key::Key;
use crate::merge::PartitionSource;
use crate::types::{Checksum, CompressionInfo, IndexEntry, Statistics, Summary, SummaryEntry};

/// Data.db behind a logical (uncompressed) address space. The last
/// decompressed chunk is kept, so sequential reads decompress each chunk once.
struct DataFile {
    file: BufReader<File>,
    cached_chunk: Option<u64>,
    chunk: Vec<u8>,
}

impl DataFile {
    fn read_at(&mut self, compression: Option<&Compression>, mut position: u64, len: usize) -> Result<Vec<u8>> {
        let mut out = vec![0u8; len];
        let Some(compression) = compression else {
            self.file.seek(SeekFrom::Start(position))?;
            read_fully(&mut self.file, &mut out)?;
            return Ok(out);
        };

        let mut filled = 0;
        while filled < len {
            let loc = compression.locate(position)?;
            if self.cached_chunk != Some(loc.chunk_start) {
                self.chunk = compression.read_chunk(&mut self.file, loc)?;
                self.cached_chunk = Some(loc.chunk_start);
            }
            let available = self.chunk.get(loc.offset..).unwrap_or_default();
            let take = available.len().min(len - filled);
            if take == 0 {
                return Err(Error::short_read(len, filled));
            }
            out[filled..filled + take].copy_from_slice(&available[..take]);
            filled += take;
            position += take as u64;
        }
        Ok(out)
    }
}

/// One partition frame as stored in Data.db.
struct Frame {
    key: Vec<u8>,
    body: Vec<u8>,
    next: u64,
}

/// A loaded, immutable table.
///
/// The summary, statistics and filter live in memory. Index.db and Data.db
/// stay on disk behind persistent handles wrapped in a `Mutex`, so lookups
/// work through a shared `&self`.
pub struct SSTable {
    descriptor: Descriptor,
    components: BTreeSet<ComponentType>,
    statistics: Statistics,
    /// Partitioner recorded in Statistics.db, if the table has validation metadata.
    partitioner: Option<PartitionerKind>,
    compression: Option<Compression>,
    filter: Box<dyn Filter>,
    summary: Summary,
    index: Mutex<BufReader<File>>,
    index_size: u64,
    data: Mutex<DataFile>,
    data_size: u64,
    /// Length of the logical data stream: Data.db itself, or the total
    /// uncompressed length for a compressed table.
    data_length: u64,
}

impl SSTable {
    /// Loads the table named by `descriptor`.
    ///
    /// Order: TOC, Statistics, CompressionInfo, Filter, Summary, then the
    /// Index and Data handles. Compression metadata is completed last since
    /// it needs the size of Data.db.
    ///
    /// # Errors
    ///
    /// [`Error::Malformed`] for a missing or empty TOC, a missing required
    /// component, or any structurally invalid component.
    pub fn load(descriptor: Descriptor) -> Result<Self> {
        let components = descriptor.read_toc()?;
        for required in ComponentType::REQUIRED {
            if !components.contains(&required) {
                return Err(Error::malformed(
                    descriptor.filename(ComponentType::TOC),
                    format!("missing required component {required}"),
                ));
            }
        }

        let statistics = Statistics::parse(&descriptor.read_all(ComponentType::Statistics)?)?;
        let partitioner = match statistics.validation() {
            Some(v) => {
                let name = v.partitioner.to_string_lossy();
                let kind = PartitionerKind::from_name(&name).ok_or_else(|| {
                    Error::malformed(
                        descriptor.filename(ComponentType::Statistics),
                        format!("unknown partitioner {name}"),
                    )
                })?;
                Some(kind)
            }
            None => None,
        };

        let mut compression = if components.contains(&ComponentType::CompressionInfo) {
            let path = descriptor.filename(ComponentType::CompressionInfo);
            let buf = descriptor.read_all(ComponentType::CompressionInfo)?;
            let info: CompressionInfo = read(&mut Cursor::new(&buf[..]))?;
            Some(Compression::from_info(info, &path)?)
        } else {
            None
        };

        let filter: Box<dyn Filter> = if components.contains(&ComponentType::Filter) {
            let path = descriptor.filename(ComponentType::Filter);
            let buf = descriptor.read_all(ComponentType::Filter)?;
            let bloom = BloomFilter::read_from(&mut Cursor::new(buf))
                .map_err(|e| Error::malformed(&path, e.to_string()))?;
            Box::new(bloom)
        } else {
            Box::new(AlwaysPresentFilter)
        };

        let summary_path = descriptor.filename(ComponentType::Summary);
        let summary: Summary = read(&mut Cursor::new(&descriptor.read_all(ComponentType::Summary)?[..]))?;
        if summary.entries.is_empty() {
            return Err(Error::malformed(summary_path, "summary has no entries"));
        }
        if summary.header.min_index_interval == 0 {
            return Err(Error::malformed(summary_path, "zero index interval"));
        }

        let index_file = descriptor.open(ComponentType::Index)?;
        let index_size = index_file.metadata()?.len();
        let data_file = descriptor.open(ComponentType::Data)?;
        let data_size = data_file.metadata()?.len();
        if data_size == 0 {
            return Err(Error::malformed(descriptor.filename(ComponentType::Data), "empty data file"));
        }

        let data_length = match &mut compression {
            Some(c) => {
                c.update(data_size, &descriptor.filename(ComponentType::CompressionInfo))?;
                c.data_length()
            }
            None => data_size,
        };

        info!(
            generation = descriptor.generation,
            summary_entries = summary.entries.len(),
            data_size,
            compressed = compression.is_some(),
            "sstable loaded"
        );

        Ok(Self {
            descriptor,
            components,
            statistics,
            partitioner,
            compression,
            filter,
            summary,
            index: Mutex::new(BufReader::new(index_file)),
            index_size,
            data: Mutex::new(DataFile {
                file: BufReader::new(data_file),
                cached_chunk: None,
                chunk: Vec::new(),
            }),
            data_size,
            data_length,
        })
    }

    /// Point lookup: filter, then summary, then index, then data.
    ///
    /// Returns `Ok(None)` when the table does not hold `key`.
    ///
    /// # Errors
    ///
    /// [`Error::Malformed`] if `schema` uses a different partitioner than the
    /// one the table was written with.
    pub fn read_partition(&self, schema: &Schema, key: &DecoratedKey) -> Result<Option<Mutation>> {
        self.check_partitioner(schema)?;
        if !self.filter.contains(key.key()) {
            debug!(?key, "filter rejects key");
            return Ok(None);
        }
        let Some(position) = self.index_position(schema.partitioner, key)? else {
            return Ok(None);
        };

        let frame = self.read_frame(position)?;
        if frame.key != key.key() {
            return Err(Error::Corrupt(format!(
                "index entry for {key:?} points at a different partition"
            )));
        }
        let partition = read_partition_body(schema, &frame.body)?;
        Ok(Some(Mutation::new(key.clone(), partition)))
    }

    /// Finds the data position of `key` by scanning the index block that
    /// the summary says may hold it.
    fn index_position(&self, partitioner: PartitionerKind, key: &DecoratedKey) -> Result<Option<u64>> {
        let block = self
            .summary
            .entries
            .partition_point(|e| compare_raw(partitioner, &e.key, key) != Ordering::Greater);
        let Some(sample) = block.checked_sub(1).and_then(|i| self.summary.entries.get(i)) else {
            return Ok(None);
        };

        let interval = self.summary.header.min_index_interval as usize;
        for entry in self.read_indexes(sample.position, interval)? {
            match compare_raw(partitioner, entry.key.as_bytes(), key) {
                Ordering::Less => continue,
                Ordering::Equal => return Ok(Some(entry.position)),
                Ordering::Greater => break,
            }
        }
        Ok(None)
    }

    /// Reads up to `quantity` index entries starting at `position` in
    /// Index.db. Stops early at end of file.
    ///
    /// # Errors
    ///
    /// [`Error::SizeMismatch`] if the file ends inside an entry.
    pub fn read_indexes(&self, position: u64, quantity: usize) -> Result<Vec<IndexEntry>> {
        let mut file = lock(&self.index)?;
        file.seek(SeekFrom::Start(position))?;
        let mut at = position;
        let mut entries = Vec::with_capacity(quantity.min(1024));
        while entries.len() < quantity && at < self.index_size {
            entries.push(read::<IndexEntry>(&mut *file)?);
            at = file.stream_position()?;
        }
        Ok(entries)
    }

    fn read_frame(&self, position: u64) -> Result<Frame> {
        let compression = self.compression.as_ref();
        let mut data = lock(&self.data)?;

        let key_len = u64::from(u16::from_be_bytes(fixed(data.read_at(compression, position, 2)?)?));
        let key = data.read_at(compression, position + 2, key_len as usize)?;
        let len_at = position + 2 + key_len;
        let body_len = u64::from(u32::from_be_bytes(fixed(data.read_at(compression, len_at, 4)?)?));
        let body_at = len_at + 4;

        let remaining = self.data_length.saturating_sub(body_at);
        if body_len > remaining {
            return Err(Error::short_read(body_len as usize, remaining as usize));
        }
        let body = data.read_at(compression, body_at, body_len as usize)?;
        Ok(Frame {
            key,
            body,
            next: body_at + body_len,
        })
    }

    /// A source yielding every partition of the table in order.
    ///
    /// # Errors
    ///
    /// [`Error::Malformed`] on a partitioner mismatch, as for
    /// [`read_partition`](SSTable::read_partition).
    pub fn scanner<'a>(&'a self, schema: &'a Schema) -> Result<SSTableScanner<'a>> {
        self.check_partitioner(schema)?;
        Ok(SSTableScanner {
            table: self,
            schema,
            position: 0,
        })
    }

    fn check_partitioner(&self, schema: &Schema) -> Result<()> {
        match self.partitioner {
            Some(p) if p != schema.partitioner => Err(Error::malformed(
                self.descriptor.filename(ComponentType::Statistics),
                format!(
                    "table uses {} but schema uses {}",
                    p.name(),
                    schema.partitioner.name()
                ),
            )),
            _ => Ok(()),
        }
    }

    /// Re-reads Data.db and checks it against CRC.db, Digest.sha1 and the
    /// per-chunk checksums of a compressed table.
    ///
    /// # Errors
    ///
    /// [`Error::ChecksumMismatch`] naming the first bad chunk.
    pub fn verify(&self) -> Result<()> {
        let bytes = self.descriptor.read_all(ComponentType::Data)?;

        if let Some(compression) = self.compression() {
            let offsets = compression.offsets();
            for (i, start) in offsets.iter().enumerate() {
                let end = offsets.get(i + 1).copied().unwrap_or(bytes.len() as u64);
                let chunk = bytes
                    .get(*start as usize..end as usize)
                    .filter(|c| c.len() >= 4)
                    .ok_or(Error::short_read(end as usize, bytes.len()))?;
                let (payload, trailer) = chunk.split_at(chunk.len() - 4);
                let expected = u32::from_be_bytes(fixed(trailer.to_vec())?);
                check(*start, expected, adler32(payload))?;
            }
        } else if self.has_component(ComponentType::CRC) {
            let checksum = Checksum::parse(&self.descriptor.read_all(ComponentType::CRC)?)?;
            if checksum.chunk_size == 0 {
                return Err(Error::malformed(
                    self.descriptor.filename(ComponentType::CRC),
                    "zero chunk size",
                ));
            }
            let chunks: Vec<&[u8]> = bytes.chunks(checksum.chunk_size as usize).collect();
            if chunks.len() != checksum.checksums.len() {
                return Err(Error::malformed(
                    self.descriptor.filename(ComponentType::CRC),
                    format!("{} checksums for {} chunks", checksum.checksums.len(), chunks.len()),
                ));
            }
            for (i, (chunk, expected)) in chunks.iter().zip(&checksum.checksums).enumerate() {
                check(i as u64 * u64::from(checksum.chunk_size), *expected, adler32(chunk))?;
            }
        }

        if self.has_component(ComponentType::Digest) {
            let path = self.descriptor.filename(ComponentType::Digest);
            let text = String::from_utf8(self.descriptor.read_all(ComponentType::Digest)?)
                .map_err(|_| Error::malformed(&path, "digest is not UTF-8"))?;
            let expected: u32 = text
                .trim()
                .parse()
                .map_err(|_| Error::malformed(&path, format!("bad digest {text:?}")))?;
            check(0, expected, adler32(&bytes))?;
        }
        debug!(generation = self.descriptor.generation, "sstable verified");
        Ok(())
    }

    pub fn descriptor(&self) -> &Descriptor {
        &self.descriptor
    }

    /// Size of Data.db on disk.
    pub fn data_size(&self) -> u64 {
        self.data_size
    }

    pub fn first_key(&self) -> Key {
        Key::from_bytes(self.summary.first_key.value.clone())
    }

    pub fn last_key(&self) -> Key {
        Key::from_bytes(self.summary.last_key.value.clone())
    }

    pub fn summary_len(&self) -> usize {
        self.summary.entries.len()
    }

    /// # Errors
    ///
    /// [`Error::OutOfRange`] for `i >= summary_len()`.
    pub fn read_summary_entry(&self, i: usize) -> Result<&SummaryEntry> {
        self.summary.entries.get(i).ok_or(Error::OutOfRange {
            what: "summary entry",
            index: i,
            len: self.summary.entries.len(),
        })
    }

    pub fn components(&self) -> &BTreeSet<ComponentType> {
        &self.components
    }

    pub fn has_component(&self, component: ComponentType) -> bool {
        self.components.contains(&component)
    }

    pub fn statistics(&self) -> &Statistics {
        &self.statistics
    }

    pub fn partitioner(&self) -> Option<PartitionerKind> {
        self.partitioner
    }

    pub fn compression(&self) -> Option<&Compression> {
        self.compression.as_ref()
    }
}

/// Sequential [`PartitionSource`] over a whole table.
pub struct SSTableScanner<'a> {
    table: &'a SSTable,
    schema: &'a Schema,
    position: u64,
}

impl PartitionSource for SSTableScanner<'_> {
    fn next_partition(&mut self) -> Result<Option<Mutation>> {
        if self.position >= self.table.data_length {
            return Ok(None);
        }
        let frame = self.table.read_frame(self.position)?;
        self.position = frame.next;
        let partition = read_partition_body(self.schema, &frame.body)?;
        Ok(Some(Mutation::new(self.schema.decorate_key(frame.key), partition)))
    }
}

/// Orders a raw partition key against a decorated one.
fn compare_raw(partitioner: PartitionerKind, raw: &[u8], key: &DecoratedKey) -> Ordering {
    partitioner
        .token(raw)
        .cmp(&key.token)
        .then_with(|| raw.cmp(key.key()))
}

fn fixed<const N: usize>(bytes: Vec<u8>) -> Result<[u8; N]> {
    let len = bytes.len();
    bytes.try_into().map_err(|_| Error::short_read(N, len))
}

fn check(chunk_offset: u64, expected: u32, actual: u32) -> Result<()> {
    if expected != actual {
        return Err(Error::ChecksumMismatch {
            chunk_offset,
            expected,
            actual,
        });
    }
    Ok(())
}

fn lock<T>(m: &Mutex<T>) -> Result<MutexGuard<'_, T>> {
    m.lock()
        .map_err(|e| Error::Io(io::Error::other(format!("lock poisoned: {e}"))))
}
