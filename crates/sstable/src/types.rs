//! On-disk records of the component files.

use std::collections::BTreeMap;
use std::io::{Cursor, Read, Write};

use byteorder::{ByteOrder, LittleEndian};
use memtable::{Tombstone, MISSING_TIMESTAMP};
use tracing::warn;

use crate::codec::{
    describe_type, read, read_bytes, serialized_size, Decode, DiskArray, DiskHash, DiskString,
    Encode,
};
use crate::error::{Error, Result};
use crate::histogram::{EstimatedHistogram, StreamingHistogram, COLUMN_COUNT_BUCKETS};

/// Tombstone as stored: `local_deletion_time` first. A live (absent)
/// deletion is `(u32::MAX, i64::MIN)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DeletionTime {
    pub local_deletion_time: u32,
    pub marked_for_delete_at: i64,
}

impl DeletionTime {
    pub const LIVE: DeletionTime = DeletionTime {
        local_deletion_time: u32::MAX,
        marked_for_delete_at: i64::MIN,
    };

    pub fn is_live(&self) -> bool {
        self.marked_for_delete_at == MISSING_TIMESTAMP
    }
}

impl Default for DeletionTime {
    fn default() -> Self {
        Self::LIVE
    }
}

impl From<Tombstone> for DeletionTime {
    fn from(t: Tombstone) -> Self {
        if t.is_set() {
            DeletionTime {
                local_deletion_time: t.deletion_time,
                marked_for_delete_at: t.timestamp,
            }
        } else {
            DeletionTime::LIVE
        }
    }
}

impl From<DeletionTime> for Tombstone {
    fn from(d: DeletionTime) -> Self {
        if d.is_live() {
            Tombstone::NONE
        } else {
            Tombstone::new(d.marked_for_delete_at, d.local_deletion_time)
        }
    }
}

describe_type!(DeletionTime {
    local_deletion_time,
    marked_for_delete_at,
});

/// One Index.db entry.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct IndexEntry {
    pub key: DiskString<u16>,
    /// Logical (uncompressed) offset of the partition in Data.db.
    pub position: u64,
    pub promoted_index: DiskString<u32>,
}

describe_type!(IndexEntry {
    key,
    position,
    promoted_index,
});

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct SummaryHeader {
    pub min_index_interval: u32,
    pub size: u32,
    pub memory_size: u64,
    pub sampling_level: u32,
    pub size_at_full_sampling: u32,
}

describe_type!(SummaryHeader {
    min_index_interval,
    size,
    memory_size,
    sampling_level,
    size_at_full_sampling,
});

/// Sampling level recorded for a summary that keeps every sample.
pub const BASE_SAMPLING_LEVEL: u32 = 128;

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct SummaryEntry {
    pub key: Vec<u8>,
    /// Offset of the sampled entry in Index.db.
    pub position: u64,
}

/// Summary.db: every `min_index_interval`-th index entry plus the first and
/// last partition keys.
///
/// Positions and entries are little-endian; positions are relative to the
/// start of the positions array.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Summary {
    pub header: SummaryHeader,
    pub entries: Vec<SummaryEntry>,
    pub first_key: DiskString<u32>,
    pub last_key: DiskString<u32>,
}

impl Summary {
    pub fn new(min_index_interval: u32) -> Self {
        Self {
            header: SummaryHeader {
                min_index_interval,
                sampling_level: BASE_SAMPLING_LEVEL,
                ..SummaryHeader::default()
            },
            ..Summary::default()
        }
    }

    /// Fixes up `size` and `memory_size` after the last entry was added.
    pub fn finalize(&mut self) -> Result<()> {
        let n = self.entries.len();
        self.header.size = u32::try_from(n).map_err(|_| Error::Overflow {
            len: n,
            max: u64::from(u32::MAX),
        })?;
        self.header.size_at_full_sampling = self.header.size;
        let entry_bytes: usize = self.entries.iter().map(|e| e.key.len() + 8).sum();
        self.header.memory_size = (n * 4 + entry_bytes) as u64;
        Ok(())
    }
}

impl Encode for Summary {
    fn encode(&self, w: &mut dyn Write) -> Result<()> {
        self.header.encode(w)?;
        let n = self.entries.len();
        let mut pos = n * 4;
        let mut positions = vec![0u8; n * 4];
        for (i, e) in self.entries.iter().enumerate() {
            let p = u32::try_from(pos).map_err(|_| Error::Overflow {
                len: pos,
                max: u64::from(u32::MAX),
            })?;
            LittleEndian::write_u32(&mut positions[i * 4..], p);
            pos += e.key.len() + 8;
        }
        w.write_all(&positions)?;
        for e in &self.entries {
            w.write_all(&e.key)?;
            w.write_all(&e.position.to_le_bytes())?;
        }
        self.first_key.encode(w)?;
        self.last_key.encode(w)?;
        Ok(())
    }
}

impl Decode for Summary {
    fn decode(&mut self, r: &mut dyn Read) -> Result<()> {
        self.header.decode(r)?;
        let n = self.header.size as usize;
        let region = usize::try_from(self.header.memory_size)
            .map_err(|_| Error::Corrupt("summary memory size too large".into()))?;
        let bytes = read_bytes(r, region)?;
        if n * 4 > bytes.len() {
            return Err(Error::short_read(n * 4, bytes.len()));
        }
        let mut positions = vec![0u32; n];
        LittleEndian::read_u32_into(&bytes[..n * 4], &mut positions);

        self.entries = Vec::with_capacity(n);
        for i in 0..n {
            let start = positions[i] as usize;
            let end = positions.get(i + 1).map_or(bytes.len(), |p| *p as usize);
            if start < n * 4 || end > bytes.len() || end < start + 8 {
                return Err(Error::Corrupt(format!(
                    "summary entry {i} spans {start}..{end} of {}",
                    bytes.len()
                )));
            }
            self.entries.push(SummaryEntry {
                key: bytes[start..end - 8].to_vec(),
                position: LittleEndian::read_u64(&bytes[end - 8..end]),
            });
        }
        self.first_key.decode(r)?;
        self.last_key.decode(r)?;
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum MetadataType {
    Validation = 0,
    Compaction = 1,
    Stats = 2,
}

impl MetadataType {
    fn from_u32(v: u32) -> Option<Self> {
        match v {
            0 => Some(MetadataType::Validation),
            1 => Some(MetadataType::Compaction),
            2 => Some(MetadataType::Stats),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct ValidationMetadata {
    pub partitioner: DiskString<u16>,
    pub filter_chance: f64,
}

describe_type!(ValidationMetadata {
    partitioner,
    filter_chance,
});

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct CompactionMetadata {
    pub ancestors: DiskArray<u32, u32>,
    pub cardinality: DiskArray<u32, u8>,
}

describe_type!(CompactionMetadata {
    ancestors,
    cardinality,
});

/// Commit log position; `(u64::MAX, 0)` for tables not flushed from a log.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReplayPosition {
    pub segment: u64,
    pub position: u32,
}

impl ReplayPosition {
    pub const NONE: ReplayPosition = ReplayPosition {
        segment: u64::MAX,
        position: 0,
    };
}

impl Default for ReplayPosition {
    fn default() -> Self {
        Self::NONE
    }
}

describe_type!(ReplayPosition { segment, position });

#[derive(Debug, Clone, PartialEq)]
pub struct StatsMetadata {
    pub estimated_row_size: EstimatedHistogram,
    pub estimated_column_count: EstimatedHistogram,
    pub position: ReplayPosition,
    pub min_timestamp: i64,
    pub max_timestamp: i64,
    pub max_local_deletion_time: i32,
    pub compression_ratio: f64,
    pub estimated_tombstone_drop_time: StreamingHistogram,
    pub sstable_level: u32,
    pub repaired_at: u64,
    pub min_column_names: DiskArray<u32, DiskString<u16>>,
    pub max_column_names: DiskArray<u32, DiskString<u16>>,
    pub has_legacy_counter_shards: bool,
}

impl Default for StatsMetadata {
    fn default() -> Self {
        Self {
            estimated_row_size: EstimatedHistogram::default(),
            estimated_column_count: EstimatedHistogram::new(COLUMN_COUNT_BUCKETS),
            position: ReplayPosition::NONE,
            min_timestamp: i64::MAX,
            max_timestamp: i64::MIN,
            max_local_deletion_time: i32::MIN,
            compression_ratio: crate::metadata_collector::NO_COMPRESSION_RATIO,
            estimated_tombstone_drop_time: StreamingHistogram::default(),
            sstable_level: 0,
            repaired_at: 0,
            min_column_names: DiskArray::default(),
            max_column_names: DiskArray::default(),
            has_legacy_counter_shards: false,
        }
    }
}

describe_type!(StatsMetadata {
    estimated_row_size,
    estimated_column_count,
    position,
    min_timestamp,
    max_timestamp,
    max_local_deletion_time,
    compression_ratio,
    estimated_tombstone_drop_time,
    sstable_level,
    repaired_at,
    min_column_names,
    max_column_names,
    has_legacy_counter_shards,
});

#[derive(Debug, Clone, PartialEq)]
pub enum MetadataComponent {
    Validation(ValidationMetadata),
    Compaction(CompactionMetadata),
    Stats(StatsMetadata),
}

impl MetadataComponent {
    fn kind(&self) -> MetadataType {
        match self {
            MetadataComponent::Validation(_) => MetadataType::Validation,
            MetadataComponent::Compaction(_) => MetadataType::Compaction,
            MetadataComponent::Stats(_) => MetadataType::Stats,
        }
    }

    fn as_encode(&self) -> &dyn Encode {
        match self {
            MetadataComponent::Validation(m) => m,
            MetadataComponent::Compaction(m) => m,
            MetadataComponent::Stats(m) => m,
        }
    }
}

/// Statistics.db: a `type -> offset` directory followed by the records.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Statistics {
    pub contents: BTreeMap<MetadataType, MetadataComponent>,
}

impl Statistics {
    pub fn insert(&mut self, component: MetadataComponent) {
        self.contents.insert(component.kind(), component);
    }

    pub fn validation(&self) -> Option<&ValidationMetadata> {
        match self.contents.get(&MetadataType::Validation) {
            Some(MetadataComponent::Validation(m)) => Some(m),
            _ => None,
        }
    }

    pub fn compaction(&self) -> Option<&CompactionMetadata> {
        match self.contents.get(&MetadataType::Compaction) {
            Some(MetadataComponent::Compaction(m)) => Some(m),
            _ => None,
        }
    }

    pub fn stats(&self) -> Option<&StatsMetadata> {
        match self.contents.get(&MetadataType::Stats) {
            Some(MetadataComponent::Stats(m)) => Some(m),
            _ => None,
        }
    }

    /// Builds the directory. Record offsets are known before any record is
    /// written because every size is computed up front.
    fn directory(&self) -> Result<DiskHash<u32, u32, u32>> {
        let mut offset = 4 + 8 * self.contents.len() as u64;
        let mut map = BTreeMap::new();
        for (kind, component) in &self.contents {
            let at = u32::try_from(offset).map_err(|_| Error::Overflow {
                len: offset as usize,
                max: u64::from(u32::MAX),
            })?;
            map.insert(*kind as u32, at);
            offset += serialized_size(component.as_encode())?;
        }
        Ok(DiskHash::new(map))
    }

    /// Parses a whole Statistics.db image. Unknown record types are skipped.
    pub fn parse(buf: &[u8]) -> Result<Self> {
        let mut cursor = Cursor::new(buf);
        let directory: DiskHash<u32, u32, u32> = read(&mut cursor)?;

        let mut by_offset: Vec<(u32, u32)> = directory.map.iter().map(|(t, o)| (*o, *t)).collect();
        by_offset.sort_unstable();

        let mut out = Statistics::default();
        for (offset, raw_type) in by_offset {
            let Some(kind) = MetadataType::from_u32(raw_type) else {
                warn!(metadata_type = raw_type, "invalid metadata type in Statistics.db, skipping");
                continue;
            };
            if offset as usize > buf.len() {
                return Err(Error::short_read(offset as usize, buf.len()));
            }
            cursor.set_position(u64::from(offset));
            let component = match kind {
                MetadataType::Validation => MetadataComponent::Validation(read(&mut cursor)?),
                MetadataType::Compaction => MetadataComponent::Compaction(read(&mut cursor)?),
                MetadataType::Stats => MetadataComponent::Stats(read(&mut cursor)?),
            };
            out.contents.insert(kind, component);
        }
        Ok(out)
    }
}

impl Encode for Statistics {
    fn encode(&self, w: &mut dyn Write) -> Result<()> {
        self.directory()?.encode(w)?;
        for component in self.contents.values() {
            component.as_encode().encode(w)?;
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct CompressionOption {
    pub key: DiskString<u16>,
    pub value: DiskString<u16>,
}

describe_type!(CompressionOption { key, value });

/// CompressionInfo.db as stored.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct CompressionInfo {
    pub name: DiskString<u16>,
    pub options: DiskArray<u32, CompressionOption>,
    pub chunk_length: u32,
    /// Total uncompressed length.
    pub data_length: u64,
    pub offsets: DiskArray<u32, u64>,
}

describe_type!(CompressionInfo {
    name,
    options,
    chunk_length,
    data_length,
    offsets,
});

/// CRC.db: the chunk size followed by one Adler-32 per chunk, up to EOF.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Checksum {
    pub chunk_size: u32,
    pub checksums: Vec<u32>,
}

impl Encode for Checksum {
    fn encode(&self, w: &mut dyn Write) -> Result<()> {
        self.chunk_size.encode(w)?;
        for c in &self.checksums {
            c.encode(w)?;
        }
        Ok(())
    }
}

impl Checksum {
    pub fn parse(buf: &[u8]) -> Result<Self> {
        if buf.len() < 4 || (buf.len() - 4) % 4 != 0 {
            return Err(Error::Corrupt(format!("CRC.db has odd length {}", buf.len())));
        }
        let chunk_size = byteorder::BigEndian::read_u32(&buf[..4]);
        let mut checksums = vec![0u32; (buf.len() - 4) / 4];
        byteorder::BigEndian::read_u32_into(&buf[4..], &mut checksums);
        Ok(Self {
            chunk_size,
            checksums,
        })
    }
}
