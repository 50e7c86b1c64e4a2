//! # SSTable - Sorted String Table
//!
//! Immutable, on-disk tables of partitions. A table is written once from a
//! sorted source (usually a flushed [`memtable::Memtable`] or a merge of
//! older tables) and is never modified afterwards, only replaced.
//!
//! ## Components
//!
//! One table generation is a set of sibling files named
//! `<version>-<generation>-<format>-<component>`:
//!
//! ```text
//! ┌──────────────────────┬────────────────────────────────────────────────┐
//! │ Data.db              │ partition frames, in decorated-key order,      │
//! │                      │ optionally chunk-compressed                    │
//! │ Index.db             │ (key, data position) for every partition       │
//! │ Summary.db           │ every n-th index entry, plus first/last key    │
//! │ Filter.db            │ bloom filter over partition keys (optional)    │
//! │ Statistics.db        │ validation + stats metadata                    │
//! │ CompressionInfo.db   │ codec, chunk length, chunk offsets (optional)  │
//! │ CRC.db               │ per-chunk Adler-32 of uncompressed Data.db     │
//! │ Digest.sha1          │ Adler-32 of the whole Data.db, in decimal      │
//! │ TOC.txt              │ the component list, written last               │
//! └──────────────────────┴────────────────────────────────────────────────┘
//! ```
//!
//! All multi-byte integers are big-endian except the Summary.db position
//! array and entry positions, which are little-endian.
//!
//! ## Reading
//!
//! [`SSTable::load`] reads the TOC first; a table without one does not exist.
//! A point lookup goes filter → summary → index → data and decodes the
//! partition through the [`format::PartitionVisitor`] interface.
//!
//! ## Merging
//!
//! [`MergeReader`] combines any number of [`PartitionSource`]s (memtables,
//! table scanners, other merges) into one ascending stream, folding
//! partitions that share a key.

pub mod codec;
pub mod component;
pub mod compress;
pub mod error;
pub mod format;
pub mod histogram;
pub mod key;
pub mod merge;
pub mod metadata_collector;
mod reader;
pub mod types;
mod writer;

pub use component::{ComponentType, Descriptor};
pub use compress::{Compression, Compressor};
pub use error::{Error, Result};
pub use merge::{EmptySource, MemtableSource, MergeReader, PartitionSource, VecSource};
pub use metadata_collector::{ColumnStats, MetadataCollector};
pub use reader::{SSTable, SSTableScanner};
pub use writer::SSTableWriter;

#[cfg(test)]
mod tests;
