use std::io;
use std::path::PathBuf;

use bloom::FilterError;
use config::ConfigError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    #[error("i/o error: {0}")]
    Io(#[from] io::Error),

    /// A component is missing, empty, or structurally invalid.
    #[error("malformed sstable {}: {reason}", path.display())]
    Malformed { path: PathBuf, reason: String },

    /// A read returned fewer bytes than the format requires.
    #[error("buffer improperly sized to hold requested data: got {actual}, expected {expected}")]
    SizeMismatch { expected: usize, actual: usize },

    #[error("checksum mismatch in chunk at offset {chunk_offset}: expected {expected:#010x}, got {actual:#010x}")]
    ChecksumMismatch {
        chunk_offset: u64,
        expected: u32,
        actual: u32,
    },

    #[error("unsupported compression type {0}")]
    UnsupportedCompression(String),

    #[error("compressor {0} cannot compress")]
    UnsupportedCompressor(String),

    /// A length does not fit its on-disk size field.
    #[error("length {len} overflows size field (max {max})")]
    Overflow { len: usize, max: u64 },

    #[error("{what} index {index} out of range (len {len})")]
    OutOfRange {
        what: &'static str,
        index: usize,
        len: usize,
    },

    #[error("compression failed: {0}")]
    Compression(String),

    #[error("decompression failed: {0}")]
    Decompression(String),

    #[error("chunk length must be > 0, got {0}")]
    InvalidChunkLength(u32),

    #[error("unknown {kind} column id {id}")]
    UnknownColumn { kind: &'static str, id: u32 },

    /// A structural field decoded to an impossible value.
    #[error("corrupt data: {0}")]
    Corrupt(String),

    #[error("invalid row: {0}")]
    InvalidRow(String),

    #[error(transparent)]
    Filter(#[from] FilterError),

    #[error("invalid sstable config: {0}")]
    Config(#[from] ConfigError),
}

impl Error {
    pub(crate) fn malformed(path: impl Into<PathBuf>, reason: impl Into<String>) -> Self {
        Error::Malformed {
            path: path.into(),
            reason: reason.into(),
        }
    }

    /// Maps an early end-of-file into a [`Error::SizeMismatch`].
    pub(crate) fn short_read(expected: usize, actual: usize) -> Self {
        Error::SizeMismatch { expected, actual }
    }
}

pub type Result<T> = std::result::Result<T, Error>;
