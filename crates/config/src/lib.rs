//! # Config - SSTable writer and reader settings
//!
//! Settings that are fixed per process rather than per table. Per-table
//! choices (compressor, bloom filter false-positive chance, partitioner) live
//! on the schema instead.
//!
//! ## Environment overrides
//!
//! ```text
//! SSTABLE_CHUNK_KB          uncompressed chunk length in KiB  (default: 64)
//! SSTABLE_INDEX_INTERVAL    summary sampling interval          (default: 128)
//! SSTABLE_BUFFER_KB         writer buffer size in KiB         (default: 64)
//! SSTABLE_CRC_CHECK_CHANCE  stored crc_check_chance option    (default: 1.0)
//! ```

use thiserror::Error;

/// Default uncompressed chunk length (64 KiB).
pub const DEFAULT_CHUNK_LENGTH: u32 = 64 * 1024;

/// Default summary sampling interval: one summary entry every 128 partitions.
pub const DEFAULT_MIN_INDEX_INTERVAL: u32 = 128;

/// Default buffer size for component writers (64 KiB).
pub const DEFAULT_BUFFER_SIZE: usize = 64 * 1024;

/// Default `crc_check_chance` written to CompressionInfo.db.
pub const DEFAULT_CRC_CHECK_CHANCE: f64 = 1.0;

#[derive(Debug, Error, PartialEq)]
pub enum ConfigError {
    #[error("chunk length must be a non-zero power of two, got {0}")]
    InvalidChunkLength(u32),

    #[error("summary sampling interval must be > 0")]
    ZeroIndexInterval,

    #[error("buffer size must be > 0")]
    ZeroBufferSize,

    #[error("crc check chance must be within [0, 1], got {0}")]
    InvalidCrcCheckChance(f64),

    #[error("invalid value for {key}: {value:?}")]
    InvalidValue { key: &'static str, value: String },
}

/// Process-wide SSTable settings.
#[derive(Debug, Clone, PartialEq)]
pub struct SSTableConfig {
    /// Size of one uncompressed chunk; the unit of compression and checksumming.
    pub chunk_length: u32,
    /// A summary entry is recorded for every `min_index_interval`-th partition.
    pub min_index_interval: u32,
    /// Buffer size used by the component writers.
    pub buffer_size: usize,
    /// Stored in CompressionInfo.db options as `crc_check_chance`.
    pub crc_check_chance: f64,
}

impl Default for SSTableConfig {
    fn default() -> Self {
        Self {
            chunk_length: DEFAULT_CHUNK_LENGTH,
            min_index_interval: DEFAULT_MIN_INDEX_INTERVAL,
            buffer_size: DEFAULT_BUFFER_SIZE,
            crc_check_chance: DEFAULT_CRC_CHECK_CHANCE,
        }
    }
}

impl SSTableConfig {
    /// Builds a config from `SSTABLE_*` environment variables, falling back to
    /// the defaults for anything unset.
    ///
    /// # Errors
    ///
    /// Returns an error if a variable is set but does not parse, or if the
    /// resulting config fails [`validate`](SSTableConfig::validate).
    pub fn from_env() -> Result<Self, ConfigError> {
        let defaults = Self::default();
        let chunk_kb: u32 = parse_env("SSTABLE_CHUNK_KB", defaults.chunk_length / 1024)?;
        let buffer_kb: usize = parse_env("SSTABLE_BUFFER_KB", defaults.buffer_size / 1024)?;

        let config = Self {
            chunk_length: chunk_kb
                .checked_mul(1024)
                .ok_or(ConfigError::InvalidChunkLength(chunk_kb))?,
            min_index_interval: parse_env("SSTABLE_INDEX_INTERVAL", defaults.min_index_interval)?,
            buffer_size: buffer_kb.saturating_mul(1024),
            crc_check_chance: parse_env("SSTABLE_CRC_CHECK_CHANCE", defaults.crc_check_chance)?,
        };
        config.validate()?;
        Ok(config)
    }

    /// Checks that every field is usable by the writer.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.chunk_length == 0 || !self.chunk_length.is_power_of_two() {
            return Err(ConfigError::InvalidChunkLength(self.chunk_length));
        }
        if self.min_index_interval == 0 {
            return Err(ConfigError::ZeroIndexInterval);
        }
        if self.buffer_size == 0 {
            return Err(ConfigError::ZeroBufferSize);
        }
        if !(0.0..=1.0).contains(&self.crc_check_chance) {
            return Err(ConfigError::InvalidCrcCheckChance(self.crc_check_chance));
        }
        Ok(())
    }

    /// Returns a copy with a different chunk length.
    #[must_use]
    pub fn with_chunk_length(mut self, chunk_length: u32) -> Self {
        self.chunk_length = chunk_length;
        self
    }

    /// Returns a copy with a different summary sampling interval.
    #[must_use]
    pub fn with_min_index_interval(mut self, interval: u32) -> Self {
        self.min_index_interval = interval;
        self
    }
}

/// Reads `key` from the environment, falling back to `default` when unset.
fn parse_env<T: std::str::FromStr>(key: &'static str, default: T) -> Result<T, ConfigError> {
    match std::env::var(key) {
        Ok(raw) => raw.trim().parse().map_err(|_| ConfigError::InvalidValue { key, value: raw }),
        Err(_) => Ok(default),
    }
}

#[cfg(test)]
mod tests;
