//! # Bloom - partition key membership oracle
//!
//! Every SSTable carries a filter over its partition keys. A point lookup asks
//! the filter first: a negative answer means the key is **definitely not** in
//! the table and the summary, index and data files are never touched.
//!
//! Two implementations sit behind the [`Filter`] trait:
//!
//! - [`BloomFilter`]: a bit vector probed with `k` hash positions derived from
//!   one murmur3 x64-128 hash (double hashing, `h1 + i * h2`).
//! - [`AlwaysPresentFilter`]: answers "maybe" for every key. Used when the
//!   schema asks for a false-positive chance of 1.0, in which case no
//!   Filter.db component is written at all.
//!
//! ## Example
//!
//! ```rust,no_run
//! use bloom::{get_filter, Filter};
//!
//! let mut f = get_filter(1000, 0.01).unwrap();
//! f.add(b"hello");
//! assert!(f.contains(b"hello"));
//! ```

use byteorder::{BigEndian, ReadBytesExt, WriteBytesExt};
use std::fmt;
use std::io::{self, Cursor, Read, Write};
use thiserror::Error;

/// Upper bound on the bit vector size (16 GiB of bits, 2 GiB of memory).
const MAX_NUM_BITS: u64 = 1 << 34;

/// Safety cap when deserializing: the word count may not exceed this.
const MAX_SERIALIZED_WORDS: usize = (MAX_NUM_BITS / 64) as usize;

const READ_BATCH_WORDS: usize = 1024;

#[derive(Debug, Error, PartialEq)]
pub enum FilterError {
    #[error("invalid false positive probability {0}: must be in (0, 1]")]
    InvalidProbability(f64),
}

/// Membership oracle over partition keys.
pub trait Filter: Send + Sync + fmt::Debug {
    /// Records `key` as present.
    fn add(&mut self, key: &[u8]);

    /// `false` means the key was never added; `true` means it may have been.
    fn contains(&self, key: &[u8]) -> bool;

    /// `true` for filters that carry no state and are never persisted.
    fn is_always_present(&self) -> bool {
        false
    }

    /// Serializes the filter in Filter.db layout.
    fn write_to(&self, w: &mut dyn Write) -> io::Result<()>;
}

/// Builds the filter a table with `num_elements` partitions should use.
///
/// A probability of exactly 1.0 yields an [`AlwaysPresentFilter`].
///
/// # Errors
///
/// Returns [`FilterError::InvalidProbability`] for a probability above 1.0 or
/// not above 0.0.
pub fn get_filter(
    num_elements: usize,
    max_false_pos_probability: f64,
) -> Result<Box<dyn Filter>, FilterError> {
    if !(max_false_pos_probability > 0.0 && max_false_pos_probability <= 1.0) {
        return Err(FilterError::InvalidProbability(max_false_pos_probability));
    }
    if max_false_pos_probability == 1.0 {
        return Ok(Box::new(AlwaysPresentFilter));
    }
    Ok(Box::new(BloomFilter::new(num_elements, max_false_pos_probability)))
}

/// Filter that reports every key as possibly present.
#[derive(Debug, Default, Clone, Copy)]
pub struct AlwaysPresentFilter;

impl Filter for AlwaysPresentFilter {
    fn add(&mut self, _key: &[u8]) {}

    fn contains(&self, _key: &[u8]) -> bool {
        true
    }

    fn is_always_present(&self) -> bool {
        true
    }

    fn write_to(&self, _w: &mut dyn Write) -> io::Result<()> {
        Ok(())
    }
}

/// A bloom filter backed by 64-bit words.
#[derive(Clone, PartialEq, Eq)]
pub struct BloomFilter {
    words: Vec<u64>,
    num_bits: u64,
    num_hashes: u32,
}

impl BloomFilter {
    /// Sizes a filter for `expected_items` keys at the target false-positive
    /// probability, which must lie in `(0, 1)`. Callers go through
    /// [`get_filter`] to have the probability validated.
    pub fn new(expected_items: usize, false_positive_rate: f64) -> Self {
        let n = expected_items.max(1) as f64;

        // m = -n * ln(p) / ln(2)^2
        let mut m = (-n * false_positive_rate.ln() / std::f64::consts::LN_2.powi(2)).ceil() as u64;
        if m > MAX_NUM_BITS {
            tracing::warn!(
                expected_items,
                false_positive_rate,
                "cannot provide an optimal bloom filter, capping at {} bits",
                MAX_NUM_BITS
            );
            m = MAX_NUM_BITS;
        }
        let m = m.max(64);

        // k = (m / n) * ln(2)
        let k = ((m as f64 / n) * std::f64::consts::LN_2).round().max(1.0) as u32;

        Self {
            words: vec![0u64; ((m + 63) / 64) as usize],
            num_bits: m,
            num_hashes: k,
        }
    }

    #[must_use]
    pub fn num_bits(&self) -> u64 {
        self.num_bits
    }

    #[must_use]
    pub fn num_hashes(&self) -> u32 {
        self.num_hashes
    }

    /// Layout: `num_hashes(u32) + num_bits(u64) + word_count(u32) + words`.
    #[must_use]
    pub fn serialized_size(&self) -> usize {
        4 + 8 + 4 + self.words.len() * 8
    }

    /// Deserializes a filter written by [`Filter::write_to`].
    pub fn read_from<R: Read + ?Sized>(r: &mut R) -> io::Result<Self> {
        let num_hashes = r.read_u32::<BigEndian>()?;
        let num_bits = r.read_u64::<BigEndian>()?;
        let word_count = r.read_u32::<BigEndian>()? as usize;

        if word_count > MAX_SERIALIZED_WORDS {
            return Err(io::Error::new(
                io::ErrorKind::InvalidData,
                format!("bloom filter too large: {} words", word_count),
            ));
        }
        if num_hashes == 0 || num_bits == 0 || num_bits > word_count as u64 * 64 {
            return Err(io::Error::new(
                io::ErrorKind::InvalidData,
                format!(
                    "inconsistent bloom filter header: {} bits, {} hashes, {} words",
                    num_bits, num_hashes, word_count
                ),
            ));
        }

        // The header is untrusted; grow with the bytes actually present.
        let mut words = Vec::with_capacity(word_count.min(READ_BATCH_WORDS));
        let mut batch = [0u64; READ_BATCH_WORDS];
        let mut remaining = word_count;
        while remaining > 0 {
            let n = remaining.min(READ_BATCH_WORDS);
            r.read_u64_into::<BigEndian>(&mut batch[..n])?;
            words.extend_from_slice(&batch[..n]);
            remaining -= n;
        }

        Ok(Self {
            words,
            num_bits,
            num_hashes,
        })
    }

    fn positions(&self, key: &[u8]) -> impl Iterator<Item = u64> + '_ {
        let (h1, h2) = hash_pair(key);
        (0..self.num_hashes as u64).map(move |i| h1.wrapping_add(i.wrapping_mul(h2)) % self.num_bits)
    }
}

impl Filter for BloomFilter {
    fn add(&mut self, key: &[u8]) {
        let positions: Vec<u64> = self.positions(key).collect();
        for bit in positions {
            self.words[(bit / 64) as usize] |= 1u64 << (bit % 64);
        }
    }

    fn contains(&self, key: &[u8]) -> bool {
        self.positions(key)
            .all(|bit| self.words[(bit / 64) as usize] & (1u64 << (bit % 64)) != 0)
    }

    fn write_to(&self, w: &mut dyn Write) -> io::Result<()> {
        w.write_u32::<BigEndian>(self.num_hashes)?;
        w.write_u64::<BigEndian>(self.num_bits)?;
        w.write_u32::<BigEndian>(self.words.len() as u32)?;
        for word in &self.words {
            w.write_u64::<BigEndian>(*word)?;
        }
        Ok(())
    }
}

impl fmt::Debug for BloomFilter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BloomFilter")
            .field("num_bits", &self.num_bits)
            .field("num_hashes", &self.num_hashes)
            .field("words", &self.words.len())
            .finish()
    }
}

/// Splits one murmur3 x64-128 hash into the two halves used for probing.
fn hash_pair(key: &[u8]) -> (u64, u64) {
    // Reading from an in-memory cursor cannot fail.
    let h = murmur3::murmur3_x64_128(&mut Cursor::new(key), 0).unwrap_or_default();
    (h as u64, (h >> 64) as u64)
}
