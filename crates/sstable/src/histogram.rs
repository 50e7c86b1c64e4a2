//! Histograms stored in Statistics.db.

use std::collections::BTreeMap;
use std::io::{Read, Write};

use ordered_float::OrderedFloat;

use crate::codec::{read, Decode, Encode};
use crate::error::{Error, Result};

/// Default bucket count for per-partition column counts.
pub const COLUMN_COUNT_BUCKETS: usize = 114;
/// Default bucket count for partition sizes.
pub const ROW_SIZE_BUCKETS: usize = 150;
/// Default bin limit of the tombstone drop-time histogram.
pub const TOMBSTONE_HISTOGRAM_BIN_SIZE: usize = 100;

/// Histogram over exponentially growing buckets (each offset about 1.2x the
/// previous one). The extra last bucket counts values above the last offset.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EstimatedHistogram {
    offsets: Vec<u64>,
    buckets: Vec<u64>,
}

impl EstimatedHistogram {
    pub fn new(bucket_count: usize) -> Self {
        let offsets = Self::bucket_offsets(bucket_count.max(1));
        let buckets = vec![0; offsets.len() + 1];
        Self { offsets, buckets }
    }

    fn bucket_offsets(size: usize) -> Vec<u64> {
        let mut out = Vec::with_capacity(size);
        let mut last = 1u64;
        out.push(last);
        for _ in 1..size {
            let mut next = (last as f64 * 1.2).round() as u64;
            if next == last {
                next += 1;
            }
            out.push(next);
            last = next;
        }
        out
    }

    /// Counts `value` in the first bucket whose offset is `>= value`.
    pub fn add(&mut self, value: u64) {
        self.add_n(value, 1);
    }

    fn add_n(&mut self, value: u64, n: u64) {
        let idx = match self.offsets.binary_search(&value) {
            Ok(i) | Err(i) => i,
        };
        self.buckets[idx] += n;
    }

    /// Adds `other` bucket by bucket. Histograms with different offsets are
    /// folded in by each bucket's upper bound.
    pub fn merge(&mut self, other: &EstimatedHistogram) {
        if self.offsets == other.offsets {
            for (a, b) in self.buckets.iter_mut().zip(&other.buckets) {
                *a += b;
            }
            return;
        }
        for (i, count) in other.buckets.iter().enumerate().filter(|(_, c)| **c > 0) {
            let bound = other
                .offsets
                .get(i)
                .copied()
                .unwrap_or(u64::MAX);
            self.add_n(bound, *count);
        }
    }

    pub fn offsets(&self) -> &[u64] {
        &self.offsets
    }

    pub fn buckets(&self) -> &[u64] {
        &self.buckets
    }

    pub fn count(&self) -> u64 {
        self.buckets.iter().sum()
    }

    /// Values landed above the last offset.
    pub fn is_overflowed(&self) -> bool {
        self.buckets.last().copied().unwrap_or(0) > 0
    }
}

impl Default for EstimatedHistogram {
    fn default() -> Self {
        Self::new(ROW_SIZE_BUCKETS)
    }
}

// Layout: u32 bucket count, then per bucket (offset, count) where bucket 0
// repeats the first offset.
impl Encode for EstimatedHistogram {
    fn encode(&self, w: &mut dyn Write) -> Result<()> {
        let len = u32::try_from(self.buckets.len()).map_err(|_| Error::Overflow {
            len: self.buckets.len(),
            max: u64::from(u32::MAX),
        })?;
        len.encode(w)?;
        for (i, count) in self.buckets.iter().enumerate() {
            self.offsets[i.saturating_sub(1)].encode(w)?;
            count.encode(w)?;
        }
        Ok(())
    }
}

impl Decode for EstimatedHistogram {
    fn decode(&mut self, r: &mut dyn Read) -> Result<()> {
        let len = read::<u32>(r)? as usize;
        if len == 0 {
            return Err(Error::Corrupt("estimated histogram with no buckets".into()));
        }
        let mut offsets = Vec::with_capacity((len - 1).min(4096));
        let mut buckets = Vec::with_capacity(len.min(4096));
        for i in 0..len {
            let offset = read::<u64>(r)?;
            if i > 0 {
                offsets.push(offset);
            }
            buckets.push(read::<u64>(r)?);
        }
        if offsets.is_empty() {
            return Err(Error::Corrupt("estimated histogram with no offsets".into()));
        }
        self.offsets = offsets;
        self.buckets = buckets;
        Ok(())
    }
}

/// Approximate histogram of `f64` points.
///
/// Points are kept exactly while accumulating, so the result does not depend
/// on insertion or merge order. The `max_bin_size` limit is applied when the
/// histogram is frozen ([`frozen`](StreamingHistogram::frozen) or encoding):
/// the two closest adjacent bins are repeatedly replaced by their weighted
/// mean, leftmost pair first on ties.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StreamingHistogram {
    max_bin_size: usize,
    bins: BTreeMap<OrderedFloat<f64>, u64>,
}

impl StreamingHistogram {
    pub fn new(max_bin_size: usize) -> Self {
        Self {
            max_bin_size: max_bin_size.max(1),
            bins: BTreeMap::new(),
        }
    }

    pub fn update(&mut self, point: f64) {
        self.update_n(point, 1);
    }

    pub fn update_n(&mut self, point: f64, n: u64) {
        *self.bins.entry(OrderedFloat(point)).or_insert(0) += n;
    }

    pub fn merge(&mut self, other: &StreamingHistogram) {
        for (p, n) in &other.bins {
            self.update_n(p.0, *n);
        }
    }

    pub fn max_bin_size(&self) -> usize {
        self.max_bin_size
    }

    pub fn is_empty(&self) -> bool {
        self.bins.is_empty()
    }

    /// The bins after enforcing `max_bin_size`.
    pub fn frozen(&self) -> Vec<(f64, u64)> {
        let mut bins: Vec<(f64, u64)> = self.bins.iter().map(|(p, n)| (p.0, *n)).collect();
        while bins.len() > self.max_bin_size {
            let mut best = 0;
            let mut best_gap = f64::INFINITY;
            for i in 0..bins.len() - 1 {
                let gap = bins[i + 1].0 - bins[i].0;
                if gap < best_gap {
                    best_gap = gap;
                    best = i;
                }
            }
            let (p1, m1) = bins[best];
            let (p2, m2) = bins.remove(best + 1);
            let m = m1 + m2;
            bins[best] = ((p1 * m1 as f64 + p2 * m2 as f64) / m as f64, m);
        }
        bins
    }

    /// Estimated number of points `<= b`.
    pub fn sum(&self, b: f64) -> f64 {
        self.frozen()
            .iter()
            .filter(|(p, _)| *p <= b)
            .map(|(_, n)| *n as f64)
            .sum()
    }
}

impl Default for StreamingHistogram {
    fn default() -> Self {
        Self::new(TOMBSTONE_HISTOGRAM_BIN_SIZE)
    }
}

impl Encode for StreamingHistogram {
    fn encode(&self, w: &mut dyn Write) -> Result<()> {
        let frozen = self.frozen();
        (self.max_bin_size as u32).encode(w)?;
        (frozen.len() as u32).encode(w)?;
        for (p, n) in frozen {
            p.encode(w)?;
            n.encode(w)?;
        }
        Ok(())
    }
}

impl Decode for StreamingHistogram {
    fn decode(&mut self, r: &mut dyn Read) -> Result<()> {
        self.max_bin_size = (read::<u32>(r)? as usize).max(1);
        let n = read::<u32>(r)?;
        self.bins.clear();
        for _ in 0..n {
            let p = read::<f64>(r)?;
            let m = read::<u64>(r)?;
            self.update_n(p, m);
        }
        Ok(())
    }
}
