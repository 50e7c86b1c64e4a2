//! K-way merge of sorted partition sources.
//!
//! Each source yields partitions in ascending decorated-key order. The
//! [`MergeReader`] emits one strictly ascending stream in which partitions
//! sharing a key are folded together with [`memtable::Partition::apply`], the same
//! merge a memtable performs on write.

use std::cmp::Ordering;
use std::collections::BinaryHeap;

use memtable::{Memtable, Mutation};

use crate::error::Result;

/// A pull-based stream of partitions in ascending key order.
pub trait PartitionSource {
    /// The next partition, or `None` once the source is exhausted.
    fn next_partition(&mut self) -> Result<Option<Mutation>>;
}

impl<S: PartitionSource + ?Sized> PartitionSource for Box<S> {
    fn next_partition(&mut self) -> Result<Option<Mutation>> {
        (**self).next_partition()
    }
}

/// Yields nothing.
#[derive(Debug, Default, Clone, Copy)]
pub struct EmptySource;

impl PartitionSource for EmptySource {
    fn next_partition(&mut self) -> Result<Option<Mutation>> {
        Ok(None)
    }
}

/// Yields a fixed list of mutations in order.
#[derive(Debug, Default)]
pub struct VecSource {
    mutations: std::vec::IntoIter<Mutation>,
}

impl VecSource {
    pub fn new(mutations: Vec<Mutation>) -> Self {
        Self {
            mutations: mutations.into_iter(),
        }
    }

    pub fn single(mutation: Mutation) -> Self {
        Self::new(vec![mutation])
    }
}

impl PartitionSource for VecSource {
    fn next_partition(&mut self) -> Result<Option<Mutation>> {
        Ok(self.mutations.next())
    }
}

/// Streams a snapshot of a memtable.
pub struct MemtableSource<'a> {
    partitions: Box<dyn Iterator<Item = Mutation> + 'a>,
}

impl<'a> MemtableSource<'a> {
    /// Borrows `mt`, cloning one partition per pull.
    pub fn new(mt: &'a Memtable) -> Self {
        Self {
            partitions: Box::new(
                mt.all_partitions()
                    .map(|(k, p)| Mutation::new(k.clone(), p.clone())),
            ),
        }
    }
}

impl MemtableSource<'static> {
    /// Takes ownership of `mt`.
    pub fn owned(mt: Memtable) -> Self {
        Self {
            partitions: Box::new(mt.into_mutations()),
        }
    }
}

impl PartitionSource for MemtableSource<'_> {
    fn next_partition(&mut self) -> Result<Option<Mutation>> {
        Ok(self.partitions.next())
    }
}

/// The head partition of one source, ordered for a min-heap.
struct HeapEntry {
    mutation: Mutation,
    /// Index into [`MergeReader::sources`].
    source: usize,
}

impl PartialEq for HeapEntry {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for HeapEntry {}

impl PartialOrd for HeapEntry {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for HeapEntry {
    fn cmp(&self, other: &Self) -> Ordering {
        // BinaryHeap is a max-heap: reverse so the smallest key pops first,
        // lower source index first on equal keys.
        other
            .mutation
            .key
            .cmp(&self.mutation.key)
            .then_with(|| other.source.cmp(&self.source))
    }
}

/// Merges any number of sources into one sorted, duplicate-free stream.
///
/// Sources live in an arena and the heap refers to them by index, so the
/// reader owns everything it orders.
pub struct MergeReader<'a> {
    sources: Vec<Box<dyn PartitionSource + 'a>>,
    heap: BinaryHeap<HeapEntry>,
    primed: bool,
}

impl<'a> MergeReader<'a> {
    pub fn new(sources: Vec<Box<dyn PartitionSource + 'a>>) -> Self {
        let heap = BinaryHeap::with_capacity(sources.len());
        Self {
            sources,
            heap,
            primed: false,
        }
    }

    /// Pulls the first partition of every source. Sources that are empty
    /// from the start never enter the heap.
    fn prime(&mut self) -> Result<()> {
        for (i, source) in self.sources.iter_mut().enumerate() {
            if let Some(mutation) = source.next_partition()? {
                self.heap.push(HeapEntry { mutation, source: i });
            }
        }
        self.primed = true;
        Ok(())
    }

    /// Refills the heap from `source` after its head was taken.
    fn advance(&mut self, source: usize) -> Result<()> {
        if let Some(mutation) = self.sources[source].next_partition()? {
            self.heap.push(HeapEntry { mutation, source });
        }
        Ok(())
    }

    /// The next merged partition in key order.
    pub fn next_mutation(&mut self) -> Result<Option<Mutation>> {
        if !self.primed {
            self.prime()?;
        }
        let Some(top) = self.heap.pop() else {
            return Ok(None);
        };
        self.advance(top.source)?;

        // Everything with the same key is folded into one partition.
        let mut merged = top.mutation;
        while self
            .heap
            .peek()
            .is_some_and(|next| next.mutation.key == merged.key)
        {
            if let Some(dup) = self.heap.pop() {
                self.advance(dup.source)?;
                merged.apply(dup.mutation);
            }
        }
        Ok(Some(merged))
    }

    /// Collects all remaining partitions into a `Vec`.
    pub fn collect_all(&mut self) -> Result<Vec<Mutation>> {
        let mut out = Vec::new();
        while let Some(m) = self.next_mutation()? {
            out.push(m);
        }
        Ok(out)
    }
}

impl PartitionSource for MergeReader<'_> {
    fn next_partition(&mut self) -> Result<Option<Mutation>> {
        self.next_mutation()
    }
}
