//! Partition keys, decorated keys, partitioners and clustering keys.

use std::fmt;
use std::io::Cursor;

/// Position of a partition key on the ring.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Token(pub i64);

/// A partition key paired with its token. Ordered by token, then by the key
/// bytes (unsigned lexicographic), which is the order partitions are stored in.
#[derive(Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct DecoratedKey {
    pub token: Token,
    pub key: Vec<u8>,
}

impl DecoratedKey {
    #[must_use]
    pub fn key(&self) -> &[u8] {
        &self.key
    }
}

impl fmt::Debug for DecoratedKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "dk{{{}, pk{{{}}}}}", self.token.0, to_hex(&self.key))
    }
}

/// Maps partition keys to tokens.
pub trait Partitioner: Send + Sync + fmt::Debug {
    /// Fully qualified name recorded in Statistics.db.
    fn name(&self) -> &'static str;

    fn token(&self, key: &[u8]) -> Token;

    fn decorate_key(&self, key: impl Into<Vec<u8>>) -> DecoratedKey
    where
        Self: Sized,
    {
        let key = key.into();
        DecoratedKey {
            token: self.token(&key),
            key,
        }
    }
}

/// Hash partitioner: token is the first 64 bits of murmur3 x64-128.
#[derive(Debug, Default, Clone, Copy)]
pub struct Murmur3Partitioner;

impl Partitioner for Murmur3Partitioner {
    fn name(&self) -> &'static str {
        "org.apache.cassandra.dht.Murmur3Partitioner"
    }

    fn token(&self, key: &[u8]) -> Token {
        // Reading from an in-memory cursor cannot fail.
        let h = murmur3::murmur3_x64_128(&mut Cursor::new(key), 0).unwrap_or_default();
        let t = h as u64 as i64;
        // i64::MIN is reserved for the minimum token.
        Token(if t == i64::MIN { i64::MAX } else { t })
    }
}

/// Order-preserving partitioner: every key gets the same token, so keys
/// compare by their bytes alone.
#[derive(Debug, Default, Clone, Copy)]
pub struct ByteOrderedPartitioner;

impl Partitioner for ByteOrderedPartitioner {
    fn name(&self) -> &'static str {
        "org.apache.cassandra.dht.ByteOrderedPartitioner"
    }

    fn token(&self, _key: &[u8]) -> Token {
        Token(0)
    }
}

/// The partitioners known by name.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PartitionerKind {
    #[default]
    Murmur3,
    ByteOrdered,
}

impl PartitionerKind {
    #[must_use]
    pub fn name(&self) -> &'static str {
        match self {
            PartitionerKind::Murmur3 => Murmur3Partitioner.name(),
            PartitionerKind::ByteOrdered => ByteOrderedPartitioner.name(),
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        [PartitionerKind::Murmur3, PartitionerKind::ByteOrdered]
            .into_iter()
            .find(|p| p.name() == name)
    }

    #[must_use]
    pub fn token(&self, key: &[u8]) -> Token {
        match self {
            PartitionerKind::Murmur3 => Murmur3Partitioner.token(key),
            PartitionerKind::ByteOrdered => ByteOrderedPartitioner.token(key),
        }
    }

    pub fn decorate_key(&self, key: impl Into<Vec<u8>>) -> DecoratedKey {
        match self {
            PartitionerKind::Murmur3 => Murmur3Partitioner.decorate_key(key),
            PartitionerKind::ByteOrdered => ByteOrderedPartitioner.decorate_key(key),
        }
    }
}

/// A clustering key (or a prefix of one): its components in order.
#[derive(Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct ClusteringKey(pub Vec<Vec<u8>>);

impl ClusteringKey {
    pub fn new(components: Vec<Vec<u8>>) -> Self {
        Self(components)
    }

    /// A key with exactly one component.
    pub fn single(component: impl Into<Vec<u8>>) -> Self {
        Self(vec![component.into()])
    }

    #[must_use]
    pub fn components(&self) -> &[Vec<u8>] {
        &self.0
    }

    /// `true` if every component of `self` matches the start of `key`.
    #[must_use]
    pub fn is_prefix_of(&self, key: &ClusteringKey) -> bool {
        key.0.starts_with(&self.0)
    }
}

impl fmt::Debug for ClusteringKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let parts: Vec<String> = self.0.iter().map(|c| to_hex(c)).collect();
        write!(f, "ck{{{}}}", parts.join(":"))
    }
}

fn to_hex(bytes: &[u8]) -> String {
    bytes.iter().map(|b| format!("{:02x}", b)).collect()
}
