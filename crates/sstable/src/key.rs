//! On-disk key forms: partition keys and clustering composites.

use std::cmp::Ordering;

use memtable::{ClusteringKey, DecoratedKey, PartitionerKind};

use crate::error::{Error, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum KeyKind {
    BeforeAllKeys,
    Regular,
    AfterAllKeys,
}

/// A partition key as stored in Index.db and Summary.db.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Key {
    kind: KeyKind,
    bytes: Vec<u8>,
}

impl Key {
    pub fn from_bytes(bytes: impl Into<Vec<u8>>) -> Self {
        Self {
            kind: KeyKind::Regular,
            bytes: bytes.into(),
        }
    }

    /// Sorts before every key.
    pub fn minimum() -> Self {
        Self {
            kind: KeyKind::BeforeAllKeys,
            bytes: Vec::new(),
        }
    }

    /// Sorts after every key.
    pub fn maximum() -> Self {
        Self {
            kind: KeyKind::AfterAllKeys,
            bytes: Vec::new(),
        }
    }

    /// Builds a key from its components. A single component is stored as is;
    /// several are stored as a composite.
    pub fn from_exploded(components: &[Vec<u8>]) -> Result<Self> {
        match components {
            [single] => Ok(Self::from_bytes(single.clone())),
            _ => Ok(Self::from_bytes(
                Composite::from_exploded(components, CompositeMarker::None)?.into_bytes(),
            )),
        }
    }

    /// Splits the key back into `count` components.
    pub fn explode(&self, count: usize) -> Result<Vec<Vec<u8>>> {
        if count == 1 {
            return Ok(vec![self.bytes.clone()]);
        }
        let parts = Composite::from_bytes(self.bytes.clone()).explode()?;
        if parts.len() != count {
            return Err(Error::Corrupt(format!(
                "key has {} components, expected {count}",
                parts.len()
            )));
        }
        Ok(parts)
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }

    /// Unsigned byte comparison against a regular key; the sentinels sort
    /// first and last.
    pub fn tri_compare(&self, other: &[u8]) -> Ordering {
        match self.kind {
            KeyKind::BeforeAllKeys => Ordering::Less,
            KeyKind::AfterAllKeys => Ordering::Greater,
            KeyKind::Regular => self.bytes.as_slice().cmp(other),
        }
    }

    /// Compares against a decorated key in partition order.
    pub fn compare_decorated(&self, partitioner: PartitionerKind, other: &DecoratedKey) -> Ordering {
        match self.kind {
            KeyKind::BeforeAllKeys => Ordering::Less,
            KeyKind::AfterAllKeys => Ordering::Greater,
            KeyKind::Regular => partitioner
                .token(&self.bytes)
                .cmp(&other.token)
                .then_with(|| self.tri_compare(other.key())),
        }
    }

    pub fn decorate(&self, partitioner: PartitionerKind) -> DecoratedKey {
        partitioner.decorate_key(self.bytes.clone())
    }
}

/// End-of-component byte following the last component of a composite.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(i8)]
pub enum CompositeMarker {
    StartRange = -1,
    None = 0,
    EndRange = 1,
}

impl CompositeMarker {
    fn from_byte(b: u8) -> Option<Self> {
        match b as i8 {
            -1 => Some(CompositeMarker::StartRange),
            0 => Some(CompositeMarker::None),
            1 => Some(CompositeMarker::EndRange),
            _ => None,
        }
    }

    fn to_byte(self) -> u8 {
        self as i8 as u8
    }
}

/// Clustering prefix in composite form: per component a `u16` length, the
/// bytes and one end-of-component byte.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Composite {
    bytes: Vec<u8>,
}

const STATIC_PREFIX: u16 = 0xffff;

impl Composite {
    pub fn from_bytes(bytes: Vec<u8>) -> Self {
        Self { bytes }
    }

    /// Encodes `components`; every end-of-component byte is zero except the
    /// last, which carries `marker`.
    pub fn from_exploded(components: &[Vec<u8>], marker: CompositeMarker) -> Result<Self> {
        let mut bytes = Vec::with_capacity(components.iter().map(|c| c.len() + 3).sum());
        for (i, c) in components.iter().enumerate() {
            let len = u16::try_from(c.len()).map_err(|_| Error::Overflow {
                len: c.len(),
                max: u64::from(u16::MAX),
            })?;
            bytes.extend_from_slice(&len.to_be_bytes());
            bytes.extend_from_slice(c);
            let eoc = if i + 1 == components.len() {
                marker
            } else {
                CompositeMarker::None
            };
            bytes.push(eoc.to_byte());
        }
        if components.is_empty() {
            // The empty prefix is one zero-length component holding the marker.
            bytes.extend_from_slice(&0u16.to_be_bytes());
            bytes.push(marker.to_byte());
        }
        Ok(Self { bytes })
    }

    pub fn from_clustering(key: &ClusteringKey, marker: CompositeMarker) -> Result<Self> {
        Self::from_exploded(key.components(), marker)
    }

    /// Header marking a static row: `0xffff` ahead of the components.
    pub fn static_prefix(components: usize) -> Self {
        let mut bytes = STATIC_PREFIX.to_be_bytes().to_vec();
        for _ in 0..components {
            bytes.extend_from_slice(&0u16.to_be_bytes());
            bytes.push(CompositeMarker::None.to_byte());
        }
        Self { bytes }
    }

    pub fn is_static(&self) -> bool {
        self.bytes.len() >= 2 && self.bytes[..2] == STATIC_PREFIX.to_be_bytes()
    }

    /// Splits into components, dropping the end-of-component bytes.
    pub fn explode(&self) -> Result<Vec<Vec<u8>>> {
        let mut rest: &[u8] = &self.bytes;
        if self.is_static() {
            rest = &rest[2..];
        }
        let mut out = Vec::new();
        while !rest.is_empty() {
            if rest.len() < 2 {
                return Err(Error::short_read(2, rest.len()));
            }
            let len = usize::from(u16::from_be_bytes([rest[0], rest[1]]));
            let need = 2 + len + 1;
            if rest.len() < need {
                return Err(Error::short_read(need, rest.len()));
            }
            out.push(rest[2..2 + len].to_vec());
            rest = &rest[need..];
        }
        Ok(out)
    }

    /// Decodes the clustering key. A lone zero-length component reads back as
    /// the empty prefix.
    pub fn to_clustering(&self) -> Result<ClusteringKey> {
        let mut parts = self.explode()?;
        if parts.len() == 1 && parts[0].is_empty() {
            parts.clear();
        }
        Ok(ClusteringKey::new(parts))
    }

    /// Marker of the last component, `None` for an empty composite.
    pub fn marker(&self) -> Option<CompositeMarker> {
        self.bytes.last().and_then(|b| CompositeMarker::from_byte(*b))
    }

    pub fn check_marker(&self, expected: CompositeMarker) -> Result<()> {
        match self.marker() {
            Some(found) if found == expected => Ok(()),
            found => Err(Error::InvalidRow(format!(
                "unexpected composite marker: found {found:?}, expected {expected:?}"
            ))),
        }
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }

    pub fn into_bytes(self) -> Vec<u8> {
        self.bytes
    }

    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }
}
