//! Binary codec for on-disk values.
//!
//! Everything is big-endian. Length-prefixed values carry their prefix width
//! in the type ([`DiskString<u16>`], [`DiskArray<u32, T>`], ...), so a format
//! change never needs more than a type change.
//!
//! Composite records list their fields through [`Describe`]; the
//! [`describe_type!`] macro derives that listing and routes [`Encode`] /
//! [`Decode`] through one generic walk.

use std::collections::BTreeMap;
use std::fmt;
use std::io::{self, Read, Write};
use std::marker::PhantomData;

use byteorder::{BigEndian, ByteOrder, WriteBytesExt};

use crate::error::{Error, Result};

pub trait Encode {
    fn encode(&self, w: &mut dyn Write) -> Result<()>;
}

/// Parses into an existing value, so a record's fields can be filled in place.
pub trait Decode {
    fn decode(&mut self, r: &mut dyn Read) -> Result<()>;
}

/// Ordered field listing of a composite record.
pub trait Describe {
    fn fields(&self) -> Vec<&dyn Encode>;
    fn fields_mut(&mut self) -> Vec<&mut dyn Decode>;
}

pub fn encode_described<T: Describe + ?Sized>(value: &T, w: &mut dyn Write) -> Result<()> {
    for field in value.fields() {
        field.encode(w)?;
    }
    Ok(())
}

pub fn decode_described<T: Describe + ?Sized>(value: &mut T, r: &mut dyn Read) -> Result<()> {
    for field in value.fields_mut() {
        field.decode(r)?;
    }
    Ok(())
}

/// Reads a fresh `T`.
pub fn read<T: Decode + Default>(r: &mut dyn Read) -> Result<T> {
    let mut value = T::default();
    value.decode(r)?;
    Ok(value)
}

/// Fills `buf` completely or fails with [`Error::SizeMismatch`].
pub fn read_fully(r: &mut dyn Read, buf: &mut [u8]) -> Result<()> {
    let mut filled = 0;
    while filled < buf.len() {
        match r.read(&mut buf[filled..]) {
            Ok(0) => return Err(Error::short_read(buf.len(), filled)),
            Ok(n) => filled += n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => {}
            Err(e) => return Err(e.into()),
        }
    }
    Ok(())
}

/// Reads exactly `len` bytes. The buffer grows with the data actually read,
/// so a corrupt length cannot force a huge allocation up front.
pub fn read_bytes(r: &mut dyn Read, len: usize) -> Result<Vec<u8>> {
    let mut buf = Vec::new();
    (&mut *r).take(len as u64).read_to_end(&mut buf)?;
    if buf.len() != len {
        return Err(Error::short_read(len, buf.len()));
    }
    Ok(buf)
}

/// Write sink that only counts.
#[derive(Debug, Default)]
pub struct CountingWriter {
    pub count: u64,
}

impl Write for CountingWriter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.count += buf.len() as u64;
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

/// Encoded size of `value`, computed without buffering the bytes.
pub fn serialized_size<T: Encode + ?Sized>(value: &T) -> Result<u64> {
    let mut counter = CountingWriter::default();
    value.encode(&mut counter)?;
    Ok(counter.count)
}

// ---------------------------------------------------------------------------
// Primitives
// ---------------------------------------------------------------------------

impl Encode for u8 {
    fn encode(&self, w: &mut dyn Write) -> Result<()> {
        w.write_u8(*self)?;
        Ok(())
    }
}

impl Decode for u8 {
    fn decode(&mut self, r: &mut dyn Read) -> Result<()> {
        let mut buf = [0u8; 1];
        read_fully(r, &mut buf)?;
        *self = buf[0];
        Ok(())
    }
}

macro_rules! int_codec {
    ($($ty:ty => $width:expr, $write:ident, $read:ident;)*) => {$(
        impl Encode for $ty {
            fn encode(&self, w: &mut dyn Write) -> Result<()> {
                w.$write::<BigEndian>(*self)?;
                Ok(())
            }
        }

        impl Decode for $ty {
            fn decode(&mut self, r: &mut dyn Read) -> Result<()> {
                let mut buf = [0u8; $width];
                read_fully(r, &mut buf)?;
                *self = BigEndian::$read(&buf);
                Ok(())
            }
        }
    )*};
}

int_codec! {
    u16 => 2, write_u16, read_u16;
    u32 => 4, write_u32, read_u32;
    u64 => 8, write_u64, read_u64;
    i16 => 2, write_i16, read_i16;
    i32 => 4, write_i32, read_i32;
    i64 => 8, write_i64, read_i64;
    f64 => 8, write_f64, read_f64;
}

impl Encode for bool {
    fn encode(&self, w: &mut dyn Write) -> Result<()> {
        u8::from(*self).encode(w)
    }
}

impl Decode for bool {
    fn decode(&mut self, r: &mut dyn Read) -> Result<()> {
        *self = read::<u8>(r)? != 0;
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Length prefixes
// ---------------------------------------------------------------------------

/// Integer type usable as a length prefix.
pub trait DiskSize: Encode + Decode + Default + Copy + fmt::Debug {
    const MAX: u64;

    /// Narrows `len`, failing with [`Error::Overflow`] if it does not fit.
    fn from_len(len: usize) -> Result<Self>;

    fn to_len(self) -> usize;
}

macro_rules! disk_size {
    ($($ty:ty),*) => {$(
        impl DiskSize for $ty {
            const MAX: u64 = <$ty>::MAX as u64;

            fn from_len(len: usize) -> Result<Self> {
                <$ty>::try_from(len).map_err(|_| Error::Overflow {
                    len,
                    max: <$ty as DiskSize>::MAX,
                })
            }

            fn to_len(self) -> usize {
                self as usize
            }
        }
    )*};
}

disk_size!(u16, u32);

fn read_len<S: DiskSize>(r: &mut dyn Read) -> Result<usize> {
    Ok(read::<S>(r)?.to_len())
}

// ---------------------------------------------------------------------------
// Strings
// ---------------------------------------------------------------------------

/// Byte string with an `S`-wide length prefix.
#[derive(Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct DiskString<S> {
    pub value: Vec<u8>,
    size: PhantomData<S>,
}

impl<S> DiskString<S> {
    pub fn new(value: impl Into<Vec<u8>>) -> Self {
        Self {
            value: value.into(),
            size: PhantomData,
        }
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.value
    }

    /// Lossy UTF-8 view, for names and option strings.
    pub fn to_string_lossy(&self) -> String {
        String::from_utf8_lossy(&self.value).into_owned()
    }
}

impl<S> fmt::Debug for DiskString<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}", String::from_utf8_lossy(&self.value))
    }
}

impl<S: DiskSize> Encode for DiskString<S> {
    fn encode(&self, w: &mut dyn Write) -> Result<()> {
        S::from_len(self.value.len())?.encode(w)?;
        w.write_all(&self.value)?;
        Ok(())
    }
}

impl<S: DiskSize> Decode for DiskString<S> {
    fn decode(&mut self, r: &mut dyn Read) -> Result<()> {
        let len = read_len::<S>(r)?;
        self.value = read_bytes(r, len)?;
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Arrays
// ---------------------------------------------------------------------------

/// Element of a [`DiskArray`]. The default parses element by element;
/// fixed-width integers override it with one bulk read.
pub trait ArrayMember: Encode + Decode + Default + Sized {
    fn read_elements(r: &mut dyn Read, n: usize) -> Result<Vec<Self>> {
        let mut out = Vec::with_capacity(n.min(4096));
        for _ in 0..n {
            out.push(read::<Self>(r)?);
        }
        Ok(out)
    }
}

impl ArrayMember for u8 {
    fn read_elements(r: &mut dyn Read, n: usize) -> Result<Vec<Self>> {
        read_bytes(r, n)
    }
}

macro_rules! bulk_member {
    ($($ty:ty => $width:expr, $read_into:ident;)*) => {$(
        impl ArrayMember for $ty {
            fn read_elements(r: &mut dyn Read, n: usize) -> Result<Vec<Self>> {
                let expected = n.checked_mul($width).ok_or(Error::Overflow {
                    len: n,
                    max: (usize::MAX / $width) as u64,
                })?;
                let raw = read_bytes(r, expected)?;
                let mut out = vec![<$ty>::default(); n];
                BigEndian::$read_into(&raw, &mut out);
                Ok(out)
            }
        }
    )*};
}

bulk_member! {
    u16 => 2, read_u16_into;
    u32 => 4, read_u32_into;
    u64 => 8, read_u64_into;
    i32 => 4, read_i32_into;
    i64 => 8, read_i64_into;
}

impl ArrayMember for bool {}
impl ArrayMember for f64 {}
impl<S: DiskSize> ArrayMember for DiskString<S> {}

/// Sequence with an `S`-wide element count.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct DiskArray<S, T> {
    pub elements: Vec<T>,
    size: PhantomData<S>,
}

impl<S, T> DiskArray<S, T> {
    pub fn new(elements: Vec<T>) -> Self {
        Self {
            elements,
            size: PhantomData,
        }
    }

    pub fn len(&self) -> usize {
        self.elements.len()
    }

    pub fn is_empty(&self) -> bool {
        self.elements.is_empty()
    }
}

impl<S: DiskSize, T: ArrayMember> Encode for DiskArray<S, T> {
    fn encode(&self, w: &mut dyn Write) -> Result<()> {
        S::from_len(self.elements.len())?.encode(w)?;
        for e in &self.elements {
            e.encode(w)?;
        }
        Ok(())
    }
}

impl<S: DiskSize, T: ArrayMember> Decode for DiskArray<S, T> {
    fn decode(&mut self, r: &mut dyn Read) -> Result<()> {
        let n = read_len::<S>(r)?;
        self.elements = T::read_elements(r, n)?;
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Maps
// ---------------------------------------------------------------------------

/// Map with an `S`-wide entry count; the on-disk pair order carries no meaning.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DiskHash<S, K, V> {
    pub map: BTreeMap<K, V>,
    size: PhantomData<S>,
}

impl<S, K, V> Default for DiskHash<S, K, V> {
    fn default() -> Self {
        Self {
            map: BTreeMap::new(),
            size: PhantomData,
        }
    }
}

impl<S, K, V> DiskHash<S, K, V> {
    pub fn new(map: BTreeMap<K, V>) -> Self {
        Self {
            map,
            size: PhantomData,
        }
    }
}

impl<S: DiskSize, K: Encode, V: Encode> Encode for DiskHash<S, K, V> {
    fn encode(&self, w: &mut dyn Write) -> Result<()> {
        S::from_len(self.map.len())?.encode(w)?;
        for (k, v) in &self.map {
            k.encode(w)?;
            v.encode(w)?;
        }
        Ok(())
    }
}

impl<S, K, V> Decode for DiskHash<S, K, V>
where
    S: DiskSize,
    K: Decode + Default + Ord,
    V: Decode + Default,
{
    fn decode(&mut self, r: &mut dyn Read) -> Result<()> {
        let n = read_len::<S>(r)?;
        self.map.clear();
        for _ in 0..n {
            let k = read::<K>(r)?;
            let v = read::<V>(r)?;
            self.map.insert(k, v);
        }
        Ok(())
    }
}

/// Implements [`Describe`], [`Encode`], [`Decode`] and [`ArrayMember`] for a
/// record from its field list, in on-disk order.
macro_rules! describe_type {
    ($ty:ty { $($field:ident),* $(,)? }) => {
        impl $crate::codec::Describe for $ty {
            fn fields(&self) -> Vec<&dyn $crate::codec::Encode> {
                vec![$(&self.$field as &dyn $crate::codec::Encode),*]
            }

            fn fields_mut(&mut self) -> Vec<&mut dyn $crate::codec::Decode> {
                vec![$(&mut self.$field as &mut dyn $crate::codec::Decode),*]
            }
        }

        impl $crate::codec::Encode for $ty {
            fn encode(&self, w: &mut dyn ::std::io::Write) -> $crate::error::Result<()> {
                $crate::codec::encode_described(self, w)
            }
        }

        impl $crate::codec::Decode for $ty {
            fn decode(&mut self, r: &mut dyn ::std::io::Read) -> $crate::error::Result<()> {
                $crate::codec::decode_described(self, r)
            }
        }

        impl $crate::codec::ArrayMember for $ty {}
    };
}

pub(crate) use describe_type;
