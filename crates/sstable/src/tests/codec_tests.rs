use std::collections::BTreeMap;
use std::io::Cursor;

use anyhow::Result;

use crate::codec::{read, serialized_size, DiskArray, DiskHash, DiskSize, DiskString, Encode};
use crate::error::Error;
use crate::histogram::{EstimatedHistogram, StreamingHistogram};
use crate::types::{
    CompressionInfo, CompressionOption, DeletionTime, IndexEntry, MetadataComponent, Statistics,
    StatsMetadata, Summary, SummaryEntry, ValidationMetadata,
};

fn encode<T: Encode + ?Sized>(value: &T) -> Result<Vec<u8>> {
    let mut buf = Vec::new();
    value.encode(&mut buf)?;
    Ok(buf)
}

#[test]
fn integers_are_big_endian() -> Result<()> {
    assert_eq!(encode(&0x0102u16)?, [1, 2]);
    assert_eq!(encode(&0x0102_0304u32)?, [1, 2, 3, 4]);
    assert_eq!(encode(&-1i64)?, [0xff; 8]);
    assert_eq!(encode(&true)?, [1]);
    Ok(())
}

#[test]
fn disk_string_prefixes_its_length() -> Result<()> {
    let s = DiskString::<u16>::new("abc");
    let buf = encode(&s)?;
    assert_eq!(buf, [0, 3, b'a', b'b', b'c']);
    let back: DiskString<u16> = read(&mut Cursor::new(&buf[..]))?;
    assert_eq!(back, s);
    Ok(())
}

#[test]
fn empty_containers_round_trip() -> Result<()> {
    let s = DiskString::<u32>::default();
    assert_eq!(encode(&s)?, [0, 0, 0, 0]);
    let a: DiskArray<u32, u64> = read(&mut Cursor::new(&encode(&DiskArray::<u32, u64>::default())?[..]))?;
    assert!(a.is_empty());
    let h: DiskHash<u16, u32, u32> =
        read(&mut Cursor::new(&encode(&DiskHash::<u16, u32, u32>::default())?[..]))?;
    assert!(h.map.is_empty());
    Ok(())
}

#[test]
fn large_integer_array_round_trips() -> Result<()> {
    let arr = DiskArray::<u32, u64>::new((0..10_000).map(|i| i * 7).collect());
    let buf = encode(&arr)?;
    assert_eq!(buf.len(), 4 + 8 * 10_000);
    let back: DiskArray<u32, u64> = read(&mut Cursor::new(&buf[..]))?;
    assert_eq!(back, arr);
    Ok(())
}

#[test]
fn hash_round_trips() -> Result<()> {
    let map: BTreeMap<u32, u32> = [(0, 12), (2, 40), (1, 33)].into_iter().collect();
    let h = DiskHash::<u32, u32, u32>::new(map);
    let back: DiskHash<u32, u32, u32> = read(&mut Cursor::new(&encode(&h)?[..]))?;
    assert_eq!(back, h);
    Ok(())
}

#[test]
fn short_read_reports_sizes() {
    let err = read::<u64>(&mut Cursor::new(&[1u8, 2, 3][..])).unwrap_err();
    assert!(matches!(err, Error::SizeMismatch { expected: 8, actual: 3 }), "{err}");
}

#[test]
fn truncated_string_body_is_size_mismatch() {
    let buf = [0u8, 10, b'a', b'b'];
    let err = read::<DiskString<u16>>(&mut Cursor::new(&buf[..])).unwrap_err();
    assert!(matches!(err, Error::SizeMismatch { .. }), "{err}");
}

#[test]
fn oversized_string_overflows_u16_prefix() {
    let s = DiskString::<u16>::new(vec![0u8; usize::from(u16::MAX) + 1]);
    let err = encode(&s).unwrap_err();
    let err = err.downcast::<Error>().unwrap();
    assert!(matches!(err, Error::Overflow { max: 65535, .. }), "{err}");
}

#[test]
fn size_fields_report_their_own_maximum() {
    assert!(matches!(
        <u16 as DiskSize>::from_len(70_000),
        Err(Error::Overflow { len: 70_000, max: 65535 })
    ));
    let too_long = u32::MAX as usize + 1;
    assert!(matches!(
        <u32 as DiskSize>::from_len(too_long),
        Err(Error::Overflow { max, .. }) if max == u64::from(u32::MAX)
    ));
    assert!(matches!(<u32 as DiskSize>::from_len(7), Ok(7)));
}

#[test]
fn described_records_round_trip() -> Result<()> {
    let entry = IndexEntry {
        key: DiskString::new("pk"),
        position: 4096,
        promoted_index: DiskString::default(),
    };
    let buf = encode(&entry)?;
    assert_eq!(buf.len() as u64, serialized_size(&entry)?);
    assert_eq!(read::<IndexEntry>(&mut Cursor::new(&buf[..]))?, entry);

    let dt = DeletionTime {
        local_deletion_time: 7,
        marked_for_delete_at: -3,
    };
    assert_eq!(read::<DeletionTime>(&mut Cursor::new(&encode(&dt)?[..]))?, dt);

    let info = CompressionInfo {
        name: DiskString::new("LZ4Compressor"),
        options: DiskArray::new(vec![CompressionOption {
            key: DiskString::new("crc_check_chance"),
            value: DiskString::new("1.0"),
        }]),
        chunk_length: 65536,
        data_length: 200_000,
        offsets: DiskArray::new(vec![0, 30_000, 61_000, 90_500]),
    };
    assert_eq!(read::<CompressionInfo>(&mut Cursor::new(&encode(&info)?[..]))?, info);
    Ok(())
}

#[test]
fn summary_round_trips_with_little_endian_positions() -> Result<()> {
    let mut summary = Summary::new(2);
    summary.entries.push(SummaryEntry {
        key: b"a".to_vec(),
        position: 0,
    });
    summary.entries.push(SummaryEntry {
        key: b"cc".to_vec(),
        position: 40,
    });
    summary.first_key = DiskString::new("a");
    summary.last_key = DiskString::new("dd");
    summary.finalize()?;

    assert_eq!(summary.header.size, 2);
    assert_eq!(summary.header.memory_size, 2 * 4 + (1 + 8) + (2 + 8));

    let buf = encode(&summary)?;
    // The first position follows the 24-byte header: entries start right
    // after the two 4-byte positions.
    assert_eq!(buf[24..28], 8u32.to_le_bytes());
    assert_eq!(read::<Summary>(&mut Cursor::new(&buf[..]))?, summary);
    Ok(())
}

#[test]
fn statistics_round_trip_through_directory() -> Result<()> {
    let mut stats = Statistics::default();
    stats.insert(MetadataComponent::Validation(ValidationMetadata {
        partitioner: DiskString::new("org.apache.cassandra.dht.Murmur3Partitioner"),
        filter_chance: 0.01,
    }));
    let mut s = StatsMetadata::default();
    s.min_timestamp = 1;
    s.max_timestamp = 99;
    s.estimated_row_size = EstimatedHistogram::new(crate::histogram::ROW_SIZE_BUCKETS);
    s.estimated_row_size.add(120);
    s.estimated_tombstone_drop_time = StreamingHistogram::default();
    s.estimated_tombstone_drop_time.update(1000.0);
    stats.insert(MetadataComponent::Stats(s.clone()));

    let buf = encode(&stats)?;
    let back = Statistics::parse(&buf)?;
    assert_eq!(back, stats);
    assert_eq!(back.stats(), Some(&s));
    assert!(back.compaction().is_none());
    Ok(())
}

#[test]
fn statistics_skip_unknown_types() -> Result<()> {
    let mut stats = Statistics::default();
    stats.insert(MetadataComponent::Validation(ValidationMetadata {
        partitioner: DiskString::new("p"),
        filter_chance: 1.0,
    }));
    let buf = encode(&stats)?;

    // Rewrite the directory with an extra entry of type 9 pointing at the
    // same record.
    let mut patched = Vec::new();
    2u32.encode(&mut patched)?;
    0u32.encode(&mut patched)?;
    20u32.encode(&mut patched)?;
    9u32.encode(&mut patched)?;
    20u32.encode(&mut patched)?;
    patched.extend_from_slice(&buf[12..]);

    let back = Statistics::parse(&patched)?;
    assert_eq!(back.contents.len(), 1);
    assert_eq!(back.validation().map(|v| v.filter_chance), Some(1.0));
    Ok(())
}
