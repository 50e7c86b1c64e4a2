//! Chunked compression of Data.db.
//!
//! The uncompressed stream is cut into `chunk_length` chunks. Each chunk is
//! compressed on its own and followed by a big-endian Adler-32 of the
//! compressed bytes. CompressionInfo.db records where every chunk starts, so
//! any logical position maps to one chunk without touching the data file.

use std::io::{Read, Seek, SeekFrom, Write};
use std::path::Path;

use flate2::read::ZlibDecoder;
use flate2::write::ZlibEncoder;
use memtable::CompressorKind;

use crate::codec::{read_fully, DiskArray, DiskString};
use crate::error::{Error, Result};
use crate::types::{CompressionInfo, CompressionOption};

pub const CRC_CHECK_CHANCE: &str = "crc_check_chance";

/// Adler-32 of `data`.
pub fn adler32(data: &[u8]) -> u32 {
    let mut a = adler::Adler32::new();
    a.write_slice(data);
    a.checksum()
}

/// The chunk codecs, looked up by the name stored in CompressionInfo.db.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Compressor {
    Lz4,
    Snappy,
    Deflate,
}

impl Compressor {
    /// Accepts short and fully qualified class names.
    pub fn from_name(name: &str) -> Result<Self> {
        match name.rsplit('.').next().unwrap_or(name) {
            "LZ4Compressor" => Ok(Compressor::Lz4),
            "SnappyCompressor" => Ok(Compressor::Snappy),
            "DeflateCompressor" => Ok(Compressor::Deflate),
            _ => Err(Error::UnsupportedCompression(name.to_string())),
        }
    }

    /// The codec a schema asks for; `None` for checksummed uncompressed tables.
    pub fn for_kind(kind: CompressorKind) -> Option<Self> {
        match kind {
            CompressorKind::None => None,
            CompressorKind::Lz4 => Some(Compressor::Lz4),
            CompressorKind::Snappy => Some(Compressor::Snappy),
            CompressorKind::Deflate => Some(Compressor::Deflate),
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Compressor::Lz4 => "LZ4Compressor",
            Compressor::Snappy => "SnappyCompressor",
            Compressor::Deflate => "DeflateCompressor",
        }
    }

    /// Every built-in codec has a compress routine.
    pub fn can_compress(&self) -> bool {
        true
    }

    pub fn compress(&self, input: &[u8]) -> Result<Vec<u8>> {
        match self {
            Compressor::Lz4 => Ok(lz4_flex::compress_prepend_size(input)),
            Compressor::Snappy => snap::raw::Encoder::new()
                .compress_vec(input)
                .map_err(|e| Error::Compression(e.to_string())),
            Compressor::Deflate => {
                let mut encoder = ZlibEncoder::new(Vec::new(), flate2::Compression::default());
                encoder.write_all(input)?;
                Ok(encoder.finish()?)
            }
        }
    }

    /// Decompresses one chunk; the output may not exceed `max_len` bytes.
    pub fn decompress(&self, input: &[u8], max_len: usize) -> Result<Vec<u8>> {
        let too_long = |len: usize| {
            Error::Decompression(format!("chunk decompresses to {len} bytes, limit {max_len}"))
        };
        match self {
            Compressor::Lz4 => {
                if input.len() < 4 {
                    return Err(Error::short_read(4, input.len()));
                }
                let len = u32::from_le_bytes([input[0], input[1], input[2], input[3]]) as usize;
                if len > max_len {
                    return Err(too_long(len));
                }
                lz4_flex::decompress_size_prepended(input)
                    .map_err(|e| Error::Decompression(e.to_string()))
            }
            Compressor::Snappy => {
                let len = snap::raw::decompress_len(input)
                    .map_err(|e| Error::Decompression(e.to_string()))?;
                if len > max_len {
                    return Err(too_long(len));
                }
                snap::raw::Decoder::new()
                    .decompress_vec(input)
                    .map_err(|e| Error::Decompression(e.to_string()))
            }
            Compressor::Deflate => {
                let mut out = Vec::new();
                ZlibDecoder::new(input)
                    .take(max_len as u64 + 1)
                    .read_to_end(&mut out)
                    .map_err(|e| Error::Decompression(e.to_string()))?;
                if out.len() > max_len {
                    return Err(too_long(out.len()));
                }
                Ok(out)
            }
        }
    }
}

/// Where a logical position lives in the compressed file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChunkLocation {
    /// File offset of the chunk.
    pub chunk_start: u64,
    /// Compressed length including the trailing checksum.
    pub chunk_len: u64,
    /// Offset of the position inside the decompressed chunk.
    pub offset: usize,
}

/// Compression metadata of one table.
#[derive(Debug, Clone, PartialEq)]
pub struct Compression {
    info: CompressionInfo,
    compressor: Compressor,
    compressed_file_length: u64,
}

impl Compression {
    /// Metadata for a table about to be written.
    ///
    /// # Errors
    ///
    /// [`Error::UnsupportedCompression`] for an unknown name,
    /// [`Error::UnsupportedCompressor`] for a codec that can only decompress,
    /// and [`Error::InvalidChunkLength`] for a zero chunk length.
    pub fn for_writing(name: &str, chunk_length: u32, crc_check_chance: f64) -> Result<Self> {
        let compressor = Compressor::from_name(name)?;
        if chunk_length == 0 {
            return Err(Error::InvalidChunkLength(chunk_length));
        }
        if !compressor.can_compress() {
            return Err(Error::UnsupportedCompressor(name.to_string()));
        }
        let info = CompressionInfo {
            name: DiskString::new(compressor.name()),
            options: DiskArray::new(vec![CompressionOption {
                key: DiskString::new(CRC_CHECK_CHANCE),
                value: DiskString::new(format!("{crc_check_chance:?}")),
            }]),
            chunk_length,
            data_length: 0,
            offsets: DiskArray::default(),
        };
        Ok(Self {
            info,
            compressor,
            compressed_file_length: 0,
        })
    }

    /// Validates metadata read from `path`.
    pub fn from_info(info: CompressionInfo, path: &Path) -> Result<Self> {
        let compressor = Compressor::from_name(&info.name.to_string_lossy())?;
        if info.chunk_length == 0 {
            return Err(Error::malformed(path, "zero chunk length"));
        }
        let offsets = &info.offsets.elements;
        if offsets.first().is_some_and(|o| *o != 0) {
            return Err(Error::malformed(path, "first chunk offset is not 0"));
        }
        if offsets.windows(2).any(|w| w[0] >= w[1]) {
            return Err(Error::malformed(path, "chunk offsets are not strictly increasing"));
        }
        let chunks_needed = info.data_length.div_ceil(u64::from(info.chunk_length));
        if offsets.len() as u64 != chunks_needed {
            return Err(Error::malformed(
                path,
                format!("{} chunk offsets for {chunks_needed} chunks", offsets.len()),
            ));
        }
        Ok(Self {
            info,
            compressor,
            compressed_file_length: 0,
        })
    }

    /// Records the Data.db size once it is known; the last chunk ends there.
    pub fn update(&mut self, compressed_file_length: u64, path: &Path) -> Result<()> {
        if let Some(last) = self.info.offsets.elements.last() {
            if *last >= compressed_file_length {
                return Err(Error::malformed(
                    path,
                    format!("last chunk offset {last} beyond data size {compressed_file_length}"),
                ));
            }
        }
        self.compressed_file_length = compressed_file_length;
        Ok(())
    }

    /// Maps a logical position to its chunk. Pure arithmetic, no I/O.
    pub fn locate(&self, position: u64) -> Result<ChunkLocation> {
        let chunk_length = u64::from(self.info.chunk_length);
        let offsets = &self.info.offsets.elements;
        let index = (position / chunk_length) as usize;
        let chunk_start = *offsets.get(index).ok_or(Error::OutOfRange {
            what: "chunk",
            index,
            len: offsets.len(),
        })?;
        let chunk_end = offsets
            .get(index + 1)
            .copied()
            .unwrap_or(self.compressed_file_length);
        Ok(ChunkLocation {
            chunk_start,
            chunk_len: chunk_end.saturating_sub(chunk_start),
            offset: (position % chunk_length) as usize,
        })
    }

    /// Reads, verifies and decompresses the chunk at `loc`.
    pub fn read_chunk<R: Read + Seek>(&self, file: &mut R, loc: ChunkLocation) -> Result<Vec<u8>> {
        if loc.chunk_len < 4 {
            return Err(Error::short_read(4, loc.chunk_len as usize));
        }
        let mut raw = vec![0u8; loc.chunk_len as usize];
        file.seek(SeekFrom::Start(loc.chunk_start))?;
        read_fully(file, &mut raw)?;

        let (payload, trailer) = raw.split_at(raw.len() - 4);
        let expected = u32::from_be_bytes([trailer[0], trailer[1], trailer[2], trailer[3]]);
        let actual = adler32(payload);
        if expected != actual {
            return Err(Error::ChecksumMismatch {
                chunk_offset: loc.chunk_start,
                expected,
                actual,
            });
        }
        self.compressor.decompress(payload, self.info.chunk_length as usize)
    }

    pub fn compressor(&self) -> Compressor {
        self.compressor
    }

    pub fn chunk_length(&self) -> u32 {
        self.info.chunk_length
    }

    /// Total uncompressed length.
    pub fn data_length(&self) -> u64 {
        self.info.data_length
    }

    pub fn compressed_file_length(&self) -> u64 {
        self.compressed_file_length
    }

    pub fn offsets(&self) -> &[u64] {
        &self.info.offsets.elements
    }

    pub fn option(&self, key: &str) -> Option<String> {
        self.info
            .options
            .elements
            .iter()
            .find(|o| o.key.as_bytes() == key.as_bytes())
            .map(|o| o.value.to_string_lossy())
    }

    /// The `crc_check_chance` option as stored. Chunk checksums are verified
    /// on every read regardless of its value.
    pub fn crc_check_chance(&self) -> f64 {
        self.option(CRC_CHECK_CHANCE)
            .and_then(|v| v.parse().ok())
            .unwrap_or(1.0)
    }

    pub fn info(&self) -> &CompressionInfo {
        &self.info
    }
}

/// Compresses a stream chunk by chunk into `inner`.
pub struct CompressedWriter<W: Write> {
    inner: W,
    compression: Compression,
    buffer: Vec<u8>,
    file_position: u64,
    digest: adler::Adler32,
}

impl<W: Write> CompressedWriter<W> {
    pub fn new(inner: W, compression: Compression) -> Self {
        let chunk_length = compression.chunk_length() as usize;
        Self {
            inner,
            compression,
            buffer: Vec::with_capacity(chunk_length),
            file_position: 0,
            digest: adler::Adler32::new(),
        }
    }

    /// Logical (uncompressed) bytes written so far.
    pub fn position(&self) -> u64 {
        self.compression.info.data_length + self.buffer.len() as u64
    }

    pub fn write_all(&mut self, mut data: &[u8]) -> Result<()> {
        let chunk_length = self.compression.chunk_length() as usize;
        while !data.is_empty() {
            let take = (chunk_length - self.buffer.len()).min(data.len());
            self.buffer.extend_from_slice(&data[..take]);
            data = &data[take..];
            if self.buffer.len() == chunk_length {
                self.flush_chunk()?;
            }
        }
        Ok(())
    }

    fn flush_chunk(&mut self) -> Result<()> {
        if self.buffer.is_empty() {
            return Ok(());
        }
        let compressed = self.compression.compressor.compress(&self.buffer)?;
        let checksum = adler32(&compressed).to_be_bytes();

        self.compression.info.offsets.elements.push(self.file_position);
        self.inner.write_all(&compressed)?;
        self.inner.write_all(&checksum)?;
        self.digest.write_slice(&compressed);
        self.digest.write_slice(&checksum);

        self.file_position += compressed.len() as u64 + 4;
        self.compression.info.data_length += self.buffer.len() as u64;
        self.buffer.clear();
        Ok(())
    }

    /// Flushes the last partial chunk. Returns the completed metadata, the
    /// Adler-32 of the whole compressed stream, and the inner writer.
    pub fn finish(mut self) -> Result<(Compression, u32, W)> {
        self.flush_chunk()?;
        self.inner.flush()?;
        self.compression.compressed_file_length = self.file_position;
        Ok((self.compression, self.digest.checksum(), self.inner))
    }
}

/// Passes an uncompressed stream through, recording an Adler-32 per chunk
/// (CRC.db) and one over the whole stream (Digest.sha1).
pub struct ChecksummedWriter<W: Write> {
    inner: W,
    chunk_size: usize,
    chunk: adler::Adler32,
    chunk_fill: usize,
    checksums: Vec<u32>,
    digest: adler::Adler32,
    position: u64,
}

impl<W: Write> ChecksummedWriter<W> {
    pub fn new(inner: W, chunk_size: u32) -> Result<Self> {
        if chunk_size == 0 {
            return Err(Error::InvalidChunkLength(chunk_size));
        }
        Ok(Self {
            inner,
            chunk_size: chunk_size as usize,
            chunk: adler::Adler32::new(),
            chunk_fill: 0,
            checksums: Vec::new(),
            digest: adler::Adler32::new(),
            position: 0,
        })
    }

    pub fn position(&self) -> u64 {
        self.position
    }

    pub fn write_all(&mut self, mut data: &[u8]) -> Result<()> {
        self.inner.write_all(data)?;
        self.digest.write_slice(data);
        self.position += data.len() as u64;
        while !data.is_empty() {
            let take = (self.chunk_size - self.chunk_fill).min(data.len());
            self.chunk.write_slice(&data[..take]);
            self.chunk_fill += take;
            data = &data[take..];
            if self.chunk_fill == self.chunk_size {
                self.checksums.push(self.chunk.checksum());
                self.chunk = adler::Adler32::new();
                self.chunk_fill = 0;
            }
        }
        Ok(())
    }

    /// Returns the per-chunk checksums, the stream digest and the inner writer.
    pub fn finish(mut self) -> Result<(crate::types::Checksum, u32, W)> {
        if self.chunk_fill > 0 {
            self.checksums.push(self.chunk.checksum());
        }
        self.inner.flush()?;
        let checksum = crate::types::Checksum {
            chunk_size: self.chunk_size as u32,
            checksums: self.checksums,
        };
        Ok((checksum, self.digest.checksum(), self.inner))
    }
}
