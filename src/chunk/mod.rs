// src/chunk/mod.rs
//
// Chunked binary log storage.
//
// A chunk is a bounded append buffer of serialized records written to disk
// as one block: [base header][variant sub-header][body]. A log file is a
// sequence of such blocks; each block's header says how many body bytes
// follow. All fields are little-endian and fixed width.
//
// Base header (24 bytes):
//   marker u32 | version u16 | variant u16 | tag [u8;4] | !tag [u8;4]
//   | data_size u32 | !data_size u32

mod file;
mod logger;
mod plain;
mod sorted;

use byteorder::{LittleEndian as LE, ReadBytesExt, WriteBytesExt};
use std::io::{self, Read, Write};
use thiserror::Error;

use crate::record::{Record, RecordError, RecordHeader};

pub use file::{ChunkFileReader, ChunkLogWriter};
pub use logger::ChunkLogger;
pub use plain::Chunk;
pub use sorted::SortedChunk;

// ============================================================================
// Constants
// ============================================================================

/// Identifies the start of a chunk block.
pub const CHUNK_MARKER: u32 = 0xFC05_EA32;
pub const CHUNK_VERSION: u16 = 1;

/// Serialized size of [`ChunkHeader`].
pub const BASE_HEADER_SIZE: usize = 24;

/// Upper bound on a chunk body. Readers treat anything larger as corrupt.
pub const MAX_CHUNK_SIZE: usize = 512 * 1024;

// ============================================================================
// Errors
// ============================================================================

#[derive(Debug, Error)]
pub enum ChunkError {
    #[error("chunk full: record needs {needed} bytes, {available} left")]
    ChunkFull { needed: usize, available: usize },

    #[error("sorted chunk holds kind {expected}, got kind {found}")]
    KindMismatch { expected: u32, found: u32 },

    #[error("sorted chunk holds {expected:?} records, got {found:?}")]
    ShapeMismatch {
        expected: RecordHeader,
        found: RecordHeader,
    },

    #[error("corrupt chunk: {0}")]
    CorruptChunk(String),

    #[error("invalid chunk tag {0:?}: at most 4 ASCII characters")]
    InvalidTag(String),

    #[error(transparent)]
    Record(#[from] RecordError),

    #[error("chunk I/O error: {0}")]
    Io(#[from] io::Error),
}

impl ChunkError {
    fn corrupt(reason: impl Into<String>) -> Self {
        ChunkError::CorruptChunk(reason.into())
    }

    /// Full/mismatch errors: rotate the chunk and retry the append.
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            ChunkError::ChunkFull { .. }
                | ChunkError::KindMismatch { .. }
                | ChunkError::ShapeMismatch { .. }
        )
    }
}

// ============================================================================
// Tag and Header
// ============================================================================

/// Short label identifying what a chunk holds. NUL padded on disk.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct ChunkTag([u8; 4]);

impl ChunkTag {
    pub fn new(tag: &str) -> Result<Self, ChunkError> {
        if tag.len() > 4 || !tag.bytes().all(|b| b.is_ascii_graphic() || b == b' ') {
            return Err(ChunkError::InvalidTag(tag.to_string()));
        }
        let mut bytes = [0u8; 4];
        bytes[..tag.len()].copy_from_slice(tag.as_bytes());
        Ok(ChunkTag(bytes))
    }

    pub fn from_bytes(bytes: [u8; 4]) -> Self {
        ChunkTag(bytes)
    }

    pub fn bytes(&self) -> [u8; 4] {
        self.0
    }

    pub fn as_str(&self) -> &str {
        let len = self.0.iter().position(|&b| b == 0).unwrap_or(4);
        std::str::from_utf8(&self.0[..len]).unwrap_or("")
    }
}

impl std::fmt::Debug for ChunkTag {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "ChunkTag({:?})", self.as_str())
    }
}

impl std::fmt::Display for ChunkTag {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[repr(u16)]
pub enum ChunkVariant {
    Plain = 0,
    Sorted = 1,
}

impl ChunkVariant {
    fn from_u16(value: u16) -> Option<Self> {
        match value {
            0 => Some(ChunkVariant::Plain),
            1 => Some(ChunkVariant::Sorted),
            _ => None,
        }
    }
}

/// Base header shared by every chunk variant.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ChunkHeader {
    pub variant: ChunkVariant,
    pub tag: ChunkTag,
    pub data_size: u32,
}

impl ChunkHeader {
    pub fn write_to<W: Write>(&self, w: &mut W) -> io::Result<()> {
        let tag = self.tag.bytes();
        w.write_u32::<LE>(CHUNK_MARKER)?;
        w.write_u16::<LE>(CHUNK_VERSION)?;
        w.write_u16::<LE>(self.variant as u16)?;
        w.write_all(&tag)?;
        w.write_all(&tag.map(|b| !b))?;
        w.write_u32::<LE>(self.data_size)?;
        w.write_u32::<LE>(!self.data_size)
    }

    /// Read a base header. `Ok(None)` at a clean end of stream; a partial
    /// header is corrupt.
    pub fn read_from<R: Read>(r: &mut R) -> Result<Option<Self>, ChunkError> {
        let mut raw = [0u8; BASE_HEADER_SIZE];
        match read_full(r, &mut raw)? {
            0 => return Ok(None),
            BASE_HEADER_SIZE => {}
            n => {
                return Err(ChunkError::corrupt(format!(
                    "truncated header: {} of {} bytes",
                    n, BASE_HEADER_SIZE
                )))
            }
        }

        let mut cursor = &raw[..];
        let marker = cursor.read_u32::<LE>()?;
        if marker != CHUNK_MARKER {
            return Err(ChunkError::corrupt(format!("bad marker {:#010x}", marker)));
        }
        let version = cursor.read_u16::<LE>()?;
        if version != CHUNK_VERSION {
            return Err(ChunkError::corrupt(format!("unsupported version {}", version)));
        }
        let raw_variant = cursor.read_u16::<LE>()?;
        let variant = ChunkVariant::from_u16(raw_variant)
            .ok_or_else(|| ChunkError::corrupt(format!("unknown variant {}", raw_variant)))?;

        let mut tag = [0u8; 4];
        let mut inv_tag = [0u8; 4];
        cursor.read_exact(&mut tag)?;
        cursor.read_exact(&mut inv_tag)?;
        if tag.map(|b| !b) != inv_tag {
            return Err(ChunkError::corrupt("tag check failed"));
        }

        let data_size = cursor.read_u32::<LE>()?;
        let inv_data_size = cursor.read_u32::<LE>()?;
        if !data_size != inv_data_size {
            return Err(ChunkError::corrupt("data size check failed"));
        }
        if data_size as usize > MAX_CHUNK_SIZE {
            return Err(ChunkError::corrupt(format!(
                "data size {} exceeds {}",
                data_size, MAX_CHUNK_SIZE
            )));
        }

        Ok(Some(ChunkHeader {
            variant,
            tag: ChunkTag(tag),
            data_size,
        }))
    }
}

/// Read until `buf` is full or the stream ends. Returns bytes read.
pub(crate) fn read_full<R: Read>(r: &mut R, buf: &mut [u8]) -> io::Result<usize> {
    let mut filled = 0;
    while filled < buf.len() {
        match r.read(&mut buf[filled..]) {
            Ok(0) => break,
            Ok(n) => filled += n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => {}
            Err(e) => return Err(e),
        }
    }
    Ok(filled)
}

// ============================================================================
// Chunk Buffer
// ============================================================================

/// Bounded byte store behind every chunk. `clear` keeps the allocation.
#[derive(Debug, Clone)]
pub struct ChunkBuffer {
    capacity: usize,
    data: Vec<u8>,
}

impl ChunkBuffer {
    /// Capacities above `MAX_CHUNK_SIZE` are clamped.
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.min(MAX_CHUNK_SIZE),
            data: Vec::new(),
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Write position, equal to the bytes stored.
    pub fn cursor(&self) -> usize {
        self.data.len()
    }

    pub fn remaining(&self) -> usize {
        self.capacity - self.data.len()
    }

    pub fn as_slice(&self) -> &[u8] {
        &self.data
    }

    /// Fail with `ChunkFull` unless `needed` more bytes fit.
    pub fn ensure_room(&self, needed: usize) -> Result<(), ChunkError> {
        if needed > self.remaining() {
            return Err(ChunkError::ChunkFull {
                needed,
                available: self.remaining(),
            });
        }
        Ok(())
    }

    /// Callers check `ensure_room` first.
    fn extend(&mut self, bytes: &[u8]) {
        self.data.extend_from_slice(bytes);
    }

    fn clear(&mut self) {
        self.data.clear();
    }

    /// Replace the contents with `size` bytes from `r`.
    fn load<R: Read>(&mut self, r: &mut R, size: usize) -> Result<(), ChunkError> {
        if size > self.capacity {
            return Err(ChunkError::corrupt(format!(
                "body of {} bytes exceeds capacity {}",
                size, self.capacity
            )));
        }
        self.data.clear();
        self.data.resize(size, 0);
        let n = read_full(r, &mut self.data)?;
        if n != size {
            self.data.clear();
            return Err(ChunkError::corrupt(format!(
                "truncated body: {} of {} bytes",
                n, size
            )));
        }
        Ok(())
    }
}

// ============================================================================
// Chunk Trait
// ============================================================================

/// Operations shared by the chunk variants.
///
/// `write_header`/`read_header` move exactly `header_size()` bytes: the base
/// header plus the variant's sub-header. `write_to`/`read_from` add the body.
pub trait DataChunk {
    const VARIANT: ChunkVariant;

    fn buffer(&self) -> &ChunkBuffer;
    fn buffer_mut(&mut self) -> &mut ChunkBuffer;
    fn tag(&self) -> ChunkTag;
    fn set_tag(&mut self, tag: ChunkTag);

    /// Serialize `record` into the chunk. On error the chunk is unchanged.
    fn append(&mut self, record: &Record) -> Result<(), ChunkError>;

    /// Back to empty without releasing the buffer.
    fn clear(&mut self);

    fn sub_header_size(&self) -> usize;
    fn write_sub_header<W: Write>(&self, w: &mut W) -> io::Result<()>;
    fn read_sub_header<R: Read>(&mut self, r: &mut R) -> Result<(), ChunkError>;

    /// Check a freshly loaded body against the headers.
    fn validate_body(&self) -> Result<(), ChunkError>;

    /// Decode the body back into records.
    fn records(&self) -> Result<Vec<Record>, ChunkError>;

    fn capacity(&self) -> usize {
        self.buffer().capacity()
    }

    fn cursor(&self) -> usize {
        self.buffer().cursor()
    }

    fn is_empty(&self) -> bool {
        self.cursor() == 0
    }

    fn body(&self) -> &[u8] {
        self.buffer().as_slice()
    }

    fn header_size(&self) -> usize {
        BASE_HEADER_SIZE + self.sub_header_size()
    }

    /// Bytes `write_to` produces.
    fn serialized_size(&self) -> usize {
        self.header_size() + self.cursor()
    }

    fn write_header<W: Write>(&self, w: &mut W) -> Result<(), ChunkError> {
        ChunkHeader {
            variant: Self::VARIANT,
            tag: self.tag(),
            data_size: self.cursor() as u32,
        }
        .write_to(w)?;
        self.write_sub_header(w)?;
        Ok(())
    }

    /// Read the headers of the next block into this (cleared) chunk.
    /// Returns the body size they announce.
    fn read_header<R: Read>(&mut self, r: &mut R) -> Result<usize, ChunkError> {
        let base = ChunkHeader::read_from(r)?
            .ok_or_else(|| ChunkError::corrupt("missing chunk header"))?;
        self.accept_header(base, r)
    }

    /// Continue `read_header` once the base header has been read.
    fn accept_header<R: Read>(&mut self, base: ChunkHeader, r: &mut R) -> Result<usize, ChunkError> {
        if base.variant != Self::VARIANT {
            return Err(ChunkError::corrupt(format!(
                "expected {:?} chunk, found {:?}",
                Self::VARIANT,
                base.variant
            )));
        }
        if base.data_size as usize > self.capacity() {
            return Err(ChunkError::corrupt(format!(
                "data size {} exceeds capacity {}",
                base.data_size,
                self.capacity()
            )));
        }
        self.clear();
        self.set_tag(base.tag);
        self.read_sub_header(r)?;
        Ok(base.data_size as usize)
    }

    /// Load `size` body bytes and validate them. On error the chunk is cleared.
    fn read_body<R: Read>(&mut self, r: &mut R, size: usize) -> Result<(), ChunkError> {
        let mut loaded = self.buffer_mut().load(r, size);
        if loaded.is_ok() {
            loaded = self.validate_body();
        }
        if loaded.is_err() {
            self.clear();
        }
        loaded
    }

    /// Write headers and body as one block. Returns bytes written.
    fn write_to<W: Write>(&self, w: &mut W) -> Result<usize, ChunkError> {
        self.write_header(w)?;
        w.write_all(self.body())?;
        Ok(self.serialized_size())
    }

    /// Replace this chunk with the next block from `r`.
    fn read_from<R: Read>(&mut self, r: &mut R) -> Result<(), ChunkError> {
        let size = self.read_header(r)?;
        self.read_body(r, size)
    }
}

// ============================================================================
// Either Variant
// ============================================================================

/// A chunk read back from a log, whichever variant it was written as.
#[derive(Debug, Clone)]
pub enum AnyChunk {
    Plain(Chunk),
    Sorted(SortedChunk),
}

impl AnyChunk {
    /// Read the next block. `Ok(None)` at a clean end of stream.
    pub fn read_from<R: Read>(r: &mut R) -> Result<Option<Self>, ChunkError> {
        let Some(base) = ChunkHeader::read_from(r)? else {
            return Ok(None);
        };

        let chunk = match base.variant {
            ChunkVariant::Plain => {
                let mut chunk = Chunk::new(base.tag, MAX_CHUNK_SIZE);
                let size = chunk.accept_header(base, r)?;
                chunk.read_body(r, size)?;
                AnyChunk::Plain(chunk)
            }
            ChunkVariant::Sorted => {
                let mut chunk = SortedChunk::new(base.tag, MAX_CHUNK_SIZE);
                let size = chunk.accept_header(base, r)?;
                chunk.read_body(r, size)?;
                AnyChunk::Sorted(chunk)
            }
        };
        Ok(Some(chunk))
    }

    pub fn variant(&self) -> ChunkVariant {
        match self {
            AnyChunk::Plain(_) => ChunkVariant::Plain,
            AnyChunk::Sorted(_) => ChunkVariant::Sorted,
        }
    }

    pub fn tag(&self) -> ChunkTag {
        match self {
            AnyChunk::Plain(c) => c.tag(),
            AnyChunk::Sorted(c) => c.tag(),
        }
    }

    pub fn cursor(&self) -> usize {
        match self {
            AnyChunk::Plain(c) => c.cursor(),
            AnyChunk::Sorted(c) => c.cursor(),
        }
    }

    pub fn records(&self) -> Result<Vec<Record>, ChunkError> {
        match self {
            AnyChunk::Plain(c) => c.records(),
            AnyChunk::Sorted(c) => c.records(),
        }
    }
}

// ============================================================================
// Tests
// ============================================================================
