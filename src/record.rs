// src/record.rs
//
// Record model shared by the serial transport, the chunk store and the text codec.
//
// Wire/in-memory layout (little-endian):
//   [kind u32][size u32][offset u32][payload: size bytes]

use byteorder::{LittleEndian as LE, ReadBytesExt, WriteBytesExt};
use std::io::{self, Read, Write};
use thiserror::Error;

/// Maximum payload length of a single record, shared by every component.
pub const MAX_BODY_SIZE: usize = 1024;

/// Serialized size of [`RecordHeader`].
pub const RECORD_HEADER_SIZE: usize = 12;

#[derive(Debug, Error)]
pub enum RecordError {
    #[error("payload of {size} bytes exceeds the {max} byte body limit")]
    TooLarge { size: usize, max: usize },

    #[error("truncated record: need {needed} bytes, have {available}")]
    Truncated { needed: usize, available: usize },
}

/// Header fields of a record: which layout, how many bytes, and where the
/// payload sits inside the larger structure it is a fragment of.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct RecordHeader {
    pub kind: u32,
    pub size: u32,
    pub offset: u32,
}

impl RecordHeader {
    pub fn write_to<W: Write>(&self, w: &mut W) -> io::Result<()> {
        w.write_u32::<LE>(self.kind)?;
        w.write_u32::<LE>(self.size)?;
        w.write_u32::<LE>(self.offset)
    }

    pub fn read_from<R: Read>(r: &mut R) -> io::Result<Self> {
        Ok(RecordHeader {
            kind: r.read_u32::<LE>()?,
            size: r.read_u32::<LE>()?,
            offset: r.read_u32::<LE>()?,
        })
    }

    /// Decode a header from the front of `bytes`.
    pub fn parse(bytes: &[u8]) -> Result<Self, RecordError> {
        if bytes.len() < RECORD_HEADER_SIZE {
            return Err(RecordError::Truncated {
                needed: RECORD_HEADER_SIZE,
                available: bytes.len(),
            });
        }
        let mut cursor = bytes;
        // Length checked above, the slice reader cannot run dry
        Self::read_from(&mut cursor).map_err(|_| RecordError::Truncated {
            needed: RECORD_HEADER_SIZE,
            available: bytes.len(),
        })
    }
}

/// One framed unit of device data.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Record {
    kind: u32,
    offset: u32,
    payload: Vec<u8>,
}

impl Record {
    /// Build a record, enforcing the body size limit.
    pub fn new(kind: u32, offset: u32, payload: Vec<u8>) -> Result<Self, RecordError> {
        if payload.len() > MAX_BODY_SIZE {
            return Err(RecordError::TooLarge {
                size: payload.len(),
                max: MAX_BODY_SIZE,
            });
        }
        Ok(Record {
            kind,
            offset,
            payload,
        })
    }

    /// A header-only record with an empty payload.
    pub fn heartbeat(kind: u32) -> Self {
        Record {
            kind,
            offset: 0,
            payload: Vec::new(),
        }
    }

    pub fn kind(&self) -> u32 {
        self.kind
    }

    pub fn size(&self) -> u32 {
        self.payload.len() as u32
    }

    pub fn offset(&self) -> u32 {
        self.offset
    }

    pub fn payload(&self) -> &[u8] {
        &self.payload
    }

    pub fn into_payload(self) -> Vec<u8> {
        self.payload
    }

    pub fn header(&self) -> RecordHeader {
        RecordHeader {
            kind: self.kind,
            size: self.size(),
            offset: self.offset,
        }
    }

    /// Bytes this record occupies in its wire form (header + payload).
    pub fn encoded_len(&self) -> usize {
        RECORD_HEADER_SIZE + self.payload.len()
    }

    /// Append the wire form to `out`.
    pub fn encode_into(&self, out: &mut Vec<u8>) {
        out.reserve(self.encoded_len());
        out.extend_from_slice(&self.kind.to_le_bytes());
        out.extend_from_slice(&self.size().to_le_bytes());
        out.extend_from_slice(&self.offset.to_le_bytes());
        out.extend_from_slice(&self.payload);
    }

    pub fn encode(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(self.encoded_len());
        self.encode_into(&mut out);
        out
    }

    /// Decode one record from the front of `bytes`.
    /// Returns the record and the number of bytes consumed.
    pub fn decode(bytes: &[u8]) -> Result<(Self, usize), RecordError> {
        let header = RecordHeader::parse(bytes)?;
        let size = header.size as usize;
        if size > MAX_BODY_SIZE {
            return Err(RecordError::TooLarge {
                size,
                max: MAX_BODY_SIZE,
            });
        }
        let end = RECORD_HEADER_SIZE + size;
        if bytes.len() < end {
            return Err(RecordError::Truncated {
                needed: end,
                available: bytes.len(),
            });
        }
        let record = Record {
            kind: header.kind,
            offset: header.offset,
            payload: bytes[RECORD_HEADER_SIZE..end].to_vec(),
        };
        Ok((record, end))
    }
}
