// src/chunk/sorted.rs
//
// Sorted chunk: records of a single kind and shape, pre-grouped before they
// reach the chunk. The per-record header is replaced by one sub-header taken
// from the first record; each record keeps a u32 serial number so sorted
// logs can be merged back into arrival order.
//
// Sub-header (16 bytes): kind u32 | payload_size u32 | offset u32 | record_count u32
// Body: [serial u32][payload][serial u32][payload]...

use byteorder::{LittleEndian as LE, ReadBytesExt, WriteBytesExt};
use std::io::{self, Read, Write};

use super::{ChunkBuffer, ChunkError, ChunkTag, ChunkVariant, DataChunk};
use crate::record::{Record, RecordHeader, MAX_BODY_SIZE};

/// Serialized size of the sorted sub-header.
pub const SORTED_SUB_HEADER_SIZE: usize = 16;

const SERIAL_SIZE: usize = 4;

#[derive(Debug, Clone)]
pub struct SortedChunk {
    tag: ChunkTag,
    buf: ChunkBuffer,
    /// Header of the first record; `None` while empty
    template: Option<RecordHeader>,
    record_count: u32,
}

impl SortedChunk {
    pub fn new(tag: ChunkTag, capacity: usize) -> Self {
        Self {
            tag,
            buf: ChunkBuffer::new(capacity),
            template: None,
            record_count: 0,
        }
    }

    pub fn record_count(&self) -> u32 {
        self.record_count
    }

    /// Kind/size/offset every record in this chunk shares.
    pub fn template(&self) -> Option<RecordHeader> {
        self.template
    }

    pub fn kind(&self) -> Option<u32> {
        self.template.map(|t| t.kind)
    }

    /// Append with an explicit serial number (session-wide arrival order).
    pub fn append_ordered(&mut self, record: &Record, serial: u32) -> Result<(), ChunkError> {
        let header = record.header();
        if let Some(template) = self.template {
            if header.kind != template.kind {
                return Err(ChunkError::KindMismatch {
                    expected: template.kind,
                    found: header.kind,
                });
            }
            if header != template {
                return Err(ChunkError::ShapeMismatch {
                    expected: template,
                    found: header,
                });
            }
        }

        self.buf.ensure_room(SERIAL_SIZE + record.payload().len())?;

        self.buf.extend(&serial.to_le_bytes());
        self.buf.extend(record.payload());
        self.template.get_or_insert(header);
        self.record_count += 1;
        Ok(())
    }

    /// Records with their serial numbers, in chunk order.
    pub fn ordered_records(&self) -> Result<Vec<(u32, Record)>, ChunkError> {
        let Some(template) = self.template else {
            return Ok(Vec::new());
        };

        let stride = SERIAL_SIZE + template.size as usize;
        self.buf
            .as_slice()
            .chunks_exact(stride)
            .map(|slot| -> Result<(u32, Record), ChunkError> {
                let serial = u32::from_le_bytes([slot[0], slot[1], slot[2], slot[3]]);
                let record = Record::new(template.kind, template.offset, slot[SERIAL_SIZE..].to_vec())?;
                Ok((serial, record))
            })
            .collect()
    }
}

impl DataChunk for SortedChunk {
    const VARIANT: ChunkVariant = ChunkVariant::Sorted;

    fn buffer(&self) -> &ChunkBuffer {
        &self.buf
    }

    fn buffer_mut(&mut self) -> &mut ChunkBuffer {
        &mut self.buf
    }

    fn tag(&self) -> ChunkTag {
        self.tag
    }

    fn set_tag(&mut self, tag: ChunkTag) {
        self.tag = tag;
    }

    /// Serial numbers count from zero within the chunk.
    fn append(&mut self, record: &Record) -> Result<(), ChunkError> {
        self.append_ordered(record, self.record_count)
    }

    fn clear(&mut self) {
        self.buf.clear();
        self.template = None;
        self.record_count = 0;
    }

    fn sub_header_size(&self) -> usize {
        SORTED_SUB_HEADER_SIZE
    }

    fn write_sub_header<W: Write>(&self, w: &mut W) -> io::Result<()> {
        let template = self.template.unwrap_or_default();
        template.write_to(w)?;
        w.write_u32::<LE>(self.record_count)
    }

    fn read_sub_header<R: Read>(&mut self, r: &mut R) -> Result<(), ChunkError> {
        let read = RecordHeader::read_from(r).and_then(|t| Ok((t, r.read_u32::<LE>()?)));
        let (template, count) = read.map_err(|e| match e.kind() {
            io::ErrorKind::UnexpectedEof => ChunkError::CorruptChunk("truncated sub-header".into()),
            _ => ChunkError::Io(e),
        })?;

        if template.size as usize > MAX_BODY_SIZE {
            return Err(ChunkError::CorruptChunk(format!(
                "sub-header payload size {} exceeds {}",
                template.size, MAX_BODY_SIZE
            )));
        }

        self.record_count = count;
        self.template = (count > 0).then_some(template);
        Ok(())
    }

    fn validate_body(&self) -> Result<(), ChunkError> {
        let stride = SERIAL_SIZE + self.template.map_or(0, |t| t.size as usize);
        let expected = stride * self.record_count as usize;
        if expected != self.cursor() {
            return Err(ChunkError::CorruptChunk(format!(
                "{} records of {} bytes need {} body bytes, found {}",
                self.record_count,
                stride,
                expected,
                self.cursor()
            )));
        }
        Ok(())
    }

    fn records(&self) -> Result<Vec<Record>, ChunkError> {
        Ok(self
            .ordered_records()?
            .into_iter()
            .map(|(_, record)| record)
            .collect())
    }
}
