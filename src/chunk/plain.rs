// src/chunk/plain.rs
//
// Plain chunk: records of any kind, each stored with its full 12-byte header.
// Body: [record header][payload][record header][payload]...

use std::io::{self, Read, Write};

use super::{ChunkBuffer, ChunkError, ChunkTag, ChunkVariant, DataChunk};
use crate::record::Record;

#[derive(Debug, Clone)]
pub struct Chunk {
    tag: ChunkTag,
    buf: ChunkBuffer,
}

impl Chunk {
    /// Empty chunk whose body holds at most `capacity` bytes.
    pub fn new(tag: ChunkTag, capacity: usize) -> Self {
        Self {
            tag,
            buf: ChunkBuffer::new(capacity),
        }
    }
}

impl DataChunk for Chunk {
    const VARIANT: ChunkVariant = ChunkVariant::Plain;

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

    fn append(&mut self, record: &Record) -> Result<(), ChunkError> {
        self.buf.ensure_room(record.encoded_len())?;
        let mut bytes = Vec::with_capacity(record.encoded_len());
        record.encode_into(&mut bytes);
        self.buf.extend(&bytes);
        Ok(())
    }

    fn clear(&mut self) {
        self.buf.clear();
    }

    fn sub_header_size(&self) -> usize {
        0
    }

    fn write_sub_header<W: Write>(&self, _w: &mut W) -> io::Result<()> {
        Ok(())
    }

    fn read_sub_header<R: Read>(&mut self, _r: &mut R) -> Result<(), ChunkError> {
        Ok(())
    }

    fn validate_body(&self) -> Result<(), ChunkError> {
        self.records().map(|_| ())
    }

    fn records(&self) -> Result<Vec<Record>, ChunkError> {
        let mut body = self.buf.as_slice();
        let mut records = Vec::new();
        while !body.is_empty() {
            let (record, used) = Record::decode(body)
                .map_err(|e| ChunkError::CorruptChunk(format!("record {}: {}", records.len(), e)))?;
            records.push(record);
            body = &body[used..];
        }
        Ok(records)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chunk::BASE_HEADER_SIZE;
    use crate::record::RECORD_HEADER_SIZE;

    fn tag(s: &str) -> ChunkTag {
        ChunkTag::new(s).unwrap()
    }

    fn record(kind: u32, len: usize) -> Record {
        Record::new(kind, 0, vec![kind as u8; len]).unwrap()
    }

    #[test]
    fn test_append_until_full() {
        let mut chunk = Chunk::new(tag("DATA"), 32);
        chunk.append(&record(1, 2)).unwrap();
        chunk.append(&record(2, 2)).unwrap();
        assert_eq!(chunk.cursor(), 28);

        let before = chunk.body().to_vec();
        let err = chunk.append(&record(3, 2)).unwrap_err();
        assert!(matches!(
            err,
            ChunkError::ChunkFull {
                needed: 14,
                available: 4
            }
        ));
        assert_eq!(chunk.cursor(), 28);
        assert_eq!(chunk.body(), &before[..]);

        // Not even a header-only record fits in the remaining 4 bytes
        assert!(chunk.append(&Record::heartbeat(9)).is_err());
    }

    #[test]
    fn test_heartbeat_accepted() {
        let mut chunk = Chunk::new(tag("HB"), 64);
        chunk.append(&Record::heartbeat(4)).unwrap();
        assert_eq!(chunk.cursor(), RECORD_HEADER_SIZE);
        assert_eq!(chunk.records().unwrap(), vec![Record::heartbeat(4)]);
    }

    #[test]
    fn test_mixed_kinds_round_trip_through_file_bytes() {
        let mut chunk = Chunk::new(tag("MIX"), 256);
        let records = vec![record(1, 3), Record::heartbeat(2), record(7, 10)];
        for r in &records {
            chunk.append(r).unwrap();
        }

        let mut bytes = Vec::new();
        let written = chunk.write_to(&mut bytes).unwrap();
        assert_eq!(written, bytes.len());
        assert_eq!(written, BASE_HEADER_SIZE + chunk.cursor());

        let mut loaded = Chunk::new(tag("X"), 256);
        loaded.read_from(&mut &bytes[..]).unwrap();
        assert_eq!(loaded.tag().as_str(), "MIX");
        assert_eq!(loaded.body(), chunk.body());
        assert_eq!(loaded.records().unwrap(), records);
    }

    #[test]
    fn test_clear_matches_fresh_chunk() {
        let fresh = Chunk::new(tag("DATA"), 64);
        let mut used = Chunk::new(tag("DATA"), 64);
        used.append(&record(1, 20)).unwrap();
        used.clear();

        assert_eq!(used.header_size(), fresh.header_size());
        assert_eq!(used.cursor(), 0);

        let mut fresh = fresh;
        for chunk in [&mut used, &mut fresh] {
            chunk.append(&record(5, 30)).unwrap();
            assert!(chunk.append(&record(5, 30)).is_err());
        }
        assert_eq!(used.body(), fresh.body());
    }

    #[test]
    fn test_truncated_body_is_corrupt() {
        let mut chunk = Chunk::new(tag("DATA"), 64);
        chunk.append(&record(1, 8)).unwrap();
        let mut bytes = Vec::new();
        chunk.write_to(&mut bytes).unwrap();
        bytes.truncate(bytes.len() - 3);

        let mut loaded = Chunk::new(tag("DATA"), 64);
        assert!(matches!(
            loaded.read_from(&mut &bytes[..]),
            Err(ChunkError::CorruptChunk(_))
        ));
        assert!(loaded.is_empty());
    }

    #[test]
    fn test_body_with_bad_record_size_is_corrupt() {
        let mut chunk = Chunk::new(tag("DATA"), 64);
        chunk.append(&record(1, 4)).unwrap();
        let mut bytes = Vec::new();
        chunk.write_to(&mut bytes).unwrap();
        // Record header claims more payload than the body holds
        bytes[BASE_HEADER_SIZE + 4] = 9;

        let mut loaded = Chunk::new(tag("DATA"), 64);
        assert!(matches!(
            loaded.read_from(&mut &bytes[..]),
            Err(ChunkError::CorruptChunk(_))
        ));
    }

    #[test]
    fn test_body_larger_than_capacity_is_corrupt() {
        let mut chunk = Chunk::new(tag("DATA"), 128);
        chunk.append(&record(1, 50)).unwrap();
        let mut bytes = Vec::new();
        chunk.write_to(&mut bytes).unwrap();

        let mut small = Chunk::new(tag("DATA"), 16);
        assert!(matches!(
            small.read_from(&mut &bytes[..]),
            Err(ChunkError::CorruptChunk(_))
        ));
    }
}
