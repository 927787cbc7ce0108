// src/chunk/logger.rs
//
// Record sink that fills chunks and hands them to a ChunkLogWriter.
// Plain mode keeps one chunk for every kind. Sorted mode keeps one sorted
// chunk per kind and stamps each record with a session-wide serial number.

use std::collections::BTreeMap;
use std::path::PathBuf;

use super::{Chunk, ChunkError, ChunkLogWriter, ChunkTag, DataChunk, SortedChunk};
use crate::config::{ChunkSettings, SessionConfig};
use crate::record::Record;

enum Sink {
    Plain(Chunk),
    Sorted(BTreeMap<u32, SortedChunk>),
}

pub struct ChunkLogger {
    tag: ChunkTag,
    capacity: usize,
    sink: Sink,
    writer: ChunkLogWriter,
    next_serial: u32,
    records_logged: u64,
}

impl ChunkLogger {
    pub fn new(writer: ChunkLogWriter, settings: &ChunkSettings) -> Result<Self, ChunkError> {
        let tag = ChunkTag::new(&settings.tag)?;
        let sink = if settings.sorted {
            Sink::Sorted(BTreeMap::new())
        } else {
            Sink::Plain(Chunk::new(tag, settings.capacity))
        };

        Ok(Self {
            tag,
            capacity: settings.capacity,
            sink,
            writer,
            next_serial: 0,
            records_logged: 0,
        })
    }

    pub fn from_config(config: &SessionConfig) -> Result<Self, ChunkError> {
        Self::new(ChunkLogWriter::from_settings(&config.log)?, &config.chunk)
    }

    /// Store one record. Full chunks (and, in sorted mode, chunks whose
    /// record shape changed) are written out and the append retried once.
    pub fn log(&mut self, record: &Record) -> Result<(), ChunkError> {
        match &mut self.sink {
            Sink::Plain(chunk) => {
                if let Err(e) = chunk.append(record) {
                    if !e.is_recoverable() {
                        return Err(e);
                    }
                    self.writer.write_chunk(chunk)?;
                    chunk.clear();
                    chunk.append(record)?;
                }
            }
            Sink::Sorted(chunks) => {
                let (tag, capacity) = (self.tag, self.capacity);
                let chunk = chunks
                    .entry(record.kind())
                    .or_insert_with(|| SortedChunk::new(tag, capacity));

                if let Err(e) = chunk.append_ordered(record, self.next_serial) {
                    if !e.is_recoverable() {
                        return Err(e);
                    }
                    self.writer.write_chunk(chunk)?;
                    chunk.clear();
                    chunk.append_ordered(record, self.next_serial)?;
                }
                self.next_serial = self.next_serial.wrapping_add(1);
            }
        }

        self.records_logged += 1;
        Ok(())
    }

    /// Write every partly filled chunk and start them afresh.
    pub fn flush(&mut self) -> Result<(), ChunkError> {
        match &mut self.sink {
            Sink::Plain(chunk) => {
                self.writer.write_chunk(chunk)?;
                chunk.clear();
            }
            Sink::Sorted(chunks) => {
                for chunk in chunks.values_mut() {
                    self.writer.write_chunk(chunk)?;
                    chunk.clear();
                }
            }
        }
        self.writer.flush()
    }

    pub fn records_logged(&self) -> u64 {
        self.records_logged
    }

    /// Flush, close the current file and return every file written.
    pub fn finish(mut self) -> Result<Vec<PathBuf>, ChunkError> {
        self.flush()?;
        let files = self.writer.finish()?;
        tlog!(
            "[chunk] Logged {} records to {} file(s)",
            self.records_logged,
            files.len()
        );
        Ok(files)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chunk::{AnyChunk, ChunkFileReader};

    fn settings(capacity: usize, sorted: bool) -> ChunkSettings {
        ChunkSettings {
            capacity,
            tag: "LOG".to_string(),
            sorted,
        }
    }

    fn read_all(files: &[PathBuf]) -> Vec<AnyChunk> {
        files
            .iter()
            .flat_map(|path| ChunkFileReader::open(path).unwrap())
            .map(|chunk| chunk.unwrap())
            .collect()
    }

    #[test]
    fn test_plain_logger_rolls_full_chunks() {
        let dir = tempfile::tempdir().unwrap();
        let writer = ChunkLogWriter::new(dir.path(), 1 << 20).unwrap();
        // Three 20-byte records per chunk
        let mut logger = ChunkLogger::new(writer, &settings(64, false)).unwrap();

        let records: Vec<Record> = (0..7)
            .map(|i| Record::new(i % 3, 0, vec![i as u8; 8]).unwrap())
            .collect();
        for r in &records {
            logger.log(r).unwrap();
        }
        assert_eq!(logger.records_logged(), 7);

        let chunks = read_all(&logger.finish().unwrap());
        assert_eq!(chunks.len(), 3);
        let replayed: Vec<Record> = chunks
            .iter()
            .flat_map(|c| c.records().unwrap())
            .collect();
        assert_eq!(replayed, records);
    }

    #[test]
    fn test_sorted_logger_groups_by_kind_and_keeps_order() {
        let dir = tempfile::tempdir().unwrap();
        let writer = ChunkLogWriter::new(dir.path(), 1 << 20).unwrap();
        let mut logger = ChunkLogger::new(writer, &settings(256, true)).unwrap();

        let records = vec![
            Record::new(1, 0, vec![1; 4]).unwrap(),
            Record::new(2, 0, vec![2; 6]).unwrap(),
            Record::new(1, 0, vec![3; 4]).unwrap(),
            Record::heartbeat(9),
            Record::new(2, 0, vec![4; 6]).unwrap(),
        ];
        for r in &records {
            logger.log(r).unwrap();
        }

        let chunks = read_all(&logger.finish().unwrap());
        assert_eq!(chunks.len(), 3);

        let mut merged: Vec<(u32, Record)> = Vec::new();
        for chunk in &chunks {
            let AnyChunk::Sorted(sorted) = chunk else {
                panic!("expected sorted chunk");
            };
            assert!(sorted.record_count() > 0);
            merged.extend(sorted.ordered_records().unwrap());
        }
        merged.sort_by_key(|(serial, _)| *serial);
        let replayed: Vec<Record> = merged.into_iter().map(|(_, r)| r).collect();
        assert_eq!(replayed, records);
    }

    #[test]
    fn test_sorted_logger_splits_on_shape_change() {
        let dir = tempfile::tempdir().unwrap();
        let writer = ChunkLogWriter::new(dir.path(), 1 << 20).unwrap();
        let mut logger = ChunkLogger::new(writer, &settings(256, true)).unwrap();

        logger.log(&Record::new(5, 0, vec![0; 4]).unwrap()).unwrap();
        logger.log(&Record::new(5, 4, vec![0; 4]).unwrap()).unwrap();

        let chunks = read_all(&logger.finish().unwrap());
        assert_eq!(chunks.len(), 2);
        let offsets: Vec<u32> = chunks
            .iter()
            .map(|c| c.records().unwrap()[0].offset())
            .collect();
        assert_eq!(offsets, vec![0, 4]);
    }

    #[test]
    fn test_record_larger_than_chunk_is_reported() {
        let dir = tempfile::tempdir().unwrap();
        let writer = ChunkLogWriter::new(dir.path(), 1 << 20).unwrap();
        let mut logger = ChunkLogger::new(writer, &settings(16, false)).unwrap();

        let err = logger.log(&Record::new(1, 0, vec![0; 32]).unwrap()).unwrap_err();
        assert!(matches!(err, ChunkError::ChunkFull { .. }));
        assert_eq!(logger.records_logged(), 0);
    }
}
