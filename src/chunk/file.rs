// src/chunk/file.rs
//
// Chunk log files: a directory of size-bounded files, each a sequence of
// chunk blocks. Files are named LOG_<yyyymmdd_hhmmss>_<index>.dat, with one
// timestamp per writer and the index counting rotations.

use std::fs::File;
use std::io::{BufReader, BufWriter, Read, Write};
use std::path::{Path, PathBuf};

use super::{AnyChunk, ChunkError, DataChunk};
use crate::config::LogSettings;

// ============================================================================
// Writer
// ============================================================================

pub struct ChunkLogWriter {
    dir: PathBuf,
    max_file_size: u64,
    stamp: String,
    index: u32,
    file: Option<BufWriter<File>>,
    file_size: u64,
    files: Vec<PathBuf>,
}

impl ChunkLogWriter {
    pub fn new(dir: &Path, max_file_size: u64) -> Result<Self, ChunkError> {
        std::fs::create_dir_all(dir)?;
        Ok(Self {
            dir: dir.to_path_buf(),
            max_file_size,
            stamp: chrono::Local::now().format("%Y%m%d_%H%M%S").to_string(),
            index: 0,
            file: None,
            file_size: 0,
            files: Vec::new(),
        })
    }

    pub fn from_settings(settings: &LogSettings) -> Result<Self, ChunkError> {
        Self::new(&settings.dir, settings.max_file_size)
    }

    /// Append one chunk block. Empty chunks are skipped. A new file is started
    /// when this block would push the current one past `max_file_size`; a
    /// block larger than the limit still gets a file of its own.
    pub fn write_chunk<C: DataChunk>(&mut self, chunk: &C) -> Result<(), ChunkError> {
        if chunk.is_empty() {
            return Ok(());
        }

        let size = chunk.serialized_size() as u64;
        if self.file.is_some() && self.file_size > 0 && self.file_size + size > self.max_file_size {
            self.rotate()?;
        }

        if self.file.is_none() {
            self.open_next()?;
        }
        if let Some(file) = self.file.as_mut() {
            chunk.write_to(file)?;
            self.file_size += size;
        }
        Ok(())
    }

    /// Paths of every file this writer has created, oldest first.
    pub fn files(&self) -> &[PathBuf] {
        &self.files
    }

    pub fn current_file_size(&self) -> u64 {
        self.file_size
    }

    /// Flush buffered blocks to disk.
    pub fn flush(&mut self) -> Result<(), ChunkError> {
        if let Some(file) = self.file.as_mut() {
            file.flush()?;
        }
        Ok(())
    }

    /// Flush and close the current file. Returns all files written.
    pub fn finish(mut self) -> Result<Vec<PathBuf>, ChunkError> {
        self.close_current()?;
        Ok(std::mem::take(&mut self.files))
    }

    fn rotate(&mut self) -> Result<(), ChunkError> {
        self.close_current()?;
        self.open_next()
    }

    fn close_current(&mut self) -> Result<(), ChunkError> {
        if let Some(mut file) = self.file.take() {
            file.flush()?;
            file.get_ref().sync_data()?;
        }
        self.file_size = 0;
        Ok(())
    }

    fn log_path(&self) -> PathBuf {
        self.dir
            .join(format!("LOG_{}_{:04}.dat", self.stamp, self.index))
    }

    fn open_next(&mut self) -> Result<(), ChunkError> {
        // Another writer started in the same second may own earlier indices
        let mut path = self.log_path();
        while path.exists() {
            self.index += 1;
            path = self.log_path();
        }
        let file = File::create(&path)?;
        tlog!("[chunk] Writing {}", path.display());

        self.index += 1;
        self.file_size = 0;
        self.files.push(path);
        self.file = Some(BufWriter::new(file));
        Ok(())
    }
}

impl Drop for ChunkLogWriter {
    fn drop(&mut self) {
        if let Err(e) = self.close_current() {
            tlog!("[chunk] Failed to close log file: {}", e);
        }
    }
}

// ============================================================================
// Reader
// ============================================================================

/// Iterates the chunk blocks of one log stream. Stops after the first
/// corrupt block; nothing past it is trusted.
pub struct ChunkFileReader<R: Read> {
    reader: R,
    failed: bool,
}

impl ChunkFileReader<BufReader<File>> {
    pub fn open(path: &Path) -> Result<Self, ChunkError> {
        Ok(Self::new(BufReader::new(File::open(path)?)))
    }
}

impl<R: Read> ChunkFileReader<R> {
    pub fn new(reader: R) -> Self {
        Self {
            reader,
            failed: false,
        }
    }
}

impl<R: Read> Iterator for ChunkFileReader<R> {
    type Item = Result<AnyChunk, ChunkError>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.failed {
            return None;
        }
        match AnyChunk::read_from(&mut self.reader) {
            Ok(Some(chunk)) => Some(Ok(chunk)),
            Ok(None) => None,
            Err(e) => {
                self.failed = true;
                Some(Err(e))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chunk::{Chunk, ChunkTag, ChunkVariant, SortedChunk};
    use crate::record::Record;

    fn tag(s: &str) -> ChunkTag {
        ChunkTag::new(s).unwrap()
    }

    fn filled_chunk(kind: u32, count: usize) -> Chunk {
        let mut chunk = Chunk::new(tag("DATA"), 1024);
        for i in 0..count {
            chunk
                .append(&Record::new(kind, 0, vec![i as u8; 8]).unwrap())
                .unwrap();
        }
        chunk
    }

    #[test]
    fn test_write_and_read_back_mixed_variants() {
        let dir = tempfile::tempdir().unwrap();
        let mut writer = ChunkLogWriter::new(dir.path(), 1 << 20).unwrap();

        let plain = filled_chunk(1, 3);
        let mut sorted = SortedChunk::new(tag("IMU"), 256);
        sorted
            .append_ordered(&Record::new(2, 0, vec![7; 4]).unwrap(), 11)
            .unwrap();

        writer.write_chunk(&plain).unwrap();
        writer.write_chunk(&sorted).unwrap();
        writer.write_chunk(&Chunk::new(tag("NONE"), 16)).unwrap();
        let files = writer.finish().unwrap();
        assert_eq!(files.len(), 1);

        let name = files[0].file_name().unwrap().to_string_lossy().to_string();
        assert!(name.starts_with("LOG_"));
        assert!(name.ends_with("_0000.dat"));

        let chunks: Vec<_> = ChunkFileReader::open(&files[0])
            .unwrap()
            .collect::<Result<_, _>>()
            .unwrap();
        assert_eq!(chunks.len(), 2);
        assert_eq!(chunks[0].variant(), ChunkVariant::Plain);
        assert_eq!(chunks[0].records().unwrap().len(), 3);
        assert_eq!(chunks[1].variant(), ChunkVariant::Sorted);
        assert_eq!(chunks[1].tag().as_str(), "IMU");
        assert_eq!(
            chunks[1].records().unwrap(),
            vec![Record::new(2, 0, vec![7; 4]).unwrap()]
        );
    }

    #[test]
    fn test_rotation_bounds_file_size() {
        let dir = tempfile::tempdir().unwrap();
        let chunk = filled_chunk(1, 4);
        let block = chunk.serialized_size() as u64;
        let mut writer = ChunkLogWriter::new(dir.path(), block * 2).unwrap();

        for _ in 0..5 {
            writer.write_chunk(&chunk).unwrap();
        }
        let files = writer.finish().unwrap();
        assert_eq!(files.len(), 3);

        let mut total = 0;
        for path in &files {
            let len = std::fs::metadata(path).unwrap().len();
            assert!(len <= block * 2);
            total += ChunkFileReader::open(path).unwrap().count();
        }
        assert_eq!(total, 5);
    }

    #[test]
    fn test_oversized_block_gets_own_file() {
        let dir = tempfile::tempdir().unwrap();
        let chunk = filled_chunk(1, 4);
        let mut writer = ChunkLogWriter::new(dir.path(), 10).unwrap();

        writer.write_chunk(&chunk).unwrap();
        writer.write_chunk(&chunk).unwrap();
        assert_eq!(writer.finish().unwrap().len(), 2);
    }

    #[test]
    fn test_reader_stops_after_corrupt_block() {
        let mut bytes = Vec::new();
        filled_chunk(1, 1).write_to(&mut bytes).unwrap();
        let first_len = bytes.len();
        filled_chunk(2, 1).write_to(&mut bytes).unwrap();
        filled_chunk(3, 1).write_to(&mut bytes).unwrap();
        // Break the marker of the second block
        bytes[first_len] ^= 0xFF;

        let mut reader = ChunkFileReader::new(&bytes[..]);
        assert!(reader.next().unwrap().is_ok());
        assert!(matches!(
            reader.next(),
            Some(Err(ChunkError::CorruptChunk(_)))
        ));
        assert!(reader.next().is_none());
    }

    #[test]
    fn test_truncated_tail_reported() {
        let mut bytes = Vec::new();
        filled_chunk(1, 2).write_to(&mut bytes).unwrap();
        bytes.extend_from_slice(&[0x32, 0xEA, 0x05]);

        let results: Vec<_> = ChunkFileReader::new(&bytes[..]).collect();
        assert_eq!(results.len(), 2);
        assert!(results[0].is_ok());
        assert!(results[1].is_err());
    }
}
