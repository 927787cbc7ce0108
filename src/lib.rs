// src/lib.rs
//
// senselink: the communication and logging path for an inertial/GNSS sensor.
//
//   serial bytes --> RecordFramer --> Record --+--> ChunkLogger (binary chunk logs)
//                                              +--> TextLogWriter (comma-separated text)

#[macro_use]
pub mod logging;

pub mod checksums;
pub mod chunk;
pub mod codec;
pub mod config;
pub mod io;
pub mod record;

pub use chunk::{
    AnyChunk, Chunk, ChunkError, ChunkFileReader, ChunkLogWriter, ChunkLogger, ChunkTag, DataChunk,
    SortedChunk,
};
pub use codec::{from_text, to_text, CodecError, FieldLayoutTable, TextLogReader, TextLogWriter};
pub use config::{ConfigError, SessionConfig};
pub use io::{
    IoOutcome, OpenError, RecordFramer, SerialEndpoint, SerialTransport, TransportError,
};
pub use record::{Record, RecordError, RecordHeader, MAX_BODY_SIZE};
