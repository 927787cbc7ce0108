// src/io/serial/framer.rs
//
// Record framing on the serial byte stream.
//
// Each record travels as one SLIP frame (RFC 1055):
//   END [record header][payload][crc16-ccitt LE] END
// The CRC covers header and payload. Frames that fail any check are reported
// individually so the caller can count and skip them.

use thiserror::Error;

use crate::checksums::crc16_ccitt_checksum;
use crate::record::{Record, RecordError, MAX_BODY_SIZE, RECORD_HEADER_SIZE};

// =============================================================================
// SLIP Constants (RFC 1055)
// =============================================================================

const SLIP_END: u8 = 0xC0;
const SLIP_ESC: u8 = 0xDB;
const SLIP_ESC_END: u8 = 0xDC;
const SLIP_ESC_ESC: u8 = 0xDD;

const CRC_SIZE: usize = 2;

/// Largest decoded frame a valid record can produce.
pub const MAX_FRAME_SIZE: usize = RECORD_HEADER_SIZE + MAX_BODY_SIZE + CRC_SIZE;

// =============================================================================
// Types
// =============================================================================

#[derive(Debug, Error)]
pub enum FrameError {
    #[error("frame checksum mismatch: expected {expected:#06x}, found {found:#06x}")]
    Checksum { expected: u16, found: u16 },

    #[error("frame of {0} bytes is too short to hold a record")]
    TooShort(usize),

    #[error("frame exceeded {MAX_FRAME_SIZE} bytes and was discarded")]
    Oversized,

    #[error("record header declares {declared} bytes but the frame carries {actual}")]
    LengthMismatch { declared: usize, actual: usize },

    #[error("stream ended inside a frame ({0} bytes buffered)")]
    Incomplete(usize),

    #[error(transparent)]
    Record(#[from] RecordError),
}

// =============================================================================
// Record Framer
// =============================================================================

/// Incremental SLIP decoder that turns a byte stream into records.
#[derive(Debug, Default)]
pub struct RecordFramer {
    buffer: Vec<u8>,
    in_escape: bool,
    /// Set once the current frame has grown past `MAX_FRAME_SIZE`
    overflowed: bool,
}

impl RecordFramer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed raw bytes; returns one entry per completed frame, in order.
    pub fn feed(&mut self, data: &[u8]) -> Vec<Result<Record, FrameError>> {
        let mut frames = Vec::new();

        for &byte in data {
            match byte {
                SLIP_END => {
                    if self.overflowed {
                        frames.push(Err(FrameError::Oversized));
                    } else if !self.buffer.is_empty() {
                        frames.push(decode_frame(&self.buffer));
                    }
                    self.buffer.clear();
                    self.in_escape = false;
                    self.overflowed = false;
                }
                SLIP_ESC => {
                    self.in_escape = true;
                }
                SLIP_ESC_END if self.in_escape => {
                    self.push(SLIP_END);
                    self.in_escape = false;
                }
                SLIP_ESC_ESC if self.in_escape => {
                    self.push(SLIP_ESC);
                    self.in_escape = false;
                }
                _ => {
                    if self.in_escape {
                        // Protocol error, keep both bytes and let the CRC reject the frame
                        self.push(SLIP_ESC);
                    }
                    self.push(byte);
                    self.in_escape = false;
                }
            }
        }

        frames
    }

    /// Report a partially received frame, if any, and reset.
    pub fn flush(&mut self) -> Option<FrameError> {
        let buffered = self.buffer.len();
        let overflowed = self.overflowed;
        self.buffer.clear();
        self.in_escape = false;
        self.overflowed = false;

        if overflowed {
            Some(FrameError::Oversized)
        } else if buffered > 0 {
            Some(FrameError::Incomplete(buffered))
        } else {
            None
        }
    }

    /// Bytes held for the frame currently being received.
    pub fn buffered(&self) -> usize {
        self.buffer.len()
    }

    fn push(&mut self, byte: u8) {
        if self.overflowed {
            return;
        }
        if self.buffer.len() >= MAX_FRAME_SIZE {
            self.overflowed = true;
            self.buffer.clear();
            return;
        }
        self.buffer.push(byte);
    }
}

fn decode_frame(frame: &[u8]) -> Result<Record, FrameError> {
    if frame.len() < RECORD_HEADER_SIZE + CRC_SIZE {
        return Err(FrameError::TooShort(frame.len()));
    }

    let (body, crc) = frame.split_at(frame.len() - CRC_SIZE);
    let found = u16::from_le_bytes([crc[0], crc[1]]);
    let expected = crc16_ccitt_checksum(body);
    if expected != found {
        return Err(FrameError::Checksum { expected, found });
    }

    let (record, used) = Record::decode(body)?;
    if used != body.len() {
        return Err(FrameError::LengthMismatch {
            declared: used,
            actual: body.len(),
        });
    }
    Ok(record)
}

// =============================================================================
// Encoding
// =============================================================================

/// Frame a record for transmission.
pub fn encode_frame(record: &Record) -> Vec<u8> {
    let mut body = record.encode();
    let crc = crc16_ccitt_checksum(&body);
    body.extend_from_slice(&crc.to_le_bytes());
    slip_encode(&body)
}

/// SLIP encode data (for transmission)
pub fn slip_encode(data: &[u8]) -> Vec<u8> {
    let mut encoded = Vec::with_capacity(data.len() + 2);
    encoded.push(SLIP_END); // Start with END to flush any line noise

    for &byte in data {
        match byte {
            SLIP_END => {
                encoded.push(SLIP_ESC);
                encoded.push(SLIP_ESC_END);
            }
            SLIP_ESC => {
                encoded.push(SLIP_ESC);
                encoded.push(SLIP_ESC_ESC);
            }
            _ => {
                encoded.push(byte);
            }
        }
    }

    encoded.push(SLIP_END);
    encoded
}
