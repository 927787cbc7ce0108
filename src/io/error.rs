// src/io/error.rs
//
// Error types for the serial transport.
//
// Open failures are fatal to that open attempt and are returned as `OpenError`.
// Read/write failures never abort a polling loop: they travel inside an
// `IoOutcome` next to the byte count that was transferred before the failure.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum OpenError {
    #[error("serial device {port} unavailable: {reason}")]
    DeviceUnavailable { port: String, reason: String },

    #[error("unsupported baud rate {0}")]
    UnsupportedBaud(u32),
}

impl OpenError {
    pub fn unavailable(port: &str, reason: impl std::fmt::Display) -> Self {
        OpenError::DeviceUnavailable {
            port: port.to_string(),
            reason: reason.to_string(),
        }
    }
}

#[derive(Debug, Error)]
pub enum TransportError {
    #[error("endpoint is not open")]
    NotOpen,

    #[error("serial I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serial port error: {0}")]
    Port(#[from] serialport::Error),

    #[error("operation cancelled")]
    Cancelled,

    #[error("device disconnected")]
    Disconnected,
}

impl TransportError {
    /// True when the device is gone rather than merely quiet.
    pub fn is_disconnect(&self) -> bool {
        match self {
            TransportError::Disconnected => true,
            TransportError::Io(e) => matches!(
                e.kind(),
                std::io::ErrorKind::BrokenPipe
                    | std::io::ErrorKind::NotConnected
                    | std::io::ErrorKind::UnexpectedEof
            ),
            TransportError::Port(e) => matches!(e.kind(), serialport::ErrorKind::NoDevice),
            _ => false,
        }
    }
}

/// Result of a read or write: bytes moved plus an optional error signal.
///
/// A partial count with `error == None` means the timeout was reached.
/// A count with `error == Some(_)` means the operation stopped early; the
/// bytes already transferred are valid.
#[derive(Debug)]
pub struct IoOutcome {
    pub bytes: usize,
    pub error: Option<TransportError>,
}

impl IoOutcome {
    pub fn ok(bytes: usize) -> Self {
        IoOutcome { bytes, error: None }
    }

    pub fn failed(bytes: usize, error: TransportError) -> Self {
        IoOutcome {
            bytes,
            error: Some(error),
        }
    }

    pub fn is_ok(&self) -> bool {
        self.error.is_none()
    }

    /// Convert to a `Result`, dropping the partial count on error.
    pub fn into_result(self) -> Result<usize, TransportError> {
        match self.error {
            None => Ok(self.bytes),
            Some(e) => Err(e),
        }
    }
}
