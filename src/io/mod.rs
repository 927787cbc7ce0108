// src/io/mod.rs
//
// Serial transport abstraction.
// One capability set (`SerialTransport`) with exactly one native back end per
// target OS, selected at build time. Callers are written once against the
// trait and never see which back end they are linked with.

mod error;
pub mod serial;

use std::time::Duration;

pub use error::{IoOutcome, OpenError, TransportError};
pub use serial::{
    encode_frame, list_ports, AsyncReadHandle, AsyncReadResult, BaudRate, FrameError,
    PendingWrite, RecordFramer, SerialEndpoint, SerialPortInfo,
};

// ============================================================================
// Constants
// ============================================================================

/// Read timeout applied when a blocking endpoint is read with a negative
/// timeout, and the limit for resolving a pending write.
pub const DEFAULT_TIMEOUT_MS: u64 = 2500;
pub const DEFAULT_TIMEOUT: Duration = Duration::from_millis(DEFAULT_TIMEOUT_MS);

/// Sleep between queue checks while a read waits for more bytes.
pub const POLL_INTERVAL: Duration = Duration::from_millis(2);

pub use serial::platform::WRITE_QUEUE_CAPACITY;

// ============================================================================
// Transport Trait
// ============================================================================

/// Operations every serial back end provides.
pub trait SerialTransport {
    /// Acquire the device exclusively and configure it for raw 8-N-1 with no
    /// flow control. Succeeds without doing anything when already open.
    fn open(&mut self, port_name: &str, baud_rate: u32, blocking: bool) -> Result<(), OpenError>;

    /// Release the device. In-flight async reads and the pending write are
    /// cancelled first. Idempotent, never fails.
    fn close(&mut self);

    /// Fill `buf` or stop when `timeout_ms` elapses, whichever comes first.
    /// A short count without an error means the timeout was reached.
    /// A negative timeout selects the endpoint's default.
    fn read(&mut self, buf: &mut [u8], timeout_ms: i32) -> IoOutcome;

    /// Issue a read of up to `max_bytes` and return immediately. `buffer` is
    /// retained by the operation and handed back to `completion`, which runs
    /// exactly once on a worker thread. An `Err` means nothing was issued and
    /// `completion` is dropped uncalled.
    fn async_read<F>(
        &mut self,
        buffer: Vec<u8>,
        max_bytes: usize,
        completion: F,
    ) -> Result<AsyncReadHandle, TransportError>
    where
        F: FnOnce(AsyncReadResult) + Send + 'static;

    /// Queue `bytes` for transmission. A still-pending previous write is
    /// resolved first (waiting up to `DEFAULT_TIMEOUT`, cancelled after).
    /// Returns the count accepted by the OS, not necessarily on the wire.
    fn write(&mut self, bytes: &[u8]) -> IoOutcome;

    /// Discard bytes buffered by the OS in both directions.
    fn flush(&mut self) -> Result<(), TransportError>;

    fn bytes_available_to_read(&self) -> Result<usize, TransportError>;

    /// Conservative estimate of transmit queue space.
    fn bytes_available_to_write(&self) -> usize;
}

/// Pacing helper for polling loops.
pub fn sleep_ms(ms: u64) {
    std::thread::sleep(Duration::from_millis(ms));
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Instant;

    #[test]
    fn test_sleep_ms_waits() {
        let started = Instant::now();
        sleep_ms(20);
        assert!(started.elapsed() >= Duration::from_millis(20));
    }

    #[test]
    fn test_default_timeout_constant() {
        assert_eq!(DEFAULT_TIMEOUT.as_millis(), 2500);
        assert!(POLL_INTERVAL < DEFAULT_TIMEOUT);
    }
}
