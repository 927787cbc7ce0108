// src/io/serial/poll.rs
//
// Bounded-interval read loop shared by synchronous and asynchronous reads.
// Neither back end has a native "read N bytes within T" primitive, so the
// loop asks the driver how much is queued, takes what it can and sleeps
// `POLL_INTERVAL` between attempts.

use std::io::ErrorKind;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use serialport::SerialPort;

use crate::io::error::{IoOutcome, TransportError};
use crate::io::POLL_INTERVAL;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum ReadMode {
    /// Keep reading until the buffer is full or the timeout elapses
    Fill,
    /// Return as soon as any bytes have arrived
    Any,
}

/// Read into `buf` until it is full (or, in `Any` mode, until something
/// arrives) or `timeout` elapses. A zero timeout takes only what is already
/// queued. Bytes read before an error or cancellation are kept in the count.
pub(crate) fn poll_read<P>(
    port: &mut P,
    buf: &mut [u8],
    timeout: Duration,
    mode: ReadMode,
    cancel: Option<&AtomicBool>,
) -> IoOutcome
where
    P: SerialPort + ?Sized,
{
    let started = Instant::now();
    let mut filled = 0;

    while filled < buf.len() {
        if cancel.map_or(false, |flag| flag.load(Ordering::Acquire)) {
            return IoOutcome::failed(filled, TransportError::Cancelled);
        }

        let queued = match port.bytes_to_read() {
            Ok(n) => n as usize,
            Err(e) => return IoOutcome::failed(filled, TransportError::Port(e)),
        };

        if queued > 0 {
            let end = filled + queued.min(buf.len() - filled);
            match port.read(&mut buf[filled..end]) {
                // Driver reported queued bytes but the handle hit end-of-file
                Ok(0) => return IoOutcome::failed(filled, TransportError::Disconnected),
                Ok(n) => filled += n,
                Err(e)
                    if matches!(
                        e.kind(),
                        ErrorKind::TimedOut | ErrorKind::WouldBlock | ErrorKind::Interrupted
                    ) => {}
                Err(e) => return IoOutcome::failed(filled, TransportError::Io(e)),
            }
        }

        if filled == buf.len() || (mode == ReadMode::Any && filled > 0) {
            break;
        }

        let elapsed = started.elapsed();
        if elapsed >= timeout {
            break;
        }
        std::thread::sleep(POLL_INTERVAL.min(timeout - elapsed));
    }

    IoOutcome::ok(filled)
}
