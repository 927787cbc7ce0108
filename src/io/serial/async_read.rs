// src/io/serial/async_read.rs
//
// Asynchronous reads. Each call runs on its own worker thread over a cloned
// port handle and reports back through a completion closure.
//
// Ownership: the caller's buffer moves into the operation and is handed back
// inside `AsyncReadResult`, truncated to the bytes actually read. The
// completion always runs on the worker thread, never inline in the caller.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

use serialport::SerialPort;

use super::poll::{poll_read, ReadMode};
use crate::io::error::TransportError;

/// Delivered exactly once to the completion of an issued async read.
#[derive(Debug)]
pub struct AsyncReadResult {
    /// Name of the endpoint the read was issued on
    pub port: String,
    /// The caller's buffer, holding `bytes_read` bytes
    pub buffer: Vec<u8>,
    pub bytes_read: usize,
    /// `None` for a normal completion, including a timeout with no data
    pub error: Option<TransportError>,
}

/// Caller-side view of an in-flight async read.
#[derive(Debug, Clone)]
pub struct AsyncReadHandle {
    cancel: Arc<AtomicBool>,
    done: Arc<AtomicBool>,
}

impl AsyncReadHandle {
    /// Stop the read early. The completion still runs, reporting `Cancelled`
    /// along with any bytes already read.
    pub fn cancel(&self) {
        self.cancel.store(true, Ordering::Release);
    }

    /// True once the completion has returned.
    pub fn is_finished(&self) -> bool {
        self.done.load(Ordering::Acquire)
    }
}

/// Endpoint-side record of a read worker, joined on close.
pub(crate) struct InFlightRead {
    cancel: Arc<AtomicBool>,
    thread: JoinHandle<()>,
}

impl InFlightRead {
    pub fn cancel(&self) {
        self.cancel.store(true, Ordering::Release);
    }

    pub fn is_finished(&self) -> bool {
        self.thread.is_finished()
    }

    pub fn join(self) -> std::thread::Result<()> {
        self.thread.join()
    }
}

/// Start a read of up to `max_bytes` on `port`, waiting at most `timeout`
/// for the first bytes to arrive.
pub(crate) fn spawn_async_read<P, F>(
    port_name: String,
    mut port: P,
    mut buffer: Vec<u8>,
    max_bytes: usize,
    timeout: Duration,
    completion: F,
) -> std::io::Result<(AsyncReadHandle, InFlightRead)>
where
    P: SerialPort + 'static,
    F: FnOnce(AsyncReadResult) + Send + 'static,
{
    let cancel = Arc::new(AtomicBool::new(false));
    let done = Arc::new(AtomicBool::new(false));

    let worker_cancel = cancel.clone();
    let worker_done = done.clone();
    let thread = std::thread::Builder::new()
        .name(format!("serial-read:{}", port_name))
        .spawn(move || {
            buffer.clear();
            buffer.resize(max_bytes, 0);

            let outcome = poll_read(
                &mut port,
                &mut buffer,
                timeout,
                ReadMode::Any,
                Some(&worker_cancel),
            );
            buffer.truncate(outcome.bytes);

            completion(AsyncReadResult {
                port: port_name,
                buffer,
                bytes_read: outcome.bytes,
                error: outcome.error,
            });
            worker_done.store(true, Ordering::Release);
        })?;

    Ok((
        AsyncReadHandle {
            cancel: cancel.clone(),
            done,
        },
        InFlightRead { cancel, thread },
    ))
}
