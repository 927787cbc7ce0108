// src/io/serial/pending.rs
//
// Writer thread and the single outstanding write it may leave behind.
//
// Each endpoint owns one `WriteWorker`: a thread that drains a bounded
// channel of write requests into a cloned port handle. Submitting a request
// yields a `PendingWrite` that the endpoint keeps until the next write
// resolves it (completed, failed, or cancelled after the default timeout).

use std::io::{ErrorKind, Write};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self as std_mpsc, RecvTimeoutError, TrySendError};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

use crate::io::error::{IoOutcome, TransportError};
use crate::io::POLL_INTERVAL;

/// Largest slice handed to the OS in one call; cancellation is checked between slices.
const WRITE_SLICE: usize = 4096;

/// Requests that may queue behind the one being written.
const WRITE_QUEUE_DEPTH: usize = 4;

/// How long `resolve` waits after cancelling for the worker to report the
/// bytes it already handed to the OS. Covers one slice on a slow line.
const CANCEL_GRACE: Duration = Duration::from_millis(100);

// ============================================================================
// Transmit Types
// ============================================================================

/// Write request sent through the worker channel
pub(crate) struct WriteRequest {
    /// Bytes to hand to the OS
    pub data: Vec<u8>,
    /// Set by the owner to stop the write at the next slice boundary
    pub cancel: Arc<AtomicBool>,
    /// Oneshot channel carrying the outcome back
    pub result_tx: std_mpsc::SyncSender<IoOutcome>,
}

/// One write that has been submitted but not yet reconciled by the endpoint.
#[derive(Debug)]
pub struct PendingWrite {
    len: usize,
    cancel: Arc<AtomicBool>,
    result_rx: std_mpsc::Receiver<IoOutcome>,
    outcome: Option<IoOutcome>,
}

impl PendingWrite {
    pub(crate) fn new(
        len: usize,
        cancel: Arc<AtomicBool>,
        result_rx: std_mpsc::Receiver<IoOutcome>,
    ) -> Self {
        Self {
            len,
            cancel,
            result_rx,
            outcome: None,
        }
    }

    /// Bytes that were submitted.
    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Non-blocking completion check.
    pub fn is_complete(&mut self) -> bool {
        self.poll(Duration::ZERO)
    }

    fn poll(&mut self, timeout: Duration) -> bool {
        if self.outcome.is_some() {
            return true;
        }
        match self.result_rx.recv_timeout(timeout) {
            Ok(outcome) => {
                self.outcome = Some(outcome);
                true
            }
            Err(RecvTimeoutError::Timeout) => false,
            Err(RecvTimeoutError::Disconnected) => {
                // Worker exited without answering
                self.outcome = Some(IoOutcome::failed(0, TransportError::Disconnected));
                true
            }
        }
    }

    /// Wait up to `timeout` for the write to finish.
    /// Hands the still-pending write back on timeout.
    pub fn wait(mut self, timeout: Duration) -> Result<IoOutcome, PendingWrite> {
        self.poll(timeout);
        match self.outcome.take() {
            Some(outcome) => Ok(outcome),
            None => Err(self),
        }
    }

    /// Wait up to `timeout`, then cancel. Always yields an outcome; a write
    /// that did not finish in time is reported as `Cancelled` with the
    /// bytes written before the worker stopped.
    pub fn resolve(self, timeout: Duration) -> IoOutcome {
        match self.wait(timeout) {
            Ok(outcome) => outcome,
            Err(mut pending) => {
                pending.cancel();
                if pending.poll(CANCEL_GRACE) {
                    if let Some(outcome) = pending.outcome.take() {
                        return outcome;
                    }
                }
                // Worker is stuck inside a single OS write
                IoOutcome::failed(0, TransportError::Cancelled)
            }
        }
    }

    /// Ask the worker to abandon this write at the next slice boundary.
    pub fn cancel(&self) {
        self.cancel.store(true, Ordering::Release);
    }
}

// ============================================================================
// Writer Thread
// ============================================================================

pub(crate) struct WriteWorker {
    tx: Option<std_mpsc::SyncSender<WriteRequest>>,
    handle: Option<JoinHandle<()>>,
}

impl WriteWorker {
    /// Start a writer thread that owns `writer` until shutdown.
    pub fn spawn<W>(name: &str, writer: W) -> std::io::Result<Self>
    where
        W: Write + Send + 'static,
    {
        let (tx, rx) = std_mpsc::sync_channel::<WriteRequest>(WRITE_QUEUE_DEPTH);
        let handle = std::thread::Builder::new()
            .name(format!("serial-write:{}", name))
            .spawn(move || run_writer(writer, rx))?;

        Ok(Self {
            tx: Some(tx),
            handle: Some(handle),
        })
    }

    /// Queue `data` for transmission.
    pub fn submit(&self, data: Vec<u8>) -> Result<PendingWrite, TransportError> {
        let tx = self.tx.as_ref().ok_or(TransportError::NotOpen)?;

        let len = data.len();
        let cancel = Arc::new(AtomicBool::new(false));
        let (result_tx, result_rx) = std_mpsc::sync_channel(1);

        tx.try_send(WriteRequest {
            data,
            cancel: cancel.clone(),
            result_tx,
        })
        .map_err(|e| match e {
            TrySendError::Full(_) => TransportError::Io(std::io::Error::new(
                ErrorKind::WouldBlock,
                "write queue full",
            )),
            TrySendError::Disconnected(_) => TransportError::Disconnected,
        })?;

        Ok(PendingWrite::new(len, cancel, result_rx))
    }

    /// Close the channel and wait for the thread to drain it.
    pub fn shutdown(&mut self) {
        self.tx = None;
        if let Some(handle) = self.handle.take() {
            if handle.join().is_err() {
                tlog!("[serial] Writer thread panicked");
            }
        }
    }
}

impl Drop for WriteWorker {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn run_writer<W: Write>(mut writer: W, rx: std_mpsc::Receiver<WriteRequest>) {
    for req in rx {
        let outcome = if req.cancel.load(Ordering::Acquire) {
            IoOutcome::failed(0, TransportError::Cancelled)
        } else {
            write_slices(&mut writer, &req.data, &req.cancel)
        };
        // Receiver is gone when the endpoint already gave up on this write
        let _ = req.result_tx.try_send(outcome);
    }
}

/// Hand `data` to the OS slice by slice. Bytes accepted before a failure or
/// cancellation are reported in the outcome.
fn write_slices<W: Write>(writer: &mut W, data: &[u8], cancel: &AtomicBool) -> IoOutcome {
    let mut written = 0;

    while written < data.len() {
        if cancel.load(Ordering::Acquire) {
            return IoOutcome::failed(written, TransportError::Cancelled);
        }

        let end = (written + WRITE_SLICE).min(data.len());
        match writer.write(&data[written..end]) {
            Ok(0) => return IoOutcome::failed(written, TransportError::Disconnected),
            Ok(n) => written += n,
            Err(e) if e.kind() == ErrorKind::Interrupted => {}
            // Transmit queue full, give the line time to drain
            Err(e) if matches!(e.kind(), ErrorKind::TimedOut | ErrorKind::WouldBlock) => {
                std::thread::sleep(POLL_INTERVAL);
            }
            Err(e) => return IoOutcome::failed(written, TransportError::Io(e)),
        }
    }

    IoOutcome::ok(written)
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;
    use std::time::Instant;

    #[derive(Clone, Default)]
    struct SharedSink(Arc<Mutex<Vec<u8>>>);

    impl Write for SharedSink {
        fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
            self.0.lock().unwrap().extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }

    /// Accepts one byte per call after a fixed delay.
    struct SlowSink {
        delay: Duration,
        written: Arc<Mutex<Vec<u8>>>,
    }

    impl Write for SlowSink {
        fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
            std::thread::sleep(self.delay);
            self.written.lock().unwrap().push(buf[0]);
            Ok(1)
        }

        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }

    struct BrokenSink;

    impl Write for BrokenSink {
        fn write(&mut self, _buf: &[u8]) -> std::io::Result<usize> {
            Err(std::io::Error::new(ErrorKind::BrokenPipe, "unplugged"))
        }

        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }

    #[test]
    fn test_worker_writes_and_reports_count() {
        let sink = SharedSink::default();
        let worker = WriteWorker::spawn("test", sink.clone()).unwrap();

        let pending = worker.submit(vec![1, 2, 3]).unwrap();
        assert_eq!(pending.len(), 3);
        let outcome = pending.resolve(Duration::from_secs(2));
        assert!(outcome.is_ok());
        assert_eq!(outcome.bytes, 3);
        assert_eq!(*sink.0.lock().unwrap(), vec![1, 2, 3]);
    }

    #[test]
    fn test_large_write_spans_slices() {
        let sink = SharedSink::default();
        let worker = WriteWorker::spawn("test", sink.clone()).unwrap();

        let data: Vec<u8> = (0..10_000u32).map(|i| i as u8).collect();
        let outcome = worker.submit(data.clone()).unwrap().resolve(Duration::from_secs(2));
        assert_eq!(outcome.bytes, data.len());
        assert_eq!(*sink.0.lock().unwrap(), data);
    }

    #[test]
    fn test_wait_hands_back_unfinished_write() {
        let written = Arc::new(Mutex::new(Vec::new()));
        let sink = SlowSink {
            delay: Duration::from_millis(50),
            written: written.clone(),
        };
        let worker = WriteWorker::spawn("slow", sink).unwrap();

        let mut pending = worker.submit(vec![7; 4]).unwrap();
        assert!(!pending.is_complete());
        let pending = pending.wait(Duration::from_millis(5)).unwrap_err();
        assert_eq!(pending.len(), 4);

        let outcome = pending.wait(Duration::from_secs(2)).unwrap();
        assert!(outcome.is_ok());
        assert_eq!(outcome.bytes, 4);
    }

    #[test]
    fn test_resolve_cancels_after_timeout() {
        let written = Arc::new(Mutex::new(Vec::new()));
        let sink = SlowSink {
            delay: Duration::from_millis(40),
            written: written.clone(),
        };
        let mut worker = WriteWorker::spawn("slow", sink).unwrap();

        let started = Instant::now();
        let outcome = worker
            .submit(vec![1; 100])
            .unwrap()
            .resolve(Duration::from_millis(10));
        assert!(started.elapsed() < Duration::from_secs(1));
        assert!(matches!(outcome.error, Some(TransportError::Cancelled)));

        // The worker stops at the next slice boundary instead of writing all 100 bytes
        worker.shutdown();
        assert!(written.lock().unwrap().len() < 100);
    }

    #[test]
    fn test_resolve_reports_bytes_written_before_cancel() {
        let written = Arc::new(Mutex::new(Vec::new()));
        let sink = SlowSink {
            delay: Duration::from_millis(20),
            written: written.clone(),
        };
        let mut worker = WriteWorker::spawn("slow", sink).unwrap();

        let outcome = worker
            .submit(vec![1; 100])
            .unwrap()
            .resolve(Duration::from_millis(70));
        assert!(matches!(outcome.error, Some(TransportError::Cancelled)));
        assert!(outcome.bytes > 0);
        assert!(outcome.bytes < 100);

        worker.shutdown();
        assert_eq!(outcome.bytes, written.lock().unwrap().len());
    }

    #[test]
    fn test_cancelled_before_start_is_not_written() {
        let written = Arc::new(Mutex::new(Vec::new()));
        let sink = SlowSink {
            delay: Duration::from_millis(100),
            written: written.clone(),
        };
        let worker = WriteWorker::spawn("slow", sink).unwrap();

        let first = worker.submit(vec![1]).unwrap();
        let second = worker.submit(vec![2]).unwrap();
        second.cancel();

        assert_eq!(first.resolve(Duration::from_secs(2)).bytes, 1);
        let outcome = second.resolve(Duration::from_secs(2));
        assert_eq!(outcome.bytes, 0);
        assert!(matches!(outcome.error, Some(TransportError::Cancelled)));
        assert_eq!(*written.lock().unwrap(), vec![1]);
    }

    #[test]
    fn test_write_error_is_reported() {
        let worker = WriteWorker::spawn("broken", BrokenSink).unwrap();
        let outcome = worker.submit(vec![1, 2]).unwrap().resolve(Duration::from_secs(2));
        assert_eq!(outcome.bytes, 0);
        assert!(outcome.error.unwrap().is_disconnect());
    }

    #[test]
    fn test_submit_after_shutdown_fails() {
        let mut worker = WriteWorker::spawn("test", SharedSink::default()).unwrap();
        worker.shutdown();
        assert!(matches!(
            worker.submit(vec![1]),
            Err(TransportError::NotOpen)
        ));
    }
}
