// src/io/serial/endpoint.rs
//
// One serial endpoint: exclusive owner of a native port handle, its writer
// thread, the single unresolved write and any in-flight async reads.

use std::time::Duration;

use serde::Serialize;
use serialport::{ClearBuffer, SerialPort};

use super::async_read::{spawn_async_read, AsyncReadHandle, AsyncReadResult, InFlightRead};
use super::pending::{PendingWrite, WriteWorker};
use super::platform::{self, NativePort, WRITE_QUEUE_CAPACITY};
use super::poll::{poll_read, ReadMode};
use super::utils::{line_label, BaudRate};
use crate::config::SerialSettings;
use crate::io::error::{IoOutcome, OpenError, TransportError};
use crate::io::{SerialTransport, DEFAULT_TIMEOUT};

/// How long `write` waits for its own request before reporting it pending.
const WRITE_COMPLETION_WAIT: Duration = Duration::from_millis(10);

// ============================================================================
// Types
// ============================================================================

/// A port a sensor could be attached to.
#[derive(Clone, Debug, Serialize)]
pub struct SerialPortInfo {
    pub port_name: String,
    pub port_type: String,
    pub manufacturer: Option<String>,
    pub product: Option<String>,
    pub serial_number: Option<String>,
    pub vid: Option<u16>,
    pub pid: Option<u16>,
    /// Behind a USB-serial bridge that sensor boards commonly use.
    pub likely_sensor: bool,
}

struct OpenPort {
    port: NativePort,
    writer: WriteWorker,
    /// At most one write awaiting reconciliation
    pending_write: Option<PendingWrite>,
    async_reads: Vec<InFlightRead>,
}

/// A serial endpoint. Closed until `open` (or `attach`) succeeds.
///
/// Not internally synchronised: one owner drives it, typically one thread
/// per endpoint.
#[derive(Default)]
pub struct SerialEndpoint {
    port_name: String,
    blocking: bool,
    state: Option<OpenPort>,
    /// Failure of an earlier write, discovered while resolving it
    deferred_write_error: Option<TransportError>,
}

// ============================================================================
// Lifecycle
// ============================================================================

impl SerialEndpoint {
    pub fn new() -> Self {
        Self::default()
    }

    /// Open using a `[serial]` configuration section.
    pub fn open_with(&mut self, settings: &SerialSettings) -> Result<(), OpenError> {
        SerialTransport::open(
            self,
            &settings.port,
            settings.baud_rate.as_u32(),
            settings.blocking,
        )
    }

    /// Adopt a port that is already open (a pseudo-terminal, a port opened by
    /// other code) and put it into the same raw 8-N-1 mode `open` applies.
    pub fn attach(port: NativePort, blocking: bool) -> Result<Self, OpenError> {
        let name = port.name().unwrap_or_else(|| "attached".to_string());
        platform::configure_raw(&port).map_err(|e| OpenError::unavailable(&name, e))?;

        let mut endpoint = Self::new();
        endpoint.install(name, port, blocking)?;
        Ok(endpoint)
    }

    fn install(&mut self, name: String, port: NativePort, blocking: bool) -> Result<(), OpenError> {
        let write_handle = platform::try_clone(&port).map_err(|e| OpenError::unavailable(&name, e))?;
        let writer =
            WriteWorker::spawn(&name, write_handle).map_err(|e| OpenError::unavailable(&name, e))?;

        self.port_name = name;
        self.blocking = blocking;
        self.deferred_write_error = None;
        self.state = Some(OpenPort {
            port,
            writer,
            pending_write: None,
            async_reads: Vec::new(),
        });
        Ok(())
    }

    pub fn is_open(&self) -> bool {
        self.state.is_some()
    }

    pub fn port_name(&self) -> &str {
        &self.port_name
    }

    pub fn is_blocking(&self) -> bool {
        self.blocking
    }

    /// Read timeout used when the caller passes a negative one.
    pub fn default_timeout(&self) -> Duration {
        if self.blocking {
            DEFAULT_TIMEOUT
        } else {
            Duration::ZERO
        }
    }

    fn resolve_timeout(&self, timeout_ms: i32) -> Duration {
        if timeout_ms < 0 {
            self.default_timeout()
        } else {
            Duration::from_millis(timeout_ms as u64)
        }
    }

    /// Whether the last write is still unreconciled.
    pub fn write_pending(&mut self) -> bool {
        let Some(state) = self.state.as_mut() else {
            return false;
        };
        let Some(mut pending) = state.pending_write.take() else {
            return false;
        };
        if !pending.is_complete() {
            state.pending_write = Some(pending);
            return true;
        }

        // Completed in the background, fold its result in now
        if let Ok(outcome) = pending.wait(Duration::ZERO) {
            if let Some(e) = outcome.error {
                self.deferred_write_error = Some(e);
            }
        }
        false
    }

    /// The failure of an earlier write that was only discovered when a later
    /// write resolved it. Cleared on read.
    pub fn take_deferred_write_error(&mut self) -> Option<TransportError> {
        self.deferred_write_error.take()
    }
}

impl Drop for SerialEndpoint {
    fn drop(&mut self) {
        SerialTransport::close(self);
    }
}

// ============================================================================
// Transport
// ============================================================================

impl SerialTransport for SerialEndpoint {
    fn open(&mut self, port_name: &str, baud_rate: u32, blocking: bool) -> Result<(), OpenError> {
        if self.is_open() {
            return Ok(());
        }

        let baud = BaudRate::try_from(baud_rate)?;
        let port = platform::open_native(port_name, baud)
            .map_err(|e| OpenError::unavailable(port_name, e))?;
        self.install(port_name.to_string(), port, blocking)?;

        tlog!(
            "[serial] Opened {} at {} ({})",
            port_name,
            line_label(baud),
            if blocking { "blocking" } else { "non-blocking" }
        );
        Ok(())
    }

    fn close(&mut self) {
        let Some(mut state) = self.state.take() else {
            return;
        };

        if let Some(pending) = state.pending_write.take() {
            pending.cancel();
        }
        for read in state.async_reads.drain(..) {
            read.cancel();
            if read.join().is_err() {
                tlog!("[serial] Async read on {} panicked during close", self.port_name);
            }
        }
        state.writer.shutdown();

        tlog!("[serial] Closed {}", self.port_name);
    }

    fn read(&mut self, buf: &mut [u8], timeout_ms: i32) -> IoOutcome {
        let timeout = self.resolve_timeout(timeout_ms);
        match self.state.as_mut() {
            Some(state) => poll_read(&mut state.port, buf, timeout, ReadMode::Fill, None),
            None => IoOutcome::failed(0, TransportError::NotOpen),
        }
    }

    fn async_read<F>(
        &mut self,
        buffer: Vec<u8>,
        max_bytes: usize,
        completion: F,
    ) -> Result<AsyncReadHandle, TransportError>
    where
        F: FnOnce(AsyncReadResult) + Send + 'static,
    {
        let timeout = self.default_timeout();
        let state = self.state.as_mut().ok_or(TransportError::NotOpen)?;

        state.async_reads.retain(|read| !read.is_finished());

        let port = platform::try_clone(&state.port)?;
        let (handle, in_flight) = spawn_async_read(
            self.port_name.clone(),
            port,
            buffer,
            max_bytes,
            timeout,
            completion,
        )?;
        state.async_reads.push(in_flight);
        Ok(handle)
    }

    fn write(&mut self, bytes: &[u8]) -> IoOutcome {
        let Some(state) = self.state.as_mut() else {
            return IoOutcome::failed(0, TransportError::NotOpen);
        };

        // The previous write must be reconciled before a new one is queued
        if let Some(previous) = state.pending_write.take() {
            let outcome = previous.resolve(DEFAULT_TIMEOUT);
            if let Some(e) = outcome.error {
                tlog!(
                    "[serial] Previous write on {} failed after {} bytes: {}",
                    self.port_name,
                    outcome.bytes,
                    e
                );
                self.deferred_write_error = Some(e);
            }
        }

        if bytes.is_empty() {
            return IoOutcome::ok(0);
        }

        let pending = match state.writer.submit(bytes.to_vec()) {
            Ok(pending) => pending,
            Err(e) => return IoOutcome::failed(0, e),
        };

        match pending.wait(WRITE_COMPLETION_WAIT) {
            Ok(outcome) => outcome,
            Err(pending) => {
                // Accepted for transmission, reconciled by the next write
                let len = pending.len();
                state.pending_write = Some(pending);
                IoOutcome::ok(len)
            }
        }
    }

    fn flush(&mut self) -> Result<(), TransportError> {
        let state = self.state.as_mut().ok_or(TransportError::NotOpen)?;
        state.port.clear(ClearBuffer::All)?;
        Ok(())
    }

    fn bytes_available_to_read(&self) -> Result<usize, TransportError> {
        let state = self.state.as_ref().ok_or(TransportError::NotOpen)?;
        Ok(state.port.bytes_to_read()? as usize)
    }

    fn bytes_available_to_write(&self) -> usize {
        if self.is_open() {
            WRITE_QUEUE_CAPACITY
        } else {
            0
        }
    }
}

// ============================================================================
// Port Discovery
// ============================================================================

/// USB vendor IDs of the USB-serial bridges found on sensor boards:
/// FTDI, Silicon Labs CP210x, STMicro virtual COM, Prolific, WCH CH34x.
const SENSOR_BRIDGE_VIDS: [u16; 5] = [0x0403, 0x10C4, 0x0483, 0x067B, 0x1A86];

/// Ports a sensor could be opened on, likely sensor ports first.
pub fn list_ports() -> Result<Vec<SerialPortInfo>, TransportError> {
    let mut ports: Vec<SerialPortInfo> = serialport::available_ports()?
        .into_iter()
        .filter(|p| is_call_out_device(&p.port_name))
        .map(SerialPortInfo::from)
        .collect();
    sort_sensors_first(&mut ports);
    Ok(ports)
}

/// macOS lists every device twice; the /dev/tty.* side blocks on open
/// waiting for carrier detect.
fn is_call_out_device(name: &str) -> bool {
    !(cfg!(target_os = "macos") && name.starts_with("/dev/tty."))
}

fn sort_sensors_first(ports: &mut [SerialPortInfo]) {
    ports.sort_by(|a, b| {
        b.likely_sensor
            .cmp(&a.likely_sensor)
            .then_with(|| a.port_name.cmp(&b.port_name))
    });
}

impl From<serialport::SerialPortInfo> for SerialPortInfo {
    fn from(p: serialport::SerialPortInfo) -> Self {
        let mut info = SerialPortInfo {
            port_name: p.port_name,
            port_type: String::new(),
            manufacturer: None,
            product: None,
            serial_number: None,
            vid: None,
            pid: None,
            likely_sensor: false,
        };
        info.port_type = match p.port_type {
            serialport::SerialPortType::UsbPort(usb) => {
                info.likely_sensor = SENSOR_BRIDGE_VIDS.contains(&usb.vid);
                info.manufacturer = usb.manufacturer;
                info.product = usb.product;
                info.serial_number = usb.serial_number;
                info.vid = Some(usb.vid);
                info.pid = Some(usb.pid);
                "USB"
            }
            serialport::SerialPortType::BluetoothPort => "Bluetooth",
            serialport::SerialPortType::PciPort => "PCI",
            serialport::SerialPortType::Unknown => "Unknown",
        }
        .to_string();
        info
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use serialport::{SerialPortType, UsbPortInfo};

    fn usb_port(name: &str, vid: u16) -> serialport::SerialPortInfo {
        serialport::SerialPortInfo {
            port_name: name.to_string(),
            port_type: SerialPortType::UsbPort(UsbPortInfo {
                vid,
                pid: 0x6001,
                serial_number: Some("A50285BI".to_string()),
                manufacturer: Some("FTDI".to_string()),
                product: Some("FT232R USB UART".to_string()),
            }),
        }
    }

    #[test]
    fn test_usb_bridge_ports_flagged_as_sensors() {
        let ftdi = SerialPortInfo::from(usb_port("/dev/ttyUSB0", 0x0403));
        assert_eq!(ftdi.port_type, "USB");
        assert_eq!(ftdi.vid, Some(0x0403));
        assert_eq!(ftdi.product.as_deref(), Some("FT232R USB UART"));
        assert!(ftdi.likely_sensor);

        let modem = SerialPortInfo::from(usb_port("/dev/ttyACM0", 0x1234));
        assert!(!modem.likely_sensor);

        let pci = SerialPortInfo::from(serialport::SerialPortInfo {
            port_name: "/dev/ttyS0".to_string(),
            port_type: SerialPortType::PciPort,
        });
        assert_eq!(pci.port_type, "PCI");
        assert_eq!(pci.vid, None);
        assert!(!pci.likely_sensor);
    }

    #[test]
    fn test_sensor_ports_listed_first() {
        let mut ports: Vec<SerialPortInfo> = vec![
            SerialPortInfo::from(serialport::SerialPortInfo {
                port_name: "/dev/ttyS0".to_string(),
                port_type: SerialPortType::Unknown,
            }),
            SerialPortInfo::from(usb_port("/dev/ttyUSB1", 0x10C4)),
            SerialPortInfo::from(usb_port("/dev/ttyACM0", 0x1234)),
            SerialPortInfo::from(usb_port("/dev/ttyUSB0", 0x1A86)),
        ];
        sort_sensors_first(&mut ports);
        let names: Vec<&str> = ports.iter().map(|p| p.port_name.as_str()).collect();
        assert_eq!(
            names,
            vec!["/dev/ttyUSB0", "/dev/ttyUSB1", "/dev/ttyACM0", "/dev/ttyS0"]
        );
    }

    #[test]
    fn test_call_out_device_filter() {
        assert!(is_call_out_device("/dev/cu.usbserial-A50285BI"));
        assert!(is_call_out_device("/dev/ttyUSB0"));
        assert_eq!(
            is_call_out_device("/dev/tty.usbserial-A50285BI"),
            !cfg!(target_os = "macos")
        );
    }

    #[test]
    fn test_closed_endpoint_reports_not_open() {
        let mut endpoint = SerialEndpoint::new();
        let mut buf = [0u8; 4];

        let outcome = endpoint.read(&mut buf, 10);
        assert_eq!(outcome.bytes, 0);
        assert!(matches!(outcome.error, Some(TransportError::NotOpen)));
        assert!(matches!(
            endpoint.write(&[1]).error,
            Some(TransportError::NotOpen)
        ));
        assert!(endpoint.flush().is_err());
        assert_eq!(endpoint.bytes_available_to_write(), 0);
        assert!(!endpoint.write_pending());

        // Closing a closed endpoint is a no-op
        endpoint.close();
        endpoint.close();
        assert!(!endpoint.is_open());
    }

    #[test]
    fn test_open_rejects_unsupported_baud() {
        let mut endpoint = SerialEndpoint::new();
        let err = endpoint.open("/dev/ttyUSB0", 115_201, false).unwrap_err();
        assert!(matches!(err, OpenError::UnsupportedBaud(115_201)));
        assert!(!endpoint.is_open());
    }

    #[test]
    fn test_open_missing_device() {
        let mut endpoint = SerialEndpoint::new();
        let err = endpoint
            .open("/dev/senselink-no-such-port", 115_200, true)
            .unwrap_err();
        assert!(matches!(err, OpenError::DeviceUnavailable { .. }));
    }

    #[test]
    fn test_default_timeout_follows_mode() {
        let mut endpoint = SerialEndpoint::new();
        assert_eq!(endpoint.default_timeout(), Duration::ZERO);
        endpoint.blocking = true;
        assert_eq!(endpoint.default_timeout(), DEFAULT_TIMEOUT);
        assert_eq!(endpoint.resolve_timeout(-1), DEFAULT_TIMEOUT);
        assert_eq!(endpoint.resolve_timeout(100), Duration::from_millis(100));
    }

    #[cfg(target_os = "linux")]
    mod loopback {
        use super::*;
        use std::sync::mpsc;
        use std::time::Instant;

        fn pair(blocking: bool) -> (SerialEndpoint, SerialEndpoint) {
            let (master, slave) = NativePort::pair().unwrap();
            (
                SerialEndpoint::attach(master, blocking).unwrap(),
                SerialEndpoint::attach(slave, blocking).unwrap(),
            )
        }

        #[test]
        fn test_write_then_read_three_bytes() {
            let (mut a, mut b) = pair(true);

            let written = a.write(&[0x01, 0x02, 0x03]);
            assert!(written.is_ok());
            assert_eq!(written.bytes, 3);

            let mut buf = [0u8; 3];
            let outcome = b.read(&mut buf, 100);
            assert!(outcome.is_ok());
            assert_eq!(outcome.bytes, 3);
            assert_eq!(buf, [0x01, 0x02, 0x03]);
        }

        #[test]
        fn test_partial_read_returns_after_timeout() {
            let (mut a, mut b) = pair(true);
            a.write(&[0xAA, 0xBB]);

            let mut buf = [0u8; 8];
            let started = Instant::now();
            let outcome = b.read(&mut buf, 100);
            let elapsed = started.elapsed();

            assert!(outcome.is_ok());
            assert_eq!(outcome.bytes, 2);
            assert_eq!(&buf[..2], &[0xAA, 0xBB]);
            assert!(elapsed >= Duration::from_millis(90));
            assert!(elapsed < Duration::from_millis(1000));
        }

        #[test]
        fn test_nonblocking_default_returns_immediately() {
            let (_a, mut b) = pair(false);

            let mut buf = [0u8; 4];
            let started = Instant::now();
            let outcome = b.read(&mut buf, -1);
            assert!(outcome.is_ok());
            assert_eq!(outcome.bytes, 0);
            assert!(started.elapsed() < Duration::from_millis(100));
        }

        #[test]
        fn test_bytes_available_and_flush() {
            let (mut a, mut b) = pair(true);
            a.write(&[1, 2, 3, 4]);
            std::thread::sleep(Duration::from_millis(50));

            assert_eq!(b.bytes_available_to_read().unwrap(), 4);
            assert_eq!(b.bytes_available_to_write(), WRITE_QUEUE_CAPACITY);

            b.flush().unwrap();
            assert_eq!(b.bytes_available_to_read().unwrap(), 0);
        }

        #[test]
        fn test_async_read_delivers_on_worker() {
            let (mut a, mut b) = pair(true);
            let (tx, rx) = mpsc::channel();
            let caller = std::thread::current().id();

            let handle = b
                .async_read(Vec::with_capacity(16), 16, move |result| {
                    let _ = tx.send((std::thread::current().id(), result));
                })
                .unwrap();

            a.write(&[9, 8]);
            let (thread, result) = rx.recv_timeout(Duration::from_secs(3)).unwrap();

            assert_ne!(thread, caller);
            assert!(result.error.is_none());
            assert!(result.bytes_read >= 1);
            assert_eq!(result.buffer.len(), result.bytes_read);
            assert_eq!(result.buffer[..], [9u8, 8][..result.bytes_read]);

            // Completion runs exactly once
            std::thread::sleep(Duration::from_millis(20));
            assert!(handle.is_finished());
            assert!(rx.try_recv().is_err());
        }

        #[test]
        fn test_nonblocking_async_read_with_no_data() {
            let (_a, mut b) = pair(false);
            let (tx, rx) = mpsc::channel();

            b.async_read(Vec::new(), 8, move |result| {
                let _ = tx.send(result);
            })
            .unwrap();

            let result = rx.recv_timeout(Duration::from_secs(1)).unwrap();
            assert_eq!(result.bytes_read, 0);
            assert!(result.error.is_none());
            assert!(result.buffer.is_empty());
        }

        #[test]
        fn test_close_cancels_async_read() {
            let (_a, mut b) = pair(true);
            let (tx, rx) = mpsc::channel();

            b.async_read(Vec::new(), 8, move |result| {
                let _ = tx.send(result);
            })
            .unwrap();

            let started = Instant::now();
            b.close();
            assert!(started.elapsed() < DEFAULT_TIMEOUT);

            // Close joins the worker, so the completion has already run
            let result = rx.try_recv().unwrap();
            assert_eq!(result.bytes_read, 0);
            assert!(matches!(result.error, Some(TransportError::Cancelled)));
        }

        #[test]
        fn test_write_is_not_left_pending_on_idle_line() {
            let (mut a, _b) = pair(true);
            let outcome = a.write(&[0x55; 32]);
            assert_eq!(outcome.bytes, 32);

            std::thread::sleep(Duration::from_millis(50));
            assert!(!a.write_pending());
            assert!(a.take_deferred_write_error().is_none());
        }

        #[test]
        fn test_open_is_noop_when_already_open() {
            let (_a, mut b) = pair(true);
            let name = b.port_name().to_string();
            b.open("/dev/senselink-no-such-port", 115_200, false).unwrap();
            assert_eq!(b.port_name(), name);
            assert!(b.is_blocking());
        }
    }
}
