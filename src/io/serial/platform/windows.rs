// src/io/serial/platform/windows.rs
//
// Handle back end: COMPort opened for overlapped I/O by the serialport crate.

use std::io;
use std::time::Duration;

use serialport::COMPort;

use crate::io::serial::utils::{line_builder, BaudRate};

pub type NativePort = COMPort;

/// Overlapped writes have no fixed queue limit; report 64K.
pub const WRITE_QUEUE_CAPACITY: usize = 65_536;

/// Open a COM port by name. Handles are opened with no sharing, so the port
/// is exclusive. Names above COM9 are prefixed with `\\.\` by serialport.
pub fn open_native(port: &str, baud: BaudRate) -> Result<NativePort, serialport::Error> {
    let native = line_builder(port, baud)
        .timeout(Duration::from_millis(1))
        .open_native()?;
    configure_raw(&native)?;
    Ok(native)
}

/// The DCB set up by serialport is already binary mode with no XON/XOFF and
/// no line discipline, there is nothing further to strip.
pub fn configure_raw(_port: &NativePort) -> io::Result<()> {
    Ok(())
}

pub fn try_clone(port: &NativePort) -> Result<NativePort, serialport::Error> {
    port.try_clone_native()
}
