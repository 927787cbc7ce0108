// src/io/serial/platform/unix.rs
//
// File-descriptor back end: TTYPort plus explicit termios raw mode.

use std::io;
use std::os::unix::io::AsRawFd;
use std::time::Duration;

use serialport::TTYPort;

use crate::io::serial::utils::{line_builder, BaudRate};

pub type NativePort = TTYPort;

/// No exact figure is exposed for the tty transmit queue.
pub const WRITE_QUEUE_CAPACITY: usize = 65_536;

/// Open a tty by path. TTYPort takes the device in exclusive mode (TIOCEXCL).
pub fn open_native(port: &str, baud: BaudRate) -> Result<NativePort, serialport::Error> {
    let native = line_builder(port, baud)
        .timeout(Duration::from_millis(1))
        .open_native()?;
    configure_raw(&native)?;
    Ok(native)
}

/// Put the tty into raw, non-canonical mode: no echo, no signal characters,
/// no CR/NL translation, no software or hardware flow control, 8-N-1.
/// The configured speed is preserved.
pub fn configure_raw(port: &NativePort) -> io::Result<()> {
    let fd = port.as_raw_fd();

    // SAFETY: `fd` is owned by `port` and stays open for the duration of the call.
    // `termios` is plain data that tcgetattr fully initialises before use.
    unsafe {
        let mut tio: libc::termios = std::mem::zeroed();
        if libc::tcgetattr(fd, &mut tio) != 0 {
            return Err(io::Error::last_os_error());
        }

        libc::cfmakeraw(&mut tio);
        tio.c_cflag |= libc::CLOCAL | libc::CREAD;
        tio.c_cflag &= !(libc::CSTOPB | libc::PARENB | libc::PARODD | libc::CRTSCTS);
        tio.c_cflag = (tio.c_cflag & !libc::CSIZE) | libc::CS8;
        tio.c_iflag &= !(libc::IXON | libc::IXOFF | libc::IXANY | libc::IGNBRK);
        // Reads never block in the kernel; timeouts are handled by the poll loop
        tio.c_cc[libc::VMIN] = 0;
        tio.c_cc[libc::VTIME] = 0;

        if libc::tcsetattr(fd, libc::TCSANOW, &tio) != 0 {
            return Err(io::Error::last_os_error());
        }
    }

    Ok(())
}

pub fn try_clone(port: &NativePort) -> Result<NativePort, serialport::Error> {
    port.try_clone_native()
}
