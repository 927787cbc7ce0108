// src/io/serial/platform/mod.rs
//
// Compile-time selection of the native serial back end.
//
// Each back end exposes the same small surface:
// - `NativePort`: the concrete port type
// - `open_native`: acquire and configure a device by name
// - `configure_raw`: force raw 8-N-1 mode on an already open port
// - `try_clone`: second handle for worker threads
// - `WRITE_QUEUE_CAPACITY`: conservative transmit queue estimate

#[cfg(unix)]
mod unix;
#[cfg(unix)]
pub use unix::*;

#[cfg(windows)]
mod windows;
#[cfg(windows)]
pub use windows::*;

#[cfg(not(any(unix, windows)))]
compile_error!("senselink serial transport supports Unix and Windows targets only");
