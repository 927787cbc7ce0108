// src/io/serial/mod.rs
//
// Serial port endpoint and record framing.
//
// Features:
// - Exclusive raw 8-N-1 endpoints over the native back end
// - Timed reads, async reads with completion, tracked pending writes
// - SLIP record framing with CRC16-CCITT

mod async_read;
mod endpoint;
pub mod framer;
mod pending;
pub(crate) mod platform;
mod poll;
pub mod utils;

pub use async_read::{AsyncReadHandle, AsyncReadResult};
pub use endpoint::{list_ports, SerialEndpoint, SerialPortInfo};
pub use framer::{encode_frame, FrameError, RecordFramer};
pub use pending::PendingWrite;
pub use platform::NativePort;
pub use utils::BaudRate;
