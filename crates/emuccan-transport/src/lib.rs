//! Byte-stream transport abstraction for serial CAN adapters.
//!
//! The link layer only needs two things from the wire underneath it: a
//! non-blocking `write` that may accept fewer bytes than offered, and a way to
//! ask for a wakeup once the transport can take more. Inbound bytes are pushed
//! up by whoever owns the transport.
//!
//! - [`MemoryTransport`] keeps everything in memory (tests, loopback demos)
//! - [`SerialPort`] drives a raw tty (Linux/macOS)

pub mod error;
pub mod memory;
pub mod traits;

#[cfg(unix)]
pub mod serial;

pub use error::{Result, TransportError};
pub use memory::MemoryTransport;
pub use traits::Transport;

#[cfg(unix)]
pub use serial::SerialPort;
