//! Serial line bridge for dual-channel CAN adapters.
//!
//! The adapter speaks a fixed 17-byte framing over a plain serial line and
//! carries two CAN buses on it. This crate glues the layers together:
//!
//! - [`transport`]: byte-stream transports (raw tty, in-memory)
//! - [`frame`]: wire codec, activation handshake, inbound reassembly
//! - [`link`]: per-link state, transmit drain and pacing, channel registry

/// Re-export transport types.
pub mod transport {
    pub use emuccan_transport::*;
}

/// Re-export frame types.
pub mod frame {
    pub use emuccan_frame::*;
}

/// Re-export link types.
pub mod link {
    pub use emuccan_link::*;
}
