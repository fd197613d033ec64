//! Fixed-size serial wire framing for dual-channel CAN adapters.
//!
//! Every CAN frame travels as exactly 17 bytes:
//! - a direction marker (`0xE0` host to adapter, `0xE1` adapter to host)
//! - a packed control byte (channel, id type, RTR, DLC)
//! - a 4-byte big-endian identifier and 8 data bytes
//! - an additive checksum and a `\r\n` trailer
//!
//! [`ReassemblyBuffer`] turns an unframed inbound byte stream back into
//! frames, resynchronizing on 17-byte boundaries after any error.

pub mod channel;
pub mod codec;
pub mod error;
pub mod handshake;
pub mod reassembly;

pub use channel::Channel;
pub use codec::{
    checksum, decode, encode, encode_inbound, IdType, LogicalFrame, WireFrame, MAX_DLC,
    RECV_MARKER, SEND_MARKER, TRAILER, WIRE_FRAME_LEN,
};
pub use error::{FrameError, Result};
pub use handshake::{
    build_handshake, match_handshake_ack, verify_handshake_ack, ACK_LEN, HANDSHAKE_HEAD,
    HANDSHAKE_LEN,
};
pub use reassembly::{Feed, ReassemblyBuffer};
