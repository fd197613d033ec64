use crate::codec::IdType;

/// Errors that can occur during frame encoding/decoding.
///
/// All of them are local to one wire frame: the frame is dropped and the
/// stream carries on at the next boundary.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum FrameError {
    /// The first byte is not the expected direction marker.
    #[error("invalid frame header 0x{found:02X} (expected 0x{expected:02X})")]
    BadHeader { found: u8, expected: u8 },

    /// The carried checksum does not match the recomputed one.
    #[error("checksum mismatch (computed 0x{computed:02X}, frame carries 0x{carried:02X})")]
    BadChecksum { computed: u8, carried: u8 },

    /// The control byte selects a channel the adapter does not have.
    #[error("control byte selects channel index {0}")]
    BadChannel(i8),

    /// DLC above 8, or more data bytes than the DLC announces.
    #[error("data length {len} exceeds limit {max}")]
    BadLength { len: usize, max: usize },

    /// Identifier does not fit the 11-bit or 29-bit range.
    #[error("identifier 0x{id:X} out of range for {id_type} frame")]
    BadId { id: u32, id_type: IdType },

    /// A wire frame ran past its fixed size without a trailer.
    #[error("receive overflow: no frame boundary within {mtu} bytes")]
    Overflow { mtu: usize },

    /// The transport flagged a received byte as corrupt (parity, framing).
    #[error("transport flagged a received byte as corrupt")]
    TransportByteError,

    /// Activation acknowledgement fields are inconsistent.
    #[error("activation ack rejected (status 0x{status:02X}, check 0x{check:02X})")]
    AckMismatch { status: u8, check: u8 },
}

pub type Result<T> = std::result::Result<T, FrameError>;
