use std::fmt;

use bytes::{Buf, BufMut};
use serde::{Deserialize, Serialize};

use crate::channel::Channel;
use crate::error::{FrameError, Result};

/// Fixed wire frame size (the link MTU).
pub const WIRE_FRAME_LEN: usize = 17;

/// Direction marker for frames sent to the adapter.
pub const SEND_MARKER: u8 = 0xE0;

/// Direction marker for frames received from the adapter.
pub const RECV_MARKER: u8 = 0xE1;

/// Fixed frame trailer: `\r\n`.
pub const TRAILER: [u8; 2] = [0x0D, 0x0A];

/// Maximum classic CAN payload.
pub const MAX_DLC: usize = 8;

const CHECKSUM_OFFSET: usize = 14;
const SFF_MASK: u32 = 0x0000_07FF;
const EFF_MASK: u32 = 0x1FFF_FFFF;

/// One 17-byte wire frame.
pub type WireFrame = [u8; WIRE_FRAME_LEN];

/// CAN identifier format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum IdType {
    /// 11-bit identifier (SID).
    Standard,
    /// 29-bit identifier (EID).
    Extended,
}

impl IdType {
    /// Largest identifier representable with this format.
    pub fn max_id(self) -> u32 {
        match self {
            IdType::Standard => SFF_MASK,
            IdType::Extended => EFF_MASK,
        }
    }

    fn wire_bit(self) -> u8 {
        match self {
            IdType::Standard => 0,
            IdType::Extended => 1,
        }
    }

    fn from_wire_bit(bit: u8) -> Self {
        if bit == 0 {
            IdType::Standard
        } else {
            IdType::Extended
        }
    }
}

impl fmt::Display for IdType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            IdType::Standard => f.write_str("standard"),
            IdType::Extended => f.write_str("extended"),
        }
    }
}

/// A classic CAN frame addressed to one channel of a link.
///
/// Data bytes beyond `dlc` are always zero; remote frames carry no data even
/// when `dlc` is non-zero. Equality ignores anything past `dlc`.
#[derive(Debug, Clone, Copy)]
pub struct LogicalFrame {
    channel: Channel,
    id_type: IdType,
    rtr: bool,
    dlc: u8,
    id: u32,
    data: [u8; MAX_DLC],
}

impl LogicalFrame {
    /// Create a data frame; the DLC is the data length.
    pub fn new(channel: Channel, id_type: IdType, id: u32, data: &[u8]) -> Result<Self> {
        let dlc = u8::try_from(data.len()).map_err(|_| FrameError::BadLength {
            len: data.len(),
            max: MAX_DLC,
        })?;
        Self::from_parts(channel, id_type, false, dlc, id, data)
    }

    /// Create a remote transmission request.
    pub fn remote(channel: Channel, id_type: IdType, id: u32, dlc: u8) -> Result<Self> {
        Self::from_parts(channel, id_type, true, dlc, id, &[])
    }

    /// Create a frame from individual fields.
    ///
    /// `data` may be shorter than `dlc` (the rest is zero) but never longer.
    /// Data is discarded for remote frames.
    pub fn from_parts(
        channel: Channel,
        id_type: IdType,
        rtr: bool,
        dlc: u8,
        id: u32,
        data: &[u8],
    ) -> Result<Self> {
        if usize::from(dlc) > MAX_DLC {
            return Err(FrameError::BadLength {
                len: usize::from(dlc),
                max: MAX_DLC,
            });
        }
        if data.len() > usize::from(dlc) {
            return Err(FrameError::BadLength {
                len: data.len(),
                max: usize::from(dlc),
            });
        }
        if id > id_type.max_id() {
            return Err(FrameError::BadId { id, id_type });
        }

        let mut padded = [0u8; MAX_DLC];
        if !rtr {
            padded[..data.len()].copy_from_slice(data);
        }

        Ok(Self {
            channel,
            id_type,
            rtr,
            dlc,
            id,
            data: padded,
        })
    }

    /// Same frame, addressed to another channel.
    pub fn with_channel(mut self, channel: Channel) -> Self {
        self.channel = channel;
        self
    }

    pub fn channel(&self) -> Channel {
        self.channel
    }

    pub fn id_type(&self) -> IdType {
        self.id_type
    }

    pub fn is_extended(&self) -> bool {
        self.id_type == IdType::Extended
    }

    pub fn is_remote(&self) -> bool {
        self.rtr
    }

    pub fn dlc(&self) -> u8 {
        self.dlc
    }

    pub fn id(&self) -> u32 {
        self.id
    }

    /// Meaningful payload bytes (empty for remote frames).
    pub fn data(&self) -> &[u8] {
        if self.rtr {
            &[]
        } else {
            &self.data[..usize::from(self.dlc)]
        }
    }

    fn control_byte(&self) -> u8 {
        // Channel index is stored 1-based in the low two bits.
        let port = self.channel.index() as u8 + 1;
        port | (self.id_type.wire_bit() << 2) | (u8::from(self.rtr) << 3) | (self.dlc << 4)
    }
}

impl PartialEq for LogicalFrame {
    fn eq(&self, other: &Self) -> bool {
        self.channel == other.channel
            && self.id_type == other.id_type
            && self.rtr == other.rtr
            && self.dlc == other.dlc
            && self.id == other.id
            && self.data() == other.data()
    }
}

impl Eq for LogicalFrame {}

/// Additive checksum used by the wire format (sum mod 256).
pub fn checksum(bytes: &[u8]) -> u8 {
    bytes.iter().fold(0u8, |acc, byte| acc.wrapping_add(*byte))
}

/// Encode a frame for transmission to the adapter.
///
/// Wire format:
/// ```text
/// ┌────────┬─────────┬───────────┬──────────┬──────────┬──────────┐
/// │ Marker │ Control │ ID (4B BE)│ Data (8B)│ Checksum │ 0D 0A    │
/// │ 0xE0   │ d r x cc│           │ 0-padded │ Σ[0..14) │          │
/// └────────┴─────────┴───────────┴──────────┴──────────┴──────────┘
/// ```
/// Control byte: `cc` = channel + 1 (bits 0-1), `x` = extended (bit 2),
/// `r` = RTR (bit 3), `d` = DLC (bits 4-7).
pub fn encode(frame: &LogicalFrame) -> WireFrame {
    encode_with_marker(frame, SEND_MARKER)
}

/// Encode a frame the way the adapter delivers it to the host.
pub fn encode_inbound(frame: &LogicalFrame) -> WireFrame {
    encode_with_marker(frame, RECV_MARKER)
}

fn encode_with_marker(frame: &LogicalFrame, marker: u8) -> WireFrame {
    let mut wire = [0u8; WIRE_FRAME_LEN];
    {
        let mut dst = &mut wire[..CHECKSUM_OFFSET];
        dst.put_u8(marker);
        dst.put_u8(frame.control_byte());
        dst.put_u32(frame.id);
        dst.put_slice(&frame.data);
    }
    wire[CHECKSUM_OFFSET] = checksum(&wire[..CHECKSUM_OFFSET]);
    wire[CHECKSUM_OFFSET + 1..].copy_from_slice(&TRAILER);
    wire
}

/// Decode a frame received from the adapter.
///
/// The marker is checked first, then the checksum; the trailer is not
/// inspected. Identifier bits beyond the 11-bit or 29-bit range are dropped
/// rather than rejected.
pub fn decode(wire: &WireFrame) -> Result<LogicalFrame> {
    let mut src = &wire[..CHECKSUM_OFFSET];

    let marker = src.get_u8();
    if marker != RECV_MARKER {
        return Err(FrameError::BadHeader {
            found: marker,
            expected: RECV_MARKER,
        });
    }

    let computed = checksum(&wire[..CHECKSUM_OFFSET]);
    let carried = wire[CHECKSUM_OFFSET];
    if computed != carried {
        return Err(FrameError::BadChecksum { computed, carried });
    }

    let control = src.get_u8();
    // A zero channel sub-field yields index -1; Channel::try_from rejects it.
    let channel = Channel::try_from((control & 0x03) as i8 - 1)?;
    let id_type = IdType::from_wire_bit((control >> 2) & 0x01);
    let rtr = (control >> 3) & 0x01 == 1;
    let dlc = control >> 4;
    // The adapter copies the id field unmasked; keep only the bits the
    // format can carry.
    let id = src.get_u32() & id_type.max_id();

    let mut data = [0u8; MAX_DLC];
    src.copy_to_slice(&mut data);
    let payload = &data[..usize::from(dlc).min(MAX_DLC)];

    LogicalFrame::from_parts(channel, id_type, rtr, dlc, id, payload)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> LogicalFrame {
        LogicalFrame::new(Channel::Can1, IdType::Standard, 0x123, &[0xAA, 0xBB]).unwrap()
    }

    #[test]
    fn encodes_reference_vector() {
        let wire = encode(&sample());
        assert_eq!(
            wire,
            [
                0xE0, 0x21, 0x00, 0x00, 0x01, 0x23, 0xAA, 0xBB, 0x00, 0x00, 0x00, 0x00, 0x00,
                0x00, 0x8A, 0x0D, 0x0A
            ]
        );
    }

    #[test]
    fn reference_vector_decodes_as_received() {
        let mut wire = encode(&sample());
        wire[0] = RECV_MARKER;
        wire[14] = checksum(&wire[..14]);

        let frame = decode(&wire).unwrap();
        assert_eq!(frame.channel(), Channel::Can1);
        assert_eq!(frame.id_type(), IdType::Standard);
        assert!(!frame.is_remote());
        assert_eq!(frame.dlc(), 2);
        assert_eq!(frame.id(), 0x123);
        assert_eq!(frame.data(), &[0xAA, 0xBB]);
        assert_eq!(frame, sample());
    }

    #[test]
    fn roundtrip_all_field_combinations() {
        let payload = [0x11, 0x22, 0x33, 0x44, 0x55, 0x66, 0x77, 0x88];
        for channel in Channel::ALL {
            for id_type in [IdType::Standard, IdType::Extended] {
                for rtr in [false, true] {
                    for dlc in 0..=MAX_DLC as u8 {
                        let id = id_type.max_id() - u32::from(dlc);
                        let data = if rtr { &[][..] } else { &payload[..usize::from(dlc)] };
                        let frame =
                            LogicalFrame::from_parts(channel, id_type, rtr, dlc, id, data)
                                .unwrap();

                        let decoded = decode(&encode_inbound(&frame)).unwrap();
                        assert_eq!(decoded, frame, "{channel} {id_type} rtr={rtr} dlc={dlc}");
                    }
                }
            }
        }
    }

    #[test]
    fn unused_data_bytes_are_zero_on_the_wire() {
        let frame = LogicalFrame::new(Channel::Can2, IdType::Extended, 0x1ABC_DEF0, &[0xFF])
            .unwrap();
        let wire = encode(&frame);
        assert_eq!(wire[6], 0xFF);
        assert!(wire[7..14].iter().all(|b| *b == 0));
        assert_eq!(&wire[2..6], &[0x1A, 0xBC, 0xDE, 0xF0]);
        assert_eq!(wire[1], 0x12 | 0x04);
    }

    #[test]
    fn single_bit_flip_breaks_checksum() {
        let wire = encode_inbound(&sample());
        for byte in 1..14 {
            for bit in 0..8 {
                let mut corrupted = wire;
                corrupted[byte] ^= 1 << bit;
                assert!(
                    matches!(decode(&corrupted), Err(FrameError::BadChecksum { .. })),
                    "byte {byte} bit {bit}"
                );
            }
        }
    }

    #[test]
    fn marker_bit_flip_is_rejected() {
        let wire = encode_inbound(&sample());
        for bit in 0..8 {
            let mut corrupted = wire;
            corrupted[0] ^= 1 << bit;
            assert!(decode(&corrupted).is_err(), "bit {bit}");
        }
    }

    #[test]
    fn send_marker_never_decodes() {
        let wire = encode(&sample());
        assert_eq!(checksum(&wire[..14]), wire[14]);
        assert_eq!(
            decode(&wire),
            Err(FrameError::BadHeader {
                found: SEND_MARKER,
                expected: RECV_MARKER
            })
        );
    }

    #[test]
    fn zero_channel_field_is_rejected() {
        let mut wire = encode_inbound(&sample());
        wire[1] &= !0x03;
        wire[14] = checksum(&wire[..14]);
        assert_eq!(decode(&wire), Err(FrameError::BadChannel(-1)));
    }

    #[test]
    fn channel_field_three_is_rejected() {
        let mut wire = encode_inbound(&sample());
        wire[1] |= 0x03;
        wire[14] = checksum(&wire[..14]);
        assert_eq!(decode(&wire), Err(FrameError::BadChannel(2)));
    }

    #[test]
    fn oversized_dlc_is_rejected() {
        let mut wire = encode_inbound(&sample());
        wire[1] = (wire[1] & 0x0F) | (9 << 4);
        wire[14] = checksum(&wire[..14]);
        assert_eq!(decode(&wire), Err(FrameError::BadLength { len: 9, max: 8 }));
    }

    #[test]
    fn remote_frame_drops_data_bytes() {
        let mut wire = encode_inbound(&LogicalFrame::remote(Channel::Can1, IdType::Standard, 0x7FF, 4).unwrap());
        wire[6] = 0x55;
        wire[14] = checksum(&wire[..14]);

        let frame = decode(&wire).unwrap();
        assert!(frame.is_remote());
        assert_eq!(frame.dlc(), 4);
        assert!(frame.data().is_empty());
    }

    #[test]
    fn received_id_is_masked_to_its_format() {
        let mut wire: WireFrame = [0; WIRE_FRAME_LEN];
        wire[0] = RECV_MARKER;
        wire[1] = 0x01;
        wire[2..6].copy_from_slice(&[0x00, 0x00, 0x08, 0x00]);
        wire[14] = checksum(&wire[..14]);
        wire[15..].copy_from_slice(&TRAILER);

        let frame = decode(&wire).unwrap();
        assert_eq!(frame.id_type(), IdType::Standard);
        assert_eq!(frame.id(), 0x000);

        wire[1] = 0x05;
        wire[2..6].copy_from_slice(&[0xFF, 0xFF, 0xFF, 0xFF]);
        wire[14] = checksum(&wire[..14]);
        let frame = decode(&wire).unwrap();
        assert_eq!(frame.id_type(), IdType::Extended);
        assert_eq!(frame.id(), 0x1FFF_FFFF);
    }

    #[test]
    fn standard_id_range_is_enforced() {
        let err = LogicalFrame::new(Channel::Can1, IdType::Standard, 0x800, &[]).unwrap_err();
        assert_eq!(
            err,
            FrameError::BadId {
                id: 0x800,
                id_type: IdType::Standard
            }
        );
        assert!(LogicalFrame::new(Channel::Can1, IdType::Extended, 0x800, &[]).is_ok());
        assert!(LogicalFrame::new(Channel::Can1, IdType::Extended, 0x2000_0000, &[]).is_err());
    }

    #[test]
    fn data_longer_than_dlc_is_rejected() {
        assert!(LogicalFrame::new(Channel::Can1, IdType::Standard, 1, &[0; 9]).is_err());
        assert!(LogicalFrame::from_parts(Channel::Can1, IdType::Standard, false, 1, 1, &[1, 2])
            .is_err());
    }

    #[test]
    fn equality_ignores_padding() {
        let short = LogicalFrame::from_parts(Channel::Can1, IdType::Standard, false, 3, 5, &[1])
            .unwrap();
        let explicit =
            LogicalFrame::from_parts(Channel::Can1, IdType::Standard, false, 3, 5, &[1, 0, 0])
                .unwrap();
        assert_eq!(short, explicit);
        assert_eq!(short.data(), &[1, 0, 0]);
    }
}
