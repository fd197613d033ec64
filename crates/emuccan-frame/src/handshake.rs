//! Channel activation exchange.
//!
//! The host sends a 6-byte command `[0x61, s, s, Σ, 0x0D, 0x0A]` where `s` is
//! 1 to activate both channels and 0 to deactivate them. The adapter answers
//! with a 5-byte ack `[0x61, s, 0x61 + s, 0x0D, 0x0A]`; `s == 0` means the
//! command was accepted.

use crate::codec::{checksum, TRAILER};
use crate::error::FrameError;

/// First byte of both the command and the ack.
pub const HANDSHAKE_HEAD: u8 = 0x61;

/// Length of the outbound activation command.
pub const HANDSHAKE_LEN: usize = 6;

/// Length of the inbound acknowledgement.
pub const ACK_LEN: usize = 5;

/// Build the activation (or deactivation) command.
pub fn build_handshake(active: bool) -> [u8; HANDSHAKE_LEN] {
    let status = u8::from(active);
    let mut cmd = [HANDSHAKE_HEAD, status, status, 0, TRAILER[0], TRAILER[1]];
    cmd[3] = checksum(&cmd[..3]);
    cmd
}

/// Check whether `buf` is an activation ack and whether it reports success.
///
/// Returns `None` when `buf` does not have the ack shape at all.
pub fn verify_handshake_ack(buf: &[u8]) -> Option<Result<(), FrameError>> {
    match buf {
        [HANDSHAKE_HEAD, status, check, 0x0D, 0x0A] => {
            if *status == 0 && *check == HANDSHAKE_HEAD.wrapping_add(*status) {
                Some(Ok(()))
            } else {
                Some(Err(FrameError::AckMismatch {
                    status: *status,
                    check: *check,
                }))
            }
        }
        _ => None,
    }
}

/// `Some(true)` for a successful ack, `Some(false)` for a failed one.
pub fn match_handshake_ack(buf: &[u8]) -> Option<bool> {
    verify_handshake_ack(buf).map(|result| result.is_ok())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn activation_command_layout() {
        assert_eq!(build_handshake(true), [0x61, 0x01, 0x01, 0x63, 0x0D, 0x0A]);
        assert_eq!(build_handshake(false), [0x61, 0x00, 0x00, 0x61, 0x0D, 0x0A]);
    }

    #[test]
    fn recognizes_successful_ack() {
        assert_eq!(match_handshake_ack(&[0x61, 0x00, 0x61, 0x0D, 0x0A]), Some(true));
    }

    #[test]
    fn recognizes_failed_ack() {
        assert_eq!(match_handshake_ack(&[0x61, 0x00, 0x62, 0x0D, 0x0A]), Some(false));
        assert_eq!(
            verify_handshake_ack(&[0x61, 0x01, 0x62, 0x0D, 0x0A]),
            Some(Err(FrameError::AckMismatch {
                status: 0x01,
                check: 0x62
            }))
        );
    }

    #[test]
    fn other_shapes_are_not_acks() {
        assert_eq!(match_handshake_ack(&[0x61, 0x00, 0x61, 0x0D]), None);
        assert_eq!(match_handshake_ack(&[0x61, 0x00, 0x61, 0x0D, 0x0A, 0x00]), None);
        assert_eq!(match_handshake_ack(&[0x62, 0x00, 0x61, 0x0D, 0x0A]), None);
        assert_eq!(match_handshake_ack(&[0x61, 0x00, 0x61, 0x0A, 0x0D]), None);
        assert_eq!(match_handshake_ack(&[]), None);
    }
}
