use tracing::trace;

use crate::codec::{decode, LogicalFrame, WireFrame, TRAILER, WIRE_FRAME_LEN};
use crate::error::FrameError;
use crate::handshake::verify_handshake_ack;

/// Outcome of feeding one byte (or one ack chunk) into a [`ReassemblyBuffer`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Feed {
    /// Byte stored, frame not complete yet.
    Pending,
    /// A complete wire frame decoded successfully.
    Frame(LogicalFrame),
    /// A complete wire frame failed to decode and was dropped.
    Rejected(FrameError),
    /// Byte thrown away while waiting for the next boundary.
    Discarded,
    /// First transport-flagged byte since the last boundary.
    ByteError,
    /// Seventeen bytes that neither decode nor end in a trailer; dropped.
    Overflow,
    /// An activation ack arrived as its own chunk.
    Ack(Result<(), FrameError>),
}

/// Accumulates inbound bytes into 17-byte wire frames.
///
/// Every 17 counted bytes are handed to [`decode`], and a window that decodes
/// is delivered whatever its trailer holds. Bytes the transport flags as
/// corrupt are not counted; a window containing one is dropped at the
/// boundary. Only a window that neither decodes nor ends in the trailer is
/// treated as an overflow: it is held full and the following byte is consumed
/// with it, which slips alignment by one byte until frames line up.
#[derive(Debug, Clone)]
pub struct ReassemblyBuffer {
    bytes: WireFrame,
    count: usize,
    error: bool,
}

impl ReassemblyBuffer {
    pub fn new() -> Self {
        Self {
            bytes: [0u8; WIRE_FRAME_LEN],
            count: 0,
            error: false,
        }
    }

    /// Bytes counted toward the current window.
    pub fn count(&self) -> usize {
        self.count
    }

    /// Whether the current window is being discarded.
    pub fn is_error(&self) -> bool {
        self.error
    }

    /// Clear the resync flag without touching the window.
    pub fn clear_error(&mut self) {
        self.error = false;
    }

    /// Drop any partial window.
    pub fn reset(&mut self) {
        self.count = 0;
        self.error = false;
    }

    /// Feed one byte; `flagged` marks a byte the transport reported as corrupt.
    pub fn feed(&mut self, byte: u8, flagged: bool) -> Feed {
        if flagged {
            if self.error {
                return Feed::Discarded;
            }
            self.error = true;
            return Feed::ByteError;
        }

        if self.count == WIRE_FRAME_LEN {
            // Held after an overflow: this byte ends the episode.
            self.reset();
            return Feed::Discarded;
        }

        if !self.error {
            self.bytes[self.count] = byte;
        }
        self.count += 1;

        if self.count < WIRE_FRAME_LEN {
            return if self.error {
                Feed::Discarded
            } else {
                Feed::Pending
            };
        }

        if self.error {
            self.reset();
            return Feed::Discarded;
        }

        match decode(&self.bytes) {
            Ok(frame) => {
                self.reset();
                Feed::Frame(frame)
            }
            Err(_) if self.bytes[WIRE_FRAME_LEN - TRAILER.len()..] != TRAILER => {
                self.error = true;
                Feed::Overflow
            }
            Err(err) => {
                self.reset();
                Feed::Rejected(err)
            }
        }
    }

    /// Feed a chunk as delivered by the transport.
    ///
    /// A chunk that is exactly an activation ack is reported as
    /// [`Feed::Ack`] and leaves the window untouched. `flags`, when present,
    /// marks corrupt bytes position by position. `Pending` outcomes are not
    /// reported.
    pub fn feed_chunk<F>(&mut self, chunk: &[u8], flags: Option<&[bool]>, mut emit: F)
    where
        F: FnMut(Feed),
    {
        if let Some(ack) = verify_handshake_ack(chunk) {
            trace!(count = self.count, "activation ack chunk");
            emit(Feed::Ack(ack));
            return;
        }

        for (index, byte) in chunk.iter().copied().enumerate() {
            let flagged = flags
                .and_then(|flags| flags.get(index))
                .copied()
                .unwrap_or(false);
            match self.feed(byte, flagged) {
                Feed::Pending => {}
                event => emit(event),
            }
        }
    }
}

impl Default for ReassemblyBuffer {
    fn default() -> Self {
        Self::new()
    }
}
