use emuccan_frame::{encode, Channel, LogicalFrame, WireFrame, WIRE_FRAME_LEN};
use emuccan_transport::{Result, Transport};
use tracing::trace;

/// Progress report from [`TxDrainer::resume`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Drain {
    /// Nothing in flight.
    Idle,
    /// Bytes were (possibly) written; `remaining` are still pending.
    InProgress { remaining: usize },
    /// The frame for this channel is fully on the wire; the drainer is idle again.
    Complete(Channel),
}

/// Pushes one 17-byte wire frame through a transport that may take it in
/// pieces.
///
/// Completion is reported on the wakeup after the last byte went out, which
/// is also when the write wakeup is cancelled.
#[derive(Debug, Clone)]
pub struct TxDrainer {
    buffer: WireFrame,
    head: usize,
    remaining: usize,
    active: Option<Channel>,
}

impl TxDrainer {
    pub fn new() -> Self {
        Self {
            buffer: [0u8; WIRE_FRAME_LEN],
            head: 0,
            remaining: 0,
            active: None,
        }
    }

    /// Whether a frame is in flight.
    pub fn is_busy(&self) -> bool {
        self.active.is_some()
    }

    pub fn active_channel(&self) -> Option<Channel> {
        self.active
    }

    pub fn remaining(&self) -> usize {
        self.remaining
    }

    /// Encode `frame` and write as much of it as the transport takes.
    ///
    /// The caller must not start a new frame while [`TxDrainer::is_busy`].
    /// Returns the number of bytes accepted by the first write.
    pub fn start(&mut self, frame: &LogicalFrame, transport: &dyn Transport) -> Result<usize> {
        self.buffer = encode(frame);
        transport.set_write_wakeup(true);
        let written = transport.write(&self.buffer)?.min(WIRE_FRAME_LEN);

        self.head = written;
        self.remaining = WIRE_FRAME_LEN - written;
        self.active = Some(frame.channel());
        trace!(channel = %frame.channel(), written, "tx start");
        Ok(written)
    }

    /// Continue after a write wakeup.
    pub fn resume(&mut self, transport: &dyn Transport) -> Result<Drain> {
        let Some(channel) = self.active else {
            return Ok(Drain::Idle);
        };

        if self.remaining == 0 {
            transport.set_write_wakeup(false);
            self.reset();
            return Ok(Drain::Complete(channel));
        }

        let end = self.head + self.remaining;
        let written = transport.write(&self.buffer[self.head..end])?.min(self.remaining);
        self.head += written;
        self.remaining -= written;
        trace!(%channel, written, remaining = self.remaining, "tx resume");
        Ok(Drain::InProgress {
            remaining: self.remaining,
        })
    }

    /// Forget any in-flight frame.
    pub fn reset(&mut self) {
        self.head = 0;
        self.remaining = 0;
        self.active = None;
    }
}

impl Default for TxDrainer {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use emuccan_frame::IdType;
    use emuccan_transport::{MemoryTransport, TransportError};

    use super::*;

    fn frame() -> LogicalFrame {
        LogicalFrame::new(Channel::Can1, IdType::Standard, 0x123, &[0xAA, 0xBB]).unwrap()
    }

    #[test]
    fn full_write_completes_on_next_wakeup() {
        let transport = MemoryTransport::new("mem");
        let mut drainer = TxDrainer::new();

        assert_eq!(drainer.start(&frame(), &transport).unwrap(), 17);
        assert!(drainer.is_busy());
        assert!(transport.wakeup_wanted());

        assert_eq!(drainer.resume(&transport).unwrap(), Drain::Complete(Channel::Can1));
        assert!(!drainer.is_busy());
        assert!(!transport.wakeup_wanted());
        assert_eq!(transport.written(), encode(&frame()).to_vec());
        assert_eq!(drainer.resume(&transport).unwrap(), Drain::Idle);
    }

    #[test]
    fn partial_writes_drain_in_order() {
        let transport = MemoryTransport::with_write_limit("mem", 5);
        let mut drainer = TxDrainer::new();

        assert_eq!(drainer.start(&frame(), &transport).unwrap(), 5);
        assert_eq!(drainer.remaining(), 12);
        assert_eq!(drainer.resume(&transport).unwrap(), Drain::InProgress { remaining: 7 });
        assert_eq!(drainer.resume(&transport).unwrap(), Drain::InProgress { remaining: 2 });
        assert_eq!(drainer.resume(&transport).unwrap(), Drain::InProgress { remaining: 0 });
        assert!(transport.wakeup_wanted());
        assert_eq!(drainer.resume(&transport).unwrap(), Drain::Complete(Channel::Can1));

        assert_eq!(transport.written(), encode(&frame()).to_vec());
        assert_eq!(transport.write_calls(), 4);
    }

    #[test]
    fn zero_byte_write_keeps_waiting() {
        let transport = MemoryTransport::with_write_limit("mem", 0);
        let mut drainer = TxDrainer::new();

        assert_eq!(drainer.start(&frame(), &transport).unwrap(), 0);
        assert_eq!(drainer.resume(&transport).unwrap(), Drain::InProgress { remaining: 17 });

        transport.set_write_limit(None);
        assert_eq!(drainer.resume(&transport).unwrap(), Drain::InProgress { remaining: 0 });
        assert_eq!(drainer.resume(&transport).unwrap(), Drain::Complete(Channel::Can1));
    }

    #[test]
    fn closed_transport_surfaces_error() {
        let transport = MemoryTransport::with_write_limit("mem", 4);
        let mut drainer = TxDrainer::new();
        drainer.start(&frame(), &transport).unwrap();

        transport.close();
        assert!(matches!(drainer.resume(&transport), Err(TransportError::Closed)));
        assert!(drainer.is_busy());
    }
}
