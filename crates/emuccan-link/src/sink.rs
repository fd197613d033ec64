//! Per-channel delivery of decoded frames and interface counters.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::mpsc::{self, Receiver, Sender};
use std::sync::Arc;

use emuccan_frame::LogicalFrame;
use serde::Serialize;
use tracing::debug;

/// Receiving end of one logical channel.
///
/// `deliver` is called without the link lock held, possibly from the thread
/// that feeds the transport; it must not block for long.
pub trait FrameSink: Send + Sync {
    /// Hand over one decoded frame.
    fn deliver(&self, frame: LogicalFrame);

    /// Counters the link updates for this channel.
    fn stats(&self) -> &ChannelStats;
}

/// Interface counters for one channel.
#[derive(Debug, Default)]
pub struct ChannelStats {
    rx_packets: AtomicU64,
    rx_bytes: AtomicU64,
    rx_errors: AtomicU64,
    rx_over_errors: AtomicU64,
    tx_packets: AtomicU64,
    tx_bytes: AtomicU64,
    tx_dropped: AtomicU64,
}

impl ChannelStats {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_rx(&self, dlc: u8) {
        self.rx_packets.fetch_add(1, Ordering::Relaxed);
        self.rx_bytes.fetch_add(u64::from(dlc), Ordering::Relaxed);
    }

    pub fn record_rx_error(&self) {
        self.rx_errors.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_rx_overrun(&self) {
        self.rx_over_errors.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_tx_start(&self, dlc: u8) {
        self.tx_bytes.fetch_add(u64::from(dlc), Ordering::Relaxed);
    }

    pub fn record_tx_done(&self) {
        self.tx_packets.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_tx_dropped(&self) {
        self.tx_dropped.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            rx_packets: self.rx_packets.load(Ordering::Relaxed),
            rx_bytes: self.rx_bytes.load(Ordering::Relaxed),
            rx_errors: self.rx_errors.load(Ordering::Relaxed),
            rx_over_errors: self.rx_over_errors.load(Ordering::Relaxed),
            tx_packets: self.tx_packets.load(Ordering::Relaxed),
            tx_bytes: self.tx_bytes.load(Ordering::Relaxed),
            tx_dropped: self.tx_dropped.load(Ordering::Relaxed),
        }
    }
}

/// Point-in-time copy of [`ChannelStats`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct StatsSnapshot {
    pub rx_packets: u64,
    pub rx_bytes: u64,
    pub rx_errors: u64,
    pub rx_over_errors: u64,
    pub tx_packets: u64,
    pub tx_bytes: u64,
    pub tx_dropped: u64,
}

/// Sink that forwards frames into a std channel.
#[derive(Debug)]
pub struct QueueSink {
    tx: Sender<LogicalFrame>,
    stats: ChannelStats,
}

impl QueueSink {
    pub fn new() -> (Arc<Self>, Receiver<LogicalFrame>) {
        let (tx, rx) = mpsc::channel();
        let sink = Arc::new(Self {
            tx,
            stats: ChannelStats::new(),
        });
        (sink, rx)
    }
}

impl FrameSink for QueueSink {
    fn deliver(&self, frame: LogicalFrame) {
        if self.tx.send(frame).is_err() {
            debug!("frame receiver dropped; discarding frame");
        }
    }

    fn stats(&self) -> &ChannelStats {
        &self.stats
    }
}

#[cfg(test)]
mod tests {
    use emuccan_frame::{Channel, IdType};

    use super::*;

    #[test]
    fn counters_accumulate() {
        let stats = ChannelStats::new();
        stats.record_rx(8);
        stats.record_rx(3);
        stats.record_rx_error();
        stats.record_tx_start(2);
        stats.record_tx_done();
        stats.record_tx_dropped();

        let snap = stats.snapshot();
        assert_eq!(snap.rx_packets, 2);
        assert_eq!(snap.rx_bytes, 11);
        assert_eq!(snap.rx_errors, 1);
        assert_eq!(snap.rx_over_errors, 0);
        assert_eq!(snap.tx_packets, 1);
        assert_eq!(snap.tx_bytes, 2);
        assert_eq!(snap.tx_dropped, 1);
    }

    #[test]
    fn queue_sink_forwards_frames() {
        let (sink, rx) = QueueSink::new();
        let frame = LogicalFrame::new(Channel::Can1, IdType::Standard, 0x10, &[1]).unwrap();
        sink.deliver(frame);
        assert_eq!(rx.try_recv().unwrap(), frame);

        drop(rx);
        sink.deliver(frame);
    }

    #[test]
    fn snapshot_serializes() {
        let value = serde_json::to_value(StatsSnapshot::default()).unwrap();
        assert_eq!(value["tx_dropped"], 0);
        assert_eq!(value.as_object().unwrap().len(), 7);
    }
}
