use std::sync::atomic::{AtomicU16, Ordering};
use std::sync::{Mutex, PoisonError};
use std::thread;

use emuccan_frame::{Channel, LogicalFrame};
use tracing::{debug, info};

use crate::config::PacingDelay;
use crate::error::{ConfigError, Result};
use crate::link::{SerialLink, TxOutcome};

/// Serializes transmit starts across every link and applies the pacing delay.
///
/// The gate is held for the whole stall plus the first write, so frames
/// leave in the order callers acquired it.
#[derive(Debug, Default)]
pub struct TransmitGate {
    lock: Mutex<()>,
    delay_us: AtomicU16,
}

impl TransmitGate {
    pub fn new(delay: PacingDelay) -> Self {
        Self {
            lock: Mutex::new(()),
            delay_us: AtomicU16::new(delay.as_micros()),
        }
    }

    pub fn pacing_delay(&self) -> PacingDelay {
        PacingDelay::from_micros(self.delay_us.load(Ordering::Relaxed)).unwrap_or_default()
    }

    pub fn set_pacing_delay(&self, delay: PacingDelay) {
        self.delay_us.store(delay.as_micros(), Ordering::Relaxed);
        info!(delay = %delay, "transmit pacing delay set");
    }

    /// Parse and apply a delay; the current value is kept on error.
    pub fn set_pacing_delay_str(&self, input: &str) -> std::result::Result<PacingDelay, ConfigError> {
        let delay: PacingDelay = input.parse()?;
        self.set_pacing_delay(delay);
        Ok(delay)
    }

    /// Stall for the pacing delay, then start `frame` on `link`.
    pub fn transmit(
        &self,
        link: &dyn SerialLink,
        channel: Channel,
        frame: &LogicalFrame,
    ) -> Result<TxOutcome> {
        let _guard = self.lock.lock().unwrap_or_else(PoisonError::into_inner);
        let delay = self.pacing_delay();
        if !delay.is_zero() {
            thread::sleep(delay.as_duration());
        }
        let outcome = link.start(channel, frame)?;
        debug!(%channel, id = frame.id(), ?outcome, "transmit");
        Ok(outcome)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::AtomicBool;
    use std::sync::Arc;
    use std::time::{Duration, Instant};

    use emuccan_frame::IdType;

    use super::*;
    use crate::drainer::Drain;

    /// Records start order and fails if two starts ever overlap.
    #[derive(Default)]
    struct RecordingLink {
        inside: AtomicBool,
        starts: Mutex<Vec<u32>>,
    }

    impl SerialLink for RecordingLink {
        fn feed(&self, _bytes: &[u8], _flags: Option<&[bool]>) {}

        fn start(&self, _channel: Channel, frame: &LogicalFrame) -> Result<TxOutcome> {
            assert!(!self.inside.swap(true, Ordering::SeqCst), "overlapping start");
            thread::sleep(Duration::from_micros(50));
            self.starts.lock().unwrap().push(frame.id());
            self.inside.store(false, Ordering::SeqCst);
            Ok(TxOutcome::Started { written: 17 })
        }

        fn resume(&self) -> Result<Drain> {
            Ok(Drain::Idle)
        }

        fn teardown(&self) -> Result<()> {
            Ok(())
        }
    }

    fn frame(id: u32) -> LogicalFrame {
        LogicalFrame::new(Channel::Can1, IdType::Standard, id, &[]).unwrap()
    }

    #[test]
    fn starts_never_overlap() {
        let gate = Arc::new(TransmitGate::default());
        let links = [Arc::new(RecordingLink::default()), Arc::new(RecordingLink::default())];
        let shared = Arc::new(RecordingLink::default());

        let handles: Vec<_> = (0..4u32)
            .map(|worker| {
                let gate = Arc::clone(&gate);
                let shared = Arc::clone(&shared);
                let own = Arc::clone(&links[(worker % 2) as usize]);
                thread::spawn(move || {
                    for n in 0..25 {
                        let id = worker * 100 + n;
                        gate.transmit(shared.as_ref(), Channel::Can1, &frame(id)).unwrap();
                        gate.transmit(own.as_ref(), Channel::Can1, &frame(id)).unwrap();
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().expect("worker thread should complete");
        }

        assert_eq!(shared.starts.lock().unwrap().len(), 100);
        // Each worker's frames keep their submission order.
        for worker in 0..4u32 {
            let mine: Vec<u32> = shared
                .starts
                .lock()
                .unwrap()
                .iter()
                .copied()
                .filter(|id| id / 100 == worker)
                .collect();
            assert_eq!(mine, (0..25).map(|n| worker * 100 + n).collect::<Vec<_>>());
        }
    }

    #[test]
    fn pacing_delay_stalls_each_start() {
        let gate = TransmitGate::new(PacingDelay::from_micros(1000).unwrap());
        let link = RecordingLink::default();

        let begin = Instant::now();
        for id in 0..5 {
            gate.transmit(&link, Channel::Can1, &frame(id)).unwrap();
        }
        assert!(begin.elapsed() >= Duration::from_millis(5));
    }

    #[test]
    fn bad_delay_input_keeps_previous_value() {
        let gate = TransmitGate::default();
        assert_eq!(gate.set_pacing_delay_str("1000").unwrap().as_micros(), 1000);
        assert!(gate.set_pacing_delay_str("1001").is_err());
        assert!(gate.set_pacing_delay_str("fast").is_err());
        assert_eq!(gate.pacing_delay().as_micros(), 1000);
    }
}
