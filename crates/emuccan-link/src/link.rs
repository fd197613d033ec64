//! Shared state of one serial link carrying two CAN channels.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::thread;
use std::time::Duration;

use emuccan_frame::{build_handshake, Channel, Feed, LogicalFrame, ReassemblyBuffer};
use emuccan_transport::Transport;
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::drainer::{Drain, TxDrainer};
use crate::error::{LinkError, Result};
use crate::sink::{ChannelStats, FrameSink};

/// Wakeups without progress before a flush gives up.
pub const FLUSH_STALL_LIMIT: u32 = 200;

const FLUSH_BACKOFF: Duration = Duration::from_millis(1);

/// What the adapter said about the last activation command.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Activation {
    #[default]
    Unknown,
    Active,
    Rejected,
}

/// Result of asking a link to transmit.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TxOutcome {
    /// The frame is in flight; `written` bytes went out on the first write.
    Started { written: usize },
    /// Another frame is still draining; this one was dropped.
    Dropped,
}

/// Entry points a transport driver calls into.
///
/// All methods may be called concurrently from different threads.
pub trait SerialLink: Send + Sync {
    /// Push received bytes; `flags` marks bytes the transport saw as corrupt.
    fn feed(&self, bytes: &[u8], flags: Option<&[bool]>);

    /// Start transmitting `frame` on `channel`.
    fn start(&self, channel: Channel, frame: &LogicalFrame) -> Result<TxOutcome>;

    /// The transport can take more bytes.
    fn resume(&self) -> Result<Drain>;

    /// Finish any in-flight frame and detach the transport.
    fn teardown(&self) -> Result<()>;
}

struct LinkInner {
    transport: Option<Arc<dyn Transport>>,
    rx: ReassemblyBuffer,
    tx: TxDrainer,
    open: [bool; 2],
    activation: Activation,
    activation_sent: bool,
}

impl LinkInner {
    fn any_open(&self) -> bool {
        self.open.iter().any(|open| *open)
    }
}

/// One transport, one reassembly buffer, one drainer, two channels.
pub struct LinkState {
    name: String,
    transport_key: usize,
    inner: Mutex<LinkInner>,
    sinks: [Arc<dyn FrameSink>; 2],
    rejected_frames: AtomicU64,
}

impl LinkState {
    /// Bind a transport to the sinks for CAN1 and CAN2 (in that order).
    pub fn new(transport: Arc<dyn Transport>, sinks: [Arc<dyn FrameSink>; 2]) -> Self {
        let name = transport.name().to_string();
        let transport_key = transport_key(&transport);
        Self {
            name,
            transport_key,
            inner: Mutex::new(LinkInner {
                transport: Some(transport),
                rx: ReassemblyBuffer::new(),
                tx: TxDrainer::new(),
                open: [false; 2],
                activation: Activation::Unknown,
                activation_sent: false,
            }),
            sinks,
            rejected_frames: AtomicU64::new(0),
        }
    }

    /// Name of the underlying transport.
    pub fn name(&self) -> &str {
        &self.name
    }

    pub(crate) fn transport_key(&self) -> usize {
        self.transport_key
    }

    /// Whether the transport is still attached.
    pub fn is_attached(&self) -> bool {
        self.lock().transport.is_some()
    }

    pub fn is_open(&self, channel: Channel) -> bool {
        self.lock().open[channel.index()]
    }

    pub fn activation(&self) -> Activation {
        self.lock().activation
    }

    /// Whether a frame is still draining.
    pub fn tx_busy(&self) -> bool {
        self.lock().tx.is_busy()
    }

    /// Frames dropped because they failed to decode.
    pub fn rejected_frames(&self) -> u64 {
        self.rejected_frames.load(Ordering::Relaxed)
    }

    pub fn sink(&self, channel: Channel) -> &Arc<dyn FrameSink> {
        &self.sinks[channel.index()]
    }

    pub fn stats(&self, channel: Channel) -> &ChannelStats {
        self.sinks[channel.index()].stats()
    }

    /// Bring a channel up. Once both are up the activation command is sent.
    pub fn open_channel(&self, channel: Channel) -> Result<()> {
        let mut inner = self.lock();
        let transport = inner.transport.clone().ok_or(LinkError::TransportGone)?;

        inner.open[channel.index()] = true;
        inner.rx.clear_error();
        debug!(link = %self.name, %channel, "channel up");

        if inner.open.iter().all(|open| *open) && !inner.activation_sent {
            inner.activation_sent = true;
            inner.activation = Activation::Unknown;
            write_handshake(transport.as_ref(), true)?;
            info!(link = %self.name, "activation command sent");
        }
        Ok(())
    }

    /// Bring a channel down. The last one down flushes and resets the link.
    pub fn close_channel(&self, channel: Channel) {
        let last = {
            let inner = self.lock();
            inner.open[channel.index()] && !inner.open[channel.other().index()]
        };
        if last {
            if let Err(err) = self.flush() {
                warn!(link = %self.name, %channel, error = %err, "discarding unfinished frame");
            }
        }

        let mut inner = self.lock();
        inner.open[channel.index()] = false;
        debug!(link = %self.name, %channel, "channel down");
        if !inner.any_open() {
            if let Some(transport) = &inner.transport {
                transport.set_write_wakeup(false);
            }
            inner.rx.reset();
            inner.tx.reset();
            inner.activation_sent = false;
        }
    }

    /// Send the activation (or deactivation) command outside the open/close cycle.
    pub fn send_handshake(&self, active: bool) -> Result<()> {
        let inner = self.lock();
        let transport = inner.transport.as_ref().ok_or(LinkError::TransportGone)?;
        write_handshake(transport.as_ref(), active)
    }

    /// Drive the drainer until the in-flight frame (if any) is on the wire.
    pub fn flush(&self) -> Result<()> {
        let mut last = usize::MAX;
        let mut stalls = 0;
        loop {
            match self.resume()? {
                Drain::Idle | Drain::Complete(_) => return Ok(()),
                Drain::InProgress { remaining } => {
                    if remaining < last {
                        last = remaining;
                        stalls = 0;
                        continue;
                    }
                    stalls += 1;
                    if stalls >= FLUSH_STALL_LIMIT {
                        return Err(LinkError::FlushStalled { remaining });
                    }
                    thread::sleep(FLUSH_BACKOFF);
                }
            }
        }
    }

    /// Detach the transport after flushing. Later calls are no-ops.
    pub fn hangup(&self) -> Option<Arc<dyn Transport>> {
        if let Err(err) = self.flush() {
            debug!(link = %self.name, error = %err, "flush before hangup failed");
        }
        let mut inner = self.lock();
        let transport = inner.transport.take()?;
        transport.set_write_wakeup(false);
        inner.rx.reset();
        inner.tx.reset();
        inner.activation_sent = false;
        info!(link = %self.name, "transport detached");
        Some(transport)
    }

    fn lock(&self) -> MutexGuard<'_, LinkInner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl SerialLink for LinkState {
    fn feed(&self, bytes: &[u8], flags: Option<&[bool]>) {
        let mut frames = Vec::new();
        {
            let mut inner = self.lock();
            if inner.transport.is_none() || !inner.any_open() {
                return;
            }
            let open = inner.open;
            let mut activation = None;

            inner.rx.feed_chunk(bytes, flags, |event| match event {
                Feed::Pending | Feed::Discarded => {}
                Feed::Frame(frame) => {
                    let channel = frame.channel();
                    if open[channel.index()] {
                        frames.push(frame);
                    } else {
                        debug!(link = %self.name, %channel, "frame for closed channel dropped");
                    }
                }
                Feed::Rejected(err) => {
                    self.rejected_frames.fetch_add(1, Ordering::Relaxed);
                    warn!(link = %self.name, error = %err, "invalid frame dropped");
                }
                Feed::ByteError => {
                    for channel in Channel::ALL {
                        if open[channel.index()] {
                            self.stats(channel).record_rx_error();
                        }
                    }
                }
                Feed::Overflow => {
                    for channel in Channel::ALL {
                        self.stats(channel).record_rx_overrun();
                    }
                    debug!(link = %self.name, "receive overflow, resynchronizing");
                }
                Feed::Ack(result) => activation = Some(result),
            });

            if let Some(result) = activation {
                match result {
                    Ok(()) => {
                        inner.activation = Activation::Active;
                        info!(link = %self.name, "channels activated");
                    }
                    Err(err) => {
                        inner.activation = Activation::Rejected;
                        warn!(link = %self.name, error = %err, "activation failed");
                    }
                }
            }
        }

        for frame in frames {
            let channel = frame.channel();
            self.stats(channel).record_rx(frame.dlc());
            self.sink(channel).deliver(frame);
        }
    }

    fn start(&self, channel: Channel, frame: &LogicalFrame) -> Result<TxOutcome> {
        let mut inner = self.lock();
        if !inner.open[channel.index()] {
            return Err(LinkError::ChannelDown(channel));
        }
        let transport = inner.transport.clone().ok_or(LinkError::TransportGone)?;

        if inner.tx.is_busy() {
            self.stats(channel).record_tx_dropped();
            debug!(link = %self.name, %channel, "transmit busy, frame dropped");
            return Ok(TxOutcome::Dropped);
        }

        let frame = frame.with_channel(channel);
        match inner.tx.start(&frame, transport.as_ref()) {
            Ok(written) => {
                self.stats(channel).record_tx_start(frame.dlc());
                Ok(TxOutcome::Started { written })
            }
            Err(err) => {
                inner.tx.reset();
                transport.set_write_wakeup(false);
                Err(err.into())
            }
        }
    }

    fn resume(&self) -> Result<Drain> {
        let mut inner = self.lock();
        let transport = inner.transport.clone().ok_or(LinkError::TransportGone)?;
        match inner.tx.resume(transport.as_ref()) {
            Ok(Drain::Complete(channel)) => {
                self.stats(channel).record_tx_done();
                Ok(Drain::Complete(channel))
            }
            Ok(progress) => Ok(progress),
            Err(err) => {
                inner.tx.reset();
                transport.set_write_wakeup(false);
                Err(err.into())
            }
        }
    }

    fn teardown(&self) -> Result<()> {
        self.hangup().map(|_| ()).ok_or(LinkError::TransportGone)
    }
}

impl std::fmt::Debug for LinkState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LinkState")
            .field("name", &self.name)
            .field("attached", &self.is_attached())
            .finish()
    }
}

fn write_handshake(transport: &dyn Transport, active: bool) -> Result<()> {
    let cmd = build_handshake(active);
    let written = transport.write(&cmd)?;
    if written < cmd.len() {
        warn!(
            transport = transport.name(),
            written,
            "short write of activation command"
        );
    }
    Ok(())
}

fn transport_key(transport: &Arc<dyn Transport>) -> usize {
    Arc::as_ptr(transport) as *const () as usize
}
