//! Channel slot table and link lifetime supervision.
//!
//! The registry owns every [`LinkState`]: each attached link occupies two
//! slots, one per channel, and each slot holds a strong reference. Handles
//! handed out to callers only hold weak references, so a link's storage is
//! released as soon as both of its slots are torn down.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};

use emuccan_frame::{Channel, LogicalFrame};
use emuccan_transport::Transport;
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::config::{PacingDelay, RegistryConfig};
use crate::drainer::Drain;
use crate::error::{LinkError, Result};
use crate::gate::TransmitGate;
use crate::link::{Activation, LinkState, SerialLink, TxOutcome};
use crate::sink::{FrameSink, StatsSnapshot};

struct Slot {
    link: Arc<LinkState>,
    channel: Channel,
}

/// Name and back-reference for one registered channel.
#[derive(Debug, Clone)]
pub struct ChannelHandle {
    link: Weak<LinkState>,
    channel: Channel,
    slot: usize,
    name: String,
}

impl ChannelHandle {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn channel(&self) -> Channel {
        self.channel
    }

    pub fn slot(&self) -> usize {
        self.slot
    }

    /// The link, if it has not been released yet.
    pub fn link(&self) -> Option<Arc<LinkState>> {
        self.link.upgrade()
    }

    fn upgrade(&self) -> Result<Arc<LinkState>> {
        self.link.upgrade().ok_or(LinkError::LinkGone)
    }
}

/// Transport-side view of an attached link.
///
/// The transport driver keeps this and calls [`AttachedLink::feed`] with
/// received bytes and [`AttachedLink::write_wakeup`] whenever it can accept
/// more output.
#[derive(Debug, Clone)]
pub struct AttachedLink {
    link: Weak<LinkState>,
    channels: [ChannelHandle; 2],
}

impl AttachedLink {
    pub fn channels(&self) -> &[ChannelHandle; 2] {
        &self.channels
    }

    pub fn channel(&self, channel: Channel) -> &ChannelHandle {
        &self.channels[channel.index()]
    }

    pub fn link(&self) -> Option<Arc<LinkState>> {
        self.link.upgrade()
    }

    /// Push received bytes; dropped silently once the link is released.
    pub fn feed(&self, bytes: &[u8], flags: Option<&[bool]>) {
        if let Some(link) = self.link.upgrade() {
            link.feed(bytes, flags);
        }
    }

    /// The transport can take more bytes.
    pub fn write_wakeup(&self) -> Result<Drain> {
        match self.link.upgrade() {
            Some(link) => link.resume(),
            None => Ok(Drain::Idle),
        }
    }

    /// The transport is going away: finish the in-flight frame and detach.
    ///
    /// The channels stay registered until [`LinkRegistry::reap`] or
    /// [`LinkRegistry::teardown`] removes them.
    pub fn hangup(&self) {
        if let Some(link) = self.link.upgrade() {
            link.hangup();
        }
    }
}

/// Serializable view of one registered channel.
#[derive(Debug, Clone, Serialize)]
pub struct ChannelStatus {
    pub name: String,
    pub slot: usize,
    pub channel: Channel,
    pub transport: String,
    pub attached: bool,
    pub open: bool,
    pub activation: Activation,
    /// Wire frames on this channel's link that failed to decode.
    pub rejected_frames: u64,
    pub stats: StatsSnapshot,
}

/// Owner of every attached link and the process-wide transmit gate.
#[derive(Debug)]
pub struct LinkRegistry {
    config: RegistryConfig,
    slots: Mutex<Vec<Option<Slot>>>,
    gate: TransmitGate,
}

impl std::fmt::Debug for Slot {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Slot")
            .field("link", &self.link.name())
            .field("channel", &self.channel)
            .finish()
    }
}

impl LinkRegistry {
    pub fn new(config: RegistryConfig) -> Self {
        let max = config.effective_max_channels();
        let gate = TransmitGate::new(config.pacing_delay);
        Self {
            config,
            slots: Mutex::new((0..max).map(|_| None).collect()),
            gate,
        }
    }

    pub fn config(&self) -> &RegistryConfig {
        &self.config
    }

    pub fn gate(&self) -> &TransmitGate {
        &self.gate
    }

    pub fn pacing_delay(&self) -> PacingDelay {
        self.gate.pacing_delay()
    }

    pub fn set_pacing_delay(&self, delay: PacingDelay) {
        self.gate.set_pacing_delay(delay);
    }

    /// Number of slots in use.
    pub fn len(&self) -> usize {
        self.lock().iter().filter(|slot| slot.is_some()).count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Register a transport as a new link with two channels.
    ///
    /// Links whose transport has hung up are reaped first so their slots can
    /// be reused.
    pub fn attach(
        &self,
        transport: Arc<dyn Transport>,
        sinks: [Arc<dyn FrameSink>; 2],
    ) -> Result<AttachedLink> {
        self.reap();

        let mut slots = self.lock();
        let key = Arc::as_ptr(&transport) as *const () as usize;
        let duplicate = slots
            .iter()
            .flatten()
            .any(|slot| slot.link.transport_key() == key && slot.link.is_attached());
        if duplicate {
            return Err(LinkError::AlreadyAttached);
        }

        let free: Vec<usize> = slots
            .iter()
            .enumerate()
            .filter(|(_, slot)| slot.is_none())
            .map(|(index, _)| index)
            .take(2)
            .collect();
        let &[first, second] = free.as_slice() else {
            warn!(max = slots.len(), "no free channel slots");
            return Err(LinkError::NoFreeSlots { max: slots.len() });
        };

        let link = Arc::new(LinkState::new(transport, sinks));
        let mut claim = |channel: Channel, index: usize| {
            slots[index] = Some(Slot {
                link: Arc::clone(&link),
                channel,
            });
            ChannelHandle {
                link: Arc::downgrade(&link),
                channel,
                slot: index,
                name: format!("{}{}", self.config.name_prefix, index),
            }
        };
        let can1 = claim(Channel::Can1, first);
        let can2 = claim(Channel::Can2, second);

        info!(
            transport = link.name(),
            can1 = can1.name(),
            can2 = can2.name(),
            "link attached"
        );
        Ok(AttachedLink {
            link: Arc::downgrade(&link),
            channels: [can1, can2],
        })
    }

    /// Look up a channel by name.
    pub fn find(&self, name: &str) -> Result<ChannelHandle> {
        let slots = self.lock();
        slots
            .iter()
            .enumerate()
            .find_map(|(index, slot)| {
                let slot = slot.as_ref()?;
                let handle = self.handle_for(index, slot);
                (handle.name == name).then_some(handle)
            })
            .ok_or_else(|| LinkError::UnknownChannel(name.to_string()))
    }

    /// Bring a channel up.
    pub fn open(&self, handle: &ChannelHandle) -> Result<()> {
        handle.upgrade()?.open_channel(handle.channel)
    }

    /// Bring a channel down.
    pub fn close(&self, handle: &ChannelHandle) -> Result<()> {
        handle.upgrade()?.close_channel(handle.channel);
        Ok(())
    }

    /// Transmit through the process-wide gate.
    pub fn transmit(&self, handle: &ChannelHandle, frame: &LogicalFrame) -> Result<TxOutcome> {
        let link = handle.upgrade()?;
        self.gate.transmit(link.as_ref(), handle.channel, frame)
    }

    /// Remove a channel from the registry.
    ///
    /// When this was the link's last slot, any in-flight frame is drained
    /// before the link is released.
    pub fn teardown(&self, handle: &ChannelHandle) -> Result<()> {
        let (slot, last) = {
            let mut slots = self.lock();
            let owned = slots
                .get(handle.slot)
                .and_then(Option::as_ref)
                .is_some_and(|slot| Arc::as_ptr(&slot.link) == handle.link.as_ptr());
            let taken = if owned { slots[handle.slot].take() } else { None };
            let Some(slot) = taken else {
                return Err(LinkError::UnknownChannel(handle.name.clone()));
            };
            let last = !slots
                .iter()
                .flatten()
                .any(|other| Arc::ptr_eq(&other.link, &slot.link));
            (slot, last)
        };

        slot.link.close_channel(slot.channel);
        debug!(channel = handle.name(), "channel torn down");

        if last {
            if slot.link.is_attached() {
                if let Err(err) = slot.link.flush() {
                    warn!(link = slot.link.name(), error = %err, "unfinished frame at release");
                }
            }
            if let Some(link) = Arc::into_inner(slot.link) {
                info!(link = link.name(), "link released");
            }
        }
        Ok(())
    }

    /// Tear down every channel whose link has lost its transport.
    ///
    /// Returns the number of channels removed.
    pub fn reap(&self) -> usize {
        let dead: Vec<ChannelHandle> = {
            let slots = self.lock();
            slots
                .iter()
                .enumerate()
                .filter_map(|(index, slot)| {
                    let slot = slot.as_ref()?;
                    (!slot.link.is_attached()).then(|| self.handle_for(index, slot))
                })
                .collect()
        };

        let mut reaped = 0;
        for handle in &dead {
            if self.teardown(handle).is_ok() {
                reaped += 1;
            }
        }
        if reaped > 0 {
            debug!(reaped, "reaped detached channels");
        }
        reaped
    }

    /// Snapshot of every registered channel, in slot order.
    pub fn status(&self) -> Vec<ChannelStatus> {
        let slots = self.lock();
        slots
            .iter()
            .enumerate()
            .filter_map(|(index, slot)| {
                let slot = slot.as_ref()?;
                Some(ChannelStatus {
                    name: format!("{}{}", self.config.name_prefix, index),
                    slot: index,
                    channel: slot.channel,
                    transport: slot.link.name().to_string(),
                    attached: slot.link.is_attached(),
                    open: slot.link.is_open(slot.channel),
                    activation: slot.link.activation(),
                    rejected_frames: slot.link.rejected_frames(),
                    stats: slot.link.stats(slot.channel).snapshot(),
                })
            })
            .collect()
    }

    fn handle_for(&self, index: usize, slot: &Slot) -> ChannelHandle {
        ChannelHandle {
            link: Arc::downgrade(&slot.link),
            channel: slot.channel,
            slot: index,
            name: format!("{}{}", self.config.name_prefix, index),
        }
    }

    fn lock(&self) -> MutexGuard<'_, Vec<Option<Slot>>> {
        self.slots.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Default for LinkRegistry {
    fn default() -> Self {
        Self::new(RegistryConfig::default())
    }
}

#[cfg(test)]
mod tests {
    use std::sync::mpsc::Receiver;
    use std::thread;

    use emuccan_frame::{build_handshake, decode, encode_inbound, IdType, RECV_MARKER};
    use emuccan_transport::MemoryTransport;

    use super::*;
    use crate::sink::QueueSink;

    fn sinks() -> ([Arc<dyn FrameSink>; 2], [Receiver<LogicalFrame>; 2]) {
        let (can1, rx1) = QueueSink::new();
        let (can2, rx2) = QueueSink::new();
        ([can1, can2], [rx1, rx2])
    }

    fn attach(registry: &LinkRegistry, name: &str) -> (Arc<MemoryTransport>, AttachedLink) {
        let transport = Arc::new(MemoryTransport::new(name));
        let (sinks, _rx) = sinks();
        let attached = registry
            .attach(transport.clone(), sinks)
            .expect("attach should succeed");
        (transport, attached)
    }

    fn frame(channel: Channel, id: u32, data: &[u8]) -> LogicalFrame {
        LogicalFrame::new(channel, IdType::Extended, id, data).unwrap()
    }

    #[test]
    fn attach_names_two_slots() {
        let registry = LinkRegistry::default();
        let (_t0, first) = attach(&registry, "tty0");
        let (_t1, second) = attach(&registry, "tty1");

        let names: Vec<&str> = first
            .channels()
            .iter()
            .chain(second.channels())
            .map(ChannelHandle::name)
            .collect();
        assert_eq!(names, ["emuccan0", "emuccan1", "emuccan2", "emuccan3"]);
        assert_eq!(first.channel(Channel::Can2).channel(), Channel::Can2);
        assert_eq!(registry.len(), 4);
        assert_eq!(registry.find("emuccan3").unwrap().slot(), 3);
        assert!(matches!(
            registry.find("emuccan9"),
            Err(LinkError::UnknownChannel(_))
        ));
    }

    #[test]
    fn slots_run_out() {
        let registry = LinkRegistry::new(RegistryConfig {
            max_channels: 4,
            ..RegistryConfig::default()
        });
        let (_t0, _a) = attach(&registry, "tty0");
        let (_t1, _b) = attach(&registry, "tty1");

        let (sinks, _rx) = sinks();
        let err = registry
            .attach(Arc::new(MemoryTransport::new("tty2")), sinks)
            .unwrap_err();
        assert!(matches!(err, LinkError::NoFreeSlots { max: 4 }));
    }

    #[test]
    fn same_transport_cannot_attach_twice() {
        let registry = LinkRegistry::default();
        let (transport, _attached) = attach(&registry, "tty0");
        let (sinks, _rx) = sinks();
        assert!(matches!(
            registry.attach(transport, sinks),
            Err(LinkError::AlreadyAttached)
        ));
    }

    #[test]
    fn teardown_releases_link_after_both_slots() {
        let registry = LinkRegistry::default();
        let (_transport, attached) = attach(&registry, "tty0");
        let [can1, can2] = attached.channels().clone();

        registry.teardown(&can1).unwrap();
        assert!(attached.link().is_some());
        assert!(matches!(
            registry.teardown(&can1),
            Err(LinkError::UnknownChannel(_))
        ));

        registry.teardown(&can2).unwrap();
        assert!(attached.link().is_none());
        assert!(registry.is_empty());
        assert!(matches!(registry.open(&can1), Err(LinkError::LinkGone)));
        assert_eq!(attached.write_wakeup().unwrap(), Drain::Idle);
    }

    #[test]
    fn teardown_drains_in_flight_frame() {
        let registry = LinkRegistry::default();
        let (transport, attached) = attach(&registry, "tty0");
        let [can1, can2] = attached.channels().clone();
        registry.open(&can1).unwrap();
        registry.open(&can2).unwrap();
        transport.take_written();
        transport.set_write_limit(Some(6));

        let sent = frame(Channel::Can1, 0x1234, &[1, 2, 3, 4]);
        registry.transmit(&can1, &sent).unwrap();
        registry.teardown(&can2).unwrap();
        registry.teardown(&can1).unwrap();

        assert_eq!(transport.written(), emuccan_frame::encode(&sent).to_vec());
        assert!(!transport.wakeup_wanted());
    }

    #[test]
    fn hangup_then_reap_frees_slots() {
        let registry = LinkRegistry::new(RegistryConfig {
            max_channels: 4,
            ..RegistryConfig::default()
        });
        let (_t0, first) = attach(&registry, "tty0");
        let (_t1, _second) = attach(&registry, "tty1");

        first.hangup();
        assert!(matches!(
            first.write_wakeup(),
            Err(LinkError::TransportGone)
        ));
        let (_t2, third) = attach(&registry, "tty2");
        assert_eq!(third.channels()[0].name(), "emuccan0");
        assert!(first.link().is_none());
        assert_eq!(registry.reap(), 0);
    }

    #[test]
    fn open_both_sends_activation_and_status_reports() {
        let registry = LinkRegistry::default();
        let (transport, attached) = attach(&registry, "tty0");
        for handle in attached.channels() {
            registry.open(handle).unwrap();
        }
        assert_eq!(transport.take_written(), build_handshake(true).to_vec());

        attached.feed(&[0x61, 0x00, 0x61, 0x0D, 0x0A], None);
        let status = registry.status();
        assert_eq!(status.len(), 2);
        assert!(status.iter().all(|s| s.open && s.activation == Activation::Active));

        let json = serde_json::to_value(&status).unwrap();
        assert_eq!(json[1]["channel"], "can2");
        assert_eq!(json[0]["activation"], "active");
        assert_eq!(json[0]["rejected_frames"], 0);
    }

    #[test]
    fn status_counts_rejected_frames() {
        let registry = LinkRegistry::default();
        let (_transport, attached) = attach(&registry, "tty0");
        for handle in attached.channels() {
            registry.open(handle).unwrap();
        }

        let mut corrupted = encode_inbound(&frame(Channel::Can1, 0x10, &[1, 2]));
        corrupted[7] ^= 0x20;
        attached.feed(&corrupted, None);
        attached.feed(&encode_inbound(&frame(Channel::Can2, 0x11, &[3])), None);

        let status = registry.status();
        assert!(status.iter().all(|row| row.rejected_frames == 1));
        assert_eq!(status[1].stats.rx_packets, 1);

        let json = serde_json::to_value(&status).unwrap();
        assert_eq!(json[0]["rejected_frames"], 1);
    }

    #[test]
    fn transmit_on_closed_channel_fails() {
        let registry = LinkRegistry::default();
        let (_transport, attached) = attach(&registry, "tty0");
        let can1 = attached.channel(Channel::Can1);
        assert!(matches!(
            registry.transmit(can1, &frame(Channel::Can1, 1, &[])),
            Err(LinkError::ChannelDown(Channel::Can1))
        ));
    }

    #[test]
    fn received_frames_reach_sinks() {
        let registry = LinkRegistry::default();
        let transport = Arc::new(MemoryTransport::new("tty0"));
        let (sinks, rx) = sinks();
        let attached = registry.attach(transport, sinks).unwrap();
        registry.open(attached.channel(Channel::Can2)).unwrap();

        let incoming = frame(Channel::Can2, 0x1ABC_DEF0, &[0xDE, 0xAD]);
        attached.feed(&encode_inbound(&incoming), None);
        assert_eq!(rx[1].try_recv().unwrap(), incoming);
        assert!(rx[0].try_recv().is_err());
    }

    #[test]
    fn concurrent_transmit_keeps_frames_whole() {
        let registry = Arc::new(LinkRegistry::default());
        let mut links = Vec::new();
        for name in ["tty0", "tty1"] {
            let transport = Arc::new(MemoryTransport::new(name));
            let (sinks, _rx) = sinks();
            let attached = registry.attach(transport.clone(), sinks).unwrap();
            for handle in attached.channels() {
                registry.open(handle).unwrap();
            }
            transport.take_written();
            transport.set_write_limit(Some(5));
            links.push((transport, attached));
        }

        let senders: Vec<_> = links
            .iter()
            .flat_map(|(_, attached)| attached.channels().clone())
            .map(|handle| {
                let registry = Arc::clone(&registry);
                let attached = links[handle.slot() / 2].1.clone();
                thread::spawn(move || {
                    let mut sent = 0u32;
                    while sent < 30 {
                        let id = ((handle.slot() as u32) << 16) | sent;
                        let outgoing = frame(handle.channel(), id, &[sent as u8]);
                        match registry.transmit(&handle, &outgoing).unwrap() {
                            TxOutcome::Started { .. } => sent += 1,
                            TxOutcome::Dropped => {}
                        }
                        attached.write_wakeup().unwrap();
                    }
                })
            })
            .collect();
        for sender in senders {
            sender.join().expect("sender thread should complete");
        }

        for (transport, attached) in &links {
            attached.link().unwrap().flush().unwrap();
            let written = transport.written();
            assert_eq!(written.len(), 60 * 17);

            let mut next = [0u32; 2];
            for chunk in written.chunks(17) {
                let mut wire: emuccan_frame::WireFrame = chunk.try_into().unwrap();
                wire[0] = RECV_MARKER;
                wire[14] = wire[14].wrapping_add(RECV_MARKER.wrapping_sub(0xE0));
                let decoded = decode(&wire).unwrap();
                let index = decoded.channel().index();
                assert_eq!(decoded.id() & 0xFFFF, next[index]);
                next[index] += 1;
            }
            assert_eq!(next, [30, 30]);
        }
    }
}
