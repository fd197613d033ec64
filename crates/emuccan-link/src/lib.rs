//! Link layer for dual-channel serial CAN adapters.
//!
//! A *link* is one serial byte stream carrying two CAN channels. Each link
//! owns a single [`ReassemblyBuffer`](emuccan_frame::ReassemblyBuffer) for
//! inbound bytes and a single [`TxDrainer`] for outbound frames, shared by
//! both channels under one lock. A [`LinkRegistry`] owns the links, names
//! their channels and serializes every transmit start through one
//! [`TransmitGate`].
//!
//! # Example
//!
//! ```
//! use std::sync::Arc;
//!
//! use emuccan_frame::{Channel, IdType, LogicalFrame};
//! use emuccan_link::{FrameSink, LinkRegistry, QueueSink};
//! use emuccan_transport::MemoryTransport;
//!
//! let registry = LinkRegistry::default();
//! let transport = Arc::new(MemoryTransport::new("loop0"));
//! let (can1, _rx1) = QueueSink::new();
//! let (can2, _rx2) = QueueSink::new();
//! let sinks: [Arc<dyn FrameSink>; 2] = [can1, can2];
//!
//! let attached = registry.attach(transport.clone(), sinks)?;
//! for handle in attached.channels() {
//!     registry.open(handle)?;
//! }
//!
//! let frame = LogicalFrame::new(Channel::Can1, IdType::Standard, 0x123, &[0xAA, 0xBB])?;
//! registry.transmit(attached.channel(Channel::Can1), &frame)?;
//! attached.write_wakeup()?;
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```

pub mod config;
pub mod drainer;
pub mod error;
pub mod gate;
pub mod link;
pub mod registry;
pub mod sink;

pub use config::{
    Bitrate, PacingDelay, RegistryConfig, DEFAULT_MAX_CHANNELS, DEFAULT_NAME_PREFIX,
    MIN_MAX_CHANNELS,
};
pub use drainer::{Drain, TxDrainer};
pub use error::{ConfigError, LinkError, Result};
pub use gate::TransmitGate;
pub use link::{Activation, LinkState, SerialLink, TxOutcome, FLUSH_STALL_LIMIT};
pub use registry::{AttachedLink, ChannelHandle, ChannelStatus, LinkRegistry};
pub use sink::{ChannelStats, FrameSink, QueueSink, StatsSnapshot};
