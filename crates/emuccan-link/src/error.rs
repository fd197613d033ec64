use emuccan_frame::{Channel, FrameError};
use emuccan_transport::TransportError;

/// Errors that can occur in link and registry operations.
#[derive(Debug, thiserror::Error)]
pub enum LinkError {
    /// Transport-level error other than a hangup.
    #[error("transport error: {0}")]
    Transport(TransportError),

    /// Frame-level error.
    #[error("frame error: {0}")]
    Frame(#[from] FrameError),

    /// Invalid tuning value.
    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),

    /// The transport was hung up or detached.
    #[error("transport has gone away")]
    TransportGone,

    /// The channel is not open.
    #[error("channel {0} is down")]
    ChannelDown(Channel),

    /// Every registry slot is taken.
    #[error("no free channel slots (limit {max})")]
    NoFreeSlots { max: usize },

    /// The link behind a handle has already been released.
    #[error("link has been released")]
    LinkGone,

    /// No channel with that name is registered.
    #[error("unknown channel {0:?}")]
    UnknownChannel(String),

    /// The transport already backs a registered link.
    #[error("transport is already attached")]
    AlreadyAttached,

    /// The transport stopped accepting bytes while draining a frame.
    #[error("transmit drain stalled with {remaining} bytes pending")]
    FlushStalled { remaining: usize },
}

impl From<TransportError> for LinkError {
    fn from(err: TransportError) -> Self {
        match err {
            TransportError::Closed => LinkError::TransportGone,
            other => LinkError::Transport(other),
        }
    }
}

/// Rejected tuning input. Nothing is changed when one of these is returned.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ConfigError {
    /// Not a number.
    #[error("malformed value {0:?}")]
    Malformed(String),

    /// A number above the accepted maximum.
    #[error("value {value} out of range (max {max})")]
    OutOfRange { value: u64, max: u64 },

    /// Not one of the adapter's bitrate selector codes.
    #[error("unknown bitrate {0:?}")]
    UnknownBitrate(String),
}

pub type Result<T> = std::result::Result<T, LinkError>;
