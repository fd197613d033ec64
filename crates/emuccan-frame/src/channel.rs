//! Logical CAN channels multiplexed on one serial link.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::FrameError;

/// One of the two CAN buses behind a serial adapter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Channel {
    Can1 = 0,
    Can2 = 1,
}

impl Channel {
    /// Both channels, in index order.
    pub const ALL: [Channel; 2] = [Channel::Can1, Channel::Can2];

    /// Zero-based index (0 or 1).
    pub fn index(self) -> usize {
        self as usize
    }

    /// The sibling channel on the same link.
    pub fn other(self) -> Channel {
        match self {
            Channel::Can1 => Channel::Can2,
            Channel::Can2 => Channel::Can1,
        }
    }

    /// Channel for a zero-based index.
    pub fn from_index(index: usize) -> Option<Channel> {
        match index {
            0 => Some(Channel::Can1),
            1 => Some(Channel::Can2),
            _ => None,
        }
    }
}

/// Decoded control-byte channel index; only 0 and 1 are real channels.
impl TryFrom<i8> for Channel {
    type Error = FrameError;

    fn try_from(index: i8) -> Result<Self, Self::Error> {
        usize::try_from(index)
            .ok()
            .and_then(Channel::from_index)
            .ok_or(FrameError::BadChannel(index))
    }
}

impl fmt::Display for Channel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Channel::Can1 => f.write_str("CAN1"),
            Channel::Can2 => f.write_str("CAN2"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn index_and_other() {
        assert_eq!(Channel::Can1.index(), 0);
        assert_eq!(Channel::Can2.index(), 1);
        assert_eq!(Channel::Can1.other(), Channel::Can2);
        assert_eq!(Channel::Can2.other(), Channel::Can1);
    }

    #[test]
    fn negative_index_is_rejected() {
        assert_eq!(Channel::try_from(-1), Err(FrameError::BadChannel(-1)));
        assert_eq!(Channel::try_from(2), Err(FrameError::BadChannel(2)));
        assert_eq!(Channel::try_from(1), Ok(Channel::Can2));
    }
}
