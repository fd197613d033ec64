//! Tuning knobs for links and the registry.

use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

/// Default number of channel slots in a registry.
pub const DEFAULT_MAX_CHANNELS: usize = 10;

/// Smallest slot table a registry will accept.
pub const MIN_MAX_CHANNELS: usize = 4;

/// Default channel name prefix (`emuccan0`, `emuccan1`, ...).
pub const DEFAULT_NAME_PREFIX: &str = "emuccan";

/// Fixed stall before each transmit, in microseconds (0..=1000).
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "u32", into = "u32")]
pub struct PacingDelay(u16);

impl PacingDelay {
    pub const MAX_MICROS: u16 = 1000;
    pub const ZERO: PacingDelay = PacingDelay(0);

    pub fn from_micros(micros: u16) -> Result<Self, ConfigError> {
        if micros > Self::MAX_MICROS {
            return Err(ConfigError::OutOfRange {
                value: u64::from(micros),
                max: u64::from(Self::MAX_MICROS),
            });
        }
        Ok(Self(micros))
    }

    pub fn as_micros(self) -> u16 {
        self.0
    }

    pub fn as_duration(self) -> Duration {
        Duration::from_micros(u64::from(self.0))
    }

    pub fn is_zero(self) -> bool {
        self.0 == 0
    }
}

impl TryFrom<u32> for PacingDelay {
    type Error = ConfigError;

    fn try_from(micros: u32) -> Result<Self, Self::Error> {
        match u16::try_from(micros) {
            Ok(micros) => Self::from_micros(micros),
            Err(_) => Err(ConfigError::OutOfRange {
                value: u64::from(micros),
                max: u64::from(Self::MAX_MICROS),
            }),
        }
    }
}

impl From<PacingDelay> for u32 {
    fn from(delay: PacingDelay) -> Self {
        u32::from(delay.0)
    }
}

impl FromStr for PacingDelay {
    type Err = ConfigError;

    /// Decimal microseconds, surrounding whitespace ignored.
    fn from_str(input: &str) -> Result<Self, Self::Err> {
        let trimmed = input.trim();
        let value: u64 = trimmed
            .parse()
            .map_err(|_| ConfigError::Malformed(input.to_string()))?;
        if value > u64::from(Self::MAX_MICROS) {
            return Err(ConfigError::OutOfRange {
                value,
                max: u64::from(Self::MAX_MICROS),
            });
        }
        Self::from_micros(value as u16)
    }
}

impl fmt::Display for PacingDelay {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}us", self.0)
    }
}

/// Bus bitrate selector understood by the adapter firmware.
///
/// The numeric codes are the adapter's own (single hex digit, 4 through A).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Bitrate {
    #[serde(rename = "100k")]
    Rate100K,
    #[serde(rename = "125k")]
    Rate125K,
    #[serde(rename = "250k")]
    Rate250K,
    #[serde(rename = "500k")]
    Rate500K,
    #[serde(rename = "800k")]
    Rate800K,
    #[serde(rename = "1m")]
    Rate1M,
    #[serde(rename = "400k")]
    Rate400K,
}

impl Bitrate {
    pub const ALL: [Bitrate; 7] = [
        Bitrate::Rate100K,
        Bitrate::Rate125K,
        Bitrate::Rate250K,
        Bitrate::Rate500K,
        Bitrate::Rate800K,
        Bitrate::Rate1M,
        Bitrate::Rate400K,
    ];

    pub fn from_code(code: u8) -> Option<Self> {
        match code {
            4 => Some(Bitrate::Rate100K),
            5 => Some(Bitrate::Rate125K),
            6 => Some(Bitrate::Rate250K),
            7 => Some(Bitrate::Rate500K),
            8 => Some(Bitrate::Rate800K),
            9 => Some(Bitrate::Rate1M),
            10 => Some(Bitrate::Rate400K),
            _ => None,
        }
    }

    pub fn code(self) -> u8 {
        match self {
            Bitrate::Rate100K => 4,
            Bitrate::Rate125K => 5,
            Bitrate::Rate250K => 6,
            Bitrate::Rate500K => 7,
            Bitrate::Rate800K => 8,
            Bitrate::Rate1M => 9,
            Bitrate::Rate400K => 10,
        }
    }

    pub fn bits_per_second(self) -> u32 {
        match self {
            Bitrate::Rate100K => 100_000,
            Bitrate::Rate125K => 125_000,
            Bitrate::Rate250K => 250_000,
            Bitrate::Rate500K => 500_000,
            Bitrate::Rate800K => 800_000,
            Bitrate::Rate1M => 1_000_000,
            Bitrate::Rate400K => 400_000,
        }
    }

    /// Pacing delay that keeps the adapter's transmit FIFO from overrunning
    /// at this bus speed.
    pub fn recommended_delay(self) -> PacingDelay {
        let micros = match self {
            Bitrate::Rate100K => 500,
            Bitrate::Rate125K => 400,
            Bitrate::Rate250K => 300,
            Bitrate::Rate500K => 200,
            Bitrate::Rate800K => 150,
            Bitrate::Rate1M => 100,
            Bitrate::Rate400K => 250,
        };
        PacingDelay(micros)
    }
}

impl FromStr for Bitrate {
    type Err = ConfigError;

    /// Accepts a selector code (`7`, `A`) or a rate (`500k`, `1M`).
    fn from_str(input: &str) -> Result<Self, Self::Err> {
        let trimmed = input.trim();
        let unknown = || ConfigError::UnknownBitrate(input.to_string());

        if trimmed.len() == 1 {
            let code = u8::from_str_radix(trimmed, 16).map_err(|_| unknown())?;
            return Bitrate::from_code(code).ok_or_else(unknown);
        }

        Bitrate::ALL
            .into_iter()
            .find(|rate| rate.to_string().eq_ignore_ascii_case(trimmed))
            .ok_or_else(unknown)
    }
}

impl fmt::Display for Bitrate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Bitrate::Rate100K => "100K",
            Bitrate::Rate125K => "125K",
            Bitrate::Rate250K => "250K",
            Bitrate::Rate500K => "500K",
            Bitrate::Rate800K => "800K",
            Bitrate::Rate1M => "1M",
            Bitrate::Rate400K => "400K",
        };
        f.write_str(label)
    }
}

/// Registry configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RegistryConfig {
    /// Channel slots available; each attached link takes two.
    pub max_channels: usize,
    /// Prefix for generated channel names.
    pub name_prefix: String,
    /// Stall applied before every transmit start.
    pub pacing_delay: PacingDelay,
}

impl RegistryConfig {
    /// Slot count actually used, never below [`MIN_MAX_CHANNELS`].
    pub fn effective_max_channels(&self) -> usize {
        self.max_channels.max(MIN_MAX_CHANNELS)
    }
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            max_channels: DEFAULT_MAX_CHANNELS,
            name_prefix: DEFAULT_NAME_PREFIX.to_string(),
            pacing_delay: PacingDelay::ZERO,
        }
    }
}
