use std::path::PathBuf;

use clap::{Args, Subcommand};
use emuccan_frame::{Channel, IdType, LogicalFrame, MAX_DLC};
use emuccan_link::{Bitrate, PacingDelay};

use crate::exit::CliResult;
use crate::output::{parse_hex, OutputFormat};

pub mod ack;
pub mod attach;
pub mod decode;
pub mod encode;
pub mod handshake;
pub mod version;

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Encode one CAN frame into its 17-byte wire form.
    Encode(EncodeArgs),
    /// Decode a 17-byte frame received from the adapter.
    Decode(DecodeArgs),
    /// Print the channel activation command.
    Handshake(HandshakeArgs),
    /// Check an activation acknowledgement.
    Ack(AckArgs),
    /// Attach a serial adapter, print received frames and optionally send some.
    Attach(AttachArgs),
    /// Show version information.
    Version(VersionArgs),
}

pub fn run(command: Command, format: OutputFormat) -> CliResult<i32> {
    match command {
        Command::Encode(args) => encode::run(args, format),
        Command::Decode(args) => decode::run(args, format),
        Command::Handshake(args) => handshake::run(args, format),
        Command::Ack(args) => ack::run(args, format),
        Command::Attach(args) => attach::run(args, format),
        Command::Version(args) => version::run(args),
    }
}

#[derive(Args, Debug)]
pub struct EncodeArgs {
    /// Bus to send on (1, 2, can1, can2).
    #[arg(long, short = 'c', default_value = "1", value_parser = parse_channel)]
    pub channel: Channel,
    /// Identifier in hex.
    #[arg(long, value_parser = parse_hex_u32)]
    pub id: u32,
    /// Use a 29-bit identifier.
    #[arg(long)]
    pub extended: bool,
    /// Send a remote transmission request.
    #[arg(long, conflicts_with = "data")]
    pub rtr: bool,
    /// Requested length for a remote frame.
    #[arg(long, requires = "rtr", default_value = "0")]
    pub dlc: u8,
    /// Payload bytes in hex (up to 8).
    #[arg(long, default_value = "")]
    pub data: String,
}

#[derive(Args, Debug)]
pub struct DecodeArgs {
    /// 17 bytes in hex, separators allowed.
    pub hex: String,
}

#[derive(Args, Debug)]
pub struct HandshakeArgs {
    /// Build the deactivation command instead.
    #[arg(long)]
    pub inactive: bool,
}

#[derive(Args, Debug)]
pub struct AckArgs {
    /// 5 bytes in hex, separators allowed.
    pub hex: String,
}

#[derive(Args, Debug)]
pub struct AttachArgs {
    /// Serial device (e.g. /dev/ttyACM0 or ttyACM0).
    pub device: PathBuf,
    /// Frame to transmit once channels are up, as CH:ID#DATA (repeatable).
    #[arg(long, value_name = "CH:ID#DATA", value_parser = parse_frame_arg)]
    pub send: Vec<LogicalFrame>,
    /// Exit after receiving N frames.
    #[arg(long)]
    pub count: Option<usize>,
    /// Exit once everything queued with --send is on the wire.
    #[arg(long)]
    pub send_only: bool,
    /// Transmit pacing delay in microseconds (0-1000).
    #[arg(
        long,
        env = "EMUCCAN_PACING_DELAY",
        conflicts_with = "bitrate",
        value_parser = parse_pacing_delay
    )]
    pub pacing_delay: Option<PacingDelay>,
    /// Bus bitrate; picks the matching pacing delay (code 4-A or e.g. 500k).
    #[arg(long, env = "EMUCCAN_BITRATE", value_parser = parse_bitrate)]
    pub bitrate: Option<Bitrate>,
    /// Print channel statistics before exiting.
    #[arg(long)]
    pub stats: bool,
}

#[derive(Args, Debug)]
pub struct VersionArgs {
    /// Show extended build provenance.
    #[arg(long)]
    pub extended: bool,
}

pub fn parse_channel(input: &str) -> Result<Channel, String> {
    match input.trim().to_ascii_lowercase().as_str() {
        "1" | "can1" => Ok(Channel::Can1),
        "2" | "can2" => Ok(Channel::Can2),
        other => Err(format!("unknown channel {other:?} (expected 1 or 2)")),
    }
}

pub fn parse_hex_u32(input: &str) -> Result<u32, String> {
    let trimmed = input.trim();
    let digits = trimmed
        .strip_prefix("0x")
        .or_else(|| trimmed.strip_prefix("0X"))
        .unwrap_or(trimmed);
    u32::from_str_radix(digits, 16).map_err(|err| format!("invalid hex identifier {input:?}: {err}"))
}

fn parse_pacing_delay(input: &str) -> Result<PacingDelay, String> {
    input.parse().map_err(|err| format!("{err}"))
}

fn parse_bitrate(input: &str) -> Result<Bitrate, String> {
    input.parse().map_err(|err| format!("{err}"))
}

/// `CH:ID#DATA`, `CH:ID#R` or `CH:ID#R<dlc>`.
///
/// Identifiers written with more than three hex digits are extended, as with
/// `cansend`.
pub fn parse_frame_arg(input: &str) -> Result<LogicalFrame, String> {
    let (channel, rest) = input
        .split_once(':')
        .ok_or_else(|| format!("missing channel in {input:?} (expected CH:ID#DATA)"))?;
    let (id, body) = rest
        .split_once('#')
        .ok_or_else(|| format!("missing '#' in {input:?} (expected CH:ID#DATA)"))?;

    let channel = parse_channel(channel)?;
    let id_type = if id.trim().len() > 3 {
        IdType::Extended
    } else {
        IdType::Standard
    };
    let id = parse_hex_u32(id)?;

    let frame = match body.strip_prefix(['R', 'r']) {
        Some(dlc) => {
            let dlc = if dlc.is_empty() {
                0
            } else {
                dlc.parse::<u8>()
                    .map_err(|_| format!("invalid remote length in {input:?}"))?
            };
            LogicalFrame::remote(channel, id_type, id, dlc)
        }
        None => {
            let data = parse_hex(body)?;
            if data.len() > MAX_DLC {
                return Err(format!("{} data bytes in {input:?} (max {MAX_DLC})", data.len()));
            }
            LogicalFrame::new(channel, id_type, id, &data)
        }
    };
    frame.map_err(|err| err.to_string())
}
