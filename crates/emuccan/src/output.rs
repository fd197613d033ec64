use std::io::{IsTerminal, Write};
use std::time::{SystemTime, UNIX_EPOCH};

use clap::ValueEnum;
use comfy_table::{presets::UTF8_FULL, ContentArrangement, Table};
use emuccan_frame::{FrameError, LogicalFrame};
use emuccan_link::ChannelStatus;
use serde::Serialize;

#[derive(Clone, Debug, Copy, ValueEnum)]
pub enum OutputFormat {
    Json,
    Table,
    Pretty,
    Raw,
}

impl OutputFormat {
    pub fn default_for_stdout() -> Self {
        if std::io::stdout().is_terminal() {
            Self::Pretty
        } else {
            Self::Json
        }
    }
}

#[derive(Serialize)]
struct WireOutput<'a> {
    kind: &'a str,
    len: usize,
    hex: String,
}

#[derive(Serialize)]
struct FrameOutput<'a> {
    source: &'a str,
    channel: &'a str,
    id: u32,
    id_hex: String,
    extended: bool,
    rtr: bool,
    dlc: u8,
    data: String,
    timestamp: String,
}

#[derive(Serialize)]
struct AckOutput<'a> {
    accepted: bool,
    hex: String,
    error: Option<&'a str>,
}

/// Print an encoded byte sequence (wire frame or handshake command).
pub fn print_wire(kind: &str, bytes: &[u8], format: OutputFormat) {
    match format {
        OutputFormat::Json => print_json(&WireOutput {
            kind,
            len: bytes.len(),
            hex: hex(bytes),
        }),
        OutputFormat::Table => {
            let mut table = Table::new();
            table
                .load_preset(UTF8_FULL)
                .set_content_arrangement(ContentArrangement::Dynamic)
                .set_header(vec!["OFFSET", "BYTE"]);
            for (offset, byte) in bytes.iter().enumerate() {
                table.add_row(vec![offset.to_string(), format!("{byte:02X}")]);
            }
            println!("{table}");
        }
        OutputFormat::Pretty => println!("{kind}: {}", spaced_hex(bytes)),
        OutputFormat::Raw => print_raw(bytes),
    }
}

/// Print one decoded CAN frame; `source` names where it came from.
pub fn print_frame(frame: &LogicalFrame, source: &str, format: OutputFormat) {
    let channel = channel_label(frame);
    match format {
        OutputFormat::Json => print_json(&FrameOutput {
            source,
            channel,
            id: frame.id(),
            id_hex: id_hex(frame),
            extended: frame.is_extended(),
            rtr: frame.is_remote(),
            dlc: frame.dlc(),
            data: hex(frame.data()),
            timestamp: now_unix_seconds(),
        }),
        OutputFormat::Table => {
            let mut table = Table::new();
            table
                .load_preset(UTF8_FULL)
                .set_content_arrangement(ContentArrangement::Dynamic)
                .set_header(vec!["SOURCE", "CHANNEL", "ID", "FLAGS", "DLC", "DATA"])
                .add_row(vec![
                    source.to_string(),
                    channel.to_string(),
                    id_hex(frame),
                    flags(frame),
                    frame.dlc().to_string(),
                    spaced_hex(frame.data()),
                ]);
            println!("{table}");
        }
        OutputFormat::Pretty => {
            // candump-like: "  emuccan0  123   [2]  AA BB"
            let data = if frame.is_remote() {
                "remote request".to_string()
            } else {
                spaced_hex(frame.data())
            };
            println!(
                "  {source}  {:>8}   [{}]  {data}",
                id_hex(frame),
                frame.dlc()
            );
        }
        OutputFormat::Raw => print_raw(frame.data()),
    }
}

/// Print the verdict on an activation ack.
pub fn print_ack(bytes: &[u8], result: &Result<(), FrameError>, format: OutputFormat) {
    let error = result.as_ref().err().map(ToString::to_string);
    match format {
        OutputFormat::Json => print_json(&AckOutput {
            accepted: result.is_ok(),
            hex: hex(bytes),
            error: error.as_deref(),
        }),
        OutputFormat::Raw => print_raw(&[u8::from(result.is_ok())]),
        OutputFormat::Table | OutputFormat::Pretty => match error {
            None => println!("activation accepted ({})", spaced_hex(bytes)),
            Some(error) => println!("activation rejected: {error}"),
        },
    }
}

/// Print registry status rows.
pub fn print_status(status: &[ChannelStatus], format: OutputFormat) {
    match format {
        OutputFormat::Json | OutputFormat::Raw => print_json(&status),
        OutputFormat::Table | OutputFormat::Pretty => {
            let mut table = Table::new();
            table
                .load_preset(UTF8_FULL)
                .set_content_arrangement(ContentArrangement::Dynamic)
                .set_header(vec![
                    "NAME", "BUS", "TRANSPORT", "OPEN", "ACTIVATION", "RX", "TX", "ERRORS",
                    "REJECTED", "DROPPED",
                ]);
            for row in status {
                table.add_row(vec![
                    row.name.clone(),
                    row.channel.to_string(),
                    row.transport.clone(),
                    row.open.to_string(),
                    format!("{:?}", row.activation).to_lowercase(),
                    row.stats.rx_packets.to_string(),
                    row.stats.tx_packets.to_string(),
                    (row.stats.rx_errors + row.stats.rx_over_errors).to_string(),
                    row.rejected_frames.to_string(),
                    row.stats.tx_dropped.to_string(),
                ]);
            }
            println!("{table}");
        }
    }
}

pub fn print_raw(data: &[u8]) {
    let mut out = std::io::stdout();
    let _ = out.write_all(data);
    let _ = out.flush();
}

fn print_json<T: Serialize>(value: &T) {
    println!(
        "{}",
        serde_json::to_string(value).unwrap_or_else(|_| "{}".to_string())
    );
}

/// Uppercase hex without separators.
pub fn hex(bytes: &[u8]) -> String {
    bytes.iter().map(|byte| format!("{byte:02X}")).collect()
}

fn spaced_hex(bytes: &[u8]) -> String {
    bytes
        .iter()
        .map(|byte| format!("{byte:02X}"))
        .collect::<Vec<_>>()
        .join(" ")
}

/// Parse hex bytes, ignoring whitespace, `:` and `-` separators and a `0x` prefix.
pub fn parse_hex(input: &str) -> Result<Vec<u8>, String> {
    let trimmed = input.trim();
    let trimmed = trimmed
        .strip_prefix("0x")
        .or_else(|| trimmed.strip_prefix("0X"))
        .unwrap_or(trimmed);
    let digits: Vec<u8> = trimmed
        .bytes()
        .filter(|byte| !byte.is_ascii_whitespace() && *byte != b':' && *byte != b'-')
        .collect();
    if digits.len() % 2 != 0 {
        return Err(format!("odd number of hex digits in {input:?}"));
    }
    digits
        .chunks(2)
        .map(|pair| {
            std::str::from_utf8(pair)
                .ok()
                .and_then(|pair| u8::from_str_radix(pair, 16).ok())
                .ok_or_else(|| format!("invalid hex byte in {input:?}"))
        })
        .collect()
}

fn channel_label(frame: &LogicalFrame) -> &'static str {
    match frame.channel() {
        emuccan_frame::Channel::Can1 => "can1",
        emuccan_frame::Channel::Can2 => "can2",
    }
}

fn id_hex(frame: &LogicalFrame) -> String {
    if frame.is_extended() {
        format!("{:08X}", frame.id())
    } else {
        format!("{:03X}", frame.id())
    }
}

fn flags(frame: &LogicalFrame) -> String {
    match (frame.is_extended(), frame.is_remote()) {
        (false, false) => "-".to_string(),
        (true, false) => "EFF".to_string(),
        (false, true) => "RTR".to_string(),
        (true, true) => "EFF RTR".to_string(),
    }
}

fn now_unix_seconds() -> String {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs().to_string())
        .unwrap_or_else(|_| "0".to_string())
}
