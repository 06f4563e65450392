use std::io::{IsTerminal, Write};
use std::time::{SystemTime, UNIX_EPOCH};

use clap::ValueEnum;
use comfy_table::{presets::UTF8_FULL, ContentArrangement, Table};
use labcomm_frame::{crc16, Frame, CRC_SIZE};
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
            Self::Table
        } else {
            Self::Json
        }
    }
}

#[derive(Serialize)]
struct EventOutput<'a> {
    topic: &'a str,
    payload_size: usize,
    payload: String,
    payload_hex: String,
    timestamp: String,
}

/// Print one event received from a channel's sink.
pub fn print_event(topic: &str, payload: &[u8], format: OutputFormat) {
    match format {
        OutputFormat::Json => {
            let out = EventOutput {
                topic,
                payload_size: payload.len(),
                payload: payload_preview(payload),
                payload_hex: hex_bytes(payload),
                timestamp: now_unix_seconds(),
            };
            print_json(&out);
        }
        OutputFormat::Table => {
            let mut table = Table::new();
            table
                .load_preset(UTF8_FULL)
                .set_content_arrangement(ContentArrangement::Dynamic)
                .set_header(vec!["TOPIC", "SIZE", "PAYLOAD"])
                .add_row(vec![
                    topic.to_string(),
                    payload.len().to_string(),
                    payload_preview(payload),
                ]);
            println!("{table}");
        }
        OutputFormat::Pretty => {
            println!(
                "topic={} size={} payload={}",
                topic,
                payload.len(),
                payload_preview(payload)
            );
        }
        OutputFormat::Raw => print_raw(payload),
    }
}

#[derive(Serialize)]
struct FrameOutput<'a> {
    channel: &'a str,
    topic: String,
    tag: Option<String>,
    payload_size: usize,
    payload_hex: String,
    timestamp: String,
}

/// Print one decoded serial frame.
pub fn print_frame(channel: &str, frame: &Frame, format: OutputFormat) {
    let tag = frame.tag().map(|tag| format!("0x{tag:02X}"));
    match format {
        OutputFormat::Json => {
            let out = FrameOutput {
                channel,
                topic: frame.topic(channel),
                tag,
                payload_size: frame.payload.len(),
                payload_hex: hex_bytes(&frame.payload),
                timestamp: now_unix_seconds(),
            };
            print_json(&out);
        }
        OutputFormat::Table => {
            let mut table = Table::new();
            table
                .load_preset(UTF8_FULL)
                .set_content_arrangement(ContentArrangement::Dynamic)
                .set_header(vec!["CHANNEL", "TAG", "SIZE", "PAYLOAD"])
                .add_row(vec![
                    channel.to_string(),
                    tag.unwrap_or_else(|| "-".to_string()),
                    frame.payload.len().to_string(),
                    hex_bytes(&frame.payload),
                ]);
            println!("{table}");
        }
        OutputFormat::Pretty => {
            println!(
                "channel={} tag={} size={} payload={}",
                channel,
                tag.as_deref().unwrap_or("-"),
                frame.payload.len(),
                hex_bytes(&frame.payload)
            );
        }
        OutputFormat::Raw => print_raw(&frame.payload),
    }
}

/// Checksum and wire encoding of a payload.
#[derive(Debug, Serialize)]
pub struct CrcReport {
    pub input_size: usize,
    /// CRC16 of the input bytes alone.
    pub crc: String,
    /// CRC16 carried by the frame, over header, length and payload.
    pub frame_crc: Option<String>,
    /// `None` when the payload exceeds one frame.
    pub frame: Option<String>,
}

impl CrcReport {
    pub fn new(payload: &[u8], wire: Option<&[u8]>) -> Self {
        let frame_crc = wire
            .and_then(|wire| wire.len().checked_sub(CRC_SIZE).map(|end| &wire[end..]))
            .map(|crc| format!("0x{}", hex::encode_upper(crc)));
        Self {
            input_size: payload.len(),
            crc: format!("0x{:04X}", crc16(payload)),
            frame_crc,
            frame: wire.map(hex_bytes),
        }
    }
}

pub fn print_crc(report: &CrcReport, wire: Option<&[u8]>, format: OutputFormat) {
    let frame = report.frame.as_deref().unwrap_or("-");
    let frame_crc = report.frame_crc.as_deref().unwrap_or("-");
    match format {
        OutputFormat::Json => print_json(report),
        OutputFormat::Table => {
            let mut table = Table::new();
            table
                .load_preset(UTF8_FULL)
                .set_content_arrangement(ContentArrangement::Dynamic)
                .set_header(vec!["SIZE", "CRC16", "FRAME CRC16", "FRAME"])
                .add_row(vec![
                    report.input_size.to_string(),
                    report.crc.clone(),
                    frame_crc.to_string(),
                    frame.to_string(),
                ]);
            println!("{table}");
        }
        OutputFormat::Pretty => {
            println!(
                "size={} crc={} frame_crc={} frame={}",
                report.input_size, report.crc, frame_crc, frame
            );
        }
        OutputFormat::Raw => {
            if let Some(wire) = wire {
                print_raw(wire);
            }
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

/// Upper-case hex with a space between bytes, e.g. `59 49 00 00 00`.
fn hex_bytes(data: &[u8]) -> String {
    data.iter()
        .map(|byte| hex::encode_upper([*byte]))
        .collect::<Vec<_>>()
        .join(" ")
}

fn payload_preview(payload: &[u8]) -> String {
    match std::str::from_utf8(payload) {
        Ok(text) if !text.chars().any(|c| c.is_control() && c != '\n' && c != '\r') => {
            text.to_string()
        }
        _ => format!("<binary {} bytes: {}>", payload.len(), hex_bytes(payload)),
    }
}

fn now_unix_seconds() -> String {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs().to_string())
        .unwrap_or_else(|_| "0".to_string())
}
