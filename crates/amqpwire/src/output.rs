use std::io::{IsTerminal, Write};
use std::net::SocketAddr;
use std::time::{SystemTime, UNIX_EPOCH};

use amqpwire_frame::channel::channel_name;
use amqpwire_frame::{Frame, FrameType};
use amqpwire_session::MethodId;
use clap::ValueEnum;
use comfy_table::{presets::UTF8_FULL, ContentArrangement, Table};
use serde::Serialize;

const PREVIEW_BYTES: usize = 32;

#[derive(Clone, Debug, Copy, PartialEq, Eq, ValueEnum)]
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
struct FrameOutput<'a> {
    frame_type: &'static str,
    channel: u16,
    channel_name: &'static str,
    payload_size: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    method: Option<MethodId>,
    payload_hex: String,
    peer: &'a str,
    timestamp: String,
}

impl<'a> FrameOutput<'a> {
    fn new(frame: &Frame, peer: &'a str) -> Self {
        Self {
            frame_type: frame.frame_type.name(),
            channel: frame.channel,
            channel_name: channel_name(frame.channel),
            payload_size: frame.payload.len(),
            method: method_of(frame),
            payload_hex: hex_preview(&frame.payload),
            peer,
            timestamp: now_unix_seconds(),
        }
    }
}

pub fn print_frame(frame: &Frame, peer: SocketAddr, format: OutputFormat) {
    let peer = peer.to_string();
    let out = FrameOutput::new(frame, &peer);

    match format {
        OutputFormat::Json => {
            println!(
                "{}",
                serde_json::to_string(&out).unwrap_or_else(|_| "{}".to_string())
            );
        }
        OutputFormat::Table => {
            let mut table = Table::new();
            table
                .load_preset(UTF8_FULL)
                .set_content_arrangement(ContentArrangement::Dynamic)
                .set_header(vec!["TYPE", "CHANNEL", "METHOD", "SIZE", "PEER", "PAYLOAD"])
                .add_row(vec![
                    out.frame_type.to_string(),
                    format!("{} ({})", out.channel, out.channel_name),
                    out.method.map(|m| m.to_string()).unwrap_or_default(),
                    out.payload_size.to_string(),
                    peer.clone(),
                    out.payload_hex.clone(),
                ]);
            println!("{table}");
        }
        OutputFormat::Pretty => {
            let method = out
                .method
                .map(|m| format!(" method={m}"))
                .unwrap_or_default();
            println!(
                "type={} channel={} ({}){} size={} peer={} payload={}",
                out.frame_type,
                out.channel,
                out.channel_name,
                method,
                out.payload_size,
                peer,
                out.payload_hex
            );
        }
        OutputFormat::Raw => {
            print_raw(&frame.payload);
        }
    }
}

pub fn print_raw(data: &[u8]) {
    let mut out = std::io::stdout();
    let _ = out.write_all(data);
    let _ = out.flush();
}

fn method_of(frame: &Frame) -> Option<MethodId> {
    if frame.frame_type == FrameType::Method {
        MethodId::from_payload(&frame.payload)
    } else {
        None
    }
}

fn hex_preview(payload: &[u8]) -> String {
    let shown = &payload[..payload.len().min(PREVIEW_BYTES)];
    let mut hex: String = shown.iter().map(|b| format!("{b:02x}")).collect();
    if payload.len() > PREVIEW_BYTES {
        hex.push_str("..");
    }
    hex
}

fn now_unix_seconds() -> String {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs().to_string())
        .unwrap_or_else(|_| "0".to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hex_preview_truncates_long_payloads() {
        assert_eq!(hex_preview(&[0x00, 0x0a, 0xff]), "000aff");
        let long = hex_preview(&[0xab; 40]);
        assert!(long.ends_with(".."));
        assert_eq!(long.len(), PREVIEW_BYTES * 2 + 2);
    }

    #[test]
    fn method_frames_report_their_id() {
        let start = Frame::method(0, &b"\x00\x0a\x00\x0a\x00\x09"[..]);
        let out = FrameOutput::new(&start, "127.0.0.1:5672");
        assert_eq!(out.method, Some(MethodId::new(10, 10)));
        assert_eq!(out.channel_name, "CONNECTION");

        let json = serde_json::to_value(&out).unwrap();
        assert_eq!(json["frame_type"], "method");
        assert_eq!(json["method"]["class_id"], 10);

        let heartbeat = FrameOutput::new(&Frame::heartbeat(), "127.0.0.1:5672");
        assert_eq!(heartbeat.method, None);
        assert!(serde_json::to_value(&heartbeat).unwrap().get("method").is_none());
    }
}
