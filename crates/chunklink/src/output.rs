use std::io::IsTerminal;
use std::path::Path;
use std::time::{SystemTime, UNIX_EPOCH};

use chunklink_frame::{AssembledFrame, FrameHeader, FrameReport, RelayStats};
use clap::ValueEnum;
use comfy_table::{presets::UTF8_FULL, ContentArrangement, Table};
use serde::Serialize;

#[derive(Clone, Debug, Copy, PartialEq, Eq, ValueEnum)]
pub enum OutputFormat {
    Json,
    Table,
    Pretty,
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
    kind: &'static str,
    frame_id: u32,
    chunks: u32,
    size: usize,
    path: Option<String>,
    sender: Option<&'a str>,
    timestamp: String,
}

pub fn print_frame(
    frame: &AssembledFrame,
    path: Option<&Path>,
    sender: Option<&str>,
    format: OutputFormat,
) {
    let out = FrameOutput {
        kind: "frame-received",
        frame_id: frame.frame_id,
        chunks: frame.chunks,
        size: frame.payload.len(),
        path: path.map(|p| p.display().to_string()),
        sender,
        timestamp: now_unix_seconds(),
    };
    let path = out.path.clone().unwrap_or_else(|| "-".to_string());
    emit(
        &out,
        format,
        &["FRAME", "CHUNKS", "SIZE", "SENDER", "PATH"],
        vec![
            frame.frame_id.to_string(),
            frame.chunks.to_string(),
            frame.payload.len().to_string(),
            sender.unwrap_or("-").to_string(),
            path.clone(),
        ],
        || {
            format!(
                "frame={} chunks={} size={} sender={} path={}",
                frame.frame_id,
                frame.chunks,
                frame.payload.len(),
                sender.unwrap_or("-"),
                path
            )
        },
    );
}

#[derive(Serialize)]
struct SentOutput<'a> {
    kind: &'static str,
    frame_id: u32,
    bytes: usize,
    chunks: u32,
    source: &'a str,
    timestamp: String,
}

pub fn print_sent(report: &FrameReport, source: &str, format: OutputFormat) {
    let out = SentOutput {
        kind: "frame-sent",
        frame_id: report.frame_id,
        bytes: report.bytes,
        chunks: report.chunks,
        source,
        timestamp: now_unix_seconds(),
    };
    emit(
        &out,
        format,
        &["FRAME", "BYTES", "CHUNKS", "SOURCE"],
        vec![
            report.frame_id.to_string(),
            report.bytes.to_string(),
            report.chunks.to_string(),
            source.to_string(),
        ],
        || {
            format!(
                "frame={} bytes={} chunks={} source={}",
                report.frame_id, report.bytes, report.chunks, source
            )
        },
    );
}

#[derive(Serialize)]
struct HeaderOutput {
    kind: &'static str,
    frame_id: u32,
    chunk_id: u16,
    flags: String,
    start: bool,
    end: bool,
    reserved: u8,
    payload_len: u16,
    payload_available: Option<usize>,
}

/// `available` is the number of payload bytes that followed the header, if any
/// were given.
pub fn print_header(header: &FrameHeader, available: Option<usize>, format: OutputFormat) {
    let out = HeaderOutput {
        kind: "chunk-header",
        frame_id: header.frame_id,
        chunk_id: header.chunk_id,
        flags: header.flags.to_string(),
        start: header.is_start(),
        end: header.is_end(),
        reserved: header.reserved,
        payload_len: header.payload_len,
        payload_available: available,
    };
    let available = available.map_or_else(|| "-".to_string(), |n| n.to_string());
    emit(
        &out,
        format,
        &["FRAME", "CHUNK", "FLAGS", "RESERVED", "PAYLOAD_LEN", "AVAILABLE"],
        vec![
            header.frame_id.to_string(),
            header.chunk_id.to_string(),
            header.flags.to_string(),
            header.reserved.to_string(),
            header.payload_len.to_string(),
            available.clone(),
        ],
        || {
            format!(
                "frame={} chunk={} flags={} reserved={} payload_len={} available={}",
                header.frame_id,
                header.chunk_id,
                header.flags,
                header.reserved,
                header.payload_len,
                available
            )
        },
    );
}

#[derive(Serialize)]
struct RelayOutput<'a> {
    kind: &'static str,
    listen: &'a str,
    forward: &'a str,
    #[serde(flatten)]
    stats: &'a RelayStats,
}

pub fn print_relay_summary(stats: &RelayStats, listen: &str, forward: &str, format: OutputFormat) {
    let out = RelayOutput {
        kind: "relay-summary",
        listen,
        forward,
        stats,
    };
    emit(
        &out,
        format,
        &["LISTEN", "FORWARD", "FORWARDED", "REJECTED", "CLAMPED"],
        vec![
            listen.to_string(),
            forward.to_string(),
            stats.forwarded.to_string(),
            stats.rejected.to_string(),
            stats.clamped.to_string(),
        ],
        || {
            format!(
                "listen={} forward={} forwarded={} rejected={} clamped={}",
                listen, forward, stats.forwarded, stats.rejected, stats.clamped
            )
        },
    );
}

fn emit<T: Serialize>(
    record: &T,
    format: OutputFormat,
    headers: &[&str],
    row: Vec<String>,
    pretty: impl FnOnce() -> String,
) {
    match format {
        OutputFormat::Json => {
            println!(
                "{}",
                serde_json::to_string(record).unwrap_or_else(|_| "{}".to_string())
            );
        }
        OutputFormat::Table => {
            let mut table = Table::new();
            table
                .load_preset(UTF8_FULL)
                .set_content_arrangement(ContentArrangement::Dynamic)
                .set_header(headers.to_vec())
                .add_row(row);
            println!("{table}");
        }
        OutputFormat::Pretty => println!("{}", pretty()),
    }
}

fn now_unix_seconds() -> String {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs().to_string())
        .unwrap_or_else(|_| "0".to_string())
}
