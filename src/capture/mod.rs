//! # Capture Files
//!
//! Append-only recordings of frames seen on a connection, replayable later.
//!
//! ## File Layout
//! ```text
//! "PPAC" [Version(1)] [Dialect(1), v3+] [Compressed(1), v4+] [Record]...
//!
//! Record: [Timestamp(16 LE ns, v2+ | 8 LE s, v1)] [Direction(1)] [Length(8 LE)] [Frame(N)]
//! ```
//! When the compressed flag is set everything after the header is one zstd
//! stream. Files older than version 3 are NGS captures.

pub mod reader;
pub mod writer;

pub use reader::CaptureReader;
pub use writer::CaptureWriter;

use crate::protocol::dialect::PacketDialect;
use crate::protocol::message::PacketModel;
use serde::{Deserialize, Serialize};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

/// Which way a recorded frame was travelling.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum Direction {
    #[default]
    ToServer,
    ToClient,
}

impl Direction {
    pub fn from_byte(byte: u8) -> Self {
        match byte {
            0 => Direction::ToServer,
            _ => Direction::ToClient,
        }
    }

    pub fn to_byte(self) -> u8 {
        match self {
            Direction::ToServer => 0,
            Direction::ToClient => 1,
        }
    }
}

/// What a reader materializes for each record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OutputType {
    /// Decoded packet only
    #[default]
    Packet,
    /// Recorded bytes only; never decodes
    Raw,
    /// Both the decoded packet and the recorded bytes
    Both,
}

/// Outcome of [`CaptureReader::next`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReadStatus {
    /// The record carries a decoded packet (and raw bytes with `OutputType::Both`)
    Parsed,
    /// The record carries raw bytes only
    RawOnly,
    EndOfFile,
    /// The file is damaged; the reader stays in this state
    FormatError,
}

/// One replayed frame.
#[derive(Debug, Clone, PartialEq)]
pub struct CaptureRecord {
    /// Time since the Unix epoch when the frame was recorded
    pub timestamp: Duration,
    pub direction: Direction,
    pub dialect: PacketDialect,
    pub packet: Option<PacketModel>,
    pub data: Option<Vec<u8>>,
    /// Why `packet` is missing although decoding was requested
    pub parse_error: Option<String>,
}

impl CaptureRecord {
    /// Whole seconds of the timestamp.
    pub fn seconds(&self) -> u64 {
        self.timestamp.as_secs()
    }
}

/// Current time as a capture timestamp.
pub fn now() -> Duration {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
}
