//! # Error Types
//!
//! Error handling for the packet codec, the connection layer and capture files.
//!
//! Every fallible operation returns [`Result`]. Stateful components additionally
//! keep the rendered message of their last failure (see [`ErrorSlot`]) so callers
//! polling a status enum can still retrieve a human-readable reason.
//!
//! ## Error Categories
//! - **Codec Errors**: malformed frames, tags unknown to a dialect, bad serialized input
//! - **I/O Errors**: socket and file failures (`WouldBlock` is a status, not a failure)
//! - **Capture Errors**: corrupt or truncated capture records
//! - **Cryptographic Errors**: key loading, key exchange and frame encryption failures
//!
//! ## Example Usage
//! ```rust
//! use packet_protocol::error::{ErrorKind, ProtocolError, Result};
//!
//! fn check_length(declared: usize, actual: usize) -> Result<()> {
//!     if declared != actual {
//!         return Err(ProtocolError::LengthMismatch { declared, actual });
//!     }
//!     Ok(())
//! }
//!
//! let err = check_length(8, 12).unwrap_err();
//! assert_eq!(err.kind(), ErrorKind::Decode);
//! ```

use crate::protocol::dialect::PacketDialect;
use std::io;
use thiserror::Error;

/// Error message constants to reduce allocations in error paths.
pub mod constants {
    /// Codec errors
    pub const ERR_SHORT_HEADER: &str = "Frame is shorter than its header";
    pub const ERR_TRAILING_BYTES: &str = "Trailing bytes after packet body";
    pub const ERR_STRING_TOO_LONG: &str = "String exceeds the encodable length";
    pub const ERR_RAW_NOT_FRAMED: &str = "Raw dialect packets carry no tag";

    /// Connection errors
    pub const ERR_NO_STREAM: &str = "No stream is attached";
    pub const ERR_NO_LISTENER: &str = "No listener is attached";
    pub const ERR_WRITE_ZERO: &str = "Socket accepted zero bytes";

    /// Cryptographic errors
    pub const ERR_SHORT_ENVELOPE: &str = "Encrypted frame is shorter than its nonce and tag";
    pub const ERR_EMPTY_SECRET: &str = "Key exchange carried an empty secret";

    /// Capture errors
    pub const ERR_BAD_MAGIC: &str = "Not a capture file (bad magic)";
    pub const ERR_TRUNCATED_RECORD: &str = "Capture record is truncated";
    pub const ERR_READER_FAILED: &str = "Capture reader already failed";
    pub const ERR_WRITER_FINISHED: &str = "Capture writer is already finished";
}

/// Coarse error classification shared by every component.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Binary frame could not be decoded
    Decode,
    /// Packet could not be encoded
    Encode,
    /// Serialized input named a tag that does not exist
    UnknownVariant,
    /// Nonblocking operation would block; a status, not a failure
    WouldBlock,
    /// Permanent socket or file failure
    Io,
    /// Corrupt capture record
    Format,
    /// Unsupported configuration or serialized format
    Config,
    /// Key exchange or frame encryption failure
    Crypto,
}

// ProtocolError is the primary error type for all packet operations
#[derive(Error, Debug)]
pub enum ProtocolError {
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("Decode error: {0}")]
    DecodeError(String),

    #[error("Encode error: {0}")]
    EncodeError(String),

    #[error("Frame length mismatch: header declares {declared} bytes, buffer holds {actual}")]
    LengthMismatch { declared: usize, actual: usize },

    #[error("Insufficient data for {context}: need {needed} bytes, have {available}")]
    InsufficientData {
        context: &'static str,
        needed: usize,
        available: usize,
    },

    #[error("Unknown packet 0x{category:02X}/0x{subtype:02X} for dialect {dialect}")]
    UnknownPacket {
        category: u8,
        subtype: u8,
        dialect: PacketDialect,
    },

    #[error("Packet {tag} is not defined for dialect {dialect}")]
    InvalidForDialect {
        tag: &'static str,
        dialect: PacketDialect,
    },

    #[error("Packet was parsed as {packet} but the codec expects {expected}")]
    DialectMismatch {
        packet: PacketDialect,
        expected: PacketDialect,
    },

    #[error("Unknown variant: {0}")]
    UnknownVariant(String),

    #[error("Serialize error: {0}")]
    SerializeError(String),

    #[error("Deserialize error: {0}")]
    DeserializeError(String),

    #[error("Connection closed")]
    ConnectionClosed,

    #[error("Capture format error: {0}")]
    FormatError(String),

    #[error("Unsupported capture version: {0}")]
    UnsupportedVersion(u8),

    #[error("Invalid dialect id: {0}")]
    InvalidDialect(u8),

    #[error("Attempted to write a corrupted packet")]
    CorruptedPacket,

    #[error("Decryption failed")]
    DecryptionFailure,

    #[error("Encryption failed")]
    EncryptionFailure,

    #[error("Handshake failed: {0}")]
    HandshakeError(String),

    #[error("Key error: {0}")]
    KeyError(String),

    #[error("Configuration error: {0}")]
    ConfigError(String),
}

impl ProtocolError {
    /// Classify this error.
    pub fn kind(&self) -> ErrorKind {
        match self {
            ProtocolError::Io(e) if e.kind() == io::ErrorKind::WouldBlock => ErrorKind::WouldBlock,
            ProtocolError::Io(_) | ProtocolError::ConnectionClosed => ErrorKind::Io,
            ProtocolError::DecodeError(_)
            | ProtocolError::LengthMismatch { .. }
            | ProtocolError::InsufficientData { .. }
            | ProtocolError::UnknownPacket { .. }
            | ProtocolError::DeserializeError(_) => ErrorKind::Decode,
            ProtocolError::EncodeError(_)
            | ProtocolError::InvalidForDialect { .. }
            | ProtocolError::DialectMismatch { .. }
            | ProtocolError::SerializeError(_) => ErrorKind::Encode,
            ProtocolError::UnknownVariant(_) => ErrorKind::UnknownVariant,
            ProtocolError::FormatError(_)
            | ProtocolError::UnsupportedVersion(_)
            | ProtocolError::InvalidDialect(_)
            | ProtocolError::CorruptedPacket => ErrorKind::Format,
            ProtocolError::DecryptionFailure
            | ProtocolError::EncryptionFailure
            | ProtocolError::HandshakeError(_)
            | ProtocolError::KeyError(_) => ErrorKind::Crypto,
            ProtocolError::ConfigError(_) => ErrorKind::Config,
        }
    }

    /// Whether this error only reports that a nonblocking call has to be retried.
    pub fn is_would_block(&self) -> bool {
        self.kind() == ErrorKind::WouldBlock
    }
}

/// Type alias for Results using ProtocolError
pub type Result<T> = std::result::Result<T, ProtocolError>;

/// Last-error slot held by every stateful component.
///
/// Each public call clears the slot before doing any work and fills it when the
/// call fails, so the slot always describes the most recent call only.
#[derive(Debug, Default, Clone)]
pub struct ErrorSlot(Option<String>);

impl ErrorSlot {
    /// Forget the previous error.
    pub fn clear(&mut self) {
        self.0 = None;
    }

    /// Store the message of `err`.
    pub fn set(&mut self, err: &ProtocolError) {
        self.0 = Some(err.to_string());
    }

    /// Store an arbitrary message.
    pub fn set_message(&mut self, msg: impl Into<String>) {
        self.0 = Some(msg.into());
    }

    /// Clear the slot, then record the outcome of `result`.
    pub fn record<T>(&mut self, result: Result<T>) -> Result<T> {
        self.clear();
        if let Err(e) = &result {
            self.set(e);
        }
        result
    }

    pub fn get(&self) -> Option<&str> {
        self.0.as_deref()
    }
}
