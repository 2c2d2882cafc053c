//! # packet-protocol
//!
//! Packet codec, connection layer and capture replay for a legacy online-game
//! protocol spoken by several client generations ("dialects").
//!
//! ## Layers
//! - [`core`]: frame header, the [`PacketCodec`] and the serialized debug formats
//! - [`protocol`]: dialects, per-dialect layout tables, the packet model and the key exchange
//! - [`transport`]: nonblocking sockets, framing and encryption
//! - [`capture`]: reading and writing recorded sessions
//! - [`config`]: TOML/env configuration
//!
//! ## Example
//! ```ignore
//! use packet_protocol::{PacketCodec, PacketDialect};
//!
//! let mut codec = PacketCodec::new(PacketDialect::Classic);
//! let model = codec.decode_raw(&[0x08, 0, 0, 0, 0x03, 0x04, 0, 0])?;
//! let json = codec.encode_serialized(&model)?; // {"LoadingScreenTransition":{}}
//! ```
//!
//! ## Error Model
//! Stateful components keep the message of their last failure, readable via
//! `last_error()`. Socket operations report [`SocketResult`] so that a
//! nonblocking would-block is a status rather than an error.

#![deny(clippy::unwrap_used, clippy::expect_used)]

pub mod capture;
pub mod config;
pub mod core;
pub mod error;
pub mod protocol;
pub mod transport;
pub mod utils;

pub use crate::capture::{CaptureReader, CaptureRecord, CaptureWriter, Direction, OutputType, ReadStatus};
pub use crate::config::ProtocolConfig;
pub use crate::core::codec::PacketCodec;
pub use crate::core::serialization::SerializedFormat;
pub use crate::error::{ErrorKind, ProtocolError, Result};
pub use crate::protocol::dialect::PacketDialect;
pub use crate::protocol::message::{Packet, PacketModel};
pub use crate::transport::async_conn::AsyncConnection;
pub use crate::transport::{Connection, ConnectionManager, SocketHandle, SocketResult};
pub use crate::utils::crypto::{CipherSuite, SessionCipher};
