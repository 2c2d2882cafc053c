//! # Protocol Definitions
//!
//! Dialects, per-dialect layout tables, the packet model and the key exchange.
//!
//! ## Components
//! - **Dialect**: client generations and the layout family each one uses
//! - **Layout**: (category, subtype) tables and body encoders/decoders
//! - **Message**: the [`Packet`](message::Packet) enum and its field types
//! - **Handshake**: RSA key exchange establishing a symmetric session

pub mod dialect;
pub mod handshake;
pub mod layout;
pub mod message;
