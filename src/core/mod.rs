//! # Core Protocol Components
//!
//! Framing, the packet codec, and the serialized debug formats.
//!
//! ## Components
//! - **Packet**: frame header plus bounds-checked body readers and writers
//! - **Codec**: dialect-aware raw/structured/serialized conversion
//! - **Serialization**: JSON and MessagePack encodings of a packet
//!
//! ## Wire Format
//! ```text
//! [Length(4, LE)] [Category(1)] [Subtype(1)] [Reserved(2)] [Body(N)]
//! ```
//!
//! The length covers the header. The Raw dialect carries opaque bytes with
//! no header at all.

pub mod codec;
pub mod packet;
pub mod serialization;
