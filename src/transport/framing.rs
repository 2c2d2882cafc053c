//! Frame splitting and session sealing shared by the sync and async connections.
//!
//! ## Sealing
//! Once a session exists every frame travels sealed by the session's
//! [`SessionCipher`](crate::utils::crypto::SessionCipher), which also says
//! where in the sealed prefix the total length sits. The key exchange frame
//! itself always travels in the clear.

use crate::core::codec::PacketCodec;
use crate::core::packet::{frame_length, HEADER_LEN};
use crate::error::{constants, ProtocolError, Result};
use crate::protocol::dialect::PacketDialect;
use crate::protocol::handshake::{HandshakeKeys, Session};
use crate::protocol::message::{Packet, PacketModel};
use crate::utils::metrics::global_metrics;
use bytes::BytesMut;
use tracing::{debug, trace};

/// Per-connection framing state.
#[derive(Debug)]
pub struct Framer {
    codec: PacketCodec,
    keys: HandshakeKeys,
    session: Option<Session>,
}

impl Framer {
    /// Raw dialect framers never take part in a key exchange.
    pub fn new(codec: PacketCodec, keys: HandshakeKeys) -> Self {
        let keys = if codec.dialect().is_raw() {
            HandshakeKeys::default()
        } else {
            keys
        };
        Self {
            codec,
            keys,
            session: None,
        }
    }

    pub fn dialect(&self) -> PacketDialect {
        self.codec.dialect()
    }

    pub fn set_dialect(&mut self, dialect: PacketDialect) {
        self.codec.set_dialect(dialect);
        if dialect.is_raw() {
            self.keys = HandshakeKeys::default();
            self.session = None;
        }
    }

    pub fn codec(&self) -> &PacketCodec {
        &self.codec
    }

    /// Negotiated session secret, empty before a key exchange.
    pub fn key(&self) -> Vec<u8> {
        self.session
            .as_ref()
            .map(|s| s.secret().to_vec())
            .unwrap_or_default()
    }

    pub fn is_encrypted(&self) -> bool {
        self.session.is_some()
    }

    /// Take one complete frame off the front of `inbound` and decode it.
    ///
    /// Returns `Ok(None)` while the frame is incomplete; nothing is consumed
    /// in that case.
    pub fn next_packet(&mut self, inbound: &mut BytesMut) -> Result<Option<PacketModel>> {
        if inbound.is_empty() {
            return Ok(None);
        }
        if self.codec.dialect().is_raw() {
            let bytes = inbound.split();
            return self.codec.decode_raw(&bytes).map(Some);
        }

        let (declared, minimum, overhead) = match &self.session {
            Some(session) => {
                let cipher = session.cipher();
                (
                    cipher.sealed_len(inbound),
                    cipher.min_sealed_len(),
                    cipher.max_overhead(),
                )
            }
            None => (frame_length(inbound), HEADER_LEN, 0),
        };
        let Some(declared) = declared else {
            return Ok(None);
        };
        if declared < minimum {
            return Err(ProtocolError::DecodeError(format!(
                "{}: declared length {declared}",
                constants::ERR_SHORT_HEADER
            )));
        }
        let limit = self.codec.settings().max_frame_size + overhead;
        if declared > limit {
            return Err(ProtocolError::DecodeError(format!(
                "frame of {declared} bytes exceeds limit of {limit}"
            )));
        }
        if inbound.len() < declared {
            trace!(buffered = inbound.len(), declared, "partial frame");
            return Ok(None);
        }

        let frame = inbound.split_to(declared);
        let mut model = match &mut self.session {
            Some(session) => {
                let plain = session.open(&frame)?;
                global_metrics().frame_decrypted();
                self.codec.decode_raw(&plain)?
            }
            None => self.codec.decode_raw(&frame)?,
        };

        if self.session.is_none() {
            if let Packet::EncryptionRequest(request) = model.packet_mut() {
                if let Some(session) = self.keys.accept_request(request)? {
                    debug!(dialect = %self.dialect(), "session established from inbound key exchange");
                    self.session = Some(session);
                }
            }
        }
        global_metrics().frame_received();
        Ok(Some(model))
    }

    /// Encode `model` into the bytes to put on the wire.
    pub fn encode_packet(&mut self, model: &PacketModel) -> Result<Vec<u8>> {
        if self.session.is_none() {
            if let Packet::EncryptionRequest(request) = model.packet() {
                if let Some((sealed, session)) = self.keys.seal_request(request)? {
                    let wire = PacketModel::new(model.dialect(), Packet::EncryptionRequest(sealed));
                    let frame = self.codec.encode_raw(&wire)?;
                    debug!(dialect = %self.dialect(), "session established from outbound key exchange");
                    self.session = Some(session);
                    return Ok(frame);
                }
            }
        }

        let frame = self.codec.encode_raw(model)?;
        match &mut self.session {
            Some(session) if !frame.is_empty() => {
                global_metrics().frame_encrypted();
                session.seal(&frame)
            }
            _ => Ok(frame),
        }
    }
}
