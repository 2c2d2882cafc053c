//! # Packet Codec
//!
//! Dialect-aware conversion between wire frames, [`PacketModel`] values and the
//! serialized debug forms.
//!
//! ## Conversions
//! ```text
//! raw frame  --decode_raw-->        PacketModel  --encode_serialized-->  JSON / MessagePack
//! raw frame  <--encode_raw--        PacketModel  <--decode_serialized--  JSON / MessagePack
//! ```
//!
//! The codec holds the active dialect and format. Changing either only affects
//! later calls. Every call leaves its outcome in [`PacketCodec::last_error`].

use crate::config::CodecConfig;
use crate::core::packet::{PacketHeader, HEADER_LEN};
use crate::core::serialization::{MultiFormat, SerializedFormat};
use crate::error::{constants, ErrorSlot, ProtocolError, Result};
use crate::protocol::dialect::PacketDialect;
use crate::protocol::layout;
use crate::protocol::message::{Packet, PacketModel, UnknownPacket};
use crate::utils::metrics::global_metrics;
use tracing::trace;

/// Stateful converter bound to one dialect and one serialized format.
#[derive(Debug, Clone)]
pub struct PacketCodec {
    dialect: PacketDialect,
    format: SerializedFormat,
    settings: CodecConfig,
    error: ErrorSlot,
}

impl Default for PacketCodec {
    fn default() -> Self {
        Self::with_config(CodecConfig::default())
    }
}

impl PacketCodec {
    /// Create a codec for `dialect` with the default format and settings.
    pub fn new(dialect: PacketDialect) -> Self {
        let mut codec = Self::default();
        codec.dialect = dialect;
        codec
    }

    /// Create a codec from configuration.
    pub fn with_config(settings: CodecConfig) -> Self {
        Self {
            dialect: settings.dialect,
            format: settings.format,
            settings,
            error: ErrorSlot::default(),
        }
    }

    pub fn dialect(&self) -> PacketDialect {
        self.dialect
    }

    pub fn format(&self) -> SerializedFormat {
        self.format
    }

    pub fn settings(&self) -> &CodecConfig {
        &self.settings
    }

    /// Message of the most recent failed call, `None` after a success.
    pub fn last_error(&self) -> Option<&str> {
        self.error.get()
    }

    pub fn set_dialect(&mut self, dialect: PacketDialect) {
        self.error.clear();
        self.dialect = dialect;
    }

    /// Select the serialized format used by later calls.
    pub fn set_format(&mut self, format: SerializedFormat) -> Result<()> {
        let result = if self.format_supported(format) {
            self.format = format;
            Ok(())
        } else {
            Err(ProtocolError::ConfigError(format!(
                "Serialized format {format} is not enabled"
            )))
        };
        self.error.record(result)
    }

    pub fn format_supported(&self, format: SerializedFormat) -> bool {
        self.settings.enabled_formats.contains(&format)
    }

    /// Decode one complete frame under the active dialect.
    pub fn decode_raw(&mut self, bytes: &[u8]) -> Result<PacketModel> {
        let result = self.decode_frame(bytes);
        if result.is_err() {
            global_metrics().record_decode_error();
        }
        self.error.record(result)
    }

    /// Encode a packet into one frame under the active dialect.
    pub fn encode_raw(&mut self, model: &PacketModel) -> Result<Vec<u8>> {
        let result = self.encode_frame(model);
        if result.is_err() {
            global_metrics().record_encode_error();
        }
        self.error.record(result)
    }

    /// Decode the active serialized format.
    pub fn decode_serialized(&mut self, bytes: &[u8]) -> Result<PacketModel> {
        let result = self.deserialize(bytes);
        self.error.record(result)
    }

    /// Encode into the active serialized format.
    pub fn encode_serialized(&mut self, model: &PacketModel) -> Result<Vec<u8>> {
        let result = self.serialize(model);
        self.error.record(result)
    }

    /// Transcode a wire frame straight into the serialized form.
    pub fn raw_to_serialized(&mut self, bytes: &[u8]) -> Result<Vec<u8>> {
        let result = self
            .decode_frame(bytes)
            .and_then(|model| self.serialize(&model));
        self.error.record(result)
    }

    /// Transcode a serialized packet straight into a wire frame.
    pub fn serialized_to_raw(&mut self, bytes: &[u8]) -> Result<Vec<u8>> {
        let result = self
            .deserialize(bytes)
            .and_then(|model| self.encode_frame(&model));
        self.error.record(result)
    }

    fn decode_frame(&self, bytes: &[u8]) -> Result<PacketModel> {
        if self.dialect.is_raw() {
            return Ok(PacketModel::new(self.dialect, Packet::Raw(bytes.to_vec())));
        }
        if bytes.is_empty() {
            return Ok(PacketModel::new(self.dialect, Packet::None {}));
        }

        let (declared, header) = PacketHeader::parse(bytes)?;
        if declared != bytes.len() {
            return Err(ProtocolError::LengthMismatch {
                declared,
                actual: bytes.len(),
            });
        }
        if declared > self.settings.max_frame_size {
            return Err(ProtocolError::DecodeError(format!(
                "frame of {declared} bytes exceeds limit of {}",
                self.settings.max_frame_size
            )));
        }

        let body = &bytes[HEADER_LEN..];
        trace!(
            category = header.category,
            subtype = header.subtype,
            body_len = body.len(),
            dialect = %self.dialect,
            "decoding frame"
        );

        let packet = match layout::lookup(self.dialect, header.category, header.subtype) {
            Some(kind) => layout::decode_body(kind, body)?,
            None if self.settings.allow_unknown_packets => Packet::Unknown(UnknownPacket {
                header,
                data: body.to_vec(),
            }),
            None => {
                return Err(ProtocolError::UnknownPacket {
                    category: header.category,
                    subtype: header.subtype,
                    dialect: self.dialect,
                })
            }
        };
        Ok(PacketModel::new(self.dialect, packet))
    }

    fn encode_frame(&self, model: &PacketModel) -> Result<Vec<u8>> {
        model.ensure_dialect(self.dialect)?;

        let frame = match model.packet() {
            Packet::None {} => return Ok(Vec::new()),
            Packet::Raw(data) if self.dialect.is_raw() => return Ok(data.clone()),
            Packet::Raw(_) => {
                return Err(ProtocolError::InvalidForDialect {
                    tag: "Raw",
                    dialect: self.dialect,
                })
            }
            _ if self.dialect.is_raw() => {
                return Err(ProtocolError::EncodeError(
                    constants::ERR_RAW_NOT_FRAMED.to_string(),
                ))
            }
            Packet::Unknown(unknown) => unknown.header.frame(&unknown.data)?,
            packet => {
                let (category, subtype) = model.tag().ok_or(ProtocolError::InvalidForDialect {
                    tag: packet.name(),
                    dialect: self.dialect,
                })?;
                let mut body = Vec::new();
                layout::encode_body(packet, &mut body)?;
                PacketHeader::new(category, subtype).frame(&body)?
            }
        };

        if frame.len() > self.settings.max_frame_size {
            return Err(ProtocolError::EncodeError(format!(
                "frame of {} bytes exceeds limit of {}",
                frame.len(),
                self.settings.max_frame_size
            )));
        }
        Ok(frame)
    }

    fn deserialize(&self, bytes: &[u8]) -> Result<PacketModel> {
        let bytes = match (self.format, bytes.split_last()) {
            (SerializedFormat::Json, Some((0, rest))) => rest,
            _ => bytes,
        };
        let packet = Packet::deserialize_format(bytes, self.format)?;
        if !packet.is_valid_for(self.dialect) {
            return Err(ProtocolError::DecodeError(format!(
                "{} is not a {} packet",
                packet.name(),
                self.dialect
            )));
        }
        Ok(PacketModel::new(self.dialect, packet))
    }

    fn serialize(&self, model: &PacketModel) -> Result<Vec<u8>> {
        model.ensure_dialect(self.dialect)?;
        let mut out = model.packet().serialize_format(self.format)?;
        if self.format == SerializedFormat::Json && self.settings.json_nul_terminator {
            out.push(0);
        }
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used, clippy::expect_used)]
    use super::*;
    use crate::protocol::message::{LobbyMonitorPacket, SystemMessagePacket, MessageType};

    const LOADING: [u8; 8] = [0x08, 0, 0, 0, 0x03, 0x04, 0, 0];

    #[test]
    fn decodes_wire_example_under_classic() {
        let mut codec = PacketCodec::new(PacketDialect::Classic);
        let model = codec.decode_raw(&LOADING).unwrap();
        assert_eq!(model.packet(), &Packet::LoadingScreenTransition {});
        assert_eq!(model.tag(), Some((3, 4)));
        assert!(codec.last_error().is_none());
    }

    #[test]
    fn length_mismatch_sets_error_slot() {
        let mut codec = PacketCodec::new(PacketDialect::Classic);
        let mut bytes = LOADING.to_vec();
        bytes.push(0);
        let err = codec.decode_raw(&bytes).unwrap_err();
        assert!(matches!(err, ProtocolError::LengthMismatch { declared: 8, actual: 9 }));
        assert!(codec.last_error().is_some());

        codec.decode_raw(&LOADING).unwrap();
        assert!(codec.last_error().is_none());
    }

    #[test]
    fn unknown_tag_fails_unless_passthrough() {
        let frame = [0x0A, 0, 0, 0, 0x7E, 0x7F, 0, 0, 0xAB, 0xCD];
        let mut codec = PacketCodec::new(PacketDialect::Na);
        assert!(matches!(
            codec.decode_raw(&frame),
            Err(ProtocolError::UnknownPacket { category: 0x7E, subtype: 0x7F, .. })
        ));

        let mut settings = CodecConfig::default();
        settings.dialect = PacketDialect::Na;
        settings.allow_unknown_packets = true;
        let mut codec = PacketCodec::with_config(settings);
        let model = codec.decode_raw(&frame).unwrap();
        assert!(matches!(model.packet(), Packet::Unknown(_)));
        assert_eq!(codec.encode_raw(&model).unwrap(), frame);
    }

    #[test]
    fn raw_dialect_passes_bytes_through() {
        let mut codec = PacketCodec::new(PacketDialect::Raw);
        let model = codec.decode_raw(&[1, 2, 3]).unwrap();
        assert_eq!(model.packet(), &Packet::Raw(vec![1, 2, 3]));
        assert_eq!(codec.encode_raw(&model).unwrap(), vec![1, 2, 3]);

        let tagged = PacketModel::new(PacketDialect::Raw, Packet::ServerPing {});
        assert!(codec.encode_raw(&tagged).is_err());
    }

    #[test]
    fn encode_rejects_foreign_dialect() {
        let mut codec = PacketCodec::new(PacketDialect::Ngs);
        let model = PacketModel::new(PacketDialect::Jp, Packet::ServerPing {});
        assert!(matches!(
            codec.encode_raw(&model),
            Err(ProtocolError::DialectMismatch { .. })
        ));
    }

    #[test]
    fn empty_input_is_none_packet() {
        let mut codec = PacketCodec::new(PacketDialect::Vita);
        let model = codec.decode_raw(&[]).unwrap();
        assert_eq!(model.packet(), &Packet::None {});
        assert!(codec.encode_raw(&model).unwrap().is_empty());
    }

    #[test]
    fn set_format_respects_enabled_list() {
        let mut settings = CodecConfig::default();
        settings.enabled_formats = vec![SerializedFormat::Json];
        let mut codec = PacketCodec::with_config(settings);
        assert!(codec.format_supported(SerializedFormat::Json));
        assert!(!codec.format_supported(SerializedFormat::MessagePack));
        assert!(matches!(
            codec.set_format(SerializedFormat::MessagePack),
            Err(ProtocolError::ConfigError(_))
        ));
        assert_eq!(codec.format(), SerializedFormat::Json);
    }

    #[test]
    fn invalid_serialized_tag_leaves_no_output() {
        let mut codec = PacketCodec::new(PacketDialect::Classic);
        let result = codec.decode_serialized(br#"{"Invalid":{}}"#);
        assert!(matches!(result, Err(ProtocolError::UnknownVariant(_))));
        assert!(codec.last_error().is_some());
    }

    #[test]
    fn transcodes_between_raw_and_json() {
        let mut codec = PacketCodec::new(PacketDialect::Classic);
        let json = codec.raw_to_serialized(&LOADING).unwrap();
        assert_eq!(json, br#"{"LoadingScreenTransition":{}}"#);
        assert_eq!(codec.serialized_to_raw(&json).unwrap(), LOADING);
    }

    #[test]
    fn json_nul_terminator_is_appended_and_stripped() {
        let mut settings = CodecConfig::default();
        settings.json_nul_terminator = true;
        let mut codec = PacketCodec::with_config(settings);
        let model = PacketModel::new(
            PacketDialect::Classic,
            Packet::LobbyMonitor(LobbyMonitorPacket { video_id: 2 }),
        );
        let json = codec.encode_serialized(&model).unwrap();
        assert_eq!(json.last(), Some(&0));
        assert_eq!(codec.decode_serialized(&json).unwrap(), model);
    }

    #[test]
    fn serialized_packet_for_other_dialect_is_rejected() {
        let mut codec = PacketCodec::new(PacketDialect::Ngs);
        let model = PacketModel::new(
            PacketDialect::Ngs,
            Packet::SystemMessage(SystemMessagePacket {
                message: "maintenance".into(),
                unk: String::new(),
                msg_type: MessageType::default(),
                msg_num: 0,
            }),
        );
        let json = codec.encode_serialized(&model).unwrap();
        codec.set_dialect(PacketDialect::Raw);
        assert!(matches!(
            codec.decode_serialized(&json),
            Err(ProtocolError::DecodeError(_))
        ));
    }
}
