//! Integration tests for the serialized packet formats
//!
//! Covers the JSON / MessagePack / MessagePackNamed encodings produced by the
//! codec, including the tagged-union shape and dialect checks on input.

#![allow(
    clippy::expect_used,
    clippy::unwrap_used,
    clippy::panic,
    clippy::uninlined_format_args
)]

use packet_protocol::config::CodecConfig;
use packet_protocol::protocol::message::{
    ChatArea, ChatMessageNgsPacket, LobbyMonitorPacket, MessageType, ObjectHeader,
    SystemMessagePacket,
};
use packet_protocol::{
    ErrorKind, Packet, PacketCodec, PacketDialect, PacketModel, ProtocolError, SerializedFormat,
};

fn codec(dialect: PacketDialect, format: SerializedFormat) -> PacketCodec {
    let mut codec = PacketCodec::new(dialect);
    codec.set_format(format).expect("format enabled by default");
    codec
}

#[test]
fn test_wire_example_to_json() {
    let mut codec = codec(PacketDialect::Classic, SerializedFormat::Json);
    let json = codec
        .raw_to_serialized(&[0x08, 0x00, 0x00, 0x00, 0x03, 0x04, 0x00, 0x00])
        .expect("Failed to convert");
    assert_eq!(json, br#"{"LoadingScreenTransition":{}}"#);
}

#[test]
fn test_json_fields_are_named() {
    let mut codec = codec(PacketDialect::Na, SerializedFormat::Json);
    let model = PacketModel::new(
        PacketDialect::Na,
        Packet::LobbyMonitor(LobbyMonitorPacket { video_id: 3 }),
    );
    let json = codec.encode_serialized(&model).expect("Failed to serialize");
    assert_eq!(json, br#"{"LobbyMonitor":{"video_id":3}}"#);
}

#[test]
fn test_json_missing_fields_take_defaults() {
    let mut codec = codec(PacketDialect::Jp, SerializedFormat::Json);
    let model = codec
        .decode_serialized(br#"{"SystemMessage":{"message":"maintenance at 10"}}"#)
        .expect("Failed to deserialize");
    match model.packet() {
        Packet::SystemMessage(msg) => {
            assert_eq!(msg.message, "maintenance at 10");
            assert_eq!(msg.msg_type, MessageType::default());
            assert_eq!(msg.msg_num, 0);
        }
        other => panic!("unexpected packet {:?}", other),
    }
}

#[test]
fn test_invalid_tag_is_unknown_variant() {
    let mut codec = codec(PacketDialect::Classic, SerializedFormat::Json);
    codec
        .decode_serialized(br#"{"ServerPing":{}}"#)
        .expect("valid packet");
    assert!(codec.last_error().is_none());

    let err = codec.decode_serialized(br#"{"Invalid":{}}"#).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::UnknownVariant);
    assert!(codec.last_error().is_some());
}

#[test]
fn test_bad_field_value_is_a_decode_error() {
    let mut codec = codec(PacketDialect::Classic, SerializedFormat::Json);
    let err = codec
        .decode_serialized(br#"{"ChatMessage":{"area":"Nope"}}"#)
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Decode, "{}", err);
}

#[test]
fn test_invalid_tag_is_unknown_variant_in_messagepack() {
    let bytes = rmp_serde::to_vec(&std::collections::BTreeMap::from([("Invalid", [1u8])]))
        .expect("encode map");
    let mut codec = codec(PacketDialect::Classic, SerializedFormat::MessagePack);
    let err = codec.decode_serialized(&bytes).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::UnknownVariant);
}

#[test]
fn test_json_nul_terminator() {
    let settings = CodecConfig {
        json_nul_terminator: true,
        ..CodecConfig::default()
    };
    let mut codec = PacketCodec::with_config(settings);
    let model = PacketModel::new(PacketDialect::Classic, Packet::ServerPong {});

    let json = codec.encode_serialized(&model).expect("Failed to serialize");
    assert_eq!(json.last(), Some(&0));
    assert_eq!(codec.decode_serialized(&json).expect("Failed to deserialize"), model);
}

#[test]
fn test_dialect_specific_packet_rejected_elsewhere() {
    let packet = Packet::ChatMessageNgs(ChatMessageNgsPacket {
        object: ObjectHeader::default(),
        area: ChatArea::Party,
        message: "hello".to_string(),
        ..ChatMessageNgsPacket::default()
    });
    let mut ngs = codec(PacketDialect::Ngs, SerializedFormat::MessagePackNamed);
    let bytes = ngs
        .encode_serialized(&PacketModel::new(PacketDialect::Ngs, packet))
        .expect("Failed to serialize");

    let mut vita = codec(PacketDialect::Vita, SerializedFormat::MessagePackNamed);
    let err = vita.decode_serialized(&bytes).unwrap_err();
    assert!(matches!(err, ProtocolError::DecodeError(_)), "{}", err);
}

#[test]
fn test_model_dialect_must_match_codec() {
    let mut codec = codec(PacketDialect::Jp, SerializedFormat::MessagePack);
    let model = PacketModel::new(PacketDialect::Na, Packet::ServerPing {});
    assert!(matches!(
        codec.encode_serialized(&model),
        Err(ProtocolError::DialectMismatch { .. })
    ));
}

#[test]
fn test_positional_and_named_msgpack_differ() {
    let model = PacketModel::new(
        PacketDialect::Vita,
        Packet::SystemMessage(SystemMessagePacket {
            message: "welcome".to_string(),
            unk: String::new(),
            msg_type: MessageType::GoldenMessage,
            msg_num: 12,
        }),
    );

    let mut positional = codec(PacketDialect::Vita, SerializedFormat::MessagePack);
    let mut named = codec(PacketDialect::Vita, SerializedFormat::MessagePackNamed);
    let a = positional.encode_serialized(&model).unwrap();
    let b = named.encode_serialized(&model).unwrap();
    assert_ne!(a, b);
    assert!(b.len() > a.len());

    // rmp-serde reads both struct shapes
    assert_eq!(positional.decode_serialized(&b).unwrap(), model);
    assert_eq!(named.decode_serialized(&a).unwrap(), model);
}

#[test]
fn test_disabled_format_cannot_be_selected() {
    let settings = CodecConfig {
        enabled_formats: vec![SerializedFormat::Json],
        ..CodecConfig::default()
    };
    let mut codec = PacketCodec::with_config(settings);
    assert!(codec.format_supported(SerializedFormat::Json));
    assert!(!codec.format_supported(SerializedFormat::MessagePack));
    let err = codec.set_format(SerializedFormat::MessagePack).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Config);
    assert_eq!(codec.format(), SerializedFormat::Json);
}

#[test]
fn test_serialized_to_raw() {
    let mut codec = codec(PacketDialect::Ngs, SerializedFormat::Json);
    let frame = codec
        .serialized_to_raw(br#"{"LobbyMonitor":{"video_id":258}}"#)
        .expect("Failed to convert");
    assert_eq!(frame, [12, 0, 0, 0, 0x19, 0x0F, 0, 0, 2, 1, 0, 0]);
}
