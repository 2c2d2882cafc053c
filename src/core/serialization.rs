//! # Serialization Formats
//!
//! Human-readable and debug encodings of [`Packet`](crate::protocol::message::Packet).
//!
//! ## Formats
//! - **JSON**: one top-level key naming the tag, e.g. `{"LobbyMonitor":{"video_id":3}}`
//! - **MessagePack**: the same tagged shape with struct fields stored positionally
//! - **MessagePackNamed**: the same tagged shape with struct fields keyed by name
//!
//! ## Usage
//! ```ignore
//! use packet_protocol::core::serialization::{MultiFormat, SerializedFormat};
//!
//! let bytes = packet.serialize_format(SerializedFormat::Json)?;
//! let back = Packet::deserialize_format(&bytes, SerializedFormat::Json)?;
//! ```

use crate::error::{ProtocolError, Result};
use serde::de::{self, DeserializeOwned, IgnoredAny, MapAccess, Visitor};
use serde::{Deserialize, Deserializer, Serialize};
use std::fmt;
use std::str::FromStr;

/// Supported serialized formats
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SerializedFormat {
    /// Human-readable JSON (default)
    #[default]
    Json,
    /// MessagePack with positional struct fields
    #[serde(rename = "msgpack")]
    MessagePack,
    /// MessagePack with named struct fields
    #[serde(rename = "msgpack_named")]
    MessagePackNamed,
}

impl SerializedFormat {
    pub const ALL: [SerializedFormat; 3] = [
        SerializedFormat::Json,
        SerializedFormat::MessagePack,
        SerializedFormat::MessagePackNamed,
    ];

    /// Get human-readable name
    pub fn name(self) -> &'static str {
        match self {
            SerializedFormat::Json => "JSON",
            SerializedFormat::MessagePack => "MessagePack",
            SerializedFormat::MessagePackNamed => "MessagePackNamed",
        }
    }
}

impl fmt::Display for SerializedFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for SerializedFormat {
    type Err = ProtocolError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "json" => Ok(SerializedFormat::Json),
            "msgpack" | "messagepack" => Ok(SerializedFormat::MessagePack),
            "msgpack_named" | "messagepacknamed" => Ok(SerializedFormat::MessagePackNamed),
            _ => Err(ProtocolError::ConfigError(format!(
                "Unsupported serialized format: '{s}'"
            ))),
        }
    }
}

/// Trait for types that support multiple serialization formats
pub trait MultiFormat: Serialize + DeserializeOwned + Sized {
    /// Serialize to bytes using the specified format
    fn serialize_format(&self, format: SerializedFormat) -> Result<Vec<u8>> {
        match format {
            SerializedFormat::Json => serde_json::to_vec(self)
                .map_err(|e| ProtocolError::SerializeError(e.to_string())),
            SerializedFormat::MessagePack => rmp_serde::to_vec(self)
                .map_err(|e| ProtocolError::SerializeError(e.to_string())),
            SerializedFormat::MessagePackNamed => rmp_serde::to_vec_named(self)
                .map_err(|e| ProtocolError::SerializeError(e.to_string())),
        }
    }

    /// Deserialize from bytes using the specified format
    fn deserialize_format(data: &[u8], format: SerializedFormat) -> Result<Self> {
        from_format(data, format)
    }
}

/// Deserialize `data`; every failure is a [`ProtocolError::DeserializeError`].
pub fn from_format<T: DeserializeOwned>(data: &[u8], format: SerializedFormat) -> Result<T> {
    let result = match format {
        SerializedFormat::Json => serde_json::from_slice(data).map_err(|e| e.to_string()),
        SerializedFormat::MessagePack | SerializedFormat::MessagePackNamed => {
            rmp_serde::from_slice(data).map_err(|e| e.to_string())
        }
    };
    result.map_err(ProtocolError::DeserializeError)
}

/// Tag of an externally tagged value: the first key of the outer map, or a bare string.
///
/// `None` when the input is not shaped like a tagged value at all.
pub fn outer_tag(data: &[u8], format: SerializedFormat) -> Option<String> {
    from_format::<OuterTag>(data, format).ok().map(|tag| tag.0)
}

struct OuterTag(String);

impl<'de> Deserialize<'de> for OuterTag {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        struct TagVisitor;

        impl<'de> Visitor<'de> for TagVisitor {
            type Value = OuterTag;

            fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str("a tagged value")
            }

            fn visit_str<E: de::Error>(self, v: &str) -> std::result::Result<OuterTag, E> {
                Ok(OuterTag(v.to_owned()))
            }

            fn visit_map<A: MapAccess<'de>>(self, mut map: A) -> std::result::Result<OuterTag, A::Error> {
                let tag: String = map
                    .next_key()?
                    .ok_or_else(|| <A::Error as de::Error>::invalid_length(0, &self))?;
                map.next_value::<IgnoredAny>()?;
                while map.next_entry::<IgnoredAny, IgnoredAny>()?.is_some() {}
                Ok(OuterTag(tag))
            }
        }

        deserializer.deserialize_any(TagVisitor)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::protocol::message::{LobbyMonitorPacket, Packet};

    #[test]
    fn test_format_names() {
        assert_eq!(SerializedFormat::Json.name(), "JSON");
        assert_eq!(SerializedFormat::MessagePack.name(), "MessagePack");
        assert_eq!(SerializedFormat::MessagePackNamed.name(), "MessagePackNamed");
        assert_eq!(
            "msgpack_named".parse::<SerializedFormat>().ok(),
            Some(SerializedFormat::MessagePackNamed)
        );
        assert!("bincode".parse::<SerializedFormat>().is_err());
    }

    #[test]
    #[allow(clippy::expect_used)]
    fn test_json_shape_is_single_key() {
        let bytes = Packet::LoadingScreenTransition {}
            .serialize_format(SerializedFormat::Json)
            .expect("serialize");
        assert_eq!(bytes, br#"{"LoadingScreenTransition":{}}"#);
    }

    #[test]
    fn test_unknown_tag_is_unknown_variant() {
        let err = Packet::deserialize_format(br#"{"Invalid":{}}"#, SerializedFormat::Json)
            .unwrap_err();
        assert!(matches!(err, ProtocolError::UnknownVariant(_)), "{err}");
    }

    #[test]
    fn test_bad_field_value_is_not_unknown_variant() {
        let err = Packet::deserialize_format(
            br#"{"LobbyMonitor":{"video_id":"three"}}"#,
            SerializedFormat::Json,
        )
        .unwrap_err();
        assert!(matches!(err, ProtocolError::DeserializeError(_)), "{err}");
    }

    #[test]
    fn test_outer_tag_in_every_format() {
        let packet = Packet::LobbyMonitor(LobbyMonitorPacket { video_id: 2 });
        for format in SerializedFormat::ALL {
            let bytes = packet.serialize_format(format).unwrap();
            assert_eq!(outer_tag(&bytes, format).as_deref(), Some("LobbyMonitor"));
        }
        assert_eq!(outer_tag(b"[1,2]", SerializedFormat::Json), None);
    }

    #[test]
    #[allow(clippy::expect_used)]
    fn test_named_messagepack_is_larger_than_positional() {
        let packet = Packet::LobbyMonitor(LobbyMonitorPacket { video_id: 7 });
        let positional = packet
            .serialize_format(SerializedFormat::MessagePack)
            .expect("positional");
        let named = packet
            .serialize_format(SerializedFormat::MessagePackNamed)
            .expect("named");
        assert!(named.len() > positional.len());
        for (bytes, format) in [
            (positional, SerializedFormat::MessagePack),
            (named, SerializedFormat::MessagePackNamed),
        ] {
            let back = Packet::deserialize_format(&bytes, format).expect("deserialize");
            assert_eq!(back, packet);
        }
    }
}
