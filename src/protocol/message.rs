//! Structured packet model.
//!
//! [`Packet`] is the tagged union of every known message. Its serde shape is
//! externally tagged, so a serialized packet is an object with exactly one key
//! naming the tag, e.g. `{"LoadingScreenTransition":{}}`. Tags without fields
//! are declared as empty struct variants to keep that shape.
//!
//! [`PacketModel`] pairs a packet with the dialect it was parsed under.

use crate::core::packet::PacketHeader;
use crate::core::serialization::{self, MultiFormat, SerializedFormat};
use crate::error::{ProtocolError, Result};
use crate::protocol::dialect::PacketDialect;
use crate::protocol::layout::{self, PacketKind};
use serde::{Deserialize, Serialize};

/// Every message the codec understands.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Packet {
    /// Empty packet; encodes to zero bytes.
    None {},

    // Server packets [0x03]
    InitialLoad {},
    LoadingScreenTransition {},
    ServerHello(ServerHelloPacket),
    #[serde(rename = "ServerHelloNGS")]
    ServerHelloNgs(ServerHelloNgsPacket),
    ServerPing {},
    ServerPong {},
    MapLoaded(MapLoadedPacket),
    FinishLoading {},
    UnlockControls {},

    // Player status [0x06]
    SetPlayerId(SetPlayerIdPacket),

    // Chat [0x07]
    ChatMessage(ChatMessagePacket),
    #[serde(rename = "ChatMessageNGS")]
    ChatMessageNgs(ChatMessageNgsPacket),

    // Quest list [0x0B]
    QuestCounterRequest {},

    // Login [0x11]
    EncryptionRequest(EncryptionRequestPacket),
    EncryptionResponse(EncryptionResponsePacket),
    ClientPing(ClientPingPacket),
    ClientPong(ClientPongPacket),
    ClientGoodbye {},

    // Lobby [0x19]
    SystemMessage(SystemMessagePacket),
    LobbyMonitor(LobbyMonitorPacket),

    // Settings [0x2B]
    SettingsRequest {},

    /// Frame with a tag unknown to the dialect, kept verbatim.
    Unknown(UnknownPacket),
    /// Whole frame of the raw dialect.
    Raw(Vec<u8>),
}

impl Default for Packet {
    fn default() -> Self {
        Packet::None {}
    }
}

impl Packet {
    /// Layout kind of a tagged packet; `None` for the empty, unknown and raw packets.
    pub fn kind(&self) -> Option<PacketKind> {
        let kind = match self {
            Packet::None {} | Packet::Unknown(_) | Packet::Raw(_) => return None,
            Packet::InitialLoad {} => PacketKind::InitialLoad,
            Packet::LoadingScreenTransition {} => PacketKind::LoadingScreenTransition,
            Packet::ServerHello(_) => PacketKind::ServerHello,
            Packet::ServerHelloNgs(_) => PacketKind::ServerHelloNgs,
            Packet::ServerPing {} => PacketKind::ServerPing,
            Packet::ServerPong {} => PacketKind::ServerPong,
            Packet::MapLoaded(_) => PacketKind::MapLoaded,
            Packet::FinishLoading {} => PacketKind::FinishLoading,
            Packet::UnlockControls {} => PacketKind::UnlockControls,
            Packet::SetPlayerId(_) => PacketKind::SetPlayerId,
            Packet::ChatMessage(_) => PacketKind::ChatMessage,
            Packet::ChatMessageNgs(_) => PacketKind::ChatMessageNgs,
            Packet::QuestCounterRequest {} => PacketKind::QuestCounterRequest,
            Packet::EncryptionRequest(_) => PacketKind::EncryptionRequest,
            Packet::EncryptionResponse(_) => PacketKind::EncryptionResponse,
            Packet::ClientPing(_) => PacketKind::ClientPing,
            Packet::ClientPong(_) => PacketKind::ClientPong,
            Packet::ClientGoodbye {} => PacketKind::ClientGoodbye,
            Packet::SystemMessage(_) => PacketKind::SystemMessage,
            Packet::LobbyMonitor(_) => PacketKind::LobbyMonitor,
            Packet::SettingsRequest {} => PacketKind::SettingsRequest,
        };
        Some(kind)
    }

    pub fn name(&self) -> &'static str {
        match self {
            Packet::None {} => "None",
            Packet::Unknown(_) => "Unknown",
            Packet::Raw(_) => "Raw",
            other => other.kind().map(PacketKind::name).unwrap_or("None"),
        }
    }

    /// Whether `name` is the serialized tag of some variant.
    pub fn is_tag_name(name: &str) -> bool {
        matches!(name, "None" | "Unknown" | "Raw")
            || PacketKind::ALL.iter().any(|kind| kind.name() == name)
    }

    /// Whether `dialect` can carry this packet on the wire.
    pub fn is_valid_for(&self, dialect: PacketDialect) -> bool {
        match self {
            Packet::None {} => true,
            Packet::Raw(_) => dialect.is_raw(),
            Packet::Unknown(_) => !dialect.is_raw(),
            other => other
                .kind()
                .is_some_and(|kind| layout::tag_for(dialect, kind).is_some()),
        }
    }
}

impl MultiFormat for Packet {
    /// An unrecognised outer tag is [`ProtocolError::UnknownVariant`]; anything
    /// else that fails to decode is [`ProtocolError::DeserializeError`].
    fn deserialize_format(data: &[u8], format: SerializedFormat) -> Result<Self> {
        serialization::from_format(data, format).map_err(|err| {
            match serialization::outer_tag(data, format) {
                Some(tag) if !Packet::is_tag_name(&tag) => ProtocolError::UnknownVariant(tag),
                _ => err,
            }
        })
    }
}

/// A packet together with the dialect it belongs to.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct PacketModel {
    dialect: PacketDialect,
    packet: Packet,
}

impl PacketModel {
    pub fn new(dialect: PacketDialect, packet: Packet) -> Self {
        Self { dialect, packet }
    }

    pub fn dialect(&self) -> PacketDialect {
        self.dialect
    }

    pub fn packet(&self) -> &Packet {
        &self.packet
    }

    pub fn packet_mut(&mut self) -> &mut Packet {
        &mut self.packet
    }

    pub fn into_packet(self) -> Packet {
        self.packet
    }

    /// (category, subtype) this packet is framed with, if it has one.
    pub fn tag(&self) -> Option<(u8, u8)> {
        match &self.packet {
            Packet::Unknown(p) => Some((p.header.category, p.header.subtype)),
            other => other
                .kind()
                .and_then(|kind| layout::tag_for(self.dialect, kind)),
        }
    }

    /// Fail unless this packet was produced under `expected`.
    pub fn ensure_dialect(&self, expected: PacketDialect) -> Result<()> {
        if self.dialect != expected {
            return Err(ProtocolError::DialectMismatch {
                packet: self.dialect,
                expected,
            });
        }
        Ok(())
    }
}

// ----------------------------------------------------------------
// Shared field types
// ----------------------------------------------------------------

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum EntityType {
    #[default]
    Unknown,
    Player,
    Map,
    Object,
    Unk1,
    Unk2,
    Undefined,
}

impl EntityType {
    pub fn from_u16(value: u16) -> Self {
        match value {
            0 => EntityType::Unknown,
            4 => EntityType::Player,
            5 => EntityType::Map,
            6 => EntityType::Object,
            7 => EntityType::Unk1,
            22 => EntityType::Unk2,
            _ => EntityType::Undefined,
        }
    }

    pub fn to_u16(self) -> u16 {
        match self {
            EntityType::Unknown => 0,
            EntityType::Player => 4,
            EntityType::Map => 5,
            EntityType::Object => 6,
            EntityType::Unk1 => 7,
            EntityType::Unk2 => 22,
            EntityType::Undefined => 0xFFFF,
        }
    }
}

/// Reference to a game object.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ObjectHeader {
    pub id: u32,
    pub unk: u32,
    pub entity_type: EntityType,
    pub unk2: u16,
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ChatArea {
    #[default]
    Map,
    Party,
    Alliance,
    Whisper,
    Group,
    Undefined,
}

impl ChatArea {
    pub fn from_u8(value: u8) -> Self {
        match value {
            0 => ChatArea::Map,
            1 => ChatArea::Party,
            2 => ChatArea::Alliance,
            3 => ChatArea::Whisper,
            4 => ChatArea::Group,
            _ => ChatArea::Undefined,
        }
    }

    pub fn to_u8(self) -> u8 {
        match self {
            ChatArea::Map => 0,
            ChatArea::Party => 1,
            ChatArea::Alliance => 2,
            ChatArea::Whisper => 3,
            ChatArea::Group => 4,
            ChatArea::Undefined => 0xFF,
        }
    }
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum MessageType {
    AdminMessage,
    AdminMessageInstant,
    #[default]
    SystemMessage,
    GoldenMessage,
    EventInformationYellow,
    EventInformationGreen,
    ImportantMessage,
    PopupMessage,
    Undefined,
}

impl MessageType {
    pub fn from_u32(value: u32) -> Self {
        match value {
            1 => MessageType::AdminMessage,
            2 => MessageType::AdminMessageInstant,
            3 => MessageType::SystemMessage,
            4 => MessageType::GoldenMessage,
            5 => MessageType::EventInformationYellow,
            6 => MessageType::EventInformationGreen,
            7 => MessageType::ImportantMessage,
            8 => MessageType::PopupMessage,
            _ => MessageType::Undefined,
        }
    }

    pub fn to_u32(self) -> u32 {
        match self {
            MessageType::AdminMessage => 1,
            MessageType::AdminMessageInstant => 2,
            MessageType::SystemMessage => 3,
            MessageType::GoldenMessage => 4,
            MessageType::EventInformationYellow => 5,
            MessageType::EventInformationGreen => 6,
            MessageType::ImportantMessage => 7,
            MessageType::PopupMessage => 8,
            MessageType::Undefined => 0xFFFF_FFFF,
        }
    }
}

// ----------------------------------------------------------------
// Packet bodies
// ----------------------------------------------------------------

/// (0x03, 0x08) Server hello, base layout.
#[derive(Debug, Default, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerHelloPacket {
    pub unk1: u16,
    pub blockid: u16,
    pub unk2: u32,
}

/// (0x03, 0x08) Server hello, NGS layout.
#[derive(Debug, Default, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerHelloNgsPacket {
    pub unk1: u16,
    pub blockid: u16,
    pub unk2: u32,
    pub unk3: u32,
}

/// (0x03, 0x10) Map finished loading.
#[derive(Debug, Default, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct MapLoadedPacket {
    pub map_object: ObjectHeader,
    pub unk: [u8; 0x20],
}

/// (0x06, 0x00) Assigns the player object id.
#[derive(Debug, Default, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SetPlayerIdPacket {
    pub player_id: u32,
    pub unk1: u32,
    pub unk2: u32,
}

/// (0x07, 0x00) Chat message, base layout.
#[derive(Debug, Default, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ChatMessagePacket {
    pub object: ObjectHeader,
    pub area: ChatArea,
    pub unk3: u8,
    pub unk4: u16,
    pub unk5: String,
    pub message: String,
}

/// (0x07, 0x00) Chat message, NGS layout.
#[derive(Debug, Default, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ChatMessageNgsPacket {
    pub object: ObjectHeader,
    pub area: ChatArea,
    pub unk3: u8,
    pub unk4: u16,
    pub unk5: u16,
    pub unk6: u16,
    pub unk7: String,
    pub message: String,
}

/// (0x11, 0x0B) Key exchange request.
///
/// Carries the session secret, RSA-encrypted on the wire and in plain text
/// after a connection with a private key processed it.
#[derive(Debug, Default, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EncryptionRequestPacket {
    pub rsa_data: Vec<u8>,
}

/// (0x11, 0x0C) Key exchange response.
#[derive(Debug, Default, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EncryptionResponsePacket {
    pub data: Vec<u8>,
}

/// (0x11, 0x0D) Client ping, time in game epoch milliseconds.
#[derive(Debug, Default, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientPingPacket {
    pub time: u64,
}

/// (0x11, 0x0E) Reply to a client ping.
#[derive(Debug, Default, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientPongPacket {
    pub client_time: u64,
    pub server_time: u64,
    pub unk1: u32,
}

/// (0x19, 0x01) System announcement.
#[derive(Debug, Default, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SystemMessagePacket {
    pub message: String,
    pub unk: String,
    pub msg_type: MessageType,
    pub msg_num: u32,
}

/// (0x19, 0x0F) Lobby video selection.
#[derive(Debug, Default, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LobbyMonitorPacket {
    pub video_id: u32,
}

#[derive(Debug, Default, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct UnknownPacket {
    pub header: PacketHeader,
    pub data: Vec<u8>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tag_depends_on_dialect() {
        let hello = PacketModel::new(
            PacketDialect::Classic,
            Packet::ServerHello(ServerHelloPacket::default()),
        );
        assert_eq!(hello.tag(), Some((0x03, 0x08)));

        let ngs = PacketModel::new(
            PacketDialect::Ngs,
            Packet::ServerHello(ServerHelloPacket::default()),
        );
        assert_eq!(ngs.tag(), None);
    }

    #[test]
    fn validity_per_dialect() {
        let chat_ngs = Packet::ChatMessageNgs(ChatMessageNgsPacket::default());
        assert!(chat_ngs.is_valid_for(PacketDialect::Ngs));
        assert!(!chat_ngs.is_valid_for(PacketDialect::Vita));
        assert!(Packet::Raw(vec![1]).is_valid_for(PacketDialect::Raw));
        assert!(!Packet::Raw(vec![1]).is_valid_for(PacketDialect::Jp));
        assert!(Packet::default().is_valid_for(PacketDialect::Raw));
    }

    #[test]
    fn ensure_dialect_rejects_reinterpretation() {
        let model = PacketModel::new(PacketDialect::Na, Packet::ServerPing {});
        assert!(model.ensure_dialect(PacketDialect::Na).is_ok());
        assert!(matches!(
            model.ensure_dialect(PacketDialect::Ngs),
            Err(ProtocolError::DialectMismatch { .. })
        ));
    }

    #[test]
    fn enum_values_fall_back_to_undefined() {
        assert_eq!(EntityType::from_u16(4), EntityType::Player);
        assert_eq!(EntityType::from_u16(1234), EntityType::Undefined);
        assert_eq!(ChatArea::from_u8(9), ChatArea::Undefined);
        assert_eq!(MessageType::from_u32(0).to_u32(), 0xFFFF_FFFF);
    }

    #[test]
    fn names() {
        assert_eq!(Packet::default().name(), "None");
        assert_eq!(Packet::ServerPing {}.name(), "ServerPing");
        assert_eq!(Packet::Raw(vec![]).name(), "Raw");
    }
}
