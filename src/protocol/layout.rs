//! Per-dialect binary layouts.
//!
//! Each layout family owns a static table mapping (category, subtype) to a
//! [`PacketKind`]; tags present in every non-raw dialect live in a shared table.
//! Adding a dialect means adding one table and pointing the dialect's family at it.

use crate::core::packet::{write_utf16_string, BodyReader};
use crate::error::{ProtocolError, Result};
use crate::protocol::dialect::{LayoutFamily, PacketDialect};
use crate::protocol::message::*;
use bytes::BufMut;

/// Body schema selector.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PacketKind {
    InitialLoad,
    LoadingScreenTransition,
    ServerHello,
    ServerHelloNgs,
    ServerPing,
    ServerPong,
    MapLoaded,
    FinishLoading,
    UnlockControls,
    SetPlayerId,
    ChatMessage,
    ChatMessageNgs,
    QuestCounterRequest,
    EncryptionRequest,
    EncryptionResponse,
    ClientPing,
    ClientPong,
    ClientGoodbye,
    SystemMessage,
    LobbyMonitor,
    SettingsRequest,
}

impl PacketKind {
    pub const ALL: [PacketKind; 21] = [
        PacketKind::InitialLoad,
        PacketKind::LoadingScreenTransition,
        PacketKind::ServerHello,
        PacketKind::ServerHelloNgs,
        PacketKind::ServerPing,
        PacketKind::ServerPong,
        PacketKind::MapLoaded,
        PacketKind::FinishLoading,
        PacketKind::UnlockControls,
        PacketKind::SetPlayerId,
        PacketKind::ChatMessage,
        PacketKind::ChatMessageNgs,
        PacketKind::QuestCounterRequest,
        PacketKind::EncryptionRequest,
        PacketKind::EncryptionResponse,
        PacketKind::ClientPing,
        PacketKind::ClientPong,
        PacketKind::ClientGoodbye,
        PacketKind::SystemMessage,
        PacketKind::LobbyMonitor,
        PacketKind::SettingsRequest,
    ];

    pub fn name(self) -> &'static str {
        match self {
            PacketKind::InitialLoad => "InitialLoad",
            PacketKind::LoadingScreenTransition => "LoadingScreenTransition",
            PacketKind::ServerHello => "ServerHello",
            PacketKind::ServerHelloNgs => "ServerHelloNGS",
            PacketKind::ServerPing => "ServerPing",
            PacketKind::ServerPong => "ServerPong",
            PacketKind::MapLoaded => "MapLoaded",
            PacketKind::FinishLoading => "FinishLoading",
            PacketKind::UnlockControls => "UnlockControls",
            PacketKind::SetPlayerId => "SetPlayerId",
            PacketKind::ChatMessage => "ChatMessage",
            PacketKind::ChatMessageNgs => "ChatMessageNGS",
            PacketKind::QuestCounterRequest => "QuestCounterRequest",
            PacketKind::EncryptionRequest => "EncryptionRequest",
            PacketKind::EncryptionResponse => "EncryptionResponse",
            PacketKind::ClientPing => "ClientPing",
            PacketKind::ClientPong => "ClientPong",
            PacketKind::ClientGoodbye => "ClientGoodbye",
            PacketKind::SystemMessage => "SystemMessage",
            PacketKind::LobbyMonitor => "LobbyMonitor",
            PacketKind::SettingsRequest => "SettingsRequest",
        }
    }
}

/// One (category, subtype) assignment.
#[derive(Debug, Clone, Copy)]
pub struct TableEntry {
    pub category: u8,
    pub subtype: u8,
    pub kind: PacketKind,
}

const fn entry(category: u8, subtype: u8, kind: PacketKind) -> TableEntry {
    TableEntry {
        category,
        subtype,
        kind,
    }
}

const SHARED_TABLE: &[TableEntry] = &[
    entry(0x03, 0x03, PacketKind::InitialLoad),
    entry(0x03, 0x04, PacketKind::LoadingScreenTransition),
    entry(0x03, 0x0B, PacketKind::ServerPing),
    entry(0x03, 0x0C, PacketKind::ServerPong),
    entry(0x03, 0x10, PacketKind::MapLoaded),
    entry(0x03, 0x23, PacketKind::FinishLoading),
    entry(0x03, 0x2B, PacketKind::UnlockControls),
    entry(0x06, 0x00, PacketKind::SetPlayerId),
    entry(0x0B, 0x30, PacketKind::QuestCounterRequest),
    entry(0x11, 0x0B, PacketKind::EncryptionRequest),
    entry(0x11, 0x0C, PacketKind::EncryptionResponse),
    entry(0x11, 0x0D, PacketKind::ClientPing),
    entry(0x11, 0x0E, PacketKind::ClientPong),
    entry(0x11, 0x2B, PacketKind::ClientGoodbye),
    entry(0x19, 0x01, PacketKind::SystemMessage),
    entry(0x19, 0x0F, PacketKind::LobbyMonitor),
    entry(0x2B, 0x00, PacketKind::SettingsRequest),
];

/// Classic, NA, JP and Vita clients.
const BASE_TABLE: &[TableEntry] = &[
    entry(0x03, 0x08, PacketKind::ServerHello),
    entry(0x07, 0x00, PacketKind::ChatMessage),
];

const NGS_TABLE: &[TableEntry] = &[
    entry(0x03, 0x08, PacketKind::ServerHelloNgs),
    entry(0x07, 0x00, PacketKind::ChatMessageNgs),
];

/// Tables consulted for `dialect`, most specific first.
fn tables(dialect: PacketDialect) -> &'static [&'static [TableEntry]] {
    match dialect.family() {
        LayoutFamily::Base => &[BASE_TABLE, SHARED_TABLE],
        LayoutFamily::Ngs => &[NGS_TABLE, SHARED_TABLE],
        LayoutFamily::Opaque => &[],
    }
}

/// Resolve a wire tag to a layout.
pub fn lookup(dialect: PacketDialect, category: u8, subtype: u8) -> Option<PacketKind> {
    tables(dialect)
        .iter()
        .flat_map(|t| t.iter())
        .find(|e| e.category == category && e.subtype == subtype)
        .map(|e| e.kind)
}

/// Wire tag of `kind` in `dialect`, if the dialect defines it.
pub fn tag_for(dialect: PacketDialect, kind: PacketKind) -> Option<(u8, u8)> {
    tables(dialect)
        .iter()
        .flat_map(|t| t.iter())
        .find(|e| e.kind == kind)
        .map(|e| (e.category, e.subtype))
}

// Length obfuscation keys of the variable-length string fields.
const CHAT_SUB: u32 = 0x44;
const CHAT_XOR: u32 = 0x9D3F;
const SYSTEM_SUB: u32 = 0xA2;
const SYSTEM_XOR: u32 = 0x78F7;

/// Fixed on-wire size of the key exchange blob.
pub const RSA_BLOCK_LEN: usize = 0x104;
const RSA_TRAILER_LEN: usize = 4;

/// Decode the body of a frame whose tag resolved to `kind`.
pub fn decode_body(kind: PacketKind, body: &[u8]) -> Result<Packet> {
    let mut r = BodyReader::new(body, kind.name());
    let packet = match kind {
        PacketKind::InitialLoad => Packet::InitialLoad {},
        PacketKind::LoadingScreenTransition => Packet::LoadingScreenTransition {},
        PacketKind::ServerPing => Packet::ServerPing {},
        PacketKind::ServerPong => Packet::ServerPong {},
        PacketKind::FinishLoading => Packet::FinishLoading {},
        PacketKind::UnlockControls => Packet::UnlockControls {},
        PacketKind::QuestCounterRequest => Packet::QuestCounterRequest {},
        PacketKind::ClientGoodbye => Packet::ClientGoodbye {},
        PacketKind::SettingsRequest => Packet::SettingsRequest {},
        PacketKind::ServerHello => Packet::ServerHello(decode_server_hello(&mut r)?),
        PacketKind::ServerHelloNgs => Packet::ServerHelloNgs(decode_server_hello_ngs(&mut r)?),
        PacketKind::MapLoaded => Packet::MapLoaded(MapLoadedPacket {
            map_object: read_object(&mut r)?,
            unk: r.array()?,
        }),
        PacketKind::SetPlayerId => Packet::SetPlayerId(SetPlayerIdPacket {
            player_id: r.u32()?,
            unk1: r.u32()?,
            unk2: r.u32()?,
        }),
        PacketKind::ChatMessage => Packet::ChatMessage(decode_chat(&mut r)?),
        PacketKind::ChatMessageNgs => Packet::ChatMessageNgs(decode_chat_ngs(&mut r)?),
        PacketKind::EncryptionRequest => Packet::EncryptionRequest(EncryptionRequestPacket {
            rsa_data: decode_rsa_block(r.rest()),
        }),
        PacketKind::EncryptionResponse => Packet::EncryptionResponse(EncryptionResponsePacket {
            data: r.rest().to_vec(),
        }),
        PacketKind::ClientPing => Packet::ClientPing(ClientPingPacket { time: r.u64()? }),
        PacketKind::ClientPong => Packet::ClientPong(ClientPongPacket {
            client_time: r.u64()?,
            server_time: r.u64()?,
            unk1: r.u32()?,
        }),
        PacketKind::SystemMessage => Packet::SystemMessage(SystemMessagePacket {
            message: r.utf16_string(SYSTEM_SUB, SYSTEM_XOR)?,
            unk: r.utf16_string(SYSTEM_SUB, SYSTEM_XOR)?,
            msg_type: MessageType::from_u32(r.u32()?),
            msg_num: r.u32()?,
        }),
        PacketKind::LobbyMonitor => Packet::LobbyMonitor(LobbyMonitorPacket {
            video_id: r.u32()?,
        }),
    };
    r.finish()?;
    Ok(packet)
}

/// Append the body of `packet` to `out`.
pub fn encode_body(packet: &Packet, out: &mut Vec<u8>) -> Result<()> {
    match packet {
        Packet::None {}
        | Packet::InitialLoad {}
        | Packet::LoadingScreenTransition {}
        | Packet::ServerPing {}
        | Packet::ServerPong {}
        | Packet::FinishLoading {}
        | Packet::UnlockControls {}
        | Packet::QuestCounterRequest {}
        | Packet::ClientGoodbye {}
        | Packet::SettingsRequest {} => {}
        Packet::ServerHello(p) => {
            out.put_u16_le(p.unk1);
            out.put_u16_le(p.blockid);
            out.put_bytes(0, 4);
            out.put_u32_le(p.unk2);
        }
        Packet::ServerHelloNgs(p) => {
            out.put_u16_le(p.unk1);
            out.put_u16_le(p.blockid);
            out.put_bytes(0, 4);
            out.put_u32_le(p.unk2);
            out.put_u32_le(p.unk3);
        }
        Packet::MapLoaded(p) => {
            write_object(out, &p.map_object);
            out.put_slice(&p.unk);
        }
        Packet::SetPlayerId(p) => {
            out.put_u32_le(p.player_id);
            out.put_u32_le(p.unk1);
            out.put_u32_le(p.unk2);
        }
        Packet::ChatMessage(p) => {
            write_object(out, &p.object);
            out.put_u8(p.area.to_u8());
            out.put_u8(p.unk3);
            out.put_u16_le(p.unk4);
            write_utf16_string(out, &p.unk5, CHAT_SUB, CHAT_XOR)?;
            write_utf16_string(out, &p.message, CHAT_SUB, CHAT_XOR)?;
        }
        Packet::ChatMessageNgs(p) => {
            write_object(out, &p.object);
            out.put_u8(p.area.to_u8());
            out.put_u8(p.unk3);
            out.put_u16_le(p.unk4);
            out.put_u16_le(p.unk5);
            out.put_u16_le(p.unk6);
            write_utf16_string(out, &p.unk7, CHAT_SUB, CHAT_XOR)?;
            write_utf16_string(out, &p.message, CHAT_SUB, CHAT_XOR)?;
        }
        Packet::EncryptionRequest(p) => encode_rsa_block(&p.rsa_data, out)?,
        Packet::EncryptionResponse(p) => out.put_slice(&p.data),
        Packet::ClientPing(p) => out.put_u64_le(p.time),
        Packet::ClientPong(p) => {
            out.put_u64_le(p.client_time);
            out.put_u64_le(p.server_time);
            out.put_u32_le(p.unk1);
        }
        Packet::SystemMessage(p) => {
            write_utf16_string(out, &p.message, SYSTEM_SUB, SYSTEM_XOR)?;
            write_utf16_string(out, &p.unk, SYSTEM_SUB, SYSTEM_XOR)?;
            out.put_u32_le(p.msg_type.to_u32());
            out.put_u32_le(p.msg_num);
        }
        Packet::LobbyMonitor(p) => out.put_u32_le(p.video_id),
        Packet::Unknown(p) => out.put_slice(&p.data),
        Packet::Raw(data) => out.put_slice(data),
    }
    Ok(())
}

fn decode_server_hello(r: &mut BodyReader<'_>) -> Result<ServerHelloPacket> {
    let unk1 = r.u16()?;
    let blockid = r.u16()?;
    r.skip(4)?;
    Ok(ServerHelloPacket {
        unk1,
        blockid,
        unk2: r.u32()?,
    })
}

fn decode_server_hello_ngs(r: &mut BodyReader<'_>) -> Result<ServerHelloNgsPacket> {
    let unk1 = r.u16()?;
    let blockid = r.u16()?;
    r.skip(4)?;
    Ok(ServerHelloNgsPacket {
        unk1,
        blockid,
        unk2: r.u32()?,
        unk3: r.u32()?,
    })
}

fn decode_chat(r: &mut BodyReader<'_>) -> Result<ChatMessagePacket> {
    Ok(ChatMessagePacket {
        object: read_object(r)?,
        area: ChatArea::from_u8(r.u8()?),
        unk3: r.u8()?,
        unk4: r.u16()?,
        unk5: r.utf16_string(CHAT_SUB, CHAT_XOR)?,
        message: r.utf16_string(CHAT_SUB, CHAT_XOR)?,
    })
}

fn decode_chat_ngs(r: &mut BodyReader<'_>) -> Result<ChatMessageNgsPacket> {
    Ok(ChatMessageNgsPacket {
        object: read_object(r)?,
        area: ChatArea::from_u8(r.u8()?),
        unk3: r.u8()?,
        unk4: r.u16()?,
        unk5: r.u16()?,
        unk6: r.u16()?,
        unk7: r.utf16_string(CHAT_SUB, CHAT_XOR)?,
        message: r.utf16_string(CHAT_SUB, CHAT_XOR)?,
    })
}

fn read_object(r: &mut BodyReader<'_>) -> Result<ObjectHeader> {
    Ok(ObjectHeader {
        id: r.u32()?,
        unk: r.u32()?,
        entity_type: EntityType::from_u16(r.u16()?),
        unk2: r.u16()?,
    })
}

fn write_object(out: &mut Vec<u8>, obj: &ObjectHeader) {
    out.put_u32_le(obj.id);
    out.put_u32_le(obj.unk);
    out.put_u16_le(obj.entity_type.to_u16());
    out.put_u16_le(obj.unk2);
}

// The key exchange blob is stored byte-reversed and zero-padded to
// `RSA_BLOCK_LEN - RSA_TRAILER_LEN` bytes. The trailer carries the blob length
// so blobs with leading zeros survive; a zero trailer (as sent by peers that
// leave it blank) falls back to trimming the padding.
fn decode_rsa_block(block: &[u8]) -> Vec<u8> {
    let (body, trailer) = block.split_at(block.len().saturating_sub(RSA_TRAILER_LEN));
    let stored = <[u8; RSA_TRAILER_LEN]>::try_from(trailer)
        .map(|t| u32::from_le_bytes(t) as usize)
        .ok()
        .filter(|len| (1..=body.len()).contains(len));
    match stored {
        Some(len) => body[..len].iter().rev().copied().collect(),
        None => body.iter().rev().skip_while(|b| **b == 0).copied().collect(),
    }
}

fn encode_rsa_block(data: &[u8], out: &mut Vec<u8>) -> Result<()> {
    let capacity = RSA_BLOCK_LEN - RSA_TRAILER_LEN;
    if data.len() > capacity {
        return Err(ProtocolError::EncodeError(format!(
            "key exchange blob of {} bytes exceeds {capacity} bytes",
            data.len(),
        )));
    }
    out.extend(data.iter().rev());
    out.put_bytes(0, capacity - data.len());
    out.put_u32_le(data.len() as u32);
    Ok(())
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used, clippy::expect_used)]
    use super::*;

    #[test]
    fn every_kind_has_a_tag_in_some_dialect() {
        let kinds = SHARED_TABLE
            .iter()
            .chain(BASE_TABLE)
            .chain(NGS_TABLE)
            .map(|e| e.kind);
        for kind in kinds {
            assert!(
                tag_for(PacketDialect::Classic, kind).is_some()
                    || tag_for(PacketDialect::Ngs, kind).is_some()
            );
        }
    }

    #[test]
    fn shared_tags_resolve_everywhere_but_raw() {
        for dialect in PacketDialect::ALL {
            let found = lookup(dialect, 0x03, 0x04);
            if dialect.is_raw() {
                assert_eq!(found, None);
            } else {
                assert_eq!(found, Some(PacketKind::LoadingScreenTransition));
            }
        }
    }

    #[test]
    fn same_tag_different_layouts() {
        assert_eq!(lookup(PacketDialect::Jp, 0x07, 0x00), Some(PacketKind::ChatMessage));
        assert_eq!(lookup(PacketDialect::Ngs, 0x07, 0x00), Some(PacketKind::ChatMessageNgs));
        assert_eq!(lookup(PacketDialect::Vita, 0xFF, 0xFF), None);
    }

    #[test]
    fn rsa_block_is_reversed_and_padded() {
        let mut out = Vec::new();
        encode_rsa_block(&[1, 2, 3], &mut out).unwrap();
        assert_eq!(out.len(), RSA_BLOCK_LEN);
        assert_eq!(&out[..3], &[3, 2, 1]);
        assert_eq!(decode_rsa_block(&out), vec![1, 2, 3]);
    }

    #[test]
    fn rsa_block_keeps_leading_zeros() {
        let mut out = Vec::new();
        encode_rsa_block(&[0, 7], &mut out).unwrap();
        assert_eq!(&out[..2], &[7, 0]);
        assert_eq!(&out[RSA_BLOCK_LEN - 4..], &[2, 0, 0, 0]);
        assert_eq!(decode_rsa_block(&out), vec![0, 7]);

        out.clear();
        encode_rsa_block(&[0, 0], &mut out).unwrap();
        assert_eq!(decode_rsa_block(&out), vec![0, 0]);
    }

    #[test]
    fn rsa_block_without_length_trims_padding() {
        let mut block = vec![0u8; RSA_BLOCK_LEN];
        block[..3].copy_from_slice(&[3, 2, 1]);
        assert_eq!(decode_rsa_block(&block), vec![1, 2, 3]);
        // a length past the body is ignored too
        block[RSA_BLOCK_LEN - 4..].copy_from_slice(&0x1000u32.to_le_bytes());
        assert_eq!(decode_rsa_block(&block), vec![1, 2, 3]);
        assert!(decode_rsa_block(&[]).is_empty());
    }

    #[test]
    fn rsa_block_rejects_oversized_blob() {
        let mut out = Vec::new();
        assert!(encode_rsa_block(&[7; RSA_BLOCK_LEN], &mut out).is_err());
    }

    #[test]
    fn short_body_is_a_decode_error() {
        let err = decode_body(PacketKind::SetPlayerId, &[1, 2, 3]).unwrap_err();
        assert!(matches!(err, ProtocolError::InsufficientData { .. }));
    }

    #[test]
    fn server_hello_layouts_differ() {
        let mut base = Vec::new();
        encode_body(&Packet::ServerHello(ServerHelloPacket::default()), &mut base).unwrap();
        let mut ngs = Vec::new();
        encode_body(&Packet::ServerHelloNgs(ServerHelloNgsPacket::default()), &mut ngs).unwrap();
        assert_eq!(base.len(), 12);
        assert_eq!(ngs.len(), 16);
        assert!(decode_body(PacketKind::ServerHello, &ngs).is_err());
    }
}
