//! Frame header and the low-level body readers/writers shared by every layout.
//!
//! ```text
//! [Length(4, LE, includes header)] [Category(1)] [Subtype(1)] [Reserved(2)] [Body(N)]
//! ```

use crate::error::{constants, ProtocolError, Result};
use bytes::BufMut;
use serde::{Deserialize, Serialize};

/// Size of the frame header in bytes.
pub const HEADER_LEN: usize = 8;

/// Header of one binary frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct PacketHeader {
    pub category: u8,
    pub subtype: u8,
    /// Carried verbatim so unknown frames re-encode byte-exactly.
    #[serde(default)]
    pub reserved: [u8; 2],
}

impl PacketHeader {
    pub fn new(category: u8, subtype: u8) -> Self {
        Self {
            category,
            subtype,
            reserved: [0; 2],
        }
    }

    /// Parse the header at the start of `frame`, returning the declared total length.
    pub fn parse(frame: &[u8]) -> Result<(usize, Self)> {
        if frame.len() < HEADER_LEN {
            return Err(ProtocolError::InsufficientData {
                context: "frame header",
                needed: HEADER_LEN,
                available: frame.len(),
            });
        }
        let declared = u32::from_le_bytes([frame[0], frame[1], frame[2], frame[3]]) as usize;
        Ok((
            declared,
            Self {
                category: frame[4],
                subtype: frame[5],
                reserved: [frame[6], frame[7]],
            },
        ))
    }

    /// Append a header declaring a frame of `total_len` bytes.
    pub fn write(&self, total_len: usize, out: &mut Vec<u8>) -> Result<()> {
        let len = u32::try_from(total_len)
            .map_err(|_| ProtocolError::EncodeError(format!("frame of {total_len} bytes")))?;
        out.put_u32_le(len);
        out.put_u8(self.category);
        out.put_u8(self.subtype);
        out.put_slice(&self.reserved);
        Ok(())
    }

    /// Build a complete frame from this header and `body`.
    pub fn frame(&self, body: &[u8]) -> Result<Vec<u8>> {
        let mut out = Vec::with_capacity(HEADER_LEN + body.len());
        self.write(HEADER_LEN + body.len(), &mut out)?;
        out.put_slice(body);
        Ok(out)
    }
}

/// Peek the declared length of the frame starting at `buf`, if four bytes are present.
pub fn frame_length(buf: &[u8]) -> Option<usize> {
    match buf {
        [a, b, c, d, ..] => Some(u32::from_le_bytes([*a, *b, *c, *d]) as usize),
        _ => None,
    }
}

/// Split concatenated frames by their length fields.
///
/// Splitting stops at the first frame declaring fewer bytes than a header or
/// more than remain; that frame and everything after it is the remainder.
pub fn split_frames(mut buf: &[u8]) -> (Vec<&[u8]>, &[u8]) {
    let mut frames = Vec::new();
    while let Some(len) = frame_length(buf) {
        if len < HEADER_LEN || len > buf.len() {
            break;
        }
        let (frame, tail) = buf.split_at(len);
        frames.push(frame);
        buf = tail;
    }
    (frames, buf)
}

/// Obfuscated length prefix used by variable-length fields.
pub fn read_magic(num: u32, sub: u32, xor: u32) -> u32 {
    (num ^ xor).wrapping_sub(sub)
}

pub fn write_magic(num: u32, sub: u32, xor: u32) -> u32 {
    num.wrapping_add(sub) ^ xor
}

/// Cursor over a packet body that fails instead of panicking on short input.
pub struct BodyReader<'a> {
    buf: &'a [u8],
    pos: usize,
    context: &'static str,
}

impl<'a> BodyReader<'a> {
    pub fn new(buf: &'a [u8], context: &'static str) -> Self {
        Self {
            buf,
            pos: 0,
            context,
        }
    }

    pub fn remaining(&self) -> usize {
        self.buf.len() - self.pos
    }

    pub fn bytes(&mut self, n: usize) -> Result<&'a [u8]> {
        if self.remaining() < n {
            return Err(ProtocolError::InsufficientData {
                context: self.context,
                needed: self.pos + n,
                available: self.buf.len(),
            });
        }
        let out = &self.buf[self.pos..self.pos + n];
        self.pos += n;
        Ok(out)
    }

    pub fn array<const N: usize>(&mut self) -> Result<[u8; N]> {
        let mut out = [0u8; N];
        out.copy_from_slice(self.bytes(N)?);
        Ok(out)
    }

    pub fn skip(&mut self, n: usize) -> Result<()> {
        self.bytes(n).map(|_| ())
    }

    pub fn u8(&mut self) -> Result<u8> {
        Ok(self.bytes(1)?[0])
    }

    pub fn u16(&mut self) -> Result<u16> {
        Ok(u16::from_le_bytes(self.array()?))
    }

    pub fn u32(&mut self) -> Result<u32> {
        Ok(u32::from_le_bytes(self.array()?))
    }

    pub fn u64(&mut self) -> Result<u64> {
        Ok(u64::from_le_bytes(self.array()?))
    }

    /// Everything not consumed yet.
    pub fn rest(&mut self) -> &'a [u8] {
        let out = &self.buf[self.pos..];
        self.pos = self.buf.len();
        out
    }

    /// Read a UTF-16LE string with an obfuscated length prefix.
    ///
    /// The prefix counts UTF-16 units including the terminator; odd counts are
    /// padded by one unit.
    pub fn utf16_string(&mut self, sub: u32, xor: u32) -> Result<String> {
        let units = read_magic(self.u32()?, sub, xor) as usize;
        if units == 0 {
            return Ok(String::new());
        }
        let byte_len = units
            .checked_mul(2)
            .filter(|len| *len <= self.remaining())
            .ok_or(ProtocolError::InsufficientData {
                context: self.context,
                needed: self.pos.saturating_add(units.saturating_mul(2)),
                available: self.buf.len(),
            })?;
        let raw = self.bytes(byte_len)?;
        self.skip(2 * (units & 1))?;

        let words: Vec<u16> = raw
            .chunks_exact(2)
            .map(|w| u16::from_le_bytes([w[0], w[1]]))
            .take_while(|w| *w != 0)
            .collect();
        String::from_utf16(&words).map_err(|e| ProtocolError::DecodeError(e.to_string()))
    }

    /// Fail if the body holds more bytes than the layout consumed.
    pub fn finish(self) -> Result<()> {
        if self.remaining() != 0 {
            return Err(ProtocolError::DecodeError(format!(
                "{}: {} ({} bytes)",
                self.context,
                constants::ERR_TRAILING_BYTES,
                self.remaining()
            )));
        }
        Ok(())
    }
}

/// Append a UTF-16LE string with an obfuscated length prefix.
pub fn write_utf16_string(out: &mut Vec<u8>, value: &str, sub: u32, xor: u32) -> Result<()> {
    if value.is_empty() {
        out.put_u32_le(write_magic(0, sub, xor));
        return Ok(());
    }
    let mut words: Vec<u16> = value.encode_utf16().collect();
    if words.contains(&0) {
        return Err(ProtocolError::EncodeError(
            "strings may not contain NUL characters".to_string(),
        ));
    }
    words.push(0);
    let units = u32::try_from(words.len())
        .map_err(|_| ProtocolError::EncodeError(constants::ERR_STRING_TOO_LONG.to_string()))?;
    out.put_u32_le(write_magic(units, sub, xor));
    for word in words {
        out.put_u16_le(word);
    }
    if units & 1 == 1 {
        out.put_u16_le(0);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used, clippy::expect_used)]
    use super::*;

    #[test]
    fn header_parse_matches_wire_example() {
        let (len, header) = PacketHeader::parse(&[0x08, 0, 0, 0, 0x03, 0x04, 0, 0]).unwrap();
        assert_eq!(len, 8);
        assert_eq!(header, PacketHeader::new(3, 4));
    }

    #[test]
    fn header_rejects_short_input() {
        assert!(matches!(
            PacketHeader::parse(&[0x08, 0, 0]),
            Err(ProtocolError::InsufficientData { needed: 8, .. })
        ));
    }

    #[test]
    fn frame_prepends_total_length() {
        let frame = PacketHeader::new(0x19, 0x0F).frame(&[1, 2, 3, 4]).unwrap();
        assert_eq!(frame_length(&frame), Some(12));
        assert_eq!(&frame[4..8], &[0x19, 0x0F, 0, 0]);
    }

    #[test]
    fn split_frames_stops_at_a_bad_length() {
        let mut buf = vec![8, 0, 0, 0, 3, 4, 0, 0];
        buf.extend_from_slice(&[9, 0, 0, 0, 3, 3, 0, 0, 0xAA]);
        buf.extend_from_slice(&[2, 0, 0, 0, 0xFF]);
        let (frames, rest) = split_frames(&buf);
        assert_eq!(frames.len(), 2);
        assert_eq!(frames[1].len(), 9);
        assert_eq!(rest, &[2, 0, 0, 0, 0xFF]);

        let (frames, rest) = split_frames(&[1, 2, 3]);
        assert!(frames.is_empty());
        assert_eq!(rest, &[1, 2, 3]);
    }

    #[test]
    fn magic_is_reversible() {
        for n in [0u32, 1, 7, 0xFFFF, u32::MAX] {
            assert_eq!(read_magic(write_magic(n, 0x44, 0x9D3F), 0x44, 0x9D3F), n);
        }
    }

    #[test]
    fn utf16_string_layout() {
        let mut out = Vec::new();
        write_utf16_string(&mut out, "hi", 0x44, 0x9D3F).unwrap();
        // prefix + "h" "i" NUL + one padding unit
        assert_eq!(out.len(), 4 + 8);
        assert_eq!(read_magic(u32::from_le_bytes(out[..4].try_into().unwrap()), 0x44, 0x9D3F), 3);

        let mut reader = BodyReader::new(&out, "test");
        assert_eq!(reader.utf16_string(0x44, 0x9D3F).unwrap(), "hi");
        reader.finish().unwrap();
    }

    #[test]
    fn utf16_string_rejects_overlong_prefix() {
        let mut out = Vec::new();
        out.put_u32_le(write_magic(1000, 0xA2, 0x78F7));
        let mut reader = BodyReader::new(&out, "test");
        assert!(reader.utf16_string(0xA2, 0x78F7).is_err());
    }

    #[test]
    fn finish_reports_trailing_bytes() {
        let reader = BodyReader::new(&[1, 2], "test");
        assert!(matches!(reader.finish(), Err(ProtocolError::DecodeError(_))));
    }
}
