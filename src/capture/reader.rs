//! Sequential capture reader.

use crate::capture::{CaptureRecord, Direction, OutputType, ReadStatus};
use crate::config::{CodecConfig, ProtocolConfig, CAPTURE_MAGIC, CAPTURE_VERSION};
use crate::core::codec::PacketCodec;
use crate::core::packet::split_frames;
use crate::error::{constants, ErrorSlot, ProtocolError, Result};
use crate::protocol::dialect::PacketDialect;
use crate::utils::metrics::global_metrics;
use std::collections::VecDeque;
use std::fs::File;
use std::io::{self, BufReader, Read};
use std::path::Path;
use std::time::Duration;
use tracing::{debug, instrument, warn};

enum ReaderWrapper<R: Read> {
    Plain(BufReader<R>),
    Zstd(zstd::stream::read::Decoder<'static, BufReader<R>>),
}

impl<R: Read> Read for ReaderWrapper<R> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        match self {
            ReaderWrapper::Plain(r) => r.read(buf),
            ReaderWrapper::Zstd(d) => d.read(buf),
        }
    }
}

/// Forward-only reader over one capture file.
///
/// Reopen the file to start over. After a [`ReadStatus::FormatError`] the
/// reader is spent and keeps reporting that status.
pub struct CaptureReader<R: Read = File> {
    input: ReaderWrapper<R>,
    version: u8,
    dialect: PacketDialect,
    compressed: bool,
    codec: PacketCodec,
    output: OutputType,
    record: Option<CaptureRecord>,
    /// Frames of the current record not yet handed out, with its timestamp and direction
    queued: VecDeque<Vec<u8>>,
    queued_meta: (Duration, Direction),
    failed: bool,
    error: ErrorSlot,
}

impl CaptureReader<File> {
    /// Open a capture file from disk.
    #[instrument(skip(path), fields(path = %path.as_ref().display()))]
    pub fn open<P: AsRef<Path>>(path: P, output: OutputType) -> Result<Self> {
        Self::new(File::open(path)?, output)
    }
}

impl<R: Read> CaptureReader<R> {
    /// Parse the file header and prepare to read records.
    pub fn new(reader: R, output: OutputType) -> Result<Self> {
        Self::with_codec_config(reader, output, CodecConfig::default())
    }

    /// Reader using the capture output selector and codec settings of `config`.
    pub fn with_config(reader: R, config: &ProtocolConfig) -> Result<Self> {
        Self::with_codec_config(reader, config.capture.output, config.codec.clone())
    }

    /// Like [`new`](Self::new); records are decoded with `settings` under the file's dialect.
    pub fn with_codec_config(reader: R, output: OutputType, settings: CodecConfig) -> Result<Self> {
        let mut reader = BufReader::new(reader);

        let mut magic = [0u8; 4];
        read_header_bytes(&mut reader, &mut magic)?;
        if magic != CAPTURE_MAGIC {
            return Err(ProtocolError::FormatError(constants::ERR_BAD_MAGIC.to_string()));
        }

        let version = read_header_byte(&mut reader)?;
        if version > CAPTURE_VERSION {
            return Err(ProtocolError::UnsupportedVersion(version));
        }
        let dialect = if version >= 3 {
            PacketDialect::from_capture_id(read_header_byte(&mut reader)?)?
        } else {
            PacketDialect::Ngs
        };
        let compressed = version >= 4 && read_header_byte(&mut reader)? != 0;

        let input = if compressed {
            ReaderWrapper::Zstd(zstd::stream::read::Decoder::with_buffer(reader)?)
        } else {
            ReaderWrapper::Plain(reader)
        };

        let mut codec = PacketCodec::with_config(settings);
        codec.set_dialect(dialect);
        debug!(version, %dialect, compressed, "Opened capture");

        Ok(Self {
            input,
            version,
            dialect,
            compressed,
            codec,
            output,
            record: None,
            queued: VecDeque::new(),
            queued_meta: (Duration::ZERO, Direction::ToServer),
            failed: false,
            error: ErrorSlot::default(),
        })
    }

    pub fn version(&self) -> u8 {
        self.version
    }

    pub fn dialect(&self) -> PacketDialect {
        self.dialect
    }

    pub fn is_compressed(&self) -> bool {
        self.compressed
    }

    pub fn output(&self) -> OutputType {
        self.output
    }

    /// Change what later records materialize.
    pub fn set_output(&mut self, output: OutputType) {
        self.output = output;
    }

    /// Message of the most recent failed call, `None` after a success.
    pub fn last_error(&self) -> Option<&str> {
        self.error.get()
    }

    /// Record produced by the last successful `next`.
    pub fn record(&self) -> Option<&CaptureRecord> {
        self.record.as_ref()
    }

    pub fn take_record(&mut self) -> Option<CaptureRecord> {
        self.record.take()
    }

    /// Advance to the next frame.
    ///
    /// A record holding several concatenated frames yields them one per
    /// call, all with the record's timestamp and direction. Bytes after the
    /// last well-formed frame come out as one more undecodable frame.
    #[allow(clippy::should_implement_trait)]
    pub fn next(&mut self) -> ReadStatus {
        self.error.clear();
        self.record = None;
        if self.failed {
            self.error.set_message(constants::ERR_READER_FAILED);
            return ReadStatus::FormatError;
        }
        if let Some(frame) = self.queued.pop_front() {
            return self.emit(frame);
        }

        match self.read_record() {
            Ok(None) => ReadStatus::EndOfFile,
            Ok(Some((timestamp, direction, data))) => {
                global_metrics().capture_record_read();
                self.queued_meta = (timestamp, direction);
                self.queued = split_record(&data);
                match self.queued.pop_front() {
                    Some(frame) => self.emit(frame),
                    None => self.emit(data),
                }
            }
            Err(e) => {
                warn!(error = %e, "Capture is damaged");
                self.failed = true;
                self.error.set(&e);
                ReadStatus::FormatError
            }
        }
    }

    fn read_record(&mut self) -> Result<Option<(Duration, Direction, Vec<u8>)>> {
        let timestamp = if self.version >= 2 {
            let mut buf = [0u8; 16];
            if !self.fill_or_eof(&mut buf)? {
                return Ok(None);
            }
            let nanos = u128::from_le_bytes(buf);
            let secs = u64::try_from(nanos / 1_000_000_000).unwrap_or(u64::MAX);
            Duration::new(secs, (nanos % 1_000_000_000) as u32)
        } else {
            let mut buf = [0u8; 8];
            if !self.fill_or_eof(&mut buf)? {
                return Ok(None);
            }
            Duration::from_secs(u64::from_le_bytes(buf))
        };

        let mut direction = [0u8; 1];
        self.fill(&mut direction)?;
        let mut len = [0u8; 8];
        self.fill(&mut len)?;
        let len = u64::from_le_bytes(len);

        let mut data = Vec::new();
        let read = self.input.by_ref().take(len).read_to_end(&mut data)?;
        if read as u64 != len {
            return Err(truncated(len as usize, read));
        }
        Ok(Some((timestamp, Direction::from_byte(direction[0]), data)))
    }

    fn emit(&mut self, frame: Vec<u8>) -> ReadStatus {
        let (timestamp, direction) = self.queued_meta;
        let (status, record) = self.materialize(timestamp, direction, frame);
        self.record = Some(record);
        status
    }

    fn materialize(
        &mut self,
        timestamp: Duration,
        direction: Direction,
        data: Vec<u8>,
    ) -> (ReadStatus, CaptureRecord) {
        let mut record = CaptureRecord {
            timestamp,
            direction,
            dialect: self.dialect,
            packet: None,
            data: None,
            parse_error: None,
        };
        if self.output == OutputType::Raw {
            record.data = Some(data);
            return (ReadStatus::RawOnly, record);
        }

        let status = match self.codec.decode_raw(&data) {
            Ok(model) => {
                record.packet = Some(model);
                ReadStatus::Parsed
            }
            Err(e) => {
                debug!(error = %e, "Record kept as raw bytes");
                record.parse_error = Some(e.to_string());
                ReadStatus::RawOnly
            }
        };
        if self.output == OutputType::Both || status == ReadStatus::RawOnly {
            record.data = Some(data);
        }
        (status, record)
    }

    /// Fill `buf`, reporting a clean end of file as `false`.
    fn fill_or_eof(&mut self, buf: &mut [u8]) -> Result<bool> {
        let mut filled = 0;
        while filled < buf.len() {
            match self.input.read(&mut buf[filled..]) {
                Ok(0) if filled == 0 => return Ok(false),
                Ok(0) => return Err(truncated(buf.len(), filled)),
                Ok(n) => filled += n,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(e.into()),
            }
        }
        Ok(true)
    }

    fn fill(&mut self, buf: &mut [u8]) -> Result<()> {
        if self.fill_or_eof(buf)? {
            Ok(())
        } else {
            Err(truncated(buf.len(), 0))
        }
    }
}

/// Frames of one record; an empty record yields nothing.
fn split_record(data: &[u8]) -> VecDeque<Vec<u8>> {
    let (frames, rest) = split_frames(data);
    let mut queued: VecDeque<Vec<u8>> = frames.into_iter().map(<[u8]>::to_vec).collect();
    if !rest.is_empty() {
        queued.push_back(rest.to_vec());
    }
    queued
}

fn truncated(needed: usize, available: usize) -> ProtocolError {
    ProtocolError::FormatError(format!(
        "{} (needed {needed} bytes, found {available})",
        constants::ERR_TRUNCATED_RECORD
    ))
}

fn read_header_bytes<R: Read>(reader: &mut R, buf: &mut [u8]) -> Result<()> {
    reader.read_exact(buf).map_err(|e| match e.kind() {
        io::ErrorKind::UnexpectedEof => {
            ProtocolError::FormatError(constants::ERR_BAD_MAGIC.to_string())
        }
        _ => e.into(),
    })
}

fn read_header_byte<R: Read>(reader: &mut R) -> Result<u8> {
    let mut byte = [0u8; 1];
    read_header_bytes(reader, &mut byte)?;
    Ok(byte[0])
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used, clippy::expect_used)]
    use super::*;
    use crate::protocol::message::Packet;
    use std::io::Cursor;

    fn header(version: u8) -> Vec<u8> {
        let mut out = b"PPAC".to_vec();
        out.push(version);
        out
    }

    #[test]
    fn version_one_files_use_second_timestamps_and_ngs() {
        let mut file = header(1);
        file.extend_from_slice(&42u64.to_le_bytes());
        file.push(1);
        file.extend_from_slice(&8u64.to_le_bytes());
        file.extend_from_slice(&[8, 0, 0, 0, 0x03, 0x0B, 0, 0]);

        let mut reader = CaptureReader::new(Cursor::new(file), OutputType::Packet).unwrap();
        assert_eq!(reader.dialect(), PacketDialect::Ngs);
        assert_eq!(reader.next(), ReadStatus::Parsed);
        let record = reader.take_record().unwrap();
        assert_eq!(record.seconds(), 42);
        assert_eq!(record.direction, Direction::ToClient);
        assert!(record.data.is_none());
        assert_eq!(reader.next(), ReadStatus::EndOfFile);
    }

    #[test]
    fn rejects_bad_headers() {
        assert!(matches!(
            CaptureReader::new(Cursor::new(b"PCAP\x04".to_vec()), OutputType::Raw),
            Err(ProtocolError::FormatError(_))
        ));
        assert!(matches!(
            CaptureReader::new(Cursor::new(header(9)), OutputType::Raw),
            Err(ProtocolError::UnsupportedVersion(9))
        ));
        let mut raw_dialect = header(3);
        raw_dialect.push(5);
        assert!(matches!(
            CaptureReader::new(Cursor::new(raw_dialect), OutputType::Raw),
            Err(ProtocolError::InvalidDialect(5))
        ));
    }

    #[test]
    fn undecodable_record_falls_back_to_raw() {
        let mut file = header(3);
        file.push(0);
        file.extend_from_slice(&0u128.to_le_bytes());
        file.push(0);
        file.extend_from_slice(&9u64.to_le_bytes());
        file.extend_from_slice(&[9, 0, 0, 0, 0x03, 0x0B, 0, 0, 0xFF]);

        let mut reader = CaptureReader::new(Cursor::new(file), OutputType::Packet).unwrap();
        assert_eq!(reader.next(), ReadStatus::RawOnly);
        let record = reader.record().unwrap();
        assert!(record.packet.is_none());
        assert!(record.parse_error.is_some());
        assert_eq!(record.data.as_deref().map(<[u8]>::len), Some(9));
        assert!(reader.last_error().is_none());
    }

    #[test]
    fn concatenated_frames_come_out_one_by_one() {
        let mut file = header(3);
        file.push(0);
        file.extend_from_slice(&7_000_000_000u128.to_le_bytes());
        file.push(1);
        file.extend_from_slice(&21u64.to_le_bytes());
        file.extend_from_slice(&[8, 0, 0, 0, 0x03, 0x04, 0, 0]);
        file.extend_from_slice(&[8, 0, 0, 0, 0x03, 0x03, 0, 0]);
        file.extend_from_slice(&[0xDE, 0xAD, 0xBE, 0xEF, 0x01]);
        file.extend_from_slice(&8_000_000_000u128.to_le_bytes());
        file.push(0);
        file.extend_from_slice(&0u64.to_le_bytes());

        let mut reader = CaptureReader::new(Cursor::new(file), OutputType::Packet).unwrap();
        for expected in [Packet::LoadingScreenTransition {}, Packet::InitialLoad {}] {
            assert_eq!(reader.next(), ReadStatus::Parsed);
            let record = reader.take_record().unwrap();
            assert_eq!(record.seconds(), 7);
            assert_eq!(record.direction, Direction::ToClient);
            assert_eq!(record.packet.unwrap().packet(), &expected);
        }
        assert_eq!(reader.next(), ReadStatus::RawOnly);
        let leftover = reader.take_record().unwrap();
        assert_eq!(leftover.data.as_deref(), Some(&[0xDE, 0xAD, 0xBE, 0xEF, 0x01][..]));
        assert!(leftover.parse_error.is_some());

        // an empty record still decodes to the empty packet
        assert_eq!(reader.next(), ReadStatus::Parsed);
        let empty = reader.take_record().unwrap();
        assert_eq!(empty.seconds(), 8);
        assert_eq!(empty.packet.unwrap().packet(), &Packet::None {});
        assert_eq!(reader.next(), ReadStatus::EndOfFile);
    }

    #[test]
    fn truncated_timestamp_is_not_end_of_file() {
        let mut file = header(2);
        file.extend_from_slice(&[1, 2, 3]);
        let mut reader = CaptureReader::new(Cursor::new(file), OutputType::Raw).unwrap();
        assert_eq!(reader.next(), ReadStatus::FormatError);
        assert_eq!(reader.next(), ReadStatus::FormatError);
        assert!(reader.last_error().is_some());
    }
}
