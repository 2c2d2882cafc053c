//! Capture writer producing version 4 files.

use crate::capture::Direction;
use crate::config::{CaptureConfig, CodecConfig, CAPTURE_MAGIC, CAPTURE_VERSION};
use crate::core::codec::PacketCodec;
use crate::core::packet::split_frames;
use crate::error::{constants, ErrorSlot, ProtocolError, Result};
use crate::protocol::dialect::PacketDialect;
use crate::protocol::message::PacketModel;
use crate::utils::metrics::{global_metrics, Timer};
use std::fs::File;
use std::io::{self, BufWriter, Seek, SeekFrom, Write};
use std::path::Path;
use std::time::Duration;
use tracing::{debug, instrument};

/// Offset of the dialect byte in the header.
const DIALECT_OFFSET: u64 = 5;

enum WriterWrapper<W: Write> {
    Plain(W),
    Zstd(zstd::stream::write::Encoder<'static, W>),
}

impl<W: Write> WriterWrapper<W> {
    fn finish(self) -> io::Result<W> {
        match self {
            WriterWrapper::Plain(mut w) => {
                w.flush()?;
                Ok(w)
            }
            WriterWrapper::Zstd(e) => e.finish(),
        }
    }

    /// The uncompressed file underneath.
    fn inner_mut(&mut self) -> &mut W {
        match self {
            WriterWrapper::Plain(w) => w,
            WriterWrapper::Zstd(e) => e.get_mut(),
        }
    }
}

impl<W: Write> Write for WriterWrapper<W> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        match self {
            WriterWrapper::Plain(w) => w.write(buf),
            WriterWrapper::Zstd(e) => e.write(buf),
        }
    }

    fn flush(&mut self) -> io::Result<()> {
        match self {
            WriterWrapper::Plain(w) => w.flush(),
            WriterWrapper::Zstd(e) => e.flush(),
        }
    }
}

/// Appends records to a capture file.
///
/// Dropping an unfinished writer finishes it and ignores any error; call
/// [`finish`](Self::finish) to observe them.
pub struct CaptureWriter<W: Write = BufWriter<File>> {
    output: Option<WriterWrapper<W>>,
    dialect: PacketDialect,
    codec: PacketCodec,
    compressed: bool,
    error: ErrorSlot,
}

impl CaptureWriter<BufWriter<File>> {
    /// Create (or truncate) a capture file on disk.
    #[instrument(skip(path, config), fields(path = %path.as_ref().display()))]
    pub fn create<P: AsRef<Path>>(
        path: P,
        dialect: PacketDialect,
        config: &CaptureConfig,
    ) -> Result<Self> {
        let file = BufWriter::new(File::create(path)?);
        Self::new(file, dialect, config)
    }
}

impl<W: Write> CaptureWriter<W> {
    /// Write the header and prepare for records. Raw dialect captures are rejected.
    pub fn new(mut writer: W, dialect: PacketDialect, config: &CaptureConfig) -> Result<Self> {
        let dialect_id = dialect.capture_id()?;
        writer.write_all(&CAPTURE_MAGIC)?;
        writer.write_all(&[CAPTURE_VERSION, dialect_id, u8::from(config.compress)])?;

        let output = if config.compress {
            WriterWrapper::Zstd(zstd::stream::write::Encoder::new(
                writer,
                config.compression_level,
            )?)
        } else {
            WriterWrapper::Plain(writer)
        };
        debug!(%dialect, compressed = config.compress, "Created capture");

        let mut codec = PacketCodec::with_config(CodecConfig::default());
        codec.set_dialect(dialect);
        Ok(Self {
            output: Some(output),
            dialect,
            codec,
            compressed: config.compress,
            error: ErrorSlot::default(),
        })
    }

    pub fn dialect(&self) -> PacketDialect {
        self.dialect
    }

    pub fn is_compressed(&self) -> bool {
        self.compressed
    }

    /// Message of the most recent failed call, `None` after a success.
    pub fn last_error(&self) -> Option<&str> {
        self.error.get()
    }

    /// Encode `model` under the capture's dialect and append it.
    pub fn write_packet(
        &mut self,
        timestamp: Duration,
        direction: Direction,
        model: &PacketModel,
    ) -> Result<()> {
        let result = self
            .codec
            .encode_raw(model)
            .and_then(|frame| self.append(timestamp, direction, &frame));
        self.error.record(result)
    }

    /// Append every frame in `data`, split by their length fields.
    ///
    /// A frame declaring more bytes than remain, or fewer than a header, is
    /// a [`ProtocolError::CorruptedPacket`]; frames before it are kept. Up to
    /// four trailing bytes that cannot hold a length are ignored.
    pub fn write_data(&mut self, timestamp: Duration, direction: Direction, data: &[u8]) -> Result<()> {
        let result = self.append_frames(timestamp, direction, data);
        self.error.record(result)
    }

    /// Append `data` as a single record without inspecting it.
    pub fn write_data_unchecked(
        &mut self,
        timestamp: Duration,
        direction: Direction,
        data: &[u8],
    ) -> Result<()> {
        let result = self.append(timestamp, direction, data);
        self.error.record(result)
    }

    /// Flush and close the record stream, returning the underlying writer.
    pub fn finish(&mut self) -> Result<W> {
        let _timer = Timer::start("capture_finish");
        let result = match self.output.take() {
            Some(output) => output.finish().map_err(ProtocolError::from),
            None => Err(ProtocolError::FormatError(
                constants::ERR_WRITER_FINISHED.to_string(),
            )),
        };
        self.error.record(result)
    }

    fn append_frames(&mut self, timestamp: Duration, direction: Direction, data: &[u8]) -> Result<()> {
        let (frames, rest) = split_frames(data);
        for frame in frames {
            self.append(timestamp, direction, frame)?;
        }
        if rest.len() > 4 {
            return Err(ProtocolError::CorruptedPacket);
        }
        Ok(())
    }

    fn append(&mut self, timestamp: Duration, direction: Direction, frame: &[u8]) -> Result<()> {
        let output = self.output.as_mut().ok_or_else(|| {
            ProtocolError::FormatError(constants::ERR_WRITER_FINISHED.to_string())
        })?;
        output.write_all(&timestamp.as_nanos().to_le_bytes())?;
        output.write_all(&[direction.to_byte()])?;
        output.write_all(&(frame.len() as u64).to_le_bytes())?;
        output.write_all(frame)?;
        global_metrics().capture_record_written();
        Ok(())
    }
}

impl<W: Write + Seek> CaptureWriter<W> {
    /// Rewrite the dialect stored in the header; later packets encode under it.
    pub fn change_dialect(&mut self, dialect: PacketDialect) -> Result<()> {
        let result = self.rewrite_dialect(dialect);
        self.error.record(result)
    }

    fn rewrite_dialect(&mut self, dialect: PacketDialect) -> Result<()> {
        let id = dialect.capture_id()?;
        let output = self.output.as_mut().ok_or_else(|| {
            ProtocolError::FormatError(constants::ERR_WRITER_FINISHED.to_string())
        })?;
        let file = output.inner_mut();
        let position = file.stream_position()?;
        file.seek(SeekFrom::Start(DIALECT_OFFSET))?;
        file.write_all(&[id])?;
        file.seek(SeekFrom::Start(position))?;

        debug!(from = %self.dialect, to = %dialect, "Capture dialect changed");
        self.dialect = dialect;
        self.codec.set_dialect(dialect);
        Ok(())
    }
}

impl<W: Write> Drop for CaptureWriter<W> {
    fn drop(&mut self) {
        if let Some(output) = self.output.take() {
            let _ = output.finish();
        }
    }
}
