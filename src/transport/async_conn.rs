//! Readiness-driven connection on tokio.
//!
//! Same framing and key exchange as [`Connection`](super::Connection), but
//! waits for socket readiness instead of returning `Blocked`.

use crate::config::ProtocolConfig;
use crate::core::codec::PacketCodec;
use crate::error::{ProtocolError, Result};
use crate::protocol::dialect::PacketDialect;
use crate::protocol::handshake::HandshakeKeys;
use crate::protocol::message::PacketModel;
use crate::transport::framing::Framer;
use crate::utils::metrics::global_metrics;
use bytes::BytesMut;
use std::net::IpAddr;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::time::timeout;
use tracing::{debug, instrument};

#[derive(Debug)]
pub struct AsyncConnection {
    stream: TcpStream,
    peer: Option<IpAddr>,
    framer: Framer,
    inbound: BytesMut,
    read_chunk: usize,
}

impl AsyncConnection {
    pub fn new(stream: TcpStream, codec: PacketCodec, keys: HandshakeKeys, read_chunk: usize) -> Self {
        let peer = stream.peer_addr().ok().map(|addr| addr.ip());
        global_metrics().connection_established();
        Self {
            stream,
            peer,
            framer: Framer::new(codec, keys),
            inbound: BytesMut::with_capacity(read_chunk),
            read_chunk: read_chunk.max(1),
        }
    }

    /// Connect using the address, timeout, keys and codec settings of `config`.
    #[instrument(skip(config), fields(address = %config.connection.address))]
    pub async fn connect(config: &ProtocolConfig, dialect: PacketDialect) -> Result<Self> {
        let settings = &config.connection;
        let stream = timeout(settings.connect_timeout, TcpStream::connect(&settings.address))
            .await
            .map_err(|_| {
                ProtocolError::Io(std::io::Error::new(
                    std::io::ErrorKind::TimedOut,
                    "connect timed out",
                ))
            })??;
        let keys = if dialect.is_raw() {
            HandshakeKeys::default()
        } else {
            HandshakeKeys::load(settings.decrypt_key.as_deref(), settings.encrypt_key.as_deref())?
                .with_suite(settings.cipher)
        };
        let mut codec = PacketCodec::with_config(config.codec.clone());
        codec.set_dialect(dialect);
        debug!(%dialect, "Async connection established");
        Ok(Self::new(stream, codec, keys, settings.read_chunk_size))
    }

    /// Adopt a std stream, e.g. one finalized out of a `ConnectionManager` handle.
    pub fn from_std(
        stream: std::net::TcpStream,
        codec: PacketCodec,
        keys: HandshakeKeys,
        read_chunk: usize,
    ) -> Result<Self> {
        stream.set_nonblocking(true)?;
        Ok(Self::new(TcpStream::from_std(stream)?, codec, keys, read_chunk))
    }

    pub fn dialect(&self) -> PacketDialect {
        self.framer.dialect()
    }

    pub fn set_dialect(&mut self, dialect: PacketDialect) {
        self.framer.set_dialect(dialect);
    }

    pub fn peer_ip(&self) -> Option<IpAddr> {
        self.peer
    }

    pub fn get_key(&self) -> Vec<u8> {
        self.framer.key()
    }

    /// Wait for the next complete frame.
    pub async fn read_packet(&mut self) -> Result<PacketModel> {
        loop {
            if let Some(model) = self.framer.next_packet(&mut self.inbound)? {
                return Ok(model);
            }
            self.inbound.reserve(self.read_chunk);
            let n = self.stream.read_buf(&mut self.inbound).await?;
            if n == 0 {
                return Err(ProtocolError::ConnectionClosed);
            }
            global_metrics().bytes_read(n as u64);
        }
    }

    /// Encode, seal if a session exists, and write the whole frame.
    pub async fn write_packet(&mut self, model: &PacketModel) -> Result<()> {
        let bytes = self.framer.encode_packet(model)?;
        self.stream.write_all(&bytes).await?;
        self.stream.flush().await?;
        global_metrics().frame_sent();
        global_metrics().bytes_written(bytes.len() as u64);
        Ok(())
    }

    pub async fn shutdown(mut self) -> Result<()> {
        self.stream.shutdown().await?;
        Ok(())
    }
}

impl Drop for AsyncConnection {
    fn drop(&mut self) {
        global_metrics().connection_closed();
    }
}
