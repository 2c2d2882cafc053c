//! Socket creation, acceptance and hand-over.
//!
//! [`ConnectionManager`] holds at most one listener and one stream. Both can
//! be extracted as a [`SocketHandle`], passed elsewhere (another manager,
//! another component, a duplicate kept for shutdown) and absorbed again.
//! Extracting never closes a socket; only [`SocketHandle::close`] or
//! dropping the last owner does.

use crate::config::{CodecConfig, ConnectionConfig, ProtocolConfig};
use crate::core::codec::PacketCodec;
use crate::error::{constants, ErrorSlot, ProtocolError, Result};
use crate::protocol::dialect::PacketDialect;
use crate::protocol::handshake::HandshakeKeys;
use crate::transport::connection::Connection;
use crate::transport::SocketResult;
use crate::utils::metrics::global_metrics;
use std::io;
use std::net::{IpAddr, SocketAddr, TcpListener, TcpStream, ToSocketAddrs};
use std::path::Path;
use tracing::{debug, info, instrument, warn};

#[cfg(unix)]
use std::os::fd::{AsRawFd, OwnedFd, RawFd};
#[cfg(windows)]
use std::os::windows::io::{AsRawSocket, OwnedSocket, RawSocket};

#[cfg(unix)]
type OwnedHandle = OwnedFd;
#[cfg(windows)]
type OwnedHandle = OwnedSocket;

/// Owned OS socket detached from any std wrapper.
#[derive(Debug)]
pub struct SocketHandle(OwnedHandle);

impl SocketHandle {
    /// Duplicate the handle; both copies refer to the same socket.
    pub fn try_clone(&self) -> Result<Self> {
        Ok(Self(self.0.try_clone()?))
    }

    /// Close this handle. The socket itself closes once every duplicate is closed.
    pub fn close(self) {
        drop(self);
    }

    pub fn into_stream(self) -> TcpStream {
        TcpStream::from(self.0)
    }

    pub fn into_listener(self) -> TcpListener {
        TcpListener::from(self.0)
    }

    #[cfg(unix)]
    pub fn as_raw(&self) -> RawFd {
        self.0.as_raw_fd()
    }

    #[cfg(windows)]
    pub fn as_raw(&self) -> RawSocket {
        self.0.as_raw_socket()
    }
}

impl From<TcpStream> for SocketHandle {
    fn from(stream: TcpStream) -> Self {
        Self(OwnedHandle::from(stream))
    }
}

impl From<TcpListener> for SocketHandle {
    fn from(listener: TcpListener) -> Self {
        Self(OwnedHandle::from(listener))
    }
}

/// Creates sockets and turns them into [`Connection`]s.
#[derive(Debug, Default)]
pub struct ConnectionManager {
    listener: Option<TcpListener>,
    stream: Option<TcpStream>,
    settings: ConnectionConfig,
    codec_settings: CodecConfig,
    error: ErrorSlot,
}

impl ConnectionManager {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_config(config: &ProtocolConfig) -> Self {
        Self {
            settings: config.connection.clone(),
            codec_settings: config.codec.clone(),
            ..Self::default()
        }
    }

    /// Message of the most recent failed call, `None` after a success.
    pub fn last_error(&self) -> Option<&str> {
        self.error.get()
    }

    /// Bind a listener, replacing any listener held so far.
    #[instrument(skip(self))]
    pub fn create_listener(&mut self, address: &str) -> SocketResult {
        let nonblocking = self.settings.nonblocking;
        let result = TcpListener::bind(address).and_then(|listener| {
            listener.set_nonblocking(nonblocking)?;
            Ok(listener)
        });
        match self.error.record(result.map_err(ProtocolError::from)) {
            Ok(listener) => {
                info!(address, nonblocking, "Listening");
                self.listener = Some(listener);
                SocketResult::Ready
            }
            Err(_) => SocketResult::SocketError,
        }
    }

    pub fn listener_addr(&self) -> Option<SocketAddr> {
        self.listener.as_ref().and_then(|l| l.local_addr().ok())
    }

    pub fn set_listener_nonblocking(&mut self, nonblocking: bool) -> SocketResult {
        self.error.clear();
        let Some(listener) = &self.listener else {
            self.error.set_message(constants::ERR_NO_LISTENER);
            return SocketResult::NoSocket;
        };
        let result = listener.set_nonblocking(nonblocking).map_err(ProtocolError::from);
        status(&mut self.error, result)
    }

    /// Poll for one inbound connection; the accepted stream replaces the held stream.
    pub fn accept(&mut self) -> SocketResult {
        self.error.clear();
        let Some(listener) = &self.listener else {
            self.error.set_message(constants::ERR_NO_LISTENER);
            return SocketResult::NoSocket;
        };
        match listener.accept() {
            Ok((stream, peer)) => {
                if let Err(e) = stream.set_nonblocking(self.settings.nonblocking) {
                    self.error.set(&e.into());
                    return SocketResult::SocketError;
                }
                debug!(%peer, "Accepted connection");
                self.stream = Some(stream);
                SocketResult::Ready
            }
            Err(e) if e.kind() == io::ErrorKind::WouldBlock => SocketResult::Blocked,
            Err(e) => {
                warn!(error = %e, "Accept failed");
                global_metrics().connection_error();
                self.error.set(&e.into());
                SocketResult::SocketError
            }
        }
    }

    /// Connect to `address`, waiting at most the configured connect timeout.
    ///
    /// The stream is switched to nonblocking mode afterwards when configured.
    #[instrument(skip(self))]
    pub fn create_stream(&mut self, address: &str) -> SocketResult {
        let result = self.connect(address);
        match self.error.record(result) {
            Ok(stream) => {
                info!(address, "Connected");
                self.stream = Some(stream);
                SocketResult::Ready
            }
            Err(e) => {
                warn!(error = %e, "Connect failed");
                global_metrics().connection_error();
                SocketResult::SocketError
            }
        }
    }

    fn connect(&self, address: &str) -> Result<TcpStream> {
        let mut last = None;
        for addr in address.to_socket_addrs()? {
            match TcpStream::connect_timeout(&addr, self.settings.connect_timeout) {
                Ok(stream) => {
                    stream.set_nonblocking(self.settings.nonblocking)?;
                    return Ok(stream);
                }
                Err(e) => last = Some(e),
            }
        }
        Err(last
            .map(ProtocolError::from)
            .unwrap_or_else(|| ProtocolError::ConfigError(format!("No address for '{address}'"))))
    }

    pub fn set_stream_nonblocking(&mut self, nonblocking: bool) -> SocketResult {
        self.error.clear();
        let Some(stream) = &self.stream else {
            self.error.set_message(constants::ERR_NO_STREAM);
            return SocketResult::NoSocket;
        };
        let result = stream.set_nonblocking(nonblocking).map_err(ProtocolError::from);
        status(&mut self.error, result)
    }

    pub fn stream_peer_ip(&self) -> Option<IpAddr> {
        self.stream
            .as_ref()
            .and_then(|s| s.peer_addr().ok())
            .map(|addr| addr.ip())
    }

    pub fn take_stream_handle(&mut self) -> Option<SocketHandle> {
        self.stream.take().map(SocketHandle::from)
    }

    pub fn take_listener_handle(&mut self) -> Option<SocketHandle> {
        self.listener.take().map(SocketHandle::from)
    }

    /// Absorb a stream handle; a previously held stream is closed.
    pub fn set_stream_handle(&mut self, handle: SocketHandle) {
        self.stream = Some(handle.into_stream());
    }

    /// Absorb a listener handle; a previously held listener is closed.
    pub fn set_listener_handle(&mut self, handle: SocketHandle) {
        self.listener = Some(handle.into_listener());
    }

    /// Build a connection around `handle`.
    ///
    /// Key paths are PEM-encoded PKCS#8 files; the private key opens inbound
    /// key exchanges and the public key seals outbound ones. Raw dialect
    /// connections ignore both. Returns `None` and records the error when a
    /// key cannot be loaded.
    #[instrument(skip(self, handle, decrypt_key, encrypt_key))]
    pub fn finalize(
        &mut self,
        handle: SocketHandle,
        dialect: PacketDialect,
        decrypt_key: Option<&Path>,
        encrypt_key: Option<&Path>,
    ) -> Option<Connection> {
        let result = self.build(handle.into_stream(), dialect, decrypt_key, encrypt_key);
        self.error.record(result).ok()
    }

    /// [`finalize`](Self::finalize) the stream held by this manager.
    pub fn finalize_stream(
        &mut self,
        dialect: PacketDialect,
        decrypt_key: Option<&Path>,
        encrypt_key: Option<&Path>,
    ) -> Option<Connection> {
        match self.take_stream_handle() {
            Some(handle) => self.finalize(handle, dialect, decrypt_key, encrypt_key),
            None => {
                self.error.set_message(constants::ERR_NO_STREAM);
                None
            }
        }
    }

    fn build(
        &self,
        stream: TcpStream,
        dialect: PacketDialect,
        decrypt_key: Option<&Path>,
        encrypt_key: Option<&Path>,
    ) -> Result<Connection> {
        let keys = if dialect.is_raw() {
            HandshakeKeys::default()
        } else {
            HandshakeKeys::load(decrypt_key, encrypt_key)?.with_suite(self.settings.cipher)
        };
        let mut codec = PacketCodec::with_config(self.codec_settings.clone());
        codec.set_dialect(dialect);

        let connection = Connection::from_tcp(stream, codec, keys, self.settings.read_chunk_size)?;
        info!(
            %dialect,
            peer = ?connection.peer_ip(),
            "Connection established"
        );
        Ok(connection)
    }
}

fn status(slot: &mut ErrorSlot, result: Result<()>) -> SocketResult {
    match slot.record(result) {
        Ok(()) => SocketResult::Ready,
        Err(_) => SocketResult::SocketError,
    }
}
