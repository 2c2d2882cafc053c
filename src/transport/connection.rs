//! Caller-polled connection over one socket.
//!
//! ## States
//! ```text
//! Idle --read (partial)--> Reading --read (frame done)--> Ready --take_packet--> Idle
//! Idle --write (partial flush)--> Blocked --write(None) (flushed)--> Idle
//! Ready --take_packet (output still buffered)--> Blocked
//! any --I/O or decode failure--> Errored        any --close--> Closed
//! ```
//!
//! Reads and writes never wait on their own. With a nonblocking socket a
//! call that cannot finish returns [`SocketResult::Blocked`] and keeps all
//! buffered bytes for the next call.

use crate::core::codec::PacketCodec;
use crate::error::{constants, ErrorSlot, ProtocolError, Result};
use crate::protocol::dialect::PacketDialect;
use crate::protocol::handshake::HandshakeKeys;
use crate::protocol::message::PacketModel;
use crate::transport::framing::Framer;
use crate::transport::SocketResult;
use crate::utils::metrics::global_metrics;
use bytes::{Buf, BytesMut};
use std::io::{self, Read, Write};
use std::net::{IpAddr, Shutdown, TcpStream};
use tracing::{debug, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Idle,
    /// Part of a frame is buffered
    Reading,
    /// A decoded packet waits in `take_packet`
    Ready,
    /// Outbound bytes are still buffered
    Blocked,
    Closed,
    Errored,
}

/// Framed, optionally encrypted packet stream over `S`.
#[derive(Debug)]
pub struct Connection<S: Read + Write = TcpStream> {
    stream: Option<S>,
    peer: Option<IpAddr>,
    framer: Framer,
    inbound: BytesMut,
    outbound: BytesMut,
    pending: Option<PacketModel>,
    read_chunk: usize,
    state: ConnectionState,
    error: ErrorSlot,
}

impl Connection<TcpStream> {
    pub fn from_tcp(
        stream: TcpStream,
        codec: PacketCodec,
        keys: HandshakeKeys,
        read_chunk: usize,
    ) -> Result<Self> {
        let peer = stream.peer_addr()?.ip();
        let mut connection = Self::new(stream, codec, keys, read_chunk);
        connection.peer = Some(peer);
        Ok(connection)
    }

    /// Shut down both directions, then release the socket.
    pub fn shutdown(&mut self) {
        if let Some(stream) = &self.stream {
            let _ = stream.shutdown(Shutdown::Both);
        }
        self.close();
    }
}

impl<S: Read + Write> Connection<S> {
    pub fn new(stream: S, codec: PacketCodec, keys: HandshakeKeys, read_chunk: usize) -> Self {
        global_metrics().connection_established();
        Self {
            stream: Some(stream),
            peer: None,
            framer: Framer::new(codec, keys),
            inbound: BytesMut::with_capacity(read_chunk),
            outbound: BytesMut::new(),
            pending: None,
            read_chunk: read_chunk.max(1),
            state: ConnectionState::Idle,
            error: ErrorSlot::default(),
        }
    }

    pub fn state(&self) -> ConnectionState {
        self.state
    }

    pub fn dialect(&self) -> PacketDialect {
        self.framer.dialect()
    }

    /// Switch dialect for frames decoded and encoded from now on.
    pub fn set_dialect(&mut self, dialect: PacketDialect) {
        self.error.clear();
        self.framer.set_dialect(dialect);
    }

    pub fn peer_ip(&self) -> Option<IpAddr> {
        self.peer
    }

    /// Message of the most recent failed call, `None` after a success.
    pub fn last_error(&self) -> Option<&str> {
        self.error.get()
    }

    /// Session secret negotiated by the key exchange, empty before one.
    pub fn get_key(&self) -> Vec<u8> {
        self.framer.key()
    }

    pub fn is_encrypted(&self) -> bool {
        self.framer.is_encrypted()
    }

    /// Bytes accepted by `write` but not yet flushed.
    pub fn pending_output(&self) -> usize {
        self.outbound.len()
    }

    pub fn get_ref(&self) -> Option<&S> {
        self.stream.as_ref()
    }

    pub fn get_mut(&mut self) -> Option<&mut S> {
        self.stream.as_mut()
    }

    /// Packet decoded by the last `read` that returned `Ready`.
    pub fn take_packet(&mut self) -> Option<PacketModel> {
        let packet = self.pending.take();
        if packet.is_some() && self.state == ConnectionState::Ready {
            self.state = self.resting_state();
        }
        packet
    }

    /// State with no decoded packet waiting; unflushed output wins over partial input.
    fn resting_state(&self) -> ConnectionState {
        if !self.outbound.is_empty() {
            ConnectionState::Blocked
        } else if self.inbound.is_empty() {
            ConnectionState::Idle
        } else {
            ConnectionState::Reading
        }
    }

    /// Pull bytes until one frame decodes or the socket would block.
    ///
    /// A packet decoded earlier but never taken is replaced.
    pub fn read(&mut self) -> SocketResult {
        self.error.clear();
        if self.stream.is_none() {
            self.error.set_message(constants::ERR_NO_STREAM);
            return SocketResult::NoSocket;
        }
        if self.state == ConnectionState::Errored {
            self.error.set_message("Connection is in an error state");
            return SocketResult::SocketError;
        }
        match self.read_frame() {
            Ok(Some(model)) => {
                self.pending = Some(model);
                self.state = ConnectionState::Ready;
                SocketResult::Ready
            }
            Ok(None) => {
                self.state = self.resting_state();
                SocketResult::Blocked
            }
            Err(e) => self.fail(e),
        }
    }

    fn read_frame(&mut self) -> Result<Option<PacketModel>> {
        if let Some(model) = self.framer.next_packet(&mut self.inbound)? {
            return Ok(Some(model));
        }
        let Some(stream) = self.stream.as_mut() else {
            return Err(ProtocolError::ConnectionClosed);
        };
        let mut chunk = vec![0u8; self.read_chunk];
        loop {
            match stream.read(&mut chunk) {
                Ok(0) => return Err(ProtocolError::ConnectionClosed),
                Ok(n) => {
                    global_metrics().bytes_read(n as u64);
                    self.inbound.extend_from_slice(&chunk[..n]);
                    if let Some(model) = self.framer.next_packet(&mut self.inbound)? {
                        return Ok(Some(model));
                    }
                }
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => return Ok(None),
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(e.into()),
            }
        }
    }

    /// Queue `packet` (if any) and flush as much buffered output as the socket takes.
    ///
    /// `None` only flushes. A partial flush returns `Blocked`; the rest stays
    /// buffered for the next call.
    pub fn write(&mut self, packet: Option<&PacketModel>) -> SocketResult {
        self.error.clear();
        if self.stream.is_none() {
            self.error.set_message(constants::ERR_NO_STREAM);
            return SocketResult::NoSocket;
        }
        if let Some(model) = packet {
            match self.framer.encode_packet(model) {
                Ok(bytes) => {
                    global_metrics().frame_sent();
                    self.outbound.extend_from_slice(&bytes);
                }
                Err(e) => {
                    // Encoding failures leave the connection usable.
                    self.error.set(&e);
                    return SocketResult::SocketError;
                }
            }
        }
        match self.flush() {
            Ok(true) => {
                if self.state == ConnectionState::Blocked {
                    self.state = self.resting_state();
                }
                SocketResult::Ready
            }
            Ok(false) => {
                self.state = ConnectionState::Blocked;
                SocketResult::Blocked
            }
            Err(e) => self.fail(e),
        }
    }

    /// Returns whether everything buffered was written.
    fn flush(&mut self) -> Result<bool> {
        let Some(stream) = self.stream.as_mut() else {
            return Err(ProtocolError::ConnectionClosed);
        };
        while !self.outbound.is_empty() {
            match stream.write(&self.outbound) {
                Ok(0) => {
                    return Err(io::Error::new(io::ErrorKind::WriteZero, constants::ERR_WRITE_ZERO)
                        .into())
                }
                Ok(n) => {
                    global_metrics().bytes_written(n as u64);
                    self.outbound.advance(n);
                }
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => return Ok(false),
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(e.into()),
            }
        }
        match stream.flush() {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == io::ErrorKind::WouldBlock => Ok(false),
            Err(e) => Err(e.into()),
        }
    }

    fn fail(&mut self, err: ProtocolError) -> SocketResult {
        warn!(error = %err, dialect = %self.dialect(), "Connection failed");
        global_metrics().connection_error();
        self.error.set(&err);
        self.state = ConnectionState::Errored;
        SocketResult::SocketError
    }

    /// Release the socket and drop every buffered byte.
    pub fn close(&mut self) {
        if self.stream.take().is_some() {
            debug!(dialect = %self.dialect(), "Connection closed");
            global_metrics().connection_closed();
        }
        self.inbound.clear();
        self.outbound.clear();
        self.pending = None;
        self.state = ConnectionState::Closed;
    }

    /// Detach the socket, discarding buffered state.
    pub fn into_inner(mut self) -> Option<S> {
        let stream = self.stream.take();
        if stream.is_some() {
            global_metrics().connection_closed();
        }
        stream
    }
}

impl<S: Read + Write> Drop for Connection<S> {
    fn drop(&mut self) {
        if self.stream.is_some() {
            global_metrics().connection_closed();
        }
    }
}
