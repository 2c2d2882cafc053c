//! # Transport Layer
//!
//! Sockets, framing and encryption for one connection speaking one dialect.
//!
//! ## Components
//! - **Socket**: [`ConnectionManager`](socket::ConnectionManager) creates, accepts and
//!   hands over OS sockets, then builds connections from them
//! - **Framing**: splits inbound bytes into frames and seals outbound ones,
//!   running the key exchange when its packet passes through
//! - **Connection**: caller-polled, nonblocking read/write state machine
//! - **Async**: the same framing driven by tokio readiness
//!
//! ## Polling
//! Nothing here retries or sleeps. A nonblocking call that cannot make
//! progress returns [`SocketResult::Blocked`] and the caller polls again.

pub mod async_conn;
pub mod connection;
pub mod framing;
pub mod socket;

pub use connection::{Connection, ConnectionState};
pub use socket::{ConnectionManager, SocketHandle};

/// Outcome of one socket poll.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SocketResult {
    /// The operation completed
    Ready,
    /// Retry later; nothing was lost
    Blocked,
    /// No socket is attached to perform the operation on
    NoSocket,
    /// The operation failed; see the owner's last error
    SocketError,
}

impl SocketResult {
    pub fn is_ready(self) -> bool {
        self == SocketResult::Ready
    }

    pub fn is_blocked(self) -> bool {
        self == SocketResult::Blocked
    }
}
