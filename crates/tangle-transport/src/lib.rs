//! Transport abstraction layer for Tangle.
//!
//! Two kinds of connection sit under a room:
//!
//! - the **control connection** to the matchmaking server, abstracted by
//!   [`Connector`] and [`Connection`] (text frames over a persistent,
//!   reliable connection), and
//! - one **peer link** per remote participant, abstracted by
//!   [`PeerTransport`] and [`PeerLink`] (an ordered, reliable data channel
//!   plus the negotiation steps needed to open it).
//!
//! # Feature Flags
//!
//! - `websocket` (default): control connection over WebSocket via
//!   `tokio-tungstenite`
//! - `tls` (default): enables `wss://` URLs (rustls with the `ring`
//!   provider and webpki roots)

mod error;
mod peer;
#[cfg(feature = "websocket")]
mod websocket;

pub use error::TransportError;
pub use peer::{IceServer, LinkId, PeerEvent, PeerEvents, PeerLink, PeerTransport};
#[cfg(feature = "websocket")]
pub use websocket::{WebSocketConnection, WebSocketConnector};

use std::fmt;
use std::future::Future;

/// Opaque identifier for a control connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ConnectionId(u64);

impl ConnectionId {
    /// Creates a new `ConnectionId` from a raw `u64`.
    pub fn new(id: u64) -> Self {
        Self(id)
    }

    /// Returns the underlying `u64` value.
    pub fn into_inner(self) -> u64 {
        self.0
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "conn-{}", self.0)
    }
}

/// Opens control connections to the matchmaking server.
pub trait Connector: Send + Sync + 'static {
    /// The connection type produced by this connector.
    type Connection: Connection;
    /// The error type for connect attempts.
    type Error: std::error::Error + Send + Sync + 'static;

    /// Opens a new connection to `url`.
    fn connect(
        &self,
        url: &str,
    ) -> impl Future<Output = Result<Self::Connection, Self::Error>> + Send;
}

/// A single control connection that carries text frames.
///
/// `send` and `recv` may be in flight at the same time.
pub trait Connection: Send + Sync + 'static {
    /// The error type for connection operations.
    type Error: std::error::Error + Send + Sync + 'static;

    /// Sends one text frame.
    fn send(&self, text: &str) -> impl Future<Output = Result<(), Self::Error>> + Send;

    /// Receives the next text frame.
    ///
    /// Returns `Ok(None)` when the connection is cleanly closed.
    fn recv(&self) -> impl Future<Output = Result<Option<String>, Self::Error>> + Send;

    /// Closes the connection.
    fn close(&self) -> impl Future<Output = Result<(), Self::Error>> + Send;

    /// Returns the unique identifier for this connection.
    fn id(&self) -> ConnectionId;
}
