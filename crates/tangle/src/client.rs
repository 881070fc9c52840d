//! Builder for joining a room with the default stack.

use std::time::Duration;

use tangle_protocol::Gzip;
use tangle_room::{Room, RoomCallbacks, RoomConfig, RoomState};
use tangle_transport::{IceServer, PeerTransport, WebSocketConnector};

use crate::{PeerId, TangleError};

/// Builder for configuring and joining a room.
///
/// The control connection runs over WebSocket and large messages are
/// gzip-compressed. The peer transport is supplied by the application.
///
/// # Example
///
/// ```rust,ignore
/// use tangle::prelude::*;
///
/// let room = RoomBuilder::new()
///     .server_url("ws://127.0.0.1:8080")
///     .room_name("lobby")
///     .on_message(|peer, bytes| println!("{peer}: {} bytes", bytes.len()))
///     .connect(my_peer_transport)
///     .await?;
/// room.send(b"hello".to_vec(), None).await?;
/// ```
#[derive(Debug, Default)]
pub struct RoomBuilder {
    config: RoomConfig,
    callbacks: RoomCallbacks,
}

impl RoomBuilder {
    /// Creates a builder with default settings.
    pub fn new() -> Self {
        Self::default()
    }

    /// Replaces the whole configuration.
    pub fn config(mut self, config: RoomConfig) -> Self {
        self.config = config;
        self
    }

    /// Sets the matchmaking server address.
    pub fn server_url(mut self, url: impl Into<String>) -> Self {
        self.config.server_url = url.into();
        self
    }

    /// Sets the room to join.
    pub fn room_name(mut self, name: impl Into<String>) -> Self {
        self.config.room_name = name.into();
        self
    }

    /// Replaces the ICE server list.
    pub fn ice_servers(mut self, servers: Vec<IceServer>) -> Self {
        self.config.ice_servers = servers;
        self
    }

    /// Delays every message callback by `delay`.
    pub fn message_delay(mut self, delay: Duration) -> Self {
        self.config.message_delay = delay;
        self
    }

    /// Sets the state-change callback.
    pub fn on_state_change(mut self, f: impl Fn(RoomState) + Send + Sync + 'static) -> Self {
        self.callbacks = self.callbacks.on_state_change(f);
        self
    }

    /// Sets the peer-joined callback.
    pub fn on_peer_joined(mut self, f: impl Fn(PeerId) + Send + Sync + 'static) -> Self {
        self.callbacks = self.callbacks.on_peer_joined(f);
        self
    }

    /// Sets the peer-left callback.
    pub fn on_peer_left(mut self, f: impl Fn(PeerId, u64) + Send + Sync + 'static) -> Self {
        self.callbacks = self.callbacks.on_peer_left(f);
        self
    }

    /// Sets the message callback.
    pub fn on_message(mut self, f: impl Fn(PeerId, Vec<u8>) + Send + Sync + 'static) -> Self {
        self.callbacks = self.callbacks.on_message(f);
        self
    }

    /// Starts the room.
    pub async fn connect<T: PeerTransport>(self, transport: T) -> Result<Room, TangleError> {
        let room = Room::setup_with(
            self.config,
            self.callbacks,
            WebSocketConnector,
            transport,
            std::sync::Arc::new(Gzip),
        )
        .await?;
        tracing::debug!("room started with WebSocket signaling and gzip");
        Ok(room)
    }
}
