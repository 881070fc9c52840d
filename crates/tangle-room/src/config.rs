//! Room configuration and state.

use std::fmt;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tangle_transport::IceServer;
use tracing::warn;

// ---------------------------------------------------------------------------
// RoomConfig
// ---------------------------------------------------------------------------

/// Configuration for a room.
///
/// Everything here is plain data; the callbacks an application wants fired
/// live in [`RoomCallbacks`](crate::RoomCallbacks).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RoomConfig {
    /// Address of the matchmaking server. A bare host is dialed as
    /// `wss://host`; a value with a scheme is used as-is.
    pub server_url: String,

    /// Name of the room to join.
    pub room_name: String,

    /// STUN/TURN servers handed to every peer link.
    pub ice_servers: Vec<IceServer>,

    /// How often a keep-alive is sent on the control connection.
    pub keep_alive_interval: Duration,

    /// Delay between losing the control connection and dialing again.
    pub reconnect_delay: Duration,

    /// Extra delay before a received message is delivered. Delivery is
    /// always deferred; this only lengthens the deferral.
    pub message_delay: Duration,

    /// Capacity of the command queue between [`Room`](crate::Room) handles
    /// and the room task.
    pub command_buffer: usize,
}

impl Default for RoomConfig {
    fn default() -> Self {
        Self {
            server_url: Self::DEFAULT_SERVER_URL.to_string(),
            room_name: String::new(),
            ice_servers: vec![
                IceServer::stun("stun:relay.metered.ca:80"),
                IceServer::stun("stun:stun1.l.google.com:19302"),
            ],
            keep_alive_interval: Self::DEFAULT_KEEP_ALIVE,
            reconnect_delay: Self::DEFAULT_RECONNECT_DELAY,
            message_delay: Duration::ZERO,
            command_buffer: Self::DEFAULT_COMMAND_BUFFER,
        }
    }
}

impl RoomConfig {
    /// Matchmaking server used when none is configured.
    pub const DEFAULT_SERVER_URL: &'static str = "tangle-server.fly.dev";

    /// Keep-alive period used when none (or zero) is configured.
    pub const DEFAULT_KEEP_ALIVE: Duration = Duration::from_secs(10);

    /// Reconnect delay used when none (or zero) is configured.
    pub const DEFAULT_RECONNECT_DELAY: Duration = Duration::from_millis(250);

    /// Command queue capacity used when none (or zero) is configured.
    pub const DEFAULT_COMMAND_BUFFER: usize = 64;

    /// Fix any out-of-range values so the config is safe to use.
    ///
    /// Called automatically by [`Room::setup`](crate::Room::setup). A zero
    /// keep-alive interval would spin, a zero reconnect delay would hammer
    /// the server, and a zero-capacity queue cannot be created; each falls
    /// back to its default.
    pub fn validated(mut self) -> Self {
        if self.keep_alive_interval.is_zero() {
            warn!("keep_alive_interval is zero, using default");
            self.keep_alive_interval = Self::DEFAULT_KEEP_ALIVE;
        }
        if self.reconnect_delay.is_zero() {
            warn!("reconnect_delay is zero, using default");
            self.reconnect_delay = Self::DEFAULT_RECONNECT_DELAY;
        }
        if self.command_buffer == 0 {
            warn!("command_buffer is zero, using default");
            self.command_buffer = Self::DEFAULT_COMMAND_BUFFER;
        }
        self
    }

    /// The URL the control connection dials.
    pub fn server_endpoint(&self) -> String {
        if self.server_url.contains("://") {
            self.server_url.clone()
        } else {
            format!("wss://{}", self.server_url)
        }
    }
}

// ---------------------------------------------------------------------------
// RoomState
// ---------------------------------------------------------------------------

/// Where the room is in its join lifecycle.
///
/// ```text
/// Disconnected ──(room announcement)──→ Joining ──(no peers pending)──→ Connected
///      ↑                                   │                               │
///      └────────(control connection lost)──┴───────────────────────────────┘
/// ```
///
/// - **Disconnected**: no control connection, or connected but not yet in a
///   room. Initial state.
/// - **Joining**: the server placed us in a room; waiting for the members
///   it listed to open their data channels (or leave).
/// - **Connected**: every listed member is reachable or gone.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum RoomState {
    /// Waiting for the listed members.
    Joining,
    /// All listed members accounted for.
    Connected,
    /// Not in a room.
    #[default]
    Disconnected,
}

impl fmt::Display for RoomState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Joining => "Joining",
            Self::Connected => "Connected",
            Self::Disconnected => "Disconnected",
        };
        f.write_str(s)
    }
}
