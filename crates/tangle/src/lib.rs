//! # Tangle
//!
//! Peer-to-peer rooms for web games and apps.
//!
//! Clients meet through a matchmaking server, then exchange messages
//! directly over ordered, reliable data channels. Messages of any size are
//! compressed and fragmented to fit the channel's frame limit, and a room
//! keeps rejoining on its own if the server connection drops.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use serde_json::Value;
//! use tangle::TransportError;
//! use tangle::prelude::*;
//!
//! // Adapter over the application's WebRTC stack.
//! struct Rtc;
//! struct RtcLink;
//!
//! impl PeerTransport for Rtc {
//!     type Link = RtcLink;
//!
//!     fn open(&self, _ice: &[IceServer], _events: PeerEvents) -> Result<RtcLink, TransportError> {
//!         Ok(RtcLink)
//!     }
//! }
//!
//! impl PeerLink for RtcLink {
//!     async fn create_offer(&self) -> Result<Value, TransportError> {
//!         Ok(Value::Null)
//!     }
//!     async fn create_answer(&self, _offer: Value) -> Result<Value, TransportError> {
//!         Ok(Value::Null)
//!     }
//!     async fn accept_answer(&self, _answer: Value) -> Result<(), TransportError> {
//!         Ok(())
//!     }
//!     async fn add_ice_candidate(&self, _candidate: Value) -> Result<(), TransportError> {
//!         Ok(())
//!     }
//!     fn send(&self, _frame: &[u8]) -> Result<(), TransportError> {
//!         Ok(())
//!     }
//!     fn close(&self) {}
//! }
//!
//! #[tokio::main]
//! async fn main() -> Result<(), TangleError> {
//!     let room = RoomBuilder::new()
//!         .room_name("lobby")
//!         .on_message(|peer, bytes| println!("{peer} sent {} bytes", bytes.len()))
//!         .connect(Rtc)
//!         .await?;
//!
//!     room.wait_for_state(RoomState::Connected).await?;
//!     room.send(b"hello".to_vec(), None).await?;
//!     Ok(())
//! }
//! ```

mod client;
mod error;

pub use client::RoomBuilder;
pub use error::TangleError;

pub use tangle_protocol::{Compression, PeerId, ProtocolError};
pub use tangle_room::{Room, RoomCallbacks, RoomConfig, RoomError, RoomInfo, RoomState};
pub use tangle_transport::{
    IceServer, LinkId, PeerEvent, PeerEvents, PeerLink, PeerTransport, TransportError,
};

/// Everything needed to join a room and implement a peer transport.
pub mod prelude {
    pub use crate::{
        IceServer, PeerEvent, PeerEvents, PeerId, PeerLink, PeerTransport, Room, RoomBuilder,
        RoomCallbacks, RoomConfig, RoomInfo, RoomState, TangleError,
    };
}
