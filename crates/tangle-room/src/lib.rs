//! Room lifecycle for Tangle.
//!
//! A room is a set of peers that found each other through a matchmaking
//! server and then talk directly. This crate owns everything between the
//! application and the transports:
//!
//! - [`Room`]: handle to a running room (send, disconnect, shutdown, state)
//! - [`RoomState`]: `Joining`, `Connected` or `Disconnected`
//! - [`RoomConfig`]: server, room name, ICE servers and timings
//! - [`RoomCallbacks`]: what the application wants to hear about
//!
//! Each room runs as one Tokio task that owns the peer registry and the join
//! state machine. The control connection and every peer's negotiation run on
//! their own small tasks and report back to it over channels.

mod callbacks;
mod config;
mod error;
mod negotiation;
mod registry;
mod room;
mod signaling;

pub use callbacks::{MessageFn, PeerJoinedFn, PeerLeftFn, RoomCallbacks, StateChangeFn};
pub use config::{RoomConfig, RoomState};
pub use error::RoomError;
pub use room::{Room, RoomInfo};
