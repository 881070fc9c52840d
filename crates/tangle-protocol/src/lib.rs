//! Wire protocol for Tangle.
//!
//! This crate defines what travels between clients, both through the
//! matchmaking server and directly between peers:
//!
//! - **Identity** ([`PeerId`]): the numeric id both ends derive from a
//!   peer's `ipv4:port` address.
//! - **Framing** ([`EncodedMessage`], [`Reassembler`], [`FrameKind`]): how
//!   an application payload of any size is split into bounded data-channel
//!   frames and put back together.
//! - **Compression** ([`Compression`] trait, [`Gzip`]): the capability the
//!   framing calls into for payloads that exceed one frame.
//! - **Signaling** ([`SignalEnvelope`], [`InboundSignal`], [`OutboundSignal`]):
//!   the JSON control messages exchanged with the matchmaking server.
//! - **Errors** ([`ProtocolError`]).
//!
//! # Architecture
//!
//! The protocol layer knows nothing about sockets, peers' connection state,
//! or rooms. It only turns bytes into messages and back.
//!
//! ```text
//! Transport (bytes, text) → Protocol (frames, signals) → Room (peers, state)
//! ```

mod compression;
mod error;
mod frame;
mod identity;
mod signal;

pub use compression::Compression;
#[cfg(feature = "gzip")]
pub use compression::Gzip;
pub use error::ProtocolError;
pub use frame::{
    EncodedMessage, Encoding, FrameKind, MAX_FRAME_PAYLOAD, MAX_FRAME_SIZE, MULTI_PART_HEADER,
    Reassembler,
};
pub use identity::PeerId;
pub use signal::{InboundSignal, KEEP_ALIVE, OutboundSignal, SignalEnvelope};
