//! The peer-connection capability.
//!
//! Establishing a direct connection (ICE gathering, DTLS/SCTP, SDP) is not
//! this crate's job. An embedding application plugs in whatever stack it
//! has through [`PeerTransport`], and the room only relays the opaque
//! offer/answer/candidate payloads it produces.

use std::fmt;
use std::future::Future;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::mpsc;

use crate::TransportError;

/// One STUN or TURN server handed to the peer-connection stack.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IceServer {
    /// Server URL, e.g. `stun:stun1.l.google.com:19302`.
    pub urls: String,
    /// TURN username.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub username: Option<String>,
    /// TURN credential.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub credential: Option<String>,
}

impl IceServer {
    /// A STUN server, which needs no credentials.
    pub fn stun(urls: impl Into<String>) -> Self {
        Self {
            urls: urls.into(),
            username: None,
            credential: None,
        }
    }

    /// A TURN server with credentials.
    pub fn turn(
        urls: impl Into<String>,
        username: impl Into<String>,
        credential: impl Into<String>,
    ) -> Self {
        Self {
            urls: urls.into(),
            username: Some(username.into()),
            credential: Some(credential.into()),
        }
    }
}

/// Identifies one opened peer link.
///
/// A fresh id is used for every link, so events from a link that has since
/// been closed and replaced can be told apart from the replacement's.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct LinkId(u64);

impl LinkId {
    /// Creates a new `LinkId` from a raw `u64`.
    pub fn new(id: u64) -> Self {
        Self(id)
    }

    /// Returns the underlying `u64` value.
    pub fn into_inner(self) -> u64 {
        self.0
    }
}

impl fmt::Display for LinkId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "link-{}", self.0)
    }
}

/// Something a peer link reports to the room.
#[derive(Debug, Clone, PartialEq)]
pub enum PeerEvent {
    /// The link wants a fresh offer negotiated.
    NegotiationNeeded,
    /// A local ICE candidate was gathered and must be relayed to the peer.
    IceCandidate(Value),
    /// Candidate gathering reported an error. Informational only.
    IceCandidateError(String),
    /// The data channel opened; the peer can now send and receive.
    ChannelOpen,
    /// One frame arrived on the data channel.
    ChannelMessage(Vec<u8>),
    /// The data channel closed.
    ChannelClosed,
    /// The underlying connection or signaling state changed. Informational.
    StateChanged(String),
}

/// Sink a peer link reports its events into.
///
/// Every event is tagged with the link's [`LinkId`] before it reaches the
/// room, so one channel can carry the events of every peer.
#[derive(Debug, Clone)]
pub struct PeerEvents {
    link: LinkId,
    tx: mpsc::UnboundedSender<(LinkId, PeerEvent)>,
}

impl PeerEvents {
    /// Creates a sink that tags events with `link`.
    pub fn new(link: LinkId, tx: mpsc::UnboundedSender<(LinkId, PeerEvent)>) -> Self {
        Self { link, tx }
    }

    /// The link these events belong to.
    pub fn link(&self) -> LinkId {
        self.link
    }

    /// Reports an event. Returns `false` once the room has gone away.
    pub fn emit(&self, event: PeerEvent) -> bool {
        self.tx.send((self.link, event)).is_ok()
    }
}

/// Creates peer links.
pub trait PeerTransport: Send + Sync + 'static {
    /// The link type produced by this transport.
    type Link: PeerLink;

    /// Creates a connection to one remote peer, along with an ordered,
    /// reliable data channel negotiated out of band.
    ///
    /// Returns immediately; everything that happens afterwards (negotiation
    /// needed, candidates, channel open, frames) is reported through
    /// `events`.
    fn open(&self, ice_servers: &[IceServer], events: PeerEvents)
    -> Result<Self::Link, TransportError>;
}

/// A connection to one remote peer.
///
/// The negotiation methods are called one at a time, in the order the
/// matching control messages arrived.
pub trait PeerLink: Send + Sync + 'static {
    /// Creates a local offer and applies it as the local description.
    fn create_offer(&self) -> impl Future<Output = Result<Value, TransportError>> + Send;

    /// Applies a remote offer, then creates and applies the local answer.
    fn create_answer(
        &self,
        offer: Value,
    ) -> impl Future<Output = Result<Value, TransportError>> + Send;

    /// Applies the remote answer to our earlier offer.
    fn accept_answer(&self, answer: Value)
    -> impl Future<Output = Result<(), TransportError>> + Send;

    /// Adds a candidate received from the remote peer.
    fn add_ice_candidate(
        &self,
        candidate: Value,
    ) -> impl Future<Output = Result<(), TransportError>> + Send;

    /// Queues one frame on the data channel. The frame is copied before
    /// this returns.
    fn send(&self, frame: &[u8]) -> Result<(), TransportError>;

    /// Closes the connection. Idempotent.
    fn close(&self);
}
