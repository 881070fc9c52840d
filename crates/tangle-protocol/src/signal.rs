//! Control-channel messages exchanged with the matchmaking server.
//!
//! Inbound messages are a JSON object followed by the sender's raw address,
//! which the server appends after the closing brace:
//!
//! ```text
//! {"offer": {...}}10.0.0.7:41000
//! ```
//!
//! Outbound messages are plain JSON objects, plus a bare keep-alive token.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::{PeerId, ProtocolError};

/// Literal sent periodically so intermediaries don't drop an idle connection.
pub const KEEP_ALIVE: &str = "keep_alive";

// ---------------------------------------------------------------------------
// Inbound
// ---------------------------------------------------------------------------

/// A control message from the server, classified by its discriminant field.
#[derive(Debug, Clone, PartialEq)]
pub enum InboundSignal {
    /// We entered a room. Carries the members we must wait for and our own
    /// address as the server sees it.
    RoomJoined {
        /// The room we joined.
        room_name: String,
        /// Addresses of the members already in the room.
        peers: Vec<String>,
        /// Our own address.
        your_address: String,
    },

    /// Another client is joining our room.
    PeerJoining {
        /// Room context sent along with the notice.
        room: Value,
    },

    /// A session offer from the sender. Opaque to the room.
    Offer(Value),

    /// A session answer from the sender. Opaque to the room.
    Answer(Value),

    /// An ICE candidate from the sender. Opaque to the room.
    IceCandidate(Value),

    /// A member left the room.
    PeerLeft {
        /// Address of the member that left.
        address: String,
        /// Server timestamp in milliseconds since the Unix epoch.
        time: Option<u64>,
    },
}

/// An inbound control message together with its sender.
#[derive(Debug, Clone, PartialEq)]
pub struct SignalEnvelope {
    /// The classified message body.
    pub signal: InboundSignal,
    /// Raw address the server appended after the JSON body. Empty when the
    /// server did not append one.
    pub sender: String,
}

/// Wire shape of every inbound body. Exactly one discriminant is expected;
/// when several are present the first in declaration order wins.
#[derive(Debug, Default, Deserialize)]
struct RawInbound {
    room_name: Option<String>,
    peers: Option<Vec<String>>,
    your_ip: Option<String>,
    join_room: Option<Value>,
    offer: Option<Value>,
    answer: Option<Value>,
    new_ice_candidate: Option<Value>,
    disconnected_peer_id: Option<String>,
    time: Option<f64>,
}

impl SignalEnvelope {
    /// Splits a raw control frame into its JSON body and trailing sender
    /// address, then classifies the body.
    ///
    /// # Errors
    /// - [`ProtocolError::InvalidMessage`] if there is no JSON object, if the
    ///   object carries none of the known fields, or a roster announcement
    ///   is missing `your_ip`.
    /// - [`ProtocolError::Decode`] if the JSON body is malformed.
    pub fn parse(text: &str) -> Result<Self, ProtocolError> {
        let end = text
            .rfind('}')
            .ok_or_else(|| ProtocolError::InvalidMessage("no JSON body".into()))?;
        let (json, sender) = text.split_at(end + 1);

        let raw: RawInbound = serde_json::from_str(json).map_err(ProtocolError::Decode)?;
        let signal = raw.classify()?;

        Ok(Self {
            signal,
            sender: sender.trim().to_string(),
        })
    }

    /// Identifier of the sender, derived from its address.
    pub fn sender_id(&self) -> PeerId {
        PeerId::from_address(&self.sender)
    }
}

impl RawInbound {
    fn classify(self) -> Result<InboundSignal, ProtocolError> {
        if let Some(room_name) = self.room_name {
            let your_address = self.your_ip.ok_or_else(|| {
                ProtocolError::InvalidMessage("room announcement without your_ip".into())
            })?;
            return Ok(InboundSignal::RoomJoined {
                room_name,
                peers: self.peers.unwrap_or_default(),
                your_address,
            });
        }
        if let Some(room) = self.join_room {
            return Ok(InboundSignal::PeerJoining { room });
        }
        if let Some(offer) = self.offer {
            return Ok(InboundSignal::Offer(offer));
        }
        if let Some(answer) = self.answer {
            return Ok(InboundSignal::Answer(answer));
        }
        if let Some(candidate) = self.new_ice_candidate {
            return Ok(InboundSignal::IceCandidate(candidate));
        }
        if let Some(address) = self.disconnected_peer_id {
            return Ok(InboundSignal::PeerLeft {
                address,
                time: self.time.map(|t| t.max(0.0) as u64),
            });
        }
        Err(ProtocolError::InvalidMessage(
            "no recognized control field".into(),
        ))
    }
}

// ---------------------------------------------------------------------------
// Outbound
// ---------------------------------------------------------------------------

/// A control message we send to the server.
///
/// Serialized without a tag: each variant's field names are the wire keys.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum OutboundSignal {
    /// Ask to join a room. Sent once per connection.
    JoinRoom {
        /// Name of the room to join.
        join_room: String,
    },
    /// Relay our offer to `destination`.
    Offer {
        /// Opaque session description.
        offer: Value,
        /// Address of the peer it is meant for.
        destination: String,
    },
    /// Relay our answer to `destination`.
    Answer {
        /// Opaque session description.
        answer: Value,
        /// Address of the peer it is meant for.
        destination: String,
    },
    /// Relay one of our ICE candidates to `destination`.
    IceCandidate {
        /// Opaque candidate.
        new_ice_candidate: Value,
        /// Address of the peer it is meant for.
        destination: String,
    },
}

impl OutboundSignal {
    /// Serializes the message to its JSON text form.
    ///
    /// # Errors
    /// Returns [`ProtocolError::Encode`] if a payload cannot be serialized.
    pub fn to_json(&self) -> Result<String, ProtocolError> {
        serde_json::to_string(self).map_err(ProtocolError::Encode)
    }
}
