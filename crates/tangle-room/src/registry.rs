//! The set of remote peers in the current room.

use std::collections::HashMap;
use std::collections::hash_map::Entry;
use std::sync::Arc;

use tangle_protocol::{Compression, EncodedMessage, PeerId, ProtocolError, Reassembler};
use tangle_transport::{
    IceServer, LinkId, PeerEvent, PeerEvents, PeerLink, PeerTransport, TransportError,
};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::negotiation::{self, Negotiation, NegotiationSender};
use crate::signaling::ControlSender;

/// One remote participant.
pub(crate) struct Peer<L> {
    id: PeerId,
    address: String,
    link_id: LinkId,
    link: Arc<L>,
    negotiation: NegotiationSender,
    ready: bool,
    reassembler: Reassembler,
}

impl<L: PeerLink> Peer<L> {
    pub(crate) fn address(&self) -> &str {
        &self.address
    }

    /// Queues a negotiation step on this peer's worker.
    pub(crate) fn negotiate(&self, step: Negotiation) {
        if self.negotiation.send(step).is_err() {
            warn!(peer_id = %self.id, "negotiation worker is gone");
        }
    }

    /// Feeds one received frame through this peer's reassembler.
    ///
    /// On error the in-flight message is dropped so the next start frame
    /// begins from a clean slate.
    pub(crate) fn receive(
        &mut self,
        frame: &[u8],
        compression: &dyn Compression,
    ) -> Result<Option<Vec<u8>>, ProtocolError> {
        self.reassembler.push(frame, compression).inspect_err(|_| {
            self.reassembler.reset();
        })
    }

    fn send(
        &self,
        message: &EncodedMessage<'_>,
        scratch: &mut Vec<u8>,
    ) -> Result<(), TransportError> {
        message.write_frames(scratch, |frame| self.link.send(frame))
    }
}

/// Owns every [`Peer`] and the transport that creates their links.
///
/// There is at most one peer per id. Each peer's link gets a fresh
/// [`LinkId`], and events from a link that is no longer registered resolve
/// to nothing.
pub(crate) struct PeerRegistry<T: PeerTransport> {
    transport: T,
    ice_servers: Vec<IceServer>,
    events: mpsc::UnboundedSender<(LinkId, PeerEvent)>,
    peers: HashMap<PeerId, Peer<T::Link>>,
    links: HashMap<LinkId, PeerId>,
    next_link: u64,
}

impl<T: PeerTransport> PeerRegistry<T> {
    pub(crate) fn new(
        transport: T,
        ice_servers: Vec<IceServer>,
        events: mpsc::UnboundedSender<(LinkId, PeerEvent)>,
    ) -> Self {
        Self {
            transport,
            ice_servers,
            events,
            peers: HashMap::new(),
            links: HashMap::new(),
            next_link: 1,
        }
    }

    /// Returns the peer with `id`, opening a link to `address` first if
    /// there is none.
    ///
    /// A new peer starts with its own negotiation worker, which relays
    /// offers and answers through `control`.
    pub(crate) fn create_or_get(
        &mut self,
        id: PeerId,
        address: &str,
        control: &ControlSender,
    ) -> Result<&mut Peer<T::Link>, TransportError> {
        match self.peers.entry(id) {
            Entry::Occupied(entry) => Ok(entry.into_mut()),
            Entry::Vacant(slot) => {
                let link_id = LinkId::new(self.next_link);
                self.next_link += 1;

                let events = PeerEvents::new(link_id, self.events.clone());
                let link = Arc::new(self.transport.open(&self.ice_servers, events)?);
                let negotiation =
                    negotiation::spawn(id, address.to_owned(), link.clone(), control.clone());

                self.links.insert(link_id, id);
                info!(peer_id = %id, %link_id, address, "peer link opened");

                Ok(slot.insert(Peer {
                    id,
                    address: address.to_owned(),
                    link_id,
                    link,
                    negotiation,
                    ready: false,
                    reassembler: Reassembler::new(),
                }))
            }
        }
    }

    /// Closes and forgets the peer. Returns `false` if `id` is unknown.
    pub(crate) fn remove(&mut self, id: PeerId) -> bool {
        match self.peers.remove(&id) {
            Some(peer) => {
                self.links.remove(&peer.link_id);
                peer.link.close();
                info!(peer_id = %id, "peer removed");
                true
            }
            None => false,
        }
    }

    /// Closes and forgets every peer, returning their ids in ascending order.
    pub(crate) fn clear(&mut self) -> Vec<PeerId> {
        let mut ids: Vec<PeerId> = self.peers.keys().copied().collect();
        ids.sort_unstable();
        for (_, peer) in self.peers.drain() {
            peer.link.close();
        }
        self.links.clear();
        ids
    }

    /// Maps a link back to the peer that currently owns it.
    pub(crate) fn resolve(&self, link_id: LinkId) -> Option<PeerId> {
        self.links.get(&link_id).copied()
    }

    pub(crate) fn contains(&self, id: PeerId) -> bool {
        self.peers.contains_key(&id)
    }

    pub(crate) fn get(&self, id: PeerId) -> Option<&Peer<T::Link>> {
        self.peers.get(&id)
    }

    pub(crate) fn get_mut(&mut self, id: PeerId) -> Option<&mut Peer<T::Link>> {
        self.peers.get_mut(&id)
    }

    /// Sets the peer's ready flag. Returns `true` if the flag changed.
    pub(crate) fn set_ready(&mut self, id: PeerId, ready: bool) -> bool {
        match self.peers.get_mut(&id) {
            Some(peer) if peer.ready != ready => {
                peer.ready = ready;
                true
            }
            _ => false,
        }
    }

    /// Sends to one peer. Returns `false` without sending if the peer is
    /// unknown or not ready.
    pub(crate) fn send_to(
        &self,
        id: PeerId,
        message: &EncodedMessage<'_>,
        scratch: &mut Vec<u8>,
    ) -> bool {
        let Some(peer) = self.peers.get(&id).filter(|p| p.ready) else {
            return false;
        };
        if let Err(e) = peer.send(message, scratch) {
            warn!(peer_id = %id, error = %e, "send to peer failed");
        }
        true
    }

    /// Sends to every ready peer. Returns how many peers were sent to.
    pub(crate) fn broadcast(&self, message: &EncodedMessage<'_>, scratch: &mut Vec<u8>) -> usize {
        let mut sent = 0;
        for peer in self.peers.values().filter(|p| p.ready) {
            if let Err(e) = peer.send(message, scratch) {
                warn!(peer_id = %peer.id, error = %e, "send to peer failed");
            }
            sent += 1;
        }
        debug!(peers = sent, frames = message.frame_count(), "broadcast");
        sent
    }

    /// Every registered peer, ascending.
    pub(crate) fn ids(&self) -> Vec<PeerId> {
        let mut ids: Vec<PeerId> = self.peers.keys().copied().collect();
        ids.sort_unstable();
        ids
    }

    /// Every ready peer, ascending.
    pub(crate) fn ready_ids(&self) -> Vec<PeerId> {
        let mut ids: Vec<PeerId> = self
            .peers
            .values()
            .filter(|p| p.ready)
            .map(|p| p.id)
            .collect();
        ids.sort_unstable();
        ids
    }
}
