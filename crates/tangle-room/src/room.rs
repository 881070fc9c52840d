//! The room actor and its handle.
//!
//! One Tokio task owns all room state: the peer registry, the set of peers
//! still expected to join, the lifecycle state, and the live control
//! connection. Everything that can change that state arrives as a message
//! on one of the task's queues and is handled to completion before the next
//! one is looked at, so no locks are needed.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use tangle_protocol::{
    Compression, EncodedMessage, Gzip, InboundSignal, OutboundSignal, PeerId, SignalEnvelope,
};
use tangle_transport::{Connector, LinkId, PeerEvent, PeerTransport};
use tokio::sync::{mpsc, oneshot, watch};
use tokio::time::Instant;
use tracing::{debug, info, trace, warn};

use crate::callbacks::{self, Notification, NotificationSender};
use crate::negotiation::Negotiation;
use crate::registry::{Peer, PeerRegistry};
use crate::signaling::{
    self, ControlCommand, ControlEvent, ControlEventKind, ControlSender, ControlSettings,
};
use crate::{RoomCallbacks, RoomConfig, RoomError, RoomState};

/// Commands sent from [`Room`] handles to the room task.
pub(crate) enum RoomCommand {
    /// Send a payload to one peer, or to every ready peer.
    Send {
        payload: Vec<u8>,
        target: Option<PeerId>,
    },

    /// Close the control connection. The room reconnects afterwards.
    Disconnect,

    /// Request a snapshot of the room.
    Info { reply: oneshot::Sender<RoomInfo> },

    /// Tear down and stop the room task.
    Shutdown { reply: oneshot::Sender<()> },
}

/// A snapshot of a room.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RoomInfo {
    /// Current lifecycle state.
    pub state: RoomState,
    /// Our own id as derived from the address the server sees.
    pub local_id: PeerId,
    /// Every registered peer, ascending.
    pub peers: Vec<PeerId>,
    /// Peers whose data channel is open, ascending.
    pub ready_peers: Vec<PeerId>,
    /// Peers we are still waiting on before the room counts as joined.
    pub pending: Vec<PeerId>,
}

/// Handle to a running room.
///
/// Cheap to clone. The room keeps running while at least one handle is
/// alive; dropping the last one stops it as if [`shutdown`](Self::shutdown)
/// had been called.
#[derive(Clone)]
pub struct Room {
    commands: mpsc::Sender<RoomCommand>,
    state: watch::Receiver<RoomState>,
}

impl Room {
    /// Starts a room that compresses large messages with gzip.
    ///
    /// Returns once the room task is running and has started dialing the
    /// matchmaking server. It does not wait for the room to be joined; watch
    /// [`state`](Self::state) or the state-change callback for that.
    pub async fn setup<C, T>(
        config: RoomConfig,
        callbacks: RoomCallbacks,
        connector: C,
        transport: T,
    ) -> Result<Self, RoomError>
    where
        C: Connector,
        T: PeerTransport,
    {
        Self::setup_with(config, callbacks, connector, transport, Arc::new(Gzip)).await
    }

    /// Starts a room with a caller-chosen compression codec.
    ///
    /// Both ends of every link must use the same codec.
    pub async fn setup_with<C, T>(
        config: RoomConfig,
        callbacks: RoomCallbacks,
        connector: C,
        transport: T,
        compression: Arc<dyn Compression>,
    ) -> Result<Self, RoomError>
    where
        C: Connector,
        T: PeerTransport,
    {
        let config = config.validated();

        let (command_tx, command_rx) = mpsc::channel(config.command_buffer);
        let (state_tx, state_rx) = watch::channel(RoomState::Disconnected);
        let (control_tx, control_rx) = mpsc::unbounded_channel();
        let (peer_tx, peer_rx) = mpsc::unbounded_channel();
        let notify = callbacks::spawn_dispatcher(callbacks, config.message_delay);

        let actor = RoomActor {
            registry: PeerRegistry::new(transport, config.ice_servers.clone(), peer_tx),
            config,
            connector: Arc::new(connector),
            compression,
            state: RoomState::Disconnected,
            state_tx,
            local_id: PeerId::UNASSIGNED,
            pending: HashSet::new(),
            notify,
            scratch: Vec::with_capacity(tangle_protocol::MAX_FRAME_SIZE),
            control: None,
            serial: 0,
            reconnect_at: None,
            commands: command_rx,
            control_tx,
            control_rx,
            peer_rx,
        };

        let (started_tx, started_rx) = oneshot::channel();
        tokio::spawn(actor.run(started_tx));
        started_rx
            .await
            .map_err(|_| RoomError::Setup("room task exited during startup".into()))?;

        Ok(Self {
            commands: command_tx,
            state: state_rx,
        })
    }

    /// Sends `payload` to `target`, or to every ready peer when `target` is
    /// `None`.
    ///
    /// Delivery is best effort: a target that is unknown or whose channel
    /// is not open yet silently misses the message.
    pub async fn send(
        &self,
        payload: impl Into<Vec<u8>>,
        target: Option<PeerId>,
    ) -> Result<(), RoomError> {
        self.commands
            .send(RoomCommand::Send {
                payload: payload.into(),
                target,
            })
            .await
            .map_err(|_| RoomError::Unavailable)
    }

    /// Closes the control connection.
    ///
    /// This tears the room down exactly like a lost connection would, and
    /// the room dials the server again after the reconnect delay. Use
    /// [`shutdown`](Self::shutdown) to stop for good.
    pub async fn disconnect(&self) -> Result<(), RoomError> {
        self.commands
            .send(RoomCommand::Disconnect)
            .await
            .map_err(|_| RoomError::Unavailable)
    }

    /// Tears the room down and stops it. Waits until teardown is done.
    pub async fn shutdown(&self) -> Result<(), RoomError> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.commands
            .send(RoomCommand::Shutdown { reply: reply_tx })
            .await
            .map_err(|_| RoomError::Unavailable)?;
        reply_rx.await.map_err(|_| RoomError::Unavailable)
    }

    /// The current state.
    pub fn state(&self) -> RoomState {
        *self.state.borrow()
    }

    /// Waits until the room reaches `state`.
    pub async fn wait_for_state(&self, state: RoomState) -> Result<(), RoomError> {
        let mut rx = self.state.clone();
        let reached = rx.wait_for(|s| *s == state).await.is_ok();
        if reached {
            Ok(())
        } else {
            Err(RoomError::Unavailable)
        }
    }

    /// Requests a snapshot of the room.
    pub async fn info(&self) -> Result<RoomInfo, RoomError> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.commands
            .send(RoomCommand::Info { reply: reply_tx })
            .await
            .map_err(|_| RoomError::Unavailable)?;
        reply_rx.await.map_err(|_| RoomError::Unavailable)
    }
}

/// What woke the room task up.
enum Wake {
    Command(Option<RoomCommand>),
    Control(ControlEvent),
    Peer(LinkId, PeerEvent),
    Reconnect,
}

/// The internal room state. Runs inside a Tokio task.
struct RoomActor<C: Connector, T: PeerTransport> {
    config: RoomConfig,
    connector: Arc<C>,
    compression: Arc<dyn Compression>,

    state: RoomState,
    state_tx: watch::Sender<RoomState>,
    local_id: PeerId,
    registry: PeerRegistry<T>,
    /// Members the server listed that have neither opened a channel nor left.
    pending: HashSet<PeerId>,
    notify: NotificationSender,
    /// Reused for every outgoing frame.
    scratch: Vec<u8>,

    /// Command queue of the live control connection, if any.
    control: Option<ControlSender>,
    /// Serial of the newest control connection. Events carrying another
    /// serial are stale.
    serial: u64,
    reconnect_at: Option<Instant>,

    commands: mpsc::Receiver<RoomCommand>,
    control_tx: mpsc::UnboundedSender<ControlEvent>,
    control_rx: mpsc::UnboundedReceiver<ControlEvent>,
    peer_rx: mpsc::UnboundedReceiver<(LinkId, PeerEvent)>,
}

impl<C: Connector, T: PeerTransport> RoomActor<C, T> {
    /// Runs the actor loop until shutdown or until every handle is dropped.
    async fn run(mut self, started: oneshot::Sender<()>) {
        info!(room = %self.config.room_name, "room started");
        self.connect();
        let _ = started.send(());

        loop {
            let wake = tokio::select! {
                command = self.commands.recv() => Wake::Command(command),
                Some(event) = self.control_rx.recv() => Wake::Control(event),
                Some((link_id, event)) = self.peer_rx.recv() => Wake::Peer(link_id, event),
                () = wait_until(self.reconnect_at) => Wake::Reconnect,
            };

            match wake {
                Wake::Command(Some(command)) => {
                    if !self.handle_command(command) {
                        break;
                    }
                }
                Wake::Command(None) => {
                    debug!("every room handle dropped");
                    self.stop();
                    break;
                }
                Wake::Control(event) => self.handle_control(event),
                Wake::Peer(link_id, event) => self.handle_peer_event(link_id, event),
                Wake::Reconnect => {
                    self.reconnect_at = None;
                    self.connect();
                }
            }
        }

        info!(room = %self.config.room_name, "room stopped");
    }

    // -- control connection ---------------------------------------------

    fn connect(&mut self) {
        self.serial += 1;
        let settings = ControlSettings {
            url: self.config.server_endpoint(),
            room_name: self.config.room_name.clone(),
            keep_alive: self.config.keep_alive_interval,
        };
        debug!(serial = self.serial, url = %settings.url, "dialing matchmaking server");
        self.control = Some(signaling::spawn(
            self.connector.clone(),
            settings,
            self.serial,
            self.control_tx.clone(),
        ));
    }

    fn handle_control(&mut self, event: ControlEvent) {
        if event.serial != self.serial {
            debug!(serial = event.serial, current = self.serial, "ignoring stale control event");
            return;
        }

        match event.kind {
            ControlEventKind::Message(text) => self.handle_signal(&text),
            ControlEventKind::Closed { clean } => {
                self.control = None;
                info!(clean, "control connection closed");
                self.teardown();
                self.reconnect_at = Some(Instant::now() + self.config.reconnect_delay);
            }
        }
    }

    fn handle_signal(&mut self, text: &str) {
        let envelope = match SignalEnvelope::parse(text) {
            Ok(envelope) => envelope,
            Err(e) => {
                warn!(error = %e, "ignoring malformed control message");
                return;
            }
        };
        let sender = envelope.sender_id();

        match envelope.signal {
            InboundSignal::RoomJoined {
                room_name,
                peers,
                your_address,
            } => {
                self.local_id = PeerId::from_address(&your_address);
                self.pending = peers
                    .iter()
                    .map(|address| PeerId::from_address(address))
                    .filter(|id| *id != self.local_id && !self.registry.contains(*id))
                    .collect();
                info!(
                    room = %room_name,
                    local_id = %self.local_id,
                    members = peers.len(),
                    pending = self.pending.len(),
                    "joined room"
                );
                self.set_state(RoomState::Joining);
                self.check_if_joined();
            }

            InboundSignal::PeerJoining { .. } => {
                self.ensure_peer(sender, &envelope.sender);
            }

            InboundSignal::Offer(offer) => {
                if let Some(peer) = self.ensure_peer(sender, &envelope.sender) {
                    peer.negotiate(Negotiation::AnswerOffer(offer));
                }
            }

            InboundSignal::Answer(answer) => match self.registry.get(sender) {
                Some(peer) => peer.negotiate(Negotiation::AcceptAnswer(answer)),
                None => debug!(peer_id = %sender, "answer from unknown peer"),
            },

            InboundSignal::IceCandidate(candidate) => match self.registry.get(sender) {
                Some(peer) => peer.negotiate(Negotiation::AddCandidate(candidate)),
                None => debug!(peer_id = %sender, "candidate from unknown peer"),
            },

            InboundSignal::PeerLeft { address, time } => {
                let id = PeerId::from_address(&address);
                self.remove_peer(id, time.unwrap_or_else(now_millis));
            }
        }
    }

    /// Returns the peer for a peer-directed control message, creating it if
    /// needed.
    fn ensure_peer(&mut self, id: PeerId, address: &str) -> Option<&mut Peer<T::Link>> {
        if address.is_empty() {
            warn!("peer message without a sender address");
            return None;
        }
        let control = self.control.as_ref()?;
        match self.registry.create_or_get(id, address, control) {
            Ok(peer) => Some(peer),
            Err(e) => {
                warn!(peer_id = %id, error = %e, "failed to open peer link");
                None
            }
        }
    }

    // -- peer events ----------------------------------------------------

    fn handle_peer_event(&mut self, link_id: LinkId, event: PeerEvent) {
        let Some(id) = self.registry.resolve(link_id) else {
            debug!(%link_id, "discarding event from a link that is no longer known");
            return;
        };

        match event {
            PeerEvent::NegotiationNeeded => {
                if let Some(peer) = self.registry.get(id) {
                    peer.negotiate(Negotiation::CreateOffer);
                }
            }

            PeerEvent::IceCandidate(candidate) => {
                let (Some(peer), Some(control)) = (self.registry.get(id), &self.control) else {
                    return;
                };
                let signal = OutboundSignal::IceCandidate {
                    new_ice_candidate: candidate,
                    destination: peer.address().to_owned(),
                };
                let _ = control.send(ControlCommand::Signal(signal));
            }

            PeerEvent::IceCandidateError(reason) => {
                warn!(peer_id = %id, %reason, "ICE candidate error");
            }

            PeerEvent::ChannelOpen => {
                if self.registry.set_ready(id, true) {
                    info!(peer_id = %id, "peer channel open");
                    self.notify(Notification::PeerJoined(id));
                }
                self.pending.remove(&id);
                self.check_if_joined();
            }

            PeerEvent::ChannelMessage(frame) => {
                let Some(peer) = self.registry.get_mut(id) else {
                    return;
                };
                match peer.receive(&frame, self.compression.as_ref()) {
                    Ok(Some(payload)) => {
                        trace!(peer_id = %id, bytes = payload.len(), "message received");
                        self.notify(Notification::Message(id, payload));
                    }
                    Ok(None) => {}
                    Err(e) => warn!(peer_id = %id, error = %e, "dropping bad frame"),
                }
            }

            PeerEvent::ChannelClosed => {
                if self.registry.set_ready(id, false) {
                    info!(peer_id = %id, "peer channel closed");
                }
            }

            PeerEvent::StateChanged(state) => {
                debug!(peer_id = %id, %state, "peer connection state changed");
            }
        }
    }

    // -- commands -------------------------------------------------------

    /// Returns `false` once the room should stop.
    fn handle_command(&mut self, command: RoomCommand) -> bool {
        match command {
            RoomCommand::Send { payload, target } => self.send(&payload, target),
            RoomCommand::Disconnect => match &self.control {
                Some(control) => {
                    info!("disconnecting from matchmaking server");
                    let _ = control.send(ControlCommand::Close);
                }
                None => debug!("disconnect requested with no control connection"),
            },
            RoomCommand::Info { reply } => {
                let _ = reply.send(self.info());
            }
            RoomCommand::Shutdown { reply } => {
                info!("room shutting down");
                self.stop();
                let _ = reply.send(());
                return false;
            }
        }
        true
    }

    fn send(&mut self, payload: &[u8], target: Option<PeerId>) {
        let message = match EncodedMessage::encode(payload, self.compression.as_ref()) {
            Ok(message) => message,
            Err(e) => {
                warn!(bytes = payload.len(), error = %e, "failed to encode message");
                return;
            }
        };

        match target {
            Some(id) => {
                if !self.registry.send_to(id, &message, &mut self.scratch) {
                    debug!(peer_id = %id, "dropping message for unknown or unready peer");
                }
            }
            None => {
                self.registry.broadcast(&message, &mut self.scratch);
            }
        }
    }

    fn info(&self) -> RoomInfo {
        let mut pending: Vec<PeerId> = self.pending.iter().copied().collect();
        pending.sort_unstable();
        RoomInfo {
            state: self.state,
            local_id: self.local_id,
            peers: self.registry.ids(),
            ready_peers: self.registry.ready_ids(),
            pending,
        }
    }

    // -- state machine --------------------------------------------------

    fn set_state(&mut self, state: RoomState) {
        if self.state == state {
            return;
        }
        info!(from = %self.state, to = %state, "room state changed");
        self.state = state;
        self.state_tx.send_replace(state);
        self.notify(Notification::StateChange(state));
    }

    /// Moves from `Joining` to `Connected` once nobody is pending.
    fn check_if_joined(&mut self) {
        if self.state == RoomState::Joining && self.pending.is_empty() {
            self.set_state(RoomState::Connected);
        }
    }

    fn remove_peer(&mut self, id: PeerId, time: u64) {
        if self.registry.remove(id) {
            self.notify(Notification::PeerLeft(id, time));
        }
        self.pending.remove(&id);
        self.check_if_joined();
    }

    /// Drops every peer, announcing each one as gone, then becomes
    /// `Disconnected`.
    fn teardown(&mut self) {
        let now = now_millis();
        for id in self.registry.clear() {
            self.notify(Notification::PeerLeft(id, now));
        }
        self.pending.clear();
        self.set_state(RoomState::Disconnected);
    }

    fn stop(&mut self) {
        if let Some(control) = self.control.take() {
            let _ = control.send(ControlCommand::Close);
        }
        // Any Closed event still in flight now carries a stale serial.
        self.serial += 1;
        self.reconnect_at = None;
        self.teardown();
    }

    fn notify(&self, notification: Notification) {
        let _ = self.notify.send(notification);
    }
}

async fn wait_until(deadline: Option<Instant>) {
    match deadline {
        Some(at) => tokio::time::sleep_until(at).await,
        None => std::future::pending().await,
    }
}

/// Milliseconds since the Unix epoch.
fn now_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}
