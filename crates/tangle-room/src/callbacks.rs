//! Application callbacks and their deferred delivery.
//!
//! The room never calls back into the application while it is in the middle
//! of handling an event. Instead it queues a [`Notification`] and a
//! dispatcher task fires the matching callback afterwards, in queue order.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use tangle_protocol::PeerId;
use tokio::sync::mpsc;
use tokio::time::Instant;

use crate::RoomState;

/// Called with the new state after every transition.
pub type StateChangeFn = Arc<dyn Fn(RoomState) + Send + Sync>;
/// Called when a peer's data channel opens.
pub type PeerJoinedFn = Arc<dyn Fn(PeerId) + Send + Sync>;
/// Called when a peer leaves, with a millisecond Unix timestamp.
pub type PeerLeftFn = Arc<dyn Fn(PeerId, u64) + Send + Sync>;
/// Called with every decoded application message.
pub type MessageFn = Arc<dyn Fn(PeerId, Vec<u8>) + Send + Sync>;

/// The callbacks an application can register on a room.
///
/// Every callback is optional. A notification without a registered
/// callback is dropped.
#[derive(Clone, Default)]
pub struct RoomCallbacks {
    /// Fired after every state transition.
    pub on_state_change: Option<StateChangeFn>,
    /// Fired when a peer becomes reachable.
    pub on_peer_joined: Option<PeerJoinedFn>,
    /// Fired when a peer leaves or the room is torn down.
    pub on_peer_left: Option<PeerLeftFn>,
    /// Fired for every message received from a peer.
    pub on_message: Option<MessageFn>,
}

impl RoomCallbacks {
    /// An empty callback set.
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the state-change callback.
    pub fn on_state_change(mut self, f: impl Fn(RoomState) + Send + Sync + 'static) -> Self {
        self.on_state_change = Some(Arc::new(f));
        self
    }

    /// Sets the peer-joined callback.
    pub fn on_peer_joined(mut self, f: impl Fn(PeerId) + Send + Sync + 'static) -> Self {
        self.on_peer_joined = Some(Arc::new(f));
        self
    }

    /// Sets the peer-left callback.
    pub fn on_peer_left(mut self, f: impl Fn(PeerId, u64) + Send + Sync + 'static) -> Self {
        self.on_peer_left = Some(Arc::new(f));
        self
    }

    /// Sets the message callback.
    pub fn on_message(mut self, f: impl Fn(PeerId, Vec<u8>) + Send + Sync + 'static) -> Self {
        self.on_message = Some(Arc::new(f));
        self
    }
}

impl fmt::Debug for RoomCallbacks {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RoomCallbacks")
            .field("on_state_change", &self.on_state_change.is_some())
            .field("on_peer_joined", &self.on_peer_joined.is_some())
            .field("on_peer_left", &self.on_peer_left.is_some())
            .field("on_message", &self.on_message.is_some())
            .finish()
    }
}

/// Something the application should hear about.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum Notification {
    StateChange(RoomState),
    PeerJoined(PeerId),
    PeerLeft(PeerId, u64),
    Message(PeerId, Vec<u8>),
}

/// Queue side of the dispatcher.
///
/// Messages are stamped with their delivery deadline when queued, so a burst
/// of messages waits one `message_delay` in total rather than one each.
#[derive(Debug, Clone)]
pub(crate) struct NotificationSender {
    tx: mpsc::UnboundedSender<(Option<Instant>, Notification)>,
    message_delay: Duration,
}

impl NotificationSender {
    /// Queues a notification. Gives it back if the dispatcher is gone.
    pub(crate) fn send(&self, notification: Notification) -> Result<(), Notification> {
        let due = match notification {
            Notification::Message(..) if !self.message_delay.is_zero() => {
                Some(Instant::now() + self.message_delay)
            }
            _ => None,
        };
        self.tx
            .send((due, notification))
            .map_err(|mpsc::error::SendError((_, notification))| notification)
    }

    #[cfg(test)]
    pub(crate) fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }
}

/// Spawns the task that turns queued notifications into callback calls.
///
/// A message callback fires no earlier than `message_delay` after the
/// message was queued. Queue order is kept for every notification. The task
/// ends once every sender is gone and the queue is drained.
pub(crate) fn spawn_dispatcher(
    callbacks: RoomCallbacks,
    message_delay: Duration,
) -> NotificationSender {
    let (tx, rx) = mpsc::unbounded_channel();
    tokio::spawn(dispatch(callbacks, rx));
    NotificationSender { tx, message_delay }
}

async fn dispatch(
    callbacks: RoomCallbacks,
    mut rx: mpsc::UnboundedReceiver<(Option<Instant>, Notification)>,
) {
    while let Some((due, notification)) = rx.recv().await {
        if let Some(at) = due {
            tokio::time::sleep_until(at).await;
        }
        match notification {
            Notification::StateChange(state) => {
                if let Some(f) = &callbacks.on_state_change {
                    f(state);
                }
            }
            Notification::PeerJoined(peer_id) => {
                if let Some(f) = &callbacks.on_peer_joined {
                    f(peer_id);
                }
            }
            Notification::PeerLeft(peer_id, time) => {
                if let Some(f) = &callbacks.on_peer_left {
                    f(peer_id, time);
                }
            }
            Notification::Message(peer_id, payload) => {
                if let Some(f) = &callbacks.on_message {
                    f(peer_id, payload);
                }
            }
        }
    }
    tracing::debug!("notification dispatcher stopped");
}
