//! The control connection to the matchmaking server.
//!
//! Each dial runs as its own task. The task joins the configured room,
//! keeps the connection alive, relays outbound signals, and reports every
//! inbound frame to the room tagged with a serial number. When the
//! connection ends for any reason the task reports `Closed` once and exits;
//! deciding whether to dial again is the room's job.

use std::sync::Arc;
use std::time::Duration;

use tangle_protocol::{KEEP_ALIVE, OutboundSignal};
use tangle_transport::{Connection, Connector};
use tokio::sync::mpsc;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, info, warn};

/// Instructions from the room to the live control connection.
#[derive(Debug)]
pub(crate) enum ControlCommand {
    /// Serialize and send a signal.
    Signal(OutboundSignal),
    /// Close the connection.
    Close,
}

pub(crate) type ControlSender = mpsc::UnboundedSender<ControlCommand>;

/// Something that happened on the control connection with the given serial.
#[derive(Debug)]
pub(crate) struct ControlEvent {
    pub(crate) serial: u64,
    pub(crate) kind: ControlEventKind,
}

#[derive(Debug, PartialEq, Eq)]
pub(crate) enum ControlEventKind {
    /// One inbound text frame.
    Message(String),
    /// The connection is gone. `clean` is false after a dial, send, or
    /// receive error.
    Closed { clean: bool },
}

/// Where and how to dial.
#[derive(Debug, Clone)]
pub(crate) struct ControlSettings {
    pub(crate) url: String,
    pub(crate) room_name: String,
    pub(crate) keep_alive: Duration,
}

/// Dials the server on a new task and returns the connection's command queue.
pub(crate) fn spawn<C: Connector>(
    connector: Arc<C>,
    settings: ControlSettings,
    serial: u64,
    events: mpsc::UnboundedSender<ControlEvent>,
) -> ControlSender {
    let (tx, rx) = mpsc::unbounded_channel();
    tokio::spawn(async move {
        let clean = run(connector.as_ref(), &settings, serial, &events, rx).await;
        let _ = events.send(ControlEvent {
            serial,
            kind: ControlEventKind::Closed { clean },
        });
    });
    tx
}

/// Drives one connection until it ends. Returns whether it ended cleanly.
async fn run<C: Connector>(
    connector: &C,
    settings: &ControlSettings,
    serial: u64,
    events: &mpsc::UnboundedSender<ControlEvent>,
    mut commands: mpsc::UnboundedReceiver<ControlCommand>,
) -> bool {
    let conn = match connector.connect(&settings.url).await {
        Ok(conn) => conn,
        Err(e) => {
            warn!(serial, url = %settings.url, error = %e, "failed to reach matchmaking server");
            return false;
        }
    };
    let conn_id = conn.id();
    info!(serial, %conn_id, room = %settings.room_name, "connected to matchmaking server, joining room");

    let join = OutboundSignal::JoinRoom {
        join_room: settings.room_name.clone(),
    };
    if !send_signal(&conn, &join, serial).await {
        let _ = conn.close().await;
        return false;
    }

    let mut keep_alive =
        tokio::time::interval_at(Instant::now() + settings.keep_alive, settings.keep_alive);
    keep_alive.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            received = conn.recv() => match received {
                Ok(Some(text)) => {
                    let event = ControlEvent { serial, kind: ControlEventKind::Message(text) };
                    if events.send(event).is_err() {
                        let _ = conn.close().await;
                        return true;
                    }
                }
                Ok(None) => {
                    info!(serial, %conn_id, "matchmaking server closed the connection");
                    return true;
                }
                Err(e) => {
                    warn!(serial, %conn_id, error = %e, "control connection failed");
                    let _ = conn.close().await;
                    return false;
                }
            },

            command = commands.recv() => match command {
                Some(ControlCommand::Signal(signal)) => {
                    if !send_signal(&conn, &signal, serial).await {
                        let _ = conn.close().await;
                        return false;
                    }
                }
                Some(ControlCommand::Close) | None => {
                    debug!(serial, %conn_id, "closing control connection");
                    let _ = conn.close().await;
                    return true;
                }
            },

            _ = keep_alive.tick() => {
                if let Err(e) = conn.send(KEEP_ALIVE).await {
                    warn!(serial, %conn_id, error = %e, "keep-alive failed");
                    let _ = conn.close().await;
                    return false;
                }
            }
        }
    }
}

/// Sends one signal. Returns `false` if the connection is no longer usable.
///
/// A signal that fails to serialize is logged and skipped; it does not
/// take the connection down.
async fn send_signal<T: Connection>(conn: &T, signal: &OutboundSignal, serial: u64) -> bool {
    let text = match signal.to_json() {
        Ok(text) => text,
        Err(e) => {
            warn!(serial, error = %e, "dropping unserializable signal");
            return true;
        }
    };
    match conn.send(&text).await {
        Ok(()) => true,
        Err(e) => {
            warn!(serial, error = %e, "failed to send signal");
            false
        }
    }
}
