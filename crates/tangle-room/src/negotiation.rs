//! Per-peer negotiation worker.
//!
//! Offer/answer/candidate steps for one peer are awaited one after another
//! on a dedicated task, in the order the room queued them. The room itself
//! never waits on a step, so a slow peer cannot stall the others.

use std::sync::Arc;

use serde_json::Value;
use tangle_protocol::{OutboundSignal, PeerId};
use tangle_transport::{PeerLink, TransportError};
use tokio::sync::mpsc;
use tracing::{debug, warn};

use crate::signaling::{ControlCommand, ControlSender};

/// One negotiation step for a peer.
#[derive(Debug, Clone, PartialEq)]
pub(crate) enum Negotiation {
    /// Create an offer and relay it.
    CreateOffer,
    /// Apply the peer's offer, then relay our answer.
    AnswerOffer(Value),
    /// Apply the peer's answer to our offer.
    AcceptAnswer(Value),
    /// Add a candidate the peer gathered.
    AddCandidate(Value),
}

impl Negotiation {
    fn name(&self) -> &'static str {
        match self {
            Self::CreateOffer => "create_offer",
            Self::AnswerOffer(_) => "answer_offer",
            Self::AcceptAnswer(_) => "accept_answer",
            Self::AddCandidate(_) => "add_candidate",
        }
    }
}

pub(crate) type NegotiationSender = mpsc::UnboundedSender<Negotiation>;

/// Spawns the worker for one peer and returns its step queue.
///
/// Offers and answers are relayed to `destination` through `control`. The
/// worker stops when the queue's sender is dropped.
pub(crate) fn spawn<L: PeerLink>(
    peer_id: PeerId,
    destination: String,
    link: Arc<L>,
    control: ControlSender,
) -> NegotiationSender {
    let (tx, rx) = mpsc::unbounded_channel();
    tokio::spawn(run(peer_id, destination, link, control, rx));
    tx
}

async fn run<L: PeerLink>(
    peer_id: PeerId,
    destination: String,
    link: Arc<L>,
    control: ControlSender,
    mut steps: mpsc::UnboundedReceiver<Negotiation>,
) {
    while let Some(step) = steps.recv().await {
        let name = step.name();
        match perform(link.as_ref(), step, &destination).await {
            Ok(Some(signal)) => {
                if control.send(ControlCommand::Signal(signal)).is_err() {
                    debug!(%peer_id, step = name, "control connection gone, dropping relay");
                }
            }
            Ok(None) => {}
            Err(e) => {
                warn!(%peer_id, step = name, error = %e, "negotiation step failed");
            }
        }
    }
    debug!(%peer_id, "negotiation worker stopped");
}

/// Runs one step and returns the signal to relay, if any.
async fn perform<L: PeerLink>(
    link: &L,
    step: Negotiation,
    destination: &str,
) -> Result<Option<OutboundSignal>, TransportError> {
    match step {
        Negotiation::CreateOffer => {
            let offer = link.create_offer().await?;
            Ok(Some(OutboundSignal::Offer {
                offer,
                destination: destination.to_owned(),
            }))
        }
        Negotiation::AnswerOffer(offer) => {
            let answer = link.create_answer(offer).await?;
            Ok(Some(OutboundSignal::Answer {
                answer,
                destination: destination.to_owned(),
            }))
        }
        Negotiation::AcceptAnswer(answer) => {
            link.accept_answer(answer).await?;
            Ok(None)
        }
        Negotiation::AddCandidate(candidate) => {
            link.add_ice_candidate(candidate).await?;
            Ok(None)
        }
    }
}
