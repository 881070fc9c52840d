//! Unified error type for Tangle.

use tangle_protocol::ProtocolError;
use tangle_room::RoomError;
use tangle_transport::TransportError;

/// Top-level error that wraps all crate-specific errors.
///
/// When using the `tangle` meta-crate, you deal with this single error type
/// instead of importing errors from each sub-crate. The `#[from]` attribute
/// on each variant generates the `From` impls, so `?` converts sub-crate
/// errors automatically.
#[derive(Debug, thiserror::Error)]
pub enum TangleError {
    /// A transport-level error (dial, send, receive, negotiation).
    #[error(transparent)]
    Transport(#[from] TransportError),

    /// A protocol-level error (framing, compression, control messages).
    #[error(transparent)]
    Protocol(#[from] ProtocolError),

    /// A room-level error (setup failed, room stopped).
    #[error(transparent)]
    Room(#[from] RoomError),
}
