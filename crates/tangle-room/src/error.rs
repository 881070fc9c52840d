//! Error types for the room layer.

/// Errors surfaced by [`Room`](crate::Room) operations.
///
/// Transport and protocol failures inside a running room are not reported
/// here: the room logs them, degrades to `Disconnected` if it has to, and
/// keeps retrying.
#[derive(Debug, thiserror::Error)]
pub enum RoomError {
    /// The room task has stopped (after `shutdown`, or because it panicked).
    #[error("room is unavailable")]
    Unavailable,

    /// The room could not be started.
    #[error("room setup failed: {0}")]
    Setup(String),
}
