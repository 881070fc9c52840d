//! Error types for the protocol layer.
//!
//! Everything that can go wrong while turning bytes into peer messages or
//! control messages ends up here. None of these errors are fatal to a room:
//! the caller logs them and drops the offending frame or message.

/// Errors that can occur in the protocol layer.
#[derive(Debug, thiserror::Error)]
pub enum ProtocolError {
    /// Serializing an outbound control message failed.
    #[error("encode failed: {0}")]
    Encode(serde_json::Error),

    /// The JSON body of an inbound control message could not be parsed.
    #[error("decode failed: {0}")]
    Decode(serde_json::Error),

    /// The control message parsed but carries none of the known fields,
    /// or a required companion field is missing.
    #[error("invalid message: {0}")]
    InvalidMessage(String),

    /// The compression capability failed to encode or decode a payload.
    #[error("compression failed: {0}")]
    Compression(#[source] std::io::Error),

    /// The leading tag byte of a frame is not a known frame kind.
    #[error("unknown frame tag {0}")]
    UnknownFrameTag(u8),

    /// A frame is shorter than its header requires.
    #[error("truncated frame: tag {tag}, {len} bytes")]
    TruncatedFrame {
        /// The frame's tag byte.
        tag: u8,
        /// Total length of the frame including the tag.
        len: usize,
    },

    /// A continuation frame arrived with no multi-part message in flight.
    #[error("continuation frame without a multi-part start")]
    UnexpectedContinuation,

    /// A multi-part message received more bytes than its header declared.
    #[error("multi-part message overflow: declared {declared} bytes, received {received}")]
    ReassemblyOverflow {
        /// Length announced by the start frame.
        declared: usize,
        /// Bytes received so far, including the offending frame.
        received: usize,
    },

    /// A compressed payload does not fit the 32-bit length field.
    #[error("message too large to frame: {0} bytes")]
    MessageTooLarge(usize),
}
