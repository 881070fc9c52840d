//! Peer-to-peer message framing.
//!
//! Data channels cap the size of a single frame, so application payloads
//! are turned into one or more bounded frames on the way out and stitched
//! back together on the way in.
//!
//! ```text
//! SinglePart            [3][payload ........]                  payload <= M
//! SinglePartGzipped     [4][gzip(payload) ..]                  gzip <= M
//! MultiPartStart        [1][len: u32 BE][first M bytes of gzip]
//! MultiPartContinuation [2][next <= M bytes of gzip] ...
//! ```
//!
//! There are no sequence numbers. The frames of one message are sent back to
//! back and the channel is reliable and ordered, which is the only thing
//! that keeps reassembly correct. Do not use this framing over an unordered
//! transport.

use std::borrow::Cow;

use crate::{Compression, ProtocolError};

/// Largest number of payload bytes carried by one frame.
pub const MAX_FRAME_PAYLOAD: usize = 16_000;

/// Header size of a [`FrameKind::MultiPartStart`] frame (tag + length).
pub const MULTI_PART_HEADER: usize = 5;

/// Largest frame this codec ever produces.
pub const MAX_FRAME_SIZE: usize = MAX_FRAME_PAYLOAD + MULTI_PART_HEADER;

/// Upper bound on how much a reassembly buffer reserves ahead of the data
/// it has actually received.
const MAX_RESERVE: usize = 1 << 20;

// ---------------------------------------------------------------------------
// FrameKind
// ---------------------------------------------------------------------------

/// The leading tag byte of every frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum FrameKind {
    /// First fragment of a compressed payload, carrying its total length.
    MultiPartStart = 1,
    /// A following fragment.
    MultiPartContinuation = 2,
    /// A complete, uncompressed payload.
    SinglePart = 3,
    /// A complete, compressed payload.
    SinglePartGzipped = 4,
}

impl FrameKind {
    /// The wire value of this kind.
    pub fn tag(self) -> u8 {
        self as u8
    }
}

impl TryFrom<u8> for FrameKind {
    type Error = ProtocolError;

    fn try_from(tag: u8) -> Result<Self, Self::Error> {
        match tag {
            1 => Ok(Self::MultiPartStart),
            2 => Ok(Self::MultiPartContinuation),
            3 => Ok(Self::SinglePart),
            4 => Ok(Self::SinglePartGzipped),
            other => Err(ProtocolError::UnknownFrameTag(other)),
        }
    }
}

// ---------------------------------------------------------------------------
// Encoding
// ---------------------------------------------------------------------------

/// How a payload was laid out for the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Encoding {
    /// One [`FrameKind::SinglePart`] frame.
    Plain,
    /// One [`FrameKind::SinglePartGzipped`] frame.
    Compressed,
    /// A start frame followed by continuations.
    Fragmented,
}

/// A payload prepared for sending.
///
/// Encoding is done once per send and the frames are then written to as many
/// peers as needed. Compression is only attempted when the raw payload is
/// already too large for one frame (small inputs tend to grow under gzip),
/// and the compressed result is checked against the limit again before
/// falling back to fragmentation.
#[derive(Debug, Clone)]
pub struct EncodedMessage<'a> {
    encoding: Encoding,
    body: Cow<'a, [u8]>,
}

impl<'a> EncodedMessage<'a> {
    /// Chooses the encoding for `payload`.
    ///
    /// # Errors
    /// - [`ProtocolError::Compression`] if compressing a large payload fails.
    /// - [`ProtocolError::MessageTooLarge`] if the compressed payload does not
    ///   fit in the 32-bit length field.
    pub fn encode(
        payload: &'a [u8],
        compression: &dyn Compression,
    ) -> Result<Self, ProtocolError> {
        if payload.len() <= MAX_FRAME_PAYLOAD {
            return Ok(Self {
                encoding: Encoding::Plain,
                body: Cow::Borrowed(payload),
            });
        }

        let compressed = compression.compress(payload)?;
        if compressed.len() <= MAX_FRAME_PAYLOAD {
            return Ok(Self {
                encoding: Encoding::Compressed,
                body: Cow::Owned(compressed),
            });
        }

        if u32::try_from(compressed.len()).is_err() {
            return Err(ProtocolError::MessageTooLarge(compressed.len()));
        }
        Ok(Self {
            encoding: Encoding::Fragmented,
            body: Cow::Owned(compressed),
        })
    }

    /// The layout chosen for this payload.
    pub fn encoding(&self) -> Encoding {
        self.encoding
    }

    /// The bytes that travel on the wire, before framing. For compressed
    /// and fragmented messages this is the compressed payload.
    pub fn body(&self) -> &[u8] {
        &self.body
    }

    /// Number of frames [`write_frames`](Self::write_frames) will emit.
    pub fn frame_count(&self) -> usize {
        match self.encoding {
            Encoding::Plain | Encoding::Compressed => 1,
            Encoding::Fragmented => self.body.len().div_ceil(MAX_FRAME_PAYLOAD),
        }
    }

    /// Writes each frame into `scratch` and hands it to `emit`, in order.
    ///
    /// `scratch` is cleared before every frame, so one buffer can be reused
    /// for every send as long as `emit` copies the frame before returning
    /// (data channel sends do). Stops at the first error from `emit`.
    pub fn write_frames<E>(
        &self,
        scratch: &mut Vec<u8>,
        mut emit: impl FnMut(&[u8]) -> Result<(), E>,
    ) -> Result<(), E> {
        match self.encoding {
            Encoding::Plain => {
                single_frame(scratch, FrameKind::SinglePart, &self.body);
                emit(scratch)
            }
            Encoding::Compressed => {
                single_frame(scratch, FrameKind::SinglePartGzipped, &self.body);
                emit(scratch)
            }
            Encoding::Fragmented => {
                // `encode` guarantees the body is longer than one frame and
                // that its length fits in a u32.
                let declared = self.body.len() as u32;
                let (first, rest) = self.body.split_at(MAX_FRAME_PAYLOAD);

                scratch.clear();
                scratch.push(FrameKind::MultiPartStart.tag());
                scratch.extend_from_slice(&declared.to_be_bytes());
                scratch.extend_from_slice(first);
                emit(scratch)?;

                for chunk in rest.chunks(MAX_FRAME_PAYLOAD) {
                    single_frame(scratch, FrameKind::MultiPartContinuation, chunk);
                    emit(scratch)?;
                }
                Ok(())
            }
        }
    }

    /// Collects every frame into its own allocation.
    pub fn to_frames(&self) -> Vec<Vec<u8>> {
        let mut frames = Vec::with_capacity(self.frame_count());
        let mut scratch = Vec::with_capacity(MAX_FRAME_SIZE);
        let _ = self.write_frames(&mut scratch, |frame| {
            frames.push(frame.to_vec());
            Ok::<(), std::convert::Infallible>(())
        });
        frames
    }
}

fn single_frame(scratch: &mut Vec<u8>, kind: FrameKind, data: &[u8]) {
    scratch.clear();
    scratch.push(kind.tag());
    scratch.extend_from_slice(data);
}

// ---------------------------------------------------------------------------
// Reassembler
// ---------------------------------------------------------------------------

/// Per-peer decoding state.
///
/// Holds at most one multi-part message in flight. Frames from one peer must
/// be pushed in the order the channel delivered them; frames from different
/// peers must go to different reassemblers.
#[derive(Debug, Default)]
pub struct Reassembler {
    buffer: Vec<u8>,
    declared: usize,
    active: bool,
}

impl Reassembler {
    /// Creates an idle reassembler.
    pub fn new() -> Self {
        Self::default()
    }

    /// Feeds one frame and returns the payload if it completed a message.
    ///
    /// Zero-length frames are ignored. A start frame that arrives while a
    /// multi-part message is still unfinished discards the unfinished one.
    ///
    /// # Errors
    /// - [`ProtocolError::UnknownFrameTag`] for an unrecognised tag byte.
    /// - [`ProtocolError::TruncatedFrame`] for a start frame without its
    ///   length field.
    /// - [`ProtocolError::UnexpectedContinuation`] for a continuation with
    ///   nothing in flight.
    /// - [`ProtocolError::ReassemblyOverflow`] when a message receives more
    ///   bytes than it declared. The in-flight message is dropped.
    /// - [`ProtocolError::Compression`] if a completed payload fails to
    ///   decompress.
    pub fn push(
        &mut self,
        frame: &[u8],
        compression: &dyn Compression,
    ) -> Result<Option<Vec<u8>>, ProtocolError> {
        let Some((&tag, data)) = frame.split_first() else {
            return Ok(None);
        };

        match FrameKind::try_from(tag)? {
            FrameKind::SinglePart => Ok(Some(data.to_vec())),
            FrameKind::SinglePartGzipped => compression.decompress(data).map(Some),
            FrameKind::MultiPartStart => {
                if data.len() < MULTI_PART_HEADER - 1 {
                    return Err(ProtocolError::TruncatedFrame {
                        tag,
                        len: frame.len(),
                    });
                }
                let (length, data) = data.split_at(MULTI_PART_HEADER - 1);
                let declared =
                    u32::from_be_bytes([length[0], length[1], length[2], length[3]]) as usize;

                self.reset();
                self.declared = declared;
                self.active = true;
                self.buffer.reserve(declared.min(MAX_RESERVE));
                self.append(data, compression)
            }
            FrameKind::MultiPartContinuation => {
                if !self.active {
                    return Err(ProtocolError::UnexpectedContinuation);
                }
                self.append(data, compression)
            }
        }
    }

    fn append(
        &mut self,
        data: &[u8],
        compression: &dyn Compression,
    ) -> Result<Option<Vec<u8>>, ProtocolError> {
        let received = self.buffer.len() + data.len();
        if received > self.declared {
            let declared = self.declared;
            self.reset();
            return Err(ProtocolError::ReassemblyOverflow { declared, received });
        }

        self.buffer.extend_from_slice(data);
        if self.buffer.len() < self.declared {
            return Ok(None);
        }

        let complete = std::mem::take(&mut self.buffer);
        self.reset();
        compression.decompress(&complete).map(Some)
    }

    /// Whether a multi-part message is currently being collected.
    pub fn is_in_progress(&self) -> bool {
        self.active
    }

    /// Bytes collected so far for the in-flight message.
    pub fn received(&self) -> usize {
        self.buffer.len()
    }

    /// Declared length of the in-flight message, if any.
    pub fn declared(&self) -> Option<usize> {
        self.active.then_some(self.declared)
    }

    /// Drops any in-flight message.
    pub fn reset(&mut self) {
        self.buffer = Vec::new();
        self.declared = 0;
        self.active = false;
    }
}
