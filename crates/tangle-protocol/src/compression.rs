//! Compression capability used by the frame codec.
//!
//! The codec only needs "encode these bytes" and "decode these bytes". It
//! doesn't care which implementation does the work, so the capability is a
//! trait and the room holds it as a trait object. [`Gzip`] is the default
//! implementation, behind the `gzip` feature flag (enabled by default).

use crate::ProtocolError;

/// Encodes and decodes payloads that exceed a single frame.
///
/// Both peers in a room must use the same format, since the frame tag only
/// says "compressed", not how.
pub trait Compression: Send + Sync + 'static {
    /// Compresses `data`.
    ///
    /// # Errors
    /// Returns [`ProtocolError::Compression`] if the encoder fails.
    fn compress(&self, data: &[u8]) -> Result<Vec<u8>, ProtocolError>;

    /// Decompresses `data` produced by [`compress`](Self::compress) on the
    /// remote side.
    ///
    /// # Errors
    /// Returns [`ProtocolError::Compression`] if `data` is not a valid
    /// stream for this format.
    fn decompress(&self, data: &[u8]) -> Result<Vec<u8>, ProtocolError>;
}

// ---------------------------------------------------------------------------
// Gzip
// ---------------------------------------------------------------------------

/// A [`Compression`] that speaks gzip (via `flate2`).
///
/// ```rust
/// use tangle_protocol::{Compression, Gzip};
///
/// let data = vec![7u8; 64 * 1024];
/// let packed = Gzip.compress(&data).unwrap();
/// assert!(packed.len() < data.len());
/// assert_eq!(Gzip.decompress(&packed).unwrap(), data);
/// ```
#[cfg(feature = "gzip")]
#[derive(Debug, Clone, Copy, Default)]
pub struct Gzip;

#[cfg(feature = "gzip")]
impl Compression for Gzip {
    fn compress(&self, data: &[u8]) -> Result<Vec<u8>, ProtocolError> {
        use std::io::Write;

        let mut encoder = flate2::write::GzEncoder::new(
            Vec::with_capacity(data.len() / 2),
            flate2::Compression::default(),
        );
        encoder.write_all(data).map_err(ProtocolError::Compression)?;
        encoder.finish().map_err(ProtocolError::Compression)
    }

    fn decompress(&self, data: &[u8]) -> Result<Vec<u8>, ProtocolError> {
        use std::io::Read;

        let mut decoder = flate2::read::GzDecoder::new(data);
        let mut out = Vec::with_capacity(data.len() * 2);
        decoder
            .read_to_end(&mut out)
            .map_err(ProtocolError::Compression)?;
        Ok(out)
    }
}
