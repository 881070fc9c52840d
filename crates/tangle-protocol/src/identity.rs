//! Peer identity derived from transport-layer addresses.
//!
//! The matchmaking server only ever talks about peers by address
//! (`ipv4:port`). Both ends of a connection turn that address into the same
//! number, which makes the address the one namespace every client shares.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Numeric identifier of a participant in a room.
///
/// `PeerId(0)` is reserved for "system" messages. A client that has not yet
/// learned its own address uses [`PeerId::UNASSIGNED`].
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct PeerId(pub u64);

impl PeerId {
    /// Reserved identifier for messages that originate from the system.
    pub const SYSTEM: PeerId = PeerId(0);

    /// Local identifier used before the server reports our address.
    pub const UNASSIGNED: PeerId = PeerId(1);

    /// Computes the identifier for an `ipv4:port` address.
    ///
    /// The value is the big-endian 32-bit IPv4 address plus the port,
    /// added arithmetically:
    ///
    /// ```text
    /// o0 * 256^3 + o1 * 256^2 + o2 * 256 + o3 + port
    /// ```
    ///
    /// Input is not validated. Any component that does not parse counts as
    /// zero and oversized components wrap, so a malformed address still
    /// yields an id, just not a meaningful one. The signaling server is trusted to send well-formed
    /// addresses.
    ///
    /// ```rust
    /// use tangle_protocol::PeerId;
    ///
    /// let id = PeerId::from_address("10.0.0.1:5000");
    /// assert_eq!(id, PeerId(10 * 256u64.pow(3) + 1 + 5000));
    /// ```
    pub fn from_address(address: &str) -> PeerId {
        let address = address.trim();
        let (host, port) = address.split_once(':').unwrap_or((address, ""));

        let host = host
            .split('.')
            .take(4)
            .map(parse_component)
            .chain(std::iter::repeat(0))
            .take(4)
            .fold(0u64, |acc, octet| acc.wrapping_mul(256).wrapping_add(octet));

        PeerId(host.wrapping_add(parse_component(port)))
    }

    /// Returns the underlying `u64` value.
    pub fn into_inner(self) -> u64 {
        self.0
    }
}

impl Default for PeerId {
    fn default() -> Self {
        Self::UNASSIGNED
    }
}

impl fmt::Display for PeerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "peer-{}", self.0)
    }
}

fn parse_component(part: &str) -> u64 {
    part.trim().parse().unwrap_or(0)
}
