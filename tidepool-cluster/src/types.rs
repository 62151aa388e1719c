//! Identity and addressing types.

use serde::{Deserialize, Serialize};

/// Process-wide-unique peer identity, minted at node start.
///
/// A `PeerId` names one *run* of one node: a process that restarts and
/// rejoins the mesh does so under a fresh id. The distinguished nil value
/// (all zeros) is a sentinel and never a live identity.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize,
)]
pub struct PeerId {
    /// First 64 bits.
    pub first: u64,
    /// Second 64 bits.
    pub second: u64,
}

impl PeerId {
    /// The nil sentinel.
    pub const NIL: PeerId = PeerId {
        first: 0,
        second: 0,
    };

    /// Construct from explicit halves.
    pub const fn new(first: u64, second: u64) -> Self {
        Self { first, second }
    }

    /// Mint a fresh random, non-nil id.
    pub fn random() -> Self {
        loop {
            let id = Self::new(rand::random(), rand::random());
            if !id.is_nil() {
                return id;
            }
        }
    }

    /// Whether this is the nil sentinel.
    pub const fn is_nil(&self) -> bool {
        self.first == 0 && self.second == 0
    }

    /// The raw 16-byte big-endian representation used on the wire.
    pub fn to_bytes(self) -> [u8; 16] {
        let mut buf = [0u8; 16];
        buf[..8].copy_from_slice(&self.first.to_be_bytes());
        buf[8..].copy_from_slice(&self.second.to_be_bytes());
        buf
    }

    /// Rebuild from the wire representation.
    pub fn from_bytes(buf: [u8; 16]) -> Self {
        let mut first = [0u8; 8];
        let mut second = [0u8; 8];
        first.copy_from_slice(&buf[..8]);
        second.copy_from_slice(&buf[8..]);
        Self::new(u64::from_be_bytes(first), u64::from_be_bytes(second))
    }
}

impl std::fmt::Display for PeerId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:016x}{:016x}", self.first, self.second)
    }
}

/// A `(host, port)` pair sufficient to initiate a TCP connection.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PeerAddress {
    /// Host name or IP literal.
    pub host: String,
    /// TCP port.
    pub port: u16,
}

impl PeerAddress {
    /// Construct an address.
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
        }
    }
}

impl std::fmt::Display for PeerAddress {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}", self.host, self.port)
    }
}

/// Small integer handler id, scoped to one process.
///
/// Tags `0` and `1` are reserved for the metadata and mailbox layers; user
/// handlers are assigned tags from `2` upward, densely, in registration
/// order. A tag is released (and may be reused) when its registration is
/// dropped.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct MessageTag(
    /// The tag byte as it appears on the wire.
    pub u8,
);

impl MessageTag {
    /// Reserved tag for the metadata cluster's utility sub-protocol.
    pub const UTILITY: MessageTag = MessageTag(0);
    /// Reserved tag for the mailbox layer.
    pub const MAILBOX: MessageTag = MessageTag(1);
    /// Lowest tag handed out to user handlers.
    pub const FIRST_USER: u8 = 2;
}

impl std::fmt::Display for MessageTag {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}
