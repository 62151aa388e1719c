//! Wire formats for the cluster protocol.
//!
//! Everything on the wire is big-endian. A connection starts with one
//! handshake in each direction:
//!
//! ```text
//! magic:        4 bytes = "RDBC"
//! version:      u32
//! self_peer:    16 bytes
//! listen_port:  u16
//! n_known:      u32
//! known[n]:     { peer_id: 16, addr_len: u16, addr: utf8, port: u16 }
//! ```
//!
//! and then carries frames:
//!
//! ```text
//! tag:          u8
//! length:       u32   (payload byte count)
//! payload:      bytes
//! ```
//!
//! The mailbox layer's payload starts with a fixed routing header
//! (`dest_thread: u16`, `dest_mailbox: u32`); the metadata layer's utility
//! payload starts with a one-byte message kind.

use std::io;

use tokio::io::{AsyncRead, AsyncReadExt};

use crate::types::{MessageTag, PeerAddress, PeerId};

/// Protocol magic, first bytes of every handshake.
pub const PROTOCOL_MAGIC: [u8; 4] = *b"RDBC";

/// Protocol version. Connections between differing versions are rejected.
pub const PROTOCOL_VERSION: u32 = 1;

/// Frame header size: tag byte plus length word.
pub const FRAME_HEADER_SIZE: usize = 5;

/// Upper bound on a frame payload. Anything larger is a protocol violation.
pub const MAX_FRAME_SIZE: u32 = 16 * 1024 * 1024;

/// Upper bound on the peer list carried in a handshake.
pub const MAX_KNOWN_PEERS: u32 = 4096;

/// Mailbox routing header size: thread word plus mailbox id word.
pub const MAILBOX_HEADER_SIZE: usize = 6;

/// Utility sub-protocol kind: a serialized metadata snapshot follows.
pub const UTILITY_METADATA: u8 = 0x01;
/// Utility sub-protocol kind: a ping id follows.
pub const UTILITY_PING: u8 = 0x02;
/// Utility sub-protocol kind: an echoed ping id follows.
pub const UTILITY_PING_RESPONSE: u8 = 0x03;

/// Wire format error types.
#[derive(Debug, thiserror::Error)]
pub enum WireError {
    /// Handshake did not start with the protocol magic.
    #[error("bad protocol magic: {found:?}")]
    BadMagic {
        /// The four bytes actually received.
        found: [u8; 4],
    },

    /// Remote speaks a different protocol version.
    #[error("protocol version mismatch: local {local}, remote {remote}")]
    VersionMismatch {
        /// Our version.
        local: u32,
        /// The remote's version.
        remote: u32,
    },

    /// Not enough bytes to decode the value.
    #[error("truncated input: need {needed} bytes, have {have}")]
    Truncated {
        /// Minimum bytes required.
        needed: usize,
        /// Bytes available.
        have: usize,
    },

    /// Frame length field exceeds [`MAX_FRAME_SIZE`].
    #[error("frame too large: {size} bytes (max {MAX_FRAME_SIZE})")]
    FrameTooLarge {
        /// The offending length.
        size: u32,
    },

    /// Handshake peer list exceeds [`MAX_KNOWN_PEERS`].
    #[error("handshake lists {count} peers (max {MAX_KNOWN_PEERS})")]
    TooManyPeers {
        /// The offending count.
        count: u32,
    },

    /// Handshake address bytes were not valid UTF-8.
    #[error("malformed peer address in handshake")]
    MalformedAddress,

    /// First byte of a utility payload is not a known message kind.
    #[error("unknown utility message kind: {kind:#04x}")]
    UnknownUtilityKind {
        /// The unrecognized kind byte.
        kind: u8,
    },

    /// The underlying stream failed or closed mid-value.
    #[error("i/o error: {0}")]
    Io(#[from] io::Error),
}

// ── Handshake ───────────────────────────────────────────────────────────

/// Decoded handshake, one sent by each side when a connection opens.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Handshake {
    /// The sender's identity.
    pub peer_id: PeerId,
    /// The port the sender's listener is bound to.
    pub listen_port: u16,
    /// The sender's current routing table (peer-list gossip).
    pub known_peers: Vec<(PeerId, PeerAddress)>,
}

/// Encode a handshake, magic and version included.
pub fn encode_handshake(handshake: &Handshake) -> Vec<u8> {
    let mut buf = Vec::with_capacity(30 + handshake.known_peers.len() * 32);
    buf.extend_from_slice(&PROTOCOL_MAGIC);
    buf.extend_from_slice(&PROTOCOL_VERSION.to_be_bytes());
    buf.extend_from_slice(&handshake.peer_id.to_bytes());
    buf.extend_from_slice(&handshake.listen_port.to_be_bytes());
    buf.extend_from_slice(&(handshake.known_peers.len() as u32).to_be_bytes());
    for (peer, address) in &handshake.known_peers {
        buf.extend_from_slice(&peer.to_bytes());
        buf.extend_from_slice(&(address.host.len() as u16).to_be_bytes());
        buf.extend_from_slice(address.host.as_bytes());
        buf.extend_from_slice(&address.port.to_be_bytes());
    }
    buf
}

/// Read and validate one handshake from the stream.
///
/// # Errors
///
/// [`WireError::BadMagic`] / [`WireError::VersionMismatch`] on a remote that
/// is not speaking our protocol, [`WireError::Io`] if the stream ends early.
pub async fn read_handshake<R: AsyncRead + Unpin>(reader: &mut R) -> Result<Handshake, WireError> {
    let mut magic = [0u8; 4];
    reader.read_exact(&mut magic).await?;
    if magic != PROTOCOL_MAGIC {
        return Err(WireError::BadMagic { found: magic });
    }
    let version = reader.read_u32().await?;
    if version != PROTOCOL_VERSION {
        return Err(WireError::VersionMismatch {
            local: PROTOCOL_VERSION,
            remote: version,
        });
    }
    let mut id = [0u8; 16];
    reader.read_exact(&mut id).await?;
    let listen_port = reader.read_u16().await?;
    let n_known = reader.read_u32().await?;
    if n_known > MAX_KNOWN_PEERS {
        return Err(WireError::TooManyPeers { count: n_known });
    }
    let mut known_peers = Vec::with_capacity(n_known as usize);
    for _ in 0..n_known {
        let mut peer = [0u8; 16];
        reader.read_exact(&mut peer).await?;
        let addr_len = reader.read_u16().await?;
        let mut addr = vec![0u8; addr_len as usize];
        reader.read_exact(&mut addr).await?;
        let host = String::from_utf8(addr).map_err(|_| WireError::MalformedAddress)?;
        let port = reader.read_u16().await?;
        known_peers.push((PeerId::from_bytes(peer), PeerAddress::new(host, port)));
    }
    Ok(Handshake {
        peer_id: PeerId::from_bytes(id),
        listen_port,
        known_peers,
    })
}

// ── Frames ──────────────────────────────────────────────────────────────

/// Encode a frame: tag, payload length, payload.
///
/// # Errors
///
/// [`WireError::FrameTooLarge`] if the payload exceeds [`MAX_FRAME_SIZE`].
pub fn encode_frame(tag: MessageTag, payload: &[u8]) -> Result<Vec<u8>, WireError> {
    if payload.len() > MAX_FRAME_SIZE as usize {
        return Err(WireError::FrameTooLarge {
            size: payload.len() as u32,
        });
    }
    let mut buf = Vec::with_capacity(FRAME_HEADER_SIZE + payload.len());
    buf.push(tag.0);
    buf.extend_from_slice(&(payload.len() as u32).to_be_bytes());
    buf.extend_from_slice(payload);
    Ok(buf)
}

/// Read one frame from the stream.
///
/// # Errors
///
/// [`WireError::FrameTooLarge`] on an oversized length field (a protocol
/// violation), [`WireError::Io`] on stream failure or close. A clean close
/// at a frame boundary surfaces as an `UnexpectedEof` i/o error.
pub async fn read_frame<R: AsyncRead + Unpin>(
    reader: &mut R,
) -> Result<(MessageTag, Vec<u8>), WireError> {
    let tag = reader.read_u8().await?;
    let length = reader.read_u32().await?;
    if length > MAX_FRAME_SIZE {
        return Err(WireError::FrameTooLarge { size: length });
    }
    let mut payload = vec![0u8; length as usize];
    reader.read_exact(&mut payload).await?;
    Ok((MessageTag(tag), payload))
}

// ── Mailbox payload ─────────────────────────────────────────────────────

/// Build a mailbox-layer payload: routing header followed by user bytes.
pub fn encode_mailbox_payload(dest_thread: u16, dest_mailbox: u32, user: &[u8]) -> Vec<u8> {
    let mut buf = Vec::with_capacity(MAILBOX_HEADER_SIZE + user.len());
    buf.extend_from_slice(&dest_thread.to_be_bytes());
    buf.extend_from_slice(&dest_mailbox.to_be_bytes());
    buf.extend_from_slice(user);
    buf
}

/// Split a mailbox-layer payload into its routing header and user bytes.
///
/// # Errors
///
/// [`WireError::Truncated`] if the payload is shorter than the header.
pub fn decode_mailbox_header(payload: &[u8]) -> Result<(u16, u32), WireError> {
    if payload.len() < MAILBOX_HEADER_SIZE {
        return Err(WireError::Truncated {
            needed: MAILBOX_HEADER_SIZE,
            have: payload.len(),
        });
    }
    let thread = u16::from_be_bytes([payload[0], payload[1]]);
    let mailbox = u32::from_be_bytes([payload[2], payload[3], payload[4], payload[5]]);
    Ok((thread, mailbox))
}

// ── Utility sub-protocol ────────────────────────────────────────────────

/// A decoded utility-layer message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UtilityMessage {
    /// A serialized metadata snapshot to be joined locally.
    Metadata(Vec<u8>),
    /// A request for an acknowledgement.
    Ping(u64),
    /// The acknowledgement.
    PingResponse(u64),
}

/// Encode a metadata snapshot as a utility payload.
pub fn encode_utility_metadata(snapshot: &[u8]) -> Vec<u8> {
    let mut buf = Vec::with_capacity(1 + snapshot.len());
    buf.push(UTILITY_METADATA);
    buf.extend_from_slice(snapshot);
    buf
}

/// Encode a ping as a utility payload.
pub fn encode_utility_ping(id: u64) -> Vec<u8> {
    let mut buf = Vec::with_capacity(9);
    buf.push(UTILITY_PING);
    buf.extend_from_slice(&id.to_be_bytes());
    buf
}

/// Encode a ping response as a utility payload.
pub fn encode_utility_ping_response(id: u64) -> Vec<u8> {
    let mut buf = Vec::with_capacity(9);
    buf.push(UTILITY_PING_RESPONSE);
    buf.extend_from_slice(&id.to_be_bytes());
    buf
}

/// Decode a utility payload.
///
/// # Errors
///
/// [`WireError::Truncated`] on an empty payload or a short ping id,
/// [`WireError::UnknownUtilityKind`] on an unrecognized kind byte.
pub fn decode_utility(payload: &[u8]) -> Result<UtilityMessage, WireError> {
    let (&kind, rest) = payload.split_first().ok_or(WireError::Truncated {
        needed: 1,
        have: 0,
    })?;
    match kind {
        UTILITY_METADATA => Ok(UtilityMessage::Metadata(rest.to_vec())),
        UTILITY_PING | UTILITY_PING_RESPONSE => {
            if rest.len() < 8 {
                return Err(WireError::Truncated {
                    needed: 9,
                    have: payload.len(),
                });
            }
            let id = u64::from_be_bytes([
                rest[0], rest[1], rest[2], rest[3], rest[4], rest[5], rest[6], rest[7],
            ]);
            if kind == UTILITY_PING {
                Ok(UtilityMessage::Ping(id))
            } else {
                Ok(UtilityMessage::PingResponse(id))
            }
        }
        kind => Err(WireError::UnknownUtilityKind { kind }),
    }
}
