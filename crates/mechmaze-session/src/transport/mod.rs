//! Peer transports. A transport owns discovery, invitations and the raw
//! byte channel between devices; everything it observes is reported as a
//! [`TransportEvent`] on the channel handed to it at construction, which the
//! session drains at the start of each tick.

pub mod local;
pub mod relay;

use std::fmt;

use bytes::Bytes;

use mechmaze_core::net::protocol::ProtocolError;
use mechmaze_core::player::PeerId;

/// Destination of an outgoing payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SendTarget {
    All,
    Peer(PeerId),
}

/// An invitation from another device to join its session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Invitation {
    pub from: PeerId,
    pub display_name: String,
}

#[derive(Debug, Clone, PartialEq)]
pub enum TransportEvent {
    /// A hosting device became visible while browsing.
    PeerDiscovered { peer: PeerId, display_name: String },
    /// A discovered device went away before connecting.
    PeerLost(PeerId),
    InvitationReceived(Invitation),
    PeerConnected(PeerId),
    PeerDisconnected(PeerId),
    Message { from: PeerId, payload: Bytes },
}

#[derive(Debug)]
pub enum TransportError {
    Closed,
    UnknownPeer(PeerId),
    NoInvitation(PeerId),
    AtCapacity,
    Connect(String),
    Protocol(ProtocolError),
}

impl fmt::Display for TransportError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Closed => write!(f, "transport closed"),
            Self::UnknownPeer(p) => write!(f, "unknown peer {p}"),
            Self::NoInvitation(p) => write!(f, "no pending invitation from peer {p}"),
            Self::AtCapacity => write!(f, "session is full"),
            Self::Connect(e) => write!(f, "connect failed: {e}"),
            Self::Protocol(e) => write!(f, "protocol error: {e}"),
        }
    }
}

impl std::error::Error for TransportError {}

impl From<ProtocolError> for TransportError {
    fn from(e: ProtocolError) -> Self {
        Self::Protocol(e)
    }
}

/// Session transport.
///
/// `send` is fire-and-forget and at-most-once: it never blocks and never
/// reports failure to the caller. Per-peer ordering is preserved.
pub trait Transport: Send {
    /// Advertise this device. Calling it again is a no-op.
    fn start_hosting(&mut self) -> Result<(), TransportError>;

    /// Look for hosting devices. Calling it again is a no-op.
    fn start_browsing(&mut self) -> Result<(), TransportError>;

    /// Invite a discovered peer. Completion is a `PeerConnected` event.
    fn invite(&mut self, peer: PeerId) -> Result<(), TransportError>;

    /// Accept an invitation. Completion is a `PeerConnected` event.
    fn accept(&mut self, invitation: &Invitation) -> Result<(), TransportError>;

    fn send(&mut self, payload: Bytes, to: SendTarget);

    /// App went to the background: stop moving data but keep connections.
    fn suspend(&mut self);

    fn resume(&mut self);

    /// Explicitly disconnect from every peer before shutting down.
    fn disconnect_all(&mut self);

    fn connected_peers(&self) -> Vec<PeerId>;
}
