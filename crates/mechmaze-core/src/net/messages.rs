use glam::Vec2;
use serde::{Deserialize, Serialize};

use crate::player::{PeerId, PlayerId};

/// Network message type discriminator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[repr(u8)]
pub enum MessageType {
    // Peer <-> Peer
    Hello = 0x01,
    Goodbye = 0x02,
    Ready = 0x03,
    PlayerState = 0x10,
    GameStart = 0x11,
    Outcome = 0x12,

    // Peer <-> Relay
    RelayJoin = 0x30,
    RelayWelcome = 0x31,
    RelayPeerJoined = 0x32,
    RelayPeerLeft = 0x33,
    RelayForward = 0x34,
    RelayDeliver = 0x35,
    RelayError = 0x36,
}

impl MessageType {
    pub fn from_byte(b: u8) -> Option<Self> {
        match b {
            0x01 => Some(Self::Hello),
            0x02 => Some(Self::Goodbye),
            0x03 => Some(Self::Ready),
            0x10 => Some(Self::PlayerState),
            0x11 => Some(Self::GameStart),
            0x12 => Some(Self::Outcome),
            0x30 => Some(Self::RelayJoin),
            0x31 => Some(Self::RelayWelcome),
            0x32 => Some(Self::RelayPeerJoined),
            0x33 => Some(Self::RelayPeerLeft),
            0x34 => Some(Self::RelayForward),
            0x35 => Some(Self::RelayDeliver),
            0x36 => Some(Self::RelayError),
            _ => None,
        }
    }

    /// Whether this type is exchanged with the relay rather than with peers.
    pub fn is_relay_control(self) -> bool {
        (self as u8) >= 0x30
    }
}

// ---------------------------------------------------------------------------
// Peer messages
// ---------------------------------------------------------------------------

/// First message sent to a newly connected peer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HelloMsg {
    pub player_id: PlayerId,
    pub display_name: String,
    pub is_host: bool,
    pub protocol_version: u8,
}

/// Sent to all peers before an orderly shutdown.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GoodbyeMsg {
    pub player_id: PlayerId,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReadyMsg {
    pub player_id: PlayerId,
    pub ready: bool,
}

/// Transform of one player, broadcast every sync tick by its owner.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlayerStateMsg {
    pub player_id: PlayerId,
    pub position: Vec2,
    pub velocity: Vec2,
    /// Sender wall clock in milliseconds.
    pub timestamp_ms: u64,
}

/// Host's start signal. `order` is the host's join order and fixes edge
/// assignment on every device.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GameStartMsg {
    pub level: u32,
    pub starting_lives: u32,
    pub order: Vec<PlayerId>,
}

/// A shared-state outcome decided on the originating device.
///
/// `game` counts New Games since the session started; outcomes from an
/// earlier game are stale.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Outcome {
    /// One life lost when the team had `lives_before`.
    Damage {
        game: u32,
        lives_before: u32,
    },
    /// `section` is the sender's section count after reaching the checkpoint.
    CheckpointReached {
        checkpoint: Option<u64>,
        point: Vec2,
        section: u32,
    },
    FinishPresence {
        inside: bool,
    },
    Respawned,
    NewGame {
        game: u32,
    },
    LevelComplete {
        level: u32,
    },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OutcomeMsg {
    pub player_id: PlayerId,
    pub outcome: Outcome,
}

/// Messages exchanged directly between peers.
#[derive(Debug, Clone, PartialEq)]
pub enum PeerMessage {
    Hello(HelloMsg),
    Goodbye(GoodbyeMsg),
    Ready(ReadyMsg),
    PlayerState(PlayerStateMsg),
    GameStart(GameStartMsg),
    Outcome(OutcomeMsg),
}

impl PeerMessage {
    pub fn message_type(&self) -> MessageType {
        match self {
            Self::Hello(_) => MessageType::Hello,
            Self::Goodbye(_) => MessageType::Goodbye,
            Self::Ready(_) => MessageType::Ready,
            Self::PlayerState(_) => MessageType::PlayerState,
            Self::GameStart(_) => MessageType::GameStart,
            Self::Outcome(_) => MessageType::Outcome,
        }
    }
}

// ---------------------------------------------------------------------------
// Relay control messages
// ---------------------------------------------------------------------------

/// First frame on a relay connection. An empty `join_code` creates a room.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RelayJoinMsg {
    pub join_code: String,
    pub protocol_version: u8,
}

/// Relay's answer to a successful join.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RelayWelcomeMsg {
    pub join_code: String,
    pub peer_id: PeerId,
    /// Peers already in the room.
    pub peers: Vec<PeerId>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RelayPeerMsg {
    pub peer_id: PeerId,
}

/// Payload to forward. `to: None` means every other member of the room.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RelayForwardMsg {
    pub to: Option<PeerId>,
    pub payload: Vec<u8>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RelayDeliverMsg {
    pub from: PeerId,
    pub payload: Vec<u8>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RelayErrorMsg {
    pub reason: String,
}

/// Messages exchanged between a peer and the relay.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RelayMessage {
    Join(RelayJoinMsg),
    Welcome(RelayWelcomeMsg),
    PeerJoined(RelayPeerMsg),
    PeerLeft(RelayPeerMsg),
    Forward(RelayForwardMsg),
    Deliver(RelayDeliverMsg),
    Error(RelayErrorMsg),
}

impl RelayMessage {
    pub fn message_type(&self) -> MessageType {
        match self {
            Self::Join(_) => MessageType::RelayJoin,
            Self::Welcome(_) => MessageType::RelayWelcome,
            Self::PeerJoined(_) => MessageType::RelayPeerJoined,
            Self::PeerLeft(_) => MessageType::RelayPeerLeft,
            Self::Forward(_) => MessageType::RelayForward,
            Self::Deliver(_) => MessageType::RelayDeliver,
            Self::Error(_) => MessageType::RelayError,
        }
    }
}
