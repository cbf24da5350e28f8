use std::fmt;

use glam::Vec2;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Stable identity of a player, shared by every device in the session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct PlayerId(pub Uuid);

impl PlayerId {
    pub fn new_random() -> Self {
        Self(Uuid::new_v4())
    }
}

impl fmt::Display for PlayerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Transport-level handle for a connected device. Only meaningful to the
/// transport that issued it.
pub type PeerId = u64;

/// Screen edge a player is responsible for when scrolling the shared map.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Edge {
    Left,
    Right,
    Top,
    Bottom,
}

impl Edge {
    /// Assignment order used when handing out edge roles.
    pub const ALL: [Edge; 4] = [Edge::Left, Edge::Right, Edge::Top, Edge::Bottom];

    /// Unit direction the camera scrolls in when this edge is pushed.
    /// World space is y-up.
    pub fn scroll_direction(self) -> Vec2 {
        match self {
            Edge::Left => Vec2::NEG_X,
            Edge::Right => Vec2::X,
            Edge::Top => Vec2::Y,
            Edge::Bottom => Vec2::NEG_Y,
        }
    }
}

/// One device in the session, including the local one.
///
/// For the local player `position`/`velocity` come from the physics world.
/// For remote players `target_*` holds the last accepted sync message and
/// `position` is the smoothed value shown on screen.
#[derive(Debug, Clone, PartialEq)]
pub struct NetworkPlayer {
    pub id: PlayerId,
    pub peer: PeerId,
    pub display_name: String,
    pub color: MechColor,
    pub is_local: bool,
    pub position: Vec2,
    pub velocity: Vec2,
    pub target_position: Vec2,
    pub target_velocity: Vec2,
    /// Sender timestamp (ms) of the last accepted sync message.
    pub last_seen: Option<u64>,
    pub is_ready: bool,
    pub is_map_mover: bool,
    pub assigned_edge: Option<Edge>,
}

impl NetworkPlayer {
    pub fn new(id: PlayerId, peer: PeerId, display_name: String, is_local: bool) -> Self {
        Self {
            id,
            peer,
            display_name,
            color: MechColor::default(),
            is_local,
            position: Vec2::ZERO,
            velocity: Vec2::ZERO,
            target_position: Vec2::ZERO,
            target_velocity: Vec2::ZERO,
            last_seen: None,
            is_ready: false,
            is_map_mover: false,
            assigned_edge: None,
        }
    }

    /// Move the player (and its sync target) to `point`, zeroing velocity.
    pub fn place_at(&mut self, point: Vec2) {
        self.position = point;
        self.target_position = point;
        self.velocity = Vec2::ZERO;
        self.target_velocity = Vec2::ZERO;
    }
}

/// Mech paint color, picked from a fixed palette by roster slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct MechColor {
    pub r: u8,
    pub g: u8,
    pub b: u8,
}

impl Default for MechColor {
    fn default() -> Self {
        Self::PALETTE[0]
    }
}

impl MechColor {
    pub const PALETTE: &[MechColor] = &[
        MechColor {
            r: 255,
            g: 87,
            b: 87,
        }, // Red
        MechColor {
            r: 78,
            g: 205,
            b: 196,
        }, // Teal
        MechColor {
            r: 255,
            g: 195,
            b: 18,
        }, // Yellow
        MechColor {
            r: 130,
            g: 88,
            b: 255,
        }, // Purple
        MechColor {
            r: 46,
            g: 213,
            b: 115,
        }, // Green
        MechColor {
            r: 255,
            g: 148,
            b: 77,
        }, // Orange
        MechColor {
            r: 83,
            g: 152,
            b: 255,
        }, // Blue
        MechColor {
            r: 255,
            g: 107,
            b: 175,
        }, // Pink
    ];

    /// Palette color for a roster slot, wrapping past the end.
    pub fn for_slot(slot: usize) -> Self {
        Self::PALETTE[slot % Self::PALETTE.len()]
    }
}
