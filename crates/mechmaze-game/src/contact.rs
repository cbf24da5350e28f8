use std::fmt;

use glam::Vec2;
use serde::{Deserialize, Serialize};

use mechmaze_core::player::PlayerId;

/// Physics category of a body. Each category owns exactly one bit so the
/// physics engine can use them directly as collision masks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(u32)]
pub enum Category {
    Player = 1 << 0,
    Wall = 1 << 1,
    Checkpoint = 1 << 2,
    Spike = 1 << 3,
    Oil = 1 << 4,
    Grass = 1 << 5,
    Vortex = 1 << 6,
    Finish = 1 << 7,
}

impl Category {
    pub const ALL: [Category; 8] = [
        Category::Player,
        Category::Wall,
        Category::Checkpoint,
        Category::Spike,
        Category::Oil,
        Category::Grass,
        Category::Vortex,
        Category::Finish,
    ];

    pub fn bits(self) -> u32 {
        self as u32
    }

    /// Resolve a category bitmask. Fails unless exactly one known bit is set.
    pub fn from_bits(bits: u32) -> Option<Self> {
        Self::ALL.into_iter().find(|c| c.bits() == bits)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ContactPhase {
    Begin,
    End,
}

/// One side of a contact as reported by the physics engine.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContactBody {
    pub category: u32,
    /// Owning player, set for player bodies.
    pub player: Option<PlayerId>,
    /// Level node id, set for checkpoints and other placed nodes.
    pub node: Option<u64>,
    pub position: Vec2,
}

impl ContactBody {
    pub fn player(id: PlayerId, position: Vec2) -> Self {
        Self {
            category: Category::Player.bits(),
            player: Some(id),
            node: None,
            position,
        }
    }

    pub fn node(category: Category, node: u64, position: Vec2) -> Self {
        Self {
            category: category.bits(),
            player: None,
            node: Some(node),
            position,
        }
    }
}

/// Contact notification from the physics engine. The pair is unordered.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContactEvent {
    pub a: ContactBody,
    pub b: ContactBody,
    pub phase: ContactPhase,
    /// Physics time of the contact in seconds.
    pub timestamp: f64,
}

impl ContactEvent {
    pub fn begin(a: ContactBody, b: ContactBody, timestamp: f64) -> Self {
        Self {
            a,
            b,
            phase: ContactPhase::Begin,
            timestamp,
        }
    }

    pub fn end(a: ContactBody, b: ContactBody, timestamp: f64) -> Self {
        Self {
            a,
            b,
            phase: ContactPhase::End,
            timestamp,
        }
    }

    /// Whether either body belongs to `id`.
    pub fn involves(&self, id: PlayerId) -> bool {
        self.a.player == Some(id) || self.b.player == Some(id)
    }
}

/// What a player body touched.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ContactKind {
    Player,
    Wall,
    Checkpoint,
    Spike,
    Oil,
    Grass,
    Vortex,
    Finish,
}

/// A classified player contact.
#[derive(Debug, Clone, PartialEq)]
pub struct Contact {
    pub player: PlayerId,
    pub kind: ContactKind,
    pub phase: ContactPhase,
    /// Node id of the non-player body, if any.
    pub node: Option<u64>,
    /// Position of the non-player body.
    pub position: Vec2,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ContactError {
    UnknownCategory(u32),
    NoPlayerBody,
    MissingPlayerId,
}

impl fmt::Display for ContactError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::UnknownCategory(bits) => write!(f, "unknown contact category bits: {bits:#x}"),
            Self::NoPlayerBody => write!(f, "contact does not involve a player"),
            Self::MissingPlayerId => write!(f, "player body without a player id"),
        }
    }
}

impl std::error::Error for ContactError {}

/// Classify an unordered contact pair into the player it concerns and what
/// that player touched. For player-on-player contacts the first body's
/// player is reported.
pub fn classify(event: &ContactEvent) -> Result<Contact, ContactError> {
    let cat_a =
        Category::from_bits(event.a.category).ok_or(ContactError::UnknownCategory(event.a.category))?;
    let cat_b =
        Category::from_bits(event.b.category).ok_or(ContactError::UnknownCategory(event.b.category))?;

    let (player_body, other, other_cat) = match (cat_a, cat_b) {
        (Category::Player, c) => (&event.a, &event.b, c),
        (c, Category::Player) => (&event.b, &event.a, c),
        _ => return Err(ContactError::NoPlayerBody),
    };
    let player = player_body.player.ok_or(ContactError::MissingPlayerId)?;

    let kind = match other_cat {
        Category::Player => ContactKind::Player,
        Category::Wall => ContactKind::Wall,
        Category::Checkpoint => ContactKind::Checkpoint,
        Category::Spike => ContactKind::Spike,
        Category::Oil => ContactKind::Oil,
        Category::Grass => ContactKind::Grass,
        Category::Vortex => ContactKind::Vortex,
        Category::Finish => ContactKind::Finish,
    };

    Ok(Contact {
        player,
        kind,
        phase: event.phase,
        node: other.node,
        position: other.position,
    })
}
