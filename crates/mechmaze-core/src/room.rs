use std::fmt;

use rand::Rng;
use serde::{Deserialize, Serialize};

/// Characters allowed in a join code. Omits 0/O and 1/I so codes survive
/// being read aloud.
pub const JOIN_CODE_ALPHABET: &[u8] = b"ABCDEFGHJKLMNPQRSTUVWXYZ23456789";

/// Length of a join code.
pub const JOIN_CODE_LEN: usize = 6;

/// Maximum devices in one session (the local one plus up to 7 peers).
pub const MAX_SESSION_DEVICES: u8 = 8;

/// Configuration for a Mechmaze room.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoomConfig {
    pub max_players: u8,
    pub min_players: u8,
}

impl Default for RoomConfig {
    fn default() -> Self {
        Self {
            max_players: 4,
            min_players: 1,
        }
    }
}

/// Current state of a room.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RoomState {
    Lobby,
    InGame,
}

/// Lobby-level grouping of peers before the maze starts.
#[derive(Debug, Clone)]
pub struct Room {
    pub code: String,
    pub config: RoomConfig,
    pub state: RoomState,
}

impl Room {
    pub fn new(code: String, config: RoomConfig) -> Self {
        Self {
            code,
            config,
            state: RoomState::Lobby,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JoinCodeError {
    WrongLength(usize),
    InvalidChar(char),
}

impl fmt::Display for JoinCodeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::WrongLength(n) => {
                write!(f, "join code must be {JOIN_CODE_LEN} characters, got {n}")
            },
            Self::InvalidChar(c) => write!(f, "invalid character in join code: {c:?}"),
        }
    }
}

impl std::error::Error for JoinCodeError {}

/// Generate a random join code.
pub fn generate_join_code() -> String {
    let mut rng = rand::rng();
    (0..JOIN_CODE_LEN)
        .map(|_| JOIN_CODE_ALPHABET[rng.random_range(0..JOIN_CODE_ALPHABET.len())] as char)
        .collect()
}

/// Validate user-entered join code, returning its canonical (uppercase,
/// trimmed) form.
pub fn normalize_join_code(input: &str) -> Result<String, JoinCodeError> {
    let code = input.trim().to_ascii_uppercase();
    let len = code.chars().count();
    if len != JOIN_CODE_LEN {
        return Err(JoinCodeError::WrongLength(len));
    }
    if let Some(bad) = code
        .chars()
        .find(|c| !c.is_ascii() || !JOIN_CODE_ALPHABET.contains(&(*c as u8)))
    {
        return Err(JoinCodeError::InvalidChar(bad));
    }
    Ok(code)
}
