use serde::{Deserialize, Serialize};

use mechmaze_core::time::timestamp_now;

/// Score record emitted when a level is completed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScoreRecord {
    pub level: u32,
    pub section: u32,
    /// Completion time, Unix seconds with a `Z` suffix.
    pub date: String,
}

impl ScoreRecord {
    pub fn now(level: u32, section: u32) -> Self {
        Self {
            level,
            section,
            date: timestamp_now(),
        }
    }
}
