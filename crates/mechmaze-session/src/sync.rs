use glam::Vec2;

use mechmaze_core::net::messages::PlayerStateMsg;
use mechmaze_core::player::NetworkPlayer;

use crate::roster::Roster;

/// Default fraction of the remaining distance covered per frame.
pub const INTERPOLATION_FACTOR: f32 = 0.15;

/// Remote positions closer than this to their target snap onto it.
const SNAP_DISTANCE: f32 = 1e-3;

/// What happened to an incoming state message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncOutcome {
    Accepted,
    /// Not newer than the last accepted message for this player.
    Stale,
    UnknownPlayer,
    /// A peer tried to write the local player's state.
    Local,
}

/// Player-state synchronization: builds the local broadcast and merges
/// remote updates with timestamp last-writer-wins.
#[derive(Debug, Clone)]
pub struct StateSync {
    factor: f32,
    stale_dropped: u64,
}

impl StateSync {
    pub fn new(factor: f32) -> Self {
        Self {
            factor: factor.clamp(0.0, 1.0),
            stale_dropped: 0,
        }
    }

    pub fn factor(&self) -> f32 {
        self.factor
    }

    /// Number of stale messages discarded so far.
    pub fn stale_dropped(&self) -> u64 {
        self.stale_dropped
    }

    /// State message for the local player, stamped `timestamp_ms`.
    pub fn local_state(player: &NetworkPlayer, timestamp_ms: u64) -> PlayerStateMsg {
        PlayerStateMsg {
            player_id: player.id,
            position: player.position,
            velocity: player.velocity,
            timestamp_ms,
        }
    }

    /// Merge a received state. Only strictly newer messages overwrite the
    /// target, so duplicates and reordering are harmless.
    pub fn apply_remote(&mut self, roster: &mut Roster, msg: &PlayerStateMsg) -> SyncOutcome {
        let Some(player) = roster.get_mut(msg.player_id) else {
            return SyncOutcome::UnknownPlayer;
        };
        if player.is_local {
            return SyncOutcome::Local;
        }
        if player.last_seen.is_some_and(|seen| msg.timestamp_ms <= seen) {
            self.stale_dropped += 1;
            tracing::trace!(player_id = %msg.player_id, ts = msg.timestamp_ms, "Stale state dropped");
            return SyncOutcome::Stale;
        }
        if !msg.position.is_finite() || !msg.velocity.is_finite() {
            return SyncOutcome::Stale;
        }
        player.target_position = msg.position;
        player.target_velocity = msg.velocity;
        player.last_seen = Some(msg.timestamp_ms);
        SyncOutcome::Accepted
    }

    /// Move every remote player's displayed state one step toward its target.
    pub fn interpolate(&self, roster: &mut Roster) {
        for p in roster.remotes_mut() {
            p.position = smooth_toward(p.position, p.target_position, self.factor);
            p.velocity = smooth_toward(p.velocity, p.target_velocity, self.factor);
        }
    }
}

impl Default for StateSync {
    fn default() -> Self {
        Self::new(INTERPOLATION_FACTOR)
    }
}

/// One smoothing step from `current` toward `target`. With `factor` in
/// `[0, 1]` the result lies on the segment between them, so it never
/// overshoots.
pub fn smooth_toward(current: Vec2, target: Vec2, factor: f32) -> Vec2 {
    let next = current + (target - current) * factor.clamp(0.0, 1.0);
    if next.distance(target) < SNAP_DISTANCE {
        target
    } else {
        next
    }
}
