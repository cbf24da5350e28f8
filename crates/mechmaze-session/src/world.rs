//! Collaborators the session drives but does not implement: the physics
//! engine, the motion sensor and high-score storage.

use glam::Vec2;
use tokio::sync::mpsc;

use mechmaze_core::player::PlayerId;
use mechmaze_game::contact::ContactEvent;
use mechmaze_game::input::MotionSample;
use mechmaze_game::scoring::ScoreRecord;

/// Position and velocity of one body.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct BodyState {
    pub position: Vec2,
    pub velocity: Vec2,
}

/// Physics world holding one body per player plus the maze geometry.
///
/// The local player's body is simulated; remote bodies are positioned by
/// the session from synchronized state every tick.
pub trait PhysicsWorld: Send {
    /// Build the maze for `level` and return its spawn point.
    fn load_level(&mut self, level: u32) -> Vec2;

    fn spawn_player(&mut self, player: PlayerId, at: Vec2);

    fn remove_player(&mut self, player: PlayerId);

    fn apply_force(&mut self, player: PlayerId, force: Vec2);

    fn step(&mut self, dt: f32);

    fn body(&self, player: PlayerId) -> Option<BodyState>;

    fn set_body(&mut self, player: PlayerId, state: BodyState);

    /// Contacts that began or ended since the last call.
    fn drain_contacts(&mut self) -> Vec<ContactEvent>;
}

/// Accelerometer. `None` when the sensor is unavailable.
pub trait MotionSource: Send {
    fn sample(&mut self) -> Option<MotionSample>;
}

/// A device without a motion sensor.
pub struct NoMotion;

impl MotionSource for NoMotion {
    fn sample(&mut self) -> Option<MotionSample> {
        None
    }
}

/// Persistence for completed levels.
pub trait ScoreSink: Send {
    fn record(&mut self, record: ScoreRecord);
}

impl ScoreSink for mpsc::UnboundedSender<ScoreRecord> {
    fn record(&mut self, record: ScoreRecord) {
        if self.send(record).is_err() {
            tracing::warn!("Score storage gone, record dropped");
        }
    }
}

/// Discards score records.
pub struct NoScores;

impl ScoreSink for NoScores {
    fn record(&mut self, record: ScoreRecord) {
        tracing::debug!(level = record.level, section = record.section, "Score not stored");
    }
}
