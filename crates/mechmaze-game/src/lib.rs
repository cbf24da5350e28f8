pub mod config;
pub mod contact;
pub mod effects;
pub mod input;
pub mod scoring;

use std::collections::{HashMap, HashSet};

use glam::Vec2;
use serde::{Deserialize, Serialize};

use mechmaze_core::net::messages::Outcome;
use mechmaze_core::player::PlayerId;

use config::GameConfig;
use contact::{ContactEvent, ContactKind, ContactPhase, classify};
use effects::{ActiveEffect, SurfaceEffect};
use scoring::ScoreRecord;

/// Blocking overlay state. While not `None`, physics and input are
/// suspended for every player.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum Alert {
    #[default]
    None,
    Respawn,
    GameOver,
}

/// Shared game state, one per running session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GameState {
    pub current_level: u32,
    /// Checkpoints reached so far; doubles as the score.
    pub section: u32,
    pub team_lives: u32,
    pub current_alert: Alert,
    /// New Games played since the session started.
    pub game: u32,
}

impl GameState {
    pub fn new(level: u32, lives: u32) -> Self {
        Self {
            current_level: level,
            section: 0,
            team_lives: lives,
            current_alert: Alert::None,
            game: 0,
        }
    }

    pub fn is_suspended(&self) -> bool {
        self.current_alert != Alert::None
    }
}

/// Something the engine changed, reported back to the session.
#[derive(Debug, Clone, PartialEq)]
pub enum EngineEvent {
    Damaged {
        game: u32,
        lives_before: u32,
        lives_left: u32,
    },
    AlertChanged(Alert),
    CheckpointReached {
        checkpoint: Option<u64>,
        point: Vec2,
        section: u32,
    },
    EffectApplied {
        player: PlayerId,
        effect: SurfaceEffect,
    },
    FinishPresence {
        player: PlayerId,
        inside: bool,
    },
    LevelComplete(ScoreRecord),
    Respawned {
        point: Vec2,
    },
    GameReset {
        game: u32,
    },
}

impl EngineEvent {
    /// The outcome peers need to mirror this event, if any.
    pub fn to_outcome(&self) -> Option<Outcome> {
        match self {
            EngineEvent::Damaged {
                game, lives_before, ..
            } => Some(Outcome::Damage {
                game: *game,
                lives_before: *lives_before,
            }),
            EngineEvent::CheckpointReached {
                checkpoint,
                point,
                section,
            } => Some(Outcome::CheckpointReached {
                checkpoint: *checkpoint,
                point: *point,
                section: *section,
            }),
            EngineEvent::FinishPresence { inside, .. } => {
                Some(Outcome::FinishPresence { inside: *inside })
            },
            EngineEvent::LevelComplete(record) => Some(Outcome::LevelComplete {
                level: record.level,
            }),
            EngineEvent::Respawned { .. } => Some(Outcome::Respawned),
            EngineEvent::GameReset { game } => Some(Outcome::NewGame { game: *game }),
            EngineEvent::AlertChanged(_) | EngineEvent::EffectApplied { .. } => None,
        }
    }
}

/// Collision-driven game-state machine.
///
/// Every mutation goes through one of the `handle_*`/`apply_*` entry points
/// and returns the resulting events in order.
pub struct MazeEngine {
    config: GameConfig,
    state: GameState,
    player_ids: Vec<PlayerId>,
    effects: HashMap<PlayerId, ActiveEffect>,
    claimed_checkpoints: HashSet<u64>,
    finish_presence: HashSet<PlayerId>,
    spawn_point: Vec2,
    respawn_point: Vec2,
    /// Highest (section, checkpoint) claimed this level; picks the respawn
    /// point independently of arrival order.
    respawn_rank: Option<(u32, Option<u64>)>,
    first_level: u32,
    starting_lives: u32,
    running: bool,
}

impl MazeEngine {
    pub fn new(config: GameConfig) -> Self {
        let first_level = config.first_level;
        let starting_lives = config.starting_lives.max(1);
        Self {
            config,
            state: GameState::new(first_level, starting_lives),
            player_ids: Vec::new(),
            effects: HashMap::new(),
            claimed_checkpoints: HashSet::new(),
            finish_presence: HashSet::new(),
            spawn_point: Vec2::ZERO,
            respawn_point: Vec2::ZERO,
            respawn_rank: None,
            first_level,
            starting_lives,
            running: false,
        }
    }

    pub fn state(&self) -> &GameState {
        &self.state
    }

    pub fn config(&self) -> &GameConfig {
        &self.config
    }

    pub fn is_running(&self) -> bool {
        self.running
    }

    pub fn players(&self) -> &[PlayerId] {
        &self.player_ids
    }

    pub fn respawn_point(&self) -> Vec2 {
        self.respawn_point
    }

    pub fn effect(&self, player: PlayerId) -> Option<&ActiveEffect> {
        self.effects.get(&player)
    }

    pub fn is_in_finish(&self, player: PlayerId) -> bool {
        self.finish_presence.contains(&player)
    }

    /// Begin a game at `level` with the given players, all spawning at `spawn`.
    pub fn start(&mut self, level: u32, starting_lives: u32, players: &[PlayerId], spawn: Vec2) {
        self.first_level = level;
        self.starting_lives = starting_lives.max(1);
        self.player_ids = Vec::with_capacity(players.len());
        for &id in players {
            if !self.player_ids.contains(&id) {
                self.player_ids.push(id);
            }
        }
        self.spawn_point = spawn;
        self.clear_progress();
        self.running = true;
        tracing::info!(
            level,
            lives = self.state.team_lives,
            players = self.player_ids.len(),
            "Game started"
        );
    }

    /// Stop processing contacts and outcomes (quit to home).
    pub fn stop(&mut self) {
        self.running = false;
        self.effects.clear();
        self.finish_presence.clear();
    }

    /// Where players respawn once the current level's layout is known.
    /// A checkpoint already claimed on this level keeps its respawn point.
    pub fn set_spawn_point(&mut self, point: Vec2) {
        self.spawn_point = point;
        if self.respawn_rank.is_none() {
            self.respawn_point = point;
        }
    }

    fn clear_progress(&mut self) {
        let game = self.state.game;
        self.state = GameState::new(self.first_level, self.starting_lives);
        self.state.game = game;
        self.effects.clear();
        self.claimed_checkpoints.clear();
        self.finish_presence.clear();
        self.respawn_point = self.spawn_point;
        self.respawn_rank = None;
    }

    pub fn player_joined(&mut self, id: PlayerId) {
        if !self.player_ids.contains(&id) {
            self.player_ids.push(id);
        }
    }

    /// Forget a player. The remaining players may now all be in the finish.
    pub fn player_left(&mut self, id: PlayerId) -> Vec<EngineEvent> {
        self.player_ids.retain(|&p| p != id);
        self.effects.remove(&id);
        self.finish_presence.remove(&id);
        if self.running {
            self.check_level_complete()
        } else {
            Vec::new()
        }
    }

    /// Classify a physics contact and apply its game rule.
    pub fn handle_contact(&mut self, event: &ContactEvent, now: f64) -> Vec<EngineEvent> {
        let contact = match classify(event) {
            Ok(c) => c,
            Err(e) => {
                tracing::warn!(error = %e, "Ignoring contact");
                return Vec::new();
            },
        };
        if !self.player_ids.contains(&contact.player) {
            tracing::warn!(player_id = %contact.player, "Ignoring contact for unknown player");
            return Vec::new();
        }
        if !self.running {
            return Vec::new();
        }

        match (contact.kind, contact.phase) {
            (ContactKind::Finish, phase) => {
                self.set_finish_presence(contact.player, phase == ContactPhase::Begin)
            },
            (_, ContactPhase::End) => Vec::new(),
            (ContactKind::Player | ContactKind::Wall, _) => Vec::new(),
            (ContactKind::Checkpoint, _) => {
                self.reach_checkpoint(contact.node, contact.position, None)
            },
            (ContactKind::Spike | ContactKind::Vortex, _) => self.apply_damage(),
            (ContactKind::Oil, _) => self.apply_effect(contact.player, SurfaceEffect::Oil, now),
            (ContactKind::Grass, _) => self.apply_effect(contact.player, SurfaceEffect::Grass, now),
        }
    }

    /// Mirror an outcome decided on `from`'s device.
    pub fn apply_outcome(&mut self, from: PlayerId, outcome: &Outcome) -> Vec<EngineEvent> {
        if !self.running && !matches!(outcome, Outcome::NewGame { .. }) {
            return Vec::new();
        }
        match outcome {
            Outcome::Damage { game, lives_before } => self.mirror_damage(*game, *lives_before),
            Outcome::CheckpointReached {
                checkpoint,
                point,
                section,
            } => self.reach_checkpoint(*checkpoint, *point, Some(*section)),
            Outcome::FinishPresence { inside } => {
                if self.player_ids.contains(&from) {
                    self.set_finish_presence(from, *inside)
                } else {
                    tracing::warn!(player_id = %from, "Finish presence from unknown player");
                    Vec::new()
                }
            },
            Outcome::Respawned => self.respawn(),
            Outcome::NewGame { game } => {
                if *game > self.state.game {
                    self.reset_to(*game)
                } else {
                    tracing::debug!(game, current = self.state.game, "Stale new game ignored");
                    Vec::new()
                }
            },
            Outcome::LevelComplete { level } => self.complete_level(*level),
        }
    }

    /// Lose one shared life. Ignored while an alert is showing.
    pub fn apply_damage(&mut self) -> Vec<EngineEvent> {
        if self.state.is_suspended() {
            tracing::debug!(alert = ?self.state.current_alert, "Damage ignored during alert");
            return Vec::new();
        }
        self.lose_life(self.state.team_lives)
    }

    /// Apply damage another device took when the team had `lives_before`.
    ///
    /// Every hit taken at the same life count is the same lost life, so
    /// lives only drop to `lives_before - 1` and never below what this
    /// device already counted. Delivery order does not change the result.
    fn mirror_damage(&mut self, game: u32, lives_before: u32) -> Vec<EngineEvent> {
        if game != self.state.game {
            tracing::debug!(game, current = self.state.game, "Damage from another game ignored");
            return Vec::new();
        }
        if lives_before.saturating_sub(1) >= self.state.team_lives {
            tracing::debug!(lives_before, "Damage already counted");
            return Vec::new();
        }
        self.lose_life(lives_before)
    }

    fn lose_life(&mut self, lives_before: u32) -> Vec<EngineEvent> {
        self.state.team_lives = lives_before.saturating_sub(1);
        let alert = if self.state.team_lives == 0 {
            Alert::GameOver
        } else {
            Alert::Respawn
        };
        self.state.current_alert = alert;
        if alert == Alert::GameOver {
            tracing::info!(section = self.state.section, "Game over");
        } else {
            tracing::debug!(lives = self.state.team_lives, "Team damaged");
        }
        vec![
            EngineEvent::Damaged {
                game: self.state.game,
                lives_before,
                lives_left: self.state.team_lives,
            },
            EngineEvent::AlertChanged(alert),
        ]
    }

    /// Count a checkpoint once per node and move the respawn point to the
    /// highest-ranked checkpoint claimed so far. `claimed_section` is the
    /// section the claiming device reported; local claims rank by the new
    /// section count.
    fn reach_checkpoint(
        &mut self,
        checkpoint: Option<u64>,
        point: Vec2,
        claimed_section: Option<u32>,
    ) -> Vec<EngineEvent> {
        let is_new = match checkpoint {
            Some(node) => self.claimed_checkpoints.insert(node),
            None => true,
        };
        if is_new {
            self.state.section += 1;
        }
        let rank = (claimed_section.unwrap_or(self.state.section), checkpoint);
        if self.respawn_rank.is_none_or(|best| rank > best) {
            self.respawn_rank = Some(rank);
            self.respawn_point = point;
        }
        if !is_new {
            return Vec::new();
        }
        tracing::debug!(section = self.state.section, ?checkpoint, "Checkpoint reached");
        vec![EngineEvent::CheckpointReached {
            checkpoint,
            point,
            section: rank.0,
        }]
    }

    /// Replace whatever effect `player` had with `effect`, starting at `now`.
    pub fn apply_effect(
        &mut self,
        player: PlayerId,
        effect: SurfaceEffect,
        now: f64,
    ) -> Vec<EngineEvent> {
        self.effects.insert(
            player,
            ActiveEffect::new(effect, now, self.config.effect_duration_secs),
        );
        vec![EngineEvent::EffectApplied { player, effect }]
    }

    /// Drop effects whose duration has elapsed.
    pub fn purge_expired(&mut self, now: f64) {
        self.effects.retain(|_, e| e.is_active(now));
    }

    /// Force multiplier for `player` at `now`; 1.0 without an active effect.
    pub fn speed_multiplier(&self, player: PlayerId, now: f64) -> f32 {
        match self.effects.get(&player) {
            Some(e) if e.is_active(now) => self.config.multiplier_for(e.kind),
            _ => 1.0,
        }
    }

    fn set_finish_presence(&mut self, player: PlayerId, inside: bool) -> Vec<EngineEvent> {
        let changed = if inside {
            self.finish_presence.insert(player)
        } else {
            self.finish_presence.remove(&player)
        };
        if !changed {
            return Vec::new();
        }
        let mut events = vec![EngineEvent::FinishPresence { player, inside }];
        events.extend(self.check_level_complete());
        events
    }

    fn check_level_complete(&mut self) -> Vec<EngineEvent> {
        if self.player_ids.is_empty()
            || !self
                .player_ids
                .iter()
                .all(|p| self.finish_presence.contains(p))
        {
            return Vec::new();
        }
        self.complete_level(self.state.current_level)
    }

    /// Finish `level` if it is the current one. Repeats are no-ops.
    pub fn complete_level(&mut self, level: u32) -> Vec<EngineEvent> {
        if level != self.state.current_level {
            return Vec::new();
        }
        let record = ScoreRecord::now(level, self.state.section);
        self.state.current_level += 1;
        self.finish_presence.clear();
        self.claimed_checkpoints.clear();
        self.effects.clear();
        self.respawn_point = self.spawn_point;
        self.respawn_rank = None;
        tracing::info!(level, section = record.section, "Level complete");
        vec![EngineEvent::LevelComplete(record)]
    }

    /// Resolve a respawn alert. Game over can only be left through `reset`.
    pub fn respawn(&mut self) -> Vec<EngineEvent> {
        match self.state.current_alert {
            Alert::Respawn => {
                self.state.current_alert = Alert::None;
                self.finish_presence.clear();
                vec![
                    EngineEvent::Respawned {
                        point: self.respawn_point,
                    },
                    EngineEvent::AlertChanged(Alert::None),
                ]
            },
            Alert::GameOver => {
                tracing::debug!("Respawn ignored after game over");
                Vec::new()
            },
            Alert::None => Vec::new(),
        }
    }

    /// New Game: restore lives, level and section and clear all alerts.
    pub fn reset(&mut self) -> Vec<EngineEvent> {
        self.reset_to(self.state.game + 1)
    }

    fn reset_to(&mut self, game: u32) -> Vec<EngineEvent> {
        let had_alert = self.state.is_suspended();
        self.state.game = game;
        self.clear_progress();
        self.running = true;
        tracing::info!(level = self.state.current_level, game, "Game reset");
        let mut events = vec![EngineEvent::GameReset { game }];
        if had_alert {
            events.push(EngineEvent::AlertChanged(Alert::None));
        }
        events
    }
}
