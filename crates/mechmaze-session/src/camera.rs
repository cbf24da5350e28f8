use glam::Vec2;
use serde::{Deserialize, Serialize};

use mechmaze_core::player::{Edge, NetworkPlayer};

/// Camera tuning, the `[camera]` table of the session config.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CameraConfig {
    /// Distance from a screen edge (world units) that counts as pushing it.
    pub edge_tolerance: f32,
    /// Minimum time between two scroll steps, in seconds.
    pub min_move_interval_secs: f64,
    /// Distance the camera moves per scroll step.
    pub scroll_step: f32,
    /// Visible world area (width, height).
    pub viewport: Vec2,
}

impl Default for CameraConfig {
    fn default() -> Self {
        Self {
            edge_tolerance: 1.5,
            min_move_interval_secs: 1.0,
            scroll_step: 4.0,
            viewport: Vec2::new(32.0, 18.0),
        }
    }
}

/// How the camera is driven this tick.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CameraMode {
    /// Alone in the session: follow the player.
    Tracking,
    /// Shared session: scroll when the local player pushes its edge.
    EdgeScroll,
}

/// A change to the local camera.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum CameraMove {
    Tracked(Vec2),
    Scrolled { edge: Edge, center: Vec2 },
}

/// Local, never-broadcast camera arbitration for the shared map.
#[derive(Debug, Clone)]
pub struct CameraCoordinator {
    config: CameraConfig,
    center: Vec2,
    mode: CameraMode,
    last_move: Option<f64>,
}

impl CameraCoordinator {
    pub fn new(config: CameraConfig) -> Self {
        Self {
            config,
            center: Vec2::ZERO,
            mode: CameraMode::Tracking,
            last_move: None,
        }
    }

    pub fn center(&self) -> Vec2 {
        self.center
    }

    pub fn mode(&self) -> CameraMode {
        self.mode
    }

    /// Re-center (level start, respawn) and restart the throttle.
    pub fn reset(&mut self, center: Vec2) {
        self.center = center;
        self.last_move = None;
    }

    /// Whether `position` is within the tolerance band of `edge` of the
    /// current view. World space is y-up.
    pub fn is_near_edge(&self, position: Vec2, edge: Edge) -> bool {
        let half = self.config.viewport * 0.5;
        let tol = self.config.edge_tolerance;
        match edge {
            Edge::Left => position.x - (self.center.x - half.x) <= tol,
            Edge::Right => (self.center.x + half.x) - position.x <= tol,
            Edge::Top => (self.center.y + half.y) - position.y <= tol,
            Edge::Bottom => position.y - (self.center.y - half.y) <= tol,
        }
    }

    /// Run one tick for the local player. `roster_len` is the number of
    /// players in the session including the local one; `now` is in seconds.
    pub fn update(&mut self, local: &NetworkPlayer, roster_len: usize, now: f64) -> Option<CameraMove> {
        if roster_len <= 1 {
            self.mode = CameraMode::Tracking;
            self.center = local.position;
            return Some(CameraMove::Tracked(self.center));
        }
        self.mode = CameraMode::EdgeScroll;

        let edge = local.assigned_edge?;
        if !self.is_near_edge(local.position, edge) {
            return None;
        }
        if let Some(last) = self.last_move
            && now - last < self.config.min_move_interval_secs
        {
            return None;
        }
        self.center += edge.scroll_direction() * self.config.scroll_step;
        self.last_move = Some(now);
        tracing::trace!(?edge, center = ?self.center, "Camera scrolled");
        Some(CameraMove::Scrolled {
            edge,
            center: self.center,
        })
    }
}
