use serde::{Deserialize, Serialize};

use mechmaze_core::effect::EffectKind;

use crate::effects::SurfaceEffect;

/// Default shared life pool.
pub const STARTING_LIVES: u32 = 5;
/// Default surface effect duration in seconds.
pub const EFFECT_DURATION_SECS: f64 = 3.0;

/// Game rule parameters, loadable from the `[game]` table of the session TOML.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GameConfig {
    pub starting_lives: u32,
    pub effect_duration_secs: f64,
    pub oil_multiplier: f32,
    pub grass_multiplier: f32,
    /// Force applied per unit of tilt before effect multipliers.
    pub force_scale: f32,
    pub first_level: u32,
}

impl Default for GameConfig {
    fn default() -> Self {
        Self {
            starting_lives: STARTING_LIVES,
            effect_duration_secs: EFFECT_DURATION_SECS,
            oil_multiplier: SurfaceEffect::Oil.default_multiplier(),
            grass_multiplier: SurfaceEffect::Grass.default_multiplier(),
            force_scale: 40.0,
            first_level: 1,
        }
    }
}

impl GameConfig {
    pub fn multiplier_for(&self, effect: SurfaceEffect) -> f32 {
        match effect {
            SurfaceEffect::Oil => self.oil_multiplier,
            SurfaceEffect::Grass => self.grass_multiplier,
        }
    }

    /// Problems that would make the rules unplayable, one message each.
    pub fn validate(&self) -> Vec<String> {
        let mut problems = Vec::new();
        if self.starting_lives == 0 {
            problems.push("game.starting_lives must be > 0".to_string());
        }
        if self.effect_duration_secs.is_nan() || self.effect_duration_secs <= 0.0 {
            problems.push("game.effect_duration_secs must be > 0".to_string());
        }
        if [self.oil_multiplier, self.grass_multiplier]
            .iter()
            .any(|m| m.is_nan() || *m <= 0.0)
        {
            problems.push("game effect multipliers must be > 0".to_string());
        }
        if !self.force_scale.is_finite() || self.force_scale < 0.0 {
            problems.push("game.force_scale must be a non-negative number".to_string());
        }
        problems
    }
}
