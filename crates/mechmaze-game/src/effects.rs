use serde::{Deserialize, Serialize};

use mechmaze_core::effect;

/// Surface hazards that change how hard a mech can push.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SurfaceEffect {
    Oil,
    Grass,
}

impl effect::EffectKind for SurfaceEffect {
    fn default_multiplier(&self) -> f32 {
        match self {
            SurfaceEffect::Oil => 2.0,
            SurfaceEffect::Grass => 0.5,
        }
    }
}

/// Active surface effect on a player.
pub type ActiveEffect = effect::ActiveEffect<SurfaceEffect>;
