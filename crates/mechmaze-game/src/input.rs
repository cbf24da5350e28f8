use glam::Vec2;
use serde::{Deserialize, Serialize};

/// One accelerometer reading, in g, already projected onto the screen plane.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct MotionSample {
    pub x: f32,
    pub y: f32,
}

/// Player-adjustable tilt handling.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct InputSettings {
    pub sensitivity: f32,
    /// Flip both axes.
    pub invert: bool,
}

impl Default for InputSettings {
    fn default() -> Self {
        Self {
            sensitivity: 1.0,
            invert: false,
        }
    }
}

/// Force to request from physics for the local player this tick.
///
/// A missing sample (sensor unavailable) or a non-finite reading yields zero
/// force. `multiplier` is the active surface effect multiplier.
pub fn tilt_force(
    sample: Option<MotionSample>,
    settings: &InputSettings,
    force_scale: f32,
    multiplier: f32,
) -> Vec2 {
    let Some(sample) = sample else {
        return Vec2::ZERO;
    };
    let tilt = Vec2::new(sample.x, sample.y);
    if !tilt.is_finite() {
        return Vec2::ZERO;
    }
    let sign = if settings.invert { -1.0 } else { 1.0 };
    let force = tilt * settings.sensitivity * sign * force_scale * multiplier;
    if force.is_finite() { force } else { Vec2::ZERO }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_sensor_gives_zero_force() {
        let f = tilt_force(None, &InputSettings::default(), 40.0, 1.0);
        assert_eq!(f, Vec2::ZERO);
    }

    #[test]
    fn force_scales_with_sensitivity_and_multiplier() {
        let settings = InputSettings {
            sensitivity: 2.0,
            invert: false,
        };
        let f = tilt_force(Some(MotionSample { x: 0.5, y: -0.25 }), &settings, 10.0, 0.5);
        assert_eq!(f, Vec2::new(5.0, -2.5));
    }

    #[test]
    fn invert_flips_direction() {
        let settings = InputSettings {
            sensitivity: 1.0,
            invert: true,
        };
        let f = tilt_force(Some(MotionSample { x: 1.0, y: 1.0 }), &settings, 1.0, 1.0);
        assert_eq!(f, Vec2::new(-1.0, -1.0));
    }

    #[test]
    fn nan_sample_is_ignored() {
        let f = tilt_force(
            Some(MotionSample {
                x: f32::NAN,
                y: 0.0,
            }),
            &InputSettings::default(),
            40.0,
            2.0,
        );
        assert_eq!(f, Vec2::ZERO);
    }
}
