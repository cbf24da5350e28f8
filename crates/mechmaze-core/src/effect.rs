use serde::{Deserialize, Serialize, de::DeserializeOwned};

/// Trait for game-specific effect kind enums.
pub trait EffectKind: Clone + Copy + PartialEq + Serialize + DeserializeOwned {
    /// Input force multiplier a rule set starts from. The game's rule
    /// config decides the multiplier actually applied.
    fn default_multiplier(&self) -> f32;
}

/// A timed effect on a player, generic over the kind enum.
///
/// Times are simulation seconds. The effect is active while
/// `now - started_at < duration`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(bound = "")]
pub struct ActiveEffect<K: EffectKind> {
    pub kind: K,
    pub started_at: f64,
    pub duration: f64,
}

impl<K: EffectKind> ActiveEffect<K> {
    pub fn new(kind: K, started_at: f64, duration: f64) -> Self {
        Self {
            kind,
            started_at,
            duration,
        }
    }

    pub fn is_active(&self, now: f64) -> bool {
        now - self.started_at < self.duration
    }

    pub fn remaining(&self, now: f64) -> f64 {
        (self.duration - (now - self.started_at)).max(0.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
    struct Boost;

    impl EffectKind for Boost {
        fn default_multiplier(&self) -> f32 {
            2.0
        }
    }

    #[test]
    fn active_until_duration_elapses() {
        let e = ActiveEffect::new(Boost, 10.0, 3.0);
        assert!(e.is_active(10.0));
        assert!(e.is_active(12.99));
        assert!(!e.is_active(13.0));
        assert_eq!(e.remaining(11.0), 2.0);
        assert_eq!(e.remaining(20.0), 0.0);
    }
}
