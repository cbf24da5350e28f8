use serde::{Deserialize, Serialize};

use mechmaze_core::net::protocol::DEFAULT_TICK_RATE_HZ;
use mechmaze_core::room::MAX_SESSION_DEVICES;
use mechmaze_game::config::GameConfig;
use mechmaze_game::input::InputSettings;

use crate::camera::CameraConfig;
use crate::sync::INTERPOLATION_FACTOR;

/// Default config file location, relative to the working directory.
pub const DEFAULT_CONFIG_PATH: &str = "config/mechmaze.toml";

/// Transport limits and endpoints.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TransportConfig {
    /// Other devices this one may connect to.
    pub max_peers: usize,
    /// `mechmaze-relay` WebSocket endpoint, when playing through a relay.
    pub relay_url: Option<String>,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            max_peers: MAX_SESSION_DEVICES as usize - 1,
            relay_url: None,
        }
    }
}

/// Top-level session configuration, loaded from `config/mechmaze.toml`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    pub display_name: String,
    pub tick_rate_hz: u32,
    pub interpolation_factor: f32,
    pub camera: CameraConfig,
    pub input: InputSettings,
    pub transport: TransportConfig,
    pub game: GameConfig,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            display_name: "Pilot".to_string(),
            tick_rate_hz: DEFAULT_TICK_RATE_HZ,
            interpolation_factor: INTERPOLATION_FACTOR,
            camera: CameraConfig::default(),
            input: InputSettings::default(),
            transport: TransportConfig::default(),
            game: GameConfig::default(),
        }
    }
}

impl SessionConfig {
    /// Seconds per simulation tick.
    pub fn tick_secs(&self) -> f64 {
        1.0 / f64::from(self.tick_rate_hz.max(1))
    }

    /// Problems that make the config unusable, one message each.
    pub fn validate(&self) -> Vec<String> {
        let mut problems = Vec::new();
        if self.tick_rate_hz == 0 {
            problems.push("tick_rate_hz must be > 0".to_string());
        }
        if !(0.0..=1.0).contains(&self.interpolation_factor) {
            problems.push("interpolation_factor must be within 0..=1".to_string());
        }
        if self.camera.edge_tolerance.is_nan() || self.camera.edge_tolerance < 0.0 {
            problems.push("camera.edge_tolerance must be >= 0".to_string());
        }
        if self.camera.min_move_interval_secs.is_nan() || self.camera.min_move_interval_secs < 0.0
        {
            problems.push("camera.min_move_interval_secs must be >= 0".to_string());
        }
        if self.camera.viewport.x <= 0.0 || self.camera.viewport.y <= 0.0 {
            problems.push("camera.viewport must be positive".to_string());
        }
        if self.transport.max_peers == 0 || self.transport.max_peers >= MAX_SESSION_DEVICES as usize
        {
            problems.push(format!(
                "transport.max_peers must be within 1..={}",
                MAX_SESSION_DEVICES - 1
            ));
        }
        if self.display_name.trim().is_empty() {
            problems.push("display_name must not be empty".to_string());
        }
        problems.extend(self.game.validate());
        problems
    }

    /// Load from the file named by `MECHMAZE_CONFIG` (default
    /// `config/mechmaze.toml`), with `MECHMAZE_RELAY_URL` overriding
    /// `transport.relay_url`.
    pub fn load() -> Self {
        let path =
            std::env::var("MECHMAZE_CONFIG").unwrap_or_else(|_| DEFAULT_CONFIG_PATH.to_string());
        Self::load_from(&path, std::env::var("MECHMAZE_RELAY_URL").ok())
    }

    /// Load from `path`; missing or unparseable files fall back to defaults.
    /// A non-empty `relay_url` replaces the file's relay endpoint.
    pub fn load_from(path: &str, relay_url: Option<String>) -> Self {
        let mut config = match std::fs::read_to_string(path) {
            Ok(content) => match toml::from_str::<SessionConfig>(&content) {
                Ok(cfg) => {
                    tracing::info!("Loaded configuration from {path}");
                    cfg
                },
                Err(e) => {
                    tracing::warn!("Failed to parse {path}: {e}, using defaults");
                    SessionConfig::default()
                },
            },
            Err(_) => SessionConfig::default(),
        };

        if let Some(url) = relay_url
            && !url.is_empty()
        {
            config.transport.relay_url = Some(url);
        }
        config
    }
}
