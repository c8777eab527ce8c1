//! Root configuration types.

use super::defaults::{default_cors_origins, default_port};
use super::games::GamePointsConfig;
use super::hubs::HubConfig;
use super::logging::LoggingConfig;
use super::presence::PresenceConfig;
use super::websocket::WebSocketConfig;
use serde::{Deserialize, Serialize};

/// Root configuration struct for the realtime core.
#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct Config {
    #[serde(default = "default_port")]
    pub port: u16,
    /// Comma-separated allowed CORS origins, or "*"
    #[serde(default = "default_cors_origins")]
    pub cors_origins: String,
    #[serde(default)]
    pub websocket: WebSocketConfig,
    #[serde(default)]
    pub presence: PresenceConfig,
    #[serde(default)]
    pub hubs: HubConfig,
    #[serde(default)]
    pub game_points: GamePointsConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            port: default_port(),
            cors_origins: default_cors_origins(),
            websocket: WebSocketConfig::default(),
            presence: PresenceConfig::default(),
            hubs: HubConfig::default(),
            game_points: GamePointsConfig::default(),
            logging: LoggingConfig::default(),
        }
    }
}
