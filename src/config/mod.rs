//! Configuration module for the realtime core.
//!
//! Supports JSON configuration files, environment variable overrides, and
//! sensible compiled-in defaults.
//!
//! # Module Structure
//!
//! - [`types`]: Root `Config` struct
//! - [`websocket`]: Socket pump timing (write wait, pong wait, ping period)
//! - [`presence`]: Presence keys, TTLs, grace window, reaper cadence
//! - [`hubs`]: Membership limits per hub
//! - [`games`]: Stat point values per game type
//! - [`logging`]: Logging configuration
//! - [`loader`]: Configuration loading functions
//! - [`validation`]: Cross-section validation
//! - [`defaults`]: Default value functions

pub mod defaults;
pub mod games;
pub mod hubs;
pub mod loader;
pub mod logging;
pub mod presence;
pub mod types;
pub mod validation;
pub mod websocket;

pub use games::GamePointsConfig;

pub use hubs::HubConfig;

pub use loader::load;

pub use logging::{LogFormat, LogLevel, LoggingConfig};

pub use presence::PresenceConfig;

pub use types::Config;

pub use validation::validate;

pub use websocket::{WebSocketConfig, WebSocketTiming};
