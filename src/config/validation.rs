//! Configuration validation functions.

use super::Config;

/// Validate cross-section configuration invariants.
///
/// Returns the first violation found. Called warn-only from the loader and
/// hard-failing from `main.rs`.
pub fn validate(config: &Config) -> anyhow::Result<()> {
    config.websocket.validate()?;
    config.presence.validate(config.websocket.pong_wait_secs)?;
    config.hubs.validate()?;
    Ok(())
}
