//! Presence manager settings.

use super::defaults::{
    default_last_seen_key_prefix, default_last_seen_ttl_secs, default_offline_grace_ms,
    default_online_set_key, default_reaper_interval_secs,
};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Presence configuration.
///
/// The shared-store keys are the cross-process contract: every server
/// process pointed at the same store must agree on them.
#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct PresenceConfig {
    /// Set holding the stringified ids of online users
    #[serde(default = "default_online_set_key")]
    pub online_set_key: String,
    /// Prefix of the per-user last-seen key
    #[serde(default = "default_last_seen_key_prefix")]
    pub last_seen_key_prefix: String,
    /// TTL of the last-seen key in seconds
    #[serde(default = "default_last_seen_ttl_secs")]
    pub last_seen_ttl_secs: u64,
    /// Milliseconds between the last disconnect and the offline emission
    #[serde(default = "default_offline_grace_ms")]
    pub offline_grace_ms: u64,
    /// Seconds between reaper passes over the shared online set
    #[serde(default = "default_reaper_interval_secs")]
    pub reaper_interval_secs: u64,
}

impl Default for PresenceConfig {
    fn default() -> Self {
        Self {
            online_set_key: default_online_set_key(),
            last_seen_key_prefix: default_last_seen_key_prefix(),
            last_seen_ttl_secs: default_last_seen_ttl_secs(),
            offline_grace_ms: default_offline_grace_ms(),
            reaper_interval_secs: default_reaper_interval_secs(),
        }
    }
}

impl PresenceConfig {
    pub fn last_seen_key(&self, user_id: crate::protocol::UserId) -> String {
        format!("{}{}", self.last_seen_key_prefix, user_id)
    }

    pub fn last_seen_ttl(&self) -> Duration {
        Duration::from_secs(self.last_seen_ttl_secs)
    }

    pub fn offline_grace(&self) -> Duration {
        Duration::from_millis(self.offline_grace_ms)
    }

    pub fn reaper_interval(&self) -> Duration {
        Duration::from_secs(self.reaper_interval_secs)
    }

    /// Validate presence timing against the socket liveness settings.
    pub fn validate(&self, pong_wait_secs: u64) -> anyhow::Result<()> {
        if self.online_set_key.is_empty() {
            anyhow::bail!("presence.online_set_key must not be empty");
        }
        if self.last_seen_key_prefix.is_empty() {
            anyhow::bail!("presence.last_seen_key_prefix must not be empty");
        }
        // A delayed pong must not expire the shared-store entry: the TTL
        // needs comfortable headroom over the read deadline.
        let min_ttl = pong_wait_secs * 2;
        if self.last_seen_ttl_secs < min_ttl {
            anyhow::bail!(
                "presence.last_seen_ttl_secs ({}) must be at least 2x websocket.pong_wait_secs ({})",
                self.last_seen_ttl_secs,
                pong_wait_secs
            );
        }
        if self.reaper_interval_secs == 0 {
            anyhow::bail!("presence.reaper_interval_secs must be nonzero");
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::UserId;

    #[test]
    fn default_keys_match_store_contract() {
        let cfg = PresenceConfig::default();
        assert_eq!(cfg.online_set_key, "ws:online_users");
        assert_eq!(cfg.last_seen_key(UserId(42)), "ws:last_seen:42");
    }

    #[test]
    fn ttl_must_cover_pong_wait() {
        let cfg = PresenceConfig {
            last_seen_ttl_secs: 12,
            ..PresenceConfig::default()
        };
        assert!(cfg.validate(10).is_err());
        assert!(PresenceConfig::default().validate(10).is_ok());
    }
}
