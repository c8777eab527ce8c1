//! WebSocket connection settings.

use super::defaults::{
    default_max_message_size, default_outbound_queue_capacity, default_ping_period_secs,
    default_pong_wait_secs, default_write_wait_secs,
};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// WebSocket configuration.
#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct WebSocketConfig {
    /// Deadline in seconds for a single socket write (frames and pings)
    #[serde(default = "default_write_wait_secs")]
    pub write_wait_secs: u64,
    /// Seconds a connection may go silent before the read deadline fires
    #[serde(default = "default_pong_wait_secs")]
    pub pong_wait_secs: u64,
    /// Seconds between server pings
    #[serde(default = "default_ping_period_secs")]
    pub ping_period_secs: u64,
    /// Maximum inbound frame size in bytes
    #[serde(default = "default_max_message_size")]
    pub max_message_size: usize,
    /// Per-client outbound queue capacity in frames
    #[serde(default = "default_outbound_queue_capacity")]
    pub outbound_queue_capacity: usize,
}

impl Default for WebSocketConfig {
    fn default() -> Self {
        Self {
            write_wait_secs: default_write_wait_secs(),
            pong_wait_secs: default_pong_wait_secs(),
            ping_period_secs: default_ping_period_secs(),
            max_message_size: default_max_message_size(),
            outbound_queue_capacity: default_outbound_queue_capacity(),
        }
    }
}

impl WebSocketConfig {
    /// Validate WebSocket timing relationships.
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.ping_period_secs == 0 {
            anyhow::bail!("websocket.ping_period_secs must be nonzero");
        }
        // Pings must have had at least three chances to elicit a pong before
        // the read deadline fires.
        if self.pong_wait_secs < self.ping_period_secs * 3 {
            anyhow::bail!(
                "websocket.pong_wait_secs ({}) must be at least 3x ping_period_secs ({})",
                self.pong_wait_secs,
                self.ping_period_secs
            );
        }
        if self.outbound_queue_capacity == 0 {
            anyhow::bail!("websocket.outbound_queue_capacity must be nonzero");
        }
        if self.max_message_size == 0 {
            anyhow::bail!("websocket.max_message_size must be nonzero");
        }
        Ok(())
    }

    /// Resolved timing values handed to client pumps.
    pub fn timing(&self) -> WebSocketTiming {
        WebSocketTiming {
            write_wait: Duration::from_secs(self.write_wait_secs),
            pong_wait: Duration::from_secs(self.pong_wait_secs),
            ping_period: Duration::from_secs(self.ping_period_secs),
            max_message_size: self.max_message_size,
            outbound_queue_capacity: self.outbound_queue_capacity,
        }
    }
}

/// Timing constants threaded into every client's read and write pumps.
#[derive(Debug, Clone, Copy)]
pub struct WebSocketTiming {
    pub write_wait: Duration,
    pub pong_wait: Duration,
    pub ping_period: Duration,
    pub max_message_size: usize,
    pub outbound_queue_capacity: usize,
}

impl Default for WebSocketTiming {
    fn default() -> Self {
        WebSocketConfig::default().timing()
    }
}
