//! Default value functions for configuration fields.
//!
//! All defaults used by serde's `#[serde(default = ...)]` attributes live
//! here, grouped by the section they belong to.

use super::logging::LogFormat;

// =============================================================================
// Port & Root Config
// =============================================================================

pub const fn default_port() -> u16 {
    4810
}

pub fn default_cors_origins() -> String {
    "*".to_string()
}

// =============================================================================
// WebSocket Defaults
// =============================================================================

/// Deadline for a single socket write, including pings.
pub const fn default_write_wait_secs() -> u64 {
    15
}

/// How long a connection may go without a pong (or any frame) before the
/// read deadline fires.
pub const fn default_pong_wait_secs() -> u64 {
    10
}

/// Interval between server pings. Must stay well under `pong_wait_secs`.
pub const fn default_ping_period_secs() -> u64 {
    3
}

/// Maximum inbound frame size in bytes.
pub const fn default_max_message_size() -> usize {
    16384
}

/// Capacity of each client's outbound frame queue.
pub const fn default_outbound_queue_capacity() -> usize {
    256
}

// =============================================================================
// Presence Defaults
// =============================================================================

pub fn default_online_set_key() -> String {
    "ws:online_users".to_string()
}

pub fn default_last_seen_key_prefix() -> String {
    "ws:last_seen:".to_string()
}

/// TTL of the per-user last-seen key. Kept at 2.5x the pong wait so a
/// briefly delayed pong does not expire the shared-store entry.
pub const fn default_last_seen_ttl_secs() -> u64 {
    25
}

/// Delay between the last disconnect and the offline emission.
pub const fn default_offline_grace_ms() -> u64 {
    2000
}

pub const fn default_reaper_interval_secs() -> u64 {
    3
}

// =============================================================================
// Hub Limit Defaults
// =============================================================================

pub const fn default_max_conns_per_user() -> usize {
    5
}

pub const fn default_max_total_conns() -> usize {
    10_000
}

/// Supported games are 1v1.
pub const fn default_max_game_peers_per_room() -> usize {
    2
}

pub const fn default_max_game_total_rooms() -> usize {
    1000
}

/// Videochat rooms allow a small group.
pub const fn default_max_peers_per_room() -> usize {
    10
}

/// Retained chat messages per game room.
pub const fn default_max_game_room_messages() -> usize {
    200
}

// =============================================================================
// Game Stat Defaults (points per won game)
// =============================================================================

pub const fn default_connect_four_points() -> i64 {
    15
}

pub const fn default_othello_points() -> i64 {
    25
}

pub const fn default_checkers_points() -> i64 {
    20
}

pub const fn default_battleship_points() -> i64 {
    30
}

// =============================================================================
// Logging Defaults
// =============================================================================

pub fn default_log_dir() -> String {
    "logs".to_string()
}

pub fn default_log_filename() -> String {
    "server.log".to_string()
}

pub fn default_rotation() -> String {
    "daily".to_string()
}

pub const fn default_enable_file_logging() -> bool {
    false
}

pub const fn default_log_format() -> LogFormat {
    LogFormat::Text
}
