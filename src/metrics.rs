//! Metrics collection for the realtime core.
//!
//! Plain atomic counters, snapshotted on demand by the `/metrics` endpoint.
//! No histogram machinery: this core only needs rates and drop accounting.

use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};

/// Counters shared by the hubs, presence manager, notifier, and clients.
#[derive(Debug, Default)]
pub struct ServerMetrics {
    // Connection metrics
    pub total_connections: AtomicU64,
    pub active_connections: AtomicU64,
    pub disconnections: AtomicU64,
    pub register_rejections: AtomicU64,

    // Outbound queue accounting
    pub messages_dropped_buffer_full: AtomicU64,
    pub messages_dropped_closed: AtomicU64,
    pub frames_sent: AtomicU64,

    // Fanout metrics
    pub notifications_broadcast: AtomicU64,
    pub chat_messages_broadcast: AtomicU64,
    pub game_events_broadcast: AtomicU64,
    pub video_events_relayed: AtomicU64,

    // Presence metrics
    pub online_transitions: AtomicU64,
    pub offline_transitions: AtomicU64,
    pub offline_suppressed_by_grace: AtomicU64,
    pub presence_entries_reaped: AtomicU64,

    // Game metrics
    pub game_actions_handled: AtomicU64,
    pub game_moves_applied: AtomicU64,
    pub game_moves_rejected: AtomicU64,
    pub games_finished: AtomicU64,

    // Bus metrics
    pub bus_messages_published: AtomicU64,
    pub bus_messages_received: AtomicU64,
    pub subscriber_panics: AtomicU64,

    // Error tracking
    pub persistence_errors: AtomicU64,
    pub websocket_errors: AtomicU64,
}

impl ServerMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn increment_connections(&self) {
        self.total_connections.fetch_add(1, Ordering::Relaxed);
        self.active_connections.fetch_add(1, Ordering::Relaxed);
    }

    pub fn decrement_connections(&self) {
        self.disconnections.fetch_add(1, Ordering::Relaxed);
        // Saturating decrement: unregister can race a shutdown sweep.
        let _ = self
            .active_connections
            .fetch_update(Ordering::Relaxed, Ordering::Relaxed, |v| {
                Some(v.saturating_sub(1))
            });
    }

    pub fn increment_register_rejections(&self) {
        self.register_rejections.fetch_add(1, Ordering::Relaxed);
    }

    pub fn increment_dropped_buffer_full(&self) {
        self.messages_dropped_buffer_full
            .fetch_add(1, Ordering::Relaxed);
    }

    pub fn increment_dropped_closed(&self) {
        self.messages_dropped_closed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn increment_frames_sent(&self) {
        self.frames_sent.fetch_add(1, Ordering::Relaxed);
    }

    pub fn increment_notifications_broadcast(&self) {
        self.notifications_broadcast.fetch_add(1, Ordering::Relaxed);
    }

    pub fn increment_chat_messages_broadcast(&self) {
        self.chat_messages_broadcast.fetch_add(1, Ordering::Relaxed);
    }

    pub fn increment_game_events_broadcast(&self) {
        self.game_events_broadcast.fetch_add(1, Ordering::Relaxed);
    }

    pub fn increment_video_events_relayed(&self) {
        self.video_events_relayed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn increment_online_transitions(&self) {
        self.online_transitions.fetch_add(1, Ordering::Relaxed);
    }

    pub fn increment_offline_transitions(&self) {
        self.offline_transitions.fetch_add(1, Ordering::Relaxed);
    }

    pub fn increment_offline_suppressed(&self) {
        self.offline_suppressed_by_grace
            .fetch_add(1, Ordering::Relaxed);
    }

    pub fn increment_presence_reaped(&self) {
        self.presence_entries_reaped.fetch_add(1, Ordering::Relaxed);
    }

    pub fn increment_game_actions(&self) {
        self.game_actions_handled.fetch_add(1, Ordering::Relaxed);
    }

    pub fn increment_game_moves_applied(&self) {
        self.game_moves_applied.fetch_add(1, Ordering::Relaxed);
    }

    pub fn increment_game_moves_rejected(&self) {
        self.game_moves_rejected.fetch_add(1, Ordering::Relaxed);
    }

    pub fn increment_games_finished(&self) {
        self.games_finished.fetch_add(1, Ordering::Relaxed);
    }

    pub fn increment_bus_published(&self) {
        self.bus_messages_published.fetch_add(1, Ordering::Relaxed);
    }

    pub fn increment_bus_received(&self) {
        self.bus_messages_received.fetch_add(1, Ordering::Relaxed);
    }

    pub fn increment_subscriber_panics(&self) {
        self.subscriber_panics.fetch_add(1, Ordering::Relaxed);
    }

    pub fn increment_persistence_errors(&self) {
        self.persistence_errors.fetch_add(1, Ordering::Relaxed);
    }

    pub fn increment_websocket_errors(&self) {
        self.websocket_errors.fetch_add(1, Ordering::Relaxed);
    }

    /// Point-in-time copy of every counter.
    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            timestamp: chrono::Utc::now(),
            connections: ConnectionMetrics {
                total: self.total_connections.load(Ordering::Relaxed),
                active: self.active_connections.load(Ordering::Relaxed),
                disconnections: self.disconnections.load(Ordering::Relaxed),
                register_rejections: self.register_rejections.load(Ordering::Relaxed),
            },
            queues: QueueMetrics {
                frames_sent: self.frames_sent.load(Ordering::Relaxed),
                dropped_buffer_full: self.messages_dropped_buffer_full.load(Ordering::Relaxed),
                dropped_closed: self.messages_dropped_closed.load(Ordering::Relaxed),
            },
            fanout: FanoutMetrics {
                notifications_broadcast: self.notifications_broadcast.load(Ordering::Relaxed),
                chat_messages_broadcast: self.chat_messages_broadcast.load(Ordering::Relaxed),
                game_events_broadcast: self.game_events_broadcast.load(Ordering::Relaxed),
                video_events_relayed: self.video_events_relayed.load(Ordering::Relaxed),
            },
            presence: PresenceMetrics {
                online_transitions: self.online_transitions.load(Ordering::Relaxed),
                offline_transitions: self.offline_transitions.load(Ordering::Relaxed),
                offline_suppressed_by_grace: self
                    .offline_suppressed_by_grace
                    .load(Ordering::Relaxed),
                entries_reaped: self.presence_entries_reaped.load(Ordering::Relaxed),
            },
            games: GameMetrics {
                actions_handled: self.game_actions_handled.load(Ordering::Relaxed),
                moves_applied: self.game_moves_applied.load(Ordering::Relaxed),
                moves_rejected: self.game_moves_rejected.load(Ordering::Relaxed),
                finished: self.games_finished.load(Ordering::Relaxed),
            },
            bus: BusMetrics {
                published: self.bus_messages_published.load(Ordering::Relaxed),
                received: self.bus_messages_received.load(Ordering::Relaxed),
                subscriber_panics: self.subscriber_panics.load(Ordering::Relaxed),
            },
            errors: ErrorMetrics {
                persistence: self.persistence_errors.load(Ordering::Relaxed),
                websocket: self.websocket_errors.load(Ordering::Relaxed),
            },
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct MetricsSnapshot {
    pub timestamp: chrono::DateTime<chrono::Utc>,
    pub connections: ConnectionMetrics,
    pub queues: QueueMetrics,
    pub fanout: FanoutMetrics,
    pub presence: PresenceMetrics,
    pub games: GameMetrics,
    pub bus: BusMetrics,
    pub errors: ErrorMetrics,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct ConnectionMetrics {
    pub total: u64,
    pub active: u64,
    pub disconnections: u64,
    pub register_rejections: u64,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct QueueMetrics {
    pub frames_sent: u64,
    pub dropped_buffer_full: u64,
    pub dropped_closed: u64,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct FanoutMetrics {
    pub notifications_broadcast: u64,
    pub chat_messages_broadcast: u64,
    pub game_events_broadcast: u64,
    pub video_events_relayed: u64,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct PresenceMetrics {
    pub online_transitions: u64,
    pub offline_transitions: u64,
    pub offline_suppressed_by_grace: u64,
    pub entries_reaped: u64,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct GameMetrics {
    pub actions_handled: u64,
    pub moves_applied: u64,
    pub moves_rejected: u64,
    pub finished: u64,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct BusMetrics {
    pub published: u64,
    pub received: u64,
    pub subscriber_panics: u64,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct ErrorMetrics {
    pub persistence: u64,
    pub websocket: u64,
}
