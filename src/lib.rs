#![cfg_attr(not(test), deny(clippy::panic))]
#![allow(
    clippy::missing_errors_doc,
    clippy::missing_panics_doc,
    clippy::module_name_repetitions,
    clippy::struct_excessive_bools,
    clippy::too_many_arguments,
    clippy::too_many_lines,
    clippy::similar_names
)]

//! # Ripple Realtime
//!
//! The real-time interaction core of a social platform: persistent client
//! sockets multiplexed into user-addressed notifications, conversation
//! chat, and room-scoped game sessions, with presence kept consistent
//! across devices and server processes.

/// Per-connection socket pump with bounded outbound queue
pub mod client;

/// Server configuration and environment variables
pub mod config;

/// Fanout hubs: notifications, chat, games, videochat
pub mod hub;

/// Structured logging configuration
pub mod logging;

/// Metrics collection and reporting
pub mod metrics;

/// Pub/sub bridge between hubs and the message bus
pub mod notifier;

/// Online/offline presence across devices and processes
pub mod presence;

/// Wire protocol definitions
pub mod protocol;

/// Persistence contracts for rooms, moves, stats, and room chat
pub mod repository;

/// Server orchestration and the WebSocket upgrade surface
pub mod server;
