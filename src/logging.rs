//! Logging initialization.
//!
//! One stdout layer, plus an optional rolling-file layer when
//! `logging.enable_file_logging` is set. `tracing_subscriber` composes
//! `Option<Layer>` transparently, so the file layer is simply absent when
//! disabled or when the log directory cannot be created.

use std::sync::OnceLock;

use tracing_appender::non_blocking::{NonBlocking, WorkerGuard};
use tracing_appender::rolling::{RollingFileAppender, Rotation};
use tracing_subscriber::fmt::time::UtcTime;
use tracing_subscriber::prelude::*;
use tracing_subscriber::EnvFilter;

use crate::config::{LogFormat, LoggingConfig};

/// Holds the non-blocking appender's worker alive for the process
/// lifetime; dropping it would silently stop file output.
static APPENDER_GUARD: OnceLock<WorkerGuard> = OnceLock::new();

/// Install the global subscriber.
///
/// Filter precedence: the configured level, then `RUST_LOG`, then "info".
pub fn init_with_config(cfg: &LoggingConfig) {
    let filter = match &cfg.level {
        Some(level) => EnvFilter::new(level.as_str()),
        None => EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
    };

    let file_writer = cfg.enable_file_logging.then(|| rolling_file_writer(cfg)).flatten();

    // The json() and non-json layer builders produce distinct types, so
    // each format assembles its own registry.
    match cfg.format {
        LogFormat::Json => {
            let stdout_layer = tracing_subscriber::fmt::layer()
                .json()
                .with_ansi(false)
                .with_timer(UtcTime::rfc_3339())
                .with_writer(std::io::stdout);
            let file_layer = file_writer.map(|writer| {
                tracing_subscriber::fmt::layer()
                    .json()
                    .with_ansi(false)
                    .with_timer(UtcTime::rfc_3339())
                    .with_writer(writer)
            });
            let _ = tracing_subscriber::registry()
                .with(filter)
                .with(stdout_layer)
                .with(file_layer)
                .try_init();
        }
        LogFormat::Text => {
            let stdout_layer = tracing_subscriber::fmt::layer()
                .with_ansi(true)
                .with_timer(UtcTime::rfc_3339())
                .with_writer(std::io::stdout);
            let file_layer = file_writer.map(|writer| {
                tracing_subscriber::fmt::layer()
                    .with_ansi(false)
                    .with_timer(UtcTime::rfc_3339())
                    .with_writer(writer)
            });
            let _ = tracing_subscriber::registry()
                .with(filter)
                .with(stdout_layer)
                .with(file_layer)
                .try_init();
        }
    }
}

/// Non-blocking writer over a rolling file, or `None` when the log
/// directory is unusable.
fn rolling_file_writer(cfg: &LoggingConfig) -> Option<NonBlocking> {
    if let Err(err) = std::fs::create_dir_all(&cfg.dir) {
        eprintln!(
            "logging: cannot create '{}' ({err}), file output disabled",
            cfg.dir
        );
        return None;
    }

    let rotation = if cfg.rotation.eq_ignore_ascii_case("hourly") {
        Rotation::HOURLY
    } else if cfg.rotation.eq_ignore_ascii_case("never") {
        Rotation::NEVER
    } else {
        Rotation::DAILY
    };

    let appender = RollingFileAppender::new(rotation, &cfg.dir, &cfg.filename);
    let (writer, guard) = tracing_appender::non_blocking(appender);
    let _ = APPENDER_GUARD.set(guard);
    Some(writer)
}
