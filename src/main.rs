#![cfg_attr(not(test), deny(clippy::panic))]

use clap::Parser;
use ripple_realtime::config;
use ripple_realtime::logging;
use ripple_realtime::notifier::InMemoryMessageBus;
use ripple_realtime::presence::InMemoryPresenceStore;
use ripple_realtime::repository::InMemoryGameRepository;
use ripple_realtime::server::{create_router, RealtimeServer};
use std::net::SocketAddr;
use std::sync::Arc;

/// Ripple Realtime -- WebSocket core for notifications, chat, presence,
/// and multiplayer game rooms
#[derive(Parser, Debug)]
#[command(name = "ripple-realtime")]
#[command(about = "Real-time interaction core: notifications, chat, presence, and game rooms over WebSocket")]
#[command(version)]
struct Cli {
    /// Validate configuration and exit without starting the server.
    /// Useful for CI/CD pipelines and pre-deployment checks.
    #[arg(long, short = 'c', conflicts_with = "print_config")]
    validate_config: bool,

    /// Print the loaded configuration to stdout (as JSON) and exit.
    #[arg(long, conflicts_with = "validate_config")]
    print_config: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Load configuration from config.json if present; otherwise defaults.
    let cfg = config::load();

    if cli.print_config {
        let json = serde_json::to_string_pretty(&cfg)
            .map_err(|e| anyhow::anyhow!("Failed to serialize config: {e}"))?;
        println!("{json}");
        return Ok(());
    }

    // config::load() already validated warn-only; here the result gates
    // startup and powers --validate-config's exit code.
    let validation_result = config::validate(&cfg);

    if cli.validate_config {
        match validation_result {
            Ok(()) => {
                println!("Configuration validation passed");
                println!();
                println!("Configuration summary:");
                println!("  Port: {}", cfg.port);
                println!("  Max connections per user: {}", cfg.hubs.max_conns_per_user);
                println!("  Max total connections: {}", cfg.hubs.max_total_conns);
                println!("  Offline grace: {}ms", cfg.presence.offline_grace_ms);
                println!("  Last-seen TTL: {}s", cfg.presence.last_seen_ttl_secs);
                return Ok(());
            }
            Err(e) => {
                eprintln!("Configuration validation failed:\n{e}");
                std::process::exit(1);
            }
        }
    }

    validation_result?;

    logging::init_with_config(&cfg.logging);

    let port = cfg.port;
    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    let cors_origins = cfg.cors_origins.clone();

    tracing::info!(%addr, "Starting Ripple realtime server");

    // Single-process wiring: in-memory backends for persistence, the
    // presence store, and the bus. Multi-process deployments swap these
    // for the shared implementations behind the same traits.
    let server = RealtimeServer::new(
        cfg,
        Arc::new(InMemoryGameRepository::new()),
        Some(Arc::new(InMemoryPresenceStore::new())),
        Some(Arc::new(InMemoryMessageBus::new())),
    );
    server.start().await?;

    // CORS for the upgrade and metrics endpoints.
    use tower_http::cors::{Any, CorsLayer};
    let cors = if cors_origins == "*" {
        CorsLayer::permissive()
    } else {
        let origins: Vec<_> = cors_origins
            .split(',')
            .filter_map(|s| s.trim().parse::<axum::http::HeaderValue>().ok())
            .collect();

        if origins.is_empty() {
            tracing::warn!("No valid CORS origins configured, using permissive CORS");
            CorsLayer::permissive()
        } else {
            CorsLayer::new()
                .allow_origin(origins)
                .allow_methods(Any)
                .allow_headers(Any)
        }
    };

    let router = create_router(Arc::clone(&server)).layer(cors);

    // Ctrl-C sweeps every hub before the listener stops accepting.
    let signal_server = Arc::clone(&server);
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::info!("Shutdown signal received");
            signal_server.shutdown();
        }
    });

    let listener = tokio::net::TcpListener::bind(addr).await?;
    tracing::info!(
        %addr,
        cors_origins = %cors_origins,
        "Server listening - WebSocket endpoints under /ws, metrics at /metrics"
    );

    let shutdown_token = server.shutdown_token();
    axum::serve(listener, router)
        .with_graceful_shutdown(async move { shutdown_token.cancelled().await })
        .await?;

    Ok(())
}
