//! Server orchestration: hub construction, bus wiring, the axum upgrade
//! surface, and graceful shutdown.
//!
//! The WebSocket upgrade handshake and authentication live outside this
//! crate; identity arrives as an externally verified `user_id` query
//! parameter on each upgrade endpoint.

use axum::extract::ws::WebSocketUpgrade;
use axum::extract::{Path, Query, State};
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::{Json, Router};
use serde::Deserialize;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use uuid::Uuid;

use crate::config::Config;
use crate::hub::{ChatHub, GameHub, NotificationHub, VideoChatHub};
use crate::metrics::ServerMetrics;
use crate::notifier::{MessageBus, Notifier};
use crate::presence::{PresenceManager, PresenceStore};
use crate::protocol::{RoomId, UserId};
use crate::repository::GameRepository;

/// Shared application state: all four hubs plus their collaborators.
pub struct RealtimeServer {
    pub config: Arc<Config>,
    pub metrics: Arc<ServerMetrics>,
    pub presence: Arc<PresenceManager>,
    pub notifier: Arc<Notifier>,
    pub notification_hub: Arc<NotificationHub>,
    pub chat_hub: Arc<ChatHub>,
    pub game_hub: Arc<GameHub>,
    pub video_hub: Arc<VideoChatHub>,
    pub instance_id: Uuid,
    shutdown: CancellationToken,
}

impl RealtimeServer {
    /// Wire up the hubs around the injected collaborators. Passing `None`
    /// for the store or bus degrades gracefully to single-process behavior.
    pub fn new(
        config: Config,
        repository: Arc<dyn GameRepository>,
        presence_store: Option<Arc<dyn PresenceStore>>,
        bus: Option<Arc<dyn MessageBus>>,
    ) -> Arc<Self> {
        let config = Arc::new(config);
        let metrics = Arc::new(ServerMetrics::new());
        let timing = config.websocket.timing();

        let notifier = Notifier::new(bus, Arc::clone(&metrics));
        let presence = PresenceManager::new(
            config.presence.clone(),
            presence_store,
            Arc::clone(&metrics),
        );

        let notification_hub = NotificationHub::new(
            Arc::clone(&presence),
            config.hubs,
            timing,
            Arc::clone(&metrics),
        );
        let chat_hub = ChatHub::new(
            Arc::clone(&presence),
            Arc::clone(&notifier),
            config.hubs,
            timing,
            Arc::clone(&metrics),
        );
        let game_hub = GameHub::new(
            repository,
            Arc::clone(&notifier),
            config.hubs,
            config.game_points,
            timing,
            Arc::clone(&metrics),
        );
        let video_hub = VideoChatHub::new(
            Arc::clone(&notifier),
            config.hubs,
            timing,
            Arc::clone(&metrics),
        );

        Arc::new(Self {
            config,
            metrics,
            presence,
            notifier,
            notification_hub,
            chat_hub,
            game_hub,
            video_hub,
            instance_id: Uuid::new_v4(),
            shutdown: CancellationToken::new(),
        })
    }

    /// Start the presence reaper and subscribe every hub to the bus.
    pub async fn start(&self) -> anyhow::Result<()> {
        self.presence.start();
        self.notification_hub
            .start_wiring(&self.notifier, self.shutdown.child_token())
            .await?;
        self.chat_hub
            .start_wiring(&self.notifier, self.shutdown.child_token())
            .await?;
        self.game_hub
            .start_wiring(&self.notifier, self.shutdown.child_token())
            .await?;
        self.video_hub
            .start_wiring(&self.notifier, self.shutdown.child_token())
            .await?;
        info!(instance_id = %self.instance_id, "Realtime server started");
        Ok(())
    }

    /// Token observed by the HTTP server for graceful shutdown.
    pub fn shutdown_token(&self) -> CancellationToken {
        self.shutdown.clone()
    }

    /// Close every socket on every hub and stop the background tasks.
    /// Idempotent; the only external termination signal.
    pub fn shutdown(&self) {
        self.shutdown.cancel();
        self.notification_hub.shutdown();
        self.chat_hub.shutdown();
        self.game_hub.shutdown();
        self.video_hub.shutdown();
        info!(instance_id = %self.instance_id, "Realtime server shut down");
    }
}

/// Identity query attached by the upstream auth layer.
#[derive(Debug, Deserialize)]
struct WsQuery {
    user_id: u64,
}

/// Build the HTTP router: four upgrade endpoints plus health and metrics.
pub fn create_router(server: Arc<RealtimeServer>) -> Router {
    Router::new()
        .route("/healthz", get(health_handler))
        .route("/metrics", get(metrics_handler))
        .route("/ws/notifications", get(notifications_ws_handler))
        .route("/ws/chat", get(chat_ws_handler))
        .route("/ws/game/{room_id}", get(game_ws_handler))
        .route("/ws/video/{room_id}", get(video_ws_handler))
        .layer(tower_http::trace::TraceLayer::new_for_http())
        .with_state(server)
}

async fn health_handler() -> &'static str {
    "ok"
}

async fn metrics_handler(State(server): State<Arc<RealtimeServer>>) -> Response {
    Json(server.metrics.snapshot()).into_response()
}

async fn notifications_ws_handler(
    State(server): State<Arc<RealtimeServer>>,
    Query(query): Query<WsQuery>,
    ws: WebSocketUpgrade,
) -> Response {
    let timing = server.config.websocket.timing();
    ws.max_message_size(timing.max_message_size)
        .on_upgrade(move |socket| async move {
            let user_id = UserId(query.user_id);
            match server.notification_hub.register(user_id).await {
                Ok((client, receiver)) => client.serve(socket, receiver, timing).await,
                Err(err) => {
                    warn!(%user_id, error = %err, "Notification registration rejected");
                    drop(socket);
                }
            }
        })
}

async fn chat_ws_handler(
    State(server): State<Arc<RealtimeServer>>,
    Query(query): Query<WsQuery>,
    ws: WebSocketUpgrade,
) -> Response {
    let timing = server.config.websocket.timing();
    ws.max_message_size(timing.max_message_size)
        .on_upgrade(move |socket| async move {
            let user_id = UserId(query.user_id);
            match server.chat_hub.register(user_id).await {
                Ok((client, receiver)) => client.serve(socket, receiver, timing).await,
                Err(err) => {
                    warn!(%user_id, error = %err, "Chat registration rejected");
                    drop(socket);
                }
            }
        })
}

async fn game_ws_handler(
    State(server): State<Arc<RealtimeServer>>,
    Path(room_id): Path<u64>,
    Query(query): Query<WsQuery>,
    ws: WebSocketUpgrade,
) -> Response {
    let timing = server.config.websocket.timing();
    ws.max_message_size(timing.max_message_size)
        .on_upgrade(move |socket| async move {
            let user_id = UserId(query.user_id);
            let room_id = RoomId(room_id);
            match server.game_hub.register(room_id, user_id) {
                Ok((client, receiver)) => client.serve(socket, receiver, timing).await,
                Err(err) => {
                    warn!(%user_id, %room_id, error = %err, "Game registration rejected");
                    drop(socket);
                }
            }
        })
}

async fn video_ws_handler(
    State(server): State<Arc<RealtimeServer>>,
    Path(room_id): Path<String>,
    Query(query): Query<WsQuery>,
    ws: WebSocketUpgrade,
) -> Response {
    let timing = server.config.websocket.timing();
    ws.max_message_size(timing.max_message_size)
        .on_upgrade(move |socket| async move {
            let user_id = UserId(query.user_id);
            match server.video_hub.register(&room_id, user_id) {
                Ok((client, receiver)) => client.serve(socket, receiver, timing).await,
                Err(err) => {
                    warn!(%user_id, room_id, error = %err, "Video registration rejected");
                    drop(socket);
                }
            }
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::notifier::InMemoryMessageBus;
    use crate::presence::InMemoryPresenceStore;
    use crate::repository::InMemoryGameRepository;

    fn test_server() -> Arc<RealtimeServer> {
        RealtimeServer::new(
            Config::default(),
            Arc::new(InMemoryGameRepository::new()),
            Some(Arc::new(InMemoryPresenceStore::new())),
            Some(Arc::new(InMemoryMessageBus::new())),
        )
    }

    #[tokio::test]
    async fn server_starts_and_shuts_down_idempotently() {
        let server = test_server();
        server.start().await.unwrap();
        server.shutdown();
        server.shutdown();
    }

    #[tokio::test]
    async fn router_builds() {
        let server = test_server();
        let _router = create_router(server);
    }

    #[tokio::test]
    async fn cross_hub_bus_round_trip() {
        // A game event published by one hub instance reaches clients of a
        // second instance sharing the same bus, as if in another process.
        let bus: Arc<InMemoryMessageBus> = Arc::new(InMemoryMessageBus::new());
        let repo = Arc::new(InMemoryGameRepository::new());

        let a = RealtimeServer::new(
            Config::default(),
            Arc::clone(&repo) as Arc<dyn GameRepository>,
            None,
            Some(Arc::clone(&bus) as Arc<dyn MessageBus>),
        );
        let b = RealtimeServer::new(
            Config::default(),
            repo as Arc<dyn GameRepository>,
            None,
            Some(bus as Arc<dyn MessageBus>),
        );
        a.start().await.unwrap();
        b.start().await.unwrap();

        let (_client, mut receiver) = b.game_hub.register(RoomId(1), UserId(2)).unwrap();

        a.notifier
            .publish_game_action(
                RoomId(1),
                r#"{"type":"game_cancelled","room_id":1}"#.to_string(),
            )
            .await
            .unwrap();

        tokio::time::sleep(std::time::Duration::from_millis(50)).await;
        let frame = match receiver.try_recv().unwrap() {
            crate::client::Outbound::Frame(bytes) => {
                String::from_utf8(bytes.to_vec()).unwrap()
            }
            other => panic!("expected frame, got {other:?}"),
        };
        assert!(frame.contains("game_cancelled"));
    }
}
