//! User-addressed notification fanout.

use anyhow::Result;
use async_trait::async_trait;
use bytes::Bytes;
use smallvec::SmallVec;
use std::collections::HashMap;
use std::sync::{Arc, RwLock, Weak};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace, warn};

use crate::client::{ActivityCallback, Client, Outbound};
use crate::config::{HubConfig, WebSocketTiming};
use crate::metrics::ServerMetrics;
use crate::notifier::{channels, Notifier};
use crate::presence::PresenceManager;
use crate::protocol::UserId;

use super::{Hub, RegisterError, SHUTDOWN_REASON};

#[derive(Default)]
struct NotificationState {
    connections: HashMap<UserId, Vec<Arc<Client>>>,
    total_conns: usize,
}

/// Fanout engine for user-addressed notifications. Payloads arrive
/// pre-serialized; the hub only routes bytes.
pub struct NotificationHub {
    weak_self: Weak<Self>,
    state: RwLock<NotificationState>,
    presence: Arc<PresenceManager>,
    limits: HubConfig,
    timing: WebSocketTiming,
    metrics: Arc<ServerMetrics>,
}

impl NotificationHub {
    pub fn new(
        presence: Arc<PresenceManager>,
        limits: HubConfig,
        timing: WebSocketTiming,
        metrics: Arc<ServerMetrics>,
    ) -> Arc<Self> {
        Arc::new_cyclic(|weak_self| Self {
            weak_self: Weak::clone(weak_self),
            state: RwLock::new(NotificationState::default()),
            presence,
            limits,
            timing,
            metrics,
        })
    }

    /// Accept a new connection for `user_id`, enforcing both the per-user
    /// and the total connection limit before any state is mutated.
    pub async fn register(
        &self,
        user_id: UserId,
    ) -> Result<(Arc<Client>, tokio::sync::mpsc::Receiver<Outbound>), RegisterError> {
        let (client, receiver) = {
            let mut state = self.state.write().unwrap_or_else(|e| e.into_inner());

            let current = state.connections.get(&user_id).map_or(0, Vec::len);
            if current >= self.limits.max_conns_per_user {
                self.metrics.increment_register_rejections();
                return Err(RegisterError::UserConnectionLimit {
                    user_id,
                    current,
                    limit: self.limits.max_conns_per_user,
                });
            }
            if state.total_conns >= self.limits.max_total_conns {
                self.metrics.increment_register_rejections();
                return Err(RegisterError::TotalConnectionLimit {
                    current: state.total_conns,
                    limit: self.limits.max_total_conns,
                });
            }

            // The caller necessarily holds the hub's Arc, so the upgrade
            // cannot fail.
            let hub: Arc<dyn Hub> = self
                .weak_self
                .upgrade()
                .expect("register called through the hub's Arc");
            let (client, receiver) = Client::new(
                hub,
                user_id,
                Some(touch_on_activity(&self.presence)),
                Arc::clone(&self.metrics),
                self.timing.outbound_queue_capacity,
            );
            state
                .connections
                .entry(user_id)
                .or_default()
                .push(Arc::clone(&client));
            state.total_conns += 1;
            (client, receiver)
        };

        self.metrics.increment_connections();
        self.presence.register(user_id).await;
        info!(%user_id, hub = self.name(), "Client registered");
        Ok((client, receiver))
    }

    /// Enqueue a pre-serialized payload to every connection of one user.
    pub fn broadcast(&self, user_id: UserId, payload: &str) {
        let bytes = Bytes::copy_from_slice(payload.as_bytes());
        let clients: SmallVec<[Arc<Client>; 4]> = {
            let state = self.state.read().unwrap_or_else(|e| e.into_inner());
            state
                .connections
                .get(&user_id)
                .map(|conns| conns.iter().cloned().collect())
                .unwrap_or_default()
        };
        for client in clients {
            client.try_send(bytes.clone());
        }
        self.metrics.increment_notifications_broadcast();
    }

    /// Enqueue a pre-serialized payload to every connection of every user.
    pub fn broadcast_all(&self, payload: &str) {
        let bytes = Bytes::copy_from_slice(payload.as_bytes());
        let clients: Vec<Arc<Client>> = {
            let state = self.state.read().unwrap_or_else(|e| e.into_inner());
            state
                .connections
                .values()
                .flat_map(|conns| conns.iter().cloned())
                .collect()
        };
        for client in clients {
            client.try_send(bytes.clone());
        }
        self.metrics.increment_notifications_broadcast();
    }

    /// Route bus deliveries into the local fanout path.
    pub async fn start_wiring(
        &self,
        notifier: &Notifier,
        token: CancellationToken,
    ) -> Result<()> {
        let hub = Weak::clone(&self.weak_self);
        notifier
            .start_pattern_subscriber(
                token,
                Arc::new(move |channel, payload| {
                    let Some(hub) = hub.upgrade() else {
                        return;
                    };
                    if channel == channels::BROADCAST_CHANNEL {
                        hub.broadcast_all(payload);
                    } else if let Some(user_id) = channels::parse_user_channel(channel) {
                        hub.broadcast(user_id, payload);
                    } else {
                        warn!(channel, "Unroutable notification delivery discarded");
                    }
                }),
            )
            .await
    }

    /// Close every socket and clear membership. Also stops the presence
    /// manager's reaper (idempotent).
    pub fn shutdown(&self) {
        let state = {
            let mut state = self.state.write().unwrap_or_else(|e| e.into_inner());
            std::mem::take(&mut *state)
        };
        for clients in state.connections.values() {
            for client in clients {
                client.send_close(axum::extract::ws::close_code::AWAY, SHUTDOWN_REASON);
            }
        }
        self.presence.stop();
        info!(
            connections = state.total_conns,
            hub = self.name(),
            "Hub shut down"
        );
    }

    /// Test and introspection helper.
    pub fn connection_count(&self, user_id: UserId) -> usize {
        self.state
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .connections
            .get(&user_id)
            .map_or(0, Vec::len)
    }

    pub fn total_connections(&self) -> usize {
        self.state
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .total_conns
    }
}

#[async_trait]
impl Hub for NotificationHub {
    fn name(&self) -> &'static str {
        "notifications"
    }

    fn unregister_client(&self, client: &Arc<Client>) {
        let user_id = client.user_id();
        let removed = {
            let mut state = self.state.write().unwrap_or_else(|e| e.into_inner());
            let Some(clients) = state.connections.get_mut(&user_id) else {
                return;
            };
            let before = clients.len();
            clients.retain(|existing| !Arc::ptr_eq(existing, client));
            let removed = before - clients.len();
            if clients.is_empty() {
                state.connections.remove(&user_id);
            }
            state.total_conns = state.total_conns.saturating_sub(removed);
            removed > 0
        };

        if removed {
            self.presence.unregister(user_id);
            debug!(%user_id, hub = self.name(), "Client unregistered");
        }
    }

    async fn handle_inbound(&self, client: &Arc<Client>, _text: String) {
        // Notification sockets are outbound-only; inbound frames already
        // refreshed the activity callback in the read pump.
        trace!(user_id = %client.user_id(), "Ignoring inbound frame on notification socket");
    }
}

fn touch_on_activity(presence: &Arc<PresenceManager>) -> ActivityCallback {
    let presence = Arc::clone(presence);
    Arc::new(move |user_id| {
        let presence = Arc::clone(&presence);
        tokio::spawn(async move {
            presence.touch(user_id).await;
        });
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::PresenceConfig;

    fn test_hub(limits: HubConfig) -> Arc<NotificationHub> {
        let metrics = Arc::new(ServerMetrics::new());
        let presence = PresenceManager::new(PresenceConfig::default(), None, metrics.clone());
        NotificationHub::new(presence, limits, WebSocketTiming::default(), metrics)
    }

    fn frame_text(item: Outbound) -> String {
        match item {
            Outbound::Frame(bytes) => String::from_utf8(bytes.to_vec()).unwrap(),
            other => panic!("expected frame, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn broadcast_reaches_every_device_of_user() {
        let hub = test_hub(HubConfig::default());
        let (_c1, mut rx1) = hub.register(UserId(1)).await.unwrap();
        let (_c2, mut rx2) = hub.register(UserId(1)).await.unwrap();
        let (_c3, mut rx3) = hub.register(UserId(2)).await.unwrap();

        hub.broadcast(UserId(1), r#"{"kind":"like"}"#);

        assert_eq!(frame_text(rx1.recv().await.unwrap()), r#"{"kind":"like"}"#);
        assert_eq!(frame_text(rx2.recv().await.unwrap()), r#"{"kind":"like"}"#);
        assert!(rx3.try_recv().is_err());
    }

    #[tokio::test]
    async fn per_user_limit_enforced() {
        let hub = test_hub(HubConfig {
            max_conns_per_user: 2,
            ..HubConfig::default()
        });
        let mut receivers = Vec::new();
        for _ in 0..2 {
            let (_, rx) = hub.register(UserId(9)).await.unwrap();
            receivers.push(rx);
        }

        let err = hub.register(UserId(9)).await.unwrap_err();
        assert!(matches!(
            err,
            RegisterError::UserConnectionLimit { current: 2, .. }
        ));
        assert_eq!(hub.connection_count(UserId(9)), 2);
    }

    #[tokio::test]
    async fn total_limit_enforced() {
        let hub = test_hub(HubConfig {
            max_total_conns: 2,
            ..HubConfig::default()
        });
        let (_a, _rxa) = hub.register(UserId(1)).await.unwrap();
        let (_b, _rxb) = hub.register(UserId(2)).await.unwrap();

        let err = hub.register(UserId(3)).await.unwrap_err();
        assert!(matches!(
            err,
            RegisterError::TotalConnectionLimit { current: 2, limit: 2 }
        ));
    }

    #[tokio::test]
    async fn unregister_removes_exact_instance_only() {
        let hub = test_hub(HubConfig::default());
        let (c1, _rx1) = hub.register(UserId(5)).await.unwrap();
        let (_c2, _rx2) = hub.register(UserId(5)).await.unwrap();

        hub.unregister_client(&c1);
        assert_eq!(hub.connection_count(UserId(5)), 1);
        assert_eq!(hub.total_connections(), 1);

        // Unregistering the same instance twice is a no-op.
        hub.unregister_client(&c1);
        assert_eq!(hub.connection_count(UserId(5)), 1);
    }

    #[tokio::test]
    async fn wiring_routes_broadcast_and_user_channels() {
        let metrics = Arc::new(ServerMetrics::new());
        let presence = PresenceManager::new(PresenceConfig::default(), None, metrics.clone());
        let hub = NotificationHub::new(
            presence,
            HubConfig::default(),
            WebSocketTiming::default(),
            metrics.clone(),
        );
        let bus = Arc::new(crate::notifier::InMemoryMessageBus::new());
        let notifier = Notifier::new(
            Some(bus as Arc<dyn crate::notifier::MessageBus>),
            metrics,
        );

        let (_c1, mut rx1) = hub.register(UserId(1)).await.unwrap();
        let (_c2, mut rx2) = hub.register(UserId(2)).await.unwrap();

        hub.start_wiring(&notifier, CancellationToken::new())
            .await
            .unwrap();

        notifier
            .publish_user(UserId(1), "direct".to_string())
            .await
            .unwrap();
        notifier.publish_broadcast("all".to_string()).await.unwrap();

        tokio::time::sleep(std::time::Duration::from_millis(50)).await;

        assert_eq!(frame_text(rx1.recv().await.unwrap()), "direct");
        assert_eq!(frame_text(rx1.recv().await.unwrap()), "all");
        assert_eq!(frame_text(rx2.recv().await.unwrap()), "all");
    }

    #[tokio::test]
    async fn shutdown_closes_sockets_and_clears_membership() {
        let hub = test_hub(HubConfig::default());
        let (_c1, mut rx1) = hub.register(UserId(1)).await.unwrap();
        let (_c2, mut rx2) = hub.register(UserId(2)).await.unwrap();

        hub.shutdown();

        for rx in [&mut rx1, &mut rx2] {
            match rx.recv().await.unwrap() {
                Outbound::Close { code, reason } => {
                    assert_eq!(code, axum::extract::ws::close_code::AWAY);
                    assert_eq!(reason, SHUTDOWN_REASON);
                }
                other => panic!("expected close, got {other:?}"),
            }
        }
        assert_eq!(hub.total_connections(), 0);
    }
}
