//! Conversation-addressed chat fanout with active-viewer tracking.
//!
//! Connection state and viewer state are independent: a user is online the
//! moment any device connects, but only becomes an active viewer of a
//! conversation after an explicit join. Broadcasts to a conversation reach
//! every device of every active viewer.

use anyhow::Result;
use async_trait::async_trait;
use bytes::Bytes;
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, RwLock, Weak};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace, warn};

use crate::client::{ActivityCallback, Client, Outbound};
use crate::config::{HubConfig, WebSocketTiming};
use crate::metrics::ServerMetrics;
use crate::notifier::{channels, Notifier};
use crate::presence::PresenceManager;
use crate::protocol::chat::kind;
use crate::protocol::{ChatMessage, ConversationId, UserId};

use super::{Hub, RegisterError, SHUTDOWN_REASON};

#[derive(Default)]
struct ChatState {
    connections: HashMap<UserId, Vec<Arc<Client>>>,
    /// Active viewers per conversation.
    viewers: HashMap<ConversationId, HashSet<UserId>>,
    /// Dual index: conversations each user is viewing.
    viewing: HashMap<UserId, HashSet<ConversationId>>,
}

/// Fanout engine for the chat fabric.
pub struct ChatHub {
    weak_self: Weak<Self>,
    state: RwLock<ChatState>,
    presence: Arc<PresenceManager>,
    notifier: Arc<Notifier>,
    limits: HubConfig,
    timing: WebSocketTiming,
    metrics: Arc<ServerMetrics>,
}

impl ChatHub {
    /// Build the hub and attach its online/offline handlers to the
    /// presence manager's listener list.
    pub fn new(
        presence: Arc<PresenceManager>,
        notifier: Arc<Notifier>,
        limits: HubConfig,
        timing: WebSocketTiming,
        metrics: Arc<ServerMetrics>,
    ) -> Arc<Self> {
        let hub = Arc::new_cyclic(|weak_self| Self {
            weak_self: Weak::clone(weak_self),
            state: RwLock::new(ChatState::default()),
            presence: Arc::clone(&presence),
            notifier,
            limits,
            timing,
            metrics,
        });

        let online_hub: Weak<ChatHub> = Arc::downgrade(&hub);
        let offline_hub: Weak<ChatHub> = Arc::downgrade(&hub);
        presence.add_listener(
            Arc::new(move |user_id| {
                if let Some(hub) = online_hub.upgrade() {
                    hub.handle_user_online(user_id);
                }
            }),
            Arc::new(move |user_id| {
                if let Some(hub) = offline_hub.upgrade() {
                    hub.handle_user_offline(user_id);
                }
            }),
        );

        hub
    }

    /// Accept a new connection and send it the initial online-users
    /// snapshot (excluding itself).
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

            // The caller necessarily holds the hub's Arc, so the upgrade
            // cannot fail.
            let hub: Arc<dyn Hub> = self
                .weak_self
                .upgrade()
                .expect("register called through the hub's Arc");
            let (client, receiver) = Client::new(
                hub,
                user_id,
                Some(self.touch_on_activity()),
                Arc::clone(&self.metrics),
                self.timing.outbound_queue_capacity,
            );
            state
                .connections
                .entry(user_id)
                .or_default()
                .push(Arc::clone(&client));
            (client, receiver)
        };

        self.metrics.increment_connections();
        self.presence.register(user_id).await;

        let online: Vec<UserId> = self
            .presence
            .get_online_user_ids()
            .await
            .into_iter()
            .filter(|id| *id != user_id)
            .collect();
        client.try_send_json(&ChatMessage::connected_users(&online));

        info!(%user_id, hub = self.name(), "Client registered");
        Ok((client, receiver))
    }

    /// Mark the user an active viewer of a conversation. Requires an
    /// existing connection.
    pub fn join_conversation(
        &self,
        user_id: UserId,
        conversation_id: ConversationId,
    ) -> Result<(), RegisterError> {
        let mut state = self.state.write().unwrap_or_else(|e| e.into_inner());
        if !state.connections.contains_key(&user_id) {
            return Err(RegisterError::NotConnected { user_id });
        }
        state
            .viewers
            .entry(conversation_id)
            .or_default()
            .insert(user_id);
        state
            .viewing
            .entry(user_id)
            .or_default()
            .insert(conversation_id);
        debug!(%user_id, %conversation_id, "Joined conversation");
        Ok(())
    }

    pub fn leave_conversation(&self, user_id: UserId, conversation_id: ConversationId) {
        let mut state = self.state.write().unwrap_or_else(|e| e.into_inner());
        if let Some(viewers) = state.viewers.get_mut(&conversation_id) {
            viewers.remove(&user_id);
            if viewers.is_empty() {
                state.viewers.remove(&conversation_id);
            }
        }
        if let Some(viewing) = state.viewing.get_mut(&user_id) {
            viewing.remove(&conversation_id);
            if viewing.is_empty() {
                state.viewing.remove(&user_id);
            }
        }
        debug!(%user_id, %conversation_id, "Left conversation");
    }

    /// Serialize once, then enqueue to every device of every active viewer.
    pub fn broadcast_to_conversation(&self, conversation_id: ConversationId, message: &ChatMessage) {
        let bytes = match serde_json::to_vec(message) {
            Ok(bytes) => Bytes::from(bytes),
            Err(err) => {
                warn!(%conversation_id, error = %err, "Failed to serialize chat message");
                return;
            }
        };

        let clients: Vec<Arc<Client>> = {
            let state = self.state.read().unwrap_or_else(|e| e.into_inner());
            let Some(viewers) = state.viewers.get(&conversation_id) else {
                return;
            };
            viewers
                .iter()
                .filter_map(|user_id| state.connections.get(user_id))
                .flat_map(|conns| conns.iter().cloned())
                .collect()
        };

        for client in clients {
            client.try_send(bytes.clone());
        }
        self.metrics.increment_chat_messages_broadcast();
    }

    /// Enqueue to every connection of every user.
    pub fn broadcast_to_all_users(&self, message: &ChatMessage) {
        let bytes = match serde_json::to_vec(message) {
            Ok(bytes) => Bytes::from(bytes),
            Err(err) => {
                warn!(error = %err, "Failed to serialize chat message");
                return;
            }
        };

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
        self.metrics.increment_chat_messages_broadcast();
    }

    /// Emit a `user_status` event to every other user's connections.
    pub fn broadcast_global_status(&self, user_id: UserId, status: &str) {
        let message = ChatMessage::user_status(user_id, status);
        let bytes = match serde_json::to_vec(&message) {
            Ok(bytes) => Bytes::from(bytes),
            Err(err) => {
                warn!(%user_id, error = %err, "Failed to serialize user_status");
                return;
            }
        };

        let clients: Vec<Arc<Client>> = {
            let state = self.state.read().unwrap_or_else(|e| e.into_inner());
            state
                .connections
                .iter()
                .filter(|(other, _)| **other != user_id)
                .flat_map(|(_, conns)| conns.iter().cloned())
                .collect()
        };
        for client in clients {
            client.try_send(bytes.clone());
        }
    }

    fn handle_user_online(&self, user_id: UserId) {
        self.broadcast_global_status(user_id, "online");
    }

    /// Offline users stop being active viewers everywhere.
    fn handle_user_offline(&self, user_id: UserId) {
        {
            let mut state = self.state.write().unwrap_or_else(|e| e.into_inner());
            if let Some(conversations) = state.viewing.remove(&user_id) {
                for conversation_id in conversations {
                    if let Some(viewers) = state.viewers.get_mut(&conversation_id) {
                        viewers.remove(&user_id);
                        if viewers.is_empty() {
                            state.viewers.remove(&conversation_id);
                        }
                    }
                }
            }
        }
        self.broadcast_global_status(user_id, "offline");
    }

    /// Route conversation-scoped bus deliveries into the local fanout path.
    /// The channel prefix supplies a default `type` and the suffix stamps
    /// the conversation id.
    pub async fn start_wiring(
        &self,
        notifier: &Notifier,
        token: CancellationToken,
    ) -> Result<()> {
        let hub = Weak::clone(&self.weak_self);
        notifier
            .start_chat_subscriber(
                token,
                Arc::new(move |channel, payload| {
                    let Some(hub) = hub.upgrade() else {
                        return;
                    };
                    let Some((channel_kind, conversation_id)) = channels::parse_chat_channel(channel)
                    else {
                        warn!(channel, "Unroutable chat delivery discarded");
                        return;
                    };
                    let mut message: ChatMessage = match serde_json::from_str(payload) {
                        Ok(message) => message,
                        Err(err) => {
                            warn!(channel, error = %err, "Malformed chat delivery discarded");
                            return;
                        }
                    };
                    if message.kind.is_empty() {
                        message.kind = channel_kind.default_message_kind().to_string();
                    }
                    message.conversation_id = Some(conversation_id);
                    hub.broadcast_to_conversation(conversation_id, &message);
                }),
            )
            .await
    }

    /// Close every socket, clear all maps, stop the presence reaper.
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
        info!(hub = self.name(), "Hub shut down");
    }

    fn touch_on_activity(&self) -> ActivityCallback {
        let presence = Arc::clone(&self.presence);
        Arc::new(move |user_id| {
            let presence = Arc::clone(&presence);
            tokio::spawn(async move {
                presence.touch(user_id).await;
            });
        })
    }

    /// Test and introspection helpers.
    pub fn connection_count(&self, user_id: UserId) -> usize {
        self.state
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .connections
            .get(&user_id)
            .map_or(0, Vec::len)
    }

    pub fn viewer_count(&self, conversation_id: ConversationId) -> usize {
        self.state
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .viewers
            .get(&conversation_id)
            .map_or(0, HashSet::len)
    }
}

#[async_trait]
impl Hub for ChatHub {
    fn name(&self) -> &'static str {
        "chat"
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
            removed > 0
        };

        if removed {
            // Viewer state is cleared by the offline handler, not here: the
            // user may still be connected on another device.
            self.presence.unregister(user_id);
            debug!(%user_id, hub = self.name(), "Client unregistered");
        }
    }

    async fn handle_inbound(&self, client: &Arc<Client>, text: String) {
        let user_id = client.user_id();
        let mut message: ChatMessage = match serde_json::from_str(&text) {
            Ok(message) => message,
            Err(err) => {
                debug!(%user_id, error = %err, "Malformed chat frame ignored");
                return;
            }
        };

        match message.kind.as_str() {
            "join" => {
                let Some(conversation_id) = message.conversation_id else {
                    return;
                };
                if let Err(err) = self.join_conversation(user_id, conversation_id) {
                    debug!(%user_id, %conversation_id, error = %err, "Join rejected");
                }
            }
            "leave" => {
                if let Some(conversation_id) = message.conversation_id {
                    self.leave_conversation(user_id, conversation_id);
                }
            }
            kind::TYPING => {
                let Some(conversation_id) = message.conversation_id else {
                    return;
                };
                message.user_id = Some(user_id);
                self.broadcast_to_conversation(conversation_id, &message);
                if let Err(err) = self
                    .notifier
                    .publish_typing_indicator(conversation_id, &message)
                    .await
                {
                    warn!(%conversation_id, error = %err, "Failed to publish typing indicator");
                }
            }
            other => {
                trace!(%user_id, kind = other, "Unhandled chat frame kind");
            }
        }
    }
}
