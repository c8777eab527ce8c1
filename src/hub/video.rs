//! Videochat signalling relay.
//!
//! The hub never inspects SDP or ICE payloads: offers, answers, and
//! candidates are relayed to their target peer; join/leave membership
//! events fan out to the room.

use anyhow::Result;
use async_trait::async_trait;
use bytes::Bytes;
use std::collections::HashMap;
use std::sync::{Arc, RwLock, Weak};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::client::{Client, Outbound};
use crate::config::{HubConfig, WebSocketTiming};
use crate::metrics::ServerMetrics;
use crate::notifier::{channels, Notifier};
use crate::protocol::{RoomUsersPayload, UserId, VideoChatEvent};

use super::{Hub, RegisterError, SHUTDOWN_REASON};

/// Fanout engine for videochat signalling rooms.
pub struct VideoChatHub {
    weak_self: Weak<Self>,
    rooms: RwLock<HashMap<String, HashMap<UserId, Arc<Client>>>>,
    notifier: Arc<Notifier>,
    limits: HubConfig,
    timing: WebSocketTiming,
    metrics: Arc<ServerMetrics>,
}

impl VideoChatHub {
    pub fn new(
        notifier: Arc<Notifier>,
        limits: HubConfig,
        timing: WebSocketTiming,
        metrics: Arc<ServerMetrics>,
    ) -> Arc<Self> {
        Arc::new_cyclic(|weak_self| Self {
            weak_self: Weak::clone(weak_self),
            rooms: RwLock::new(HashMap::new()),
            notifier,
            limits,
            timing,
            metrics,
        })
    }

    /// Accept a peer into a signalling room. The joiner receives the
    /// current peer list; everyone else learns about the joiner.
    pub fn register(
        &self,
        room_id: &str,
        user_id: UserId,
    ) -> Result<(Arc<Client>, tokio::sync::mpsc::Receiver<Outbound>), RegisterError> {
        let (client, receiver, peers) = {
            let mut rooms = self.rooms.write().unwrap_or_else(|e| e.into_inner());
            let room = rooms.entry(room_id.to_string()).or_default();

            let reconnect = room.contains_key(&user_id);
            if !reconnect && room.len() >= self.limits.max_peers_per_room {
                self.metrics.increment_register_rejections();
                return Err(RegisterError::VideoRoomFull {
                    room_id: room_id.to_string(),
                    limit: self.limits.max_peers_per_room,
                });
            }

            let peers: Vec<UserId> = room.keys().copied().filter(|id| *id != user_id).collect();
            // The caller necessarily holds the hub's Arc, so the upgrade
            // cannot fail.
            let hub: Arc<dyn Hub> = self
                .weak_self
                .upgrade()
                .expect("register called through the hub's Arc");
            let (client, receiver) = Client::new(
                hub,
                user_id,
                None,
                Arc::clone(&self.metrics),
                self.timing.outbound_queue_capacity,
            );
            room.insert(user_id, Arc::clone(&client));
            (client, receiver, peers)
        };

        self.metrics.increment_connections();

        client.try_send_json(&VideoChatEvent::RoomUsers {
            room_id: room_id.to_string(),
            payload: RoomUsersPayload { user_ids: peers },
        });
        self.broadcast_except(
            room_id,
            &VideoChatEvent::UserJoined {
                room_id: room_id.to_string(),
                user_id,
            },
            Some(user_id),
        );

        info!(%user_id, room_id, hub = self.name(), "Peer registered");
        Ok((client, receiver))
    }

    fn broadcast_except(&self, room_id: &str, event: &VideoChatEvent, except: Option<UserId>) {
        let bytes = match serde_json::to_vec(event) {
            Ok(bytes) => Bytes::from(bytes),
            Err(err) => {
                warn!(room_id, error = %err, "Failed to serialize videochat event");
                return;
            }
        };
        let clients: Vec<Arc<Client>> = {
            let rooms = self.rooms.read().unwrap_or_else(|e| e.into_inner());
            let Some(room) = rooms.get(room_id) else {
                return;
            };
            room.iter()
                .filter(|(id, _)| Some(**id) != except)
                .map(|(_, client)| Arc::clone(client))
                .collect()
        };
        for client in clients {
            client.try_send(bytes.clone());
        }
        self.metrics.increment_video_events_relayed();
    }

    fn relay_to_peer(&self, room_id: &str, target_id: UserId, event: &VideoChatEvent) {
        let client = {
            let rooms = self.rooms.read().unwrap_or_else(|e| e.into_inner());
            rooms
                .get(room_id)
                .and_then(|room| room.get(&target_id))
                .cloned()
        };
        match client {
            Some(client) => {
                client.try_send_json(event);
                self.metrics.increment_video_events_relayed();
            }
            None => debug!(room_id, %target_id, "Relay target not in room"),
        }
    }

    /// Route videochat bus deliveries into the local room fanout.
    pub async fn start_wiring(
        &self,
        notifier: &Notifier,
        token: CancellationToken,
    ) -> Result<()> {
        let hub = Weak::clone(&self.weak_self);
        notifier
            .start_video_chat_subscriber(
                token,
                Arc::new(move |channel, payload| {
                    let Some(hub) = hub.upgrade() else {
                        return;
                    };
                    let Some(room_id) = channels::parse_video_chat_channel(channel) else {
                        warn!(channel, "Unroutable videochat delivery discarded");
                        return;
                    };
                    match serde_json::from_str::<VideoChatEvent>(payload) {
                        Ok(event) => hub.broadcast_except(room_id, &event, None),
                        Err(err) => warn!(channel, error = %err, "Malformed videochat delivery"),
                    }
                }),
            )
            .await
    }

    /// Close every socket and clear membership.
    pub fn shutdown(&self) {
        let rooms = {
            let mut rooms = self.rooms.write().unwrap_or_else(|e| e.into_inner());
            std::mem::take(&mut *rooms)
        };
        for room in rooms.values() {
            for client in room.values() {
                client.try_send_json(&VideoChatEvent::ServerShutdown);
                client.send_close(axum::extract::ws::close_code::AWAY, SHUTDOWN_REASON);
            }
        }
        info!(rooms = rooms.len(), hub = self.name(), "Hub shut down");
    }

    pub fn room_peer_count(&self, room_id: &str) -> usize {
        self.rooms
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .get(room_id)
            .map_or(0, HashMap::len)
    }
}

#[async_trait]
impl Hub for VideoChatHub {
    fn name(&self) -> &'static str {
        "videochat"
    }

    fn unregister_client(&self, client: &Arc<Client>) {
        let user_id = client.user_id();
        let mut left_rooms = Vec::new();
        {
            let mut rooms = self.rooms.write().unwrap_or_else(|e| e.into_inner());
            rooms.retain(|room_id, room| {
                let is_same = room
                    .get(&user_id)
                    .is_some_and(|existing| Arc::ptr_eq(existing, client));
                if is_same {
                    room.remove(&user_id);
                    left_rooms.push(room_id.clone());
                }
                !room.is_empty()
            });
        }

        for room_id in left_rooms {
            self.broadcast_except(
                &room_id,
                &VideoChatEvent::UserLeft {
                    room_id: room_id.clone(),
                    user_id,
                },
                None,
            );
            debug!(%user_id, %room_id, hub = self.name(), "Peer unregistered");
        }
    }

    async fn handle_inbound(&self, client: &Arc<Client>, text: String) {
        let user_id = client.user_id();
        let event: VideoChatEvent = match serde_json::from_str(&text) {
            Ok(event) => event,
            Err(err) => {
                debug!(%user_id, error = %err, "Malformed videochat frame ignored");
                return;
            }
        };

        match event {
            VideoChatEvent::Offer {
                room_id,
                target_id,
                payload,
                ..
            } => {
                // Stamp the sender; clients cannot impersonate each other.
                let event = VideoChatEvent::Offer {
                    room_id: room_id.clone(),
                    user_id,
                    target_id,
                    payload,
                };
                self.relay_to_peer(&room_id, target_id, &event);
                self.publish(&room_id, &event).await;
            }
            VideoChatEvent::Answer {
                room_id,
                target_id,
                payload,
                ..
            } => {
                let event = VideoChatEvent::Answer {
                    room_id: room_id.clone(),
                    user_id,
                    target_id,
                    payload,
                };
                self.relay_to_peer(&room_id, target_id, &event);
                self.publish(&room_id, &event).await;
            }
            VideoChatEvent::IceCandidate {
                room_id,
                target_id,
                payload,
                ..
            } => {
                let event = VideoChatEvent::IceCandidate {
                    room_id: room_id.clone(),
                    user_id,
                    target_id,
                    payload,
                };
                self.relay_to_peer(&room_id, target_id, &event);
                self.publish(&room_id, &event).await;
            }
            VideoChatEvent::Leave { room_id, .. } => {
                self.unregister_client(client);
                debug!(%user_id, %room_id, "Peer left via leave event");
            }
            other => {
                debug!(%user_id, event = ?other, "Unhandled videochat frame");
            }
        }
    }
}

impl VideoChatHub {
    async fn publish(&self, room_id: &str, event: &VideoChatEvent) {
        let payload = match serde_json::to_string(event) {
            Ok(payload) => payload,
            Err(_) => return,
        };
        if let Err(err) = self.notifier.publish_video_chat(room_id, payload).await {
            warn!(room_id, error = %err, "Failed to publish videochat event");
        }
    }
}
