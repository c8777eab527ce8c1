//! Pub/sub bridge between hubs and the message bus.
//!
//! Thin adapter: publishes pre-serialized payloads to the bit-exact channel
//! names in [`channels`], and spawns subscriber tasks that feed deliveries
//! back into hub broadcast paths. Without a configured bus every publish is
//! a no-op success, so single-process deployments need no wiring at all.

use anyhow::Result;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error};

use crate::metrics::ServerMetrics;
use crate::protocol::{ChatMessage, ConversationId, RoomId, UserId};

pub mod bus;
pub mod channels;

pub use bus::{BusMessage, BusSubscription, InMemoryMessageBus, MessageBus};

/// Callback invoked for each bus delivery as `(channel, payload)`.
pub type SubscriberHandler = Arc<dyn Fn(&str, &str) + Send + Sync>;

/// Publish/subscribe adapter shared by all hubs.
pub struct Notifier {
    bus: Option<Arc<dyn MessageBus>>,
    metrics: Arc<ServerMetrics>,
}

impl Notifier {
    pub fn new(bus: Option<Arc<dyn MessageBus>>, metrics: Arc<ServerMetrics>) -> Arc<Self> {
        Arc::new(Self { bus, metrics })
    }

    pub fn has_bus(&self) -> bool {
        self.bus.is_some()
    }

    pub async fn publish_user(&self, user_id: UserId, payload: String) -> Result<()> {
        self.publish(&channels::user_channel(user_id), payload).await
    }

    pub async fn publish_broadcast(&self, payload: String) -> Result<()> {
        self.publish(channels::BROADCAST_CHANNEL, payload).await
    }

    pub async fn publish_chat_message(
        &self,
        conversation_id: ConversationId,
        message: &ChatMessage,
    ) -> Result<()> {
        let payload = serde_json::to_string(message)?;
        self.publish(&channels::chat_channel(conversation_id), payload)
            .await
    }

    pub async fn publish_typing_indicator(
        &self,
        conversation_id: ConversationId,
        message: &ChatMessage,
    ) -> Result<()> {
        let payload = serde_json::to_string(message)?;
        self.publish(&channels::typing_channel(conversation_id), payload)
            .await
    }

    pub async fn publish_presence(
        &self,
        conversation_id: ConversationId,
        message: &ChatMessage,
    ) -> Result<()> {
        let payload = serde_json::to_string(message)?;
        self.publish(&channels::presence_channel(conversation_id), payload)
            .await
    }

    pub async fn publish_game_action(&self, room_id: RoomId, payload: String) -> Result<()> {
        self.publish(&channels::game_channel(room_id), payload).await
    }

    pub async fn publish_video_chat(&self, room_id: &str, payload: String) -> Result<()> {
        self.publish(&channels::video_chat_channel(room_id), payload)
            .await
    }

    async fn publish(&self, channel: &str, payload: String) -> Result<()> {
        let Some(bus) = &self.bus else {
            return Ok(());
        };
        bus.publish(channel, payload).await?;
        self.metrics.increment_bus_published();
        Ok(())
    }

    /// Subscribe to user-addressed and broadcast notification channels.
    pub async fn start_pattern_subscriber(
        &self,
        token: CancellationToken,
        handler: SubscriberHandler,
    ) -> Result<()> {
        let patterns = vec![
            format!("{}*", channels::USER_CHANNEL_PREFIX),
            channels::BROADCAST_CHANNEL.to_string(),
        ];
        self.start_subscriber("notifications", &patterns, token, handler)
            .await
    }

    /// Subscribe to chat, typing, and presence conversation channels.
    pub async fn start_chat_subscriber(
        &self,
        token: CancellationToken,
        handler: SubscriberHandler,
    ) -> Result<()> {
        let patterns = vec![
            format!("{}*", channels::CHAT_CHANNEL_PREFIX),
            format!("{}*", channels::TYPING_CHANNEL_PREFIX),
            format!("{}*", channels::PRESENCE_CHANNEL_PREFIX),
        ];
        self.start_subscriber("chat", &patterns, token, handler).await
    }

    /// Subscribe to game room channels.
    pub async fn start_game_subscriber(
        &self,
        token: CancellationToken,
        handler: SubscriberHandler,
    ) -> Result<()> {
        let patterns = vec![format!("{}*", channels::GAME_CHANNEL_PREFIX)];
        self.start_subscriber("game", &patterns, token, handler).await
    }

    /// Subscribe to videochat room channels.
    pub async fn start_video_chat_subscriber(
        &self,
        token: CancellationToken,
        handler: SubscriberHandler,
    ) -> Result<()> {
        let patterns = vec![format!("{}*", channels::VIDEO_CHAT_CHANNEL_PREFIX)];
        self.start_subscriber("videochat", &patterns, token, handler)
            .await
    }

    async fn start_subscriber(
        &self,
        label: &'static str,
        patterns: &[String],
        token: CancellationToken,
        handler: SubscriberHandler,
    ) -> Result<()> {
        let Some(bus) = &self.bus else {
            debug!(label, "No bus configured, subscriber not started");
            return Ok(());
        };

        let mut subscription = bus.subscribe_pattern(patterns).await?;
        let metrics = Arc::clone(&self.metrics);
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    () = token.cancelled() => break,
                    delivery = subscription.recv() => {
                        let Some(delivery) = delivery else { break };
                        metrics.increment_bus_received();
                        dispatch_isolated(&handler, &delivery, &metrics, label);
                    }
                }
            }
            debug!(label, "Subscriber stopped");
        });
        Ok(())
    }
}

/// Invoke the handler inside a panic trap so one bad delivery cannot take
/// the subscriber down.
fn dispatch_isolated(
    handler: &SubscriberHandler,
    delivery: &BusMessage,
    metrics: &ServerMetrics,
    label: &'static str,
) {
    let result = std::panic::catch_unwind(AssertUnwindSafe(|| {
        handler(&delivery.channel, &delivery.payload);
    }));

    if let Err(panic) = result {
        metrics.increment_subscriber_panics();
        let reason = panic
            .downcast_ref::<&str>()
            .map(ToString::to_string)
            .or_else(|| panic.downcast_ref::<String>().cloned())
            .unwrap_or_else(|| "non-string panic payload".to_string());
        let backtrace = std::backtrace::Backtrace::force_capture();
        error!(
            label,
            channel = %delivery.channel,
            panic = %reason,
            %backtrace,
            "Subscriber handler panicked; delivery dropped"
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU64, Ordering};
    use std::time::Duration;

    fn notifier_with_bus() -> (Arc<Notifier>, Arc<InMemoryMessageBus>) {
        let bus = Arc::new(InMemoryMessageBus::new());
        let notifier = Notifier::new(
            Some(bus.clone() as Arc<dyn MessageBus>),
            Arc::new(ServerMetrics::new()),
        );
        (notifier, bus)
    }

    #[tokio::test]
    async fn publish_without_bus_is_noop_success() {
        let notifier = Notifier::new(None, Arc::new(ServerMetrics::new()));
        notifier
            .publish_user(UserId(1), "{}".to_string())
            .await
            .unwrap();
        notifier.publish_broadcast("{}".to_string()).await.unwrap();
        notifier
            .publish_game_action(RoomId(1), "{}".to_string())
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn pattern_subscriber_routes_user_and_broadcast() {
        let (notifier, _bus) = notifier_with_bus();
        let seen = Arc::new(std::sync::Mutex::new(Vec::new()));
        let seen_clone = seen.clone();

        notifier
            .start_pattern_subscriber(
                CancellationToken::new(),
                Arc::new(move |channel, payload| {
                    seen_clone
                        .lock()
                        .unwrap()
                        .push((channel.to_string(), payload.to_string()));
                }),
            )
            .await
            .unwrap();

        notifier
            .publish_user(UserId(5), "direct".to_string())
            .await
            .unwrap();
        notifier
            .publish_broadcast("everyone".to_string())
            .await
            .unwrap();

        tokio::time::sleep(Duration::from_millis(50)).await;
        let seen = seen.lock().unwrap();
        assert_eq!(seen.len(), 2);
        assert_eq!(seen[0].0, "notifications:user:5");
        assert_eq!(seen[1].1, "everyone");
    }

    #[tokio::test]
    async fn panicking_handler_does_not_kill_subscriber() {
        let (notifier, _bus) = notifier_with_bus();
        let delivered = Arc::new(AtomicU64::new(0));
        let delivered_clone = delivered.clone();

        notifier
            .start_game_subscriber(
                CancellationToken::new(),
                Arc::new(move |_, payload| {
                    if payload == "boom" {
                        panic!("handler exploded");
                    }
                    delivered_clone.fetch_add(1, Ordering::SeqCst);
                }),
            )
            .await
            .unwrap();

        notifier
            .publish_game_action(RoomId(1), "boom".to_string())
            .await
            .unwrap();
        notifier
            .publish_game_action(RoomId(1), "fine".to_string())
            .await
            .unwrap();

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(delivered.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn cancellation_stops_subscriber() {
        let (notifier, _bus) = notifier_with_bus();
        let delivered = Arc::new(AtomicU64::new(0));
        let delivered_clone = delivered.clone();
        let token = CancellationToken::new();

        notifier
            .start_chat_subscriber(
                token.clone(),
                Arc::new(move |_, _| {
                    delivered_clone.fetch_add(1, Ordering::SeqCst);
                }),
            )
            .await
            .unwrap();

        token.cancel();
        tokio::time::sleep(Duration::from_millis(20)).await;

        notifier
            .publish_chat_message(
                ConversationId(1),
                &ChatMessage {
                    kind: "message".to_string(),
                    conversation_id: Some(ConversationId(1)),
                    room_id: None,
                    user_id: Some(UserId(1)),
                    username: None,
                    payload: serde_json::json!({"text": "late"}),
                },
            )
            .await
            .unwrap();

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(delivered.load(Ordering::SeqCst), 0);
    }
}
