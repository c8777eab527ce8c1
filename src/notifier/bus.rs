//! Message bus abstraction.
//!
//! Production deployments back this with an external pub/sub system so hubs
//! in different processes see the same event stream. The in-memory backend
//! gives single-process deployments and tests identical semantics: FIFO per
//! channel from a single publisher, no cross-channel ordering.

use anyhow::Result;
use async_trait::async_trait;
use dashmap::DashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::mpsc;
use tracing::warn;

/// A delivery handed to a subscriber.
#[derive(Debug, Clone)]
pub struct BusMessage {
    pub channel: String,
    pub payload: String,
}

/// Receiving side of a subscription. Dropping it releases the subscription.
pub struct BusSubscription {
    receiver: mpsc::Receiver<BusMessage>,
}

impl BusSubscription {
    pub fn new(receiver: mpsc::Receiver<BusMessage>) -> Self {
        Self { receiver }
    }

    /// Next delivery, or `None` once the bus side is gone.
    pub async fn recv(&mut self) -> Option<BusMessage> {
        self.receiver.recv().await
    }
}

/// Publish/subscribe contract.
#[async_trait]
pub trait MessageBus: Send + Sync {
    /// Publish a payload to a channel.
    async fn publish(&self, channel: &str, payload: String) -> Result<()>;

    /// Subscribe to exact channel names.
    async fn subscribe(&self, channels: &[String]) -> Result<BusSubscription>;

    /// Subscribe to channel patterns; a trailing `*` matches any suffix.
    async fn subscribe_pattern(&self, patterns: &[String]) -> Result<BusSubscription>;
}

#[derive(Debug, Clone)]
enum ChannelMatcher {
    Exact(String),
    Prefix(String),
}

impl ChannelMatcher {
    fn from_pattern(pattern: &str) -> Self {
        match pattern.strip_suffix('*') {
            Some(prefix) => ChannelMatcher::Prefix(prefix.to_string()),
            None => ChannelMatcher::Exact(pattern.to_string()),
        }
    }

    fn matches(&self, channel: &str) -> bool {
        match self {
            ChannelMatcher::Exact(name) => name == channel,
            ChannelMatcher::Prefix(prefix) => channel.starts_with(prefix.as_str()),
        }
    }
}

struct SubscriberEntry {
    matchers: Vec<ChannelMatcher>,
    sender: mpsc::Sender<BusMessage>,
}

/// Capacity of each subscriber's delivery queue.
const SUBSCRIBER_QUEUE_CAPACITY: usize = 256;

/// In-process bus backend.
#[derive(Default)]
pub struct InMemoryMessageBus {
    subscribers: DashMap<u64, SubscriberEntry>,
    next_id: AtomicU64,
}

impl InMemoryMessageBus {
    pub fn new() -> Self {
        Self::default()
    }

    fn register(&self, matchers: Vec<ChannelMatcher>) -> BusSubscription {
        let (sender, receiver) = mpsc::channel(SUBSCRIBER_QUEUE_CAPACITY);
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        self.subscribers.insert(id, SubscriberEntry { matchers, sender });
        BusSubscription::new(receiver)
    }
}

#[async_trait]
impl MessageBus for InMemoryMessageBus {
    async fn publish(&self, channel: &str, payload: String) -> Result<()> {
        let mut dead = Vec::new();
        for entry in self.subscribers.iter() {
            if !entry.matchers.iter().any(|m| m.matches(channel)) {
                continue;
            }
            if entry.sender.is_closed() {
                dead.push(*entry.key());
                continue;
            }
            let message = BusMessage {
                channel: channel.to_string(),
                payload: payload.clone(),
            };
            if entry.sender.try_send(message).is_err() {
                warn!(channel, subscriber = *entry.key(), "Bus subscriber queue full, dropping delivery");
            }
        }

        for id in dead {
            self.subscribers.remove(&id);
        }
        Ok(())
    }

    async fn subscribe(&self, channels: &[String]) -> Result<BusSubscription> {
        Ok(self.register(
            channels
                .iter()
                .map(|name| ChannelMatcher::Exact(name.clone()))
                .collect(),
        ))
    }

    async fn subscribe_pattern(&self, patterns: &[String]) -> Result<BusSubscription> {
        Ok(self.register(
            patterns
                .iter()
                .map(|pattern| ChannelMatcher::from_pattern(pattern))
                .collect(),
        ))
    }
}
