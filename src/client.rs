//! Per-connection socket pump.
//!
//! Each client owns a bounded outbound queue and two tasks: the read pump
//! (frames in, liveness deadline, activity callback, hub dispatch) and the
//! write pump (queue drain, periodic pings, write deadline). Hubs never
//! touch the socket; everything outbound goes through [`Client::try_send`].

use axum::extract::ws::{close_code, CloseFrame, Message, Utf8Bytes, WebSocket};
use bytes::Bytes;
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tokio::time::timeout;
use tracing::{debug, warn};

use crate::config::WebSocketTiming;
use crate::hub::Hub;
use crate::metrics::ServerMetrics;
use crate::protocol::UserId;

/// Fired on every inbound frame and every pong.
pub type ActivityCallback = Arc<dyn Fn(UserId) + Send + Sync>;

/// Synthetic notice enqueued in place of a frame dropped on overflow.
const DROP_NOTICE: &[u8] = br#"{"type":"messages_dropped","payload":{"reason":"buffer_full"}}"#;

/// Item on a client's outbound queue.
#[derive(Debug, Clone)]
pub enum Outbound {
    /// A JSON text frame.
    Frame(Bytes),
    /// Instructs the write pump to send a close frame and exit.
    Close { code: u16, reason: &'static str },
}

/// One registered socket: a user id, an owning hub, and a bounded queue.
pub struct Client {
    user_id: UserId,
    hub: Arc<dyn Hub>,
    sender: mpsc::Sender<Outbound>,
    activity: Option<ActivityCallback>,
    metrics: Arc<ServerMetrics>,
}

impl std::fmt::Debug for Client {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Client")
            .field("user_id", &self.user_id)
            .finish_non_exhaustive()
    }
}

impl Client {
    /// Create a client and hand back the receiving half of its queue.
    /// The caller keeps the receiver until it drives [`Client::serve`].
    pub fn new(
        hub: Arc<dyn Hub>,
        user_id: UserId,
        activity: Option<ActivityCallback>,
        metrics: Arc<ServerMetrics>,
        queue_capacity: usize,
    ) -> (Arc<Self>, mpsc::Receiver<Outbound>) {
        let (sender, receiver) = mpsc::channel(queue_capacity.max(1));
        let client = Arc::new(Self {
            user_id,
            hub,
            sender,
            activity,
            metrics,
        });
        (client, receiver)
    }

    pub fn user_id(&self) -> UserId {
        self.user_id
    }

    pub fn hub_name(&self) -> &'static str {
        self.hub.name()
    }

    /// Non-blocking enqueue.
    ///
    /// On a full queue the frame is dropped, the drop counter bumped, and a
    /// `messages_dropped` notice enqueued if capacity allows; a closed queue
    /// only bumps its counter.
    pub fn try_send(&self, frame: Bytes) {
        match self.sender.try_send(Outbound::Frame(frame)) {
            Ok(()) => {}
            Err(TrySendError::Full(_)) => {
                self.metrics.increment_dropped_buffer_full();
                let notice = Outbound::Frame(Bytes::from_static(DROP_NOTICE));
                if self.sender.try_send(notice).is_err() {
                    // Queue still saturated or gone: nothing left to do.
                }
            }
            Err(TrySendError::Closed(_)) => {
                self.metrics.increment_dropped_closed();
            }
        }
    }

    /// Serialize and enqueue a single-recipient event.
    pub fn try_send_json<T: serde::Serialize>(&self, value: &T) {
        match serde_json::to_vec(value) {
            Ok(bytes) => self.try_send(Bytes::from(bytes)),
            Err(err) => {
                warn!(user_id = %self.user_id, error = %err, "Failed to serialize outbound event");
            }
        }
    }

    /// Ask the write pump to close the socket. Used by hub shutdown.
    pub fn send_close(&self, code: u16, reason: &'static str) {
        let _ = self.sender.try_send(Outbound::Close { code, reason });
    }

    /// Run both pumps until either side fails, then unregister from the hub.
    pub async fn serve(
        self: Arc<Self>,
        socket: WebSocket,
        outbound: mpsc::Receiver<Outbound>,
        timing: WebSocketTiming,
    ) {
        let (sink, stream) = socket.split();

        let writer = Arc::clone(&self);
        let mut write_task = tokio::spawn(async move {
            writer.write_pump(sink, outbound, timing).await;
        });
        let reader = Arc::clone(&self);
        let mut read_task = tokio::spawn(async move {
            reader.read_pump(stream, timing).await;
        });

        tokio::select! {
            _ = &mut write_task => read_task.abort(),
            _ = &mut read_task => write_task.abort(),
        }

        self.hub.unregister_client(&self);
        self.metrics.decrement_connections();
        debug!(user_id = %self.user_id, hub = self.hub.name(), "Client disconnected");
    }

    async fn read_pump(self: Arc<Self>, mut stream: SplitStream<WebSocket>, timing: WebSocketTiming) {
        loop {
            // Every frame, including pongs, re-arms the read deadline.
            let frame = match timeout(timing.pong_wait, stream.next()).await {
                Err(_) => {
                    debug!(user_id = %self.user_id, hub = self.hub.name(), "Read deadline expired");
                    break;
                }
                Ok(None) => break,
                Ok(Some(Err(err))) => {
                    self.metrics.increment_websocket_errors();
                    warn!(
                        user_id = %self.user_id,
                        hub = self.hub.name(),
                        error = %err,
                        "WebSocket read error"
                    );
                    break;
                }
                Ok(Some(Ok(frame))) => frame,
            };

            match frame {
                Message::Text(text) => {
                    if text.len() > timing.max_message_size {
                        self.metrics.increment_websocket_errors();
                        warn!(
                            user_id = %self.user_id,
                            size = text.len(),
                            max = timing.max_message_size,
                            "Inbound frame exceeds size cap, closing"
                        );
                        break;
                    }
                    self.fire_activity();
                    self.hub.handle_inbound(&self, text.to_string()).await;
                }
                Message::Pong(_) => {
                    self.fire_activity();
                }
                Message::Ping(_) => {
                    // The transport answers pings for us.
                }
                Message::Binary(_) => {
                    warn!(user_id = %self.user_id, "Binary frame on text protocol, ignoring");
                }
                Message::Close(frame) => {
                    if let Some(frame) = &frame {
                        if frame.code != close_code::AWAY && frame.code != close_code::ABNORMAL {
                            warn!(
                                user_id = %self.user_id,
                                code = frame.code,
                                reason = %frame.reason,
                                "Unexpected close frame"
                            );
                        }
                    }
                    break;
                }
            }
        }
    }

    async fn write_pump(
        self: Arc<Self>,
        mut sink: SplitSink<WebSocket, Message>,
        mut outbound: mpsc::Receiver<Outbound>,
        timing: WebSocketTiming,
    ) {
        let mut ping = tokio::time::interval(timing.ping_period);
        ping.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        // Consume the immediate first tick so pings start one period in.
        ping.tick().await;

        loop {
            tokio::select! {
                item = outbound.recv() => {
                    match item {
                        None => {
                            // Queue closed from the hub side.
                            let _ = sink
                                .send(Message::Close(Some(CloseFrame {
                                    code: close_code::NORMAL,
                                    reason: Utf8Bytes::from_static(""),
                                })))
                                .await;
                            break;
                        }
                        Some(Outbound::Frame(bytes)) => {
                            let text = match Utf8Bytes::try_from(bytes) {
                                Ok(text) => text,
                                Err(err) => {
                                    warn!(user_id = %self.user_id, error = %err, "Dropping non-UTF-8 outbound frame");
                                    continue;
                                }
                            };
                            match timeout(timing.write_wait, sink.send(Message::Text(text))).await {
                                Ok(Ok(())) => self.metrics.increment_frames_sent(),
                                Ok(Err(err)) => {
                                    self.metrics.increment_websocket_errors();
                                    warn!(user_id = %self.user_id, error = %err, "WebSocket write error");
                                    break;
                                }
                                Err(_) => {
                                    self.metrics.increment_websocket_errors();
                                    warn!(user_id = %self.user_id, "Write deadline expired");
                                    break;
                                }
                            }
                        }
                        Some(Outbound::Close { code, reason }) => {
                            let _ = timeout(
                                timing.write_wait,
                                sink.send(Message::Close(Some(CloseFrame {
                                    code,
                                    reason: Utf8Bytes::from_static(reason),
                                }))),
                            )
                            .await;
                            break;
                        }
                    }
                }
                _ = ping.tick() => {
                    match timeout(timing.write_wait, sink.send(Message::Ping(Bytes::new()))).await {
                        Ok(Ok(())) => {}
                        _ => {
                            self.metrics.increment_websocket_errors();
                            debug!(user_id = %self.user_id, "Ping write failed, closing");
                            break;
                        }
                    }
                }
            }
        }

        let _ = sink.close().await;
    }

    fn fire_activity(&self) {
        if let Some(activity) = &self.activity {
            activity(self.user_id);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;

    struct NullHub;

    #[async_trait]
    impl Hub for NullHub {
        fn name(&self) -> &'static str {
            "null"
        }

        fn unregister_client(&self, _client: &Arc<Client>) {}

        async fn handle_inbound(&self, _client: &Arc<Client>, _text: String) {}
    }

    fn test_client(capacity: usize) -> (Arc<Client>, mpsc::Receiver<Outbound>) {
        Client::new(
            Arc::new(NullHub),
            UserId(1),
            None,
            Arc::new(ServerMetrics::new()),
            capacity,
        )
    }

    fn frame_text(item: Outbound) -> String {
        match item {
            Outbound::Frame(bytes) => String::from_utf8(bytes.to_vec()).unwrap(),
            other => panic!("expected frame, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn frames_delivered_in_order() {
        let (client, mut rx) = test_client(8);
        client.try_send(Bytes::from_static(b"first"));
        client.try_send(Bytes::from_static(b"second"));

        assert_eq!(frame_text(rx.recv().await.unwrap()), "first");
        assert_eq!(frame_text(rx.recv().await.unwrap()), "second");
    }

    #[tokio::test]
    async fn overflow_drops_frame_and_enqueues_notice() {
        let (client, mut rx) = test_client(2);
        client.try_send(Bytes::from_static(b"a"));
        client.try_send(Bytes::from_static(b"b"));
        // Queue full: "c" is dropped, but so is the notice (no capacity).
        client.try_send(Bytes::from_static(b"c"));

        assert_eq!(frame_text(rx.recv().await.unwrap()), "a");
        // Draining one slot leaves room for the next overflow's notice.
        client.try_send(Bytes::from_static(b"d"));
        let queued = frame_text(rx.recv().await.unwrap());
        assert_eq!(queued, "b");
        let notice = frame_text(rx.recv().await.unwrap());
        assert!(notice.contains("messages_dropped"), "got: {notice}");
        assert!(notice.contains("buffer_full"));
    }

    #[tokio::test]
    async fn overflow_increments_drop_counter() {
        let metrics = Arc::new(ServerMetrics::new());
        let (client, _rx) = Client::new(Arc::new(NullHub), UserId(2), None, metrics.clone(), 1);
        client.try_send(Bytes::from_static(b"a"));
        client.try_send(Bytes::from_static(b"b"));
        assert_eq!(
            metrics.snapshot().queues.dropped_buffer_full,
            1,
            "second frame overflowed"
        );
    }

    #[tokio::test]
    async fn closed_queue_counts_drops_silently() {
        let metrics = Arc::new(ServerMetrics::new());
        let (client, rx) = Client::new(Arc::new(NullHub), UserId(3), None, metrics.clone(), 4);
        drop(rx);
        client.try_send(Bytes::from_static(b"late"));
        assert_eq!(metrics.snapshot().queues.dropped_closed, 1);
    }

    #[tokio::test]
    async fn send_close_enqueues_close_item() {
        let (client, mut rx) = test_client(4);
        client.send_close(close_code::AWAY, "Server shutting down");
        match rx.recv().await.unwrap() {
            Outbound::Close { code, reason } => {
                assert_eq!(code, close_code::AWAY);
                assert_eq!(reason, "Server shutting down");
            }
            other => panic!("expected close, got {other:?}"),
        }
    }
}
