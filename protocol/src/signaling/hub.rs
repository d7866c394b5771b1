//! # Relay Hub
//!
//! The server half of the signaling relay: an in-memory registry of named
//! mailboxes ("topics") that WebSocket clients create, subscribe to, and
//! drop messages into.
//!
//! ## Delivery rules
//!
//! - `createTopic` registers a mailbox owned by the calling connection.
//!   Creating one that already exists is a no-op.
//! - `consume` subscribes. Anything queued in the mailbox is flushed to the
//!   new subscriber in order.
//! - `produce` hands the message to exactly **one** subscriber, the oldest
//!   one still connected. With no subscriber it's queued, FIFO.
//! - Producing to or consuming from a topic nobody created answers
//!   `{"type":"error","data":"Topic not found"}`.
//! - A bare `consume` drops every subscription the connection holds.
//! - When a connection goes away, so do the topics it owns. Anyone still
//!   subscribed to one of them gets `{"type":"error","data":"Topic closed"}`.
//!
//! Single-consumer delivery is what makes a rendezvous topic first come,
//! first served: two responders bound to the same channel code can't both
//! receive one offer.
//!
//! ## HTTP surface
//!
//! | Method | Path      | Description                |
//! |--------|-----------|----------------------------|
//! | GET    | `/signal` | WebSocket relay            |
//! | GET    | `/health` | Liveness probe + stats     |

use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        State,
    },
    response::IntoResponse,
    routing::get,
    Json, Router,
};
use dashmap::DashMap;
use futures::{SinkExt, StreamExt};
use parking_lot::Mutex;
use serde::Serialize;
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::{debug, info, warn};

use super::message::RelayMessage;
use crate::config::{FINGERPRINT_VERSION, SIGNING_ALGORITHM, TOPIC_CLOSED, TOPIC_NOT_FOUND};

/// Identifies one relay connection.
pub type ConnectionId = u64;

#[derive(Debug)]
struct Topic {
    owner: ConnectionId,
    consumers: VecDeque<ConnectionId>,
    backlog: VecDeque<String>,
}

/// Point-in-time relay counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct HubStats {
    pub connections: u64,
    pub topics: u64,
    pub messages_relayed: u64,
    pub errors: u64,
}

/// The topic registry shared by every relay connection.
#[derive(Debug, Default)]
pub struct RelayHub {
    connections: DashMap<ConnectionId, mpsc::UnboundedSender<RelayMessage>>,
    topics: Mutex<HashMap<String, Topic>>,
    next_id: AtomicU64,
    relayed: AtomicU64,
    errors: AtomicU64,
}

impl RelayHub {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a connection. Frames for it arrive on the returned receiver.
    pub fn register(&self) -> (ConnectionId, mpsc::UnboundedReceiver<RelayMessage>) {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed) + 1;
        let (tx, rx) = mpsc::unbounded_channel();
        self.connections.insert(id, tx);
        debug!(connection = id, "relay connection registered");
        (id, rx)
    }

    /// Forget a connection, its subscriptions, and every topic it owns.
    /// Subscribers left on a dropped topic are told it closed.
    pub fn disconnect(&self, connection: ConnectionId) {
        self.connections.remove(&connection);
        let mut orphaned = Vec::new();
        self.topics.lock().retain(|name, topic| {
            topic.consumers.retain(|c| *c != connection);
            if topic.owner == connection {
                debug!(topic = %name, "topic dropped with its owner");
                orphaned.extend(topic.consumers.drain(..));
                return false;
            }
            true
        });
        for consumer in orphaned {
            if let Some(tx) = self.connections.get(&consumer) {
                let _ = tx.send(RelayMessage::error(TOPIC_CLOSED));
            }
        }
        debug!(connection, "relay connection closed");
    }

    /// Apply one client frame.
    pub fn handle(&self, connection: ConnectionId, message: RelayMessage) {
        match message {
            RelayMessage::CreateTopic { name } => {
                let mut topics = self.topics.lock();
                topics.entry(name.clone()).or_insert_with(|| {
                    debug!(topic = %name, connection, "topic created");
                    Topic {
                        owner: connection,
                        consumers: VecDeque::new(),
                        backlog: VecDeque::new(),
                    }
                });
            }
            RelayMessage::Consume { topic: Some(name) } => self.consume(connection, &name),
            RelayMessage::Consume { topic: None } => {
                for topic in self.topics.lock().values_mut() {
                    topic.consumers.retain(|c| *c != connection);
                }
            }
            RelayMessage::Produce { topic, message } => self.produce(connection, &topic, message),
            RelayMessage::Message { .. } | RelayMessage::Error { .. } => {
                warn!(connection, "client sent a relay-only frame, ignoring");
            }
        }
    }

    fn consume(&self, connection: ConnectionId, name: &str) {
        let mut topics = self.topics.lock();
        let Some(topic) = topics.get_mut(name) else {
            self.reject(connection, name);
            return;
        };
        if !topic.consumers.contains(&connection) {
            topic.consumers.push_back(connection);
        }
        while let Some(data) = topic.backlog.pop_front() {
            if !self.deliver(connection, data.clone()) {
                topic.backlog.push_front(data);
                break;
            }
        }
    }

    fn produce(&self, connection: ConnectionId, name: &str, data: String) {
        let mut topics = self.topics.lock();
        let Some(topic) = topics.get_mut(name) else {
            self.reject(connection, name);
            return;
        };
        while let Some(&consumer) = topic.consumers.front() {
            if self.deliver(consumer, data.clone()) {
                return;
            }
            topic.consumers.pop_front();
        }
        topic.backlog.push_back(data);
    }

    fn deliver(&self, connection: ConnectionId, data: String) -> bool {
        let Some(tx) = self.connections.get(&connection) else {
            return false;
        };
        if tx.send(RelayMessage::Message { data }).is_err() {
            return false;
        }
        self.relayed.fetch_add(1, Ordering::Relaxed);
        true
    }

    fn reject(&self, connection: ConnectionId, topic: &str) {
        debug!(connection, topic, "unknown topic");
        self.errors.fetch_add(1, Ordering::Relaxed);
        if let Some(tx) = self.connections.get(&connection) {
            let _ = tx.send(RelayMessage::error(TOPIC_NOT_FOUND));
        }
    }

    pub fn stats(&self) -> HubStats {
        HubStats {
            connections: self.connections.len() as u64,
            topics: self.topics.lock().len() as u64,
            messages_relayed: self.relayed.load(Ordering::Relaxed),
            errors: self.errors.load(Ordering::Relaxed),
        }
    }
}

// ---------------------------------------------------------------------------
// HTTP / WebSocket surface
// ---------------------------------------------------------------------------

/// The relay's axum router: `/signal` and `/health`.
pub fn relay_router(hub: Arc<RelayHub>) -> Router {
    let cors = CorsLayer::new().allow_origin(Any).allow_headers(Any);

    Router::new()
        .route("/signal", get(signal_handler))
        .route("/health", get(health_handler))
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(hub)
}

#[derive(Debug, Serialize)]
struct HealthResponse {
    status: &'static str,
    /// Which signatures and fingerprints the peers on this relay exchange.
    signing_algorithm: &'static str,
    fingerprint_version: u8,
    #[serde(flatten)]
    stats: HubStats,
}

async fn health_handler(State(hub): State<Arc<RelayHub>>) -> impl IntoResponse {
    Json(HealthResponse {
        status: "ok",
        signing_algorithm: SIGNING_ALGORITHM,
        fingerprint_version: FINGERPRINT_VERSION,
        stats: hub.stats(),
    })
}

async fn signal_handler(ws: WebSocketUpgrade, State(hub): State<Arc<RelayHub>>) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_relay_connection(socket, hub))
}

/// Drives one relay WebSocket until either side hangs up.
async fn handle_relay_connection(socket: WebSocket, hub: Arc<RelayHub>) {
    let (id, mut outbox) = hub.register();
    let (mut sink, mut stream) = socket.split();

    let writer = tokio::spawn(async move {
        while let Some(message) = outbox.recv().await {
            if sink.send(Message::Text(message.to_json())).await.is_err() {
                break;
            }
        }
        let _ = sink.close().await;
    });

    while let Some(frame) = stream.next().await {
        match frame {
            Ok(Message::Text(text)) => match RelayMessage::parse(&text) {
                Ok(message) => hub.handle(id, message),
                Err(e) => {
                    warn!(connection = id, error = %e, "unparseable relay frame");
                    if let Some(tx) = hub.connections.get(&id) {
                        let _ = tx.send(RelayMessage::error("Invalid message"));
                    }
                }
            },
            Ok(Message::Close(_)) | Err(_) => break,
            Ok(_) => {}
        }
    }

    hub.disconnect(id);
    writer.abort();
    info!(connection = id, "relay client disconnected");
}

#[cfg(test)]
mod tests {
    use super::*;

    fn frames(rx: &mut mpsc::UnboundedReceiver<RelayMessage>) -> Vec<RelayMessage> {
        let mut out = Vec::new();
        while let Ok(m) = rx.try_recv() {
            out.push(m);
        }
        out
    }

    fn message(data: &str) -> RelayMessage {
        RelayMessage::Message { data: data.into() }
    }

    #[test]
    fn unknown_topic_is_rejected() {
        let hub = RelayHub::new();
        let (a, mut rx) = hub.register();
        hub.handle(a, RelayMessage::produce("nowhere", "hi"));
        hub.handle(a, RelayMessage::consume("nowhere"));
        assert_eq!(
            frames(&mut rx),
            vec![RelayMessage::error(TOPIC_NOT_FOUND), RelayMessage::error(TOPIC_NOT_FOUND)]
        );
        assert_eq!(hub.stats().errors, 2);
    }

    #[test]
    fn produce_reaches_single_oldest_consumer() {
        let hub = RelayHub::new();
        let (a, mut rx_a) = hub.register();
        let (b, mut rx_b) = hub.register();
        let (p, _rx_p) = hub.register();
        hub.handle(a, RelayMessage::create_topic("room"));
        hub.handle(a, RelayMessage::consume("room"));
        hub.handle(b, RelayMessage::create_topic("room"));
        hub.handle(b, RelayMessage::consume("room"));

        hub.handle(p, RelayMessage::produce("room", "offer"));
        assert_eq!(frames(&mut rx_a), vec![message("offer")]);
        assert!(frames(&mut rx_b).is_empty());
    }

    #[test]
    fn messages_queue_until_subscribed() {
        let hub = RelayHub::new();
        let (owner, mut rx) = hub.register();
        let (p, _) = hub.register();
        hub.handle(owner, RelayMessage::create_topic("t"));
        hub.handle(p, RelayMessage::produce("t", "1"));
        hub.handle(p, RelayMessage::produce("t", "2"));
        assert!(frames(&mut rx).is_empty());

        hub.handle(owner, RelayMessage::consume("t"));
        assert_eq!(frames(&mut rx), vec![message("1"), message("2")]);
        hub.handle(p, RelayMessage::produce("t", "3"));
        assert_eq!(frames(&mut rx), vec![message("3")]);
    }

    #[test]
    fn dead_consumer_is_skipped() {
        let hub = RelayHub::new();
        let (a, rx_a) = hub.register();
        let (b, mut rx_b) = hub.register();
        hub.handle(b, RelayMessage::create_topic("t"));
        hub.handle(a, RelayMessage::consume("t"));
        hub.handle(b, RelayMessage::consume("t"));
        drop(rx_a);

        hub.handle(b, RelayMessage::produce("t", "x"));
        assert_eq!(frames(&mut rx_b), vec![message("x")]);
    }

    #[test]
    fn bare_consume_unsubscribes_everything() {
        let hub = RelayHub::new();
        let (a, mut rx) = hub.register();
        hub.handle(a, RelayMessage::create_topic("t"));
        hub.handle(a, RelayMessage::consume("t"));
        hub.handle(a, RelayMessage::unsubscribe_all());
        hub.handle(a, RelayMessage::produce("t", "queued"));
        assert!(frames(&mut rx).is_empty());
    }

    #[test]
    fn owner_disconnect_removes_topic() {
        let hub = RelayHub::new();
        let (owner, _rx) = hub.register();
        let (other, mut rx_other) = hub.register();
        hub.handle(owner, RelayMessage::create_topic("t"));
        assert_eq!(hub.stats().topics, 1);

        hub.disconnect(owner);
        assert_eq!(
            hub.stats(),
            HubStats {
                connections: 1,
                topics: 0,
                messages_relayed: 0,
                errors: 0
            }
        );
        hub.handle(other, RelayMessage::produce("t", "late"));
        assert_eq!(frames(&mut rx_other), vec![RelayMessage::error(TOPIC_NOT_FOUND)]);
    }

    #[test]
    fn owner_disconnect_tells_remaining_consumers() {
        let hub = RelayHub::new();
        let (owner, mut rx_owner) = hub.register();
        let (second, mut rx_second) = hub.register();
        hub.handle(owner, RelayMessage::create_topic("t"));
        hub.handle(owner, RelayMessage::consume("t"));
        hub.handle(second, RelayMessage::create_topic("t"));
        hub.handle(second, RelayMessage::consume("t"));

        hub.disconnect(owner);
        assert!(frames(&mut rx_owner).is_empty());
        assert_eq!(frames(&mut rx_second), vec![RelayMessage::error(TOPIC_CLOSED)]);
        assert_eq!(hub.stats().errors, 0);

        // Only once: the topic is gone now.
        hub.disconnect(second);
        assert_eq!(hub.stats().topics, 0);
    }

    #[test]
    fn consumer_disconnect_keeps_topic() {
        let hub = RelayHub::new();
        let (owner, mut rx_owner) = hub.register();
        let (consumer, _rx) = hub.register();
        hub.handle(owner, RelayMessage::create_topic("t"));
        hub.handle(consumer, RelayMessage::consume("t"));
        hub.disconnect(consumer);

        hub.handle(owner, RelayMessage::produce("t", "kept"));
        hub.handle(owner, RelayMessage::consume("t"));
        assert_eq!(frames(&mut rx_owner), vec![message("kept")]);
    }

    #[tokio::test]
    async fn health_reports_stats() {
        use axum::body::Body;
        use axum::http::{Request, StatusCode};
        use http_body_util::BodyExt;
        use tower::ServiceExt;

        let hub = Arc::new(RelayHub::new());
        let (id, _rx) = hub.register();
        hub.handle(id, RelayMessage::create_topic("t"));

        let response = relay_router(hub)
            .oneshot(Request::builder().uri("/health").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let body = response.into_body().collect().await.unwrap().to_bytes();
        let json: serde_json::Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(json["status"], "ok");
        assert_eq!(json["signing_algorithm"], SIGNING_ALGORITHM);
        assert_eq!(json["fingerprint_version"], FINGERPRINT_VERSION);
        assert_eq!(json["connections"], 1);
        assert_eq!(json["topics"], 1);
    }
}
