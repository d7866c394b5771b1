//! # Relay Client
//!
//! One WebSocket to the signaling relay, speaking [`RelayMessage`] frames.
//! Each party in a rendezvous opens exactly one of these, uses it for the
//! offer/answer exchange, and closes it. The relay never carries anything
//! after that.

use futures::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace};

use super::error::SignalingError;
use super::message::RelayMessage;

type Socket = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// An open relay connection.
pub struct RelayClient {
    socket: Socket,
    endpoint: String,
}

impl RelayClient {
    /// Open a relay connection.
    pub async fn connect(endpoint: &str) -> Result<Self, SignalingError> {
        let (socket, _) = connect_async(endpoint)
            .await
            .map_err(|e| SignalingError::SignalingUnavailable(e.to_string()))?;
        debug!(endpoint, "relay connected");
        Ok(Self {
            socket,
            endpoint: endpoint.to_string(),
        })
    }

    /// [`connect`](Self::connect), abandoned the moment `cancel` fires.
    /// Dropping the half-open socket closes it immediately.
    pub async fn connect_cancellable(
        endpoint: &str,
        cancel: &CancellationToken,
    ) -> Result<Self, SignalingError> {
        tokio::select! {
            result = Self::connect(endpoint) => result,
            _ = cancel.cancelled() => Err(SignalingError::Aborted),
        }
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    pub async fn send(&mut self, message: &RelayMessage) -> Result<(), SignalingError> {
        trace!(frame = %message.to_json(), "relay send");
        self.socket
            .send(Message::Text(message.to_json()))
            .await
            .map_err(|e| SignalingError::SignalingUnavailable(e.to_string()))
    }

    pub async fn create_topic(&mut self, name: &str) -> Result<(), SignalingError> {
        self.send(&RelayMessage::create_topic(name)).await
    }

    pub async fn consume(&mut self, topic: &str) -> Result<(), SignalingError> {
        self.send(&RelayMessage::consume(topic)).await
    }

    pub async fn unsubscribe_all(&mut self) -> Result<(), SignalingError> {
        self.send(&RelayMessage::unsubscribe_all()).await
    }

    pub async fn produce(&mut self, topic: &str, message: &str) -> Result<(), SignalingError> {
        self.send(&RelayMessage::produce(topic, message)).await
    }

    /// Next frame from the relay. `None` once the socket is closed.
    ///
    /// Control frames are handled here; frames that don't parse come back
    /// as `Err(Protocol)` and the socket stays usable.
    pub async fn next(&mut self) -> Option<Result<RelayMessage, SignalingError>> {
        loop {
            match self.socket.next().await? {
                Ok(Message::Text(text)) => return Some(RelayMessage::parse(&text)),
                Ok(Message::Close(_)) => return None,
                Ok(_) => continue,
                Err(e) => return Some(Err(SignalingError::SignalingUnavailable(e.to_string()))),
            }
        }
    }

    /// Close gracefully with a close frame.
    pub async fn close(mut self) {
        if let Err(e) = self.socket.close(None).await {
            debug!(error = %e, "relay close handshake failed");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn unreachable_relay_is_unavailable() {
        // Port 9 (discard) on localhost is about as reliably closed as it gets.
        let result = RelayClient::connect("ws://127.0.0.1:9/signal").await;
        assert!(matches!(result, Err(SignalingError::SignalingUnavailable(_))));
    }

    #[tokio::test]
    async fn cancelled_connect_aborts() {
        let cancel = CancellationToken::new();
        cancel.cancel();
        let result = RelayClient::connect_cancellable("ws://10.255.255.1:80/signal", &cancel).await;
        assert!(matches!(result, Err(SignalingError::Aborted)));
    }
}
