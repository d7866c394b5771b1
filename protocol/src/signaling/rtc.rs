//! # RTC Seam
//!
//! Peer links are built through three small abstractions so that the
//! signaling choreography in [`socket`](super::socket) and
//! [`server`](super::server) never touches a particular WebRTC stack:
//!
//! ```text
//! RtcConnector  --connect()-->  RtcConnection  --data_channel()-->  DataChannel
//! ```
//!
//! Two backends ship: [`WebRtcConnector`](super::webrtc::WebRtcConnector)
//! (real ICE/DTLS/SCTP through the `webrtc` crate) and
//! [`LoopbackConnector`](super::loopback::LoopbackConnector) (in-process,
//! SDP is just a lookup token).

use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tracing::debug;

use super::error::SignalingError;
use crate::config::RtcConfig;

/// Peer connection state, mirroring `RTCPeerConnectionState`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PeerState {
    New,
    Connecting,
    Connected,
    Disconnected,
    Failed,
    Closed,
}

impl PeerState {
    /// `failed` and `disconnected` end a link.
    pub fn is_lost(self) -> bool {
        matches!(self, Self::Failed | Self::Disconnected)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::New => "new",
            Self::Connecting => "connecting",
            Self::Connected => "connected",
            Self::Disconnected => "disconnected",
            Self::Failed => "failed",
            Self::Closed => "closed",
        }
    }
}

/// An open, text-only data channel.
///
/// Outgoing messages are queued to the backend; incoming ones arrive in
/// order. `recv` returning `None` means the channel closed.
#[derive(Debug)]
pub struct DataChannel {
    label: String,
    outgoing: mpsc::UnboundedSender<String>,
    incoming: mpsc::UnboundedReceiver<String>,
}

impl DataChannel {
    pub fn new(
        label: impl Into<String>,
        outgoing: mpsc::UnboundedSender<String>,
        incoming: mpsc::UnboundedReceiver<String>,
    ) -> Self {
        Self {
            label: label.into(),
            outgoing,
            incoming,
        }
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    /// A handle for sending without borrowing the channel.
    pub fn sender(&self) -> mpsc::UnboundedSender<String> {
        self.outgoing.clone()
    }

    pub fn send(&self, data: &str) -> Result<(), SignalingError> {
        self.outgoing
            .send(data.to_string())
            .map_err(|_| SignalingError::Rtc("data channel closed".into()))
    }

    pub async fn recv(&mut self) -> Option<String> {
        self.incoming.recv().await
    }
}

/// Creates peer connections.
#[async_trait]
pub trait RtcConnector: Send + Sync {
    async fn connect(&self, config: &RtcConfig) -> Result<Arc<dyn RtcConnection>, SignalingError>;
}

/// One peer connection carrying exactly one data channel.
#[async_trait]
pub trait RtcConnection: Send + Sync {
    /// Initiator: create the data channel, create an offer, and set it as
    /// the local description. Gathering starts here.
    async fn create_offer(&self) -> Result<(), SignalingError>;

    /// Responder: apply `offer` as the remote description, then create an
    /// answer and set it as the local description.
    async fn create_answer(&self, offer: &str) -> Result<(), SignalingError>;

    /// Initiator: apply the responder's answer.
    async fn accept_answer(&self, answer: &str) -> Result<(), SignalingError>;

    /// Resolves once ICE gathering completes. May never resolve.
    async fn gathering_complete(&self);

    /// The current local SDP, with whatever candidates are gathered so far.
    async fn local_description(&self) -> Option<String>;

    /// Resolves when the data channel opens. Callable once.
    async fn data_channel(&self) -> Result<DataChannel, SignalingError>;

    /// Connection state updates.
    fn state(&self) -> watch::Receiver<PeerState>;

    /// Tear down the connection and its channel.
    async fn close(&self);
}

/// Wait for ICE gathering to complete or `timeout` to pass, whichever comes
/// first, then return the local description as it stands.
pub async fn wait_ice_gathering(
    connection: &dyn RtcConnection,
    timeout: Duration,
) -> Result<String, SignalingError> {
    if tokio::time::timeout(timeout, connection.gathering_complete())
        .await
        .is_err()
    {
        debug!(timeout_ms = timeout.as_millis() as u64, "ICE gathering incomplete, using partial description");
    }
    connection
        .local_description()
        .await
        .ok_or_else(|| SignalingError::Rtc("no local description".into()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lost_states() {
        assert!(PeerState::Failed.is_lost());
        assert!(PeerState::Disconnected.is_lost());
        assert!(!PeerState::Closed.is_lost());
        assert!(!PeerState::Connected.is_lost());
    }

    #[tokio::test]
    async fn data_channel_send_after_close_fails() {
        let (out_tx, out_rx) = mpsc::unbounded_channel();
        let (_in_tx, in_rx) = mpsc::unbounded_channel();
        let channel = DataChannel::new("dataChannel", out_tx, in_rx);
        assert!(channel.send("a").is_ok());
        drop(out_rx);
        assert!(matches!(channel.send("b"), Err(SignalingError::Rtc(_))));
    }
}
