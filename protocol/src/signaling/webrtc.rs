//! # WebRTC Backend
//!
//! Real peer connections through the `webrtc` crate: ICE with the configured
//! STUN/TURN servers, DTLS, SCTP, and one text data channel labelled
//! `dataChannel`. Interoperates with browser `RTCPeerConnection`s because
//! the SDP is the real thing.
//!
//! The crate is callback-driven; this module turns those callbacks into the
//! channel- and `watch`-based shape of the RTC seam.

use async_trait::async_trait;
use parking_lot::Mutex;
use std::sync::{Arc, Weak};
use tokio::sync::{mpsc, watch};
use tracing::{debug, warn};
use webrtc::api::APIBuilder;
use webrtc::data_channel::data_channel_message::DataChannelMessage;
use webrtc::data_channel::RTCDataChannel;
use webrtc::ice_transport::ice_server::RTCIceServer;
use webrtc::peer_connection::configuration::RTCConfiguration;
use webrtc::peer_connection::peer_connection_state::RTCPeerConnectionState;
use webrtc::peer_connection::sdp::session_description::RTCSessionDescription;
use webrtc::peer_connection::RTCPeerConnection;

use super::error::SignalingError;
use super::rtc::{DataChannel, PeerState, RtcConnection, RtcConnector};
use crate::config::{RtcConfig, DATA_CHANNEL_LABEL};

fn rtc_err(e: webrtc::Error) -> SignalingError {
    SignalingError::Rtc(e.to_string())
}

/// Builds `webrtc` peer connections from an [`RtcConfig`].
#[derive(Debug, Clone, Default)]
pub struct WebRtcConnector;

impl WebRtcConnector {
    pub fn new() -> Self {
        Self
    }
}

fn to_rtc_configuration(config: &RtcConfig) -> RTCConfiguration {
    RTCConfiguration {
        ice_servers: config
            .ice_servers
            .iter()
            .map(|server| RTCIceServer {
                urls: server.urls.clone(),
                username: server.username.clone().unwrap_or_default(),
                credential: server.credential.clone().unwrap_or_default(),
                ..Default::default()
            })
            .collect(),
        ..Default::default()
    }
}

#[async_trait]
impl RtcConnector for WebRtcConnector {
    async fn connect(&self, config: &RtcConfig) -> Result<Arc<dyn RtcConnection>, SignalingError> {
        let api = APIBuilder::new().build();
        let peer = Arc::new(
            api.new_peer_connection(to_rtc_configuration(config))
                .await
                .map_err(rtc_err)?,
        );

        let (state_tx, _) = watch::channel(PeerState::New);
        let state_tx = Arc::new(state_tx);
        {
            let state_tx = state_tx.clone();
            peer.on_peer_connection_state_change(Box::new(move |s: RTCPeerConnectionState| {
                let mapped = match s {
                    RTCPeerConnectionState::Connecting => PeerState::Connecting,
                    RTCPeerConnectionState::Connected => PeerState::Connected,
                    RTCPeerConnectionState::Disconnected => PeerState::Disconnected,
                    RTCPeerConnectionState::Failed => PeerState::Failed,
                    RTCPeerConnectionState::Closed => PeerState::Closed,
                    _ => PeerState::New,
                };
                debug!(state = mapped.as_str(), "peer connection state changed");
                state_tx.send_replace(mapped);
                Box::pin(async {})
            }));
        }

        let (ready_tx, ready_rx) = mpsc::channel(1);
        {
            // Responder side: the initiator's channel arrives here.
            let ready_tx = ready_tx.clone();
            peer.on_data_channel(Box::new(move |channel: Arc<RTCDataChannel>| {
                bridge(channel, ready_tx.clone());
                Box::pin(async {})
            }));
        }

        Ok(Arc::new(WebRtcConnection {
            peer,
            state_tx,
            ready_tx,
            ready_rx: tokio::sync::Mutex::new(ready_rx),
            gathered: tokio::sync::Mutex::new(None),
        }))
    }
}

/// Hook a `webrtc` data channel up to a [`DataChannel`] and hand it over
/// once it opens.
fn bridge(channel: Arc<RTCDataChannel>, ready: mpsc::Sender<DataChannel>) {
    let label = channel.label().to_string();
    let (in_tx, in_rx) = mpsc::unbounded_channel::<String>();
    let (out_tx, out_rx) = mpsc::unbounded_channel::<String>();
    let in_tx = Arc::new(Mutex::new(Some(in_tx)));
    let pending = Arc::new(Mutex::new(Some((DataChannel::new(label, out_tx, in_rx), out_rx))));

    {
        let in_tx = in_tx.clone();
        channel.on_message(Box::new(move |message: DataChannelMessage| {
            match String::from_utf8(message.data.to_vec()) {
                Ok(text) => {
                    if let Some(tx) = in_tx.lock().as_ref() {
                        let _ = tx.send(text);
                    }
                }
                Err(_) => warn!("dropping non-UTF-8 data channel message"),
            }
            Box::pin(async {})
        }));
    }

    {
        let in_tx = in_tx.clone();
        channel.on_close(Box::new(move || {
            in_tx.lock().take();
            Box::pin(async {})
        }));
    }

    let weak: Weak<RTCDataChannel> = Arc::downgrade(&channel);
    channel.on_open(Box::new(move || {
        let taken = pending.lock().take();
        let weak = weak.clone();
        let ready = ready.clone();
        Box::pin(async move {
            let Some((data_channel, mut out_rx)) = taken else {
                return;
            };
            tokio::spawn(async move {
                while let Some(text) = out_rx.recv().await {
                    let Some(channel) = weak.upgrade() else { break };
                    if let Err(e) = channel.send_text(text).await {
                        warn!(error = %e, "data channel send failed");
                        break;
                    }
                }
            });
            let _ = ready.send(data_channel).await;
        })
    }));
}

/// A `webrtc` peer connection.
pub struct WebRtcConnection {
    peer: Arc<RTCPeerConnection>,
    state_tx: Arc<watch::Sender<PeerState>>,
    ready_tx: mpsc::Sender<DataChannel>,
    ready_rx: tokio::sync::Mutex<mpsc::Receiver<DataChannel>>,
    gathered: tokio::sync::Mutex<Option<mpsc::Receiver<()>>>,
}

impl WebRtcConnection {
    async fn set_local(&self, description: RTCSessionDescription) -> Result<(), SignalingError> {
        // The promise has to exist before gathering starts or it can miss
        // the completion.
        let gathered = self.peer.gathering_complete_promise().await;
        self.peer
            .set_local_description(description)
            .await
            .map_err(rtc_err)?;
        *self.gathered.lock().await = Some(gathered);
        Ok(())
    }
}

#[async_trait]
impl RtcConnection for WebRtcConnection {
    async fn create_offer(&self) -> Result<(), SignalingError> {
        let channel = self
            .peer
            .create_data_channel(DATA_CHANNEL_LABEL, None)
            .await
            .map_err(rtc_err)?;
        bridge(channel, self.ready_tx.clone());
        let offer = self.peer.create_offer(None).await.map_err(rtc_err)?;
        self.set_local(offer).await
    }

    async fn create_answer(&self, offer: &str) -> Result<(), SignalingError> {
        let remote = RTCSessionDescription::offer(offer.to_string()).map_err(rtc_err)?;
        self.peer
            .set_remote_description(remote)
            .await
            .map_err(rtc_err)?;
        let answer = self.peer.create_answer(None).await.map_err(rtc_err)?;
        self.set_local(answer).await
    }

    async fn accept_answer(&self, answer: &str) -> Result<(), SignalingError> {
        let remote = RTCSessionDescription::answer(answer.to_string()).map_err(rtc_err)?;
        self.peer
            .set_remote_description(remote)
            .await
            .map_err(rtc_err)
    }

    async fn gathering_complete(&self) {
        let mut gathered = self.gathered.lock().await;
        match gathered.as_mut() {
            Some(rx) => {
                let _ = rx.recv().await;
            }
            None => std::future::pending::<()>().await,
        }
    }

    async fn local_description(&self) -> Option<String> {
        self.peer.local_description().await.map(|d| d.sdp)
    }

    async fn data_channel(&self) -> Result<DataChannel, SignalingError> {
        let mut state = self.state_tx.subscribe();
        let mut ready = self.ready_rx.lock().await;
        loop {
            tokio::select! {
                channel = ready.recv() => {
                    return channel.ok_or_else(|| SignalingError::Rtc("connection dropped".into()));
                }
                changed = state.changed() => {
                    let current = *state.borrow();
                    if changed.is_err() || current == PeerState::Closed {
                        return Err(SignalingError::Rtc("connection closed".into()));
                    }
                    if current.is_lost() {
                        return Err(SignalingError::ConnectionLost(current.as_str().into()));
                    }
                }
            }
        }
    }

    fn state(&self) -> watch::Receiver<PeerState> {
        self.state_tx.subscribe()
    }

    async fn close(&self) {
        if let Err(e) = self.peer.close().await {
            warn!(error = %e, "error closing peer connection");
        }
        self.state_tx.send_replace(PeerState::Closed);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{IceServer, TurnServerSetting};

    #[test]
    fn ice_servers_carry_credentials() {
        let config = RtcConfig::with_turn(&TurnServerSetting::Turn {
            url: "turn:turn.example.org:3478".into(),
            username: "free".into(),
            password: "secret".into(),
        });
        let rtc = to_rtc_configuration(&config);
        assert_eq!(rtc.ice_servers.len(), config.ice_servers.len());
        let turn = rtc.ice_servers.last().unwrap();
        assert_eq!(turn.username, "free");
        assert_eq!(turn.credential, "secret");

        let stun = to_rtc_configuration(&RtcConfig {
            ice_servers: vec![IceServer::stun("stun:a")],
        });
        assert!(stun.ice_servers[0].username.is_empty());
    }

    #[tokio::test]
    async fn offer_contains_data_channel() {
        let connector = WebRtcConnector::new();
        let config = RtcConfig { ice_servers: vec![] };
        let conn = connector.connect(&config).await.unwrap();
        conn.create_offer().await.unwrap();
        let sdp = crate::signaling::rtc::wait_ice_gathering(
            conn.as_ref(),
            std::time::Duration::from_millis(500),
        )
        .await
        .unwrap();
        assert!(sdp.contains("m=application"));
        conn.close().await;
    }
}
