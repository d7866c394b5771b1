//! # Loopback RTC Backend
//!
//! Peer connections that never leave the process. The "SDP" is a token
//! (`loopback:offer:<uuid>` / `loopback:answer:<uuid>`) that the two sides
//! look up in a shared [`LoopbackConnector`] registry, so everything above
//! the RTC seam (relay choreography, ordering, cancellation) runs exactly as
//! it would against real WebRTC.
//!
//! Used by the integration tests and for pairing two sessions on one host.

use async_trait::async_trait;
use dashmap::DashMap;
use parking_lot::Mutex;
use std::sync::{Arc, Weak};
use tokio::sync::{mpsc, watch};
use tracing::debug;
use uuid::Uuid;

use super::error::SignalingError;
use super::rtc::{DataChannel, PeerState, RtcConnection, RtcConnector};
use crate::config::{RtcConfig, DATA_CHANNEL_LABEL};

const OFFER_PREFIX: &str = "loopback:offer:";
const ANSWER_PREFIX: &str = "loopback:answer:";

#[derive(Default)]
struct Registry {
    offers: DashMap<String, Arc<Endpoint>>,
    answers: DashMap<String, (Arc<Endpoint>, Arc<Endpoint>)>,
    live: Mutex<Vec<Weak<Endpoint>>>,
}

/// In-process connector. Clones share one registry.
#[derive(Clone, Default)]
pub struct LoopbackConnector {
    registry: Arc<Registry>,
    stall_gathering: bool,
}

impl LoopbackConnector {
    pub fn new() -> Self {
        Self::default()
    }

    /// Connections whose ICE gathering never reports completion, to
    /// exercise the gathering bound.
    pub fn with_stalled_gathering() -> Self {
        Self {
            stall_gathering: true,
            ..Self::default()
        }
    }

    /// Drive every live connection to `failed`, as a network drop would.
    pub fn sever_all(&self) {
        for endpoint in self.registry.live.lock().iter().filter_map(Weak::upgrade) {
            endpoint.set_state(PeerState::Failed);
        }
    }
}

#[async_trait]
impl RtcConnector for LoopbackConnector {
    async fn connect(&self, _config: &RtcConfig) -> Result<Arc<dyn RtcConnection>, SignalingError> {
        let endpoint = Arc::new(Endpoint::new(self.stall_gathering));
        {
            let mut live = self.registry.live.lock();
            live.retain(|weak| weak.strong_count() > 0);
            live.push(Arc::downgrade(&endpoint));
        }
        Ok(Arc::new(LoopbackConnection {
            registry: self.registry.clone(),
            endpoint,
        }))
    }
}

struct Endpoint {
    stall_gathering: bool,
    local: Mutex<Option<String>>,
    state: watch::Sender<PeerState>,
    ready_tx: mpsc::Sender<DataChannel>,
    ready_rx: tokio::sync::Mutex<mpsc::Receiver<DataChannel>>,
}

impl Endpoint {
    fn new(stall_gathering: bool) -> Self {
        let (state, _) = watch::channel(PeerState::New);
        let (ready_tx, ready_rx) = mpsc::channel(1);
        Self {
            stall_gathering,
            local: Mutex::new(None),
            state,
            ready_tx,
            ready_rx: tokio::sync::Mutex::new(ready_rx),
        }
    }

    fn set_state(&self, state: PeerState) {
        self.state.send_replace(state);
    }
}

/// One side of an in-process link.
pub struct LoopbackConnection {
    registry: Arc<Registry>,
    endpoint: Arc<Endpoint>,
}

fn token(sdp: &str, prefix: &str) -> Result<String, SignalingError> {
    sdp.strip_prefix(prefix)
        .map(str::to_string)
        .ok_or_else(|| SignalingError::Rtc(format!("not a loopback description: {sdp}")))
}

#[async_trait]
impl RtcConnection for LoopbackConnection {
    async fn create_offer(&self) -> Result<(), SignalingError> {
        let id = Uuid::new_v4().to_string();
        self.registry.offers.insert(id.clone(), self.endpoint.clone());
        *self.endpoint.local.lock() = Some(format!("{OFFER_PREFIX}{id}"));
        self.endpoint.set_state(PeerState::Connecting);
        Ok(())
    }

    async fn create_answer(&self, offer: &str) -> Result<(), SignalingError> {
        let offer_id = token(offer, OFFER_PREFIX)?;
        let (_, initiator) = self
            .registry
            .offers
            .remove(&offer_id)
            .ok_or_else(|| SignalingError::Rtc(format!("unknown offer {offer_id}")))?;
        let id = Uuid::new_v4().to_string();
        self.registry
            .answers
            .insert(id.clone(), (initiator, self.endpoint.clone()));
        *self.endpoint.local.lock() = Some(format!("{ANSWER_PREFIX}{id}"));
        self.endpoint.set_state(PeerState::Connecting);
        Ok(())
    }

    async fn accept_answer(&self, answer: &str) -> Result<(), SignalingError> {
        let answer_id = token(answer, ANSWER_PREFIX)?;
        let (_, (initiator, responder)) = self
            .registry
            .answers
            .remove(&answer_id)
            .ok_or_else(|| SignalingError::Rtc(format!("unknown answer {answer_id}")))?;
        if !Arc::ptr_eq(&initiator, &self.endpoint) {
            return Err(SignalingError::Rtc("answer belongs to another connection".into()));
        }

        let (a_tx, a_rx) = mpsc::unbounded_channel();
        let (b_tx, b_rx) = mpsc::unbounded_channel();
        let initiator_channel = DataChannel::new(DATA_CHANNEL_LABEL, a_tx, b_rx);
        let responder_channel = DataChannel::new(DATA_CHANNEL_LABEL, b_tx, a_rx);

        initiator.set_state(PeerState::Connected);
        responder.set_state(PeerState::Connected);
        let _ = initiator.ready_tx.try_send(initiator_channel);
        let _ = responder.ready_tx.try_send(responder_channel);
        debug!("loopback link established");
        Ok(())
    }

    async fn gathering_complete(&self) {
        if self.endpoint.stall_gathering {
            std::future::pending::<()>().await;
        }
    }

    async fn local_description(&self) -> Option<String> {
        self.endpoint.local.lock().clone()
    }

    async fn data_channel(&self) -> Result<DataChannel, SignalingError> {
        let mut state = self.endpoint.state.subscribe();
        let mut ready = self.endpoint.ready_rx.lock().await;
        if let Ok(channel) = ready.try_recv() {
            return Ok(channel);
        }
        let current = *state.borrow_and_update();
        if current == PeerState::Closed {
            return Err(SignalingError::Rtc("connection closed".into()));
        }
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
        self.endpoint.state.subscribe()
    }

    async fn close(&self) {
        self.endpoint.set_state(PeerState::Closed);
        if let Some(local) = self.endpoint.local.lock().as_deref() {
            if let Some(id) = local.strip_prefix(OFFER_PREFIX) {
                self.registry.offers.remove(id);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::signaling::rtc::wait_ice_gathering;
    use std::time::Duration;

    async fn linked_pair(
        connector: &LoopbackConnector,
    ) -> (Arc<dyn RtcConnection>, Arc<dyn RtcConnection>) {
        let config = RtcConfig::default();
        let initiator = connector.connect(&config).await.unwrap();
        let responder = connector.connect(&config).await.unwrap();
        initiator.create_offer().await.unwrap();
        let offer = wait_ice_gathering(initiator.as_ref(), Duration::from_millis(50))
            .await
            .unwrap();
        responder.create_answer(&offer).await.unwrap();
        let answer = wait_ice_gathering(responder.as_ref(), Duration::from_millis(50))
            .await
            .unwrap();
        initiator.accept_answer(&answer).await.unwrap();
        (initiator, responder)
    }

    #[tokio::test]
    async fn offer_answer_opens_channels() {
        let connector = LoopbackConnector::new();
        let (initiator, responder) = linked_pair(&connector).await;
        let mut a = initiator.data_channel().await.unwrap();
        let mut b = responder.data_channel().await.unwrap();
        a.send("ping").unwrap();
        assert_eq!(b.recv().await.as_deref(), Some("ping"));
        b.send("pong").unwrap();
        assert_eq!(a.recv().await.as_deref(), Some("pong"));

        drop(a);
        assert_eq!(b.recv().await, None);
    }

    #[tokio::test]
    async fn stalled_gathering_is_bounded() {
        let connector = LoopbackConnector::with_stalled_gathering();
        let conn = connector.connect(&RtcConfig::default()).await.unwrap();
        conn.create_offer().await.unwrap();
        let started = tokio::time::Instant::now();
        let sdp = wait_ice_gathering(conn.as_ref(), Duration::from_millis(100))
            .await
            .unwrap();
        assert!(sdp.starts_with(OFFER_PREFIX));
        assert!(started.elapsed() >= Duration::from_millis(100));
    }

    #[tokio::test]
    async fn severed_link_reports_failed() {
        let connector = LoopbackConnector::new();
        let (initiator, _responder) = linked_pair(&connector).await;
        let mut state = initiator.state();
        connector.sever_all();
        state.changed().await.unwrap();
        assert_eq!(*state.borrow(), PeerState::Failed);
    }

    #[tokio::test]
    async fn unknown_descriptions_rejected() {
        let connector = LoopbackConnector::new();
        let conn = connector.connect(&RtcConfig::default()).await.unwrap();
        assert!(conn.create_answer("v=0").await.is_err());
        assert!(conn.create_answer("loopback:offer:missing").await.is_err());
        assert!(conn.accept_answer("loopback:answer:missing").await.is_err());
    }

    #[tokio::test]
    async fn closed_connection_never_opens() {
        let connector = LoopbackConnector::new();
        let conn = connector.connect(&RtcConfig::default()).await.unwrap();
        conn.create_offer().await.unwrap();
        let waiter = {
            let conn = conn.clone();
            tokio::spawn(async move { conn.data_channel().await })
        };
        tokio::task::yield_now().await;
        conn.close().await;
        assert!(waiter.await.unwrap().is_err());
    }
}
