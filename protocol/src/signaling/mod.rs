//! # Signaling
//!
//! How two devices that can't address each other end up with a direct
//! WebRTC data channel. A dumb WebSocket relay ([`hub`]) passes exactly two
//! messages between them, an offer and an answer, and then both sides hang
//! up on it.
//!
//! - [`PeerServer`] binds a rendezvous topic (the channel code shown to the
//!   user) and answers the first offer.
//! - [`PeerSocket`] dials a topic with an offer and waits for the answer on
//!   a throwaway topic of its own.
//! - Both produce a [`PeerTransport`](crate::transport::PeerTransport).
//!
//! The WebRTC stack sits behind [`RtcConnector`] so the choreography can be
//! tested without a network.

pub mod error;
pub mod hub;
pub mod loopback;
pub mod message;
pub mod relay;
pub mod rtc;
pub mod server;
pub mod socket;
pub mod webrtc;

use std::sync::Arc;
use std::time::Duration;

pub use error::SignalingError;
pub use hub::{relay_router, ConnectionId, HubStats, RelayHub};
pub use loopback::{LoopbackConnection, LoopbackConnector};
pub use message::{PeerSignal, RelayMessage};
pub use relay::RelayClient;
pub use rtc::{wait_ice_gathering, DataChannel, PeerState, RtcConnection, RtcConnector};
pub use server::{PeerServer, ServerEvent};
pub use socket::PeerSocket;
pub use webrtc::{WebRtcConnection, WebRtcConnector};

use crate::config::{RtcConfig, SessionConfig, DEFAULT_SIGNAL_ENDPOINT, ICE_GATHER_TIMEOUT};

/// Everything a peer link needs to get going.
#[derive(Clone)]
pub struct PeerOptions {
    /// Relay WebSocket URL.
    pub endpoint: String,
    pub rtc: RtcConfig,
    pub ice_gather_timeout: Duration,
    pub connector: Arc<dyn RtcConnector>,
}

impl PeerOptions {
    /// Defaults for everything but the RTC backend.
    pub fn new(connector: Arc<dyn RtcConnector>) -> Self {
        Self {
            endpoint: DEFAULT_SIGNAL_ENDPOINT.to_string(),
            rtc: RtcConfig::default(),
            ice_gather_timeout: ICE_GATHER_TIMEOUT,
            connector,
        }
    }

    pub fn from_config(config: &SessionConfig, connector: Arc<dyn RtcConnector>) -> Self {
        Self {
            endpoint: config.relay_endpoint.clone(),
            rtc: config.rtc.clone(),
            ice_gather_timeout: config.ice_gather_timeout,
            connector,
        }
    }
}

impl std::fmt::Debug for PeerOptions {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PeerOptions")
            .field("endpoint", &self.endpoint)
            .field("ice_servers", &self.rtc.ice_servers.len())
            .field("ice_gather_timeout", &self.ice_gather_timeout)
            .finish_non_exhaustive()
    }
}
