//! Shared fixtures for the integration tests: a real relay on a loopback
//! port and peer options pointed at it.

#![allow(dead_code)]

use std::sync::Arc;
use std::time::Duration;

use websign_protocol::config::SessionConfig;
use websign_protocol::signaling::{relay_router, LoopbackConnector, PeerOptions, RelayHub};

/// Upper bound for anything a test waits on.
pub const PATIENCE: Duration = Duration::from_secs(10);

pub struct Relay {
    pub endpoint: String,
    pub hub: Arc<RelayHub>,
}

/// Serve a fresh relay hub on `127.0.0.1:0`.
pub async fn spawn_relay() -> Relay {
    let hub = Arc::new(RelayHub::new());
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
        .await
        .expect("bind relay");
    let addr = listener.local_addr().expect("relay addr");
    let app = relay_router(hub.clone());
    tokio::spawn(async move {
        axum::serve(listener, app).await.expect("relay server");
    });
    Relay {
        endpoint: format!("ws://{addr}/signal"),
        hub,
    }
}

/// Spin until the hub holds exactly `count` topics.
pub async fn wait_for_topics(relay: &Relay, count: u64) {
    patiently(async {
        while relay.hub.stats().topics != count {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await;
}

/// Peer options for `endpoint` over an in-process RTC backend. Both ends of
/// a link must share one connector.
pub fn peer_options(endpoint: &str, connector: &LoopbackConnector) -> PeerOptions {
    let mut options = PeerOptions::new(Arc::new(connector.clone()));
    options.endpoint = endpoint.to_string();
    options.ice_gather_timeout = Duration::from_millis(100);
    options
}

pub fn session_config(endpoint: &str) -> SessionConfig {
    SessionConfig {
        relay_endpoint: endpoint.to_string(),
        ice_gather_timeout: Duration::from_millis(100),
        session_timeout: PATIENCE,
        ..SessionConfig::default()
    }
}

/// Wait on `fut`, failing the test instead of hanging it.
pub async fn patiently<F: std::future::Future>(fut: F) -> F::Output {
    tokio::time::timeout(PATIENCE, fut)
        .await
        .expect("timed out waiting")
}
