//! # Peer Server (responder)
//!
//! Binds a rendezvous topic on the relay and answers the first offer that
//! arrives there. One server yields at most one connection: after answering
//! it unsubscribes and hangs up on the relay, so the topic can't be raced.
//!
//! A malformed offer is logged and skipped. The server keeps listening
//! until a good one shows up, it's closed, or the topic's owner (another
//! server that bound the same channel first) leaves the relay. That last
//! case means a rival took the connection, so the server just ends.

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn, Instrument};

use super::error::SignalingError;
use super::message::{PeerSignal, RelayMessage};
use super::relay::RelayClient;
use super::rtc::{wait_ice_gathering, RtcConnection};
use super::PeerOptions;
use crate::config::{TOPIC_CLOSED, TOPIC_NOT_FOUND};
use crate::transport::{PeerLink, PeerTransport};
use std::sync::Arc;

/// What a [`PeerServer`] reports.
#[derive(Debug)]
pub enum ServerEvent {
    /// Bound and subscribed to the topic.
    Listening,
    /// An offer was answered. The transport opens when the channel does.
    Connection(PeerTransport),
    /// The server gave up. Nothing follows.
    Error(SignalingError),
}

/// A single-use listener on one relay topic.
pub struct PeerServer {
    topic: String,
    events: mpsc::UnboundedReceiver<ServerEvent>,
    cancel: CancellationToken,
}

impl PeerServer {
    /// Bind `topic` and start listening in the background.
    pub fn bind(topic: impl Into<String>, options: PeerOptions) -> Self {
        Self::bind_with_cancel(topic, options, CancellationToken::new())
    }

    /// [`bind`](Self::bind) tied to an outside cancellation token.
    pub fn bind_with_cancel(
        topic: impl Into<String>,
        options: PeerOptions,
        cancel: CancellationToken,
    ) -> Self {
        let topic = topic.into();
        let (tx, rx) = mpsc::unbounded_channel();
        let span = tracing::info_span!("peer_server", topic = %topic);
        tokio::spawn(listen(topic.clone(), options, tx, cancel.clone()).instrument(span));
        Self {
            topic,
            events: rx,
            cancel,
        }
    }

    pub fn topic(&self) -> &str {
        &self.topic
    }

    /// Next event. `None` once the server is done, whether it handed out
    /// its connection, failed, or was closed.
    pub async fn next_event(&mut self) -> Option<ServerEvent> {
        self.events.recv().await
    }

    /// Wait for the one connection.
    pub async fn accept(&mut self) -> Result<PeerTransport, SignalingError> {
        loop {
            match self.next_event().await {
                Some(ServerEvent::Listening) => continue,
                Some(ServerEvent::Connection(transport)) => return Ok(transport),
                Some(ServerEvent::Error(e)) => return Err(e),
                None => return Err(SignalingError::Aborted),
            }
        }
    }

    /// Stop listening. An already accepted connection is unaffected.
    pub fn close(&mut self) {
        self.cancel.cancel();
    }
}

impl Drop for PeerServer {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

async fn listen(
    topic: String,
    options: PeerOptions,
    events: mpsc::UnboundedSender<ServerEvent>,
    cancel: CancellationToken,
) {
    if cancel.is_cancelled() {
        return;
    }
    let mut relay = match RelayClient::connect_cancellable(&options.endpoint, &cancel).await {
        Ok(relay) => relay,
        Err(SignalingError::Aborted) => return,
        Err(e) => {
            warn!(error = %e, "relay unreachable");
            let _ = events.send(ServerEvent::Error(e));
            return;
        }
    };

    let served = tokio::select! {
        result = serve(&mut relay, &topic, &options, &events) => result,
        _ = cancel.cancelled() => Err(SignalingError::Aborted),
    };

    match served {
        Ok(()) => {}
        Err(SignalingError::Aborted) => debug!("server closed"),
        Err(e) => {
            warn!(error = %e, "server failed");
            let _ = events.send(ServerEvent::Error(e));
        }
    }
    // Dropping subscriptions first keeps the relay from queueing a second
    // offer for a connection that is about to vanish.
    let _ = relay.unsubscribe_all().await;
    relay.close().await;
}

async fn serve(
    relay: &mut RelayClient,
    topic: &str,
    options: &PeerOptions,
    events: &mpsc::UnboundedSender<ServerEvent>,
) -> Result<(), SignalingError> {
    relay.create_topic(topic).await?;
    relay.consume(topic).await?;
    info!("listening");
    let _ = events.send(ServerEvent::Listening);

    while let Some(frame) = relay.next().await {
        let data = match frame {
            Ok(RelayMessage::Message { data }) => data,
            Ok(RelayMessage::Error { data }) if data == TOPIC_NOT_FOUND => {
                return Err(SignalingError::RoomNotFound(topic.to_string()));
            }
            Ok(RelayMessage::Error { data }) if data == TOPIC_CLOSED => {
                info!("topic closed by its owner, stepping down");
                return Ok(());
            }
            Ok(RelayMessage::Error { data }) => return Err(SignalingError::Protocol(data)),
            Ok(other) => {
                debug!(frame = ?other, "unexpected relay frame");
                continue;
            }
            Err(SignalingError::Protocol(e)) => {
                warn!(error = %e, "unreadable relay frame");
                continue;
            }
            Err(e) => return Err(e),
        };

        let (peer_id, offer) = match PeerSignal::parse(&data) {
            Ok(PeerSignal::Offer { peer_id, offer }) => (peer_id, offer),
            Ok(PeerSignal::Answer { .. }) => {
                debug!("stray answer on rendezvous topic, ignoring");
                continue;
            }
            Err(e) => {
                warn!(error = %e, "unreadable offer, ignoring");
                continue;
            }
        };

        let connection = options.connector.connect(&options.rtc).await?;
        match answer(relay, &peer_id, &offer, options, connection.as_ref()).await {
            Ok(()) => {
                info!(peer_id = %peer_id, "offer answered");
                let (transport, link) = PeerTransport::pair(CancellationToken::new());
                tokio::spawn(open(connection, link).in_current_span());
                let _ = events.send(ServerEvent::Connection(transport));
                return Ok(());
            }
            Err(SignalingError::Rtc(e)) => {
                warn!(peer_id = %peer_id, error = %e, "offer rejected");
                connection.close().await;
            }
            Err(e) => {
                connection.close().await;
                return Err(e);
            }
        }
    }
    Err(SignalingError::SignalingUnavailable("relay closed".into()))
}

async fn answer(
    relay: &mut RelayClient,
    peer_id: &str,
    offer: &str,
    options: &PeerOptions,
    connection: &dyn RtcConnection,
) -> Result<(), SignalingError> {
    connection.create_answer(offer).await?;
    let answer = wait_ice_gathering(connection, options.ice_gather_timeout).await?;
    let signal = PeerSignal::Answer { answer };
    relay.produce(peer_id, &signal.to_json()).await
}

/// Wait for the accepted connection's channel, then hand it to the link.
async fn open(connection: Arc<dyn RtcConnection>, link: PeerLink) {
    let cancel = link.cancel_token().clone();
    let opened = tokio::select! {
        result = connection.data_channel() => result,
        _ = cancel.cancelled() => Err(SignalingError::Aborted),
    };
    match opened {
        Ok(channel) => link.run_channel(connection, channel).await,
        Err(e) => link.fail(Some(connection), e).await,
    }
}
