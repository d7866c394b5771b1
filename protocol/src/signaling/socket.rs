//! # Peer Socket (initiator)
//!
//! Dials a peer that is listening on a rendezvous topic:
//!
//! ```text
//!   initiator                        relay                      responder
//!   ---------                        -----                      ---------
//!   create offer, gather ICE (bounded)
//!   createTopic(peerId)  ---------->
//!   consume(peerId)      ---------->
//!   produce(topic, offer) --------->  ---- message(offer) ---->
//!                                     <--- produce(peerId, answer)
//!   <------- message(answer) ------
//!   accept answer, unsubscribe, hang up on the relay
//!   ... data channel opens: Open ...
//! ```
//!
//! The subscription on `peerId` is in place before the offer leaves, so a
//! fast responder can't answer into a void. However the exchange ends, even
//! by cancellation, the relay connection is unsubscribed and closed
//! properly rather than dropped.

use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn, Instrument};

use super::error::SignalingError;
use super::message::{PeerSignal, RelayMessage};
use super::relay::RelayClient;
use super::rtc::{wait_ice_gathering, DataChannel, RtcConnection};
use super::PeerOptions;
use crate::config::{PEER_ID_LENGTH, TOPIC_NOT_FOUND};
use crate::transport::{PeerLink, PeerTransport};

/// Initiates peer links.
pub struct PeerSocket;

impl PeerSocket {
    /// Start dialing whoever is bound to `remote_topic`. Returns at once;
    /// the transport reports `Open`, or `Error` then `Close`.
    pub fn connect(remote_topic: impl Into<String>, options: PeerOptions) -> PeerTransport {
        Self::connect_with_cancel(remote_topic, options, CancellationToken::new())
    }

    /// [`connect`](Self::connect) tied to an outside cancellation token,
    /// usually a session's.
    pub fn connect_with_cancel(
        remote_topic: impl Into<String>,
        options: PeerOptions,
        cancel: CancellationToken,
    ) -> PeerTransport {
        let remote_topic = remote_topic.into();
        let (transport, link) = PeerTransport::pair(cancel);
        let span = tracing::info_span!("peer_socket", topic = %remote_topic);
        tokio::spawn(dial(remote_topic, options, link).instrument(span));
        transport
    }
}

fn new_peer_id() -> String {
    let bytes: [u8; PEER_ID_LENGTH] = rand::random();
    hex::encode(bytes)
}

async fn dial(remote_topic: String, options: PeerOptions, link: PeerLink) {
    let cancel = link.cancel_token().clone();
    let connection = tokio::select! {
        result = options.connector.connect(&options.rtc) => match result {
            Ok(connection) => connection,
            Err(e) => return link.fail(None, e).await,
        },
        _ = cancel.cancelled() => return link.fail(None, SignalingError::Aborted).await,
    };

    match negotiate(&remote_topic, &options, connection.as_ref(), &cancel).await {
        Ok(channel) => {
            info!("peer link open");
            link.run_channel(connection, channel).await;
        }
        Err(e) => link.fail(Some(connection), e).await,
    }
}

async fn negotiate(
    remote_topic: &str,
    options: &PeerOptions,
    connection: &dyn RtcConnection,
    cancel: &CancellationToken,
) -> Result<DataChannel, SignalingError> {
    let offer = tokio::select! {
        result = async {
            connection.create_offer().await?;
            wait_ice_gathering(connection, options.ice_gather_timeout).await
        } => result?,
        _ = cancel.cancelled() => return Err(SignalingError::Aborted),
    };

    let mut relay = RelayClient::connect_cancellable(&options.endpoint, cancel).await?;
    let exchanged = tokio::select! {
        result = exchange(&mut relay, remote_topic, &offer, connection) => result,
        _ = cancel.cancelled() => Err(SignalingError::Aborted),
    };
    let _ = relay.unsubscribe_all().await;
    relay.close().await;
    exchanged?;

    tokio::select! {
        result = connection.data_channel() => result,
        _ = cancel.cancelled() => Err(SignalingError::Aborted),
    }
}

async fn exchange(
    relay: &mut RelayClient,
    remote_topic: &str,
    offer: &str,
    connection: &dyn RtcConnection,
) -> Result<(), SignalingError> {
    let peer_id = new_peer_id();
    relay.create_topic(&peer_id).await?;
    relay.consume(&peer_id).await?;
    let signal = PeerSignal::Offer {
        peer_id: peer_id.clone(),
        offer: offer.to_string(),
    };
    relay.produce(remote_topic, &signal.to_json()).await?;
    debug!(peer_id = %peer_id, "offer sent");

    while let Some(frame) = relay.next().await {
        match frame {
            Ok(RelayMessage::Error { data }) if data == TOPIC_NOT_FOUND => {
                return Err(SignalingError::RoomNotFound(remote_topic.to_string()));
            }
            Ok(RelayMessage::Error { data }) => return Err(SignalingError::Protocol(data)),
            Ok(RelayMessage::Message { data }) => match PeerSignal::parse(&data) {
                Ok(PeerSignal::Answer { answer }) => {
                    connection.accept_answer(&answer).await?;
                    debug!("answer applied");
                    return Ok(());
                }
                Ok(PeerSignal::Offer { .. }) => debug!("stray offer on reply topic, ignoring"),
                Err(e) => warn!(error = %e, "unreadable reply, ignoring"),
            },
            Ok(other) => debug!(frame = ?other, "unexpected relay frame"),
            Err(SignalingError::Protocol(e)) => warn!(error = %e, "unreadable relay frame"),
            Err(e) => return Err(e),
        }
    }
    Err(SignalingError::SignalingUnavailable(
        "relay closed before an answer arrived".into(),
    ))
}

// The rendezvous itself is exercised end to end in tests/rendezvous.rs,
// against a real relay.
#[cfg(test)]
mod tests {
    use super::*;
    use crate::signaling::LoopbackConnector;
    use crate::transport::{TransportError, TransportEvent};
    use std::time::Duration;

    #[test]
    fn peer_ids_are_fresh_hex() {
        let a = new_peer_id();
        let b = new_peer_id();
        assert_eq!(a.len(), PEER_ID_LENGTH * 2);
        assert!(a.chars().all(|c| c.is_ascii_hexdigit()));
        assert_ne!(a, b);
    }

    #[tokio::test]
    async fn unreachable_relay_surfaces_as_error_event() {
        let mut options = PeerOptions::new(Arc::new(LoopbackConnector::new()));
        options.endpoint = "ws://127.0.0.1:9/signal".into();
        options.ice_gather_timeout = Duration::from_millis(10);

        let mut transport = PeerSocket::connect("nobody", options);
        match transport.next_event().await {
            Some(TransportEvent::Error(TransportError::Signaling(
                SignalingError::SignalingUnavailable(_),
            ))) => {}
            other => panic!("expected signaling failure, got {other:?}"),
        }
        assert_eq!(transport.next_event().await, Some(TransportEvent::Close));
    }

    #[tokio::test]
    async fn close_during_negotiation_is_quiet() {
        let mut options = PeerOptions::new(Arc::new(LoopbackConnector::with_stalled_gathering()));
        options.ice_gather_timeout = Duration::from_secs(30);

        let mut transport = PeerSocket::connect("somewhere", options);
        transport.close();
        assert_eq!(transport.next_event().await, Some(TransportEvent::Close));
        assert_eq!(transport.next_event().await, None);
    }
}
