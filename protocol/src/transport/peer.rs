//! # Peer Transport
//!
//! The application-facing end of a WebRTC data channel established through
//! the signaling relay. [`PeerSocket`](crate::signaling::PeerSocket) and
//! [`PeerServer`](crate::signaling::PeerServer) hand one of these out right
//! away and finish negotiation in the background; the caller just waits for
//! `Open`.
//!
//! A background driver ([`PeerLink`]) owns the connection. The transport
//! owns a cancellation token: closing or dropping it tears the link down
//! whatever stage negotiation is in.

use parking_lot::Mutex;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use super::error::TransportError;
use super::TransportEvent;
use crate::signaling::{DataChannel, PeerState, RtcConnection, SignalingError};

enum Outgoing {
    Pending,
    Open(mpsc::UnboundedSender<String>),
    Ended,
}

/// A data channel to a remote peer.
pub struct PeerTransport {
    events: mpsc::UnboundedReceiver<TransportEvent>,
    outgoing: Arc<Mutex<Outgoing>>,
    cancel: CancellationToken,
}

impl PeerTransport {
    /// A transport and the driver handle that feeds it.
    pub(crate) fn pair(cancel: CancellationToken) -> (Self, PeerLink) {
        let (tx, rx) = mpsc::unbounded_channel();
        let outgoing = Arc::new(Mutex::new(Outgoing::Pending));
        let link = PeerLink {
            events: tx,
            outgoing: outgoing.clone(),
            cancel: cancel.clone(),
        };
        (
            Self {
                events: rx,
                outgoing,
                cancel,
            },
            link,
        )
    }

    pub fn send(&mut self, data: &str) -> Result<(), TransportError> {
        if self.cancel.is_cancelled() {
            return Err(TransportError::Closed);
        }
        match &*self.outgoing.lock() {
            Outgoing::Pending => Err(TransportError::NotOpen),
            Outgoing::Open(tx) => tx
                .send(data.to_string())
                .map_err(|_| TransportError::Closed),
            Outgoing::Ended => Err(TransportError::Closed),
        }
    }

    /// Abort negotiation or close the open channel. A `Close` event follows
    /// once the driver has let go of the connection.
    pub fn close(&mut self) {
        self.cancel.cancel();
    }

    pub fn is_open(&self) -> bool {
        matches!(&*self.outgoing.lock(), Outgoing::Open(_)) && !self.cancel.is_cancelled()
    }

    pub async fn next_event(&mut self) -> Option<TransportEvent> {
        self.events.recv().await
    }
}

impl Drop for PeerTransport {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

impl std::fmt::Debug for PeerTransport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PeerTransport")
            .field("open", &self.is_open())
            .field("cancelled", &self.cancel.is_cancelled())
            .finish()
    }
}

/// Driver side of a [`PeerTransport`].
pub(crate) struct PeerLink {
    events: mpsc::UnboundedSender<TransportEvent>,
    outgoing: Arc<Mutex<Outgoing>>,
    cancel: CancellationToken,
}

impl PeerLink {
    pub(crate) fn cancel_token(&self) -> &CancellationToken {
        &self.cancel
    }

    pub(crate) fn emit(&self, event: TransportEvent) {
        // The transport may be gone already; nobody left to tell.
        let _ = self.events.send(event);
    }

    /// Negotiation failed: report it, release the connection, close.
    pub(crate) async fn fail(self, connection: Option<Arc<dyn RtcConnection>>, error: SignalingError) {
        if matches!(error, SignalingError::Aborted) {
            debug!("peer negotiation aborted");
        } else {
            warn!(error = %error, "peer negotiation failed");
            self.emit(TransportEvent::Error(error.into()));
        }
        self.finish(connection).await;
    }

    /// Close without error (abort during negotiation).
    pub(crate) async fn finish(self, connection: Option<Arc<dyn RtcConnection>>) {
        *self.outgoing.lock() = Outgoing::Ended;
        if let Some(connection) = connection {
            connection.close().await;
        }
        self.emit(TransportEvent::Close);
    }

    /// Pump an open channel until either side closes or the link is lost.
    pub(crate) async fn run_channel(self, connection: Arc<dyn RtcConnection>, mut channel: DataChannel) {
        *self.outgoing.lock() = Outgoing::Open(channel.sender());
        self.emit(TransportEvent::Open);

        let mut state = connection.state();
        let initial = *state.borrow_and_update();
        let mut lost = initial.is_lost().then_some(initial);

        while lost.is_none() {
            tokio::select! {
                biased;
                _ = self.cancel.cancelled() => break,
                incoming = channel.recv() => match incoming {
                    Some(message) => self.emit(TransportEvent::Message(message)),
                    None => {
                        debug!("data channel closed by peer");
                        break;
                    }
                },
                changed = state.changed() => {
                    if changed.is_err() {
                        break;
                    }
                    let current = *state.borrow_and_update();
                    if current.is_lost() {
                        lost = Some(current);
                    } else if current == PeerState::Closed {
                        break;
                    }
                }
            }
        }

        if let Some(state) = lost {
            warn!(state = state.as_str(), "peer link lost");
            self.emit(TransportEvent::Error(
                SignalingError::ConnectionLost(format!("Connection {}.", state.as_str())).into(),
            ));
        }
        self.finish(Some(connection)).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::RtcConfig;
    use crate::signaling::{LoopbackConnector, RtcConnector};

    async fn linked_pair(
        connector: &LoopbackConnector,
    ) -> (Arc<dyn RtcConnection>, Arc<dyn RtcConnection>) {
        let rtc = RtcConfig::default();
        let a = connector.connect(&rtc).await.unwrap();
        let b = connector.connect(&rtc).await.unwrap();
        a.create_offer().await.unwrap();
        let offer = a.local_description().await.unwrap();
        b.create_answer(&offer).await.unwrap();
        let answer = b.local_description().await.unwrap();
        a.accept_answer(&answer).await.unwrap();
        (a, b)
    }

    #[tokio::test]
    async fn send_before_open_is_refused() {
        let (mut transport, _link) = PeerTransport::pair(CancellationToken::new());
        assert_eq!(transport.send("x"), Err(TransportError::NotOpen));
        transport.close();
        assert_eq!(transport.send("x"), Err(TransportError::Closed));
    }

    #[tokio::test]
    async fn pumps_messages_both_ways() {
        let connector = LoopbackConnector::new();
        let (a, b) = linked_pair(&connector).await;
        let (mut ta, link_a) = PeerTransport::pair(CancellationToken::new());
        let (mut tb, link_b) = PeerTransport::pair(CancellationToken::new());
        let ca = a.data_channel().await.unwrap();
        let cb = b.data_channel().await.unwrap();
        tokio::spawn(link_a.run_channel(a, ca));
        tokio::spawn(link_b.run_channel(b, cb));

        assert_eq!(ta.next_event().await, Some(TransportEvent::Open));
        assert_eq!(tb.next_event().await, Some(TransportEvent::Open));
        ta.send("ping").unwrap();
        assert_eq!(tb.next_event().await, Some(TransportEvent::Message("ping".into())));
        tb.send("pong").unwrap();
        assert_eq!(ta.next_event().await, Some(TransportEvent::Message("pong".into())));

        ta.close();
        assert_eq!(ta.next_event().await, Some(TransportEvent::Close));
    }

    #[tokio::test]
    async fn lost_link_reports_error_then_close() {
        let connector = LoopbackConnector::new();
        let (a, _b) = linked_pair(&connector).await;
        let (mut ta, link) = PeerTransport::pair(CancellationToken::new());
        let channel = a.data_channel().await.unwrap();
        tokio::spawn(link.run_channel(a, channel));

        assert_eq!(ta.next_event().await, Some(TransportEvent::Open));
        connector.sever_all();
        match ta.next_event().await {
            Some(TransportEvent::Error(TransportError::Signaling(SignalingError::ConnectionLost(m)))) => {
                assert_eq!(m, "Connection failed.");
            }
            other => panic!("expected connection lost, got {other:?}"),
        }
        assert_eq!(ta.next_event().await, Some(TransportEvent::Close));
        assert_eq!(ta.send("late"), Err(TransportError::Closed));
    }

    #[tokio::test]
    async fn aborted_negotiation_closes_quietly() {
        let (mut transport, link) = PeerTransport::pair(CancellationToken::new());
        link.fail(None, SignalingError::Aborted).await;
        assert_eq!(transport.next_event().await, Some(TransportEvent::Close));
        assert_eq!(transport.next_event().await, None);
    }
}
