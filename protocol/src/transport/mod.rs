//! # Transports
//!
//! Every way an authentication request can reach the identity provider, and
//! a response get back, behind one shape: an ordered stream of
//! [`TransportEvent`]s plus `send` and `close`.
//!
//! | Kind                | Direction | Lifetime                                |
//! |---------------------|-----------|-----------------------------------------|
//! | window messaging    | both      | as long as both windows are open        |
//! | callback redirect   | out only  | one send, then the page navigates away  |
//! | peer data channel   | both      | until either side closes or ICE gives up |
//!
//! The set is closed, so [`Transport`] is an enum rather than a trait
//! object. Callers match on [`TransportKind`] when the difference matters
//! (a callback can't receive, so the controller never waits on one).

pub mod callback;
pub mod error;
pub mod peer;
pub mod window;

pub use callback::{callback_location, CallbackRedirect, Navigator, CALLBACK_PARAM};
pub use error::TransportError;
pub use peer::PeerTransport;
pub use window::{Window, WindowId, WindowMessage, WindowMessaging, WindowRegistry};

pub(crate) use peer::PeerLink;

/// What a transport reports, in order: `Open`, any number of `Message`s and
/// `Error`s, then at most one `Close`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportEvent {
    Open,
    Message(String),
    Error(TransportError),
    Close,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportKind {
    WindowMessaging,
    CallbackRedirect,
    PeerChannel,
}

impl TransportKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::WindowMessaging => "window",
            Self::CallbackRedirect => "callback",
            Self::PeerChannel => "peer",
        }
    }

    /// Whether anything can ever arrive over this kind of transport.
    pub fn can_receive(self) -> bool {
        !matches!(self, Self::CallbackRedirect)
    }
}

impl std::fmt::Display for TransportKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One of the supported transports.
pub enum Transport {
    Window(WindowMessaging),
    Callback(CallbackRedirect),
    Peer(PeerTransport),
}

impl Transport {
    pub fn kind(&self) -> TransportKind {
        match self {
            Self::Window(_) => TransportKind::WindowMessaging,
            Self::Callback(_) => TransportKind::CallbackRedirect,
            Self::Peer(_) => TransportKind::PeerChannel,
        }
    }

    pub fn send(&mut self, data: &str) -> Result<(), TransportError> {
        match self {
            Self::Window(t) => t.send(data),
            Self::Callback(t) => t.send(data),
            Self::Peer(t) => t.send(data),
        }
    }

    pub fn close(&mut self) {
        match self {
            Self::Window(t) => t.close(),
            Self::Callback(t) => t.close(),
            Self::Peer(t) => t.close(),
        }
    }

    /// Next event, or `None` once the transport has nothing more to say.
    pub async fn next_event(&mut self) -> Option<TransportEvent> {
        match self {
            Self::Window(t) => t.next_event().await,
            Self::Callback(t) => t.next_event().await,
            Self::Peer(t) => t.next_event().await,
        }
    }

    /// Wait for `Open`. Anything else first is a failure to open.
    pub async fn opened(&mut self) -> Result<(), TransportError> {
        match self.next_event().await {
            Some(TransportEvent::Open) => Ok(()),
            Some(TransportEvent::Error(e)) => Err(e),
            Some(TransportEvent::Message(_)) | Some(TransportEvent::Close) | None => {
                Err(TransportError::Closed)
            }
        }
    }
}

impl From<WindowMessaging> for Transport {
    fn from(t: WindowMessaging) -> Self {
        Self::Window(t)
    }
}

impl From<CallbackRedirect> for Transport {
    fn from(t: CallbackRedirect) -> Self {
        Self::Callback(t)
    }
}

impl From<PeerTransport> for Transport {
    fn from(t: PeerTransport) -> Self {
        Self::Peer(t)
    }
}

impl std::fmt::Debug for Transport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Transport").field("kind", &self.kind()).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::sync::mpsc;

    #[tokio::test]
    async fn dispatches_by_kind() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let mut transport: Transport = CallbackRedirect::parse("https://rp.example/cb", tx)
            .unwrap()
            .into();
        assert_eq!(transport.kind(), TransportKind::CallbackRedirect);
        assert!(!transport.kind().can_receive());
        transport.opened().await.unwrap();
        transport.send("done").unwrap();
        assert!(rx.recv().await.is_some());
        assert_eq!(transport.next_event().await, Some(TransportEvent::Close));
    }
}
