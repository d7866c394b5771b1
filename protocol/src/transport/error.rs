//! Transport error types.

use thiserror::Error;

use crate::signaling::SignalingError;

/// Failures sending over, or reported by, a [`Transport`](super::Transport).
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum TransportError {
    /// The transport was closed locally or by the other side.
    #[error("transport closed")]
    Closed,

    /// Sent before the peer link opened.
    #[error("transport not open yet")]
    NotOpen,

    /// A callback redirect already navigated away. It sends once.
    #[error("callback transport already sent its one message")]
    AlreadySent,

    /// Window messaging has no origin to restrict the post to yet.
    #[error("counterpart origin unknown; refusing to post to any origin")]
    UnknownOrigin,

    /// The counterpart window is gone.
    #[error("counterpart window is gone")]
    CounterpartGone,

    /// Building or performing a callback navigation failed.
    #[error("navigation failed: {0}")]
    Navigation(String),

    /// Peer link setup or the link itself failed.
    #[error(transparent)]
    Signaling(#[from] SignalingError),
}
