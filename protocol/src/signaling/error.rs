//! Error types for signaling and peer link setup.

use thiserror::Error;

/// Failures while rendezvousing over the relay or bringing up a peer link.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum SignalingError {
    /// The relay has no mailbox under this topic. Nobody is listening on
    /// that channel code.
    #[error("room not found: {0}")]
    RoomNotFound(String),

    /// The relay socket couldn't be opened or died unexpectedly.
    #[error("failed to connect to the signaling server: {0}")]
    SignalingUnavailable(String),

    /// The peer connection went `failed` or `disconnected` after setup.
    #[error("connection {0}")]
    ConnectionLost(String),

    /// The link was cancelled before it finished.
    #[error("signaling aborted")]
    Aborted,

    /// A bounded wait elapsed.
    #[error("signaling timed out after {0}ms")]
    Timeout(u64),

    /// The RTC backend rejected an operation (bad SDP, closed connection).
    #[error("rtc error: {0}")]
    Rtc(String),

    /// The relay or the peer sent something we can't parse.
    #[error("protocol error: {0}")]
    Protocol(String),
}
