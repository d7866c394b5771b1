//! Session-level errors. Everything below the controller funnels into
//! [`SessionError`].

use std::time::Duration;
use thiserror::Error;

use crate::auth::AuthError;
use crate::identity::IdentityError;
use crate::signaling::SignalingError;
use crate::transport::TransportError;

#[derive(Debug, Error)]
pub enum SessionError {
    #[error(transparent)]
    Auth(#[from] AuthError),

    #[error(transparent)]
    Identity(#[from] IdentityError),

    #[error(transparent)]
    Transport(#[from] TransportError),

    #[error(transparent)]
    Signaling(#[from] SignalingError),

    /// The session outlived its bound.
    #[error("session timed out after {}s", .0.as_secs())]
    Timeout(Duration),

    /// No channel code, callback URL, or opener: nobody to answer.
    #[error("no transport available: open this page with a channel, a callback_url, or from another window")]
    NoTransport,

    /// The page URL carries something unusable.
    #[error("invalid session context: {0}")]
    InvalidContext(String),

    /// The operation doesn't fit the session's current state.
    #[error("cannot {action} while {state}")]
    InvalidState {
        action: &'static str,
        state: &'static str,
    },

    #[error("session cancelled")]
    Cancelled,
}

impl SessionError {
    /// Pairing failures the user can dismiss and retry from scratch, as
    /// opposed to ones that end the session.
    pub fn is_pairing_failure(&self) -> bool {
        matches!(
            self,
            Self::Signaling(
                SignalingError::RoomNotFound(_)
                    | SignalingError::SignalingUnavailable(_)
                    | SignalingError::ConnectionLost(_)
                    | SignalingError::Rtc(_)
            ) | Self::Transport(TransportError::Signaling(_))
        )
    }
}
