//! # Relying Party
//!
//! The other end of a session: issue a challenge, get it signed, check the
//! answer. Works over any transport that can receive, so a relying party
//! can authenticate a popup, an embedded frame, or a paired device the same
//! way.
//!
//! The request is repeated every 500ms until something comes back. A popup
//! that is still loading misses the first post, and `postMessage` has no
//! delivery receipt.

use std::time::Duration;
use tokio::time::{interval, Instant, MissedTickBehavior};
use tracing::{debug, info};

use super::error::SessionError;
use crate::auth::{verify_credential, AuthMessage, AuthRequest, Challenge, VerifiedIdentity, VerifyOptions};
use crate::config::REQUEST_RESEND_INTERVAL;
use crate::transport::{Transport, TransportError, TransportEvent};

/// Authenticate whoever is on the other end of `transport` for `origin`,
/// with a freshly generated challenge.
pub async fn authenticate(
    transport: &mut Transport,
    origin: &str,
    timeout: Duration,
) -> Result<VerifiedIdentity, SessionError> {
    let request = AuthRequest::new(origin, Challenge::generate().into_string(), None);
    authenticate_request(transport, &request, &VerifyOptions::for_origin(origin), timeout).await
}

/// [`authenticate`] with a caller-built request (a username hint, a
/// challenge issued elsewhere) and verification knobs.
pub async fn authenticate_request(
    transport: &mut Transport,
    request: &AuthRequest,
    options: &VerifyOptions,
    timeout: Duration,
) -> Result<VerifiedIdentity, SessionError> {
    if !transport.kind().can_receive() {
        return Err(SessionError::Transport(TransportError::NotOpen));
    }
    let deadline = Instant::now() + timeout;
    let payload = request.to_json();
    let mut resend = interval(REQUEST_RESEND_INTERVAL);
    resend.set_missed_tick_behavior(MissedTickBehavior::Delay);
    let mut open = false;

    loop {
        tokio::select! {
            _ = tokio::time::sleep_until(deadline) => {
                return Err(SessionError::Timeout(timeout));
            }
            _ = resend.tick(), if open => {
                transport.send(&payload)?;
            }
            event = transport.next_event() => match event {
                Some(TransportEvent::Open) => {
                    debug!(transport = %transport.kind(), "transport open, sending request");
                    open = true;
                    resend.reset_immediately();
                }
                Some(TransportEvent::Message(raw)) => {
                    if let Some(AuthMessage::Credential(credential)) = AuthMessage::parse(&raw) {
                        let verified = verify_credential(&credential, request.challenge(), options)?;
                        info!(identity = %verified.id, "relying party authenticated");
                        return Ok(verified);
                    }
                    debug!("ignoring message that isn't a credential");
                }
                Some(TransportEvent::Error(e)) => return Err(e.into()),
                Some(TransportEvent::Close) | None => {
                    return Err(TransportError::Closed.into());
                }
            }
        }
    }
}
