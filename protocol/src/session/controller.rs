//! # Auth Session Controller
//!
//! One authentication, start to finish, on the identity provider's side.
//!
//! ```text
//! AwaitingChallenge ──request──> IdentitySelection ──approve──> Signing ──> Success
//!        │                         │        ▲                        │
//!        │                         ▼        │ dismiss                └─────> Failure
//!        │                AwaitingRemoteDevice ──forward──> Success
//!        └──────────── timeout / cancel / transport error ─────────────> Failure
//! ```
//!
//! The controller owns its transport. Nothing is signed without an
//! identity chosen through [`approve`](AuthSessionController::approve), and
//! nothing is retried: a failed session stays failed and the user starts a
//! fresh one.
//!
//! Pairing errors are the exception to "failure is terminal". If a second
//! device can't be reached, the session drops back to `IdentitySelection`
//! and the user may try again or sign locally.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use url::Url;

use super::context::{new_channel_id, rendezvous_url, SessionContext};
use super::error::SessionError;
use crate::auth::{
    sign, verify_credential, AuthMessage, AuthRequest, SignedResponse, VerifiedIdentity,
    VerifyOptions,
};
use crate::config::SessionConfig;
use crate::identity::{Fingerprint, Identity};
use crate::signaling::{PeerOptions, PeerServer, PeerSocket, RtcConnector, ServerEvent};
use crate::transport::{
    CallbackRedirect, Navigator, PeerTransport, Transport, TransportError, TransportEvent,
    TransportKind, WindowMessaging,
};

// ---------------------------------------------------------------------------
// State
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionState {
    AwaitingChallenge,
    IdentitySelection,
    /// A rendezvous is bound on `channel`; `connected` once the second
    /// device's channel opened.
    AwaitingRemoteDevice { channel: String, connected: bool },
    Signing,
    Success,
    /// User-facing reason.
    Failure(String),
}

impl SessionState {
    pub fn name(&self) -> &'static str {
        match self {
            Self::AwaitingChallenge => "awaiting challenge",
            Self::IdentitySelection => "selecting an identity",
            Self::AwaitingRemoteDevice { .. } => "awaiting a remote device",
            Self::Signing => "signing",
            Self::Success => "finished",
            Self::Failure(_) => "failed",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Success | Self::Failure(_))
    }
}

/// A read-only view of the session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthSession {
    pub origin: Option<String>,
    pub challenge: Option<String>,
    pub username: Option<String>,
    pub selected_identity: Option<Fingerprint>,
    pub transport_kind: TransportKind,
    pub state: SessionState,
}

/// What the hosting page can offer as transports.
pub struct SessionHost {
    /// Messaging with the window that opened us, if any.
    pub opener: Option<WindowMessaging>,
    /// Top-level navigation, for callback redirects.
    pub navigator: Option<Box<dyn Navigator>>,
    /// RTC backend for peer links.
    pub connector: Arc<dyn RtcConnector>,
}

impl SessionHost {
    pub fn new(connector: Arc<dyn RtcConnector>) -> Self {
        Self {
            opener: None,
            navigator: None,
            connector,
        }
    }

    pub fn with_opener(mut self, opener: WindowMessaging) -> Self {
        self.opener = Some(opener);
        self
    }

    pub fn with_navigator(mut self, navigator: impl Navigator + 'static) -> Self {
        self.navigator = Some(Box::new(navigator));
        self
    }
}

/// Shown to the user while waiting for a second device.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteInvite {
    pub channel: String,
    /// Encode this as the scannable code.
    pub url: Url,
}

struct RemoteDevice {
    server: Option<PeerServer>,
    link: Option<PeerTransport>,
}

// ---------------------------------------------------------------------------
// Controller
// ---------------------------------------------------------------------------

/// Drives one authentication session over one transport.
pub struct AuthSessionController {
    transport: Transport,
    peer: PeerOptions,
    session_timeout: Duration,
    max_client_data_age: Duration,
    deadline: Instant,
    state: SessionState,
    /// What `state` reads as once the deadline passes unobserved.
    timed_out: SessionState,
    request: Option<AuthRequest>,
    selected: Option<Identity>,
    remote: Option<RemoteDevice>,
    cancel: CancellationToken,
}

impl AuthSessionController {
    /// A session over an already chosen transport, waiting for a request.
    pub fn new(
        transport: Transport,
        config: &SessionConfig,
        connector: Arc<dyn RtcConnector>,
    ) -> Self {
        Self::assemble(transport, config, connector, CancellationToken::new())
    }

    /// Pick the transport the context calls for (channel, then callback,
    /// then opener) and start a session on it.
    pub fn from_context(
        context: &SessionContext,
        host: SessionHost,
        config: &SessionConfig,
    ) -> Result<Self, SessionError> {
        let cancel = CancellationToken::new();
        let SessionHost {
            opener,
            navigator,
            connector,
        } = host;

        let (transport, request) = if let Some(channel) = &context.channel {
            let options = PeerOptions::from_config(config, connector.clone());
            let socket = PeerSocket::connect_with_cancel(channel.clone(), options, cancel.child_token());
            (Transport::Peer(socket), None)
        } else if let Some(callback) = &context.callback_url {
            let navigator = navigator.ok_or(SessionError::NoTransport)?;
            let request = context.callback_request()?;
            (
                Transport::Callback(CallbackRedirect::new(callback.clone(), navigator)),
                request,
            )
        } else if context.has_opener {
            let opener = opener.ok_or(SessionError::NoTransport)?;
            (Transport::Window(opener), None)
        } else {
            return Err(SessionError::NoTransport);
        };

        let mut controller = Self::assemble(transport, config, connector, cancel);
        if let Some(request) = request {
            controller.accept_request(request);
        }
        Ok(controller)
    }

    fn assemble(
        transport: Transport,
        config: &SessionConfig,
        connector: Arc<dyn RtcConnector>,
        cancel: CancellationToken,
    ) -> Self {
        info!(transport = %transport.kind(), "auth session started");
        let deadline = Instant::now() + config.session_timeout;
        spawn_deadline_timer(deadline, cancel.clone());
        Self {
            transport,
            peer: PeerOptions::from_config(config, connector),
            session_timeout: config.session_timeout,
            max_client_data_age: config.max_client_data_age,
            deadline,
            state: SessionState::AwaitingChallenge,
            timed_out: SessionState::Failure(SessionError::Timeout(config.session_timeout).to_string()),
            request: None,
            selected: None,
            remote: None,
            cancel,
        }
    }

    /// Start with the request already known, as the callback flow does.
    pub fn with_request(mut self, request: AuthRequest) -> Self {
        self.accept_request(request);
        self
    }

    fn accept_request(&mut self, request: AuthRequest) {
        info!(origin = %request.origin(), "authentication requested");
        self.request = Some(request);
        self.state = SessionState::IdentitySelection;
    }

    /// Reads as a timeout failure as soon as the deadline passes, whether
    /// or not a method has run since.
    pub fn state(&self) -> &SessionState {
        if !self.state.is_terminal() && Instant::now() >= self.deadline {
            &self.timed_out
        } else {
            &self.state
        }
    }

    pub fn transport_kind(&self) -> TransportKind {
        self.transport.kind()
    }

    pub fn request(&self) -> Option<&AuthRequest> {
        self.request.as_ref()
    }

    pub fn selected_identity(&self) -> Option<&Identity> {
        self.selected.as_ref()
    }

    /// A token that cancels the whole session when fired.
    pub fn cancellation(&self) -> CancellationToken {
        self.cancel.clone()
    }

    pub fn snapshot(&self) -> AuthSession {
        AuthSession {
            origin: self.request.as_ref().map(|r| r.origin().to_string()),
            challenge: self.request.as_ref().map(|r| r.challenge().to_string()),
            username: self
                .request
                .as_ref()
                .and_then(|r| r.username().map(str::to_string)),
            selected_identity: self.selected.as_ref().map(|i| i.id.clone()),
            transport_kind: self.transport.kind(),
            state: self.state().clone(),
        }
    }

    // -----------------------------------------------------------------------
    // Local signing
    // -----------------------------------------------------------------------

    /// Wait for the relying party's request. Returns at once if it is
    /// already known.
    pub async fn wait_for_request(&mut self) -> Result<AuthRequest, SessionError> {
        self.expire_if_due()?;
        if let Some(request) = &self.request {
            return Ok(request.clone());
        }
        self.require(
            self.state == SessionState::AwaitingChallenge,
            "wait for a request",
        )?;
        let received = within(
            self.deadline,
            self.session_timeout,
            &self.cancel,
            receive_request(&mut self.transport),
        )
        .await;
        match received {
            Ok(request) => {
                self.accept_request(request.clone());
                Ok(request)
            }
            Err(e) => Err(self.fail(e)),
        }
    }

    /// The user picked `identity`: sign the pending request with it and
    /// send the response over the session's transport.
    pub async fn approve(&mut self, identity: Identity) -> Result<SignedResponse, SessionError> {
        self.expire_if_due()?;
        self.require(
            self.state == SessionState::IdentitySelection,
            "sign",
        )?;
        if self.cancel.is_cancelled() {
            return Err(self.fail(SessionError::Cancelled));
        }
        let Some(request) = self.request.clone() else {
            return Err(SessionError::InvalidState {
                action: "sign",
                state: SessionState::AwaitingChallenge.name(),
            });
        };

        self.selected = Some(identity.clone());
        self.state = SessionState::Signing;
        let signed = match sign(&identity, request.challenge(), request.origin()) {
            Ok(signed) => signed,
            Err(e) => return Err(self.fail(e.into())),
        };
        if let Err(e) = self.transport.send(&signed.to_credential().to_json()) {
            return Err(self.fail(e.into()));
        }
        info!(
            identity = %identity.id,
            origin = %request.origin(),
            transport = %self.transport.kind(),
            "signed response sent"
        );
        self.state = SessionState::Success;
        Ok(signed)
    }

    // -----------------------------------------------------------------------
    // Second device
    // -----------------------------------------------------------------------

    /// Offer the request to a second device: bind a fresh rendezvous and,
    /// once the relay has it, return the invitation to display.
    pub async fn use_remote_device(&mut self, page_url: &Url) -> Result<RemoteInvite, SessionError> {
        self.expire_if_due()?;
        self.require(
            self.state == SessionState::IdentitySelection,
            "pair a remote device",
        )?;
        let channel = new_channel_id();
        let mut server =
            PeerServer::bind_with_cancel(channel.clone(), self.peer.clone(), self.cancel.child_token());
        self.state = SessionState::AwaitingRemoteDevice {
            channel: channel.clone(),
            connected: false,
        };

        let bound = within(self.deadline, self.session_timeout, &self.cancel, async {
            match server.next_event().await {
                Some(ServerEvent::Listening) => Ok(()),
                Some(ServerEvent::Error(e)) => Err(e.into()),
                Some(ServerEvent::Connection(_)) | None => Err(SessionError::Cancelled),
            }
        })
        .await;
        if let Err(e) = bound {
            return Err(self.remote_failed(e));
        }

        self.remote = Some(RemoteDevice {
            server: Some(server),
            link: None,
        });
        info!(channel = %channel, "waiting for a remote device");
        Ok(RemoteInvite {
            url: rendezvous_url(page_url, &channel),
            channel,
        })
    }

    /// Wait until the second device's channel is open, then hand it the
    /// request.
    pub async fn await_remote_device(&mut self) -> Result<(), SessionError> {
        self.expire_if_due()?;
        let channel = match &self.state {
            SessionState::AwaitingRemoteDevice {
                channel,
                connected: false,
            } => channel.clone(),
            _ => return Err(self.invalid("wait for a remote device")),
        };
        let Some(request) = self.request.clone() else {
            return Err(self.invalid("wait for a remote device"));
        };
        let Some(mut remote) = self.remote.take() else {
            return Err(self.invalid("wait for a remote device"));
        };

        let opened = within(self.deadline, self.session_timeout, &self.cancel, async {
            let server = remote.server.as_mut().ok_or(TransportError::Closed)?;
            let mut link = server.accept().await?;
            remote.server = None;
            wait_open(&mut link).await?;
            link.send(&request.to_json())?;
            Ok::<_, SessionError>(link)
        })
        .await;

        match opened {
            Ok(link) => {
                info!(channel = %channel, "remote device connected");
                remote.link = Some(link);
                self.remote = Some(remote);
                self.state = SessionState::AwaitingRemoteDevice {
                    channel,
                    connected: true,
                };
                Ok(())
            }
            Err(e) => Err(self.remote_failed(e)),
        }
    }

    /// Wait for the second device's signed response, check it, and relay it
    /// unchanged over the session's own transport.
    pub async fn forward_remote_response(&mut self) -> Result<VerifiedIdentity, SessionError> {
        self.expire_if_due()?;
        let connected = matches!(
            self.state,
            SessionState::AwaitingRemoteDevice {
                connected: true,
                ..
            }
        );
        self.require(connected, "forward a remote response")?;
        let Some(request) = self.request.clone() else {
            return Err(self.invalid("forward a remote response"));
        };
        let Some(mut link) = self.remote.as_mut().and_then(|r| r.link.take()) else {
            return Err(self.invalid("forward a remote response"));
        };

        let options = VerifyOptions {
            max_age: self.max_client_data_age,
            ..VerifyOptions::for_origin(request.origin())
        };
        let received = within(
            self.deadline,
            self.session_timeout,
            &self.cancel,
            receive_credential(&mut link, &request, &options),
        )
        .await;
        self.remote = None;
        link.close();

        let (raw, verified) = match received {
            Ok(received) => received,
            Err(e) if e.is_pairing_failure() => return Err(self.remote_failed(e)),
            Err(e) => return Err(self.fail(e)),
        };
        self.state = SessionState::Signing;
        if let Err(e) = self.transport.send(&raw) {
            return Err(self.fail(e.into()));
        }
        info!(identity = %verified.id, origin = %request.origin(), "remote response relayed");
        self.state = SessionState::Success;
        Ok(verified)
    }

    /// [`await_remote_device`](Self::await_remote_device) then
    /// [`forward_remote_response`](Self::forward_remote_response).
    pub async fn forward_remote(&mut self) -> Result<VerifiedIdentity, SessionError> {
        self.await_remote_device().await?;
        self.forward_remote_response().await
    }

    /// Give up on the second device and go back to picking locally.
    pub fn dismiss_remote_device(&mut self) {
        if self.expire_if_due().is_err() {
            return;
        }
        if matches!(self.state, SessionState::AwaitingRemoteDevice { .. }) {
            self.remote = None;
            self.state = SessionState::IdentitySelection;
            debug!("remote device dismissed");
        }
    }

    // -----------------------------------------------------------------------
    // Teardown
    // -----------------------------------------------------------------------

    /// Abort the session and everything it opened.
    pub fn cancel(&mut self) {
        if self.expire_if_due().is_err() {
            return;
        }
        if !self.state.is_terminal() {
            self.fail(SessionError::Cancelled);
        } else {
            self.teardown();
        }
    }

    /// After success, give the transport up to `grace` to drain (the other
    /// side usually hangs up first), then close it.
    pub async fn linger(&mut self, grace: Duration) {
        let drained = tokio::time::timeout(grace, async {
            while let Some(event) = self.transport.next_event().await {
                if event == TransportEvent::Close {
                    break;
                }
            }
        })
        .await;
        if drained.is_err() {
            debug!("transport still open after grace period");
        }
        self.teardown();
    }

    fn teardown(&mut self) {
        self.remote = None;
        self.transport.close();
        self.cancel.cancel();
    }

    fn fail(&mut self, error: SessionError) -> SessionError {
        warn!(error = %error, state = self.state.name(), "auth session failed");
        self.state = SessionState::Failure(error.to_string());
        self.teardown();
        error
    }

    /// Move to the timeout failure if the deadline passed while nobody was
    /// looking.
    fn expire_if_due(&mut self) -> Result<(), SessionError> {
        if !self.state.is_terminal() && Instant::now() >= self.deadline {
            return Err(self.fail(SessionError::Timeout(self.session_timeout)));
        }
        Ok(())
    }

    fn remote_failed(&mut self, error: SessionError) -> SessionError {
        if error.is_pairing_failure() {
            warn!(error = %error, "remote device pairing failed");
            self.remote = None;
            self.state = SessionState::IdentitySelection;
            error
        } else {
            self.fail(error)
        }
    }

    fn require(&self, ok: bool, action: &'static str) -> Result<(), SessionError> {
        if ok {
            Ok(())
        } else {
            Err(self.invalid(action))
        }
    }

    fn invalid(&self, action: &'static str) -> SessionError {
        SessionError::InvalidState {
            action,
            state: self.state.name(),
        }
    }
}

impl Drop for AuthSessionController {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

impl std::fmt::Debug for AuthSessionController {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AuthSessionController")
            .field("transport", &self.transport.kind())
            .field("state", &self.state)
            .finish_non_exhaustive()
    }
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

/// Cancel the session token at `deadline`. Everything the session opened
/// hangs off that token, so an idle session still lets go of the relay.
fn spawn_deadline_timer(deadline: Instant, cancel: CancellationToken) {
    let Ok(runtime) = tokio::runtime::Handle::try_current() else {
        debug!("no runtime; session deadline is only checked on use");
        return;
    };
    runtime.spawn(async move {
        tokio::select! {
            _ = cancel.cancelled() => {}
            _ = tokio::time::sleep_until(deadline) => {
                debug!("session deadline passed");
                cancel.cancel();
            }
        }
    });
}

/// Run `fut` under the session's deadline and cancellation.
async fn within<T>(
    deadline: Instant,
    budget: Duration,
    cancel: &CancellationToken,
    fut: impl Future<Output = Result<T, SessionError>>,
) -> Result<T, SessionError> {
    tokio::select! {
        // The deadline timer cancels too; report that as the timeout it is.
        _ = cancel.cancelled() => Err(if Instant::now() >= deadline {
            SessionError::Timeout(budget)
        } else {
            SessionError::Cancelled
        }),
        result = tokio::time::timeout_at(deadline, fut) => {
            result.unwrap_or(Err(SessionError::Timeout(budget)))
        }
    }
}

async fn receive_request(transport: &mut Transport) -> Result<AuthRequest, SessionError> {
    loop {
        match transport.next_event().await {
            Some(TransportEvent::Open) => debug!(transport = %transport.kind(), "transport open"),
            Some(TransportEvent::Message(raw)) => match AuthMessage::parse(&raw) {
                Some(AuthMessage::Request(request)) => return Ok(request),
                _ => debug!("ignoring message that isn't a request"),
            },
            Some(TransportEvent::Error(e)) => return Err(e.into()),
            Some(TransportEvent::Close) | None => return Err(TransportError::Closed.into()),
        }
    }
}

async fn wait_open(link: &mut PeerTransport) -> Result<(), SessionError> {
    match link.next_event().await {
        Some(TransportEvent::Open) => Ok(()),
        Some(TransportEvent::Error(e)) => Err(e.into()),
        _ => Err(TransportError::Closed.into()),
    }
}

async fn receive_credential(
    link: &mut PeerTransport,
    request: &AuthRequest,
    options: &VerifyOptions,
) -> Result<(String, VerifiedIdentity), SessionError> {
    loop {
        match link.next_event().await {
            Some(TransportEvent::Message(raw)) => match AuthMessage::parse(&raw) {
                Some(AuthMessage::Credential(credential)) => {
                    let verified = verify_credential(&credential, request.challenge(), options)?;
                    return Ok((raw, verified));
                }
                _ => debug!("ignoring message that isn't a credential"),
            },
            Some(TransportEvent::Open) => {}
            Some(TransportEvent::Error(e)) => return Err(e.into()),
            Some(TransportEvent::Close) | None => return Err(TransportError::Closed.into()),
        }
    }
}
