//! # Second Device
//!
//! `websign pair`: join a browser session's rendezvous channel, receive its
//! request, and answer it with a local identity. The browser checks the
//! response and forwards it to the relying party; nothing here talks to the
//! relying party directly.

use anyhow::{bail, Context, Result};
use std::io::Write;
use std::sync::Arc;
use std::time::Duration;

use websign_protocol::auth::{AuthRequest, SignedResponse};
use websign_protocol::config::{RtcConfig, SessionConfig, TurnServerSetting};
use websign_protocol::identity::{Identity, KeyValueStorage};
use websign_protocol::session::{AuthSessionController, SessionContext, SessionHost};
use websign_protocol::signaling::RtcConnector;

use crate::cli::PairArgs;

/// How long to keep the link up after answering, so the response is
/// delivered before we hang up.
const LINGER: Duration = Duration::from_secs(2);

/// Decides whether to answer a request.
pub trait Confirm: Send {
    fn confirm(&mut self, request: &AuthRequest, identity: &Identity) -> Result<bool>;
}

/// Asks on the terminal.
pub struct Prompt;

impl Confirm for Prompt {
    fn confirm(&mut self, request: &AuthRequest, identity: &Identity) -> Result<bool> {
        let mut stderr = std::io::stderr();
        match request.username() {
            Some(user) => write!(
                stderr,
                "Sign in to {} as {} (requested user: {user})? [y/N] ",
                request.origin(),
                identity.display_name()
            )?,
            None => write!(
                stderr,
                "Sign in to {} as {}? [y/N] ",
                request.origin(),
                identity.display_name()
            )?,
        }
        stderr.flush()?;
        let mut answer = String::new();
        std::io::stdin()
            .read_line(&mut answer)
            .context("failed to read confirmation")?;
        Ok(matches!(answer.trim(), "y" | "Y" | "yes"))
    }
}

/// Answers yes. For `--yes`.
pub struct AlwaysYes;

impl Confirm for AlwaysYes {
    fn confirm(&mut self, _request: &AuthRequest, _identity: &Identity) -> Result<bool> {
        Ok(true)
    }
}

/// Session settings for a pairing: the relay from the flags, ICE servers
/// from the persisted TURN preference.
pub fn session_config(args: &PairArgs, storage: &dyn KeyValueStorage) -> Result<SessionConfig> {
    let turn = TurnServerSetting::load(storage).context("failed to read TURN setting")?;
    Ok(SessionConfig {
        relay_endpoint: args.relay.clone(),
        rtc: RtcConfig::with_turn(&turn),
        session_timeout: Duration::from_secs(args.timeout_secs),
        ..SessionConfig::default()
    })
}

/// Join `channel`, wait for the request, and sign it with `identity` once
/// `confirm` agrees.
pub async fn pair(
    channel: &str,
    identity: Identity,
    config: &SessionConfig,
    connector: Arc<dyn RtcConnector>,
    mut confirm: impl Confirm + 'static,
) -> Result<SignedResponse> {
    let context = SessionContext {
        channel: Some(channel.to_string()),
        ..SessionContext::default()
    };
    let mut session =
        AuthSessionController::from_context(&context, SessionHost::new(connector), config)?;
    tracing::info!(channel, relay = %config.relay_endpoint, "waiting for the browser session");

    let request = session
        .wait_for_request()
        .await
        .context("no request from the browser session")?;
    tracing::info!(origin = %request.origin(), "request received");

    let asked = identity.clone();
    let confirmed = tokio::task::spawn_blocking(move || confirm.confirm(&request, &asked))
        .await
        .context("confirmation prompt panicked")??;
    if !confirmed {
        session.cancel();
        bail!("declined");
    }

    let signed = session.approve(identity).await?;
    session.linger(LINGER).await;
    Ok(signed)
}

#[cfg(test)]
mod tests {
    use super::*;
    use websign_protocol::auth::{verify_credential, AuthMessage, Challenge, VerifyOptions};
    use websign_protocol::crypto::AuthKeypair;
    use websign_protocol::identity::MemoryStorage;
    use websign_protocol::signaling::{
        relay_router, LoopbackConnector, PeerOptions, PeerServer, RelayHub, ServerEvent,
    };
    use websign_protocol::transport::TransportEvent;

    struct No;

    impl Confirm for No {
        fn confirm(&mut self, _: &AuthRequest, _: &Identity) -> Result<bool> {
            Ok(false)
        }
    }

    async fn spawn_relay() -> (String, Arc<RelayHub>) {
        let hub = Arc::new(RelayHub::new());
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let app = relay_router(hub.clone());
        tokio::spawn(async move { axum::serve(listener, app).await.unwrap() });
        (format!("ws://{addr}/signal"), hub)
    }

    async fn listening_server(
        endpoint: &str,
        hub: &RelayHub,
        connector: &LoopbackConnector,
        channel: &str,
    ) -> PeerServer {
        let mut options = PeerOptions::new(Arc::new(connector.clone()));
        options.endpoint = endpoint.to_string();
        options.ice_gather_timeout = Duration::from_millis(100);
        let mut server = PeerServer::bind(channel, options);
        assert!(matches!(server.next_event().await, Some(ServerEvent::Listening)));
        while hub.stats().topics == 0 {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        server
    }

    fn config(endpoint: &str) -> SessionConfig {
        SessionConfig {
            relay_endpoint: endpoint.to_string(),
            ice_gather_timeout: Duration::from_millis(100),
            session_timeout: Duration::from_secs(10),
            ..SessionConfig::default()
        }
    }

    #[test]
    fn turn_setting_reaches_the_ice_servers() {
        let storage = MemoryStorage::new();
        TurnServerSetting::Turn {
            url: "turn:turn.example:3478".into(),
            username: "u".into(),
            password: "p".into(),
        }
        .save(&storage)
        .unwrap();
        let args = PairArgs {
            channel: "c".into(),
            identity: "i".into(),
            relay: "ws://relay.example/signal".into(),
            timeout_secs: 30,
            yes: true,
        };
        let config = session_config(&args, &storage).unwrap();
        assert_eq!(config.relay_endpoint, "ws://relay.example/signal");
        assert_eq!(config.session_timeout, Duration::from_secs(30));
        assert!(config
            .rtc
            .ice_servers
            .iter()
            .any(|s| s.urls == ["turn:turn.example:3478"] && s.username.as_deref() == Some("u")));
    }

    #[tokio::test]
    async fn pairing_answers_the_browser() {
        let (endpoint, hub) = spawn_relay().await;
        let connector = LoopbackConnector::new();
        let mut server = listening_server(&endpoint, &hub, &connector, "desk-1").await;

        let identity = Identity::from_keypair(AuthKeypair::generate(), Some("cli".into()));
        let expected = identity.id.clone();
        let cfg = config(&endpoint);
        let device = tokio::spawn({
            let connector: Arc<dyn RtcConnector> = Arc::new(connector.clone());
            async move { pair("desk-1", identity, &cfg, connector, AlwaysYes).await }
        });

        let mut link = server.accept().await.unwrap();
        assert_eq!(link.next_event().await, Some(TransportEvent::Open));
        let challenge = Challenge::generate();
        let request = AuthRequest::new("https://shop.example", challenge.as_str(), None);
        link.send(&request.to_json()).unwrap();

        let Some(TransportEvent::Message(raw)) = link.next_event().await else {
            panic!("expected the credential");
        };
        let Some(AuthMessage::Credential(credential)) = AuthMessage::parse(&raw) else {
            panic!("not a credential: {raw}");
        };
        let verified = verify_credential(
            &credential,
            challenge.as_str(),
            &VerifyOptions::for_origin("https://shop.example"),
        )
        .unwrap();
        assert_eq!(verified.id, expected);

        link.close();
        let signed = device.await.unwrap().unwrap();
        assert_eq!(signed.identity_id, expected.to_string());
    }

    #[tokio::test]
    async fn declining_sends_nothing() {
        let (endpoint, hub) = spawn_relay().await;
        let connector = LoopbackConnector::new();
        let mut server = listening_server(&endpoint, &hub, &connector, "desk-2").await;

        let identity = Identity::from_keypair(AuthKeypair::generate(), None);
        let cfg = config(&endpoint);
        let device = tokio::spawn({
            let connector: Arc<dyn RtcConnector> = Arc::new(connector.clone());
            async move { pair("desk-2", identity, &cfg, connector, No).await }
        });

        let mut link = server.accept().await.unwrap();
        assert_eq!(link.next_event().await, Some(TransportEvent::Open));
        let request = AuthRequest::new("https://shop.example", Challenge::generate().as_str(), None);
        link.send(&request.to_json()).unwrap();

        let err = device.await.unwrap().unwrap_err();
        assert_eq!(err.to_string(), "declined");
        // The device hung up without answering.
        assert_eq!(link.next_event().await, Some(TransportEvent::Close));
    }
}
