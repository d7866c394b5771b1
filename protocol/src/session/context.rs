//! # Session Context
//!
//! What the identity provider page learns from how it was opened. Three
//! query parameters and one fact about the window decide everything:
//!
//! | Signal         | Means                                              |
//! |----------------|----------------------------------------------------|
//! | `channel`      | we are the second device; dial the rendezvous      |
//! | `callback_url` | answer by redirecting there (`challenge` required) |
//! | an opener      | answer the window that opened us                   |
//!
//! First match wins, in that order.

use url::Url;

use super::error::SessionError;
use crate::auth::{AuthRequest, Challenge};
use crate::config::CHANNEL_ID_LENGTH;
use crate::transport::TransportKind;

pub const CHALLENGE_PARAM: &str = "challenge";
pub const CALLBACK_URL_PARAM: &str = "callback_url";
pub const CHANNEL_PARAM: &str = "channel";

/// The signals present when a session starts.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct SessionContext {
    /// Normalized from URL-safe base64.
    pub challenge: Option<Challenge>,
    pub callback_url: Option<Url>,
    pub channel: Option<String>,
    pub has_opener: bool,
}

impl SessionContext {
    /// Read the signals off the page URL.
    pub fn from_url(url: &Url, has_opener: bool) -> Result<Self, SessionError> {
        let mut context = Self {
            has_opener,
            ..Self::default()
        };
        for (key, value) in url.query_pairs() {
            if value.is_empty() {
                continue;
            }
            match key.as_ref() {
                CHALLENGE_PARAM => context.challenge = Some(Challenge::from_query(&value)),
                CALLBACK_URL_PARAM => {
                    let callback = Url::parse(&value).map_err(|e| {
                        SessionError::InvalidContext(format!("callback_url: {e}"))
                    })?;
                    context.callback_url = Some(callback);
                }
                CHANNEL_PARAM => context.channel = Some(value.into_owned()),
                _ => {}
            }
        }
        Ok(context)
    }

    /// The transport this context calls for, by priority.
    pub fn transport_kind(&self) -> Option<TransportKind> {
        if self.channel.is_some() {
            Some(TransportKind::PeerChannel)
        } else if self.callback_url.is_some() {
            Some(TransportKind::CallbackRedirect)
        } else if self.has_opener {
            Some(TransportKind::WindowMessaging)
        } else {
            None
        }
    }

    /// The callback flow carries its whole request in the URL: the origin
    /// is the callback's, the challenge is the query's.
    pub fn callback_request(&self) -> Result<Option<AuthRequest>, SessionError> {
        let Some(callback) = &self.callback_url else {
            return Ok(None);
        };
        let challenge = self.challenge.as_ref().ok_or_else(|| {
            SessionError::InvalidContext("callback_url given without a challenge".into())
        })?;
        let origin = callback.origin();
        if !origin.is_tuple() {
            return Err(SessionError::InvalidContext(format!(
                "callback_url has an opaque origin: {callback}"
            )));
        }
        Ok(Some(AuthRequest::new(
            origin.ascii_serialization(),
            challenge.as_str(),
            None,
        )))
    }
}

/// A fresh rendezvous channel id: base-58 of 16 random bytes.
pub fn new_channel_id() -> String {
    let bytes: [u8; CHANNEL_ID_LENGTH] = rand::random();
    bs58::encode(bytes).into_string()
}

/// The link a second device opens: this page with every query parameter
/// replaced by `channel=<id>`.
pub fn rendezvous_url(page_url: &Url, channel: &str) -> Url {
    let mut url = page_url.clone();
    url.set_query(None);
    url.set_fragment(None);
    url.query_pairs_mut().append_pair(CHANNEL_PARAM, channel);
    url
}
