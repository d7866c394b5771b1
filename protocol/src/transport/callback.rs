//! # Callback Redirect
//!
//! The one-way transport: the identity provider hands its single response to
//! the relying party by navigating to `callback_url?sign=<response>`. There
//! is no inbound direction and nothing after the first send, because the
//! page is gone.

use tokio::sync::mpsc;
use tracing::info;
use url::Url;

use super::error::TransportError;
use super::TransportEvent;

/// Query parameter carrying the response.
pub const CALLBACK_PARAM: &str = "sign";

/// Performs a top-level navigation.
pub trait Navigator: Send + Sync {
    fn navigate(&self, url: Url) -> Result<(), TransportError>;
}

impl Navigator for mpsc::UnboundedSender<Url> {
    fn navigate(&self, url: Url) -> Result<(), TransportError> {
        self.send(url)
            .map_err(|_| TransportError::Navigation("navigator is gone".into()))
    }
}

impl Navigator for Box<dyn Navigator> {
    fn navigate(&self, url: Url) -> Result<(), TransportError> {
        (**self).navigate(url)
    }
}

/// Build `callback_url` with `sign=<data>` appended, preserving any query
/// the relying party already put there.
pub fn callback_location(callback_url: &Url, data: &str) -> Url {
    let mut url = callback_url.clone();
    url.query_pairs_mut().append_pair(CALLBACK_PARAM, data);
    url
}

/// Sends once by redirecting to the relying party's callback URL.
pub struct CallbackRedirect {
    callback_url: Url,
    navigator: Box<dyn Navigator>,
    opened: bool,
    done: bool,
    close_reported: bool,
}

impl CallbackRedirect {
    pub fn new(callback_url: Url, navigator: impl Navigator + 'static) -> Self {
        Self {
            callback_url,
            navigator: Box::new(navigator),
            opened: false,
            done: false,
            close_reported: false,
        }
    }

    /// Parse `callback_url` first. A malformed one is a navigation failure.
    pub fn parse(callback_url: &str, navigator: impl Navigator + 'static) -> Result<Self, TransportError> {
        let url = Url::parse(callback_url)
            .map_err(|e| TransportError::Navigation(format!("bad callback url: {e}")))?;
        Ok(Self::new(url, navigator))
    }

    pub fn callback_url(&self) -> &Url {
        &self.callback_url
    }

    pub fn send(&mut self, data: &str) -> Result<(), TransportError> {
        if self.done {
            return Err(TransportError::AlreadySent);
        }
        let location = callback_location(&self.callback_url, data);
        info!(host = location.host_str().unwrap_or(""), "redirecting to callback");
        self.navigator.navigate(location)?;
        self.done = true;
        Ok(())
    }

    pub fn close(&mut self) {
        self.done = true;
    }

    /// `Open` once, then `Close` after the send (or close). Never a message.
    pub async fn next_event(&mut self) -> Option<TransportEvent> {
        if !self.opened {
            self.opened = true;
            return Some(TransportEvent::Open);
        }
        if self.done {
            if self.close_reported {
                return None;
            }
            self.close_reported = true;
            return Some(TransportEvent::Close);
        }
        std::future::pending().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn appends_sign_param() {
        let base = Url::parse("https://rp.example/cb?state=xyz").unwrap();
        let url = callback_location(&base, r#"{"a":"b c"}"#);
        let pairs: Vec<_> = url.query_pairs().into_owned().collect();
        assert_eq!(pairs[0], ("state".to_string(), "xyz".to_string()));
        assert_eq!(pairs[1], ("sign".to_string(), r#"{"a":"b c"}"#.to_string()));
    }

    #[tokio::test]
    async fn sends_exactly_once() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let mut transport = CallbackRedirect::parse("https://rp.example/cb", tx).unwrap();
        assert_eq!(transport.next_event().await, Some(TransportEvent::Open));

        transport.send("payload").unwrap();
        let navigated = rx.recv().await.unwrap();
        assert_eq!(navigated.as_str(), "https://rp.example/cb?sign=payload");

        assert_eq!(transport.send("again"), Err(TransportError::AlreadySent));
        assert_eq!(transport.next_event().await, Some(TransportEvent::Close));
        assert_eq!(transport.next_event().await, None);
    }

    #[test]
    fn rejects_malformed_callback() {
        let (tx, _rx) = mpsc::unbounded_channel();
        assert!(matches!(
            CallbackRedirect::parse("not a url", tx),
            Err(TransportError::Navigation(_))
        ));
    }

    #[test]
    fn failed_navigation_can_retry() {
        let (tx, rx) = mpsc::unbounded_channel();
        drop(rx);
        let mut transport = CallbackRedirect::parse("https://rp.example/cb", tx).unwrap();
        assert!(matches!(transport.send("x"), Err(TransportError::Navigation(_))));
        assert!(matches!(transport.send("x"), Err(TransportError::Navigation(_))));
    }
}
