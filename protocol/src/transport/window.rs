//! # Window Messaging
//!
//! The opener/popup channel: the relying party opens the identity provider
//! in a new window and the two talk through `postMessage`.
//!
//! This module models that primitive in-process. A [`WindowRegistry`] plays
//! the browser: every [`Window`] has an id and an origin, and a post is
//! delivered only if the target's origin matches the `target_origin` the
//! sender insisted on. Receivers see the platform-attested source window and
//! origin, never a claim from the payload.
//!
//! [`WindowMessaging`] wraps one window and its known counterpart:
//!
//! - incoming messages from any other source are dropped (cross-tab
//!   spoofing);
//! - outgoing posts are restricted to the counterpart's origin, learned from
//!   its first message when it isn't pinned up front. Nothing is ever posted
//!   to `*`.

use dashmap::DashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, trace};

use super::error::TransportError;
use super::TransportEvent;

/// Identifies a window within one registry.
pub type WindowId = u64;

/// One delivered `postMessage`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WindowMessage {
    /// Platform-attested sender window.
    pub source: WindowId,
    /// Platform-attested sender origin.
    pub origin: String,
    pub data: String,
}

struct WindowEntry {
    origin: String,
    inbox: mpsc::UnboundedSender<WindowMessage>,
}

/// The set of windows that can message each other.
#[derive(Default)]
pub struct WindowRegistry {
    windows: DashMap<WindowId, WindowEntry>,
    next_id: AtomicU64,
}

impl WindowRegistry {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Open a window at `origin`.
    pub fn open(self: &Arc<Self>, origin: impl Into<String>) -> Window {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed) + 1;
        let origin = origin.into();
        let (tx, rx) = mpsc::unbounded_channel();
        self.windows.insert(
            id,
            WindowEntry {
                origin: origin.clone(),
                inbox: tx,
            },
        );
        Window {
            id,
            origin,
            inbox: rx,
            registry: self.clone(),
        }
    }

    fn post(
        &self,
        source: &Window,
        target: WindowId,
        data: &str,
        target_origin: &str,
    ) -> Result<(), TransportError> {
        let entry = self
            .windows
            .get(&target)
            .ok_or(TransportError::CounterpartGone)?;
        if target_origin != "*" && target_origin != entry.origin {
            // Browsers drop these silently; so do we.
            debug!(target, target_origin, "post dropped: origin mismatch");
            return Ok(());
        }
        entry
            .inbox
            .send(WindowMessage {
                source: source.id,
                origin: source.origin.clone(),
                data: data.to_string(),
            })
            .map_err(|_| TransportError::CounterpartGone)
    }
}

/// A browsing context. Dropping it closes the window.
pub struct Window {
    id: WindowId,
    origin: String,
    inbox: mpsc::UnboundedReceiver<WindowMessage>,
    registry: Arc<WindowRegistry>,
}

impl Window {
    pub fn id(&self) -> WindowId {
        self.id
    }

    pub fn origin(&self) -> &str {
        &self.origin
    }

    /// `postMessage(data, target_origin)` to another window.
    pub fn post_message(
        &self,
        target: WindowId,
        data: &str,
        target_origin: &str,
    ) -> Result<(), TransportError> {
        self.registry.post(self, target, data, target_origin)
    }

    /// Next message delivered to this window, from anyone.
    pub async fn recv(&mut self) -> Option<WindowMessage> {
        self.inbox.recv().await
    }

    /// A message if one is already waiting.
    pub fn try_recv(&mut self) -> Option<WindowMessage> {
        self.inbox.try_recv().ok()
    }
}

impl Drop for Window {
    fn drop(&mut self) {
        self.registry.windows.remove(&self.id);
    }
}

/// A transport over a window and its opener (or parent).
pub struct WindowMessaging {
    window: Window,
    counterpart: WindowId,
    counterpart_origin: Option<String>,
    opened: bool,
    closed: bool,
    close_reported: bool,
}

impl WindowMessaging {
    /// Talk to `counterpart`. With `expected_origin`, only messages from
    /// that origin are accepted and posts go only there; without it, the
    /// origin of the counterpart's first message is pinned.
    pub fn new(window: Window, counterpart: WindowId, expected_origin: Option<String>) -> Self {
        Self {
            window,
            counterpart,
            counterpart_origin: expected_origin,
            opened: false,
            closed: false,
            close_reported: false,
        }
    }

    pub fn counterpart_origin(&self) -> Option<&str> {
        self.counterpart_origin.as_deref()
    }

    pub fn send(&mut self, data: &str) -> Result<(), TransportError> {
        if self.closed {
            return Err(TransportError::Closed);
        }
        let origin = self
            .counterpart_origin
            .as_deref()
            .ok_or(TransportError::UnknownOrigin)?;
        self.window.post_message(self.counterpart, data, origin)
    }

    pub fn close(&mut self) {
        self.closed = true;
    }

    pub async fn next_event(&mut self) -> Option<TransportEvent> {
        if !self.opened {
            self.opened = true;
            return Some(TransportEvent::Open);
        }
        loop {
            if self.closed {
                if self.close_reported {
                    return None;
                }
                self.close_reported = true;
                return Some(TransportEvent::Close);
            }
            let Some(message) = self.window.recv().await else {
                self.closed = true;
                continue;
            };
            if message.source != self.counterpart {
                trace!(source = message.source, "ignoring message from foreign window");
                continue;
            }
            match self.counterpart_origin.as_deref() {
                Some(expected) if expected != message.origin => {
                    trace!(origin = %message.origin, "ignoring message from unexpected origin");
                    continue;
                }
                Some(_) => {}
                None => {
                    debug!(origin = %message.origin, "counterpart origin pinned");
                    self.counterpart_origin = Some(message.origin.clone());
                }
            }
            return Some(TransportEvent::Message(message.data));
        }
    }
}
