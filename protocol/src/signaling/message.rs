//! # Relay Wire Protocol
//!
//! Every frame on a relay WebSocket is one JSON object tagged by `type`:
//!
//! | `type`        | Direction      | Fields              |
//! |---------------|----------------|---------------------|
//! | `createTopic` | client → relay | `name`              |
//! | `consume`     | client → relay | `topic` (optional)  |
//! | `produce`     | client → relay | `topic`, `message`  |
//! | `message`     | relay → client | `data`              |
//! | `error`       | relay → client | `data`              |
//!
//! `produce.message` and `message.data` are opaque strings to the relay. Peers
//! put a second JSON document in there, a [`PeerSignal`], carrying the SDP.

use serde::{Deserialize, Serialize};

use super::error::SignalingError;

/// One relay frame.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum RelayMessage {
    /// Register a mailbox owned by this connection.
    CreateTopic { name: String },
    /// Subscribe to a mailbox. Without a topic: drop every subscription.
    Consume {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        topic: Option<String>,
    },
    /// Deliver `message` into a mailbox.
    Produce { topic: String, message: String },
    /// A delivered payload.
    Message { data: String },
    /// Relay-level failure, e.g. `"Topic not found"`.
    Error { data: String },
}

impl RelayMessage {
    pub fn create_topic(name: impl Into<String>) -> Self {
        Self::CreateTopic { name: name.into() }
    }

    pub fn consume(topic: impl Into<String>) -> Self {
        Self::Consume {
            topic: Some(topic.into()),
        }
    }

    pub fn unsubscribe_all() -> Self {
        Self::Consume { topic: None }
    }

    pub fn produce(topic: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Produce {
            topic: topic.into(),
            message: message.into(),
        }
    }

    pub fn error(data: impl Into<String>) -> Self {
        Self::Error { data: data.into() }
    }

    pub fn to_json(&self) -> String {
        serde_json::to_string(self).unwrap_or_default()
    }

    pub fn parse(raw: &str) -> Result<Self, SignalingError> {
        serde_json::from_str(raw).map_err(|e| SignalingError::Protocol(e.to_string()))
    }
}

/// The SDP exchange riding inside relay payloads.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum PeerSignal {
    /// Initiator → responder. `peer_id` is the initiator's reply topic.
    Offer {
        #[serde(rename = "peerId")]
        peer_id: String,
        offer: String,
    },
    /// Responder → initiator.
    Answer { answer: String },
}

impl PeerSignal {
    pub fn to_json(&self) -> String {
        serde_json::to_string(self).unwrap_or_default()
    }

    pub fn parse(raw: &str) -> Result<Self, SignalingError> {
        serde_json::from_str(raw).map_err(|e| SignalingError::Protocol(e.to_string()))
    }
}
