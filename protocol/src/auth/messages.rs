//! # Handshake Wire Types
//!
//! The two JSON messages a relying party and an identity provider exchange,
//! whatever transport carries them:
//!
//! ```text
//! RP  -> IdP   {"publicKey":{"origin":"..","challenge":"..","username":".."}}
//! IdP -> RP    {"type":"public-key","name":"..","id":"..",
//!               "response":{"clientDataJSON":"..","signature":"..","publicKey":".."}}
//! ```
//!
//! The shapes deliberately echo WebAuthn's `PublicKeyCredential`, so a
//! relying party that already speaks that dialect has little to learn.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::config::CREDENTIAL_TYPE;

/// `{publicKey: {origin, challenge, username?}}`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuthRequest {
    #[serde(rename = "publicKey")]
    pub public_key: PublicKeyRequest,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PublicKeyRequest {
    pub origin: String,
    pub challenge: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub username: Option<String>,
}

impl AuthRequest {
    pub fn new(
        origin: impl Into<String>,
        challenge: impl Into<String>,
        username: Option<String>,
    ) -> Self {
        Self {
            public_key: PublicKeyRequest {
                origin: origin.into(),
                challenge: challenge.into(),
                username,
            },
        }
    }

    pub fn origin(&self) -> &str {
        &self.public_key.origin
    }

    pub fn challenge(&self) -> &str {
        &self.public_key.challenge
    }

    pub fn username(&self) -> Option<&str> {
        self.public_key.username.as_deref()
    }

    pub fn to_json(&self) -> String {
        serde_json::to_string(self).unwrap_or_default()
    }
}

/// `{type: "public-key", name?, id, response}`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PublicKeyCredential {
    #[serde(rename = "type")]
    pub credential_type: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    pub id: String,
    pub response: CredentialResponse,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CredentialResponse {
    /// The exact signed bytes, as a UTF-8 string.
    #[serde(rename = "clientDataJSON")]
    pub client_data_json: String,
    /// Base64 compact signature.
    pub signature: String,
    /// Base64 compressed public key.
    #[serde(rename = "publicKey")]
    pub public_key: String,
}

impl PublicKeyCredential {
    pub fn to_json(&self) -> String {
        serde_json::to_string(self).unwrap_or_default()
    }

    pub fn is_public_key(&self) -> bool {
        self.credential_type == CREDENTIAL_TYPE
    }
}

/// Anything that can arrive over an auth transport.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AuthMessage {
    Request(AuthRequest),
    Credential(PublicKeyCredential),
}

impl AuthMessage {
    /// Classify an incoming message.
    ///
    /// Returns `None` for anything that isn't one of the two handshake
    /// messages, including a request with an empty origin or challenge.
    /// Transports carry other traffic too; unknown messages are ignored, not
    /// errors.
    pub fn parse(raw: &str) -> Option<Self> {
        let value: Value = serde_json::from_str(raw).ok()?;
        if value.get("publicKey").map_or(false, Value::is_object) {
            let request: AuthRequest = serde_json::from_value(value).ok()?;
            if request.origin().is_empty() || request.challenge().is_empty() {
                return None;
            }
            return Some(Self::Request(request));
        }
        if value.get("type").and_then(Value::as_str) == Some(CREDENTIAL_TYPE) {
            return serde_json::from_value(value).ok().map(Self::Credential);
        }
        None
    }
}
