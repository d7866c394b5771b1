//! Relying-party challenges.

use rand::rngs::OsRng;
use rand::RngCore;
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::config::CHALLENGE_LENGTH;
use crate::crypto::{base64_encode, normalize_challenge};

/// An opaque, base64-encoded nonce issued by a relying party.
///
/// The signer never interprets it. Freshness is the issuer's job: a
/// challenge is good for exactly one session.
#[derive(Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Challenge(String);

impl Challenge {
    /// 32 fresh random bytes from the OS RNG.
    pub fn generate() -> Self {
        let mut bytes = [0u8; CHALLENGE_LENGTH];
        OsRng.fill_bytes(&mut bytes);
        Self(base64_encode(bytes))
    }

    /// Wrap a challenge string exactly as received.
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    /// Accept a challenge from a query string, undoing the URL-safe alphabet.
    pub fn from_query(raw: &str) -> Self {
        Self(normalize_challenge(raw))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn into_string(self) -> String {
        self.0
    }
}

impl fmt::Display for Challenge {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl fmt::Debug for Challenge {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Challenge({})", self.0)
    }
}

impl From<&str> for Challenge {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}
