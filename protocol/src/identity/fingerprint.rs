//! # Fingerprints: Identity Addresses
//!
//! A fingerprint is the one and only handle an identity has. It's derived,
//! never chosen, and it's what the rest of the system uses as a lookup key,
//! a route token, and a prefix search key:
//!
//! ```text
//! compressed public key (33 bytes)
//!     -> SHA-256 -> 32 bytes
//!     -> base-58 (Bitcoin alphabet) -> "7xKXtg2CW87d97TXJSDpbD5jBkheTqA83TZRuJosgAsU"
//! ```
//!
//! Base-58 has no `0`/`O` or `I`/`l`, so a fingerprint read aloud or copied
//! off a screen survives the trip. The derivation is versioned
//! ([`FINGERPRINT_VERSION`](crate::config::FINGERPRINT_VERSION)); version 1
//! keeps the whole digest.
//!
//! ## Vanity prefixes
//!
//! [`mine_keypair`] brute-forces fresh keys until the fingerprint starts with
//! a requested prefix. Every extra character costs ~58x more attempts and
//! there is no upper bound, so a cancellation token is mandatory.

use serde::{Deserialize, Serialize};
use std::fmt;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use super::error::IdentityError;
use crate::config::{
    BASE58_ALPHABET, FINGERPRINT_DIGEST_LENGTH, MAX_PREFIX_LENGTH, MIN_PREFIX_LENGTH,
};
use crate::crypto::{sha256, AuthKeypair, AuthPublicKey};

/// Derive the fingerprint of a public key encoding. Pure: no clock, no RNG.
pub fn fingerprint(public_key_bytes: &[u8]) -> Fingerprint {
    let digest = sha256(public_key_bytes);
    Fingerprint(bs58::encode(&digest[..FINGERPRINT_DIGEST_LENGTH]).into_string())
}

/// A base-58 encoded public key digest.
#[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Fingerprint(String);

impl Fingerprint {
    /// Fingerprint of a parsed public key.
    pub fn from_public_key(public_key: &AuthPublicKey) -> Self {
        fingerprint(public_key.as_bytes())
    }

    /// Parse a fingerprint string, checking that it decodes to a digest of
    /// the expected length.
    pub fn parse(s: &str) -> Result<Self, IdentityError> {
        let decoded = bs58::decode(s)
            .into_vec()
            .map_err(|e| IdentityError::InvalidFingerprint(e.to_string()))?;
        if decoded.len() != FINGERPRINT_DIGEST_LENGTH {
            return Err(IdentityError::InvalidFingerprint(format!(
                "expected {} digest bytes, got {}",
                FINGERPRINT_DIGEST_LENGTH,
                decoded.len()
            )));
        }
        Ok(Self(s.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// The first eight characters, the way identities are shown in lists.
    pub fn short(&self) -> &str {
        let end = self.0.len().min(8);
        &self.0[..end]
    }

    pub fn starts_with(&self, prefix: &str) -> bool {
        self.0.starts_with(prefix)
    }
}

impl fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl fmt::Debug for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Fingerprint({})", self.0)
    }
}

impl AsRef<str> for Fingerprint {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl Serialize for Fingerprint {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.0)
    }
}

impl<'de> Deserialize<'de> for Fingerprint {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        Fingerprint::parse(&s).map_err(serde::de::Error::custom)
    }
}

// ---------------------------------------------------------------------------
// Prefix mining
// ---------------------------------------------------------------------------

/// Check a vanity prefix: 1-3 characters, all from the base-58 alphabet.
pub fn validate_prefix(prefix: &str) -> Result<(), IdentityError> {
    let len = prefix.chars().count();
    let in_alphabet = prefix.chars().all(|c| BASE58_ALPHABET.contains(c));
    if !(MIN_PREFIX_LENGTH..=MAX_PREFIX_LENGTH).contains(&len) || !in_alphabet {
        return Err(IdentityError::InvalidPrefix(prefix.to_string()));
    }
    Ok(())
}

/// Generate keys until one's fingerprint starts with `prefix`.
///
/// With no prefix the first key wins. The token is checked before every
/// attempt, so a cancelled search returns [`IdentityError::Aborted`] after at
/// most one more key generation. Blocking: run it on a blocking thread.
pub fn mine_keypair(
    prefix: Option<&str>,
    cancel: &CancellationToken,
) -> Result<(AuthKeypair, Fingerprint), IdentityError> {
    if let Some(prefix) = prefix {
        validate_prefix(prefix)?;
    }

    let mut attempts: u64 = 0;
    loop {
        if cancel.is_cancelled() {
            debug!(attempts, "prefix search aborted");
            return Err(IdentityError::Aborted);
        }
        attempts += 1;

        let keypair = AuthKeypair::generate();
        let id = Fingerprint::from_public_key(&keypair.public_key());
        match prefix {
            Some(p) if !id.starts_with(p) => continue,
            _ => {
                debug!(attempts, fingerprint = %id, "identity key found");
                return Ok((keypair, id));
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fingerprint_is_deterministic() {
        let kp = AuthKeypair::from_bytes(&[9u8; 32]).unwrap();
        let a = Fingerprint::from_public_key(&kp.public_key());
        let b = fingerprint(kp.public_key().as_bytes());
        assert_eq!(a, b);
    }

    #[test]
    fn fingerprint_decodes_to_full_digest() {
        let kp = AuthKeypair::generate();
        let id = Fingerprint::from_public_key(&kp.public_key());
        let decoded = bs58::decode(id.as_str()).into_vec().unwrap();
        assert_eq!(decoded, sha256(kp.public_key().as_bytes()).to_vec());
        assert!(id.as_str().len() >= 43 && id.as_str().len() <= 44);
    }

    #[test]
    fn distinct_keys_do_not_collide() {
        let ids: std::collections::HashSet<_> = (0..64)
            .map(|_| Fingerprint::from_public_key(&AuthKeypair::generate().public_key()))
            .collect();
        assert_eq!(ids.len(), 64);
    }

    #[test]
    fn parse_rejects_wrong_length_and_alphabet() {
        assert!(Fingerprint::parse("abc").is_err());
        assert!(Fingerprint::parse("0OIl").is_err());
        let id = Fingerprint::from_public_key(&AuthKeypair::generate().public_key());
        assert_eq!(Fingerprint::parse(id.as_str()).unwrap(), id);
    }

    #[test]
    fn short_form_is_eight_characters() {
        let id = Fingerprint::from_public_key(&AuthKeypair::generate().public_key());
        assert_eq!(id.short().len(), 8);
        assert!(id.as_str().starts_with(id.short()));
    }

    #[test]
    fn serde_roundtrip_validates() {
        let id = Fingerprint::from_public_key(&AuthKeypair::generate().public_key());
        let json = serde_json::to_string(&id).unwrap();
        assert_eq!(serde_json::from_str::<Fingerprint>(&json).unwrap(), id);
        assert!(serde_json::from_str::<Fingerprint>("\"nope\"").is_err());
    }

    #[test]
    fn invalid_prefixes_are_rejected() {
        for bad in ["", "0", "O", "I", "l", "abcd", "a0", "é"] {
            assert!(
                matches!(validate_prefix(bad), Err(IdentityError::InvalidPrefix(_))),
                "prefix {:?} should be rejected",
                bad
            );
        }
        for good in ["1", "ab", "Zz9"] {
            assert!(validate_prefix(good).is_ok());
        }
    }

    #[test]
    fn invalid_prefix_rejected_before_generation() {
        // An already-cancelled token would report Aborted if generation
        // had started; InvalidPrefix proves validation runs first.
        let cancel = CancellationToken::new();
        cancel.cancel();
        assert!(matches!(
            mine_keypair(Some("0"), &cancel),
            Err(IdentityError::InvalidPrefix(_))
        ));
    }

    #[test]
    fn mining_honours_prefix() {
        let cancel = CancellationToken::new();
        let (kp, id) = mine_keypair(Some("a"), &cancel).unwrap();
        assert!(id.starts_with("a"));
        assert_eq!(id, Fingerprint::from_public_key(&kp.public_key()));
    }

    #[test]
    fn mining_honours_two_character_prefix() {
        // Full-length fingerprints lead with a low digit, so "2b" stays cheap.
        let cancel = CancellationToken::new();
        let (kp, id) = mine_keypair(Some("2b"), &cancel).unwrap();
        assert!(id.starts_with("2b"), "{id}");
        assert_eq!(id, Fingerprint::from_public_key(&kp.public_key()));
    }

    #[test]
    fn cancelled_mining_aborts() {
        let cancel = CancellationToken::new();
        cancel.cancel();
        assert!(matches!(
            mine_keypair(None, &cancel),
            Err(IdentityError::Aborted)
        ));
    }
}
