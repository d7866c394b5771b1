//! # Key Management
//!
//! secp256k1 keypair generation and serialization for WebSign identities.
//!
//! Every identity a user holds is exactly one secp256k1 secret scalar. The
//! public key is always re-derived from it: we never store or trust a public
//! key that came from anywhere but the secret itself.
//!
//! ## Why secp256k1?
//!
//! - It's what the browser side signs with, and an identity has to verify
//!   the same way everywhere it travels.
//! - Compact: 32-byte secrets, 33-byte compressed public keys, 64-byte
//!   compact signatures. All of it fits in a QR code with room to spare.
//! - `k256` is pure Rust, constant-time, and produces RFC 6979 deterministic
//!   nonces, so a bad RNG at signing time can't leak the key.
//!
//! ## Security considerations
//!
//! - Secrets are generated with `OsRng`.
//! - Key bytes are never logged. `Debug` prints the public key only.
//! - Signatures are normalized to low-S so that a signature and its
//!   malleated twin can't both verify.

use k256::ecdsa::signature::hazmat::{PrehashSigner, PrehashVerifier};
use k256::ecdsa::{Signature, SigningKey, VerifyingKey};
use rand::rngs::OsRng;
use std::fmt;
use std::hash::{Hash, Hasher};
use thiserror::Error;

use super::encoding::{base64_decode, base64_encode};
use crate::config::{PUBLIC_KEY_LENGTH, SECRET_KEY_LENGTH, SIGNATURE_LENGTH};

/// Errors that can occur during key operations.
///
/// Deliberately vague about *why*: error messages are a side channel too.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum KeyError {
    #[error("invalid secret key bytes: wrong length or not a valid scalar")]
    InvalidSecretKey,

    #[error("invalid public key bytes: not a valid compressed secp256k1 point")]
    InvalidPublicKey,

    #[error("invalid signature bytes: expected {SIGNATURE_LENGTH} bytes of r || s")]
    InvalidSignature,

    #[error("invalid base64 encoding")]
    InvalidEncoding,
}

/// A WebSign identity keypair.
///
/// Wraps a secp256k1 `SigningKey`. Like every private-key type in this
/// codebase, it does NOT implement `Serialize`: exporting a secret should be
/// a deliberate call to [`to_base64`](Self::to_base64), never an accident
/// of shoving a struct into `serde_json::to_string`.
///
/// # Examples
///
/// ```
/// use websign_protocol::crypto::AuthKeypair;
///
/// let kp = AuthKeypair::generate();
/// let digest = websign_protocol::crypto::sha256(b"hello");
/// let sig = kp.sign_prehash(&digest).unwrap();
/// assert!(kp.public_key().verify_prehash(&digest, &sig));
/// ```
pub struct AuthKeypair {
    signing_key: SigningKey,
}

/// The public half of an identity: a compressed SEC1 point.
#[derive(Clone, PartialEq, Eq)]
pub struct AuthPublicKey {
    bytes: [u8; PUBLIC_KEY_LENGTH],
}

/// A compact secp256k1 ECDSA signature (`r || s`, low-S).
#[derive(Clone, PartialEq, Eq)]
pub struct AuthSignature {
    bytes: [u8; SIGNATURE_LENGTH],
}

impl AuthKeypair {
    /// Generate a fresh keypair from the OS RNG.
    pub fn generate() -> Self {
        Self {
            signing_key: SigningKey::random(&mut OsRng),
        }
    }

    /// Rebuild a keypair from a raw 32-byte secret scalar.
    ///
    /// Fails for zero and for anything at or above the group order.
    pub fn from_bytes(secret: &[u8]) -> Result<Self, KeyError> {
        if secret.len() != SECRET_KEY_LENGTH {
            return Err(KeyError::InvalidSecretKey);
        }
        let signing_key = SigningKey::from_slice(secret).map_err(|_| KeyError::InvalidSecretKey)?;
        Ok(Self { signing_key })
    }

    /// Rebuild a keypair from a base64-encoded secret (the storage format).
    pub fn from_base64(encoded: &str) -> Result<Self, KeyError> {
        let bytes = base64_decode(encoded.trim()).map_err(|_| KeyError::InvalidEncoding)?;
        Self::from_bytes(&bytes)
    }

    /// Export the raw secret scalar. **Handle with care.**
    pub fn secret_key_bytes(&self) -> [u8; SECRET_KEY_LENGTH] {
        let mut out = [0u8; SECRET_KEY_LENGTH];
        out.copy_from_slice(&self.signing_key.to_bytes());
        out
    }

    /// Export the secret as base64, the format identities persist in.
    pub fn to_base64(&self) -> String {
        base64_encode(self.secret_key_bytes())
    }

    /// The compressed public key derived from the secret.
    pub fn public_key(&self) -> AuthPublicKey {
        let point = self.signing_key.verifying_key().to_encoded_point(true);
        let mut bytes = [0u8; PUBLIC_KEY_LENGTH];
        bytes.copy_from_slice(point.as_bytes());
        AuthPublicKey { bytes }
    }

    /// Sign a 32-byte digest directly (no further hashing).
    ///
    /// The signing protocol hashes the client data itself and hands us the
    /// digest, so this is prehash signing, not message signing.
    pub fn sign_prehash(&self, digest: &[u8; 32]) -> Result<AuthSignature, KeyError> {
        let signature: Signature = self
            .signing_key
            .sign_prehash(digest)
            .map_err(|_| KeyError::InvalidSecretKey)?;
        let signature = signature.normalize_s().unwrap_or(signature);
        let mut bytes = [0u8; SIGNATURE_LENGTH];
        bytes.copy_from_slice(&signature.to_bytes());
        Ok(AuthSignature { bytes })
    }
}

impl Clone for AuthKeypair {
    /// Allowed, but every copy of a secret is one more thing to protect.
    fn clone(&self) -> Self {
        Self {
            signing_key: self.signing_key.clone(),
        }
    }
}

impl fmt::Debug for AuthKeypair {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "AuthKeypair(pub={})", self.public_key().to_hex())
    }
}

impl PartialEq for AuthKeypair {
    /// Compares public keys. Comparing secrets in non-constant time is a
    /// habit we don't want anywhere near this file.
    fn eq(&self, other: &Self) -> bool {
        self.public_key() == other.public_key()
    }
}

impl Eq for AuthKeypair {}

// ---------------------------------------------------------------------------
// AuthPublicKey
// ---------------------------------------------------------------------------

impl AuthPublicKey {
    /// Parse a compressed SEC1 public key, validating the curve point.
    pub fn try_from_slice(slice: &[u8]) -> Result<Self, KeyError> {
        if slice.len() != PUBLIC_KEY_LENGTH {
            return Err(KeyError::InvalidPublicKey);
        }
        VerifyingKey::from_sec1_bytes(slice).map_err(|_| KeyError::InvalidPublicKey)?;
        let mut bytes = [0u8; PUBLIC_KEY_LENGTH];
        bytes.copy_from_slice(slice);
        Ok(Self { bytes })
    }

    /// Parse a base64-encoded compressed public key.
    pub fn from_base64(encoded: &str) -> Result<Self, KeyError> {
        let bytes = base64_decode(encoded).map_err(|_| KeyError::InvalidEncoding)?;
        Self::try_from_slice(&bytes)
    }

    /// Raw compressed bytes.
    pub fn as_bytes(&self) -> &[u8; PUBLIC_KEY_LENGTH] {
        &self.bytes
    }

    pub fn to_base64(&self) -> String {
        base64_encode(self.bytes)
    }

    pub fn to_hex(&self) -> String {
        hex::encode(self.bytes)
    }

    /// Verify a signature over a 32-byte digest.
    ///
    /// A boolean, not a `Result`: callers want yes or no, and the reason a
    /// signature failed is nobody's business.
    pub fn verify_prehash(&self, digest: &[u8; 32], signature: &AuthSignature) -> bool {
        let Ok(verifying_key) = VerifyingKey::from_sec1_bytes(&self.bytes) else {
            return false;
        };
        let Ok(signature) = Signature::from_slice(&signature.bytes) else {
            return false;
        };
        verifying_key.verify_prehash(digest, &signature).is_ok()
    }
}

impl Hash for AuthPublicKey {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.bytes.hash(state);
    }
}

impl fmt::Display for AuthPublicKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_hex())
    }
}

impl fmt::Debug for AuthPublicKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "AuthPublicKey({})", &self.to_hex()[..16])
    }
}

// ---------------------------------------------------------------------------
// AuthSignature
// ---------------------------------------------------------------------------

impl AuthSignature {
    /// Accept exactly 64 bytes. Whether they form a valid signature is the
    /// verifier's problem, not the parser's.
    pub fn try_from_slice(slice: &[u8]) -> Result<Self, KeyError> {
        let bytes: [u8; SIGNATURE_LENGTH] =
            slice.try_into().map_err(|_| KeyError::InvalidSignature)?;
        Ok(Self { bytes })
    }

    pub fn from_base64(encoded: &str) -> Result<Self, KeyError> {
        let bytes = base64_decode(encoded).map_err(|_| KeyError::InvalidEncoding)?;
        Self::try_from_slice(&bytes)
    }

    pub fn as_bytes(&self) -> &[u8; SIGNATURE_LENGTH] {
        &self.bytes
    }

    pub fn to_base64(&self) -> String {
        base64_encode(self.bytes)
    }
}

impl fmt::Debug for AuthSignature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let hex_str = hex::encode(self.bytes);
        write!(f, "AuthSignature({}...{})", &hex_str[..8], &hex_str[120..])
    }
}
