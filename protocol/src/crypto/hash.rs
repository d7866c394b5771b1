//! # Hashing Utilities
//!
//! SHA-256, and only SHA-256. Both things this crate hashes have to match
//! byte-for-byte with what a browser computes through `crypto.subtle`:
//!
//! - **Client data**: the signing protocol hashes the serialized
//!   `clientDataJSON` and signs the digest.
//! - **Fingerprints**: an identity's address is the digest of its
//!   compressed public key.
//!
//! There is no reason to offer a second hash function here, and every
//! reason not to: a verifier that picks the wrong one fails closed, which is
//! correct, and confusing, which is not.

use sha2::{Digest, Sha256};

/// Compute the SHA-256 digest of `data` as a fixed-size array.
///
/// # Example
///
/// ```
/// use websign_protocol::crypto::sha256;
///
/// let hash = sha256(b"websign");
/// assert_eq!(hash.len(), 32);
/// ```
pub fn sha256(data: &[u8]) -> [u8; 32] {
    let mut hasher = Sha256::new();
    hasher.update(data);
    let mut output = [0u8; 32];
    output.copy_from_slice(&hasher.finalize());
    output
}

/// SHA-256 rendered as lowercase hex. For logs and test vectors.
pub fn sha256_hex(data: &[u8]) -> String {
    hex::encode(sha256(data))
}
