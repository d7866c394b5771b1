//! Byte/text encodings shared by keys, signatures and wire messages.
//!
//! Secrets, public keys and signatures travel as standard (padded) base64,
//! which is what `btoa` produces on the browser side. Challenges sometimes
//! arrive through a query string in the URL-safe alphabet, so we normalize
//! those back before treating them as opaque strings.

use base64::engine::general_purpose::STANDARD;
use base64::Engine;

pub use base64::DecodeError;

/// Standard base64 with padding.
pub fn base64_encode(data: impl AsRef<[u8]>) -> String {
    STANDARD.encode(data)
}

/// Decode standard base64 with padding.
pub fn base64_decode(encoded: &str) -> Result<Vec<u8>, DecodeError> {
    STANDARD.decode(encoded)
}

/// Map a URL-safe base64 challenge back onto the standard alphabet.
///
/// Only the two differing characters are touched; everything else,
/// including padding, passes through as-is.
pub fn normalize_challenge(raw: &str) -> String {
    raw.chars()
        .map(|c| match c {
            '-' => '+',
            '_' => '/',
            other => other,
        })
        .collect()
}
