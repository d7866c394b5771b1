//! Errors produced while signing or verifying a challenge response.

use thiserror::Error;

use crate::crypto::KeyError;

/// Why a signed response was rejected (or couldn't be produced).
///
/// Every variant is terminal. A verifier that gets one of these must fail
/// closed; there is no "warn and continue" path.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum AuthError {
    /// The challenge inside the signed client data isn't the one issued.
    #[error("challenge mismatch: issued {expected:?}, response carries {actual:?}")]
    ChallengeMismatch { expected: String, actual: String },

    /// The client data names a different origin than the verifier expects.
    #[error("origin mismatch: expected {expected:?}, response carries {actual:?}")]
    OriginMismatch { expected: String, actual: String },

    /// The signature doesn't verify against the included public key.
    #[error("signature does not verify")]
    InvalidSignature,

    /// Some part of the response couldn't be decoded.
    #[error("malformed payload: {0}")]
    MalformedPayload(String),

    /// The client data timestamp is outside the accepted window.
    #[error("client data is stale: timestamp {timestamp_ms} is {age_ms}ms from now")]
    Stale { timestamp_ms: i64, age_ms: i64 },

    /// The claimed identity isn't the fingerprint of the included key.
    #[error("identity mismatch: response claims {claimed}, key derives {derived}")]
    IdentityMismatch { claimed: String, derived: String },

    /// The identity key failed to produce a signature.
    #[error("signing failed: {0}")]
    Signing(#[from] KeyError),
}
