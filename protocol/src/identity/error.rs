//! Error types for identity management.
//!
//! Every identity operation that can fail returns an [`IdentityError`].

use thiserror::Error;

use super::storage::StorageError;
use crate::crypto::KeyError;

/// Errors raised while deriving, mining, loading or mutating identities.
#[derive(Debug, Error)]
pub enum IdentityError {
    /// The vanity prefix is empty, too long, or uses characters outside the
    /// base-58 alphabet. Rejected before any key is generated.
    #[error("invalid prefix {0:?}: expected 1-3 base-58 characters")]
    InvalidPrefix(String),

    /// Prefix mining was cancelled before a match was found.
    #[error("identity creation aborted")]
    Aborted,

    /// A stored or imported record claims a fingerprint its key doesn't
    /// produce. Either the storage is corrupted or somebody edited it.
    #[error("fingerprint mismatch: record claims {claimed}, key derives {derived}")]
    FingerprintMismatch {
        /// The fingerprint written in the record.
        claimed: String,
        /// The fingerprint re-derived from the private key.
        derived: String,
    },

    /// The string is not a well-formed fingerprint.
    #[error("invalid fingerprint: {0}")]
    InvalidFingerprint(String),

    /// No identity with this fingerprint exists in the store.
    #[error("identity not found: {0}")]
    NotFound(String),

    /// The key material could not be decoded or is not a valid scalar.
    #[error("invalid key material: {0}")]
    InvalidKey(#[from] KeyError),

    /// An import payload or persisted image could not be parsed.
    #[error("malformed identity record: {0}")]
    Malformed(String),

    /// The backing storage failed.
    #[error("storage error: {0}")]
    Storage(#[from] StorageError),

    /// The blocking key search task died unexpectedly.
    #[error("identity worker failed: {0}")]
    Worker(String),
}
