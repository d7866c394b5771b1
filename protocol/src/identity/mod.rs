//! # Identity Module
//!
//! Self-sovereign identities for WebSign. An identity is a secp256k1 secret
//! key plus an optional name; everything else about it is derived.
//!
//! The stack is layered:
//!
//! 1. **Fingerprint**: base-58 SHA-256 of the compressed public key. The
//!    identity's address, lookup key and prefix search key all at once.
//! 2. **Storage**: a string key/value interface (sled on disk, or memory)
//!    shaped like browser local storage.
//! 3. **Store**: the collection itself: create (with optional vanity prefix
//!    mining), import, rename, delete, export. The only writer of the
//!    persisted image.
//!
//! ## Design Decisions
//!
//! - Fingerprints are never trusted from storage or imports. They're always
//!   re-derived from the key, and a disagreeing claim is an error, not a
//!   correction.
//! - Prefix mining is cancellable at every attempt. There is no upper bound
//!   on how long a search takes, so there has to be a way out.

pub mod error;
pub mod fingerprint;
pub mod storage;
pub mod store;

pub use error::IdentityError;
pub use fingerprint::{fingerprint, mine_keypair, validate_prefix, Fingerprint};
pub use storage::{KeyValueStorage, MemoryStorage, SledStorage, StorageError};
pub use store::{CreateOptions, Identity, IdentityStore, StoredIdentity};
