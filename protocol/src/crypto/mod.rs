//! # Cryptographic Primitives for WebSign
//!
//! Everything security-related in the protocol bottoms out here: the
//! identity keypair, the one hash function we use, and the encodings keys
//! and signatures travel in.
//!
//! - **secp256k1 ECDSA** for signatures (`k256`), always over a SHA-256
//!   prehash, always compact and low-S.
//! - **SHA-256** for client data digests and fingerprints.
//! - **base64** for anything binary that crosses a process boundary.
//!
//! ## A note on "rolling your own crypto"
//!
//! We don't. Everything here is a thin, type-safe wrapper around audited
//! implementations. If you're tempted to optimize these functions, please
//! reconsider.

pub mod encoding;
pub mod hash;
pub mod keys;

pub use encoding::{base64_decode, base64_encode, normalize_challenge};
pub use hash::{sha256, sha256_hex};
pub use keys::{AuthKeypair, AuthPublicKey, AuthSignature, KeyError};
