//! # Auth Module
//!
//! The challenge-response exchange itself, independent of how the messages
//! travel.
//!
//! ```text
//! challenge.rs  : relying-party nonces
//! client_data.rs: the canonical {challenge, origin, timestamp} payload
//! messages.rs   : AuthRequest / PublicKeyCredential wire types
//! signing.rs    : sign, verify, verify_credential
//! error.rs      : AuthError
//! ```
//!
//! ## Design Decisions
//!
//! - One scheme only: secp256k1 ECDSA over SHA-256 of `clientDataJSON`.
//!   Verifiers and signers from different schemes never mix.
//! - The signature covers the serialized client data, never the raw
//!   challenge, so a response is bound to one origin and one moment.
//! - Verification fails closed on the first failing check.

pub mod challenge;
pub mod client_data;
pub mod error;
pub mod messages;
pub mod signing;

pub use challenge::Challenge;
pub use client_data::{client_data_digest, now_millis, ClientData};
pub use error::AuthError;
pub use messages::{AuthMessage, AuthRequest, CredentialResponse, PublicKeyCredential, PublicKeyRequest};
pub use signing::{
    sign, sign_client_data, verify, verify_credential, SignedResponse, VerifiedIdentity,
    VerifyOptions,
};
