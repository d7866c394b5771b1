// Copyright (c) 2026 ALAS Technology. MIT License.
// See LICENSE for details.

//! # WebSign Protocol: Core Library
//!
//! Passwordless login without a server-side credential store and without a
//! browser extension. A relying party sends a challenge, the user picks one
//! of their locally held keys, and a signature over the challenge comes
//! back. That's the whole trick. The rest is plumbing to get the challenge
//! there and the signature back, whichever way the page happened to be
//! opened.
//!
//! ## Architecture
//!
//! Leaf to root:
//!
//! - **crypto**: secp256k1 keys, SHA-256, base64. Don't roll your own.
//! - **identity**: fingerprints, vanity prefixes, and the persisted
//!   identity store. Your keys never leave it unless you export them.
//! - **auth**: client data, signing, and verification of the
//!   challenge-response payload.
//! - **transport**: one event-stream shape over window messaging, callback
//!   redirects, and peer data channels.
//! - **signaling**: the WebSocket relay (client and hub) and the
//!   offer/answer dance that turns a channel code into a data channel.
//! - **session**: the state machine that ties it together, plus the
//!   relying party's side.
//! - **config**: constants and runtime configuration.
//!
//! ## Design Philosophy
//!
//! 1. One signing scheme. Mixing verifiers and signers from different
//!    schemes is how auth bugs are born.
//! 2. Fingerprints are derived, never trusted. Not from storage, not from
//!    the wire.
//! 3. Nothing retries by itself. A retry is a new user gesture with a new
//!    challenge.
//! 4. Every cancellation closes what it opened.

pub mod auth;
pub mod config;
pub mod crypto;
pub mod identity;
pub mod session;
pub mod signaling;
pub mod transport;
