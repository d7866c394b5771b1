//! # Sessions
//!
//! Where everything else comes together. An identity provider page reads
//! its [`SessionContext`], gets an [`AuthSessionController`] on the right
//! transport, and walks it from request to signed response. A relying party
//! calls [`authenticate`] on its end of the same transport.

pub mod context;
pub mod controller;
pub mod error;
pub mod relying_party;

pub use context::{new_channel_id, rendezvous_url, SessionContext};
pub use controller::{AuthSession, AuthSessionController, RemoteInvite, SessionHost, SessionState};
pub use error::SessionError;
pub use relying_party::{authenticate, authenticate_request};
