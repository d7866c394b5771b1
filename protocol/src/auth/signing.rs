//! # Signing Protocol
//!
//! One exchange, two halves.
//!
//! **Signing** (identity provider):
//!
//! 1. Derive the public key from the identity's secret.
//! 2. Build [`ClientData`] `{challenge, origin, timestamp}` and serialize it.
//! 3. SHA-256 the serialized bytes.
//! 4. Sign the digest (secp256k1, compact, low-S).
//! 5. Ship `{name?, id, clientDataJSON, signature, publicKey}`.
//!
//! **Verification** (whoever receives the response), cheapest first:
//!
//! 1. Parse the received `clientDataJSON`.
//! 2. Its challenge must equal the one issued (`ChallengeMismatch`).
//! 3. Its origin must match, when the verifier pins one.
//! 4. The signature must verify over the digest of the *received* bytes
//!    against the *included* public key (`InvalidSignature`).
//! 5. The timestamp must be within the freshness window (`Stale`).
//! 6. Only then: the claimed `id` must be the fingerprint of that key
//!    (`IdentityMismatch`).
//!
//! There's no server and no credential database. The public key travels
//! with the response, and the fingerprint is what makes it an identity.

use std::time::Duration;
use tracing::debug;

use super::client_data::{client_data_digest, now_millis, ClientData};
use super::error::AuthError;
use super::messages::{CredentialResponse, PublicKeyCredential};
use crate::config::{CREDENTIAL_TYPE, MAX_CLIENT_DATA_AGE, MAX_CLOCK_SKEW};
use crate::crypto::{AuthPublicKey, AuthSignature};
use crate::identity::{Fingerprint, Identity};

/// A signed challenge response. Immutable once produced.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SignedResponse {
    pub identity_name: Option<String>,
    pub identity_id: String,
    /// The exact serialized client data that was hashed and signed.
    pub client_data_json: String,
    pub signature: AuthSignature,
    pub public_key: AuthPublicKey,
}

impl SignedResponse {
    /// The wire form sent back to the relying party.
    pub fn to_credential(&self) -> PublicKeyCredential {
        PublicKeyCredential {
            credential_type: CREDENTIAL_TYPE.to_string(),
            name: self.identity_name.clone(),
            id: self.identity_id.clone(),
            response: CredentialResponse {
                client_data_json: self.client_data_json.clone(),
                signature: self.signature.to_base64(),
                public_key: self.public_key.to_base64(),
            },
        }
    }

    /// Decode the wire form. Fails with `MalformedPayload` on bad base64,
    /// a wrong-length signature, an invalid point, or a foreign `type`.
    pub fn from_credential(credential: &PublicKeyCredential) -> Result<Self, AuthError> {
        if !credential.is_public_key() {
            return Err(AuthError::MalformedPayload(format!(
                "unexpected credential type {:?}",
                credential.credential_type
            )));
        }
        let signature = AuthSignature::from_base64(&credential.response.signature)
            .map_err(|e| AuthError::MalformedPayload(format!("signature: {e}")))?;
        let public_key = AuthPublicKey::from_base64(&credential.response.public_key)
            .map_err(|e| AuthError::MalformedPayload(format!("public key: {e}")))?;
        Ok(Self {
            identity_name: credential.name.clone(),
            identity_id: credential.id.clone(),
            client_data_json: credential.response.client_data_json.clone(),
            signature,
            public_key,
        })
    }
}

/// Sign `challenge` for `origin` with the current time.
pub fn sign(identity: &Identity, challenge: &str, origin: &str) -> Result<SignedResponse, AuthError> {
    sign_client_data(identity, &ClientData::new(challenge, origin))
}

/// Sign prepared client data. Exposed for callers that need to control the
/// timestamp.
pub fn sign_client_data(
    identity: &Identity,
    client_data: &ClientData,
) -> Result<SignedResponse, AuthError> {
    let client_data_json = client_data.to_json();
    let digest = client_data_digest(&client_data_json);
    let signature = identity.keypair().sign_prehash(&digest)?;
    debug!(identity = %identity.id, origin = %client_data.origin, "challenge signed");
    Ok(SignedResponse {
        identity_name: identity.name.clone(),
        identity_id: identity.id.to_string(),
        client_data_json,
        signature,
        public_key: identity.public_key(),
    })
}

// ---------------------------------------------------------------------------
// Verification
// ---------------------------------------------------------------------------

/// Knobs for [`verify`].
#[derive(Debug, Clone)]
pub struct VerifyOptions {
    /// Require this origin in the client data. `None` skips the check.
    pub expected_origin: Option<String>,
    /// Oldest acceptable client data.
    pub max_age: Duration,
    /// Furthest acceptable future timestamp.
    pub max_skew: Duration,
    /// Override "now" (Unix ms). `None` reads the wall clock.
    pub now_ms: Option<i64>,
}

impl Default for VerifyOptions {
    fn default() -> Self {
        Self {
            expected_origin: None,
            max_age: MAX_CLIENT_DATA_AGE,
            max_skew: MAX_CLOCK_SKEW,
            now_ms: None,
        }
    }
}

impl VerifyOptions {
    pub fn for_origin(origin: impl Into<String>) -> Self {
        Self {
            expected_origin: Some(origin.into()),
            ..Self::default()
        }
    }
}

/// Who a verified response proved to be.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VerifiedIdentity {
    pub name: Option<String>,
    pub id: Fingerprint,
    pub public_key: AuthPublicKey,
    pub client_data: ClientData,
}

/// Verify a signed response against the challenge the verifier issued.
pub fn verify(
    response: &SignedResponse,
    expected_challenge: &str,
    options: &VerifyOptions,
) -> Result<VerifiedIdentity, AuthError> {
    let client_data = ClientData::parse(&response.client_data_json)?;

    if client_data.challenge != expected_challenge {
        return Err(AuthError::ChallengeMismatch {
            expected: expected_challenge.to_string(),
            actual: client_data.challenge,
        });
    }

    if let Some(expected) = options.expected_origin.as_deref() {
        if client_data.origin != expected {
            return Err(AuthError::OriginMismatch {
                expected: expected.to_string(),
                actual: client_data.origin,
            });
        }
    }

    let digest = client_data_digest(&response.client_data_json);
    if !response.public_key.verify_prehash(&digest, &response.signature) {
        return Err(AuthError::InvalidSignature);
    }

    let now = options.now_ms.unwrap_or_else(now_millis);
    client_data.check_freshness(now, options.max_age, options.max_skew)?;

    let derived = Fingerprint::from_public_key(&response.public_key);
    if derived.as_str() != response.identity_id {
        return Err(AuthError::IdentityMismatch {
            claimed: response.identity_id.clone(),
            derived: derived.to_string(),
        });
    }

    Ok(VerifiedIdentity {
        name: response.identity_name.clone(),
        id: derived,
        public_key: response.public_key.clone(),
        client_data,
    })
}

/// [`verify`] for the wire form.
pub fn verify_credential(
    credential: &PublicKeyCredential,
    expected_challenge: &str,
    options: &VerifyOptions,
) -> Result<VerifiedIdentity, AuthError> {
    verify(
        &SignedResponse::from_credential(credential)?,
        expected_challenge,
        options,
    )
}
