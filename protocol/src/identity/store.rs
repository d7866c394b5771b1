//! # Identity Store
//!
//! The single owner of the user's identities. Everything else in the crate
//! refers to an identity by its [`Fingerprint`] and asks the store for the
//! key when it actually needs to sign.
//!
//! ## Persistence
//!
//! The whole collection is one JSON array under
//! [`IDENTITIES_KEY`](crate::config::IDENTITIES_KEY):
//!
//! ```json
//! [{"name":"work","privateKey":"<base64>"},{"privateKey":"<base64>"}]
//! ```
//!
//! Fingerprints are not stored. They are re-derived from the secret on load,
//! so there's nothing in the image a user could edit to impersonate a
//! different address. An empty collection is written as *no key at all*.
//!
//! ## Concurrency
//!
//! Every mutation is read-modify-write over the full collection under one
//! write lock: clone the latest snapshot, apply the change, persist the new
//! image, then swap it in. A `create` that spends seconds mining a prefix
//! does its search outside the lock and only takes it to append, so an
//! import that lands in the meantime is never lost.

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::error::IdentityError;
use super::fingerprint::{mine_keypair, validate_prefix, Fingerprint};
use super::storage::KeyValueStorage;
use crate::config::IDENTITIES_KEY;
use crate::crypto::{base64_decode, AuthKeypair, AuthPublicKey};

// ---------------------------------------------------------------------------
// Identity
// ---------------------------------------------------------------------------

/// One locally held identity.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Identity {
    /// Optional human label. The only mutable part of an identity.
    pub name: Option<String>,
    /// Derived from the key, never supplied.
    pub id: Fingerprint,
    keypair: AuthKeypair,
}

impl Identity {
    /// Build an identity from a key, deriving its fingerprint.
    pub fn from_keypair(keypair: AuthKeypair, name: Option<String>) -> Self {
        let id = Fingerprint::from_public_key(&keypair.public_key());
        Self { name, id, keypair }
    }

    pub fn keypair(&self) -> &AuthKeypair {
        &self.keypair
    }

    pub fn public_key(&self) -> AuthPublicKey {
        self.keypair.public_key()
    }

    /// Label for lists: the name if there is one, else the short fingerprint.
    pub fn display_name(&self) -> &str {
        self.name.as_deref().unwrap_or_else(|| self.id.short())
    }

    fn to_record(&self, with_id: bool) -> StoredIdentity {
        StoredIdentity {
            name: self.name.clone(),
            id: with_id.then(|| self.id.to_string()),
            private_key: self.keypair.to_base64(),
        }
    }

    fn from_record(record: StoredIdentity) -> Result<Self, IdentityError> {
        let keypair = AuthKeypair::from_base64(&record.private_key)?;
        let identity = Self::from_keypair(keypair, record.name);
        if let Some(claimed) = record.id {
            if claimed != identity.id.as_str() {
                return Err(IdentityError::FingerprintMismatch {
                    claimed,
                    derived: identity.id.to_string(),
                });
            }
        }
        Ok(identity)
    }
}

/// The persisted and exported shape of an identity.
///
/// `id` is omitted in the storage image and present in exports; when present
/// on the way in, it must match the key.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StoredIdentity {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    pub private_key: String,
}

/// Parameters for [`IdentityStore::create`].
#[derive(Debug, Clone, Default)]
pub struct CreateOptions {
    pub name: Option<String>,
    /// Vanity prefix the fingerprint must start with.
    pub prefix: Option<String>,
    /// Cancels a prefix search. Without a prefix the first key is used and
    /// this is effectively never consulted.
    pub cancel: CancellationToken,
}

// ---------------------------------------------------------------------------
// IdentityStore
// ---------------------------------------------------------------------------

/// The identity collection plus the storage it persists to.
///
/// Cheap to share behind an `Arc`; all methods take `&self`.
pub struct IdentityStore {
    storage: Arc<dyn KeyValueStorage>,
    identities: RwLock<Vec<Identity>>,
}

impl IdentityStore {
    /// Load the persisted collection, re-deriving every fingerprint.
    ///
    /// A record whose key doesn't decode, or that carries an `id` its key
    /// doesn't produce, fails the whole load. Silently dropping a key a user
    /// thinks they own is worse than refusing to start.
    pub fn open(storage: Arc<dyn KeyValueStorage>) -> Result<Self, IdentityError> {
        let mut identities: Vec<Identity> = Vec::new();
        if let Some(raw) = storage.get(IDENTITIES_KEY)? {
            let records: Vec<StoredIdentity> =
                serde_json::from_str(&raw).map_err(|e| IdentityError::Malformed(e.to_string()))?;
            for record in records {
                let identity = Identity::from_record(record)?;
                if identities.iter().any(|i| i.id == identity.id) {
                    warn!(identity = %identity.id, "duplicate identity in storage, skipping");
                    continue;
                }
                identities.push(identity);
            }
        }
        debug!(count = identities.len(), "identity store loaded");
        Ok(Self {
            storage,
            identities: RwLock::new(identities),
        })
    }

    /// All identities, in creation order.
    pub fn list(&self) -> Vec<Identity> {
        self.identities.read().clone()
    }

    pub fn len(&self) -> usize {
        self.identities.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.identities.read().is_empty()
    }

    /// Look up an identity by its full fingerprint string.
    pub fn get(&self, id: &str) -> Option<Identity> {
        self.identities
            .read()
            .iter()
            .find(|i| i.id.as_str() == id)
            .cloned()
    }

    /// Every identity whose fingerprint starts with `prefix`.
    pub fn find_by_prefix(&self, prefix: &str) -> Vec<Identity> {
        self.identities
            .read()
            .iter()
            .filter(|i| i.id.starts_with(prefix))
            .cloned()
            .collect()
    }

    /// Generate a new identity, optionally mining for a fingerprint prefix.
    ///
    /// The prefix is validated before any key is generated. The search runs
    /// on a blocking thread; firing `options.cancel` resolves this future
    /// with [`IdentityError::Aborted`] right away and stops the search at
    /// its next attempt.
    pub async fn create(&self, options: CreateOptions) -> Result<Identity, IdentityError> {
        if let Some(prefix) = options.prefix.as_deref() {
            validate_prefix(prefix)?;
        }

        let cancel = options.cancel.clone();
        let prefix = options.prefix.clone();
        let search =
            tokio::task::spawn_blocking(move || mine_keypair(prefix.as_deref(), &cancel));

        let (keypair, _) = tokio::select! {
            joined = search => joined.map_err(|e| IdentityError::Worker(e.to_string()))??,
            _ = options.cancel.cancelled() => return Err(IdentityError::Aborted),
        };

        let identity = Identity::from_keypair(keypair, options.name);
        self.mutate(|identities| {
            identities.push(identity.clone());
            Ok(())
        })?;
        info!(identity = %identity.id, "identity created");
        Ok(identity)
    }

    /// Import a private key, either bare base64 or an exported JSON record.
    ///
    /// Importing a key that's already present changes nothing and returns
    /// the stored identity.
    pub fn import_existing(&self, raw: &str) -> Result<Identity, IdentityError> {
        let raw = raw.trim();
        let imported = if raw.starts_with('{') {
            let record: StoredIdentity =
                serde_json::from_str(raw).map_err(|e| IdentityError::Malformed(e.to_string()))?;
            Identity::from_record(record)?
        } else {
            let secret = base64_decode(raw).map_err(|e| IdentityError::Malformed(e.to_string()))?;
            Identity::from_keypair(AuthKeypair::from_bytes(&secret)?, None)
        };

        let mut result = imported.clone();
        self.mutate(|identities| {
            if let Some(existing) = identities.iter().find(|i| i.id == imported.id) {
                result = existing.clone();
                return Ok(false);
            }
            identities.push(imported.clone());
            Ok(true)
        })
        .map(|changed| {
            if changed {
                info!(identity = %result.id, "identity imported");
            } else {
                debug!(identity = %result.id, "identity already present");
            }
            result
        })
    }

    /// Attach, change, or clear (`None`) an identity's name.
    pub fn rename(&self, id: &str, name: Option<String>) -> Result<Identity, IdentityError> {
        let mut renamed = None;
        self.mutate(|identities| {
            let identity = identities
                .iter_mut()
                .find(|i| i.id.as_str() == id)
                .ok_or_else(|| IdentityError::NotFound(id.to_string()))?;
            identity.name = name.clone();
            renamed = Some(identity.clone());
            Ok(())
        })?;
        renamed.ok_or_else(|| IdentityError::NotFound(id.to_string()))
    }

    /// Permanently remove an identity. There is no undo.
    pub fn delete(&self, id: &str) -> Result<(), IdentityError> {
        self.mutate(|identities| {
            let before = identities.len();
            identities.retain(|i| i.id.as_str() != id);
            if identities.len() == before {
                return Err(IdentityError::NotFound(id.to_string()));
            }
            Ok(())
        })?;
        info!(identity = %id, "identity deleted");
        Ok(())
    }

    /// Serialize one identity as `{name?, id, privateKey}` JSON, the format
    /// [`import_existing`](Self::import_existing) accepts back.
    pub fn export(&self, id: &str) -> Result<String, IdentityError> {
        let identity = self
            .get(id)
            .ok_or_else(|| IdentityError::NotFound(id.to_string()))?;
        serde_json::to_string(&identity.to_record(true))
            .map_err(|e| IdentityError::Malformed(e.to_string()))
    }

    /// Apply `change` to a copy of the latest collection, persist it, and
    /// commit. Nothing is committed in memory if the change or the write
    /// fails.
    fn mutate<T>(
        &self,
        change: impl FnOnce(&mut Vec<Identity>) -> Result<T, IdentityError>,
    ) -> Result<T, IdentityError> {
        let mut current = self.identities.write();
        let mut next = current.clone();
        let out = change(&mut next)?;
        if next != *current {
            self.persist(&next)?;
            *current = next;
        }
        Ok(out)
    }

    fn persist(&self, identities: &[Identity]) -> Result<(), IdentityError> {
        if identities.is_empty() {
            self.storage.remove(IDENTITIES_KEY)?;
        } else {
            let records: Vec<StoredIdentity> =
                identities.iter().map(|i| i.to_record(false)).collect();
            let image = serde_json::to_string(&records)
                .map_err(|e| IdentityError::Malformed(e.to_string()))?;
            self.storage.set(IDENTITIES_KEY, &image)?;
        }
        self.storage.flush()?;
        Ok(())
    }
}

impl std::fmt::Debug for IdentityStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IdentityStore")
            .field("identities", &self.len())
            .finish()
    }
}
