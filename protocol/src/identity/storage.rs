//! # Key-Value Storage
//!
//! The identity store persists through a deliberately tiny interface: string
//! keys, string values, get/set/remove. That's the shape of browser local
//! storage, and it's all the store needs, because it always writes the full
//! collection image under a single key.
//!
//! Two backends ship with the crate:
//!
//! | Backend          | Durability | Use                                 |
//! |------------------|------------|-------------------------------------|
//! | [`SledStorage`]  | on disk    | CLI data directory                  |
//! | [`MemoryStorage`]| none       | tests, embedding, ephemeral shells  |

use parking_lot::RwLock;
use std::collections::HashMap;
use std::path::Path;

/// Errors surfaced by a storage backend.
#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    #[error("sled error: {0}")]
    Sled(#[from] sled::Error),

    #[error("stored value is not valid UTF-8")]
    InvalidUtf8,

    #[error("stored value is corrupted: {0}")]
    Corrupted(String),
}

/// A string-keyed, string-valued persistent map.
pub trait KeyValueStorage: Send + Sync {
    /// Read a value. `Ok(None)` means the key is absent.
    fn get(&self, key: &str) -> Result<Option<String>, StorageError>;

    /// Replace the value under `key`.
    fn set(&self, key: &str, value: &str) -> Result<(), StorageError>;

    /// Delete `key`. Removing an absent key is not an error.
    fn remove(&self, key: &str) -> Result<(), StorageError>;

    /// Make previous writes durable. No-op for volatile backends.
    fn flush(&self) -> Result<(), StorageError> {
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// SledStorage
// ---------------------------------------------------------------------------

/// Durable storage on top of an embedded sled database.
///
/// All values live in one named tree so the database directory can be
/// shared with other data later without key collisions.
#[derive(Debug, Clone)]
pub struct SledStorage {
    db: sled::Db,
    tree: sled::Tree,
}

impl SledStorage {
    const TREE: &'static str = "local_storage";

    /// Open or create a database at `path`.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self, StorageError> {
        let db = sled::open(path)?;
        Self::from_db(db)
    }

    /// A throwaway database that disappears on drop. For tests.
    pub fn open_temporary() -> Result<Self, StorageError> {
        let db = sled::Config::new().temporary(true).open()?;
        Self::from_db(db)
    }

    fn from_db(db: sled::Db) -> Result<Self, StorageError> {
        let tree = db.open_tree(Self::TREE)?;
        Ok(Self { db, tree })
    }
}

impl KeyValueStorage for SledStorage {
    fn get(&self, key: &str) -> Result<Option<String>, StorageError> {
        match self.tree.get(key.as_bytes())? {
            Some(bytes) => String::from_utf8(bytes.to_vec())
                .map(Some)
                .map_err(|_| StorageError::InvalidUtf8),
            None => Ok(None),
        }
    }

    fn set(&self, key: &str, value: &str) -> Result<(), StorageError> {
        self.tree.insert(key.as_bytes(), value.as_bytes())?;
        Ok(())
    }

    fn remove(&self, key: &str) -> Result<(), StorageError> {
        self.tree.remove(key.as_bytes())?;
        Ok(())
    }

    fn flush(&self) -> Result<(), StorageError> {
        self.db.flush()?;
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// MemoryStorage
// ---------------------------------------------------------------------------

/// Volatile storage backed by a `HashMap`.
#[derive(Debug, Default)]
pub struct MemoryStorage {
    values: RwLock<HashMap<String, String>>,
}

impl MemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of keys currently present.
    pub fn len(&self) -> usize {
        self.values.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.read().is_empty()
    }
}

impl KeyValueStorage for MemoryStorage {
    fn get(&self, key: &str) -> Result<Option<String>, StorageError> {
        Ok(self.values.read().get(key).cloned())
    }

    fn set(&self, key: &str, value: &str) -> Result<(), StorageError> {
        self.values.write().insert(key.to_string(), value.to_string());
        Ok(())
    }

    fn remove(&self, key: &str) -> Result<(), StorageError> {
        self.values.write().remove(key);
        Ok(())
    }
}
