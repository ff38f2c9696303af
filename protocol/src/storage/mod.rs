//! # Storage Module
//!
//! Persistence for escrow state behind one small trait, [`StateStore`].
//!
//! ```text
//! mod.rs   : StateStore trait, WriteBatch, JSON helpers, DbError
//! memory.rs: MemoryStore: BTreeMap behind a RwLock, for tests/embedding
//! db.rs    : VouchDb: sled trees for contract state, balances, metadata
//! ```
//!
//! ## Design Decisions
//!
//! 1. **Write sets, not write-through.** An escrow operation stages every
//!    change in a [`WriteBatch`] and hands the whole batch to
//!    [`StateStore::apply`] at commit. A failed operation simply drops the
//!    batch; nothing was written.
//!
//! 2. **JSON on disk.** Records are small and change shape across contract
//!    versions. serde_json with `#[serde(default)]` fields lets old code read
//!    new records (unknown fields ignored) and new code read old ones.
//!
//! 3. **Sortable keys.** Numeric ids are zero-padded decimal so prefix scans
//!    come back in numeric order.

pub mod db;
pub mod memory;

use serde::de::DeserializeOwned;
use serde::Serialize;
use std::collections::BTreeMap;

pub use db::VouchDb;
pub use memory::MemoryStore;

/// Errors that can occur during storage operations.
#[derive(Debug, thiserror::Error)]
pub enum DbError {
    #[error("sled error: {0}")]
    Sled(#[from] sled::Error),

    #[error("serialization error: {0}")]
    Serialization(String),

    #[error("corrupt value under key {0}")]
    Corrupt(String),
}

pub type DbResult<T> = Result<T, DbError>;

/// A staged set of puts and deletes, applied atomically.
///
/// Later writes to the same key replace earlier ones. `None` means delete.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct WriteBatch {
    ops: BTreeMap<Vec<u8>, Option<Vec<u8>>>,
}

impl WriteBatch {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn put(&mut self, key: impl Into<Vec<u8>>, value: Vec<u8>) {
        self.ops.insert(key.into(), Some(value));
    }

    pub fn remove(&mut self, key: impl Into<Vec<u8>>) {
        self.ops.insert(key.into(), None);
    }

    /// Serialize `value` as JSON and stage it under `key`.
    pub fn put_json<T: Serialize>(&mut self, key: impl Into<Vec<u8>>, value: &T) -> DbResult<()> {
        let bytes =
            serde_json::to_vec(value).map_err(|e| DbError::Serialization(e.to_string()))?;
        self.put(key, bytes);
        Ok(())
    }

    /// The staged state of `key`: `Some(Some(v))` staged put, `Some(None)`
    /// staged delete, `None` untouched.
    pub fn staged(&self, key: &[u8]) -> Option<Option<&[u8]>> {
        self.ops.get(key).map(|v| v.as_deref())
    }

    pub fn is_empty(&self) -> bool {
        self.ops.is_empty()
    }

    pub fn len(&self) -> usize {
        self.ops.len()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&[u8], Option<&[u8]>)> {
        self.ops.iter().map(|(k, v)| (k.as_slice(), v.as_deref()))
    }
}

/// Key-value persistence for escrow state.
pub trait StateStore: Send + Sync {
    fn get(&self, key: &[u8]) -> DbResult<Option<Vec<u8>>>;

    /// All entries whose key starts with `prefix`, in key order.
    fn scan_prefix(&self, prefix: &[u8]) -> DbResult<Vec<(Vec<u8>, Vec<u8>)>>;

    /// Apply every operation in `batch` or none of them.
    fn apply(&self, batch: WriteBatch) -> DbResult<()>;
}

/// Typed JSON access on top of any [`StateStore`].
pub trait StoreExt: StateStore {
    fn get_json<T: DeserializeOwned>(&self, key: &[u8]) -> DbResult<Option<T>> {
        match self.get(key)? {
            Some(bytes) => decode(key, &bytes).map(Some),
            None => Ok(None),
        }
    }

    fn scan_json<T: DeserializeOwned>(&self, prefix: &[u8]) -> DbResult<Vec<T>> {
        self.scan_prefix(prefix)?
            .iter()
            .map(|(k, v)| decode(k, v))
            .collect()
    }
}

impl<S: StateStore + ?Sized> StoreExt for S {}

/// Decode a JSON value, naming the key in the error.
pub fn decode<T: DeserializeOwned>(key: &[u8], bytes: &[u8]) -> DbResult<T> {
    serde_json::from_slice(bytes).map_err(|e| {
        DbError::Serialization(format!("{}: {}", String::from_utf8_lossy(key), e))
    })
}
