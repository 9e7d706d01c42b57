//! Sandboxed persistent storage for scripts.
//!
//! One document exists per (guild, storage id) pair. A document is a binary
//! encoding of an ordered key → value mapping, and the total encoded size of
//! all of a guild's documents is capped: a write that would cross the cap
//! fails loudly instead of truncating.
//!
//! The engine only deals in [`StoredValue`]s — a serializable mirror of the
//! runtime's literal shapes. Functions never reach this layer; the runtime
//! rejects them at conversion time.

use std::collections::HashMap;
use std::sync::Mutex;

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;

/// Total encoded bytes allowed per guild, across all of its storage ids.
pub const STORAGE_QUOTA_BYTES: u64 = 500 * 1024;

/// An error crossing back from the storage layer.
#[derive(Debug, Error)]
pub enum StorageErr {
    /// The write would push the guild past its quota.
    #[error("storage quota exceeded: the write needs {needed} bytes but only {available} remain of {STORAGE_QUOTA_BYTES}")]
    QuotaExceeded {
        /// Encoded size the write requires.
        needed: u64,
        /// Bytes the guild has left.
        available: u64,
    },

    /// A stored document failed to decode.
    #[error("storage document is corrupted: {0}")]
    Corrupt(String),

    /// The backing store failed.
    #[error("storage backend failed: {0}")]
    Backend(String),
}

/// A literal-shaped value as it exists inside a storage document.
///
/// This is the storable subset of the runtime's values: everything except
/// functions. Conversion lives on the runtime side.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum StoredValue {
    #[allow(missing_docs)]
    Null,
    #[allow(missing_docs)]
    Bool(bool),
    #[allow(missing_docs)]
    Number(f64),
    #[allow(missing_docs)]
    Str(String),
    /// A regex, stored as its written form.
    Regex {
        #[allow(missing_docs)]
        pattern: String,
        #[allow(missing_docs)]
        flags: String,
    },
    /// An instant, stored as epoch milliseconds.
    Time(i64),
    /// A span, stored as milliseconds.
    Duration(i64),
    #[allow(missing_docs)]
    List(Vec<StoredValue>),
    #[allow(missing_docs)]
    Map(IndexMap<String, StoredValue>),
}

/// A decoded storage document.
pub type StorageDoc = IndexMap<String, StoredValue>;

/// Where encoded documents live.
///
/// The engine owns encoding, decoding and quota accounting; backends only
/// move bytes. `sizes` reports every document of a guild with its encoded
/// size so the engine can account for a replacement write.
pub trait StorageBackend: Send + Sync {
    /// Read the encoded document for (guild, storage id), if present.
    fn read(&self, guild_id: &str, store_id: &str) -> Result<Option<Vec<u8>>, StorageErr>;

    /// Replace the encoded document for (guild, storage id).
    fn write(&self, guild_id: &str, store_id: &str, doc: Vec<u8>) -> Result<(), StorageErr>;

    /// Remove the document for (guild, storage id).
    fn remove(&self, guild_id: &str, store_id: &str) -> Result<(), StorageErr>;

    /// Every (storage id, encoded size) of the guild.
    fn sizes(&self, guild_id: &str) -> Result<Vec<(String, u64)>, StorageErr>;
}

/// An in-memory backend for tests and the CLI.
#[derive(Default)]
pub struct MemoryStorage {
    docs: Mutex<HashMap<(String, String), Vec<u8>>>,
}

impl MemoryStorage {
    /// An empty store.
    pub fn new() -> Self {
        Self::default()
    }
}

impl StorageBackend for MemoryStorage {
    fn read(&self, guild_id: &str, store_id: &str) -> Result<Option<Vec<u8>>, StorageErr> {
        let docs = self.docs.lock().unwrap();
        Ok(docs.get(&(guild_id.to_string(), store_id.to_string())).cloned())
    }

    fn write(&self, guild_id: &str, store_id: &str, doc: Vec<u8>) -> Result<(), StorageErr> {
        let mut docs = self.docs.lock().unwrap();
        docs.insert((guild_id.to_string(), store_id.to_string()), doc);
        Ok(())
    }

    fn remove(&self, guild_id: &str, store_id: &str) -> Result<(), StorageErr> {
        let mut docs = self.docs.lock().unwrap();
        docs.remove(&(guild_id.to_string(), store_id.to_string()));
        Ok(())
    }

    fn sizes(&self, guild_id: &str) -> Result<Vec<(String, u64)>, StorageErr> {
        let docs = self.docs.lock().unwrap();
        Ok(docs
            .iter()
            .filter(|((g, _), _)| g == guild_id)
            .map(|((_, id), doc)| (id.clone(), doc.len() as u64))
            .collect())
    }
}

/// The storage engine scripts talk to through `storage(id)`.
///
/// Owns the binary encoding and the quota. Injected into the executor as an
/// explicit dependency; its lifecycle belongs to the host, not to any script.
pub struct StorageEngine {
    backend: Box<dyn StorageBackend>,
}

impl StorageEngine {
    /// Build an engine over a backend.
    pub fn new(backend: Box<dyn StorageBackend>) -> Self {
        Self { backend }
    }

    fn load_doc(&self, guild_id: &str, store_id: &str) -> Result<StorageDoc, StorageErr> {
        match self.backend.read(guild_id, store_id)? {
            None => Ok(StorageDoc::new()),
            Some(bytes) => {
                bincode::deserialize(&bytes).map_err(|e| StorageErr::Corrupt(e.to_string()))
            }
        }
    }

    fn store_doc(
        &self,
        guild_id: &str,
        store_id: &str,
        doc: &StorageDoc,
    ) -> Result<(), StorageErr> {
        let encoded =
            bincode::serialize(doc).map_err(|e| StorageErr::Backend(e.to_string()))?;
        let new_size = encoded.len() as u64;

        // quota accounts for every other document of the guild plus the
        // replacement size of this one
        let others: u64 = self
            .backend
            .sizes(guild_id)?
            .into_iter()
            .filter(|(id, _)| id != store_id)
            .map(|(_, size)| size)
            .sum();

        if others + new_size > STORAGE_QUOTA_BYTES {
            let available = STORAGE_QUOTA_BYTES.saturating_sub(others);
            return Err(StorageErr::QuotaExceeded { needed: new_size, available });
        }

        debug!(guild_id, store_id, bytes = new_size, "storage write");
        self.backend.write(guild_id, store_id, encoded)
    }

    /// Read one key.
    pub fn get(
        &self,
        guild_id: &str,
        store_id: &str,
        key: &str,
    ) -> Result<Option<StoredValue>, StorageErr> {
        Ok(self.load_doc(guild_id, store_id)?.get(key).cloned())
    }

    /// Whether a key exists.
    pub fn has(&self, guild_id: &str, store_id: &str, key: &str) -> Result<bool, StorageErr> {
        Ok(self.load_doc(guild_id, store_id)?.contains_key(key))
    }

    /// Write one key. Fails without writing when the guild quota would
    /// be exceeded.
    pub fn set(
        &self,
        guild_id: &str,
        store_id: &str,
        key: &str,
        value: StoredValue,
    ) -> Result<(), StorageErr> {
        let mut doc = self.load_doc(guild_id, store_id)?;
        doc.insert(key.to_string(), value);
        self.store_doc(guild_id, store_id, &doc)
    }

    /// Delete one key, reporting whether it existed.
    pub fn delete(&self, guild_id: &str, store_id: &str, key: &str) -> Result<bool, StorageErr> {
        let mut doc = self.load_doc(guild_id, store_id)?;
        let existed = doc.shift_remove(key).is_some();

        if existed {
            if doc.is_empty() {
                self.backend.remove(guild_id, store_id)?;
            } else {
                self.store_doc(guild_id, store_id, &doc)?;
            }
        }
        Ok(existed)
    }

    /// Every key of a document, in insertion order.
    pub fn keys(&self, guild_id: &str, store_id: &str) -> Result<Vec<String>, StorageErr> {
        Ok(self.load_doc(guild_id, store_id)?.keys().cloned().collect())
    }

    /// The whole document.
    pub fn all(&self, guild_id: &str, store_id: &str) -> Result<StorageDoc, StorageErr> {
        self.load_doc(guild_id, store_id)
    }
}

#[cfg(test)]
mod tests {
    use super::{MemoryStorage, StorageEngine, StoredValue, STORAGE_QUOTA_BYTES};

    fn engine() -> StorageEngine {
        StorageEngine::new(Box::new(MemoryStorage::new()))
    }

    #[test]
    fn set_then_get_round_trips() {
        let e = engine();
        e.set("g", "counters", "hits", StoredValue::Number(3.0)).unwrap();

        assert_eq!(e.get("g", "counters", "hits").unwrap(), Some(StoredValue::Number(3.0)));
        assert_eq!(e.get("g", "counters", "misses").unwrap(), None);
    }

    #[test]
    fn delete_reports_existence() {
        let e = engine();
        e.set("g", "s", "k", StoredValue::Null).unwrap();

        assert!(e.delete("g", "s", "k").unwrap());
        assert!(!e.delete("g", "s", "k").unwrap());
    }

    #[test]
    fn quota_rejects_oversized_write() {
        let e = engine();
        let big = StoredValue::Str("x".repeat(STORAGE_QUOTA_BYTES as usize));

        let result = e.set("g", "s", "k", big);
        assert!(matches!(result, Err(super::StorageErr::QuotaExceeded { .. })));

        // the failed write left nothing behind
        assert_eq!(e.get("g", "s", "k").unwrap(), None);
    }

    #[test]
    fn quota_spans_all_storage_ids_of_a_guild() {
        let e = engine();
        let half = StoredValue::Str("x".repeat((STORAGE_QUOTA_BYTES / 2) as usize));

        e.set("g", "a", "k", half.clone()).unwrap();
        assert!(e.set("g", "b", "k", half.clone()).is_err());

        // a different guild has its own budget
        e.set("other", "b", "k", half).unwrap();
    }

    #[test]
    fn keys_keep_insertion_order() {
        let e = engine();
        e.set("g", "s", "b", StoredValue::Number(1.0)).unwrap();
        e.set("g", "s", "a", StoredValue::Number(2.0)).unwrap();

        assert_eq!(e.keys("g", "s").unwrap(), vec!["b".to_string(), "a".to_string()]);
    }
}
