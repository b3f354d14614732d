//! Key-value store abstraction and an in-memory transactional implementation.
//!
//! The ledger platform owns the real store. The core only needs named tables
//! of string keys and byte values, read and written inside one ambient
//! transaction. [`MemoryStore`] provides those semantics in-process: every
//! committed write bumps a store-wide version counter, and
//! [`MemoryStore::transact`] commits a closure's writes only if it returns
//! `Ok`.

use std::collections::{BTreeMap, BTreeSet};
use std::path::Path;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::fs_guard;

/// Maximum snapshot file size (64 MB).
const MAX_SNAPSHOT_BYTES: u64 = 64 * 1024 * 1024;

/// Errors raised by a [`KvStore`].
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StoreError {
    /// A stored value could not be decoded as the expected record type.
    #[error("corrupt record {table}[{key}]: {reason}")]
    Corrupt {
        table: String,
        key: String,
        reason: String,
    },

    /// The underlying store failed.
    #[error("{0}")]
    Backend(String),
}

/// Transactional, versioned key-value store scoped to named tables.
///
/// Writes take `&mut self`; implementations apply them to the ambient
/// transaction.
pub trait KvStore {
    fn get(&self, table: &str, key: &str) -> Result<Option<Vec<u8>>, StoreError>;

    fn set(&mut self, table: &str, key: &str, value: Vec<u8>) -> Result<(), StoreError>;

    fn has(&self, table: &str, key: &str) -> Result<bool, StoreError> {
        Ok(self.get(table, key)?.is_some())
    }

    /// Deletes a key. Returns `true` if it existed.
    fn remove(&mut self, table: &str, key: &str) -> Result<bool, StoreError>;

    fn clear(&mut self, table: &str) -> Result<(), StoreError>;

    /// Keys of a table in ascending order.
    fn keys(&self, table: &str) -> Result<Vec<String>, StoreError>;

    /// Version at which the key was last written, if present.
    fn version(&self, table: &str, key: &str) -> Result<Option<u64>, StoreError>;
}

/// Reads and decodes a JSON record. Decode failures surface as
/// [`StoreError::Corrupt`].
pub fn read_json<T, S>(store: &S, table: &str, key: &str) -> Result<Option<T>, StoreError>
where
    T: DeserializeOwned,
    S: KvStore + ?Sized,
{
    let Some(bytes) = store.get(table, key)? else {
        return Ok(None);
    };
    serde_json::from_slice(&bytes)
        .map(Some)
        .map_err(|e| StoreError::Corrupt {
            table: table.to_string(),
            key: key.to_string(),
            reason: e.to_string(),
        })
}

/// Encodes a record as JSON and writes it.
pub fn write_json<T, S>(store: &mut S, table: &str, key: &str, value: &T) -> Result<(), StoreError>
where
    T: Serialize + ?Sized,
    S: KvStore + ?Sized,
{
    let bytes = serde_json::to_vec(value).map_err(|e| StoreError::Backend(e.to_string()))?;
    store.set(table, key, bytes)
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
struct Entry {
    version: u64,
    #[serde(with = "hex_bytes")]
    value: Vec<u8>,
}

/// In-memory store with per-entry versions.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MemoryStore {
    version: u64,
    tables: BTreeMap<String, BTreeMap<String, Entry>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Latest committed version across all tables.
    pub fn current_version(&self) -> u64 {
        self.version
    }

    /// Starts a transaction. Dropping it without [`Transaction::commit`]
    /// discards every write.
    pub fn begin(&mut self) -> Transaction<'_> {
        Transaction {
            base: self,
            writes: BTreeMap::new(),
            cleared: BTreeSet::new(),
        }
    }

    /// Runs `f` inside a transaction, committing only if it returns `Ok`.
    pub fn transact<T, E, F>(&mut self, f: F) -> Result<T, E>
    where
        F: FnOnce(&mut Transaction<'_>) -> Result<T, E>,
    {
        let mut tx = self.begin();
        let out = f(&mut tx)?;
        tx.commit();
        Ok(out)
    }

    /// Loads a snapshot written by [`MemoryStore::save`]. A missing file
    /// yields an empty store.
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }
        let bytes = fs_guard::read_bounded(path, MAX_SNAPSHOT_BYTES)?;
        Ok(serde_json::from_slice(&bytes)?)
    }

    /// Writes a snapshot of every table.
    pub fn save(&self, path: &Path) -> anyhow::Result<()> {
        fs_guard::write_replace(path, &serde_json::to_vec_pretty(self)?)
    }

    fn bump(&mut self) -> u64 {
        self.version += 1;
        self.version
    }
}

impl KvStore for MemoryStore {
    fn get(&self, table: &str, key: &str) -> Result<Option<Vec<u8>>, StoreError> {
        Ok(self
            .tables
            .get(table)
            .and_then(|t| t.get(key))
            .map(|e| e.value.clone()))
    }

    fn set(&mut self, table: &str, key: &str, value: Vec<u8>) -> Result<(), StoreError> {
        let version = self.bump();
        self.tables
            .entry(table.to_string())
            .or_default()
            .insert(key.to_string(), Entry { version, value });
        Ok(())
    }

    fn remove(&mut self, table: &str, key: &str) -> Result<bool, StoreError> {
        let removed = self
            .tables
            .get_mut(table)
            .and_then(|t| t.remove(key))
            .is_some();
        if removed {
            self.bump();
        }
        Ok(removed)
    }

    fn clear(&mut self, table: &str) -> Result<(), StoreError> {
        if self.tables.remove(table).is_some() {
            self.bump();
        }
        Ok(())
    }

    fn keys(&self, table: &str) -> Result<Vec<String>, StoreError> {
        Ok(self
            .tables
            .get(table)
            .map(|t| t.keys().cloned().collect())
            .unwrap_or_default())
    }

    fn version(&self, table: &str, key: &str) -> Result<Option<u64>, StoreError> {
        Ok(self
            .tables
            .get(table)
            .and_then(|t| t.get(key))
            .map(|e| e.version))
    }
}

enum PendingWrite {
    Put(Vec<u8>),
    Delete,
}

/// Buffered writes over a [`MemoryStore`]. Reads see the transaction's own
/// writes first, then the committed state.
pub struct Transaction<'a> {
    base: &'a mut MemoryStore,
    writes: BTreeMap<(String, String), PendingWrite>,
    cleared: BTreeSet<String>,
}

impl Transaction<'_> {
    /// Applies every buffered write atomically.
    pub fn commit(self) {
        let Transaction {
            base,
            writes,
            cleared,
        } = self;
        for table in cleared {
            base.tables.remove(&table);
            base.bump();
        }
        for ((table, key), write) in writes {
            match write {
                PendingWrite::Put(value) => {
                    let version = base.bump();
                    base.tables
                        .entry(table)
                        .or_default()
                        .insert(key, Entry { version, value });
                }
                PendingWrite::Delete => {
                    if let Some(t) = base.tables.get_mut(&table) {
                        if t.remove(&key).is_some() {
                            base.bump();
                        }
                    }
                }
            }
        }
    }

    fn committed(&self, table: &str, key: &str) -> Option<&Entry> {
        if self.cleared.contains(table) {
            return None;
        }
        self.base.tables.get(table).and_then(|t| t.get(key))
    }
}

impl KvStore for Transaction<'_> {
    fn get(&self, table: &str, key: &str) -> Result<Option<Vec<u8>>, StoreError> {
        match self.writes.get(&(table.to_string(), key.to_string())) {
            Some(PendingWrite::Put(v)) => Ok(Some(v.clone())),
            Some(PendingWrite::Delete) => Ok(None),
            None => Ok(self.committed(table, key).map(|e| e.value.clone())),
        }
    }

    fn set(&mut self, table: &str, key: &str, value: Vec<u8>) -> Result<(), StoreError> {
        self.writes
            .insert((table.to_string(), key.to_string()), PendingWrite::Put(value));
        Ok(())
    }

    fn remove(&mut self, table: &str, key: &str) -> Result<bool, StoreError> {
        let existed = self.has(table, key)?;
        self.writes
            .insert((table.to_string(), key.to_string()), PendingWrite::Delete);
        Ok(existed)
    }

    fn clear(&mut self, table: &str) -> Result<(), StoreError> {
        self.writes.retain(|(t, _), _| t != table);
        self.cleared.insert(table.to_string());
        Ok(())
    }

    fn keys(&self, table: &str) -> Result<Vec<String>, StoreError> {
        let mut keys: BTreeSet<String> = if self.cleared.contains(table) {
            BTreeSet::new()
        } else {
            self.base
                .tables
                .get(table)
                .map(|t| t.keys().cloned().collect())
                .unwrap_or_default()
        };
        for ((t, k), write) in &self.writes {
            if t != table {
                continue;
            }
            match write {
                PendingWrite::Put(_) => {
                    keys.insert(k.clone());
                }
                PendingWrite::Delete => {
                    keys.remove(k);
                }
            }
        }
        Ok(keys.into_iter().collect())
    }

    /// Uncommitted writes have no version yet and report `None`.
    fn version(&self, table: &str, key: &str) -> Result<Option<u64>, StoreError> {
        if self
            .writes
            .contains_key(&(table.to_string(), key.to_string()))
        {
            return Ok(None);
        }
        Ok(self.committed(table, key).map(|e| e.version))
    }
}

mod hex_bytes {
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(bytes: &[u8], s: S) -> Result<S::Ok, S::Error> {
        s.serialize_str(&hex::encode(bytes))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Vec<u8>, D::Error> {
        let s = String::deserialize(d)?;
        hex::decode(s).map_err(serde::de::Error::custom)
    }
}
