//! Key-value persistence for the showcase sync layer.
//!
//! The sync managers persist small JSON documents (cache entries, the
//! request queue, background tasks, version histories) under string keys.
//! They only ever talk to the [`KvStore`] trait, so the backing store can be
//! swapped without touching them:
//!
//! - [`MemoryStore`] stands in for per-tab session storage
//! - [`SqliteStore`] is the durable store, one `kv` table in a SQLite file
//!
//! Values are opaque strings; [`read_json`] and [`write_json`] layer
//! `serde_json` on top.

mod error;
mod memory;
mod sqlite;

pub use error::{StorageError, StorageResult};
pub use memory::MemoryStore;
pub use sqlite::SqliteStore;

use serde::Serialize;
use serde::de::DeserializeOwned;

/// A string-keyed store of string values.
pub trait KvStore: Send + Sync {
    /// Returns the value stored under `key`, if any.
    fn get(&self, key: &str) -> StorageResult<Option<String>>;

    /// Stores `value` under `key`, replacing any previous value.
    fn set(&self, key: &str, value: &str) -> StorageResult<()>;

    /// Removes `key`. Removing a missing key is not an error.
    fn delete(&self, key: &str) -> StorageResult<()>;

    /// Returns every key starting with `prefix`, in ascending order.
    fn keys_with_prefix(&self, prefix: &str) -> StorageResult<Vec<String>>;
}

/// Reads and deserializes the JSON value stored under `key`.
pub fn read_json<T: DeserializeOwned>(
    store: &dyn KvStore,
    key: &str,
) -> StorageResult<Option<T>> {
    match store.get(key)? {
        Some(raw) => Ok(Some(serde_json::from_str(&raw)?)),
        None => Ok(None),
    }
}

/// Serializes `value` as JSON and stores it under `key`.
pub fn write_json<T: Serialize + ?Sized>(
    store: &dyn KvStore,
    key: &str,
    value: &T,
) -> StorageResult<()> {
    let raw = serde_json::to_string(value)?;
    store.set(key, &raw)
}
