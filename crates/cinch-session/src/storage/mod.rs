//! Key-path storage for session records.
//!
//! Records are JSON values addressed by a path of string segments, e.g.
//! `["part", message_id, part_id]`. Two backends are provided:
//!
//! - [`MemoryStorage`]: a sorted in-process map, for tests and replays.
//! - [`FileStorage`]: one JSON file per key under a root directory, written
//!   atomically (temp file, then rename).
//!
//! Both assume a single writer per key; [`Storage::update`] is atomic with
//! respect to other updates through the same instance.

mod file;
mod memory;

pub use file::FileStorage;
pub use memory::MemoryStorage;

use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::Value;
use std::future::Future;
use std::pin::Pin;

use crate::error::StorageError;

/// Boxed future returned by [`Storage`] methods.
pub type StorageFuture<'a, T> = Pin<Box<dyn Future<Output = Result<T, StorageError>> + Send + 'a>>;

/// In-place edit applied by [`Storage::update`].
pub type Mutator = Box<dyn FnOnce(&mut Value) + Send>;

/// Render a key for logs and errors.
pub fn key_string(key: &[&str]) -> String {
    key.join("/")
}

/// A key-value store over JSON records.
pub trait Storage: Send + Sync {
    /// The record at `key`, or `None` if absent.
    fn read<'a>(&'a self, key: &'a [&'a str]) -> StorageFuture<'a, Option<Value>>;

    /// Replace the record at `key`.
    fn write<'a>(&'a self, key: &'a [&'a str], value: Value) -> StorageFuture<'a, ()>;

    /// Apply `mutator` to the record at `key` and return the new value.
    /// Fails with [`StorageError::NotFound`] if there is no record.
    fn update<'a>(&'a self, key: &'a [&'a str], mutator: Mutator) -> StorageFuture<'a, Value>;

    /// Delete the record at `key`. Removing a missing key is not an error.
    fn remove<'a>(&'a self, key: &'a [&'a str]) -> StorageFuture<'a, ()>;

    /// Every key under `prefix`, sorted.
    fn list<'a>(&'a self, prefix: &'a [&'a str]) -> StorageFuture<'a, Vec<Vec<String>>>;
}

/// Read and decode a typed record.
pub async fn read_json<T: DeserializeOwned>(
    storage: &dyn Storage,
    key: &[&str],
) -> Result<Option<T>, StorageError> {
    let Some(value) = storage.read(key).await? else {
        return Ok(None);
    };
    serde_json::from_value(value)
        .map(Some)
        .map_err(|source| StorageError::Json {
            key: key_string(key),
            source,
        })
}

/// Encode and write a typed record.
pub async fn write_json<T: Serialize>(
    storage: &dyn Storage,
    key: &[&str],
    record: &T,
) -> Result<(), StorageError> {
    let value = serde_json::to_value(record).map_err(|source| StorageError::Json {
        key: key_string(key),
        source,
    })?;
    storage.write(key, value).await
}
