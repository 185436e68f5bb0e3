use serde_json::Value;
use std::collections::BTreeMap;
use tokio::sync::RwLock;

use super::{Mutator, Storage, StorageFuture, key_string};
use crate::error::StorageError;

type Key = Vec<String>;

fn owned(key: &[&str]) -> Key {
    key.iter().map(|s| s.to_string()).collect()
}

/// In-process storage backed by a sorted map.
#[derive(Debug, Default)]
pub struct MemoryStorage {
    records: RwLock<BTreeMap<Key, Value>>,
}

impl MemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn len(&self) -> usize {
        self.records.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.records.read().await.is_empty()
    }
}

impl Storage for MemoryStorage {
    fn read<'a>(&'a self, key: &'a [&'a str]) -> StorageFuture<'a, Option<Value>> {
        Box::pin(async move { Ok(self.records.read().await.get(&owned(key)).cloned()) })
    }

    fn write<'a>(&'a self, key: &'a [&'a str], value: Value) -> StorageFuture<'a, ()> {
        Box::pin(async move {
            self.records.write().await.insert(owned(key), value);
            Ok(())
        })
    }

    fn update<'a>(&'a self, key: &'a [&'a str], mutator: Mutator) -> StorageFuture<'a, Value> {
        Box::pin(async move {
            let mut records = self.records.write().await;
            let record = records
                .get_mut(&owned(key))
                .ok_or_else(|| StorageError::NotFound(key_string(key)))?;
            mutator(record);
            Ok(record.clone())
        })
    }

    fn remove<'a>(&'a self, key: &'a [&'a str]) -> StorageFuture<'a, ()> {
        Box::pin(async move {
            self.records.write().await.remove(&owned(key));
            Ok(())
        })
    }

    fn list<'a>(&'a self, prefix: &'a [&'a str]) -> StorageFuture<'a, Vec<Vec<String>>> {
        Box::pin(async move {
            let start = owned(prefix);
            let records = self.records.read().await;
            Ok(records
                .range(start.clone()..)
                .map(|(k, _)| k)
                .take_while(|k| k.starts_with(&start))
                .cloned()
                .collect())
        })
    }
}
