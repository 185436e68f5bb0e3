//! One JSON file per key.
//!
//! Layout:
//! ```text
//! root/
//!   session/ses_01.json
//!   message/ses_01/msg_01.json
//!   part/msg_01/prt_01.json
//! ```

use serde_json::Value;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use tokio::sync::Mutex;
use tracing::{trace, warn};

use super::{Mutator, Storage, StorageFuture, key_string};
use crate::error::StorageError;

const EXT: &str = "json";

/// Storage rooted at a directory on disk.
#[derive(Debug)]
pub struct FileStorage {
    root: PathBuf,
    /// Serializes read-modify-write cycles.
    update_lock: Mutex<()>,
}

impl FileStorage {
    /// Create storage rooted at `root`, creating the directory if needed.
    pub async fn new(root: impl Into<PathBuf>) -> Result<Self, StorageError> {
        let root = root.into();
        tokio::fs::create_dir_all(&root)
            .await
            .map_err(|source| StorageError::Io {
                key: root.display().to_string(),
                source,
            })?;
        Ok(Self {
            root,
            update_lock: Mutex::new(()),
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn dir_for(&self, segments: &[&str]) -> PathBuf {
        segments.iter().fold(self.root.clone(), |p, s| p.join(s))
    }

    fn path_for(&self, key: &[&str]) -> PathBuf {
        match key.split_last() {
            Some((last, parents)) => self.dir_for(parents).join(format!("{last}.{EXT}")),
            None => self.root.join(format!("_.{EXT}")),
        }
    }

    async fn read_at(&self, key: &[&str]) -> Result<Option<Value>, StorageError> {
        let path = self.path_for(key);
        let bytes = match tokio::fs::read(&path).await {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
            Err(source) => {
                return Err(StorageError::Io {
                    key: key_string(key),
                    source,
                });
            }
        };
        serde_json::from_slice(&bytes)
            .map(Some)
            .map_err(|source| StorageError::Json {
                key: key_string(key),
                source,
            })
    }

    /// Atomic write: serialize to a temp file, then rename into place.
    ///
    /// Each write gets its own temp file so concurrent writers of one key
    /// never rename each other's file away.
    async fn write_at(&self, key: &[&str], value: &Value) -> Result<(), StorageError> {
        let io_err = |source| StorageError::Io {
            key: key_string(key),
            source,
        };
        let final_path = self.path_for(key);
        let Some(dir) = final_path.parent() else {
            return Err(StorageError::NotFound(key_string(key)));
        };
        tokio::fs::create_dir_all(dir).await.map_err(io_err)?;

        let file_name = final_path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        let tmp_path = dir.join(format!(".{file_name}.{:016x}.tmp", rand::random::<u64>()));

        let json = serde_json::to_vec_pretty(value).map_err(|source| StorageError::Json {
            key: key_string(key),
            source,
        })?;
        tokio::fs::write(&tmp_path, json).await.map_err(io_err)?;
        if let Err(source) = tokio::fs::rename(&tmp_path, &final_path).await {
            let _ = tokio::fs::remove_file(&tmp_path).await;
            return Err(io_err(source));
        }
        trace!("wrote {}", final_path.display());
        Ok(())
    }
}

impl Storage for FileStorage {
    fn read<'a>(&'a self, key: &'a [&'a str]) -> StorageFuture<'a, Option<Value>> {
        Box::pin(self.read_at(key))
    }

    fn write<'a>(&'a self, key: &'a [&'a str], value: Value) -> StorageFuture<'a, ()> {
        Box::pin(async move { self.write_at(key, &value).await })
    }

    fn update<'a>(&'a self, key: &'a [&'a str], mutator: Mutator) -> StorageFuture<'a, Value> {
        Box::pin(async move {
            let _guard = self.update_lock.lock().await;
            let mut value = self
                .read_at(key)
                .await?
                .ok_or_else(|| StorageError::NotFound(key_string(key)))?;
            mutator(&mut value);
            self.write_at(key, &value).await?;
            Ok(value)
        })
    }

    fn remove<'a>(&'a self, key: &'a [&'a str]) -> StorageFuture<'a, ()> {
        Box::pin(async move {
            match tokio::fs::remove_file(self.path_for(key)).await {
                Ok(()) => Ok(()),
                Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
                Err(source) => Err(StorageError::Io {
                    key: key_string(key),
                    source,
                }),
            }
        })
    }

    fn list<'a>(&'a self, prefix: &'a [&'a str]) -> StorageFuture<'a, Vec<Vec<String>>> {
        Box::pin(async move {
            let base: Vec<String> = prefix.iter().map(|s| s.to_string()).collect();
            let mut keys = Vec::new();
            let mut pending = vec![(self.dir_for(prefix), base)];

            while let Some((dir, segments)) = pending.pop() {
                let mut entries = match tokio::fs::read_dir(&dir).await {
                    Ok(entries) => entries,
                    Err(e) if e.kind() == ErrorKind::NotFound => continue,
                    Err(source) => {
                        return Err(StorageError::Io {
                            key: dir.display().to_string(),
                            source,
                        });
                    }
                };
                loop {
                    let entry = match entries.next_entry().await {
                        Ok(Some(entry)) => entry,
                        Ok(None) => break,
                        Err(e) => {
                            warn!("stopping listing of {}: {e}", dir.display());
                            break;
                        }
                    };
                    let name = entry.file_name().to_string_lossy().into_owned();
                    if name.starts_with('.') {
                        continue;
                    }
                    let is_dir = entry.file_type().await.is_ok_and(|ft| ft.is_dir());
                    let mut child = segments.clone();
                    if is_dir {
                        child.push(name);
                        pending.push((entry.path(), child));
                    } else if let Some(stem) = name.strip_suffix(".json") {
                        child.push(stem.to_string());
                        keys.push(child);
                    }
                }
            }
            keys.sort();
            Ok(keys)
        })
    }
}
