//! Durable string-keyed storage
//!
//! Small crash-safe KV layer backing the snapshot, history and intraday
//! series stores. Each key is one JSON file under the data directory;
//! writes go through a temp file + rename so a crash never leaves a
//! half-written value. Changes are announced on a broadcast channel.

use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tokio::sync::broadcast;
use tracing::debug;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("io error for key {key}: {source}")]
    Io {
        key: String,
        #[source]
        source: std::io::Error,
    },
    #[error("invalid key {0:?}")]
    InvalidKey(String),
}

/// Crash-safe string-keyed storage with an observable change stream
pub trait KvStore: Send + Sync {
    fn get(&self, key: &str) -> Result<Option<String>, StoreError>;
    fn put(&self, key: &str, value: &str) -> Result<(), StoreError>;
    fn remove(&self, key: &str) -> Result<(), StoreError>;
    /// Remove every stored key
    fn clear(&self) -> Result<(), StoreError>;
    /// Keys are announced on this channel after each successful put/remove
    fn subscribe(&self) -> broadcast::Receiver<String>;
}

/// One JSON file per key under `dir`
pub struct FileKvStore {
    dir: PathBuf,
    changes: broadcast::Sender<String>,
}

impl FileKvStore {
    pub fn new(dir: impl AsRef<Path>) -> Result<Self, StoreError> {
        let dir = dir.as_ref().to_path_buf();
        fs::create_dir_all(&dir).map_err(|source| StoreError::Io {
            key: dir.display().to_string(),
            source,
        })?;
        let (changes, _) = broadcast::channel(64);
        Ok(Self { dir, changes })
    }

    fn path_for(&self, key: &str) -> Result<PathBuf, StoreError> {
        if key.is_empty()
            || !key
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_'))
        {
            return Err(StoreError::InvalidKey(key.to_string()));
        }
        Ok(self.dir.join(format!("{key}.json")))
    }

    fn announce(&self, key: &str) {
        // No subscribers is fine
        let _ = self.changes.send(key.to_string());
    }
}

impl KvStore for FileKvStore {
    fn get(&self, key: &str) -> Result<Option<String>, StoreError> {
        let path = self.path_for(key)?;
        match fs::read_to_string(&path) {
            Ok(value) => Ok(Some(value)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(source) => Err(StoreError::Io {
                key: key.to_string(),
                source,
            }),
        }
    }

    fn put(&self, key: &str, value: &str) -> Result<(), StoreError> {
        let path = self.path_for(key)?;
        let tmp = self.dir.join(format!(".{key}.tmp"));

        let io = |source| StoreError::Io {
            key: key.to_string(),
            source,
        };

        let mut file = fs::File::create(&tmp).map_err(io)?;
        file.write_all(value.as_bytes()).map_err(io)?;
        file.sync_all().map_err(io)?;
        fs::rename(&tmp, &path).map_err(io)?;

        debug!(key, bytes = value.len(), "kv put");
        self.announce(key);
        Ok(())
    }

    fn remove(&self, key: &str) -> Result<(), StoreError> {
        let path = self.path_for(key)?;
        match fs::remove_file(&path) {
            Ok(()) => {
                self.announce(key);
                Ok(())
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(source) => Err(StoreError::Io {
                key: key.to_string(),
                source,
            }),
        }
    }

    fn clear(&self) -> Result<(), StoreError> {
        let entries = fs::read_dir(&self.dir).map_err(|source| StoreError::Io {
            key: self.dir.display().to_string(),
            source,
        })?;
        for entry in entries.flatten() {
            let path = entry.path();
            let is_value_file = path
                .extension()
                .and_then(|e| e.to_str())
                .map(|e| e.eq_ignore_ascii_case("json"))
                .unwrap_or(false);
            if path.is_file() && is_value_file {
                fs::remove_file(&path).map_err(|source| StoreError::Io {
                    key: path.display().to_string(),
                    source,
                })?;
            }
        }
        self.announce("*");
        Ok(())
    }

    fn subscribe(&self) -> broadcast::Receiver<String> {
        self.changes.subscribe()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn temp_store(test_name: &str) -> (FileKvStore, PathBuf) {
        let dir = std::env::temp_dir().join(format!("aurum_kv_{}_{}", test_name, uuid::Uuid::new_v4()));
        let store = FileKvStore::new(&dir).unwrap();
        (store, dir)
    }

    #[test]
    fn put_get_round_trip() {
        let (store, dir) = temp_store("round_trip");
        assert_eq!(store.get("snapshot").unwrap(), None);
        store.put("snapshot", r#"{"usd":"1850"}"#).unwrap();
        assert_eq!(
            store.get("snapshot").unwrap().as_deref(),
            Some(r#"{"usd":"1850"}"#)
        );
        let _ = fs::remove_dir_all(dir);
    }

    #[test]
    fn put_overwrites_atomically() {
        let (store, dir) = temp_store("overwrite");
        store.put("k", "one").unwrap();
        store.put("k", "two").unwrap();
        assert_eq!(store.get("k").unwrap().as_deref(), Some("two"));
        // No temp leftovers
        let leftovers = fs::read_dir(&dir)
            .unwrap()
            .filter_map(|e| e.ok())
            .filter(|e| e.file_name().to_string_lossy().ends_with(".tmp"))
            .count();
        assert_eq!(leftovers, 0);
        let _ = fs::remove_dir_all(dir);
    }

    #[test]
    fn clear_removes_all_values() {
        let (store, dir) = temp_store("clear");
        store.put("a", "1").unwrap();
        store.put("b", "2").unwrap();
        store.clear().unwrap();
        assert_eq!(store.get("a").unwrap(), None);
        assert_eq!(store.get("b").unwrap(), None);
        let _ = fs::remove_dir_all(dir);
    }

    #[test]
    fn invalid_keys_are_rejected() {
        let (store, dir) = temp_store("invalid");
        assert!(store.put("../escape", "x").is_err());
        assert!(store.get("").is_err());
        let _ = fs::remove_dir_all(dir);
    }

    #[test]
    fn changes_are_announced() {
        let (store, dir) = temp_store("changes");
        let mut rx = store.subscribe();
        store.put("snapshot", "{}").unwrap();
        assert_eq!(rx.try_recv().unwrap(), "snapshot");
        let _ = fs::remove_dir_all(dir);
    }
}
