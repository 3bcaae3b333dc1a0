//! Durable keyed storage
//!
//! One file per key under the data directory. A completed `write` or
//! `append` is visible to subsequent reads across a process restart: writes
//! go through a temp file + rename so a crash never leaves a torn record,
//! and both paths sync before returning.
//!
//! `MemoryKeyedStore` backs the same trait for tests.

use std::collections::HashMap;
use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::RwLock;
use tracing::debug;

use crate::error::{Result, SigwatchError};

/// Minimal durable keyed storage contract shared by the dedup store and the
/// replay snapshot buffer.
pub trait KeyedStore: Send + Sync {
    /// Read the full value for a key, or None if absent
    fn read(&self, key: &str) -> Result<Option<Vec<u8>>>;
    /// Replace the value for a key; durable before returning
    fn write(&self, key: &str, bytes: &[u8]) -> Result<()>;
    /// Append bytes to a key's value; durable before returning
    fn append(&self, key: &str, bytes: &[u8]) -> Result<()>;
    /// Remove a key; absent keys are not an error
    fn delete(&self, key: &str) -> Result<()>;
    /// List all keys currently present
    fn keys(&self) -> Result<Vec<String>>;
}

/// File-backed keyed store: one file per key under a root directory
pub struct FileKeyedStore {
    root: PathBuf,
}

impl FileKeyedStore {
    pub fn new(root: impl AsRef<Path>) -> Result<Self> {
        let root = root.as_ref().to_path_buf();
        fs::create_dir_all(&root)
            .map_err(|e| SigwatchError::TransientIo(format!("create {}: {}", root.display(), e)))?;
        Ok(Self { root })
    }

    /// Keys may contain characters that are not filename-safe (":" is, "/"
    /// is not); escape the unsafe ones.
    fn path_for(&self, key: &str) -> PathBuf {
        let safe: String = key
            .chars()
            .map(|c| match c {
                '/' | '\\' | '\0' => '_',
                c => c,
            })
            .collect();
        self.root.join(safe)
    }

    fn key_for(path: &Path) -> Option<String> {
        path.file_name().map(|n| n.to_string_lossy().into_owned())
    }
}

impl KeyedStore for FileKeyedStore {
    fn read(&self, key: &str) -> Result<Option<Vec<u8>>> {
        let path = self.path_for(key);
        match fs::read(&path) {
            Ok(bytes) => Ok(Some(bytes)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(SigwatchError::TransientIo(format!(
                "read {}: {}",
                path.display(),
                e
            ))),
        }
    }

    fn write(&self, key: &str, bytes: &[u8]) -> Result<()> {
        let path = self.path_for(key);
        let tmp = path.with_extension("tmp");
        {
            let mut file = fs::File::create(&tmp).map_err(|e| {
                SigwatchError::TransientIo(format!("create {}: {}", tmp.display(), e))
            })?;
            file.write_all(bytes)?;
            file.sync_data()?;
        }
        fs::rename(&tmp, &path)
            .map_err(|e| SigwatchError::TransientIo(format!("rename {}: {}", path.display(), e)))?;
        Ok(())
    }

    fn append(&self, key: &str, bytes: &[u8]) -> Result<()> {
        let path = self.path_for(key);
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .map_err(|e| SigwatchError::TransientIo(format!("open {}: {}", path.display(), e)))?;
        file.write_all(bytes)?;
        file.sync_data()?;
        Ok(())
    }

    fn delete(&self, key: &str) -> Result<()> {
        let path = self.path_for(key);
        match fs::remove_file(&path) {
            Ok(()) => {
                debug!(key, "deleted record");
                Ok(())
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(SigwatchError::TransientIo(format!(
                "delete {}: {}",
                path.display(),
                e
            ))),
        }
    }

    fn keys(&self) -> Result<Vec<String>> {
        let mut keys = Vec::new();
        for entry in fs::read_dir(&self.root)
            .map_err(|e| SigwatchError::TransientIo(format!("list {}: {}", self.root.display(), e)))?
        {
            let entry = entry?;
            let path = entry.path();
            if path.extension().map(|e| e == "tmp").unwrap_or(false) {
                continue;
            }
            if path.is_file() {
                if let Some(key) = Self::key_for(&path) {
                    keys.push(key);
                }
            }
        }
        keys.sort();
        Ok(keys)
    }
}

/// In-memory keyed store for tests
#[derive(Default)]
pub struct MemoryKeyedStore {
    map: RwLock<HashMap<String, Vec<u8>>>,
}

impl MemoryKeyedStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl KeyedStore for MemoryKeyedStore {
    fn read(&self, key: &str) -> Result<Option<Vec<u8>>> {
        let map = self.map.read().expect("store lock poisoned");
        Ok(map.get(key).cloned())
    }

    fn write(&self, key: &str, bytes: &[u8]) -> Result<()> {
        let mut map = self.map.write().expect("store lock poisoned");
        map.insert(key.to_string(), bytes.to_vec());
        Ok(())
    }

    fn append(&self, key: &str, bytes: &[u8]) -> Result<()> {
        let mut map = self.map.write().expect("store lock poisoned");
        map.entry(key.to_string()).or_default().extend_from_slice(bytes);
        Ok(())
    }

    fn delete(&self, key: &str) -> Result<()> {
        let mut map = self.map.write().expect("store lock poisoned");
        map.remove(key);
        Ok(())
    }

    fn keys(&self) -> Result<Vec<String>> {
        let map = self.map.read().expect("store lock poisoned");
        let mut keys: Vec<String> = map.keys().cloned().collect();
        keys.sort();
        Ok(keys)
    }
}

/// Save a value as pretty JSON, atomically (temp file + rename)
pub fn save_json<T: serde::Serialize>(path: &Path, value: &T) -> Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    let json = serde_json::to_string_pretty(value)?;
    let tmp = path.with_extension("json.tmp");
    fs::write(&tmp, json)?;
    fs::rename(&tmp, path)
        .map_err(|e| SigwatchError::TransientIo(format!("rename {}: {}", path.display(), e)))?;
    Ok(())
}

/// Load a JSON value; None if the file does not exist
pub fn load_json<T: serde::de::DeserializeOwned>(path: &Path) -> Result<Option<T>> {
    match fs::read_to_string(path) {
        Ok(json) => Ok(Some(serde_json::from_str(&json)?)),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
        Err(e) => Err(SigwatchError::TransientIo(format!(
            "read {}: {}",
            path.display(),
            e
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    fn temp_store() -> (FileKeyedStore, PathBuf) {
        let dir = std::env::temp_dir().join(format!("sigwatch-test-{}", Uuid::new_v4()));
        (FileKeyedStore::new(&dir).unwrap(), dir)
    }

    #[test]
    fn test_write_then_read_roundtrip() {
        let (store, dir) = temp_store();
        store.write("BTC:LONG:4h", b"hello").unwrap();
        assert_eq!(store.read("BTC:LONG:4h").unwrap(), Some(b"hello".to_vec()));
        assert_eq!(store.read("missing").unwrap(), None);
        fs::remove_dir_all(dir).ok();
    }

    #[test]
    fn test_append_accumulates() {
        let (store, dir) = temp_store();
        store.append("journal", b"line1\n").unwrap();
        store.append("journal", b"line2\n").unwrap();
        assert_eq!(store.read("journal").unwrap(), Some(b"line1\nline2\n".to_vec()));
        fs::remove_dir_all(dir).ok();
    }

    #[test]
    fn test_delete_and_keys() {
        let (store, dir) = temp_store();
        store.write("b", b"2").unwrap();
        store.write("a", b"1").unwrap();
        assert_eq!(store.keys().unwrap(), vec!["a".to_string(), "b".to_string()]);
        store.delete("a").unwrap();
        store.delete("a").unwrap(); // absent delete is fine
        assert_eq!(store.keys().unwrap(), vec!["b".to_string()]);
        fs::remove_dir_all(dir).ok();
    }

    #[test]
    fn test_memory_store_matches_contract() {
        let store = MemoryKeyedStore::new();
        store.write("k", b"v").unwrap();
        store.append("k", b"2").unwrap();
        assert_eq!(store.read("k").unwrap(), Some(b"v2".to_vec()));
        store.delete("k").unwrap();
        assert_eq!(store.read("k").unwrap(), None);
    }
}
