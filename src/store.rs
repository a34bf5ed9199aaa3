//! Persistence port for session-scoped state (chat history, progress).
//!
//! Values are JSON strings under string keys. Sessions load on init and save on
//! change; the file store survives restarts, the memory store is for tests and
//! throwaway deployments.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::RwLock;

use serde::de::DeserializeOwned;
use tracing::{debug, warn};

pub const CHAT_HISTORY_KEY: &str = "chatbot-history";
pub const PROGRESS_KEY: &str = "codegym-progress";

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
  #[error("store io error: {0}")]
  Io(#[from] std::io::Error),
  #[error("store lock poisoned")]
  Poisoned,
}

pub trait KvStore: Send + Sync {
  fn get(&self, key: &str) -> Result<Option<String>, StoreError>;
  fn set(&self, key: &str, value: &str) -> Result<(), StoreError>;
  fn remove(&self, key: &str) -> Result<(), StoreError>;
}

/// Key of a per-session entry, e.g. `sessions/<id>/chatbot-history`.
pub fn session_key(session_id: &str, key: &str) -> String {
  format!("sessions/{}/{}", session_id, key)
}

/// Typed read. A corrupt value is logged and treated as absent.
pub fn load_json<T: DeserializeOwned>(store: &dyn KvStore, key: &str) -> Option<T> {
  match store.get(key) {
    Ok(Some(raw)) => match serde_json::from_str::<T>(&raw) {
      Ok(v) => Some(v),
      Err(e) => {
        warn!(target: "session", %key, error = %e, "Discarding unreadable stored value");
        None
      }
    },
    Ok(None) => None,
    Err(e) => {
      warn!(target: "session", %key, error = %e, "Store read failed");
      None
    }
  }
}

#[derive(Default)]
pub struct MemoryStore {
  entries: RwLock<HashMap<String, String>>,
}

impl MemoryStore {
  pub fn new() -> Self {
    Self::default()
  }
}

impl KvStore for MemoryStore {
  fn get(&self, key: &str) -> Result<Option<String>, StoreError> {
    Ok(self.entries.read().map_err(|_| StoreError::Poisoned)?.get(key).cloned())
  }

  fn set(&self, key: &str, value: &str) -> Result<(), StoreError> {
    self.entries.write().map_err(|_| StoreError::Poisoned)?.insert(key.to_string(), value.to_string());
    Ok(())
  }

  fn remove(&self, key: &str) -> Result<(), StoreError> {
    self.entries.write().map_err(|_| StoreError::Poisoned)?.remove(key);
    Ok(())
  }
}

/// One `<key>.json` file per entry under `root`; `/` in keys maps to directories.
pub struct FileStore {
  root: PathBuf,
}

impl FileStore {
  pub fn new(root: impl Into<PathBuf>) -> Result<Self, StoreError> {
    let root = root.into();
    std::fs::create_dir_all(&root)?;
    Ok(Self { root })
  }

  pub fn root(&self) -> &Path {
    &self.root
  }

  fn path_for(&self, key: &str) -> PathBuf {
    let mut path = self.root.clone();
    let segments: Vec<String> = key.split('/').filter(|s| !s.is_empty()).map(sanitize_segment).collect();
    if let Some((last, dirs)) = segments.split_last() {
      for d in dirs {
        path.push(d);
      }
      path.push(format!("{}.json", last));
    }
    path
  }
}

/// Keep keys inside the root without merging distinct keys: `[A-Za-z0-9_-]`
/// pass through, every other byte becomes `~xx` (so `.` is `~2e`).
fn sanitize_segment(segment: &str) -> String {
  let mut out = String::with_capacity(segment.len());
  for b in segment.bytes() {
    if b.is_ascii_alphanumeric() || b == b'-' || b == b'_' {
      out.push(char::from(b));
    } else {
      out.push_str(&format!("~{:02x}", b));
    }
  }
  out
}

impl KvStore for FileStore {
  fn get(&self, key: &str) -> Result<Option<String>, StoreError> {
    match std::fs::read_to_string(self.path_for(key)) {
      Ok(s) => Ok(Some(s)),
      Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
      Err(e) => Err(e.into()),
    }
  }

  fn set(&self, key: &str, value: &str) -> Result<(), StoreError> {
    let path = self.path_for(key);
    if let Some(parent) = path.parent() {
      std::fs::create_dir_all(parent)?;
    }
    // Write-then-rename so readers never see a half-written file.
    let tmp = path.with_extension("json.tmp");
    std::fs::write(&tmp, value)?;
    std::fs::rename(&tmp, &path)?;
    debug!(target: "session", %key, bytes = value.len(), "Stored value");
    Ok(())
  }

  fn remove(&self, key: &str) -> Result<(), StoreError> {
    match std::fs::remove_file(self.path_for(key)) {
      Ok(()) => Ok(()),
      Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
      Err(e) => Err(e.into()),
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  fn exercise(store: &dyn KvStore) {
    let key = session_key("abc", CHAT_HISTORY_KEY);
    assert_eq!(store.get(&key).unwrap(), None);
    store.set(&key, &serde_json::to_string(&vec!["a", "b"]).unwrap()).unwrap();
    assert_eq!(load_json::<Vec<String>>(store, &key), Some(vec!["a".to_string(), "b".to_string()]));
    store.remove(&key).unwrap();
    store.remove(&key).unwrap();
    assert_eq!(store.get(&key).unwrap(), None);
  }

  #[test]
  fn memory_store_round_trip_and_remove() {
    exercise(&MemoryStore::new());
  }

  #[test]
  fn file_store_round_trip_and_remove() {
    let dir = tempfile::tempdir().unwrap();
    let store = FileStore::new(dir.path()).unwrap();
    exercise(&store);
  }

  #[test]
  fn file_store_keeps_keys_inside_root() {
    let dir = tempfile::tempdir().unwrap();
    let store = FileStore::new(dir.path()).unwrap();
    let path = store.path_for("sessions/../../etc/passwd");
    assert!(path.starts_with(dir.path()));
    assert!(!path.to_string_lossy().contains(".."));
  }

  #[test]
  fn file_store_keeps_lookalike_keys_apart() {
    let dir = tempfile::tempdir().unwrap();
    let store = FileStore::new(dir.path()).unwrap();
    let dotted = session_key("alice.1", CHAT_HISTORY_KEY);
    let underscored = session_key("alice_1", CHAT_HISTORY_KEY);
    assert_ne!(store.path_for(&dotted), store.path_for(&underscored));

    store.set(&dotted, "[1]").unwrap();
    store.set(&underscored, "[2]").unwrap();
    assert_eq!(store.get(&dotted).unwrap().as_deref(), Some("[1]"));
    assert_eq!(store.get(&underscored).unwrap().as_deref(), Some("[2]"));
  }

  #[test]
  fn corrupt_values_load_as_none() {
    let store = MemoryStore::new();
    store.set(PROGRESS_KEY, "{not json").unwrap();
    assert_eq!(load_json::<Vec<u8>>(&store, PROGRESS_KEY), None);
  }
}
