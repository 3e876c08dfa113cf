// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Durable client storage for the session.
//!
//! String key-value contract with change notifications for mutations made by
//! *other* session holders (a second tab, another process). A writer never
//! observes its own writes — only [`MemoryStore::apply_external`] and its
//! platform equivalents fan out [`StoreChange`]s.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::{PoisonError, RwLock};

use tokio::sync::broadcast;

/// A mutation made by another session holder.
#[derive(Debug, Clone)]
pub struct StoreChange {
    pub key: String,
    /// `None` when the key was removed.
    pub new_value: Option<String>,
}

/// Durable string key-value storage for session material.
pub trait SessionStore: Send + Sync {
    fn get(&self, key: &str) -> Option<String>;
    fn set(&self, key: &str, value: &str);
    fn remove(&self, key: &str);

    /// Subscribe to mutations made by other session holders.
    fn subscribe(&self) -> broadcast::Receiver<StoreChange>;
}

// -- In-memory store ----------------------------------------------------------

/// Process-local store. The default for tests and single-window hosts.
pub struct MemoryStore {
    values: RwLock<HashMap<String, String>>,
    change_tx: broadcast::Sender<StoreChange>,
}

impl MemoryStore {
    pub fn new() -> Self {
        let (change_tx, _) = broadcast::channel(16);
        Self { values: RwLock::new(HashMap::new()), change_tx }
    }

    /// Apply a mutation made by another session holder and notify
    /// subscribers. `None` removes the key.
    pub fn apply_external(&self, key: &str, value: Option<&str>) {
        {
            let mut values = self.values.write().unwrap_or_else(PoisonError::into_inner);
            match value {
                Some(v) => {
                    values.insert(key.to_owned(), v.to_owned());
                }
                None => {
                    values.remove(key);
                }
            }
        }
        let _ = self.change_tx.send(StoreChange {
            key: key.to_owned(),
            new_value: value.map(str::to_owned),
        });
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl SessionStore for MemoryStore {
    fn get(&self, key: &str) -> Option<String> {
        self.values.read().unwrap_or_else(PoisonError::into_inner).get(key).cloned()
    }

    fn set(&self, key: &str, value: &str) {
        self.values
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(key.to_owned(), value.to_owned());
    }

    fn remove(&self, key: &str) {
        self.values.write().unwrap_or_else(PoisonError::into_inner).remove(key);
    }

    fn subscribe(&self) -> broadcast::Receiver<StoreChange> {
        self.change_tx.subscribe()
    }
}

// -- File-backed store --------------------------------------------------------

/// Store persisted as a single JSON object, written atomically
/// (unique tmp file + rename). Does not watch the file for foreign writes;
/// cross-process notification is a host concern.
pub struct FileStore {
    path: PathBuf,
    values: RwLock<HashMap<String, String>>,
    change_tx: broadcast::Sender<StoreChange>,
}

impl FileStore {
    /// Open a store at `path`, loading any existing contents.
    pub fn open(path: impl Into<PathBuf>) -> anyhow::Result<Self> {
        let path = path.into();
        let values = match std::fs::read_to_string(&path) {
            Ok(contents) => serde_json::from_str(&contents)?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => HashMap::new(),
            Err(e) => return Err(e.into()),
        };
        let (change_tx, _) = broadcast::channel(16);
        Ok(Self { path, values: RwLock::new(values), change_tx })
    }

    fn persist(&self) {
        use std::sync::atomic::{AtomicU32, Ordering};
        static COUNTER: AtomicU32 = AtomicU32::new(0);

        let json = {
            let values = self.values.read().unwrap_or_else(PoisonError::into_inner);
            match serde_json::to_string_pretty(&*values) {
                Ok(j) => j,
                Err(e) => {
                    tracing::warn!(err = %e, "failed to serialize session store");
                    return;
                }
            }
        };

        if let Some(parent) = self.path.parent() {
            let _ = std::fs::create_dir_all(parent);
        }

        // Unique temp filename (PID + counter) so concurrent saves never race
        // on the same `.tmp` file.
        let seq = COUNTER.fetch_add(1, Ordering::Relaxed);
        let tmp_name = format!(
            "{}.{}.{}.tmp",
            self.path.file_name().unwrap_or_default().to_string_lossy(),
            std::process::id(),
            seq,
        );
        let tmp_path = self.path.with_file_name(tmp_name);
        if let Err(e) = std::fs::write(&tmp_path, json) {
            tracing::warn!(path = %tmp_path.display(), err = %e, "failed to write session store");
            return;
        }
        if let Err(e) = std::fs::rename(&tmp_path, &self.path) {
            tracing::warn!(path = %self.path.display(), err = %e, "failed to replace session store");
        }
    }
}

impl SessionStore for FileStore {
    fn get(&self, key: &str) -> Option<String> {
        self.values.read().unwrap_or_else(PoisonError::into_inner).get(key).cloned()
    }

    fn set(&self, key: &str, value: &str) {
        self.values
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(key.to_owned(), value.to_owned());
        self.persist();
    }

    fn remove(&self, key: &str) {
        self.values.write().unwrap_or_else(PoisonError::into_inner).remove(key);
        self.persist();
    }

    fn subscribe(&self) -> broadcast::Receiver<StoreChange> {
        self.change_tx.subscribe()
    }
}

#[cfg(test)]
#[path = "store_tests.rs"]
mod tests;
