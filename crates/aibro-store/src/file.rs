// SPDX-FileCopyrightText: 2026 Aibro Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Local-file [`KvStore`] implementation, the degradation target when the
//! network store is unreachable.
//!
//! Each key becomes one JSON file under the store directory, named by the
//! key's content hash. Expiry instants are embedded in the entry and
//! checked on read (lazy eviction). The store is capacity-bounded: past
//! the cap, the oldest entries by modification time are evicted on write.

use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;

use aibro_core::{AibroError, KvStore};

use crate::content_hash;

/// Default entry cap before oldest-first eviction kicks in.
pub const DEFAULT_CAPACITY: usize = 1000;

#[derive(Debug, Serialize, Deserialize)]
struct Entry {
    value: String,
    /// Unix seconds; `None` means the entry never expires.
    expires: Option<i64>,
}

impl Entry {
    fn expired(&self, now: i64) -> bool {
        self.expires.is_some_and(|at| at <= now)
    }
}

/// Key-value store over local JSON files.
pub struct FileStore {
    dir: PathBuf,
    capacity: usize,
    // Serializes read-modify-write operations (incr, set_nx). The broker is
    // single-process, so an in-process mutex is sufficient.
    write_guard: Mutex<()>,
}

impl FileStore {
    /// Create a store rooted at `dir`, creating the directory if needed.
    pub fn new(dir: impl Into<PathBuf>) -> Result<Self, AibroError> {
        let dir = dir.into();
        std::fs::create_dir_all(&dir).map_err(|e| AibroError::Store {
            message: format!("failed to create store dir {}", dir.display()),
            source: Some(Box::new(e)),
        })?;
        Ok(Self {
            dir,
            capacity: DEFAULT_CAPACITY,
            write_guard: Mutex::new(()),
        })
    }

    /// Override the entry cap.
    pub fn with_capacity(mut self, capacity: usize) -> Self {
        self.capacity = capacity;
        self
    }

    fn entry_path(&self, key: &str) -> PathBuf {
        self.dir.join(format!("{}.json", content_hash(key)))
    }

    async fn read_entry(&self, path: &Path) -> Result<Option<Entry>, AibroError> {
        match tokio::fs::read_to_string(path).await {
            Ok(raw) => match serde_json::from_str::<Entry>(&raw) {
                Ok(entry) => Ok(Some(entry)),
                Err(e) => {
                    tracing::warn!(path = %path.display(), error = %e, "corrupt store entry, dropping");
                    let _ = tokio::fs::remove_file(path).await;
                    Ok(None)
                }
            },
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(AibroError::Store {
                message: format!("failed to read {}", path.display()),
                source: Some(Box::new(e)),
            }),
        }
    }

    async fn write_entry(&self, path: &Path, entry: &Entry) -> Result<(), AibroError> {
        let raw = serde_json::to_string(entry).map_err(|e| AibroError::Store {
            message: "failed to encode store entry".into(),
            source: Some(Box::new(e)),
        })?;
        tokio::fs::write(path, raw)
            .await
            .map_err(|e| AibroError::Store {
                message: format!("failed to write {}", path.display()),
                source: Some(Box::new(e)),
            })?;
        self.evict_past_capacity().await;
        Ok(())
    }

    /// Best-effort oldest-first eviction once the entry count passes the cap.
    async fn evict_past_capacity(&self) {
        let Ok(mut dir) = tokio::fs::read_dir(&self.dir).await else {
            return;
        };
        let mut files: Vec<(PathBuf, SystemTime)> = Vec::new();
        while let Ok(Some(item)) = dir.next_entry().await {
            let path = item.path();
            if path.extension().is_some_and(|ext| ext == "json") {
                let modified = item
                    .metadata()
                    .await
                    .and_then(|m| m.modified())
                    .unwrap_or(UNIX_EPOCH);
                files.push((path, modified));
            }
        }
        if files.len() <= self.capacity {
            return;
        }
        files.sort_by_key(|(_, modified)| *modified);
        let excess = files.len() - self.capacity;
        for (path, _) in files.into_iter().take(excess) {
            let _ = tokio::fs::remove_file(&path).await;
        }
    }
}

fn now_unix() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs() as i64)
        .unwrap_or(0)
}

#[async_trait]
impl KvStore for FileStore {
    async fn get(&self, key: &str) -> Result<Option<String>, AibroError> {
        let path = self.entry_path(key);
        match self.read_entry(&path).await? {
            Some(entry) if entry.expired(now_unix()) => {
                let _ = tokio::fs::remove_file(&path).await;
                Ok(None)
            }
            Some(entry) => Ok(Some(entry.value)),
            None => Ok(None),
        }
    }

    async fn set(&self, key: &str, value: &str, ttl: Option<Duration>) -> Result<(), AibroError> {
        let _guard = self.write_guard.lock().await;
        let entry = Entry {
            value: value.to_string(),
            expires: ttl.map(|t| now_unix() + t.as_secs() as i64),
        };
        self.write_entry(&self.entry_path(key), &entry).await
    }

    async fn delete(&self, key: &str) -> Result<(), AibroError> {
        let path = self.entry_path(key);
        match tokio::fs::remove_file(&path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(AibroError::Store {
                message: format!("failed to delete {}", path.display()),
                source: Some(Box::new(e)),
            }),
        }
    }

    async fn expire(&self, key: &str, ttl: Duration) -> Result<(), AibroError> {
        let _guard = self.write_guard.lock().await;
        let path = self.entry_path(key);
        if let Some(mut entry) = self.read_entry(&path).await? {
            if !entry.expired(now_unix()) {
                entry.expires = Some(now_unix() + ttl.as_secs() as i64);
                self.write_entry(&path, &entry).await?;
            }
        }
        Ok(())
    }

    async fn incr(&self, key: &str) -> Result<i64, AibroError> {
        let _guard = self.write_guard.lock().await;
        let path = self.entry_path(key);
        let current = match self.read_entry(&path).await? {
            Some(entry) if !entry.expired(now_unix()) => {
                entry.value.parse::<i64>().unwrap_or(0)
            }
            _ => 0,
        };
        let next = current + 1;
        let entry = Entry {
            value: next.to_string(),
            expires: None,
        };
        self.write_entry(&path, &entry).await?;
        Ok(next)
    }

    async fn set_nx(&self, key: &str, value: &str, ttl: Duration) -> Result<bool, AibroError> {
        let _guard = self.write_guard.lock().await;
        let path = self.entry_path(key);
        if let Some(entry) = self.read_entry(&path).await? {
            if !entry.expired(now_unix()) {
                return Ok(false);
            }
        }
        let entry = Entry {
            value: value.to_string(),
            expires: Some(now_unix() + ttl.as_secs() as i64),
        };
        self.write_entry(&path, &entry).await?;
        Ok(true)
    }
}
