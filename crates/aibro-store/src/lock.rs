// SPDX-FileCopyrightText: 2026 Aibro Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Short-lived dedup locks keyed by client + content hash.
//!
//! A lock guards one expensive external call (speech synthesis). It is
//! claimed via `set_nx` on the backing store with a short TTL, so a crash
//! mid-call can never wedge the key for longer than the TTL.

use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;

use aibro_core::{AibroError, KvStore};

/// Default lock self-expiry.
pub const DEFAULT_LOCK_TTL: Duration = Duration::from_secs(30);

/// Mutual-exclusion markers for in-flight external calls.
pub struct DedupLocks {
    store: Arc<dyn KvStore>,
    ttl: Duration,
    // Store keys held per client, so disconnect can release everything a
    // client still holds without scanning the store.
    held: DashMap<String, Vec<String>>,
}

impl DedupLocks {
    pub fn new(store: Arc<dyn KvStore>) -> Self {
        Self {
            store,
            ttl: DEFAULT_LOCK_TTL,
            held: DashMap::new(),
        }
    }

    /// Override the lock TTL.
    pub fn with_ttl(mut self, ttl: Duration) -> Self {
        self.ttl = ttl;
        self
    }

    fn lock_key(client_id: &str, hash: &str) -> String {
        format!("tts:lock:{client_id}_{hash}")
    }

    /// Try to claim the lock for `client_id` + `hash`. Returns `false` when
    /// an identical call is already in flight.
    pub async fn try_acquire(&self, client_id: &str, hash: &str) -> Result<bool, AibroError> {
        let key = Self::lock_key(client_id, hash);
        let claimed = self.store.set_nx(&key, "1", self.ttl).await?;
        if claimed {
            self.held
                .entry(client_id.to_string())
                .or_default()
                .push(key);
        }
        Ok(claimed)
    }

    /// Release a claimed lock after the guarded call completes.
    pub async fn release(&self, client_id: &str, hash: &str) {
        let key = Self::lock_key(client_id, hash);
        if let Some(mut keys) = self.held.get_mut(client_id) {
            keys.retain(|k| k != &key);
        }
        if let Err(err) = self.store.delete(&key).await {
            // The TTL will clean this up; nothing more to do.
            tracing::warn!(key, error = %err, "failed to release dedup lock");
        }
    }

    /// Release every lock a client still holds (called on disconnect).
    pub async fn release_client(&self, client_id: &str) {
        let Some((_, keys)) = self.held.remove(client_id) else {
            return;
        };
        for key in keys {
            if let Err(err) = self.store.delete(&key).await {
                tracing::warn!(key, error = %err, "failed to release dedup lock on disconnect");
            }
        }
    }
}
