// SPDX-FileCopyrightText: 2026 Aibro Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! One-way degrading store: network first, local files forever after the
//! first network failure.

use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use async_trait::async_trait;

use aibro_core::{AibroError, KvStore};

/// Composes a primary (network) store with a local-file fallback.
///
/// While healthy, every call goes to the primary. The first store-level
/// failure flips a permanent switch: the failing call is re-issued against
/// the fallback and all subsequent calls go straight there. The primary is
/// never retried within the process lifetime.
pub struct FallbackStore {
    primary: Option<Box<dyn KvStore>>,
    fallback: Box<dyn KvStore>,
    degraded: AtomicBool,
}

impl FallbackStore {
    /// `primary = None` starts the store degraded (e.g. the network store
    /// was already unreachable at startup).
    pub fn new(primary: Option<Box<dyn KvStore>>, fallback: Box<dyn KvStore>) -> Self {
        let degraded = primary.is_none();
        if degraded {
            tracing::warn!("network store unavailable at startup, using file fallback");
        }
        Self {
            primary,
            fallback,
            degraded: AtomicBool::new(degraded),
        }
    }

    /// Whether the permanent fallback switch has flipped.
    pub fn is_degraded(&self) -> bool {
        self.degraded.load(Ordering::Acquire)
    }

    /// Returns the primary if it should still be used.
    fn healthy_primary(&self) -> Option<&dyn KvStore> {
        if self.is_degraded() {
            return None;
        }
        self.primary.as_deref()
    }

    fn degrade(&self, err: &AibroError) {
        if !self.degraded.swap(true, Ordering::AcqRel) {
            tracing::warn!(error = %err, "network store failed, degrading to file fallback permanently");
        }
    }
}

#[async_trait]
impl KvStore for FallbackStore {
    async fn get(&self, key: &str) -> Result<Option<String>, AibroError> {
        if let Some(primary) = self.healthy_primary() {
            match primary.get(key).await {
                Ok(value) => return Ok(value),
                Err(err) => self.degrade(&err),
            }
        }
        self.fallback.get(key).await
    }

    async fn set(&self, key: &str, value: &str, ttl: Option<Duration>) -> Result<(), AibroError> {
        if let Some(primary) = self.healthy_primary() {
            match primary.set(key, value, ttl).await {
                Ok(()) => return Ok(()),
                Err(err) => self.degrade(&err),
            }
        }
        self.fallback.set(key, value, ttl).await
    }

    async fn delete(&self, key: &str) -> Result<(), AibroError> {
        if let Some(primary) = self.healthy_primary() {
            match primary.delete(key).await {
                Ok(()) => return Ok(()),
                Err(err) => self.degrade(&err),
            }
        }
        self.fallback.delete(key).await
    }

    async fn expire(&self, key: &str, ttl: Duration) -> Result<(), AibroError> {
        if let Some(primary) = self.healthy_primary() {
            match primary.expire(key, ttl).await {
                Ok(()) => return Ok(()),
                Err(err) => self.degrade(&err),
            }
        }
        self.fallback.expire(key, ttl).await
    }

    async fn incr(&self, key: &str) -> Result<i64, AibroError> {
        if let Some(primary) = self.healthy_primary() {
            match primary.incr(key).await {
                Ok(value) => return Ok(value),
                Err(err) => self.degrade(&err),
            }
        }
        self.fallback.incr(key).await
    }

    async fn set_nx(&self, key: &str, value: &str, ttl: Duration) -> Result<bool, AibroError> {
        if let Some(primary) = self.healthy_primary() {
            match primary.set_nx(key, value, ttl).await {
                Ok(claimed) => return Ok(claimed),
                Err(err) => self.degrade(&err),
            }
        }
        self.fallback.set_nx(key, value, ttl).await
    }
}
