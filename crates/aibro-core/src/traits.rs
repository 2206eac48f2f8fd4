// SPDX-FileCopyrightText: 2026 Aibro Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Capability traits at the seams between components.
//!
//! Components take these as trait objects (constructor injection) so the
//! broker and orchestrator can be exercised against test doubles.

use std::time::Duration;

use async_trait::async_trait;

use crate::error::AibroError;
use crate::types::{GeneratedReply, Turn};

/// Minimal key-value capability shared by the cache, dedup-lock, and
/// context layers. Two implementations exist: a network store and a
/// local-file fallback; callers never branch on which one they hold.
#[async_trait]
pub trait KvStore: Send + Sync {
    /// Fetch a value. Expired entries read as `None`.
    async fn get(&self, key: &str) -> Result<Option<String>, AibroError>;

    /// Store a value, optionally with a time-to-live.
    async fn set(&self, key: &str, value: &str, ttl: Option<Duration>) -> Result<(), AibroError>;

    /// Remove a value. Removing a missing key is not an error.
    async fn delete(&self, key: &str) -> Result<(), AibroError>;

    /// Refresh the time-to-live of an existing entry.
    async fn expire(&self, key: &str, ttl: Duration) -> Result<(), AibroError>;

    /// Atomically increment a counter, creating it at 1.
    async fn incr(&self, key: &str) -> Result<i64, AibroError>;

    /// Set only if absent, with a time-to-live. Returns whether the key
    /// was claimed. This is the primitive behind dedup locks.
    async fn set_nx(&self, key: &str, value: &str, ttl: Duration) -> Result<bool, AibroError>;
}

/// A backend that turns a message list into assistant text.
///
/// The production implementation is the ordered provider fallback chain;
/// tests substitute scripted doubles.
#[async_trait]
pub trait TextGenerator: Send + Sync {
    /// Generate a reply for the given turns at the given temperature.
    ///
    /// Errors only when every configured backend has failed.
    async fn generate(&self, turns: &[Turn], temperature: f64)
        -> Result<GeneratedReply, AibroError>;
}

/// Keyword-triggered live-data lookup.
#[async_trait]
pub trait LiveSearch: Send + Sync {
    /// Whether the prompt matches a live-data keyword.
    fn should_search(&self, prompt: &str) -> bool;

    /// Fetch a formatted summary for the prompt. `Ok("")` means no usable
    /// results; `Err` means the search transport itself failed and the
    /// caller should degrade.
    async fn search(&self, prompt: &str) -> Result<String, AibroError>;
}

/// Text-to-audio conversion.
#[async_trait]
pub trait SpeechSynth: Send + Sync {
    /// Convert text to audio for the given client. `Ok(Some(url))` is a
    /// signed audio URL; `Ok(None)` means generation failed and the caller
    /// should report "no audio". Rate-cap and duplicate-request rejections
    /// surface as [`AibroError::RateLimited`] and [`AibroError::LockHeld`].
    async fn speak(&self, text: &str, client_id: &str) -> Result<Option<String>, AibroError>;
}
