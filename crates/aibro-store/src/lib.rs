// SPDX-FileCopyrightText: 2026 Aibro Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Cache, dedup-lock, and rate-limit layer for the Aibro chat broker.
//!
//! The [`KvStore`](aibro_core::KvStore) capability has two implementations:
//! [`RedisStore`] against a network store and [`FileStore`] against local
//! JSON files. [`FallbackStore`] composes the two with a one-way
//! degradation switch: the first network failure permanently promotes the
//! file store for the rest of the process.

pub mod fallback;
pub mod file;
pub mod lock;
pub mod rate;
pub mod redis_store;

pub use fallback::FallbackStore;
pub use file::FileStore;
pub use lock::DedupLocks;
pub use rate::RateLimiter;
pub use redis_store::RedisStore;

/// Hex-encoded SHA-256 of arbitrary content, used for cache and lock keys.
pub fn content_hash(text: &str) -> String {
    use sha2::{Digest, Sha256};
    hex::encode(Sha256::digest(text.as_bytes()))
}
