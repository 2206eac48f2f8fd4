// SPDX-FileCopyrightText: 2026 Aibro Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Error types for the Aibro chat broker.

use thiserror::Error;

/// The primary error type used across all Aibro crates.
#[derive(Debug, Error)]
pub enum AibroError {
    /// Configuration errors (invalid TOML, missing required fields, type mismatches).
    #[error("configuration error: {0}")]
    Config(String),

    /// Key-value store errors (connection failure, read/write failure, serialization).
    #[error("store error: {message}")]
    Store {
        message: String,
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    /// LLM provider errors (API failure, malformed response, empty reply).
    #[error("provider error: {message}")]
    Provider {
        message: String,
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    /// Live-search errors (transport failure, timeout). Search callers are
    /// expected to degrade rather than propagate these to the room.
    #[error("search error: {0}")]
    Search(String),

    /// Speech synthesis errors (API failure, artifact missing).
    #[error("speech error: {0}")]
    Speech(String),

    /// WebSocket channel errors (bind failure, payload format, closed transport).
    #[error("channel error: {message}")]
    Channel {
        message: String,
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    /// A fixed-window rate cap was exceeded. Carries the user-facing message.
    #[error("rate limited: {0}")]
    RateLimited(String),

    /// A dedup lock for the same client+content is already held.
    #[error("operation already in progress: {0}")]
    LockHeld(String),

    /// Operation timed out.
    #[error("operation timed out after {duration:?}")]
    Timeout { duration: std::time::Duration },

    /// Internal or unexpected errors.
    #[error("internal error: {0}")]
    Internal(String),
}

impl AibroError {
    /// Shorthand for a store error without an underlying source.
    pub fn store(message: impl Into<String>) -> Self {
        Self::Store {
            message: message.into(),
            source: None,
        }
    }

    /// Shorthand for a provider error without an underlying source.
    pub fn provider(message: impl Into<String>) -> Self {
        Self::Provider {
            message: message.into(),
            source: None,
        }
    }
}
