// SPDX-FileCopyrightText: 2026 Aibro Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Configuration loader using Figment for layered config merging.
//!
//! Supports XDG hierarchy: `./aibro.toml` > `~/.config/aibro/aibro.toml` >
//! `/etc/aibro/aibro.toml` with environment variable overrides via the
//! `AIBRO_` prefix.

#![allow(clippy::result_large_err)] // figment::Error is external and cannot be boxed without wrapper

use std::path::Path;

use figment::{
    providers::{Env, Format, Serialized, Toml},
    Figment,
};

use crate::model::AibroConfig;

/// Load configuration from the standard XDG hierarchy with env var overrides.
///
/// Merge order (later overrides earlier):
/// 1. Compiled defaults
/// 2. `/etc/aibro/aibro.toml` (system-wide)
/// 3. `~/.config/aibro/aibro.toml` (user XDG config)
/// 4. `./aibro.toml` (local directory)
/// 5. `AIBRO_*` environment variables
pub fn load_config() -> Result<AibroConfig, figment::Error> {
    Figment::new()
        .merge(Serialized::defaults(AibroConfig::default()))
        .merge(Toml::file("/etc/aibro/aibro.toml"))
        .merge(Toml::file(
            dirs::config_dir()
                .map(|d| d.join("aibro/aibro.toml"))
                .unwrap_or_default(),
        ))
        .merge(Toml::file("aibro.toml"))
        .merge(env_provider())
        .extract()
}

/// Load configuration from a TOML string only (no XDG lookup, no env).
///
/// Used for testing and explicit config specification.
pub fn load_config_from_str(toml_content: &str) -> Result<AibroConfig, figment::Error> {
    Figment::new()
        .merge(Serialized::defaults(AibroConfig::default()))
        .merge(Toml::string(toml_content))
        .extract()
}

/// Load configuration from a specific file path with env var overrides.
pub fn load_config_from_path(path: &Path) -> Result<AibroConfig, figment::Error> {
    Figment::new()
        .merge(Serialized::defaults(AibroConfig::default()))
        .merge(Toml::file(path))
        .merge(env_provider())
        .extract()
}

/// Create the environment variable provider using explicit `map()` for
/// section-to-dot mapping.
///
/// Uses `Env::map()` NOT `Env::split("_")` to avoid ambiguity with
/// underscore-containing key names: `AIBRO_STORE_REDIS_URL` must map to
/// `store.redis_url`, not `store.redis.url`.
fn env_provider() -> Env {
    Env::prefixed("AIBRO_").map(|key| {
        // `key` is the lowercased env var name with prefix stripped.
        // Example: AIBRO_SERVER_DEV_MODE -> "server_dev_mode"
        let key_str = key.as_str();
        let mapped = key_str
            .replacen("server_", "server.", 1)
            .replacen("assistant_", "assistant.", 1)
            .replacen("search_", "search.", 1)
            .replacen("speech_", "speech.", 1)
            .replacen("store_", "store.", 1)
            .replacen("context_", "context.", 1);
        mapped.into()
    })
}
