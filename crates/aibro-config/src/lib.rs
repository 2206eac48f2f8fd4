// SPDX-FileCopyrightText: 2026 Aibro Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Layered configuration for the Aibro chat broker.
//!
//! TOML files merged through Figment with `AIBRO_` environment overrides.

mod loader;
mod model;

pub use loader::{load_config, load_config_from_path, load_config_from_str};
pub use model::{
    AibroConfig, AssistantConfig, ContextConfig, ProviderEntry, SearchConfig, ServerConfig,
    SpeechConfig, StoreConfig,
};
