// SPDX-FileCopyrightText: 2026 Aibro Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Configuration model structs for the Aibro chat broker.
//!
//! All structs use `#[serde(deny_unknown_fields)]` to reject unrecognized
//! config keys at startup, providing actionable error messages.

use serde::{Deserialize, Serialize};

use aibro_providers::{ProviderConfig, WireShape};

/// Top-level Aibro configuration.
///
/// All sections are optional and default to sensible values.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct AibroConfig {
    /// Bind address, origin screening, and on-disk locations.
    #[serde(default)]
    pub server: ServerConfig,

    /// AI assistant identity and generation settings.
    #[serde(default)]
    pub assistant: AssistantConfig,

    /// LLM backends in fallback order.
    #[serde(default = "default_providers")]
    pub providers: Vec<ProviderEntry>,

    /// Live-search settings.
    #[serde(default)]
    pub search: SearchConfig,

    /// Speech synthesis settings.
    #[serde(default)]
    pub speech: SpeechConfig,

    /// Key-value store backends.
    #[serde(default)]
    pub store: StoreConfig,

    /// Conversation context settings.
    #[serde(default)]
    pub context: ContextConfig,
}

impl Default for AibroConfig {
    fn default() -> Self {
        Self {
            server: ServerConfig::default(),
            assistant: AssistantConfig::default(),
            providers: default_providers(),
            search: SearchConfig::default(),
            speech: SpeechConfig::default(),
            store: StoreConfig::default(),
            context: ContextConfig::default(),
        }
    }
}

/// Server binding and filesystem layout.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct ServerConfig {
    #[serde(default = "default_host")]
    pub host: String,

    #[serde(default = "default_port")]
    pub port: u16,

    /// Origins accepted from public peers, matched verbatim.
    #[serde(default)]
    pub allowed_origins: Vec<String>,

    /// Skip origin screening entirely (local development).
    #[serde(default)]
    pub dev_mode: bool,

    /// Logging level (trace, debug, info, warn, error).
    #[serde(default = "default_log_level")]
    pub log_level: String,

    /// Directory of per-room NDJSON history logs.
    #[serde(default = "default_log_dir")]
    pub log_dir: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            allowed_origins: Vec::new(),
            dev_mode: false,
            log_level: default_log_level(),
            log_dir: default_log_dir(),
        }
    }
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    8090
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_dir() -> String {
    "logs".to_string()
}

/// Assistant identity and generation settings.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct AssistantConfig {
    /// Display name on assistant messages.
    #[serde(default = "default_nickname")]
    pub nickname: String,

    /// System persona prepended to every generation request.
    #[serde(default = "default_persona")]
    pub persona: String,

    /// Completion token cap sent to every provider.
    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,
}

impl Default for AssistantConfig {
    fn default() -> Self {
        Self {
            nickname: default_nickname(),
            persona: default_persona(),
            max_tokens: default_max_tokens(),
        }
    }
}

fn default_nickname() -> String {
    "AIBRO".to_string()
}

fn default_persona() -> String {
    "You are a helpful assistant in a group chat room. Answer concisely, \
     in the language the question was asked in."
        .to_string()
}

fn default_max_tokens() -> u32 {
    4096
}

/// One LLM backend in the fallback chain.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct ProviderEntry {
    pub name: String,

    /// Wire shape: `openai-chat`, `gemini`, or `ollama-chat`.
    pub wire: WireShape,

    /// Credential; omit for local backends.
    #[serde(default)]
    pub api_key: Option<String>,

    pub model: String,

    pub base_url: String,
}

impl ProviderEntry {
    /// Convert to the provider gateway's runtime form.
    pub fn to_provider(&self) -> ProviderConfig {
        ProviderConfig {
            name: self.name.clone(),
            api_key: self.api_key.clone(),
            model: self.model.clone(),
            base_url: self.base_url.clone(),
            wire: self.wire,
        }
    }
}

fn default_providers() -> Vec<ProviderEntry> {
    // A local Ollama works out of the box with no credential.
    vec![ProviderEntry {
        name: "ollama".to_string(),
        wire: WireShape::OllamaChat,
        api_key: None,
        model: "llama3".to_string(),
        base_url: "http://localhost:11434".to_string(),
    }]
}

/// Live-search settings. `base_url = None` disables search entirely.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct SearchConfig {
    /// SearxNG-compatible endpoint base URL.
    #[serde(default)]
    pub base_url: Option<String>,

    /// Trigger keywords; empty falls back to the built-in list.
    #[serde(default)]
    pub keywords: Vec<String>,
}

/// Speech synthesis settings. `base_url = None` disables speech.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct SpeechConfig {
    /// Synthesis endpoint base URL.
    #[serde(default)]
    pub base_url: Option<String>,

    /// HMAC secret for signed audio URLs.
    #[serde(default)]
    pub secret: Option<String>,

    /// Directory of published audio artifacts.
    #[serde(default = "default_audio_dir")]
    pub audio_dir: String,
}

impl Default for SpeechConfig {
    fn default() -> Self {
        Self {
            base_url: None,
            secret: None,
            audio_dir: default_audio_dir(),
        }
    }
}

fn default_audio_dir() -> String {
    "tts_cache".to_string()
}

/// Key-value store backends.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct StoreConfig {
    /// Redis connection URL. `None` runs on the file store alone.
    #[serde(default)]
    pub redis_url: Option<String>,

    /// Directory backing the local file store.
    #[serde(default = "default_file_dir")]
    pub file_dir: String,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            redis_url: None,
            file_dir: default_file_dir(),
        }
    }
}

fn default_file_dir() -> String {
    "aibro_cache".to_string()
}

/// Conversation context settings.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct ContextConfig {
    /// Token budget per room context.
    #[serde(default = "default_token_budget")]
    pub token_budget: usize,
}

impl Default for ContextConfig {
    fn default() -> Self {
        Self {
            token_budget: default_token_budget(),
        }
    }
}

fn default_token_budget() -> usize {
    12000
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_usable() {
        let config = AibroConfig::default();
        assert_eq!(config.server.port, 8090);
        assert!(!config.server.dev_mode);
        assert_eq!(config.assistant.nickname, "AIBRO");
        assert_eq!(config.context.token_budget, 12000);
        assert!(config.search.base_url.is_none());
    }

    #[test]
    fn provider_entry_converts_to_runtime_form() {
        let entry = ProviderEntry {
            name: "groq".into(),
            wire: WireShape::OpenaiChat,
            api_key: Some("k".into()),
            model: "llama-3.1-70b".into(),
            base_url: "https://api.groq.com/openai/v1".into(),
        };
        let provider = entry.to_provider();
        assert_eq!(provider.name, "groq");
        assert!(provider.usable());
    }
}
