// SPDX-FileCopyrightText: 2026 Aibro Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Per-provider wire shapes: request construction and reply extraction.
//!
//! Three shapes cover every configured backend: the OpenAI-compatible chat
//! completion (also used by xAI, Groq, NVIDIA, DeepSeek), the Gemini
//! "contents" shape with remapped roles, and the Ollama chat endpoint.

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use aibro_core::{Role, Turn};

/// Which request/response shape a provider speaks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum WireShape {
    /// `POST {base}/chat/completions` with bearer auth.
    OpenaiChat,
    /// `POST {base}/{model}:generateContent?key=...` with role remapping.
    Gemini,
    /// `POST {base}/api/chat`, local backend, no credential.
    OllamaChat,
}

impl WireShape {
    /// Whether the shape needs an API credential to be attempted at all.
    pub fn requires_credential(self) -> bool {
        !matches!(self, WireShape::OllamaChat)
    }
}

/// Static description of one LLM backend.
#[derive(Debug, Clone)]
pub struct ProviderConfig {
    pub name: String,
    /// Credential; empty/absent for local backends.
    pub api_key: Option<String>,
    pub model: String,
    pub base_url: String,
    pub wire: WireShape,
}

impl ProviderConfig {
    fn key(&self) -> Option<&str> {
        self.api_key.as_deref().filter(|k| !k.is_empty())
    }

    /// Whether the chain may attempt this provider.
    pub fn usable(&self) -> bool {
        !self.wire.requires_credential() || self.key().is_some()
    }

    /// Full request URL for this provider.
    pub fn url(&self) -> String {
        let base = self.base_url.trim_end_matches('/');
        match self.wire {
            WireShape::OpenaiChat => format!("{base}/chat/completions"),
            WireShape::Gemini => format!(
                "{base}/{model}:generateContent?key={key}",
                model = self.model,
                key = self.key().unwrap_or_default()
            ),
            WireShape::OllamaChat => format!("{base}/api/chat"),
        }
    }

    /// Bearer token to attach, if the shape carries auth in a header.
    pub fn bearer(&self) -> Option<&str> {
        match self.wire {
            WireShape::OpenaiChat => self.key(),
            // Gemini carries the key in the query string; Ollama has none.
            WireShape::Gemini | WireShape::OllamaChat => None,
        }
    }

    /// Request body for the given turns and sampling temperature.
    pub fn body(&self, turns: &[Turn], temperature: f64, max_tokens: u32) -> Value {
        match self.wire {
            WireShape::OpenaiChat => json!({
                "model": self.model,
                "messages": plain_messages(turns),
                "temperature": temperature,
                "top_p": 1,
                "max_tokens": max_tokens,
                "stream": false,
            }),
            WireShape::Gemini => json!({
                "contents": gemini_contents(turns),
                "generationConfig": {
                    "temperature": temperature,
                    "topP": 1.0,
                    "maxOutputTokens": max_tokens,
                },
            }),
            WireShape::OllamaChat => json!({
                "model": self.model,
                "messages": plain_messages(turns),
                "stream": false,
                "options": {
                    "temperature": temperature,
                    "top_p": 1,
                    "num_predict": max_tokens,
                },
            }),
        }
    }

    /// Pull the reply text out of the provider's response body.
    /// Returns `None` when the expected field is missing or empty.
    pub fn extract_reply(&self, body: &Value) -> Option<String> {
        let text = match self.wire {
            WireShape::OpenaiChat => body
                .pointer("/choices/0/message/content")
                .and_then(Value::as_str),
            WireShape::Gemini => body
                .pointer("/candidates/0/content/parts/0/text")
                .and_then(Value::as_str),
            WireShape::OllamaChat => body.pointer("/message/content").and_then(Value::as_str),
        }?;
        let text = text.trim();
        if text.is_empty() {
            None
        } else {
            Some(text.to_string())
        }
    }
}

fn plain_messages(turns: &[Turn]) -> Value {
    Value::Array(
        turns
            .iter()
            .map(|t| json!({"role": t.role.to_string(), "content": t.content}))
            .collect(),
    )
}

/// Remap turns into Gemini's `contents` shape: system turns fold into the
/// next user turn, assistant becomes `model`, and adjacent same-role parts
/// are merged (Gemini rejects consecutive same-role entries).
fn gemini_contents(turns: &[Turn]) -> Value {
    let mut contents: Vec<Value> = Vec::new();
    let mut pending_system = String::new();

    for turn in turns {
        if turn.role == Role::System {
            pending_system.push_str(&turn.content);
            pending_system.push_str("\n\n");
            continue;
        }
        let mut content = turn.content.clone();
        if !pending_system.is_empty() && turn.role == Role::User {
            content = format!("{pending_system}{content}");
            pending_system.clear();
        }
        let role = match turn.role {
            Role::Assistant => "model",
            _ => "user",
        };
        match contents.last_mut() {
            Some(last) if last["role"] == role => {
                let merged = format!(
                    "{}\n\n{}",
                    last["parts"][0]["text"].as_str().unwrap_or_default(),
                    content
                );
                last["parts"][0]["text"] = Value::String(merged);
            }
            _ => contents.push(json!({"role": role, "parts": [{"text": content}]})),
        }
    }

    Value::Array(contents)
}
