// SPDX-FileCopyrightText: 2026 Aibro Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Ordered LLM provider fallback chain.
//!
//! [`ProviderChain`] holds the configured backends in declared order and
//! implements [`TextGenerator`]: each generation request walks the chain,
//! skipping providers without a required credential, and moves on after
//! any failure (network error, timeout, non-2xx, malformed body, empty
//! reply). Exhausting the chain is the only terminal failure. There are no
//! retries within a provider and no reordering by latency or history.

pub mod wire;

use std::time::Duration;

use async_trait::async_trait;

use aibro_core::{AibroError, GeneratedReply, TextGenerator, Turn};

pub use wire::{ProviderConfig, WireShape};

/// Bound on each provider HTTP call.
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

/// Default completion token cap sent to every provider.
pub const DEFAULT_MAX_TOKENS: u32 = 4096;

/// The ordered fallback chain over configured LLM backends.
pub struct ProviderChain {
    providers: Vec<ProviderConfig>,
    client: reqwest::Client,
    max_tokens: u32,
}

impl ProviderChain {
    /// Build a chain with the default request timeout.
    pub fn new(providers: Vec<ProviderConfig>) -> Result<Self, AibroError> {
        Self::with_timeout(providers, DEFAULT_REQUEST_TIMEOUT)
    }

    /// Build a chain with an explicit per-call timeout.
    pub fn with_timeout(
        providers: Vec<ProviderConfig>,
        timeout: Duration,
    ) -> Result<Self, AibroError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| AibroError::Provider {
                message: format!("failed to build HTTP client: {e}"),
                source: Some(Box::new(e)),
            })?;
        Ok(Self {
            providers,
            client,
            max_tokens: DEFAULT_MAX_TOKENS,
        })
    }

    /// Override the completion token cap.
    pub fn with_max_tokens(mut self, max_tokens: u32) -> Self {
        self.max_tokens = max_tokens;
        self
    }

    /// Names of providers the chain will actually attempt, in order.
    pub fn usable_providers(&self) -> Vec<&str> {
        self.providers
            .iter()
            .filter(|p| p.usable())
            .map(|p| p.name.as_str())
            .collect()
    }

    /// One attempt against one provider. Any failure is returned as an
    /// error for the chain to log and move past.
    async fn call_provider(
        &self,
        provider: &ProviderConfig,
        turns: &[Turn],
        temperature: f64,
    ) -> Result<String, AibroError> {
        let mut request = self
            .client
            .post(provider.url())
            .json(&provider.body(turns, temperature, self.max_tokens));
        if let Some(token) = provider.bearer() {
            request = request.bearer_auth(token);
        }

        let response = request.send().await.map_err(|e| AibroError::Provider {
            message: format!("{} request failed: {e}", provider.name),
            source: Some(Box::new(e)),
        })?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(AibroError::provider(format!(
                "{} returned {status}: {body}",
                provider.name
            )));
        }

        let body: serde_json::Value =
            response.json().await.map_err(|e| AibroError::Provider {
                message: format!("{} returned malformed body: {e}", provider.name),
                source: Some(Box::new(e)),
            })?;

        provider
            .extract_reply(&body)
            .ok_or_else(|| AibroError::provider(format!("{} returned an empty reply", provider.name)))
    }
}

#[async_trait]
impl TextGenerator for ProviderChain {
    async fn generate(
        &self,
        turns: &[Turn],
        temperature: f64,
    ) -> Result<GeneratedReply, AibroError> {
        for provider in &self.providers {
            if !provider.usable() {
                tracing::debug!(provider = %provider.name, "skipping provider without credential");
                continue;
            }

            tracing::info!(provider = %provider.name, model = %provider.model, "calling provider");
            match self.call_provider(provider, turns, temperature).await {
                Ok(content) => {
                    tracing::info!(
                        provider = %provider.name,
                        reply_chars = content.chars().count(),
                        "provider reply accepted"
                    );
                    return Ok(GeneratedReply {
                        content,
                        provider: provider.name.clone(),
                    });
                }
                Err(err) => {
                    tracing::warn!(provider = %provider.name, error = %err, "provider failed, trying next");
                }
            }
        }

        Err(AibroError::provider("all providers failed"))
    }
}
