// SPDX-FileCopyrightText: 2026 Aibro Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Wires configuration into running services and starts the broker.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;

use aibro_broker::{start_server, BrokerConfig, Registry, Services};
use aibro_butler::AiButler;
use aibro_config::AibroConfig;
use aibro_context::ContextStore;
use aibro_core::{AibroError, KvStore, LiveSearch, SpeechSynth, TextGenerator};
use aibro_providers::ProviderChain;
use aibro_search::SearchService;
use aibro_speech::{spawn_sweeper, SpeechService, RATE_CAP, SWEEP_PERIOD};
use aibro_store::{DedupLocks, FallbackStore, FileStore, RateLimiter, RedisStore};

/// Stands in when no search endpoint is configured.
struct DisabledSearch;

#[async_trait]
impl LiveSearch for DisabledSearch {
    fn should_search(&self, _prompt: &str) -> bool {
        false
    }

    async fn search(&self, _prompt: &str) -> Result<String, AibroError> {
        Ok(String::new())
    }
}

/// Stands in when no synthesis endpoint is configured.
struct DisabledSpeech;

#[async_trait]
impl SpeechSynth for DisabledSpeech {
    async fn speak(&self, _text: &str, _client_id: &str) -> Result<Option<String>, AibroError> {
        Ok(None)
    }
}

/// Build every service from config and serve until the process is stopped.
pub async fn run(config: AibroConfig) -> Result<(), AibroError> {
    let kv = build_store(&config).await?;

    let context = Arc::new(
        ContextStore::new(Arc::clone(&kv)).with_budget(config.context.token_budget),
    );

    let providers: Vec<_> = config.providers.iter().map(|p| p.to_provider()).collect();
    let chain =
        ProviderChain::new(providers)?.with_max_tokens(config.assistant.max_tokens);
    let generator: Arc<dyn TextGenerator> = Arc::new(chain);

    let search: Arc<dyn LiveSearch> = match &config.search.base_url {
        Some(base_url) => Arc::new(SearchService::new(
            base_url,
            Arc::clone(&kv),
            config.search.keywords.clone(),
        )?),
        None => {
            tracing::info!("live search disabled (no endpoint configured)");
            Arc::new(DisabledSearch)
        }
    };

    let butler = Arc::new(AiButler::new(
        search,
        generator,
        Arc::clone(&context),
        config.assistant.persona.clone(),
        config.assistant.nickname.clone(),
    ));

    let locks = Arc::new(DedupLocks::new(Arc::clone(&kv)));
    let speech_rate = Arc::new(RateLimiter::new(RATE_CAP, Duration::from_secs(60)));
    let audio_dir = PathBuf::from(&config.speech.audio_dir);
    let speech: Arc<dyn SpeechSynth> = match (&config.speech.base_url, &config.speech.secret) {
        (Some(base_url), Some(secret)) => {
            spawn_sweeper(audio_dir.clone(), SWEEP_PERIOD);
            Arc::new(SpeechService::new(
                base_url,
                secret,
                &audio_dir,
                Arc::clone(&kv),
                Arc::clone(&locks),
                Arc::clone(&speech_rate),
            )?)
        }
        _ => {
            tracing::info!("speech disabled (endpoint or secret not configured)");
            Arc::new(DisabledSpeech)
        }
    };

    let services = Services {
        butler,
        speech,
        context,
        locks,
        speech_rate,
    };
    let history = aibro_broker::history::HistoryLog::new(&config.server.log_dir)?;

    let (cmd_tx, cmd_rx) = tokio::sync::mpsc::channel(256);
    let registry = Registry::new(services, history, cmd_tx.clone());
    tokio::spawn(registry.run(cmd_rx));

    let broker = BrokerConfig {
        host: config.server.host.clone(),
        port: config.server.port,
        allowed_origins: config.server.allowed_origins.clone(),
        dev_mode: config.server.dev_mode,
        audio_dir,
    };
    start_server(&broker, cmd_tx).await
}

/// Network store when configured and reachable, file store otherwise,
/// composed behind the one-way degradation wrapper.
async fn build_store(config: &AibroConfig) -> Result<Arc<dyn KvStore>, AibroError> {
    let file = FileStore::new(&config.store.file_dir)?;
    let primary: Option<Box<dyn KvStore>> = match &config.store.redis_url {
        Some(url) => match RedisStore::connect(url).await {
            Ok(store) => Some(Box::new(store)),
            Err(err) => {
                tracing::warn!(url, error = %err, "redis unreachable, starting degraded");
                None
            }
        },
        None => None,
    };
    Ok(Arc::new(FallbackStore::new(primary, Box::new(file))))
}
