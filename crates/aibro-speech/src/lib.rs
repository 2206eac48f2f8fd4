// SPDX-FileCopyrightText: 2026 Aibro Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Text-to-speech generation with caching, dedup locks, rate limiting,
//! and signed audio URLs.
//!
//! One external synthesis call per unique text: results are cached for
//! seven days under the text's content hash, a per-client+content dedup
//! lock rejects concurrent duplicates, and a fixed-window rate cap bounds
//! each client. Failures resolve to "no audio" rather than propagating.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use async_trait::async_trait;
use hmac::{Hmac, Mac};
use serde::Deserialize;
use sha2::Sha256;

use aibro_core::{AibroError, KvStore, SpeechSynth};
use aibro_store::{content_hash, DedupLocks, RateLimiter};

type HmacSha256 = Hmac<Sha256>;

/// Cached audio URLs and artifacts live this long.
pub const CACHE_TTL: Duration = Duration::from_secs(7 * 24 * 60 * 60);

/// Bound on the synthesis HTTP call.
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(20);

/// Per-client synthesis requests per minute.
pub const RATE_CAP: u32 = 5;

/// How often the background sweep runs.
pub const SWEEP_PERIOD: Duration = Duration::from_secs(24 * 60 * 60);

#[derive(Debug, Deserialize)]
struct SynthResponse {
    #[serde(default)]
    status: String,
    #[serde(default)]
    file: Option<String>,
}

/// Speech synthesis against an external `/speak` endpoint.
pub struct SpeechService {
    client: reqwest::Client,
    base_url: String,
    secret: String,
    public_dir: PathBuf,
    cache: Arc<dyn KvStore>,
    locks: Arc<DedupLocks>,
    rate: Arc<RateLimiter>,
}

impl SpeechService {
    pub fn new(
        base_url: impl Into<String>,
        secret: impl Into<String>,
        public_dir: impl Into<PathBuf>,
        cache: Arc<dyn KvStore>,
        locks: Arc<DedupLocks>,
        rate: Arc<RateLimiter>,
    ) -> Result<Self, AibroError> {
        let client = reqwest::Client::builder()
            .timeout(DEFAULT_REQUEST_TIMEOUT)
            .build()
            .map_err(|e| AibroError::Speech(format!("failed to build HTTP client: {e}")))?;
        let public_dir = public_dir.into();
        std::fs::create_dir_all(&public_dir).map_err(|e| {
            AibroError::Speech(format!(
                "failed to create audio dir {}: {e}",
                public_dir.display()
            ))
        })?;
        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            secret: secret.into(),
            public_dir,
            cache,
            locks,
            rate,
        })
    }

    fn cache_key(hash: &str) -> String {
        format!("tts:cache:{hash}")
    }

    /// Sign a public audio path: HMAC over `path|expires` with the server
    /// secret, valid until `expires` (unix seconds).
    fn signed_url(&self, public_path: &str, expires: i64) -> Result<String, AibroError> {
        let mut mac = HmacSha256::new_from_slice(self.secret.as_bytes())
            .map_err(|e| AibroError::Speech(format!("invalid signing secret: {e}")))?;
        mac.update(format!("{public_path}|{expires}").as_bytes());
        let token = hex::encode(mac.finalize().into_bytes());
        Ok(format!("/{public_path}?token={token}&expires={expires}"))
    }

    /// Call the synthesis endpoint and publish the artifact. `Ok(None)` is
    /// the well-defined "no audio" outcome for any upstream failure.
    async fn generate(&self, text: &str, hash: &str) -> Result<Option<String>, AibroError> {
        let response = match self
            .client
            .post(format!("{}/speak", self.base_url))
            .json(&serde_json::json!({ "text": text }))
            .send()
            .await
        {
            Ok(response) => response,
            Err(err) => {
                tracing::warn!(error = %err, "speech request failed");
                return Ok(None);
            }
        };
        if !response.status().is_success() {
            tracing::warn!(status = %response.status(), "speech endpoint returned error status");
            return Ok(None);
        }

        let parsed: SynthResponse = match response.json().await {
            Ok(parsed) => parsed,
            Err(err) => {
                tracing::warn!(error = %err, "speech response unparseable");
                return Ok(None);
            }
        };
        if parsed.status != "ok" {
            tracing::warn!(status = %parsed.status, "speech endpoint reported failure");
            return Ok(None);
        }
        let Some(source) = parsed.file else {
            tracing::warn!("speech endpoint returned no artifact path");
            return Ok(None);
        };

        // Publish under the content hash so identical text shares one file.
        let artifact = self.public_dir.join(format!("{hash}.mp3"));
        if let Err(err) = tokio::fs::copy(&source, &artifact).await {
            tracing::warn!(source, error = %err, "speech artifact missing or unreadable");
            return Ok(None);
        }

        let expires = now_unix() + CACHE_TTL.as_secs() as i64;
        let public_path = format!(
            "{}/{hash}.mp3",
            self.public_dir
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_else(|| "tts_cache".to_string())
        );
        let url = self.signed_url(&public_path, expires)?;
        tracing::info!(hash, artifact = %artifact.display(), "speech artifact generated");
        Ok(Some(url))
    }
}

#[async_trait]
impl SpeechSynth for SpeechService {
    async fn speak(&self, text: &str, client_id: &str) -> Result<Option<String>, AibroError> {
        let text = text.trim();
        if text.is_empty() {
            return Ok(None);
        }

        if !self.rate.hit(client_id) {
            return Err(AibroError::RateLimited(format!(
                "speech requests are capped at {RATE_CAP} per minute"
            )));
        }

        let hash = content_hash(text);
        let cache_key = Self::cache_key(&hash);
        match self.cache.get(&cache_key).await {
            Ok(Some(url)) => {
                tracing::debug!(hash, "speech cache hit");
                return Ok(Some(url));
            }
            Ok(None) => {}
            Err(err) => tracing::warn!(error = %err, "speech cache read failed"),
        }

        if !self.locks.try_acquire(client_id, &hash).await? {
            return Err(AibroError::LockHeld(
                "speech generation for this text is already in progress".into(),
            ));
        }

        let result = self.generate(text, &hash).await;
        self.locks.release(client_id, &hash).await;
        let url = result?;

        if let Some(url) = &url {
            if let Err(err) = self.cache.set(&cache_key, url, Some(CACHE_TTL)).await {
                tracing::warn!(error = %err, "failed to cache speech url");
            }
        }
        Ok(url)
    }
}

/// Delete audio artifacts older than `max_age`. Returns how many were removed.
pub async fn sweep_expired(public_dir: &std::path::Path, max_age: Duration) -> usize {
    let Ok(mut dir) = tokio::fs::read_dir(public_dir).await else {
        return 0;
    };
    let now = SystemTime::now();
    let mut removed = 0;
    while let Ok(Some(item)) = dir.next_entry().await {
        let path = item.path();
        if !path.extension().is_some_and(|ext| ext == "mp3") {
            continue;
        }
        let expired = item
            .metadata()
            .await
            .and_then(|m| m.modified())
            .map(|modified| now.duration_since(modified).unwrap_or_default() >= max_age)
            .unwrap_or(false);
        if expired && tokio::fs::remove_file(&path).await.is_ok() {
            removed += 1;
        }
    }
    if removed > 0 {
        tracing::info!(removed, dir = %public_dir.display(), "swept expired speech artifacts");
    }
    removed
}

/// Spawn the periodic artifact sweep.
pub fn spawn_sweeper(public_dir: PathBuf, period: Duration) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(period);
        // The immediate first tick would sweep at startup; skip it.
        ticker.tick().await;
        loop {
            ticker.tick().await;
            sweep_expired(&public_dir, CACHE_TTL).await;
        }
    })
}

fn now_unix() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs() as i64)
        .unwrap_or(0)
}
