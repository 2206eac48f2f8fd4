// SPDX-FileCopyrightText: 2026 Aibro Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Keyword-triggered live search with cached summaries.
//!
//! Prompts that mention a configured keyword get one SearxNG-style lookup.
//! Summaries are cached by prompt hash for five minutes so repeated
//! questions in a room cost one external call. Search is best-effort: a
//! parse problem or empty result set yields an empty summary, and only a
//! transport failure surfaces as an error for the orchestrator to degrade.

use std::sync::Arc;
use std::sync::OnceLock;
use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;

use aibro_core::{AibroError, KvStore, LiveSearch};
use aibro_store::content_hash;

/// Cached summaries live this long.
pub const CACHE_TTL: Duration = Duration::from_secs(300);

/// Bound on the search HTTP call.
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(8);

/// Result entries included in a summary.
const MAX_RESULTS: usize = 3;

/// Character cap on each snippet line.
const SNIPPET_CHARS: usize = 120;

/// Character cap on the combined summary.
const SUMMARY_CHARS: usize = 800;

/// Keywords used when the config provides none.
pub const DEFAULT_KEYWORDS: &[&str] = &[
    "最新", "新聞", "天氣", "股價", "匯率", "比賽", "賽事", "即時", "現在", "今天", "油價",
    "幾點", "價格", "推薦", "查一下", "搜尋", "news", "weather", "latest", "price",
];

#[derive(Debug, Deserialize)]
struct SearchResponse {
    #[serde(default)]
    results: Vec<SearchResult>,
}

#[derive(Debug, Deserialize)]
struct SearchResult {
    #[serde(default)]
    title: String,
    #[serde(default)]
    url: String,
    #[serde(default)]
    content: String,
}

/// Live search against a SearxNG-compatible endpoint, with a KV-backed
/// summary cache.
pub struct SearchService {
    client: reqwest::Client,
    base_url: String,
    cache: Arc<dyn KvStore>,
    keywords: Vec<String>,
}

impl SearchService {
    pub fn new(
        base_url: impl Into<String>,
        cache: Arc<dyn KvStore>,
        keywords: Vec<String>,
    ) -> Result<Self, AibroError> {
        let client = reqwest::Client::builder()
            .timeout(DEFAULT_REQUEST_TIMEOUT)
            .build()
            .map_err(|e| AibroError::Search(format!("failed to build HTTP client: {e}")))?;
        let keywords = if keywords.is_empty() {
            DEFAULT_KEYWORDS.iter().map(|s| s.to_lowercase()).collect()
        } else {
            keywords.into_iter().map(|s| s.to_lowercase()).collect()
        };
        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            cache,
            keywords,
        })
    }

    fn cache_key(prompt: &str) -> String {
        format!("search:{}", content_hash(prompt))
    }

    /// Format up to [`MAX_RESULTS`] entries as numbered title/snippet/source
    /// lines, bounded at [`SUMMARY_CHARS`] characters with an explicit
    /// truncation notice.
    fn format_summary(results: &[SearchResult]) -> String {
        let mut summary = String::from("[Live search summary]\n");
        for (i, result) in results.iter().take(MAX_RESULTS).enumerate() {
            let title = result.title.trim();
            let snippet = clip_chars(strip_tags(&result.content).trim(), SNIPPET_CHARS);
            summary.push_str(&format!(
                "{}. {title}\n   {snippet}\n   source: {}\n",
                i + 1,
                result.url
            ));
        }
        if summary.chars().count() > SUMMARY_CHARS {
            let clipped: String = summary.chars().take(SUMMARY_CHARS).collect();
            return format!("{clipped}\n(summary truncated)");
        }
        summary
    }
}

/// Prepend a fresh current-time line for time-related prompts. Applied
/// outside the cache so a cached summary never carries a stale clock.
fn with_time_block(prompt: &str, summary: String) -> String {
    if summary.is_empty() || !wants_time(prompt) {
        return summary;
    }
    let now = chrono::Local::now();
    format!(
        "[Current time] {}\n{summary}",
        now.format("%Y-%m-%d (%a) %H:%M")
    )
}

fn wants_time(prompt: &str) -> bool {
    static RE: OnceLock<regex::Regex> = OnceLock::new();
    let re = RE.get_or_init(|| {
        regex::Regex::new(r"(?i)幾點|現在時間|現在幾點|時間|what time|current time")
            .unwrap_or_else(|_| unreachable!())
    });
    re.is_match(prompt)
}

#[async_trait]
impl LiveSearch for SearchService {
    fn should_search(&self, prompt: &str) -> bool {
        let prompt = prompt.to_lowercase();
        self.keywords.iter().any(|kw| prompt.contains(kw.as_str()))
    }

    async fn search(&self, prompt: &str) -> Result<String, AibroError> {
        let key = Self::cache_key(prompt);

        // Cache problems are not search problems; treat them as a miss.
        match self.cache.get(&key).await {
            Ok(Some(cached)) => {
                tracing::debug!(prompt_chars = prompt.chars().count(), "search cache hit");
                return Ok(with_time_block(prompt, cached));
            }
            Ok(None) => {}
            Err(err) => tracing::warn!(error = %err, "search cache read failed"),
        }

        let response = self
            .client
            .get(format!("{}/search", self.base_url))
            .query(&[("q", prompt), ("format", "json"), ("categories", "general")])
            .send()
            .await
            .map_err(|e| AibroError::Search(format!("search request failed: {e}")))?;
        if !response.status().is_success() {
            return Err(AibroError::Search(format!(
                "search endpoint returned {}",
                response.status()
            )));
        }

        let parsed: SearchResponse = match response.json().await {
            Ok(parsed) => parsed,
            Err(err) => {
                tracing::info!(error = %err, "search response unparseable, returning empty summary");
                return Ok(String::new());
            }
        };
        if parsed.results.is_empty() {
            tracing::info!("search returned no results");
            return Ok(String::new());
        }

        let summary = Self::format_summary(&parsed.results);
        if let Err(err) = self.cache.set(&key, &summary, Some(CACHE_TTL)).await {
            tracing::warn!(error = %err, "failed to cache search summary");
        }
        Ok(with_time_block(prompt, summary))
    }
}

/// Remove HTML tags from a snippet.
fn strip_tags(text: &str) -> String {
    static TAG: OnceLock<regex::Regex> = OnceLock::new();
    let tag = TAG.get_or_init(|| regex::Regex::new(r"<[^>]*>").unwrap_or_else(|_| unreachable!()));
    tag.replace_all(text, "").into_owned()
}

/// Truncate at a character boundary, appending an ellipsis when clipped.
fn clip_chars(text: &str, max: usize) -> String {
    if text.chars().count() <= max {
        return text.to_string();
    }
    let clipped: String = text.chars().take(max).collect();
    format!("{clipped}…")
}

#[cfg(test)]
mod tests {
    use super::*;
    use aibro_store::FileStore;
    use wiremock::matchers::{method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn service(base_url: &str, dir: &tempfile::TempDir) -> SearchService {
        let cache: Arc<dyn KvStore> = Arc::new(FileStore::new(dir.path()).unwrap());
        SearchService::new(base_url, cache, vec!["weather".into(), "最新".into()]).unwrap()
    }

    fn results_body() -> serde_json::Value {
        serde_json::json!({
            "results": [
                {"title": "Taipei forecast", "url": "https://example.com/a", "content": "<b>Sunny</b> tomorrow"},
                {"title": "Typhoon watch", "url": "https://example.com/b", "content": "A storm is forming"},
            ]
        })
    }

    #[tokio::test]
    async fn keyword_match_is_case_insensitive_substring() {
        let dir = tempfile::tempdir().unwrap();
        let svc = service("http://127.0.0.1:1", &dir);
        assert!(svc.should_search("What's the WEATHER like?"));
        assert!(svc.should_search("給我最新消息"));
        assert!(!svc.should_search("tell me a joke"));
    }

    #[tokio::test]
    async fn summary_is_formatted_and_tags_stripped() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/search"))
            .and(query_param("format", "json"))
            .respond_with(ResponseTemplate::new(200).set_body_json(results_body()))
            .mount(&server)
            .await;

        let dir = tempfile::tempdir().unwrap();
        let svc = service(&server.uri(), &dir);
        let summary = svc.search("weather in taipei").await.unwrap();
        assert!(summary.starts_with("[Live search summary]"));
        assert!(summary.contains("1. Taipei forecast"));
        assert!(summary.contains("Sunny tomorrow"));
        assert!(!summary.contains("<b>"));
        assert!(summary.contains("source: https://example.com/b"));
    }

    #[tokio::test]
    async fn second_search_within_ttl_hits_the_cache() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/search"))
            .respond_with(ResponseTemplate::new(200).set_body_json(results_body()))
            .expect(1)
            .mount(&server)
            .await;

        let dir = tempfile::tempdir().unwrap();
        let svc = service(&server.uri(), &dir);
        let first = svc.search("weather in taipei").await.unwrap();
        let second = svc.search("weather in taipei").await.unwrap();
        assert_eq!(first, second);
    }

    #[tokio::test]
    async fn empty_results_yield_empty_summary() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/search"))
            .respond_with(
                ResponseTemplate::new(200).set_body_json(serde_json::json!({"results": []})),
            )
            .mount(&server)
            .await;

        let dir = tempfile::tempdir().unwrap();
        let svc = service(&server.uri(), &dir);
        assert_eq!(svc.search("weather").await.unwrap(), "");
    }

    #[tokio::test]
    async fn transport_failure_is_an_error_for_the_caller_to_degrade() {
        let dir = tempfile::tempdir().unwrap();
        // Nothing listens here.
        let svc = service("http://127.0.0.1:1", &dir);
        assert!(svc.search("weather").await.is_err());
    }

    #[tokio::test]
    async fn summary_is_truncated_to_the_character_cap() {
        let long = "x".repeat(600);
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/search"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "results": [
                    {"title": long.clone(), "url": "https://e.com", "content": long.clone()},
                    {"title": long.clone(), "url": "https://e.com", "content": long.clone()},
                    {"title": long, "url": "https://e.com", "content": "tail"},
                ]
            })))
            .mount(&server)
            .await;

        let dir = tempfile::tempdir().unwrap();
        let svc = service(&server.uri(), &dir);
        let summary = svc.search("weather").await.unwrap();
        assert!(summary.ends_with("(summary truncated)"));
        assert!(summary.chars().count() <= SUMMARY_CHARS + "\n(summary truncated)".len());
    }

    #[tokio::test]
    async fn time_prompts_get_a_fresh_current_time_line() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/search"))
            .respond_with(ResponseTemplate::new(200).set_body_json(results_body()))
            .expect(1)
            .mount(&server)
            .await;

        let dir = tempfile::tempdir().unwrap();
        let svc = service(&server.uri(), &dir);
        let summary = svc.search("現在幾點").await.unwrap();
        assert!(summary.starts_with("[Current time]"));
        assert!(summary.contains("[Live search summary]"));

        // The cached copy gets the time line re-applied, not replayed.
        let again = svc.search("現在幾點").await.unwrap();
        assert!(again.starts_with("[Current time]"));
    }

    #[test]
    fn time_line_is_skipped_for_ordinary_prompts_and_empty_summaries() {
        assert!(!wants_time("weather in taipei"));
        assert!(wants_time("what time is it in tokyo"));
        assert_eq!(with_time_block("現在幾點", String::new()), "");
        let plain = with_time_block("weather", "[Live search summary]\n".into());
        assert_eq!(plain, "[Live search summary]\n");
    }
}
