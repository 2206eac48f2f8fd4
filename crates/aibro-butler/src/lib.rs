// SPDX-FileCopyrightText: 2026 Aibro Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! AI orchestration for triggered room messages.
//!
//! One request flows search decision, context assembly, provider
//! generation, sanitation, and context persistence, and yields the
//! assistant [`ChatMessage`] to broadcast. Search is best-effort and
//! degrades to a notice in the prompt; provider-chain exhaustion is the
//! only terminal failure, and it leaves the room context untouched.

mod sanitize;

pub use sanitize::sanitize_reply;

use std::sync::Arc;
use std::time::Instant;

use aibro_context::ContextStore;
use aibro_core::{
    AibroError, ChatMessage, LiveSearch, TextGenerator, Timings, Turn,
};

/// Sender id carried on every assistant message.
pub const ASSISTANT_SENDER_ID: &str = "ai_bro";

/// Appended to the prompt when the search transport fails.
const SEARCH_DEGRADED_NOTICE: &str =
    "(Live search is unavailable right now; answer from existing knowledge.)";

/// One triggered AI request, already stripped of its trigger prefix.
#[derive(Debug, Clone)]
pub struct AiRequest {
    pub room_id: String,
    /// Prompt text with the trigger prefix removed, non-empty.
    pub prompt: String,
    /// Sampling temperature, already clamped by the caller.
    pub temperature: f64,
    /// Message id of the triggering chat message.
    pub trigger_message_id: String,
    /// Client-supplied turns that replace the room's stored context for
    /// this one request. The stored context is still what gets appended to.
    pub context_override: Option<Vec<Turn>>,
}

/// Orchestrates one AI exchange end to end.
pub struct AiButler {
    search: Arc<dyn LiveSearch>,
    generator: Arc<dyn TextGenerator>,
    context: Arc<ContextStore>,
    persona: String,
    nickname: String,
}

impl AiButler {
    pub fn new(
        search: Arc<dyn LiveSearch>,
        generator: Arc<dyn TextGenerator>,
        context: Arc<ContextStore>,
        persona: impl Into<String>,
        nickname: impl Into<String>,
    ) -> Self {
        Self {
            search,
            generator,
            context,
            persona: persona.into(),
            nickname: nickname.into(),
        }
    }

    /// Run the full pipeline for one request.
    ///
    /// Errors only when the provider chain is exhausted; in that case the
    /// room context has not been mutated.
    pub async fn handle(&self, req: AiRequest) -> Result<ChatMessage, AibroError> {
        let backend_start = Instant::now();

        let (augmented_prompt, search_ms) = self.augment_with_search(&req.prompt).await;

        let history = match req.context_override {
            Some(turns) => turns,
            None => self.context.load(&req.room_id).await,
        };
        let mut turns = Vec::with_capacity(history.len() + 2);
        turns.push(Turn::system(&self.persona));
        turns.extend(history);
        turns.push(Turn::user(&augmented_prompt));

        let ai_start = Instant::now();
        let reply = self.generator.generate(&turns, req.temperature).await?;
        let ai_ms = ai_start.elapsed().as_millis() as u64;

        let content = sanitize_reply(&reply.content);
        tracing::info!(
            room_id = %req.room_id,
            provider = %reply.provider,
            reply_chars = content.chars().count(),
            "assistant reply generated"
        );

        // The stored turn keeps the trigger prefix so replayed context
        // reads the way the room saw it.
        let user_record = format!("@AI {}", req.prompt);
        if let Err(err) = self
            .context
            .append_exchange(&req.room_id, &user_record, &content)
            .await
        {
            tracing::warn!(room_id = %req.room_id, error = %err, "failed to persist context exchange");
        }

        let backend_ms = backend_start.elapsed().as_millis() as u64;
        Ok(ChatMessage {
            room_id: req.room_id,
            sender_id: ASSISTANT_SENDER_ID.to_string(),
            nickname: self.nickname.clone(),
            content,
            is_ai: true,
            message_id: format!("ai_{}", req.trigger_message_id),
            timestamp: chrono::Utc::now().timestamp(),
            response_time: Some(backend_ms as f64 / 1000.0),
            timings_ms: Some(Timings {
                t2_search: search_ms,
                t3_ai: ai_ms,
                t4_backend: backend_ms,
            }),
        })
    }

    /// Decide on, run, and fold in a live search. A transport failure
    /// degrades to a fixed notice; no search means the prompt passes
    /// through with zero search time.
    async fn augment_with_search(&self, prompt: &str) -> (String, u64) {
        if !self.search.should_search(prompt) {
            return (prompt.to_string(), 0);
        }
        let start = Instant::now();
        let suffix = match self.search.search(prompt).await {
            Ok(summary) if summary.is_empty() => None,
            Ok(summary) => Some(summary),
            Err(err) => {
                tracing::warn!(error = %err, "live search failed, degrading");
                Some(SEARCH_DEGRADED_NOTICE.to_string())
            }
        };
        let elapsed = start.elapsed().as_millis() as u64;
        match suffix {
            Some(suffix) => (format!("{prompt}\n\n{suffix}"), elapsed),
            None => (prompt.to_string(), elapsed),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use aibro_core::{GeneratedReply, KvStore, Role};
    use aibro_store::FileStore;
    use async_trait::async_trait;
    use std::sync::Mutex;

    struct ScriptedSearch {
        trigger: bool,
        outcome: Result<String, String>,
    }

    #[async_trait]
    impl LiveSearch for ScriptedSearch {
        fn should_search(&self, _prompt: &str) -> bool {
            self.trigger
        }

        async fn search(&self, _prompt: &str) -> Result<String, AibroError> {
            self.outcome
                .clone()
                .map_err(AibroError::Search)
        }
    }

    struct ScriptedGenerator {
        reply: Result<String, ()>,
        seen_turns: Mutex<Vec<Turn>>,
    }

    impl ScriptedGenerator {
        fn ok(reply: &str) -> Self {
            Self {
                reply: Ok(reply.to_string()),
                seen_turns: Mutex::new(Vec::new()),
            }
        }

        fn failing() -> Self {
            Self {
                reply: Err(()),
                seen_turns: Mutex::new(Vec::new()),
            }
        }
    }

    #[async_trait]
    impl TextGenerator for ScriptedGenerator {
        async fn generate(
            &self,
            turns: &[Turn],
            _temperature: f64,
        ) -> Result<GeneratedReply, AibroError> {
            *self.seen_turns.lock().unwrap() = turns.to_vec();
            match &self.reply {
                Ok(content) => Ok(GeneratedReply {
                    content: content.clone(),
                    provider: "scripted".into(),
                }),
                Err(()) => Err(AibroError::provider("all providers failed")),
            }
        }
    }

    fn context_store(dir: &tempfile::TempDir) -> Arc<ContextStore> {
        let kv: Arc<dyn KvStore> = Arc::new(FileStore::new(dir.path()).unwrap());
        Arc::new(ContextStore::new(kv))
    }

    fn butler(
        search: ScriptedSearch,
        generator: Arc<ScriptedGenerator>,
        context: Arc<ContextStore>,
    ) -> AiButler {
        AiButler::new(
            Arc::new(search),
            generator,
            context,
            "You are a helpful room assistant.",
            "AIBRO",
        )
    }

    fn request(prompt: &str) -> AiRequest {
        AiRequest {
            room_id: "lobby".into(),
            prompt: prompt.into(),
            temperature: 0.7,
            trigger_message_id: "msg_42".into(),
            context_override: None,
        }
    }

    #[tokio::test]
    async fn reply_carries_assistant_identity_and_timings() {
        let dir = tempfile::tempdir().unwrap();
        let generator = Arc::new(ScriptedGenerator::ok("hello there"));
        let b = butler(
            ScriptedSearch { trigger: false, outcome: Ok(String::new()) },
            generator,
            context_store(&dir),
        );

        let msg = b.handle(request("hi")).await.unwrap();
        assert_eq!(msg.sender_id, ASSISTANT_SENDER_ID);
        assert_eq!(msg.nickname, "AIBRO");
        assert!(msg.is_ai);
        assert_eq!(msg.message_id, "ai_msg_42");
        assert_eq!(msg.content, "hello there");
        let timings = msg.timings_ms.unwrap();
        assert_eq!(timings.t2_search, 0);
        assert!(timings.t4_backend >= timings.t3_ai);
        assert!(msg.response_time.is_some());
    }

    #[tokio::test]
    async fn prompt_and_persona_frame_the_generated_turns() {
        let dir = tempfile::tempdir().unwrap();
        let generator = Arc::new(ScriptedGenerator::ok("ok"));
        let b = butler(
            ScriptedSearch { trigger: false, outcome: Ok(String::new()) },
            generator.clone(),
            context_store(&dir),
        );

        b.handle(request("what is rust")).await.unwrap();
        let turns = generator.seen_turns.lock().unwrap().clone();
        assert_eq!(turns[0].role, Role::System);
        assert_eq!(turns.last().unwrap().content, "what is rust");
    }

    #[tokio::test]
    async fn search_summary_is_appended_to_the_prompt() {
        let dir = tempfile::tempdir().unwrap();
        let generator = Arc::new(ScriptedGenerator::ok("ok"));
        let b = butler(
            ScriptedSearch {
                trigger: true,
                outcome: Ok("[Live search summary]\n1. result".into()),
            },
            generator.clone(),
            context_store(&dir),
        );

        b.handle(request("latest news")).await.unwrap();
        let turns = generator.seen_turns.lock().unwrap().clone();
        let prompt = &turns.last().unwrap().content;
        assert!(prompt.starts_with("latest news"));
        assert!(prompt.contains("[Live search summary]"));
    }

    #[tokio::test]
    async fn search_failure_degrades_to_a_notice() {
        let dir = tempfile::tempdir().unwrap();
        let generator = Arc::new(ScriptedGenerator::ok("ok"));
        let b = butler(
            ScriptedSearch { trigger: true, outcome: Err("down".into()) },
            generator.clone(),
            context_store(&dir),
        );

        b.handle(request("latest news")).await.unwrap();
        let turns = generator.seen_turns.lock().unwrap().clone();
        assert!(turns.last().unwrap().content.contains("Live search is unavailable"));
    }

    #[tokio::test]
    async fn exchange_is_persisted_with_trigger_prefix() {
        let dir = tempfile::tempdir().unwrap();
        let ctx = context_store(&dir);
        let generator = Arc::new(ScriptedGenerator::ok("the answer"));
        let b = butler(
            ScriptedSearch { trigger: false, outcome: Ok(String::new()) },
            generator,
            ctx.clone(),
        );

        b.handle(request("question")).await.unwrap();
        let turns = ctx.snapshot("lobby").await;
        assert_eq!(turns.len(), 2);
        assert_eq!(turns[0].content, "@AI question");
        assert_eq!(turns[1].content, "the answer");
    }

    #[tokio::test]
    async fn provider_exhaustion_fails_without_touching_context() {
        let dir = tempfile::tempdir().unwrap();
        let ctx = context_store(&dir);
        let generator = Arc::new(ScriptedGenerator::failing());
        let b = butler(
            ScriptedSearch { trigger: false, outcome: Ok(String::new()) },
            generator,
            ctx.clone(),
        );

        assert!(b.handle(request("question")).await.is_err());
        assert!(ctx.snapshot("lobby").await.is_empty());
    }

    #[tokio::test]
    async fn context_override_replaces_stored_history_for_one_request() {
        let dir = tempfile::tempdir().unwrap();
        let ctx = context_store(&dir);
        ctx.append_exchange("lobby", "@AI old", "old reply")
            .await
            .unwrap();

        let generator = Arc::new(ScriptedGenerator::ok("ok"));
        let b = butler(
            ScriptedSearch { trigger: false, outcome: Ok(String::new()) },
            generator.clone(),
            ctx,
        );

        let mut req = request("fresh question");
        req.context_override = Some(vec![Turn::user("override turn")]);
        b.handle(req).await.unwrap();

        let turns = generator.seen_turns.lock().unwrap().clone();
        let contents: Vec<_> = turns.iter().map(|t| t.content.as_str()).collect();
        assert!(contents.contains(&"override turn"));
        assert!(!contents.iter().any(|c| c.contains("old reply")));
    }
}
