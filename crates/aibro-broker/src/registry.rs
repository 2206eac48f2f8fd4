// SPDX-FileCopyrightText: 2026 Aibro Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! The room registry actor.
//!
//! One task owns every connection and room. Socket tasks, AI tasks, and
//! speech tasks talk to it exclusively through [`Command`] values, so
//! membership and fan-out never race. Slow or closed clients lose frames
//! rather than stalling the actor.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::sync::OnceLock;

use regex::Regex;
use tokio::sync::mpsc;

use aibro_butler::{AiButler, AiRequest};
use aibro_context::ContextStore;
use aibro_core::{AibroError, ChatMessage, SpeechSynth, Turn};
use aibro_store::{DedupLocks, RateLimiter};

use crate::events::{self, Inbound, Member};
use crate::history::HistoryLog;

/// AI triggers allowed per connection per minute.
pub const AI_RATE_CAP: u32 = 3;

/// Temperature bounds applied to client-supplied values.
pub const TEMPERATURE_MIN: f64 = 0.1;
pub const TEMPERATURE_MAX: f64 = 2.0;

const DEFAULT_TEMPERATURE: f64 = 0.7;
const ROOM_ID_MIN_LEN: usize = 3;

/// Everything the registry hands off to or cleans up for.
pub struct Services {
    pub butler: Arc<AiButler>,
    pub speech: Arc<dyn SpeechSynth>,
    pub context: Arc<ContextStore>,
    pub locks: Arc<DedupLocks>,
    pub speech_rate: Arc<RateLimiter>,
}

/// Commands consumed by the registry task.
pub enum Command {
    Connected {
        conn_id: String,
        sender: mpsc::Sender<String>,
    },
    Inbound {
        conn_id: String,
        raw: String,
    },
    Disconnected {
        conn_id: String,
    },
    AiFinished {
        room_id: String,
        result: Result<ChatMessage, AibroError>,
    },
    TtsFinished {
        conn_id: String,
        text: String,
        message_id: Option<String>,
        result: Result<Option<String>, AibroError>,
    },
}

struct ConnState {
    sender: mpsc::Sender<String>,
    room: Option<String>,
    nickname: String,
}

/// Single-writer owner of connections and rooms.
pub struct Registry {
    conns: HashMap<String, ConnState>,
    rooms: HashMap<String, HashSet<String>>,
    services: Services,
    history: HistoryLog,
    ai_rate: RateLimiter,
    cmd_tx: mpsc::Sender<Command>,
}

impl Registry {
    pub fn new(services: Services, history: HistoryLog, cmd_tx: mpsc::Sender<Command>) -> Self {
        Self {
            conns: HashMap::new(),
            rooms: HashMap::new(),
            services,
            history,
            ai_rate: RateLimiter::new(AI_RATE_CAP, std::time::Duration::from_secs(60)),
            cmd_tx,
        }
    }

    /// Consume commands until every sender is dropped.
    pub async fn run(mut self, mut rx: mpsc::Receiver<Command>) {
        while let Some(cmd) = rx.recv().await {
            self.handle(cmd).await;
        }
        tracing::info!("registry task stopping");
    }

    async fn handle(&mut self, cmd: Command) {
        match cmd {
            Command::Connected { conn_id, sender } => {
                tracing::debug!(conn_id, "connection registered");
                self.conns.insert(
                    conn_id,
                    ConnState {
                        sender,
                        room: None,
                        nickname: "anonymous".to_string(),
                    },
                );
            }
            Command::Inbound { conn_id, raw } => {
                let event = match events::parse_inbound(&raw) {
                    Ok(event) => event,
                    Err(message) => {
                        self.send_to(&conn_id, events::error_event(&message));
                        return;
                    }
                };
                // Per-event containment: a failing handler answers with a
                // generic error and the connection lives on.
                if let Err(err) = self.dispatch(&conn_id, event).await {
                    tracing::error!(conn_id, error = %err, "event handling failed");
                    self.send_to(&conn_id, events::error_event("internal error, please retry"));
                }
            }
            Command::Disconnected { conn_id } => self.disconnect(&conn_id).await,
            Command::AiFinished { room_id, result } => self.ai_finished(&room_id, result).await,
            Command::TtsFinished {
                conn_id,
                text,
                message_id,
                result,
            } => self.tts_finished(&conn_id, &text, message_id.as_deref(), result),
        }
    }

    async fn dispatch(&mut self, conn_id: &str, event: Inbound) -> Result<(), AibroError> {
        match event {
            Inbound::Join { room_id, nickname } => self.join(conn_id, &room_id, &nickname).await,
            Inbound::LoadHistory { room_id } => self.load_history(conn_id, &room_id).await,
            Inbound::Message {
                room_id,
                content,
                message_id,
                temperature,
                context,
            } => {
                self.message(conn_id, &room_id, &content, message_id, temperature, context)
                    .await
            }
            Inbound::GenerateTts {
                room_id,
                text,
                message_id,
            } => {
                if self.verify_room(conn_id, &room_id).is_some() {
                    self.generate_tts(conn_id, text, message_id);
                } else {
                    self.send_to(conn_id, events::room_error_event(&room_id, "join the room first"));
                }
                Ok(())
            }
        }
    }

    async fn join(
        &mut self,
        conn_id: &str,
        room_id: &str,
        nickname: &str,
    ) -> Result<(), AibroError> {
        let Some(room_id) = sanitize_room_id(room_id) else {
            self.send_to(
                conn_id,
                events::room_error_event(
                    "invalid",
                    "room id must be at least 3 characters of letters, digits, _ or -",
                ),
            );
            return Ok(());
        };

        self.leave_room(conn_id).await;

        let nickname = {
            let trimmed = nickname.trim();
            if trimmed.is_empty() {
                "anonymous".to_string()
            } else {
                trimmed.chars().take(32).collect()
            }
        };
        let Some(conn) = self.conns.get_mut(conn_id) else {
            return Ok(());
        };
        conn.room = Some(room_id.clone());
        conn.nickname = nickname.clone();
        self.rooms
            .entry(room_id.clone())
            .or_default()
            .insert(conn_id.to_string());

        let context = self.services.context.load(&room_id).await;
        let reconnect = !context.is_empty();
        self.send_to(
            conn_id,
            events::join_status(&room_id, conn_id, &nickname, reconnect, &context),
        );

        tracing::info!(conn_id, room_id, nickname, "joined room");
        self.broadcast_except(&room_id, conn_id, events::user_joined(conn_id, &nickname));
        let listing = events::user_list(&self.members(&room_id));
        self.broadcast(&room_id, listing);
        Ok(())
    }

    async fn load_history(&mut self, conn_id: &str, room_id: &str) -> Result<(), AibroError> {
        let Some(room_id) = self.verify_room(conn_id, room_id) else {
            self.send_to(conn_id, events::room_error_event(room_id, "join the room first"));
            return Ok(());
        };
        let messages = self.history.load(&room_id).await;
        self.send_to(conn_id, events::history(&room_id, &messages));
        Ok(())
    }

    async fn message(
        &mut self,
        conn_id: &str,
        room_id: &str,
        content: &str,
        message_id: Option<String>,
        temperature: Option<f64>,
        context: Option<Vec<Turn>>,
    ) -> Result<(), AibroError> {
        let Some(room_id) = self.verify_room(conn_id, room_id) else {
            self.send_to(conn_id, events::room_error_event(room_id, "join the room first"));
            return Ok(());
        };
        if content.trim().is_empty() {
            return Ok(());
        }
        let nickname = self
            .conns
            .get(conn_id)
            .map(|c| c.nickname.clone())
            .unwrap_or_else(|| "anonymous".to_string());

        let message = ChatMessage {
            room_id: room_id.clone(),
            sender_id: conn_id.to_string(),
            nickname,
            content: content.to_string(),
            is_ai: false,
            message_id: message_id
                .unwrap_or_else(|| format!("msg_{}", uuid::Uuid::new_v4())),
            timestamp: chrono::Utc::now().timestamp(),
            response_time: None,
            timings_ms: None,
        };
        self.broadcast(&room_id, events::chat(&message));
        if let Err(err) = self.history.append(&message).await {
            tracing::warn!(room_id, error = %err, "failed to append history");
        }

        let Some(prompt) = strip_ai_trigger(content) else {
            return Ok(());
        };
        if prompt.is_empty() {
            return Ok(());
        }
        if !self.ai_rate.hit(conn_id) {
            self.broadcast(
                &room_id,
                events::room_error_event(
                    &room_id,
                    &format!("AI requests are capped at {AI_RATE_CAP} per minute"),
                ),
            );
            return Ok(());
        }

        let request = AiRequest {
            room_id: room_id.clone(),
            prompt,
            temperature: clamp_temperature(temperature.unwrap_or(DEFAULT_TEMPERATURE)),
            trigger_message_id: message.message_id.clone(),
            context_override: context,
        };
        let butler = Arc::clone(&self.services.butler);
        let cmd_tx = self.cmd_tx.clone();
        tokio::spawn(async move {
            let room_id = request.room_id.clone();
            let result = butler.handle(request).await;
            let _ = cmd_tx.send(Command::AiFinished { room_id, result }).await;
        });
        Ok(())
    }

    fn generate_tts(&mut self, conn_id: &str, text: String, message_id: Option<String>) {
        let speech = Arc::clone(&self.services.speech);
        let cmd_tx = self.cmd_tx.clone();
        let conn_id = conn_id.to_string();
        tokio::spawn(async move {
            let result = speech.speak(&text, &conn_id).await;
            let _ = cmd_tx
                .send(Command::TtsFinished {
                    conn_id,
                    text,
                    message_id,
                    result,
                })
                .await;
        });
    }

    async fn ai_finished(&mut self, room_id: &str, result: Result<ChatMessage, AibroError>) {
        match result {
            Ok(message) => {
                if let Err(err) = self.history.append(&message).await {
                    tracing::warn!(room_id, error = %err, "failed to append AI history");
                }
                self.broadcast(room_id, events::chat(&message));
            }
            Err(err) => {
                tracing::error!(room_id, error = %err, "AI request failed terminally");
                self.broadcast(
                    room_id,
                    events::room_error_event(room_id, "the AI assistant is unavailable right now"),
                );
            }
        }
    }

    fn tts_finished(
        &mut self,
        conn_id: &str,
        text: &str,
        message_id: Option<&str>,
        result: Result<Option<String>, AibroError>,
    ) {
        match result {
            Ok(Some(url)) => self.send_to(conn_id, events::tts_ready(&url, text, message_id)),
            Ok(None) => self.send_to(conn_id, events::tts_ready("", text, message_id)),
            Err(err @ (AibroError::RateLimited(_) | AibroError::LockHeld(_))) => {
                self.send_to(conn_id, events::error_event(&err.to_string()));
            }
            Err(err) => {
                tracing::warn!(conn_id, error = %err, "speech request failed");
                self.send_to(conn_id, events::tts_ready("", text, message_id));
            }
        }
    }

    async fn disconnect(&mut self, conn_id: &str) {
        self.leave_room(conn_id).await;
        self.conns.remove(conn_id);
        self.ai_rate.forget(conn_id);
        self.services.speech_rate.forget(conn_id);
        self.services.locks.release_client(conn_id).await;
        tracing::debug!(conn_id, "connection cleaned up");
    }

    /// Detach a connection from its room and tell the remaining members.
    async fn leave_room(&mut self, conn_id: &str) {
        let Some(conn) = self.conns.get_mut(conn_id) else {
            return;
        };
        let Some(room_id) = conn.room.take() else {
            return;
        };
        let nickname = conn.nickname.clone();
        if let Some(members) = self.rooms.get_mut(&room_id) {
            members.remove(conn_id);
            if members.is_empty() {
                self.rooms.remove(&room_id);
                return;
            }
        }
        self.broadcast(&room_id, events::user_left(conn_id, &nickname));
        let listing = events::user_list(&self.members(&room_id));
        self.broadcast(&room_id, listing);
    }

    fn members(&self, room_id: &str) -> Vec<Member> {
        let Some(ids) = self.rooms.get(room_id) else {
            return Vec::new();
        };
        let mut members: Vec<Member> = ids
            .iter()
            .filter_map(|id| {
                self.conns.get(id).map(|c| Member {
                    id: id.clone(),
                    nickname: c.nickname.clone(),
                })
            })
            .collect();
        members.sort_by(|a, b| a.id.cmp(&b.id));
        members
    }

    fn room_of(&self, conn_id: &str) -> Option<String> {
        self.conns.get(conn_id).and_then(|c| c.room.clone())
    }

    /// Accept the room a frame names only when the sender is joined to
    /// exactly that room.
    fn verify_room(&self, conn_id: &str, room_id: &str) -> Option<String> {
        match self.room_of(conn_id) {
            Some(current) if current == room_id => Some(current),
            _ => None,
        }
    }

    fn broadcast(&self, room_id: &str, payload: String) {
        let Some(members) = self.rooms.get(room_id) else {
            return;
        };
        for conn_id in members {
            self.send_to(conn_id, payload.clone());
        }
    }

    fn broadcast_except(&self, room_id: &str, skip: &str, payload: String) {
        let Some(members) = self.rooms.get(room_id) else {
            return;
        };
        for conn_id in members {
            if conn_id != skip {
                self.send_to(conn_id, payload.clone());
            }
        }
    }

    /// Queue a frame for one client. A closed or backlogged client loses
    /// the frame; the actor never waits on a socket.
    fn send_to(&self, conn_id: &str, payload: String) {
        if let Some(conn) = self.conns.get(conn_id) {
            if let Err(err) = conn.sender.try_send(payload) {
                tracing::debug!(conn_id, error = %err, "dropping frame for client");
            }
        }
    }
}

/// Keep `[A-Za-z0-9_-]` only; `None` when fewer than three chars remain.
pub fn sanitize_room_id(raw: &str) -> Option<String> {
    let clean: String = raw
        .chars()
        .filter(|c| c.is_ascii_alphanumeric() || *c == '_' || *c == '-')
        .collect();
    (clean.len() >= ROOM_ID_MIN_LEN).then_some(clean)
}

/// Strip the AI trigger prefix. `None` when the message is not a trigger;
/// `Some("")` when it is a trigger with no prompt.
pub fn strip_ai_trigger(content: &str) -> Option<String> {
    static RE: OnceLock<Regex> = OnceLock::new();
    let re = RE.get_or_init(|| {
        Regex::new(r"(?i)^[@＠]AI\s*").unwrap_or_else(|_| unreachable!())
    });
    re.find(content)
        .map(|m| content[m.end()..].trim().to_string())
}

/// Clamp a sampling temperature into the accepted range.
pub fn clamp_temperature(temperature: f64) -> f64 {
    temperature.clamp(TEMPERATURE_MIN, TEMPERATURE_MAX)
}

#[cfg(test)]
mod tests {
    use super::*;
    use aibro_core::{GeneratedReply, KvStore, LiveSearch, TextGenerator};
    use aibro_store::FileStore;
    use async_trait::async_trait;

    struct NoSearch;

    #[async_trait]
    impl LiveSearch for NoSearch {
        fn should_search(&self, _prompt: &str) -> bool {
            false
        }
        async fn search(&self, _prompt: &str) -> Result<String, AibroError> {
            Ok(String::new())
        }
    }

    struct EchoGenerator;

    #[async_trait]
    impl TextGenerator for EchoGenerator {
        async fn generate(
            &self,
            turns: &[Turn],
            _temperature: f64,
        ) -> Result<GeneratedReply, AibroError> {
            Ok(GeneratedReply {
                content: format!("echo: {}", turns.last().map(|t| t.content.as_str()).unwrap_or("")),
                provider: "echo".into(),
            })
        }
    }

    struct ScriptedSpeech {
        url: Option<String>,
    }

    #[async_trait]
    impl SpeechSynth for ScriptedSpeech {
        async fn speak(&self, _text: &str, _client_id: &str) -> Result<Option<String>, AibroError> {
            Ok(self.url.clone())
        }
    }

    struct Fixture {
        registry: Registry,
        cmd_rx: mpsc::Receiver<Command>,
        _dirs: (tempfile::TempDir, tempfile::TempDir),
    }

    fn fixture() -> Fixture {
        fixture_with_speech(ScriptedSpeech { url: None })
    }

    fn fixture_with_speech(speech: ScriptedSpeech) -> Fixture {
        let store_dir = tempfile::tempdir().unwrap();
        let log_dir = tempfile::tempdir().unwrap();
        let kv: Arc<dyn KvStore> = Arc::new(FileStore::new(store_dir.path()).unwrap());
        let context = Arc::new(ContextStore::new(Arc::clone(&kv)));
        let butler = Arc::new(AiButler::new(
            Arc::new(NoSearch),
            Arc::new(EchoGenerator),
            Arc::clone(&context),
            "persona",
            "AIBRO",
        ));
        let services = Services {
            butler,
            speech: Arc::new(speech),
            context,
            locks: Arc::new(DedupLocks::new(kv)),
            speech_rate: Arc::new(RateLimiter::new(5, std::time::Duration::from_secs(60))),
        };
        let history = HistoryLog::new(log_dir.path()).unwrap();
        let (cmd_tx, cmd_rx) = mpsc::channel(64);
        Fixture {
            registry: Registry::new(services, history, cmd_tx),
            cmd_rx,
            _dirs: (store_dir, log_dir),
        }
    }

    async fn connect(fx: &mut Fixture, conn_id: &str) -> mpsc::Receiver<String> {
        let (tx, rx) = mpsc::channel(64);
        fx.registry
            .handle(Command::Connected {
                conn_id: conn_id.into(),
                sender: tx,
            })
            .await;
        rx
    }

    async fn send(fx: &mut Fixture, conn_id: &str, raw: &str) {
        fx.registry
            .handle(Command::Inbound {
                conn_id: conn_id.into(),
                raw: raw.into(),
            })
            .await;
    }

    fn drain(rx: &mut mpsc::Receiver<String>) -> Vec<serde_json::Value> {
        let mut out = Vec::new();
        while let Ok(raw) = rx.try_recv() {
            out.push(serde_json::from_str(&raw).unwrap());
        }
        out
    }

    fn types(events: &[serde_json::Value]) -> Vec<String> {
        events
            .iter()
            .map(|e| e["type"].as_str().unwrap_or("").to_string())
            .collect()
    }

    #[test]
    fn room_ids_are_sanitized() {
        assert_eq!(sanitize_room_id("lobby"), Some("lobby".into()));
        assert_eq!(sanitize_room_id("my room!"), Some("myroom".into()));
        assert_eq!(sanitize_room_id("a!"), None);
        assert_eq!(sanitize_room_id("ab"), None);
        assert_eq!(sanitize_room_id("A_b-9"), Some("A_b-9".into()));
    }

    #[test]
    fn trigger_matches_both_at_signs_case_insensitively() {
        assert_eq!(strip_ai_trigger("@AI hello"), Some("hello".into()));
        assert_eq!(strip_ai_trigger("@ai hello"), Some("hello".into()));
        assert_eq!(strip_ai_trigger("＠AI 你好"), Some("你好".into()));
        assert_eq!(strip_ai_trigger("@AI"), Some("".into()));
        assert_eq!(strip_ai_trigger("hello @AI"), None);
    }

    #[test]
    fn temperature_is_clamped() {
        assert_eq!(clamp_temperature(0.0), 0.1);
        assert_eq!(clamp_temperature(5.0), 2.0);
        assert_eq!(clamp_temperature(0.7), 0.7);
    }

    #[tokio::test]
    async fn join_returns_status_and_broadcasts_presence() {
        let mut fx = fixture();
        let mut rx1 = connect(&mut fx, "c1").await;
        send(&mut fx, "c1", r#"{"type": "join", "room_id": "lobby", "nickname": "alice"}"#).await;

        let events = drain(&mut rx1);
        assert_eq!(types(&events), vec!["join_status", "user_list"]);
        assert_eq!(events[0]["reconnect"], false);

        let mut rx2 = connect(&mut fx, "c2").await;
        send(&mut fx, "c2", r#"{"type": "join", "room_id": "lobby", "nickname": "bob"}"#).await;

        let events1 = drain(&mut rx1);
        assert_eq!(types(&events1), vec!["user_joined", "user_list"]);
        assert_eq!(events1[0]["nickname"], "bob");
        assert_eq!(events1[1]["count"], 2);

        let events2 = drain(&mut rx2);
        assert_eq!(types(&events2), vec!["join_status", "user_list"]);
    }

    #[tokio::test]
    async fn invalid_room_id_is_rejected_without_creating_a_room() {
        let mut fx = fixture();
        let mut rx = connect(&mut fx, "c1").await;
        send(&mut fx, "c1", r#"{"type": "join", "room_id": "a!"}"#).await;

        let events = drain(&mut rx);
        assert_eq!(types(&events), vec!["error"]);
        assert!(fx.registry.rooms.is_empty());
    }

    #[tokio::test]
    async fn messages_broadcast_to_the_whole_room_and_land_in_history() {
        let mut fx = fixture();
        let mut rx1 = connect(&mut fx, "c1").await;
        let mut rx2 = connect(&mut fx, "c2").await;
        send(&mut fx, "c1", r#"{"type": "join", "room_id": "lobby", "nickname": "alice"}"#).await;
        send(&mut fx, "c2", r#"{"type": "join", "room_id": "lobby", "nickname": "bob"}"#).await;
        drain(&mut rx1);
        drain(&mut rx2);

        send(
            &mut fx,
            "c1",
            r#"{"type": "message", "room_id": "lobby", "content": "hello room"}"#,
        )
        .await;

        let events1 = drain(&mut rx1);
        let events2 = drain(&mut rx2);
        assert_eq!(types(&events1), vec!["message"]);
        assert_eq!(types(&events2), vec!["message"]);
        assert_eq!(events1[0]["content"], "hello room");

        send(&mut fx, "c2", r#"{"type": "load_history", "room_id": "lobby"}"#).await;
        let events2 = drain(&mut rx2);
        assert_eq!(types(&events2), vec!["load_history"]);
        assert_eq!(events2[0]["room_id"], "lobby");
        assert_eq!(events2[0]["messages"][0]["content"], "hello room");
    }

    #[tokio::test]
    async fn message_before_joining_is_an_error() {
        let mut fx = fixture();
        let mut rx = connect(&mut fx, "c1").await;
        send(&mut fx, "c1", r#"{"type": "message", "room_id": "lobby", "content": "hi"}"#).await;
        assert_eq!(types(&drain(&mut rx)), vec!["error"]);
    }

    #[tokio::test]
    async fn frames_without_a_room_id_are_rejected_without_state_change() {
        let mut fx = fixture();
        let mut rx = connect(&mut fx, "c1").await;
        send(&mut fx, "c1", r#"{"type": "join", "room_id": "lobby"}"#).await;
        drain(&mut rx);

        send(&mut fx, "c1", r#"{"type": "message", "content": "hi"}"#).await;
        send(&mut fx, "c1", r#"{"type": "load_history"}"#).await;
        send(&mut fx, "c1", r#"{"type": "generate_tts", "text": "read me"}"#).await;

        let events = drain(&mut rx);
        assert_eq!(types(&events), vec!["error", "error", "error"]);
        // Nothing was broadcast, persisted, or handed to a background task.
        assert!(fx.cmd_rx.try_recv().is_err());
        assert!(fx.registry.history.load("lobby").await.is_empty());
    }

    #[tokio::test]
    async fn frames_naming_an_unjoined_room_are_rejected() {
        let mut fx = fixture();
        let mut rx1 = connect(&mut fx, "c1").await;
        let mut rx2 = connect(&mut fx, "c2").await;
        send(&mut fx, "c1", r#"{"type": "join", "room_id": "lobby"}"#).await;
        send(&mut fx, "c2", r#"{"type": "join", "room_id": "lobby"}"#).await;
        drain(&mut rx1);
        drain(&mut rx2);

        send(
            &mut fx,
            "c1",
            r#"{"type": "message", "room_id": "other", "content": "smuggled"}"#,
        )
        .await;

        let events1 = drain(&mut rx1);
        assert_eq!(types(&events1), vec!["error"]);
        assert_eq!(events1[0]["room_id"], "other");
        // The joined room never saw the frame.
        assert!(drain(&mut rx2).is_empty());
        assert!(fx.registry.history.load("other").await.is_empty());
    }

    #[tokio::test]
    async fn malformed_and_unknown_frames_get_error_replies() {
        let mut fx = fixture();
        let mut rx = connect(&mut fx, "c1").await;

        send(&mut fx, "c1", "{broken").await;
        send(&mut fx, "c1", r#"{"type": "poke"}"#).await;

        let events = drain(&mut rx);
        assert_eq!(types(&events), vec!["error", "error"]);
        assert!(events[1]["message"].as_str().unwrap().contains("poke"));
    }

    #[tokio::test]
    async fn ai_trigger_produces_an_assistant_message() {
        let mut fx = fixture();
        let mut rx = connect(&mut fx, "c1").await;
        send(&mut fx, "c1", r#"{"type": "join", "room_id": "lobby", "nickname": "alice"}"#).await;
        drain(&mut rx);

        send(
            &mut fx,
            "c1",
            r#"{"type": "message", "room_id": "lobby", "content": "@AI what time is it"}"#,
        )
        .await;
        // The user message broadcasts immediately.
        assert_eq!(types(&drain(&mut rx)), vec!["message"]);

        // The spawned AI task reports back through the command channel.
        let cmd = fx.cmd_rx.recv().await.unwrap();
        fx.registry.handle(cmd).await;

        let events = drain(&mut rx);
        assert_eq!(types(&events), vec!["message"]);
        assert_eq!(events[0]["is_ai"], true);
        assert_eq!(events[0]["content"], "echo: what time is it");
        assert_eq!(events[0]["sender_id"], "ai_bro");
    }

    #[tokio::test]
    async fn bare_trigger_with_no_prompt_is_a_noop() {
        let mut fx = fixture();
        let mut rx = connect(&mut fx, "c1").await;
        send(&mut fx, "c1", r#"{"type": "join", "room_id": "lobby"}"#).await;
        drain(&mut rx);

        send(&mut fx, "c1", r#"{"type": "message", "room_id": "lobby", "content": "@AI   "}"#).await;
        assert_eq!(types(&drain(&mut rx)), vec!["message"]);
        assert!(fx.cmd_rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn excess_ai_triggers_are_rate_limited() {
        let mut fx = fixture();
        let mut rx = connect(&mut fx, "c1").await;
        send(&mut fx, "c1", r#"{"type": "join", "room_id": "lobby"}"#).await;
        drain(&mut rx);

        for _ in 0..4 {
            send(&mut fx, "c1", r#"{"type": "message", "room_id": "lobby", "content": "@AI hi"}"#)
                .await;
        }
        let events = drain(&mut rx);
        // Four broadcasts plus one room-visible rate-limit error.
        let t = types(&events);
        assert_eq!(t.iter().filter(|t| *t == "message").count(), 4);
        assert_eq!(t.iter().filter(|t| *t == "error").count(), 1);
    }

    #[tokio::test]
    async fn disconnect_announces_departure_and_clears_rate_state() {
        let mut fx = fixture();
        let mut rx1 = connect(&mut fx, "c1").await;
        let mut rx2 = connect(&mut fx, "c2").await;
        send(&mut fx, "c1", r#"{"type": "join", "room_id": "lobby", "nickname": "alice"}"#).await;
        send(&mut fx, "c2", r#"{"type": "join", "room_id": "lobby", "nickname": "bob"}"#).await;
        drain(&mut rx1);
        drain(&mut rx2);

        fx.registry.handle(Command::Disconnected { conn_id: "c2".into() }).await;

        let events = drain(&mut rx1);
        assert_eq!(types(&events), vec!["user_left", "user_list"]);
        assert_eq!(events[0]["nickname"], "bob");
        assert_eq!(events[1]["count"], 1);
        assert!(!fx.registry.conns.contains_key("c2"));
    }

    #[tokio::test]
    async fn last_member_leaving_drops_the_room() {
        let mut fx = fixture();
        let _rx = connect(&mut fx, "c1").await;
        send(&mut fx, "c1", r#"{"type": "join", "room_id": "lobby"}"#).await;
        fx.registry.handle(Command::Disconnected { conn_id: "c1".into() }).await;
        assert!(fx.registry.rooms.is_empty());
    }

    #[tokio::test]
    async fn rejoining_a_room_with_context_reports_reconnect() {
        let mut fx = fixture();
        fx.registry
            .services
            .context
            .append_exchange("lobby", "@AI earlier", "earlier reply")
            .await
            .unwrap();

        let mut rx = connect(&mut fx, "c1").await;
        send(&mut fx, "c1", r#"{"type": "join", "room_id": "lobby"}"#).await;

        let events = drain(&mut rx);
        assert_eq!(events[0]["type"], "join_status");
        assert_eq!(events[0]["reconnect"], true);
        assert_eq!(events[0]["context"].as_array().unwrap().len(), 2);
    }

    #[tokio::test]
    async fn tts_success_and_failure_both_resolve_to_tts_ready() {
        let mut fx = fixture_with_speech(ScriptedSpeech {
            url: Some("/tts_cache/abc.mp3?token=t&expires=1".into()),
        });
        let mut rx = connect(&mut fx, "c1").await;
        send(&mut fx, "c1", r#"{"type": "join", "room_id": "lobby"}"#).await;
        drain(&mut rx);

        send(&mut fx, "c1", r#"{"type": "generate_tts", "room_id": "lobby", "text": "read me"}"#)
            .await;
        let cmd = fx.cmd_rx.recv().await.unwrap();
        fx.registry.handle(cmd).await;

        let events = drain(&mut rx);
        assert_eq!(types(&events), vec!["tts_ready"]);
        assert!(events[0]["audio_url"].as_str().unwrap().contains("token="));

        // Failure path: the scripted service reports no audio.
        fx.registry
            .handle(Command::TtsFinished {
                conn_id: "c1".into(),
                text: "read me".into(),
                message_id: None,
                result: Ok(None),
            })
            .await;
        let events = drain(&mut rx);
        assert_eq!(events[0]["audio_url"], "");
    }

    #[tokio::test]
    async fn tts_rate_limit_surfaces_as_an_error_event() {
        let mut fx = fixture();
        let mut rx = connect(&mut fx, "c1").await;
        fx.registry
            .handle(Command::TtsFinished {
                conn_id: "c1".into(),
                text: "read me".into(),
                message_id: None,
                result: Err(AibroError::RateLimited("speech requests are capped".into())),
            })
            .await;
        let events = drain(&mut rx);
        assert_eq!(types(&events), vec!["error"]);
        assert!(events[0]["message"].as_str().unwrap().contains("capped"));
    }

    #[tokio::test]
    async fn ai_failure_broadcasts_a_room_error() {
        let mut fx = fixture();
        let mut rx = connect(&mut fx, "c1").await;
        send(&mut fx, "c1", r#"{"type": "join", "room_id": "lobby"}"#).await;
        drain(&mut rx);

        fx.registry
            .handle(Command::AiFinished {
                room_id: "lobby".into(),
                result: Err(AibroError::provider("all providers failed")),
            })
            .await;
        let events = drain(&mut rx);
        assert_eq!(types(&events), vec!["error"]);
    }
}
