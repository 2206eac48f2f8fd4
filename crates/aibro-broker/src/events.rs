// SPDX-FileCopyrightText: 2026 Aibro Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Wire events, both directions.
//!
//! Client -> Server (JSON, discriminated by `type`; every event names its
//! room, and a frame without a `room_id` is rejected before any state is
//! touched):
//! ```json
//! {"type": "join", "room_id": "lobby", "nickname": "alice"}
//! {"type": "load_history", "room_id": "lobby"}
//! {"type": "message", "room_id": "lobby", "content": "@AI hello", "temperature": 0.9}
//! {"type": "generate_tts", "room_id": "lobby", "text": "read this aloud"}
//! ```
//!
//! Server -> Client (JSON):
//! ```json
//! {"type": "join_status", "room_id": "lobby", "user_id": "...", "nickname": "alice",
//!  "reconnect": false, "context": []}
//! {"type": "user_joined", "user_id": "...", "nickname": "alice"}
//! {"type": "user_list", "users": [{"id": "...", "nickname": "alice"}], "count": 1}
//! {"type": "message", ...ChatMessage fields...}
//! {"type": "load_history", "room_id": "lobby", "messages": [...]}
//! {"type": "tts_ready", "audio_url": "/tts_cache/...mp3?token=...", "text": "..."}
//! {"type": "error", "room_id": "lobby", "message": "..."}
//! ```

use serde::Deserialize;
use serde_json::json;

use aibro_core::{ChatMessage, Turn};

/// A parsed client event.
#[derive(Debug, Clone)]
pub enum Inbound {
    Join {
        room_id: String,
        nickname: String,
    },
    LoadHistory {
        room_id: String,
    },
    Message {
        room_id: String,
        content: String,
        message_id: Option<String>,
        temperature: Option<f64>,
        context: Option<Vec<Turn>>,
    },
    GenerateTts {
        room_id: String,
        text: String,
        message_id: Option<String>,
    },
}

#[derive(Debug, Deserialize)]
struct JoinPayload {
    room_id: String,
    #[serde(default)]
    nickname: Option<String>,
}

#[derive(Debug, Deserialize)]
struct LoadHistoryPayload {
    room_id: String,
}

#[derive(Debug, Deserialize)]
struct MessagePayload {
    room_id: String,
    content: String,
    #[serde(default)]
    message_id: Option<String>,
    #[serde(default)]
    temperature: Option<f64>,
    #[serde(default)]
    context: Option<Vec<Turn>>,
}

#[derive(Debug, Deserialize)]
struct TtsPayload {
    room_id: String,
    text: String,
    #[serde(default)]
    message_id: Option<String>,
}

/// Parse one client frame. The error string is the user-facing `error`
/// event message; a parse failure never mutates broker state.
pub fn parse_inbound(raw: &str) -> Result<Inbound, String> {
    let value: serde_json::Value =
        serde_json::from_str(raw).map_err(|_| "invalid JSON payload".to_string())?;
    let Some(event_type) = value.get("type").and_then(|t| t.as_str()) else {
        return Err("missing event type".to_string());
    };

    match event_type {
        "join" => {
            let payload: JoinPayload = serde_json::from_value(value)
                .map_err(|_| "join requires a room_id".to_string())?;
            Ok(Inbound::Join {
                room_id: payload.room_id,
                nickname: payload.nickname.unwrap_or_else(|| "anonymous".to_string()),
            })
        }
        "load_history" => {
            let payload: LoadHistoryPayload = serde_json::from_value(value)
                .map_err(|_| "load_history requires a room_id".to_string())?;
            Ok(Inbound::LoadHistory {
                room_id: payload.room_id,
            })
        }
        "message" => {
            let payload: MessagePayload = serde_json::from_value(value)
                .map_err(|_| "message requires a room_id and content".to_string())?;
            Ok(Inbound::Message {
                room_id: payload.room_id,
                content: payload.content,
                message_id: payload.message_id,
                temperature: payload.temperature,
                context: payload.context,
            })
        }
        "generate_tts" => {
            let payload: TtsPayload = serde_json::from_value(value)
                .map_err(|_| "generate_tts requires a room_id and text".to_string())?;
            Ok(Inbound::GenerateTts {
                room_id: payload.room_id,
                text: payload.text,
                message_id: payload.message_id,
            })
        }
        other => Err(format!("unknown event type: {other}")),
    }
}

/// A room member as presented in `user_list`.
#[derive(Debug, Clone)]
pub struct Member {
    pub id: String,
    pub nickname: String,
}

/// A connection-scoped error with no meaningful room attached.
pub fn error_event(message: &str) -> String {
    json!({"type": "error", "room_id": "unknown", "message": message}).to_string()
}

/// A room-visible error, carrying the room it concerns.
pub fn room_error_event(room_id: &str, message: &str) -> String {
    json!({"type": "error", "room_id": room_id, "message": message}).to_string()
}

pub fn join_status(
    room_id: &str,
    user_id: &str,
    nickname: &str,
    reconnect: bool,
    context: &[Turn],
) -> String {
    json!({
        "type": "join_status",
        "room_id": room_id,
        "user_id": user_id,
        "nickname": nickname,
        "reconnect": reconnect,
        "context": context,
    })
    .to_string()
}

pub fn user_joined(user_id: &str, nickname: &str) -> String {
    json!({"type": "user_joined", "user_id": user_id, "nickname": nickname}).to_string()
}

pub fn user_left(user_id: &str, nickname: &str) -> String {
    json!({"type": "user_left", "user_id": user_id, "nickname": nickname}).to_string()
}

pub fn user_list(members: &[Member]) -> String {
    let users: Vec<_> = members
        .iter()
        .map(|m| json!({"id": m.id, "nickname": m.nickname}))
        .collect();
    json!({"type": "user_list", "users": users, "count": members.len()}).to_string()
}

/// The reply to a `load_history` request, messages in append order.
pub fn history(room_id: &str, messages: &[ChatMessage]) -> String {
    json!({"type": "load_history", "room_id": room_id, "messages": messages}).to_string()
}

pub fn tts_ready(audio_url: &str, text: &str, message_id: Option<&str>) -> String {
    match message_id {
        Some(id) => json!({
            "type": "tts_ready",
            "audio_url": audio_url,
            "text": text,
            "message_id": id,
        })
        .to_string(),
        None => json!({"type": "tts_ready", "audio_url": audio_url, "text": text}).to_string(),
    }
}

/// A ChatMessage framed as a `message` event.
pub fn chat(message: &ChatMessage) -> String {
    let mut value = serde_json::to_value(message).unwrap_or_else(|_| json!({}));
    if let Some(obj) = value.as_object_mut() {
        obj.insert("type".to_string(), json!("message"));
    }
    value.to_string()
}
