// SPDX-FileCopyrightText: 2026 Aibro Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Domain types shared across the Aibro workspace.

use serde::{Deserialize, Serialize};

/// Role of one utterance in a room's AI conversation context.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    /// Fixed persona/instruction turns. Never evicted by trimming.
    System,
    User,
    Assistant,
}

impl std::fmt::Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Role::System => write!(f, "system"),
            Role::User => write!(f, "user"),
            Role::Assistant => write!(f, "assistant"),
        }
    }
}

/// One role-tagged utterance in a room's conversation context.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Turn {
    pub role: Role,
    pub content: String,
}

impl Turn {
    pub fn new(role: Role, content: impl Into<String>) -> Self {
        Self {
            role,
            content: content.into(),
        }
    }

    pub fn system(content: impl Into<String>) -> Self {
        Self::new(Role::System, content)
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self::new(Role::User, content)
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self::new(Role::Assistant, content)
    }
}

/// Backend timing breakdown attached to assistant messages, in milliseconds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Timings {
    /// Time spent in the live-search lookup (0 when no search ran).
    pub t2_search: u64,
    /// Time spent in the winning provider call.
    pub t3_ai: u64,
    /// Total backend time from trigger to assembled reply.
    pub t4_backend: u64,
}

/// One unit of conversation, broadcast to a room and appended to its log.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub room_id: String,
    pub sender_id: String,
    pub nickname: String,
    pub content: String,
    pub is_ai: bool,
    pub message_id: String,
    /// Unix seconds.
    pub timestamp: i64,
    /// Backend time in seconds, assistant messages only.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub response_time: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub timings_ms: Option<Timings>,
}

/// A successful reply from the provider fallback chain.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GeneratedReply {
    /// Raw reply text, before sanitation.
    pub content: String,
    /// Name of the provider that produced the reply.
    pub provider: String,
}
