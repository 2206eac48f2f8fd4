// SPDX-FileCopyrightText: 2026 Aibro Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Per-room conversation context with token-budget trimming.
//!
//! Each room keeps an in-memory turn list, mirrored to the key-value
//! store under `aibro:context:{room_id}` with a refreshing 24 h TTL.
//! Before every persist the list is optimized: adjacent same-role turns
//! coalesce, empty turns drop, and the oldest non-system turns are
//! evicted until the token estimate fits the budget. System turns are
//! never evicted. Store-level degradation (network store down) is handled
//! one layer below by the fallback store; a failure that reaches this
//! crate degrades to an empty context rather than failing the request.

use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use tokio::sync::Mutex;

use aibro_core::{AibroError, KvStore, Role, Turn};

/// Token budget for one room's persisted context.
pub const TOKEN_BUDGET: usize = 12000;

/// Persisted context TTL, refreshed on every load and save.
pub const CONTEXT_TTL: Duration = Duration::from_secs(24 * 60 * 60);

/// Trimming never reduces a room below this many non-system turns.
const MIN_CHAT_TURNS: usize = 2;

/// Fixed token overhead charged per turn.
const PER_TURN_OVERHEAD: usize = 3;

/// Conversation context store for all rooms.
pub struct ContextStore {
    store: Arc<dyn KvStore>,
    budget: usize,
    live: DashMap<String, Arc<Mutex<Vec<Turn>>>>,
}

impl ContextStore {
    pub fn new(store: Arc<dyn KvStore>) -> Self {
        Self {
            store,
            budget: TOKEN_BUDGET,
            live: DashMap::new(),
        }
    }

    /// Override the token budget.
    pub fn with_budget(mut self, budget: usize) -> Self {
        self.budget = budget;
        self
    }

    fn key(room_id: &str) -> String {
        format!("aibro:context:{room_id}")
    }

    fn room(&self, room_id: &str) -> Arc<Mutex<Vec<Turn>>> {
        self.live
            .entry(room_id.to_string())
            .or_default()
            .clone()
    }

    /// Fetch the room's persisted turns into memory, if not already live.
    /// A store failure or unparseable record degrades to an empty context.
    pub async fn load(&self, room_id: &str) -> Vec<Turn> {
        let room = self.room(room_id);
        let mut turns = room.lock().await;
        if !turns.is_empty() {
            return turns.clone();
        }

        let key = Self::key(room_id);
        match self.store.get(&key).await {
            Ok(Some(raw)) => match serde_json::from_str::<Vec<Turn>>(&raw) {
                Ok(loaded) => {
                    if let Err(err) = self.store.expire(&key, CONTEXT_TTL).await {
                        tracing::warn!(room_id, error = %err, "failed to refresh context ttl");
                    }
                    *turns = loaded;
                }
                Err(err) => {
                    tracing::warn!(room_id, error = %err, "persisted context unparseable, starting empty");
                }
            },
            Ok(None) => {}
            Err(err) => {
                tracing::warn!(room_id, error = %err, "context load failed, starting empty");
            }
        }
        turns.clone()
    }

    /// Current in-memory turns for a room.
    pub async fn snapshot(&self, room_id: &str) -> Vec<Turn> {
        self.room(room_id).lock().await.clone()
    }

    /// Record one completed AI exchange, then optimize and persist.
    pub async fn append_exchange(
        &self,
        room_id: &str,
        user_text: &str,
        assistant_text: &str,
    ) -> Result<(), AibroError> {
        let room = self.room(room_id);
        let mut turns = room.lock().await;
        turns.push(Turn::user(user_text));
        turns.push(Turn::assistant(assistant_text));
        let optimized = optimize(&turns, self.budget);
        self.persist(room_id, &optimized).await?;
        *turns = optimized;
        Ok(())
    }

    /// Optimize, persist, and adopt an explicit turn list for a room.
    pub async fn save(&self, room_id: &str, turns: Vec<Turn>) -> Result<Vec<Turn>, AibroError> {
        let room = self.room(room_id);
        let mut live = room.lock().await;
        let optimized = optimize(&turns, self.budget);
        self.persist(room_id, &optimized).await?;
        *live = optimized.clone();
        Ok(optimized)
    }

    /// Drop a room's context from memory and from the store.
    pub async fn clear(&self, room_id: &str) -> Result<(), AibroError> {
        self.live.remove(room_id);
        self.store.delete(&Self::key(room_id)).await
    }

    async fn persist(&self, room_id: &str, turns: &[Turn]) -> Result<(), AibroError> {
        let raw = serde_json::to_string(turns).map_err(|e| AibroError::Store {
            message: format!("failed to encode context for {room_id}"),
            source: Some(Box::new(e)),
        })?;
        self.store
            .set(&Self::key(room_id), &raw, Some(CONTEXT_TTL))
            .await
    }
}

/// Coalesce adjacent same-role turns, drop empty turns, then evict oldest
/// non-system turns until the estimate fits `budget` or only
/// [`MIN_CHAT_TURNS`] non-system turns remain. System turns always survive
/// and float to the front in their original order.
pub fn optimize(turns: &[Turn], budget: usize) -> Vec<Turn> {
    let mut system: Vec<Turn> = Vec::new();
    let mut chat: Vec<Turn> = Vec::new();

    for turn in turns {
        if turn.role == Role::System {
            system.push(turn.clone());
            continue;
        }
        let content = turn.content.trim();
        if content.is_empty() {
            continue;
        }
        match chat.last_mut() {
            Some(last) if last.role == turn.role => {
                last.content.push_str("\n\n");
                last.content.push_str(content);
            }
            _ => chat.push(Turn::new(turn.role, content)),
        }
    }

    while chat.len() > MIN_CHAT_TURNS {
        let combined_estimate =
            estimate_tokens(&system) + estimate_tokens(&chat);
        if combined_estimate <= budget {
            break;
        }
        chat.remove(0);
    }

    system.extend(chat);
    system
}

/// Rough token estimate: CJK ideographs count one token each, remaining
/// bytes four to a token, plus a fixed per-turn overhead.
pub fn estimate_tokens(turns: &[Turn]) -> usize {
    let mut tokens = turns.len() * PER_TURN_OVERHEAD;
    for turn in turns {
        let mut cjk = 0usize;
        for c in turn.content.chars() {
            if ('\u{4e00}'..='\u{9fff}').contains(&c) {
                cjk += 1;
            }
        }
        let other_bytes = turn.content.len().saturating_sub(cjk * 3);
        tokens += cjk + other_bytes / 4;
    }
    tokens
}
