// SPDX-FileCopyrightText: 2026 Aibro Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Per-room message history as append-only NDJSON logs.

use std::path::PathBuf;

use tokio::io::AsyncWriteExt;

use aibro_core::{AibroError, ChatMessage};

/// One `{room_id}.log` file per room, one ChatMessage JSON object per line.
pub struct HistoryLog {
    dir: PathBuf,
}

impl HistoryLog {
    pub fn new(dir: impl Into<PathBuf>) -> Result<Self, AibroError> {
        let dir = dir.into();
        std::fs::create_dir_all(&dir).map_err(|e| AibroError::Store {
            message: format!("failed to create history dir {}: {e}", dir.display()),
            source: Some(Box::new(e)),
        })?;
        Ok(Self { dir })
    }

    fn path(&self, room_id: &str) -> PathBuf {
        // Room ids are sanitized before they reach this layer.
        self.dir.join(format!("{room_id}.log"))
    }

    /// Append one message to the room's log.
    pub async fn append(&self, message: &ChatMessage) -> Result<(), AibroError> {
        let mut line = serde_json::to_string(message).map_err(|e| AibroError::Store {
            message: "failed to encode history line".to_string(),
            source: Some(Box::new(e)),
        })?;
        line.push('\n');
        let mut file = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(self.path(&message.room_id))
            .await
            .map_err(|e| AibroError::Store {
                message: format!("failed to open history log for {}", message.room_id),
                source: Some(Box::new(e)),
            })?;
        file.write_all(line.as_bytes())
            .await
            .map_err(|e| AibroError::Store {
                message: format!("failed to append history for {}", message.room_id),
                source: Some(Box::new(e)),
            })?;
        Ok(())
    }

    /// Replay a room's log in append order. A missing log is an empty
    /// history; unparseable lines are skipped with a warning.
    pub async fn load(&self, room_id: &str) -> Vec<ChatMessage> {
        let raw = match tokio::fs::read_to_string(self.path(room_id)).await {
            Ok(raw) => raw,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Vec::new(),
            Err(err) => {
                tracing::warn!(room_id, error = %err, "failed to read history log");
                return Vec::new();
            }
        };
        raw.lines()
            .filter(|line| !line.trim().is_empty())
            .filter_map(|line| match serde_json::from_str(line) {
                Ok(message) => Some(message),
                Err(err) => {
                    tracing::warn!(room_id, error = %err, "skipping unparseable history line");
                    None
                }
            })
            .collect()
    }
}
