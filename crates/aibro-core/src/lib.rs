// SPDX-FileCopyrightText: 2026 Aibro Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Core library for the Aibro chat broker.
//!
//! This crate provides the error type, the shared domain types
//! (messages, conversation turns), and the capability traits the broker
//! components are wired together with.

pub mod error;
pub mod traits;
pub mod types;

// Re-export key items at crate root for ergonomic imports.
pub use error::AibroError;
pub use traits::{KvStore, LiveSearch, SpeechSynth, TextGenerator};
pub use types::{ChatMessage, GeneratedReply, Role, Timings, Turn};
