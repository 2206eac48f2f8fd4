// SPDX-FileCopyrightText: 2026 Aibro Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Scrubs tool-use leakage out of assistant replies before broadcast.

use std::sync::OnceLock;

use regex::Regex;

/// Shown when sanitation leaves nothing.
const EMPTY_REPLY_PLACEHOLDER: &str = "(the assistant had nothing to say)";

fn special_tokens() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"<\|[^>]*\|>").unwrap_or_else(|_| unreachable!()))
}

fn query_blobs() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r#"\{[^{}]*"query"[^{}]*\}"#).unwrap_or_else(|_| unreachable!()))
}

fn tool_narration() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"(?m)^\s*(Attempt to|Search|Call tool|Using tool)\b[^\n]*\n?")
            .unwrap_or_else(|_| unreachable!())
    })
}

fn blank_runs() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"\n{3,}").unwrap_or_else(|_| unreachable!()))
}

/// Strip model special tokens, leaked tool-call JSON, tool-use narration
/// lines, and control characters; collapse blank-line runs. An empty
/// result becomes a fixed placeholder.
pub fn sanitize_reply(raw: &str) -> String {
    let text = special_tokens().replace_all(raw, "");
    let text = query_blobs().replace_all(&text, "");
    let text = tool_narration().replace_all(&text, "");
    let text: String = text
        .chars()
        .filter(|c| !c.is_control() || *c == '\n' || *c == '\t')
        .collect();
    let text = blank_runs().replace_all(&text, "\n\n");
    let text = text.trim();
    if text.is_empty() {
        EMPTY_REPLY_PLACEHOLDER.to_string()
    } else {
        text.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn strips_special_tokens() {
        assert_eq!(sanitize_reply("<|start|>hello<|end|>"), "hello");
    }

    #[test]
    fn strips_leaked_query_json() {
        let raw = r#"Sure. {"query": "weather taipei"} The forecast is sunny."#;
        let clean = sanitize_reply(raw);
        assert!(!clean.contains("query"));
        assert!(clean.contains("The forecast is sunny."));
    }

    #[test]
    fn drops_tool_narration_lines() {
        let raw = "Call tool search(weather)\nUsing tool: web\nIt will rain tomorrow.";
        assert_eq!(sanitize_reply(raw), "It will rain tomorrow.");
    }

    #[test]
    fn keeps_ordinary_lines_starting_mid_sentence() {
        let raw = "Searching for meaning is human.\nSo is asking questions.";
        // "Searching" is not the bare "Search" narration prefix.
        assert_eq!(sanitize_reply(raw), raw);
    }

    #[test]
    fn removes_control_chars_but_keeps_newlines_and_tabs() {
        let raw = "line one\u{0007}\n\tline two\u{001b}";
        assert_eq!(sanitize_reply(raw), "line one\n\tline two");
    }

    #[test]
    fn collapses_blank_line_runs() {
        assert_eq!(sanitize_reply("a\n\n\n\nb"), "a\n\nb");
    }

    #[test]
    fn empty_result_becomes_placeholder() {
        assert_eq!(sanitize_reply("<|only|>"), EMPTY_REPLY_PLACEHOLDER);
        assert_eq!(sanitize_reply("   \n  "), EMPTY_REPLY_PLACEHOLDER);
    }
}
