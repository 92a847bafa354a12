// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
//! Buffers a tool call's JSON arguments as they stream in, so the session
//! emits exactly one [`crate::SessionEvent::ToolCall`] per call — never
//! before its final chunk (or the turn's `finish`), and never out of the
//! provider's order.

use std::collections::HashMap;

struct BufferedCall {
    name: String,
    args_text: String,
}

/// Insertion-ordered buffer of in-progress tool calls, keyed by the
/// provider's `tool_call_id`.
#[derive(Default)]
pub struct ToolCallBuffer {
    entries: HashMap<String, BufferedCall>,
    order: Vec<String>,
}

impl ToolCallBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn start(&mut self, tool_call_id: String, name: String) {
        if !self.entries.contains_key(&tool_call_id) {
            self.order.push(tool_call_id.clone());
        }
        self.entries.insert(tool_call_id, BufferedCall { name, args_text: String::new() });
    }

    pub fn append_delta(&mut self, tool_call_id: &str, delta: &str) {
        if let Some(entry) = self.entries.get_mut(tool_call_id) {
            entry.args_text.push_str(delta);
        }
    }

    /// Resolve a `tool-call` final chunk: remove the buffered entry (if
    /// any), using its accumulated `argsText` when the final chunk itself
    /// carries no arguments.
    pub fn finalize(&mut self, tool_call_id: &str, name: String, arguments: String) -> (String, String) {
        if let Some(entry) = self.entries.remove(tool_call_id) {
            self.order.retain(|id| id != tool_call_id);
            let resolved_name = if name.is_empty() { entry.name } else { name };
            let resolved_args = if arguments.is_empty() { entry.args_text } else { arguments };
            (resolved_name, resolved_args)
        } else {
            (name, arguments)
        }
    }

    /// Drain every still-open entry (the provider never sent a final
    /// `tool-call` chunk for it before `finish`), preserving insertion order.
    pub fn flush_remaining(&mut self) -> Vec<(String, String, String)> {
        let order = std::mem::take(&mut self.order);
        let mut out = Vec::with_capacity(order.len());
        for id in order {
            if let Some(entry) = self.entries.remove(&id) {
                out.push((id, entry.name, entry.args_text));
            }
        }
        out
    }

    pub fn clear(&mut self) {
        self.entries.clear();
        self.order.clear();
    }
}

/// Parse a tool call's accumulated argument text as JSON, tolerating an
/// empty string as `{}` and logging+substituting `{}` on any parse failure.
pub fn parse_tool_args(raw: &str) -> serde_json::Value {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return serde_json::json!({});
    }
    match serde_json::from_str(trimmed) {
        Ok(value) => value,
        Err(e) => {
            tracing::warn!(error = %e, raw = %raw, "tool-call arguments failed to parse, substituting {{}}");
            serde_json::json!({})
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn start_then_deltas_then_finalize_with_empty_final_args_uses_buffer() {
        let mut buf = ToolCallBuffer::new();
        buf.start("t1".into(), "run".into());
        buf.append_delta("t1", "{\"cmd\":\"");
        buf.append_delta("t1", "ls\"}");

        let (name, args) = buf.finalize("t1", "run".into(), String::new());
        assert_eq!(name, "run");
        assert_eq!(args, "{\"cmd\":\"ls\"}");
    }

    #[test]
    fn finalize_prefers_final_chunk_args_when_present() {
        let mut buf = ToolCallBuffer::new();
        buf.start("t1".into(), "run".into());
        buf.append_delta("t1", "{\"partial");
        let (_, args) = buf.finalize("t1", "run".into(), "{\"cmd\":\"ls\"}".into());
        assert_eq!(args, "{\"cmd\":\"ls\"}");
    }

    #[test]
    fn finalize_without_prior_start_passes_through_final_chunk() {
        let mut buf = ToolCallBuffer::new();
        let (name, args) = buf.finalize("unseen", "run".into(), "{}".into());
        assert_eq!(name, "run");
        assert_eq!(args, "{}");
    }

    #[test]
    fn flush_remaining_preserves_insertion_order() {
        let mut buf = ToolCallBuffer::new();
        buf.start("a".into(), "first".into());
        buf.start("b".into(), "second".into());
        buf.append_delta("a", "{}");

        let flushed = buf.flush_remaining();
        let ids: Vec<&str> = flushed.iter().map(|(id, _, _)| id.as_str()).collect();
        assert_eq!(ids, vec!["a", "b"]);
        assert!(buf.flush_remaining().is_empty());
    }

    #[test]
    fn parse_tool_args_empty_string_is_empty_object() {
        assert_eq!(parse_tool_args(""), serde_json::json!({}));
        assert_eq!(parse_tool_args("   "), serde_json::json!({}));
    }

    #[test]
    fn parse_tool_args_invalid_json_falls_back_to_empty_object() {
        assert_eq!(parse_tool_args("{not json"), serde_json::json!({}));
    }

    #[test]
    fn parse_tool_args_valid_json_round_trips() {
        assert_eq!(parse_tool_args("{\"a\":1}"), serde_json::json!({"a": 1}));
    }
}
