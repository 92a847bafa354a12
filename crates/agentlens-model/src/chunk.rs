// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
//! The chunk shapes a [`GatewayClient`](crate::provider::GatewayClient) stream
//! emits, and the exhaustive match a [`ChatSession`](../agentlens_session)
//! drives off of it.
//!
//! The upstream gateway's wire protocol carries many chunk kinds that this
//! core has no use for (lifecycle markers, raw tool-input deltas it never
//! renders, provider-defined `data-*` extensions). Rather than silently
//! dropping unknown variants through a single wildcard arm, the match stays
//! exhaustive over the kinds that matter and funnels everything else through
//! two explicit catch-alls: `data-*` extensions fold into the same silent
//! `Ignored` variant as the known lifecycle markers, while a genuinely
//! unrecognised kind becomes `Unknown` so the caller can log it instead of
//! letting it vanish.

use crate::types::Usage;

/// A single streamed chunk of a chat response.
#[derive(Debug, Clone, PartialEq)]
pub enum GatewayChunk {
    /// Incremental assistant text.
    TextDelta(String),
    /// Incremental reasoning/thinking text, when the model exposes it.
    ReasoningDelta(String),
    /// An inline file (e.g. a generated image) with its MIME type.
    File { mime_type: String, data: String },
    /// A tool call begins streaming; `tool_call_id` ties subsequent deltas
    /// and the final call together.
    ToolCallStart { tool_call_id: String, name: String },
    /// Incremental JSON-argument text for an in-progress tool call.
    ToolCallDelta { tool_call_id: String, arguments_delta: String },
    /// A tool call's arguments are complete.
    ToolCallFinal { tool_call_id: String, name: String, arguments: String },
    /// The upstream reported an error mid-stream.
    Error { message: String },
    /// The turn finished normally, with final usage and any edits the
    /// assistant applied directly (outside of tool calls).
    Finish { usage: Usage, applied_edits: Vec<String> },
    /// The turn was aborted (cancelled by the host or the user).
    Abort,
    /// A chunk kind this core deliberately ignores: stream bookkeeping
    /// (`start`, `finish-step`), `source` citations, standalone
    /// `tool-result` echoes, the `text-start`/`text-end`/
    /// `reasoning-start`/`reasoning-end`/`tool-input-*` delimiters that
    /// duplicate information already carried by the delta/final variants
    /// above, and any provider-defined `data-*` extension chunk.
    Ignored,
    /// A kind this core does not recognise and that isn't a `data-*`
    /// extension. Unlike `Ignored`, callers are expected to log these at
    /// `warn` so an actually-meaningful new chunk kind doesn't go unnoticed.
    Unknown { kind: String },
}

impl GatewayChunk {
    /// Parse a wire-level `kind` string plus its raw JSON payload into a
    /// [`GatewayChunk`].
    ///
    /// `kind` is matched exhaustively against the known set; a `data-`
    /// prefixed kind becomes `Ignored` (silently dropped per spec.md §4.7),
    /// and anything else unrecognised becomes `Unknown` (logged by the
    /// caller — see `agentlens-session`'s chunk translation).
    pub fn from_wire(kind: &str, payload: &serde_json::Value) -> Self {
        match kind {
            "text-delta" => GatewayChunk::TextDelta(
                payload.get("delta").and_then(|v| v.as_str()).unwrap_or_default().to_string(),
            ),
            "reasoning-delta" => GatewayChunk::ReasoningDelta(
                payload.get("delta").and_then(|v| v.as_str()).unwrap_or_default().to_string(),
            ),
            "file" => GatewayChunk::File {
                mime_type: payload
                    .get("mimeType")
                    .and_then(|v| v.as_str())
                    .unwrap_or("application/octet-stream")
                    .to_string(),
                data: payload.get("data").and_then(|v| v.as_str()).unwrap_or_default().to_string(),
            },
            "tool-input-start" | "tool-call-start" => GatewayChunk::ToolCallStart {
                tool_call_id: field_str(payload, "toolCallId"),
                name: field_str(payload, "toolName"),
            },
            "tool-input-delta" | "tool-call-delta" => GatewayChunk::ToolCallDelta {
                tool_call_id: field_str(payload, "toolCallId"),
                arguments_delta: field_str(payload, "argsTextDelta"),
            },
            "tool-call" | "tool-input-available" => GatewayChunk::ToolCallFinal {
                tool_call_id: field_str(payload, "toolCallId"),
                name: field_str(payload, "toolName"),
                arguments: field_str(payload, "args"),
            },
            "error" => GatewayChunk::Error { message: field_str(payload, "errorText") },
            "finish" => GatewayChunk::Finish {
                usage: Usage {
                    input_tokens: payload
                        .get("usage")
                        .and_then(|u| u.get("inputTokens"))
                        .and_then(|v| v.as_u64())
                        .unwrap_or(0),
                    output_tokens: payload
                        .get("usage")
                        .and_then(|u| u.get("outputTokens"))
                        .and_then(|v| v.as_u64())
                        .unwrap_or(0),
                },
                applied_edits: payload
                    .get("appliedEdits")
                    .and_then(|v| v.as_array())
                    .map(|a| a.iter().filter_map(|v| v.as_str().map(str::to_string)).collect())
                    .unwrap_or_default(),
            },
            "abort" => GatewayChunk::Abort,
            "start" | "finish-step" | "source" | "tool-result" | "text-start" | "text-end"
            | "reasoning-start" | "reasoning-end" => GatewayChunk::Ignored,
            other if other.starts_with("data-") => GatewayChunk::Ignored,
            other => GatewayChunk::Unknown { kind: other.to_string() },
        }
    }

    /// `true` for the two catch-all variants, `Ignored` and `Unknown`.
    pub fn is_catch_all(&self) -> bool {
        matches!(self, GatewayChunk::Ignored | GatewayChunk::Unknown { .. })
    }
}

fn field_str(payload: &serde_json::Value, key: &str) -> String {
    payload.get(key).and_then(|v| v.as_str()).unwrap_or_default().to_string()
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn text_delta_extracts_delta_field() {
        let chunk = GatewayChunk::from_wire("text-delta", &json!({ "delta": "hi" }));
        assert_eq!(chunk, GatewayChunk::TextDelta("hi".into()));
    }

    #[test]
    fn tool_call_start_extracts_id_and_name() {
        let chunk = GatewayChunk::from_wire(
            "tool-call-start",
            &json!({ "toolCallId": "c1", "toolName": "read_file" }),
        );
        assert_eq!(
            chunk,
            GatewayChunk::ToolCallStart { tool_call_id: "c1".into(), name: "read_file".into() }
        );
    }

    #[test]
    fn finish_extracts_usage_and_applied_edits() {
        let chunk = GatewayChunk::from_wire(
            "finish",
            &json!({
                "usage": { "inputTokens": 10, "outputTokens": 20 },
                "appliedEdits": ["a.rs", "b.rs"],
            }),
        );
        match chunk {
            GatewayChunk::Finish { usage, applied_edits } => {
                assert_eq!(usage.input_tokens, 10);
                assert_eq!(usage.output_tokens, 20);
                assert_eq!(applied_edits, vec!["a.rs".to_string(), "b.rs".to_string()]);
            }
            other => panic!("expected Finish, got {other:?}"),
        }
    }

    #[test]
    fn lifecycle_markers_are_ignored_not_unknown() {
        for kind in ["start", "finish-step", "source", "tool-result", "text-start", "text-end"] {
            let chunk = GatewayChunk::from_wire(kind, &json!({}));
            assert_eq!(chunk, GatewayChunk::Ignored, "kind {kind} should be Ignored");
        }
    }

    /// `data-*` extensions are silently dropped, not logged — they fold
    /// into `Ignored`, not `Unknown` (spec.md §4.7: "Unknown type starting
    /// with `data-`: Ignore silently").
    #[test]
    fn data_prefixed_kind_is_ignored_silently() {
        let chunk = GatewayChunk::from_wire("data-custom-progress", &json!({}));
        assert_eq!(chunk, GatewayChunk::Ignored);
    }

    #[test]
    fn genuinely_unrecognised_kind_becomes_unknown() {
        let chunk = GatewayChunk::from_wire("some-future-kind", &json!({}));
        assert_eq!(chunk, GatewayChunk::Unknown { kind: "some-future-kind".into() });
    }

    #[test]
    fn abort_has_no_payload_fields() {
        assert_eq!(GatewayChunk::from_wire("abort", &json!({})), GatewayChunk::Abort);
    }

    #[test]
    fn is_catch_all_true_only_for_ignored_and_unknown() {
        assert!(GatewayChunk::Ignored.is_catch_all());
        assert!(GatewayChunk::Unknown { kind: "x".into() }.is_catch_all());
        assert!(!GatewayChunk::Abort.is_catch_all());
        assert!(!GatewayChunk::TextDelta("x".into()).is_catch_all());
    }
}
