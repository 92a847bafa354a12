// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
//! Maps one [`GatewayChunk`] to zero or more [`SessionEvent`]s, per
//! spec.md §4.7's table. `GatewayChunk` is already an exhaustive match over
//! the wire's chunk kinds (see `agentlens_model::chunk`); this module adds
//! the second layer of exhaustiveness over what each *kind* does once
//! translated, so a reviewer can check this file against the table
//! directly.

use agentlens_model::GatewayChunk;
use regex::Regex;

use crate::events::{DataPayload, SessionEvent};
use crate::tool_buffer::{parse_tool_args, ToolCallBuffer};

fn mime_re() -> Regex {
    Regex::new(r"^[a-z]+/[a-z0-9.+-]+$").expect("fixed valid pattern")
}

fn classify_file(mime_type: &str, data: &str) -> Option<DataPayload> {
    if !mime_re().is_match(mime_type) {
        tracing::warn!(mime_type, "rejecting file chunk with malformed MIME type");
        return None;
    }
    if mime_type.starts_with("image/") {
        return Some(DataPayload::Image(data.to_string()));
    }
    if mime_type == "application/json" || mime_type.ends_with("+json") {
        return Some(match base64_decode_utf8(data) {
            Some(text) => match serde_json::from_str(&text) {
                Ok(value) => DataPayload::Json(value),
                Err(e) => {
                    tracing::warn!(error = %e, "file chunk declared json but failed to parse");
                    DataPayload::Raw(data.to_string())
                }
            },
            None => DataPayload::Raw(data.to_string()),
        });
    }
    if mime_type.starts_with("text/") || mime_type == "application/xml" || mime_type.ends_with("+xml") {
        return Some(match base64_decode_utf8(data) {
            Some(text) => DataPayload::Text(text),
            None => DataPayload::Raw(data.to_string()),
        });
    }
    Some(DataPayload::Raw(data.to_string()))
}

fn base64_decode_utf8(data: &str) -> Option<String> {
    use base64::Engine;
    let bytes = base64::engine::general_purpose::STANDARD.decode(data).ok()?;
    String::from_utf8(bytes).ok()
}

/// Translate one chunk that is neither `finish` nor `abort` (those carry
/// session-level bookkeeping handled directly by [`crate::ChatSession::run`]).
pub fn translate(chunk: GatewayChunk, buffer: &mut ToolCallBuffer, supports_thinking: bool) -> Vec<SessionEvent> {
    match chunk {
        GatewayChunk::TextDelta(text) => vec![SessionEvent::Text(text)],
        GatewayChunk::ReasoningDelta(text) => {
            if supports_thinking {
                vec![SessionEvent::Thinking(text)]
            } else {
                vec![]
            }
        }
        GatewayChunk::File { mime_type, data } => classify_file(&mime_type, &data)
            .map(|payload| vec![SessionEvent::Data { mime_type, payload }])
            .unwrap_or_default(),
        GatewayChunk::ToolCallStart { tool_call_id, name } => {
            buffer.start(tool_call_id, name);
            vec![]
        }
        GatewayChunk::ToolCallDelta { tool_call_id, arguments_delta } => {
            buffer.append_delta(&tool_call_id, &arguments_delta);
            vec![]
        }
        GatewayChunk::ToolCallFinal { tool_call_id, name, arguments } => {
            let (resolved_name, raw_args) = buffer.finalize(&tool_call_id, name, arguments);
            vec![SessionEvent::ToolCall { id: tool_call_id, name: resolved_name, args: parse_tool_args(&raw_args) }]
        }
        GatewayChunk::Error { message } => {
            vec![SessionEvent::Error(format!("\n\n**Error:** {message}\n\n"))]
        }
        // Bookkeeping-only chunks; nothing to surface to the host.
        GatewayChunk::Finish { .. } | GatewayChunk::Abort | GatewayChunk::Ignored => vec![],
        GatewayChunk::Unknown { kind } => {
            tracing::warn!(kind, "unrecognised gateway chunk kind");
            vec![]
        }
    }
}

/// Flush any tool calls still buffered when the stream finishes, per the
/// `finish` row's "(a) flush remaining buffer entries" rule.
pub fn flush_finish_buffer(buffer: &mut ToolCallBuffer) -> Vec<SessionEvent> {
    buffer
        .flush_remaining()
        .into_iter()
        .map(|(id, name, args_text)| SessionEvent::ToolCall { id, name, args: parse_tool_args(&args_text) })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn text_delta_translates_to_text_event() {
        let mut buf = ToolCallBuffer::new();
        let events = translate(GatewayChunk::TextDelta("hi".into()), &mut buf, true);
        assert_eq!(events, vec![SessionEvent::Text("hi".into())]);
    }

    #[test]
    fn reasoning_delta_dropped_when_host_lacks_thinking_support() {
        let mut buf = ToolCallBuffer::new();
        let events = translate(GatewayChunk::ReasoningDelta("hmm".into()), &mut buf, false);
        assert!(events.is_empty());
    }

    #[test]
    fn reasoning_delta_emitted_when_supported() {
        let mut buf = ToolCallBuffer::new();
        let events = translate(GatewayChunk::ReasoningDelta("hmm".into()), &mut buf, true);
        assert_eq!(events, vec![SessionEvent::Thinking("hmm".into())]);
    }

    #[test]
    fn error_chunk_formats_markdown_error_text() {
        let mut buf = ToolCallBuffer::new();
        let events = translate(GatewayChunk::Error { message: "boom".into() }, &mut buf, true);
        assert_eq!(events, vec![SessionEvent::Error("\n\n**Error:** boom\n\n".into())]);
    }

    #[test]
    fn image_file_chunk_passes_bytes_through_unparsed() {
        let mut buf = ToolCallBuffer::new();
        let events = translate(
            GatewayChunk::File { mime_type: "image/png".into(), data: "Zm9v".into() },
            &mut buf,
            true,
        );
        assert_eq!(events, vec![SessionEvent::Data { mime_type: "image/png".into(), payload: DataPayload::Image("Zm9v".into()) }]);
    }

    #[test]
    fn json_file_chunk_is_decoded_and_parsed() {
        use base64::Engine;
        let encoded = base64::engine::general_purpose::STANDARD.encode(b"{\"a\":1}");
        let mut buf = ToolCallBuffer::new();
        let events = translate(GatewayChunk::File { mime_type: "application/json".into(), data: encoded }, &mut buf, true);
        assert_eq!(
            events,
            vec![SessionEvent::Data { mime_type: "application/json".into(), payload: DataPayload::Json(serde_json::json!({"a": 1})) }]
        );
    }

    #[test]
    fn plus_json_suffix_is_treated_as_json() {
        use base64::Engine;
        let encoded = base64::engine::general_purpose::STANDARD.encode(b"{\"ok\":true}");
        let mut buf = ToolCallBuffer::new();
        let events = translate(
            GatewayChunk::File { mime_type: "application/vnd.api+json".into(), data: encoded },
            &mut buf,
            true,
        );
        assert!(matches!(&events[0], SessionEvent::Data { payload: DataPayload::Json(_), .. }));
    }

    #[test]
    fn text_file_chunk_is_utf8_decoded() {
        use base64::Engine;
        let encoded = base64::engine::general_purpose::STANDARD.encode(b"hello world");
        let mut buf = ToolCallBuffer::new();
        let events = translate(GatewayChunk::File { mime_type: "text/plain".into(), data: encoded }, &mut buf, true);
        assert_eq!(
            events,
            vec![SessionEvent::Data { mime_type: "text/plain".into(), payload: DataPayload::Text("hello world".into()) }]
        );
    }

    #[test]
    fn other_mime_type_passes_raw_bytes() {
        let mut buf = ToolCallBuffer::new();
        let events = translate(
            GatewayChunk::File { mime_type: "application/octet-stream".into(), data: "AAAA".into() },
            &mut buf,
            true,
        );
        assert_eq!(
            events,
            vec![SessionEvent::Data { mime_type: "application/octet-stream".into(), payload: DataPayload::Raw("AAAA".into()) }]
        );
    }

    #[test]
    fn malformed_mime_type_is_rejected() {
        let mut buf = ToolCallBuffer::new();
        let events = translate(GatewayChunk::File { mime_type: "NOT A MIME".into(), data: "x".into() }, &mut buf, true);
        assert!(events.is_empty());
    }

    #[test]
    fn tool_call_start_and_delta_emit_nothing() {
        let mut buf = ToolCallBuffer::new();
        assert!(translate(GatewayChunk::ToolCallStart { tool_call_id: "t".into(), name: "run".into() }, &mut buf, true).is_empty());
        assert!(translate(GatewayChunk::ToolCallDelta { tool_call_id: "t".into(), arguments_delta: "{}".into() }, &mut buf, true).is_empty());
    }

    #[test]
    fn tool_call_final_emits_one_tool_call_event() {
        let mut buf = ToolCallBuffer::new();
        translate(GatewayChunk::ToolCallStart { tool_call_id: "t".into(), name: "run".into() }, &mut buf, true);
        translate(GatewayChunk::ToolCallDelta { tool_call_id: "t".into(), arguments_delta: "{\"cmd\":\"ls\"}".into() }, &mut buf, true);
        let events = translate(
            GatewayChunk::ToolCallFinal { tool_call_id: "t".into(), name: "run".into(), arguments: String::new() },
            &mut buf,
            true,
        );
        assert_eq!(events, vec![SessionEvent::ToolCall { id: "t".into(), name: "run".into(), args: serde_json::json!({"cmd": "ls"}) }]);
    }

    #[test]
    fn finish_and_abort_and_ignored_emit_nothing() {
        let mut buf = ToolCallBuffer::new();
        assert!(translate(GatewayChunk::Finish { usage: Default::default(), applied_edits: vec![] }, &mut buf, true).is_empty());
        assert!(translate(GatewayChunk::Abort, &mut buf, true).is_empty());
        assert!(translate(GatewayChunk::Ignored, &mut buf, true).is_empty());
    }

    /// `data-*` chunks reach `translate` as `Ignored` (folded there by
    /// `GatewayChunk::from_wire`), not `Unknown` — so they never hit the
    /// `warn!` arm below.
    #[test]
    fn data_prefixed_chunk_from_wire_emits_nothing_via_ignored() {
        let chunk = GatewayChunk::from_wire("data-custom-progress", &serde_json::json!({}));
        assert_eq!(chunk, GatewayChunk::Ignored);
        let mut buf = ToolCallBuffer::new();
        assert!(translate(chunk, &mut buf, true).is_empty());
    }

    #[test]
    fn flush_finish_buffer_emits_buffered_calls_in_order() {
        let mut buf = ToolCallBuffer::new();
        translate(GatewayChunk::ToolCallStart { tool_call_id: "a".into(), name: "first".into() }, &mut buf, true);
        translate(GatewayChunk::ToolCallDelta { tool_call_id: "a".into(), arguments_delta: "{}".into() }, &mut buf, true);
        let flushed = flush_finish_buffer(&mut buf);
        assert_eq!(flushed, vec![SessionEvent::ToolCall { id: "a".into(), name: "first".into(), args: serde_json::json!({}) }]);
    }
}
