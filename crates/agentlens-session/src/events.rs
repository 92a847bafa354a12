// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
//! The host-facing event stream a [`crate::ChatSession`] drives `tx` with.
//!
//! Mirrors the teacher's `AgentEvent` shape (`sven_core::events`): a flat
//! enum sent over an `mpsc::Sender`, one variant per host-visible effect. A
//! thin presenter/host layer owns turning these into actual editor UI; this
//! crate only produces values.

use serde::Serialize;

/// One piece of host-visible output from a streamed turn.
#[derive(Debug, Clone, PartialEq)]
pub enum SessionEvent {
    /// Incremental assistant text.
    Text(String),
    /// Incremental reasoning/thinking text, only emitted when the host
    /// declared thinking-part support (see [`crate::SessionOptions`]).
    Thinking(String),
    /// An inline data part (image, JSON, decoded text, or raw bytes).
    Data { mime_type: String, payload: DataPayload },
    /// A complete tool call the model requested.
    ToolCall { id: String, name: String, args: serde_json::Value },
    /// Exactly one error text part, emitted only if nothing else was
    /// forwarded to the host yet when the session terminated abnormally.
    Error(String),
}

/// The decoded payload of a `file` chunk, classified by MIME type per the
/// streaming chunk protocol's table.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum DataPayload {
    /// `image/*`: passed through as the original base64 bytes.
    Image(String),
    /// `application/json` or any `+json` suffix: parsed into a `Value`.
    Json(serde_json::Value),
    /// `text/*`, `application/xml`, or any `+xml` suffix: UTF-8 decoded.
    Text(String),
    /// Any other MIME type: passed through as raw base64 bytes.
    Raw(String),
}

/// Usage and lifecycle summary surfaced to the presenter once a turn
/// finishes successfully.
#[derive(Debug, Clone, PartialEq)]
pub struct UsageEvent {
    pub input_tokens: u64,
    pub output_tokens: u64,
    pub max_input_tokens: Option<u64>,
    pub model_id: Option<String>,
    /// Context-compaction edits the provider applied directly (outside any
    /// tool call) during this turn.
    pub applied_edits: Vec<String>,
}

/// How a [`crate::ChatSession::run`] call resolved. Never propagated as an
/// `Err` to the caller — every branch has already done its own
/// `completeAgent`/`errorAgent` call and, for [`SessionOutcome::Errored`],
/// emitted at most one [`SessionEvent::Error`] through `tx`.
#[derive(Debug, Clone, PartialEq)]
pub enum SessionOutcome {
    Completed(UsageEvent),
    Cancelled,
    Errored(crate::error::SessionError),
}
