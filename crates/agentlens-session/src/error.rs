// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
use thiserror::Error;

use agentlens_hash::Sha16;

/// The error taxonomy a [`crate::ChatSession`] can terminate with.
///
/// None of these propagate past [`crate::ChatSession::run`] as a Rust
/// `Result::Err` the caller must handle with `?` — `run` always resolves to
/// a [`crate::SessionOutcome`] internally, reporting at most one error text
/// part to the host and transitioning the agent to `error` status. This
/// enum exists so that transition carries a typed reason for logging and
/// for the forensic dump, not as a control-flow exception.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum SessionError {
    /// Credentials could not be obtained; the session never reached the
    /// transport. Surfaced to the host as a surface-level error, not a
    /// text part in the chat stream.
    #[error("credentials unavailable")]
    AuthUnavailable,

    /// Network failure, HTTP ≥400, or a hard timeout.
    #[error("transport error: {0}")]
    Transport(String),

    /// The provider rejected the request because the prompt exceeded its
    /// context window. `learned_total` is the token count parsed out of the
    /// provider's error text; `fingerprint` identifies the conversation the
    /// bias should apply to on the next estimate.
    #[error("model token limit exceeded: {learned_total} tokens")]
    ModelTokenLimitExceeded { learned_total: u64, fingerprint: Sha16 },

    /// A chunk's JSON payload (typically tool-call arguments) failed to
    /// parse. Recovered by substituting `{}`; this variant exists so the
    /// occurrence is still logged and counted.
    #[error("failed to decode stream chunk: {0}")]
    StreamDecode(String),

    /// The host or user cancelled the turn. Not reported to the host as an
    /// error; the agent still transitions to `error` status so aging can
    /// eventually drop it.
    #[error("cancelled")]
    Cancelled,
}
