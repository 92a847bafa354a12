// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
//! Append-only diagnostic dump (spec.md §6, "forensic mode"), gated by
//! [`agentlens_config::DebugConfig::forensic_capture`].
//!
//! Every record is a hashed/length-only summary of a turn — never raw
//! message text — so a [`ForensicRecord`] is safe to ship off-device for
//! support investigations.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use agentlens_hash::Sha16;
use agentlens_model::Role;

/// Host-environment fields attached to every record, identifying which
/// editor/session produced it without identifying the user.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HostEnvironment {
    pub session_id: String,
    pub machine_id: String,
    pub app_name: String,
    pub ui_kind: String,
    pub language: String,
}

/// A hashed, length-only summary of one conversation message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MessageSummary {
    pub role: Role,
    pub part_types: Vec<String>,
    pub text_length: usize,
    pub content_hash: Sha16,
}

/// One line of the diagnostic dump.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ForensicRecord {
    /// Monotonically increasing within one process's lifetime.
    pub sequence: u64,
    /// ISO-8601, e.g. `2026-07-28T12:00:00Z`.
    pub timestamp: String,
    pub host: HostEnvironment,
    pub model_id: Option<String>,
    pub message_summaries: Vec<MessageSummary>,
    /// Hash only — the system prompt text itself never appears in a dump.
    pub system_prompt_hash: Option<Sha16>,
    pub tool_count: usize,
    pub tool_schema_hashes: Vec<Sha16>,
    pub chat_id: String,
    pub current_agent_id: Option<String>,
}

/// The diagnostic JSONL sink boundary. The core never opens a file itself;
/// the host supplies an implementation (or accepts [`NullForensicSink`] when
/// forensic capture is off).
#[async_trait]
pub trait ForensicSink: Send + Sync {
    async fn append(&self, record: ForensicRecord) -> anyhow::Result<()>;
}

/// The default sink when `debug.forensic_capture` is off: drops every record.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullForensicSink;

#[async_trait]
impl ForensicSink for NullForensicSink {
    async fn append(&self, _record: ForensicRecord) -> anyhow::Result<()> {
        Ok(())
    }
}

/// An in-memory sink for tests: records every append in order.
#[derive(Default)]
pub struct VecForensicSink {
    records: std::sync::Mutex<Vec<ForensicRecord>>,
}

impl VecForensicSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn snapshot(&self) -> Vec<ForensicRecord> {
        self.records.lock().expect("forensic sink mutex poisoned").clone()
    }
}

#[async_trait]
impl ForensicSink for VecForensicSink {
    async fn append(&self, record: ForensicRecord) -> anyhow::Result<()> {
        self.records.lock().expect("forensic sink mutex poisoned").push(record);
        Ok(())
    }
}
