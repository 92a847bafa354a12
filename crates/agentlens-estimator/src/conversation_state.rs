// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
use std::collections::HashMap;
use std::time::Instant;

use agentlens_hash::Sha16;

/// The last known-good input token total for one `(modelFamily, conversationId)` key.
#[derive(Debug, Clone)]
pub struct ConversationRecord {
    pub message_hashes: Vec<Sha16>,
    pub actual_tokens: u64,
    pub model_family: String,
    pub timestamp: Instant,
}

/// Result of [`ConversationState::lookup`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Lookup {
    /// The current message hash list matches a stored record exactly.
    Exact { known_tokens: u64 },
    /// The stored record is a proper prefix of the current message list.
    Prefix { known_tokens: u64, new_message_count: usize, new_message_indices: Vec<usize> },
    /// No usable prior record.
    None,
}

/// Per-`(modelFamily, conversationId)` cache of the last ground-truth input
/// token total, keyed by the conversation's ordered message hashes.
///
/// Never garbage collected explicitly: one record lives per key for the
/// lifetime of the process, same as the teacher's own process-wide caches.
#[derive(Debug, Default)]
pub struct ConversationState {
    records: HashMap<String, ConversationRecord>,
}

impl ConversationState {
    pub fn new() -> Self {
        Self::default()
    }

    fn key(model_family: &str, conversation_id: Option<&str>) -> String {
        match conversation_id {
            Some(id) => format!("{model_family}:{id}"),
            None => model_family.to_string(),
        }
    }

    /// Replace the stored record for this key.
    pub fn record_actual(
        &mut self,
        message_hashes: Vec<Sha16>,
        model_family: &str,
        actual_tokens: u64,
        conversation_id: Option<&str>,
        now: Instant,
    ) {
        let key = Self::key(model_family, conversation_id);
        self.records.insert(
            key,
            ConversationRecord {
                message_hashes,
                actual_tokens,
                model_family: model_family.to_string(),
                timestamp: now,
            },
        );
    }

    /// Classify `message_hashes` against the stored record for this key.
    pub fn lookup(
        &self,
        message_hashes: &[Sha16],
        model_family: &str,
        conversation_id: Option<&str>,
    ) -> Lookup {
        let key = Self::key(model_family, conversation_id);
        let Some(record) = self.records.get(&key) else {
            return Lookup::None;
        };

        if record.message_hashes.as_slice() == message_hashes {
            return Lookup::Exact { known_tokens: record.actual_tokens };
        }

        let stored_len = record.message_hashes.len();
        if message_hashes.len() > stored_len && message_hashes[..stored_len] == record.message_hashes[..] {
            let new_message_indices: Vec<usize> = (stored_len..message_hashes.len()).collect();
            return Lookup::Prefix {
                known_tokens: record.actual_tokens,
                new_message_count: new_message_indices.len(),
                new_message_indices,
            };
        }

        Lookup::None
    }
}
